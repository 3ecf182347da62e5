pub mod tlab;

pub use self::tlab::Tlab;
pub use self::tlab::TlabErgonomics;

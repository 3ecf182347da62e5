mod virtual_space;

pub use self::virtual_space::VirtualSpace;

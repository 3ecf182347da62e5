//! Epsilon: a collector that allocates and never reclaims.
//!
//! All objects live in one contiguous space that grows on demand up to `MaxHeapSize`. Collection
//! requests are logged and ignored. There are no barriers.

mod global;

pub use self::global::Epsilon;
pub use self::global::EPSILON_CONSTRAINTS;

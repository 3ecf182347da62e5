//! Region-based space of the concurrent collector.

mod bitmap;
#[allow(clippy::module_inception)]
mod region;
mod regionspace;

pub use self::bitmap::RegionBitmap;
pub use self::region::*;
pub use self::regionspace::*;

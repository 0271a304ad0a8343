mod backend;
mod backends;
mod result;

pub use backend::{shared, ObjectDetector, SharedDetector};
pub use backends::{build_backend, StubBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{BoundingBox, Detection};

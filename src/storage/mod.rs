pub mod photos;
pub mod registry;

pub use photos::{PhotoMetadata, PhotoStore};
pub use registry::{Registry, REGISTRY_FILENAME};

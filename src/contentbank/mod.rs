//! Content bank: stored content objects and the per-kind content types that
//! decide who may see or upload them.

pub mod content;
pub mod contenttype;
pub mod h5p;
pub mod registry;

pub use content::Content;
pub use contenttype::{ContentType, ContentTypeHandle, Feature};
pub use registry::Registry;

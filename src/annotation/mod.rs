pub mod codec;
mod store;

pub use store::{AnnotationError, AnnotationStore, AnnotationUpdate};

mod bbox;
mod render;
mod store;
pub use bbox::{BoundingBox, ViewId};
pub use render::{BoxCanvas, BoxStyle, RecordingCanvas};
pub use store::AnnotationStore;

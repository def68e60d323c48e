pub mod annotations;
pub mod cfg;
pub mod classes;
pub mod control;
pub mod events;
pub mod file_util;
pub mod label_io;
pub mod predictor;
pub mod remote;
pub mod result;
pub mod tracing_setup;
pub mod util;
pub use annotations::{AnnotationStore, BoundingBox, BoxCanvas, BoxStyle, RecordingCanvas};
pub use classes::ClassRegistry;
pub use control::{
    Control,
    navigator::{NavigationController, Population},
};
pub use events::{Event, KeyCode, event_of_key};
pub use file_util::get_test_folder;
pub use predictor::{Detection, PredictionWorker, Predictor, RestPredictor};
pub use vision_trainer_domain::{Corners, DisplayShape, NormalizedBox, PtI, ShapeI};

mod bb;
mod core;
pub mod result;
pub use bb::{Corners, NormalizedBox};
pub use crate::core::{DisplayShape, Point, PtI, Shape, ShapeF, ShapeI, TPtI};
pub use result::{to_vt, VtError, VtResult};

/// Boxes inside a 100x100 image that are used across tests
pub fn make_test_corners() -> Vec<Corners> {
    vec![
        Corners::new(0, 0, 10, 10),
        Corners::new(15, 5, 5, 15),
        Corners::new(9, 9, 19, 19),
    ]
}

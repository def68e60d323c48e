use serde::{Deserialize, Serialize};

pub type TPtI = i32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Shape<T> {
    pub w: T,
    pub h: T,
}
impl<T> Shape<T> {
    pub fn new(w: T, h: T) -> Self {
        Self { w, h }
    }
}
pub type ShapeI = Shape<u32>;
pub type ShapeF = Shape<f64>;

impl From<ShapeI> for ShapeF {
    fn from(value: ShapeI) -> Self {
        Self {
            w: f64::from(value.w),
            h: f64::from(value.h),
        }
    }
}
impl<T> From<(T, T)> for Shape<T> {
    fn from(value: (T, T)) -> Self {
        Self {
            w: value.0,
            h: value.1,
        }
    }
}

impl ShapeI {
    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Point<T> {
    pub x: T,
    pub y: T,
}
pub type PtI = Point<TPtI>;

impl<T> From<(T, T)> for Point<T> {
    fn from(value: (T, T)) -> Self {
        Self {
            x: value.0,
            y: value.1,
        }
    }
}
impl<T> From<Point<T>> for (T, T) {
    fn from(p: Point<T>) -> (T, T) {
        (p.x, p.y)
    }
}

// display coordinates need to fit into TPtI
fn zoomed(side: u32, zoom: u32) -> u32 {
    side.saturating_mul(zoom).min(TPtI::MAX as u32)
}

/// How an image on disk is shown for labeling. Large images are shrunk such that the longer side
/// does not exceed `max_side`, the result is magnified by an integer zoom factor. Boxes live in
/// the coordinates of [`DisplayShape::display`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DisplayShape {
    pub native: ShapeI,
    pub display: ShapeI,
}
impl DisplayShape {
    pub fn new(native: ShapeI, max_side: u32, zoom: u32) -> Self {
        let max_side = f64::from(max_side.max(1));
        let factor = (f64::from(native.w) / max_side)
            .max(f64::from(native.h) / max_side)
            .max(1.0);
        let resized_w = (f64::from(native.w) / factor) as u32;
        let resized_h = (f64::from(native.h) / factor) as u32;
        Self {
            native,
            display: Shape::new(zoomed(resized_w, zoom), zoomed(resized_h, zoom)),
        }
    }
    /// Factor from native pixel coordinates to display coordinates per axis
    pub fn scale(&self) -> (f64, f64) {
        if self.native.is_empty() {
            (1.0, 1.0)
        } else {
            (
                f64::from(self.display.w) / f64::from(self.native.w),
                f64::from(self.display.h) / f64::from(self.native.h),
            )
        }
    }
}

#[test]
fn test_display_shape() {
    let ds = DisplayShape::new(ShapeI::new(256, 128), 1000, 2);
    assert_eq!(ds.display, ShapeI::new(512, 256));
    assert_eq!(ds.scale(), (2.0, 2.0));
    let ds = DisplayShape::new(ShapeI::new(3000, 1500), 1000, 2);
    assert_eq!(ds.display, ShapeI::new(2000, 1000));
    let ds = DisplayShape::new(ShapeI::new(1000, 4000), 1000, 1);
    assert_eq!(ds.display, ShapeI::new(250, 1000));
    let ds = DisplayShape::new(ShapeI::new(0, 0), 1000, 2);
    assert_eq!(ds.scale(), (1.0, 1.0));
    let ds = DisplayShape::new(ShapeI::new(800, 600), 1000, u32::MAX);
    assert_eq!(ds.display, ShapeI::new(TPtI::MAX as u32, TPtI::MAX as u32));
}

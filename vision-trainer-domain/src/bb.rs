use serde::{Deserialize, Serialize};

use crate::{
    core::{PtI, ShapeF, ShapeI, TPtI},
    result::VtResult,
    vterr,
};

/// Rectangle given by two opposite corners. The corners are kept in the order they have been
/// drawn, i.e., `x1` might be larger than `x2`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Corners {
    pub x1: TPtI,
    pub y1: TPtI,
    pub x2: TPtI,
    pub y2: TPtI,
}

impl Corners {
    pub fn new(x1: TPtI, y1: TPtI, x2: TPtI, y2: TPtI) -> Self {
        Self { x1, y1, x2, y2 }
    }
    pub fn from_points(p1: PtI, p2: PtI) -> Self {
        Self::new(p1.x, p1.y, p2.x, p2.y)
    }
    pub fn x_min(&self) -> TPtI {
        self.x1.min(self.x2)
    }
    pub fn x_max(&self) -> TPtI {
        self.x1.max(self.x2)
    }
    pub fn y_min(&self) -> TPtI {
        self.y1.min(self.y2)
    }
    pub fn y_max(&self) -> TPtI {
        self.y1.max(self.y2)
    }
    pub fn w(&self) -> TPtI {
        (self.x1 - self.x2).abs()
    }
    pub fn h(&self) -> TPtI {
        (self.y1 - self.y2).abs()
    }
    /// Same rectangle with `x1 <= x2` and `y1 <= y2`
    #[must_use]
    pub fn ordered(&self) -> Self {
        Self::new(self.x_min(), self.y_min(), self.x_max(), self.y_max())
    }
    /// Multiplies all coordinates, fractions are truncated
    #[must_use]
    pub fn scale(&self, sx: f64, sy: f64) -> Self {
        Self::new(
            (f64::from(self.x1) * sx) as TPtI,
            (f64::from(self.y1) * sy) as TPtI,
            (f64::from(self.x2) * sx) as TPtI,
            (f64::from(self.y2) * sy) as TPtI,
        )
    }
    pub fn is_contained_in(&self, shape: ShapeI) -> bool {
        let w = shape.w as TPtI;
        let h = shape.h as TPtI;
        self.x_min() >= 0 && self.y_min() >= 0 && self.x_max() <= w && self.y_max() <= h
    }
    pub fn to_normalized(&self, shape: ShapeI) -> VtResult<NormalizedBox> {
        if shape.is_empty() {
            return Err(vterr!("cannot normalize {self:?} with respect to {shape:?}"));
        }
        let ShapeF { w, h } = shape.into();
        let (x1, y1, x2, y2) = (
            f64::from(self.x1),
            f64::from(self.y1),
            f64::from(self.x2),
            f64::from(self.y2),
        );
        Ok(NormalizedBox {
            center_x: (x1 + x2) / 2.0 / w,
            center_y: (y1 + y2) / 2.0 / h,
            field_h: f64::from(self.w()) / w,
            field_w: f64::from(self.h()) / h,
        })
    }
}

/// Box in coordinates relative to the image size as it is stored in label files.
///
/// The extent fields are named after the file layout. `field_h` carries the extent along the
/// x-axis and `field_w` the extent along the y-axis. Existing label files depend on this order.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Default)]
pub struct NormalizedBox {
    pub center_x: f64,
    pub center_y: f64,
    pub field_h: f64,
    pub field_w: f64,
}

// Values a hair below an integer are the result of dividing by the image size and multiplying
// again. They are meant to be that integer.
const TRUNCATION_EPS: f64 = 1e-6;

fn truncate(x: f64) -> TPtI {
    (x + TRUNCATION_EPS) as TPtI
}

impl NormalizedBox {
    /// Center and half extents are truncated separately before they are combined.
    pub fn to_corners(&self, shape: ShapeI) -> Corners {
        let ShapeF { w, h } = shape.into();
        let cx = truncate(self.center_x * w);
        let cy = truncate(self.center_y * h);
        let half_x = truncate(self.field_h * w / 2.0);
        let half_y = truncate(self.field_w * h / 2.0);
        Corners::new(cx - half_x, cy - half_y, cx + half_x, cy + half_y)
    }
}

#[cfg(test)]
fn close(c1: &Corners, c2: &Corners) -> bool {
    (c1.x1 - c2.x1).abs() <= 1
        && (c1.y1 - c2.y1).abs() <= 1
        && (c1.x2 - c2.x2).abs() <= 1
        && (c1.y2 - c2.y2).abs() <= 1
}

#[test]
fn test_normalize() {
    let shape = ShapeI::new(200, 100);
    let c = Corners::new(10, 20, 50, 60);
    let n = c.to_normalized(shape).unwrap();
    assert!((n.center_x - 0.15).abs() < 1e-12);
    assert!((n.center_y - 0.4).abs() < 1e-12);
    assert!((n.field_h - 0.2).abs() < 1e-12);
    assert!((n.field_w - 0.4).abs() < 1e-12);
    assert!(close(&n.to_corners(shape), &c));

    // drawing direction is lost
    let c = Corners::new(50, 60, 10, 20);
    let back = c.to_normalized(shape).unwrap().to_corners(shape);
    assert!(close(&back, &c.ordered()));

    assert!(c.to_normalized(ShapeI::new(0, 10)).is_err());
}

#[test]
fn test_swapped_extent_fields() {
    // a wide and flat box
    let shape = ShapeI::new(100, 100);
    let n = Corners::new(0, 40, 100, 60).to_normalized(shape).unwrap();
    assert!((n.field_h - 1.0).abs() < 1e-12);
    assert!((n.field_w - 0.2).abs() < 1e-12);
    let n = NormalizedBox {
        center_x: 0.5,
        center_y: 0.5,
        field_h: 0.5,
        field_w: 0.1,
    };
    assert_eq!(n.to_corners(shape), Corners::new(25, 45, 75, 55));
}

#[test]
fn test_float_noise() {
    // 0.29 * 100 is slightly less than 29
    let shape = ShapeI::new(100, 100);
    let c = Corners::new(0, 0, 58, 58);
    assert_eq!(c.to_normalized(shape).unwrap().to_corners(shape), c);
}

#[test]
fn test_corners() {
    let c = Corners::new(30, 5, 10, 25);
    assert_eq!(c.w(), 20);
    assert_eq!(c.h(), 20);
    assert_eq!(c.ordered(), Corners::new(10, 5, 30, 25));
    assert_eq!(c.scale(2.0, 0.5), Corners::new(60, 2, 20, 12));
    assert!(c.is_contained_in(ShapeI::new(30, 25)));
    assert!(!c.is_contained_in(ShapeI::new(29, 25)));
    assert!(!Corners::new(-1, 0, 3, 3).is_contained_in(ShapeI::new(30, 25)));
}

use serde::{Deserialize, Serialize};
use vision_trainer_domain::{Corners, TPtI};

use crate::classes::ClassRegistry;

/// Handle of the on-screen representation of a box, handed out by the canvas
pub type ViewId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BoundingBox {
    pub class_index: usize,
    pub corners: Corners,
    #[serde(skip)]
    pub id: Option<ViewId>,
    #[serde(default)]
    pub selected: bool,
}

impl BoundingBox {
    pub fn new(class_index: usize, corners: Corners) -> Self {
        Self {
            class_index,
            corners,
            id: None,
            selected: false,
        }
    }
    pub fn x1(&self) -> TPtI {
        self.corners.x1
    }
    pub fn y1(&self) -> TPtI {
        self.corners.y1
    }
    pub fn x2(&self) -> TPtI {
        self.corners.x2
    }
    pub fn y2(&self) -> TPtI {
        self.corners.y2
    }
    /// Row of the annotation list
    pub fn list_row(&self, classes: &ClassRegistry) -> String {
        let class_name = classes.name(self.class_index).unwrap_or("?");
        let Corners { x1, y1, x2, y2 } = self.corners;
        format!(
            "{{'class':'{class_name}', 'x1':{x1}, 'y1':{y1}, 'x2':{x2}, 'y2':{y2}, 'selected':{}}}",
            self.selected
        )
    }
}

#[test]
fn test_list_row() {
    let classes = ClassRegistry::from_lines("car\ntruck").unwrap();
    let mut bb = BoundingBox::new(1, Corners::new(1, 2, 3, 4));
    bb.selected = true;
    assert_eq!(
        bb.list_row(&classes),
        "{'class':'truck', 'x1':1, 'y1':2, 'x2':3, 'y2':4, 'selected':true}"
    );
    bb.class_index = 5;
    assert!(bb.list_row(&classes).starts_with("{'class':'?'"));
}

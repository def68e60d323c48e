use std::mem;

use tracing::{debug, info};
use vision_trainer_domain::{Corners, PtI, VtResult, vterr};

use super::{
    bbox::{BoundingBox, ViewId},
    render::{BoxCanvas, BoxStyle},
};
use crate::classes::ClassRegistry;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct BoxInProgress {
    class_index: usize,
    anchor: PtI,
}

/// Boxes of the image that is currently open. All mutations go through here such that at most one
/// box is selected at any time and the canvas is redrawn after each visible change.
#[derive(Clone, Debug, Default)]
pub struct AnnotationStore {
    boxes: Vec<BoundingBox>,
    in_progress: Option<BoxInProgress>,
    cursor: usize,
    active_class: usize,
    redraw_requested: bool,
    // views of boxes that are gone but still on screen
    stale_view_ids: Vec<ViewId>,
}

impl AnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn boxes(&self) -> &[BoundingBox] {
        &self.boxes
    }
    pub fn len(&self) -> usize {
        self.boxes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
    pub fn cursor(&self) -> usize {
        self.cursor
    }
    pub fn selected_index(&self) -> Option<usize> {
        self.boxes.iter().position(|bb| bb.selected)
    }
    pub fn active_class(&self) -> usize {
        self.active_class
    }
    pub fn set_active_class(
        &mut self,
        class_index: usize,
        classes: &ClassRegistry,
    ) -> VtResult<()> {
        self.active_class = classes.check_index(class_index)?;
        Ok(())
    }
    pub fn is_box_in_progress(&self) -> bool {
        self.in_progress.is_some()
    }
    /// Rectangle between the anchor of the box in progress and the mouse
    pub fn preview(&self, mouse: PtI) -> Option<Corners> {
        self.in_progress
            .map(|bip| Corners::from_points(bip.anchor, mouse))
    }
    pub fn redraw_requested(&self) -> bool {
        self.redraw_requested
    }
    fn request_redraw(&mut self) {
        self.redraw_requested = true;
    }
    fn forget_boxes(&mut self) -> Vec<BoundingBox> {
        let boxes = mem::take(&mut self.boxes);
        self.stale_view_ids
            .extend(boxes.iter().filter_map(|bb| bb.id));
        boxes
    }

    /// Replaces all boxes, e.g., after a new image has been opened. The first box is selected.
    pub fn populate(&mut self, boxes: impl IntoIterator<Item = BoundingBox>) {
        self.forget_boxes();
        self.in_progress = None;
        self.boxes = boxes
            .into_iter()
            .map(|mut bb| {
                bb.selected = false;
                bb.id = None;
                bb
            })
            .collect();
        self.cursor = 0;
        if !self.boxes.is_empty() {
            self.select(0);
        }
        self.request_redraw();
    }

    /// Starts a new box at `pos`, ignored if there is already one in progress.
    pub fn begin_box(&mut self, class_index: usize, pos: PtI) -> bool {
        if self.in_progress.is_some() {
            debug!("there is already a box in progress");
            false
        } else {
            self.in_progress = Some(BoxInProgress {
                class_index,
                anchor: pos,
            });
            true
        }
    }

    /// Finalizes the box in progress, the new box is the only selected one.
    pub fn complete_box(&mut self, pos: PtI) -> VtResult<usize> {
        let bip = self
            .in_progress
            .take()
            .ok_or_else(|| vterr!("cannot complete a box, none has been started"))?;
        for bb in &mut self.boxes {
            bb.selected = false;
        }
        let mut bb = BoundingBox::new(bip.class_index, Corners::from_points(bip.anchor, pos));
        bb.selected = true;
        self.boxes.push(bb);
        self.cursor = self.boxes.len() - 1;
        self.request_redraw();
        Ok(self.cursor)
    }

    pub fn cancel_box(&mut self) -> bool {
        self.in_progress.take().is_some()
    }

    /// The first click anchors a box with the active class, the second one completes it.
    pub fn click(&mut self, pos: PtI) -> VtResult<Option<usize>> {
        if self.in_progress.is_some() {
            self.complete_box(pos).map(Some)
        } else {
            self.begin_box(self.active_class, pos);
            Ok(None)
        }
    }

    pub fn delete_selected(&mut self) -> usize {
        let n_before = self.boxes.len();
        let cursor_box_removed = self.boxes.get(self.cursor).is_some_and(|bb| bb.selected);
        let (removed, kept): (Vec<_>, Vec<_>) =
            mem::take(&mut self.boxes).into_iter().partition(|bb| bb.selected);
        self.boxes = kept;
        self.stale_view_ids
            .extend(removed.iter().filter_map(|bb| bb.id));
        let n_removed = n_before - self.boxes.len();
        if n_removed > 0 {
            if cursor_box_removed || self.cursor >= self.boxes.len() {
                self.cursor = 0;
            }
            if !self.boxes.is_empty() {
                self.select(self.cursor);
            }
            self.request_redraw();
        }
        n_removed
    }

    pub fn delete_all(&mut self) {
        self.forget_boxes();
        self.cursor = 0;
        self.request_redraw();
    }

    /// Selects exactly the box at `index`. Indices beyond the last box wrap around.
    pub fn select(&mut self, index: usize) {
        if self.boxes.is_empty() {
            return;
        }
        let index = index % self.boxes.len();
        for (i, bb) in self.boxes.iter_mut().enumerate() {
            bb.selected = i == index;
        }
        self.cursor = index;
        self.request_redraw();
    }

    pub fn select_next(&mut self) {
        if self.boxes.is_empty() {
            return;
        }
        let next = if self.cursor + 1 >= self.boxes.len() {
            0
        } else {
            self.cursor + 1
        };
        self.select(next);
    }

    pub fn select_previous(&mut self) {
        if self.boxes.is_empty() {
            return;
        }
        let prev = if self.cursor == 0 || self.cursor > self.boxes.len() {
            self.boxes.len() - 1
        } else {
            self.cursor - 1
        };
        self.select(prev);
    }

    /// Assigns a new class to the selected box. With `advance`, the next box is selected
    /// afterwards.
    pub fn reclassify_selected(
        &mut self,
        class_index: usize,
        classes: &ClassRegistry,
        advance: bool,
    ) -> VtResult<()> {
        let class_index = classes.check_index(class_index)?;
        for bb in self.boxes.iter_mut().filter(|bb| bb.selected) {
            bb.class_index = class_index;
        }
        if advance {
            self.select_next();
        }
        self.request_redraw();
        Ok(())
    }

    /// Removes every view of this image from the canvas and draws all boxes anew.
    pub fn render(&mut self, canvas: &mut dyn BoxCanvas) {
        for id in self.stale_view_ids.drain(..) {
            canvas.remove_box(id);
        }
        for bb in &mut self.boxes {
            if let Some(id) = bb.id.take() {
                canvas.remove_box(id);
            }
            bb.id = Some(canvas.draw_box(&bb.corners, BoxStyle::of(bb)));
        }
        self.redraw_requested = false;
    }

    pub fn render_if_requested(&mut self, canvas: &mut dyn BoxCanvas) -> bool {
        if self.redraw_requested {
            self.render(canvas);
            true
        } else {
            false
        }
    }

    pub fn list_rows(&self, classes: &ClassRegistry) -> Vec<String> {
        self.boxes.iter().map(|bb| bb.list_row(classes)).collect()
    }

    pub fn log_summary(&self) {
        info!(
            "{} boxes, selected {:?}, box in progress {}",
            self.boxes.len(),
            self.selected_index(),
            self.in_progress.is_some()
        );
    }
}

#[cfg(test)]
use {
    super::render::RecordingCanvas,
    rand::{Rng, SeedableRng, rngs::StdRng},
    vision_trainer_domain::make_test_corners,
};

#[cfg(test)]
fn make_classes() -> ClassRegistry {
    ClassRegistry::from_lines("car\ntruck\nbus").unwrap()
}

#[cfg(test)]
fn make_store() -> AnnotationStore {
    let mut store = AnnotationStore::new();
    store.populate(
        make_test_corners()
            .into_iter()
            .map(|c| BoundingBox::new(0, c)),
    );
    store
}

#[cfg(test)]
fn n_selected(store: &AnnotationStore) -> usize {
    store.boxes().iter().filter(|bb| bb.selected).count()
}

#[test]
fn test_draw_box() {
    let mut store = AnnotationStore::new();
    assert!(store.complete_box((1, 1).into()).is_err());
    assert!(store.begin_box(1, (10, 20).into()));
    assert!(!store.begin_box(2, (0, 0).into()));
    assert_eq!(store.preview((5, 5).into()), Some(Corners::new(10, 20, 5, 5)));
    assert_eq!(store.complete_box((5, 6).into()).unwrap(), 0);
    assert_eq!(store.boxes()[0].class_index, 1);
    assert_eq!(store.boxes()[0].corners, Corners::new(10, 20, 5, 6));
    assert!(store.boxes()[0].selected);
    assert!(store.begin_box(2, (30, 30).into()));
    store.complete_box((40, 40).into()).unwrap();
    assert_eq!(n_selected(&store), 1);
    assert!(store.boxes()[1].selected);
    assert_eq!(store.cursor(), 1);
}

#[test]
fn test_cancel_and_click() {
    let classes = make_classes();
    let mut store = AnnotationStore::new();
    assert!(!store.cancel_box());
    store.set_active_class(2, &classes).unwrap();
    assert!(store.set_active_class(3, &classes).is_err());
    assert_eq!(store.active_class(), 2);
    assert_eq!(store.click((1, 1).into()).unwrap(), None);
    assert!(store.cancel_box());
    assert!(store.is_empty());
    assert_eq!(store.click((1, 1).into()).unwrap(), None);
    assert_eq!(store.click((9, 9).into()).unwrap(), Some(0));
    assert_eq!(store.boxes()[0].class_index, 2);
    assert!(!store.is_box_in_progress());
}

#[test]
fn test_populate_selects_first() {
    let store = make_store();
    assert_eq!(store.len(), 3);
    assert_eq!(store.selected_index(), Some(0));
    assert_eq!(n_selected(&store), 1);
    let mut store = AnnotationStore::new();
    store.populate(vec![]);
    assert_eq!(store.selected_index(), None);
}

#[test]
fn test_select() {
    let mut store = make_store();
    store.select(2);
    assert_eq!(store.selected_index(), Some(2));
    store.select_next();
    assert_eq!(store.selected_index(), Some(0));
    store.select_previous();
    assert_eq!(store.selected_index(), Some(2));
    store.select_previous();
    assert_eq!(store.selected_index(), Some(1));
    store.select(7);
    assert_eq!(store.selected_index(), Some(1));
    assert_eq!(n_selected(&store), 1);

    let mut empty = AnnotationStore::new();
    empty.select(0);
    empty.select_next();
    empty.select_previous();
    assert!(empty.is_empty());
}

#[test]
fn test_delete_selected() {
    let mut store = make_store();
    store.select(1);
    assert_eq!(store.delete_selected(), 1);
    assert_eq!(store.len(), 2);
    assert_eq!(store.cursor(), 0);
    assert_eq!(store.selected_index(), Some(0));
    assert_eq!(store.boxes()[1].corners, make_test_corners()[2]);
    assert_eq!(store.delete_selected(), 1);
    assert_eq!(store.delete_selected(), 1);
    assert!(store.is_empty());
    assert_eq!(store.delete_selected(), 0);
}

#[test]
fn test_delete_all_idempotent() {
    let mut store = make_store();
    store.select(2);
    store.delete_all();
    let boxes_once = store.boxes().to_vec();
    let cursor_once = store.cursor();
    store.delete_all();
    assert_eq!(store.boxes(), &boxes_once[..]);
    assert_eq!(store.cursor(), cursor_once);
    assert!(store.is_empty());
    assert_eq!(store.cursor(), 0);
}

#[test]
fn test_reclassify() {
    let classes = make_classes();
    let mut store = make_store();
    store.select(1);
    assert!(store.reclassify_selected(3, &classes, true).is_err());
    assert!(store.boxes().iter().all(|bb| bb.class_index == 0));
    assert_eq!(store.selected_index(), Some(1));

    store.reclassify_selected(2, &classes, false).unwrap();
    assert_eq!(store.boxes()[1].class_index, 2);
    assert_eq!(store.selected_index(), Some(1));

    store.reclassify_selected(1, &classes, true).unwrap();
    assert_eq!(store.boxes()[1].class_index, 1);
    assert_eq!(store.selected_index(), Some(2));
    assert_eq!(store.boxes()[0].class_index, 0);
}

#[test]
fn test_render() {
    let classes = make_classes();
    let mut canvas = RecordingCanvas::default();
    let mut store = make_store();
    assert!(store.render_if_requested(&mut canvas));
    assert!(!store.render_if_requested(&mut canvas));
    assert_eq!(canvas.shown().len(), 3);
    assert!(store.boxes().iter().all(|bb| bb.id.is_some()));
    let selected_style = canvas.shown()[0].2;
    assert_eq!(selected_style.line_width, 2);
    assert_eq!(canvas.shown()[1].2.line_width, 1);

    store.select(1);
    store.reclassify_selected(2, &classes, false).unwrap();
    store.render(&mut canvas);
    assert_eq!(canvas.shown().len(), 3);
    assert_eq!(canvas.n_draw_calls(), 6);
    let (_, corners, style) = canvas.shown()[1];
    assert_eq!(corners, make_test_corners()[1]);
    assert_eq!(style.color, "blue");

    store.delete_selected();
    store.render(&mut canvas);
    assert_eq!(canvas.shown().len(), 2);
    store.delete_all();
    assert!(store.render_if_requested(&mut canvas));
    assert!(canvas.shown().is_empty());
    store.populate(vec![BoundingBox::new(0, Corners::new(0, 0, 1, 1))]);
    store.render(&mut canvas);
    assert_eq!(canvas.shown().len(), 1);
}

#[test]
fn test_selection_exclusive_under_random_ops() {
    let classes = make_classes();
    let mut rng = StdRng::seed_from_u64(42);
    let mut store = AnnotationStore::new();
    for _ in 0..2000 {
        let x = rng.gen_range(0..100);
        let y = rng.gen_range(0..100);
        match rng.gen_range(0..9) {
            0 => {
                store.begin_box(rng.gen_range(0..3), (x, y).into());
            }
            1 => {
                let _ = store.complete_box((x, y).into());
            }
            2 => store.select(rng.gen_range(0..10)),
            3 => store.select_next(),
            4 => store.select_previous(),
            5 => {
                let advance = rng.gen_bool(0.5);
                let _ = store.reclassify_selected(rng.gen_range(0..5), &classes, advance);
            }
            6 => {
                store.delete_selected();
            }
            7 if rng.gen_bool(0.1) => store.delete_all(),
            _ => {
                store.cancel_box();
            }
        }
        assert!(n_selected(&store) <= 1);
        if !store.is_empty() && store.selected_index().is_some() {
            assert_eq!(store.selected_index(), Some(store.cursor()));
        }
        assert!(store.boxes().iter().all(|bb| bb.class_index < classes.len()));
    }
}

use vision_trainer_domain::Corners;

use super::bbox::{BoundingBox, ViewId};
use crate::classes::class_color;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoxStyle {
    pub color: &'static str,
    pub line_width: u8,
}
impl BoxStyle {
    pub fn of(bb: &BoundingBox) -> Self {
        Self {
            color: class_color(bb.class_index),
            line_width: if bb.selected { 2 } else { 1 },
        }
    }
}

/// Surface the boxes of the current image are shown on. Implemented by the presentation layer.
pub trait BoxCanvas {
    fn draw_box(&mut self, corners: &Corners, style: BoxStyle) -> ViewId;
    fn remove_box(&mut self, id: ViewId);
}

/// Canvas without a screen that remembers what is currently shown. Used for headless runs.
#[derive(Clone, Debug, Default)]
pub struct RecordingCanvas {
    next_id: ViewId,
    shown: Vec<(ViewId, Corners, BoxStyle)>,
    n_draw_calls: usize,
}
impl RecordingCanvas {
    pub fn shown(&self) -> &[(ViewId, Corners, BoxStyle)] {
        &self.shown
    }
    pub fn n_draw_calls(&self) -> usize {
        self.n_draw_calls
    }
}
impl BoxCanvas for RecordingCanvas {
    fn draw_box(&mut self, corners: &Corners, style: BoxStyle) -> ViewId {
        self.next_id += 1;
        self.n_draw_calls += 1;
        self.shown.push((self.next_id, *corners, style));
        self.next_id
    }
    fn remove_box(&mut self, id: ViewId) {
        self.shown.retain(|(shown_id, _, _)| *shown_id != id);
    }
}

use serde::{Deserialize, Serialize};

/// Everything the presentation layer can ask for. Coordinates are in display space.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// Anchors a new box with the active class
    DrawStart { x: i32, y: i32 },
    DrawComplete { x: i32, y: i32 },
    /// Starts a box or completes the one in progress
    Click { x: i32, y: i32 },
    Cancel,
    SelectIndex { index: usize },
    SelectNext,
    SelectPrevious,
    DeleteSelected,
    DeleteAll,
    /// Keys 1 to 9
    Reclassify { digit: u8 },
    SetActiveClass { class_index: usize },
    ToggleAdvance,
    Prev,
    Next,
    /// 1-based position in the batch
    Goto { n: usize },
}

impl Event {
    /// Whether the event leaves the current image
    pub fn is_navigation(&self) -> bool {
        matches!(self, Event::Prev | Event::Next | Event::Goto { .. })
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum KeyCode {
    A,
    C,
    D,
    X,
    Z,
    Escape,
    Tab,
    Up,
    Down,
    Key1,
    Key2,
    Key3,
    Key4,
    Key5,
    Key6,
    Key7,
    Key8,
    Key9,
}

impl KeyCode {
    pub fn digit(&self) -> Option<u8> {
        match event_of_key(*self) {
            Event::Reclassify { digit } => Some(digit),
            _ => None,
        }
    }
}

/// Default key bindings
pub fn event_of_key(key: KeyCode) -> Event {
    match key {
        KeyCode::A => Event::Prev,
        KeyCode::D => Event::Next,
        KeyCode::C | KeyCode::Escape => Event::Cancel,
        KeyCode::Z => Event::DeleteSelected,
        KeyCode::X => Event::DeleteAll,
        KeyCode::Up | KeyCode::Tab => Event::SelectPrevious,
        KeyCode::Down => Event::SelectNext,
        KeyCode::Key1 => Event::Reclassify { digit: 1 },
        KeyCode::Key2 => Event::Reclassify { digit: 2 },
        KeyCode::Key3 => Event::Reclassify { digit: 3 },
        KeyCode::Key4 => Event::Reclassify { digit: 4 },
        KeyCode::Key5 => Event::Reclassify { digit: 5 },
        KeyCode::Key6 => Event::Reclassify { digit: 6 },
        KeyCode::Key7 => Event::Reclassify { digit: 7 },
        KeyCode::Key8 => Event::Reclassify { digit: 8 },
        KeyCode::Key9 => Event::Reclassify { digit: 9 },
    }
}

#[test]
fn test_keys() {
    assert_eq!(event_of_key(KeyCode::Key3), Event::Reclassify { digit: 3 });
    assert_eq!(event_of_key(KeyCode::Tab), Event::SelectPrevious);
    assert_eq!(event_of_key(KeyCode::Escape), Event::Cancel);
    assert_eq!(event_of_key(KeyCode::Key9), Event::Reclassify { digit: 9 });
    assert_eq!(KeyCode::Key1.digit(), Some(1));
    assert_eq!(KeyCode::X.digit(), None);
    assert!(event_of_key(KeyCode::D).is_navigation());
    assert!(!event_of_key(KeyCode::Z).is_navigation());
}

#[test]
fn test_serde() {
    let e: Event = serde_json::from_str(r#"{"event": "click", "x": 3, "y": 4}"#).unwrap();
    assert_eq!(e, Event::Click { x: 3, y: 4 });
    let e: Event = serde_json::from_str(r#"{"event": "goto", "n": 2}"#).unwrap();
    assert_eq!(e, Event::Goto { n: 2 });
    assert_eq!(
        serde_json::to_string(&Event::DeleteAll).unwrap(),
        r#"{"event":"delete_all"}"#
    );
    assert!(serde_json::from_str::<Event>(r#"{"event": "explode"}"#).is_err());
}

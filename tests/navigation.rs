use std::{path::PathBuf, sync::Arc, time::Duration};

use vision_trainer_domain::VtResult;
use vtlib::{
    ClassRegistry, Control, Corners, Detection, Event, Predictor, RecordingCanvas,
    cfg::{Cfg, CfgStore, get_cfg_path},
    defer_folder_removal,
    file_util::{self, make_tmp_folder},
    tracing_setup::init_tracing_for_tests,
};

fn make_batch(prefix: &str, n_images: usize) -> PathBuf {
    let folder = make_tmp_folder(prefix).unwrap();
    for i in 1..=n_images {
        image::RgbImage::new(64, 48)
            .save(folder.join(format!("frame_{i}.jpg")))
            .unwrap();
    }
    folder
}

fn make_control(folder: &PathBuf) -> Control {
    let cfg = CfgStore::new(Cfg::default(), get_cfg_path(folder));
    let classes = ClassRegistry::from_lines("car\ntruck\nbus\nbike").unwrap();
    Control::new(cfg, classes)
}

#[test]
fn test_box_survives_navigation() {
    init_tracing_for_tests();
    let folder = make_batch("it-nav", 3);
    defer_folder_removal!(&folder);
    let mut ctrl = make_control(&folder);
    ctrl.load_batch(&folder).unwrap();
    ctrl.handle(Event::SetActiveClass { class_index: 3 }).unwrap();
    ctrl.handle(Event::Click { x: 100, y: 80 }).unwrap();
    ctrl.handle(Event::Click { x: 20, y: 10 }).unwrap();
    ctrl.handle(Event::Next).unwrap();
    assert_eq!(ctrl.navigator().progress().unwrap(), "2/3");
    assert!(ctrl.store().is_empty());
    ctrl.handle(Event::Prev).unwrap();
    let boxes = ctrl.store().boxes();
    assert_eq!(boxes.len(), 1);
    assert_eq!(boxes[0].class_index, 3);
    // the drawing direction is not stored
    assert_eq!(boxes[0].corners, Corners::new(20, 10, 100, 80));
    assert!(boxes[0].selected);
    let content =
        file_util::read_to_string(folder.join("labels").join("frame_1.txt")).unwrap();
    assert_eq!(content.lines().count(), 1);
    assert!(content.starts_with("3 "));
}

#[test]
fn test_empty_batch_stays_empty() {
    init_tracing_for_tests();
    let folder = make_batch("it-empty", 0);
    defer_folder_removal!(&folder);
    file_util::write(folder.join("frame_1.png"), "wrong extension").unwrap();
    let mut ctrl = make_control(&folder);
    assert!(ctrl.load_batch(&folder).is_err());
    assert!(!ctrl.navigator().is_loaded());
    assert!(ctrl.handle(Event::Next).is_err());
    assert!(ctrl.handle(Event::Click { x: 1, y: 1 }).is_err());
    assert_eq!(ctrl.status(), "no batch [advance on]");
}

#[test]
fn test_out_of_range_goto_does_not_persist() {
    init_tracing_for_tests();
    let folder = make_batch("it-goto", 3);
    defer_folder_removal!(&folder);
    let mut ctrl = make_control(&folder);
    ctrl.load_batch(&folder).unwrap();
    ctrl.handle(Event::Click { x: 2, y: 2 }).unwrap();
    ctrl.handle(Event::Click { x: 12, y: 12 }).unwrap();
    assert!(ctrl.handle(Event::Goto { n: 4 }).is_err());
    assert!(!folder.join("labels").join("frame_1.txt").exists());
    assert_eq!(ctrl.store().len(), 1);
    ctrl.handle(Event::Goto { n: 3 }).unwrap();
    assert!(folder.join("labels").join("frame_1.txt").exists());
    assert_eq!(ctrl.navigator().current_stem(), Some("frame_3"));
}

struct OfflinePredictor;
impl Predictor for OfflinePredictor {
    fn predict(&self, _: &std::path::Path) -> VtResult<Vec<Detection>> {
        Err(vision_trainer_domain::vterr!("model not reachable"))
    }
}

struct Detector;
impl Predictor for Detector {
    fn predict(&self, _: &std::path::Path) -> VtResult<Vec<Detection>> {
        Ok(vec![
            Detection {
                class_index: 1,
                x1: 4,
                y1: 4,
                x2: 20,
                y2: 30,
            },
            Detection {
                class_index: 9,
                x1: 0,
                y1: 0,
                x2: 5,
                y2: 5,
            },
            Detection {
                class_index: 0,
                x1: 30,
                y1: 10,
                x2: 50,
                y2: 40,
            },
        ])
    }
}

#[test]
fn test_unavailable_predictor_leaves_image_unlabeled() {
    init_tracing_for_tests();
    let folder = make_batch("it-offline", 2);
    defer_folder_removal!(&folder);
    let mut ctrl =
        make_control(&folder).with_predictor(Arc::new(OfflinePredictor), Duration::from_secs(5));
    ctrl.load_batch(&folder).unwrap();
    assert!(!ctrl.wait_for_prediction());
    assert!(ctrl.store().is_empty());
    ctrl.handle(Event::Next).unwrap();
    assert!(!ctrl.wait_for_prediction());
    assert!(ctrl.store().is_empty());
}

#[test]
fn test_predictions_are_scaled_and_filtered() {
    init_tracing_for_tests();
    let folder = make_batch("it-predict", 2);
    defer_folder_removal!(&folder);
    let mut ctrl = make_control(&folder).with_predictor(Arc::new(Detector), Duration::from_secs(5));
    ctrl.load_batch(&folder).unwrap();
    assert!(ctrl.wait_for_prediction());
    let boxes = ctrl.store().boxes();
    assert_eq!(boxes.len(), 2);
    assert_eq!(boxes[0].corners, Corners::new(8, 8, 40, 60));
    assert_eq!(boxes[1].corners, Corners::new(60, 20, 100, 80));
    assert!(boxes[0].selected);
    assert!(!boxes[1].selected);
    let mut canvas = RecordingCanvas::default();
    assert!(ctrl.render_if_requested(&mut canvas));
    let widths = canvas
        .shown()
        .iter()
        .map(|(_, _, style)| style.line_width)
        .collect::<Vec<_>>();
    assert_eq!(widths, vec![2, 1]);
}

#[test]
fn test_labels_with_invalid_bytes_survive_navigation() {
    init_tracing_for_tests();
    let folder = make_batch("it-utf8", 2);
    defer_folder_removal!(&folder);
    let label_file = folder.join("labels").join("frame_1.txt");
    file_util::create_dir_all(folder.join("labels")).unwrap();
    file_util::write(&label_file, b"0 0.5 0.5 0.2 0.2\n1 0.3 0.3 0.1 0.1 \xff\n").unwrap();
    let mut ctrl = make_control(&folder);
    ctrl.load_batch(&folder).unwrap();
    assert_eq!(ctrl.navigator().current_label_path(), Some(label_file.clone()));
    assert_eq!(ctrl.store().len(), 1);
    ctrl.handle(Event::Next).unwrap();
    let content = file_util::read_to_string(&label_file).unwrap();
    assert_eq!(content.lines().count(), 1);
    assert!(content.starts_with("0 0.5 0.5 "));
}

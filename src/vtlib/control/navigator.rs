use std::path::{Path, PathBuf};

use tracing::{info, warn};
use vision_trainer_domain::{DisplayShape, ShapeI, VtResult, vterr};

use crate::{
    annotations::{AnnotationStore, BoundingBox},
    cfg::Cfg,
    classes::ClassRegistry,
    file_util,
    label_io::{self, label_path},
    predictor::{self, PredictionResult},
    util::natural_cmp,
};

fn next(cur: usize, total: usize) -> usize {
    if cur < total { cur + 1 } else { total }
}

fn prev(cur: usize) -> usize {
    if cur > 1 { cur - 1 } else { 1 }
}

/// How the boxes of a freshly opened image have been obtained
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Population {
    /// from the label file with this many boxes
    Labels(usize),
    /// there is no label file yet, a prediction for this image should be requested
    Unlabeled(PathBuf),
}

#[derive(Clone, Debug)]
struct Batch {
    folder: PathBuf,
    labels_folder: PathBuf,
    extension: String,
    stems: Vec<String>,
    // 1-based
    cur: usize,
    shape: DisplayShape,
    max_image_side: u32,
    zoom: u32,
    // false while the image or its label file could not be read
    writable: bool,
}

impl Batch {
    fn image_path(&self, idx: usize) -> PathBuf {
        self.folder
            .join(format!("{}.{}", self.stems[idx - 1], self.extension))
    }
}

/// Walks through the images of a batch. Leaving an image writes its boxes to the label file.
#[derive(Clone, Debug, Default)]
pub struct NavigationController {
    batch: Option<Batch>,
}

fn keep_known_classes(boxes: Vec<BoundingBox>, classes: &ClassRegistry) -> Vec<BoundingBox> {
    boxes
        .into_iter()
        .filter(|bb| {
            let known = bb.class_index < classes.len();
            if !known {
                warn!(
                    "skipping box {:?} with unknown class index {}",
                    bb.corners, bb.class_index
                );
            }
            known
        })
        .collect()
}

fn image_stems(folder: &Path, extension: &str) -> VtResult<Vec<String>> {
    let mut stems = file_util::files_in_folder(folder, extension)?
        .map(|p| file_util::to_stem_str(&p).map(String::from))
        .collect::<VtResult<Vec<_>>>()?;
    stems.sort_by(|s1, s2| natural_cmp(s1, s2));
    Ok(stems)
}

impl NavigationController {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn is_loaded(&self) -> bool {
        self.batch.is_some()
    }
    /// 1-based position of the current image, `None` without a batch
    pub fn cur(&self) -> Option<usize> {
        self.batch.as_ref().map(|b| b.cur)
    }
    pub fn total(&self) -> usize {
        self.batch.as_ref().map(|b| b.stems.len()).unwrap_or(0)
    }
    /// `"cur/total"`
    pub fn progress(&self) -> Option<String> {
        self.batch
            .as_ref()
            .map(|b| format!("{}/{}", b.cur, b.stems.len()))
    }
    pub fn current_stem(&self) -> Option<&str> {
        self.batch.as_ref().map(|b| b.stems[b.cur - 1].as_str())
    }
    pub fn stems(&self) -> &[String] {
        self.batch.as_ref().map(|b| b.stems.as_slice()).unwrap_or(&[])
    }
    pub fn current_image_path(&self) -> Option<PathBuf> {
        self.batch.as_ref().map(|b| b.image_path(b.cur))
    }
    pub fn current_label_path(&self) -> Option<PathBuf> {
        self.batch
            .as_ref()
            .map(|b| label_path(&b.labels_folder, &b.stems[b.cur - 1]))
    }
    pub fn batch_folder(&self) -> Option<&Path> {
        self.batch.as_ref().map(|b| b.folder.as_path())
    }
    pub fn labels_folder(&self) -> Option<&Path> {
        self.batch.as_ref().map(|b| b.labels_folder.as_path())
    }
    pub fn display_shape(&self) -> Option<DisplayShape> {
        self.batch.as_ref().map(|b| b.shape)
    }

    /// Opens the first image of the batch in `folder`. Fails if there is no image with the
    /// configured extension in which case no batch is open afterwards. The caller persists the
    /// open image before.
    pub fn load_batch(
        &mut self,
        folder: &Path,
        cfg: &Cfg,
        store: &mut AnnotationStore,
        classes: &ClassRegistry,
    ) -> VtResult<Population> {
        self.batch = None;
        store.populate([]);
        if !folder.is_dir() {
            return Err(vterr!("batch folder {folder:?} does not exist"));
        }
        let labels_folder = folder.join("labels");
        file_util::create_dir_all(&labels_folder)?;
        let extension = cfg.labeling.image_extension.clone();
        let stems = image_stems(folder, &extension)?;
        if stems.is_empty() {
            return Err(vterr!("no .{extension} images found in {folder:?}"));
        }
        info!("loaded batch {folder:?} with {} images", stems.len());
        self.batch = Some(Batch {
            folder: folder.to_path_buf(),
            labels_folder,
            extension,
            stems,
            cur: 1,
            shape: DisplayShape::default(),
            max_image_side: cfg.labeling.max_image_side,
            zoom: cfg.zoom(),
            writable: false,
        });
        let entered = self.enter(store, classes);
        if entered.is_err() {
            self.batch = None;
            store.populate([]);
        }
        entered
    }

    fn enter(
        &mut self,
        store: &mut AnnotationStore,
        classes: &ClassRegistry,
    ) -> VtResult<Population> {
        let batch = self
            .batch
            .as_mut()
            .ok_or_else(|| vterr!("no batch loaded"))?;
        let image_path = batch.image_path(batch.cur);
        store.populate([]);
        batch.shape = DisplayShape::default();
        batch.writable = false;
        let (w, h) = image::image_dimensions(&image_path)
            .map_err(|e| vterr!("could not read image {image_path:?} due to {e:?}"))?;
        batch.shape = DisplayShape::new(ShapeI::new(w, h), batch.max_image_side, batch.zoom);
        let label_file = label_path(&batch.labels_folder, &batch.stems[batch.cur - 1]);
        let decoded = label_io::decode(&label_file, batch.shape.display)?;
        batch.writable = true;
        match decoded {
            Some(boxes) => {
                let boxes = keep_known_classes(boxes, classes);
                let n_boxes = boxes.len();
                store.populate(boxes);
                info!("opened {image_path:?} with {n_boxes} boxes from {label_file:?}");
                Ok(Population::Labels(n_boxes))
            }
            None => {
                info!("opened unlabeled {image_path:?}");
                Ok(Population::Unlabeled(image_path))
            }
        }
    }

    /// Writes the boxes of the current image to its label file
    pub fn persist(&self, store: &AnnotationStore) -> VtResult<()> {
        let Some(batch) = &self.batch else {
            return Ok(());
        };
        let label_file = label_path(&batch.labels_folder, &batch.stems[batch.cur - 1]);
        if !batch.writable {
            // existing labels stay untouched
            warn!("not writing {label_file:?} since the image or its labels could not be read");
            return Ok(());
        }
        label_io::write_labels(&label_file, store.boxes(), batch.shape.display)
    }

    fn move_to(
        &mut self,
        target: usize,
        store: &mut AnnotationStore,
        classes: &ClassRegistry,
    ) -> VtResult<Option<Population>> {
        self.persist(store)?;
        let batch = self
            .batch
            .as_mut()
            .ok_or_else(|| vterr!("no batch loaded"))?;
        if target == batch.cur {
            return Ok(None);
        }
        batch.cur = target;
        self.enter(store, classes).map(Some)
    }

    /// Persists and moves by one image. At the first or the last image nothing is reopened and
    /// `None` is returned.
    pub fn advance(
        &mut self,
        forward: bool,
        store: &mut AnnotationStore,
        classes: &ClassRegistry,
    ) -> VtResult<Option<Population>> {
        let batch = self
            .batch
            .as_ref()
            .ok_or_else(|| vterr!("no batch loaded"))?;
        let target = if forward {
            next(batch.cur, batch.stems.len())
        } else {
            prev(batch.cur)
        };
        self.move_to(target, store, classes)
    }

    /// Persists and opens image `n` counted from 1. Out of range positions are rejected without
    /// persisting.
    pub fn goto(
        &mut self,
        n: usize,
        store: &mut AnnotationStore,
        classes: &ClassRegistry,
    ) -> VtResult<Population> {
        let total = self.total();
        if !(1..=total).contains(&n) {
            return Err(vterr!("cannot go to image {n}, valid are 1 to {total}"));
        }
        self.persist(store)?;
        if let Some(batch) = &mut self.batch {
            batch.cur = n;
        }
        self.enter(store, classes)
    }

    /// Fills the store with the predicted boxes if the prediction belongs to the current image and
    /// nothing has been drawn yet. Failed predictions leave the image unlabeled.
    pub fn apply_prediction(
        &self,
        prediction: PredictionResult,
        store: &mut AnnotationStore,
        classes: &ClassRegistry,
    ) -> bool {
        let Some(batch) = self.batch.as_ref().filter(|b| b.writable) else {
            return false;
        };
        if self.current_image_path().as_ref() != Some(&prediction.image_path) {
            info!(
                "ignoring prediction for {:?} since it is not open anymore",
                prediction.image_path
            );
            return false;
        }
        if !store.is_empty() || store.is_box_in_progress() {
            info!("ignoring prediction since boxes have been drawn in the meantime");
            return false;
        }
        match prediction.detections {
            Ok(detections) => {
                let boxes = predictor::to_display(&detections, batch.shape);
                store.populate(keep_known_classes(boxes, classes));
                info!("added {} predicted boxes", store.len());
                true
            }
            Err(e) => {
                warn!(
                    "no prediction for {:?}, {}",
                    prediction.image_path,
                    e.msg()
                );
                false
            }
        }
    }
}

#[cfg(test)]
use {
    crate::{defer_folder_removal, file_util::make_tmp_folder, predictor::Detection},
    vision_trainer_domain::Corners,
};

#[cfg(test)]
fn make_batch(prefix: &str, stems: &[&str], shape: (u32, u32)) -> PathBuf {
    let folder = make_tmp_folder(prefix).unwrap();
    for stem in stems {
        image::RgbImage::new(shape.0, shape.1)
            .save(folder.join(format!("{stem}.jpg")))
            .unwrap();
    }
    folder
}

#[test]
fn test_next_prev() {
    assert_eq!(next(1, 3), 2);
    assert_eq!(next(3, 3), 3);
    assert_eq!(prev(3), 2);
    assert_eq!(prev(1), 1);
}

#[test]
fn test_load_batch() {
    let folder = make_batch("nav-load", &["img10", "img2", "img1"], (50, 40));
    defer_folder_removal!(&folder);
    file_util::write(folder.join("notes.txt"), "not an image").unwrap();
    let classes = ClassRegistry::from_lines("car\ntruck").unwrap();
    let mut store = AnnotationStore::new();
    let mut nav = NavigationController::new();
    assert!(nav.progress().is_none());
    let pop = nav
        .load_batch(&folder, &Cfg::default(), &mut store, &classes)
        .unwrap();
    assert_eq!(pop, Population::Unlabeled(folder.join("img1.jpg")));
    assert_eq!(nav.stems(), ["img1", "img2", "img10"]);
    assert_eq!(nav.progress().unwrap(), "1/3");
    assert_eq!(nav.current_stem(), Some("img1"));
    assert!(folder.join("labels").is_dir());
    assert_eq!(
        nav.display_shape().unwrap().display,
        ShapeI::new(100, 80)
    );
}

#[test]
fn test_empty_batch() {
    let folder = make_batch("nav-empty", &[], (1, 1));
    defer_folder_removal!(&folder);
    let classes = ClassRegistry::from_lines("car").unwrap();
    let mut store = AnnotationStore::new();
    let mut nav = NavigationController::new();
    assert!(nav
        .load_batch(&folder, &Cfg::default(), &mut store, &classes)
        .is_err());
    assert!(!nav.is_loaded());
    assert!(nav
        .load_batch(&folder.join("nope"), &Cfg::default(), &mut store, &classes)
        .is_err());
    assert!(nav.advance(true, &mut store, &classes).is_err());
    assert!(nav.goto(1, &mut store, &classes).is_err());
}

#[test]
fn test_navigation_persists() {
    let folder = make_batch("nav-persist", &["a", "b", "c"], (100, 50));
    defer_folder_removal!(&folder);
    let classes = ClassRegistry::from_lines("car\ntruck").unwrap();
    let mut store = AnnotationStore::new();
    let mut nav = NavigationController::new();
    nav.load_batch(&folder, &Cfg::default(), &mut store, &classes)
        .unwrap();
    store.begin_box(1, (20, 10).into());
    store.complete_box((60, 50).into()).unwrap();

    // first image, nothing to go back to but the labels are written
    assert_eq!(nav.advance(false, &mut store, &classes).unwrap(), None);
    assert!(folder.join("labels").join("a.txt").exists());
    assert_eq!(store.len(), 1);

    let pop = nav.advance(true, &mut store, &classes).unwrap();
    assert_eq!(pop, Some(Population::Unlabeled(folder.join("b.jpg"))));
    assert!(store.is_empty());
    let pop = nav.advance(false, &mut store, &classes).unwrap();
    assert_eq!(pop, Some(Population::Labels(1)));
    assert_eq!(store.boxes()[0].class_index, 1);
    assert_eq!(store.boxes()[0].corners, Corners::new(20, 10, 60, 50));
    assert_eq!(store.selected_index(), Some(0));

    assert!(nav.goto(4, &mut store, &classes).is_err());
    assert!(nav.goto(0, &mut store, &classes).is_err());
    assert_eq!(nav.cur(), Some(1));
    nav.goto(3, &mut store, &classes).unwrap();
    assert_eq!(nav.progress().unwrap(), "3/3");
    // leaving the second image marked it as labeled without boxes
    assert_eq!(
        file_util::read_to_string(folder.join("labels").join("b.txt")).unwrap(),
        ""
    );
    assert_eq!(nav.advance(true, &mut store, &classes).unwrap(), None);
    assert_eq!(
        file_util::read_to_string(folder.join("labels").join("c.txt")).unwrap(),
        ""
    );
}

#[test]
fn test_unknown_classes_are_skipped() {
    let folder = make_batch("nav-unknown", &["a"], (100, 100));
    defer_folder_removal!(&folder);
    file_util::create_dir_all(folder.join("labels")).unwrap();
    file_util::write(
        folder.join("labels").join("a.txt"),
        "0 0.5 0.5 0.2 0.2\n7 0.5 0.5 0.2 0.2\n",
    )
    .unwrap();
    let classes = ClassRegistry::from_lines("car").unwrap();
    let mut store = AnnotationStore::new();
    let mut nav = NavigationController::new();
    let pop = nav
        .load_batch(&folder, &Cfg::default(), &mut store, &classes)
        .unwrap();
    assert_eq!(pop, Population::Labels(1));
}

#[test]
fn test_unreadable_labels_are_not_overwritten() {
    let folder = make_batch("nav-unreadable", &["a", "b"], (100, 100));
    defer_folder_removal!(&folder);
    // a folder in place of the label file cannot be read
    let blocked = folder.join("labels").join("b.txt");
    file_util::create_dir_all(blocked.join("keep")).unwrap();
    let classes = ClassRegistry::from_lines("car").unwrap();
    let mut store = AnnotationStore::new();
    let mut nav = NavigationController::new();
    nav.load_batch(&folder, &Cfg::default(), &mut store, &classes)
        .unwrap();
    assert!(nav.advance(true, &mut store, &classes).is_err());
    assert_eq!(nav.cur(), Some(2));
    assert!(store.is_empty());
    nav.persist(&store).unwrap();
    assert_eq!(
        nav.advance(false, &mut store, &classes).unwrap(),
        Some(Population::Labels(0))
    );
    assert!(blocked.join("keep").is_dir());

    let mut nav = NavigationController::new();
    let label_a = folder.join("labels").join("a.txt");
    std::fs::remove_file(&label_a).unwrap();
    file_util::create_dir_all(&label_a).unwrap();
    store.begin_box(0, (1, 1).into());
    assert!(nav
        .load_batch(&folder, &Cfg::default(), &mut store, &classes)
        .is_err());
    assert!(!nav.is_loaded());
    assert!(!store.is_box_in_progress());
}

#[test]
fn test_apply_prediction() {
    let folder = make_batch("nav-pred", &["a", "b"], (100, 100));
    defer_folder_removal!(&folder);
    let classes = ClassRegistry::from_lines("car\ntruck").unwrap();
    let mut store = AnnotationStore::new();
    let mut nav = NavigationController::new();
    nav.load_batch(&folder, &Cfg::default(), &mut store, &classes)
        .unwrap();
    let det = Detection {
        class_index: 1,
        x1: 10,
        y1: 10,
        x2: 20,
        y2: 30,
    };
    let other_image = PredictionResult {
        image_path: folder.join("b.jpg"),
        detections: Ok(vec![det]),
    };
    assert!(!nav.apply_prediction(other_image, &mut store, &classes));
    let failed = PredictionResult {
        image_path: folder.join("a.jpg"),
        detections: Err(vterr!("model not available")),
    };
    assert!(!nav.apply_prediction(failed, &mut store, &classes));
    assert!(store.is_empty());
    let ok = PredictionResult {
        image_path: folder.join("a.jpg"),
        detections: Ok(vec![det, det]),
    };
    assert!(nav.apply_prediction(ok, &mut store, &classes));
    assert_eq!(store.len(), 2);
    assert_eq!(store.boxes()[0].corners, Corners::new(20, 20, 40, 60));
    assert_eq!(store.selected_index(), Some(0));
    let late = PredictionResult {
        image_path: folder.join("a.jpg"),
        detections: Ok(vec![det]),
    };
    assert!(!nav.apply_prediction(late, &mut store, &classes));
    assert_eq!(store.len(), 2);
}

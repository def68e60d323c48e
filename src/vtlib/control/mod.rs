use std::{path::Path, sync::Arc, time::Duration};

use tracing::info;
use vision_trainer_domain::{VtResult, vterr};

use crate::{
    annotations::{AnnotationStore, BoxCanvas},
    cfg::CfgStore,
    classes::ClassRegistry,
    events::Event,
    predictor::{PredictionWorker, Predictor, RestPredictor},
    result::trace_ok_warn,
};

pub mod navigator;
use navigator::{NavigationController, Population};

/// Owns the annotation state of the session. The presentation layer forwards events to
/// [`Control::handle`] and redraws when [`Control::render_if_requested`] asks for it.
pub struct Control {
    store: AnnotationStore,
    navigator: NavigationController,
    classes: ClassRegistry,
    cfg: CfgStore,
    predictions: Option<PredictionWorker>,
}

impl Control {
    pub fn new(cfg: CfgStore, classes: ClassRegistry) -> Self {
        Self {
            store: AnnotationStore::new(),
            navigator: NavigationController::new(),
            classes,
            cfg,
            predictions: None,
        }
    }
    /// Classes from the configured class file and the HTTP predictor if there is one configured
    pub fn from_cfg(cfg: CfgStore) -> VtResult<Self> {
        let classes = ClassRegistry::from_file(&cfg.cfg().class_file())?;
        let predictor = cfg.cfg().prediction.as_ref().and_then(|pc| {
            trace_ok_warn(RestPredictor::new(
                pc.url.clone(),
                pc.authorization.as_deref(),
                pc.timeout_ms,
            ))
            .map(|p| (Arc::new(p) as Arc<dyn Predictor>, pc.timeout_ms))
        });
        let ctrl = Self::new(cfg, classes);
        Ok(match predictor {
            Some((p, timeout_ms)) => ctrl.with_predictor(p, Duration::from_millis(timeout_ms)),
            None => {
                info!("no predictor configured, unlabeled images start empty");
                ctrl
            }
        })
    }
    pub fn with_predictor(mut self, predictor: Arc<dyn Predictor>, timeout: Duration) -> Self {
        self.predictions = Some(PredictionWorker::new(predictor, timeout));
        self
    }
    pub fn store(&self) -> &AnnotationStore {
        &self.store
    }
    pub fn navigator(&self) -> &NavigationController {
        &self.navigator
    }
    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }
    pub fn cfg(&self) -> &CfgStore {
        &self.cfg
    }
    pub fn is_prediction_pending(&self) -> bool {
        self.predictions.as_ref().is_some_and(|p| p.is_pending())
    }

    fn populated(&mut self, population: Population) {
        self.store.log_summary();
        match population {
            Population::Labels(_) => {
                if let Some(worker) = &mut self.predictions {
                    worker.cancel();
                }
            }
            Population::Unlabeled(image_path) => match &mut self.predictions {
                Some(worker) => worker.request(image_path),
                None => info!("no predictor available, {image_path:?} starts without boxes"),
            },
        }
    }

    pub fn load_batch(&mut self, folder: &Path) -> VtResult<()> {
        self.navigator.persist(&self.store)?;
        let population =
            self.navigator
                .load_batch(folder, self.cfg.cfg(), &mut self.store, &self.classes)?;
        self.populated(population);
        Ok(())
    }

    /// Opens the batch with the given name inside the configured batches folder
    pub fn load_named_batch(&mut self, batch_name: &str) -> VtResult<()> {
        let folder = self.cfg.cfg().batch_folder(batch_name);
        self.load_batch(&folder)
    }

    fn check_loaded(&self) -> VtResult<()> {
        if self.navigator.is_loaded() {
            Ok(())
        } else {
            Err(vterr!("no batch loaded"))
        }
    }

    pub fn handle(&mut self, event: Event) -> VtResult<()> {
        tracing::debug!("handling {event:?}");
        match event {
            Event::DrawStart { x, y } => {
                self.check_loaded()?;
                self.store.begin_box(self.store.active_class(), (x, y).into());
            }
            Event::DrawComplete { x, y } => {
                self.check_loaded()?;
                self.store.complete_box((x, y).into())?;
            }
            Event::Click { x, y } => {
                self.check_loaded()?;
                self.store.click((x, y).into())?;
            }
            Event::Cancel => {
                self.store.cancel_box();
            }
            Event::SelectIndex { index } => self.store.select(index),
            Event::SelectNext => self.store.select_next(),
            Event::SelectPrevious => self.store.select_previous(),
            Event::DeleteSelected => {
                self.store.delete_selected();
            }
            Event::DeleteAll => self.store.delete_all(),
            Event::Reclassify { digit } => {
                let class_index = self.classes.index_from_digit(digit)?;
                let advance = self.cfg.advance_after_reclassify();
                self.store
                    .reclassify_selected(class_index, &self.classes, advance)?;
            }
            Event::SetActiveClass { class_index } => {
                self.store.set_active_class(class_index, &self.classes)?;
            }
            Event::ToggleAdvance => {
                let advance = self.cfg.toggle_advance_after_reclassify()?;
                info!("advance after reclassify is {}", if advance { "on" } else { "off" });
            }
            Event::Prev | Event::Next => {
                let forward = event == Event::Next;
                let population = self
                    .navigator
                    .advance(forward, &mut self.store, &self.classes)?;
                if let Some(population) = population {
                    self.populated(population);
                }
            }
            Event::Goto { n } => {
                let population = self.navigator.goto(n, &mut self.store, &self.classes)?;
                self.populated(population);
            }
        }
        Ok(())
    }

    /// Applies a finished prediction, returns `true` if boxes have been added
    pub fn poll_predictions(&mut self) -> bool {
        let Some(result) = self.predictions.as_mut().and_then(|w| w.poll()) else {
            return false;
        };
        self.navigator
            .apply_prediction(result, &mut self.store, &self.classes)
    }

    /// Blocks until the pending prediction is there, used without an event loop
    pub fn wait_for_prediction(&mut self) -> bool {
        let Some(result) = self.predictions.as_mut().and_then(|w| w.wait()) else {
            return false;
        };
        self.navigator
            .apply_prediction(result, &mut self.store, &self.classes)
    }

    pub fn render_if_requested(&mut self, canvas: &mut dyn BoxCanvas) -> bool {
        self.store.render_if_requested(canvas)
    }

    pub fn list_rows(&self) -> Vec<String> {
        self.store.list_rows(&self.classes)
    }

    /// Writes the labels of the open image, e.g., before quitting
    pub fn persist(&self) -> VtResult<()> {
        self.navigator.persist(&self.store)
    }

    /// Status line like `3/20 img_003 [advance on]`
    pub fn status(&self) -> String {
        let advance = if self.cfg.advance_after_reclassify() {
            "on"
        } else {
            "off"
        };
        match (self.navigator.progress(), self.navigator.current_stem()) {
            (Some(progress), Some(stem)) => format!("{progress} {stem} [advance {advance}]"),
            _ => format!("no batch [advance {advance}]"),
        }
    }
}

#[cfg(test)]
use {
    crate::{
        annotations::RecordingCanvas,
        cfg::{Cfg, get_cfg_path},
        defer_folder_removal,
        file_util::make_tmp_folder,
        predictor::Detection,
    },
    std::path::PathBuf,
};

#[cfg(test)]
struct FixedPredictor;
#[cfg(test)]
impl Predictor for FixedPredictor {
    fn predict(&self, _: &Path) -> VtResult<Vec<Detection>> {
        Ok(vec![Detection {
            class_index: 0,
            x1: 1,
            y1: 2,
            x2: 3,
            y2: 4,
        }])
    }
}

#[cfg(test)]
fn make_control(prefix: &str) -> (Control, PathBuf) {
    let folder = make_tmp_folder(prefix).unwrap();
    for stem in ["im1", "im2"] {
        image::RgbImage::new(40, 30)
            .save(folder.join(format!("{stem}.jpg")))
            .unwrap();
    }
    let cfg = CfgStore::new(Cfg::default(), get_cfg_path(&folder));
    let classes = ClassRegistry::from_lines("car\ntruck\nbus").unwrap();
    (Control::new(cfg, classes), folder)
}

#[test]
fn test_handle() {
    let (mut ctrl, folder) = make_control("ctrl-handle");
    defer_folder_removal!(&folder);
    assert!(ctrl.handle(Event::Click { x: 1, y: 1 }).is_err());
    ctrl.load_batch(&folder).unwrap();
    assert_eq!(ctrl.status(), "1/2 im1 [advance on]");
    ctrl.handle(Event::SetActiveClass { class_index: 2 }).unwrap();
    ctrl.handle(Event::DrawStart { x: 2, y: 2 }).unwrap();
    ctrl.handle(Event::DrawComplete { x: 10, y: 10 }).unwrap();
    ctrl.handle(Event::Click { x: 20, y: 20 }).unwrap();
    ctrl.handle(Event::Click { x: 30, y: 25 }).unwrap();
    assert_eq!(ctrl.store().len(), 2);
    assert_eq!(ctrl.store().selected_index(), Some(1));
    assert!(ctrl.handle(Event::Reclassify { digit: 4 }).is_err());
    assert!(ctrl.store().boxes().iter().all(|bb| bb.class_index == 2));
    ctrl.handle(Event::Reclassify { digit: 1 }).unwrap();
    assert_eq!(ctrl.store().boxes()[1].class_index, 0);
    assert_eq!(ctrl.store().selected_index(), Some(0));

    ctrl.handle(Event::ToggleAdvance).unwrap();
    assert!(get_cfg_path(&folder).exists());
    ctrl.handle(Event::Reclassify { digit: 2 }).unwrap();
    assert_eq!(ctrl.store().selected_index(), Some(0));
    assert_eq!(ctrl.store().boxes()[0].class_index, 1);

    let mut canvas = RecordingCanvas::default();
    assert!(ctrl.render_if_requested(&mut canvas));
    assert_eq!(canvas.shown().len(), 2);
    assert!(!ctrl.render_if_requested(&mut canvas));

    ctrl.handle(Event::Next).unwrap();
    assert!(ctrl.store().is_empty());
    assert!(ctrl.handle(Event::Goto { n: 3 }).is_err());
    ctrl.handle(Event::Prev).unwrap();
    assert_eq!(ctrl.list_rows().len(), 2);
    assert_eq!(
        ctrl.list_rows()[0],
        "{'class':'truck', 'x1':2, 'y1':2, 'x2':10, 'y2':10, 'selected':true}"
    );
    ctrl.handle(Event::DeleteSelected).unwrap();
    ctrl.handle(Event::DeleteAll).unwrap();
    ctrl.handle(Event::DeleteAll).unwrap();
    assert!(ctrl.store().is_empty());
}

#[test]
fn test_predictions() {
    let (ctrl, folder) = make_control("ctrl-predict");
    defer_folder_removal!(&folder);
    let mut ctrl = ctrl.with_predictor(Arc::new(FixedPredictor), Duration::from_secs(10));
    ctrl.load_batch(&folder).unwrap();
    assert!(ctrl.is_prediction_pending());
    assert!(ctrl.wait_for_prediction());
    // zoom 2
    assert_eq!(
        ctrl.store().boxes()[0].corners,
        vision_trainer_domain::Corners::new(2, 4, 6, 8)
    );
    assert_eq!(ctrl.store().selected_index(), Some(0));
    ctrl.handle(Event::Next).unwrap();
    ctrl.handle(Event::Prev).unwrap();
    // labels exist now, no prediction needed
    assert!(!ctrl.is_prediction_pending());
    assert_eq!(ctrl.store().len(), 1);
}

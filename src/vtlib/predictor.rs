use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        mpsc::{self, Receiver, RecvTimeoutError, TryRecvError},
    },
    thread,
    time::{Duration, Instant},
};

use reqwest::{
    blocking::multipart,
    header::{AUTHORIZATION, HeaderMap, HeaderValue},
};
use serde::{Deserialize, Serialize};
use vision_trainer_domain::{Corners, DisplayShape, VtResult, to_vt, vterr};

use crate::{annotations::BoundingBox, file_util, result::trace_ok_err};

/// Box found by an object detector in the native pixel space of an image
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Detection {
    pub class_index: usize,
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Detection {
    pub fn corners(&self) -> Corners {
        Corners::new(self.x1, self.y1, self.x2, self.y2)
    }
}

pub trait Predictor: Send + Sync {
    /// Detections for the image at `image_path` in its native pixel coordinates
    fn predict(&self, image_path: &Path) -> VtResult<Vec<Detection>>;
}

/// Maps detections into display coordinates. All boxes are unselected.
pub fn to_display(detections: &[Detection], shape: DisplayShape) -> Vec<BoundingBox> {
    let (sx, sy) = shape.scale();
    detections
        .iter()
        .map(|d| BoundingBox::new(d.class_index, d.corners().scale(sx, sy)))
        .collect()
}

#[derive(Deserialize, Debug)]
struct PredictResponse {
    detections: Vec<Detection>,
}

/// Object detector behind an HTTP endpoint. The image is posted as multipart form field `image`
/// and the answer is expected as `{"detections": [{"class_index": .., "x1": .., ...}, ...]}`.
pub struct RestPredictor {
    url: String,
    headers: HeaderMap,
    client: reqwest::blocking::Client,
}

impl RestPredictor {
    pub fn new(mut url: String, authorization: Option<&str>, timeout_ms: u64) -> VtResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(to_vt)?;
        let mut headers = HeaderMap::new();
        if let Some(s) = authorization
            && let Some(s) = trace_ok_err(HeaderValue::from_str(s))
        {
            headers.insert(AUTHORIZATION, s);
        }
        while url.ends_with('/') {
            url.pop();
        }
        let url = if url.split('/').next_back() == Some("predict") {
            url
        } else {
            format!("{url}/predict")
        };
        Ok(Self {
            url,
            headers,
            client,
        })
    }
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Predictor for RestPredictor {
    fn predict(&self, image_path: &Path) -> VtResult<Vec<Detection>> {
        let image_bytes = std::fs::read(image_path)
            .map_err(|e| vterr!("could not read {image_path:?} due to {e:?}"))?;
        let filename = file_util::to_name_str(image_path)?.to_string();
        let form = multipart::Form::new().part(
            "image",
            multipart::Part::bytes(image_bytes).file_name(filename),
        );
        tracing::info!("sending prediction request for {image_path:?} to {}", self.url);
        let response = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .multipart(form)
            .send()
            .map_err(to_vt)?;
        if response.status().is_success() {
            let resp = response.json::<PredictResponse>().map_err(to_vt)?;
            Ok(resp.detections)
        } else {
            let status = response.status();
            let err_msg = response
                .text()
                .unwrap_or("no error message available".into());
            Err(vterr!(
                "prediction failed with status {} and error message '{}'",
                status,
                err_msg
            ))
        }
    }
}

/// Detections for one image together with the image they belong to
#[derive(Debug)]
pub struct PredictionResult {
    pub image_path: PathBuf,
    pub detections: VtResult<Vec<Detection>>,
}

struct PendingPrediction {
    image_path: PathBuf,
    started: Instant,
    rx: Receiver<PredictionResult>,
}

/// Runs the predictor on a separate thread such that the interaction thread never waits for the
/// model. Only the most recent request is of interest; older ones are dropped.
pub struct PredictionWorker {
    predictor: Arc<dyn Predictor>,
    timeout: Duration,
    pending: Option<PendingPrediction>,
}

impl PredictionWorker {
    pub fn new(predictor: Arc<dyn Predictor>, timeout: Duration) -> Self {
        Self {
            predictor,
            timeout,
            pending: None,
        }
    }
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
    pub fn pending_image(&self) -> Option<&Path> {
        self.pending.as_ref().map(|p| p.image_path.as_path())
    }
    pub fn request(&mut self, image_path: PathBuf) {
        if let Some(old) = &self.pending {
            tracing::info!("dropping prediction request for {:?}", old.image_path);
        }
        let (tx, rx) = mpsc::channel();
        let predictor = self.predictor.clone();
        let path = image_path.clone();
        thread::spawn(move || {
            let detections = predictor.predict(&path);
            if let Ok(d) = &detections {
                tracing::info!("received {} detections for {path:?}", d.len());
            }
            // the receiver is gone if the request has been superseded
            let _ = tx.send(PredictionResult {
                image_path: path,
                detections,
            });
        });
        self.pending = Some(PendingPrediction {
            image_path,
            started: Instant::now(),
            rx,
        });
    }
    pub fn cancel(&mut self) {
        self.pending = None;
    }

    /// Non-blocking check for a finished prediction
    pub fn poll(&mut self) -> Option<PredictionResult> {
        let pending = self.pending.as_ref()?;
        match pending.rx.try_recv() {
            Ok(res) => {
                self.pending = None;
                Some(res)
            }
            Err(TryRecvError::Empty) => {
                if pending.started.elapsed() > self.timeout {
                    tracing::error!(
                        "timeout of prediction for {:?} after {} ms",
                        pending.image_path,
                        self.timeout.as_millis()
                    );
                    self.pending = None;
                }
                None
            }
            Err(TryRecvError::Disconnected) => {
                tracing::error!("prediction thread for {:?} disconnected", pending.image_path);
                self.pending = None;
                None
            }
        }
    }

    /// Blocks until the pending prediction arrives or the timeout is reached
    pub fn wait(&mut self) -> Option<PredictionResult> {
        let pending = self.pending.take()?;
        let remaining = self.timeout.saturating_sub(pending.started.elapsed());
        match pending.rx.recv_timeout(remaining) {
            Ok(res) => Some(res),
            Err(RecvTimeoutError::Timeout) => {
                tracing::error!("timeout of prediction for {:?}", pending.image_path);
                None
            }
            Err(RecvTimeoutError::Disconnected) => {
                tracing::error!("prediction thread for {:?} disconnected", pending.image_path);
                None
            }
        }
    }
}

#[cfg(test)]
use {crate::tracing_setup::init_tracing_for_tests, vision_trainer_domain::ShapeI};

#[cfg(test)]
struct FixedPredictor(Vec<Detection>);
#[cfg(test)]
impl Predictor for FixedPredictor {
    fn predict(&self, _: &Path) -> VtResult<Vec<Detection>> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
struct SlowPredictor;
#[cfg(test)]
impl Predictor for SlowPredictor {
    fn predict(&self, _: &Path) -> VtResult<Vec<Detection>> {
        thread::sleep(Duration::from_millis(500));
        Ok(vec![])
    }
}

#[test]
fn test_to_display() {
    let detections = [
        Detection {
            class_index: 1,
            x1: 10,
            y1: 20,
            x2: 30,
            y2: 40,
        },
        Detection {
            class_index: 0,
            x1: 0,
            y1: 0,
            x2: 5,
            y2: 5,
        },
    ];
    let shape = DisplayShape::new(ShapeI::new(100, 100), 1000, 2);
    let boxes = to_display(&detections, shape);
    assert_eq!(boxes[0].corners, Corners::new(20, 40, 60, 80));
    assert_eq!(boxes[1].corners, Corners::new(0, 0, 10, 10));
    assert!(boxes.iter().all(|bb| !bb.selected));
    let shape = DisplayShape::new(ShapeI::new(2000, 1000), 1000, 1);
    let boxes = to_display(&detections, shape);
    assert_eq!(boxes[0].corners, Corners::new(5, 10, 15, 20));
}

#[test]
fn test_rest_url() {
    let p = RestPredictor::new("http://localhost:8000//".into(), Some("Bearer x"), 100).unwrap();
    assert_eq!(p.url(), "http://localhost:8000/predict");
    let p = RestPredictor::new("http://localhost:8000/predict/".into(), None, 100).unwrap();
    assert_eq!(p.url(), "http://localhost:8000/predict");
}

#[test]
fn test_rest_unavailable() {
    init_tracing_for_tests();
    let folder = file_util::make_tmp_folder("rest-unavailable").unwrap();
    crate::defer_folder_removal!(&folder);
    let image_path = folder.join("im.jpg");
    file_util::write(&image_path, [0u8; 4]).unwrap();
    // nothing listens on port 9 of localhost
    let p = RestPredictor::new("http://127.0.0.1:9".into(), None, 500).unwrap();
    assert!(p.predict(&image_path).is_err());
    assert!(p.predict(&folder.join("missing.jpg")).is_err());
}

#[test]
fn test_worker() {
    init_tracing_for_tests();
    let det = Detection {
        class_index: 2,
        x1: 1,
        y1: 2,
        x2: 3,
        y2: 4,
    };
    let mut worker = PredictionWorker::new(
        Arc::new(FixedPredictor(vec![det])),
        Duration::from_secs(5),
    );
    assert!(worker.poll().is_none());
    worker.request(PathBuf::from("a.jpg"));
    assert_eq!(worker.pending_image(), Some(Path::new("a.jpg")));
    let res = worker.wait().unwrap();
    assert_eq!(res.image_path, PathBuf::from("a.jpg"));
    assert_eq!(res.detections.unwrap(), vec![det]);
    assert!(!worker.is_pending());

    let mut worker = PredictionWorker::new(Arc::new(SlowPredictor), Duration::from_millis(50));
    worker.request(PathBuf::from("b.jpg"));
    assert!(worker.wait().is_none());
    worker.request(PathBuf::from("c.jpg"));
    thread::sleep(Duration::from_millis(100));
    assert!(worker.poll().is_none());
    assert!(!worker.is_pending());
}

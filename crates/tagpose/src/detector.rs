use std::{
    sync::mpsc,
    thread::{self, JoinHandle},
    time::Duration,
};

use tagpose_image::Image;

use crate::{
    annotate::draw_detection,
    config::DetectorConfig,
    engine::{AprilTagEngine, EngineDetection, VisionEngine},
    error::DetectorError,
    types::{CameraParams, Detection, DetectionOutcome, Pose, RotationMatrix, Translation},
};

/// Delivers an outcome to its receiver at most once, and [`DetectionOutcome::NotFound`]
/// on drop if nothing was delivered.
struct Completion(Option<Box<dyn FnOnce(DetectionOutcome) + Send>>);

impl Completion {
    fn new(f: impl FnOnce(DetectionOutcome) + Send + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    fn complete(mut self, outcome: DetectionOutcome) {
        if let Some(f) = self.0.take() {
            f(outcome);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f(DetectionOutcome::NotFound);
        }
    }
}

struct Request {
    image: Image<u8, 3>,
    camera: CameraParams,
    tag_id: u32,
    completion: Completion,
}

/// A pending detection, resolved exactly once.
pub struct DetectionHandle {
    receiver: mpsc::Receiver<DetectionOutcome>,
    outcome: Option<DetectionOutcome>,
}

impl DetectionHandle {
    /// Blocks until the outcome is available.
    pub fn wait(self) -> DetectionOutcome {
        match self.outcome {
            Some(outcome) => outcome,
            None => self.receiver.recv().unwrap_or(DetectionOutcome::NotFound),
        }
    }

    /// Waits up to `timeout` for the outcome.
    ///
    /// The handle stays valid after a timeout and can be waited on again.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<&DetectionOutcome> {
        if self.outcome.is_none() {
            self.outcome = match self.receiver.recv_timeout(timeout) {
                Ok(outcome) => Some(outcome),
                Err(mpsc::RecvTimeoutError::Timeout) => None,
                Err(mpsc::RecvTimeoutError::Disconnected) => Some(DetectionOutcome::NotFound),
            };
        }
        self.outcome.as_ref()
    }

    /// Returns the outcome if it is already available, without blocking.
    pub fn try_outcome(&mut self) -> Option<&DetectionOutcome> {
        if self.outcome.is_none() {
            self.outcome = match self.receiver.try_recv() {
                Ok(outcome) => Some(outcome),
                Err(mpsc::TryRecvError::Empty) => None,
                Err(mpsc::TryRecvError::Disconnected) => Some(DetectionOutcome::NotFound),
            };
        }
        self.outcome.as_ref()
    }

    /// Whether the outcome is available.
    pub fn is_complete(&mut self) -> bool {
        self.try_outcome().is_some()
    }
}

/// Asynchronous AprilTag detector.
///
/// Requests are processed in order by a single worker thread that owns the
/// engine. Every request resolves exactly once, to
/// [`DetectionOutcome::Detected`] or [`DetectionOutcome::NotFound`]; engine
/// failures are logged and reported as `NotFound`.
///
/// Dropping the detector lets the worker finish the queued requests and joins it.
pub struct Detector {
    config: DetectorConfig,
    sender: Option<mpsc::Sender<Request>>,
    worker: Option<JoinHandle<()>>,
}

impl Detector {
    /// Creates a detector with the default [`AprilTagEngine`].
    pub fn new(config: DetectorConfig) -> Result<Self, DetectorError> {
        let engine = AprilTagEngine::from_config(&config)?;
        Self::with_engine(engine, config)
    }

    /// Creates a detector running a custom engine.
    ///
    /// Only the output settings of `config` apply: pose shape, annotation,
    /// principal point and the tag size used to draw the axes.
    pub fn with_engine<E: VisionEngine>(engine: E, config: DetectorConfig) -> Result<Self, DetectorError> {
        config.validate()?;

        let (sender, receiver) = mpsc::channel::<Request>();
        let worker_config = config.clone();
        let worker = thread::Builder::new()
            .name("tagpose-detector".to_string())
            .spawn(move || run_worker(engine, receiver, worker_config))
            .map_err(DetectorError::WorkerSpawn)?;

        log::debug!("detector started, family {}", config.family);

        Ok(Self {
            config,
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    /// Returns the detector configuration.
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Requests detection of tag `tag_id` in `image`.
    ///
    /// Returns immediately. A missing or empty image resolves to
    /// [`DetectionOutcome::NotFound`] without reaching the engine.
    ///
    /// # Arguments
    ///
    /// * `image` - The camera image.
    /// * `px` - First camera parameter, the horizontal focal length in pixels.
    /// * `py` - Second camera parameter, the vertical focal length in pixels.
    /// * `tag_id` - Id of the tag to look for.
    pub fn detect(&self, image: Option<Image<u8, 3>>, px: f32, py: f32, tag_id: u32) -> DetectionHandle {
        let (tx, rx) = mpsc::channel();
        self.submit(image, px, py, tag_id, Completion::new(move |outcome| {
            // the handle may have been dropped
            let _ = tx.send(outcome);
        }));

        DetectionHandle {
            receiver: rx,
            outcome: None,
        }
    }

    /// Requests detection and calls `completion` with the outcome exactly once.
    ///
    /// The completion runs on the worker thread, or on the calling thread when
    /// the request is rejected up front.
    pub fn detect_with<F>(&self, image: Option<Image<u8, 3>>, px: f32, py: f32, tag_id: u32, completion: F)
    where
        F: FnOnce(DetectionOutcome) + Send + 'static,
    {
        self.submit(image, px, py, tag_id, Completion::new(completion));
    }

    /// Requests detection and blocks until the outcome is available.
    pub fn detect_blocking(&self, image: Option<Image<u8, 3>>, px: f32, py: f32, tag_id: u32) -> DetectionOutcome {
        self.detect(image, px, py, tag_id).wait()
    }

    /// Queues a request; rejected requests complete with `NotFound` right away.
    fn submit(&self, image: Option<Image<u8, 3>>, px: f32, py: f32, tag_id: u32, completion: Completion) {
        let Some(image) = image else {
            log::warn!("detection of tag {tag_id} requested without an image");
            return completion.complete(DetectionOutcome::NotFound);
        };

        if image.size().area() == 0 {
            log::warn!("detection of tag {tag_id} requested on an empty image");
            return completion.complete(DetectionOutcome::NotFound);
        }

        let Some(sender) = self.sender.as_ref() else {
            return completion.complete(DetectionOutcome::NotFound);
        };

        let request = Request {
            image,
            camera: CameraParams::new(px, py).with_principal_point(self.config.principal_point),
            tag_id,
            completion,
        };

        if let Err(mpsc::SendError(request)) = sender.send(request) {
            log::error!("detection worker is gone, tag {tag_id} not processed");
            request.completion.complete(DetectionOutcome::NotFound);
        }
    }
}

impl Drop for Detector {
    fn drop(&mut self) {
        drop(self.sender.take());

        let Some(worker) = self.worker.take() else {
            return;
        };

        // a completion running on the worker may own the last reference
        if worker.thread().id() == thread::current().id() {
            return;
        }

        if worker.join().is_err() {
            log::error!("detection worker panicked");
        }
    }
}

fn run_worker<E: VisionEngine>(mut engine: E, requests: mpsc::Receiver<Request>, config: DetectorConfig) {
    for request in requests {
        let Request {
            image,
            camera,
            tag_id,
            completion,
        } = request;

        let outcome = match engine.detect(&image, &camera, tag_id) {
            Ok(Some(found)) => DetectionOutcome::Detected(build_detection(image, &camera, tag_id, found, &config)),
            Ok(None) => {
                log::debug!("tag {tag_id} not found");
                DetectionOutcome::NotFound
            }
            Err(err) => {
                log::warn!("detection of tag {tag_id} failed: {err}");
                DetectionOutcome::NotFound
            }
        };

        completion.complete(outcome);
    }

    log::debug!("detection worker stopped");
}

fn build_detection(
    image: Image<u8, 3>,
    camera: &CameraParams,
    tag_id: u32,
    found: EngineDetection,
    config: &DetectorConfig,
) -> Detection {
    let pose = Pose::from_solution(
        config.pose_shape,
        Translation::from(found.translation),
        RotationMatrix(found.rotation),
    );

    let image = config.return_image.then(|| {
        let mut image = image;
        if config.annotate {
            let intrinsics = camera.intrinsics(image.size());
            draw_detection(&mut image, &found, &intrinsics, config.tag_size);
        }
        image
    });

    Detection {
        image,
        pose,
        tag_id,
        corners: found.corners,
        decision_margin: found.decision_margin,
        hamming: found.hamming,
    }
}

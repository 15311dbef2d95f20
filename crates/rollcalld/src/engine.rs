use rollcall_core::{
    decode_base64_image, AttendanceLedger, CapabilityError, DecodeError, EnrollError,
    EnrollmentAggregator, EnrollmentReport, FaceLocator, FaceModels, Framing, OnnxEmbedder,
    PhotoStore, ProfileStore, RecognitionMatcher, RecognitionOutcome, RecognizeError,
    ScrfdDetector,
};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    #[error(transparent)]
    Enroll(#[from] EnrollError),
    #[error(transparent)]
    Recognize(#[from] RecognizeError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Stores the engine reads and writes on behalf of enrollment and recognition.
#[derive(Clone)]
pub struct EngineStores {
    pub photos: Arc<dyn PhotoStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub ledger: Arc<dyn AttendanceLedger>,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Detect {
        image: String,
        reply: oneshot::Sender<Result<Framing, EngineError>>,
    },
    Enroll {
        student: String,
        photo_count: u32,
        reply: oneshot::Sender<Result<EnrollmentReport, EngineError>>,
    },
    Recognize {
        image: String,
        period: String,
        reply: oneshot::Sender<Result<RecognitionOutcome, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    models_loaded: bool,
}

impl EngineHandle {
    /// Whether both face models loaded at startup.
    pub fn models_loaded(&self) -> bool {
        self.models_loaded
    }

    /// Decode a base64 image and report its faces and framing.
    pub async fn detect(&self, image: String) -> Result<Framing, EngineError> {
        self.request(|reply| EngineRequest::Detect { image, reply })
            .await
    }

    /// Build or replace the centroid for `student` from their stored photos.
    pub async fn enroll(
        &self,
        student: String,
        photo_count: u32,
    ) -> Result<EnrollmentReport, EngineError> {
        self.request(|reply| EngineRequest::Enroll {
            student,
            photo_count,
            reply,
        })
        .await
    }

    /// Match every face in a base64 group image and record attendance for `period`.
    pub async fn recognize(
        &self,
        image: String,
        period: String,
    ) -> Result<RecognitionOutcome, EngineError> {
        self.request(|reply| EngineRequest::Recognize {
            image,
            period,
            reply,
        })
        .await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Load the detector and embedder, or record why they could not be loaded.
///
/// A missing or broken model never stops the daemon; model-backed requests
/// fail with [`CapabilityError::Unavailable`] instead.
pub fn load_models(detector_path: &Path, embedder_path: &Path, intra_threads: usize) -> FaceModels {
    let loaded = ScrfdDetector::load(detector_path, intra_threads).and_then(|detector| {
        let embedder = OnnxEmbedder::load(embedder_path, intra_threads)?;
        Ok((detector, embedder))
    });

    match loaded {
        Ok((detector, embedder)) => {
            tracing::info!(
                detector = %detector_path.display(),
                embedder = %embedder_path.display(),
                "face models loaded"
            );
            FaceModels::ready(Box::new(detector), Box::new(embedder))
        }
        Err(e) => {
            tracing::warn!(error = %e, "face models unavailable; detection and recognition disabled");
            FaceModels::unavailable(e.to_string())
        }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns `models` for its whole lifetime and serves requests one
/// at a time, in arrival order.
pub fn spawn_engine(models: FaceModels, stores: EngineStores) -> Result<EngineHandle, EngineError> {
    let models_loaded = models.is_loaded();
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            let mut models = models;
            tracing::info!(models_loaded, "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Detect { image, reply } => {
                        let _ = reply.send(run_detect(&mut models, &image));
                    }
                    EngineRequest::Enroll {
                        student,
                        photo_count,
                        reply,
                    } => {
                        let result = EnrollmentAggregator::new(
                            &mut models,
                            stores.photos.as_ref(),
                            stores.profiles.as_ref(),
                        )
                        .enroll(&student, photo_count)
                        .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Recognize {
                        image,
                        period,
                        reply,
                    } => {
                        let _ = reply.send(run_recognize(&mut models, &stores, &image, &period));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, models_loaded })
}

fn run_detect(models: &mut FaceModels, image: &str) -> Result<Framing, EngineError> {
    let image = decode_base64_image(image)?;
    let detector = models.detector()?;
    let faces = FaceLocator::locate(detector, &image)?;
    tracing::debug!(
        faces = faces.len(),
        width = image.width(),
        height = image.height(),
        "detect: complete"
    );
    Ok(Framing::assess(image.width(), image.height(), &faces))
}

fn run_recognize(
    models: &mut FaceModels,
    stores: &EngineStores,
    image: &str,
    period: &str,
) -> Result<RecognitionOutcome, EngineError> {
    let image = decode_base64_image(image)?;
    let outcome = RecognitionMatcher::new(models, stores.profiles.as_ref(), stores.ledger.as_ref())
        .recognize(&image, period)?;
    Ok(outcome)
}

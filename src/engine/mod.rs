//! Local inference engine.
//!
//! The ONNX session is a single long-lived resource that is not safe for
//! concurrent invocation, so a dedicated worker thread owns it and requests
//! are serialized through a channel, the same way the telemetry database
//! owns its connection. `close()` is ordered behind any in-flight
//! classification because the worker drains commands strictly in order.

mod labels;
mod preprocess;

pub use labels::LabelSet;
pub use preprocess::image_to_tensor;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc, Mutex,
    },
    thread::{self, JoinHandle},
};

use async_trait::async_trait;
use log::{error, info, warn};
use ort::session::Session;
use ort::value::Tensor;
use tokio::sync::oneshot;

use crate::config::EngineSettings;
use crate::error::EngineError;
use crate::models::Prediction;

/// Object-safe classification seam used by the orchestrator.
#[async_trait]
pub trait FoodClassifier: Send + Sync {
    /// Whether the engine is initialized and not closed.
    fn is_ready(&self) -> bool;

    /// Classify one image, returning ranked predictions. An empty vector
    /// means "no signal", which is a valid outcome rather than an error.
    async fn classify(&self, image: &[u8]) -> Result<Vec<Prediction>, EngineError>;
}

enum EngineCommand {
    Classify {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Vec<Prediction>, EngineError>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

struct EngineInner {
    sender: mpsc::Sender<EngineCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if self.sender.send(EngineCommand::Shutdown).is_err() {
                // Worker already exited; nothing to signal.
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join engine thread: {join_err:?}");
            }
        }
    }
}

/// ONNX-backed food classifier with an explicit initialize/classify/close
/// lifecycle. Cheap to clone; all clones share the one model resource.
#[derive(Clone)]
pub struct LocalInferenceEngine {
    inner: Arc<EngineInner>,
    input_width: u32,
    input_height: u32,
}

impl LocalInferenceEngine {
    /// Load the model and label set once. Fails with [`EngineError::Init`]
    /// when either resource is missing or malformed; the engine is unusable
    /// until a new `initialize` succeeds.
    pub fn initialize(
        settings: EngineSettings,
        min_confidence_floor: f32,
        max_predictions: usize,
    ) -> Result<Self, EngineError> {
        if !settings.model_path.exists() {
            return Err(EngineError::Init {
                reason: format!("model file not found: {}", settings.model_path.display()),
            });
        }
        if !settings.labels_path.exists() {
            return Err(EngineError::Init {
                reason: format!("label file not found: {}", settings.labels_path.display()),
            });
        }

        let (command_tx, command_rx) = mpsc::channel::<EngineCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<usize, String>>();
        let settings_for_thread = settings.clone();
        let limits = RankingLimits {
            confidence_floor: min_confidence_floor,
            max_predictions,
        };

        let worker = thread::Builder::new()
            .name("foodlens-engine".into())
            .spawn(move || {
                engine_worker(settings_for_thread, limits, command_rx, ready_tx);
            })
            .map_err(|err| EngineError::Init {
                reason: format!("failed to spawn engine worker thread: {err}"),
            })?;

        let label_count = ready_rx
            .recv()
            .map_err(|_| EngineError::Init {
                reason: "engine worker exited before signaling readiness".into(),
            })?
            .map_err(|reason| EngineError::Init { reason })?;

        info!(
            "Inference engine initialized: {} ({label_count} labels, {}x{} input)",
            settings.model_path.display(),
            settings.input_width,
            settings.input_height
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
                closed: AtomicBool::new(false),
            }),
            input_width: settings.input_width,
            input_height: settings.input_height,
        })
    }

    pub fn input_dims(&self) -> (u32, u32) {
        (self.input_width, self.input_height)
    }

    /// Release the model resource. Ordered behind any in-flight classify;
    /// later classifications fail with [`EngineError::NotReady`].
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);

        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .inner
            .sender
            .send(EngineCommand::Close { reply: reply_tx })
            .is_err()
        {
            return;
        }
        let _ = reply_rx.await;
    }
}

#[async_trait]
impl FoodClassifier for LocalInferenceEngine {
    fn is_ready(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst)
    }

    async fn classify(&self, image: &[u8]) -> Result<Vec<Prediction>, EngineError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(EngineError::NotReady);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.inner
            .sender
            .send(EngineCommand::Classify {
                image: image.to_vec(),
                reply: reply_tx,
            })
            .map_err(|_| EngineError::NotReady)?;

        reply_rx.await.map_err(|_| EngineError::NotReady)?
    }
}

/// Confidence floor and ranking cutoff fixed at initialize time.
#[derive(Debug, Clone, Copy)]
struct RankingLimits {
    confidence_floor: f32,
    max_predictions: usize,
}

fn engine_worker(
    settings: EngineSettings,
    limits: RankingLimits,
    command_rx: mpsc::Receiver<EngineCommand>,
    ready_tx: mpsc::Sender<Result<usize, String>>,
) {
    let labels = match LabelSet::load(&settings.labels_path) {
        Ok(labels) => labels,
        Err(err) => {
            let _ = ready_tx.send(Err(format!("label load failed: {err:#}")));
            return;
        }
    };

    let session = Session::builder()
        .and_then(|builder| Ok(builder.with_intra_threads(2)?))
        .and_then(|mut builder| builder.commit_from_file(&settings.model_path));

    let mut session = match session {
        Ok(session) => session,
        Err(err) => {
            let _ = ready_tx.send(Err(format!("model load failed: {err}")));
            return;
        }
    };

    if ready_tx.send(Ok(labels.len())).is_err() {
        warn!("Engine initialization receiver dropped before ready signal");
        return;
    }

    while let Ok(command) = command_rx.recv() {
        match command {
            EngineCommand::Classify { image, reply } => {
                let result = run_classification(&mut session, &labels, &settings, limits, &image);
                let _ = reply.send(result);
            }
            EngineCommand::Close { reply } => {
                // Dropping the session releases the model resource.
                let _ = reply.send(());
                break;
            }
            EngineCommand::Shutdown => break,
        }
    }

    info!("Inference engine thread shutting down");
}

fn run_classification(
    session: &mut Session,
    labels: &LabelSet,
    settings: &EngineSettings,
    limits: RankingLimits,
    image: &[u8],
) -> Result<Vec<Prediction>, EngineError> {
    let tensor_body = image_to_tensor(
        image,
        settings.input_width,
        settings.input_height,
        settings.normalization,
    )
    .map_err(|err| EngineError::Inference {
        reason: format!("preprocess failed: {err:#}"),
    })?;

    let input = Tensor::from_array((
        vec![
            1i64,
            i64::from(settings.input_height),
            i64::from(settings.input_width),
            3i64,
        ],
        tensor_body,
    ))
    .map_err(|err| EngineError::Inference {
        reason: format!("tensor creation error: {err}"),
    })?;

    let outputs = session
        .run(ort::inputs![input])
        .map_err(|err| EngineError::Inference {
            reason: err.to_string(),
        })?;

    let (_name, output) = outputs
        .iter()
        .next()
        .ok_or_else(|| EngineError::Inference {
            reason: "model produced no output tensor".into(),
        })?;

    let (shape, scores) =
        output
            .try_extract_tensor::<f32>()
            .map_err(|err| EngineError::Inference {
                reason: format!("tensor extraction failed: {err}"),
            })?;

    // Expect [1, num_classes]; tolerate a flat [num_classes] vector.
    let class_scores: &[f32] = match shape.len() {
        2 => {
            let classes = shape[1] as usize;
            &scores[..classes.min(scores.len())]
        }
        1 => scores,
        _ => {
            return Err(EngineError::Inference {
                reason: format!("unexpected output shape: {shape:?}"),
            })
        }
    };

    Ok(rank_predictions(class_scores, labels, limits))
}

/// Filter by the confidence floor, sort descending, truncate. Pure so it can
/// be tested without a model.
fn rank_predictions(scores: &[f32], labels: &LabelSet, limits: RankingLimits) -> Vec<Prediction> {
    let mut predictions: Vec<Prediction> = scores
        .iter()
        .enumerate()
        .filter(|(_, &score)| score >= limits.confidence_floor)
        .filter_map(|(index, &score)| {
            labels
                .get(index)
                .map(|label| Prediction::new(label, score.clamp(0.0, 1.0)))
        })
        .collect();

    predictions.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    predictions.truncate(limits.max_predictions);
    predictions
}

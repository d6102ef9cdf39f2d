//! Consolidated, inference-ready snapshots
//!
//! Gathers sharded model weights onto the coordinating rank, filters out
//! training-only keys, downcasts, and persists a single portable file plus
//! a readiness marker. The marker's existence is the only signal an
//! external reader may trust; the primary file alone can be mid-write.

use parking_lot::Mutex;
use runtime_core::{Error, Result, SnapshotConfig, Step};
use safetensors::tensor::TensorView;
use safetensors::Dtype;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use storage::{LocalStorage, StorageBackend};
use tensor_shard::{Collective, DType, Tensor};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::filter::SnapshotKeyPlan;
use crate::state::{StateValue, Stateful};

/// File name of the consolidated tensor file inside a snapshot directory
pub const SNAPSHOT_FILE_NAME: &str = "model.safetensors";

/// File name of the readiness marker inside a snapshot directory
pub const STABLE_MARKER_NAME: &str = "stable";

/// Format tag recorded in the snapshot metadata block
const FORMAT_TAG: &str = "pt";

/// Tensors accumulated on the coordinating rank, ready to persist
struct SnapshotPayload {
    tensors: Vec<(String, Tensor)>,
}

/// Handle to a snapshot write
///
/// Background writes return a joinable handle instead of detaching, so
/// both completion and failure are observable by whoever initiated the
/// write. Non-coordinating ranks get an already-completed handle.
#[derive(Debug)]
pub struct SnapshotHandle {
    inner: HandleInner,
}

#[derive(Debug)]
enum HandleInner {
    Completed(PathBuf),
    Task(JoinHandle<Result<PathBuf>>),
}

impl SnapshotHandle {
    fn completed(path: PathBuf) -> Self {
        Self {
            inner: HandleInner::Completed(path),
        }
    }

    fn task(handle: JoinHandle<Result<PathBuf>>) -> Self {
        Self {
            inner: HandleInner::Task(handle),
        }
    }

    /// Wait for the write to finish and return the primary file path
    ///
    /// Surfaces any persistence failure that happened on the background
    /// task; nothing is swallowed.
    pub async fn join(self) -> Result<PathBuf> {
        match self.inner {
            HandleInner::Completed(path) => Ok(path),
            HandleInner::Task(handle) => handle.await.map_err(|e| Error::Background {
                message: e.to_string(),
            })?,
        }
    }

    /// Whether the write has finished (successfully or not)
    pub fn is_finished(&self) -> bool {
        match &self.inner {
            HandleInner::Completed(_) => true,
            HandleInner::Task(handle) => handle.is_finished(),
        }
    }

    /// Cancel the background write (shutdown path)
    ///
    /// A cancelled job never produces a `stable` marker, so readers never
    /// observe its output.
    pub fn abort(&self) {
        if let HandleInner::Task(handle) = &self.inner {
            handle.abort();
        }
    }
}

/// Releases the in-flight reservation for an output path when dropped
struct InFlightGuard {
    set: Arc<Mutex<HashSet<PathBuf>>>,
    path: PathBuf,
}

impl InFlightGuard {
    fn acquire(set: &Arc<Mutex<HashSet<PathBuf>>>, path: &Path) -> Result<Self> {
        let mut in_flight = set.lock();
        if !in_flight.insert(path.to_path_buf()) {
            return Err(Error::SnapshotInFlight {
                path: path.display().to_string(),
            });
        }
        Ok(Self {
            set: Arc::clone(set),
            path: path.to_path_buf(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.path);
    }
}

/// Writer for consolidated snapshots
///
/// One writer per process; it owns the in-flight bookkeeping that rejects
/// overlapping writes to the same output directory.
pub struct SnapshotWriter {
    collective: Arc<dyn Collective>,
    in_flight: Arc<Mutex<HashSet<PathBuf>>>,
}

impl SnapshotWriter {
    pub fn new(collective: Arc<dyn Collective>) -> Self {
        Self {
            collective,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Consolidate and persist, blocking until the marker exists
    ///
    /// All ranks must call this; every rank participates in the gathers,
    /// but only rank 0 accumulates and writes. Returns the path of the
    /// primary tensor file (the marker is a sibling named `stable`).
    #[instrument(skip(self, model), fields(rank = self.collective.rank(), dtype = %dtype))]
    pub async fn write<M: Stateful>(
        &self,
        model: &M,
        output_dir: &Path,
        dtype: DType,
    ) -> Result<PathBuf> {
        let _guard = InFlightGuard::acquire(&self.in_flight, output_dir)?;
        let path = output_dir.join(SNAPSHOT_FILE_NAME);

        match self.collect(model, dtype).await? {
            Some(payload) => {
                persist(payload, output_dir.to_path_buf()).await?;
                Ok(path)
            }
            None => Ok(path),
        }
    }

    /// Consolidate inline, persist on a background task
    ///
    /// The gathers (steps every rank participates in) run on the caller's
    /// task; only the serialize-and-write tail is dispatched, with the
    /// already-materialized tensors moved into it. The caller observes
    /// completion or failure through the returned handle.
    #[instrument(skip(self, model), fields(rank = self.collective.rank(), dtype = %dtype))]
    pub async fn write_background<M: Stateful>(
        &self,
        model: &M,
        output_dir: &Path,
        dtype: DType,
    ) -> Result<SnapshotHandle> {
        let guard = InFlightGuard::acquire(&self.in_flight, output_dir)?;
        let path = output_dir.join(SNAPSHOT_FILE_NAME);

        match self.collect(model, dtype).await? {
            Some(payload) => {
                let dir = output_dir.to_path_buf();
                let task = tokio::spawn(async move {
                    let result = persist(payload, dir).await;
                    drop(guard);
                    result.map(|()| path)
                });
                Ok(SnapshotHandle::task(task))
            }
            None => Ok(SnapshotHandle::completed(path)),
        }
    }

    /// Consolidate per configuration, under `output_root/step_<N>`
    ///
    /// Parses the configured dtype tag and dispatches to the blocking or
    /// background path. The blocking path returns an already-completed
    /// handle, so callers can treat both modes uniformly.
    pub async fn write_for_step<M: Stateful>(
        &self,
        model: &M,
        config: &SnapshotConfig,
        step: Step,
    ) -> Result<SnapshotHandle> {
        let dtype = DType::parse(&config.dtype)?;
        let output_dir = config.output_root.join(format!("step_{}", step));

        if config.background {
            self.write_background(model, &output_dir, dtype).await
        } else {
            let path = self.write(model, &output_dir, dtype).await?;
            Ok(SnapshotHandle::completed(path))
        }
    }

    /// Gather-and-filter phase, identical for both modes
    ///
    /// Returns the accumulated payload on rank 0, `None` elsewhere.
    async fn collect<M: Stateful>(
        &self,
        model: &M,
        dtype: DType,
    ) -> Result<Option<SnapshotPayload>> {
        let start = Instant::now();
        let state = model.extract_state();
        let prefixes = model.composite_prefixes();
        if prefixes.is_some() {
            info!("Filtering auxiliary head weights out of the snapshot");
        }

        let plan =
            SnapshotKeyPlan::build(state.keys().map(String::as_str), prefixes.as_ref());
        let coordinator = self.collective.rank() == 0;
        let mut tensors = Vec::with_capacity(if coordinator { plan.len() } else { 0 });

        for key in plan.entries() {
            let Some(value) = state.get(&key.original) else {
                continue;
            };
            match value {
                StateValue::Sharded(shard) => {
                    // Downcast before gathering: the cast is shard-local,
                    // so the collective moves the narrow dtype.
                    let cast = shard.cast(dtype);
                    let full = self.collective.gather_full(&key.original, &cast).await?;
                    if let Some(full) = full {
                        tensors.push((key.canonical.clone(), full));
                    }
                }
                StateValue::Tensor(tensor) => {
                    if coordinator {
                        tensors.push((key.canonical.clone(), tensor.clone()));
                    }
                }
                StateValue::Int(_) | StateValue::Float(_) => {
                    debug!(key = %key.original, "Skipping non-tensor state value");
                }
            }
        }

        info!(
            tensors = plan.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Gathered full tensors for snapshot"
        );

        if coordinator {
            Ok(Some(SnapshotPayload { tensors }))
        } else {
            Ok(None)
        }
    }
}

/// Serialize the payload and write `model.safetensors`, then the marker
///
/// Ordering contract: the marker is touched only after the primary write
/// has returned, so a reader that sees `stable` always finds a complete,
/// parseable tensor file.
async fn persist(payload: SnapshotPayload, output_dir: PathBuf) -> Result<()> {
    let start = Instant::now();
    let storage = LocalStorage::new(&output_dir);

    let mut metadata = HashMap::new();
    metadata.insert("format".to_string(), FORMAT_TAG.to_string());

    let encoded = {
        let views = payload
            .tensors
            .iter()
            .map(|(name, tensor)| {
                let view = TensorView::new(
                    safetensors_dtype(tensor.dtype()),
                    tensor.shape().to_vec(),
                    tensor.data(),
                )
                .map_err(|e| Error::Serialization(e.to_string()))?;
                Ok((name.as_str(), view))
            })
            .collect::<Result<Vec<_>>>()?;
        safetensors::serialize(views, &Some(metadata))
            .map_err(|e| Error::Serialization(e.to_string()))?
    };

    // The gathered full copies are no longer needed once encoded; free
    // them before the disk write to bound peak memory.
    drop(payload);

    let size = storage
        .write(SNAPSHOT_FILE_NAME, bytes::Bytes::from(encoded))
        .await?;
    storage.touch(STABLE_MARKER_NAME).await?;

    info!(
        path = %output_dir.join(SNAPSHOT_FILE_NAME).display(),
        size_bytes = size,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Consolidated snapshot saved"
    );
    Ok(())
}

fn safetensors_dtype(dtype: DType) -> Dtype {
    match dtype {
        DType::F32 => Dtype::F32,
        DType::F16 => Dtype::F16,
        DType::BF16 => Dtype::BF16,
    }
}

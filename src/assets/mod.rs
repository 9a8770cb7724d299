mod catalog;
mod decoder;
#[cfg(test)]
pub(crate) mod fixtures;
mod gltf_import;
mod source;
mod staging;

pub use catalog::{Catalog, CatalogStage, ClipCatalog};
pub use decoder::{DecodeError, DracoCliDecoder, GeometryDecoder};
pub use gltf_import::{instantiate, parse_glb, parse_gltf, Instance, ParsedAsset};
pub use source::{AssetSource, FetchError, FsSource, HttpSource, MemorySource};
pub use staging::{add_ground, add_skeleton_marker, stage, Staged, TARGET_SIZE};

use crate::config::join_path;
use percent_encoding::percent_decode_str;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("failed to parse glTF: {0}")]
    Parse(#[from] gltf::Error),
    #[error("{0} has no scene content")]
    EmptyScene(String),
    #[error("failed to decode compressed geometry: {0}")]
    Decode(#[from] DecodeError),
    #[error("{0} is required but no geometry decoder is configured")]
    UnsupportedCompression(String),
    #[error("invalid asset data: {0}")]
    InvalidData(String),
    #[error("failed to start load thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("superseded by a newer load")]
    Superseded,
    #[error("asset loader has been disposed")]
    Disposed,
}

/// Result of one background load, tagged with the sequence number it was issued under.
#[derive(Debug)]
pub struct LoadOutcome {
    pub seq: u64,
    pub label: String,
    pub result: Result<ParsedAsset, AssetError>,
}

enum Payload {
    /// Full source path of the asset.
    Path(String),
    Buffer(Vec<u8>),
}

struct LoadJob {
    seq: u64,
    label: String,
    payload: Payload,
}

/// Fetches and parses assets on one background worker thread.
///
/// Every request gets a new sequence number; only the outcome carrying
/// `latest()` may be attached, older ones are stale. The worker skips jobs
/// that were superseded while queued, so a burst of requests costs at most
/// one wasted load. The decoder is shared by every load and released once by
/// `dispose`.
pub struct AssetLoader {
    source: Arc<dyn AssetSource>,
    decoder: Option<Arc<dyn GeometryDecoder>>,
    anim_dir: String,
    latest: Arc<AtomicU64>,
    in_flight: usize,
    jobs: Option<Sender<LoadJob>>,
    tx: Sender<LoadOutcome>,
    rx: Receiver<LoadOutcome>,
    disposed: bool,
}

impl AssetLoader {
    pub fn new(
        source: Arc<dyn AssetSource>,
        decoder: Option<Arc<dyn GeometryDecoder>>,
        anim_dir: impl Into<String>,
    ) -> Self {
        if let Some(decoder) = &decoder {
            log::info!("asset loader: {} decoder installed", decoder.name());
        }
        let (tx, rx) = mpsc::channel();
        Self {
            source,
            decoder,
            anim_dir: anim_dir.into(),
            latest: Arc::new(AtomicU64::new(0)),
            in_flight: 0,
            jobs: None,
            tx,
            rx,
            disposed: false,
        }
    }

    pub fn source(&self) -> &dyn AssetSource {
        self.source.as_ref()
    }

    pub fn latest(&self) -> u64 {
        self.latest.load(Ordering::Acquire)
    }

    pub fn is_current(&self, seq: u64) -> bool {
        seq == self.latest()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Starts loading `anim_dir/file_name` and returns its sequence number.
    pub fn load_path(&mut self, file_name: &str) -> Result<u64, AssetError> {
        let path = join_path(&self.anim_dir, file_name);
        self.submit(file_name.to_string(), Payload::Path(path))
    }

    /// Parses bytes already in memory; `label` only names the asset in status text.
    pub fn load_buffer(&mut self, bytes: Vec<u8>, label: &str) -> Result<u64, AssetError> {
        self.submit(label.to_string(), Payload::Buffer(bytes))
    }

    fn submit(&mut self, label: String, payload: Payload) -> Result<u64, AssetError> {
        if self.disposed {
            return Err(AssetError::Disposed);
        }
        self.start_worker()?;
        // Published before the send so the worker never sees its newest job as stale.
        let seq = self.latest.fetch_add(1, Ordering::AcqRel) + 1;
        let job = LoadJob {
            seq,
            label: label.clone(),
            payload,
        };
        let sent = self.jobs.as_ref().is_some_and(|jobs| jobs.send(job).is_ok());
        if !sent {
            return Err(AssetError::Disposed);
        }
        self.in_flight += 1;
        log::info!("asset loader: #{} loading {}", seq, label);
        Ok(seq)
    }

    fn start_worker(&mut self) -> Result<(), AssetError> {
        if self.jobs.is_some() {
            return Ok(());
        }
        let (jobs_tx, jobs_rx) = mpsc::channel();
        let worker = LoadWorker {
            source: Arc::clone(&self.source),
            decoder: self.decoder.clone(),
            latest: Arc::clone(&self.latest),
            outcomes: self.tx.clone(),
        };
        std::thread::Builder::new()
            .name("asset-loader".to_string())
            .spawn(move || worker.run(jobs_rx))
            .map_err(AssetError::Spawn)?;
        self.jobs = Some(jobs_tx);
        Ok(())
    }

    /// Outcomes that have arrived so far, in arrival order.
    pub fn drain(&mut self) -> Vec<LoadOutcome> {
        let outcomes: Vec<LoadOutcome> = self.rx.try_iter().collect();
        self.in_flight = self.in_flight.saturating_sub(outcomes.len());
        outcomes
    }

    /// Blocks for the next outcome, up to `timeout`.
    pub fn wait(&mut self, timeout: Duration) -> Option<LoadOutcome> {
        if self.in_flight == 0 {
            return None;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => {
                self.in_flight -= 1;
                Some(outcome)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Stops the worker after its current job and releases the decoder.
    /// Returns `false` if already disposed.
    pub fn dispose(&mut self) -> bool {
        if self.disposed {
            return false;
        }
        self.disposed = true;
        // Queued jobs see a newer sequence number and are skipped unfetched.
        self.latest.fetch_add(1, Ordering::AcqRel);
        self.jobs = None;
        if let Some(decoder) = self.decoder.take() {
            decoder.dispose();
        }
        true
    }
}

impl Drop for AssetLoader {
    fn drop(&mut self) {
        self.dispose();
    }
}

struct LoadWorker {
    source: Arc<dyn AssetSource>,
    decoder: Option<Arc<dyn GeometryDecoder>>,
    latest: Arc<AtomicU64>,
    outcomes: Sender<LoadOutcome>,
}

impl LoadWorker {
    fn run(self, jobs: Receiver<LoadJob>) {
        for job in jobs {
            let result = if job.seq == self.latest.load(Ordering::Acquire) {
                std::panic::catch_unwind(AssertUnwindSafe(|| self.load(&job)))
                    .unwrap_or_else(|_| Err(AssetError::InvalidData("parser panicked".to_string())))
            } else {
                log::debug!("asset loader: skipping superseded #{} ({})", job.seq, job.label);
                Err(AssetError::Superseded)
            };
            let outcome = LoadOutcome {
                seq: job.seq,
                label: job.label,
                result,
            };
            if self.outcomes.send(outcome).is_err() {
                break;
            }
        }
        log::debug!("asset loader: worker stopped");
    }

    fn load(&self, job: &LoadJob) -> Result<ParsedAsset, AssetError> {
        let decoder = self.decoder.as_deref();
        match &job.payload {
            Payload::Buffer(bytes) => parse_glb(bytes, &job.label, decoder),
            Payload::Path(path) => {
                let bytes = self.source.fetch(path)?;
                let dir = path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
                let resolve = |uri: &str| -> Result<Vec<u8>, AssetError> {
                    let name = percent_decode_str(uri).decode_utf8_lossy();
                    Ok(self.source.fetch(&join_path(dir, &name))?)
                };
                parse_gltf(&bytes, &job.label, decoder, &resolve)
            }
        }
    }
}

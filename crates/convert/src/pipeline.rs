//! A fixed pool of workers converting book files to EPUB in the background.
//!
//! Callers never wait for a conversion. [`Pipeline::convert`] either returns
//! the cached EPUB, reports that one is on its way, or pushes back with
//! [`Conversion::QueueFull`] when every worker is busy. Converted files are
//! cached as `<cache>/<hash>.epub`, so a file's conversion survives restarts
//! and renames.

use crate::converter::Converter;
use crate::error::{Error, ErrorKind, Result};
use exn::ResultExt;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::{Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tome_extract::BookFile;
use tracing::instrument;

/// Outcome of asking for a file's EPUB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conversion {
    /// The converted file.
    Ready(PathBuf),
    /// A worker is converting the file; ask again later.
    NotReady,
    /// Every worker is busy and nothing was queued; ask again later.
    QueueFull,
}

/// What the pipeline knows about a file that has no cached EPUB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    NotTracked,
    InProgress,
    /// The last attempt failed. Reported once by the next
    /// [`Pipeline::convert`] call.
    Failed,
}

#[derive(Debug)]
enum Tracked {
    InProgress,
    Failed(Error),
}

struct Job {
    file_id: i64,
    hash: String,
    extension: String,
    source: PathBuf,
    /// Held until the job is finished, so the worker counts as busy.
    _permit: OwnedSemaphorePermit,
}

struct Shared {
    cache_dir: PathBuf,
    converter: Converter,
    /// Only ever locked for the duration of a map operation.
    states: Mutex<HashMap<i64, Tracked>>,
}
impl Shared {
    fn states(&self) -> MutexGuard<'_, HashMap<i64, Tracked>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cached(&self, hash: &str) -> PathBuf {
        self.cache_dir.join(format!("{hash}.epub"))
    }
}

pub struct Pipeline {
    shared: Arc<Shared>,
    idle: Arc<Semaphore>,
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}
impl Pipeline {
    /// Creates the cache directory and starts `workers` workers (at least
    /// one) on the current Tokio runtime.
    pub fn new(cache_dir: impl Into<PathBuf>, converter: Converter, workers: usize) -> Result<Self> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir).or_raise(|| ErrorKind::Io)?;
        let workers = workers.max(1);
        let shared = Arc::new(Shared { cache_dir, converter, states: Mutex::new(HashMap::new()) });
        let (sender, receiver) = mpsc::channel(workers);
        let receiver = Arc::new(AsyncMutex::new(receiver));
        let handles = (0..workers).map(|n| tokio::spawn(work(n, Arc::clone(&shared), Arc::clone(&receiver)))).collect();
        tracing::debug!(workers, cache = %shared.cache_dir.display(), "Started conversion pipeline");
        Ok(Self {
            shared,
            idle: Arc::new(Semaphore::new(workers)),
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
        })
    }

    /// Returns the EPUB for `file`, starting a conversion of `source` (the
    /// file's absolute path) if there is none yet.
    ///
    /// A failed conversion is reported exactly once, wrapped in
    /// [`ErrorKind::Failed`]; the call after that starts over.
    #[instrument(skip_all, fields(file_id = file.id))]
    pub async fn convert(&self, file: &BookFile, source: impl AsRef<Path>) -> Result<Conversion> {
        let Some(sender) = self.sender.lock().unwrap_or_else(PoisonError::into_inner).clone() else {
            exn::bail!(ErrorKind::Closed);
        };
        let cached = self.shared.cached(&file.hash);
        if tokio::fs::try_exists(&cached).await.or_raise(|| ErrorKind::Io)? {
            return Ok(Conversion::Ready(cached));
        }
        let permit = {
            let mut states = self.shared.states();
            if let Entry::Occupied(entry) = states.entry(file.id) {
                match entry.get() {
                    Tracked::InProgress => return Ok(Conversion::NotReady),
                    Tracked::Failed(_) => {
                        if let Tracked::Failed(e) = entry.remove() {
                            return Err(e.raise(ErrorKind::Failed));
                        }
                    },
                }
            }
            let permit = match Arc::clone(&self.idle).try_acquire_owned() {
                Ok(permit) => permit,
                Err(TryAcquireError::NoPermits) => {
                    tracing::debug!("All conversion workers busy");
                    return Ok(Conversion::QueueFull);
                },
                // close() ran after the sender was cloned above.
                Err(TryAcquireError::Closed) => exn::bail!(ErrorKind::Closed),
            };
            states.insert(file.id, Tracked::InProgress);
            permit
        };
        let job = Job {
            file_id: file.id,
            hash: file.hash.clone(),
            extension: file.extension.clone(),
            source: source.as_ref().to_path_buf(),
            _permit: permit,
        };
        // Never blocks: there are as many slots as permits.
        if sender.try_send(job).is_err() {
            self.shared.states().remove(&file.id);
            exn::bail!(ErrorKind::Closed);
        }
        Ok(Conversion::NotReady)
    }

    pub fn state(&self, file_id: i64) -> State {
        match self.shared.states().get(&file_id) {
            None => State::NotTracked,
            Some(Tracked::InProgress) => State::InProgress,
            Some(Tracked::Failed(_)) => State::Failed,
        }
    }

    /// Stops accepting work. Queued and running conversions still finish.
    pub fn close(&self) {
        self.idle.close();
        if self.sender.lock().unwrap_or_else(PoisonError::into_inner).take().is_some() {
            tracing::debug!("Closed conversion pipeline");
        }
    }

    /// Waits for every worker to exit. Only returns once [`close`](Self::close)
    /// has been called and the remaining work has drained.
    pub async fn wait(&self) {
        let handles = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = ?e, "Conversion worker panicked");
            }
        }
    }
}
impl Drop for Pipeline {
    fn drop(&mut self) {
        self.close();
    }
}

async fn work(worker: usize, shared: Arc<Shared>, receiver: Arc<AsyncMutex<Receiver<Job>>>) {
    loop {
        let job = receiver.lock().await.recv().await;
        let Some(job) = job else {
            tracing::trace!(worker, "Conversion worker exiting");
            return;
        };
        shared.states().insert(job.file_id, Tracked::InProgress);
        match convert(&shared, &job).await {
            Ok(path) => {
                shared.states().remove(&job.file_id);
                tracing::info!(worker, file_id = job.file_id, path = %path.display(), "Converted file");
            },
            Err(e) => {
                tracing::warn!(worker, file_id = job.file_id, error = ?e, "Conversion failed");
                shared.states().insert(job.file_id, Tracked::Failed(e));
            },
        }
    }
}

async fn convert(shared: &Shared, job: &Job) -> Result<PathBuf> {
    // Scratch space inside the cache so the final rename stays on one filesystem.
    let scratch = tempfile::Builder::new()
        .prefix(".converting-")
        .tempdir_in(&shared.cache_dir)
        .or_raise(|| ErrorKind::Io)?;
    let input = match job.extension.as_str() {
        "" => scratch.path().join(&job.hash),
        ext => scratch.path().join(format!("{}.{ext}", job.hash)),
    };
    let output = scratch.path().join(format!("{}.epub", job.hash));
    link(&job.source, &input).await?;
    shared.converter.run(&input, &output).await?;
    let cached = shared.cached(&job.hash);
    tokio::fs::rename(&output, &cached).await.or_raise(|| ErrorKind::Io)?;
    if let Err(e) = scratch.close() {
        tracing::warn!(error = ?e, "Could not remove conversion scratch directory");
    }
    Ok(cached)
}

#[cfg(unix)]
async fn link(source: &Path, link: &Path) -> Result<()> {
    tokio::fs::symlink(source, link).await.or_raise(|| ErrorKind::Io)
}

#[cfg(not(unix))]
async fn link(source: &Path, link: &Path) -> Result<()> {
    tokio::fs::copy(source, link).await.or_raise(|| ErrorKind::Io)?;
    Ok(())
}

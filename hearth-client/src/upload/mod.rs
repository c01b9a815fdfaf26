//! Background file uploads with progress, cancellation, and bounded
//! retries.
//!
//! An [`Upload`] owns one worker task that reads the file, streams it to
//! the server as a multipart body, and reports progress at chunk
//! boundaries. `start`/`stop`/`join` mirror the stream controller;
//! callbacks are the only notification channel for background outcomes.

mod worker;

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::config::UploadConfig;
use crate::models::UploadRecord;
use crate::transport::{Transport, TransportError};

use self::worker::Worker;

const STATE_IDLE: u8 = 0;
const STATE_UPLOADING: u8 = 1;
const STATE_COMPLETED: u8 = 2;
const STATE_FAILED: u8 = 3;
const STATE_CANCELLED: u8 = 4;

/// Lifecycle of one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Created but not started.
    Idle,
    /// The worker is transferring the file.
    Uploading,
    /// The server acknowledged the whole file. Terminal.
    Completed,
    /// The transfer failed after exhausting its retries. Terminal.
    Failed,
    /// The transfer was stopped before completion. Terminal.
    Cancelled,
}

impl UploadState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            STATE_UPLOADING => Self::Uploading,
            STATE_COMPLETED => Self::Completed,
            STATE_FAILED => Self::Failed,
            STATE_CANCELLED => Self::Cancelled,
            _ => Self::Idle,
        }
    }
}

/// Convenience alias for upload results.
pub type UploadResult<T> = Result<T, UploadError>;

/// Errors surfaced by an upload.
#[derive(Debug, Error)]
pub enum UploadError {
    /// `start` was called on an upload that is not idle.
    #[error("upload already started")]
    AlreadyStarted,

    /// `join` was called before `start`.
    #[error("upload not started")]
    NotStarted,

    /// The path is not an existing regular file.
    #[error("file not found: {}", path.display())]
    FileNotFound {
        /// The offending path.
        path: PathBuf,
    },

    /// The transfer failed after exhausting its retries.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Progress callback, invoked with `(bytes_sent, bytes_total)`.
pub type ProgressCallback = Box<dyn Fn(u64, u64) + Send + Sync>;

/// Completion callback, invoked once with the stored upload record.
pub type FinishedCallback = Box<dyn FnOnce(UploadRecord) + Send>;

/// Failure callback, invoked once with the terminal error.
pub type FailureCallback = Box<dyn FnOnce(UploadError) + Send>;

/// Keeps progress reports monotonic across retries.
///
/// A failed attempt rewinds the transfer, but observers must never see
/// `bytes_sent` go backwards; the gate remembers the high-water mark and
/// drops stale reports. The final boundary is reported through
/// [`ProgressGate::complete`] only once the server acknowledged the file.
struct ProgressGate {
    callback: Option<ProgressCallback>,
    emitted: Mutex<Option<u64>>,
}

impl ProgressGate {
    fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            callback,
            emitted: Mutex::new(None),
        }
    }

    fn advance(&self, sent: u64, total: u64) {
        let Some(callback) = self.callback.as_ref() else {
            return;
        };
        {
            let mut emitted = self.emitted.lock().unwrap_or_else(PoisonError::into_inner);
            if emitted.is_some_and(|last| sent <= last) {
                return;
            }
            *emitted = Some(sent);
        }
        callback(sent, total);
    }

    fn complete(&self, total: u64) {
        let Some(callback) = self.callback.as_ref() else {
            return;
        };
        {
            let mut emitted = self.emitted.lock().unwrap_or_else(PoisonError::into_inner);
            if *emitted == Some(total) {
                return;
            }
            *emitted = Some(total);
        }
        callback(total, total);
    }
}

/// State shared by the controller and its worker.
pub(crate) struct UploadSession {
    state: AtomicU8,
    token: CancellationToken,
    progress: ProgressGate,
    finished: Mutex<Option<FinishedCallback>>,
    failed: Mutex<Option<FailureCallback>>,
}

impl UploadSession {
    fn new(
        progress: Option<ProgressCallback>,
        finished: Option<FinishedCallback>,
        failed: Option<FailureCallback>,
    ) -> Self {
        Self {
            state: AtomicU8::new(STATE_IDLE),
            token: CancellationToken::new(),
            progress: ProgressGate::new(progress),
            finished: Mutex::new(finished),
            failed: Mutex::new(failed),
        }
    }

    fn state(&self) -> UploadState {
        UploadState::from_raw(self.state.load(Ordering::SeqCst))
    }

    fn begin(&self) {
        self.state.store(STATE_UPLOADING, Ordering::SeqCst);
    }

    fn request_cancel(&self) {
        self.token.cancel();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once `stop` has been requested.
    pub(crate) async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Reports a chunk boundary, subject to the monotonic gate.
    pub(crate) fn progress(&self, sent: u64, total: u64) {
        self.progress.advance(sent, total);
    }

    /// Terminal success: final progress boundary, then the finished
    /// callback, exactly once.
    pub(crate) fn finish(&self, record: UploadRecord, total: u64) {
        self.progress.complete(total);
        self.state.store(STATE_COMPLETED, Ordering::SeqCst);
        let callback = self
            .finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback {
            callback(record);
        }
    }

    /// Terminal failure: the error callback, exactly once, no final
    /// progress boundary.
    pub(crate) fn fail(&self, error: UploadError) {
        self.state.store(STATE_FAILED, Ordering::SeqCst);
        let callback = self
            .failed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback {
            callback(error);
        }
    }

    /// Terminal cancellation: neither completion callback fires.
    pub(crate) fn cancel_terminal(&self) {
        self.state.store(STATE_CANCELLED, Ordering::SeqCst);
    }
}

/// Controls one background file upload.
///
/// Created by [`crate::room::Room::upload`]. Callbacks are builder-style
/// and must be set before [`Upload::start`].
pub struct Upload {
    room_id: u64,
    path: PathBuf,
    transport: Arc<dyn Transport>,
    config: UploadConfig,
    progress: Option<ProgressCallback>,
    finished: Option<FinishedCallback>,
    failed: Option<FailureCallback>,
    session: Option<Arc<UploadSession>>,
    worker: Option<JoinHandle<()>>,
}

impl Debug for Upload {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Upload")
            .field("room_id", &self.room_id)
            .field("path", &self.path)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Upload {
    pub(crate) fn new(
        room_id: u64,
        path: PathBuf,
        transport: Arc<dyn Transport>,
        config: UploadConfig,
    ) -> Self {
        Self {
            room_id,
            path,
            transport,
            config,
            progress: None,
            finished: None,
            failed: None,
            session: None,
            worker: None,
        }
    }

    /// Sets the progress callback, invoked with `(bytes_sent,
    /// bytes_total)` at chunk boundaries. Reports are monotonic and reach
    /// `bytes_sent == bytes_total` only on success.
    #[must_use]
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64, u64) + Send + Sync + 'static,
    {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Sets the completion callback, invoked exactly once on success with
    /// the stored upload record. Mutually exclusive with the error
    /// callback.
    #[must_use]
    pub fn on_finished<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(UploadRecord) + Send + 'static,
    {
        self.finished = Some(Box::new(callback));
        self
    }

    /// Sets the failure callback, invoked exactly once when the transfer
    /// turns terminal with an error. Cancellation does not count as
    /// failure.
    #[must_use]
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(UploadError) + Send + 'static,
    {
        self.failed = Some(Box::new(callback));
        self
    }

    /// Overrides the MIME type sent with the file.
    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.config.content_type = content_type.into();
        self
    }

    /// File this upload sends.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> UploadState {
        self.session
            .as_ref()
            .map_or(UploadState::Idle, |session| session.state())
    }

    /// Whether the worker is still transferring. Advisory: the state may
    /// change right after reading.
    #[must_use]
    pub fn is_uploading(&self) -> bool {
        self.state() == UploadState::Uploading
    }

    /// Checks the file and spawns the transfer worker.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::FileNotFound`] when the path is not an
    /// existing regular file, and [`UploadError::AlreadyStarted`] on
    /// repeat calls.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn start(&mut self) -> UploadResult<()> {
        if self.session.is_some() {
            return Err(UploadError::AlreadyStarted);
        }
        let metadata = std::fs::metadata(&self.path)
            .ok()
            .filter(std::fs::Metadata::is_file)
            .ok_or_else(|| UploadError::FileNotFound {
                path: self.path.clone(),
            })?;

        let session = Arc::new(UploadSession::new(
            self.progress.take(),
            self.finished.take(),
            self.failed.take(),
        ));
        session.begin();
        let worker = Worker::new(
            Arc::clone(&self.transport),
            Arc::clone(&session),
            self.config.clone(),
            self.room_id,
            self.path.clone(),
            file_name_of(&self.path),
            metadata.len(),
        );
        self.worker = Some(tokio::spawn(worker.run()));
        self.session = Some(session);
        Ok(())
    }

    /// Requests cancellation. The worker aborts at the next chunk
    /// boundary and the upload ends [`UploadState::Cancelled`]; after a
    /// terminal state this is a no-op. Safe to call repeatedly.
    pub fn stop(&self) {
        if let Some(session) = &self.session {
            session.request_cancel();
        }
    }

    /// Waits until the upload reaches a terminal state and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::NotStarted`] when `start` was never called.
    pub async fn join(&mut self) -> UploadResult<UploadState> {
        let Some(session) = self.session.as_ref().map(Arc::clone) else {
            return Err(UploadError::NotStarted);
        };
        if let Some(worker) = self.worker.take() {
            if let Err(err) = worker.await {
                error!("upload worker failed: {err}");
            }
        }
        Ok(session.state())
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name().map_or_else(
        || "upload.bin".to_owned(),
        |name| name.to_string_lossy().into_owned(),
    )
}

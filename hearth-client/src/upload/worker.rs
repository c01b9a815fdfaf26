use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::time;
use tracing::{debug, warn};

use crate::config::UploadConfig;
use crate::transport::{Transport, UploadBody, UploadSource};

use super::{UploadError, UploadSession};

/// Streams one file to the server, retrying failed attempts up to the
/// configured bound before turning the session terminal.
pub(super) struct Worker {
    transport: Arc<dyn Transport>,
    session: Arc<UploadSession>,
    config: UploadConfig,
    room_id: u64,
    path: PathBuf,
    file_name: String,
    total: u64,
}

impl Worker {
    pub(super) fn new(
        transport: Arc<dyn Transport>,
        session: Arc<UploadSession>,
        config: UploadConfig,
        room_id: u64,
        path: PathBuf,
        file_name: String,
        total: u64,
    ) -> Self {
        Self {
            transport,
            session,
            config,
            room_id,
            path,
            file_name,
            total,
        }
    }

    pub(super) async fn run(self) {
        let mut attempt: u32 = 0;
        loop {
            let source = UploadSource {
                file_name: self.file_name.clone(),
                content_type: self.config.content_type.clone(),
                content_length: self.total,
                body: self.body(),
            };
            let outcome = tokio::select! {
                biased;
                () = self.session.cancelled() => {
                    self.session.cancel_terminal();
                    return;
                }
                outcome = self.transport.upload_file(self.room_id, source) => outcome,
            };
            match outcome {
                Ok(record) => {
                    debug!("upload of {} finished as upload {}", self.file_name, record.id);
                    self.session.finish(record, self.total);
                    return;
                }
                Err(err) if attempt < self.config.max_retries => {
                    let delay = self.config.retry_backoff.delay_for_attempt(attempt);
                    attempt += 1;
                    warn!(
                        "upload attempt {attempt} of {} failed: {err}, retrying in {delay:?}",
                        self.file_name
                    );
                    tokio::select! {
                        biased;
                        () = self.session.cancelled() => {
                            self.session.cancel_terminal();
                            return;
                        }
                        () = time::sleep(delay) => {}
                    }
                }
                Err(err) => {
                    warn!("upload of {} failed: {err}", self.file_name);
                    self.session.fail(UploadError::Transport(err));
                    return;
                }
            }
        }
    }

    /// Chunked body over the file.
    ///
    /// A boundary is reported when the transport pulls the chunk after a
    /// transmitted one, so `bytes_sent` counts delivered bytes. The final
    /// boundary is withheld here and reported by the session on success,
    /// keeping `bytes_sent == bytes_total` reserved for completed
    /// transfers even when a later attempt rewinds the file.
    fn body(&self) -> UploadBody {
        let session = Arc::clone(&self.session);
        let path = self.path.clone();
        let chunk_size = self.config.chunk_size.max(1);
        let total = self.total;
        Box::pin(async_stream::stream! {
            let mut file = match File::open(&path).await {
                Ok(file) => file,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };
            let mut sent: u64 = 0;
            loop {
                if session.is_cancelled() {
                    return;
                }
                let mut chunk = vec![0_u8; chunk_size];
                match file.read(&mut chunk).await {
                    Ok(0) => return,
                    Ok(read) => {
                        chunk.truncate(read);
                        sent += read as u64;
                        yield Ok(chunk);
                        if sent < total {
                            session.progress(sent, total);
                        }
                    }
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                }
            }
        })
    }
}

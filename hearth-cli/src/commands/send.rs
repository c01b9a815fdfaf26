use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};
use hearth_client::upload::UploadState;
use tokio::time::sleep;

use super::session;

/// Uploads one file, printing progress lines; Ctrl+C cancels.
pub async fn send(room_name: &str, file: &Path) -> Result<()> {
    let campfire = session::connect().await?;
    let room = session::room(&campfire, room_name).await?;

    let mut upload = room
        .upload(file)
        .on_progress(|sent, total| eprintln!("sent {sent}/{total} bytes"))
        .on_finished(|record| println!("Uploaded {} as upload {}.", record.name, record.id))
        .on_error(|err| eprintln!("upload failed: {err}"));
    upload.start()?;

    // Watch for Ctrl+C while the worker runs; stop() aborts the transfer
    // at the next chunk boundary.
    let mut cancelled = false;
    while upload.is_uploading() {
        tokio::select! {
            result = tokio::signal::ctrl_c(), if !cancelled => {
                result?;
                eprintln!("cancelling...");
                upload.stop();
                cancelled = true;
            }
            () = sleep(Duration::from_millis(100)) => {}
        }
    }

    match upload.join().await? {
        UploadState::Completed => Ok(()),
        UploadState::Cancelled => {
            eprintln!("Upload cancelled.");
            Ok(())
        }
        state => bail!("upload ended in state {state:?}"),
    }
}

//! One room: posting, membership, transcripts, and the engine factories.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::instrument;

use crate::config::{StreamConfig, UploadConfig};
use crate::directory::UserCache;
use crate::error::ClientResult;
use crate::models::{Message, OutboundMessage, RoomInfo, UploadRecord};
use crate::stream::{RoomStream, StreamMode};
use crate::transport::Transport;
use crate::upload::Upload;

/// Handle to one room.
///
/// Obtained from [`crate::campfire::Campfire::room`] or
/// [`crate::campfire::Campfire::room_by_name`]. Streams and uploads
/// created here are independent controllers; dropping the room does not
/// affect them.
#[derive(Debug)]
pub struct Room {
    info: RoomInfo,
    transport: Arc<dyn Transport>,
    users: Arc<UserCache>,
    stream_config: StreamConfig,
    upload_config: UploadConfig,
}

impl Room {
    pub(crate) fn new(
        info: RoomInfo,
        transport: Arc<dyn Transport>,
        users: Arc<UserCache>,
        stream_config: StreamConfig,
        upload_config: UploadConfig,
    ) -> Self {
        Self {
            info,
            transport,
            users,
            stream_config,
            upload_config,
        }
    }

    /// Unique identifier.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.info.id
    }

    /// Room name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Current topic, as of when the handle was created.
    #[must_use]
    pub fn topic(&self) -> Option<&str> {
        self.info.topic.as_deref()
    }

    /// Room info snapshot backing this handle.
    #[must_use]
    pub fn info(&self) -> &RoomInfo {
        &self.info
    }

    /// Enters the room.
    ///
    /// # Errors
    ///
    /// Returns the transport failure.
    #[instrument(name = "room.join", skip(self), err)]
    pub async fn join(&self) -> ClientResult<()> {
        Ok(self.transport.join_room(self.info.id).await?)
    }

    /// Leaves the room.
    ///
    /// # Errors
    ///
    /// Returns the transport failure.
    #[instrument(name = "room.leave", skip(self), err)]
    pub async fn leave(&self) -> ClientResult<()> {
        Ok(self.transport.leave_room(self.info.id).await?)
    }

    /// Locks the room against new entrants.
    ///
    /// # Errors
    ///
    /// Returns the transport failure.
    pub async fn lock(&self) -> ClientResult<()> {
        Ok(self.transport.lock_room(self.info.id).await?)
    }

    /// Unlocks the room.
    ///
    /// # Errors
    ///
    /// Returns the transport failure.
    pub async fn unlock(&self) -> ClientResult<()> {
        Ok(self.transport.unlock_room(self.info.id).await?)
    }

    /// Renames the room.
    ///
    /// # Errors
    ///
    /// Returns the transport failure.
    #[instrument(name = "room.rename", skip(self), err)]
    pub async fn rename(&self, name: &str) -> ClientResult<()> {
        Ok(self.transport.update_room(self.info.id, Some(name), None).await?)
    }

    /// Changes the room topic.
    ///
    /// # Errors
    ///
    /// Returns the transport failure.
    #[instrument(name = "room.set_topic", skip(self), err)]
    pub async fn set_topic(&self, topic: &str) -> ClientResult<()> {
        Ok(self.transport.update_room(self.info.id, None, Some(topic)).await?)
    }

    /// Posts `body`, picking text, paste, or tweet from its shape, and
    /// returns the stored message.
    ///
    /// # Errors
    ///
    /// Returns the transport failure.
    #[instrument(name = "room.say", skip(self, body), err)]
    pub async fn say(&self, body: impl Into<String>) -> ClientResult<Message> {
        let message = OutboundMessage::from_body(body);
        self.speak(&message).await
    }

    /// Posts a prepared message and returns the stored copy, classified.
    ///
    /// # Errors
    ///
    /// Returns the transport failure.
    pub async fn speak(&self, message: &OutboundMessage) -> ClientResult<Message> {
        let raw = self.transport.speak(self.info.id, message).await?;
        let user = self.users.resolve(raw.user_id).await;
        Ok(Message::classify(raw, user))
    }

    /// Recent transcript entries, classified, in server order.
    ///
    /// # Errors
    ///
    /// Returns the transport failure.
    #[instrument(name = "room.recent", skip(self), err)]
    pub async fn recent(&self, limit: Option<u32>) -> ClientResult<Vec<Message>> {
        let frames = self.transport.recent(self.info.id, limit, None).await?;
        let mut messages = Vec::with_capacity(frames.len());
        for frame in frames {
            let user = self.users.resolve(frame.user_id).await;
            messages.push(Message::classify(frame, user));
        }
        Ok(messages)
    }

    /// Files recently uploaded to the room.
    ///
    /// # Errors
    ///
    /// Returns the transport failure.
    pub async fn uploads(&self) -> ClientResult<Vec<UploadRecord>> {
        Ok(self.transport.room_uploads(self.info.id).await?)
    }

    /// The upload record behind an upload announcement message.
    ///
    /// # Errors
    ///
    /// Returns the transport failure, including not-found statuses.
    pub async fn upload_for_message(&self, message_id: u64) -> ClientResult<UploadRecord> {
        Ok(self.transport.message_upload(self.info.id, message_id).await?)
    }

    /// A stream over this room in the given mode, idle until started.
    #[must_use]
    pub fn stream(&self, mode: StreamMode) -> RoomStream {
        RoomStream::new(
            self.info.id,
            mode,
            Arc::clone(&self.transport),
            Arc::clone(&self.users),
            self.stream_config,
        )
    }

    /// An upload of `path` to this room, idle until started.
    #[must_use]
    pub fn upload(&self, path: impl Into<PathBuf>) -> Upload {
        Upload::new(
            self.info.id,
            path.into(),
            Arc::clone(&self.transport),
            self.upload_config.clone(),
        )
    }
}

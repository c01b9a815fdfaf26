//! HTTP and streaming access to the chat service.
//!
//! [`Transport`] is the seam between the client surface and the wire:
//! everything above it works in terms of typed models, everything below is
//! reqwest. Tests swap in scripted implementations.

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::{ClientConfig, Credentials};
use crate::error::ClientResult;
use crate::models::{OutboundMessage, RawMessage, RoomInfo, UploadRecord, User};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Convenience alias for transport results.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors surfaced while talking to the service.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be built or the connection failed.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server rejected the credentials.
    #[error("authentication failed")]
    Unauthorized,

    /// The server answered with an unexpected status.
    #[error("unexpected status {status} from {url}")]
    Status {
        /// HTTP status code.
        status: StatusCode,
        /// Requested URL.
        url: Url,
    },

    /// The response body was not the expected JSON shape.
    #[error("could not decode response from {url}: {source}")]
    Decode {
        /// Requested URL.
        url: Url,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// A request URL could not be built.
    #[error("invalid request url: {0}")]
    Url(#[from] url::ParseError),

    /// The live connection ended without being asked to.
    #[error("connection closed by server")]
    ConnectionClosed,
}

/// Stream of wire messages produced by a live connection.
pub type RawEventStream =
    Pin<Box<dyn Stream<Item = TransportResult<RawMessage>> + Send + 'static>>;

/// Chunked request body for uploads.
pub type UploadBody = Pin<Box<dyn Stream<Item = std::io::Result<Vec<u8>>> + Send + 'static>>;

/// A file to send, as a name plus a chunked body.
pub struct UploadSource {
    /// File name presented to the server.
    pub file_name: String,
    /// MIME type of the payload.
    pub content_type: String,
    /// Total payload size in bytes.
    pub content_length: u64,
    /// Chunked body.
    pub body: UploadBody,
}

impl Debug for UploadSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("UploadSource")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Server operations needed by the client surface and the engines.
#[async_trait]
pub trait Transport: Debug + Send + Sync {
    /// Fetches the authenticated user.
    async fn me(&self) -> TransportResult<User>;

    /// Fetches a user by id.
    async fn user(&self, user_id: u64) -> TransportResult<User>;

    /// Lists rooms visible to the authenticated user.
    async fn rooms(&self) -> TransportResult<Vec<RoomInfo>>;

    /// Lists rooms the authenticated user is present in.
    async fn presence(&self) -> TransportResult<Vec<RoomInfo>>;

    /// Fetches a single room, including its present occupants.
    async fn room(&self, room_id: u64) -> TransportResult<RoomInfo>;

    /// Joins a room.
    async fn join_room(&self, room_id: u64) -> TransportResult<()>;

    /// Leaves a room.
    async fn leave_room(&self, room_id: u64) -> TransportResult<()>;

    /// Locks a room.
    async fn lock_room(&self, room_id: u64) -> TransportResult<()>;

    /// Unlocks a room.
    async fn unlock_room(&self, room_id: u64) -> TransportResult<()>;

    /// Renames a room and/or changes its topic.
    async fn update_room(
        &self,
        room_id: u64,
        name: Option<&str>,
        topic: Option<&str>,
    ) -> TransportResult<()>;

    /// Posts a message and returns the stored copy.
    async fn speak(
        &self,
        room_id: u64,
        message: &OutboundMessage,
    ) -> TransportResult<RawMessage>;

    /// Fetches recent messages, optionally capped at `limit` entries or
    /// scoped to ids after `since_id`.
    async fn recent(
        &self,
        room_id: u64,
        limit: Option<u32>,
        since_id: Option<u64>,
    ) -> TransportResult<Vec<RawMessage>>;

    /// Opens the live message stream for a room.
    async fn open_live(&self, room_id: u64) -> TransportResult<RawEventStream>;

    /// Lists recent uploads in a room.
    async fn room_uploads(&self, room_id: u64) -> TransportResult<Vec<UploadRecord>>;

    /// Fetches the upload attached to an upload announcement message.
    async fn message_upload(
        &self,
        room_id: u64,
        message_id: u64,
    ) -> TransportResult<UploadRecord>;

    /// Sends a file to a room.
    async fn upload_file(
        &self,
        room_id: u64,
        source: UploadSource,
    ) -> TransportResult<UploadRecord>;
}

#[derive(Deserialize)]
struct UserEnvelope {
    user: User,
}

#[derive(Deserialize)]
struct RoomsEnvelope {
    rooms: Vec<RoomInfo>,
}

#[derive(Deserialize)]
struct RoomEnvelope {
    room: RoomInfo,
}

#[derive(Deserialize)]
struct MessageEnvelope {
    message: RawMessage,
}

#[derive(Deserialize)]
struct MessagesEnvelope {
    messages: Vec<RawMessage>,
}

#[derive(Deserialize)]
struct UploadsEnvelope {
    uploads: Vec<UploadRecord>,
}

#[derive(Deserialize)]
struct UploadEnvelope {
    upload: UploadRecord,
}

/// [`Transport`] implementation over the service HTTP API.
///
/// API endpoints live under the account host; live streams come from the
/// shared streaming host. Every request authenticates with HTTP basic
/// auth derived from [`Credentials`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    streaming_url: Url,
    credentials: Credentials,
}

impl HttpTransport {
    /// Builds a transport from resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the account URLs are invalid or the HTTP
    /// client cannot be constructed.
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(TransportError::from)?;
        Ok(Self {
            client,
            base_url: config.resolved_base_url()?,
            streaming_url: config.resolved_streaming_url()?,
            credentials: config.credentials.clone(),
        })
    }

    /// The same transport with different credentials, keeping the
    /// connection pool.
    #[must_use]
    pub fn with_credentials(&self, credentials: Credentials) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            streaming_url: self.streaming_url.clone(),
            credentials,
        }
    }

    fn api_url(&self, path: &str) -> TransportResult<Url> {
        Ok(self.base_url.join(&format!("{path}.json"))?)
    }

    fn live_url(&self, room_id: u64) -> TransportResult<Url> {
        Ok(self.streaming_url.join(&format!("room/{room_id}/live.json"))?)
    }

    async fn send(&self, request: RequestBuilder, url: &Url) -> TransportResult<Response> {
        let (username, password) = self.credentials.basic_auth();
        let response = request.basic_auth(username, Some(password)).send().await?;
        match response.status() {
            StatusCode::UNAUTHORIZED => Err(TransportError::Unauthorized),
            status if !status.is_success() => Err(TransportError::Status {
                status,
                url: url.clone(),
            }),
            _ => Ok(response),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> TransportResult<T> {
        let response = self.send(self.client.get(url.clone()), &url).await?;
        decode(response, &url).await
    }

    async fn post_empty(&self, url: Url) -> TransportResult<()> {
        self.send(self.client.post(url.clone()), &url).await?;
        Ok(())
    }
}

async fn decode<T: DeserializeOwned>(response: Response, url: &Url) -> TransportResult<T> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|source| TransportError::Decode {
        url: url.clone(),
        source,
    })
}

#[async_trait]
impl Transport for HttpTransport {
    async fn me(&self) -> TransportResult<User> {
        let url = self.api_url("users/me")?;
        let envelope: UserEnvelope = self.get_json(url).await?;
        Ok(envelope.user)
    }

    async fn user(&self, user_id: u64) -> TransportResult<User> {
        let url = self.api_url(&format!("users/{user_id}"))?;
        let envelope: UserEnvelope = self.get_json(url).await?;
        Ok(envelope.user)
    }

    async fn rooms(&self) -> TransportResult<Vec<RoomInfo>> {
        let url = self.api_url("rooms")?;
        let envelope: RoomsEnvelope = self.get_json(url).await?;
        Ok(envelope.rooms)
    }

    async fn presence(&self) -> TransportResult<Vec<RoomInfo>> {
        let url = self.api_url("presence")?;
        let envelope: RoomsEnvelope = self.get_json(url).await?;
        Ok(envelope.rooms)
    }

    async fn room(&self, room_id: u64) -> TransportResult<RoomInfo> {
        let url = self.api_url(&format!("room/{room_id}"))?;
        let envelope: RoomEnvelope = self.get_json(url).await?;
        Ok(envelope.room)
    }

    async fn join_room(&self, room_id: u64) -> TransportResult<()> {
        let url = self.api_url(&format!("room/{room_id}/join"))?;
        self.post_empty(url).await
    }

    async fn leave_room(&self, room_id: u64) -> TransportResult<()> {
        let url = self.api_url(&format!("room/{room_id}/leave"))?;
        self.post_empty(url).await
    }

    async fn lock_room(&self, room_id: u64) -> TransportResult<()> {
        let url = self.api_url(&format!("room/{room_id}/lock"))?;
        self.post_empty(url).await
    }

    async fn unlock_room(&self, room_id: u64) -> TransportResult<()> {
        let url = self.api_url(&format!("room/{room_id}/unlock"))?;
        self.post_empty(url).await
    }

    async fn update_room(
        &self,
        room_id: u64,
        name: Option<&str>,
        topic: Option<&str>,
    ) -> TransportResult<()> {
        let url = self.api_url(&format!("room/{room_id}"))?;
        let mut room = serde_json::Map::new();
        if let Some(name) = name {
            room.insert("name".to_owned(), json!(name));
        }
        if let Some(topic) = topic {
            room.insert("topic".to_owned(), json!(topic));
        }
        let request = self.client.put(url.clone()).json(&json!({ "room": room }));
        self.send(request, &url).await?;
        Ok(())
    }

    async fn speak(
        &self,
        room_id: u64,
        message: &OutboundMessage,
    ) -> TransportResult<RawMessage> {
        let url = self.api_url(&format!("room/{room_id}/speak"))?;
        let payload = json!({
            "message": {
                "type": message.wire_kind(),
                "body": message.body(),
            }
        });
        let request = self.client.post(url.clone()).json(&payload);
        let response = self.send(request, &url).await?;
        let envelope: MessageEnvelope = decode(response, &url).await?;
        Ok(envelope.message)
    }

    async fn recent(
        &self,
        room_id: u64,
        limit: Option<u32>,
        since_id: Option<u64>,
    ) -> TransportResult<Vec<RawMessage>> {
        let mut url = self.api_url(&format!("room/{room_id}/recent"))?;
        if limit.is_some() || since_id.is_some() {
            let mut query = url.query_pairs_mut();
            if let Some(limit) = limit {
                query.append_pair("limit", &limit.to_string());
            }
            if let Some(since_id) = since_id {
                query.append_pair("since_message_id", &since_id.to_string());
            }
        }
        let envelope: MessagesEnvelope = self.get_json(url).await?;
        Ok(envelope.messages)
    }

    async fn open_live(&self, room_id: u64) -> TransportResult<RawEventStream> {
        let url = self.live_url(room_id)?;
        let response = self.send(self.client.get(url.clone()), &url).await?;
        Ok(decode_events(response.bytes_stream()))
    }

    async fn room_uploads(&self, room_id: u64) -> TransportResult<Vec<UploadRecord>> {
        let url = self.api_url(&format!("room/{room_id}/uploads"))?;
        let envelope: UploadsEnvelope = self.get_json(url).await?;
        Ok(envelope.uploads)
    }

    async fn message_upload(
        &self,
        room_id: u64,
        message_id: u64,
    ) -> TransportResult<UploadRecord> {
        let url = self.api_url(&format!("room/{room_id}/messages/{message_id}/upload"))?;
        let envelope: UploadEnvelope = self.get_json(url).await?;
        Ok(envelope.upload)
    }

    async fn upload_file(
        &self,
        room_id: u64,
        source: UploadSource,
    ) -> TransportResult<UploadRecord> {
        let url = self.api_url(&format!("room/{room_id}/uploads"))?;
        let part = Part::stream_with_length(Body::wrap_stream(source.body), source.content_length)
            .file_name(source.file_name)
            .mime_str(&source.content_type)?;
        let form = Form::new().part("upload", part);
        let request = self.client.post(url.clone()).multipart(form);
        let response = self.send(request, &url).await?;
        let envelope: UploadEnvelope = decode(response, &url).await?;
        Ok(envelope.upload)
    }
}

/// Splits a live byte stream into frames delimited by carriage returns or
/// newlines. Whitespace-only frames are keepalives and are dropped; frames
/// that fail to decode are logged and skipped.
fn decode_events<S, B, E>(source: S) -> RawEventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<TransportError> + Send,
{
    Box::pin(async_stream::stream! {
        let mut source = std::pin::pin!(source);
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(chunk) = source.next().await {
            match chunk {
                Ok(bytes) => {
                    for &byte in bytes.as_ref() {
                        if byte == b'\r' || byte == b'\n' {
                            if let Some(raw) = parse_frame(&buffer) {
                                yield Ok(raw);
                            }
                            buffer.clear();
                        } else {
                            buffer.push(byte);
                        }
                    }
                }
                Err(err) => {
                    yield Err(err.into());
                    return;
                }
            }
        }
        if let Some(raw) = parse_frame(&buffer) {
            yield Ok(raw);
        }
    })
}

fn parse_frame(frame: &[u8]) -> Option<RawMessage> {
    let Ok(text) = std::str::from_utf8(frame) else {
        debug!("skipping non-utf8 frame");
        return None;
    };
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    match serde_json::from_str(text) {
        Ok(raw) => Some(raw),
        Err(err) => {
            debug!("skipping undecodable frame: {err}");
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use futures_util::{StreamExt, stream};

    use super::*;

    /// One scripted live connection.
    #[derive(Debug)]
    pub(crate) enum LiveScript {
        /// Yield these events, then stay open without yielding again.
        Open(Vec<TransportResult<RawMessage>>),
        /// Yield these events, then end the stream.
        Close(Vec<TransportResult<RawMessage>>),
        /// Refuse the connection attempt.
        Refuse,
    }

    /// Scripted [`Transport`] for exercising the client without a server.
    #[derive(Debug, Default)]
    pub(crate) struct MockTransport {
        pub(crate) users: Mutex<Vec<User>>,
        pub(crate) rooms: Mutex<Vec<RoomInfo>>,
        pub(crate) present: Mutex<Vec<RoomInfo>>,
        pub(crate) live_scripts: Mutex<VecDeque<LiveScript>>,
        pub(crate) recent_results: Mutex<VecDeque<TransportResult<Vec<RawMessage>>>>,
        pub(crate) recent_calls: Mutex<Vec<(Option<u32>, Option<u64>)>>,
        pub(crate) spoken: Mutex<Vec<(u64, String, String)>>,
        pub(crate) updates: Mutex<Vec<(u64, Option<String>, Option<String>)>>,
        pub(crate) join_calls: AtomicUsize,
        pub(crate) refuse_join: AtomicBool,
        pub(crate) user_calls: AtomicUsize,
        pub(crate) upload_attempts: AtomicUsize,
        pub(crate) upload_fail_attempts: AtomicUsize,
        pub(crate) upload_pull_delay: Option<Duration>,
        pub(crate) uploaded_bytes: Mutex<Vec<u64>>,
    }

    impl MockTransport {
        pub(crate) fn push_live(&self, script: LiveScript) {
            self.live_scripts
                .lock()
                .expect("live script lock")
                .push_back(script);
        }

        pub(crate) fn push_recent(&self, result: TransportResult<Vec<RawMessage>>) {
            self.recent_results
                .lock()
                .expect("recent result lock")
                .push_back(result);
        }

        pub(crate) fn add_user(&self, user: User) {
            self.users.lock().expect("user lock").push(user);
        }

        pub(crate) fn add_room(&self, room: RoomInfo) {
            self.rooms.lock().expect("room lock").push(room);
        }

        fn not_found() -> TransportError {
            TransportError::Status {
                status: StatusCode::NOT_FOUND,
                url: Url::parse("https://mock.test/").expect("static url"),
            }
        }

        fn server_error() -> TransportError {
            TransportError::Status {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                url: Url::parse("https://mock.test/").expect("static url"),
            }
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn me(&self) -> TransportResult<User> {
            self.users
                .lock()
                .expect("user lock")
                .first()
                .cloned()
                .ok_or(TransportError::Unauthorized)
        }

        async fn user(&self, user_id: u64) -> TransportResult<User> {
            self.user_calls.fetch_add(1, Ordering::SeqCst);
            self.users
                .lock()
                .expect("user lock")
                .iter()
                .find(|user| user.id == user_id)
                .cloned()
                .ok_or_else(Self::not_found)
        }

        async fn rooms(&self) -> TransportResult<Vec<RoomInfo>> {
            Ok(self.rooms.lock().expect("room lock").clone())
        }

        async fn presence(&self) -> TransportResult<Vec<RoomInfo>> {
            Ok(self.present.lock().expect("presence lock").clone())
        }

        async fn room(&self, room_id: u64) -> TransportResult<RoomInfo> {
            self.rooms
                .lock()
                .expect("room lock")
                .iter()
                .find(|room| room.id == room_id)
                .cloned()
                .ok_or_else(Self::not_found)
        }

        async fn join_room(&self, _room_id: u64) -> TransportResult<()> {
            if self.refuse_join.load(Ordering::SeqCst) {
                return Err(Self::server_error());
            }
            self.join_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn leave_room(&self, _room_id: u64) -> TransportResult<()> {
            Ok(())
        }

        async fn lock_room(&self, _room_id: u64) -> TransportResult<()> {
            Ok(())
        }

        async fn unlock_room(&self, _room_id: u64) -> TransportResult<()> {
            Ok(())
        }

        async fn update_room(
            &self,
            room_id: u64,
            name: Option<&str>,
            topic: Option<&str>,
        ) -> TransportResult<()> {
            self.updates.lock().expect("update lock").push((
                room_id,
                name.map(str::to_owned),
                topic.map(str::to_owned),
            ));
            Ok(())
        }

        async fn speak(
            &self,
            room_id: u64,
            message: &OutboundMessage,
        ) -> TransportResult<RawMessage> {
            let mut spoken = self.spoken.lock().expect("spoken lock");
            spoken.push((
                room_id,
                message.wire_kind().to_owned(),
                message.body().to_owned(),
            ));
            Ok(RawMessage {
                id: 900 + spoken.len() as u64,
                kind: message.wire_kind().to_owned(),
                room_id: Some(room_id),
                user_id: Some(1),
                body: Some(message.body().to_owned()),
                created_at: Some("2012/01/25 12:00:00 +0000".to_owned()),
                starred: None,
            })
        }

        async fn recent(
            &self,
            _room_id: u64,
            limit: Option<u32>,
            since_id: Option<u64>,
        ) -> TransportResult<Vec<RawMessage>> {
            self.recent_calls
                .lock()
                .expect("recent call lock")
                .push((limit, since_id));
            self.recent_results
                .lock()
                .expect("recent result lock")
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn open_live(&self, _room_id: u64) -> TransportResult<RawEventStream> {
            let script = self
                .live_scripts
                .lock()
                .expect("live script lock")
                .pop_front()
                .unwrap_or(LiveScript::Open(Vec::new()));
            match script {
                LiveScript::Open(events) => {
                    Ok(stream::iter(events).chain(stream::pending()).boxed())
                }
                LiveScript::Close(events) => Ok(stream::iter(events).boxed()),
                LiveScript::Refuse => Err(Self::server_error()),
            }
        }

        async fn room_uploads(&self, _room_id: u64) -> TransportResult<Vec<UploadRecord>> {
            Ok(Vec::new())
        }

        async fn message_upload(
            &self,
            _room_id: u64,
            _message_id: u64,
        ) -> TransportResult<UploadRecord> {
            Err(Self::not_found())
        }

        async fn upload_file(
            &self,
            room_id: u64,
            source: UploadSource,
        ) -> TransportResult<UploadRecord> {
            self.upload_attempts.fetch_add(1, Ordering::SeqCst);
            let mut body = source.body;
            let mut consumed = 0_u64;
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(bytes) => consumed += bytes.len() as u64,
                    Err(_) => return Err(TransportError::ConnectionClosed),
                }
                if let Some(delay) = self.upload_pull_delay {
                    tokio::time::sleep(delay).await;
                }
            }
            let remaining = &self.upload_fail_attempts;
            if remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Self::server_error());
            }
            self.uploaded_bytes
                .lock()
                .expect("uploaded bytes lock")
                .push(consumed);
            Ok(UploadRecord {
                id: 1,
                name: source.file_name,
                byte_size: Some(source.content_length),
                content_type: Some(source.content_type),
                full_url: None,
                created_at: None,
                room_id: Some(room_id),
                user_id: None,
            })
        }
    }

    /// A user with only the identity fields set.
    pub(crate) fn user(id: u64, name: &str) -> User {
        User {
            id,
            name: name.to_owned(),
            email_address: None,
            admin: None,
            created_at: None,
            kind: None,
            api_auth_token: None,
        }
    }

    /// A room with only the identity fields set.
    pub(crate) fn room(id: u64, name: &str) -> RoomInfo {
        RoomInfo {
            id,
            name: name.to_owned(),
            topic: None,
            membership_limit: None,
            full: None,
            open_to_guests: None,
            locked: None,
            created_at: None,
            updated_at: None,
            users: None,
        }
    }

    /// A wire frame of the given kind with optional body.
    pub(crate) fn frame(id: u64, kind: &str, body: Option<&str>) -> RawMessage {
        RawMessage {
            id,
            kind: kind.to_owned(),
            room_id: Some(42),
            user_id: Some(1),
            body: body.map(str::to_owned),
            created_at: None,
            starred: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::stream;

    use super::*;

    fn transport() -> HttpTransport {
        let config = ClientConfig::new("acme", Credentials::token("t"));
        HttpTransport::new(&config).unwrap()
    }

    fn ok_chunks(chunks: &[&[u8]]) -> Vec<Result<Vec<u8>, TransportError>> {
        chunks.iter().map(|chunk| Ok(chunk.to_vec())).collect()
    }

    async fn collect(
        chunks: Vec<Result<Vec<u8>, TransportError>>,
    ) -> Vec<TransportResult<RawMessage>> {
        decode_events(stream::iter(chunks)).collect().await
    }

    #[test]
    fn api_urls_get_the_json_suffix() {
        let transport = transport();
        let url = transport.api_url("room/7/recent").unwrap();
        assert_eq!(
            url.as_str(),
            "https://acme.campfirenow.com/room/7/recent.json"
        );
    }

    #[test]
    fn live_urls_use_the_streaming_host() {
        let transport = transport();
        let url = transport.live_url(7).unwrap();
        assert_eq!(
            url.as_str(),
            "https://streaming.campfirenow.com/room/7/live.json"
        );
    }

    #[tokio::test]
    async fn frames_split_on_carriage_returns() {
        let events = collect(ok_chunks(&[
            br#"{"id": 1, "type": "TextMessage", "body": "a"}"#,
            b"\r",
            br#"{"id": 2, "type": "TextMessage", "body": "b"}"#,
            b"\r",
        ]))
        .await;
        let ids: Vec<u64> = events.into_iter().map(|e| e.unwrap().id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn frames_reassemble_across_chunks() {
        let events = collect(ok_chunks(&[
            br#"{"id": 1, "type": "Te"#,
            br#"xtMessage", "body": "split"}"#,
            b"\r\n",
        ]))
        .await;
        assert_eq!(events.len(), 1);
        let raw = events.into_iter().next().unwrap().unwrap();
        assert_eq!(raw.body.as_deref(), Some("split"));
    }

    #[tokio::test]
    async fn keepalives_are_dropped() {
        let events = collect(ok_chunks(&[
            b" \r",
            b"  \r",
            br#"{"id": 3, "type": "TextMessage", "body": "c"}"#,
            b"\r",
            b" \r",
        ]))
        .await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn undecodable_frames_are_skipped() {
        let events = collect(ok_chunks(&[
            b"not json\r",
            br#"{"type": "TextMessage"}"#,
            b"\r",
            br#"{"id": 4, "type": "TextMessage", "body": "d"}"#,
            b"\r",
        ]))
        .await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().id, 4);
    }

    #[tokio::test]
    async fn trailing_frames_flush_at_end_of_stream() {
        let events = collect(ok_chunks(&[
            br#"{"id": 5, "type": "TextMessage", "body": "e"}"#,
        ]))
        .await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().id, 5);
    }

    #[tokio::test]
    async fn stream_errors_end_the_event_stream() {
        let chunks: Vec<Result<Vec<u8>, TransportError>> = vec![
            Ok(br#"{"id": 6, "type": "TextMessage", "body": "f"}"#.to_vec()),
            Ok(b"\r".to_vec()),
            Err(TransportError::ConnectionClosed),
        ];
        let events = collect(chunks).await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(matches!(
            events[1],
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[test]
    fn error_messages_are_descriptive() {
        let status = TransportError::Status {
            status: StatusCode::SERVICE_UNAVAILABLE,
            url: Url::parse("https://acme.campfirenow.com/rooms.json").unwrap(),
        };
        assert_eq!(
            status.to_string(),
            "unexpected status 503 Service Unavailable from https://acme.campfirenow.com/rooms.json"
        );
        assert_eq!(
            TransportError::Unauthorized.to_string(),
            "authentication failed"
        );
        assert_eq!(
            TransportError::ConnectionClosed.to_string(),
            "connection closed by server"
        );
    }
}

//! Continuous message streaming for one room.
//!
//! A [`RoomStream`] owns two background tasks: a fetcher that turns the
//! transport's raw events into classified messages (live connection or
//! transcript polling) and a dispatcher that delivers them to attached
//! listeners in arrival order. A bounded queue sits between the two and
//! blocks the fetcher when full, so bursts are absorbed without loss.

mod dispatcher;
mod fetcher;

use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, instrument, warn};

use crate::config::StreamConfig;
use crate::directory::UserCache;
use crate::models::Message;
use crate::transport::{Transport, TransportError};

use self::dispatcher::Dispatcher;
use self::fetcher::Fetcher;

const STATE_IDLE: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPING: u8 = 2;
const STATE_STOPPED: u8 = 3;

/// Lifecycle of a room stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Created but not started.
    Idle,
    /// Fetcher and dispatcher are running.
    Running,
    /// Stop requested; the background tasks are winding down.
    Stopping,
    /// Both background tasks have exited. Terminal.
    Stopped,
}

impl StreamState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            STATE_RUNNING => Self::Running,
            STATE_STOPPING => Self::Stopping,
            STATE_STOPPED => Self::Stopped,
            _ => Self::Idle,
        }
    }
}

/// How the fetcher follows a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// One long-lived connection to the streaming host, reconnected with
    /// backoff when it drops. Requires room membership, which
    /// [`RoomStream::start`] establishes first.
    Live,
    /// Periodic transcript requests, deduplicated by message id.
    Polling,
}

/// Handle returned by [`RoomStream::attach`], usable for later detachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl Display for ListenerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

/// Receives every classified message, in server order.
///
/// Closures of shape `FnMut(&Message)` implement this automatically.
pub trait RoomListener: Send {
    /// Handles one message. Invoked synchronously from the dispatch task,
    /// so long work here delays the whole stream.
    fn on_message(&mut self, message: &Message);
}

impl<F> RoomListener for F
where
    F: FnMut(&Message) + Send,
{
    fn on_message(&mut self, message: &Message) {
        self(message);
    }
}

/// Callback invoked when the stream hits a recoverable failure.
pub type ErrorCallback = Box<dyn Fn(&StreamError) + Send + Sync>;

/// Convenience alias for stream results.
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors surfaced by a room stream.
#[derive(Debug, Error)]
pub enum StreamError {
    /// `start` was called on a stream that is not idle.
    #[error("stream already started")]
    AlreadyStarted,

    /// `join` was called before `start`.
    #[error("stream not started")]
    NotStarted,

    /// The transport failed. Live streams reconnect with backoff and
    /// polling retries on the next tick, so this is informational.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// An attached listener panicked while handling a message. The
    /// listener stays attached and dispatch continues.
    #[error("listener {listener} panicked")]
    ListenerPanic {
        /// Handle of the failing listener.
        listener: ListenerId,
    },
}

struct ListenerEntry {
    id: ListenerId,
    listener: Box<dyn RoomListener>,
}

/// State shared by the controller and its background tasks.
pub(crate) struct StreamSession {
    mode: StreamMode,
    state: AtomicU8,
    token: CancellationToken,
    listeners: Mutex<Vec<ListenerEntry>>,
    next_listener: AtomicU64,
    error_callback: Mutex<Option<ErrorCallback>>,
}

impl StreamSession {
    fn new(mode: StreamMode) -> Self {
        Self {
            mode,
            state: AtomicU8::new(STATE_IDLE),
            token: CancellationToken::new(),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
            error_callback: Mutex::new(None),
        }
    }

    pub(crate) fn mode(&self) -> StreamMode {
        self.mode
    }

    fn state(&self) -> StreamState {
        StreamState::from_raw(self.state.load(Ordering::SeqCst))
    }

    fn try_start(&self) -> StreamResult<()> {
        self.state
            .compare_exchange(
                STATE_IDLE,
                STATE_RUNNING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map(|_| ())
            .map_err(|_| StreamError::AlreadyStarted)
    }

    fn request_stop(&self) {
        let moved = self
            .state
            .compare_exchange(
                STATE_RUNNING,
                STATE_STOPPING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if moved {
            self.token.cancel();
        }
    }

    pub(crate) fn mark_stopped(&self) {
        self.state.store(STATE_STOPPED, Ordering::SeqCst);
    }

    /// Resolves once `stop` has been requested.
    pub(crate) async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    #[allow(dead_code)]
    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Invokes the error callback, when one is registered.
    pub(crate) fn report_error(&self, error: &StreamError) {
        let callback = self
            .error_callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(callback) = callback.as_ref() {
            callback(error);
        }
    }

    fn set_error_callback(&self, callback: ErrorCallback) {
        *self
            .error_callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn attach(&self, listener: Box<dyn RoomListener>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ListenerEntry { id, listener });
        id
    }

    fn detach(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|entry| entry.id != id);
        listeners.len() != before
    }

    /// Delivers one message to every listener in attachment order. A
    /// panicking listener is caught and reported; the remaining listeners
    /// still get the message.
    pub(crate) fn dispatch(&self, message: &Message) {
        let mut failed = Vec::new();
        {
            let mut listeners = self
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for entry in listeners.iter_mut() {
                let delivery = catch_unwind(AssertUnwindSafe(|| {
                    entry.listener.on_message(message);
                }));
                if delivery.is_err() {
                    failed.push(entry.id);
                }
            }
        }
        for listener in failed {
            warn!("listener {listener} panicked while handling message {}", message.id);
            self.report_error(&StreamError::ListenerPanic { listener });
        }
    }
}

/// Controls the streaming pair for one room.
///
/// Created by [`crate::room::Room::stream`]. Listeners can be attached
/// before or after [`RoomStream::start`]; the error callback should be
/// set before.
pub struct RoomStream {
    room_id: u64,
    transport: Arc<dyn Transport>,
    users: Arc<UserCache>,
    config: StreamConfig,
    session: Arc<StreamSession>,
    supervisor: Option<JoinHandle<()>>,
}

impl Debug for RoomStream {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("RoomStream")
            .field("room_id", &self.room_id)
            .field("mode", &self.session.mode)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl RoomStream {
    pub(crate) fn new(
        room_id: u64,
        mode: StreamMode,
        transport: Arc<dyn Transport>,
        users: Arc<UserCache>,
        config: StreamConfig,
    ) -> Self {
        Self {
            room_id,
            transport,
            users,
            config,
            session: Arc::new(StreamSession::new(mode)),
            supervisor: None,
        }
    }

    /// Sets the callback for recoverable background failures. It runs on
    /// the background tasks, so it must not block for long.
    #[must_use]
    pub fn on_error<F>(self, callback: F) -> Self
    where
        F: Fn(&StreamError) + Send + Sync + 'static,
    {
        self.session.set_error_callback(Box::new(callback));
        self
    }

    /// Registers a listener; allowed before or after `start`.
    pub fn attach<L>(&self, listener: L) -> ListenerId
    where
        L: RoomListener + 'static,
    {
        self.session.attach(Box::new(listener))
    }

    /// Removes a previously attached listener. Returns whether it was
    /// still attached.
    pub fn detach(&self, id: ListenerId) -> bool {
        self.session.detach(id)
    }

    /// Room this stream follows.
    #[must_use]
    pub fn room_id(&self) -> u64 {
        self.room_id
    }

    /// Mode chosen at construction.
    #[must_use]
    pub fn mode(&self) -> StreamMode {
        self.session.mode
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> StreamState {
        self.session.state()
    }

    /// Whether the background tasks are still alive, running or winding
    /// down. Advisory: the state may change right after reading.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        matches!(self.state(), StreamState::Running | StreamState::Stopping)
    }

    /// Starts the fetcher and dispatcher.
    ///
    /// Live mode joins the room first; when the join fails the stream
    /// stays idle, so `start` can be retried.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::AlreadyStarted`] when the stream is not
    /// idle, or the transport error from a failed live-mode room join.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    #[instrument(name = "stream.start", skip(self), err)]
    pub async fn start(&mut self) -> StreamResult<()> {
        if self.state() != StreamState::Idle {
            return Err(StreamError::AlreadyStarted);
        }
        if self.session.mode() == StreamMode::Live {
            self.transport.join_room(self.room_id).await?;
        }
        self.session.try_start()?;

        let (queue_tx, queue_rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let fetcher = Fetcher::new(
            self.room_id,
            Arc::clone(&self.transport),
            Arc::clone(&self.users),
            Arc::clone(&self.session),
            self.config,
            queue_tx,
        );
        let dispatcher = Dispatcher::new(Arc::clone(&self.session), queue_rx);
        let fetch_task = tokio::spawn(fetcher.run());
        let dispatch_task = tokio::spawn(dispatcher.run());

        let session = Arc::clone(&self.session);
        self.supervisor = Some(tokio::spawn(async move {
            if let Err(err) = fetch_task.await {
                error!("fetch task failed: {err}");
            }
            if let Err(err) = dispatch_task.await {
                error!("dispatch task failed: {err}");
            }
            session.mark_stopped();
        }));
        Ok(())
    }

    /// Requests shutdown and returns immediately; [`RoomStream::join`] is
    /// the wait primitive. Safe to call at any time, repeatedly.
    pub fn stop(&self) {
        self.session.request_stop();
    }

    /// Waits until the stream reaches [`StreamState::Stopped`].
    ///
    /// There is no forced kill: when the transport never observes the
    /// cancellation this waits indefinitely. Callers wanting a bound can
    /// wrap the call in [`tokio::time::timeout`].
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::NotStarted`] when `start` was never called.
    #[instrument(name = "stream.join", skip(self), err)]
    pub async fn join(&mut self) -> StreamResult<()> {
        match self.supervisor.take() {
            Some(handle) => {
                if let Err(err) = handle.await {
                    error!("stream supervisor failed: {err}");
                }
                Ok(())
            }
            None if self.state() == StreamState::Stopped => Ok(()),
            None => Err(StreamError::NotStarted),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;
    use crate::config::BackoffPolicy;
    use crate::models::MessageKind;
    use crate::transport::testing::{LiveScript, MockTransport, frame, user};

    fn test_config() -> StreamConfig {
        StreamConfig {
            poll_interval: Duration::from_millis(10),
            queue_capacity: 16,
            reconnect: BackoffPolicy::new(Duration::from_millis(1), Duration::from_millis(5)),
        }
    }

    fn stream_over(mock: &Arc<MockTransport>, mode: StreamMode) -> RoomStream {
        let transport: Arc<dyn Transport> = mock.clone();
        let users = Arc::new(UserCache::new(Arc::clone(&transport)));
        RoomStream::new(42, mode, transport, users, test_config())
    }

    fn recorder(log: &Arc<Mutex<Vec<Message>>>) -> impl FnMut(&Message) + Send + use<> {
        let log = Arc::clone(log);
        move |message: &Message| {
            log.lock().unwrap().push(message.clone());
        }
    }

    async fn wait_for_messages(log: &Arc<Mutex<Vec<Message>>>, count: usize) {
        for _ in 0..400 {
            if log.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {count} messages");
    }

    fn classified(id: u64, body: &str) -> Message {
        Message::classify(frame(id, "TextMessage", Some(body)), None)
    }

    #[test]
    fn dispatch_follows_attachment_order() {
        let session = StreamSession::new(StreamMode::Polling);
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&log);
        session.attach(Box::new(move |_: &Message| {
            first.lock().unwrap().push("first");
        }));
        let second = Arc::clone(&log);
        session.attach(Box::new(move |_: &Message| {
            second.lock().unwrap().push("second");
        }));

        session.dispatch(&classified(1, "hi"));
        session.dispatch(&classified(2, "again"));

        assert_eq!(
            *log.lock().unwrap(),
            vec!["first", "second", "first", "second"]
        );
    }

    #[test]
    fn panicking_listener_does_not_stop_dispatch() {
        let session = StreamSession::new(StreamMode::Polling);
        let failures = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&failures);
        session.set_error_callback(Box::new(move |error| {
            if matches!(error, StreamError::ListenerPanic { .. }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        session.attach(Box::new(|_: &Message| panic!("listener bug")));
        let observed = Arc::clone(&seen);
        session.attach(Box::new(move |_: &Message| {
            observed.fetch_add(1, Ordering::SeqCst);
        }));

        session.dispatch(&classified(1, "one"));
        session.dispatch(&classified(2, "two"));

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(failures.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn detach_removes_a_listener() {
        let session = StreamSession::new(StreamMode::Polling);
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let id = session.attach(Box::new(move |_: &Message| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        session.dispatch(&classified(1, "seen"));
        assert!(session.detach(id));
        assert!(!session.detach(id));
        session.dispatch(&classified(2, "missed"));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn live_stream_delivers_in_server_order() {
        let mock = Arc::new(MockTransport::default());
        mock.add_user(user(1, "alice"));
        mock.push_live(LiveScript::Open(vec![
            Ok(frame(11, "EnterMessage", None)),
            Ok(frame(12, "TextMessage", Some("hi"))),
            Ok(frame(13, "LeaveMessage", None)),
        ]));

        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stream = stream_over(&mock, StreamMode::Live);
        stream.attach(recorder(&log));

        stream.start().await.unwrap();
        assert_eq!(stream.state(), StreamState::Running);
        wait_for_messages(&log, 3).await;
        stream.stop();
        stream.join().await.unwrap();

        let messages = log.lock().unwrap();
        let kinds: Vec<MessageKind> = messages.iter().map(Message::kind).collect();
        assert_eq!(
            kinds,
            vec![MessageKind::Enter, MessageKind::Text, MessageKind::Leave]
        );
        let author = messages[1].user.as_ref().unwrap();
        assert_eq!(author.name.as_deref(), Some("alice"));
        assert_eq!(mock.join_calls.load(Ordering::SeqCst), 1);
        assert_eq!(stream.state(), StreamState::Stopped);
    }

    #[tokio::test]
    async fn polling_stream_delivers_only_new_messages() {
        let mock = Arc::new(MockTransport::default());
        mock.add_user(user(1, "alice"));
        // Seed tick: newest transcript entry is id 10, which must not be
        // delivered. Then one empty delta, then two new messages.
        mock.push_recent(Ok(vec![frame(10, "TextMessage", Some("old"))]));
        mock.push_recent(Ok(Vec::new()));
        mock.push_recent(Ok(vec![
            frame(11, "TextMessage", Some("first")),
            frame(12, "TextMessage", Some("second")),
        ]));

        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stream = stream_over(&mock, StreamMode::Polling);
        stream.attach(recorder(&log));

        stream.start().await.unwrap();
        wait_for_messages(&log, 2).await;
        stream.stop();
        stream.join().await.unwrap();

        let ids: Vec<u64> = log.lock().unwrap().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![11, 12]);
        assert_eq!(mock.join_calls.load(Ordering::SeqCst), 0);

        let calls = mock.recent_calls.lock().unwrap();
        assert_eq!(calls[0], (Some(1), None));
        assert_eq!(calls[1], (None, Some(10)));
    }

    #[tokio::test]
    async fn second_start_fails() {
        let mock = Arc::new(MockTransport::default());
        let mut stream = stream_over(&mock, StreamMode::Polling);

        stream.start().await.unwrap();
        let second = stream.start().await;
        assert!(matches!(second, Err(StreamError::AlreadyStarted)));

        stream.stop();
        stream.join().await.unwrap();
    }

    #[tokio::test]
    async fn join_before_start_fails() {
        let mock = Arc::new(MockTransport::default());
        let mut stream = stream_over(&mock, StreamMode::Polling);
        assert!(matches!(stream.join().await, Err(StreamError::NotStarted)));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let mock = Arc::new(MockTransport::default());
        let mut stream = stream_over(&mock, StreamMode::Polling);

        stream.stop();
        assert_eq!(stream.state(), StreamState::Idle);

        stream.start().await.unwrap();
        stream.stop();
        stream.stop();
        stream.join().await.unwrap();
        stream.stop();

        assert_eq!(stream.state(), StreamState::Stopped);
        stream.join().await.unwrap();
    }

    #[tokio::test]
    async fn failed_live_join_leaves_the_stream_idle() {
        let mock = Arc::new(MockTransport::default());
        mock.refuse_join.store(true, Ordering::SeqCst);

        let mut stream = stream_over(&mock, StreamMode::Live);
        let result = stream.start().await;

        assert!(matches!(result, Err(StreamError::Transport(_))));
        assert_eq!(stream.state(), StreamState::Idle);

        // The precondition cleared, so a retry succeeds.
        mock.refuse_join.store(false, Ordering::SeqCst);
        stream.start().await.unwrap();
        stream.stop();
        stream.join().await.unwrap();
    }

    #[tokio::test]
    async fn live_stream_reconnects_after_drop() {
        let mock = Arc::new(MockTransport::default());
        mock.add_user(user(1, "alice"));
        mock.push_live(LiveScript::Close(vec![Ok(frame(
            1,
            "TextMessage",
            Some("before the drop"),
        ))]));
        mock.push_live(LiveScript::Open(vec![Ok(frame(
            2,
            "TextMessage",
            Some("after the drop"),
        ))]));

        let errors = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&errors);
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stream = stream_over(&mock, StreamMode::Live).on_error(move |error| {
            if matches!(error, StreamError::Transport(TransportError::ConnectionClosed)) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        stream.attach(recorder(&log));

        stream.start().await.unwrap();
        wait_for_messages(&log, 2).await;
        stream.stop();
        stream.join().await.unwrap();

        let ids: Vec<u64> = log.lock().unwrap().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refused_connection_is_retried_without_a_callback() {
        let mock = Arc::new(MockTransport::default());
        mock.add_user(user(1, "alice"));
        mock.push_live(LiveScript::Refuse);
        mock.push_live(LiveScript::Open(vec![Ok(frame(
            5,
            "TextMessage",
            Some("eventually"),
        ))]));

        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stream = stream_over(&mock, StreamMode::Live);
        stream.attach(recorder(&log));

        stream.start().await.unwrap();
        wait_for_messages(&log, 1).await;
        stream.stop();
        stream.join().await.unwrap();

        assert_eq!(log.lock().unwrap()[0].id, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn slow_listener_backpressure_loses_nothing() {
        let mock = Arc::new(MockTransport::default());
        mock.add_user(user(1, "alice"));
        let events = (1..=8)
            .map(|id| Ok(frame(id, "TextMessage", Some("payload"))))
            .collect();
        mock.push_live(LiveScript::Open(events));

        let transport: Arc<dyn Transport> = mock.clone();
        let users = Arc::new(UserCache::new(Arc::clone(&transport)));
        let config = StreamConfig {
            queue_capacity: 1,
            ..test_config()
        };
        let mut stream = RoomStream::new(42, StreamMode::Live, transport, users, config);

        let log = Arc::new(Mutex::new(Vec::new()));
        let slow = Arc::clone(&log);
        stream.attach(move |message: &Message| {
            std::thread::sleep(Duration::from_millis(3));
            slow.lock().unwrap().push(message.clone());
        });

        stream.start().await.unwrap();
        wait_for_messages(&log, 8).await;
        stream.stop();
        stream.join().await.unwrap();

        let ids: Vec<u64> = log.lock().unwrap().iter().map(|m| m.id).collect();
        assert_eq!(ids, (1..=8).collect::<Vec<u64>>());
    }
}

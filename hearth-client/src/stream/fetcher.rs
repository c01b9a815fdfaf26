use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::debug;

use crate::config::{BackoffPolicy, StreamConfig};
use crate::directory::UserCache;
use crate::models::{Message, RawMessage};
use crate::transport::{RawEventStream, Transport, TransportError};

use super::{StreamError, StreamMode, StreamSession};

/// Tracks consecutive failures and the delay before the next attempt.
struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Produces classified messages into the dispatch queue.
pub(super) struct Fetcher {
    room_id: u64,
    transport: Arc<dyn Transport>,
    users: Arc<UserCache>,
    session: Arc<StreamSession>,
    config: StreamConfig,
    queue: mpsc::Sender<Message>,
}

impl Fetcher {
    pub(super) fn new(
        room_id: u64,
        transport: Arc<dyn Transport>,
        users: Arc<UserCache>,
        session: Arc<StreamSession>,
        config: StreamConfig,
        queue: mpsc::Sender<Message>,
    ) -> Self {
        Self {
            room_id,
            transport,
            users,
            session,
            config,
            queue,
        }
    }

    pub(super) async fn run(self) {
        match self.session.mode() {
            StreamMode::Live => self.run_live().await,
            StreamMode::Polling => self.run_polling().await,
        }
        debug!("fetcher for room {} exited", self.room_id);
    }

    /// One connection at a time, reconnected with exponential backoff.
    /// The backoff resets whenever a connection is established.
    async fn run_live(&self) {
        let mut backoff = Backoff::new(self.config.reconnect);
        loop {
            let connection = tokio::select! {
                biased;
                () = self.session.cancelled() => return,
                connection = self.transport.open_live(self.room_id) => connection,
            };
            match connection {
                Ok(events) => {
                    backoff.reset();
                    if !self.drain_live(events).await {
                        return;
                    }
                }
                Err(err) => {
                    self.session.report_error(&StreamError::Transport(err));
                }
            }
            if !self.wait(backoff.next_delay()).await {
                return;
            }
        }
    }

    /// Returns whether the live loop should reconnect.
    async fn drain_live(&self, mut events: RawEventStream) -> bool {
        loop {
            let event = tokio::select! {
                biased;
                () = self.session.cancelled() => return false,
                event = events.next() => event,
            };
            match event {
                Some(Ok(raw)) => {
                    if !self.deliver(raw).await {
                        return false;
                    }
                }
                Some(Err(err)) => {
                    self.session.report_error(&StreamError::Transport(err));
                    return true;
                }
                None => {
                    self.session
                        .report_error(&StreamError::Transport(TransportError::ConnectionClosed));
                    return true;
                }
            }
        }
    }

    /// Seeds a cursor from the newest transcript entry, then delivers only
    /// messages with greater ids, deduplicated and in id order. The seed
    /// entry itself is history and is not delivered.
    async fn run_polling(&self) {
        let mut interval = time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cursor: Option<u64> = None;
        loop {
            tokio::select! {
                biased;
                () = self.session.cancelled() => return,
                _ = interval.tick() => {}
            }
            if cursor.is_none() {
                match self.transport.recent(self.room_id, Some(1), None).await {
                    Ok(batch) => {
                        cursor = Some(batch.iter().map(|raw| raw.id).max().unwrap_or(0));
                    }
                    Err(err) => {
                        self.session.report_error(&StreamError::Transport(err));
                        continue;
                    }
                }
            }
            match self.transport.recent(self.room_id, None, cursor).await {
                Ok(batch) => {
                    for raw in transcript_delta(batch, cursor) {
                        let id = raw.id;
                        if !self.deliver(raw).await {
                            return;
                        }
                        cursor = Some(id);
                    }
                }
                Err(err) => {
                    self.session.report_error(&StreamError::Transport(err));
                }
            }
        }
    }

    /// Cancellable sleep; returns false when the session stopped.
    async fn wait(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            () = self.session.cancelled() => false,
            () = time::sleep(delay) => true,
        }
    }

    /// Classifies and queues one message. A full queue blocks here until
    /// the dispatcher catches up. Returns false when the session stopped.
    async fn deliver(&self, raw: RawMessage) -> bool {
        let user = self.users.resolve(raw.user_id).await;
        let message = Message::classify(raw, user);
        tokio::select! {
            biased;
            () = self.session.cancelled() => false,
            sent = self.queue.send(message) => sent.is_ok(),
        }
    }
}

/// Messages past `last_seen`, deduplicated and in ascending id order.
///
/// The transport may repeat or reorder transcript entries; ids are the
/// dedup and ordering key.
fn transcript_delta(batch: Vec<RawMessage>, last_seen: Option<u64>) -> Vec<RawMessage> {
    let mut fresh: Vec<RawMessage> = batch
        .into_iter()
        .filter(|raw| last_seen.is_none_or(|seen| raw.id > seen))
        .collect();
    fresh.sort_by_key(|raw| raw.id);
    fresh.dedup_by_key(|raw| raw.id);
    fresh
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::frame;

    fn ids(batch: &[RawMessage]) -> Vec<u64> {
        batch.iter().map(|raw| raw.id).collect()
    }

    #[test]
    fn delta_emits_only_unseen_messages_in_order() {
        let batch = vec![
            frame(5, "TextMessage", Some("e")),
            frame(3, "TextMessage", Some("c")),
            frame(4, "TextMessage", Some("d")),
            frame(3, "TextMessage", Some("c again")),
        ];
        let fresh = transcript_delta(batch, Some(3));
        assert_eq!(ids(&fresh), vec![4, 5]);
    }

    #[test]
    fn delta_without_cursor_keeps_everything_once() {
        let batch = vec![
            frame(2, "TextMessage", Some("b")),
            frame(1, "TextMessage", Some("a")),
            frame(2, "TextMessage", Some("b again")),
        ];
        let fresh = transcript_delta(batch, None);
        assert_eq!(ids(&fresh), vec![1, 2]);
    }

    #[test]
    fn delta_of_subset_transcripts_is_the_difference() {
        let older: Vec<u64> = vec![1, 2, 3];
        let newer = vec![
            frame(1, "TextMessage", Some("a")),
            frame(2, "TextMessage", Some("b")),
            frame(3, "TextMessage", Some("c")),
            frame(4, "TextMessage", Some("d")),
            frame(5, "TextMessage", Some("e")),
        ];
        let fresh = transcript_delta(newer, older.last().copied());
        assert_eq!(ids(&fresh), vec![4, 5]);
    }

    #[test]
    fn backoff_grows_and_resets() {
        let mut backoff = Backoff::new(BackoffPolicy::new(
            Duration::from_millis(100),
            Duration::from_millis(400),
        ));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }
}

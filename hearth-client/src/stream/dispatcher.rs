use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::models::Message;

use super::StreamSession;

/// Drains the queue and fans each message out to the listeners.
pub(super) struct Dispatcher {
    session: Arc<StreamSession>,
    queue: mpsc::Receiver<Message>,
}

impl Dispatcher {
    pub(super) fn new(session: Arc<StreamSession>, queue: mpsc::Receiver<Message>) -> Self {
        Self { session, queue }
    }

    /// Delivers messages in arrival order until the stream stops or the
    /// fetcher goes away.
    pub(super) async fn run(mut self) {
        loop {
            let message = tokio::select! {
                biased;
                () = self.session.cancelled() => break,
                message = self.queue.recv() => message,
            };
            match message {
                Some(message) => self.session.dispatch(&message),
                None => break,
            }
        }
        debug!("dispatcher exited");
    }
}

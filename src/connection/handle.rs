//! Connection handle
//!
//! `ConnectionHandle` is the registry's view of a live connection: enough to
//! push frames to it and to ask it to close. Cloning is cheap.

use tokio::sync::mpsc::Sender;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::broker::ConnectionId;
use crate::protocol::Message;

#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub identity: String,
    outbound: Sender<Message>,
    closer: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(
        id: ConnectionId,
        identity: String,
        outbound: Sender<Message>,
        closer: CancellationToken,
    ) -> Self {
        Self {
            id,
            identity,
            outbound,
            closer,
        }
    }

    /// Queue `message` for this connection without waiting.
    ///
    /// Fails if the outbound buffer is full or the connection task is gone.
    pub fn deliver(&self, message: Message) -> Result<(), TrySendError<Message>> {
        self.outbound.try_send(message)
    }

    /// Ask the owning connection task to close. Returns immediately; the task
    /// deregisters itself when it observes the request.
    pub fn close(&self) {
        self.closer.cancel();
    }

    pub fn is_closing(&self) -> bool {
        self.closer.is_cancelled()
    }
}

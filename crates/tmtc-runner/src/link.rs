//! The command link between a route and the current device connection.

use parking_lot::RwLock;
use std::io;
use tmtc_protocol::CommandLink;
use tokio::sync::mpsc;
use tracing::warn;

/// Frames queued towards the device before writes start failing.
pub const LINK_QUEUE_DEPTH: usize = 256;

/// Hands command bytes to whichever connection is currently attached.
///
/// Writes never block: a full queue or a missing connection fails the write,
/// which the route reports as a FATAL release.
#[derive(Debug)]
pub struct DeviceLink {
    source: String,
    tx: RwLock<Option<mpsc::Sender<Vec<u8>>>>,
}

impl DeviceLink {
    pub fn new(source: impl Into<String>) -> Self {
        DeviceLink {
            source: source.into(),
            tx: RwLock::new(None),
        }
    }

    /// Attach a new connection, returning the receiving end of its write queue.
    pub fn attach(&self) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(LINK_QUEUE_DEPTH);
        *self.tx.write() = Some(tx);
        rx
    }

    /// Detach the current connection. Later writes fail with `NotConnected`.
    pub fn detach(&self) {
        *self.tx.write() = None;
    }

    pub fn is_attached(&self) -> bool {
        self.tx.read().as_ref().map_or(false, |tx| !tx.is_closed())
    }
}

impl CommandLink for DeviceLink {
    fn source(&self) -> &str {
        &self.source
    }

    fn write_message(&self, bytes: &[u8]) -> io::Result<()> {
        let guard = self.tx.read();
        let Some(tx) = guard.as_ref() else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "device not connected",
            ));
        };
        tx.try_send(bytes.to_vec()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                warn!("Write queue full for {}", self.source);
                io::Error::new(io::ErrorKind::WouldBlock, "device write queue full")
            }
            mpsc::error::TrySendError::Closed(_) => {
                io::Error::new(io::ErrorKind::BrokenPipe, "device connection closed")
            }
        })
    }
}

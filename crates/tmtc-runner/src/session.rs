//! Device connection handling.
//!
//! A session owns one connected byte stream. Bytes read from the device are
//! framed and handed to the route; command bytes queued on the
//! [`DeviceLink`] are written out in order. When the stream ends the link is
//! detached and the route told, so open verifications close as UNKNOWN.

use crate::link::DeviceLink;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tmtc_codec::{Framer, FramingConfig};
use tmtc_metrics::{metric_defs, RouteLabels};
use tmtc_protocol::Route;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The device closed the connection.
    Closed,
    /// The runner asked the session to stop.
    Shutdown,
}

/// Feeds frames to a route.
struct FrameDispatcher {
    route: Route,
    framer: Framer,
    labels: RouteLabels,
}

impl FrameDispatcher {
    fn new(route: Route, framing: &FramingConfig) -> tmtc_codec::CodecResult<Self> {
        let labels = RouteLabels::new(route.name());
        Ok(FrameDispatcher {
            route,
            framer: Framer::from_config(framing)?,
            labels,
        })
    }

    fn push(&mut self, data: &[u8]) {
        self.framer.push(data);
        loop {
            match self.framer.decode() {
                Ok(Some(frame)) => {
                    metrics::counter!(metric_defs::LINK_FRAMES.name, &self.labels.to_labels())
                        .increment(1);
                    self.dispatch(&frame);
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Framing error on route {}: {}", self.route.name(), e);
                    metrics::counter!(
                        metric_defs::LINK_FRAMING_ERRORS.name,
                        &self.labels.to_labels()
                    )
                    .increment(1);
                    break;
                }
            }
        }
    }

    fn dispatch(&self, frame: &[u8]) {
        if !self.framer.is_text() {
            self.route.on_binary_message(frame);
            return;
        }
        match std::str::from_utf8(frame) {
            Ok(text) => self.route.on_ascii_message(text, frame),
            Err(_) => {
                warn!(
                    "Non UTF-8 frame on text route {}, trying binary definitions",
                    self.route.name()
                );
                self.route.on_binary_message(frame);
            }
        }
    }
}

/// Run a session over an already connected stream until it closes or
/// `shutdown` resolves.
///
/// On-connection commands are sent right after the link is attached.
pub async fn run_session<S, F>(
    stream: S,
    route: Route,
    link: Arc<DeviceLink>,
    framing: &FramingConfig,
    shutdown: F,
) -> io::Result<SessionEnd>
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: std::future::Future<Output = ()>,
{
    let mut dispatcher = FrameDispatcher::new(route.clone(), framing)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let mut rx = link.attach();
    metrics::counter!(
        metric_defs::LINK_CONNECTIONS.name,
        &RouteLabels::new(route.name()).to_labels()
    )
    .increment(1);
    for mapping_id in route.connection_mappings() {
        if let Err(e) = route.dispatch_internal(&mapping_id, link.as_ref()) {
            warn!("Connection command {} failed: {}", mapping_id, e);
        }
    }

    let result = pump(stream, &mut dispatcher, &mut rx, shutdown).await;

    link.detach();
    route.notify_disconnection();
    debug!("Session of route {} ended: {:?}", route.name(), result);
    result
}

async fn pump<S, F>(
    stream: S,
    dispatcher: &mut FrameDispatcher,
    rx: &mut mpsc::Receiver<Vec<u8>>,
    shutdown: F,
) -> io::Result<SessionEnd>
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: std::future::Future<Output = ()>,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut read_buf = [0u8; 4096];
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = reader.read(&mut read_buf) => {
                match result? {
                    0 => return Ok(SessionEnd::Closed),
                    n => dispatcher.push(&read_buf[..n]),
                }
            }

            Some(data) = rx.recv() => {
                writer.write_all(&data).await?;
                writer.flush().await?;
            }

            _ = &mut shutdown => {
                return Ok(SessionEnd::Shutdown);
            }
        }
    }
}

/// Connect to `address` and run sessions until `shutdown` resolves,
/// reconnecting after `retry` when the device drops or refuses.
pub async fn run_client<F>(
    address: &str,
    route: Route,
    link: Arc<DeviceLink>,
    framing: &FramingConfig,
    retry: Duration,
    shutdown: F,
) -> io::Result<()>
where
    F: std::future::Future<Output = ()>,
{
    // A bad framing option fails before the first connection attempt.
    Framer::from_config(framing).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let signal = async move {
        shutdown.await;
        let _ = stop_tx.send(true);
    };

    let connect_loop = async {
        loop {
            if *stop_rx.borrow() {
                return;
            }
            match TcpStream::connect(address).await {
                Ok(stream) => {
                    info!("Connected to {} for route {}", address, route.name());
                    let mut stop = stop_rx.clone();
                    let stopped = async move {
                        let _ = stop.wait_for(|s| *s).await;
                    };
                    match run_session(stream, route.clone(), Arc::clone(&link), framing, stopped)
                        .await
                    {
                        Ok(SessionEnd::Shutdown) => return,
                        Ok(SessionEnd::Closed) => info!("Device {} closed the connection", address),
                        Err(e) => warn!("Connection to {} failed: {}", address, e),
                    }
                }
                Err(e) => warn!("Cannot connect to {}: {}", address, e),
            }
            let mut stop = stop_rx.clone();
            tokio::select! {
                _ = tokio::time::sleep(retry) => {}
                _ = stop.wait_for(|s| *s) => return,
            }
        }
    };

    tokio::pin!(signal);
    tokio::pin!(connect_loop);
    let mut signalled = false;
    loop {
        tokio::select! {
            _ = &mut connect_loop => return Ok(()),
            // Keep driving the connect loop so the session can clean up.
            _ = &mut signal, if !signalled => signalled = true,
        }
    }
}

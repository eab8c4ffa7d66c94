//! One direction of a forwarded connection.
//!
//! A connection pair is relayed by two of these, one per direction. Whichever
//! finishes first cancels the pair's token, so its sibling drops its halves and
//! both sockets close.

use crate::config::COPY_BUFFER_SIZE;
use crate::err::{AppliesTo, IoErrorExt};
use futures::future::{select, Either};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub enum Ended {
    /// Source reached end of stream.
    Eof,
    /// The sibling direction finished, or the pair was abandoned.
    Closed,
    Failed(io::Error),
}

#[derive(Debug)]
pub struct Relayed {
    pub bytes: u64,
    pub ended: Ended,
}

/// Copies `source` into `destination` until EOF, an I/O error, or `closed` firing,
/// then cancels `closed`.
pub async fn relay<R, W>(mut source: R, mut destination: W, closed: &CancellationToken) -> Relayed
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE].into_boxed_slice();
    let mut bytes = 0;

    let ended = loop {
        let step = async {
            let n = source.read(&mut buf).await?;
            if n > 0 {
                destination.write_all(&buf[..n]).await?;
            }
            Ok::<_, io::Error>(n)
        };
        match select(pin!(step), pin!(closed.cancelled())).await {
            Either::Left((Ok(0), _)) => break Ended::Eof,
            Either::Left((Ok(n), _)) => bytes += n as u64,
            Either::Left((Err(e), _)) => break Ended::Failed(e),
            Either::Right(((), _)) => break Ended::Closed,
        }
    };

    if let Ended::Eof = ended {
        // pass the EOF along before the sockets go away
        if let Err(e) = destination.shutdown().await {
            log::trace!("Shutdown after EOF failed: {}", e);
        }
    }
    closed.cancel();

    Relayed { bytes, ended }
}

#[derive(Clone, Copy, Debug)]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Up => "up",
            Direction::Down => "down",
        })
    }
}

/// Shared by the two relays of one connection pair; the last one out logs the close.
pub struct Pair {
    peer: SocketAddr,
    active: Arc<AtomicUsize>,
    closed: CancellationToken,
}

impl Pair {
    pub fn open(
        peer: SocketAddr,
        active: &Arc<AtomicUsize>,
        closed: CancellationToken,
    ) -> Arc<Self> {
        active.fetch_add(1, Relaxed);
        Arc::new(Self {
            peer,
            active: Arc::clone(active),
            closed,
        })
    }
}

impl Drop for Pair {
    fn drop(&mut self) {
        let active = self.active.fetch_sub(1, Relaxed) - 1;
        log::info!("Closing {} ({} active)", self.peer, active);
    }
}

/// Runs one direction of `pair`, logging how it ended.
pub async fn run(
    pair: Arc<Pair>,
    direction: Direction,
    source: OwnedReadHalf,
    destination: OwnedWriteHalf,
) {
    let Relayed { bytes, ended } = relay(source, destination, &pair.closed).await;
    match ended {
        Ended::Eof => log::debug!("{} {}: eof after {} bytes", pair.peer, direction, bytes),
        Ended::Closed => log::debug!("{} {}: closed after {} bytes", pair.peer, direction, bytes),
        Ended::Failed(e) => {
            log::log!(
                failure_level(&e),
                "{} {}: {} after {} bytes",
                pair.peer,
                direction,
                e,
                bytes
            )
        }
    }
}

/// Peers hanging up mid-stream is routine. Any other I/O error on an
/// established socket is not.
fn failure_level(e: &io::Error) -> log::Level {
    match e.applies_to() {
        AppliesTo::Connection => log::Level::Info,
        AppliesTo::Listener => log::Level::Error,
    }
}

use crate::err::{AppliesTo, IoErrorExt};
use crate::future::first_ok;
use std::io;
use std::net::SocketAddr;
use tokio::net::{lookup_host, TcpListener, TcpStream};

/// Resolves `addr` (`host:port`) and connects to the first address that accepts.
///
/// There is no connect timeout beyond the OS default.
pub async fn connect(addr: &str) -> Result<TcpStream, io::Error> {
    let addrs = lookup_host(addr).await?;
    let stream = first_ok(addrs.map(TcpStream::connect), || {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "Resolved to zero addresses",
        )
    })
    .await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Accepts the next connection, skipping ones the peer already gave up on.
///
/// Cancel safe: dropping the future never loses a queued connection.
pub async fn accept(listener: &TcpListener) -> Result<(TcpStream, SocketAddr), io::Error> {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    log::debug!("Failed to set nodelay for {}: {}", peer, e);
                }
                return Ok((stream, peer));
            }
            Err(e) => match e.applies_to() {
                AppliesTo::Connection => log::debug!("Aborted connection dropped: {}", e),
                AppliesTo::Listener => return Err(e),
            },
        }
    }
}

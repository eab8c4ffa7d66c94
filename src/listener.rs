use crate::backoff::Backoff;
use crate::broker::Broker;
use crate::config::ACCEPT_BACKOFF_SECS;
use crate::engine::ForwardRule;
use crate::tcp;
use futures::future::{select, Either};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// A bound socket for one forward rule, plus the token that stops it.
pub struct Listener {
    rule: Arc<ForwardRule>,
    socket: TcpListener,
    local_addr: SocketAddr,
    stopping: CancellationToken,
}

impl Listener {
    pub async fn bind(
        rule: Arc<ForwardRule>,
        stopping: CancellationToken,
    ) -> Result<Self, io::Error> {
        log::info!("Binding to {}", rule.listen);
        let socket = TcpListener::bind(rule.listen.as_str()).await?;
        let local_addr = socket.local_addr()?;
        Ok(Self {
            rule,
            socket,
            local_addr,
            stopping,
        })
    }

    pub fn rule(&self) -> &Arc<ForwardRule> {
        &self.rule
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts until stopped, handing each connection to `broker`. The socket is closed on return.
    pub async fn run(self, broker: Broker) {
        self.run_with(broker, accept_next).await
    }

    /// Like [`Listener::run`], with `accept` taking the socket and handing it back
    /// alongside the next connection.
    async fn run_with<Fut>(self, broker: Broker, accept: impl Fn(TcpListener) -> Fut)
    where
        Fut: Future<Output = (Accepted, TcpListener)>,
    {
        let Listener {
            rule,
            socket,
            local_addr,
            stopping,
        } = self;
        log::info!(
            "Listening on {} ({}) -> {}",
            rule.listen,
            local_addr,
            rule.destination
        );

        {
            let mut socket = socket;
            let mut backoff = Backoff::new(ACCEPT_BACKOFF_SECS);
            loop {
                // accept goes first, so a connection queued before shutdown is still taken
                let accepted = match select(pin!(accept(socket)), pin!(stopping.cancelled())).await
                {
                    Either::Left(((accepted, returned), _)) => {
                        socket = returned;
                        accepted
                    }
                    Either::Right(((), _)) => break,
                };

                match accepted {
                    Ok((inbound, peer)) => {
                        backoff.reset();
                        broker.dispatch(inbound, peer);
                    }
                    Err(_) if stopping.is_cancelled() => break,
                    Err(e) => {
                        log::error!("Error accepting on {}: {}", rule.listen, e);
                        let seconds = backoff.next();
                        log::warn!("Retrying in {} seconds", seconds);
                        let pause = pin!(sleep(Duration::from_secs(u64::from(seconds))));
                        if let Either::Right(_) = select(pause, pin!(stopping.cancelled())).await {
                            break;
                        }
                    }
                }
            }
        }

        log::info!("Stopped listening on {}", rule.listen);
    }
}

type Accepted = Result<(TcpStream, SocketAddr), io::Error>;

async fn accept_next(socket: TcpListener) -> (Accepted, TcpListener) {
    let accepted = tcp::accept(&socket).await;
    (accepted, socket)
}

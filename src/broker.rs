use crate::engine::ForwardRule;
use crate::relay::{self, Direction, Pair};
use crate::shutdown::Shutdown;
use crate::tcp;
use futures::future::{select, Either};
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};
use std::sync::Arc;
use tokio::net::TcpStream;

/// Pairs accepted connections for one forward rule with fresh outbound connections.
#[derive(Clone)]
pub struct Broker {
    rule: Arc<ForwardRule>,
    shutdown: Shutdown,
    active: Arc<AtomicUsize>,
}

impl Broker {
    pub fn new(rule: Arc<ForwardRule>, shutdown: Shutdown, active: Arc<AtomicUsize>) -> Self {
        Self {
            rule,
            shutdown,
            active,
        }
    }

    /// Handles `inbound` on its own task, so the caller can go straight back to accepting.
    pub fn dispatch(&self, inbound: TcpStream, peer: SocketAddr) {
        let broker = self.clone();
        self.shutdown
            .spawn(async move { broker.handle(inbound, peer).await });
    }

    pub async fn handle(&self, inbound: TcpStream, peer: SocketAddr) {
        let ForwardRule {
            listen,
            destination,
        } = &*self.rule;
        log::info!("Connection from {} on {}", peer, listen);

        let dialed = {
            let dial = pin!(tcp::connect(destination));
            match select(dial, pin!(self.shutdown.abandoned())).await {
                Either::Left((dialed, _)) => dialed,
                Either::Right(((), _)) => {
                    log::debug!("Abandoned dial to {} for {}", destination, peer);
                    return;
                }
            }
        };

        let outbound = match dialed {
            Ok(outbound) => outbound,
            Err(e) => {
                // dropping `inbound` closes it
                log::error!("Failed to connect {} -> {}: {}", listen, destination, e);
                return;
            }
        };

        let pair = Pair::open(peer, &self.active, self.shutdown.pair_token());
        log::info!(
            "Connected {} to {} ({} active)",
            peer,
            destination,
            self.active.load(Relaxed)
        );

        let (inbound_read, inbound_write) = inbound.into_split();
        let (outbound_read, outbound_write) = outbound.into_split();
        self.shutdown.spawn(relay::run(
            Arc::clone(&pair),
            Direction::Up,
            inbound_read,
            outbound_write,
        ));
        self.shutdown
            .spawn(relay::run(pair, Direction::Down, outbound_read, inbound_write));
    }
}

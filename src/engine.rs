use crate::broker::Broker;
use crate::listener::Listener;
use crate::shutdown::Shutdown;
use futures::future::try_join_all;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

/// Forward connections accepted on `listen` to `destination`. Both are `host:port`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForwardRule {
    pub listen: String,
    pub destination: String,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("No forwards configured")]
    NoForwards,
    #[error("Can't listen on {listen}: {source}")]
    Bind {
        listen: String,
        #[source]
        source: io::Error,
    },
}

/// Running listener loops for a set of forward rules, and the shutdown that stops them.
pub struct Engine {
    shutdown: Shutdown,
    local_addrs: Vec<SocketAddr>,
}

impl Engine {
    /// Binds every listen address, then starts one listener loop per rule.
    ///
    /// Nothing is started unless every bind succeeds.
    pub async fn start(
        forwards: Vec<ForwardRule>,
        grace_period: Duration,
    ) -> Result<Self, EngineError> {
        if forwards.is_empty() {
            return Err(EngineError::NoForwards);
        }

        let shutdown = Shutdown::new(grace_period);
        let listeners = try_join_all(forwards.into_iter().map(|rule| {
            let stopping = shutdown.stopping();
            async move {
                let listen = rule.listen.clone();
                Listener::bind(Arc::new(rule), stopping)
                    .await
                    .map_err(|source| EngineError::Bind { listen, source })
            }
        }))
        .await?;

        let active: Arc<AtomicUsize> = Arc::default();
        let local_addrs = listeners.iter().map(Listener::local_addr).collect();
        for listener in listeners {
            let broker = Broker::new(
                Arc::clone(listener.rule()),
                shutdown.clone(),
                Arc::clone(&active),
            );
            shutdown.spawn(listener.run(broker));
        }

        Ok(Self {
            shutdown,
            local_addrs,
        })
    }

    /// Bound addresses, in the order the rules were given.
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// See [`Shutdown::request`].
    pub async fn request_shutdown(&self) -> bool {
        self.shutdown.request().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcp::tests::dead_addr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn rule(destination: SocketAddr) -> ForwardRule {
        ForwardRule {
            listen: "127.0.0.1:0".to_string(),
            destination: destination.to_string(),
        }
    }

    async fn echo_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let (mut read, mut write) = stream.split();
                    let _ = tokio::io::copy(&mut read, &mut write).await;
                });
            }
        });
        addr
    }

    /// Replies with `tag` to every connection, then waits for the peer to leave.
    async fn tag_server(tag: &'static [u8]) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    stream.write_all(tag).await.unwrap();
                    let mut rest = Vec::new();
                    let _ = stream.read_to_end(&mut rest).await;
                });
            }
        });
        addr
    }

    /// Accepts connections and holds them open without ever reading or writing.
    async fn stalled_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                held.push(stream);
            }
        });
        addr
    }

    async fn read_tag(addr: SocketAddr) -> Vec<u8> {
        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0; 1];
        timeout(WAIT, client.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        buf.to_vec()
    }

    async fn assert_closed(client: &mut TcpStream) {
        let mut rest = Vec::new();
        // a reset counts as closed too
        let _ = timeout(WAIT, client.read_to_end(&mut rest))
            .await
            .expect("connection still open");
    }

    #[tokio::test]
    async fn ping_is_echoed_then_closed_on_shutdown() {
        let engine = Engine::start(vec![rule(echo_server().await)], Duration::from_millis(200))
            .await
            .unwrap();

        let mut client = TcpStream::connect(engine.local_addrs()[0]).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut buf = [0; 4];
        timeout(WAIT, client.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, b"ping");

        assert!(timeout(WAIT, engine.request_shutdown()).await.unwrap());
        assert_closed(&mut client).await;
    }

    #[tokio::test]
    async fn payload_arrives_intact() {
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let engine = Engine::start(
            vec![rule(server.local_addr().unwrap())],
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        let payload = (0..1_000_000u32)
            .map(|i| (i.wrapping_mul(31) >> 3) as u8)
            .collect::<Vec<_>>();
        let mut client = TcpStream::connect(engine.local_addrs()[0]).await.unwrap();
        let writing = tokio::spawn({
            let payload = payload.clone();
            async move {
                client.write_all(&payload).await.unwrap();
                client.shutdown().await.unwrap();
                client
            }
        });

        let (mut upstream, _) = timeout(WAIT, server.accept()).await.unwrap().unwrap();
        let mut received = Vec::new();
        timeout(WAIT, upstream.read_to_end(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.len(), payload.len());
        assert!(received == payload);
        drop(writing.await.unwrap());
    }

    #[tokio::test]
    async fn each_listener_routes_to_its_own_destination() {
        let a = tag_server(b"a").await;
        let b = tag_server(b"b").await;
        let c = tag_server(b"c").await;
        let engine = Engine::start(vec![rule(a), rule(b), rule(c)], Duration::from_secs(1))
            .await
            .unwrap();

        let addrs = engine.local_addrs().to_vec();
        assert_eq!(addrs.len(), 3);
        assert_eq!(read_tag(addrs[0]).await, b"a");
        assert_eq!(read_tag(addrs[1]).await, b"b");
        assert_eq!(read_tag(addrs[2]).await, b"c");
        assert_eq!(read_tag(addrs[0]).await, b"a");
    }

    #[tokio::test]
    async fn dial_failure_does_not_affect_other_connections() {
        let dead = dead_addr().await;
        let live = tag_server(b"x").await;
        let engine = Engine::start(vec![rule(dead), rule(live)], Duration::from_secs(1))
            .await
            .unwrap();
        let addrs = engine.local_addrs().to_vec();

        let mut failed = TcpStream::connect(addrs[0]).await.unwrap();
        let concurrent = TcpStream::connect(addrs[1]).await.unwrap();
        assert_closed(&mut failed).await;
        drop(concurrent);
        assert_eq!(read_tag(addrs[1]).await, b"x");

        // the same destination works once something listens there
        let revived = TcpListener::bind(dead).await.unwrap();
        let _client = TcpStream::connect(addrs[0]).await.unwrap();
        timeout(WAIT, revived.accept()).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_is_bounded_with_stalled_destination() {
        let engine = Engine::start(vec![rule(stalled_server().await)], Duration::from_millis(300))
            .await
            .unwrap();

        let mut clients = Vec::new();
        for _ in 0..10 {
            let mut client = TcpStream::connect(engine.local_addrs()[0]).await.unwrap();
            client.write_all(b"anyone there?").await.unwrap();
            clients.push(client);
        }

        timeout(Duration::from_secs(2), engine.request_shutdown())
            .await
            .unwrap();
        for client in &mut clients {
            assert_closed(client).await;
        }
        assert!(!engine.request_shutdown().await);
    }

    #[tokio::test]
    async fn listeners_close_on_shutdown() {
        let engine = Engine::start(
            vec![rule(dead_addr().await), rule(dead_addr().await)],
            Duration::from_secs(60),
        )
        .await
        .unwrap();
        let addrs = engine.local_addrs().to_vec();

        // nothing in flight, so this does not wait out the grace period
        assert!(timeout(WAIT, engine.request_shutdown()).await.unwrap());
        for addr in addrs {
            let e = TcpStream::connect(addr).await.unwrap_err();
            assert_eq!(e.kind(), io::ErrorKind::ConnectionRefused);
        }
    }

    #[tokio::test]
    async fn empty_forwards_are_rejected() {
        let e = Engine::start(Vec::new(), Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(matches!(e, EngineError::NoForwards));
    }

    #[tokio::test]
    async fn bind_failure_names_the_address() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listen = taken.local_addr().unwrap().to_string();
        let rules = vec![
            rule(dead_addr().await),
            ForwardRule {
                listen: listen.clone(),
                destination: "127.0.0.1:1".to_string(),
            },
        ];

        let e = Engine::start(rules, Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        match &e {
            EngineError::Bind { listen: failed, .. } => assert_eq!(failed, &listen),
            other => panic!("unexpected error: {}", other),
        }
        assert!(e.to_string().contains(&listen));
    }
}

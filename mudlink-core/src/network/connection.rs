use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::Framed;

use crate::codec::{Outbound, TelnetCodec};
use crate::network::transport::TransportStream;
use crate::protocol::TelnetDecoder;

pub type LinkSender = mpsc::UnboundedSender<Outbound>;

/// Why a link stopped delivering data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkFault {
    PeerClosed,
    Io(String),
    IdleTimeout(Duration),
}

impl std::fmt::Display for LinkFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "connection closed by remote host"),
            Self::Io(cause) => write!(f, "connection error: {cause}"),
            Self::IdleTimeout(after) => {
                write!(f, "no traffic for {} ms; connection timed out", after.as_millis())
            }
        }
    }
}

/// What a link reports back to its owner. Every event is stamped with the
/// epoch the link was created under.
#[derive(Debug)]
pub enum LinkEvent {
    Data { epoch: u64, text: Bytes },
    Closed { epoch: u64, fault: LinkFault },
}

/// Time of the last read or write, shared by the reader and writer tasks.
#[derive(Debug)]
struct LastActivity {
    base: Instant,
    offset_ms: AtomicU64,
}

impl LastActivity {
    fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let ms = self.base.elapsed().as_millis() as u64;
        self.offset_ms.store(ms, Ordering::Relaxed);
    }

    fn deadline(&self, idle: Duration) -> Instant {
        self.base + Duration::from_millis(self.offset_ms.load(Ordering::Relaxed)) + idle
    }
}

/// A live telnet session over one transport.
#[derive(Debug)]
pub struct SessionLink {
    epoch: u64,
    // Channel to the background writer task
    tx: LinkSender,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl SessionLink {
    /// Split the stream into a reader task and a writer task.
    ///
    /// Decoded text goes to `events`; negotiation replies are handed
    /// straight to the writer so they never wait on the engine.
    pub fn spawn(
        stream: TransportStream,
        decoder: TelnetDecoder,
        epoch: u64,
        idle_timeout: Duration,
        events: mpsc::Sender<LinkEvent>,
    ) -> Self {
        let (mut net_writer, mut net_reader) =
            Framed::new(stream, TelnetCodec::new(decoder)).split();
        let (tx, mut writer_rx) = mpsc::unbounded_channel::<Outbound>();
        let activity = Arc::new(LastActivity::new());

        // Writer task: engine -> network
        let writer_events = events.clone();
        let writer_activity = Arc::clone(&activity);
        let writer = tokio::spawn(async move {
            while let Some(item) = writer_rx.recv().await {
                if let Err(e) = net_writer.send(item).await {
                    tracing::warn!("link {epoch}: write error: {e}");
                    let _ = writer_events
                        .send(LinkEvent::Closed {
                            epoch,
                            fault: LinkFault::Io(crate::error::describe_io(&e)),
                        })
                        .await;
                    return;
                }
                writer_activity.touch();
            }
            // Every sender dropped: orderly close.
            let _ = net_writer.close().await;
        });

        // Reader task: network -> engine
        let replies = tx.clone();
        let reader = tokio::spawn(async move {
            let fault = loop {
                let deadline = activity.deadline(idle_timeout);
                let next = tokio::select! {
                    next = net_reader.next() => next,
                    _ = tokio::time::sleep_until(deadline) => {
                        if activity.deadline(idle_timeout) <= Instant::now() {
                            break LinkFault::IdleTimeout(idle_timeout);
                        }
                        continue;
                    }
                };

                match next {
                    Some(Ok(inbound)) => {
                        activity.touch();
                        if !inbound.replies.is_empty() {
                            let _ = replies.send(Outbound::Negotiation(inbound.replies));
                        }
                        if !inbound.text.is_empty()
                            && events
                                .send(LinkEvent::Data {
                                    epoch,
                                    text: inbound.text,
                                })
                                .await
                                .is_err()
                        {
                            // Engine went away
                            return;
                        }
                    }
                    Some(Err(e)) => break LinkFault::Io(crate::error::describe_io(&e)),
                    None => break LinkFault::PeerClosed,
                }
            };

            tracing::debug!("link {epoch}: reader stopped: {fault}");
            let _ = events.send(LinkEvent::Closed { epoch, fault }).await;
        });

        Self {
            epoch,
            tx,
            reader,
            writer,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn sender(&self) -> LinkSender {
        self.tx.clone()
    }

    /// Queue an item for the writer. Fails once the writer is gone.
    pub fn send(&self, item: Outbound) -> Result<(), mpsc::error::SendError<Outbound>> {
        self.tx.send(item)
    }

    /// Stop both tasks at once. Anything still queued for the writer is
    /// discarded and the socket closes when the tasks are gone.
    pub fn shutdown(self) {
        self.reader.abort();
        self.writer.abort();
    }
}

impl Drop for SessionLink {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Sends a keep-alive on every tick until the link's writer is gone.
pub async fn keepalive(tx: LinkSender, interval: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    loop {
        ticker.tick().await;
        if tx.send(Outbound::KeepAlive).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DO, IAC, IdentificationSequencer, WILL, option};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn decoder() -> TelnetDecoder {
        TelnetDecoder::new(IdentificationSequencer::new(
            "MUDLINK",
            "0.1.0",
            "XTERM-256COLOR",
            None,
        ))
    }

    async fn pair() -> (TransportStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (TransportStream::Plain(client), server)
    }

    #[tokio::test]
    async fn text_and_negotiation_are_separated() {
        let (client, mut server) = pair().await;
        let (events_tx, mut events) = mpsc::channel(16);
        let _link = SessionLink::spawn(client, decoder(), 7, Duration::from_secs(30), events_tx);

        server.write_all(&[IAC, DO, option::TTYPE]).await.unwrap();
        server.write_all(b"Welcome!\r\n").await.unwrap();

        let mut reply = [0u8; 3];
        server.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [IAC, WILL, option::TTYPE]);

        let mut text = Vec::new();
        while text.len() < 10 {
            match events.recv().await.unwrap() {
                LinkEvent::Data { epoch, text: t } => {
                    assert_eq!(epoch, 7);
                    text.extend_from_slice(&t);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(text, b"Welcome!\r\n");
    }

    #[tokio::test]
    async fn commands_are_written_with_crlf() {
        let (client, mut server) = pair().await;
        let (events_tx, _events) = mpsc::channel(16);
        let link = SessionLink::spawn(client, decoder(), 1, Duration::from_secs(30), events_tx);

        link.send(Outbound::Command("look".into())).unwrap();
        let mut buf = [0u8; 6];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"look\r\n");
    }

    #[tokio::test]
    async fn peer_close_is_reported() {
        let (client, server) = pair().await;
        let (events_tx, mut events) = mpsc::channel(16);
        let _link = SessionLink::spawn(client, decoder(), 3, Duration::from_secs(30), events_tx);
        drop(server);

        match events.recv().await.unwrap() {
            LinkEvent::Closed { epoch, fault } => {
                assert_eq!(epoch, 3);
                assert_eq!(fault, LinkFault::PeerClosed);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn idle_link_times_out() {
        let (client, _server) = pair().await;
        let (events_tx, mut events) = mpsc::channel(16);
        let _link = SessionLink::spawn(client, decoder(), 1, Duration::from_millis(150), events_tx);

        match events.recv().await.unwrap() {
            LinkEvent::Closed { fault, .. } => {
                assert_eq!(fault, LinkFault::IdleTimeout(Duration::from_millis(150)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn shutdown_discards_queued_writes() {
        let (client, mut server) = pair().await;
        let (events_tx, _events) = mpsc::channel(16);
        let link = SessionLink::spawn(client, decoder(), 1, Duration::from_secs(30), events_tx);

        // Far more than the socket buffers hold while nobody reads.
        let chunk = "x".repeat(1 << 20);
        for _ in 0..48 {
            link.send(Outbound::Command(chunk.clone())).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        link.shutdown();

        let mut received = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), server.read_to_end(&mut received))
            .await
            .expect("socket stayed open after shutdown")
            .unwrap();
        assert!(received.len() < 48 * chunk.len());
    }

    #[tokio::test]
    async fn keepalive_stops_when_link_is_gone() {
        let (client, _server) = pair().await;
        let (events_tx, _events) = mpsc::channel(16);
        let link = SessionLink::spawn(client, decoder(), 1, Duration::from_secs(30), events_tx);

        let task = tokio::spawn(keepalive(link.sender(), Duration::from_millis(20)));
        link.shutdown();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("keep-alive kept running")
            .unwrap();
    }

    #[tokio::test]
    async fn keepalive_sends_nul_bytes() {
        let (client, mut server) = pair().await;
        let (events_tx, _events) = mpsc::channel(16);
        let link = SessionLink::spawn(client, decoder(), 1, Duration::from_secs(30), events_tx);

        let task = tokio::spawn(keepalive(link.sender(), Duration::from_millis(50)));
        let mut buf = [0xAAu8; 2];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0, 0]);
        task.abort();
    }
}

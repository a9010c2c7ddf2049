// WebSocket gateway between browser clients and the session layer.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::Stream;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use crate::app::{App, Connection};
use crate::error::ErrorCode;
use crate::protocol::{ClientMessage, ServerEvent};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Source of raw client connections. Implemented over TCP in production and
/// over in-memory pipes in tests.
#[async_trait]
pub trait Listener: Send {
    type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Wait for the next connection and return it with a printable peer
    /// address. `Ok(None)` means the listener is closed for good.
    async fn accept(&mut self) -> io::Result<Option<(Self::Io, String)>>;
}

pub struct TungsteniteListener {
    inner: TcpListener,
}

impl TungsteniteListener {
    pub async fn bind(addr: &str) -> io::Result<Self> {
        let inner = TcpListener::bind(addr).await?;
        Ok(TungsteniteListener { inner })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

#[async_trait]
impl Listener for TungsteniteListener {
    type Io = TcpStream;

    async fn accept(&mut self) -> io::Result<Option<(TcpStream, String)>> {
        let (stream, addr) = self.inner.accept().await?;
        Ok(Some((stream, addr.to_string())))
    }
}

/// Accept connections until the listener closes, serving each on its own task.
pub async fn run<L: Listener>(mut listener: L, app: Arc<App>) -> anyhow::Result<()> {
    loop {
        let (io, addr) = match listener.accept().await {
            Ok(Some(accepted)) => accepted,
            Ok(None) => {
                info!("Listener closed, no longer accepting connections");
                return Ok(());
            }
            Err(e) => {
                warn!("Failed to accept connection: {e}");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        info!("Accepted connection from {addr}");
        tokio::spawn(serve_connection(io, addr, Arc::clone(&app)));
    }
}

/// Perform the handshake, then pump frames both ways until the client leaves.
pub async fn serve_connection<S>(io: S, addr: String, app: Arc<App>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws_stream = match tokio_tungstenite::accept_async(io).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed for {addr}: {e}");
            return;
        }
    };

    let (mut write, read) = ws_stream.split();
    let (mut conn, mut outbound) = app.connect();

    let writer_addr = addr.clone();
    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to serialize event for {writer_addr}: {e}");
                    continue;
                }
            };
            if let Err(e) = write.send(Message::Text(json.into())).await {
                debug!("Write to {writer_addr} failed: {e}");
                break;
            }
        }
    });

    read_loop(read, &app, &mut conn, &addr).await;

    app.disconnect(conn).await;
    writer.abort();
    info!("Client {addr} disconnected");
}

/// Decode text frames into [`ClientMessage`]s and dispatch them.
///
/// Generic over the stream so it can be driven by in-memory message lists.
pub async fn read_loop<St>(mut stream: St, app: &App, conn: &mut Connection, addr: &str)
where
    St: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(msg) => app.dispatch(conn, msg).await,
                Err(e) => {
                    warn!("Invalid message from {addr}: {e}");
                    conn.outbox().send(ServerEvent::Error {
                        code: ErrorCode::InvalidMessage,
                        message: e.to_string(),
                    });
                }
            },
            Ok(Message::Close(_)) => {
                info!("Client {addr} sent close frame");
                break;
            }
            Err(e) => {
                warn!("WebSocket error from {addr}: {e}");
                break;
            }
            _ => {
                // Binary, Ping, Pong and raw frames carry nothing for us.
            }
        }
    }
}

/// Wire an unbounded channel up as a [`Listener`].
pub fn channel_listener<S>() -> (mpsc::UnboundedSender<(S, String)>, ChannelListener<S>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, ChannelListener { rx })
}

/// Listener fed by hand, for driving the gateway without sockets.
pub struct ChannelListener<S> {
    rx: mpsc::UnboundedReceiver<(S, String)>,
}

#[async_trait]
impl<S> Listener for ChannelListener<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Io = S;

    async fn accept(&mut self) -> io::Result<Option<(S, String)>> {
        Ok(self.rx.recv().await)
    }
}

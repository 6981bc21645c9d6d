//! Socket transport.
//!
//! [`Connector`] and [`Link`] are the seam between the lifecycle driver and
//! the wire. The production implementation speaks WebSocket text frames via
//! `tokio-tungstenite`; tests substitute scripted in-memory links.

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::Message,
    MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

use crate::{AppError, BoxFuture, Result};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Opens new links to the server.
pub trait Connector: Send + Sync {
    /// Open a link to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the connection cannot be opened.
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Box<dyn Link>>>;
}

/// One open, text-framed duplex link.
pub trait Link: Send {
    /// Send one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the frame cannot be written.
    fn send(&mut self, frame: String) -> BoxFuture<'_, Result<()>>;

    /// Receive the next text frame; `Ok(None)` once the peer has closed.
    ///
    /// Must be cancel-safe: dropping the future before completion loses no
    /// frame.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] on a socket error.
    fn recv(&mut self) -> BoxFuture<'_, Result<Option<String>>>;

    /// Close the link, best effort.
    fn close(&mut self) -> BoxFuture<'_, ()>;
}

/// WebSocket connector.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Box<dyn Link>>> {
        Box::pin(async move {
            debug!(url, "opening websocket");
            let (ws, _) = connect_async(url)
                .await
                .map_err(|e| AppError::Transport(format!("websocket connect failed: {e}")))?;
            let (sink, stream) = ws.split();
            debug!(url, "websocket open");
            Ok(Box::new(WsLink { sink, stream }) as Box<dyn Link>)
        })
    }
}

/// WebSocket link carrying JSON text frames.
pub struct WsLink {
    sink: WsSink,
    stream: WsStream,
}

impl Link for WsLink {
    fn send(&mut self, frame: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.sink
                .send(Message::Text(frame))
                .await
                .map_err(|e| AppError::Transport(format!("failed to send: {e}")))
        })
    }

    fn recv(&mut self) -> BoxFuture<'_, Result<Option<String>>> {
        Box::pin(async move {
            loop {
                match self.stream.next().await {
                    Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => return Ok(Some(text)),
                        Err(_) => debug!("skipping non-utf8 binary frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => return Ok(None),
                    // Pings are answered by tungstenite.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(AppError::Transport(format!("websocket error: {e}")))
                    }
                }
            }
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Err(e) = self.sink.close().await {
                debug!(error = %e, "websocket close failed");
            }
        })
    }
}

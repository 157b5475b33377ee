//! Push channel sockets
//!
//! A `Connector` opens one socket per call and hands every inbound frame to
//! a channel. The socket stays open as long as the returned handle lives;
//! when the remote end goes away the frame sender is dropped, which is how
//! the owner learns about the close.

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel;
use tungstenite::http::Uri;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

pub const DEFAULT_FRAME_CHANNEL_SIZE: usize = 64;

/// Opaque inbound payload. Never inspected, only counted as a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(pub Vec<u8>);

#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("invalid socket url {0:?}")]
    InvalidUrl(String),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("socket i/o: {0}")]
    Io(#[from] io::Error),
    #[error("connection closed by peer")]
    Closed,
}

impl From<tungstenite::Error> for SocketError {
    fn from(err: tungstenite::Error) -> SocketError {
        match err {
            tungstenite::Error::Io(e) => SocketError::Io(e),
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                SocketError::Closed
            }
            tungstenite::Error::Url(e) => SocketError::InvalidUrl(e.to_string()),
            other => SocketError::Handshake(other.to_string()),
        }
    }
}

pub type FrameResult = Result<Frame, SocketError>;

/// Creates a sender/receiver pair to hand to `Connector::open`.
pub fn frame_channel() -> (
    channel::Sender<FrameResult>,
    channel::Receiver<FrameResult>,
) {
    channel::bounded::<FrameResult>(DEFAULT_FRAME_CHANNEL_SIZE)
}

pub trait Connector: Send + 'static {
    /// Handle keeping the connection alive. Dropping it closes the socket.
    type Socket: Send + 'static;

    fn open(
        &mut self,
        url: &str,
        frames: channel::Sender<FrameResult>,
    ) -> Result<Self::Socket, SocketError>;
}

/// WebSocket connector. Each open socket gets a reader thread which polls
/// with a short read timeout so it can notice when its handle is dropped.
#[derive(Debug, Clone)]
pub struct WsConnector {
    pub read_tick: Duration,
    /// Bound on the TCP connect and on the handshake.
    pub connect_timeout: Duration,
}

impl Default for WsConnector {
    fn default() -> WsConnector {
        WsConnector {
            read_tick: Duration::from_millis(200),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

pub struct WsSocket {
    stop: Arc<AtomicBool>,
}

impl Drop for WsSocket {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn set_read_timeout(
    ws: &WebSocket<MaybeTlsStream<TcpStream>>,
    tick: Duration,
) -> io::Result<()> {
    match ws.get_ref() {
        MaybeTlsStream::Plain(s) => s.set_read_timeout(Some(tick)),
        MaybeTlsStream::Rustls(s) => s.sock.set_read_timeout(Some(tick)),
        _ => Ok(()),
    }
}

fn connect_stream(url: &str, timeout: Duration) -> Result<TcpStream, SocketError> {
    let invalid = || SocketError::InvalidUrl(url.to_string());
    let uri: Uri = url.parse().map_err(|_| invalid())?;
    let host = uri.host().ok_or_else(invalid)?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let port = match (uri.port_u16(), uri.scheme_str()) {
        (Some(port), _) => port,
        (None, Some("wss")) => 443,
        (None, _) => 80,
    };

    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(match last_err {
        Some(e) => SocketError::Io(e),
        None => invalid(),
    })
}

fn is_timeout(err: &tungstenite::Error) -> bool {
    match err {
        tungstenite::Error::Io(e) => {
            matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
        }
        _ => false,
    }
}

fn read_frames(
    mut ws: WebSocket<MaybeTlsStream<TcpStream>>,
    frames: channel::Sender<FrameResult>,
    stop: Arc<AtomicBool>,
) {
    use crossbeam::channel::TrySendError;

    loop {
        if stop.load(Ordering::Relaxed) {
            let _ = ws.close(None);
            let _ = ws.flush();
            return;
        }
        let payload = match ws.read() {
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Binary(data)) => data,
            Ok(Message::Close(_)) => {
                let _ = frames.try_send(Err(SocketError::Closed));
                return;
            }
            // Ping/pong are answered by tungstenite itself.
            Ok(_) => continue,
            Err(e) if is_timeout(&e) => continue,
            Err(e) => {
                let _ = frames.try_send(Err(e.into()));
                return;
            }
        };
        match frames.try_send(Ok(Frame(payload))) {
            // A full queue already holds a pending trigger.
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                let _ = ws.close(None);
                let _ = ws.flush();
                return;
            }
        }
    }
}

impl Connector for WsConnector {
    type Socket = WsSocket;

    fn open(
        &mut self,
        url: &str,
        frames: channel::Sender<FrameResult>,
    ) -> Result<WsSocket, SocketError> {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(SocketError::InvalidUrl(url.to_string()));
        }
        let stream = connect_stream(url, self.connect_timeout)?;
        // Bounds the handshake; replaced by the read tick afterwards.
        stream.set_read_timeout(Some(self.connect_timeout))?;
        stream.set_write_timeout(Some(self.connect_timeout))?;
        let (ws, _response) = tungstenite::client_tls(url, stream)
            .map_err(|e| SocketError::Handshake(e.to_string()))?;
        set_read_timeout(&ws, self.read_tick)?;

        let stop = Arc::new(AtomicBool::new(false));
        let reader_stop = stop.clone();
        thread::Builder::new()
            .name("kartlive-socket".to_string())
            .spawn(move || read_frames(ws, frames, reader_stop))?;
        Ok(WsSocket { stop })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_websocket_urls() {
        let (tx, _rx) = frame_channel();
        let mut c = WsConnector::default();
        assert!(matches!(
            c.open("https://example.com/ws", tx),
            Err(SocketError::InvalidUrl(_))
        ));
    }

    #[test]
    fn urls_without_a_host_are_invalid() {
        assert!(matches!(
            connect_stream("ws:///ws", Duration::from_millis(100)),
            Err(SocketError::InvalidUrl(_))
        ));
    }

    #[test]
    fn silent_server_times_out_the_handshake() {
        // Accepted by the kernel backlog, never answered.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, _rx) = frame_channel();
        let mut c = WsConnector {
            connect_timeout: Duration::from_millis(200),
            ..WsConnector::default()
        };
        let started = std::time::Instant::now();
        let result = c.open(&format!("ws://127.0.0.1:{}/ws", port), tx);
        assert!(matches!(result, Err(SocketError::Handshake(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
        drop(listener);
    }

    #[test]
    fn closed_errors_map_to_closed() {
        assert!(matches!(
            SocketError::from(tungstenite::Error::ConnectionClosed),
            SocketError::Closed
        ));
    }
}

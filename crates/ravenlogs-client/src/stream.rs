use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ravenlogs_types::{ConnectionState, Error, Frame, LogRecord, Result};

pub(crate) type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handle to an open event stream
///
/// Yields decoded records in arrival order and ends once the connection is
/// closed, by either side. It cannot be restarted; call
/// [`crate::RemoteLogClient::connect`] again for a new stream.
pub struct LogStream {
    records: mpsc::UnboundedReceiver<LogRecord>,
    states: watch::Receiver<ConnectionState>,
    failure: Arc<Mutex<Option<String>>>,
}

impl LogStream {
    pub(crate) fn new(
        records: mpsc::UnboundedReceiver<LogRecord>,
        states: watch::Receiver<ConnectionState>,
        failure: Arc<Mutex<Option<String>>>,
    ) -> Self {
        Self {
            records,
            states,
            failure,
        }
    }

    /// Next record, or `None` once the stream has closed
    pub async fn next_record(&mut self) -> Option<LogRecord> {
        self.records.recv().await
    }

    /// Watch the connection lifecycle
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.states.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.states.borrow()
    }

    /// Transport error that ended the stream, if it did not close cleanly
    pub fn error(&self) -> Option<Error> {
        self.failure.lock().clone().map(Error::WebSocket)
    }
}

impl Stream for LogStream {
    type Item = LogRecord;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<LogRecord>> {
        self.get_mut().records.poll_recv(cx)
    }
}

/// Why the receive loop stopped
enum Exit {
    /// Disconnect requested, or nobody is listening any more
    Requested,
    /// Remote end closed the connection
    Remote,
    /// Transport error
    Failed,
}

/// Drive one connection until it closes: decode frames, forward records,
/// close the socket. The socket is owned here and dropped exactly once.
pub(crate) async fn receive_loop(
    socket: Socket,
    records: mpsc::UnboundedSender<LogRecord>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<ConnectionState>>,
    failure: Arc<Mutex<Option<String>>>,
) -> Result<()> {
    let (mut sink, mut source) = socket.split();

    let exit = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Exit::Requested,

            message = source.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        if !dispatch(&text, &records) {
                            break Exit::Requested;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => {
                            if !dispatch(&text, &records) {
                                break Exit::Requested;
                            }
                        }
                        Err(e) => debug!(error = %e, "Dropping non UTF-8 frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "Server closed log stream");
                        break Exit::Remote;
                    }
                    // Ping/pong are answered by tungstenite itself
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Log stream failed");
                        *failure.lock() = Some(e.to_string());
                        break Exit::Failed;
                    }
                    None => break Exit::Remote,
                }
            }
        }
    };

    let result = match exit {
        Exit::Requested => {
            state.send_replace(ConnectionState::Closing);
            close(&mut sink).await
        }
        Exit::Remote => {
            // Completes the close handshake; the peer may already be gone
            let _ = sink.close().await;
            Ok(())
        }
        Exit::Failed => Ok(()),
    };

    state.send_replace(ConnectionState::Disconnected);
    info!("Log stream disconnected");
    result
}

/// Decode one frame and forward it; returns false once the receiver is gone
fn dispatch(text: &str, records: &mpsc::UnboundedSender<LogRecord>) -> bool {
    match Frame::decode(text) {
        Ok(Frame::Heartbeat) => true,
        Ok(Frame::Record(record)) => records.send(record).is_ok(),
        Err(e) => {
            debug!(error = %e, "Dropping malformed frame");
            true
        }
    }
}

/// Send a close frame. A socket that is already closed is not an error.
async fn close<S>(sink: &mut S) -> Result<()>
where
    S: futures::Sink<Message, Error = WsError> + Unpin,
{
    match sink.close().await {
        Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
        Err(e) => {
            warn!(error = %e, "Failed to close log stream");
            Err(Error::WebSocket(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ravenlogs_types::LogLevel;

    #[test]
    fn test_dispatch_skips_heartbeat() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(dispatch(r#"{"Type":"Heartbeat"}"#, &tx));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dispatch_forwards_record() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(dispatch(
            r#"{"Level":"Warn","LoggerName":"Raven.Server","Message":"slow"}"#,
            &tx
        ));
        let record = rx.try_recv().unwrap();
        assert_eq!(record.level, LogLevel::Warn);
        assert_eq!(record.message, "slow");
    }

    #[test]
    fn test_dispatch_drops_malformed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(dispatch("{\"Level\":", &tx));
        assert!(dispatch(r#"{"Message":"no level"}"#, &tx));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dispatch_reports_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        assert!(!dispatch(r#"{"Level":"Info","LoggerName":"Raven.Server"}"#, &tx));
        assert!(dispatch(r#"{"Type":"Heartbeat"}"#, &tx));
    }
}

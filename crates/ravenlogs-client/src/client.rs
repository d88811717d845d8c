//! Remote log client
//!
//! Lifecycle: `Disconnected -> Configuring -> Connected -> (Closing) -> Disconnected`.
//! A rejected watch registration leaves the client `Disconnected` and the
//! event stream is never opened.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ravenlogs_types::{ConnectionState, Error, LogFilter, Result};

use crate::endpoint;
use crate::session::{SESSION_ID_LEN, generate_session_id};
use crate::stream::{self, LogStream};

/// The background task behind an open stream
struct ActiveStream {
    cancel: CancellationToken,
    task: JoinHandle<Result<()>>,
}

/// Client for the server's admin log watch API
///
/// Holds at most one open event stream at a time.
pub struct RemoteLogClient {
    http: reqwest::Client,

    /// Generated once per client, shared by the watch registration and stream
    session_id: String,

    /// Category and level registered with the server
    watch: RwLock<LogFilter>,

    state: Arc<watch::Sender<ConnectionState>>,

    /// Locked for the whole of `connect`, so overlapping calls fail fast
    active: tokio::sync::Mutex<Option<ActiveStream>>,
}

impl RemoteLogClient {
    /// Create a client that registers `filter` with the server
    pub fn new(filter: LogFilter) -> Self {
        Self::with_http_client(reqwest::Client::new(), filter)
    }

    pub fn with_http_client(http: reqwest::Client, filter: LogFilter) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            http,
            session_id: generate_session_id(SESSION_ID_LEN),
            watch: RwLock::new(filter),
            state: Arc::new(state),
            active: tokio::sync::Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn watch_filter(&self) -> LogFilter {
        self.watch.read().clone()
    }

    /// Change the registration used by the next `configure`/`connect`
    pub fn set_watch_filter(&self, filter: LogFilter) {
        *self.watch.write() = filter;
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch the connection lifecycle
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Register the log watch for this session with the server
    pub async fn configure(&self, server_url: &str) -> Result<()> {
        let url = endpoint::configure_url(server_url, &self.watch_filter(), &self.session_id)?;
        debug!(%url, "Registering log watch");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "Log watch registration rejected");
            let reason = status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| status.to_string());
            return Err(Error::Network(reason));
        }

        Ok(())
    }

    /// Register the watch, then open the event stream
    ///
    /// Fails with [`Error::AlreadyConnected`] while another stream is open or
    /// another `connect` is in flight.
    pub async fn connect(&self, server_url: &str) -> Result<LogStream> {
        let Ok(mut active) = self.active.try_lock() else {
            return Err(Error::AlreadyConnected);
        };
        if active.as_ref().is_some_and(|a| !a.task.is_finished()) {
            return Err(Error::AlreadyConnected);
        }
        if let Some(stale) = active.take() {
            // Stream already ended on its own; the close outcome was logged there
            let _ = stale.task.await;
        }

        let events_url = endpoint::events_url(server_url, &self.session_id)?;
        self.configure(server_url).await?;
        self.state.send_replace(ConnectionState::Configuring);

        let socket = match tokio_tungstenite::connect_async(events_url.as_str()).await {
            Ok((socket, _response)) => socket,
            Err(e) => {
                warn!(error = %e, url = %events_url, "Failed to open log stream");
                self.state.send_replace(ConnectionState::Disconnected);
                return Err(Error::WebSocket(e.to_string()));
            }
        };

        self.state.send_replace(ConnectionState::Connected);
        info!(session = %self.session_id, url = %events_url, "Log stream connected");

        let (records_tx, records_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let failure = Arc::new(Mutex::new(None));

        let task = tokio::spawn(stream::receive_loop(
            socket,
            records_tx,
            cancel.clone(),
            Arc::clone(&self.state),
            Arc::clone(&failure),
        ));
        *active = Some(ActiveStream { cancel, task });

        Ok(LogStream::new(records_rx, self.state.subscribe(), failure))
    }

    /// Close the open stream, if any
    ///
    /// The socket is released even when the close handshake fails; only that
    /// failure is reported. A stream that has already ended is not an error.
    pub async fn disconnect(&self) -> Result<()> {
        let Some(active) = self.active.lock().await.take() else {
            return Ok(());
        };

        active.cancel.cancel();
        match active.task.await {
            Ok(result) => result,
            Err(e) => {
                self.state.send_replace(ConnectionState::Disconnected);
                Err(Error::WebSocket(e.to_string()))
            }
        }
    }
}

impl Drop for RemoteLogClient {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            active.cancel.cancel();
        }
    }
}

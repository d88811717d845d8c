//! Watch session: connects the stream client, the record engine and the
//! optional log store.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use ravenlogs_client::{LogStream, RemoteLogClient};
use ravenlogs_logs::{JsonLogStore, LogEngine, LogRecord};

use crate::notify::Notifier;

pub struct WatchSession {
    client: RemoteLogClient,
    engine: LogEngine,
    store: Option<Arc<JsonLogStore>>,
    notifier: Arc<dyn Notifier>,
}

impl WatchSession {
    pub fn new(
        client: RemoteLogClient,
        engine: LogEngine,
        store: Option<Arc<JsonLogStore>>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            client,
            engine,
            store,
            notifier,
        }
    }

    /// Register the watch and open the stream; failures are also reported
    /// to the notifier
    pub async fn connect(&self, server_url: &str) -> Result<LogStream> {
        match self.client.connect(server_url).await {
            Ok(stream) => Ok(stream),
            Err(e) => {
                self.notifier.notify_error(&e.to_string());
                Err(e.into())
            }
        }
    }

    /// Feed an open stream into the engine (and the store, if any) until it
    /// ends or `shutdown` resolves, then disconnect
    pub async fn follow(&self, mut stream: LogStream, shutdown: impl Future<Output = ()>) -> Result<()> {
        let writer = self
            .store
            .as_ref()
            .map(|store| spawn_writer(Arc::clone(store), Arc::clone(&self.notifier)));

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }

                record = stream.next_record() => {
                    let Some(record) = record else {
                        if let Some(e) = stream.error() {
                            self.notifier.notify_error(&e.to_string());
                        }
                        break;
                    };

                    // Lock is released inside ingest before the record reaches the writer
                    self.engine.ingest(record.clone());
                    if let Some((tx, _)) = &writer {
                        let _ = tx.send(record);
                    }
                }
            }
        }

        if let Err(e) = self.client.disconnect().await {
            self.notifier.notify_error(&e.to_string());
        }

        if let Some((tx, handle)) = writer {
            drop(tx);
            let _ = handle.await;
        }

        info!(
            received = self.engine.len(),
            shown = self.engine.filtered_len(),
            "Watch session ended"
        );
        Ok(())
    }
}

/// Single writer task appending records to the store in arrival order, with
/// the file I/O on the blocking pool
fn spawn_writer(
    store: Arc<JsonLogStore>,
    notifier: Arc<dyn Notifier>,
) -> (mpsc::UnboundedSender<LogRecord>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<LogRecord>();

    let handle = tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            let store = Arc::clone(&store);
            match tokio::task::spawn_blocking(move || store.save_record(&record)).await {
                Ok(Ok(path)) => debug!(path = %path.display(), "Record persisted"),
                Ok(Err(e)) => notifier.notify_error(&e.to_string()),
                Err(e) => notifier.notify_error(&format!("log writer failed: {e}")),
            }
        }
    });

    (tx, handle)
}

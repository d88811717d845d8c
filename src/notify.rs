/// Sink for errors a person should see
pub trait Notifier: Send + Sync {
    fn notify_error(&self, message: &str);
}

/// Reports errors on stderr, keeping stdout for log output
pub struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn notify_error(&self, message: &str) {
        tracing::error!(%message, "Reported error");
        eprintln!("Error: {message}");
    }
}

use std::io::{self, Write};

use clap::ValueEnum;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::sync::oneshot;
use tracing::debug;

use ravenlogs_logs::{LogEngine, LogRecord, Snapshot, ViewEvent};

/// How records are written to stdout
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// `timestamp;LEVEL;database;logger;message`
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

pub fn write_record(out: &mut impl Write, record: &LogRecord, format: OutputFormat) -> io::Result<()> {
    match format {
        OutputFormat::Text => write!(out, "{record}"),
        OutputFormat::Json => {
            let line = serde_json::to_string(record).map_err(io::Error::other)?;
            writeln!(out, "{line}")
        }
    }
}

/// Prints the filtered view of an engine as it grows
///
/// `printed` is how much of the view has been written; `seen` is the view
/// position of the next `Appended` event. Events for positions already
/// printed during a resync are skipped.
struct ViewPrinter<W> {
    engine: LogEngine,
    out: W,
    format: OutputFormat,
    printed: usize,
    seen: usize,
}

impl<W: Write> ViewPrinter<W> {
    fn new(engine: LogEngine, out: W, format: OutputFormat) -> Self {
        Self {
            engine,
            out,
            format,
            printed: 0,
            seen: 0,
        }
    }

    fn appended(&mut self, record: &LogRecord) {
        if self.seen >= self.printed {
            self.write(record);
            self.printed += 1;
        }
        self.seen += 1;
    }

    /// Catch up from the engine after `skipped` events were lost
    fn lagged(&mut self, skipped: u64) {
        debug!(skipped, "Output fell behind, resynchronising");
        self.seen += usize::try_from(skipped).unwrap_or(usize::MAX);
        let snapshot = self.engine.filtered();
        for record in snapshot.iter().skip(self.printed) {
            self.write(record);
        }
        self.printed = self.printed.max(snapshot.len());
    }

    /// A rebuilt view is not reprinted; new arrivals continue after it
    fn reset(&mut self, snapshot: &Snapshot) {
        self.printed = snapshot.len();
        self.seen = snapshot.len();
    }

    fn event(&mut self, event: &ViewEvent) {
        match event {
            ViewEvent::Appended(record) => self.appended(record),
            ViewEvent::Reset(snapshot) => self.reset(snapshot),
        }
    }

    /// Handle everything already queued without waiting for more
    fn drain(&mut self, events: &mut broadcast::Receiver<ViewEvent>) {
        loop {
            match events.try_recv() {
                Ok(event) => self.event(&event),
                Err(TryRecvError::Lagged(skipped)) => self.lagged(skipped),
                Err(_) => return,
            }
        }
    }

    fn write(&mut self, record: &LogRecord) {
        // A closed stdout (e.g. piped into `head`) is not worth reporting
        let _ = write_record(&mut self.out, record, self.format);
    }
}

/// Print records as they enter the engine's filtered view. After `done`
/// fires, events already queued are still printed before returning.
///
/// `events` must be subscribed to `engine` before its first record was
/// ingested. Records missed because this observer lagged are recovered from
/// [`LogEngine::filtered`], so output stays complete and in order.
pub async fn print_events<W: Write>(
    engine: LogEngine,
    mut events: broadcast::Receiver<ViewEvent>,
    format: OutputFormat,
    mut done: oneshot::Receiver<()>,
    out: W,
) -> W {
    let mut printer = ViewPrinter::new(engine, out, format);

    loop {
        tokio::select! {
            biased;

            event = events.recv() => match event {
                Ok(event) => printer.event(&event),
                Err(RecvError::Lagged(skipped)) => printer.lagged(skipped),
                Err(RecvError::Closed) => break,
            },

            _ = &mut done => {
                printer.drain(&mut events);
                break;
            }
        }
    }

    let _ = printer.out.flush();
    printer.out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ravenlogs_logs::{LogFilter, LogLevel};

    fn record(n: usize) -> LogRecord {
        LogRecord::new(LogLevel::Info, "Raven.Server").with_message(format!("m{n}"))
    }

    fn text_of(records: impl IntoIterator<Item = LogRecord>) -> String {
        records.into_iter().map(|r| r.to_string()).collect()
    }

    #[test]
    fn test_write_text() {
        let record = LogRecord::new(LogLevel::Warn, "Raven.Server")
            .with_timestamp("t")
            .with_message("slow");
        let mut out = Vec::new();
        write_record(&mut out, &record, OutputFormat::Text).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "t;WARN;;Raven.Server;slow\n");
    }

    #[test]
    fn test_write_json_line() {
        let record = LogRecord::new(LogLevel::Info, "Raven.Server");
        let mut out = Vec::new();
        write_record(&mut out, &record, OutputFormat::Json).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with("}\n"));
        assert_eq!(text.lines().count(), 1);
        assert_eq!(LogRecord::from_json(text.trim()).unwrap(), record);
    }

    #[tokio::test]
    async fn test_print_events_in_order() {
        let engine = LogEngine::new(LogFilter::all());
        let events = engine.subscribe();
        let (done_tx, done_rx) = oneshot::channel();

        for n in 0..5 {
            engine.ingest(record(n));
        }
        done_tx.send(()).unwrap();

        let out = print_events(engine.clone(), events, OutputFormat::Text, done_rx, Vec::new()).await;
        assert_eq!(String::from_utf8(out).unwrap(), text_of((0..5).map(record)));
    }

    #[tokio::test]
    async fn test_print_events_recovers_after_lag() {
        let engine = LogEngine::new(LogFilter::new(LogLevel::Info, ""));
        let events = engine.subscribe();
        let (done_tx, done_rx) = oneshot::channel();

        // More than the event buffer holds, before the printer polls once
        for n in 0..1100 {
            engine.ingest(record(n));
            engine.ingest(LogRecord::new(LogLevel::Debug, "Raven.Server"));
        }
        done_tx.send(()).unwrap();

        let out = print_events(engine.clone(), events, OutputFormat::Text, done_rx, Vec::new()).await;
        assert_eq!(String::from_utf8(out).unwrap(), text_of((0..1100).map(record)));
    }

    #[test]
    fn test_printer_continues_after_lag() {
        let engine = LogEngine::new(LogFilter::all());
        let mut events = engine.subscribe();
        let mut printer = ViewPrinter::new(engine.clone(), Vec::new(), OutputFormat::Text);

        for n in 0..1100 {
            engine.ingest(record(n));
        }
        match events.try_recv() {
            Err(TryRecvError::Lagged(skipped)) => printer.lagged(skipped),
            other => panic!("expected lag, got {other:?}"),
        }
        assert_eq!(printer.printed, 1100);

        // Queued events for records already printed are skipped, later ones print
        engine.ingest(record(1100));
        printer.drain(&mut events);

        assert_eq!(
            String::from_utf8(printer.out).unwrap(),
            text_of((0..=1100).map(record))
        );
    }

    #[test]
    fn test_printer_skips_rebuilt_view() {
        let engine = LogEngine::new(LogFilter::all());
        let mut events = engine.subscribe();
        let mut printer = ViewPrinter::new(engine.clone(), Vec::new(), OutputFormat::Text);

        engine.ingest(record(0));
        engine.set_filter(LogFilter::new(LogLevel::Trace, "Raven."));
        engine.ingest(record(1));
        printer.drain(&mut events);

        assert_eq!(
            String::from_utf8(printer.out).unwrap(),
            text_of([record(0), record(1)])
        );
    }
}

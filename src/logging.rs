//! Log Redirector (spec.md §4.6).
//!
//! Grounded on `original_source/src/remote/remote.h`'s `remote_printLog`:
//! every log line is mirrored to the remote channel as an `l`-prefixed
//! message *and* unconditionally passed on to the original log sink — the
//! original captures `os_printf`'s function pointer and always calls it
//! after formatting the mirrored copy, so redirection never silences local
//! logging. Implemented as a `tracing_subscriber::Layer` (the teacher's
//! `main.rs` builds its subscriber with `tracing_subscriber::fmt()...init()`;
//! layering onto that, rather than replacing it, keeps local output intact
//! the same way).

use tracing::field::{Field, Visit};
use tracing::Subscriber;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::remote::{format_log_line, RemoteHandle};

/// Collects a tracing event's fields into one `"message=... key=val ..."`
/// line, the same flattening `tracing_subscriber::fmt`'s default formatter
/// does before the original's `vsnprintf` would have received a single
/// formatted C string.
#[derive(Default)]
struct LineVisitor {
    line: String,
}

impl Visit for LineVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if !self.line.is_empty() {
            self.line.push(' ');
        }
        if field.name() == "message" {
            self.line.push_str(&format!("{value:?}"));
        } else {
            self.line.push_str(&format!("{}={:?}", field.name(), value));
        }
    }
}

/// A `tracing_subscriber::Layer` that mirrors every event at or above
/// `min_level` into the remote channel, truncated to `cap` bytes
/// (`RemoteTaskConfig::message_cap`, §4.6's 128-byte buffer). Never
/// short-circuits the rest of the subscriber stack: `on_event` only
/// observes, it does not filter, so the normal `fmt` layer installed
/// alongside it still prints to stdout.
pub struct RemoteLogLayer {
    handle: RemoteHandle,
    min_level: tracing::Level,
    cap: usize,
}

impl RemoteLogLayer {
    pub fn new(handle: RemoteHandle, min_level: tracing::Level, cap: usize) -> Self {
        Self { handle, min_level, cap }
    }
}

impl<S: Subscriber> Layer<S> for RemoteLogLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if event.metadata().level() > &self.min_level {
            return;
        }
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let line = format_log_line(&visitor.line, self.cap);
        self.handle.broadcast(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tracing_subscriber::prelude::*;

    use crate::config::RemoteTaskConfig;
    use crate::remote;

    // Routed through a real `remote::spawn` task rather than hand-built —
    // `RemoteHandle` only exposes a producer API, and that's all a layer
    // needs.
    async fn handle_and_sink() -> (RemoteHandle, mpsc::Receiver<String>) {
        let (handle, _control_rx, _emergency_rx, _join) = remote::spawn(RemoteTaskConfig::default());
        let (out_tx, out_rx) = mpsc::channel(4);
        handle.try_send(remote::RemoteEvent::Connected { session: 1, outbound: out_tx });
        (handle, out_rx)
    }

    #[tokio::test]
    async fn event_is_mirrored_as_log_tagged_line() {
        let (handle, mut rx) = handle_and_sink().await;
        let _greeting = rx.recv().await.unwrap();

        let layer = RemoteLogLayer::new(handle, tracing::Level::INFO, 128);
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("sensors online");
        });

        let line = rx.recv().await.expect("log line should have been queued");
        assert!(line.starts_with('l'));
        assert!(line.contains("sensors online"));
    }

    #[tokio::test]
    async fn below_threshold_events_are_not_mirrored() {
        let (handle, mut rx) = handle_and_sink().await;
        let _greeting = rx.recv().await.unwrap();

        let layer = RemoteLogLayer::new(handle, tracing::Level::WARN, 128);
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!("too quiet to mirror");
        });
        assert!(rx.try_recv().is_err());
    }
}

//! Where finished diagnostics go.

use drover_types::{Diagnostic, DocumentUri};
use tokio::sync::mpsc;

/// Receives the complete diagnostic list for a document version.
///
/// Called while the coordinator holds its bookkeeping lock: implementations
/// must not block and must not call back into the coordinator.
pub trait DiagnosticsPublisher: Send + Sync {
    fn publish(&self, uri: &DocumentUri, version: i32, diagnostics: Vec<Diagnostic>);
}

/// One publish call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub uri: DocumentUri,
    pub version: i32,
    pub diagnostics: Vec<Diagnostic>,
}

/// Forwards publications to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<Publication>,
}

impl ChannelPublisher {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Publication>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl DiagnosticsPublisher for ChannelPublisher {
    fn publish(&self, uri: &DocumentUri, version: i32, diagnostics: Vec<Diagnostic>) {
        let publication = Publication {
            uri: uri.clone(),
            version,
            diagnostics,
        };
        if self.tx.send(publication).is_err() {
            tracing::debug!(uri = %uri, "Diagnostics receiver dropped");
        }
    }
}

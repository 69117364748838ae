//! Observer contract for connection events

use rfcomm_link_shared::LinkEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// Receives every event of the connections it was registered with.
///
/// Called from the worker task that produced the event, never concurrently
/// for the same worker. Implementations must not block; a UI marshals the
/// event onto its own thread.
pub trait Listener: Send + Sync + 'static {
    fn on_event(&self, event: LinkEvent);
}

impl Listener for mpsc::UnboundedSender<LinkEvent> {
    fn on_event(&self, event: LinkEvent) {
        if self.send(event).is_err() {
            trace!("[LINK] Listener receiver dropped");
        }
    }
}

impl<L: Listener + ?Sized> Listener for Arc<L> {
    fn on_event(&self, event: LinkEvent) {
        (**self).on_event(event)
    }
}

//! Audio-session interruption fan-out.
//!
//! The platform glue pushes [`Interruption`] events in (directly through
//! [`InterruptionBroadcaster::notify`] or as a channel via
//! [`InterruptionBroadcaster::spawn_feed`]); every registered handler runs in
//! registration order. The registry is append-only: listeners live as long as
//! the process.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::models::Interruption;

/// What a handler reports back. Failures are logged, never propagated.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Handler = Arc<dyn Fn(Interruption) -> HandlerResult + Send + Sync>;

static SHARED: Lazy<Arc<InterruptionBroadcaster>> =
    Lazy::new(|| Arc::new(InterruptionBroadcaster::new()));

#[derive(Default)]
pub struct InterruptionBroadcaster {
    handlers: Mutex<Vec<Handler>>,
}

impl InterruptionBroadcaster {
    /// A private broadcaster. Most callers want [`Self::shared`].
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide broadcaster, created on first access.
    pub fn shared() -> Arc<InterruptionBroadcaster> {
        Arc::clone(&SHARED)
    }

    pub fn add_handler<H>(&self, handler: H)
    where
        H: Fn(Interruption) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers.lock().push(Arc::new(handler));
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Run every handler in registration order. Returns how many failed.
    ///
    /// The registry lock is released before handlers run, so a handler may
    /// register further handlers; those see the next event, not this one.
    pub fn notify(&self, event: Interruption) -> usize {
        let handlers: Vec<Handler> = self.handlers.lock().clone();
        log::info!(
            "bgm: audio session interruption {:?} -> {} handler(s)",
            event,
            handlers.len()
        );

        let mut failed = 0;
        for (index, handler) in handlers.iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failed += 1;
                    log::warn!("bgm: interruption handler {} failed: {}", index, e);
                }
                Err(_) => {
                    failed += 1;
                    log::error!("bgm: interruption handler {} panicked", index);
                }
            }
        }
        failed
    }

    /// Forward events from the platform's session observer until the sender
    /// hangs up.
    pub fn spawn_feed(
        self: Arc<Self>,
        rx: Receiver<Interruption>,
    ) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("bgm-interruptions".into())
            .spawn(move || {
                for event in rx.iter() {
                    self.notify(event);
                }
                log::debug!("bgm: interruption feed closed");
            })
    }
}

//! Stop requests delivered from a signal handler to the forwarding loop.

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

/// Sending half, safe to move into a signal handler.
#[derive(Clone)]
pub struct ShutdownTrigger {
    tx: Sender<()>,
}

impl ShutdownTrigger {
    /// Requests a stop. Repeated calls are harmless.
    pub fn trigger(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Polled by the loop between iterations.
pub struct Shutdown {
    rx: Receiver<()>,
    requested: bool,
}

impl Shutdown {
    pub fn channel() -> (ShutdownTrigger, Shutdown) {
        let (tx, rx) = bounded(1);
        (ShutdownTrigger { tx }, Shutdown { rx, requested: false })
    }

    /// A shutdown that nothing can trigger.
    pub fn never() -> Shutdown {
        let (_, shutdown) = Self::channel();
        shutdown
    }

    pub fn is_requested(&mut self) -> bool {
        if !self.requested {
            match self.rx.try_recv() {
                Ok(()) => self.requested = true,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
            }
        }
        self.requested
    }
}

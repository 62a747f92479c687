//! Single-slot hand-off of status snapshots between threads
//!
//! The real-time side never waits: if the previous snapshot has not been
//! taken yet, the new one is dropped. The display side always sees the most
//! recent snapshot it managed to take.

use bicycle_core::Status;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

pub fn status_mailbox() -> (StatusPublisher, StatusSubscriber) {
    let (tx, rx) = bounded(1);
    (
        StatusPublisher { tx },
        StatusSubscriber { rx, last: None },
    )
}

#[derive(Clone)]
pub struct StatusPublisher {
    tx: Sender<Status>,
}

impl StatusPublisher {
    /// Offer a snapshot; false if the slot was still full or nobody listens
    pub fn try_publish(&self, status: Status) -> bool {
        match self.tx.try_send(status) {
            Ok(()) => true,
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => false,
        }
    }
}

pub struct StatusSubscriber {
    rx: Receiver<Status>,
    last: Option<Status>,
}

impl StatusSubscriber {
    /// Newest snapshot available, or the last one seen if nothing new came in
    pub fn latest(&mut self) -> Option<Status> {
        self.fresh();
        self.last
    }

    /// Newest snapshot published since the previous call, if any
    pub fn fresh(&mut self) -> Option<Status> {
        let mut newest = None;
        while let Ok(status) = self.rx.try_recv() {
            newest = Some(status);
        }
        if newest.is_some() {
            self.last = newest;
        }
        newest
    }
}

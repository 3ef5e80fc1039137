//! Bookkeeping for the single open session of a channel
//!
//! A run reserves the slot before it touches the OS, attaches its device handle once the medium is
//! open, and gives the slot back when its [`Reservation`] is dropped. Every reservation carries a
//! generation number, so a run which ends late can only release its own reservation and never one
//! made by a later run.
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use tokio::sync::oneshot;

struct Slot<T> {
    generation: u64,
    handle: Option<Arc<T>>,
    shutdown: oneshot::Sender<()>,
}

pub(crate) struct SessionSlot<T> {
    slot: Mutex<Option<Slot<T>>>,
    next_generation: AtomicU64,
}

/// Held by a run for as long as it owns the slot
pub(crate) struct Reservation<'a, T> {
    session: &'a SessionSlot<T>,
    generation: u64,
    /// Fires when the session is closed
    pub shutdown: oneshot::Receiver<()>,
}

impl<T> SessionSlot<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            next_generation: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Slot<T>>> {
        // Every update leaves the slot consistent
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the slot, or return None if another run holds it
    pub fn reserve(&self) -> Option<Reservation<'_, T>> {
        let mut slot = self.lock();
        if slot.is_some() {
            return None;
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *slot = Some(Slot {
            generation,
            handle: None,
            shutdown: shutdown_tx,
        });
        Some(Reservation {
            session: self,
            generation,
            shutdown: shutdown_rx,
        })
    }

    /// Free the slot, signal its run to stop, and return the device handle if one was attached
    pub fn close(&self) -> Option<Arc<T>> {
        let slot = self.lock().take()?;
        // The run may already have exited on its own
        let _ = slot.shutdown.send(());
        slot.handle
    }

    /// The attached device handle, if a session is open
    pub fn handle(&self) -> Option<Arc<T>> {
        self.lock().as_ref().and_then(|slot| slot.handle.clone())
    }

    fn release(&self, generation: u64) {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|s| s.generation == generation) {
            slot.take();
        }
    }
}

impl<T> Reservation<'_, T> {
    /// Store the open device handle
    ///
    /// Returns false, dropping the handle, if the session was closed in the meantime.
    pub fn attach(&self, handle: Arc<T>) -> bool {
        match self.session.lock().as_mut() {
            Some(slot) if slot.generation == self.generation => {
                slot.handle = Some(handle);
                true
            }
            _ => false,
        }
    }
}

impl<T> Drop for Reservation<'_, T> {
    fn drop(&mut self) {
        self.session.release(self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_is_exclusive() {
        let session = SessionSlot::<u32>::new();
        let first = session.reserve().unwrap();
        assert!(session.reserve().is_none());
        assert!(session.handle().is_none());

        assert!(first.attach(Arc::new(7)));
        assert_eq!(Some(7), session.handle().map(|h| *h));

        drop(first);
        assert!(session.handle().is_none());
        assert!(session.reserve().is_some());
    }

    #[test]
    fn test_close_signals_run() {
        let session = SessionSlot::<u32>::new();
        let mut reservation = session.reserve().unwrap();
        reservation.attach(Arc::new(3));

        assert_eq!(Some(3), session.close().map(|h| *h));
        assert!(reservation.shutdown.try_recv().is_ok());
        assert!(session.close().is_none());
        assert!(!reservation.attach(Arc::new(4)));
    }

    #[test]
    fn test_stale_release_keeps_new_session() {
        let session = SessionSlot::<u32>::new();
        let old = session.reserve().unwrap();
        session.close();

        let mut new = session.reserve().unwrap();
        assert!(!old.attach(Arc::new(1)));
        drop(old);

        assert!(new.attach(Arc::new(2)));
        assert_eq!(Some(2), session.handle().map(|h| *h));
        assert!(new.shutdown.try_recv().is_err());
    }
}

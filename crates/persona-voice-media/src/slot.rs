//! Single-holder resource slot with preemption.
//!
//! Used for the microphone and for audio playback: at most one holder at a
//! time, and a new holder cancels whoever had it before.

use std::sync::{Arc, LazyLock, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Proof of holding a slot. Its token is cancelled when someone else takes over.
#[derive(Debug, Clone)]
pub struct Lease {
    id: u64,
    token: CancellationToken,
}

impl Lease {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_preempted(&self) -> bool {
        self.token.is_cancelled()
    }
}

static MICROPHONE: LazyLock<Arc<ExclusiveSlot>> =
    LazyLock::new(|| Arc::new(ExclusiveSlot::new("microphone")));

static PLAYBACK: LazyLock<Arc<ExclusiveSlot>> =
    LazyLock::new(|| Arc::new(ExclusiveSlot::new("playback")));

#[derive(Default)]
struct SlotState {
    next_id: u64,
    holder: Option<Lease>,
}

pub struct ExclusiveSlot {
    name: &'static str,
    state: Mutex<SlotState>,
}

impl ExclusiveSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(SlotState::default()),
        }
    }

    /// The process-wide microphone slot.
    pub fn microphone() -> Arc<Self> {
        MICROPHONE.clone()
    }

    /// The process-wide playback slot.
    pub fn playback() -> Arc<Self> {
        PLAYBACK.clone()
    }

    /// Take the slot, cancelling the current holder if there is one.
    pub fn acquire(&self) -> Lease {
        let mut state = self.lock();
        if let Some(previous) = state.holder.take() {
            debug!(slot = self.name, lease = previous.id, "Preempting holder");
            previous.token.cancel();
        }
        state.next_id += 1;
        let lease = Lease {
            id: state.next_id,
            token: CancellationToken::new(),
        };
        state.holder = Some(lease.clone());
        lease
    }

    /// Give the slot back. A no-op if the lease was already preempted.
    pub fn release(&self, lease: &Lease) {
        let mut state = self.lock();
        if state.holder.as_ref().is_some_and(|h| h.id == lease.id) {
            state.holder = None;
        }
    }

    /// Cancel `lease` and empty the slot, if `lease` still holds it.
    pub fn revoke(&self, lease: &Lease) -> bool {
        let mut state = self.lock();
        if state.holder.as_ref().is_some_and(|h| h.id == lease.id) {
            state.holder = None;
            lease.token.cancel();
            debug!(slot = self.name, lease = lease.id, "Lease revoked");
            true
        } else {
            false
        }
    }

    /// Cancel the current holder and leave the slot empty.
    pub fn preempt(&self) {
        if let Some(holder) = self.lock().holder.take() {
            holder.token.cancel();
        }
    }

    pub fn is_held(&self) -> bool {
        self.lock().holder.is_some()
    }

    pub fn is_held_by(&self, lease: &Lease) -> bool {
        self.lock().holder.as_ref().is_some_and(|h| h.id == lease.id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotState> {
        // The state is a plain value; a poisoned lock still holds a usable one.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_preempts_previous() {
        let slot = ExclusiveSlot::new("test");
        let first = slot.acquire();
        let second = slot.acquire();

        assert!(first.is_preempted());
        assert!(!second.is_preempted());
        assert!(slot.is_held_by(&second));
        assert!(!slot.is_held_by(&first));
    }

    #[test]
    fn test_stale_release_keeps_new_holder() {
        let slot = ExclusiveSlot::new("test");
        let first = slot.acquire();
        let second = slot.acquire();

        slot.release(&first);
        assert!(slot.is_held_by(&second));

        slot.release(&second);
        assert!(!slot.is_held());
    }

    #[test]
    fn test_preempt_empties_slot() {
        let slot = ExclusiveSlot::new("test");
        let lease = slot.acquire();
        slot.preempt();
        assert!(lease.is_preempted());
        assert!(!slot.is_held());
    }

    #[test]
    fn test_revoke_only_current_holder() {
        let slot = ExclusiveSlot::new("test");
        let first = slot.acquire();
        let second = slot.acquire();

        assert!(!slot.revoke(&first));
        assert!(slot.is_held_by(&second));

        assert!(slot.revoke(&second));
        assert!(second.is_preempted());
        assert!(!slot.is_held());
    }

    #[test]
    fn test_process_wide_slots_are_shared() {
        assert!(Arc::ptr_eq(&ExclusiveSlot::microphone(), &ExclusiveSlot::microphone()));
        assert!(!Arc::ptr_eq(&ExclusiveSlot::microphone(), &ExclusiveSlot::playback()));
    }
}

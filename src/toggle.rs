/*!
Toggle guards and the identity-keyed toggle registry.

ToggleGuard
  A compare-and-swap flag. `try_claim` hands out an RAII claim that releases
  the flag when dropped, so a claim moved into a spawned body is released on
  every exit path of that body.

ToggleRegistry
  identity -> live toggle command. `get_or_create` returns the stored instance
  while its start slot is claimed and replaces it otherwise. A background
  sweep drops idle entries every `SWEEP_INTERVAL`; it only holds a weak
  reference and ends once the registry is dropped.
*/

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::command::ToggleCommand;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
pub struct ToggleGuard {
    claimed: AtomicBool,
}

impl ToggleGuard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// false -> true; `None` when already claimed.
    pub fn try_claim(self: &Arc<Self>) -> Option<GuardClaim> {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GuardClaim {
                guard: Arc::clone(self),
            })
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct GuardClaim {
    guard: Arc<ToggleGuard>,
}

impl Drop for GuardClaim {
    fn drop(&mut self) {
        self.guard.claimed.store(false, Ordering::Release);
    }
}

#[derive(Default)]
pub struct ToggleRegistry {
    entries: DashMap<String, Arc<dyn ToggleCommand>>,
}

impl ToggleRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registry with the periodic sweep running when a tokio runtime is available.
    pub fn with_sweeper(interval: Duration) -> Arc<Self> {
        let registry = Self::new();
        Self::start_sweeper(&registry, interval);
        registry
    }

    pub fn start_sweeper(this: &Arc<Self>, interval: Duration) {
        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            debug!("no tokio runtime; toggle registry sweep disabled");
            return;
        };
        let weak: Weak<Self> = Arc::downgrade(this);
        rt.spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await;
            loop {
                tick.tick().await;
                let Some(registry) = weak.upgrade() else {
                    break;
                };
                let removed = registry.sweep();
                if removed > 0 {
                    debug!(removed, "toggle registry sweep");
                }
            }
        });
    }

    pub fn get_or_create<F>(&self, identity: &str, create: F) -> Arc<dyn ToggleCommand>
    where
        F: FnOnce() -> Arc<dyn ToggleCommand>,
    {
        match self.entries.entry(identity.to_string()) {
            Entry::Occupied(mut e) => {
                if e.get().is_busy() {
                    return Arc::clone(e.get());
                }
                let fresh = create();
                e.insert(Arc::clone(&fresh));
                fresh
            }
            Entry::Vacant(v) => {
                let fresh = create();
                v.insert(Arc::clone(&fresh));
                fresh
            }
        }
    }

    pub fn get(&self, identity: &str) -> Option<Arc<dyn ToggleCommand>> {
        self.entries.get(identity).map(|e| Arc::clone(e.value()))
    }

    /// Remove every idle entry; returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, cmd| cmd.is_busy());
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Identities whose command is currently running.
    pub fn running(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().is_running())
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }
}

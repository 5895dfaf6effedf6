//! Collapses concurrent upstream calls for the same key into one.
//!
//! The first caller for a key starts the call; everyone arriving while it is
//! running awaits the same shared future. The entry is removed as soon as any
//! waiter observes the result, or when every waiter has been dropped, so a
//! finished, failed, timed-out or abandoned call never blocks later retries.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use log::debug;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

struct Slot<V> {
    id: u64,
    call: Shared<BoxFuture<'static, V>>,
    waiters: usize,
}

struct Registry<K, V> {
    next_id: u64,
    slots: HashMap<K, Slot<V>>,
}

pub struct InFlight<K, V> {
    registry: Mutex<Registry<K, V>>,
}

impl<K, V> Default for InFlight<K, V> {
    fn default() -> Self {
        Self {
            registry: Mutex::new(Registry {
                next_id: 0,
                slots: HashMap::new(),
            }),
        }
    }
}

impl<K, V> InFlight<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with a call currently in flight.
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Awaits the in-flight call for `key`, starting it with `start` if none
    /// is running.
    pub async fn run<F, Fut>(&self, key: K, start: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        self.join_or_run(key, |_| false, start).await
    }

    /// Like [`run`](Self::run), but when nothing is running for `key` itself
    /// the caller joins any running call whose key satisfies `accept`.
    pub async fn join_or_run<A, F, Fut>(&self, key: K, accept: A, start: F) -> V
    where
        A: Fn(&K) -> bool,
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let (key, id, call) = {
            let mut registry = self.lock();
            let existing = if registry.slots.contains_key(&key) {
                Some(key.clone())
            } else {
                registry.slots.keys().find(|other| accept(other)).cloned()
            };
            let joined = existing.and_then(|existing| {
                let slot = registry.slots.get_mut(&existing)?;
                slot.waiters += 1;
                Some((existing, slot.id, slot.call.clone()))
            });
            match joined {
                Some(joined) => {
                    debug!("Joining in-flight call for {:?} from {:?}", joined.0, key);
                    joined
                }
                None => {
                    registry.next_id += 1;
                    let id = registry.next_id;
                    let call = start().boxed().shared();
                    registry.slots.insert(
                        key.clone(),
                        Slot {
                            id,
                            call: call.clone(),
                            waiters: 1,
                        },
                    );
                    (key, id, call)
                }
            }
        };

        // The guard tracks the slot actually awaited, which may belong to
        // another key.
        let mut waiter = Waiter {
            owner: self,
            key,
            id,
            completed: false,
        };
        let result = call.await;
        waiter.completed = true;
        result
    }

    fn lock(&self) -> MutexGuard<'_, Registry<K, V>> {
        // Critical sections never panic midway, so a poisoned map is still consistent.
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Waiter<'a, K, V>
where
    K: Eq + Hash,
{
    owner: &'a InFlight<K, V>,
    key: K,
    id: u64,
    completed: bool,
}

impl<K, V> Drop for Waiter<'_, K, V>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        let mut registry = self
            .owner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(slot) = registry.slots.get_mut(&self.key) else {
            return;
        };
        if slot.id != self.id {
            return;
        }
        slot.waiters = slot.waiters.saturating_sub(1);
        if self.completed || slot.waiters == 0 {
            registry.slots.remove(&self.key);
        }
    }
}

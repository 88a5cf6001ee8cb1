use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use ridesync_protocol::{normalize_document, CanonicalStatus, StatusChangeEvent};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::storage::{ListenerGuard, Snapshot, TripStore};

/// Callback invoked for every status change of a subscribed trip.
pub type StatusCallback = Arc<dyn Fn(&StatusChangeEvent) + Send + Sync>;

/// One live upstream listener and the subscribers sharing it.
struct TripListener {
    subscribers: Vec<(Uuid, StatusCallback)>,
    guard: Option<ListenerGuard>,
    task: Option<JoinHandle<()>>,
    /// Distinguishes this listener from earlier ones on the same trip so
    /// snapshots already queued for a torn-down listener are discarded.
    generation: u64,
}

impl TripListener {
    fn is_live(&self) -> bool {
        self.guard.is_some()
    }

    fn teardown(mut self) {
        self.guard.take();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[derive(Default)]
struct RegistryState {
    trips: HashMap<String, TripListener>,
    /// Last canonical status per trip. Survives listener teardown.
    last_status: HashMap<String, CanonicalStatus>,
    next_generation: u64,
}

impl RegistryState {
    /// Fold one snapshot into the cache; returns the event to fan out, if any.
    fn apply(
        &mut self,
        trip_id: &str,
        generation: u64,
        snapshot: Snapshot,
    ) -> Option<(StatusChangeEvent, Vec<StatusCallback>)> {
        let entry = self
            .trips
            .get(trip_id)
            .filter(|entry| entry.generation == generation)?;
        let callbacks: Vec<StatusCallback> = entry
            .subscribers
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        let previous = self.last_status.get(trip_id).copied();

        let event = match snapshot {
            Ok(Some(doc)) => {
                let status = normalize_document(&doc);
                self.last_status.insert(trip_id.to_string(), status);
                if previous == Some(status) {
                    return None;
                }
                StatusChangeEvent::new(trip_id, previous, status, Some(Value::Object(doc)))
            }
            Ok(None) => {
                self.last_status.remove(trip_id);
                if previous == Some(CanonicalStatus::Unknown) {
                    return None;
                }
                StatusChangeEvent::new(trip_id, previous, CanonicalStatus::Unknown, None)
            }
            Err(err) => {
                tracing::warn!(%trip_id, error = %err, "trip listener error");
                self.last_status
                    .insert(trip_id.to_string(), CanonicalStatus::Unknown);
                StatusChangeEvent::listener_error(trip_id, previous, err.to_string())
            }
        };

        Some((event, callbacks))
    }
}

/// Keeps one realtime listener per trip and fans status changes out to
/// every subscriber of that trip.
///
/// Changes are de-duplicated against the last known canonical status, so
/// subscribers only hear about real transitions. Cheap to clone; clones
/// share state. Subscribing spawns onto the current Tokio runtime.
#[derive(Clone)]
pub struct StatusRegistry {
    store: Arc<dyn TripStore>,
    collection: Arc<str>,
    state: Arc<Mutex<RegistryState>>,
}

impl StatusRegistry {
    pub fn new(store: Arc<dyn TripStore>, collection: impl Into<String>) -> Self {
        let collection: String = collection.into();
        Self {
            store,
            collection: collection.into(),
            state: Arc::new(Mutex::new(RegistryState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `callback` for status changes of `trip_id`.
    ///
    /// The first subscriber opens the upstream listener; later subscribers
    /// share it. If the listener cannot be opened, the subscriber still
    /// registers and receives an `unknown` event; the next subscribe on the
    /// same trip retries.
    pub fn subscribe<F>(&self, trip_id: &str, callback: F) -> Subscription
    where
        F: Fn(&StatusChangeEvent) + Send + Sync + 'static,
    {
        let subscriber_id = Uuid::new_v4();
        let callback: StatusCallback = Arc::new(callback);

        let failure = {
            let mut state = self.state();
            let needs_listener = match state.trips.get_mut(trip_id) {
                Some(entry) => {
                    entry.subscribers.push((subscriber_id, callback.clone()));
                    !entry.is_live()
                }
                None => {
                    state.trips.insert(
                        trip_id.to_string(),
                        TripListener {
                            subscribers: vec![(subscriber_id, callback.clone())],
                            guard: None,
                            task: None,
                            generation: 0,
                        },
                    );
                    true
                }
            };

            if needs_listener {
                self.open_listener(&mut state, trip_id)
            } else {
                None
            }
        };

        if let Some(event) = failure {
            callback(&event);
        }

        Subscription {
            registry: self.clone(),
            trip_id: trip_id.to_string(),
            subscriber_id,
        }
    }

    /// Open the upstream listener for an already-registered trip entry.
    ///
    /// Returns the synthesized event for the subscriber when it fails.
    fn open_listener(
        &self,
        state: &mut RegistryState,
        trip_id: &str,
    ) -> Option<StatusChangeEvent> {
        let generation = state.next_generation;
        state.next_generation += 1;

        match self.store.listen(&self.collection, trip_id) {
            Ok(listener) => {
                let (rx, guard) = listener.into_parts();
                let task = tokio::spawn(forward_snapshots(
                    Arc::downgrade(&self.state),
                    trip_id.to_string(),
                    generation,
                    rx,
                ));
                if let Some(entry) = state.trips.get_mut(trip_id) {
                    entry.guard = Some(guard);
                    entry.task = Some(task);
                    entry.generation = generation;
                }
                tracing::debug!(%trip_id, generation, "trip listener opened");
                None
            }
            Err(err) => {
                tracing::warn!(%trip_id, error = %err, "failed to open trip listener");
                let previous = state.last_status.get(trip_id).copied();
                state
                    .last_status
                    .insert(trip_id.to_string(), CanonicalStatus::Unknown);
                Some(StatusChangeEvent::listener_error(
                    trip_id,
                    previous,
                    err.to_string(),
                ))
            }
        }
    }

    fn detach(&self, trip_id: &str, subscriber_id: Uuid) -> bool {
        let mut state = self.state();
        let Some(entry) = state.trips.get_mut(trip_id) else {
            return false;
        };
        let before = entry.subscribers.len();
        entry.subscribers.retain(|(id, _)| *id != subscriber_id);
        let removed = entry.subscribers.len() < before;

        if entry.subscribers.is_empty() {
            if let Some(entry) = state.trips.remove(trip_id) {
                entry.teardown();
                tracing::debug!(%trip_id, "trip listener closed");
            }
        }
        removed
    }

    /// Detach every subscriber of one trip and close its listener.
    ///
    /// The cached status is kept. Returns the number of detached subscribers.
    pub fn stop_listening(&self, trip_id: &str) -> usize {
        let mut state = self.state();
        match state.trips.remove(trip_id) {
            Some(entry) => {
                let count = entry.subscribers.len();
                entry.teardown();
                tracing::debug!(%trip_id, subscribers = count, "trip listener stopped");
                count
            }
            None => 0,
        }
    }

    /// Close every listener and forget every cached status.
    pub fn stop_all_listening(&self) {
        let mut state = self.state();
        let trips: Vec<(String, TripListener)> = state.trips.drain().collect();
        state.last_status.clear();
        let count = trips.len();
        for (_, entry) in trips {
            entry.teardown();
        }
        tracing::debug!(listeners = count, "all trip listeners stopped");
    }

    /// Cached status of a trip, or a one-time fetch when nothing is cached.
    ///
    /// Never fails: a missing document or a fetch error yields `unknown`
    /// (and is not cached).
    pub fn current_status(&self, trip_id: &str) -> CanonicalStatus {
        if let Some(status) = self.cached_status(trip_id) {
            return status;
        }

        match self.store.get(&self.collection, trip_id) {
            Ok(Some(doc)) => {
                let status = normalize_document(&doc);
                self.state()
                    .last_status
                    .entry(trip_id.to_string())
                    .or_insert(status);
                status
            }
            Ok(None) => CanonicalStatus::Unknown,
            Err(err) => {
                tracing::warn!(%trip_id, error = %err, "failed to fetch trip status");
                CanonicalStatus::Unknown
            }
        }
    }

    /// Status for a one-off read that must reflect the store.
    ///
    /// With a live listener the cache is current and is returned as is.
    /// Otherwise the document is fetched and the cache brought in line with
    /// it; a missing document drops the cached entry. A fetch error falls
    /// back to the cached status, else `unknown`.
    pub fn refresh_status(&self, trip_id: &str) -> CanonicalStatus {
        if self.is_listening(trip_id) {
            return self.current_status(trip_id);
        }

        let fetched = self.store.get(&self.collection, trip_id);
        let mut state = self.state();
        let listening = state.trips.get(trip_id).is_some_and(TripListener::is_live);
        match fetched {
            // A listener attached during the fetch owns the cache now.
            _ if listening => state
                .last_status
                .get(trip_id)
                .copied()
                .unwrap_or(CanonicalStatus::Unknown),
            Ok(Some(doc)) => {
                let status = normalize_document(&doc);
                state.last_status.insert(trip_id.to_string(), status);
                status
            }
            Ok(None) => {
                state.last_status.remove(trip_id);
                CanonicalStatus::Unknown
            }
            Err(err) => {
                tracing::warn!(%trip_id, error = %err, "failed to refresh trip status");
                state
                    .last_status
                    .get(trip_id)
                    .copied()
                    .unwrap_or(CanonicalStatus::Unknown)
            }
        }
    }

    pub fn cached_status(&self, trip_id: &str) -> Option<CanonicalStatus> {
        self.state().last_status.get(trip_id).copied()
    }

    pub fn subscriber_count(&self, trip_id: &str) -> usize {
        self.state()
            .trips
            .get(trip_id)
            .map(|entry| entry.subscribers.len())
            .unwrap_or(0)
    }

    pub fn is_listening(&self, trip_id: &str) -> bool {
        self.state()
            .trips
            .get(trip_id)
            .is_some_and(TripListener::is_live)
    }

    /// Trips with a live upstream listener.
    pub fn listening_trips(&self) -> Vec<String> {
        let mut trips: Vec<String> = self
            .state()
            .trips
            .iter()
            .filter(|(_, entry)| entry.is_live())
            .map(|(trip_id, _)| trip_id.clone())
            .collect();
        trips.sort();
        trips
    }
}

/// Drain one trip's snapshots in store order and fan out the changes.
///
/// Callbacks run without the registry lock held.
async fn forward_snapshots(
    state: Weak<Mutex<RegistryState>>,
    trip_id: String,
    generation: u64,
    mut rx: mpsc::UnboundedReceiver<Snapshot>,
) {
    while let Some(snapshot) = rx.recv().await {
        let Some(state) = state.upgrade() else {
            break;
        };
        let outcome = {
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            state.apply(&trip_id, generation, snapshot)
        };
        if let Some((event, callbacks)) = outcome {
            tracing::debug!(
                %trip_id,
                previous = ?event.previous,
                status = %event.status,
                subscribers = callbacks.len(),
                "trip status changed"
            );
            for callback in callbacks {
                callback(&event);
            }
        }
    }
    tracing::debug!(%trip_id, generation, "trip listener drained");
}

/// Detach handle returned by [`StatusRegistry::subscribe`].
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`].
#[must_use = "keep the handle to unsubscribe later"]
pub struct Subscription {
    registry: StatusRegistry,
    trip_id: String,
    subscriber_id: Uuid,
}

impl Subscription {
    pub fn trip_id(&self) -> &str {
        &self.trip_id
    }

    pub fn id(&self) -> Uuid {
        self.subscriber_id
    }

    /// Remove this subscriber. The trip's listener closes with its last
    /// subscriber. Returns false if it was already detached.
    pub fn unsubscribe(self) -> bool {
        self.registry.detach(&self.trip_id, self.subscriber_id)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("trip_id", &self.trip_id)
            .field("subscriber_id", &self.subscriber_id)
            .finish()
    }
}

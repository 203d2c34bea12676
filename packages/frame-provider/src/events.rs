//! Event fan-out for server-initiated notifications.
//!
//! The parent pushes a fixed set of notifications. Each is mapped to a typed
//! [`ProviderEvent`] and handed to every listener registered for its
//! [`EventName`], synchronously and in registration order.
//!
//! # Listener Isolation
//!
//! Listeners run outside the registry lock, each inside `catch_unwind`. A
//! panicking listener is logged and skipped; the listeners after it still
//! run, and a listener may register or remove listeners while being called.
//!
//! # Example
//!
//! ```ignore
//! use frame_provider::{EventEmitter, EventName, ProviderEvent};
//!
//! let emitter = EventEmitter::new();
//! let id = emitter.on(EventName::AccountsChanged, |event| {
//!     if let ProviderEvent::AccountsChanged(accounts) = event {
//!         println!("accounts now {accounts:?}");
//!     }
//! });
//!
//! emitter.emit(&ProviderEvent::AccountsChanged(vec!["0xabc".into()]));
//! emitter.off(EventName::AccountsChanged, id);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tracing::{error, warn};

// =============================================================================
// Event Names
// =============================================================================

/// The closed set of events a provider emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventName {
    Connect,
    Close,
    Notification,
    ChainChanged,
    NetworkChanged,
    AccountsChanged,
}

impl EventName {
    /// All event names, in declaration order.
    pub const ALL: [EventName; 6] = [
        EventName::Connect,
        EventName::Close,
        EventName::Notification,
        EventName::ChainChanged,
        EventName::NetworkChanged,
        EventName::AccountsChanged,
    ];

    /// The notification method name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::Connect => "connect",
            EventName::Close => "close",
            EventName::Notification => "notification",
            EventName::ChainChanged => "chainChanged",
            EventName::NetworkChanged => "networkChanged",
            EventName::AccountsChanged => "accountsChanged",
        }
    }

    /// Look up the event for a notification method name.
    pub fn from_method(method: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|name| name.as_str() == method)
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Typed Events
// =============================================================================

/// A notification from the parent, decoded to its event signature.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// The parent is ready to serve requests.
    Connect,
    /// The parent closed the connection.
    Close { code: i64, reason: String },
    /// Generic subscription notification.
    Notification(Value),
    /// The active chain changed.
    ChainChanged(String),
    /// The active network changed.
    NetworkChanged(String),
    /// The exposed accounts changed.
    AccountsChanged(Vec<String>),
}

impl ProviderEvent {
    /// The name listeners subscribe under.
    pub fn name(&self) -> EventName {
        match self {
            ProviderEvent::Connect => EventName::Connect,
            ProviderEvent::Close { .. } => EventName::Close,
            ProviderEvent::Notification(_) => EventName::Notification,
            ProviderEvent::ChainChanged(_) => EventName::ChainChanged,
            ProviderEvent::NetworkChanged(_) => EventName::NetworkChanged,
            ProviderEvent::AccountsChanged(_) => EventName::AccountsChanged,
        }
    }

    /// Decode the positional params of a notification.
    ///
    /// Returns `None` when the params do not fit the event's signature.
    ///
    /// | method           | params                    |
    /// |------------------|---------------------------|
    /// | `connect`        | ignored                   |
    /// | `close`          | `[code, reason]`          |
    /// | `notification`   | `{result}`, `[payload]` or any value |
    /// | `chainChanged`   | `[chainId]`               |
    /// | `networkChanged` | `[networkId]`             |
    /// | `accountsChanged`| `[[address, ...]]`        |
    pub fn from_params(name: EventName, params: Option<&Value>) -> Option<Self> {
        let first = || params.and_then(|p| p.get(0));
        match name {
            EventName::Connect => Some(ProviderEvent::Connect),
            EventName::Close => {
                let code = first()?.as_i64()?;
                let reason = params?.get(1)?.as_str()?.to_string();
                Some(ProviderEvent::Close { code, reason })
            }
            EventName::Notification => {
                let payload = match params {
                    Some(Value::Object(obj)) if obj.contains_key("result") => obj["result"].clone(),
                    Some(Value::Array(items)) => items.first().cloned().unwrap_or(Value::Null),
                    Some(other) => other.clone(),
                    None => Value::Null,
                };
                Some(ProviderEvent::Notification(payload))
            }
            EventName::ChainChanged => {
                Some(ProviderEvent::ChainChanged(first()?.as_str()?.to_string()))
            }
            EventName::NetworkChanged => {
                Some(ProviderEvent::NetworkChanged(first()?.as_str()?.to_string()))
            }
            EventName::AccountsChanged => {
                let accounts = first()?
                    .as_array()?
                    .iter()
                    .map(|a| a.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()?;
                Some(ProviderEvent::AccountsChanged(accounts))
            }
        }
    }
}

// =============================================================================
// Emitter
// =============================================================================

/// Handle returned by [`EventEmitter::on`], used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// A registered event listener.
pub type Listener = Arc<dyn Fn(&ProviderEvent) + Send + Sync>;

#[derive(Clone)]
struct Registered {
    listener: Listener,
    once: bool,
}

/// Tombstones allowed to pile up before a list is compacted.
const COMPACT_THRESHOLD: usize = 8;

/// Listeners for one event name, in registration order.
///
/// Removal leaves a tombstone in `slots` so `on` and `off` stay O(1); the
/// list is compacted once tombstones outnumber live listeners.
#[derive(Default)]
struct ListenerList {
    slots: Vec<Option<(ListenerId, Registered)>>,
    index: HashMap<ListenerId, usize>,
}

impl ListenerList {
    fn push(&mut self, id: ListenerId, registered: Registered) {
        self.index.insert(id, self.slots.len());
        self.slots.push(Some((id, registered)));
    }

    fn remove(&mut self, id: ListenerId) -> bool {
        let Some(slot) = self.index.remove(&id) else {
            return false;
        };
        self.slots[slot] = None;
        self.maybe_compact();
        true
    }

    fn live(&self) -> impl Iterator<Item = &(ListenerId, Registered)> {
        self.slots.iter().flatten()
    }

    /// Remove every one-shot listener.
    fn drop_once(&mut self) {
        for slot in &mut self.slots {
            if matches!(slot, Some((_, registered)) if registered.once) {
                if let Some((id, _)) = slot.take() {
                    self.index.remove(&id);
                }
            }
        }
        self.maybe_compact();
    }

    fn maybe_compact(&mut self) {
        let tombstones = self.slots.len() - self.index.len();
        if tombstones < COMPACT_THRESHOLD || tombstones <= self.index.len() {
            return;
        }
        self.slots.retain(Option::is_some);
        for (position, (id, _)) in self.slots.iter().flatten().enumerate() {
            self.index.insert(*id, position);
        }
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// Multi-listener emitter over [`EventName`].
///
/// `on` and `off` are O(1) amortized and each event keeps its listeners in
/// registration order.
#[derive(Default)]
pub struct EventEmitter {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<EventName, ListenerList>>,
}

impl EventEmitter {
    /// Create an emitter with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<EventName, ListenerList>> {
        match self.listeners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("listener registry mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn add(&self, name: EventName, listener: Listener, once: bool) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.registry()
            .entry(name)
            .or_default()
            .push(id, Registered { listener, once });
        id
    }

    /// Register a listener for `name`.
    pub fn on<F>(&self, name: EventName, listener: F) -> ListenerId
    where
        F: Fn(&ProviderEvent) + Send + Sync + 'static,
    {
        self.add(name, Arc::new(listener), false)
    }

    /// Register a listener that is removed after its first invocation.
    pub fn once<F>(&self, name: EventName, listener: F) -> ListenerId
    where
        F: Fn(&ProviderEvent) + Send + Sync + 'static,
    {
        self.add(name, Arc::new(listener), true)
    }

    /// Remove a listener. Returns `false` if it was not registered under `name`.
    pub fn off(&self, name: EventName, id: ListenerId) -> bool {
        let mut registry = self.registry();
        let Some(listeners) = registry.get_mut(&name) else {
            return false;
        };
        let removed = listeners.remove(id);
        if listeners.is_empty() {
            registry.remove(&name);
        }
        removed
    }

    /// Remove every listener for `name`, or for all events when `None`.
    pub fn remove_all_listeners(&self, name: Option<EventName>) {
        let mut registry = self.registry();
        match name {
            Some(name) => {
                registry.remove(&name);
            }
            None => registry.clear(),
        }
    }

    /// Number of listeners registered for `name`.
    pub fn listener_count(&self, name: EventName) -> usize {
        self.registry().get(&name).map(ListenerList::len).unwrap_or(0)
    }

    /// Invoke every listener registered for the event's name.
    ///
    /// Returns the number of listeners that ran to completion.
    pub fn emit(&self, event: &ProviderEvent) -> usize {
        let name = event.name();

        // Snapshot under the lock, drop one-shot listeners, call unlocked.
        let snapshot: Vec<(ListenerId, Listener)> = {
            let mut registry = self.registry();
            let Some(listeners) = registry.get_mut(&name) else {
                return 0;
            };
            let snapshot = listeners
                .live()
                .map(|(id, reg)| (*id, reg.listener.clone()))
                .collect();
            listeners.drop_once();
            if listeners.is_empty() {
                registry.remove(&name);
            }
            snapshot
        };

        let mut completed = 0;
        for (id, listener) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => completed += 1,
                Err(panic_info) => {
                    let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                        (*s).to_string()
                    } else if let Some(s) = panic_info.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "unknown panic".to_string()
                    };
                    error!(
                        event = %name,
                        listener = id.0,
                        panic = %panic_msg,
                        "event listener panicked"
                    );
                }
            }
        }
        completed
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: BTreeMap<EventName, usize> = self
            .registry()
            .iter()
            .map(|(name, listeners)| (*name, listeners.len()))
            .collect();
        f.debug_struct("EventEmitter")
            .field("listeners", &counts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    fn recorder() -> (Arc<StdMutex<Vec<String>>>, impl Fn(&str) -> Listener) {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let make = {
            let log = log.clone();
            move |tag: &str| -> Listener {
                let log = log.clone();
                let tag = tag.to_string();
                Arc::new(move |_event: &ProviderEvent| log.lock().unwrap().push(tag.clone()))
            }
        };
        (log, make)
    }

    #[test]
    fn test_event_name_round_trip() {
        for name in EventName::ALL {
            assert_eq!(EventName::from_method(name.as_str()), Some(name));
        }
        assert_eq!(EventName::from_method("eth_subscription"), None);
        assert_eq!(EventName::from_method("AccountsChanged"), None);
    }

    #[test]
    fn test_from_params_accounts_changed() {
        let event =
            ProviderEvent::from_params(EventName::AccountsChanged, Some(&json!([["0xabc"]])));
        assert_eq!(
            event,
            Some(ProviderEvent::AccountsChanged(vec!["0xabc".to_string()]))
        );
    }

    #[test]
    fn test_from_params_accounts_changed_rejects_non_strings() {
        assert_eq!(
            ProviderEvent::from_params(EventName::AccountsChanged, Some(&json!([["0xabc", 1]]))),
            None
        );
        assert_eq!(
            ProviderEvent::from_params(EventName::AccountsChanged, Some(&json!(["0xabc"]))),
            None
        );
        assert_eq!(ProviderEvent::from_params(EventName::AccountsChanged, None), None);
    }

    #[test]
    fn test_from_params_close() {
        assert_eq!(
            ProviderEvent::from_params(EventName::Close, Some(&json!([1000, "bye"]))),
            Some(ProviderEvent::Close {
                code: 1000,
                reason: "bye".into()
            })
        );
        assert_eq!(
            ProviderEvent::from_params(EventName::Close, Some(&json!([1000]))),
            None
        );
    }

    #[test]
    fn test_from_params_chain_and_network() {
        assert_eq!(
            ProviderEvent::from_params(EventName::ChainChanged, Some(&json!(["0x1"]))),
            Some(ProviderEvent::ChainChanged("0x1".into()))
        );
        assert_eq!(
            ProviderEvent::from_params(EventName::NetworkChanged, Some(&json!(["1"]))),
            Some(ProviderEvent::NetworkChanged("1".into()))
        );
        assert_eq!(
            ProviderEvent::from_params(EventName::NetworkChanged, Some(&json!([1]))),
            None
        );
    }

    #[test]
    fn test_from_params_connect_ignores_params() {
        assert_eq!(
            ProviderEvent::from_params(EventName::Connect, None),
            Some(ProviderEvent::Connect)
        );
        assert_eq!(
            ProviderEvent::from_params(EventName::Connect, Some(&json!("whatever"))),
            Some(ProviderEvent::Connect)
        );
    }

    #[test]
    fn test_from_params_notification_payload() {
        assert_eq!(
            ProviderEvent::from_params(
                EventName::Notification,
                Some(&json!({"subscription": "0x1", "result": {"n": 1}}))
            ),
            Some(ProviderEvent::Notification(json!({"n": 1})))
        );
        assert_eq!(
            ProviderEvent::from_params(EventName::Notification, Some(&json!([{"n": 2}]))),
            Some(ProviderEvent::Notification(json!({"n": 2})))
        );
        assert_eq!(
            ProviderEvent::from_params(EventName::Notification, Some(&json!("raw"))),
            Some(ProviderEvent::Notification(json!("raw")))
        );
    }

    #[test]
    fn test_emit_in_registration_order() {
        let emitter = EventEmitter::new();
        let (log, make) = recorder();
        emitter.add(EventName::AccountsChanged, make("first"), false);
        emitter.add(EventName::AccountsChanged, make("second"), false);
        emitter.add(EventName::AccountsChanged, make("third"), false);

        let ran = emitter.emit(&ProviderEvent::AccountsChanged(vec![]));
        assert_eq!(ran, 3);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_emit_only_reaches_matching_name() {
        let emitter = EventEmitter::new();
        let (log, make) = recorder();
        emitter.add(EventName::ChainChanged, make("chain"), false);
        emitter.add(EventName::Connect, make("connect"), false);

        emitter.emit(&ProviderEvent::Connect);
        assert_eq!(*log.lock().unwrap(), vec!["connect"]);
    }

    #[test]
    fn test_listener_stays_until_removed() {
        let emitter = EventEmitter::new();
        let (log, make) = recorder();
        let id = emitter.add(EventName::Connect, make("l"), false);

        emitter.emit(&ProviderEvent::Connect);
        emitter.emit(&ProviderEvent::Connect);
        assert!(emitter.off(EventName::Connect, id));
        assert!(!emitter.off(EventName::Connect, id));
        emitter.emit(&ProviderEvent::Connect);

        assert_eq!(log.lock().unwrap().len(), 2);
        assert_eq!(emitter.listener_count(EventName::Connect), 0);
    }

    #[test]
    fn test_order_survives_compaction() {
        let emitter = EventEmitter::new();
        let (log, make) = recorder();
        let ids: Vec<ListenerId> = (0..20)
            .map(|n| emitter.add(EventName::Connect, make(&n.to_string()), false))
            .collect();

        // Enough removals to trigger compaction, leaving 3, 9, 12, 18, 19.
        for (n, id) in ids.iter().enumerate() {
            if ![3, 9, 12, 18, 19].contains(&n) {
                assert!(emitter.off(EventName::Connect, *id));
            }
        }
        emitter.add(EventName::Connect, make("late"), false);
        emitter.emit(&ProviderEvent::Connect);
        assert_eq!(*log.lock().unwrap(), vec!["3", "9", "12", "18", "19", "late"]);

        // Surviving ids still resolve to the right slots after compaction.
        assert!(emitter.off(EventName::Connect, ids[12]));
        assert!(!emitter.off(EventName::Connect, ids[0]));
        log.lock().unwrap().clear();
        emitter.emit(&ProviderEvent::Connect);
        assert_eq!(*log.lock().unwrap(), vec!["3", "9", "18", "19", "late"]);
        assert_eq!(emitter.listener_count(EventName::Connect), 5);
    }

    #[test]
    fn test_off_under_wrong_name_is_noop() {
        let emitter = EventEmitter::new();
        let id = emitter.on(EventName::Connect, |_| {});
        assert!(!emitter.off(EventName::Close, id));
        assert_eq!(emitter.listener_count(EventName::Connect), 1);
    }

    #[test]
    fn test_once_fires_once() {
        let emitter = EventEmitter::new();
        let (log, make) = recorder();
        emitter.add(EventName::Connect, make("once"), true);
        emitter.add(EventName::Connect, make("always"), false);

        emitter.emit(&ProviderEvent::Connect);
        emitter.emit(&ProviderEvent::Connect);

        assert_eq!(*log.lock().unwrap(), vec!["once", "always", "always"]);
        assert_eq!(emitter.listener_count(EventName::Connect), 1);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let emitter = EventEmitter::new();
        let (log, make) = recorder();
        emitter.add(EventName::Connect, make("before"), false);
        emitter.on(EventName::Connect, |_| panic!("listener exploded"));
        emitter.add(EventName::Connect, make("after"), false);

        let ran = emitter.emit(&ProviderEvent::Connect);
        assert_eq!(ran, 2);
        assert_eq!(*log.lock().unwrap(), vec!["before", "after"]);

        // Registry intact: the panicking listener is still registered.
        assert_eq!(emitter.listener_count(EventName::Connect), 3);
        emitter.emit(&ProviderEvent::Connect);
        assert_eq!(log.lock().unwrap().len(), 4);
    }

    #[test]
    fn test_listener_can_mutate_registry_reentrantly() {
        let emitter = Arc::new(EventEmitter::new());
        let inner = emitter.clone();
        emitter.on(EventName::Connect, move |_| {
            inner.on(EventName::Close, |_| {});
        });

        emitter.emit(&ProviderEvent::Connect);
        assert_eq!(emitter.listener_count(EventName::Close), 1);
    }

    #[test]
    fn test_listener_added_during_emit_runs_next_time() {
        let emitter = Arc::new(EventEmitter::new());
        let (log, make) = recorder();
        let inner = emitter.clone();
        let late = make("late");
        emitter.once(EventName::Connect, move |_| {
            inner.add(EventName::Connect, late.clone(), false);
        });

        emitter.emit(&ProviderEvent::Connect);
        assert!(log.lock().unwrap().is_empty());
        emitter.emit(&ProviderEvent::Connect);
        assert_eq!(*log.lock().unwrap(), vec!["late"]);
    }

    #[test]
    fn test_remove_all_listeners() {
        let emitter = EventEmitter::new();
        emitter.on(EventName::Connect, |_| {});
        emitter.on(EventName::Close, |_| {});
        emitter.on(EventName::Close, |_| {});

        emitter.remove_all_listeners(Some(EventName::Close));
        assert_eq!(emitter.listener_count(EventName::Close), 0);
        assert_eq!(emitter.listener_count(EventName::Connect), 1);

        emitter.remove_all_listeners(None);
        assert_eq!(emitter.listener_count(EventName::Connect), 0);
    }

    #[test]
    fn test_emit_without_listeners() {
        let emitter = EventEmitter::new();
        assert_eq!(emitter.emit(&ProviderEvent::Connect), 0);
    }

    #[test]
    fn test_debug_impl() {
        let emitter = EventEmitter::new();
        emitter.on(EventName::Connect, |_| {});
        let debug_str = format!("{:?}", emitter);
        assert!(debug_str.contains("EventEmitter"));
        assert!(debug_str.contains("Connect"));
    }
}

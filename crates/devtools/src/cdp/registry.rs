//! Event Registry - event name to its single handler
//!
//! One handler per name. Registering again overwrites, registering `None`
//! clears. No subscriber means the event is dropped on the floor.

use dashmap::DashMap;
use serde_json::Value;
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::command::Event;

/// Type-erased handler. Gets the raw params, decodes them itself.
pub type EventHandler = Arc<dyn Fn(&Value) -> Result<(), serde_json::Error> + Send + Sync>;

thread_local! {
    static IN_DISPATCH: Cell<bool> = const { Cell::new(false) };
}

/// True while the current thread is running an event handler.
pub fn in_dispatch() -> bool {
    IN_DISPATCH.with(|flag| flag.get())
}

struct DispatchGuard {
    previous: bool,
}

impl DispatchGuard {
    fn enter() -> Self {
        let previous = IN_DISPATCH.with(|flag| flag.replace(true));
        Self { previous }
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        let previous = self.previous;
        IN_DISPATCH.with(|flag| flag.set(previous));
    }
}

/// Wrap a typed callback into an [`EventHandler`].
pub fn typed_handler<E, F>(callback: F) -> EventHandler
where
    E: Event,
    F: Fn(E) + Send + Sync + 'static,
{
    Arc::new(move |params: &Value| -> Result<(), serde_json::Error> {
        let event = E::deserialize(params)?;
        callback(event);
        Ok(())
    })
}

#[derive(Default)]
pub struct EventRegistry {
    handlers: DashMap<String, EventHandler>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install, replace, or (with `None`) clear the handler for `method`.
    pub fn set(&self, method: impl Into<String>, handler: Option<EventHandler>) {
        let method = method.into();
        match handler {
            Some(handler) => {
                if self.handlers.insert(method.clone(), handler).is_some() {
                    tracing::debug!("Replaced handler for {}", method);
                }
            }
            None => {
                self.handlers.remove(&method);
            }
        }
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    pub fn clear(&self) {
        self.handlers.clear();
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Deliver one notification. Returns whether a handler ran to completion.
    ///
    /// Decode errors and panics are logged and swallowed here.
    pub fn dispatch(&self, method: &str, params: &Value) -> bool {
        // clone out so the map shard isn't held while user code runs
        let handler = match self.handlers.get(method) {
            Some(entry) => entry.value().clone(),
            None => return false,
        };

        let _guard = DispatchGuard::enter();
        match catch_unwind(AssertUnwindSafe(|| handler(params))) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!("Dropping {} event, params did not decode: {}", method, e);
                false
            }
            Err(_) => {
                tracing::error!("Handler for {} panicked", method);
                false
            }
        }
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("EventRegistry")
            .field("handlers", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Debug, Deserialize)]
    struct LoadEventFired {
        timestamp: f64,
    }

    impl Event for LoadEventFired {
        const NAME: &'static str = "Page.loadEventFired";
    }

    fn counter(hits: Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> EventHandler {
        Arc::new(move |_: &Value| -> Result<(), serde_json::Error> {
            hits.lock().unwrap().push(tag);
            Ok(())
        })
    }

    #[test]
    fn typed_handler_decodes_params() {
        let registry = EventRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        registry.set(
            LoadEventFired::NAME,
            Some(typed_handler(move |e: LoadEventFired| {
                s.lock().unwrap().push(e.timestamp)
            })),
        );

        assert!(registry.dispatch("Page.loadEventFired", &json!({"timestamp": 123.4})));
        assert_eq!(*seen.lock().unwrap(), vec![123.4]);
    }

    #[test]
    fn later_handler_overwrites_earlier() {
        let registry = EventRegistry::new();
        let hits = Arc::new(Mutex::new(Vec::new()));
        registry.set("Page.frameNavigated", Some(counter(hits.clone(), "a")));
        registry.set("Page.frameNavigated", Some(counter(hits.clone(), "b")));

        registry.dispatch("Page.frameNavigated", &json!({}));
        assert_eq!(*hits.lock().unwrap(), vec!["b"]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn none_clears_subscription() {
        let registry = EventRegistry::new();
        let hits = Arc::new(Mutex::new(Vec::new()));
        registry.set("Page.frameNavigated", Some(counter(hits.clone(), "a")));
        registry.set("Page.frameNavigated", None);

        assert!(!registry.dispatch("Page.frameNavigated", &json!({})));
        assert!(hits.lock().unwrap().is_empty());
        assert!(!registry.contains("Page.frameNavigated"));
    }

    #[test]
    fn bad_params_are_dropped() {
        let registry = EventRegistry::new();
        registry.set(
            LoadEventFired::NAME,
            Some(typed_handler(|_: LoadEventFired| panic!("must not run"))),
        );
        assert!(!registry.dispatch(LoadEventFired::NAME, &json!({"timestamp": "soon"})));
    }

    #[test]
    fn panicking_handler_is_contained() {
        let registry = EventRegistry::new();
        registry.set(
            "Runtime.consoleAPICalled",
            Some(Arc::new(|_: &Value| -> Result<(), serde_json::Error> {
                panic!("handler bug")
            })),
        );
        assert!(!registry.dispatch("Runtime.consoleAPICalled", &json!({})));
        assert!(!in_dispatch());
        // still registered, still callable
        assert!(registry.contains("Runtime.consoleAPICalled"));
    }

    #[test]
    fn dispatch_flag_is_set_only_inside_handler() {
        let registry = EventRegistry::new();
        let observed = Arc::new(Mutex::new(None));
        let o = observed.clone();
        registry.set(
            "Page.domContentEventFired",
            Some(Arc::new(move |_: &Value| -> Result<(), serde_json::Error> {
                *o.lock().unwrap() = Some(in_dispatch());
                Ok(())
            })),
        );

        assert!(!in_dispatch());
        registry.dispatch("Page.domContentEventFired", &json!({}));
        assert_eq!(*observed.lock().unwrap(), Some(true));
        assert!(!in_dispatch());
    }
}

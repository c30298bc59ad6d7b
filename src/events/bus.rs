//! Publish/subscribe hub for orchestration activity.
//!
//! Handlers are grouped by [`EventKind`] and invoked in subscription order.
//! The handler table is locked only long enough to clone the list for one
//! delivery pass, so handlers may subscribe or emit from inside a callback.

use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use super::{Event, EventKind, EventPayload, ToolPhase, UserCommand};
use crate::types::{AgentState, SessionId};

pub type Handler = Arc<dyn Fn(&Event) -> Result<()> + Send + Sync>;

/// Wraps a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Default)]
pub struct EventBus {
    handlers: Mutex<HashMap<EventKind, Vec<Handler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `kind`. Registering the same `Arc` twice is a
    /// no-op; returns whether the handler was added.
    pub fn subscribe(&self, kind: EventKind, handler: Handler) -> bool {
        let mut handlers = self.lock_handlers();
        let list = handlers.entry(kind).or_default();
        if list.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            return false;
        }
        list.push(handler);
        true
    }

    pub fn unsubscribe(&self, kind: EventKind, handler: &Handler) -> bool {
        let mut handlers = self.lock_handlers();
        match handlers.get_mut(&kind) {
            Some(list) => {
                let before = list.len();
                list.retain(|h| !Arc::ptr_eq(h, handler));
                list.len() != before
            }
            None => false,
        }
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.lock_handlers().get(&kind).map_or(0, Vec::len)
    }

    /// Delivers `event` to every handler registered for its kind.
    ///
    /// Handler errors and panics are logged and swallowed.
    pub fn emit(&self, event: Event) {
        let kind = event.kind();
        let snapshot: Vec<Handler> = self
            .lock_handlers()
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        for handler in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log::warn!("{} handler failed: {:#}", kind.as_str(), e);
                }
                Err(_) => {
                    log::warn!("{} handler panicked", kind.as_str());
                }
            }
        }
    }

    pub fn emit_payload(&self, payload: EventPayload) {
        self.emit(Event::new(payload));
    }

    pub fn emit_state_changed(&self, from: AgentState, to: AgentState, session_id: Option<SessionId>) {
        self.emit_payload(EventPayload::StateChanged {
            from,
            to,
            session_id,
        });
    }

    pub fn emit_message(&self, text: impl Into<String>) {
        self.emit_payload(EventPayload::Message { text: text.into() });
    }

    pub fn emit_tool_status(&self, tool: impl Into<String>, phase: ToolPhase, data: Value) {
        self.emit_payload(EventPayload::ToolStatus {
            tool: tool.into(),
            phase,
            data,
        });
    }

    pub fn emit_match_found(&self, value: impl Into<String>, context: impl Into<String>) {
        self.emit_payload(EventPayload::MatchFound {
            value: value.into(),
            context: context.into(),
        });
    }

    pub fn emit_user_command(&self, command: UserCommand) {
        self.emit_payload(EventPayload::UserCommand { command });
    }

    pub fn emit_user_input(&self, text: impl Into<String>) {
        self.emit_payload(EventPayload::UserInput { text: text.into() });
    }

    // Handlers never run under this lock; poisoning is recovered rather than propagated.
    fn lock_handlers(&self) -> std::sync::MutexGuard<'_, HashMap<EventKind, Vec<Handler>>> {
        self.handlers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler(counter: Arc<AtomicUsize>) -> Handler {
        handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new();
        for kind in EventKind::ALL {
            assert_eq!(bus.handler_count(kind), 0);
        }
        bus.emit_message("nobody listens");
        bus.emit_match_found("flag{x}", "ctx");
        bus.emit_user_command(UserCommand::Stop);
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let h = counting_handler(counter.clone());

        assert!(bus.subscribe(EventKind::Message, h.clone()));
        assert!(!bus.subscribe(EventKind::Message, h.clone()));
        assert_eq!(bus.handler_count(EventKind::Message), 1);

        bus.emit_message("hello");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delivery_is_per_kind_and_in_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second"] {
            let seen = seen.clone();
            bus.subscribe(
                EventKind::Message,
                handler(move |_| {
                    seen.lock().unwrap().push(label);
                    Ok(())
                }),
            );
        }

        bus.emit_message("a");
        bus.emit_tool_status("nmap", ToolPhase::Started, Value::Null);

        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_failing_handler_is_isolated() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));

        bus.subscribe(
            EventKind::MatchFound,
            handler(|_| Err(anyhow::anyhow!("subscriber broke"))),
        );
        bus.subscribe(
            EventKind::MatchFound,
            handler(|_| panic!("subscriber panicked")),
        );
        bus.subscribe(EventKind::MatchFound, counting_handler(counter.clone()));

        for _ in 0..3 {
            bus.emit_match_found("flag{a}", "ctx");
        }
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let h = counting_handler(counter.clone());

        bus.subscribe(EventKind::UserInput, h.clone());
        assert!(bus.unsubscribe(EventKind::UserInput, &h));
        assert!(!bus.unsubscribe(EventKind::UserInput, &h));

        bus.emit_user_input("ignored");
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_reentrant_subscribe_and_emit() {
        let bus = Arc::new(EventBus::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let inner_bus = bus.clone();
        let inner_counter = counter.clone();
        bus.subscribe(
            EventKind::UserCommand,
            handler(move |_| {
                inner_bus.subscribe(EventKind::Message, counting_handler(inner_counter.clone()));
                inner_bus.emit_message("from inside a handler");
                Ok(())
            }),
        );

        bus.emit_user_command(UserCommand::Pause);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_subscribe_and_emit() {
        let bus = Arc::new(EventBus::new());
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventKind::Message, counting_handler(counter.clone()));

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let bus = bus.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        if i % 2 == 0 {
                            bus.subscribe(EventKind::ToolStatus, handler(|_| Ok(())));
                        }
                        bus.emit_message("tick");
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 400);
        assert_eq!(bus.handler_count(EventKind::ToolStatus), 200);
    }
}

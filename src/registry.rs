//! Bookkeeping for both directions of a call.
//!
//! - [`ReplyRegistry`] holds one-shot completions for calls this side sent,
//!   keyed by [`reply_key`].
//! - [`CommandRegistry`] holds the handlers this side exposes to the peer.
//!
//! Both registries are single-threaded and use interior mutability so that a
//! handler or completion may re-enter the endpoint (send another call,
//! define another command) while it runs. No `RefCell` borrow is ever held
//! across a user callback.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde_json::Value;
use tracing::debug;

use crate::error::InvokeError;
use crate::message::CallId;

/// Join key between an outbound call and its inbound reply.
///
/// Returns `None` when either part is empty, in which case the reply cannot
/// be routed.
pub fn reply_key(command: &str, id: &CallId) -> Option<String> {
    if command.is_empty() || id.is_absent() {
        return None;
    }
    Some(format!("{}-{}", command, id))
}

/// Reject empty command names at registration and bind time.
pub(crate) fn validate_command(command: &str) -> Result<(), InvokeError> {
    if command.is_empty() {
        return Err(InvokeError::InvalidCommand);
    }
    Ok(())
}

// =============================================================================
// Reply Registry
// =============================================================================

/// One-shot function run when the reply to a call arrives.
pub struct Completion(Box<dyn FnOnce(Vec<Value>)>);

impl Completion {
    pub fn new<F>(on_reply: F) -> Self
    where
        F: FnOnce(Vec<Value>) + 'static,
    {
        Self(Box::new(on_reply))
    }

    /// Completion for calls made without a callback.
    pub fn noop() -> Self {
        Self(Box::new(|_| {}))
    }

    /// Completion that runs with `scope` bound as its first argument.
    pub fn scoped<S, F>(scope: Rc<S>, on_reply: F) -> Self
    where
        S: 'static,
        F: FnOnce(&S, Vec<Value>) + 'static,
    {
        Self(Box::new(move |results| on_reply(&scope, results)))
    }

    pub fn complete(self, results: Vec<Value>) {
        (self.0)(results)
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Completion(..)")
    }
}

/// Pending calls awaiting a reply.
///
/// Entries have no timeout: a call whose reply never arrives stays here for
/// the lifetime of the registry.
#[derive(Debug, Default)]
pub struct ReplyRegistry {
    entries: RefCell<HashMap<String, Completion>>,
}

impl ReplyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a completion under `key`, replacing any previous entry.
    pub fn register(&self, key: String, completion: Completion) {
        let replaced = self.entries.borrow_mut().insert(key, completion);
        if replaced.is_some() {
            debug!("Replaced a pending completion with a duplicate reply key");
        }
    }

    /// Run and discard the completion stored under `key`.
    ///
    /// The entry is removed before the completion runs, so each completion
    /// fires at most once even if it re-enters the registry. Returns `false`
    /// when nothing was pending under `key`; such replies are dropped.
    pub fn resolve(&self, key: &str, results: Vec<Value>) -> bool {
        let entry = self.entries.borrow_mut().remove(key);
        match entry {
            Some(completion) => {
                completion.complete(results);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.borrow().contains_key(key)
    }

    /// Number of calls still waiting for a reply.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

// =============================================================================
// Command Registry
// =============================================================================

/// Handler for an inbound call: receives the call arguments and a
/// continuation (`C`) used to answer.
pub type Handler<C> = Rc<dyn Fn(Vec<Value>, C)>;

/// Locally defined commands, at most one handler per name.
pub struct CommandRegistry<C> {
    handlers: RefCell<HashMap<String, Handler<C>>>,
}

impl<C> Default for CommandRegistry<C> {
    fn default() -> Self {
        Self {
            handlers: RefCell::new(HashMap::new()),
        }
    }
}

impl<C> CommandRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `command`, replacing any earlier handler.
    ///
    /// # Errors
    ///
    /// Returns `InvokeError::InvalidCommand` if `command` is empty.
    pub fn define(&self, command: &str, handler: Handler<C>) -> Result<(), InvokeError> {
        validate_command(command)?;
        if self
            .handlers
            .borrow_mut()
            .insert(command.to_string(), handler)
            .is_some()
        {
            debug!(command, "Replaced existing handler");
        }
        Ok(())
    }

    /// Invoke the handler for `command` synchronously.
    ///
    /// # Errors
    ///
    /// Returns `InvokeError::UnknownCommand` if nothing is registered under
    /// `command`. The continuation is dropped unused in that case.
    pub fn dispatch(&self, command: &str, args: Vec<Value>, reply: C) -> Result<(), InvokeError> {
        // Clone the handler out so the borrow ends before user code runs.
        let handler = self.handlers.borrow().get(command).cloned();
        let handler = handler.ok_or_else(|| InvokeError::UnknownCommand(command.to_string()))?;
        handler(args, reply);
        Ok(())
    }

    pub fn contains(&self, command: &str) -> bool {
        self.handlers.borrow().contains_key(command)
    }

    pub fn len(&self) -> usize {
        self.handlers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.borrow().is_empty()
    }
}

impl<C> fmt::Debug for CommandRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.borrow();
        let mut commands: Vec<&String> = handlers.keys().collect();
        commands.sort();
        f.debug_struct("CommandRegistry")
            .field("commands", &commands)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    #[test]
    fn test_reply_key_format() {
        assert_eq!(reply_key("add", &CallId::from(3)), Some("add-3".to_string()));
        assert_eq!(
            reply_key("add", &CallId::from("x")),
            Some("add-x".to_string())
        );
        assert_eq!(reply_key("", &CallId::from(3)), None);
        assert_eq!(reply_key("add", &CallId::from("")), None);
        assert_eq!(reply_key("add", &CallId::from(0)), None);
    }

    #[test]
    fn test_resolve_fires_once() {
        let registry = ReplyRegistry::new();
        let fired = Rc::new(Cell::new(0));

        let counter = fired.clone();
        registry.register(
            "ping-1".to_string(),
            Completion::new(move |_| counter.set(counter.get() + 1)),
        );

        assert!(registry.resolve("ping-1", vec![]));
        assert!(!registry.resolve("ping-1", vec![]));
        assert_eq!(fired.get(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_resolve_unknown_key_leaves_others_pending() {
        let registry = ReplyRegistry::new();
        registry.register("ping-1".to_string(), Completion::noop());

        assert!(!registry.resolve("ping-2", vec![json!(1)]));
        assert!(registry.contains("ping-1"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_completion_may_reenter_registry() {
        let registry = Rc::new(ReplyRegistry::new());
        let inner_fired = Rc::new(Cell::new(false));

        let reentrant = registry.clone();
        let flag = inner_fired.clone();
        registry.register(
            "outer-1".to_string(),
            Completion::new(move |_| {
                // The entry is already gone; resolving it again is a no-op.
                assert!(!reentrant.resolve("outer-1", vec![]));
                reentrant.register(
                    "inner-2".to_string(),
                    Completion::new(move |_| flag.set(true)),
                );
            }),
        );

        assert!(registry.resolve("outer-1", vec![]));
        assert!(registry.resolve("inner-2", vec![]));
        assert!(inner_fired.get());
    }

    #[test]
    fn test_scoped_completion_receives_scope() {
        struct Counter {
            hits: Cell<i64>,
        }

        let scope = Rc::new(Counter { hits: Cell::new(0) });
        let completion = Completion::scoped(scope.clone(), |counter: &Counter, results| {
            counter.hits.set(results[0].as_i64().unwrap());
        });

        completion.complete(vec![json!(5)]);
        assert_eq!(scope.hits.get(), 5);
    }

    #[test]
    fn test_define_rejects_empty_command() {
        let registry: CommandRegistry<()> = CommandRegistry::new();
        let result = registry.define("", Rc::new(|_: Vec<Value>, _: ()| {}));
        assert!(matches!(result, Err(InvokeError::InvalidCommand)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_dispatch_passes_args_and_continuation() {
        let registry: CommandRegistry<Rc<Cell<i64>>> = CommandRegistry::new();
        registry
            .define(
                "add",
                Rc::new(|args: Vec<Value>, out: Rc<Cell<i64>>| {
                    let sum = args.iter().filter_map(Value::as_i64).sum();
                    out.set(sum);
                }),
            )
            .unwrap();

        let out = Rc::new(Cell::new(0));
        registry
            .dispatch("add", vec![json!(2), json!(3)], out.clone())
            .unwrap();
        assert_eq!(out.get(), 5);
    }

    #[test]
    fn test_later_definition_replaces_earlier() {
        let registry: CommandRegistry<Rc<Cell<i64>>> = CommandRegistry::new();
        registry
            .define("which", Rc::new(|_: Vec<Value>, out: Rc<Cell<i64>>| out.set(1)))
            .unwrap();
        registry
            .define("which", Rc::new(|_: Vec<Value>, out: Rc<Cell<i64>>| out.set(2)))
            .unwrap();

        let out = Rc::new(Cell::new(0));
        registry.dispatch("which", vec![], out.clone()).unwrap();
        assert_eq!(out.get(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_dispatch_unknown_command() {
        let registry: CommandRegistry<()> = CommandRegistry::new();
        match registry.dispatch("missing", vec![], ()) {
            Err(InvokeError::UnknownCommand(command)) => assert_eq!(command, "missing"),
            other => panic!("Expected UnknownCommand, got {:?}", other),
        }
    }
}

//! Routing of inbound packets to command handlers.
//!
//! Handlers are registered per `(scope, command)`. A [`ScopeItem`] groups the
//! handlers of one scope so a device module can register them together.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use periplex_frame::{Packet, Scope, ScopeSet};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// Outcome of one handler invocation.
pub type HandlerResult = std::result::Result<(), DispatchError>;

/// Errors returned by command handlers. Logged, never sent to the peer.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Content did not decode into the handler's argument type.
    #[error("content decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    /// Handler reported a failure.
    #[error("{0}")]
    Failed(String),
}

impl DispatchError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

type HandlerFn = dyn Fn(&str, Bytes) -> HandlerResult + Send + Sync;

/// A command handler, called with the device name and raw content.
#[derive(Clone)]
pub struct CommandHandler(Arc<HandlerFn>);

impl CommandHandler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str, Bytes) -> HandlerResult + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// A handler that decodes the content as JSON `T` before calling `f`.
    pub fn json<T, F>(f: F) -> Self
    where
        T: DeserializeOwned,
        F: Fn(&str, T) -> HandlerResult + Send + Sync + 'static,
    {
        Self::new(move |dev_name, content| {
            let value: T = serde_json::from_slice(&content)?;
            f(dev_name, value)
        })
    }

    pub fn call(&self, dev_name: &str, content: Bytes) -> HandlerResult {
        (self.0)(dev_name, content)
    }
}

impl fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CommandHandler")
    }
}

/// The handlers of one scope, registered as a unit.
#[derive(Debug, Clone)]
pub struct ScopeItem {
    scope: Scope,
    commands: HashMap<String, CommandHandler>,
}

impl ScopeItem {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            commands: HashMap::new(),
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn handle<F>(mut self, command: impl Into<String>, f: F) -> Self
    where
        F: Fn(&str, Bytes) -> HandlerResult + Send + Sync + 'static,
    {
        self.commands.insert(command.into(), CommandHandler::new(f));
        self
    }

    pub fn handle_json<T, F>(mut self, command: impl Into<String>, f: F) -> Self
    where
        T: DeserializeOwned,
        F: Fn(&str, T) -> HandlerResult + Send + Sync + 'static,
    {
        self.commands
            .insert(command.into(), CommandHandler::json(f));
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// What [`ScopeTable::dispatch`] did with a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    /// No handler for the scope/command pair.
    Unhandled,
    /// The handler returned an error.
    Failed,
}

/// Registry of command handlers keyed by scope and command name.
#[derive(Debug, Default)]
pub struct ScopeTable {
    scopes: RwLock<HashMap<Scope, HashMap<String, CommandHandler>>>,
}

impl ScopeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler`, replacing any previous one for the pair.
    pub fn register(&self, scope: Scope, command: impl Into<String>, handler: CommandHandler) {
        let command = command.into();
        let mut scopes = self.scopes.write().unwrap_or_else(PoisonError::into_inner);
        if scopes
            .entry(scope)
            .or_default()
            .insert(command.clone(), handler)
            .is_some()
        {
            debug!(%scope, command = %command, "replaced command handler");
        }
    }

    pub fn register_json<T, F>(&self, scope: Scope, command: impl Into<String>, f: F)
    where
        T: DeserializeOwned,
        F: Fn(&str, T) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(scope, command, CommandHandler::json(f));
    }

    pub fn lookup(&self, scope: Scope, command: &str) -> Option<CommandHandler> {
        self.scopes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&scope)
            .and_then(|commands| commands.get(command))
            .cloned()
    }

    /// Route `packet` to its handler.
    ///
    /// The table lock is released before the handler runs, so handlers may
    /// register further commands.
    pub fn dispatch(&self, packet: &Packet) -> DispatchOutcome {
        let Some(handler) = self.lookup(packet.scope, &packet.command) else {
            warn!(
                scope = %packet.scope,
                command = %packet.command,
                dev_name = %packet.dev_name,
                "no handler for command; packet dropped"
            );
            return DispatchOutcome::Unhandled;
        };

        match handler.call(&packet.dev_name, packet.content.clone()) {
            Ok(()) => {
                debug!(scope = %packet.scope, command = %packet.command, "packet handled");
                DispatchOutcome::Handled
            }
            Err(err) => {
                warn!(
                    scope = %packet.scope,
                    command = %packet.command,
                    dev_name = %packet.dev_name,
                    error = %err,
                    "command handler failed"
                );
                DispatchOutcome::Failed
            }
        }
    }

    /// Scopes with at least one registered command, plus System.
    pub fn scopes(&self) -> ScopeSet {
        self.scopes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, commands)| !commands.is_empty())
            .map(|(scope, _)| *scope)
            .collect()
    }
}

/// Something that accepts [`ScopeItem`]s.
pub trait ScopeRegistrar {
    fn add_scope_item(&self, item: ScopeItem);
}

impl ScopeRegistrar for ScopeTable {
    fn add_scope_item(&self, item: ScopeItem) {
        let scope = item.scope;
        for (command, handler) in item.commands {
            self.register(scope, command, handler);
        }
    }
}

//! Capability Handler Architecture
//!
//! Handlers extend devicelink with reactions to specific message types:
//! sharing, remote commands, remote input, connectivity tests. Each handler
//! declares the message types it consumes and is registered into the
//! per-session [`HandlerRegistry`], which routes inbound messages to it.
//!
//! ## Core principles
//!
//! 1. **Capability-driven**: a handler runs only for the types it declared
//! 2. **Per-session instances**: handlers belong to exactly one device
//!    session; they never observe another peer's messages
//! 3. **Idempotent handling**: repeated or unexpected messages must not
//!    fault a handler
//! 4. **Fault isolation**: one handler's failure is logged and never stops
//!    its siblings or future messages
//!
//! ## Ownership
//!
//! Handler instances are owned by the plugin-loading collaborator; the
//! registry keeps weak references. A handler torn down externally simply
//! stops being invoked; dispatch treats the dangling entry as a no-op.
//!
//! ## Trust gate
//!
//! Non-pairing messages reach handlers only while the session is paired.
//! The drop is silent (a security gate, not an error) and nothing is sent
//! back, so an untrusted peer learns nothing about which types exist. A
//! handler may declare itself trust-exempt; that is reserved for
//! system-level capabilities and is off by default.

pub mod mousepad;
pub mod ping;
pub mod runcommand;
pub mod share;

use crate::session::SessionContext;
use crate::{Message, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// A capability handler bound to one device session
///
/// All methods take `&self`; handlers that track state use interior
/// mutability, since the registry only holds weak shared references.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    /// Short lowercase identifier like "ping", "share"
    fn name(&self) -> &str;

    /// Message types this handler can receive
    fn incoming_capabilities(&self) -> Vec<String>;

    /// Message types this handler can send
    fn outgoing_capabilities(&self) -> Vec<String>;

    /// Whether this handler may run for a session that is not paired
    ///
    /// Off by default; only system-level capabilities override this.
    fn trust_exempt(&self) -> bool {
        false
    }

    /// Handle an inbound message of a declared type
    ///
    /// Implementations should process idempotently and prefer logging over
    /// returning errors for malformed bodies; a returned error is isolated
    /// by the dispatcher either way.
    async fn receive(&self, message: &Message, ctx: &SessionContext) -> Result<()>;
}

struct RegisteredHandler {
    id: u64,
    name: String,
    handler: Weak<dyn CapabilityHandler>,
}

/// Per-session message-type → handler routing table
///
/// Multiple handlers may share a type; one handler may register for many
/// types. Invocation order for a type is registration order, which keeps
/// dispatch deterministic within a process run.
///
/// The registry lives inside its session and is only reached through
/// `&mut` session methods, so registration and dispatch on the same session
/// are mutually exclusive by construction.
pub struct HandlerRegistry {
    next_id: u64,
    entries: Vec<RegisteredHandler>,
    by_type: HashMap<String, Vec<u64>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
            by_type: HashMap::new(),
        }
    }

    /// Register a handler for one message type
    ///
    /// Registering the same handler for the same type twice is a no-op.
    pub fn register(&mut self, message_type: impl Into<String>, handler: &Arc<dyn CapabilityHandler>) {
        let message_type = message_type.into();
        let id = match self.find_entry(handler) {
            Some(entry) => entry.id,
            None => {
                let id = self.next_id;
                self.next_id += 1;
                self.entries.push(RegisteredHandler {
                    id,
                    name: handler.name().to_string(),
                    handler: Arc::downgrade(handler),
                });
                id
            }
        };

        let ids = self.by_type.entry(message_type.clone()).or_default();
        if !ids.contains(&id) {
            debug!("Registered handler '{}' for {}", handler.name(), message_type);
            ids.push(id);
        }
    }

    /// Register a handler for every type it declares
    pub fn register_handler(&mut self, handler: &Arc<dyn CapabilityHandler>) {
        for capability in handler.incoming_capabilities() {
            self.register(capability, handler);
        }
        info!("Registered handler '{}'", handler.name());
    }

    /// Remove a handler from all message types
    pub fn unregister(&mut self, handler: &Arc<dyn CapabilityHandler>) {
        let Some(id) = self.find_entry(handler).map(|e| e.id) else {
            return;
        };

        for ids in self.by_type.values_mut() {
            ids.retain(|&entry_id| entry_id != id);
        }
        self.by_type.retain(|_, ids| !ids.is_empty());
        if let Some(pos) = self.entries.iter().position(|e| e.id == id) {
            let entry = self.entries.remove(pos);
            info!("Unregistered handler '{}'", entry.name);
        }
    }

    /// Message types with at least one registered handler
    pub fn supported_types(&self) -> Vec<String> {
        self.by_type.keys().cloned().collect()
    }

    /// Number of live handler registrations
    pub fn handler_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.handler.strong_count() > 0)
            .count()
    }

    /// Route a message to every registered handler of its type
    ///
    /// Returns the number of handlers invoked. Unknown types are dropped
    /// silently for forward compatibility: a newer peer's message types
    /// must not fault an older desktop. When `paired` is false only
    /// trust-exempt handlers run. A handler that has disappeared (torn down
    /// by the plugin loader) is skipped as a no-op. Handler errors are
    /// logged and never stop sibling handlers.
    pub async fn dispatch(
        &self,
        message: &Message,
        paired: bool,
        ctx: &SessionContext,
    ) -> usize {
        let Some(ids) = self.by_type.get(&message.message_type) else {
            debug!(
                "No handler for message type {}, dropping",
                message.message_type
            );
            return 0;
        };

        let mut invoked = 0;
        for id in ids {
            let Some(entry) = self.entries.iter().find(|e| e.id == *id) else {
                continue;
            };
            let Some(handler) = entry.handler.upgrade() else {
                debug!("Handler '{}' is gone, skipping", entry.name);
                continue;
            };

            if !paired && !handler.trust_exempt() {
                continue;
            }

            debug!(
                "Routing {} to handler '{}'",
                message.message_type, entry.name
            );

            match handler.receive(message, ctx).await {
                Ok(()) => {}
                Err(e) if e.is_recoverable() => {
                    warn!(
                        "Handler '{}' failed on {} (recoverable): {}",
                        entry.name, message.message_type, e
                    );
                }
                Err(e) => {
                    warn!(
                        "Handler '{}' failed on {}: {}",
                        entry.name, message.message_type, e
                    );
                }
            }
            invoked += 1;
        }

        invoked
    }

    fn find_entry(&self, handler: &Arc<dyn CapabilityHandler>) -> Option<&RegisteredHandler> {
        let needle = Arc::downgrade(handler);
        self.entries.iter().find(|e| e.handler.ptr_eq(&needle))
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

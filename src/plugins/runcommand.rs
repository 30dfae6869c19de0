//! RunCommand Handler
//!
//! Lets a paired peer trigger commands the user configured on this desktop.
//! The peer first asks for the command table, then triggers entries by key.
//!
//! ## Message Type
//!
//! `devicelink.runcommand`, with two inbound shapes:
//! - `{ "ask": true }` — reply with the configured `keys` and `names` lists
//! - `{ "key": "<id>" }` — execute the command registered under that key
//!
//! Only commands present in the per-device `commands` config table can run;
//! a peer can never submit a command line of its own. Actual subprocess
//! execution is the [`CommandRunner`] collaborator's concern.

use crate::session::SessionContext;
use crate::{Message, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::CapabilityHandler;

/// Message type for remote command triggers
pub const RUNCOMMAND_MESSAGE_TYPE: &str = "devicelink.runcommand";

/// Config key holding the command table
pub const COMMANDS_CONFIG_KEY: &str = "commands";

/// One configured command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandEntry {
    /// Display name shown on the peer
    pub name: String,
    /// Command line to execute
    pub command: String,
}

/// Executes a configured command line
///
/// Implemented by the process collaborator; the handler itself never
/// touches the OS.
pub trait CommandRunner: Send + Sync {
    /// Run a command line from the configured table
    fn run(&self, command_line: &str) -> Result<()>;
}

/// Remote command handler
pub struct RunCommandHandler {
    runner: Arc<dyn CommandRunner>,
}

impl RunCommandHandler {
    /// Create a handler delegating execution to `runner`
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn command_table(&self, ctx: &SessionContext) -> HashMap<String, CommandEntry> {
        ctx.config.get(COMMANDS_CONFIG_KEY, HashMap::new())
    }

    /// Build the command listing reply
    ///
    /// Keys are sorted so the listing is deterministic.
    fn config_message(&self, ctx: &SessionContext) -> Message {
        let table = self.command_table(ctx);
        let mut keys: Vec<String> = table.keys().cloned().collect();
        keys.sort();
        let names: Vec<String> = keys
            .iter()
            .map(|key| table[key].name.clone())
            .collect();

        Message::new(RUNCOMMAND_MESSAGE_TYPE)
            .with_body_field("keys", keys)
            .with_body_field("names", names)
    }
}

#[async_trait]
impl CapabilityHandler for RunCommandHandler {
    fn name(&self) -> &str {
        "runcommand"
    }

    fn incoming_capabilities(&self) -> Vec<String> {
        vec![RUNCOMMAND_MESSAGE_TYPE.to_string()]
    }

    fn outgoing_capabilities(&self) -> Vec<String> {
        vec![RUNCOMMAND_MESSAGE_TYPE.to_string()]
    }

    async fn receive(&self, message: &Message, ctx: &SessionContext) -> Result<()> {
        if message.has("ask") {
            ctx.send(self.config_message(ctx)).await?;
            return Ok(());
        }

        if message.has("key") {
            let key = message.get("key", String::new())?;
            match self.command_table(ctx).get(&key) {
                Some(entry) => {
                    info!(
                        "Running command '{}' for {}: {}",
                        entry.name, ctx.device_name, entry.command
                    );
                    self.runner.run(&entry.command)?;
                }
                None => {
                    warn!("'{}' is not a configured command", key);
                }
            }
        }

        Ok(())
    }
}

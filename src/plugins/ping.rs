//! Ping Handler
//!
//! Connectivity testing over `devicelink.ping` messages. A ping optionally
//! carries a `message` field; receiving one is logged and counted, no
//! response is required.

use crate::session::SessionContext;
use crate::{Message, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use super::CapabilityHandler;

/// Message type for connectivity tests
pub const PING_MESSAGE_TYPE: &str = "devicelink.ping";

/// Fire-and-forget connectivity test handler
///
/// # Example
///
/// ```
/// use devicelink::plugins::ping::PingHandler;
///
/// let handler = PingHandler::new();
/// assert_eq!(handler.pings_received(), 0);
///
/// let packet = handler.create_ping(Some("Hello!".to_string()));
/// assert_eq!(packet.message_type, "devicelink.ping");
/// ```
#[derive(Debug, Default)]
pub struct PingHandler {
    pings_received: AtomicU64,
}

impl PingHandler {
    /// Create a new ping handler
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pings received on this session
    pub fn pings_received(&self) -> u64 {
        self.pings_received.load(Ordering::Relaxed)
    }

    /// Create a ping message with an optional text
    pub fn create_ping(&self, message: Option<String>) -> Message {
        match message {
            Some(text) => Message::new(PING_MESSAGE_TYPE).with_body_field("message", text),
            None => Message::new(PING_MESSAGE_TYPE),
        }
    }
}

#[async_trait]
impl CapabilityHandler for PingHandler {
    fn name(&self) -> &str {
        "ping"
    }

    fn incoming_capabilities(&self) -> Vec<String> {
        vec![PING_MESSAGE_TYPE.to_string()]
    }

    fn outgoing_capabilities(&self) -> Vec<String> {
        vec![PING_MESSAGE_TYPE.to_string()]
    }

    async fn receive(&self, message: &Message, ctx: &SessionContext) -> Result<()> {
        self.pings_received.fetch_add(1, Ordering::Relaxed);

        let text = message.get("message", String::new()).unwrap_or_default();
        if text.is_empty() {
            info!("Received ping from {} ({})", ctx.device_name, ctx.device_id);
        } else {
            info!(
                "Received ping from {} ({}): {}",
                ctx.device_name, ctx.device_id, text
            );
        }

        debug!("Pings received so far: {}", self.pings_received());
        Ok(())
    }
}

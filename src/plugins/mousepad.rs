//! Mousepad Handler
//!
//! Remote pointer and keyboard input from the peer. A message either moves
//! the pointer (plain `dx`/`dy`), clicks, scrolls, or types; the actual OS
//! input injection is the [`InputInjector`] collaborator's concern.
//!
//! Field semantics, checked in this order: `singleclick`, `doubleclick`,
//! `middleclick`, `rightclick`, `scroll` (direction from the sign of `dy`),
//! then `key`/`specialKey`; a message with none of those set is a pointer
//! move by `dx`/`dy`.

use crate::session::SessionContext;
use crate::{Message, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::CapabilityHandler;

/// Message type for remote input events
pub const MOUSEPAD_MESSAGE_TYPE: &str = "devicelink.mousepad.request";

/// Highest special key identifier in the shared translation table
///
/// The table is kept in sync across implementations; identifiers above this
/// are from a newer peer and are ignored.
pub const MAX_SPECIAL_KEY: i64 = 14;

/// Pointer buttons a peer can click
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

/// Performs OS-level input injection
pub trait InputInjector: Send + Sync {
    /// Move the pointer by a relative delta
    fn move_pointer(&self, dx: f64, dy: f64) -> Result<()>;

    /// Click a pointer button
    fn click(&self, button: MouseButton) -> Result<()>;

    /// Scroll vertically; negative is down
    fn scroll(&self, dy: f64) -> Result<()>;

    /// Type a UTF-8 string
    fn type_text(&self, text: &str) -> Result<()>;

    /// Press a key from the shared special key table (1..=14)
    fn press_special_key(&self, code: i64) -> Result<()>;
}

/// Remote input handler
pub struct MousepadHandler {
    injector: Arc<dyn InputInjector>,
}

impl MousepadHandler {
    /// Create a handler delegating injection to `injector`
    pub fn new(injector: Arc<dyn InputInjector>) -> Self {
        Self { injector }
    }
}

#[async_trait]
impl CapabilityHandler for MousepadHandler {
    fn name(&self) -> &str {
        "mousepad"
    }

    fn incoming_capabilities(&self) -> Vec<String> {
        vec![MOUSEPAD_MESSAGE_TYPE.to_string()]
    }

    fn outgoing_capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    async fn receive(&self, message: &Message, _ctx: &SessionContext) -> Result<()> {
        let dx = message.get("dx", 0.0)?;
        let dy = message.get("dy", 0.0)?;

        let single_click = message.get("singleclick", false)?;
        let double_click = message.get("doubleclick", false)?;
        let middle_click = message.get("middleclick", false)?;
        let right_click = message.get("rightclick", false)?;
        let scroll = message.get("scroll", false)?;
        let key = message.get("key", String::new())?;
        let special_key = message.get("specialKey", 0i64)?;

        if single_click || double_click || middle_click || right_click || scroll
            || !key.is_empty()
            || special_key != 0
        {
            if single_click {
                self.injector.click(MouseButton::Left)?;
            } else if double_click {
                self.injector.click(MouseButton::Left)?;
                self.injector.click(MouseButton::Left)?;
            } else if middle_click {
                self.injector.click(MouseButton::Middle)?;
            } else if right_click {
                self.injector.click(MouseButton::Right)?;
            } else if scroll {
                if dy != 0.0 {
                    self.injector.scroll(dy)?;
                }
            } else if special_key != 0 {
                if special_key > MAX_SPECIAL_KEY || special_key < 0 {
                    warn!("Unsupported special key identifier {}", special_key);
                    return Ok(());
                }
                self.injector.press_special_key(special_key)?;
            } else {
                self.injector.type_text(&key)?;
            }
        } else {
            debug!("Pointer move by ({}, {})", dx, dy);
            self.injector.move_pointer(dx, dy)?;
        }

        Ok(())
    }
}

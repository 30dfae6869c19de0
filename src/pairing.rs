//! Device Pairing Trust State Machine
//!
//! Devices must be paired before exchanging any functional messages.
//! Pairing is a mutual-consent handshake carried over `devicelink.pair`
//! messages with a single boolean `pair` field:
//!
//! 1. Device A sends `{pair: true}` and starts a 30 second timer
//! 2. Device B surfaces the request to the user
//! 3. Device B answers `{pair: true}` (accept) or `{pair: false}` (reject)
//! 4. Either side may later send `{pair: false}` to unpair
//!
//! Simultaneous requests from both sides converge: a `{pair: true}` received
//! while our own request is outstanding counts as the peer's acceptance and
//! both sides become paired without a third round-trip.
//!
//! A request that receives no answer within the timeout reverts to unpaired
//! on its own. The timeout is fatal to the attempt, not to the session, and
//! no `{pair: false}` is sent for it; only an explicit reject answers the
//! peer. Stray pairing messages arriving while already paired are ignored so
//! duplicate packets can never downgrade trust.
//!
//! Expiry is checked passively at the start of every trust interaction; the
//! session additionally runs a timer task so the revert is observed even on
//! an otherwise idle link.

use crate::{Message, ProtocolError, Result};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Message type that carries pairing state, routed around capability dispatch
pub const PAIR_MESSAGE_TYPE: &str = "devicelink.pair";

/// Default pairing timeout (30 seconds)
pub const PAIRING_TIMEOUT: Duration = Duration::from_secs(30);

/// Who initiated an outstanding pairing request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairDirection {
    /// The peer asked us; a user decision is pending
    Incoming,
    /// We asked the peer; their answer is pending
    Outgoing,
}

/// Per-peer trust state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustState {
    /// No trust established
    Unpaired,
    /// A pairing request is outstanding until `deadline`
    PairRequested {
        direction: PairDirection,
        deadline: Instant,
    },
    /// Mutual trust established
    Paired,
}

impl TrustState {
    /// Check whether capability messages may be dispatched
    pub fn is_paired(&self) -> bool {
        matches!(self, TrustState::Paired)
    }
}

/// Observable outcome of a trust interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingUpdate {
    /// Nothing observable changed
    None,
    /// An incoming request awaits a user decision
    DecisionRequested,
    /// Trust was established
    Paired,
    /// Trust was dropped (reject, unpair, or timeout)
    Unpaired,
}

/// A parsed `devicelink.pair` message body
#[derive(Debug, Clone)]
pub struct PairMessage {
    /// Whether pairing is requested/accepted (true) or rejected/ended (false)
    pub pair: bool,
}

impl PairMessage {
    /// Create a pairing request message
    pub fn request() -> Message {
        Message::new(PAIR_MESSAGE_TYPE).with_body_field("pair", true)
    }

    /// Create a pairing accept message
    pub fn accept() -> Message {
        Message::new(PAIR_MESSAGE_TYPE).with_body_field("pair", true)
    }

    /// Create a pairing reject message
    pub fn reject() -> Message {
        Message::new(PAIR_MESSAGE_TYPE).with_body_field("pair", false)
    }

    /// Create an unpair message
    pub fn unpair() -> Message {
        Message::new(PAIR_MESSAGE_TYPE).with_body_field("pair", false)
    }

    /// Parse a pairing message
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidMessage`] if the message is not of
    /// type `devicelink.pair` or has no boolean `pair` field.
    pub fn from_message(message: &Message) -> Result<Self> {
        if !message.is_type(PAIR_MESSAGE_TYPE) {
            return Err(ProtocolError::InvalidMessage(
                "not a pairing message".to_string(),
            ));
        }

        if !message.has("pair") {
            return Err(ProtocolError::InvalidMessage(
                "missing pair field".to_string(),
            ));
        }

        let pair = message.get("pair", false)?;
        Ok(Self { pair })
    }
}

/// Callback invoked when trust transitions in or out of `Paired`
///
/// The argument is the new paired flag. Sessions wire this to the device
/// registry so the snapshot survives restarts.
pub type TrustHook = Box<dyn Fn(bool) + Send + Sync>;

/// Per-peer pairing state machine
///
/// Owns the trust state of one device session. All mutation of trust goes
/// through the transition methods here; handlers never touch it directly.
pub struct PairingHandler {
    state: TrustState,
    timeout: Duration,
    trust_hook: Option<TrustHook>,
}

impl PairingHandler {
    /// Create a handler in the `Unpaired` state with the default timeout
    pub fn new() -> Self {
        Self::with_timeout(PAIRING_TIMEOUT)
    }

    /// Create a handler with a custom request timeout
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            state: TrustState::Unpaired,
            timeout,
            trust_hook: None,
        }
    }

    /// Restore a handler for a peer whose trust snapshot was persisted
    pub fn restored(paired: bool) -> Self {
        let mut handler = Self::new();
        if paired {
            handler.state = TrustState::Paired;
        }
        handler
    }

    /// Install the persistence hook called on `Paired` edges
    pub fn set_trust_hook(&mut self, hook: TrustHook) {
        self.trust_hook = Some(hook);
    }

    /// Current trust state
    pub fn state(&self) -> TrustState {
        self.state
    }

    /// Check whether capability messages may be dispatched
    pub fn is_paired(&self) -> bool {
        self.state.is_paired()
    }

    /// Start a local pairing request
    ///
    /// Returns the `{pair: true}` message to send, or `None` if the state
    /// permits no new request (already paired, or a request is in flight).
    pub fn request_pairing(&mut self) -> Option<Message> {
        self.expire_if_due();

        match self.state {
            TrustState::Unpaired => {
                self.state = TrustState::PairRequested {
                    direction: PairDirection::Outgoing,
                    deadline: Instant::now() + self.timeout,
                };
                info!("Sending pairing request");
                Some(PairMessage::request())
            }
            TrustState::PairRequested { .. } => {
                debug!("Pairing request already in flight");
                None
            }
            TrustState::Paired => {
                debug!("Already paired, not requesting");
                None
            }
        }
    }

    /// Process an inbound `devicelink.pair` message
    ///
    /// Never produces an outbound message itself: an acceptance reply is
    /// only sent from [`accept_pairing`](Self::accept_pairing), and rejects
    /// only from [`reject_pairing`](Self::reject_pairing).
    pub fn handle_pair_message(&mut self, message: &Message) -> Result<PairingUpdate> {
        self.expire_if_due();

        let pairing = PairMessage::from_message(message)?;

        if pairing.pair {
            match self.state {
                TrustState::Unpaired => {
                    // Peer wants to pair; wait for the user to decide
                    self.state = TrustState::PairRequested {
                        direction: PairDirection::Incoming,
                        deadline: Instant::now() + self.timeout,
                    };
                    info!("Received pairing request");
                    Ok(PairingUpdate::DecisionRequested)
                }
                TrustState::PairRequested {
                    direction: PairDirection::Outgoing,
                    ..
                } => {
                    // Mutual accept: both sides requested, no third
                    // round-trip needed
                    self.become_paired();
                    info!("Pairing accepted by peer");
                    Ok(PairingUpdate::Paired)
                }
                TrustState::PairRequested {
                    direction: PairDirection::Incoming,
                    ..
                } => {
                    // Duplicate request; the existing deadline stands
                    warn!("Duplicate pairing request ignored");
                    Ok(PairingUpdate::None)
                }
                TrustState::Paired => {
                    // Stray or duplicate packet must not downgrade trust
                    debug!("Pairing message while already paired, ignoring");
                    Ok(PairingUpdate::None)
                }
            }
        } else {
            match self.state {
                TrustState::Unpaired => Ok(PairingUpdate::None),
                TrustState::PairRequested { .. } => {
                    info!("Pairing rejected by peer");
                    self.state = TrustState::Unpaired;
                    Ok(PairingUpdate::Unpaired)
                }
                TrustState::Paired => {
                    info!("Unpaired by peer");
                    self.become_unpaired();
                    Ok(PairingUpdate::Unpaired)
                }
            }
        }
    }

    /// Accept an incoming pairing request (user confirmed)
    ///
    /// Returns the `{pair: true}` confirmation to send, or `None` if no
    /// incoming request is pending. Accepting after the request expired is
    /// a no-op.
    pub fn accept_pairing(&mut self) -> Option<Message> {
        self.expire_if_due();

        match self.state {
            TrustState::PairRequested {
                direction: PairDirection::Incoming,
                ..
            } => {
                self.become_paired();
                info!("Accepted pairing request");
                Some(PairMessage::accept())
            }
            _ => {
                debug!("No pairing request pending, accept is a no-op");
                None
            }
        }
    }

    /// Reject an incoming pairing request (user declined)
    ///
    /// Returns the `{pair: false}` answer to send, or `None` if no incoming
    /// request is pending. An already-expired request reverts silently; the
    /// peer is only answered for an explicit reject.
    pub fn reject_pairing(&mut self) -> Option<Message> {
        self.expire_if_due();

        match self.state {
            TrustState::PairRequested {
                direction: PairDirection::Incoming,
                ..
            } => {
                self.state = TrustState::Unpaired;
                info!("Rejected pairing request");
                Some(PairMessage::reject())
            }
            _ => None,
        }
    }

    /// End an established pairing
    ///
    /// Returns the `{pair: false}` message to send, or `None` when not
    /// paired.
    pub fn unpair(&mut self) -> Option<Message> {
        match self.state {
            TrustState::Paired => {
                self.become_unpaired();
                info!("Unpairing from peer");
                Some(PairMessage::unpair())
            }
            _ => None,
        }
    }

    /// Revert an outstanding request whose deadline has passed
    ///
    /// Returns `true` if a request expired on this call. Called at the start
    /// of every trust interaction and periodically by the session timer.
    pub fn expire_if_due(&mut self) -> bool {
        if let TrustState::PairRequested { deadline, .. } = self.state {
            if Instant::now() >= deadline {
                info!("Pairing request timed out, reverting to unpaired");
                self.state = TrustState::Unpaired;
                return true;
            }
        }
        false
    }

    fn become_paired(&mut self) {
        self.state = TrustState::Paired;
        if let Some(hook) = &self.trust_hook {
            hook(true);
        }
    }

    fn become_unpaired(&mut self) {
        self.state = TrustState::Unpaired;
        if let Some(hook) = &self.trust_hook {
            hook(false);
        }
    }
}

impl Default for PairingHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_pair_message_creation() {
        let request = PairMessage::request();
        assert!(request.is_type(PAIR_MESSAGE_TYPE));
        assert!(request.get("pair", false).unwrap());

        let reject = PairMessage::reject();
        assert!(!reject.get("pair", true).unwrap());
    }

    #[test]
    fn test_pair_message_parsing() {
        let parsed = PairMessage::from_message(&PairMessage::request()).unwrap();
        assert!(parsed.pair);

        let parsed = PairMessage::from_message(&PairMessage::reject()).unwrap();
        assert!(!parsed.pair);

        let wrong_type = Message::new("devicelink.ping");
        assert!(PairMessage::from_message(&wrong_type).is_err());

        let missing_field = Message::new(PAIR_MESSAGE_TYPE);
        assert!(PairMessage::from_message(&missing_field).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_pairing_flow() {
        let mut handler = PairingHandler::new();
        assert_eq!(handler.state(), TrustState::Unpaired);

        let request = handler.request_pairing().unwrap();
        assert!(request.is_type(PAIR_MESSAGE_TYPE));
        assert!(matches!(
            handler.state(),
            TrustState::PairRequested {
                direction: PairDirection::Outgoing,
                ..
            }
        ));

        // second request while in flight is a no-op
        assert!(handler.request_pairing().is_none());

        // peer accepts
        let update = handler.handle_pair_message(&PairMessage::accept()).unwrap();
        assert_eq!(update, PairingUpdate::Paired);
        assert!(handler.is_paired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_incoming_request_accept() {
        let mut handler = PairingHandler::new();

        let update = handler
            .handle_pair_message(&PairMessage::request())
            .unwrap();
        assert_eq!(update, PairingUpdate::DecisionRequested);

        let confirmation = handler.accept_pairing().unwrap();
        assert!(confirmation.get("pair", false).unwrap());
        assert!(handler.is_paired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_incoming_request_reject() {
        let mut handler = PairingHandler::new();
        handler
            .handle_pair_message(&PairMessage::request())
            .unwrap();

        let answer = handler.reject_pairing().unwrap();
        assert!(!answer.get("pair", true).unwrap());
        assert_eq!(handler.state(), TrustState::Unpaired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutual_request_converges() {
        let mut handler = PairingHandler::new();
        handler.request_pairing().unwrap();

        // The peer's own request arrives while ours is outstanding
        let update = handler
            .handle_pair_message(&PairMessage::request())
            .unwrap();
        assert_eq!(update, PairingUpdate::Paired);
        assert!(handler.is_paired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_reverts() {
        let mut handler = PairingHandler::new();
        handler.request_pairing().unwrap();

        tokio::time::advance(PAIRING_TIMEOUT + Duration::from_secs(1)).await;
        assert!(handler.expire_if_due());
        assert_eq!(handler.state(), TrustState::Unpaired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_after_expiry_is_noop() {
        let mut handler = PairingHandler::new();
        handler
            .handle_pair_message(&PairMessage::request())
            .unwrap();

        tokio::time::advance(PAIRING_TIMEOUT + Duration::from_secs(1)).await;

        // Expiry is observed passively by the accept itself
        assert!(handler.accept_pairing().is_none());
        assert_eq!(handler.state(), TrustState::Unpaired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stray_pair_message_keeps_trust() {
        let mut handler = PairingHandler::new();
        handler.request_pairing().unwrap();
        handler.handle_pair_message(&PairMessage::accept()).unwrap();
        assert!(handler.is_paired());

        // Duplicate accept must not downgrade
        let update = handler.handle_pair_message(&PairMessage::accept()).unwrap();
        assert_eq!(update, PairingUpdate::None);
        assert!(handler.is_paired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_unpair() {
        let mut handler = PairingHandler::restored(true);
        assert!(handler.is_paired());

        let update = handler.handle_pair_message(&PairMessage::unpair()).unwrap();
        assert_eq!(update, PairingUpdate::Unpaired);
        assert_eq!(handler.state(), TrustState::Unpaired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_unpair() {
        let mut handler = PairingHandler::restored(true);
        let message = handler.unpair().unwrap();
        assert!(!message.get("pair", true).unwrap());
        assert_eq!(handler.state(), TrustState::Unpaired);

        // unpair when not paired is a no-op
        assert!(handler.unpair().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trust_hook_fires_on_paired_edges() {
        let transitions = Arc::new(AtomicUsize::new(0));
        let seen = transitions.clone();

        let mut handler = PairingHandler::new();
        handler.set_trust_hook(Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        handler.request_pairing().unwrap();
        assert_eq!(transitions.load(Ordering::SeqCst), 0);

        handler.handle_pair_message(&PairMessage::accept()).unwrap();
        assert_eq!(transitions.load(Ordering::SeqCst), 1);

        handler.unpair().unwrap();
        assert_eq!(transitions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_incoming_does_not_refresh_deadline() {
        let mut handler = PairingHandler::new();
        handler
            .handle_pair_message(&PairMessage::request())
            .unwrap();

        tokio::time::advance(PAIRING_TIMEOUT - Duration::from_secs(1)).await;
        handler
            .handle_pair_message(&PairMessage::request())
            .unwrap();

        // Original deadline stands: two more seconds pass it
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(handler.accept_pairing().is_none());
        assert_eq!(handler.state(), TrustState::Unpaired);
    }
}

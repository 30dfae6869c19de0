//! Device Session
//!
//! One `DeviceSession` binds everything this crate knows about a single
//! peer: its identity, the pairing trust state machine, the per-session
//! handler registry, the outbound send queue and the set of in-flight
//! payload transfers.
//!
//! ## Message flow
//!
//! The transport collaborator feeds deserialized messages into
//! [`DeviceSession::receive`] and drains serialized messages from the
//! receiver returned by [`DeviceSession::new`]. Inside `receive`, pairing
//! messages are routed straight to the trust machine; everything else
//! passes the trust gate and is dispatched to capability handlers.
//!
//! ## Concurrency
//!
//! `receive` takes `&mut self`, so dispatch within one session is strictly
//! sequential: a handler never observes a torn trust transition mid-message,
//! and a slow handler delays only its own session. Sessions for different
//! peers live in independent tasks and process concurrently. Payload
//! transfers run as spawned tasks of their own, so a large file never
//! blocks control messages.
//!
//! A handler that blocks in `receive` stalls its session's inbound lane;
//! that is an accepted cost of the sequential guarantee. Bounding handler
//! execution time is a possible future strategy.

use crate::config::DeviceConfig;
use crate::device::Device;
use crate::notification::{ContentOpener, NotificationSink, PairingDecisionRequest};
use crate::pairing::{PairingHandler, PairingUpdate, TrustHook, TrustState, PAIR_MESSAGE_TYPE};
use crate::plugins::{CapabilityHandler, HandlerRegistry};
use crate::transfer::{PayloadOpener, TransferHandle};
use crate::{Message, ProtocolError, Result};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the per-session outbound queue
const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// External collaborators a session is constructed with
///
/// Dependency-injected rather than reached through globals, so tests and
/// alternative frontends can swap any of them.
pub struct SessionCollaborators {
    /// Desktop alert surface
    pub notifications: Arc<dyn NotificationSink>,
    /// Opens shared text/URLs and finished-transfer locations
    pub opener: Arc<dyn ContentOpener>,
    /// Turns payload descriptors into byte streams
    pub payloads: Arc<dyn PayloadOpener>,
    /// Per-device key/value settings
    pub config: Arc<DeviceConfig>,
}

/// Handler-facing view of a session
///
/// Passed to [`CapabilityHandler::receive`]; lets a handler send reply
/// messages, start payload transfers, and reach the injected collaborators,
/// without handing it the session's trust state.
#[derive(Clone)]
pub struct SessionContext {
    /// Stable id of the peer this session talks to
    pub device_id: String,
    /// Display name of the peer
    pub device_name: String,
    /// Per-device settings store
    pub config: Arc<DeviceConfig>,
    /// Alert surface
    pub notifications: Arc<dyn NotificationSink>,
    /// Inline content hand-off
    pub opener: Arc<dyn ContentOpener>,
    /// Payload stream source
    pub payloads: Arc<dyn PayloadOpener>,
    outbound: mpsc::Sender<Message>,
    transfers: Arc<StdMutex<Vec<TransferHandle>>>,
}

impl SessionContext {
    /// Queue a message for the peer
    ///
    /// Messages to the same peer leave in the order they were queued.
    pub async fn send(&self, message: Message) -> Result<()> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| ProtocolError::NetworkError("outbound queue closed".to_string()))
    }

    /// Track an in-flight transfer with the session
    ///
    /// The session prunes finished handles and aborts the rest when the
    /// peer disconnects.
    pub fn track_transfer(&self, handle: TransferHandle) {
        if let Ok(mut transfers) = self.transfers.lock() {
            transfers.push(handle);
        }
    }
}

#[cfg(test)]
impl SessionContext {
    /// Bare context for handler unit tests
    pub(crate) fn for_tests() -> Self {
        use crate::notification::NullSink;

        struct NoopOpener;
        impl ContentOpener for NoopOpener {
            fn open_text(&self, _text: &str) -> Result<()> {
                Ok(())
            }
            fn open_url(&self, _url: &str) -> Result<()> {
                Ok(())
            }
            fn open_location(&self, _dir: &std::path::Path) -> Result<()> {
                Ok(())
            }
        }

        struct NoPayloads;
        #[async_trait::async_trait]
        impl PayloadOpener for NoPayloads {
            async fn open(&self, _message: &Message) -> Result<crate::transfer::PayloadStream> {
                Err(ProtocolError::InvalidState(
                    "no payload transport in tests".to_string(),
                ))
            }
        }

        // The receiver is dropped, so sends error; tests that observe
        // sent messages use for_tests_with_queue instead
        let (outbound, _rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        Self {
            device_id: "test-device".to_string(),
            device_name: "Test Device".to_string(),
            config: Arc::new(DeviceConfig::ephemeral()),
            notifications: Arc::new(NullSink),
            opener: Arc::new(NoopOpener),
            payloads: Arc::new(NoPayloads),
            outbound,
            transfers: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    /// Context for handler unit tests that need to observe sent messages
    pub(crate) fn for_tests_with_queue() -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let mut ctx = Self::for_tests();
        ctx.outbound = tx;
        (ctx, rx)
    }
}

/// The per-peer aggregate: identity, trust, dispatch, transfers
pub struct DeviceSession {
    device: Device,
    pairing: PairingHandler,
    registry: HandlerRegistry,
    ctx: SessionContext,
    transfers: Arc<StdMutex<Vec<TransferHandle>>>,
}

impl DeviceSession {
    /// Create a session for a peer
    ///
    /// The returned receiver is the outbound lane: the transport
    /// collaborator serializes and delivers the messages it yields, in
    /// order. Trust starts from the device's persisted snapshot.
    pub fn new(
        device: Device,
        collaborators: SessionCollaborators,
    ) -> (Self, mpsc::Receiver<Message>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let transfers = Arc::new(StdMutex::new(Vec::new()));

        let ctx = SessionContext {
            device_id: device.id().to_string(),
            device_name: device.name().to_string(),
            config: collaborators.config,
            notifications: collaborators.notifications,
            opener: collaborators.opener,
            payloads: collaborators.payloads,
            outbound: outbound_tx,
            transfers: transfers.clone(),
        };

        let pairing = PairingHandler::restored(device.is_paired());

        info!(
            "Session created for {} ({}), paired: {}",
            device.name(),
            device.id(),
            device.is_paired()
        );

        (
            Self {
                device,
                pairing,
                registry: HandlerRegistry::new(),
                ctx,
                transfers,
            },
            outbound_rx,
        )
    }

    /// The peer's identity record
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Current trust state
    pub fn trust_state(&self) -> TrustState {
        self.pairing.state()
    }

    /// Check whether capability messages are being dispatched
    pub fn is_paired(&self) -> bool {
        self.pairing.is_paired()
    }

    /// Install the persistence hook invoked on trust edges
    ///
    /// Typically wired to `DeviceRegistry::set_paired` so the snapshot
    /// survives restarts.
    pub fn set_trust_hook(&mut self, hook: TrustHook) {
        self.pairing.set_trust_hook(hook);
    }

    /// Handler-facing view of this session
    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Register a handler for every message type it declares
    pub fn register_handler(&mut self, handler: &Arc<dyn CapabilityHandler>) {
        self.registry.register_handler(handler);
    }

    /// Register a handler for a single message type
    pub fn register(&mut self, message_type: impl Into<String>, handler: &Arc<dyn CapabilityHandler>) {
        self.registry.register(message_type, handler);
    }

    /// Remove a handler from all message types
    pub fn unregister_handler(&mut self, handler: &Arc<dyn CapabilityHandler>) {
        self.registry.unregister(handler);
    }

    /// Queue a message for the peer
    pub async fn send(&self, message: Message) -> Result<()> {
        self.ctx.send(message).await
    }

    /// Entry point for inbound messages from the transport collaborator
    ///
    /// Returns the number of handlers invoked. Pairing messages are routed
    /// to the trust machine and count as zero. Messages failing the trust
    /// gate or naming an unknown type are dropped silently; neither is an
    /// error, and nothing about it is revealed to the sender.
    pub async fn receive(&mut self, message: Message) -> usize {
        self.pairing.expire_if_due();

        if message.is_type(PAIR_MESSAGE_TYPE) {
            match self.pairing.handle_pair_message(&message) {
                Ok(PairingUpdate::DecisionRequested) => {
                    self.ctx
                        .notifications
                        .pairing_decision_requested(PairingDecisionRequest {
                            peer_id: self.device.id().to_string(),
                            peer_name: self.device.name().to_string(),
                        });
                }
                Ok(_) => {}
                Err(e) => {
                    // Malformed pairing bodies are dropped, never fatal
                    warn!("Ignoring malformed pairing message: {}", e);
                }
            }
            return 0;
        }

        let paired = self.pairing.is_paired();
        let invoked = self.registry.dispatch(&message, paired, &self.ctx).await;

        if !paired && invoked == 0 {
            debug!(
                "Dropped {} from untrusted peer {}",
                message.message_type,
                self.device.id()
            );
        }

        self.prune_finished_transfers();
        invoked
    }

    /// Start pairing with the peer
    ///
    /// Queues the request message when a new attempt starts; a no-op while
    /// already paired or with a request in flight.
    pub async fn request_pairing(&mut self) -> Result<()> {
        if let Some(message) = self.pairing.request_pairing() {
            self.ctx.send(message).await?;
        }
        Ok(())
    }

    /// Accept the peer's pending pairing request
    ///
    /// A no-op when no request is pending (including one that expired).
    pub async fn accept_pairing(&mut self) -> Result<()> {
        if let Some(message) = self.pairing.accept_pairing() {
            self.ctx.send(message).await?;
        }
        Ok(())
    }

    /// Reject the peer's pending pairing request
    pub async fn reject_pairing(&mut self) -> Result<()> {
        if let Some(message) = self.pairing.reject_pairing() {
            self.ctx.send(message).await?;
        }
        Ok(())
    }

    /// End the established pairing
    pub async fn unpair(&mut self) -> Result<()> {
        if let Some(message) = self.pairing.unpair() {
            self.ctx.send(message).await?;
        }
        Ok(())
    }

    /// Revert an expired pairing attempt, returning true if one expired
    pub fn check_pairing_timeout(&mut self) -> bool {
        self.pairing.expire_if_due()
    }

    /// Number of transfers not yet in a terminal state
    pub fn active_transfer_count(&self) -> usize {
        self.transfers
            .lock()
            .map(|transfers| transfers.iter().filter(|t| !t.is_finished()).count())
            .unwrap_or(0)
    }

    /// Abort every in-flight transfer (peer disconnected)
    ///
    /// Each aborted transfer releases its partial destination file and
    /// emits its single terminal failure event.
    pub fn abort_transfers(&self) {
        if let Ok(transfers) = self.transfers.lock() {
            for transfer in transfers.iter() {
                transfer.abort();
            }
        }
    }

    fn prune_finished_transfers(&self) {
        if let Ok(mut transfers) = self.transfers.lock() {
            transfers.retain(|t| !t.is_finished());
        }
    }

    /// Spawn a task that reverts expired pairing attempts on an idle link
    ///
    /// Passive expiry already covers every trust interaction; this timer
    /// makes the revert observable without one. The task ends when the
    /// session is dropped.
    pub fn spawn_pairing_timeout_checker(
        session: &Arc<Mutex<DeviceSession>>,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(session);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                let Some(session) = weak.upgrade() else {
                    break;
                };
                session.lock().await.check_pairing_timeout();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceInfo, DeviceType};
    use crate::notification::NullSink;
    use crate::pairing::PairMessage;

    fn test_device(name: &str) -> Device {
        Device::from_contact(DeviceInfo::new(name, DeviceType::Phone))
    }

    fn collaborators() -> SessionCollaborators {
        let ctx = SessionContext::for_tests();
        SessionCollaborators {
            notifications: Arc::new(NullSink),
            opener: ctx.opener.clone(),
            payloads: ctx.payloads.clone(),
            config: Arc::new(DeviceConfig::ephemeral()),
        }
    }

    #[tokio::test]
    async fn test_send_preserves_order() {
        let (session, mut outbound) = DeviceSession::new(test_device("Phone"), collaborators());

        for i in 0..5i64 {
            session
                .send(Message::new("devicelink.ping").with_body_field("seq", i))
                .await
                .unwrap();
        }

        for i in 0..5i64 {
            let message = outbound.recv().await.unwrap();
            assert_eq!(message.get("seq", -1).unwrap(), i);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pair_message_routes_to_trust_machine() {
        let (mut session, _outbound) = DeviceSession::new(test_device("Phone"), collaborators());

        let invoked = session.receive(PairMessage::request()).await;
        assert_eq!(invoked, 0);
        assert!(matches!(
            session.trust_state(),
            TrustState::PairRequested { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_queues_confirmation() {
        let (mut session, mut outbound) = DeviceSession::new(test_device("Phone"), collaborators());

        session.receive(PairMessage::request()).await;
        session.accept_pairing().await.unwrap();
        assert!(session.is_paired());

        let confirmation = outbound.recv().await.unwrap();
        assert!(confirmation.is_type(PAIR_MESSAGE_TYPE));
        assert!(confirmation.get("pair", false).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_pair_message_is_dropped() {
        let (mut session, _outbound) = DeviceSession::new(test_device("Phone"), collaborators());

        // No pair field at all
        let invoked = session.receive(Message::new(PAIR_MESSAGE_TYPE)).await;
        assert_eq!(invoked, 0);
        assert_eq!(session.trust_state(), TrustState::Unpaired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restored_trust_skips_pairing() {
        let mut device = test_device("Phone");
        device.set_paired(true);
        let (session, _outbound) = DeviceSession::new(device, collaborators());
        assert!(session.is_paired());
    }
}

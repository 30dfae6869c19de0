//! Devicelink Core
//!
//! This library implements the device communication core of a desktop
//! device-sync application: typed message envelopes, per-peer pairing
//! trust, capability handler dispatch, and payload (file) transfers.
//!
//! The physical transport (TLS/socket layer), the desktop notification
//! surface, per-handler OS side effects, and the plugin loading mechanism
//! are external collaborators; this crate defines the interfaces they plug
//! into ([`PayloadOpener`], [`NotificationSink`], [`ContentOpener`],
//! [`CommandRunner`](plugins::runcommand::CommandRunner),
//! [`InputInjector`](plugins::mousepad::InputInjector)).

pub mod config;
pub mod device;
pub mod fs_utils;
pub mod message;
pub mod notification;
pub mod pairing;
pub mod plugins;
pub mod session;
pub mod transfer;

mod error;

pub use config::DeviceConfig;
pub use device::{Device, DeviceInfo, DeviceRegistry, DeviceType};
pub use error::{ProtocolError, Result};
pub use message::{current_timestamp, FieldValue, Message, Value};
pub use notification::{
    ContentOpener, NotificationSink, NullSink, PairingDecisionRequest, SystemOpener,
    TransferResult,
};
pub use pairing::{
    PairDirection, PairMessage, PairingHandler, PairingUpdate, TrustState, PAIRING_TIMEOUT,
    PAIR_MESSAGE_TYPE,
};
pub use plugins::{CapabilityHandler, HandlerRegistry};
pub use session::{DeviceSession, SessionCollaborators, SessionContext};
pub use transfer::{
    autoinc_filename, resolve_destination, PayloadOpener, PayloadStream, PayloadTransfer,
    TransferHandle, TransferState,
};

/// Protocol version we implement
pub const PROTOCOL_VERSION: u32 = 8;

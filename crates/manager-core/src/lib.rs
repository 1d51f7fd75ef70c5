//! # trunkline-manager-core
//!
//! Client for the PBX manager interface: one persistent authenticated socket,
//! line-oriented `Key: Value` framing, action/response correlation safe under
//! concurrent callers, a typed feed of unsolicited events, and supervised
//! reconnection with exponential backoff.
//!
//! The crate exposes two things to the rest of the trunkline stack:
//!
//! - [`ManagerClient::submit`] — request/response, correlated by action id
//! - [`ManagerClient::subscribe`] — unsolicited [`ManagerEvent`]s in wire order
//!
//! See [`client`] for the connection lifecycle and degraded-mode semantics.

pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod protocol;

pub use client::{ConnectionState, ManagerClient};
pub use config::{ManagerConfig, ReconnectPolicy, DEFAULT_MANAGER_PORT};
pub use error::{ManagerError, ManagerResult};
pub use event::{ManagerEvent, CHANNEL_STATE_ANSWERED};
pub use protocol::{ManagerResponse, Message, MessageBuffer};

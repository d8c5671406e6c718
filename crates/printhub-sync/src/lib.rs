//! # printhub-sync: Realtime Channel for the PrintHub Base Station
//!
//! Keeps one WebSocket open to the cloud backend so a station can be
//! driven remotely and report what its printers are doing.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Channel Architecture                             │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 ChannelAgent (started by the station)            │  │
//! │  │   routes SubmitJob / CancelJob / Control to the ControlPlane     │  │
//! │  │   forwards every JobEvent as JobStatus                           │  │
//! │  │   sends Heartbeat, PrinterSnapshot and AnalyticsSummary          │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │                               ▼                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                          Transport                               │  │
//! │  │   WebSocket client • Hello on connect • fixed reconnect delay    │  │
//! │  │   OutboundBuffer while down, flushed in order on reconnect       │  │
//! │  │   Offline after N failed attempts, slow retry afterwards         │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`agent`] - `ChannelAgent` and its builder
//! - [`buffer`] - Outbound message buffer
//! - [`error`] - Channel error types
//! - [`protocol`] - Message types on the wire
//! - [`transport`] - WebSocket client with reconnection

pub mod agent;
pub mod buffer;
pub mod error;
pub mod protocol;
pub mod transport;

pub use agent::{ChannelAgent, ChannelAgentBuilder};
pub use buffer::OutboundBuffer;
pub use error::{SyncError, SyncResult};
pub use protocol::{ChannelMessage, ControlCommand, JobSubmission, PROTOCOL_VERSION};
pub use transport::{ConnectionState, Transport, TransportConfig, TransportHandle};

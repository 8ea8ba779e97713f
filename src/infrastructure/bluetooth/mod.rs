//! Bluetooth Module
//!
//! Connection core for the headset: transport drivers, the request
//! scheduler that serializes every operation, and the mailbox protocol.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      LinkService                         │
//! │  (Public API: connect, read, stream, configure, ...)     │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ LinkRequest
//!                       ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                   RequestScheduler                       │
//! │  (One worker thread, handshake in Connection)            │
//! └──────┬──────────────────┬──────────────────┬────────────┘
//!        │                  │                  │
//!        ▼                  ▼                  ▼
//! ┌────────────┐     ┌────────────┐     ┌────────────┐
//! │  LeDriver  │     │ SppDriver  │     │AudioDriver │
//! │  - GATT    │     │ - Envelope │     │ - Monitor  │
//! └────────────┘     └────────────┘     └────────────┘
//!        │                  │
//!        └──── Mailbox ◄────┘   (command routing over Protocol)
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - UUIDs, mailbox codes, command framing and decoders
//! - [`mailbox`] - Correlates mailbox responses with pending commands
//! - [`driver`] - Transport driver trait and driver events
//! - [`scanner`] - Scan result filtering
//! - [`le`], [`spp`], [`audio`] - Transport drivers
//! - [`scheduler`] - Single-worker request queue
//! - [`connection`] - Handshake steps and state transitions
//! - [`service`] - Main service facade
//! - [`simulated`] - In-process headset for demos and tests

pub mod audio;
pub mod connection;
pub mod driver;
pub mod le;
pub mod mailbox;
pub mod protocol;
pub mod scanner;
pub mod scheduler;
pub mod service;
pub mod simulated;
pub mod spp;

// Re-export main service for convenience
pub use scheduler::{LinkRequest, RequestHandle};
pub use service::LinkService;

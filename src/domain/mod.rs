//! Domain types: connection state, device information, notifications and settings.

pub mod models;
pub mod registry;
pub mod settings;
pub mod state;

//! Platform-facing pieces: bluetooth transports, logging and wait primitives.

pub mod bluetooth;
pub mod logging;
pub mod sync;

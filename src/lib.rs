//! ficha - application shield engine
//!
//! Watches the process table, terminates watchlisted applications while the
//! shield is locked and exposes a control surface over a local socket.

pub mod cli;
pub mod constants;
pub mod daemon;
pub mod engine;
pub mod events;
pub mod models;
pub mod monitor;
pub mod output;
pub mod shield;
pub mod store;

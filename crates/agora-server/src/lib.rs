//! # agora-server
//!
//! HTTP/WebSocket front end for the Agora message bus: configuration
//! loading, session handling, and metrics export. The `agora` binary is a
//! thin wrapper around [`handlers::run_server`].

pub mod config;
pub mod handlers;
pub mod metrics;

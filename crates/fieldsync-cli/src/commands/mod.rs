//! Command handlers

pub mod auth;
pub mod config;
pub mod queue;
pub mod record;
pub mod status;
pub mod sync;
pub mod watch;

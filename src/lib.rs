//! clux - Session manager for Claude Code agents running inside tmux
//!
//! This library crate exposes internal modules for integration testing.

pub mod config;
pub mod data;
pub mod display;
pub mod error;
pub mod integrations;
pub mod manager;
pub mod navigator;
pub mod reconcile;
pub mod store;
pub mod util;

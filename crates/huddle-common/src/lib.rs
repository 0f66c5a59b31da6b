//! # huddle-common
//!
//! Shared types, configuration, error handling, and utilities used across all Huddle crates.
//! This is the foundation layer: the lobby wire protocol and the identifiers it carries,
//! plus the config and error contracts. No call logic lives here.

pub mod config;
pub mod error;
pub mod ice;
pub mod ids;
pub mod protocol;
pub mod validation;

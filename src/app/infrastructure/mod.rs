//! Infrastructure layer - external integrations and utilities.
//!
//! This module contains code that interfaces with external systems:
//! - Error types shared by the host and the plugin runtime

pub mod error;

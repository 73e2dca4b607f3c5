//! Domain layer - core data structures and types.
//!
//! This module contains the fundamental domain models:
//! - Extension specs and the per-note style payload
//! - Render settings

pub mod extension;
pub mod settings;

pub use extension::{ExtensionSpec, NoteStyle};
pub use settings::RenderSettings;

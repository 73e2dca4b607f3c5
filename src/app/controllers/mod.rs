//! Controllers layer - orchestration and coordination.
//!
//! This module ties the services together per note:
//! - Markdown preview (plugins, scoped stylesheet, rendering)

pub mod preview;

pub use preview::{NotePreview, RenderResult};

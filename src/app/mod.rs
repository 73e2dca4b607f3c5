//! Application layer - organized by Clean Architecture principles.
//!
//! # Structure
//!
//! - `domain/` - Core data structures (ExtensionSpec, NoteStyle, RenderSettings)
//! - `controllers/` - Orchestration (NotePreview)
//! - `services/` - Business operations (scoping, highlighting, plugins, rendering)
//! - `infrastructure/` - Error types

pub mod controllers;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-exports for convenient external access
pub use controllers::{NotePreview, RenderResult};
pub use domain::{ExtensionSpec, NoteStyle, RenderSettings};
pub use infrastructure::error::{AppError, PluginError, Result};
pub use services::css_scope::scope_css;
pub use services::markdown::{MarkdownRenderer, render_markdown};
pub use services::md_highlight::highlight_markdown;
pub use services::plugins::{
    AllowListAdditions, CompiledExtension, CompiledPlugins, PluginRuntime, compile_plugins,
};
pub use services::text_ops::note_scope_class;

//! Services layer - the rendering pipeline and its building blocks.
//!
//! - Stylesheet scoping
//! - Raw markdown highlighting for the editor overlay
//! - Plugin compilation and runtime
//! - Markdown rendering, code highlighting and sanitization
//! - Text operations

pub mod css_scope;
pub mod markdown;
pub mod md_highlight;
pub mod plugins;
pub mod sanitize;
pub mod syntax;
pub mod text_ops;

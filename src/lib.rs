//! Markdown note rendering with per-note user extensions.
//!
//! ```no_run
//! use notemark::{ExtensionSpec, NotePreview, NoteStyle, RenderSettings};
//!
//! let style = NoteStyle {
//!     custom_css: Some("h1 { color: teal }".into()),
//!     markdown_plugins: vec![ExtensionSpec::new("hl", "Highlights", "return { css = 'mark { padding: 0 2px }' }")],
//! };
//! let preview = NotePreview::new("note-1", &style, &RenderSettings::load());
//! let result = preview.render("# Hello ==world==");
//! println!("<style>{}</style>{}", result.stylesheet, result.html);
//! ```

pub mod app;

pub use app::*;

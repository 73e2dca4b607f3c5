use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::app::domain::{NoteStyle, RenderSettings};
use crate::app::infrastructure::error::Result;
use crate::app::services::css_scope::scope_css;
use crate::app::services::markdown::MarkdownRenderer;
use crate::app::services::md_highlight::highlight_markdown;
use crate::app::services::plugins::{PluginRuntime, compile_plugins};
use crate::app::services::text_ops::{escape_html, note_scope_class};

/// One render of a note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderResult {
    pub html: String,
    /// Custom and plugin CSS, scoped to the note.
    pub stylesheet: String,
    pub errors: BTreeMap<String, String>,
}

/// Preview state for one note: plugins compiled once, rendered many times.
///
/// Holds a Lua state, so it must stay on the thread that created it.
#[derive(Debug)]
pub struct NotePreview {
    scope_class: String,
    renderer: MarkdownRenderer,
    runtime: PluginRuntime,
    stylesheet: String,
    errors: BTreeMap<String, String>,
}

impl NotePreview {
    pub fn new(note_id: &str, style: &NoteStyle, settings: &RenderSettings) -> Self {
        let compiled = compile_plugins(&style.markdown_plugins, settings);
        let scope_class = note_scope_class(note_id);

        let combined = [style.custom_css.as_deref().unwrap_or_default(), compiled.stylesheet.as_str()]
            .into_iter()
            .filter(|css| !css.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        let stylesheet = scope_css(&combined, &format!(".{}", scope_class));

        if !compiled.errors.is_empty() {
            log::info!(
                "note {}: {} of {} plugins failed",
                note_id,
                compiled.errors.len(),
                style.enabled_plugins().count()
            );
        }

        Self {
            scope_class,
            renderer: MarkdownRenderer::new(settings),
            runtime: compiled.runtime,
            stylesheet,
            errors: compiled.errors,
        }
    }

    pub fn scope_class(&self) -> &str {
        &self.scope_class
    }

    pub fn stylesheet(&self) -> &str {
        &self.stylesheet
    }

    pub fn errors(&self) -> &BTreeMap<String, String> {
        &self.errors
    }

    pub fn render(&self, text: &str) -> RenderResult {
        RenderResult {
            html: self.renderer.render(text, &self.runtime),
            stylesheet: self.stylesheet.clone(),
            errors: self.errors.clone(),
        }
    }

    /// Editor overlay markup for the raw text.
    pub fn highlight(&self, text: &str) -> String {
        highlight_markdown(text)
    }

    /// A self-contained HTML document for the rendered note.
    pub fn standalone_page(&self, title: &str, text: &str) -> String {
        let result = self.render(text);
        format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n<style>\n{}\n</style>\n</head>\n<body>\n<article class=\"{}\">\n{}</article>\n</body>\n</html>\n",
            escape_html(title),
            result.stylesheet.replace("</", "<\\/"),
            self.scope_class,
            result.html
        )
    }

    /// Write [`standalone_page`](Self::standalone_page) to `path`.
    pub fn write_page(&self, path: &Path, title: &str, text: &str) -> Result<()> {
        fs::write(path, self.standalone_page(title, text))?;
        Ok(())
    }
}

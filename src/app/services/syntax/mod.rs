//! Code-block highlighting for rendered notes.
//!
//! Output is class-based (`<span class="source rust">`), so colours come from
//! the note's stylesheet rather than a baked-in theme.

use std::panic::{self, AssertUnwindSafe};
use std::sync::LazyLock;

use syntect::html::{ClassStyle, ClassedHTMLGenerator};
use syntect::parsing::{SyntaxReference, SyntaxSet};
use syntect::util::LinesWithEndings;

use crate::app::services::text_ops::escape_html;

static SYNTAX_SET: LazyLock<SyntaxSet> = LazyLock::new(SyntaxSet::load_defaults_newlines);

pub const PLAIN_TEXT: &str = "text";

/// A highlighted (or escaped) code region ready to be wrapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighlightedCode {
    /// Label used for `data-lang` and the `language-*` class.
    pub lang: String,
    pub html: String,
}

/// Highlights fenced code with the bundled syntax definitions.
#[derive(Debug, Clone, Copy)]
pub struct CodeHighlighter {
    enabled: bool,
}

impl Default for CodeHighlighter {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CodeHighlighter {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Resolve the syntax for a block: the info-string token first, then the
    /// first line of the code (shebangs, modelines), else none.
    pub fn detect_syntax(&self, lang: &str, code: &str) -> Option<&'static SyntaxReference> {
        syntax_for_token(lang).or_else(|| syntax_for_first_line(code))
    }

    /// Highlight `code`. Never fails: any error or panic inside the
    /// highlighter yields the escaped source.
    ///
    /// The label names the syntax actually used, so a block whose tag is
    /// unknown but whose first line is recognised is labelled by the latter.
    pub fn highlight(&self, lang: &str, code: &str) -> HighlightedCode {
        let lang = language_label(lang);
        let (syntax, label) = if !self.enabled {
            (None, lang)
        } else if let Some(syntax) = syntax_for_token(&lang) {
            (Some(syntax), lang)
        } else if let Some(syntax) = syntax_for_first_line(code) {
            (Some(syntax), syntax_label(syntax))
        } else {
            (None, lang)
        };
        let label = if label.is_empty() { PLAIN_TEXT.to_string() } else { label };

        let html = match syntax {
            Some(syntax) => highlight_with(syntax, code).unwrap_or_else(|| escape_html(code)),
            None => escape_html(code),
        };

        HighlightedCode { lang: label, html }
    }
}

fn syntax_for_token(lang: &str) -> Option<&'static SyntaxReference> {
    if lang.is_empty() {
        return None;
    }
    let set: &'static SyntaxSet = &SYNTAX_SET;
    set.find_syntax_by_token(lang).filter(|s| s.name != "Plain Text")
}

fn syntax_for_first_line(code: &str) -> Option<&'static SyntaxReference> {
    let set: &'static SyntaxSet = &SYNTAX_SET;
    let first_line = code.lines().next().unwrap_or_default();
    set.find_syntax_by_first_line(first_line).filter(|s| s.name != "Plain Text")
}

/// The syntax's first file extension, e.g. `py` for Python.
fn syntax_label(syntax: &SyntaxReference) -> String {
    syntax
        .file_extensions
        .first()
        .cloned()
        .unwrap_or_else(|| syntax.name.to_ascii_lowercase())
}

fn highlight_with(syntax: &SyntaxReference, code: &str) -> Option<String> {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut generator =
            ClassedHTMLGenerator::new_with_class_style(syntax, &SYNTAX_SET, ClassStyle::Spaced);
        for line in LinesWithEndings::from(code) {
            generator.parse_html_for_line_which_includes_newline(line)?;
        }
        Ok::<_, syntect::Error>(generator.finalize())
    }));

    match result {
        Ok(Ok(html)) => Some(html),
        Ok(Err(e)) => {
            log::debug!("highlighting {} failed: {}", syntax.name, e);
            None
        }
        Err(_) => {
            log::error!("highlighter panicked on a {} block", syntax.name);
            None
        }
    }
}

/// First word of an info string, restricted to characters safe in an
/// attribute and a class name.
pub fn language_label(info: &str) -> String {
    info.split_whitespace()
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+' | '#' | '.'))
        .collect::<String>()
        .to_ascii_lowercase()
}

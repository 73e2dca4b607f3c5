//! The capability object handed to every plugin chunk.
//!
//! ```lua
//! local api = ...
//! api.escape("<b>")                       --> "&lt;b&gt;"
//! api.inline("Ctrl", "kbd-key", "kbd")    --> '<kbd class="kbd-key">Ctrl</kbd>'
//! api.block("Note", "callout")            --> '<div class="callout">Note</div>'
//! ```

use mlua::{Lua, Table};

use crate::app::services::text_ops::escape_html;

const INLINE_TAG: &str = "span";
const BLOCK_TAG: &str = "div";

/// Keep `[A-Za-z0-9_-]` words, collapsing whitespace.
pub fn sanitize_class(class: &str) -> String {
    let cleaned: String = class
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Accept `[A-Za-z][A-Za-z0-9-]*` as a tag name, otherwise use `fallback`.
pub fn sanitize_tag(tag: Option<&str>, fallback: &str) -> String {
    let Some(tag) = tag.map(str::trim) else {
        return fallback.to_string();
    };
    let mut chars = tag.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid {
        tag.to_ascii_lowercase()
    } else {
        fallback.to_string()
    }
}

/// Build `<tag class="...">escaped text</tag>`.
pub fn wrap_markup(text: &str, class: Option<&str>, tag: Option<&str>, fallback: &str) -> String {
    let tag = sanitize_tag(tag, fallback);
    let class = class.map(sanitize_class).unwrap_or_default();
    if class.is_empty() {
        format!("<{tag}>{}</{tag}>", escape_html(text))
    } else {
        format!("<{tag} class=\"{class}\">{}</{tag}>", escape_html(text))
    }
}

pub(crate) fn create_api(lua: &Lua) -> mlua::Result<Table> {
    let api = lua.create_table()?;

    api.set(
        "escape",
        lua.create_function(|_, text: Option<String>| Ok(escape_html(text.as_deref().unwrap_or_default())))?,
    )?;

    api.set(
        "inline",
        lua.create_function(
            |_, (text, class, tag): (Option<String>, Option<String>, Option<String>)| {
                Ok(wrap_markup(
                    text.as_deref().unwrap_or_default(),
                    class.as_deref(),
                    tag.as_deref(),
                    INLINE_TAG,
                ))
            },
        )?,
    )?;

    api.set(
        "block",
        lua.create_function(
            |_, (text, class, tag): (Option<String>, Option<String>, Option<String>)| {
                Ok(wrap_markup(
                    text.as_deref().unwrap_or_default(),
                    class.as_deref(),
                    tag.as_deref(),
                    BLOCK_TAG,
                ))
            },
        )?,
    )?;

    Ok(api)
}

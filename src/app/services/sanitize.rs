//! Allow-list HTML sanitization of rendered notes.
//!
//! Plugins may widen the tag and attribute lists, but the denylist below is
//! removed afterwards no matter what was requested, and URL schemes are never
//! widened.

use std::collections::HashSet;

use ammonia::Builder;

use crate::app::services::plugins::AllowListAdditions;

/// Tags that are never emitted.
const DENIED_TAGS: &[&str] = &[
    "script", "style", "iframe", "frame", "frameset", "object", "embed", "applet", "base", "meta",
    "link", "form", "noscript", "template",
];

/// Denied tags whose content is dropped too, not just the tag.
const CLEAN_CONTENT_TAGS: &[&str] = &[
    "script", "style", "iframe", "frame", "frameset", "object", "embed", "applet", "noscript",
    "template",
];

/// Attributes that are never emitted, besides every `on*` handler.
const DENIED_ATTRIBUTES: &[&str] = &["srcdoc", "formaction", "rel", "style"];

/// Markup the renderer itself produces on top of ammonia's defaults.
const RENDERER_TAGS: &[&str] = &["input"];
const GENERIC_ATTRIBUTES: &[&str] = &["class", "id"];
const GENERIC_ATTRIBUTE_PREFIXES: &[&str] = &["data-"];
const INPUT_ATTRIBUTES: &[&str] = &["type", "checked", "disabled"];

pub fn is_denied_attribute(name: &str) -> bool {
    name.starts_with("on") || DENIED_ATTRIBUTES.contains(&name)
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Sanitize rendered HTML, honouring plugin allow-list additions.
pub fn sanitize_html(html: &str, extra: &AllowListAdditions) -> String {
    let tags: Vec<&str> = extra
        .tags
        .iter()
        .map(String::as_str)
        .filter(|t| is_valid_name(t) && !DENIED_TAGS.contains(t))
        .collect();
    let attributes: Vec<&str> = extra
        .attributes
        .iter()
        .map(String::as_str)
        .filter(|a| is_valid_name(a) && !is_denied_attribute(a))
        .collect();

    let mut builder = Builder::default();
    builder
        .add_tags(RENDERER_TAGS)
        .add_tags(&tags)
        .rm_tags(DENIED_TAGS)
        .clean_content_tags(CLEAN_CONTENT_TAGS.iter().copied().collect::<HashSet<_>>())
        .add_generic_attributes(GENERIC_ATTRIBUTES)
        .add_generic_attributes(&attributes)
        .add_generic_attribute_prefixes(GENERIC_ATTRIBUTE_PREFIXES)
        .add_tag_attributes("input", INPUT_ATTRIBUTES)
        .link_rel(None);

    builder.clean(html).to_string()
}

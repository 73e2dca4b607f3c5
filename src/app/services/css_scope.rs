//! Stylesheet scoping.
//!
//! Rewrites a user-authored stylesheet so every rule only applies beneath a
//! root selector. This is a tolerant block walker, not a CSS parser: it tracks
//! brace depth to find blocks, recurses into conditional group rules and
//! leaves everything it does not understand untouched.

use std::sync::LazyLock;

use regex_lite::Regex;

static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid comment regex"));

/// At-rules whose body holds ordinary rules that must be scoped too.
const NESTING_AT_RULES: &[&str] = &["@media", "@supports", "@container", "@layer"];

/// At-rules whose body must never be selector-rewritten.
const OPAQUE_AT_RULES: &[&str] = &["@keyframes", "@font-face", "@property"];

/// Document-level selectors that map onto the scope root itself.
const ROOT_ALIASES: &[&str] = &[":root", "html", "body", ":host"];

/// Scope `css` so it only applies inside `root_selector`.
///
/// Malformed input never raises; the output is best effort.
pub fn scope_css(css: &str, root_selector: &str) -> String {
    let without_comments = COMMENT_RE.replace_all(css, "");
    let css = without_comments.trim();
    if css.is_empty() {
        return String::new();
    }
    scope_blocks(css, root_selector.trim())
}

fn scope_blocks(source: &str, root: &str) -> String {
    let mut out = String::with_capacity(source.len() + source.len() / 4);
    let mut rest = source;

    loop {
        let trimmed = rest.trim_start();
        out.push_str(&rest[..rest.len() - trimmed.len()]);
        rest = trimmed;
        if rest.is_empty() {
            break;
        }

        let Some(brace) = rest.find('{') else {
            out.push_str(rest);
            break;
        };

        // Statements (`@import ...;`, `@layer a, b;`, stray declarations)
        // end before the next block starts.
        if let Some(semi) = rest[..brace].find(';') {
            out.push_str(&rest[..=semi]);
            rest = &rest[semi + 1..];
            continue;
        }

        let header = rest[..brace].trim();
        let (body, consumed) = match matching_brace(rest, brace) {
            Some(close) => (&rest[brace + 1..close], close + 1),
            None => (&rest[brace + 1..], rest.len()),
        };

        if header.starts_with('@') {
            if has_prefix_ci(header, NESTING_AT_RULES) && !has_prefix_ci(header, OPAQUE_AT_RULES) {
                out.push_str(header);
                out.push('{');
                out.push_str(&scope_blocks(body, root));
                out.push('}');
            } else {
                // Opaque or unknown at-rule: keep verbatim.
                out.push_str(header);
                out.push('{');
                out.push_str(body);
                out.push('}');
            }
        } else {
            out.push_str(&scope_selector_list(header, root));
            out.push('{');
            out.push_str(body);
            out.push('}');
        }

        rest = &rest[consumed..];
    }

    out
}

/// Byte index of the `}` closing the `{` at `open`.
fn matching_brace(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, b) in text.bytes().enumerate().skip(open) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn has_prefix_ci(header: &str, prefixes: &[&str]) -> bool {
    let lower = header.to_ascii_lowercase();
    prefixes.iter().any(|p| lower.starts_with(p))
}

/// Split a selector list on commas that are not nested in `()` or `[]`.
pub fn split_selector_list(selectors: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut paren = 0usize;
    let mut bracket = 0usize;
    let mut start = 0;

    for (i, b) in selectors.bytes().enumerate() {
        match b {
            b'(' if bracket == 0 => paren += 1,
            b')' if bracket == 0 => paren = paren.saturating_sub(1),
            b'[' => bracket += 1,
            b']' => bracket = bracket.saturating_sub(1),
            b',' if paren == 0 && bracket == 0 => {
                parts.push(selectors[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }

    let last = selectors[start..].trim();
    if !last.is_empty() {
        parts.push(last);
    }
    parts
}

fn scope_selector_list(selectors: &str, root: &str) -> String {
    split_selector_list(selectors)
        .into_iter()
        .filter(|sel| !sel.is_empty())
        .map(|sel| scope_selector(sel, root))
        .collect::<Vec<_>>()
        .join(", ")
}

fn scope_selector(selector: &str, root: &str) -> String {
    for alias in ROOT_ALIASES {
        if let Some(tail) = strip_token(selector, alias) {
            return format!("{}{}", root, tail).trim().to_string();
        }
    }

    if root.is_empty() || strip_token(selector, root).is_some() {
        return selector.to_string();
    }

    format!("{} {}", root, selector)
}

/// Strip `token` from the front of `selector` when it is a whole token, i.e.
/// not followed by more identifier characters (`html` but not `html-card`).
fn strip_token<'a>(selector: &'a str, token: &str) -> Option<&'a str> {
    let head = selector.get(..token.len())?;
    if !head.eq_ignore_ascii_case(token) {
        return None;
    }
    let tail = &selector[token.len()..];
    match tail.chars().next() {
        Some(c) if c.is_alphanumeric() || c == '-' || c == '_' => None,
        _ => Some(tail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = ".note-scope-1";

    #[test]
    fn test_empty_input() {
        assert_eq!(scope_css("", ROOT), "");
        assert_eq!(scope_css("   \n\t", ROOT), "");
        assert_eq!(scope_css("/* only a comment */", ROOT), "");
    }

    #[test]
    fn test_simple_rule() {
        assert_eq!(
            scope_css("h1 { color: red }", ROOT),
            ".note-scope-1 h1{ color: red }"
        );
    }

    #[test]
    fn test_selector_list() {
        assert_eq!(
            scope_css(".a, .b > p{x:1}", ROOT),
            ".note-scope-1 .a, .note-scope-1 .b > p{x:1}"
        );
    }

    #[test]
    fn test_commas_inside_functions_and_attributes() {
        assert_eq!(
            scope_css(":is(h1, h2) a[title=\"x,y\"], em{x:1}", ROOT),
            ".note-scope-1 :is(h1, h2) a[title=\"x,y\"], .note-scope-1 em{x:1}"
        );
    }

    #[test]
    fn test_root_aliases() {
        assert_eq!(scope_css(":root{--x:1}", ROOT), ".note-scope-1{--x:1}");
        assert_eq!(scope_css("html{a:b}", ROOT), ".note-scope-1{a:b}");
        assert_eq!(scope_css("body p{a:b}", ROOT), ".note-scope-1 p{a:b}");
        assert_eq!(scope_css(":host{a:b}", ROOT), ".note-scope-1{a:b}");
        assert_eq!(scope_css(":root.dark{a:b}", ROOT), ".note-scope-1.dark{a:b}");
    }

    #[test]
    fn test_alias_needs_token_boundary() {
        assert_eq!(
            scope_css("html-card{a:b}", ROOT),
            ".note-scope-1 html-card{a:b}"
        );
        assert_eq!(scope_css("bodyish{a:b}", ROOT), ".note-scope-1 bodyish{a:b}");
    }

    #[test]
    fn test_comments_removed() {
        assert_eq!(
            scope_css("/* a\n { b } */ p { /* inner */ x: 1 }", ROOT),
            ".note-scope-1 p{  x: 1 }"
        );
    }

    #[test]
    fn test_media_rewrites_only_inner_selectors() {
        let out = scope_css("@media (max-width: 600px) { :root { --x: 1 } p { y: 2 } }", ROOT);
        assert_eq!(
            out,
            "@media (max-width: 600px){ .note-scope-1{ --x: 1 } .note-scope-1 p{ y: 2 } }"
        );
    }

    #[test]
    fn test_nested_group_rules() {
        let out = scope_css("@supports (display:grid){@media print{a{b:c}}}", ROOT);
        assert_eq!(out, "@supports (display:grid){@media print{.note-scope-1 a{b:c}}}");
    }

    #[test]
    fn test_opaque_at_rules_untouched() {
        let css = "@keyframes spin{from{a:b}to{c:d}}";
        assert_eq!(scope_css(css, ROOT), css);
        let css = "@font-face{font-family:x;src:url(a.woff)}";
        assert_eq!(scope_css(css, ROOT), css);
        let css = "@property --x{syntax:'<length>';inherits:false}";
        assert_eq!(scope_css(css, ROOT), css);
    }

    #[test]
    fn test_unknown_at_rule_passthrough() {
        let css = "@page :first{margin:1in}";
        assert_eq!(scope_css(css, ROOT), css);
    }

    #[test]
    fn test_statements_pass_through() {
        let out = scope_css("@import url(x.css);\n@layer base, theme;\np{a:b}", ROOT);
        assert_eq!(
            out,
            "@import url(x.css);\n@layer base, theme;\n.note-scope-1 p{a:b}"
        );
    }

    #[test]
    fn test_already_scoped_not_double_prefixed() {
        assert_eq!(
            scope_css(".note-scope-1 p{a:b}", ROOT),
            ".note-scope-1 p{a:b}"
        );
        // A longer class that merely shares the prefix is not "already scoped".
        assert_eq!(
            scope_css(".note-scope-12 p{a:b}", ROOT),
            ".note-scope-1 .note-scope-12 p{a:b}"
        );
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            ":root{--a:1} h1, h2 { color: var(--a) }",
            "@media (min-width: 1px) { :root.dark { --x: 1 } .a, .b { c: d } }",
            "@keyframes k { from { a: b } }\nbody > p:hover { x: y }",
            "@import 'x';\n@layer a { em { z: 1 } }",
            "p { unterminated: 1",
        ];
        for css in inputs {
            let once = scope_css(css, ROOT);
            let twice = scope_css(&once, ROOT);
            assert_eq!(once, twice, "not idempotent for {:?}", css);
        }
    }

    #[test]
    fn test_unmatched_brace_is_best_effort() {
        assert_eq!(scope_css("p { a: b", ROOT), ".note-scope-1 p{ a: b}");
        assert_eq!(scope_css("p { a: b } }", ROOT), ".note-scope-1 p{ a: b } }");
    }

    #[test]
    fn test_split_selector_list() {
        assert_eq!(
            split_selector_list("a, :not(b, c), [d=\",\"] , "),
            vec!["a", ":not(b, c)", "[d=\",\"]"]
        );
    }
}

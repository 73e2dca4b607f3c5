//! Live highlighting of raw markdown for the edit overlay.
//!
//! Not a markdown parser: it recognises a handful of constructs per line and
//! wraps them in `md-*` spans. Every source character is kept, so the output
//! lines up with the textarea it is drawn behind.

use std::sync::LazyLock;

use regex_lite::{Captures, Regex};

use super::text_ops::escape_html;

macro_rules! regex {
    ($name:ident, $re:expr) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($re).expect("valid regex"));
    };
}

regex!(FENCE_RE, r"^(\s*)(```|~~~)(\s*)(.*)$");
regex!(HEADING_RE, r"^(\s*)(#{1,6})(\s+)(.+)$");
regex!(QUOTE_RE, r"^(\s*)&gt;(\s?)(.*)$");
regex!(LIST_RE, r"^(\s*)([-+*]|\d+\.)(\s+)(.*)$");

regex!(CODE_SPAN_RE, r"`[^`]*`");
regex!(LINK_RE, r"\[([^\]]+)\]\(([^)]+)\)");
regex!(BOLD_RE, r"\*\*([^*]+)\*\*");
regex!(ITALIC_UNDERSCORE_RE, r"(^|[^\w])_([^_]+)_([^\w]|$)");
regex!(ITALIC_STAR_RE, r"(^|[^\w])\*([^*]+)\*([^\w]|$)");
regex!(STRIKE_RE, r"~~([^~]+)~~");

/// Placeholder delimiter; input NULs are replaced before masking.
const SLOT: char = '\u{0}';

/// Highlight raw markdown. Pure: the same input always yields the same output.
pub fn highlight_markdown(input: &str) -> String {
    let input = input.replace(SLOT, "\u{fffd}");
    let mut open_fence: Option<String> = None;
    let mut out = Vec::new();

    for raw_line in input.split('\n') {
        let line = escape_html(raw_line);

        if let Some(caps) = FENCE_RE.captures(&line) {
            let delimiter = &caps[2];
            let closes = open_fence.as_deref().map(|open| open == delimiter);
            match closes {
                None => open_fence = Some(delimiter.to_string()),
                Some(true) => open_fence = None,
                Some(false) => {
                    out.push(wrap("md-codeblock", &line));
                    continue;
                }
            }
            out.push(fence_line(&caps));
            continue;
        }

        if open_fence.is_some() {
            out.push(wrap("md-codeblock", &line));
            continue;
        }

        out.push(highlight_line(&line));
    }

    out.join("\n")
}

fn fence_line(caps: &Captures) -> String {
    let mut html = format!("{}{}{}", &caps[1], wrap("md-fence", &caps[2]), &caps[3]);
    if !caps[4].is_empty() {
        html.push_str(&wrap("md-fence-lang", &caps[4]));
    }
    html
}

/// Classify one escaped line outside a fence.
fn highlight_line(line: &str) -> String {
    if let Some(caps) = HEADING_RE.captures(line) {
        return marked_line(&caps, "md-heading");
    }
    if let Some(caps) = QUOTE_RE.captures(line) {
        return format!(
            "{}{}{}{}",
            &caps[1],
            wrap("md-sym", "&gt;"),
            &caps[2],
            wrap("md-quote", &highlight_inline(&caps[3]))
        );
    }
    if let Some(caps) = LIST_RE.captures(line) {
        return marked_line(&caps, "md-list");
    }
    highlight_inline(line)
}

/// `indent marker gap rest` lines (headings and list items).
fn marked_line(caps: &Captures, class: &str) -> String {
    format!(
        "{}{}{}{}",
        &caps[1],
        wrap("md-sym", &caps[2]),
        &caps[3],
        wrap(class, &highlight_inline(&caps[4]))
    )
}

/// Inline tokenization of already-escaped text.
///
/// Code spans and links are masked before emphasis runs so markers inside
/// them stay literal; they are restored links first, code last. Emphasis
/// output is masked as well so its own `*`/`_` markers are never re-matched.
fn highlight_inline(escaped: &str) -> String {
    let mut code_slots = Vec::new();
    let masked = mask(escaped, &CODE_SPAN_RE, 'C', &mut code_slots, |caps| {
        let raw = &caps[0];
        let inner = &raw[1..raw.len() - 1];
        format!("{}{}{}", wrap("md-sym", "`"), wrap("md-code", inner), wrap("md-sym", "`"))
    });

    let mut link_slots = Vec::new();
    let masked = mask(&masked, &LINK_RE, 'L', &mut link_slots, |caps| {
        format!(
            "{}{}{}{}{}{}",
            wrap("md-sym", "["),
            wrap("md-link-text", &caps[1]),
            wrap("md-sym", "]"),
            wrap("md-sym", "("),
            wrap("md-link-url", &caps[2]),
            wrap("md-sym", ")")
        )
    });

    let mut emphasis = Vec::new();
    let out = emphasize(&masked, &BOLD_RE, "**", "md-bold", false, &mut emphasis);
    let out = emphasize(&out, &ITALIC_UNDERSCORE_RE, "_", "md-italic", true, &mut emphasis);
    let out = emphasize(&out, &ITALIC_STAR_RE, "*", "md-italic", true, &mut emphasis);
    let out = emphasize(&out, &STRIKE_RE, "~~", "md-strike", false, &mut emphasis);

    let out = restore(&out, 'E', &emphasis);
    let out = restore(&out, 'L', &link_slots);
    restore(&out, 'C', &code_slots)
}

fn wrap(class: &str, inner: &str) -> String {
    format!("<span class=\"{}\">{}</span>", class, inner)
}

fn slot_key(kind: char, index: usize) -> String {
    format!("{}{}{}{}", SLOT, kind, index, SLOT)
}

/// Replace every match with an opaque key, remembering its rendered form.
fn mask(
    input: &str,
    re: &Regex,
    kind: char,
    slots: &mut Vec<String>,
    render: impl Fn(&Captures) -> String,
) -> String {
    re.replace_all(input, |caps: &Captures| {
        let key = slot_key(kind, slots.len());
        slots.push(render(caps));
        key
    })
    .into_owned()
}

/// Mask one emphasis construct. Word-bounded patterns capture the boundary
/// characters around the marker pair, which stay outside the slot.
fn emphasize(
    input: &str,
    re: &Regex,
    marker: &str,
    class: &str,
    bounded: bool,
    slots: &mut Vec<String>,
) -> String {
    re.replace_all(input, |caps: &Captures| {
        let (pre, inner, post) = if bounded {
            (&caps[1], &caps[2], &caps[3])
        } else {
            ("", &caps[1], "")
        };
        let key = slot_key('E', slots.len());
        slots.push(format!(
            "{}{}{}",
            wrap("md-sym", marker),
            wrap(class, inner),
            wrap("md-sym", marker)
        ));
        format!("{}{}{}", pre, key, post)
    })
    .into_owned()
}

/// Later slots may embed keys of earlier ones, so restore newest first.
fn restore(input: &str, kind: char, slots: &[String]) -> String {
    let mut out = input.to_string();
    for (i, html) in slots.iter().enumerate().rev() {
        out = out.replace(&slot_key(kind, i), html);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::services::text_ops::html_to_text;

    #[test]
    fn test_code_span_masks_emphasis() {
        let out = highlight_markdown("`*not italic*`");
        assert_eq!(
            out,
            "<span class=\"md-sym\">`</span><span class=\"md-code\">*not italic*</span><span class=\"md-sym\">`</span>"
        );
        assert!(!out.contains("md-italic"));
    }

    #[test]
    fn test_link_masks_emphasis() {
        let out = highlight_markdown("[a **b**](http://x/_y_)");
        assert!(out.contains("<span class=\"md-link-text\">a **b**</span>"));
        assert!(out.contains("<span class=\"md-link-url\">http://x/_y_</span>"));
        assert!(!out.contains("md-bold"));
        assert!(!out.contains("md-italic"));
    }

    #[test]
    fn test_heading() {
        let out = highlight_markdown("## Title **b**");
        assert_eq!(
            out,
            "<span class=\"md-sym\">##</span> <span class=\"md-heading\">Title \
             <span class=\"md-sym\">**</span><span class=\"md-bold\">b</span>\
             <span class=\"md-sym\">**</span></span>"
        );
    }

    #[test]
    fn test_blockquote_and_lists() {
        let out = highlight_markdown("> quoted\n- item\n12. ordinal");
        let lines: Vec<&str> = out.split('\n').collect();
        assert_eq!(
            lines[0],
            "<span class=\"md-sym\">&gt;</span> <span class=\"md-quote\">quoted</span>"
        );
        assert_eq!(
            lines[1],
            "<span class=\"md-sym\">-</span> <span class=\"md-list\">item</span>"
        );
        assert_eq!(
            lines[2],
            "<span class=\"md-sym\">12.</span> <span class=\"md-list\">ordinal</span>"
        );
    }

    #[test]
    fn test_emphasis_variants() {
        let out = highlight_markdown("a _it_ and *it2* and ~~gone~~");
        assert!(out.contains("<span class=\"md-italic\">it</span>"));
        assert!(out.contains("<span class=\"md-italic\">it2</span>"));
        assert!(out.contains("<span class=\"md-strike\">gone</span>"));
    }

    #[test]
    fn test_intraword_underscore_not_italic() {
        let out = highlight_markdown("snake_case_name");
        assert_eq!(out, "snake_case_name");
    }

    #[test]
    fn test_fenced_block_is_opaque() {
        let out = highlight_markdown("```rust\nlet x = *a* ** `b`;\n```\n*after*");
        let lines: Vec<&str> = out.split('\n').collect();
        assert_eq!(
            lines[0],
            "<span class=\"md-fence\">```</span><span class=\"md-fence-lang\">rust</span>"
        );
        assert_eq!(
            lines[1],
            "<span class=\"md-codeblock\">let x = *a* ** `b`;</span>"
        );
        assert_eq!(lines[2], "<span class=\"md-fence\">```</span>");
        assert!(lines[3].contains("md-italic"));
    }

    #[test]
    fn test_fence_closes_only_on_same_delimiter() {
        let out = highlight_markdown("~~~\n```\n# not heading\n~~~\n# heading");
        let lines: Vec<&str> = out.split('\n').collect();
        assert_eq!(lines[1], "<span class=\"md-codeblock\">```</span>");
        assert_eq!(lines[2], "<span class=\"md-codeblock\"># not heading</span>");
        assert!(lines[4].contains("md-heading"));
    }

    #[test]
    fn test_indented_fence() {
        let out = highlight_markdown("  ```  js\n  x");
        let lines: Vec<&str> = out.split('\n').collect();
        assert_eq!(
            lines[0],
            "  <span class=\"md-fence\">```</span>  <span class=\"md-fence-lang\">js</span>"
        );
        assert_eq!(lines[1], "<span class=\"md-codeblock\">  x</span>");
    }

    #[test]
    fn test_escapes_source() {
        let out = highlight_markdown("<script>alert('x')</script> & more");
        assert_eq!(
            out,
            "&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt; &amp; more"
        );
    }

    #[test]
    fn test_pure() {
        let src = "# T\n\n- [l](u) `c` **b** _i_\n```\ncode\n```";
        assert_eq!(highlight_markdown(src), highlight_markdown(src));
    }

    #[test]
    fn test_preserves_source_text() {
        let sources = [
            "#   spaced heading",
            ">no space quote",
            "*   wide bullet with `code` and [link](http://a.b/c?d=1&e=2)",
            "```py\nprint('<b>')\n```",
            "plain **bold** ~~s~~ _i_ *j* text & <tags>",
            "",
        ];
        for src in sources {
            assert_eq!(html_to_text(&highlight_markdown(src)), src, "source {:?}", src);
        }
    }

    #[test]
    fn test_placeholder_lookalikes_are_neutralised() {
        let src = "\u{0}C0\u{0} `x`";
        let out = highlight_markdown(src);
        assert!(out.starts_with("\u{fffd}C0\u{fffd} "));
        assert!(out.contains("md-code"));
    }
}

//! Markdown to sanitized HTML.
//!
//! Pipeline: plugin preprocessors, plugin containers, pulldown-cmark parse,
//! event rewriting (inline rules, linkify, code blocks), HTML output,
//! sanitization.

use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::LazyLock;

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd, html};
use regex_lite::Regex;

use crate::app::domain::RenderSettings;
use crate::app::services::plugins::PluginRuntime;
use crate::app::services::sanitize::sanitize_html;
use crate::app::services::syntax::{CodeHighlighter, language_label};
use crate::app::services::text_ops::escape_html;

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"'`]+"#).expect("valid url regex"));

/// Renders note markdown with a compiled plugin runtime.
#[derive(Debug, Clone)]
pub struct MarkdownRenderer {
    options: Options,
    linkify: bool,
    highlighter: CodeHighlighter,
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new(&RenderSettings::default())
    }
}

impl MarkdownRenderer {
    pub fn new(settings: &RenderSettings) -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);
        options.insert(Options::ENABLE_FOOTNOTES);
        if settings.typographer {
            options.insert(Options::ENABLE_SMART_PUNCTUATION);
        }

        Self {
            options,
            linkify: settings.linkify,
            highlighter: CodeHighlighter::new(settings.highlight_code),
        }
    }

    /// Render `raw` to sanitized HTML. Never panics: an internal failure
    /// yields the escaped source in a `<pre>`.
    pub fn render(&self, raw: &str, runtime: &PluginRuntime) -> String {
        match panic::catch_unwind(AssertUnwindSafe(|| self.render_unguarded(raw, runtime))) {
            Ok(html) => html,
            Err(_) => {
                log::error!("markdown rendering panicked, showing escaped source");
                format!("<pre>{}</pre>", escape_html(raw))
            }
        }
    }

    fn render_unguarded(&self, raw: &str, runtime: &PluginRuntime) -> String {
        let text = runtime.preprocess(raw);
        let text = runtime.expand_containers(&text);

        let parser = Parser::new_ext(&text, self.options);
        let events = self.rewrite(parser, runtime);

        let mut html_output = String::new();
        html::push_html(&mut html_output, events.into_iter());

        sanitize_html(&html_output, runtime.allow_list())
    }

    fn rewrite<'a>(&self, events: impl Iterator<Item = Event<'a>>, runtime: &PluginRuntime) -> Vec<Event<'a>> {
        let mut out = Vec::new();
        let mut text = String::new();
        let mut code: Option<(String, String)> = None;
        let mut link_depth = 0usize;
        let mut image_depth = 0usize;

        for event in events {
            match event {
                Event::Text(t) if code.is_some() => {
                    if let Some((_, body)) = code.as_mut() {
                        body.push_str(&t);
                    }
                }
                Event::End(TagEnd::CodeBlock) => {
                    if let Some((info, body)) = code.take() {
                        out.push(Event::Html(self.code_block(&info, &body, runtime).into()));
                    }
                }
                _ if code.is_some() => {}
                // Smart punctuation and entities split text; merge it back so
                // inline rules see whole runs.
                Event::Text(t) => text.push_str(&t),
                other => {
                    self.flush_text(&mut text, link_depth > 0, image_depth > 0, runtime, &mut out);
                    match &other {
                        Event::Start(Tag::CodeBlock(kind)) => {
                            let info = match kind {
                                CodeBlockKind::Fenced(info) => info.to_string(),
                                CodeBlockKind::Indented => String::new(),
                            };
                            code = Some((info, String::new()));
                            continue;
                        }
                        Event::Start(Tag::Link { .. }) => link_depth += 1,
                        Event::End(TagEnd::Link) => link_depth = link_depth.saturating_sub(1),
                        Event::Start(Tag::Image { .. }) => image_depth += 1,
                        Event::End(TagEnd::Image) => image_depth = image_depth.saturating_sub(1),
                        Event::InlineHtml(html) => match raw_anchor(html) {
                            Some(true) => link_depth += 1,
                            Some(false) => link_depth = link_depth.saturating_sub(1),
                            None => {}
                        },
                        _ => {}
                    }
                    out.push(other);
                }
            }
        }

        self.flush_text(&mut text, link_depth > 0, image_depth > 0, runtime, &mut out);
        out
    }

    fn flush_text<'a>(
        &self,
        text: &mut String,
        in_link: bool,
        in_image: bool,
        runtime: &PluginRuntime,
        out: &mut Vec<Event<'a>>,
    ) {
        if text.is_empty() {
            return;
        }
        let text = std::mem::take(text);

        // Alt text is emitted as an attribute; leave it to the HTML writer.
        if in_image {
            out.push(Event::Text(text.into()));
            return;
        }

        match self.prose_html(&text, self.linkify && !in_link, runtime) {
            Some(html) => out.push(Event::InlineHtml(html.into())),
            None => out.push(Event::Text(text.into())),
        }
    }

    /// HTML for a prose run when a plugin rule or linkify changed it.
    fn prose_html(&self, text: &str, linkify: bool, runtime: &PluginRuntime) -> Option<String> {
        let urls = if linkify { find_urls(text) } else { Vec::new() };
        if urls.is_empty() {
            return runtime.apply_inline(text);
        }

        let inline_or_escape =
            |part: &str| runtime.apply_inline(part).unwrap_or_else(|| escape_html(part));

        let mut html = String::with_capacity(text.len() * 2);
        let mut cursor = 0;
        for range in urls {
            html.push_str(&inline_or_escape(&text[cursor..range.start]));
            let url = escape_html(&text[range.clone()]);
            html.push_str(&format!("<a href=\"{url}\">{url}</a>"));
            cursor = range.end;
        }
        html.push_str(&inline_or_escape(&text[cursor..]));
        Some(html)
    }

    fn code_block(&self, info: &str, code: &str, runtime: &PluginRuntime) -> String {
        let lang = language_label(info);
        if let Some(html) = runtime.render_fence(&lang, code, info.trim()) {
            return format!("{html}\n");
        }

        let highlighted = self.highlighter.highlight(info, code);
        format!(
            "<div class=\"code-block\" data-codewrap=\"\" data-lang=\"{lang}\"><pre><code class=\"language-{lang}\">{html}</code></pre></div>\n",
            lang = highlighted.lang,
            html = highlighted.html,
        )
    }
}

/// Byte ranges of bare `http(s)://` URLs, without trailing punctuation.
/// `Some(true)` for a raw `<a ...>` opener, `Some(false)` for `</a>`.
fn raw_anchor(html: &str) -> Option<bool> {
    let tag = html.trim_start().to_ascii_lowercase();
    let (opening, rest) = match tag.strip_prefix("</a") {
        Some(rest) => (false, rest),
        None => (true, tag.strip_prefix("<a")?),
    };
    match rest.chars().next() {
        Some(c) if c == '>' || c.is_ascii_whitespace() => Some(opening),
        _ => None,
    }
}

fn find_urls(text: &str) -> Vec<Range<usize>> {
    URL_RE
        .find_iter(text)
        .filter_map(|m| {
            let url = trim_url(m.as_str());
            // A bare scheme is not a link.
            (url.len() > url.find("://")? + 3).then(|| m.start()..m.start() + url.len())
        })
        .collect()
}

fn trim_url(url: &str) -> &str {
    let mut url = url;
    loop {
        let trimmed = url.trim_end_matches(['.', ',', ';', ':', '!', '?', '*', '_', '~']);
        let trimmed = if trimmed.ends_with(')') && trimmed.matches('(').count() < trimmed.matches(')').count() {
            &trimmed[..trimmed.len() - 1]
        } else {
            trimmed
        };
        if trimmed.len() == url.len() {
            return url;
        }
        url = trimmed;
    }
}

/// Render with default settings.
pub fn render_markdown(raw: &str, runtime: &PluginRuntime) -> String {
    MarkdownRenderer::default().render(raw, runtime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::domain::ExtensionSpec;
    use crate::app::services::plugins::compile_plugins;
    use crate::app::services::text_ops::html_to_text;

    fn render(raw: &str) -> String {
        render_markdown(raw, &PluginRuntime::empty())
    }

    fn runtime(code: &str) -> PluginRuntime {
        let compiled = compile_plugins(&[ExtensionSpec::new("p", "", code)], &RenderSettings::default());
        assert!(compiled.errors.is_empty(), "{:?}", compiled.errors);
        compiled.runtime
    }

    #[test]
    fn test_basic_markdown() {
        let html = render("# Title\n\nsome *text* and ~~gone~~");
        assert!(html.contains("<h1>Title</h1>"));
        assert!(html.contains("<em>text</em>"));
        assert!(html.contains("<del>gone</del>"));
    }

    #[test]
    fn test_scripts_and_handlers_stripped() {
        let html = render("<script>alert(1)</script>\n\n<img src=\"x.png\" onerror=\"alert(1)\">\n\n<p onclick=\"x\">hi</p>");
        assert!(!html.contains("<script"));
        assert!(!html.contains("onerror"));
        assert!(!html.contains("onclick"));
        assert!(html.contains("hi"));
    }

    #[test]
    fn test_javascript_links_stripped() {
        let html = render("[click](javascript:alert(1))");
        assert!(!html.contains("javascript:"));
        assert!(html.contains("click"));
    }

    #[test]
    fn test_code_block_wrapped() {
        let html = render("```rust\nfn main() {}\n```");
        assert!(html.contains("<div class=\"code-block\" data-codewrap=\"\" data-lang=\"rust\">"));
        assert!(html.contains("<code class=\"language-rust\">"));
        assert!(html.contains("main"));
    }

    #[test]
    fn test_unknown_language_is_escaped() {
        let html = render("```nope\n<b>x</b>\n```");
        assert!(html.contains("data-lang=\"nope\""));
        assert!(html.contains("&lt;b&gt;x&lt;/b&gt;"));
    }

    #[test]
    fn test_indented_code_is_plain_text() {
        let html = render("para\n\n    just code\n");
        assert!(html.contains("data-lang=\"text\""));
        assert!(html.contains("just code"));
    }

    #[test]
    fn test_linkify() {
        let html = render("see https://example.com/a.");
        assert!(html.contains("<a href=\"https://example.com/a\">https://example.com/a</a>."));
    }

    #[test]
    fn test_linkify_off_and_inside_links() {
        let settings = RenderSettings {
            linkify: false,
            ..Default::default()
        };
        let html = MarkdownRenderer::new(&settings).render("see https://example.com", &PluginRuntime::empty());
        assert!(!html.contains("<a "));

        let html = render("[https://a.example](https://b.example)");
        assert_eq!(html.matches("<a ").count(), 1);
    }

    #[test]
    fn test_no_linkify_inside_raw_anchor() {
        let html = render("<a href=\"https://a.example\">see https://b.example</a> and https://c.example");
        assert_eq!(html.matches("<a ").count(), 2);
        assert!(html.contains(">see https://b.example</a>"));
        assert!(html.contains("<a href=\"https://c.example\">https://c.example</a>"));
    }

    #[test]
    fn test_raw_anchor() {
        assert_eq!(raw_anchor("<a href=\"x\">"), Some(true));
        assert_eq!(raw_anchor("<A>"), Some(true));
        assert_eq!(raw_anchor("</a>"), Some(false));
        assert_eq!(raw_anchor("<abbr>"), None);
        assert_eq!(raw_anchor("</abbr>"), None);
        assert_eq!(raw_anchor("<b>"), None);
    }

    #[test]
    fn test_trim_url() {
        assert_eq!(trim_url("https://a.b/c."), "https://a.b/c");
        assert_eq!(trim_url("https://a.b/c),"), "https://a.b/c");
        assert_eq!(trim_url("https://a.b/(c)"), "https://a.b/(c)");
        assert!(find_urls("https://").is_empty());
    }

    #[test]
    fn test_typographer() {
        let html = render("\"quoted\" -- dash");
        assert!(html.contains("\u{201c}quoted\u{201d}"));

        let settings = RenderSettings {
            typographer: false,
            ..Default::default()
        };
        let html = MarkdownRenderer::new(&settings).render("\"q\"", &PluginRuntime::empty());
        assert!(!html.contains('\u{201c}'));
    }

    #[test]
    fn test_task_list_and_table() {
        let html = render("- [x] done\n\n| a | b |\n|---|---|\n| 1 | 2 |");
        assert!(html.contains("type=\"checkbox\""));
        assert!(html.contains("checked"));
        assert!(html.contains("<table>"));
        assert!(html.contains("<td>2</td>"));
    }

    #[test]
    fn test_text_survives_round_trip() {
        let src = "Plain words with numbers 42 and symbols & < >";
        let html = render(src);
        assert_eq!(html_to_text(&html).trim(), src);
    }

    #[test]
    fn test_plugin_inline_rule() {
        let rt = runtime(
            r#"local api = ...
            return { use = function(md)
                md:inline("==(.-)==", function(m, inner) return api.inline(inner, "hl", "mark") end)
            end }"#,
        );
        let html = render_markdown("a ==b== `==c==` ![==d==](x.png)", &rt);
        assert!(html.contains("<mark class=\"hl\">b</mark>"));
        assert!(html.contains("<code>==c==</code>"));
        assert!(html.contains("alt=\"==d==\""));
    }

    #[test]
    fn test_plugin_fence_and_container() {
        let rt = runtime(
            r#"local api = ...
            return { use = function(md)
                md:fence("shout", function(code) return "<p>" .. api.escape(code:upper()) .. "</p>" end)
                md:block("note", function(body, args) return api.block(body, "callout") end)
            end }"#,
        );
        let html = render_markdown("```shout\nhi <there>\n```\n\n::: note\nhello\n:::\n", &rt);
        assert!(html.contains("<div data-fence=\"shout\"><p>HI &lt;THERE&gt;"));
        assert!(html.contains("<div data-container=\"note\">"));
        assert!(html.contains("<div class=\"callout\">hello</div>"));
        assert!(!html.contains("code-block"));
    }

    #[test]
    fn test_plugin_cannot_smuggle_scripts() {
        let rt = runtime(
            r#"return {
                allow = { tags = { "script", "kbd" }, attributes = { "onclick", "title" } },
                use = function(md)
                    md:inline("XSS", function() return "<script>x()</script><kbd onclick='x()' title='t'>k</kbd>" end)
                end,
            }"#,
        );
        let html = render_markdown("a XSS b", &rt);
        assert!(!html.contains("<script"));
        assert!(!html.contains("onclick"));
        assert!(html.contains("<kbd title=\"t\">k</kbd>"));
    }

    #[test]
    fn test_plugin_transform_applies_first() {
        let rt = runtime(r#"return { transform = function(t) return (t:gsub("TODAY", "**now**")) end }"#);
        let html = render_markdown("it is TODAY", &rt);
        assert!(html.contains("<strong>now</strong>"));
    }
}

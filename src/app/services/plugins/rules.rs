//! Grammar rules contributed by plugins through `use(md)`.
//!
//! The parser handle exposes three registration methods:
//!
//! * `md:inline(pattern, fn)`: `pattern` is a Lua pattern matched against
//!   prose text; `fn(match, captures...)` returns replacement HTML.
//! * `md:block(name, fn)`: a `::: name args` ... `:::` container;
//!   `fn(body, args)` returns HTML for the whole container.
//! * `md:fence(lang, fn)`: fenced code with info string `lang`;
//!   `fn(code, info)` returns HTML replacing the code block.
//!
//! A render function that errors or returns a non-string leaves the source
//! untouched for that match.

use std::cell::RefCell;
use std::rc::Rc;

use log::debug;
use mlua::{Function, Table, Value, Variadic};

use super::sandbox::Sandbox;
use crate::app::services::text_ops::escape_html;

pub(crate) struct InlineRule {
    plugin: String,
    pattern: String,
    render: Function,
}

pub(crate) struct BlockRule {
    plugin: String,
    name: String,
    render: Function,
}

pub(crate) struct FenceRule {
    plugin: String,
    lang: String,
    render: Function,
}

pub(crate) enum StagedRule {
    Inline(InlineRule),
    Block(BlockRule),
    Fence(FenceRule),
}

/// Rules registered by one plugin while its `use` hook runs.
pub(crate) type Staging = Rc<RefCell<Vec<StagedRule>>>;

/// The committed rule set of a runtime handle, in registration order.
#[derive(Default)]
pub(crate) struct RuleTable {
    inline: Vec<InlineRule>,
    blocks: Vec<BlockRule>,
    fences: Vec<FenceRule>,
}

enum Segment {
    Text(String),
    Html(String),
}

impl RuleTable {
    pub(crate) fn commit(&mut self, staged: Vec<StagedRule>) {
        for rule in staged {
            match rule {
                StagedRule::Inline(r) => self.inline.push(r),
                StagedRule::Block(r) => self.blocks.push(r),
                StagedRule::Fence(r) => self.fences.push(r),
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inline.len() + self.blocks.len() + self.fences.len()
    }

    /// Apply inline rules to one run of prose text. Returns HTML (with the
    /// unmatched text escaped) when at least one rule produced output.
    pub(crate) fn apply_inline(&self, sandbox: &Sandbox, text: &str) -> Option<String> {
        if self.inline.is_empty() || text.is_empty() {
            return None;
        }

        let mut segments = vec![Segment::Text(text.to_string())];
        let mut matched = false;

        for rule in &self.inline {
            let mut next = Vec::with_capacity(segments.len());
            for segment in segments {
                match segment {
                    Segment::Text(t) => matched |= rule.split(sandbox, &t, &mut next),
                    html => next.push(html),
                }
            }
            segments = next;
        }

        if !matched {
            return None;
        }

        Some(
            segments
                .into_iter()
                .map(|segment| match segment {
                    Segment::Text(t) => escape_html(&t),
                    Segment::Html(h) => h,
                })
                .collect(),
        )
    }

    /// Replace registered `:::` containers outside code fences with HTML
    /// blocks.
    pub(crate) fn expand_containers(&self, sandbox: &Sandbox, text: &str) -> String {
        if self.blocks.is_empty() {
            return text.to_string();
        }

        let lines: Vec<&str> = text.split('\n').collect();
        let mut out: Vec<String> = Vec::with_capacity(lines.len());
        let mut open_fence: Option<&str> = None;
        let mut i = 0;

        while i < lines.len() {
            let line = lines[i];
            let trimmed = line.trim_start();

            if let Some(delimiter) = fence_delimiter(trimmed) {
                match open_fence {
                    None => open_fence = Some(delimiter),
                    Some(open) if open == delimiter => open_fence = None,
                    Some(_) => {}
                }
            } else if open_fence.is_none() {
                if let Some((html, close)) = self.expand_at(sandbox, &lines, i) {
                    push_html_block(&mut out, &html);
                    i = close + 1;
                    continue;
                }
            }

            out.push(line.to_string());
            i += 1;
        }

        out.join("\n")
    }

    fn expand_at(&self, sandbox: &Sandbox, lines: &[&str], open: usize) -> Option<(String, usize)> {
        let (name, args) = container_header(lines[open].trim())?;
        let rule = self.blocks.iter().find(|r| r.name == name)?;
        let close = container_close(lines, open + 1)?;
        let body = lines[open + 1..close].join("\n");

        let html = call_render(sandbox, &rule.plugin, &rule.render, (body.as_str(), args))?;
        Some((format!("<div data-container=\"{}\">\n{}\n</div>", rule.name, html), close))
    }

    /// HTML for a fenced code block claimed by a plugin, if any.
    pub(crate) fn render_fence(&self, sandbox: &Sandbox, lang: &str, code: &str, info: &str) -> Option<String> {
        let rule = self.fences.iter().find(|r| r.lang.eq_ignore_ascii_case(lang))?;
        let html = call_render(sandbox, &rule.plugin, &rule.render, (code, info))?;
        Some(format!("<div data-fence=\"{}\">{}</div>", rule.lang, html))
    }
}

impl InlineRule {
    /// Split `text` around matches of this rule, pushing segments to `out`.
    fn split(&self, sandbox: &Sandbox, text: &str, out: &mut Vec<Segment>) -> bool {
        let mut matched = false;
        let mut cursor = 0usize;
        let mut init: i64 = 1;

        while init as usize <= text.len() {
            let found = sandbox.guarded(|| {
                sandbox
                    .string_find()
                    .call::<(Option<i64>, Option<i64>, Variadic<Value>)>((text, self.pattern.as_str(), init))
            });
            let (start, end, captures) = match found {
                Ok((Some(start), Some(end), captures)) => (start, end, captures),
                Ok(_) => break,
                Err(e) => {
                    debug!("inline rule of plugin '{}' failed to match: {}", self.plugin, e);
                    break;
                }
            };

            // Lua positions are 1-based and inclusive.
            let from = (start - 1) as usize;
            let to = end as usize;
            if to <= from || !text.is_char_boundary(from) || !text.is_char_boundary(to) {
                init = start + 1;
                continue;
            }

            if let Some(html) = call_render(sandbox, &self.plugin, &self.render, (&text[from..to], captures)) {
                if from > cursor {
                    out.push(Segment::Text(text[cursor..from].to_string()));
                }
                out.push(Segment::Html(html));
                cursor = to;
                matched = true;
            }
            init = end + 1;
        }

        if cursor < text.len() {
            out.push(Segment::Text(text[cursor..].to_string()));
        }
        matched
    }
}

fn call_render(
    sandbox: &Sandbox,
    plugin: &str,
    render: &Function,
    args: impl mlua::IntoLuaMulti,
) -> Option<String> {
    match sandbox.guarded(|| render.call::<Value>(args)) {
        Ok(Value::String(html)) => Some(html.to_string_lossy().to_string()),
        Ok(other) => {
            debug!(
                "rule of plugin '{}' returned {} instead of a string",
                plugin,
                other.type_name()
            );
            None
        }
        Err(e) => {
            debug!("rule of plugin '{}' failed: {}", plugin, e);
            None
        }
    }
}

fn fence_delimiter(trimmed: &str) -> Option<&'static str> {
    if trimmed.starts_with("```") {
        Some("```")
    } else if trimmed.starts_with("~~~") {
        Some("~~~")
    } else {
        None
    }
}

/// `::: name rest of line` -> `(name, rest)`.
fn container_header(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix(":::")?.trim_start();
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        .unwrap_or(rest.len());
    if end == 0 {
        return None;
    }
    Some((&rest[..end], rest[end..].trim()))
}

/// Index of the `:::` line closing a container opened just before `from`.
fn container_close(lines: &[&str], from: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, line) in lines[from..].iter().enumerate() {
        let trimmed = line.trim();
        if trimmed == ":::" {
            if depth == 0 {
                return Some(from + offset);
            }
            depth -= 1;
        } else if container_header(trimmed).is_some() {
            depth += 1;
        }
    }
    None
}

/// Emit plugin HTML as a standalone HTML block: blank lines around it and
/// none inside, so the markdown parser keeps it in one piece.
fn push_html_block(out: &mut Vec<String>, html: &str) {
    if out.last().is_some_and(|l| !l.trim().is_empty()) {
        out.push(String::new());
    }
    out.extend(html.lines().filter(|l| !l.trim().is_empty()).map(str::to_string));
    out.push(String::new());
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Build the `md` handle passed to a plugin's `use` hook. Registrations go to
/// `staging` and are only committed once the hook returns successfully.
pub(crate) fn parser_handle(sandbox: &Sandbox, plugin: &str, staging: &Staging) -> mlua::Result<Table> {
    let lua = sandbox.lua();
    let handle = lua.create_table()?;

    let sink = Rc::clone(staging);
    let owner = plugin.to_string();
    let find = sandbox.string_find().clone();
    handle.set(
        "inline",
        lua.create_function(move |_, (_this, pattern, render): (Value, String, Function)| {
            if pattern.is_empty() {
                return Err(mlua::Error::runtime("inline rule pattern must not be empty"));
            }
            // Surface malformed patterns at registration time.
            find.call::<Value>(("", pattern.as_str()))?;
            sink.borrow_mut().push(StagedRule::Inline(InlineRule {
                plugin: owner.clone(),
                pattern,
                render,
            }));
            Ok(())
        })?,
    )?;

    let sink = Rc::clone(staging);
    let owner = plugin.to_string();
    handle.set(
        "block",
        lua.create_function(move |_, (_this, name, render): (Value, String, Function)| {
            if !valid_name(&name) {
                return Err(mlua::Error::runtime(format!("invalid container name '{}'", name)));
            }
            sink.borrow_mut().push(StagedRule::Block(BlockRule {
                plugin: owner.clone(),
                name,
                render,
            }));
            Ok(())
        })?,
    )?;

    let sink = Rc::clone(staging);
    let owner = plugin.to_string();
    handle.set(
        "fence",
        lua.create_function(move |_, (_this, lang, render): (Value, String, Function)| {
            if !valid_name(&lang) {
                return Err(mlua::Error::runtime(format!("invalid fence language '{}'", lang)));
            }
            sink.borrow_mut().push(StagedRule::Fence(FenceRule {
                plugin: owner.clone(),
                lang: lang.to_ascii_lowercase(),
                render,
            }));
            Ok(())
        })?,
    )?;

    Ok(handle)
}

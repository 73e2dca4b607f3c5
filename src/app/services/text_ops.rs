/// Escape text for safe inclusion in HTML content or a quoted attribute.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Decode the entities produced by `escape_html` and the HTML serializer.
///
/// Handles the named entities that show up in rendered notes plus numeric
/// references; anything else is left as-is.
pub fn unescape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let Some(semi) = tail.find(';').filter(|&i| i <= 10) else {
            out.push('&');
            rest = &tail[1..];
            continue;
        };

        let entity = &tail[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some('\u{a0}'),
            _ => decode_numeric(entity),
        };

        match decoded {
            Some(ch) => {
                out.push(ch);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

fn decode_numeric(entity: &str) -> Option<char> {
    let digits = entity.strip_prefix('#')?;
    let code = match digits.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => digits.parse().ok()?,
    };
    char::from_u32(code)
}

/// Extract the human-readable text of an HTML fragment: tags are dropped and
/// entities decoded.
pub fn html_to_text(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(lt) = rest.find('<') {
        text.push_str(&rest[..lt]);
        match rest[lt..].find('>') {
            Some(gt) => rest = &rest[lt + gt + 1..],
            None => {
                rest = "";
                break;
            }
        }
    }
    text.push_str(rest);

    unescape_html(&text)
}

/// CSS class that scopes one note's stylesheet: `note-scope-<id>`, keeping
/// only `[A-Za-z0-9_-]` from the note id.
pub fn note_scope_class(note_id: &str) -> String {
    let safe: String = note_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    format!("note-scope-{}", safe)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;"
        );
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn test_unescape_reverses_escape() {
        let raw = "if a < b && c > \"d\" { 'e' }";
        assert_eq!(unescape_html(&escape_html(raw)), raw);
    }

    #[test]
    fn test_unescape_numeric_and_unknown() {
        assert_eq!(unescape_html("&#96;code&#x60;"), "`code`");
        assert_eq!(unescape_html("AT&T &bogus; &"), "AT&T &bogus; &");
    }

    #[test]
    fn test_html_to_text() {
        let html = "<p>Hello <strong>world</strong> &amp; friends</p>\n";
        assert_eq!(html_to_text(html), "Hello world & friends\n");
    }

    #[test]
    fn test_html_to_text_unterminated_tag() {
        assert_eq!(html_to_text("text <b"), "text ");
    }

    #[test]
    fn test_note_scope_class() {
        assert_eq!(note_scope_class("abc-123"), "note-scope-abc-123");
        assert_eq!(note_scope_class("a b.c/d"), "note-scope-abcd");
        assert_eq!(note_scope_class(""), "note-scope-");
    }
}

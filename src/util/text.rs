use std::borrow::Cow;

use quick_xml::escape::resolve_html5_entity;
use unicode_width::UnicodeWidthChar;

/// Ellipsis string used for truncation
const ELLIPSIS: &str = "...";
/// Display width of the ellipsis (3 columns for ASCII "...")
const ELLIPSIS_WIDTH: usize = 3;

/// Longest entity name we try to resolve (`&CounterClockwiseContourIntegral;` is 31).
const MAX_ENTITY_LEN: usize = 32;

/// Tags that separate words when rendered; replaced by a space instead of nothing.
const BLOCK_TAGS: &[&str] = &[
    "address",
    "article",
    "aside",
    "blockquote",
    "br",
    "dd",
    "div",
    "dl",
    "dt",
    "figcaption",
    "figure",
    "footer",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "header",
    "hr",
    "img",
    "li",
    "ol",
    "p",
    "pre",
    "section",
    "table",
    "td",
    "th",
    "tr",
    "ul",
];

/// Converts a feed-supplied HTML fragment into plain text.
///
/// Tags, comments and `<script>`/`<style>` bodies are removed, entities are
/// decoded, terminal control sequences are stripped and whitespace runs are
/// collapsed to a single space. The output never contains `<` or `>`, even
/// when they were produced by decoding `&lt;`/`&gt;`.
///
/// Malformed input (unterminated tags, stray `<`, unknown entities) never
/// fails; the function degrades to whatever text it can recover.
///
/// # Examples
///
/// ```
/// use feedsync::util::sanitize;
///
/// assert_eq!(sanitize("<p>Fish &amp; <b>Chips</b></p>"), "Fish & Chips");
/// assert_eq!(sanitize("1 < 2 <unterminated"), "1 2");
/// ```
pub fn sanitize(raw: &str) -> String {
    let stripped = strip_tags(raw);
    let decoded = decode_entities(&stripped);
    let cleaned = strip_control_chars(&decoded);
    collapse_whitespace(&cleaned)
}

/// Builds a short excerpt from already-sanitized text, truncated to
/// `max_width` terminal columns with a trailing ellipsis when cut.
pub fn excerpt(text: &str, max_width: usize) -> String {
    truncate_to_width(text, max_width).into_owned()
}

fn strip_tags(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'<' {
            let next = input[i..].find('<').map_or(bytes.len(), |p| i + p);
            out.push_str(&input[i..next]);
            i = next;
            continue;
        }

        let rest = &input[i..];

        if let Some(comment) = rest.strip_prefix("<!--") {
            i = comment
                .find("-->")
                .map_or(bytes.len(), |p| i + 4 + p + 3);
            out.push(' ');
            continue;
        }

        if rest.starts_with("<![CDATA[") {
            let body_start = i + 9;
            let body_end = input[body_start..]
                .find("]]>")
                .map_or(bytes.len(), |p| body_start + p);
            out.push_str(&strip_tags(&input[body_start..body_end]));
            i = (body_end + 3).min(bytes.len());
            continue;
        }

        let opens_tag = rest[1..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || matches!(c, '/' | '!' | '?'));
        if !opens_tag {
            // Stray '<' in text, not markup
            i += 1;
            continue;
        }

        // Unterminated tag swallows the remainder, like a browser would
        let Some(close) = rest.find('>') else {
            break;
        };

        let tag = &rest[1..close];
        let name = tag_name(tag);
        i += close + 1;

        let is_opening = !tag.starts_with('/') && !tag.ends_with('/');
        if is_opening && (name == "script" || name == "style") {
            let closing = format!("</{name}");
            let lowered = input[i..].to_ascii_lowercase();
            i = match lowered.find(&closing) {
                Some(p) => {
                    let after = i + p;
                    input[after..].find('>').map_or(bytes.len(), |q| after + q + 1)
                }
                None => bytes.len(),
            };
            out.push(' ');
            continue;
        }

        if BLOCK_TAGS.contains(&name.as_str()) {
            out.push(' ');
        }
    }

    out
}

fn tag_name(tag: &str) -> String {
    tag.trim_start_matches('/')
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn decode_entities(input: &str) -> Cow<'_, str> {
    if !input.contains('&') {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];

        let resolved = after
            .char_indices()
            .take(MAX_ENTITY_LEN + 1)
            .find(|&(_, c)| c == ';')
            .and_then(|(semi, _)| resolve_entity(&after[..semi]).map(|text| (semi, text)));

        match resolved {
            Some((semi, text)) => {
                out.push_str(&text);
                rest = &after[semi + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    Cow::Owned(out)
}

fn resolve_entity(name: &str) -> Option<Cow<'static, str>> {
    if let Some(numeric) = name.strip_prefix('#') {
        let code = match numeric.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => numeric.parse::<u32>().ok()?,
        };
        return match char::from_u32(code) {
            Some('\0') | None => Some(Cow::Borrowed("\u{FFFD}")),
            Some(c) => Some(Cow::Owned(c.to_string())),
        };
    }
    resolve_html5_entity(name).map(Cow::Borrowed)
}

fn collapse_whitespace(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_space = false;

    for c in input.chars() {
        if c == '<' || c == '>' {
            continue;
        }
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(c);
    }

    out
}

/// Truncates a string to fit within a maximum display width.
///
/// If truncation is necessary, appends "..." to indicate text was cut off.
/// Uses Unicode-aware width calculation so CJK characters and emoji count
/// as two columns.
///
/// For widths of 3 columns or fewer there is no room for "char + ellipsis",
/// so as many characters as fit are returned without an ellipsis.
///
/// # Examples
///
/// ```
/// use feedsync::util::truncate_to_width;
///
/// assert_eq!(truncate_to_width("Short", 10), "Short");
/// assert_eq!(truncate_to_width("Hello World", 8), "Hello...");
/// assert_eq!(truncate_to_width("Test", 2), "Te");
/// ```
pub fn truncate_to_width(s: &str, max_width: usize) -> Cow<'_, str> {
    if max_width == 0 {
        return Cow::Borrowed("");
    }

    if max_width <= ELLIPSIS_WIDTH {
        let mut byte_end = 0;
        let mut current_width = 0;
        for (idx, c) in s.char_indices() {
            let char_width = UnicodeWidthChar::width(c).unwrap_or(0);
            if current_width + char_width > max_width {
                break;
            }
            current_width += char_width;
            byte_end = idx + c.len_utf8();
        }
        if byte_end == s.len() {
            return Cow::Borrowed(s);
        }
        return Cow::Owned(s[..byte_end].to_string());
    }
    let target_width = max_width.saturating_sub(ELLIPSIS_WIDTH);

    let mut current_width = 0;
    let mut cut_point = None;
    let mut exceeded_max = false;

    for (idx, c) in s.char_indices() {
        let char_width = UnicodeWidthChar::width(c).unwrap_or(0);

        if cut_point.is_none() && current_width + char_width > target_width {
            cut_point = Some(idx);
        }

        if current_width + char_width > max_width {
            exceeded_max = true;
            break;
        }

        current_width += char_width;
    }

    if exceeded_max {
        let cut = cut_point.unwrap_or(s.len());
        Cow::Owned(format!("{}{}", &s[..cut], ELLIPSIS))
    } else {
        Cow::Borrowed(s)
    }
}

/// SEC-001: Strip terminal control characters and ANSI escape sequences from text.
///
/// Feed titles and bodies are attacker-controlled and end up in terminal
/// output of the CLI, so CSI/OSC sequences and C0 controls are removed.
/// Tab, newline and carriage return are preserved.
///
/// Returns `Cow::Borrowed` when the input contains no control characters.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let bytes = s.as_bytes();
    let len = bytes.len();

    let needs_strip = bytes.iter().any(|&b| is_stripped_byte(b));
    if !needs_strip {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(len);
    let mut i = 0;

    while i < len {
        let b = bytes[i];

        if b == 0x1b {
            if i + 1 < len && bytes[i + 1] == b'[' {
                // CSI: parameters until a final byte in 0x40..=0x7e
                i += 2;
                while i < len {
                    let c = bytes[i];
                    i += 1;
                    if (0x40..=0x7e).contains(&c) {
                        break;
                    }
                }
            } else if i + 1 < len && bytes[i + 1] == b']' {
                // OSC: until BEL or ST
                i += 2;
                while i < len {
                    if bytes[i] == 0x07 {
                        i += 1;
                        break;
                    }
                    if bytes[i] == 0x1b && i + 1 < len && bytes[i + 1] == b'\\' {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
            } else {
                i += 1;
            }
        } else if is_stripped_byte(b) {
            i += 1;
        } else {
            let start = i;
            i += 1;
            while i < len && !is_stripped_byte(bytes[i]) {
                i += 1;
            }
            // SAFETY: we only break on ASCII control bytes, which cannot appear
            // mid-codepoint in valid UTF-8, so s[start..i] is valid UTF-8.
            out.push_str(&s[start..i]);
        }
    }

    Cow::Owned(out)
}

fn is_stripped_byte(b: u8) -> bool {
    b == 0x1b || b == 0x7f || (b < 0x20 && b != 0x09 && b != 0x0a && b != 0x0d)
}

//! Pre-chunk text extraction and sanitization.
//!
//! Files are reduced to plain text before chunking. Extraction is selected
//! by file extension:
//!
//! | Extension | Treatment |
//! |-----------|-----------|
//! | `md`, `markdown` | Markdown stripped to prose (see [`extract_markdown`]) |
//! | `html`, `htm` | Tags removed, scripts/styles dropped, entities decoded |
//! | `json` | String/number/boolean leaves concatenated, depth-limited |
//! | anything else | Passthrough |
//!
//! The result is sanitized ([`sanitize`]) so the chunker only ever sees
//! NUL-free, `\n`-terminated text with bounded blank runs.

/// Maximum recursion depth when flattening JSON documents.
const JSON_MAX_DEPTH: usize = 10;

/// Extract indexable text from file content based on its extension.
pub fn extract_text(content: &str, path: &str, exclude_code_languages: &[String]) -> String {
    let lowered = path.to_ascii_lowercase();
    let extracted = match lowered.rsplit('.').next() {
        Some("md") | Some("markdown") => extract_markdown(content, exclude_code_languages),
        Some("html") | Some("htm") => extract_html(content),
        Some("json") => extract_json(content),
        _ => content.to_string(),
    };
    sanitize(&extracted)
}

/// Strip Markdown syntax down to its prose content.
///
/// Fenced code blocks carrying a language tag from `exclude_languages` are
/// removed entirely; all other fenced blocks keep their inner text (the
/// fence lines themselves are dropped). Inline code spans, link syntax,
/// emphasis markers, and heading markers are stripped with their content
/// preserved.
pub fn extract_markdown(content: &str, exclude_languages: &[String]) -> String {
    let mut out = String::with_capacity(content.len());
    let mut in_fence = false;
    let mut fence_marker = "";
    let mut skipping_fence = false;

    for line in content.lines() {
        let trimmed = line.trim_start();
        let fence_open = trimmed.starts_with("```") || trimmed.starts_with("~~~");

        if fence_open && !in_fence {
            in_fence = true;
            fence_marker = if trimmed.starts_with("```") { "```" } else { "~~~" };
            let lang = trimmed
                .trim_start_matches(fence_marker)
                .trim()
                .split_whitespace()
                .next()
                .unwrap_or("")
                .to_ascii_lowercase();
            skipping_fence =
                !lang.is_empty() && exclude_languages.iter().any(|l| l.eq_ignore_ascii_case(&lang));
            continue;
        }
        if in_fence && trimmed.starts_with(fence_marker) {
            in_fence = false;
            skipping_fence = false;
            continue;
        }
        if in_fence {
            if !skipping_fence {
                out.push_str(line);
                out.push('\n');
            }
            continue;
        }

        out.push_str(&strip_inline_markdown(line));
        out.push('\n');
    }

    out
}

/// Strip heading markers, inline code, link syntax, and emphasis from one
/// line of prose Markdown.
fn strip_inline_markdown(line: &str) -> String {
    let without_heading = {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') {
            trimmed.trim_start_matches('#').trim_start()
        } else {
            line
        }
    };

    let mut out = String::with_capacity(without_heading.len());
    let chars: Vec<char> = without_heading.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            // `code` spans keep the inner text
            '`' => i += 1,
            // [text](url) and ![alt](url) keep only the text
            '[' | '!' => {
                if chars[i] == '!' && chars.get(i + 1) != Some(&'[') {
                    out.push('!');
                    i += 1;
                    continue;
                }
                let open = if chars[i] == '!' { i + 1 } else { i };
                if let Some((text, after)) = parse_link(&chars, open) {
                    out.push_str(&text);
                    i = after;
                } else {
                    out.push(chars[i]);
                    i += 1;
                }
            }
            '*' => i += 1,
            // Double underscores are emphasis; single ones stay (snake_case).
            '_' if chars.get(i + 1) == Some(&'_') => i += 2,
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Parse `[text](url)` starting at the `[` index. Returns the link text and
/// the index after the closing `)`.
fn parse_link(chars: &[char], open: usize) -> Option<(String, usize)> {
    let close = find_char(chars, open + 1, ']')?;
    if chars.get(close + 1) != Some(&'(') {
        return None;
    }
    let paren_close = find_char(chars, close + 2, ')')?;
    let text: String = chars[open + 1..close].iter().collect();
    Some((text, paren_close + 1))
}

fn find_char(chars: &[char], from: usize, needle: char) -> Option<usize> {
    chars[from..].iter().position(|&c| c == needle).map(|p| p + from)
}

/// Remove script/style blocks, strip tags, and decode common entities.
pub fn extract_html(content: &str) -> String {
    let no_scripts = remove_block(content, "<script", "</script>");
    let no_styles = remove_block(&no_scripts, "<style", "</style>");

    let mut out = String::with_capacity(no_styles.len());
    let mut in_tag = false;
    for c in no_styles.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                // Tag boundaries separate words in rendered text.
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }

    decode_entities(&out)
}

fn remove_block(content: &str, open: &str, close: &str) -> String {
    let lowered = content.to_ascii_lowercase();
    let mut out = String::with_capacity(content.len());
    let mut pos = 0;
    while let Some(start) = lowered[pos..].find(open).map(|i| i + pos) {
        out.push_str(&content[pos..start]);
        match lowered[start..].find(close) {
            Some(end_rel) => pos = start + end_rel + close.len(),
            None => return out, // unterminated block runs to EOF
        }
    }
    out.push_str(&content[pos..]);
    out
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Flatten a JSON document into the concatenation of its scalar leaves.
///
/// Falls back to passthrough when the content is not valid JSON, so a
/// malformed file still gets indexed as plain text.
pub fn extract_json(content: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(content) {
        Ok(value) => {
            let mut out = String::new();
            flatten_json(&value, 0, &mut out);
            out
        }
        Err(_) => content.to_string(),
    }
}

fn flatten_json(value: &serde_json::Value, depth: usize, out: &mut String) {
    if depth > JSON_MAX_DEPTH {
        return;
    }
    match value {
        serde_json::Value::String(s) => push_leaf(out, s),
        serde_json::Value::Number(n) => push_leaf(out, &n.to_string()),
        serde_json::Value::Bool(b) => push_leaf(out, &b.to_string()),
        serde_json::Value::Array(items) => {
            for item in items {
                flatten_json(item, depth + 1, out);
            }
        }
        serde_json::Value::Object(map) => {
            for (_, v) in map {
                flatten_json(v, depth + 1, out);
            }
        }
        serde_json::Value::Null => {}
    }
}

fn push_leaf(out: &mut String, leaf: &str) {
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(leaf);
}

/// Post-extraction sanitization.
///
/// Removes NUL bytes, normalizes line endings to `\n`, collapses runs of
/// four or more newlines to three, collapses horizontal whitespace runs to
/// single spaces (newlines preserved), and trims the result.
pub fn sanitize(text: &str) -> String {
    let normalized = text.replace('\0', "").replace("\r\n", "\n").replace('\r', "\n");

    let mut out = String::with_capacity(normalized.len());
    let mut newline_run = 0usize;
    let mut space_run = false;
    for c in normalized.chars() {
        match c {
            '\n' => {
                newline_run += 1;
                space_run = false;
                if newline_run <= 3 {
                    out.push('\n');
                }
            }
            ' ' | '\t' => {
                if !space_run {
                    out.push(' ');
                    space_run = true;
                }
            }
            _ => {
                newline_run = 0;
                space_run = false;
                out.push(c);
            }
        }
    }

    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_heading_markers_stripped() {
        let out = extract_markdown("## Setup Guide\n\nInstall the tool.", &[]);
        assert!(out.contains("Setup Guide"));
        assert!(!out.contains('#'));
    }

    #[test]
    fn markdown_links_keep_text_only() {
        let out = extract_markdown("See [the docs](https://example.com/docs) for more.", &[]);
        assert!(out.contains("See the docs for more."));
        assert!(!out.contains("example.com"));
    }

    #[test]
    fn markdown_inline_code_keeps_content() {
        let out = extract_markdown("Run `cargo build` first.", &[]);
        assert!(out.contains("Run cargo build first."));
    }

    #[test]
    fn markdown_excluded_language_block_removed() {
        let text = "Before\n\n```rust\nfn main() {}\n```\n\nAfter";
        let out = extract_markdown(text, &["rust".to_string()]);
        assert!(out.contains("Before"));
        assert!(out.contains("After"));
        assert!(!out.contains("fn main"));
    }

    #[test]
    fn markdown_untagged_block_keeps_inner_text() {
        let text = "```\nplain snippet\n```";
        let out = extract_markdown(text, &["rust".to_string()]);
        assert!(out.contains("plain snippet"));
        assert!(!out.contains("```"));
    }

    #[test]
    fn markdown_snake_case_survives_emphasis_stripping() {
        let out = extract_markdown("The **important** field is `chunk_size`.", &[]);
        assert!(out.contains("The important field is chunk_size."));
    }

    #[test]
    fn html_scripts_and_styles_removed() {
        let html = "<html><style>p{color:red}</style><body><p>Hello</p>\
                    <script>alert(1)</script></body></html>";
        let out = extract_html(html);
        assert!(out.contains("Hello"));
        assert!(!out.contains("alert"));
        assert!(!out.contains("color"));
    }

    #[test]
    fn html_entities_decoded() {
        assert!(extract_html("a &amp; b &lt;c&gt;").contains("a & b <c>"));
    }

    #[test]
    fn json_leaves_concatenated() {
        let json = r#"{"title": "Intro", "count": 3, "nested": {"ok": true}}"#;
        let out = extract_json(json);
        assert!(out.contains("Intro"));
        assert!(out.contains('3'));
        assert!(out.contains("true"));
    }

    #[test]
    fn json_depth_limit_holds() {
        let mut json = String::from("\"leaf\"");
        for _ in 0..15 {
            json = format!("[{json}]");
        }
        assert_eq!(extract_json(&json), "");
    }

    #[test]
    fn invalid_json_passes_through() {
        assert_eq!(extract_json("not json {"), "not json {");
    }

    #[test]
    fn sanitize_collapses_blank_runs() {
        let out = sanitize("a\n\n\n\n\n\nb");
        assert_eq!(out, "a\n\n\nb");
    }

    #[test]
    fn sanitize_collapses_horizontal_whitespace() {
        assert_eq!(sanitize("a \t  b\nc"), "a b\nc");
    }

    #[test]
    fn sanitize_removes_nul_and_normalizes_endings() {
        assert_eq!(sanitize("a\0b\r\nc\rd"), "ab\nc\nd");
    }

    #[test]
    fn extension_dispatch() {
        assert_eq!(extract_text("plain", "notes.txt", &[]), "plain");
        assert!(extract_text("# H", "readme.MD", &[]).contains('H'));
    }
}

use anyhow::Result;
use regex::Regex;
use std::sync::LazyLock;

use super::BlogPost;

static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#{1,6}\s+").expect("valid regex"));
static BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)(?:[-*+]|\d+[.)])\s+").expect("valid regex"));
static IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]*\)").expect("valid regex"));
static LINK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").expect("valid regex"));
static CODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("valid regex"));
static STRONG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*|__(.+?)__").expect("valid regex"));
static EMPHASIS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*([^*\s][^*]*)\*").expect("valid regex"));

/// The article exactly as the model wrote it
pub fn format_as_markdown(post: &BlogPost) -> String {
    post.markdown.clone()
}

/// The article with markdown syntax removed
pub fn format_as_text(post: &BlogPost) -> String {
    markdown_to_text(&post.markdown)
}

/// The article and its provenance as pretty JSON
pub fn format_as_json(post: &BlogPost) -> Result<String> {
    Ok(serde_json::to_string_pretty(post)?)
}

/// Strip headings, emphasis, inline code and link syntax. List bullets stay.
pub fn markdown_to_text(markdown: &str) -> String {
    let mut lines = Vec::new();

    for line in markdown.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            continue;
        }
        if matches!(trimmed, "---" | "***" | "___") {
            continue;
        }

        let line = HEADING_RE.replace(line, "");
        let line = line.strip_prefix("> ").unwrap_or(&line).to_string();

        // keep the bullet, clean what follows it
        let (bullet, body) = match BULLET_RE.find(&line) {
            Some(m) => (line[..m.end()].to_string(), line[m.end()..].to_string()),
            None => (String::new(), line.clone()),
        };

        lines.push(format!("{}{}", bullet, strip_inline(&body)));
    }

    lines.join("\n").trim().to_string()
}

fn strip_inline(text: &str) -> String {
    let text = IMAGE_RE.replace_all(text, "$1");
    let text = LINK_RE.replace_all(&text, "$1");
    let text = CODE_RE.replace_all(&text, "$1");
    let text = STRONG_RE.replace_all(&text, "$1$2");
    EMPHASIS_RE.replace_all(&text, "$1").into_owned()
}

//! Markdown to Telegram HTML

use crate::error::{Error, Result};
use regex::{Captures, Regex};

/// Delimits placeholders; stripped from input so it can never collide
const MARK: char = '\u{0}';

/// Compiled Markdown conversion rules
pub struct MarkdownRenderer {
    fence: Regex,
    inline_code: Regex,
    link: Regex,
    heading: Regex,
    bullet: Regex,
    bold_star: Regex,
    bold_under: Regex,
    strike: Regex,
    italic_star: Regex,
    italic_under: Regex,
    placeholder: Regex,
}

fn compile(name: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| Error::Internal(format!("Invalid markdown rule '{}': {}", name, e)))
}

impl MarkdownRenderer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            fence: compile("fence", r"(?s)```([A-Za-z0-9_+#.-]*)[^\n`]*\n?(.*?)```")?,
            inline_code: compile("inline_code", r"`([^`\n]+)`")?,
            link: compile("link", r"\[([^\]\n]+)\]\(([^)\s]+)\)")?,
            heading: compile("heading", r"(?m)^[ \t]*#{1,6}[ \t]+(.+?)[ \t#]*$")?,
            bullet: compile("bullet", r"(?m)^([ \t]*)[-*][ \t]+")?,
            bold_star: compile("bold_star", r"\*\*([^*\n](?:[^\n]*?[^*\n])?)\*\*")?,
            bold_under: compile("bold_under", r"(^|[^\w])__([^_\s](?:[^\n]*?[^_\s])?)__")?,
            strike: compile("strike", r"~~([^~\n]+)~~")?,
            italic_star: compile("italic_star", r"(^|[^\w*])\*([^*\s](?:[^*\n]*?[^*\s])?)\*")?,
            italic_under: compile("italic_under", r"(^|[^\w])_([^_\s](?:[^_\n]*?[^_\s])?)_")?,
            placeholder: compile("placeholder", "\u{0}(\\d+)\u{0}")?,
        })
    }

    /// Convert agent Markdown into Telegram's HTML subset.
    ///
    /// Code spans and fenced blocks are lifted out before escaping and put
    /// back verbatim afterwards, so markup inside code is never touched.
    pub fn to_html(&self, markdown: &str) -> String {
        let source: String = markdown.chars().filter(|c| *c != MARK).collect();
        let mut stash: Vec<String> = Vec::new();

        let text = self.fence.replace_all(&source, |caps: &Captures| {
            let lang = &caps[1];
            let body = caps[2].strip_suffix('\n').unwrap_or(&caps[2]);
            let html = if lang.is_empty() {
                format!("<pre>{}</pre>", escape_html(body))
            } else {
                format!(
                    "<pre><code class=\"language-{}\">{}</code></pre>",
                    escape_html(lang),
                    escape_html(body)
                )
            };
            hold(&mut stash, html)
        });

        let text = self.inline_code.replace_all(&text, |caps: &Captures| {
            hold(&mut stash, format!("<code>{}</code>", escape_html(&caps[1])))
        });

        let text = escape_html(&text);

        let text = self.link.replace_all(&text, |caps: &Captures| {
            hold(
                &mut stash,
                format!("<a href=\"{}\">{}</a>", &caps[2], &caps[1]),
            )
        });

        let text = self.heading.replace_all(&text, "<b>${1}</b>");
        let text = self.bullet.replace_all(&text, "${1}• ");
        let text = self.bold_star.replace_all(&text, "<b>${1}</b>");
        let text = self.bold_under.replace_all(&text, "${1}<b>${2}</b>");
        let text = self.strike.replace_all(&text, "<s>${1}</s>");
        let text = self.italic_star.replace_all(&text, "${1}<i>${2}</i>");
        let text = self.italic_under.replace_all(&text, "${1}<i>${2}</i>");

        self.placeholder
            .replace_all(&text, |caps: &Captures| {
                caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| stash.get(i).cloned())
                    .unwrap_or_default()
            })
            .into_owned()
    }
}

fn hold(stash: &mut Vec<String>, html: String) -> String {
    stash.push(html);
    format!("{MARK}{}{MARK}", stash.len() - 1)
}

/// Escape the characters Telegram's HTML parser treats specially
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Plain-text rendition of formatted HTML, used when the provider rejects
/// the markup.
pub fn strip_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

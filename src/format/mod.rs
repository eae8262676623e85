//! Outbound message formatting
//!
//! Agent Markdown is converted to Telegram HTML and then chunked to the
//! provider's message length limit.

mod chunk;
mod markdown;
mod tools;

pub use chunk::{chunk_html, text_len};
pub use markdown::{escape_html, strip_html, MarkdownRenderer};
pub use tools::{shorten_path, split_content, summary_line, tool_icon, tool_line, truncate};

use crate::error::Result;

/// Markdown renderer bound to a message length limit
pub struct Formatter {
    markdown: MarkdownRenderer,
    max_len: usize,
}

impl Formatter {
    pub fn new(max_len: usize) -> Result<Self> {
        Ok(Self {
            markdown: MarkdownRenderer::new()?,
            max_len,
        })
    }

    pub fn to_html(&self, markdown: &str) -> String {
        self.markdown.to_html(markdown)
    }

    /// Format and chunk agent prose
    pub fn render(&self, markdown: &str) -> Vec<String> {
        chunk_html(&self.to_html(markdown), self.max_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_short_reply() {
        let formatter = Formatter::new(4096).unwrap();
        assert_eq!(formatter.render("**hi**"), vec!["<b>hi</b>".to_string()]);
    }

    #[test]
    fn test_render_long_prose() {
        let formatter = Formatter::new(4096).unwrap();
        let prose = "lorem ipsum dolor sit amet ".repeat(334);
        let prose = &prose[..9000];
        let chunks = formatter.render(prose);
        assert_eq!(chunks.len(), 3);
        for (i, chunk) in chunks.iter().enumerate() {
            assert!(chunk.starts_with(&format!("[{}/3] ", i + 1)));
            assert!(text_len(chunk) <= 4096);
            assert!(!chunk.contains('<'));
        }
    }

    #[test]
    fn test_render_long_markup_keeps_tags_whole() {
        let formatter = Formatter::new(4096).unwrap();
        let prose = "some **bold** and *slanted* text, ".repeat(300);
        let html = formatter.to_html(&prose);
        let chunks = formatter.render(&prose);
        assert!(chunks.len() > 2);
        let mut rejoined = String::new();
        for chunk in &chunks {
            assert!(text_len(chunk) <= 4096);
            let body = &chunk[chunk.find("] ").map(|i| i + 2).unwrap_or(0)..];
            assert_eq!(body.matches("<b>").count(), body.matches("</b>").count());
            assert_eq!(body.matches("<i>").count(), body.matches("</i>").count());
            rejoined.push_str(body);
        }
        assert_eq!(rejoined, html);
    }

    #[test]
    fn test_render_cyrillic_prose_within_utf16_limit() {
        let formatter = Formatter::new(4096).unwrap();
        let prose = "слово ".repeat(1500);
        let chunks = formatter.render(&prose);
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert!(text_len(chunk) <= 4096);
        }
    }
}

//! Splitting formatted HTML into provider-sized messages
//!
//! Lengths are counted in UTF-16 code units, the unit of Telegram's
//! message limit.

/// Room kept free in each chunk for the `[i/N] ` prefix
const PREFIX_RESERVE: usize = 16;

/// A boundary must lie beyond this share of the limit
const MIN_FILL_PERCENT: usize = 30;

/// Split `html` into chunks no longer than `max_len`.
///
/// Concatenating the chunks (minus their `[i/N] ` prefixes) yields `html`
/// unchanged, except where an element had to be split: it is closed at the
/// end of one chunk and reopened at the start of the next. Prefixes are only
/// added when there are more than two chunks.
pub fn chunk_html(html: &str, max_len: usize) -> Vec<String> {
    if text_len(html) <= max_len {
        return vec![html.to_string()];
    }

    let limit = max_len.saturating_sub(PREFIX_RESERVE).max(1);
    let mut chunks = Vec::new();
    let mut rest = html.to_string();
    while text_len(&rest) > limit {
        let (chunk, cut, reopen) = take_chunk(&rest, limit);
        chunks.push(chunk);
        rest = format!("{}{}", reopen, &rest[cut..]);
    }
    if !rest.is_empty() {
        chunks.push(rest);
    }

    if chunks.len() > 2 {
        let total = chunks.len();
        chunks = chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| format!("[{}/{}] {}", i + 1, total, chunk))
            .collect();
    }
    chunks
}

/// Length as Telegram counts it
pub fn text_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Cut the first chunk off `text`. Returns the chunk, the byte offset where
/// the remainder starts, and the opening tags to replay before it.
fn take_chunk(text: &str, limit: usize) -> (String, usize, String) {
    let mut budget = limit;
    loop {
        let cut = find_cut(text, budget);
        let head = &text[..cut];
        let open = open_elements(head);
        if open.is_empty() {
            return (head.to_string(), cut, String::new());
        }

        let closers: String = open
            .iter()
            .rev()
            .map(|el| format!("</{}>", el.name))
            .collect();
        let reopen: String = open.iter().map(|el| &text[el.start..el.end]).collect();
        // Replaying tags longer than the cut text would never make progress
        if text_len(&reopen) >= text_len(head) {
            return (head.to_string(), cut, String::new());
        }
        let needed = text_len(head) + text_len(&closers);
        if needed <= limit || budget == 1 {
            return (format!("{}{}", head, closers), cut, reopen);
        }
        budget = budget.saturating_sub(needed - limit).max(1);
    }
}

/// Choose where the first chunk of `text` ends. `text` is longer than
/// `limit`; the result is a non-empty prefix on a char boundary.
fn find_cut(text: &str, limit: usize) -> usize {
    let window = byte_offset(text, limit);
    let min = byte_offset(text, limit * MIN_FILL_PERCENT / 100);
    let head = &text[..window];

    let candidates = [
        head.rfind("</pre>").map(|i| i + "</pre>".len()),
        head.rfind("\n\n").map(|i| i + 2),
        head.rfind('\n').map(|i| i + 1),
    ];
    for cut in candidates.into_iter().flatten() {
        if cut > min && outermost_open_tag(&text[..cut]).is_none() {
            return cut;
        }
    }

    // Hard cut: step out of any tag or entity, then out of open elements
    let mut cut = window;
    if let Some(start) = inside_tag(head) {
        cut = start;
    }
    if let Some(start) = inside_entity(&text[..cut]) {
        cut = start;
    }
    if let Some(open) = outermost_open_tag(&text[..cut]) {
        if open > min {
            cut = open;
        }
    }
    if cut == 0 {
        window.max(next_char_boundary(text, 1))
    } else {
        cut
    }
}

/// Byte offset of the longest prefix of `text` within `units` UTF-16 units
fn byte_offset(text: &str, units: usize) -> usize {
    let mut used = 0;
    for (i, c) in text.char_indices() {
        used += c.len_utf16();
        if used > units {
            return i;
        }
    }
    text.len()
}

fn next_char_boundary(text: &str, index: usize) -> usize {
    let mut i = index.min(text.len());
    while !text.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// Start of an unterminated `<...` at the end of `head`
fn inside_tag(head: &str) -> Option<usize> {
    let open = head.rfind('<')?;
    match head.rfind('>') {
        Some(close) if close > open => None,
        _ => Some(open),
    }
}

/// Start of an unterminated `&...;` entity at the end of `head`
fn inside_entity(head: &str) -> Option<usize> {
    let amp = head.rfind('&')?;
    let tail = &head[amp + 1..];
    if tail.len() < 8 && tail.chars().all(|c| c.is_ascii_alphanumeric() || c == '#') {
        Some(amp)
    } else {
        None
    }
}

/// An element opened but not yet closed
#[derive(Debug)]
struct OpenElement {
    name: String,
    /// Byte range of the opening tag
    start: usize,
    end: usize,
}

/// Elements still open at the end of `html`, outermost first
fn open_elements(html: &str) -> Vec<OpenElement> {
    let mut stack: Vec<OpenElement> = Vec::new();
    let mut pos = 0;
    while let Some(rel) = html[pos..].find('<') {
        let start = pos + rel;
        let Some(len) = html[start..].find('>') else {
            break;
        };
        let inner = &html[start + 1..start + len];
        pos = start + len + 1;

        if let Some(name) = inner.strip_prefix('/') {
            let name = tag_name(name);
            if let Some(idx) = stack.iter().rposition(|el| el.name == name) {
                stack.truncate(idx);
            }
        } else if !inner.ends_with('/') {
            stack.push(OpenElement {
                name: tag_name(inner).to_string(),
                start,
                end: pos,
            });
        }
    }
    stack
}

/// Byte offset of the outermost element opened but not closed in `html`
fn outermost_open_tag(html: &str) -> Option<usize> {
    open_elements(html).first().map(|el| el.start)
}

fn tag_name(inner: &str) -> &str {
    inner
        .split(|c: char| c.is_whitespace() || c == '/')
        .next()
        .unwrap_or("")
}

//! Structure-aware text chunker.
//!
//! [`chunk_text`] is a pure function of its input and [`ChunkConfig`]:
//!
//! 1. Headings are detected in one pass over the lines ([`detect_headings`]):
//!    markdown `#` headings, setext underlines, numbered sections,
//!    "Chapter N" / "Section N" markers and all-caps lines.
//! 2. With headings, the text is cut at each heading offset. Every span is
//!    tagged with the heading path active at that point, maintained as an
//!    explicit `(level, title)` stack.
//! 3. Spans (or the whole text, without headings) larger than `chunk_size`
//!    are split recursively on progressively finer separators, down to raw
//!    character boundaries.
//! 4. Every chunk after the first is prefixed with the trailing `overlap`
//!    characters of the previous chunk's core text.
//!
//! Sizes are measured in characters; offsets are byte offsets into the
//! input and always fall on UTF-8 boundaries.

use crate::config::ChunkingConfig;
use crate::models::ChunkKind;

/// Approximate characters per token used for `token_estimate`.
pub const CHARS_PER_TOKEN: usize = 4;

/// Separator levels, coarsest first. Each level may hold alternatives.
const SEPARATOR_LEVELS: &[&[&str]] = &[
    &["\n\n"],
    &["\n"],
    &[". ", "! ", "? "],
    &["; "],
    &[", "],
    &[" "],
];

/// Levels below this index produce `paragraph` chunks, the rest `fragment`.
const PARAGRAPH_LEVELS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Maximum core length of a chunk, in characters.
    pub chunk_size: usize,
    /// Characters carried over from the previous chunk.
    pub overlap: usize,
    /// Disabled for source code and data files, where `#` lines are comments.
    pub detect_headings: bool,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self::from(&ChunkingConfig::default())
    }
}

impl From<&ChunkingConfig> for ChunkConfig {
    fn from(c: &ChunkingConfig) -> Self {
        Self {
            chunk_size: c.chunk_size,
            overlap: c.chunk_overlap,
            detect_headings: true,
        }
    }
}

/// A heading found in the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    /// 1 is outermost.
    pub level: usize,
    pub title: String,
    /// Byte offset of the start of the heading line.
    pub offset: usize,
}

/// One chunker output record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Overlap prefix followed by the core text.
    pub content: String,
    /// Byte length of the overlap prefix in `content`.
    pub overlap_len: usize,
    /// Byte range of the core text in the input.
    pub start_offset: usize,
    pub end_offset: usize,
    /// 1-based line numbers of the core text.
    pub start_line: usize,
    pub end_line: usize,
    pub kind: ChunkKind,
    pub heading_path: Vec<String>,
    pub token_estimate: usize,
    /// False when the chunk ends on a raw character boundary.
    pub has_context: bool,
}

impl TextChunk {
    /// The chunk text without the injected overlap.
    pub fn core(&self) -> &str {
        &self.content[self.overlap_len..]
    }
}

#[derive(Debug, Clone, Copy)]
struct Piece {
    start: usize,
    end: usize,
    kind: ChunkKind,
    has_context: bool,
}

/// Split `text` into chunks.
pub fn chunk_text(text: &str, config: &ChunkConfig) -> Vec<TextChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let size = config.chunk_size.max(1);
    let overlap = config.overlap.min(size.saturating_sub(1));

    let headings = if config.detect_headings {
        detect_headings(text)
    } else {
        Vec::new()
    };

    let mut pieces: Vec<(Piece, Vec<String>)> = Vec::new();

    if headings.is_empty() {
        for p in split_span(text, 0, text.len(), size, ChunkKind::Paragraph) {
            pieces.push((p, Vec::new()));
        }
    } else {
        if headings[0].offset > 0 {
            for p in split_span(text, 0, headings[0].offset, size, ChunkKind::Paragraph) {
                pieces.push((p, Vec::new()));
            }
        }

        let mut stack: Vec<(usize, &str)> = Vec::new();
        for (i, heading) in headings.iter().enumerate() {
            while stack.last().is_some_and(|(level, _)| *level >= heading.level) {
                stack.pop();
            }
            stack.push((heading.level, heading.title.as_str()));

            let path: Vec<String> = stack.iter().map(|(_, t)| t.to_string()).collect();
            let end = headings
                .get(i + 1)
                .map(|next| next.offset)
                .unwrap_or(text.len());
            for p in split_span(text, heading.offset, end, size, ChunkKind::Section) {
                pieces.push((p, path.clone()));
            }
        }
    }

    assemble(text, pieces, overlap)
}

/// A span that fits becomes one piece of `whole_kind`; otherwise it is
/// split recursively. Blank spans produce nothing.
fn split_span(text: &str, start: usize, end: usize, size: usize, whole_kind: ChunkKind) -> Vec<Piece> {
    let span = &text[start..end];
    if span.trim().is_empty() {
        return Vec::new();
    }
    if span.chars().count() <= size {
        return vec![Piece {
            start,
            end,
            kind: whole_kind,
            has_context: true,
        }];
    }
    let mut out = Vec::new();
    split_recursive(text, start, end, 0, size, &mut out);
    absorb_blank_pieces(text, out, size)
}

/// Fold whitespace-only pieces into their neighbours: the previous piece
/// takes as much as fits within `size`, the next piece the rest. Whitespace
/// neither can hold is dropped.
fn absorb_blank_pieces(text: &str, pieces: Vec<Piece>, size: usize) -> Vec<Piece> {
    let chars = |s: usize, e: usize| text[s..e].chars().count();
    let mut out: Vec<Piece> = Vec::with_capacity(pieces.len());
    // Start of blank bytes waiting for the next non-blank piece.
    let mut pending: Option<usize> = None;

    for mut piece in pieces {
        if text[piece.start..piece.end].trim().is_empty() {
            let mut from = piece.start;
            if pending.is_none() {
                if let Some(prev) = out.last_mut().filter(|p| p.end == piece.start) {
                    let room = size.saturating_sub(chars(prev.start, prev.end));
                    from = advance_chars(text, piece.start, piece.end, room);
                    prev.end = from;
                }
            }
            if from < piece.end {
                pending = pending.or(Some(from));
            }
            continue;
        }
        if let Some(blank_start) = pending.take() {
            let room = size.saturating_sub(chars(piece.start, piece.end));
            piece.start = retreat_chars(text, blank_start, piece.start, room);
        }
        out.push(piece);
    }
    out
}

/// Byte offset `n` characters past `from`, capped at `to`.
fn advance_chars(text: &str, from: usize, to: usize, n: usize) -> usize {
    text[from..to]
        .char_indices()
        .nth(n)
        .map(|(i, _)| from + i)
        .unwrap_or(to)
}

/// Byte offset `n` characters before `to`, floored at `from`.
fn retreat_chars(text: &str, from: usize, to: usize, n: usize) -> usize {
    if n == 0 {
        return to;
    }
    text[from..to]
        .char_indices()
        .rev()
        .nth(n - 1)
        .map(|(i, _)| from + i)
        .unwrap_or(from)
}

/// Split `text[start..end]` on the first separator level (from `level`) that
/// occurs in it, greedily merging adjacent parts up to `size` characters.
/// Parts still too large recurse with the next level.
fn split_recursive(text: &str, start: usize, end: usize, level: usize, size: usize, out: &mut Vec<Piece>) {
    for (i, seps) in SEPARATOR_LEVELS.iter().enumerate().skip(level) {
        let parts = split_inclusive(text, start, end, seps);
        if parts.len() < 2 {
            continue;
        }
        let kind = if i < PARAGRAPH_LEVELS {
            ChunkKind::Paragraph
        } else {
            ChunkKind::Fragment
        };
        let flush = |group: Option<(usize, usize, usize)>, out: &mut Vec<Piece>| {
            if let Some((gs, ge, _)) = group {
                out.push(Piece {
                    start: gs,
                    end: ge,
                    kind,
                    has_context: true,
                });
            }
        };

        // (start, end, chars)
        let mut group: Option<(usize, usize, usize)> = None;
        for (ps, pe) in parts {
            let len = text[ps..pe].chars().count();
            if len > size {
                flush(group.take(), out);
                split_recursive(text, ps, pe, i + 1, size, out);
                continue;
            }
            group = match group {
                Some((gs, _, n)) if n + len <= size => Some((gs, pe, n + len)),
                Some(full) => {
                    flush(Some(full), out);
                    Some((ps, pe, len))
                }
                None => Some((ps, pe, len)),
            };
        }
        flush(group, out);
        return;
    }

    split_chars(text, start, end, size, out);
}

/// Split keeping each separator attached to the part before it, so the parts
/// concatenate back to the input.
fn split_inclusive(text: &str, start: usize, end: usize, seps: &[&str]) -> Vec<(usize, usize)> {
    let s = &text[start..end];
    let mut parts = Vec::new();
    let mut from = 0;
    while from < s.len() {
        let cut = seps
            .iter()
            .filter_map(|sep| s[from..].find(sep).map(|p| from + p + sep.len()))
            .min();
        match cut {
            Some(cut) if cut < s.len() => {
                parts.push((start + from, start + cut));
                from = cut;
            }
            _ => {
                parts.push((start + from, end));
                break;
            }
        }
    }
    parts
}

/// Last resort: fixed windows of `size` characters.
fn split_chars(text: &str, start: usize, end: usize, size: usize, out: &mut Vec<Piece>) {
    let mut piece_start = start;
    let mut count = 0;
    for (idx, _) in text[start..end].char_indices() {
        if count == size {
            out.push(Piece {
                start: piece_start,
                end: start + idx,
                kind: ChunkKind::Fragment,
                has_context: false,
            });
            piece_start = start + idx;
            count = 0;
        }
        count += 1;
    }
    if piece_start < end {
        out.push(Piece {
            start: piece_start,
            end,
            kind: ChunkKind::Fragment,
            has_context: false,
        });
    }
}

fn assemble(text: &str, pieces: Vec<(Piece, Vec<String>)>, overlap: usize) -> Vec<TextChunk> {
    let line_starts = line_starts(text);
    let mut chunks = Vec::with_capacity(pieces.len());
    let mut prev_core: Option<&str> = None;

    for (piece, heading_path) in pieces {
        let core = &text[piece.start..piece.end];
        let prefix = match prev_core {
            Some(prev) if overlap > 0 => tail_chars(prev, overlap),
            _ => "",
        };

        let mut content = String::with_capacity(prefix.len() + core.len());
        content.push_str(prefix);
        content.push_str(core);
        let token_estimate = content.chars().count().div_ceil(CHARS_PER_TOKEN);
        let last_byte = piece.end.saturating_sub(1).max(piece.start);

        chunks.push(TextChunk {
            content,
            overlap_len: prefix.len(),
            start_offset: piece.start,
            end_offset: piece.end,
            start_line: line_of(&line_starts, piece.start),
            end_line: line_of(&line_starts, last_byte),
            kind: piece.kind,
            heading_path,
            token_estimate,
            has_context: piece.has_context,
        });
        prev_core = Some(core);
    }
    chunks
}

fn tail_chars(s: &str, n: usize) -> &str {
    match s.char_indices().rev().nth(n.saturating_sub(1)) {
        Some((i, _)) => &s[i..],
        None => s,
    }
}

fn line_starts(text: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(text.match_indices('\n').map(|(i, _)| i + 1))
        .collect()
}

fn line_of(line_starts: &[usize], offset: usize) -> usize {
    line_starts.partition_point(|&s| s <= offset)
}

// ============ Heading detection ============

/// Detect headings in document order. Lines inside ``` or ~~~ fences are
/// never headings.
pub fn detect_headings(text: &str) -> Vec<Heading> {
    let mut lines: Vec<(usize, &str)> = Vec::new();
    let mut offset = 0;
    for raw in text.split_inclusive('\n') {
        lines.push((offset, raw.trim_end_matches(|c| c == '\n' || c == '\r')));
        offset += raw.len();
    }

    let is_blank = |i: usize| lines.get(i).map_or(true, |(_, l)| l.trim().is_empty());

    let mut headings = Vec::new();
    let mut in_fence = false;
    let mut i = 0;
    while i < lines.len() {
        let (offset, line) = lines[i];
        let trimmed = line.trim();

        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            i += 1;
            continue;
        }
        if in_fence || trimmed.is_empty() {
            i += 1;
            continue;
        }

        if let Some((level, title)) = markdown_heading(line) {
            headings.push(Heading { level, title, offset });
            i += 1;
            continue;
        }

        if let Some(level) = lines
            .get(i + 1)
            .and_then(|(_, next)| underline_level(next, trimmed))
        {
            headings.push(Heading {
                level,
                title: trimmed.to_string(),
                offset,
            });
            i += 2;
            continue;
        }

        let standalone = (i == 0 || is_blank(i - 1)) && is_blank(i + 1);
        let level = chapter_heading(trimmed)
            .or_else(|| numbered_heading(trimmed, standalone))
            .or_else(|| all_caps_heading(trimmed));
        if let Some(level) = level {
            headings.push(Heading {
                level,
                title: trimmed.to_string(),
                offset,
            });
        }
        i += 1;
    }
    headings
}

/// `# Title` … `###### Title`, up to three spaces of indentation.
fn markdown_heading(line: &str) -> Option<(usize, String)> {
    let stripped = line.trim_start_matches(' ');
    if line.len() - stripped.len() > 3 {
        return None;
    }
    let hashes = stripped.bytes().take_while(|&b| b == b'#').count();
    if !(1..=6).contains(&hashes) {
        return None;
    }
    let rest = &stripped[hashes..];
    if !rest.is_empty() && !rest.starts_with([' ', '\t']) {
        return None;
    }
    let title = rest.trim().trim_end_matches('#').trim_end();
    if title.is_empty() {
        None
    } else {
        Some((hashes, title.to_string()))
    }
}

/// `===` under a title is level 1, `---` level 2. The underline must be at
/// least as wide as the title.
fn underline_level(underline: &str, title: &str) -> Option<usize> {
    let u = underline.trim();
    let ch = u.chars().next()?;
    if (ch != '=' && ch != '-') || u.len() < 3 || !u.chars().all(|c| c == ch) {
        return None;
    }
    if u.chars().count() < title.chars().count() {
        return None;
    }
    Some(if ch == '=' { 1 } else { 2 })
}

/// `Chapter 3`, `CHAPTER IV: Results`, `Section 2.1 Scope`.
fn chapter_heading(line: &str) -> Option<usize> {
    let mut words = line.split_whitespace();
    let level = match words.next()?.to_lowercase().as_str() {
        "chapter" => 1,
        "section" => 2,
        _ => return None,
    };
    let number = words.next()?.trim_end_matches([':', '.']);
    let numeric = !number.is_empty()
        && number
            .split('.')
            .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()));
    let roman = !number.is_empty() && number.chars().all(|c| "IVXLCDM".contains(c));
    if !numeric && !roman {
        return None;
    }
    let remaining = words.count();
    if remaining > 10 || (remaining > 0 && line.ends_with('.')) {
        return None;
    }
    Some(level)
}

/// `1 Introduction`, `2.3 Results`, `4.1.2. Edge cases`. Level is the number
/// of numeric components. Single-component numbers must stand alone between
/// blank lines to avoid matching ordered lists.
fn numbered_heading(line: &str, standalone: bool) -> Option<usize> {
    let mut idx = 0;
    let mut components = 0;
    loop {
        let digits = line[idx..].bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            break;
        }
        components += 1;
        idx += digits;
        if line[idx..].starts_with('.') {
            idx += 1;
        } else {
            break;
        }
    }
    if components == 0 || (components == 1 && !standalone) {
        return None;
    }

    let rest = &line[idx..];
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let title = rest.trim();
    let first = title.chars().next()?;
    if !first.is_uppercase() || title.chars().count() > 80 {
        return None;
    }
    if title.ends_with(['.', ',', ';', ':', '!', '?']) {
        return None;
    }
    Some(components.min(6))
}

/// A short line of capitals such as `INTRODUCTION` or `TERMS & CONDITIONS`.
fn all_caps_heading(line: &str) -> Option<usize> {
    let len = line.chars().count();
    if !(3..=80).contains(&len) || !line.chars().next()?.is_alphabetic() {
        return None;
    }
    let letters = line.chars().filter(|c| c.is_alphabetic()).count();
    if letters < 3 || line.chars().any(char::is_lowercase) {
        return None;
    }
    let allowed = |c: char| {
        c.is_alphabetic() || c.is_ascii_digit() || c == ' ' || "&-:'/(),".contains(c)
    };
    if !line.chars().all(allowed) {
        return None;
    }
    Some(1)
}

//! Markdown-aware text chunking for the knowledge corpus.
//!
//! Chunking runs in two passes:
//! 1. The document is cut at level 1-3 headings; each section keeps its
//!    heading line and records the heading hierarchy it sits under.
//! 2. Sections longer than the target size are re-split with a recursive
//!    separator cascade (paragraph, line, sentence punctuation, character)
//!    and merged back into chunks of roughly `chunk_size` characters with
//!    `chunk_overlap` characters carried between neighbours.
//!
//! Lengths are counted in characters, not bytes.

use std::collections::VecDeque;

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 20;

/// Heading levels that start a new section
const MAX_HEADING_LEVEL: usize = 3;

/// A markdown section delimited by headings
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    /// (level, heading text) from the outermost heading down
    pub headers: Vec<(usize, String)>,
    pub content: String,
}

/// A chunk ready to be embedded
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub headers: Vec<(usize, String)>,
    pub content: String,
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Parse `# Title` style headings up to level 3
fn parse_heading(line: &str) -> Option<(usize, String)> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > MAX_HEADING_LEVEL {
        return None;
    }
    let rest = &trimmed[level..];
    if !rest.starts_with(' ') {
        return None;
    }
    let text = rest.trim();
    if text.is_empty() {
        None
    } else {
        Some((level, text.to_string()))
    }
}

fn has_body(lines: &[&str]) -> bool {
    lines
        .iter()
        .any(|line| !line.trim().is_empty() && parse_heading(line).is_none())
}

/// Split a markdown document at heading boundaries.
///
/// Heading lines stay in the section text. Sections consisting only of
/// headings are dropped; their text survives in the children's `headers`.
/// Lines inside fenced code blocks are never treated as headings.
pub fn split_markdown_sections(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut stack: Vec<(usize, String)> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_headers: Vec<(usize, String)> = Vec::new();
    let mut in_fence = false;

    let mut flush = |lines: &mut Vec<&str>, headers: &[(usize, String)]| {
        if has_body(lines) {
            sections.push(Section {
                headers: headers.to_vec(),
                content: lines.join("\n").trim().to_string(),
            });
        }
        lines.clear();
    };

    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        }

        let heading = if in_fence { None } else { parse_heading(line) };
        match heading {
            Some((level, title)) => {
                flush(&mut current, &current_headers);
                stack.retain(|(l, _)| *l < level);
                stack.push((level, title));
                current_headers = stack.clone();
                current.push(line.trim_end());
            }
            None => current.push(line.trim_end()),
        }
    }
    flush(&mut current, &current_headers);

    sections
}

/// Recursive separator cascade splitter
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl Default for RecursiveSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }
}

impl RecursiveSplitter {
    /// Paragraph, line, sentence punctuation (Latin and CJK), clause, character
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
            separators: ["\n\n", "\n", "。", ". ", "! ", "? ", "、", ", ", ""]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut separator = "";
        let mut remaining: &[String] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                break;
            }
            if text.contains(sep.as_str()) {
                separator = sep;
                remaining = &separators[i + 1..];
                break;
            }
        }

        // Separators stay attached to the end of the piece they terminate
        let pieces: Vec<String> = if separator.is_empty() {
            text.chars().map(|c| c.to_string()).collect()
        } else {
            text.split_inclusive(separator)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect()
        };

        let mut chunks = Vec::new();
        let mut small: Vec<String> = Vec::new();
        for piece in pieces {
            if char_len(&piece) < self.chunk_size {
                small.push(piece);
                continue;
            }
            if !small.is_empty() {
                chunks.extend(self.merge_pieces(&small));
                small.clear();
            }
            if remaining.is_empty() && !separator.is_empty() {
                chunks.extend(self.split_recursive(&piece, &[String::new()]));
            } else if remaining.is_empty() {
                chunks.push(piece.trim().to_string());
            } else {
                chunks.extend(self.split_recursive(&piece, remaining));
            }
        }
        if !small.is_empty() {
            chunks.extend(self.merge_pieces(&small));
        }

        chunks.retain(|c| !c.is_empty());
        chunks
    }

    /// Greedily pack pieces into chunks, keeping up to `chunk_overlap`
    /// characters of trailing pieces at the start of the next chunk.
    fn merge_pieces(&self, pieces: &[String]) -> Vec<String> {
        let mut docs = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                let doc: String = window.iter().copied().collect();
                let doc = doc.trim();
                if !doc.is_empty() {
                    docs.push(doc.to_string());
                }
                while let Some(first) = window.front() {
                    if total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                        total -= char_len(first);
                        window.pop_front();
                    } else {
                        break;
                    }
                }
            }
            window.push_back(piece);
            total += len;
        }

        let doc: String = window.iter().copied().collect();
        let doc = doc.trim();
        if !doc.is_empty() {
            docs.push(doc.to_string());
        }
        docs
    }
}

/// Full two-pass chunking of a markdown document
pub fn chunk_markdown(text: &str, splitter: &RecursiveSplitter) -> Vec<Chunk> {
    split_markdown_sections(text)
        .into_iter()
        .flat_map(|section| {
            let headers = section.headers;
            let pieces = if char_len(&section.content) <= splitter.chunk_size() {
                vec![section.content]
            } else {
                splitter.split_text(&section.content)
            };
            pieces.into_iter().map(move |content| Chunk {
                headers: headers.clone(),
                content,
            })
        })
        .collect()
}

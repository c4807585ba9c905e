//! Word-aligned text chunking with optional overlap.
//!
//! Splits arbitrary text into whitespace-delimited, size-bounded pieces.
//! Chunks accumulate words greedily up to the byte budget; words longer
//! than the budget are sliced into fixed-size pieces (or emitted whole when
//! long-word splitting is off). With overlap enabled, each chunk after the
//! first starts with a word-aligned suffix of its predecessor so context
//! survives the boundary.

/// Chunking parameters.
#[derive(Debug, Clone, Copy)]
pub struct ChunkOptions {
    /// Maximum bytes per chunk. Zero is clamped to 1.
    pub max_size: usize,
    /// Overlap in bytes between consecutive chunks, word-aligned.
    /// Values >= `max_size` are clamped to `max_size - 1`.
    pub overlap: usize,
    /// Split words longer than `max_size` into pieces so no chunk exceeds
    /// the budget. When false, an oversized word becomes its own chunk.
    pub split_long_words: bool,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_size: 1000,
            overlap: 0,
            split_long_words: true,
        }
    }
}

/// Split `text` into chunks according to `opts`.
///
/// Empty input yields a single empty chunk. Input that fits the budget and
/// needs no long-word splitting is returned verbatim as one chunk.
pub fn split_into_chunks(text: &str, opts: &ChunkOptions) -> Vec<String> {
    let max_size = opts.max_size.max(1);
    let overlap = if opts.overlap >= max_size {
        max_size - 1
    } else {
        opts.overlap
    };

    if text.is_empty() {
        return vec![String::new()];
    }
    if text.len() <= max_size {
        let needs_split = opts.split_long_words
            && text.split_whitespace().any(|w| w.len() > max_size);
        if !needs_split {
            return vec![text.to_string()];
        }
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    // Word-aligned tail of the previous chunk, seeded into the next one.
    let mut overlap_prefix = String::new();

    for word in text.split_whitespace() {
        if word.len() > max_size && opts.split_long_words {
            if !current.is_empty() {
                if overlap > 0 {
                    overlap_prefix = overlap_tail(&current, overlap);
                } else {
                    overlap_prefix.clear();
                }
                chunks.push(std::mem::take(&mut current));
            }
            for piece in split_long_word(word, max_size) {
                if overlap > 0 {
                    overlap_prefix = overlap_tail(piece, overlap);
                }
                chunks.push(piece.to_string());
            }
            continue;
        }

        let next_len = if !current.is_empty() {
            current.len() + 1 + word.len()
        } else if !overlap_prefix.is_empty() {
            overlap_prefix.len() + 1 + word.len()
        } else {
            word.len()
        };

        if next_len > max_size {
            if !current.is_empty() {
                if overlap > 0 {
                    overlap_prefix = overlap_tail(&current, overlap);
                } else {
                    overlap_prefix.clear();
                }
                chunks.push(std::mem::take(&mut current));
            }
            // A prefix that cannot fit together with the next word is
            // dropped; the new chunk starts bare.
            if !overlap_prefix.is_empty()
                && overlap_prefix.len() + 1 + word.len() > max_size
            {
                overlap_prefix.clear();
            }
            if overlap_prefix.is_empty() {
                current = word.to_string();
            } else {
                current = format!("{overlap_prefix} {word}");
                overlap_prefix.clear();
            }
        } else if current.is_empty() {
            if overlap_prefix.is_empty() {
                current = word.to_string();
            } else {
                current = format!("{overlap_prefix} {word}");
                overlap_prefix.clear();
            }
        } else {
            current.push(' ');
            current.push_str(word);
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Longest word-aligned suffix of `chunk` whose length (spaces included)
/// does not exceed `overlap`.
fn overlap_tail(chunk: &str, overlap: usize) -> String {
    if overlap == 0 || chunk.is_empty() {
        return String::new();
    }
    let words: Vec<&str> = chunk.split_whitespace().collect();
    let mut tail: Vec<&str> = Vec::new();
    let mut length = 0usize;
    for w in words.iter().rev() {
        let add = if tail.is_empty() { w.len() } else { w.len() + 1 };
        if length + add > overlap {
            break;
        }
        tail.push(w);
        length += add;
    }
    tail.reverse();
    tail.join(" ")
}

/// Slice an oversized word into pieces of at most `max_size` bytes, on
/// UTF-8 character boundaries. The last piece may be shorter.
fn split_long_word(word: &str, max_size: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = word;
    while !rest.is_empty() {
        let mut end = rest.len().min(max_size);
        while end > 0 && !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            // single character wider than the budget
            end = rest.chars().next().map(|c| c.len_utf8()).unwrap_or(rest.len());
        }
        pieces.push(&rest[..end]);
        rest = &rest[end..];
    }
    pieces
}

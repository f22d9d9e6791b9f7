//! Recursive character text splitting for corpus ingestion.
//!
//! Splits markdown text into overlapping chunks, preferring paragraph
//! boundaries, then line boundaries, then word boundaries, and finally
//! falling back to fixed character windows. Each chunk records its byte
//! offset into the source text.

use std::collections::VecDeque;

/// A piece of split text with its byte offset in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub content: String,
    /// Byte offset of this chunk's first character in the source text.
    pub start_index: usize,
}

/// Recursive character splitter.
///
/// Sizes are measured in characters; offsets are byte positions (always on
/// a character boundary).
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl TextSplitter {
    /// Create a splitter with the default separator ladder
    /// (`"\n\n"`, `"\n"`, `" "`, then character windows).
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            separators: vec![
                "\n\n".to_string(),
                "\n".to_string(),
                " ".to_string(),
                String::new(),
            ],
        }
    }

    /// Split `text` into chunks of at most `chunk_size` characters with
    /// `chunk_overlap` characters of overlap between consecutive chunks.
    pub fn split(&self, text: &str) -> Vec<Chunk> {
        let mut ranges: Vec<(usize, usize)> = Vec::new();
        self.split_ranges(text, 0, text.len(), 0, &mut ranges);
        ranges
            .into_iter()
            .map(|(start, end)| Chunk {
                content: text[start..end].to_string(),
                start_index: start,
            })
            .collect()
    }

    /// Recursively split `text[start..end]`, appending chunk byte ranges.
    fn split_ranges(
        &self,
        text: &str,
        start: usize,
        end: usize,
        sep_idx: usize,
        out: &mut Vec<(usize, usize)>,
    ) {
        let slice = &text[start..end];
        if slice.chars().count() <= self.chunk_size {
            if !slice.is_empty() {
                out.push((start, end));
            }
            return;
        }

        // Pick the first separator that occurs in this slice; the empty
        // separator always matches and means "split into character windows".
        let mut sep = "";
        let mut next_idx = self.separators.len();
        for (i, candidate) in self.separators.iter().enumerate().skip(sep_idx) {
            if candidate.is_empty() || slice.contains(candidate.as_str()) {
                sep = candidate;
                next_idx = i + 1;
                break;
            }
        }

        if sep.is_empty() {
            self.window_ranges(text, start, end, out);
            return;
        }

        // Byte ranges of the pieces between separators, empties skipped.
        let mut pieces: Vec<(usize, usize)> = Vec::new();
        let mut cursor = start;
        for (found, _) in slice.match_indices(sep) {
            let abs = start + found;
            if abs > cursor {
                pieces.push((cursor, abs));
            }
            cursor = abs + sep.len();
        }
        if end > cursor {
            pieces.push((cursor, end));
        }

        self.merge_pieces(text, &pieces, sep, next_idx, out);
    }

    /// Greedily merge small pieces into chunks, recursing into pieces that
    /// are themselves over the chunk size.
    fn merge_pieces(
        &self,
        text: &str,
        pieces: &[(usize, usize)],
        sep: &str,
        next_idx: usize,
        out: &mut Vec<(usize, usize)>,
    ) {
        let sep_chars = sep.chars().count();
        let mut group: VecDeque<(usize, usize)> = VecDeque::new();
        let mut total = 0usize;

        for &(ps, pe) in pieces {
            let piece_chars = text[ps..pe].chars().count();

            if piece_chars > self.chunk_size {
                // Flush whatever is pending, then split the long piece with
                // the next separator in the ladder.
                if let (Some(first), Some(last)) = (group.front(), group.back()) {
                    out.push((first.0, last.1));
                }
                group.clear();
                total = 0;
                self.split_ranges(text, ps, pe, next_idx, out);
                continue;
            }

            let added = if group.is_empty() {
                piece_chars
            } else {
                piece_chars + sep_chars
            };

            if total + added > self.chunk_size && !group.is_empty() {
                out.push((group.front().unwrap().0, group.back().unwrap().1));

                // Drop leading pieces until the retained tail fits inside the
                // overlap budget and leaves room for the incoming piece.
                loop {
                    let incoming = if group.is_empty() {
                        piece_chars
                    } else {
                        piece_chars + sep_chars
                    };
                    let over_overlap = total > self.chunk_overlap;
                    let over_size = total + incoming > self.chunk_size && total > 0;
                    if !(over_overlap || over_size) {
                        break;
                    }
                    let Some((fs, fe)) = group.pop_front() else {
                        break;
                    };
                    let mut removed = text[fs..fe].chars().count();
                    if !group.is_empty() {
                        removed += sep_chars;
                    }
                    total = total.saturating_sub(removed);
                }
            }

            total += if group.is_empty() {
                piece_chars
            } else {
                piece_chars + sep_chars
            };
            group.push_back((ps, pe));
        }

        if let (Some(first), Some(last)) = (group.front(), group.back()) {
            out.push((first.0, last.1));
        }
    }

    /// Last-resort splitting into fixed character windows with overlap.
    fn window_ranges(
        &self,
        text: &str,
        start: usize,
        end: usize,
        out: &mut Vec<(usize, usize)>,
    ) {
        let step = self.chunk_size.saturating_sub(self.chunk_overlap).max(1);
        let boundaries: Vec<usize> = text[start..end]
            .char_indices()
            .map(|(i, _)| start + i)
            .collect();

        let mut i = 0;
        while i < boundaries.len() {
            let chunk_start = boundaries[i];
            let chunk_end = if i + self.chunk_size < boundaries.len() {
                boundaries[i + self.chunk_size]
            } else {
                end
            };
            out.push((chunk_start, chunk_end));
            if chunk_end == end {
                break;
            }
            i += step;
        }
    }
}

impl Default for TextSplitter {
    /// The corpus ingestion defaults: 1000-character chunks with 200
    /// characters of overlap.
    fn default() -> Self {
        Self::new(1000, 200)
    }
}

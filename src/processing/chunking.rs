//! Character-window text splitting with overlap.
//!
//! Chunks are measured in Unicode scalar values, never split a character, and prefer to end
//! after a paragraph break or whitespace when one falls late enough in the window. Each
//! chunk after the first starts with exactly `chunk_overlap` characters copied from the end
//! of its predecessor, so dropping those leading characters and concatenating reproduces the
//! source text.

use super::types::{ChunkingError, DocumentChunk, PageText};

/// Validated splitter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    /// Build a splitter, rejecting `chunk_overlap >= chunk_size` and a zero chunk size.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ChunkingError> {
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(ChunkingError::InvalidConfiguration {
                chunk_size,
                chunk_overlap,
            });
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    /// Maximum characters per chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Characters shared by consecutive chunks.
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Iterate over the chunks of `text`. The iterator is `Clone`, so it can be restarted.
    pub fn chunks<'a>(&self, text: &'a str) -> Chunks<'a> {
        Chunks::new(text, self.chunk_size, self.chunk_overlap)
    }

    /// Split `text` into owned chunks. Blank input yields no chunks.
    pub fn split(&self, text: &str) -> Vec<String> {
        self.chunks(text).map(str::to_string).collect()
    }

    /// Split every page of a document, numbering chunks across the whole document.
    pub fn split_document(&self, source_filename: &str, pages: &[PageText]) -> Vec<DocumentChunk> {
        let mut chunks = Vec::new();
        for page in pages {
            for text in self.chunks(&page.text) {
                chunks.push(DocumentChunk {
                    text: text.to_string(),
                    sequence_index: chunks.len(),
                    source_filename: source_filename.to_string(),
                    page_number: Some(page.page_number),
                });
            }
        }
        chunks
    }
}

/// Lazy, finite iterator over the chunks of one text.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    text: &'a str,
    /// Byte offset of every char, plus `text.len()` as a sentinel.
    offsets: Vec<usize>,
    start: usize,
    chunk_size: usize,
    chunk_overlap: usize,
    done: bool,
}

impl<'a> Chunks<'a> {
    fn new(text: &'a str, chunk_size: usize, chunk_overlap: usize) -> Self {
        let offsets: Vec<usize> = text
            .char_indices()
            .map(|(offset, _)| offset)
            .chain(std::iter::once(text.len()))
            .collect();
        Self {
            text,
            offsets,
            start: 0,
            chunk_size,
            chunk_overlap,
            done: text.trim().is_empty(),
        }
    }

    fn char_count(&self) -> usize {
        self.offsets.len() - 1
    }

    fn char_at(&self, index: usize) -> char {
        self.text[self.offsets[index]..self.offsets[index + 1]]
            .chars()
            .next()
            .unwrap_or('\0')
    }

    /// Pick the end (exclusive, in chars) of a chunk that cannot reach the end of the text.
    ///
    /// The result always leaves the chunk longer than the overlap so the next window starts
    /// strictly after this one.
    fn break_point(&self, hard_end: usize) -> usize {
        let min_end = self.start + self.chunk_overlap + 1;
        let paragraph_floor = min_end.max(self.start + self.chunk_size / 2).max(self.start + 2);

        for end in (paragraph_floor..=hard_end).rev() {
            if self.char_at(end - 1) == '\n' && self.char_at(end - 2) == '\n' {
                return end;
            }
        }
        for end in (min_end..=hard_end).rev() {
            if self.char_at(end - 1).is_whitespace() {
                return end;
            }
        }
        hard_end
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let total = self.char_count();
        let hard_end = (self.start + self.chunk_size).min(total);
        let end = if hard_end == total {
            total
        } else {
            self.break_point(hard_end)
        };

        let chunk = &self.text[self.offsets[self.start]..self.offsets[end]];
        if end == total {
            self.done = true;
        } else {
            self.start = end - self.chunk_overlap;
        }
        Some(chunk)
    }
}

impl std::iter::FusedIterator for Chunks<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconstruct(chunks: &[String], overlap: usize) -> String {
        let mut text = String::new();
        for (index, chunk) in chunks.iter().enumerate() {
            if index == 0 {
                text.push_str(chunk);
            } else {
                text.extend(chunk.chars().skip(overlap));
            }
        }
        text
    }

    #[test]
    fn rejects_overlap_not_smaller_than_chunk_size() {
        let error = TextSplitter::new(100, 100).unwrap_err();
        assert!(matches!(
            error,
            ChunkingError::InvalidConfiguration {
                chunk_size: 100,
                chunk_overlap: 100
            }
        ));
        assert!(TextSplitter::new(100, 250).is_err());
        assert!(TextSplitter::new(0, 0).is_err());
    }

    #[test]
    fn empty_and_blank_input_yield_no_chunks() {
        let splitter = TextSplitter::new(10, 2).unwrap();
        assert!(splitter.split("").is_empty());
        assert!(splitter.split("   \n\t ").is_empty());
    }

    #[test]
    fn short_document_yields_exactly_one_chunk() {
        let splitter = TextSplitter::new(1000, 200).unwrap();
        let chunks = splitter.split("Refunds are issued within 30 days.");
        assert_eq!(chunks, vec!["Refunds are issued within 30 days."]);
    }

    #[test]
    fn unbroken_text_uses_exact_windows() {
        let splitter = TextSplitter::new(10, 3).unwrap();
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunks = splitter.split(text);
        assert_eq!(chunks, vec!["abcdefghij", "hijklmnopq", "opqrstuvwx", "vwxyz"]);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 10);
        }
    }

    #[test]
    fn prefers_whitespace_boundaries() {
        let splitter = TextSplitter::new(12, 2).unwrap();
        let chunks = splitter.split("alpha beta gamma delta");
        assert_eq!(chunks[0], "alpha beta ");
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 12));
        assert_eq!(reconstruct(&chunks, 2), "alpha beta gamma delta");
    }

    #[test]
    fn prefers_paragraph_breaks_late_in_the_window() {
        let splitter = TextSplitter::new(20, 4).unwrap();
        let text = "first paragraph\n\nsecond paragraph here";
        let chunks = splitter.split(text);
        assert_eq!(chunks[0], "first paragraph\n\n");
        assert_eq!(reconstruct(&chunks, 4), text);
    }

    #[test]
    fn round_trip_reproduces_source_text() {
        let samples = [
            "The quick brown fox jumps over the lazy dog. ".repeat(40),
            "para one\n\npara two is a little longer\n\n".repeat(25),
            "ünïcödé wörds with àccents ".repeat(30),
            "x".repeat(2500),
            "short".to_string(),
        ];
        let configs = [(1000, 200), (50, 10), (17, 16), (5, 0), (64, 1)];

        for text in &samples {
            for (size, overlap) in configs {
                let splitter = TextSplitter::new(size, overlap).unwrap();
                let chunks = splitter.split(text);
                assert!(!chunks.is_empty());
                for chunk in &chunks {
                    assert!(chunk.chars().count() <= size, "chunk exceeds {size}");
                }
                for pair in chunks.windows(2) {
                    let tail: String = pair[0]
                        .chars()
                        .skip(pair[0].chars().count() - overlap)
                        .collect();
                    assert!(pair[1].starts_with(&tail));
                }
                assert_eq!(&reconstruct(&chunks, overlap), text, "size={size} overlap={overlap}");
            }
        }
    }

    #[test]
    fn iterator_is_restartable() {
        let splitter = TextSplitter::new(4, 1).unwrap();
        let chunks = splitter.chunks("abcdefghij");
        let first: Vec<&str> = chunks.clone().collect();
        let second: Vec<&str> = chunks.collect();
        assert_eq!(first, second);
        assert_eq!(first, vec!["abcd", "defg", "ghij"]);
    }

    #[test]
    fn split_document_numbers_chunks_across_pages() {
        let splitter = TextSplitter::new(1000, 200).unwrap();
        let pages = vec![
            PageText {
                page_number: 1,
                text: "a".repeat(1500),
            },
            PageText {
                page_number: 2,
                text: "b".repeat(900),
            },
            PageText {
                page_number: 3,
                text: "c".repeat(1700),
            },
        ];
        let chunks = splitter.split_document("policy.pdf", &pages);
        assert_eq!(chunks.len(), 5);
        let indexes: Vec<usize> = chunks.iter().map(|chunk| chunk.sequence_index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3, 4]);
        let page_numbers: Vec<Option<u32>> = chunks.iter().map(|chunk| chunk.page_number).collect();
        assert_eq!(page_numbers, vec![Some(1), Some(1), Some(2), Some(3), Some(3)]);
        assert!(chunks.iter().all(|chunk| chunk.source_filename == "policy.pdf"));
    }
}

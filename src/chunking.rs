use crate::document::Document;
use serde::{Deserialize, Serialize};

/// Separators tried in order, from paragraph breaks down to single characters
const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// Represents a text chunk with metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    /// The actual text content of this chunk
    pub text: String,
    /// File name of the document this chunk belongs to
    pub source: String,
    pub file_path: String,
    /// Position of this chunk within its document
    pub chunk_index: usize,
    pub total_chunks: usize,
    /// Content hash of the whole document
    pub document_hash: String,
}

/// Recursive character splitter with a fixed window and overlap.
///
/// Text is cut on the coarsest separator present; any piece still longer
/// than `chunk_size` is cut again with the next separator. Pieces are then
/// merged back into windows of at most `chunk_size` characters, each window
/// repeating up to `chunk_overlap` characters from the end of the previous one.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        TextSplitter {
            chunk_size: chunk_size.max(1),
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
        }
    }

    /// Split text into trimmed, non-empty chunks
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &SEPARATORS)
    }

    /// Split a document and tag every chunk with its source metadata
    pub fn chunk_document(&self, document: &Document) -> Vec<TextChunk> {
        let texts = self.split_text(&document.content);
        let total_chunks = texts.len();

        texts
            .into_iter()
            .enumerate()
            .map(|(chunk_index, text)| TextChunk {
                text,
                source: document.source.clone(),
                file_path: document.file_path.clone(),
                chunk_index,
                total_chunks,
                document_hash: document.document_hash.clone(),
            })
            .collect()
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let position = separators
            .iter()
            .position(|sep| sep.is_empty() || text.contains(sep))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(position).copied().unwrap_or("");
        let remaining = separators.get(position + 1..).unwrap_or(&[]);

        let pieces: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            // Separator stays attached to the end of the preceding piece
            text.split_inclusive(separator).collect()
        };

        let mut chunks = Vec::new();
        let mut fitting: Vec<&str> = Vec::new();

        for piece in pieces {
            if char_len(piece) <= self.chunk_size {
                fitting.push(piece);
                continue;
            }

            if !fitting.is_empty() {
                chunks.extend(self.merge_pieces(&fitting));
                fitting.clear();
            }

            if remaining.is_empty() {
                push_trimmed(&mut chunks, piece);
            } else {
                chunks.extend(self.split_recursive(piece, remaining));
            }
        }

        if !fitting.is_empty() {
            chunks.extend(self.merge_pieces(&fitting));
        }

        chunks
    }

    /// Greedily merge pieces into windows, carrying overlap between windows
    fn merge_pieces(&self, pieces: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: Vec<&str> = Vec::new();
        let mut window_len = 0;

        for &piece in pieces {
            let piece_len = char_len(piece);

            if window_len + piece_len > self.chunk_size && !window.is_empty() {
                push_trimmed(&mut chunks, &window.concat());

                // Drop leading pieces until only the overlap remains and the next piece fits
                while window_len > self.chunk_overlap
                    || (window_len + piece_len > self.chunk_size && window_len > 0)
                {
                    let first = window.remove(0);
                    window_len -= char_len(first);
                }
            }

            window.push(piece);
            window_len += piece_len;
        }

        if !window.is_empty() {
            push_trimmed(&mut chunks, &window.concat());
        }

        chunks
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn push_trimmed(chunks: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

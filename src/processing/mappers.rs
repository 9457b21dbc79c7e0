//! Mapping helpers between chunks, vector records and document fingerprints.

use crate::{
    processing::types::{DocumentChunk, PageText},
    qdrant::compute_content_hash,
    vector_store::{ChunkPayload, VectorRecord},
};
use uuid::Uuid;

/// Deterministic record id for one chunk of one document revision.
///
/// The same file with the same content always maps to the same ids, so reprocessing a job
/// overwrites its earlier records instead of adding new ones.
pub fn record_id(source_filename: &str, document_hash: &str, sequence_index: usize) -> String {
    let name = format!("{source_filename}:{document_hash}:{sequence_index}");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

/// SHA-256 over the extracted page texts, separated by form feeds.
pub(crate) fn document_hash(pages: &[PageText]) -> String {
    let joined = pages
        .iter()
        .map(|page| page.text.as_str())
        .collect::<Vec<_>>()
        .join("\u{c}");
    compute_content_hash(&joined)
}

/// Pair chunks with their vectors. Both slices must be the same length.
pub(crate) fn build_records(
    chunks: Vec<DocumentChunk>,
    vectors: Vec<Vec<f32>>,
    document_hash: &str,
) -> Vec<VectorRecord> {
    chunks
        .into_iter()
        .zip(vectors)
        .map(|(chunk, vector)| VectorRecord {
            id: record_id(&chunk.source_filename, document_hash, chunk.sequence_index),
            vector,
            payload: ChunkPayload {
                text: chunk.text,
                source_filename: chunk.source_filename,
                sequence_index: chunk.sequence_index,
                page_number: chunk.page_number,
                document_hash: document_hash.to_string(),
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(index: usize, text: &str) -> DocumentChunk {
        DocumentChunk {
            text: text.into(),
            sequence_index: index,
            source_filename: "manual.pdf".into(),
            page_number: Some(1),
        }
    }

    #[test]
    fn record_ids_are_stable_and_distinct() {
        let first = record_id("manual.pdf", "abc", 0);
        assert_eq!(first, record_id("manual.pdf", "abc", 0));
        assert_ne!(first, record_id("manual.pdf", "abc", 1));
        assert_ne!(first, record_id("manual.pdf", "def", 0));
        assert_ne!(first, record_id("other.pdf", "abc", 0));
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn document_hash_depends_on_page_boundaries() {
        let split = vec![
            PageText { page_number: 1, text: "ab".into() },
            PageText { page_number: 2, text: "c".into() },
        ];
        let merged = vec![PageText { page_number: 1, text: "abc".into() }];
        assert_ne!(document_hash(&split), document_hash(&merged));
        assert_eq!(document_hash(&split), document_hash(&split.clone()));
    }

    #[test]
    fn build_records_copies_chunk_metadata() {
        let records = build_records(
            vec![chunk(0, "alpha"), chunk(1, "beta")],
            vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            "hash",
        );
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].payload.text, "beta");
        assert_eq!(records[1].payload.sequence_index, 1);
        assert_eq!(records[1].payload.document_hash, "hash");
        assert_eq!(records[1].vector, vec![0.0, 1.0]);
        assert_eq!(records[0].id, record_id("manual.pdf", "hash", 0));
    }
}

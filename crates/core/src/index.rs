use crate::embeddings::Embedder;
use crate::error::RetrievalError;
use crate::models::Chunk;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub hash: String,
    pub vector: Vec<f32>,
    pub chunk: Chunk,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedIndex {
    model_id: String,
    dimensions: usize,
    entries: Vec<IndexEntry>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpsertStats {
    pub embedded: usize,
    pub reused: usize,
    pub removed: usize,
}

/// On-disk vector index over chunk embeddings. Entries are keyed by content
/// hash so an unchanged chunk is never re-embedded, and entries whose chunk
/// no longer exists are dropped on the next upsert.
pub struct EmbeddingIndex<E: Embedder> {
    path: PathBuf,
    embedder: E,
    entries: Vec<IndexEntry>,
}

fn chunk_hash(chunk: &Chunk) -> String {
    let mut hasher = Sha256::new();
    hasher.update(chunk.source_tag.as_bytes());
    hasher.update([0]);
    hasher.update(chunk.text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

impl<E: Embedder> EmbeddingIndex<E> {
    /// Opens the index stored under `dir`, creating an empty one when no
    /// file exists yet. A persisted index built with a different embedder
    /// is refused rather than silently mixed.
    pub fn open(dir: impl AsRef<Path>, embedder: E) -> Result<Self, RetrievalError> {
        let path = dir.as_ref().join(INDEX_FILE);

        let entries = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let persisted: PersistedIndex = serde_json::from_str(&raw)?;
            if persisted.model_id != embedder.model_id()
                || persisted.dimensions != embedder.dimensions()
            {
                return Err(RetrievalError::ModelMismatch {
                    expected: embedder.model_id(),
                    found: persisted.model_id,
                });
            }
            persisted.entries
        } else {
            Vec::new()
        };

        Ok(Self {
            path,
            embedder,
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replaces the index contents with the given chunk set. Vectors for
    /// chunks already present (by content hash) are carried over without
    /// re-embedding; entries absent from `chunks` are removed. The new
    /// index is persisted before returning.
    pub fn upsert(&mut self, chunks: &[Chunk]) -> Result<UpsertStats, RetrievalError> {
        let mut existing: HashMap<String, Vec<f32>> = self
            .entries
            .drain(..)
            .map(|entry| (entry.hash, entry.vector))
            .collect();

        let mut stats = UpsertStats::default();
        let mut next = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let hash = chunk_hash(chunk);
            let vector = match existing.remove(&hash) {
                Some(vector) => {
                    stats.reused += 1;
                    vector
                }
                None => {
                    stats.embedded += 1;
                    self.embedder.embed(&chunk.text)
                }
            };
            next.push(IndexEntry {
                hash,
                vector,
                chunk: chunk.clone(),
            });
        }

        stats.removed = existing.len();
        self.entries = next;
        self.save()?;

        info!(
            embedded = stats.embedded,
            reused = stats.reused,
            removed = stats.removed,
            total = self.entries.len(),
            "index upsert complete"
        );
        Ok(stats)
    }

    /// Top-`k` chunks by cosine similarity, highest first. Equal scores keep
    /// index order. An empty index yields an empty result.
    pub fn query(&self, text: &str, k: usize) -> Vec<(Chunk, f32)> {
        let query_vector = self.embedder.embed(text);

        let mut scored: Vec<(Chunk, f32)> = self
            .entries
            .iter()
            .map(|entry| {
                (
                    entry.chunk.clone(),
                    cosine_similarity(&query_vector, &entry.vector),
                )
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);
        scored
    }

    fn save(&self) -> Result<(), RetrievalError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let persisted = PersistedIndex {
            model_id: self.embedder.model_id(),
            dimensions: self.embedder.dimensions(),
            entries: self.entries.clone(),
        };
        let raw = serde_json::to_string(&persisted)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use tempfile::tempdir;

    fn chunk(tag: &str, text: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            document_id: "doc".to_string(),
            source_tag: tag.to_string(),
            header_path: Vec::new(),
            start_offset: 0,
        }
    }

    #[test]
    fn empty_index_returns_no_hits() {
        let dir = tempdir().unwrap();
        let index = EmbeddingIndex::open(dir.path(), CharacterNgramEmbedder::default()).unwrap();
        assert!(index.query("anything", 5).is_empty());
    }

    #[test]
    fn unchanged_chunks_are_reused_not_reembedded() {
        let dir = tempdir().unwrap();
        let mut index =
            EmbeddingIndex::open(dir.path(), CharacterNgramEmbedder::default()).unwrap();

        let first = vec![chunk("a.md", "alpha passage"), chunk("b.md", "beta passage")];
        let stats = index.upsert(&first).unwrap();
        assert_eq!(stats.embedded, 2);
        assert_eq!(stats.reused, 0);

        let second = vec![chunk("a.md", "alpha passage"), chunk("c.md", "gamma passage")];
        let stats = index.upsert(&second).unwrap();
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.embedded, 1);
        assert_eq!(stats.removed, 1);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn index_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut index =
                EmbeddingIndex::open(dir.path(), CharacterNgramEmbedder::default()).unwrap();
            index.upsert(&[chunk("a.md", "persisted passage")]).unwrap();
        }

        let index = EmbeddingIndex::open(dir.path(), CharacterNgramEmbedder::default()).unwrap();
        assert_eq!(index.len(), 1);
        let hits = index.query("persisted passage", 1);
        assert_eq!(hits[0].0.source_tag, "a.md");
    }

    #[test]
    fn different_embedder_is_refused() {
        let dir = tempdir().unwrap();
        {
            let mut index =
                EmbeddingIndex::open(dir.path(), CharacterNgramEmbedder { dimensions: 64 })
                    .unwrap();
            index.upsert(&[chunk("a.md", "text")]).unwrap();
        }

        let result = EmbeddingIndex::open(dir.path(), CharacterNgramEmbedder { dimensions: 128 });
        assert!(matches!(
            result,
            Err(RetrievalError::ModelMismatch { .. })
        ));
    }

    #[test]
    fn query_orders_by_similarity() {
        let dir = tempdir().unwrap();
        let mut index =
            EmbeddingIndex::open(dir.path(), CharacterNgramEmbedder::default()).unwrap();
        index
            .upsert(&[
                chunk("a.md", "database replication and failover"),
                chunk("b.md", "gardening tips for spring flowers"),
            ])
            .unwrap();

        let hits = index.query("database replication", 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.source_tag, "a.md");
        assert!(hits[0].1 >= hits[1].1);
    }

    #[test]
    fn query_respects_k() {
        let dir = tempdir().unwrap();
        let mut index =
            EmbeddingIndex::open(dir.path(), CharacterNgramEmbedder::default()).unwrap();
        index
            .upsert(&[
                chunk("a.md", "first passage about topics"),
                chunk("b.md", "second passage about topics"),
                chunk("c.md", "third passage about topics"),
            ])
            .unwrap();

        assert_eq!(index.query("topics", 2).len(), 2);
    }
}

use crate::embeddings::Embedder;
use crate::error::RetrievalError;
use crate::index::EmbeddingIndex;
use crate::models::{RetrievalHit, RetrievalOutcome};
use crate::rerank::Reranker;
use tracing::warn;

pub const DEFAULT_TOP_K_COARSE: usize = 20;
pub const DEFAULT_TOP_N_FINAL: usize = 5;

/// Two-stage retrieval: a cheap vector search narrows the index to
/// `top_k_coarse` candidates, then an optional cross-encoder reorders them
/// and keeps `top_n_final`. Rerank failures degrade to the coarse order.
pub struct RetrievalPipeline<'a, E: Embedder> {
    index: &'a EmbeddingIndex<E>,
    reranker: Option<&'a dyn Reranker>,
}

impl<'a, E: Embedder> RetrievalPipeline<'a, E> {
    pub fn new(index: &'a EmbeddingIndex<E>, reranker: Option<&'a dyn Reranker>) -> Self {
        Self { index, reranker }
    }

    pub async fn retrieve(
        &self,
        query: &str,
        top_k_coarse: usize,
        top_n_final: usize,
    ) -> Result<RetrievalOutcome, RetrievalError> {
        if query.trim().is_empty() {
            return Err(RetrievalError::Request(
                "query must not be empty".to_string(),
            ));
        }

        let mut hits: Vec<RetrievalHit> = self
            .index
            .query(query, top_k_coarse)
            .into_iter()
            .map(|(chunk, coarse_score)| RetrievalHit {
                chunk,
                coarse_score,
                rerank_score: None,
            })
            .collect();

        // Reranking a candidate set no larger than the final cut cannot
        // change which chunks are returned, only their order; skip the call.
        let reranker = match self.reranker {
            Some(reranker) if hits.len() > top_n_final => reranker,
            _ => {
                hits.truncate(top_n_final);
                return Ok(RetrievalOutcome {
                    query: query.to_string(),
                    reranked: false,
                    hits,
                });
            }
        };

        let passages: Vec<String> = hits.iter().map(|hit| hit.chunk.text.clone()).collect();
        match reranker.score(query, &passages).await {
            Ok(scores) => {
                for (hit, score) in hits.iter_mut().zip(scores) {
                    hit.rerank_score = Some(score);
                }
                hits.sort_by(|a, b| {
                    b.rerank_score
                        .unwrap_or(f32::MIN)
                        .total_cmp(&a.rerank_score.unwrap_or(f32::MIN))
                });
                hits.truncate(top_n_final);
                Ok(RetrievalOutcome {
                    query: query.to_string(),
                    reranked: true,
                    hits,
                })
            }
            Err(error) => {
                warn!(%error, "rerank failed, returning coarse order");
                hits.truncate(top_n_final);
                Ok(RetrievalOutcome {
                    query: query.to_string(),
                    reranked: false,
                    hits,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::models::Chunk;
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct FixedReranker {
        scores: Vec<f32>,
    }

    #[async_trait]
    impl Reranker for FixedReranker {
        async fn score(
            &self,
            _query: &str,
            passages: &[String],
        ) -> Result<Vec<f32>, RetrievalError> {
            assert_eq!(passages.len(), self.scores.len());
            Ok(self.scores.clone())
        }
    }

    struct FailingReranker;

    #[async_trait]
    impl Reranker for FailingReranker {
        async fn score(
            &self,
            _query: &str,
            _passages: &[String],
        ) -> Result<Vec<f32>, RetrievalError> {
            Err(RetrievalError::BackendResponse {
                backend: "reranker".to_string(),
                details: "unavailable".to_string(),
            })
        }
    }

    fn chunk(tag: &str, text: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            document_id: "doc".to_string(),
            source_tag: tag.to_string(),
            header_path: Vec::new(),
            start_offset: 0,
        }
    }

    fn build_index(
        dir: &std::path::Path,
        chunks: &[Chunk],
    ) -> EmbeddingIndex<CharacterNgramEmbedder> {
        let mut index = EmbeddingIndex::open(dir, CharacterNgramEmbedder::default()).unwrap();
        index.upsert(chunks).unwrap();
        index
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let dir = tempdir().unwrap();
        let index = build_index(dir.path(), &[]);
        let pipeline = RetrievalPipeline::new(&index, None);

        let result = pipeline.retrieve("   ", 20, 5).await;
        assert!(matches!(result, Err(RetrievalError::Request(_))));
    }

    #[tokio::test]
    async fn empty_index_yields_empty_outcome() {
        let dir = tempdir().unwrap();
        let index = build_index(dir.path(), &[]);
        let pipeline = RetrievalPipeline::new(&index, None);

        let outcome = pipeline.retrieve("anything", 20, 5).await.unwrap();
        assert!(outcome.hits.is_empty());
        assert!(!outcome.reranked);
    }

    #[tokio::test]
    async fn rerank_is_skipped_when_candidates_fit_the_final_cut() {
        let dir = tempdir().unwrap();
        let index = build_index(
            dir.path(),
            &[
                chunk("a.md", "database failover procedures"),
                chunk("b.md", "spring gardening notes"),
            ],
        );
        let reranker = FixedReranker { scores: vec![] };
        let pipeline = RetrievalPipeline::new(&index, Some(&reranker));

        let outcome = pipeline.retrieve("database", 20, 5).await.unwrap();
        assert!(!outcome.reranked);
        assert_eq!(outcome.hits.len(), 2);
        assert!(outcome.hits.iter().all(|hit| hit.rerank_score.is_none()));
    }

    #[tokio::test]
    async fn rerank_reorders_the_coarse_candidates() {
        let dir = tempdir().unwrap();
        let index = build_index(
            dir.path(),
            &[
                chunk("a.md", "database replication and failover handling"),
                chunk("b.md", "database schema migration checklist"),
                chunk("c.md", "weekly database maintenance window summary"),
            ],
        );
        // Invert whatever order the coarse stage produced.
        let coarse = index.query("database", 3);
        let scores: Vec<f32> = (0..coarse.len()).map(|rank| rank as f32).collect();
        let reranker = FixedReranker { scores };
        let pipeline = RetrievalPipeline::new(&index, Some(&reranker));

        let outcome = pipeline.retrieve("database", 3, 2).await.unwrap();
        assert!(outcome.reranked);
        assert_eq!(outcome.hits.len(), 2);
        assert_eq!(outcome.hits[0].chunk.source_tag, coarse[2].0.source_tag);
        assert_eq!(outcome.hits[1].chunk.source_tag, coarse[1].0.source_tag);
        assert!(outcome.hits.iter().all(|hit| hit.rerank_score.is_some()));
    }

    #[tokio::test]
    async fn rerank_failure_degrades_to_coarse_order() {
        let dir = tempdir().unwrap();
        let index = build_index(
            dir.path(),
            &[
                chunk("a.md", "database replication and failover handling"),
                chunk("b.md", "database schema migration checklist"),
                chunk("c.md", "weekly database maintenance window summary"),
            ],
        );
        let coarse = index.query("database", 3);
        let pipeline = RetrievalPipeline::new(&index, Some(&FailingReranker));

        let outcome = pipeline.retrieve("database", 3, 2).await.unwrap();
        assert!(!outcome.reranked);
        assert_eq!(outcome.hits.len(), 2);
        assert_eq!(outcome.hits[0].chunk.source_tag, coarse[0].0.source_tag);
        assert!(outcome.hits.iter().all(|hit| hit.rerank_score.is_none()));
    }

    #[tokio::test]
    async fn equal_rerank_scores_keep_coarse_order() {
        let dir = tempdir().unwrap();
        let index = build_index(
            dir.path(),
            &[
                chunk("a.md", "database replication and failover handling"),
                chunk("b.md", "database schema migration checklist"),
                chunk("c.md", "weekly database maintenance window summary"),
            ],
        );
        let coarse = index.query("database", 3);
        let reranker = FixedReranker {
            scores: vec![0.5, 0.5, 0.5],
        };
        let pipeline = RetrievalPipeline::new(&index, Some(&reranker));

        let outcome = pipeline.retrieve("database", 3, 2).await.unwrap();
        assert!(outcome.reranked);
        assert_eq!(outcome.hits.len(), 2);
        for (hit, (chunk, _)) in outcome.hits.iter().zip(&coarse) {
            assert_eq!(hit.chunk.source_tag, chunk.source_tag);
        }
    }
}

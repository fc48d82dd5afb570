pub mod chunking;
pub mod client;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod ingest;
pub mod models;
pub mod render;
pub mod rerank;
pub mod retrieval;
pub mod state;
pub mod sync;

pub use chunking::chunk_document;
pub use client::{DocumentSource, FeishuClient, DEFAULT_API_BASE};
pub use embeddings::{CharacterNgramEmbedder, Embedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{Result, RetrievalError, SyncError};
pub use index::{EmbeddingIndex, UpsertStats};
pub use ingest::{
    chunk_documents, discover_markdown_files, load_knowledge_base, LoadReport, LocalDocument,
};
pub use models::{
    Block, BlockKind, Chunk, ChunkingConfig, DocOutcome, DriveEntry, Frontmatter, RemoteDocument,
    RetrievalHit, RetrievalOutcome, SyncRecord, SyncReport,
};
pub use render::BlockRenderer;
pub use rerank::{HttpReranker, Reranker};
pub use retrieval::{RetrievalPipeline, DEFAULT_TOP_K_COARSE, DEFAULT_TOP_N_FINAL};
pub use state::SyncStateStore;
pub use sync::{parse_document_token, unique_document_tokens, SyncOrchestrator};

use serde::{Deserialize, Serialize};

/// Metadata the remote service reports for a document. Read-only to this
/// system; `revision` is an epoch-millisecond timestamp that only grows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub id: String,
    pub title: String,
    pub revision: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BlockKind {
    Page,
    Paragraph,
    Heading1,
    Heading2,
    Heading3,
    Quote,
    Bullet,
    Ordered,
    Code,
    Divider,
    Image,
    Unknown,
}

/// One node of the remote block tree. A block that carries children is a
/// container and never contributes text itself; only its leaves render.
#[derive(Debug, Clone)]
pub struct Block {
    pub id: String,
    pub kind: BlockKind,
    pub elements: Vec<InlineElement>,
    pub children: Vec<String>,
    /// Remote-supplied marker for ordered list items.
    pub sequence: Option<u64>,
    pub language: Option<String>,
    pub asset_key: Option<String>,
}

/// Recognized inline shapes. Anything outside this list parses to `Unknown`,
/// which renders as empty text with a diagnostic, never a best-guess value.
#[derive(Debug, Clone, PartialEq)]
pub enum InlineElement {
    TextRun {
        content: String,
        bold: bool,
        italic: bool,
        strikethrough: bool,
        code: bool,
    },
    Equation {
        content: String,
    },
    Unknown,
}

/// One entry in the persisted sync state, keyed externally by remote id.
/// Written only after a fully successful render+write, never partially.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncRecord {
    pub title: String,
    pub revision: i64,
    pub local_filename: String,
}

/// An entry returned by the folder-children listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveEntry {
    pub token: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: String,
}

#[derive(Debug, Clone)]
pub struct AssetPayload {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Structured header prefixed to every synced markdown file. Absent fields
/// fall back to: `source` = file stem, `author` empty, `content_type` "doc",
/// `created_at` empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frontmatter {
    pub source: String,
    pub created_at: String,
    pub author: String,
    pub content_type: String,
}

impl Frontmatter {
    pub fn defaults_for(file_stem: &str) -> Self {
        Self {
            source: file_stem.to_string(),
            created_at: String::new(),
            author: String::new(),
            content_type: "doc".to_string(),
        }
    }
}

/// The atomic unit of indexing and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub document_id: String,
    pub source_tag: String,
    pub header_path: Vec<String>,
    pub start_offset: usize,
}

impl Chunk {
    /// Provenance line shown alongside retrieval hits, e.g.
    /// `Report.md | Setup > Install`.
    pub fn provenance(&self) -> String {
        if self.header_path.is_empty() {
            self.source_tag.clone()
        } else {
            format!("{} | {}", self.source_tag, self.header_path.join(" > "))
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalHit {
    pub chunk: Chunk,
    pub coarse_score: f32,
    /// `None` when the hit was not reranked (rerank skipped or degraded).
    pub rerank_score: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    pub query: String,
    pub reranked: bool,
    pub hits: Vec<RetrievalHit>,
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub min_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 800,
            overlap_chars: 100,
            min_chars: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocOutcome {
    Updated,
    Unchanged,
}

pub struct FailedDoc {
    pub document_id: String,
    pub reason: String,
}

/// Per-batch tally reported to the caller; failed documents keep their
/// state untouched and are retried on the next run.
#[derive(Default)]
pub struct SyncReport {
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
    pub failed: Vec<FailedDoc>,
}

impl SyncReport {
    pub fn total(&self) -> usize {
        self.updated.len() + self.unchanged.len() + self.failed.len()
    }
}

use crate::client::DocumentSource;
use crate::error::SyncError;
use crate::models::{DocOutcome, FailedDoc, SyncRecord, SyncReport};
use crate::render::BlockRenderer;
use crate::state::SyncStateStore;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const MAX_TITLE_CHARS: usize = 50;

/// Strips filesystem-illegal characters, collapses whitespace to `_`, and
/// bounds the length. Empty results fall back to "untitled".
pub fn sanitize_title(title: &str) -> Result<String, SyncError> {
    let illegal = Regex::new(r#"[\\/:*?"<>|]"#)?;
    let stripped = illegal.replace_all(title, "");

    let collapsed = Regex::new(r"\s+")?.replace_all(stripped.trim(), "_");
    let bounded: String = collapsed.chars().take(MAX_TITLE_CHARS).collect();
    let cleaned = bounded.trim_matches(|c| c == '_' || c == ' ').to_string();

    Ok(if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned
    })
}

/// Caps blank-line runs at two, strips trailing whitespace per line, and
/// ends the document with a single newline.
pub fn normalize_markdown(body: &str) -> String {
    let mut cleaned: Vec<&str> = Vec::new();
    let mut empty_run = 0;

    for line in body.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            empty_run += 1;
            if empty_run <= 2 {
                cleaned.push("");
            }
        } else {
            empty_run = 0;
            cleaned.push(line);
        }
    }

    let mut joined = cleaned.join("\n");
    while joined.ends_with('\n') {
        joined.pop();
    }
    joined.push('\n');
    joined
}

/// Frontmatter written at the top of every synced file. `created_at` derives
/// from the remote revision timestamp so re-rendering the same revision is
/// byte-identical.
fn frontmatter_header(revision: i64) -> String {
    let created_at = DateTime::<Utc>::from_timestamp_millis(revision)
        .unwrap_or_else(Utc::now)
        .format("%Y-%m-%d");
    format!("---\nsource: feishu\ncreated_at: {created_at}\nauthor:\ncontent_type: doc\n---\n\n")
}

/// Pulls the document token out of a share URL, e.g.
/// `https://example.feishu.cn/docx/AbCd123?from=x` -> `AbCd123`.
/// Bare tokens pass through unchanged.
pub fn parse_document_token(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    if let Some((_, tail)) = line.split_once("docx/") {
        let token = tail.split('?').next().unwrap_or("");
        let token = token.split('/').next_back().unwrap_or("");
        if !token.is_empty() {
            return Some(token.to_string());
        }
        return None;
    }

    if line.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Some(line.to_string());
    }
    None
}

/// Token extraction over a whole docs list, first occurrence wins.
pub fn unique_document_tokens(lines: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    lines
        .lines()
        .filter_map(parse_document_token)
        .filter(|token| seen.insert(token.clone()))
        .collect()
}

/// Drives the fetcher, renderer, and state store to produce one idempotent,
/// revision-gated local file per remote document.
pub struct SyncOrchestrator<'a, S: DocumentSource> {
    source: &'a S,
    kb_dir: PathBuf,
    state: SyncStateStore,
}

impl<'a, S: DocumentSource> SyncOrchestrator<'a, S> {
    pub fn new(source: &'a S, kb_dir: impl Into<PathBuf>, state: SyncStateStore) -> Self {
        Self {
            source,
            kb_dir: kb_dir.into(),
            state,
        }
    }

    fn assets_dir(&self) -> PathBuf {
        self.kb_dir.join("assets")
    }

    /// Syncs one document. Returns the display title and whether the local
    /// file changed. State is committed only after a fully successful write,
    /// so any failure here leaves the document eligible for retry.
    pub async fn sync_document(
        &mut self,
        doc_id: &str,
        force: bool,
    ) -> Result<(String, DocOutcome), SyncError> {
        let meta = self.source.document_meta(doc_id).await?;
        let record = self.state.get(doc_id).cloned();

        let mut title = meta.title.clone();
        if title.is_empty() || title == "untitled" {
            if let Some(rec) = &record {
                if !rec.title.is_empty() {
                    title = rec.title.clone();
                }
            }
        }

        if !force {
            if let Some(rec) = &record {
                if meta.revision <= rec.revision {
                    return Ok((title, DocOutcome::Unchanged));
                }
            }
        }

        let blocks = self.source.block_tree(doc_id).await?;
        let assets_dir = self.assets_dir();
        let renderer = BlockRenderer::new(self.source, doc_id, &assets_dir);
        let body = renderer.render_document(&blocks).await?;
        let content = format!("{}{}", frontmatter_header(meta.revision), normalize_markdown(&body));

        // A previously synced document keeps its filename across revisions;
        // the collision policy only applies when picking a new one.
        let (filename, outcome) = match &record {
            Some(rec) => {
                let path = self.kb_dir.join(&rec.local_filename);
                let unchanged = std::fs::read_to_string(&path)
                    .map(|existing| existing == content)
                    .unwrap_or(false);
                if unchanged {
                    (rec.local_filename.clone(), DocOutcome::Unchanged)
                } else {
                    self.write_file(&path, &content)?;
                    (rec.local_filename.clone(), DocOutcome::Updated)
                }
            }
            None => self.place_new_file(&title, &content)?,
        };

        self.state.commit(
            doc_id,
            SyncRecord {
                title: title.clone(),
                revision: meta.revision,
                local_filename: filename,
            },
        )?;

        Ok((title, outcome))
    }

    /// Resolves the target filename under the collision policy: a colliding
    /// name with identical content is a no-op; differing content appends a
    /// numeric suffix until a free name is found.
    fn place_new_file(
        &self,
        title: &str,
        content: &str,
    ) -> Result<(String, DocOutcome), SyncError> {
        let base = sanitize_title(title)?;

        let mut counter = 0usize;
        loop {
            let candidate = if counter == 0 {
                format!("{base}.md")
            } else {
                format!("{base}_{counter}.md")
            };
            let path = self.kb_dir.join(&candidate);

            if !path.exists() {
                self.write_file(&path, content)?;
                return Ok((candidate, DocOutcome::Updated));
            }

            let existing = std::fs::read_to_string(&path)?;
            if existing == content {
                return Ok((candidate, DocOutcome::Unchanged));
            }
            counter += 1;
        }
    }

    fn write_file(&self, path: &Path, content: &str) -> Result<(), SyncError> {
        std::fs::create_dir_all(&self.kb_dir)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Syncs a batch of documents. Auth rejection aborts the run; any other
    /// per-document failure is logged, tallied, and the batch continues.
    pub async fn sync_batch(
        &mut self,
        doc_ids: &[String],
        force: bool,
    ) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();

        for doc_id in doc_ids {
            match self.sync_document(doc_id, force).await {
                Ok((title, DocOutcome::Updated)) => {
                    info!(doc_id, title, "updated");
                    report.updated.push(title);
                }
                Ok((title, DocOutcome::Unchanged)) => {
                    info!(doc_id, title, "unchanged");
                    report.unchanged.push(title);
                }
                Err(error @ SyncError::Auth(_)) => return Err(error),
                Err(error) => {
                    warn!(doc_id, %error, "document sync failed, continuing batch");
                    report.failed.push(FailedDoc {
                        document_id: doc_id.clone(),
                        reason: error.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Walks a remote folder tree (iterative, cycle-safe) and syncs every
    /// document found.
    pub async fn sync_folder(
        &mut self,
        folder_token: &str,
        force: bool,
    ) -> Result<SyncReport, SyncError> {
        let mut doc_ids = Vec::new();
        let mut pending = vec![folder_token.to_string()];
        let mut visited = HashSet::new();

        while let Some(folder) = pending.pop() {
            if !visited.insert(folder.clone()) {
                continue;
            }
            for entry in self.source.folder_entries(&folder).await? {
                match entry.entry_type.as_str() {
                    "folder" => pending.push(entry.token),
                    "docx" | "doc" => doc_ids.push(entry.token),
                    other => {
                        tracing::debug!(name = entry.name, kind = other, "skipping drive entry")
                    }
                }
            }
        }

        self.sync_batch(&doc_ids, force).await
    }
}

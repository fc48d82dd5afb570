use crate::chunking::chunk_document;
use crate::error::{RetrievalError, SyncError};
use crate::models::{Chunk, ChunkingConfig, Frontmatter};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One knowledge-base file, frontmatter separated from the indexable body.
#[derive(Debug, Clone)]
pub struct LocalDocument {
    pub document_id: String,
    pub source_tag: String,
    pub frontmatter: Frontmatter,
    pub body: String,
}

pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

pub struct LoadReport {
    pub documents: Vec<LocalDocument>,
    pub skipped_files: Vec<SkippedFile>,
}

pub fn discover_markdown_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_markdown = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("md"));

        if is_markdown {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Splits an optional `---` frontmatter header off the body. Unrecognized
/// keys are ignored; recognized fields absent from the header keep the
/// documented defaults.
pub fn parse_frontmatter(content: &str, file_stem: &str) -> (Frontmatter, String) {
    let mut meta = Frontmatter::defaults_for(file_stem);

    let Some(rest) = content.strip_prefix("---\n") else {
        return (meta, content.to_string());
    };
    let Some(end) = rest.find("\n---") else {
        return (meta, content.to_string());
    };

    for line in rest[..end].lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match key.trim() {
            "source" if !value.is_empty() => meta.source = value,
            "created_at" => meta.created_at = value,
            "author" => meta.author = value,
            "content_type" if !value.is_empty() => meta.content_type = value,
            _ => {}
        }
    }

    let body = rest[end + 4..].trim_start_matches('\n').to_string();
    (meta, body)
}

fn document_id_for(file_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_name.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Loads every markdown file under the knowledge-base directory,
/// best-effort: unreadable files are reported, not fatal.
pub fn load_knowledge_base(folder: &Path) -> Result<LoadReport, SyncError> {
    let mut documents = Vec::new();
    let mut skipped_files = Vec::new();

    for path in discover_markdown_files(folder) {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                SyncError::MissingFileName(format!("path missing filename: {}", path.display()))
            })?;
        let file_stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(file_name);

        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let (frontmatter, body) = parse_frontmatter(&content, file_stem);
                documents.push(LocalDocument {
                    document_id: document_id_for(file_name),
                    source_tag: file_name.to_string(),
                    frontmatter,
                    body,
                });
            }
            Err(error) => skipped_files.push(SkippedFile {
                path,
                reason: error.to_string(),
            }),
        }
    }

    Ok(LoadReport {
        documents,
        skipped_files,
    })
}

/// Chunks the whole knowledge base in document order.
pub fn chunk_documents(
    documents: &[LocalDocument],
    config: ChunkingConfig,
) -> Result<Vec<Chunk>, RetrievalError> {
    let mut chunks = Vec::new();
    for document in documents {
        chunks.extend(chunk_document(
            &document.document_id,
            &document.source_tag,
            &document.body,
            config,
        )?);
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn discovery_is_recursive_and_sorted() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).unwrap();
        fs::write(dir.path().join("b.md"), "b").unwrap();
        fs::write(nested.join("a.md"), "a").unwrap();
        fs::write(dir.path().join("ignore.txt"), "x").unwrap();

        let files = discover_markdown_files(dir.path());
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn frontmatter_fields_parse_with_defaults() {
        let content = "---\nsource: feishu\ncreated_at: 2026-01-06\nauthor:\ncontent_type: doc\n---\n\nbody text\n";
        let (meta, body) = parse_frontmatter(content, "Notes");

        assert_eq!(meta.source, "feishu");
        assert_eq!(meta.created_at, "2026-01-06");
        assert_eq!(meta.author, "");
        assert_eq!(meta.content_type, "doc");
        assert_eq!(body, "body text\n");
    }

    #[test]
    fn missing_frontmatter_keeps_documented_defaults() {
        let (meta, body) = parse_frontmatter("plain body\n", "Notes");
        assert_eq!(meta.source, "Notes");
        assert_eq!(meta.content_type, "doc");
        assert!(meta.author.is_empty());
        assert!(meta.created_at.is_empty());
        assert_eq!(body, "plain body\n");
    }

    #[test]
    fn load_reads_documents_and_assigns_stable_ids() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("One.md"), "# One\ncontent\n").unwrap();

        let report = load_knowledge_base(dir.path()).unwrap();
        assert_eq!(report.documents.len(), 1);
        assert!(report.skipped_files.is_empty());

        let doc = &report.documents[0];
        assert_eq!(doc.source_tag, "One.md");
        assert_eq!(doc.document_id, document_id_for("One.md"));
        assert!(doc.body.starts_with("# One"));
    }

    #[test]
    fn unreadable_files_are_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("bad.md"), [0xff, 0xfe, 0x00, 0xc3]).unwrap();
        fs::write(dir.path().join("good.md"), "fine\n").unwrap();

        let report = load_knowledge_base(dir.path()).unwrap();
        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.skipped_files.len(), 1);
    }

    #[test]
    fn chunking_spans_all_documents() {
        let docs = vec![
            LocalDocument {
                document_id: "a".into(),
                source_tag: "a.md".into(),
                frontmatter: Frontmatter::defaults_for("a"),
                body: "# A\nthe first document body with plenty of text\n".into(),
            },
            LocalDocument {
                document_id: "b".into(),
                source_tag: "b.md".into(),
                frontmatter: Frontmatter::defaults_for("b"),
                body: "# B\nthe second document body with plenty of text\n".into(),
            },
        ];

        let chunks = chunk_documents(&docs, ChunkingConfig::default()).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].source_tag, "a.md");
        assert_eq!(chunks[1].header_path, vec!["B"]);
    }
}

use crate::client::DocumentSource;
use crate::error::SyncError;
use crate::models::{Block, BlockKind, InlineElement};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

// Remote block-type discriminants, per the docx v1 wire format.
fn kind_from_type(block_type: i64) -> BlockKind {
    match block_type {
        1 => BlockKind::Page,
        2 => BlockKind::Paragraph,
        3 => BlockKind::Heading1,
        4 => BlockKind::Heading2,
        5 => BlockKind::Heading3,
        7 => BlockKind::Quote,
        10 => BlockKind::Bullet,
        11 | 13 => BlockKind::Ordered,
        17 => BlockKind::Code,
        19 => BlockKind::Divider,
        21 => BlockKind::Image,
        _ => BlockKind::Unknown,
    }
}

fn payload_field(kind: BlockKind) -> Option<&'static str> {
    match kind {
        BlockKind::Paragraph => Some("text"),
        BlockKind::Heading1 => Some("heading1"),
        BlockKind::Heading2 => Some("heading2"),
        BlockKind::Heading3 => Some("heading3"),
        BlockKind::Quote => Some("quote"),
        BlockKind::Bullet => Some("bullet"),
        BlockKind::Ordered => Some("ordered"),
        BlockKind::Code => Some("code"),
        _ => None,
    }
}

/// Maps one wire-format block onto the closed [`BlockKind`] set. Shapes
/// outside the recognized list come back as `Unknown` and render empty; the
/// mapping never fails and never invents text.
pub fn parse_block(raw: &Value) -> Block {
    // Some endpoints wrap the payload in an outer `{"block": {...}}`.
    let body = raw.pointer("/block").filter(|v| v.is_object()).unwrap_or(raw);

    let id = body
        .pointer("/block_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let block_type = body
        .pointer("/block_type")
        .and_then(Value::as_i64)
        .unwrap_or(-1);
    let kind = kind_from_type(block_type);

    let children = raw
        .pointer("/children")
        .or_else(|| body.pointer("/children"))
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(|id| id.to_string())
                .collect()
        })
        .unwrap_or_default();

    let elements = payload_field(kind)
        .and_then(|field| body.pointer(&format!("/{field}/elements")))
        .and_then(Value::as_array)
        .map(|elements| elements.iter().map(parse_inline).collect())
        .unwrap_or_default();

    let sequence = body
        .pointer("/ordered/order")
        .and_then(Value::as_u64)
        .or_else(|| body.pointer("/ordered/style/sequence").and_then(Value::as_u64));
    let language = body
        .pointer("/code/language")
        .and_then(Value::as_str)
        .map(|lang| lang.to_string());
    let asset_key = body
        .pointer("/image/image_key")
        .and_then(Value::as_str)
        .map(|key| key.to_string());

    if kind == BlockKind::Unknown {
        debug!(block_id = %id, block_type, "unrecognized block kind");
    }

    Block {
        id,
        kind,
        elements,
        children,
        sequence,
        language,
        asset_key,
    }
}

fn parse_inline(element: &Value) -> InlineElement {
    if let Some(run) = element.pointer("/text_run") {
        let style = element
            .pointer("/text_element_style")
            .cloned()
            .unwrap_or(Value::Null);
        let flag = |name: &str| {
            style
                .pointer(&format!("/{name}"))
                .and_then(Value::as_bool)
                .unwrap_or(false)
        };
        return InlineElement::TextRun {
            content: run
                .pointer("/content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            bold: flag("bold"),
            italic: flag("italic"),
            strikethrough: flag("strikethrough"),
            code: flag("inline_code"),
        };
    }

    if let Some(content) = element.pointer("/equation/content").and_then(Value::as_str) {
        return InlineElement::Equation {
            content: content.to_string(),
        };
    }

    debug!("unrecognized inline element shape, extracting nothing");
    InlineElement::Unknown
}

fn render_inline(element: &InlineElement) -> String {
    match element {
        InlineElement::TextRun {
            content,
            bold,
            italic,
            strikethrough,
            code,
        } => {
            let mut text = content.clone();
            if *code {
                text = format!("`{text}`");
            }
            if *strikethrough {
                text = format!("~~{text}~~");
            }
            if *italic {
                text = format!("*{text}*");
            }
            if *bold {
                text = format!("**{text}**");
            }
            text
        }
        InlineElement::Equation { content } => content.clone(),
        InlineElement::Unknown => String::new(),
    }
}

fn inline_text(block: &Block) -> String {
    block.elements.iter().map(render_inline).collect()
}

/// Renders a document's blocks to markdown. All templates are pure; image
/// blocks additionally download their asset through the source, and a failed
/// download degrades to a placeholder instead of aborting the block.
pub struct BlockRenderer<'a> {
    source: &'a dyn DocumentSource,
    document_id: &'a str,
    assets_dir: &'a Path,
}

impl<'a> BlockRenderer<'a> {
    pub fn new(source: &'a dyn DocumentSource, document_id: &'a str, assets_dir: &'a Path) -> Self {
        Self {
            source,
            document_id,
            assets_dir,
        }
    }

    /// Flattens leaf blocks in document order. Container blocks (anything
    /// with children) are skipped, as is any block id seen earlier in the
    /// pass, so duplicated or cyclic references cannot double-render.
    pub async fn render_document(&self, blocks: &[Block]) -> Result<String, SyncError> {
        let mut markdown = String::new();
        let mut seen = std::collections::HashSet::new();

        for block in blocks {
            if !block.id.is_empty() && !seen.insert(block.id.as_str()) {
                continue;
            }
            if !block.children.is_empty() || block.kind == BlockKind::Page {
                continue;
            }
            markdown.push_str(&self.render_block(block).await);
        }

        Ok(markdown)
    }

    async fn render_block(&self, block: &Block) -> String {
        let text = inline_text(block);
        match block.kind {
            BlockKind::Paragraph => format!("{text}\n\n"),
            BlockKind::Heading1 => format!("# {}\n\n", text.trim()),
            BlockKind::Heading2 => format!("## {}\n\n", text.trim()),
            BlockKind::Heading3 => format!("### {}\n\n", text.trim()),
            BlockKind::Quote => format!("> {text}\n\n"),
            BlockKind::Bullet => format!("- {text}\n"),
            BlockKind::Ordered => {
                format!("{}. {text}\n", block.sequence.unwrap_or(1))
            }
            BlockKind::Code => {
                let language = block.language.as_deref().unwrap_or("");
                format!("```{language}\n{text}\n```\n\n")
            }
            BlockKind::Divider => "---\n\n".to_string(),
            BlockKind::Image => self.render_image(block).await,
            BlockKind::Page | BlockKind::Unknown => String::new(),
        }
    }

    async fn render_image(&self, block: &Block) -> String {
        let Some(asset_key) = block.asset_key.as_deref() else {
            return String::new();
        };

        match self.download_asset(asset_key).await {
            Ok(relative) => format!("![image]({relative})\n\n"),
            Err(error) => {
                tracing::warn!(asset_key, %error, "asset download failed, emitting placeholder");
                "![image](unavailable)\n\n".to_string()
            }
        }
    }

    async fn download_asset(&self, asset_key: &str) -> Result<String, SyncError> {
        let payload = self.source.fetch_asset(asset_key).await?;

        let ext = match payload.content_type.as_str() {
            kind if kind.contains("jpeg") => "jpg",
            kind if kind.contains("gif") => "gif",
            kind if kind.contains("webp") => "webp",
            _ => "png",
        };
        let suffix: String = asset_key
            .chars()
            .rev()
            .take(8)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        let filename = format!("{}_{suffix}.{ext}", self.document_id);

        std::fs::create_dir_all(self.assets_dir)?;
        std::fs::write(self.assets_dir.join(&filename), &payload.bytes)?;

        Ok(format!("assets/{filename}"))
    }
}

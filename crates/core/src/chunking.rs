use crate::error::RetrievalError;
use crate::models::{Chunk, ChunkingConfig};

/// Separator priority for the secondary split, coarsest first: paragraph
/// breaks, sentence-ending punctuation (CJK and ASCII), then line breaks and
/// generic whitespace. Pieces that resist every separator fall back to fixed
/// character windows.
const SEPARATORS: [&str; 9] = ["\n\n", "。", "！", "？", ". ", "! ", "? ", "\n", " "];

#[derive(Debug, Clone)]
struct Section {
    header_path: Vec<String>,
    text: String,
    start_offset: usize,
}

fn heading_level(line: &str) -> Option<(usize, &str)> {
    for (level, prefix) in [(1, "# "), (2, "## "), (3, "### ")] {
        if line.starts_with(prefix) {
            return Some((level, line[prefix.len()..].trim()));
        }
    }
    None
}

/// Stage 1: partitions the document at heading levels 1-3, attaching the
/// enclosing heading titles to each partition. Text before any heading keeps
/// an empty path. Heading lines stay inside their partition. Offsets are in
/// characters from the start of the document.
fn split_by_headers(text: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut section_start = 0usize;
    let mut offset = 0usize;

    let mut flush = |buf: &mut String, path: &[String], start: usize, out: &mut Vec<Section>| {
        if !buf.trim().is_empty() {
            out.push(Section {
                header_path: path.to_vec(),
                text: std::mem::take(buf),
                start_offset: start,
            });
        } else {
            buf.clear();
        }
    };

    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end();
        if let Some((level, title)) = heading_level(trimmed) {
            flush(&mut current, &path, section_start, &mut sections);
            path.truncate(level - 1);
            path.push(title.to_string());
            section_start = offset;
        }
        current.push_str(line);
        offset += line.chars().count();
    }
    flush(&mut current, &path, section_start, &mut sections);

    sections
}

/// Recursively fragments `text` into pieces of at most `limit` characters,
/// trying separators in priority order and keeping each separator attached
/// to the piece it ends. Every character lands in exactly one fragment.
fn fragment(text: &str, offset: usize, separators: &[&str], limit: usize, out: &mut Vec<(usize, String)>) {
    if text.chars().count() <= limit {
        if !text.is_empty() {
            out.push((offset, text.to_string()));
        }
        return;
    }

    for (index, separator) in separators.iter().enumerate() {
        if !text.contains(separator) {
            continue;
        }
        let mut piece_offset = offset;
        for piece in text.split_inclusive(separator) {
            let piece_chars = piece.chars().count();
            if piece_chars <= limit {
                out.push((piece_offset, piece.to_string()));
            } else {
                fragment(piece, piece_offset, &separators[index + 1..], limit, out);
            }
            piece_offset += piece_chars;
        }
        return;
    }

    // No separator applies: hard character windows.
    let chars: Vec<char> = text.chars().collect();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + limit).min(chars.len());
        out.push((offset + start, chars[start..end].iter().collect()));
        start = end;
    }
}

/// Greedily packs adjacent fragments into contiguous chunks of at most
/// `limit` characters.
fn pack(fragments: Vec<(usize, String)>, limit: usize) -> Vec<(usize, String)> {
    let mut packed: Vec<(usize, String)> = Vec::new();

    for (offset, piece) in fragments {
        match packed.last_mut() {
            Some((_, current))
                if current.chars().count() + piece.chars().count() <= limit =>
            {
                current.push_str(&piece);
            }
            _ => packed.push((offset, piece)),
        }
    }

    packed
}

/// Stage 2: splits one partition into chunks of at most `max_chars`, with
/// `overlap_chars` carried from each chunk's tail into the next. Offsets are
/// relative to the partition start.
fn split_partition(
    text: &str,
    config: ChunkingConfig,
) -> Vec<(usize, String)> {
    let limit = if config.overlap_chars > 0 {
        config.max_chars - config.overlap_chars
    } else {
        config.max_chars
    };

    let mut fragments = Vec::new();
    fragment(text, 0, &SEPARATORS, limit, &mut fragments);
    let base = pack(fragments, limit);

    let mut chunks: Vec<(usize, String)> = Vec::new();
    for (index, (offset, body)) in base.iter().enumerate() {
        if index == 0 || config.overlap_chars == 0 {
            chunks.push((*offset, body.clone()));
            continue;
        }

        let previous = &base[index - 1].1;
        let prev_chars: Vec<char> = previous.chars().collect();
        let tail_len = config.overlap_chars.min(prev_chars.len());
        let tail: String = prev_chars[prev_chars.len() - tail_len..].iter().collect();
        chunks.push((offset - tail_len, format!("{tail}{body}")));
    }

    chunks
}

fn validate(config: ChunkingConfig) -> Result<(), RetrievalError> {
    if config.max_chars == 0 {
        return Err(RetrievalError::InvalidChunkConfig(
            "max_chars must be positive".to_string(),
        ));
    }
    if config.overlap_chars >= config.max_chars {
        return Err(RetrievalError::InvalidChunkConfig(format!(
            "overlap {} must be strictly less than max size {}",
            config.overlap_chars, config.max_chars
        )));
    }
    Ok(())
}

/// Two-stage split of one document body into retrievable chunks. Chunks
/// shorter than `min_chars` (after trimming) are dropped as noise.
pub fn chunk_document(
    document_id: &str,
    source_tag: &str,
    body: &str,
    config: ChunkingConfig,
) -> Result<Vec<Chunk>, RetrievalError> {
    validate(config)?;

    let mut chunks = Vec::new();
    for section in split_by_headers(body) {
        for (offset, text) in split_partition(&section.text, config) {
            if text.trim().chars().count() < config.min_chars {
                continue;
            }
            chunks.push(Chunk {
                text,
                document_id: document_id.to_string(),
                source_tag: source_tag.to_string(),
                header_path: section.header_path.clone(),
                start_offset: section.start_offset + offset,
            });
        }
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max: usize, overlap: usize, min: usize) -> ChunkingConfig {
        ChunkingConfig {
            max_chars: max,
            overlap_chars: overlap,
            min_chars: min,
        }
    }

    #[test]
    fn header_split_tracks_nesting() {
        let body = "intro line\n\n# Setup\ntext one\n## Install\ntext two\n# Usage\ntext three\n";
        let sections = split_by_headers(body);

        assert_eq!(sections.len(), 4);
        assert!(sections[0].header_path.is_empty());
        assert_eq!(sections[1].header_path, vec!["Setup"]);
        assert_eq!(sections[2].header_path, vec!["Setup", "Install"]);
        assert_eq!(sections[3].header_path, vec!["Usage"]);
        assert!(sections[2].text.starts_with("## Install"));
    }

    #[test]
    fn header_offsets_are_document_relative() {
        let body = "abc\n# One\nxyz\n";
        let sections = split_by_headers(body);
        assert_eq!(sections[0].start_offset, 0);
        assert_eq!(sections[1].start_offset, 4);
        let chars: Vec<char> = body.chars().collect();
        let window: String = chars[sections[1].start_offset..].iter().collect();
        assert!(window.starts_with("# One"));
    }

    #[test]
    fn every_character_is_covered_and_no_chunk_exceeds_max() {
        let body = "Sentence one is here. Sentence two follows! A third, longer sentence \
                    rounds the paragraph out.\n\nSecond paragraph with more prose. \
                    And a final remark?";
        let cfg = config(40, 10, 0);
        let pieces = split_partition(body, cfg);

        let total = body.chars().count();
        let mut covered = vec![false; total];
        for (offset, text) in &pieces {
            let len = text.chars().count();
            assert!(len <= cfg.max_chars, "chunk of {len} chars exceeds max");
            for index in *offset..*offset + len {
                covered[index] = true;
            }
        }
        assert!(covered.iter().all(|flag| *flag), "coverage gap");
    }

    #[test]
    fn consecutive_chunks_share_the_configured_overlap() {
        let body = "aaaa bbbb cccc dddd eeee ffff gggg hhhh";
        let cfg = config(12, 4, 0);
        let pieces = split_partition(body, cfg);
        assert!(pieces.len() > 1);

        let all_chars: Vec<char> = body.chars().collect();
        for (offset, text) in &pieces[1..] {
            let window: String = all_chars[*offset..*offset + text.chars().count()]
                .iter()
                .collect();
            assert_eq!(&window, text, "overlapped chunk must be a document window");
        }
    }

    #[test]
    fn zero_overlap_is_valid() {
        let body = "alpha beta gamma delta epsilon zeta";
        let pieces = split_partition(body, config(12, 0, 0));
        let rebuilt: String = pieces.iter().map(|(_, text)| text.as_str()).collect();
        assert_eq!(rebuilt, body);
    }

    #[test]
    fn separatorless_text_falls_back_to_character_windows() {
        let body = "x".repeat(25);
        let pieces = split_partition(&body, config(10, 0, 0));
        assert_eq!(pieces.len(), 3);
        assert!(pieces.iter().all(|(_, text)| text.chars().count() <= 10));
    }

    #[test]
    fn overlap_must_stay_below_max_size() {
        let result = chunk_document("d", "d.md", "body", config(10, 10, 0));
        assert!(matches!(
            result,
            Err(RetrievalError::InvalidChunkConfig(_))
        ));
    }

    #[test]
    fn short_chunks_are_dropped() {
        let body = "# A\nok\n# B\nthis passage is comfortably longer than the minimum\n";
        let chunks = chunk_document("d", "d.md", body, config(200, 0, 30)).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].header_path, vec!["B"]);
    }

    #[test]
    fn cjk_sentences_split_on_fullwidth_punctuation() {
        let body = "第一句话很长很长很长。第二句话也很长很长。第三句话结束了。";
        let pieces = split_partition(body, config(12, 0, 0));
        assert!(pieces.len() >= 3);
        assert!(pieces[0].1.ends_with('。'));
    }
}

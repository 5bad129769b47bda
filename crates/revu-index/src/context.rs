//! Contextualized embedding text.
//!
//! Raw code embeds poorly for conceptual queries ("where is retry handled?").
//! Prefixing the path, language, chunk kind and the names the chunk depends
//! on pulls related snippets closer together.

use crate::chunker::CodeChunk;

/// Maximum number of dependency names included in the embedding text.
const MAX_DEPENDENCIES: usize = 5;

/// Text sent to the embedder for a chunk. Not meant for display.
#[must_use]
pub fn contextualize_for_embedding(chunk: &CodeChunk) -> String {
    let mut text = String::with_capacity(chunk.content.len() + 160);

    text.push_str("# ");
    text.push_str(&chunk.file_path);
    text.push('\n');

    text.push_str("# Language: ");
    text.push_str(chunk.language.id());
    text.push('\n');

    text.push_str("# Kind: ");
    text.push_str(chunk.chunk_type.as_str());
    if let Some(name) = &chunk.name {
        text.push(' ');
        text.push_str(name);
    }
    text.push('\n');

    if !chunk.dependencies.is_empty() {
        let deps: Vec<&str> = chunk
            .dependencies
            .iter()
            .take(MAX_DEPENDENCIES)
            .map(String::as_str)
            .collect();
        text.push_str("# Uses: ");
        text.push_str(&deps.join(", "));
        text.push('\n');
    }

    text.push_str(&chunk.content);
    text
}

/// Short header for a chunk in rendered results.
#[must_use]
pub fn chunk_display_header(chunk: &CodeChunk) -> String {
    let name = chunk.name.as_deref().unwrap_or(chunk.chunk_type.as_str());
    format!(
        "{} :: {} (lines {}-{})",
        chunk.file_path, name, chunk.start_line, chunk.end_line
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{ChunkType, chunk_id};
    use crate::languages::Lang;

    fn sample_chunk() -> CodeChunk {
        CodeChunk {
            id: chunk_id("src/lib.rs", 1, 3),
            content: "fn hello() { greet() }".to_string(),
            language: Lang::Rust,
            start_line: 1,
            end_line: 3,
            chunk_type: ChunkType::Function,
            complexity_score: 1,
            dependencies: ["a", "b", "c", "d", "e", "greet"]
                .map(String::from)
                .to_vec(),
            imports: Vec::new(),
            file_path: "src/lib.rs".to_string(),
            name: Some("hello".to_string()),
            content_hash: "abc123".to_string(),
            embedding: None,
        }
    }

    #[test]
    fn contextualize_prefixes_metadata() {
        let text = contextualize_for_embedding(&sample_chunk());
        assert!(text.starts_with("# src/lib.rs\n"));
        assert!(text.contains("# Language: rust\n"));
        assert!(text.contains("# Kind: function hello\n"));
        assert!(text.ends_with("fn hello() { greet() }"));
    }

    #[test]
    fn contextualize_caps_dependencies() {
        let text = contextualize_for_embedding(&sample_chunk());
        assert!(text.contains("# Uses: a, b, c, d, e\n"));
        assert!(!text.contains("greet,"));
    }

    #[test]
    fn contextualize_omits_empty_dependencies() {
        let mut chunk = sample_chunk();
        chunk.dependencies.clear();
        chunk.name = None;
        let text = contextualize_for_embedding(&chunk);
        assert!(!text.contains("# Uses"));
        assert!(text.contains("# Kind: function\n"));
    }

    #[test]
    fn display_header_falls_back_to_type() {
        let mut chunk = sample_chunk();
        assert_eq!(chunk_display_header(&chunk), "src/lib.rs :: hello (lines 1-3)");
        chunk.name = None;
        assert_eq!(chunk_display_header(&chunk), "src/lib.rs :: function (lines 1-3)");
    }
}

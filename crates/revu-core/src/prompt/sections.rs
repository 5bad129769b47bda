//! Section renderers. Each is a pure function of its inputs.

use std::collections::HashSet;
use std::fmt::Write;

use revu_index::{ChunkType, Insight, RetrievedChunk};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PREAMBLE: &str = "\
You are reviewing a code change. The repository context below was retrieved \
for the files touched by the change; use it to judge correctness, not as \
code to review on its own.";

pub const DEFAULT_INSTRUCTIONS: &str = "\
Report concrete problems only. For each one give the file and line, a \
severity (critical, high, medium, low), what is wrong, and a suggested fix. \
Say so plainly if the change looks correct.";

/// A changed file and its unified diff text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    pub patch: String,
}

impl FileDiff {
    #[must_use]
    pub fn new(path: impl Into<String>, patch: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            patch: patch.into(),
        }
    }
}

fn type_priority(chunk_type: ChunkType) -> u8 {
    match chunk_type {
        ChunkType::Function => 0,
        ChunkType::Class => 1,
        ChunkType::Method => 2,
        ChunkType::Module => 3,
        ChunkType::Block => 4,
        _ => 5,
    }
}

/// Chunks in render order: by type priority, then by score, at most `limit`.
#[must_use]
pub fn prioritize(chunks: &[RetrievedChunk], limit: usize) -> Vec<&RetrievedChunk> {
    let mut ordered: Vec<&RetrievedChunk> = chunks.iter().collect();
    ordered.sort_by(|a, b| {
        type_priority(a.chunk.chunk_type)
            .cmp(&type_priority(b.chunk.chunk_type))
            .then(b.score.total_cmp(&a.score))
    });
    ordered.truncate(limit);
    ordered
}

/// Retrieved code grouped by file, each chunk shown as a line-limited preview.
#[must_use]
pub fn render_context(chunks: &[&RetrievedChunk], preview_lines: usize) -> String {
    if chunks.is_empty() {
        return String::new();
    }

    let mut files: Vec<&str> = Vec::new();
    for c in chunks {
        if !files.contains(&c.chunk.file_path.as_str()) {
            files.push(&c.chunk.file_path);
        }
    }

    let mut out = String::from("<code_context>\n");
    for file in files {
        let _ = writeln!(out, "  <file path=\"{file}\">");
        for c in chunks.iter().filter(|c| c.chunk.file_path == file) {
            let chunk = &c.chunk;
            let name = chunk.name.as_deref().unwrap_or(chunk.chunk_type.as_str());
            let _ = writeln!(
                out,
                "    <chunk lines=\"{}-{}\" type=\"{}\" name=\"{name}\" score=\"{:.2}\">",
                chunk.start_line,
                chunk.end_line,
                chunk.chunk_type.as_str(),
                c.score,
            );
            let total = chunk.content.lines().count();
            for line in chunk.content.lines().take(preview_lines) {
                out.push_str(line);
                out.push('\n');
            }
            if total > preview_lines {
                let _ = writeln!(out, "// ... {} more lines", total - preview_lines);
            }
            out.push_str("    </chunk>\n");
        }
        out.push_str("  </file>\n");
    }
    out.push_str("</code_context>");
    out
}

#[must_use]
pub fn render_diffs(diffs: &[FileDiff]) -> String {
    if diffs.is_empty() {
        return String::new();
    }
    let mut out = String::from("<changes>\n");
    for diff in diffs {
        let _ = writeln!(out, "  <diff path=\"{}\">", diff.path);
        out.push_str(diff.patch.trim_end());
        out.push_str("\n  </diff>\n");
    }
    out.push_str("</changes>");
    out
}

/// Insights attached to the rendered chunks, deduplicated, most severe first.
#[must_use]
pub fn render_insights(chunks: &[&RetrievedChunk]) -> String {
    let mut seen = HashSet::new();
    let mut insights: Vec<&Insight> = chunks
        .iter()
        .flat_map(|c| c.insights.iter())
        .filter(|i| seen.insert((i.file.as_str(), i.line, i.summary.as_str())))
        .collect();
    if insights.is_empty() {
        return String::new();
    }
    insights.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.file.cmp(&b.file))
            .then(a.line.cmp(&b.line))
    });

    let mut out = String::from("<prior_findings>\n");
    for i in insights {
        let _ = write!(
            out,
            "- [{}] {}:{} ({}) {}",
            i.severity, i.file, i.line, i.category, i.summary
        );
        if let Some(suggestion) = &i.suggestion {
            let _ = write!(out, " Suggestion: {suggestion}");
        }
        out.push('\n');
    }
    out.push_str("</prior_findings>");
    out
}

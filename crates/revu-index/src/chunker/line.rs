//! Sliding-window chunking, optionally snapped to statement boundaries.

use std::sync::LazyLock;

use regex::Regex;

use super::analysis::is_import_line;
use super::{ChunkType, ChunkerConfig, CodeChunk, chunk_from_lines};
use crate::languages::Lang;

static TOP_LEVEL_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:@\w|(?:export\s+|pub(?:\([^)]*\))?\s+|public\s+|private\s+|protected\s+|internal\s+|static\s+|abstract\s+|async\s+|final\s+|default\s+)*(?:fn|def|class|function|func|fun|struct|enum|trait|impl|interface|type|mod|module|object|namespace|extension|mixin)\b)",
    )
    .expect("valid regex")
});

static CONTROL_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\}\s*)?(?:if|else\s+if|elif|while|for|switch|match)\b").expect("valid regex")
});

const CLOSERS: &[&str] = &["}", "};", "},", "})", "});", "]", "];", ")", ");", "end", "fi", "done", "esac"];

const DANGLING: &[&str] = &[
    "&&", "||", " and", " or", "+", "-", "*", "/", ",", "=", "(", "[", "\\", ".", "?", ":",
    "=>", "->",
];

pub(super) fn chunk(
    source: &str,
    file_path: &str,
    lang: Lang,
    config: &ChunkerConfig,
    boundary_aware: bool,
) -> Vec<CodeChunk> {
    let lines: Vec<&str> = source.lines().collect();
    let n = lines.len();
    if n == 0 {
        return Vec::new();
    }
    let size = config.max_chunk_size.max(1);
    let overlap = config.overlap_lines.min(size - 1);
    let snap = boundary_aware && config.respect_boundaries;

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let mut end = (start + size).min(n) - 1;
        if snap && end + 1 < n {
            end = snap_end(&lines, start, end, lang);
        }
        let blank = lines[start..=end].iter().all(|l| l.trim().is_empty());
        if !blank {
            let chunk_type = if start == 0 && end + 1 == n {
                ChunkType::File
            } else {
                ChunkType::Block
            };
            chunks.push(chunk_from_lines(
                &lines, start, end, file_path, lang, chunk_type, None,
            ));
        }
        if end + 1 >= n {
            break;
        }
        start = (end + 1).saturating_sub(overlap).max(start + 1);
    }
    chunks
}

/// Add line-window chunks for the parts of the file that `chunks`, the
/// declarations found by a structural strategy, do not cover.
pub(super) fn supplement(
    source: &str,
    file_path: &str,
    lang: Lang,
    config: &ChunkerConfig,
    chunks: &mut Vec<CodeChunk>,
) {
    let windows = chunk(source, file_path, lang, config, true);
    let covered: Vec<(usize, usize)> = chunks.iter().map(|c| (c.start_line, c.end_line)).collect();
    let before = chunks.len();
    chunks.extend(windows.into_iter().filter(|w| {
        !covered
            .iter()
            .any(|&(s, e)| s <= w.start_line && w.end_line <= e)
    }));
    tracing::debug!(
        file = %file_path,
        added = chunks.len() - before,
        "supplemented declarations with line chunks"
    );
}

/// Pull the window end back to a good boundary, else off a bad cut.
/// Never shrinks the window below half its size.
fn snap_end(lines: &[&str], start: usize, end: usize, lang: Lang) -> usize {
    let floor = start + (end - start) / 2;

    for i in (floor..=end).rev() {
        if is_good_end(lines[i]) {
            return i;
        }
        if i > floor && is_good_start(lines[i], lang) {
            return i - 1;
        }
    }

    (floor..=end)
        .rev()
        .find(|&i| !is_bad_cut(lines[i]))
        .unwrap_or(end)
}

fn is_good_end(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || CLOSERS.contains(&trimmed)
}

fn is_good_start(line: &str, lang: Lang) -> bool {
    is_import_line(line, lang) || TOP_LEVEL_DECL.is_match(line)
}

pub(super) fn is_bad_cut(line: &str) -> bool {
    let trimmed = line.trim_end();
    let opens = trimmed.matches(['(', '[']).count();
    let closes = trimmed.matches([')', ']']).count();
    if opens > closes {
        return true;
    }
    if DANGLING.iter().any(|d| trimmed.ends_with(d)) {
        return true;
    }
    CONTROL_HEAD.is_match(trimmed) && !trimmed.ends_with('{') && !trimmed.ends_with('}')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(size: usize, overlap: usize, respect: bool) -> ChunkerConfig {
        ChunkerConfig {
            max_chunk_size: size,
            overlap_lines: overlap,
            respect_boundaries: respect,
            ..ChunkerConfig::default()
        }
    }

    fn numbered(n: usize) -> String {
        (1..=n).map(|i| format!("let v{i} = {i};")).collect::<Vec<_>>().join("\n")
    }

    #[test]
    fn plain_window_with_overlap() {
        let chunks = chunk(&numbered(25), "a.txt", Lang::Text, &config(10, 2, false), false);
        let ranges: Vec<_> = chunks.iter().map(|c| (c.start_line, c.end_line)).collect();
        assert_eq!(ranges, vec![(1, 10), (9, 18), (17, 25)]);
        assert!(chunks.iter().all(|c| c.chunk_type == ChunkType::Block));
    }

    #[test]
    fn small_file_is_single_file_chunk() {
        let chunks = chunk(&numbered(4), "a.toml", Lang::Toml, &config(10, 2, true), true);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_type, ChunkType::File);
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 4));
    }

    #[test]
    fn snaps_to_blank_line() {
        let mut lines: Vec<String> = numbered(20).lines().map(String::from).collect();
        lines[6] = String::new();
        let chunks = chunk(&lines.join("\n"), "a.sh", Lang::Bash, &config(10, 0, true), true);
        assert_eq!(chunks[0].end_line, 7);
        assert_eq!(chunks[1].start_line, 8);
    }

    #[test]
    fn ends_before_top_level_declaration() {
        let mut lines: Vec<String> = numbered(20).lines().map(String::from).collect();
        lines[7] = "fn next() {".into();
        let chunks = chunk(&lines.join("\n"), "a.md", Lang::Markdown, &config(10, 0, true), true);
        assert_eq!(chunks[0].end_line, 7);
        assert!(chunks[1].content.starts_with("fn next()"));
    }

    #[test]
    fn avoids_dangling_operator() {
        let mut lines: Vec<String> = numbered(20).lines().map(String::from).collect();
        lines[9] = "let ok = a &&".into();
        let chunks = chunk(&lines.join("\n"), "a.sh", Lang::Bash, &config(10, 0, true), true);
        assert_eq!(chunks[0].end_line, 9);
    }

    #[test]
    fn bad_cut_detection() {
        assert!(is_bad_cut("call(a,"));
        assert!(is_bad_cut("x = y ||"));
        assert!(is_bad_cut("if ready"));
        assert!(!is_bad_cut("if ready {"));
        assert!(!is_bad_cut("done();"));
    }

    #[test]
    fn always_progresses() {
        let chunks = chunk(&numbered(12), "a.txt", Lang::Text, &config(3, 2, false), false);
        assert_eq!(chunks.first().map(|c| c.start_line), Some(1));
        assert_eq!(chunks.last().map(|c| c.end_line), Some(12));
        assert!(chunks.windows(2).all(|w| w[1].start_line > w[0].start_line));
    }

    #[test]
    fn blank_windows_are_skipped() {
        let source = format!("{}\n{}", "\n".repeat(12), numbered(3));
        let chunks = chunk(&source, "a.txt", Lang::Text, &config(5, 0, false), false);
        assert!(chunks.iter().all(|c| !c.content.trim().is_empty()));
        assert!(!chunks.is_empty());
    }
}

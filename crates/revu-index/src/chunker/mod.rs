//! Multi-strategy source chunking.
//!
//! Every language maps to a preferred [`Strategy`]. When it fails or does
//! not recognize the input, chunking falls back to the boundary-aware line
//! strategy and then to the generic window, so non-empty input always
//! produces at least one chunk.

mod analysis;
mod ast;
mod line;
mod pattern;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{IndexError, Result};
use crate::languages::{Lang, language_for};

pub use analysis::keyword_complexity;

/// Namespace for chunk ids; ids are UUIDv5 of `path:start:end`.
const CHUNK_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6a1f_3c2e_8d4b_5f70_9e21_c0d4_7b38_a15e);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Function,
    Class,
    Method,
    Block,
    File,
    Module,
    Statement,
    Expression,
    Enum,
    Typedef,
}

impl ChunkType {
    pub const ALL: [Self; 10] = [
        Self::Function,
        Self::Class,
        Self::Method,
        Self::Block,
        Self::File,
        Self::Module,
        Self::Statement,
        Self::Expression,
        Self::Enum,
        Self::Typedef,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Method => "method",
            Self::Block => "block",
            Self::File => "file",
            Self::Module => "module",
            Self::Statement => "statement",
            Self::Expression => "expression",
            Self::Enum => "enum",
            Self::Typedef => "typedef",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl std::fmt::Display for ChunkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contiguous slice of one source file. Lines are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeChunk {
    pub id: String,
    pub content: String,
    pub language: Lang,
    pub start_line: usize,
    pub end_line: usize,
    pub chunk_type: ChunkType,
    pub complexity_score: u32,
    /// Imported names and call targets, sorted and deduplicated.
    pub dependencies: Vec<String>,
    /// The subset of `dependencies` that came from import statements.
    pub imports: Vec<String>,
    pub file_path: String,
    pub name: Option<String>,
    pub content_hash: String,
    pub embedding: Option<Vec<f32>>,
}

impl CodeChunk {
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.end_line - self.start_line + 1
    }
}

/// Stable id for a line range of a file.
#[must_use]
pub fn chunk_id(file_path: &str, start_line: usize, end_line: usize) -> String {
    Uuid::new_v5(
        &CHUNK_ID_NAMESPACE,
        format!("{file_path}:{start_line}:{end_line}").as_bytes(),
    )
    .to_string()
}

pub(crate) fn blake3_hex(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Window size of the line strategies, in lines.
    pub max_chunk_size: usize,
    /// Lines shared by consecutive line-strategy chunks.
    pub overlap_lines: usize,
    /// Syntax entities must span more lines than this to become chunks.
    pub min_chunk_lines: usize,
    pub ast_max_depth: usize,
    pub respect_boundaries: bool,
    pub enable_fallback: bool,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 60,
            overlap_lines: 5,
            min_chunk_lines: 2,
            ast_max_depth: 6,
            respect_boundaries: true,
            enable_fallback: true,
        }
    }
}

impl ChunkerConfig {
    /// # Errors
    ///
    /// Returns [`IndexError::Validation`] for a zero window or an overlap
    /// that is not smaller than the window.
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_size == 0 {
            return Err(IndexError::validation(
                "max_chunk_size",
                "must be at least 1",
            ));
        }
        if self.overlap_lines >= self.max_chunk_size {
            return Err(IndexError::validation(
                "overlap_lines",
                format!(
                    "must be smaller than max_chunk_size ({})",
                    self.max_chunk_size
                ),
            ));
        }
        Ok(())
    }
}

/// Chunking strategy with a fixed capability set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// tree-sitter syntax tree walk.
    Ast,
    /// Regex detection of declarations with brace matching.
    Pattern,
    /// Sliding window that snaps to statement boundaries.
    Line,
    /// Plain sliding window; accepts anything.
    Generic,
}

impl Strategy {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Ast => "ast",
            Self::Pattern => "pattern",
            Self::Line => "line",
            Self::Generic => "generic",
        }
    }

    #[must_use]
    pub fn supports(self, lang: Lang) -> bool {
        match self {
            Self::Ast => lang.grammar().is_some(),
            Self::Pattern => pattern::supports(lang),
            Self::Line => lang != Lang::Text,
            Self::Generic => true,
        }
    }

    /// Languages this strategy accepts with the enabled features.
    #[must_use]
    pub fn supported_languages(self) -> Vec<Lang> {
        Lang::ALL
            .into_iter()
            .filter(|l| self.supports(*l))
            .collect()
    }

    /// # Errors
    ///
    /// Returns [`IndexError::UnsupportedLanguage`] if the language is outside
    /// the strategy's capability set and [`IndexError::Parse`] if the input
    /// is not recognized.
    pub fn chunk(
        self,
        source: &str,
        file_path: &str,
        lang: Lang,
        config: &ChunkerConfig,
    ) -> Result<Vec<CodeChunk>> {
        if !self.supports(lang) {
            return Err(IndexError::UnsupportedLanguage(format!(
                "{} strategy cannot chunk {lang}",
                self.name()
            )));
        }
        match self {
            Self::Ast => ast::chunk(source, file_path, lang, config),
            Self::Pattern => pattern::chunk(source, file_path, lang, config),
            Self::Line => Ok(line::chunk(source, file_path, lang, config, true)),
            Self::Generic => Ok(line::chunk(source, file_path, lang, config, false)),
        }
    }

    fn fallback(self, lang: Lang) -> Option<Self> {
        match self {
            Self::Ast | Self::Pattern if Self::Line.supports(lang) => Some(Self::Line),
            Self::Ast | Self::Pattern | Self::Line => Some(Self::Generic),
            Self::Generic => None,
        }
    }
}

/// Chunks of one file plus how they were produced.
#[derive(Debug, Clone)]
pub struct ChunkingResult {
    pub chunks: Vec<CodeChunk>,
    pub language: Lang,
    pub strategy: Strategy,
    pub used_fallback: bool,
}

/// Chunk a file, detecting its language from the path.
///
/// # Errors
///
/// Only fails for an invalid config, or when fallback is disabled and the
/// preferred strategy cannot handle the input.
pub fn chunk_file(source: &str, file_path: &str, config: &ChunkerConfig) -> Result<ChunkingResult> {
    let lang = language_for(std::path::Path::new(file_path));
    chunk_with_language(source, file_path, lang, config)
}

/// Chunk a file as the given language.
///
/// # Errors
///
/// See [`chunk_file`].
pub fn chunk_with_language(
    source: &str,
    file_path: &str,
    lang: Lang,
    config: &ChunkerConfig,
) -> Result<ChunkingResult> {
    config.validate()?;
    let preferred = lang.preferred_strategy();

    if source.is_empty() {
        return Ok(ChunkingResult {
            chunks: Vec::new(),
            language: lang,
            strategy: preferred,
            used_fallback: false,
        });
    }
    if source.trim().is_empty() {
        return Ok(ChunkingResult {
            chunks: vec![whole_file_chunk(source, file_path, lang)],
            language: lang,
            strategy: preferred,
            used_fallback: false,
        });
    }

    if !config.enable_fallback {
        if !preferred.supports(lang) {
            return Err(IndexError::NoStrategy(format!("{file_path} ({lang})")));
        }
        let mut chunks = preferred.chunk(source, file_path, lang, config)?;
        if chunks.is_empty() {
            chunks.push(whole_file_chunk(source, file_path, lang));
        }
        return Ok(ChunkingResult {
            chunks,
            language: lang,
            strategy: preferred,
            used_fallback: false,
        });
    }

    let mut strategy = preferred;
    loop {
        match strategy.chunk(source, file_path, lang, config) {
            Ok(chunks) if !chunks.is_empty() => {
                return Ok(ChunkingResult {
                    chunks,
                    language: lang,
                    strategy,
                    used_fallback: strategy != preferred,
                });
            }
            Ok(_) => {
                tracing::debug!(file = %file_path, strategy = strategy.name(), "strategy produced no chunks");
            }
            Err(e) => {
                tracing::debug!(file = %file_path, strategy = strategy.name(), "strategy failed: {e}");
            }
        }
        match strategy.fallback(lang) {
            Some(next) => strategy = next,
            None => {
                tracing::debug!(file = %file_path, "no strategy produced chunks, keeping the whole file");
                return Ok(ChunkingResult {
                    chunks: vec![whole_file_chunk(source, file_path, lang)],
                    language: lang,
                    strategy,
                    used_fallback: true,
                });
            }
        }
    }
}

/// One `File` chunk spanning every line of a non-empty `source`.
fn whole_file_chunk(source: &str, file_path: &str, lang: Lang) -> CodeChunk {
    let mut lines: Vec<&str> = source.lines().collect();
    if lines.is_empty() {
        lines.push("");
    }
    chunk_from_lines(&lines, 0, lines.len() - 1, file_path, lang, ChunkType::File, None)
}

/// Build a chunk from a 0-based inclusive line range of `lines`.
pub(crate) fn chunk_from_lines(
    lines: &[&str],
    start: usize,
    end: usize,
    file_path: &str,
    lang: Lang,
    chunk_type: ChunkType,
    name: Option<String>,
) -> CodeChunk {
    let content = lines[start..=end].join("\n");
    let (dependencies, imports) = analysis::text_dependencies(&content, lines, lang, name.as_deref());
    CodeChunk {
        id: chunk_id(file_path, start + 1, end + 1),
        complexity_score: keyword_complexity(&content),
        content_hash: blake3_hex(&content),
        content,
        language: lang,
        start_line: start + 1,
        end_line: end + 1,
        chunk_type,
        dependencies,
        imports,
        file_path: file_path.to_owned(),
        name,
        embedding: None,
    }
}

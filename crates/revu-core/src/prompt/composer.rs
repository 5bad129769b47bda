use revu_index::RetrievedChunk;
use revu_memory::estimate_tokens;
use serde::Serialize;

use super::budget::{PromptOptions, Section, TokenBudget};
use super::sections::{
    DEFAULT_INSTRUCTIONS, DEFAULT_PREAMBLE, FileDiff, prioritize, render_context, render_diffs,
    render_insights,
};
use super::truncate::truncate_to_tokens;
use super::{PromptError, Result};

const SECTION_SEPARATOR: &str = "\n\n";
const SLACK_HEADROOM_PER_SECTION: usize = 2;

/// Raw material for one prompt. `None` preamble or instructions fall back to
/// the built-in texts.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptInput<'a> {
    pub preamble: Option<&'a str>,
    pub chunks: &'a [RetrievedChunk],
    pub diffs: &'a [FileDiff],
    pub instructions: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionOutput {
    pub section: Section,
    pub text: String,
    pub tokens: usize,
    /// Effective allocation, including tokens handed over from sections that
    /// came in under their share.
    pub allocated: usize,
    pub truncated: bool,
    pub original_tokens: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PromptMetadata {
    /// Set when any section, or the assembled prompt, was cut.
    pub truncated: bool,
    pub budget_used: usize,
    pub budget_remaining: usize,
    /// Token estimate of the assembled prompt before the final cut.
    pub original_tokens: Option<usize>,
    pub chunks_included: usize,
    pub chunks_dropped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComposedPrompt {
    pub text: String,
    pub token_count: usize,
    pub sections: Vec<SectionOutput>,
    pub budget: TokenBudget,
    pub metadata: PromptMetadata,
}

impl ComposedPrompt {
    #[must_use]
    pub fn section(&self, section: Section) -> Option<&SectionOutput> {
        self.sections.iter().find(|s| s.section == section)
    }
}

/// Builds review prompts that never exceed the configured token budget.
#[derive(Debug, Clone)]
pub struct PromptComposer {
    options: PromptOptions,
    budget: TokenBudget,
}

impl PromptComposer {
    /// # Errors
    ///
    /// Returns an error if `options` are invalid or cannot be allocated.
    pub fn new(options: PromptOptions) -> Result<Self> {
        let budget = TokenBudget::allocate(&options)?;
        tracing::debug!(
            total = budget.total,
            allocated = ?budget.allocated,
            "prompt budget allocated"
        );
        Ok(Self { options, budget })
    }

    #[must_use]
    pub fn options(&self) -> &PromptOptions {
        &self.options
    }

    #[must_use]
    pub fn budget(&self) -> &TokenBudget {
        &self.budget
    }

    /// Render, truncate and assemble every section.
    ///
    /// Overflow is handled by truncation and reported in
    /// [`ComposedPrompt::metadata`].
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::CompositionFailed`] if nothing survives
    /// truncation.
    pub fn compose(&self, input: &PromptInput<'_>) -> Result<ComposedPrompt> {
        let chunks = prioritize(input.chunks, self.options.max_chunks);
        let raw = [
            (
                Section::Preamble,
                input.preamble.unwrap_or(DEFAULT_PREAMBLE).trim().to_owned(),
            ),
            (
                Section::Context,
                render_context(&chunks, self.options.preview_lines),
            ),
            (Section::Diffs, render_diffs(input.diffs)),
            (
                Section::Insights,
                if self.options.include_insights {
                    render_insights(&chunks)
                } else {
                    String::new()
                },
            ),
            (
                Section::Instructions,
                input
                    .instructions
                    .unwrap_or(DEFAULT_INSTRUCTIONS)
                    .trim()
                    .to_owned(),
            ),
        ];
        tracing::debug!(stage = "build_sections", chunks = chunks.len(), "composing prompt");

        let mut sections: Vec<SectionOutput> = raw
            .iter()
            .map(|(section, text)| fit_section(*section, text, self.budget.allocation(*section)))
            .collect();
        redistribute_slack(&mut sections, &raw);

        let assembled = sections
            .iter()
            .filter(|s| !s.text.is_empty())
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(SECTION_SEPARATOR);
        if assembled.trim().is_empty() {
            return Err(PromptError::CompositionFailed(
                "every section is empty after truncation".into(),
            ));
        }

        let mut metadata = PromptMetadata {
            truncated: sections.iter().any(|s| s.truncated),
            chunks_included: chunks.len(),
            chunks_dropped: input.chunks.len() - chunks.len(),
            ..PromptMetadata::default()
        };

        let assembled_tokens = estimate_tokens(&assembled);
        let text = if assembled_tokens > self.budget.total {
            tracing::debug!(
                stage = "truncate",
                tokens = assembled_tokens,
                budget = self.budget.total,
                "assembled prompt over budget"
            );
            let cut = truncate_to_tokens(&assembled, self.budget.total);
            metadata.truncated = true;
            metadata.original_tokens = Some(assembled_tokens);
            cut.text
        } else {
            if metadata.truncated {
                metadata.original_tokens =
                    Some(sections.iter().map(|s| s.original_tokens).sum::<usize>());
            }
            assembled
        };

        let token_count = estimate_tokens(&text);
        metadata.budget_used = token_count;
        metadata.budget_remaining = self.budget.total.saturating_sub(token_count);
        tracing::debug!(
            stage = "done",
            tokens = token_count,
            truncated = metadata.truncated,
            "prompt composed"
        );

        Ok(ComposedPrompt {
            text,
            token_count,
            sections,
            budget: self.budget.clone(),
            metadata,
        })
    }
}

fn fit_section(section: Section, text: &str, allocated: usize) -> SectionOutput {
    let cut = truncate_to_tokens(text, allocated);
    if cut.truncated {
        tracing::debug!(
            section = %section,
            tokens = cut.original_tokens,
            allocated,
            "section truncated"
        );
    }
    SectionOutput {
        section,
        tokens: estimate_tokens(&cut.text),
        text: cut.text,
        allocated,
        truncated: cut.truncated,
        original_tokens: cut.original_tokens,
    }
}

/// Hand tokens left unused by short sections to truncated ones, smallest
/// shortfall first. Headroom for separators and per-section rounding is held
/// back so the assembled prompt normally fits without a final cut.
fn redistribute_slack(sections: &mut [SectionOutput], raw: &[(Section, String)]) {
    let unused: usize = sections
        .iter()
        .filter(|s| !s.truncated)
        .map(|s| s.allocated - s.tokens)
        .sum();
    let mut spare = unused.saturating_sub(SLACK_HEADROOM_PER_SECTION * sections.len());

    let mut short: Vec<usize> = (0..sections.len())
        .filter(|&i| sections[i].truncated)
        .collect();
    short.sort_by_key(|&i| sections[i].original_tokens - sections[i].tokens);

    for i in short {
        if spare == 0 {
            break;
        }
        let output = &sections[i];
        let refit = fit_section(output.section, &raw[i].1, output.allocated + spare);
        spare -= refit.tokens.saturating_sub(output.tokens).min(spare);
        sections[i] = refit;
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use revu_index::payload::Provenance;
    use revu_index::scoring::{ScoringQuery, score};
    use revu_index::{ChunkType, CodeChunk, Lang, chunk_id};

    use crate::prompt::TRUNCATION_MARKER;
    use super::*;

    fn retrieved(path: &str, lines: usize) -> RetrievedChunk {
        let content = (1..=lines)
            .map(|i| format!("    let value_{i} = compute(input, {i});"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunk = CodeChunk {
            id: chunk_id(path, 1, lines),
            content,
            language: Lang::Rust,
            start_line: 1,
            end_line: lines,
            chunk_type: ChunkType::Function,
            complexity_score: 1,
            dependencies: vec![],
            imports: vec![],
            file_path: path.into(),
            name: Some("compute_all".into()),
            content_hash: path.into(),
            embedding: None,
        };
        let hybrid = score(&chunk, 0.8, None, &ScoringQuery::new(Utc::now()));
        RetrievedChunk {
            chunk,
            provenance: Provenance::default(),
            score: hybrid.total,
            semantic_score: 0.8,
            hybrid,
            insights: vec![],
        }
    }

    fn options(token_budget: usize) -> PromptOptions {
        PromptOptions {
            token_budget,
            preview_lines: 500,
            ..PromptOptions::default()
        }
    }

    #[test]
    fn oversized_context_is_truncated_within_budget() {
        let composer = PromptComposer::new(options(400)).unwrap();
        let chunks = vec![retrieved("src/a.rs", 200), retrieved("src/b.rs", 200)];
        let diffs = vec![FileDiff::new("src/a.rs", "@@ -1 +1 @@\n-old\n+new")];
        let prompt = composer
            .compose(&PromptInput {
                preamble: Some("Review this."),
                chunks: &chunks,
                diffs: &diffs,
                instructions: Some("List issues."),
            })
            .unwrap();

        assert!(prompt.token_count <= 400);
        assert!(prompt.text.contains(TRUNCATION_MARKER));
        let context = prompt.section(Section::Context).unwrap();
        assert!(context.truncated);
        assert!(context.tokens <= context.allocated);
        assert!(prompt.metadata.truncated);
        assert!(prompt.metadata.original_tokens.unwrap() > 400);
        assert!(prompt.text.starts_with("Review this."));
        assert!(prompt.text.contains("<changes>"));
    }

    #[test]
    fn small_prompt_is_left_whole() {
        let composer = PromptComposer::new(PromptOptions::default()).unwrap();
        let chunks = vec![retrieved("src/a.rs", 5)];
        let prompt = composer
            .compose(&PromptInput {
                chunks: &chunks,
                ..PromptInput::default()
            })
            .unwrap();

        assert!(!prompt.metadata.truncated);
        assert_eq!(prompt.metadata.original_tokens, None);
        assert_eq!(prompt.metadata.chunks_included, 1);
        assert_eq!(
            prompt.metadata.budget_used + prompt.metadata.budget_remaining,
            8000
        );
        assert!(prompt.text.contains(DEFAULT_PREAMBLE));
        assert!(prompt.text.contains("value_5"));
    }

    #[test]
    fn instructions_use_tokens_left_by_short_sections() {
        // The default fractions leave nothing for instructions on their own.
        let composer = PromptComposer::new(options(1000)).unwrap();
        assert_eq!(composer.budget().allocation(Section::Instructions), 0);

        let prompt = composer
            .compose(&PromptInput {
                preamble: Some("Review this."),
                instructions: Some("List issues."),
                ..PromptInput::default()
            })
            .unwrap();
        assert!(prompt.text.ends_with("List issues."));
        let instructions = prompt.section(Section::Instructions).unwrap();
        assert!(instructions.allocated > 0);
        assert!(!prompt.text.contains(TRUNCATION_MARKER));
    }

    #[test]
    fn chunk_limit_is_reported() {
        let composer = PromptComposer::new(PromptOptions {
            max_chunks: 1,
            ..PromptOptions::default()
        })
        .unwrap();
        let chunks = vec![retrieved("src/a.rs", 3), retrieved("src/b.rs", 3)];
        let prompt = composer
            .compose(&PromptInput {
                chunks: &chunks,
                ..PromptInput::default()
            })
            .unwrap();
        assert_eq!(prompt.metadata.chunks_included, 1);
        assert_eq!(prompt.metadata.chunks_dropped, 1);
    }

    #[test]
    fn blank_input_fails_composition() {
        let composer = PromptComposer::new(PromptOptions::default()).unwrap();
        let err = composer
            .compose(&PromptInput {
                preamble: Some("  "),
                instructions: Some(""),
                ..PromptInput::default()
            })
            .unwrap_err();
        assert!(matches!(err, PromptError::CompositionFailed(_)));
    }

    #[test]
    fn invalid_options_are_rejected() {
        let err = PromptComposer::new(PromptOptions {
            token_budget: 0,
            ..PromptOptions::default()
        })
        .unwrap_err();
        assert!(matches!(err, PromptError::InvalidBudget(_)));
    }
}

//! Token-budgeted review prompt composition.
//!
//! The budget is split across five sections. Each section is rendered and
//! truncated to its own allocation, then the sections are assembled and the
//! whole prompt is checked once more against the total budget.

pub mod budget;
pub mod composer;
pub mod sections;
pub mod truncate;

pub use budget::{BudgetFractions, PromptOptions, Section, TokenBudget};
pub use composer::{ComposedPrompt, PromptComposer, PromptInput, PromptMetadata, SectionOutput};
pub use sections::FileDiff;
pub use truncate::{TRUNCATION_MARKER, Truncated, truncate_to_tokens};

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// The allocation itself is inconsistent. Overflowing content is never
    /// an error; it is truncated and reported in the prompt metadata.
    #[error("invalid token budget: {0}")]
    InvalidBudget(String),

    #[error("prompt composition failed: {0}")]
    CompositionFailed(String),
}

impl PromptError {
    pub(crate) fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PromptError>;

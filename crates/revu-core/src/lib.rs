//! Configuration, token-budgeted prompt composition, and review sessions.

pub mod config;
pub mod prompt;
pub mod review;

pub use config::Config;
pub use prompt::{ComposedPrompt, FileDiff, PromptComposer, PromptError, PromptInput, PromptOptions};
pub use review::{ReviewError, ReviewOutcome, ReviewRequest, ReviewSession};

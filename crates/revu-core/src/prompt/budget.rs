use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{PromptError, Result};

/// Prompt sections, in assembly order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Preamble,
    Context,
    Diffs,
    Insights,
    Instructions,
}

impl Section {
    pub const ALL: [Self; 5] = [
        Self::Preamble,
        Self::Context,
        Self::Diffs,
        Self::Insights,
        Self::Instructions,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preamble => "preamble",
            Self::Context => "context",
            Self::Diffs => "diffs",
            Self::Insights => "insights",
            Self::Instructions => "instructions",
        }
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Share of the total budget requested by each section. The shares need
/// not sum to one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetFractions {
    pub preamble: f32,
    pub context: f32,
    pub diffs: f32,
    pub insights: f32,
    pub instructions: f32,
}

impl Default for BudgetFractions {
    fn default() -> Self {
        Self {
            preamble: 0.10,
            context: 0.60,
            diffs: 0.20,
            insights: 0.10,
            instructions: 0.10,
        }
    }
}

impl BudgetFractions {
    #[must_use]
    pub fn get(&self, section: Section) -> f32 {
        match section {
            Section::Preamble => self.preamble,
            Section::Context => self.context,
            Section::Diffs => self.diffs,
            Section::Insights => self.insights,
            Section::Instructions => self.instructions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptOptions {
    pub token_budget: usize,
    pub fractions: BudgetFractions,
    /// Retrieved chunks rendered into the context section at most.
    pub max_chunks: usize,
    /// Lines shown per chunk before the preview is cut.
    pub preview_lines: usize,
    pub include_insights: bool,
}

impl Default for PromptOptions {
    fn default() -> Self {
        Self {
            token_budget: 8000,
            fractions: BudgetFractions::default(),
            max_chunks: 20,
            preview_lines: 40,
            include_insights: true,
        }
    }
}

impl PromptOptions {
    /// # Errors
    ///
    /// Returns [`PromptError::InvalidBudget`] for a zero budget and
    /// [`PromptError::Validation`] for a fraction outside `[0, 1]` or a zero
    /// preview length.
    pub fn validate(&self) -> Result<()> {
        if self.token_budget == 0 {
            return Err(PromptError::InvalidBudget(
                "token_budget must be at least 1".into(),
            ));
        }
        for section in Section::ALL {
            let fraction = self.fractions.get(section);
            if !fraction.is_finite() || !(0.0..=1.0).contains(&fraction) {
                return Err(PromptError::validation(
                    format!("fractions.{section}"),
                    format!("must be within [0, 1], got {fraction}"),
                ));
            }
        }
        if self.preview_lines == 0 {
            return Err(PromptError::validation("preview_lines", "must be at least 1"));
        }
        Ok(())
    }
}

/// Per-section token allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenBudget {
    pub total: usize,
    pub allocated: BTreeMap<Section, usize>,
    pub remaining: usize,
}

impl TokenBudget {
    /// Allocate `floor(total × fraction)` to each section in assembly
    /// order, capped by what is left. Whatever remains afterwards goes to
    /// the context section.
    ///
    /// # Errors
    ///
    /// Returns the validation error of `options`, or
    /// [`PromptError::InvalidBudget`] if the allocation does not add up.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn allocate(options: &PromptOptions) -> Result<Self> {
        options.validate()?;
        let total = options.token_budget;

        let mut left = total;
        let mut allocated = BTreeMap::new();
        for section in Section::ALL {
            let wanted = (total as f64 * f64::from(options.fractions.get(section))).floor() as usize;
            let granted = wanted.min(left);
            left -= granted;
            allocated.insert(section, granted);
        }
        if left > 0 {
            *allocated.entry(Section::Context).or_default() += left;
        }

        let sum: usize = allocated.values().sum();
        if sum > total {
            return Err(PromptError::InvalidBudget(format!(
                "allocated {sum} tokens out of {total}"
            )));
        }
        Ok(Self {
            total,
            allocated,
            remaining: total - sum,
        })
    }

    #[must_use]
    pub fn allocation(&self, section: Section) -> usize {
        self.allocated.get(&section).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn allocated_total(&self) -> usize {
        self.allocated.values().sum()
    }
}

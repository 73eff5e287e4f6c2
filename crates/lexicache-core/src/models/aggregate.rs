//! Derived per-category completion counts.
//!
//! Aggregates are recomputed from cached records whenever they are asked
//! for; they are never stored on their own.

use serde::{Deserialize, Serialize};

use super::progress::{Category, ProgressRecord};

/// Number of known exercises per category, as reported by the catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct CategoryTotals {
    #[serde(default)]
    pub vocabulary: u32,
    #[serde(default)]
    pub grammar: u32,
    #[serde(default)]
    pub pronunciation: u32,
}

impl CategoryTotals {
    pub fn get(&self, category: Category) -> u32 {
        match category {
            Category::Vocabulary => self.vocabulary,
            Category::Grammar => self.grammar,
            Category::Pronunciation => self.pronunciation,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct CategoryProgress {
    pub completed: u32,
    pub total: u32,
}

impl CategoryProgress {
    /// Completion percentage in `0.0..=100.0`. An empty category is 0%.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(self.completed) * 100.0 / f64::from(self.total)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct AggregateProgress {
    pub vocabulary: CategoryProgress,
    pub grammar: CategoryProgress,
    pub pronunciation: CategoryProgress,
}

impl AggregateProgress {
    /// Count completed records per category against the catalog totals.
    /// Records without a category are ignored, and completed counts are
    /// clamped so they never exceed the catalog total.
    pub fn compute(records: &[ProgressRecord], totals: &CategoryTotals) -> Self {
        let mut aggregate = Self::default();
        for category in Category::ALL {
            aggregate.slot_mut(category).total = totals.get(category);
        }

        for record in records.iter().filter(|r| r.completed) {
            if let Some(category) = record.category() {
                aggregate.slot_mut(category).completed += 1;
            }
        }

        for category in Category::ALL {
            let slot = aggregate.slot_mut(category);
            slot.completed = slot.completed.min(slot.total);
        }
        aggregate
    }

    pub fn get(&self, category: Category) -> CategoryProgress {
        match category {
            Category::Vocabulary => self.vocabulary,
            Category::Grammar => self.grammar,
            Category::Pronunciation => self.pronunciation,
        }
    }

    /// Totals across all categories.
    pub fn overall(&self) -> CategoryProgress {
        Category::ALL
            .iter()
            .map(|c| self.get(*c))
            .fold(CategoryProgress::default(), |acc, p| CategoryProgress {
                completed: acc.completed + p.completed,
                total: acc.total + p.total,
            })
    }

    fn slot_mut(&mut self, category: Category) -> &mut CategoryProgress {
        match category {
            Category::Vocabulary => &mut self.vocabulary,
            Category::Grammar => &mut self.grammar,
            Category::Pronunciation => &mut self.pronunciation,
        }
    }
}

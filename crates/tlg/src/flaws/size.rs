//! Page size thresholds

use serde::{Deserialize, Serialize};

use super::{require_meta, FlawAction, FlawFilter, PageContext};

/// Which side of the threshold is a flaw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeDirection {
    /// Longer than the threshold ("Large")
    Above,
    /// Shorter than the threshold ("Small")
    Below,
}

/// Flags articles whose wikitext length crosses a byte threshold.
///
/// Redirects and pages outside the main namespace are never flagged.
#[derive(Debug, Clone)]
pub struct SizeFilter {
    threshold: u64,
    direction: SizeDirection,
}

impl SizeFilter {
    /// Filter with an explicit direction
    pub fn new(threshold: u64, direction: SizeDirection) -> Self {
        Self {
            threshold,
            direction,
        }
    }

    /// Pages longer than `threshold` bytes
    pub fn large(threshold: u64) -> Self {
        Self::new(threshold, SizeDirection::Above)
    }

    /// Pages shorter than `threshold` bytes
    pub fn small(threshold: u64) -> Self {
        Self::new(threshold, SizeDirection::Below)
    }

    /// Byte threshold
    pub fn threshold(&self) -> u64 {
        self.threshold
    }
}

impl FlawFilter for SizeFilter {
    fn name(&self) -> &str {
        match self.direction {
            SizeDirection::Above => "Large",
            SizeDirection::Below => "Small",
        }
    }

    fn evaluate(&self, ctx: &PageContext<'_>) -> FlawAction {
        let meta = require_meta!(ctx);
        if !meta.is_article() {
            return FlawAction::NotFlawed;
        }

        let length = meta.length;
        let flawed = match self.direction {
            SizeDirection::Above => length > self.threshold,
            SizeDirection::Below => length < self.threshold,
        };
        if !flawed {
            return FlawAction::NotFlawed;
        }

        let relation = match self.direction {
            SizeDirection::Above => "above",
            SizeDirection::Below => "below",
        };
        // larger pages sort first for Large, smaller first for Small
        let sort_key = match self.direction {
            SizeDirection::Above => -(length as i64),
            SizeDirection::Below => length as i64,
        };
        FlawAction::flawed(
            self.name(),
            format!("{} bytes ({} {})", length, relation, self.threshold),
            sort_key,
        )
    }
}

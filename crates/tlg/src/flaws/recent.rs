//! Recently touched pages

use std::time::Duration;

use super::{require_meta, FlawAction, FlawFilter, PageContext};

/// Default window: one day
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Flags pages touched within a time window before evaluation
#[derive(Debug, Clone)]
pub struct RecentlyChangedFilter {
    window: chrono::Duration,
}

impl RecentlyChangedFilter {
    /// Filter over the given window
    pub fn new(window: Duration) -> Self {
        Self {
            window: chrono::Duration::from_std(window)
                .unwrap_or_else(|_| chrono::Duration::days(365 * 100)),
        }
    }
}

impl Default for RecentlyChangedFilter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl FlawFilter for RecentlyChangedFilter {
    fn name(&self) -> &str {
        "RecentlyChanged"
    }

    fn evaluate(&self, ctx: &PageContext<'_>) -> FlawAction {
        let meta = require_meta!(ctx);
        let age = ctx.now() - meta.touched;
        if age <= self.window {
            FlawAction::flawed(
                self.name(),
                format!("touched {}", meta.touched.format("%Y-%m-%d %H:%M")),
                -meta.touched.timestamp(),
            )
        } else {
            FlawAction::NotFlawed
        }
    }
}

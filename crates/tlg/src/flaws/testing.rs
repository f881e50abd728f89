//! Filters for composing and exercising the pipeline

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{FlawAction, FlawFilter, PageContext};

/// Never flags anything
#[derive(Debug, Clone, Default)]
pub struct NopFilter;

impl FlawFilter for NopFilter {
    fn name(&self) -> &str {
        "Nop"
    }

    fn evaluate(&self, _ctx: &PageContext<'_>) -> FlawAction {
        FlawAction::NotFlawed
    }
}

/// Flags every page the query returns
#[derive(Debug, Clone, Default)]
pub struct AllFilter;

impl FlawFilter for AllFilter {
    fn name(&self) -> &str {
        "ALL"
    }

    fn evaluate(&self, _ctx: &PageContext<'_>) -> FlawAction {
        FlawAction::flawed(self.name(), "", 0)
    }
}

/// When the unlucky filter fails
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnluckyMode {
    /// Pages whose id is a multiple of n
    Modulo(u64),
    /// Every page
    Always,
    /// Each page with the given probability; seeded runs are reproducible
    Chance {
        /// Failure probability, 0.0 to 1.0
        probability: f64,
        /// Seed mixed with the page id
        seed: Option<u64>,
    },
}

impl Default for UnluckyMode {
    fn default() -> Self {
        UnluckyMode::Modulo(13)
    }
}

/// Fault injection: returns `Error` for unlucky pages, `NotFlawed` otherwise
#[derive(Debug, Clone, Default)]
pub struct UnluckyFilter {
    mode: UnluckyMode,
}

impl UnluckyFilter {
    /// Filter with the given failure mode
    pub fn new(mode: UnluckyMode) -> Self {
        Self { mode }
    }

    fn unlucky(&self, id: u64) -> bool {
        match self.mode {
            UnluckyMode::Modulo(0) => false,
            UnluckyMode::Modulo(n) => id % n == 0,
            UnluckyMode::Always => true,
            UnluckyMode::Chance { probability, seed } => {
                let p = probability.clamp(0.0, 1.0);
                match seed {
                    Some(seed) => {
                        StdRng::seed_from_u64(seed ^ id.wrapping_mul(0x9E37_79B9_7F4A_7C15))
                            .gen_bool(p)
                    }
                    None => rand::thread_rng().gen_bool(p),
                }
            }
        }
    }
}

impl FlawFilter for UnluckyFilter {
    fn name(&self) -> &str {
        "Unlucky"
    }

    fn evaluate(&self, ctx: &PageContext<'_>) -> FlawAction {
        let id = ctx.page().id().get();
        if self.unlucky(id) {
            FlawAction::Error(format!("page {} is unlucky", id))
        } else {
            FlawAction::NotFlawed
        }
    }
}

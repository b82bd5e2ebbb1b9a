//! # Decoration Allocator
//!
//! Decides what a newly unlocked decoration looks like and where it hangs.
//!
//! ## Type Cascade
//! 1. Milestone acts get a guaranteed type (5 star, 10 light, 15 garland, 25 snowflake),
//!    acts 50 and 100 pick between two special types.
//! 2. Otherwise the highest band reached by the act number decides. Bands from 10 upward
//!    carry a scarce type that is forced with some probability while the tree lacks it.
//! 3. Below 10 acts everything is an ornament, except a star for the very first decoration
//!    once 5 acts are reached.
//!
//! ## Placement
//! - Rows fill top to bottom over the 15-80% band, spacing shrinks as acts grow
//! - Horizontal jitter widens with the tier but stays inside the 30-70% silhouette
use std::sync::Arc;

use rand::Rng;

use crate::{
    models::{DecorationType, Placement},
    utils::round2,
};

use DecorationType::{Garland, Gift, Light, Ornament, Snowflake, Star};

pub const FALLBACK_COLOR: &str = "#DC2626";

pub const MIN_SIZE: f64 = 0.8;
pub const MAX_SIZE: f64 = 1.2;

const TOP_Y: f64 = 15.0;
const BOTTOM_Y: f64 = 80.0;
const TREE_HEIGHT: f64 = 65.0;
const CENTER_X: f64 = 50.0;
const LEFT_X: f64 = 30.0;
const RIGHT_X: f64 = 70.0;

/// Acts whose decoration type is fixed, or drawn from a short list.
const MILESTONE_TYPES: &[(u64, &[DecorationType])] = &[
    (5, &[Star]),
    (10, &[Light]),
    (15, &[Garland]),
    (25, &[Snowflake]),
    (50, &[Star, Ornament]),
    (100, &[Star, Gift]),
];

struct Band {
    min_act: u64,
    scarce: Option<(DecorationType, f64)>,
    pool: &'static [DecorationType],
}

/// Highest band first.
const BANDS: &[Band] = &[
    Band {
        min_act: 100,
        scarce: None,
        pool: &[Ornament, Star, Snowflake, Gift],
    },
    Band {
        min_act: 50,
        scarce: Some((Star, 0.3)),
        pool: &[Ornament, Star, Snowflake],
    },
    Band {
        min_act: 25,
        scarce: Some((Snowflake, 0.4)),
        pool: &[Ornament, Snowflake],
    },
    Band {
        min_act: 15,
        scarce: Some((Garland, 0.4)),
        pool: &[Ornament, Garland],
    },
    Band {
        min_act: 10,
        scarce: Some((Light, 0.5)),
        pool: &[Ornament, Light],
    },
];

const FIRST_STAR_ACT: u64 = 5;

/// Source of the allocator's random choices.
pub trait Randomness: Send + Sync {
    /// Uniform in `[0, 1)`.
    fn unit(&self) -> f64;

    /// Uniform index in `0..len`, `len` is never zero.
    fn index(&self, len: usize) -> usize;

    /// Uniform in `[low, high]`.
    fn uniform(&self, low: f64, high: f64) -> f64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl Randomness for ThreadRandom {
    fn unit(&self) -> f64 {
        rand::thread_rng().gen_range(0.0..1.0)
    }

    fn index(&self, len: usize) -> usize {
        rand::thread_rng().gen_range(0..len)
    }

    fn uniform(&self, low: f64, high: f64) -> f64 {
        rand::thread_rng().gen_range(low..=high)
    }
}

#[derive(Clone)]
pub struct Allocator {
    rng: Arc<dyn Randomness>,
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new(Arc::new(ThreadRandom))
    }
}

impl Allocator {
    pub fn new(rng: Arc<dyn Randomness>) -> Self {
        Self { rng }
    }

    fn pick<T: Copy>(&self, items: &[T]) -> T {
        items[self.rng.index(items.len()).min(items.len() - 1)]
    }

    pub fn choose_type(
        &self,
        act_number: u64,
        existing_count: u64,
        present: &[DecorationType],
    ) -> DecorationType {
        if let Some((_, choices)) = MILESTONE_TYPES
            .iter()
            .find(|(milestone, _)| *milestone == act_number)
        {
            return self.pick(choices);
        }

        if let Some(band) = BANDS.iter().find(|band| act_number >= band.min_act) {
            if let Some((scarce, chance)) = band.scarce {
                if !present.contains(&scarce) && self.rng.unit() < chance {
                    return scarce;
                }
            }

            return self.pick(band.pool);
        }

        if act_number >= FIRST_STAR_ACT && existing_count == 0 {
            Star
        } else {
            Ornament
        }
    }

    pub fn choose_color(&self, decoration_type: DecorationType) -> String {
        let palette = decoration_type.palette();
        if palette.is_empty() {
            return FALLBACK_COLOR.to_string();
        }

        self.pick(palette).to_string()
    }

    /// Returns `(x, y)` in percent of the tree canvas.
    pub fn choose_position(
        &self,
        total_acts: u64,
        existing_count: u64,
        tier_level: u8,
    ) -> (f64, f64) {
        let spacing = TREE_HEIGHT / total_acts.max(1) as f64;
        let y = (TOP_Y + existing_count as f64 * spacing).clamp(TOP_Y, BOTTOM_Y);

        let variance = 10.0 + f64::from(tier_level) * 5.0;
        let x = (CENTER_X + self.rng.uniform(-variance, variance)).clamp(LEFT_X, RIGHT_X);

        (round2(x), round2(y))
    }

    pub fn choose_size(&self) -> f64 {
        self.rng.uniform(MIN_SIZE, MAX_SIZE).clamp(MIN_SIZE, MAX_SIZE)
    }

    pub fn allocate(
        &self,
        act_number: u64,
        existing_count: u64,
        total_acts: u64,
        tier_level: u8,
        present: &[DecorationType],
    ) -> Placement {
        let decoration_type = self.choose_type(act_number, existing_count, present);
        let color = self.choose_color(decoration_type);
        let (position_x, position_y) = self.choose_position(total_acts, existing_count, tier_level);

        Placement {
            decoration_type,
            color,
            size: self.choose_size(),
            position_x,
            position_y,
        }
    }
}

/// Deterministic stand-in for tests: fixed draws for every call.
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct FixedRandom {
    pub unit: f64,
    pub index: usize,
    /// Where `uniform` lands between its bounds, 0 is `low` and 1 is `high`.
    pub fraction: f64,
}

#[cfg(test)]
impl FixedRandom {
    pub fn allocator(unit: f64, index: usize, fraction: f64) -> Allocator {
        Allocator::new(Arc::new(FixedRandom {
            unit,
            index,
            fraction,
        }))
    }
}

#[cfg(test)]
impl Randomness for FixedRandom {
    fn unit(&self) -> f64 {
        self.unit
    }

    fn index(&self, len: usize) -> usize {
        self.index.min(len - 1)
    }

    fn uniform(&self, low: f64, high: f64) -> f64 {
        low + (high - low) * self.fraction
    }
}

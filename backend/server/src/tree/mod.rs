//! # Tree
//!
//! Reward engine turning a user's acts into decorations on their tree.
//!
//! - [`progress`]: cached act/decoration counts, tier level and next milestone
//! - [`allocator`]: type, color, size and position of a new decoration
//! - [`reconciler`]: makes sure every act owns exactly one auto-placed decoration
pub mod allocator;
pub mod locks;
pub mod progress;
pub mod reconciler;

pub use allocator::{Allocator, Randomness, ThreadRandom};
pub use progress::{ProgressTracker, next_milestone, tier_level};
pub use reconciler::TreeService;

//! Memory layer - retention over time and review scheduling
//!
//! Contains:
//! - SkillDecayCalculator - exponential forgetting curve over a knowledge snapshot
//! - SM-2 - easiness factor / interval scheduler sharing the review queue with BKT

pub mod decay;
pub mod sm2;

pub use decay::{
    explain_decay, DecayedState, ReviewPriority, ReviewTiming, ReviewUrgency,
    SkillDecayCalculator,
};
pub use sm2::{
    adjust_interval_by_mastery, mastery_to_quality, update_sm2, Quality, Sm2Item, Sm2Scheduler,
};

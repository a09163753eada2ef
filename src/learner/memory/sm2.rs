use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::learner::config::Sm2Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Blackout = 0,
    Incorrect = 1,
    IncorrectFamiliar = 2,
    CorrectDifficult = 3,
    CorrectHesitant = 4,
    Perfect = 5,
}

impl Quality {
    /// Ratings above 5 are treated as 5.
    pub fn from_score(score: u8) -> Self {
        match score {
            0 => Self::Blackout,
            1 => Self::Incorrect,
            2 => Self::IncorrectFamiliar,
            3 => Self::CorrectDifficult,
            4 => Self::CorrectHesitant,
            _ => Self::Perfect,
        }
    }

    pub fn score(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blackout => "blackout",
            Self::Incorrect => "incorrect",
            Self::IncorrectFamiliar => "incorrect_familiar",
            Self::CorrectDifficult => "correct_difficult",
            Self::CorrectHesitant => "correct_hesitant",
            Self::Perfect => "perfect",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sm2Item {
    pub item_id: String,
    pub learner_id: String,
    pub easiness_factor: f64,
    pub interval: u32,
    pub repetitions: u32,
    pub next_review: DateTime<Utc>,
    pub last_review: Option<DateTime<Utc>>,
}

impl Sm2Item {
    pub fn new(item_id: &str, learner_id: &str, now: DateTime<Utc>) -> Self {
        Self::with_easiness(item_id, learner_id, now, Sm2Config::default().initial_easiness)
    }

    pub fn with_easiness(
        item_id: &str,
        learner_id: &str,
        now: DateTime<Utc>,
        easiness_factor: f64,
    ) -> Self {
        Self {
            item_id: item_id.to_string(),
            learner_id: learner_id.to_string(),
            easiness_factor,
            interval: 0,
            repetitions: 0,
            next_review: now,
            last_review: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_review <= now
    }
}

pub struct Sm2Scheduler {
    config: Sm2Config,
}

impl Sm2Scheduler {
    pub fn new(config: Sm2Config) -> Self {
        Self { config }
    }

    pub fn new_item(&self, item_id: &str, learner_id: &str, now: DateTime<Utc>) -> Sm2Item {
        Sm2Item::with_easiness(item_id, learner_id, now, self.config.initial_easiness)
    }

    pub fn update(&self, item: &Sm2Item, quality: u8, now: DateTime<Utc>) -> Sm2Item {
        let quality = Quality::from_score(quality);
        let q = quality.score() as f64;
        let prev_ef = if item.easiness_factor.is_finite() {
            item.easiness_factor
        } else {
            self.config.initial_easiness
        };
        let ef = (prev_ef + 0.1 - (5.0 - q) * (0.08 + (5.0 - q) * 0.02))
            .max(self.config.min_easiness);

        let (repetitions, interval) = if quality.score() < self.config.passing_quality {
            (0, self.config.first_interval)
        } else {
            let reps = item.repetitions.saturating_add(1);
            let interval = match reps {
                1 => self.config.first_interval,
                2 => self.config.second_interval,
                _ => {
                    let next = (item.interval.max(1) as f64 * ef).round();
                    next.min(self.config.max_interval as f64) as u32
                }
            };
            (reps, interval.min(self.config.max_interval))
        };

        Sm2Item {
            item_id: item.item_id.clone(),
            learner_id: item.learner_id.clone(),
            easiness_factor: ef,
            interval,
            repetitions,
            next_review: now + Duration::days(interval as i64),
            last_review: Some(now),
        }
    }

    pub fn max_interval(&self) -> u32 {
        self.config.max_interval
    }
}

impl Default for Sm2Scheduler {
    fn default() -> Self {
        Self::new(Sm2Config::default())
    }
}

pub fn update_sm2(item: &Sm2Item, quality: u8, now: DateTime<Utc>) -> Sm2Item {
    Sm2Scheduler::default().update(item, quality, now)
}

/// Bridge a BKT mastery estimate and the observed outcome onto the 0-5 scale.
pub fn mastery_to_quality(mastery: f64, correct: bool) -> u8 {
    let m = if mastery.is_finite() {
        mastery.clamp(0.0, 1.0)
    } else {
        0.0
    };
    if correct {
        if m >= 0.9 {
            5
        } else if m >= 0.6 {
            4
        } else {
            3
        }
    } else if m >= 0.6 {
        2
    } else if m >= 0.3 {
        1
    } else {
        0
    }
}

/// Stretch (high mastery) or shrink (low mastery) an interval by 0.8x-1.2x.
pub fn adjust_interval_by_mastery(interval: u32, mastery: f64, max_interval: u32) -> u32 {
    let m = if mastery.is_finite() {
        mastery.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let factor = 0.8 + 0.4 * m;
    let adjusted = (interval as f64 * factor).round() as u32;
    let adjusted = if interval > 0 { adjusted.max(1) } else { 0 };
    adjusted.min(max_interval)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn first_reviews_follow_fixed_intervals() {
        let item = Sm2Item::new("w", "l", now());
        let first = update_sm2(&item, 4, now());
        assert_eq!((first.repetitions, first.interval), (1, 1));
        let second = update_sm2(&first, 4, now());
        assert_eq!((second.repetitions, second.interval), (2, 6));
        let third = update_sm2(&second, 4, now());
        assert_eq!(third.interval, 15);
        assert_eq!(third.next_review, now() + Duration::days(15));
    }

    #[test]
    fn failure_resets_progress() {
        let mut item = Sm2Item::new("w", "l", now());
        item.repetitions = 7;
        item.interval = 120;
        for q in 0..3 {
            let next = update_sm2(&item, q, now());
            assert_eq!(next.repetitions, 0);
            assert_eq!(next.interval, 1);
        }
    }

    #[test]
    fn easiness_moves_with_quality() {
        let item = Sm2Item::new("w", "l", now());
        let q3 = update_sm2(&item, 3, now()).easiness_factor;
        let q4 = update_sm2(&item, 4, now()).easiness_factor;
        let q5 = update_sm2(&item, 5, now()).easiness_factor;
        assert!(q5 > q4);
        assert!(q3 < q4);
        assert!((q4 - 2.5).abs() < 1e-12);
    }

    #[test]
    fn easiness_has_floor_and_interval_has_cap() {
        let mut item = Sm2Item::new("w", "l", now());
        item.easiness_factor = 1.3;
        assert!((update_sm2(&item, 0, now()).easiness_factor - 1.3).abs() < 1e-12);

        item.easiness_factor = 2.5;
        item.repetitions = 10;
        item.interval = 700;
        assert_eq!(update_sm2(&item, 5, now()).interval, 730);
    }

    #[test]
    fn out_of_range_quality_is_perfect() {
        assert_eq!(Quality::from_score(9), Quality::Perfect);
        assert_eq!(Quality::from_score(0).as_str(), "blackout");
    }

    #[test]
    fn high_mastery_correct_maps_to_perfect() {
        let q = mastery_to_quality(0.95, true);
        assert_eq!(q, 5);
        let item = Sm2Item::new("w", "l", now());
        let next = update_sm2(&item, q, now());
        assert!(next.interval > item.interval);
        assert!(next.repetitions > item.repetitions);
    }

    #[test]
    fn incorrect_never_maps_to_passing() {
        for m in [0.0, 0.2, 0.5, 0.9, 0.999] {
            assert!(mastery_to_quality(m, false) < 3);
            assert!(mastery_to_quality(m, true) >= 3);
        }
    }

    #[test]
    fn interval_adjustment_range() {
        assert_eq!(adjust_interval_by_mastery(10, 0.0, 730), 8);
        assert_eq!(adjust_interval_by_mastery(10, 0.5, 730), 10);
        assert_eq!(adjust_interval_by_mastery(10, 1.0, 730), 12);
        assert_eq!(adjust_interval_by_mastery(1, 0.0, 730), 1);
        assert_eq!(adjust_interval_by_mastery(700, 1.0, 730), 730);
        assert_eq!(adjust_interval_by_mastery(0, 1.0, 730), 0);
    }
}

//! Skill decay - exponential forgetting curve over a knowledge snapshot
//!
//! R(t) = e^(-λ·t), with λ = max(0.1·λ_base, λ_base − ln(n+1)·k − streak·k·0.5)
//! so that every extra opportunity or streak step slows forgetting, down to a floor.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::learner::config::DecayParams;
use crate::learner::types::KnowledgeState;

const SECONDS_PER_DAY: f64 = 86_400.0;
const MAX_REVIEW_DAYS: f64 = 3_650.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewUrgency {
    Critical,
    High,
    Medium,
    Low,
}

impl ReviewUrgency {
    pub fn from_retention(retention: f64) -> Self {
        if retention < 0.3 {
            Self::Critical
        } else if retention < 0.5 {
            Self::High
        } else if retention < 0.7 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecayedState {
    pub skill_id: String,
    pub original_mastery: f64,
    pub decayed_mastery: f64,
    pub days_since_last_practice: f64,
    pub retention_rate: f64,
    pub needs_review: bool,
    pub urgency: ReviewUrgency,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewTiming {
    pub decay_rate: f64,
    pub target_retention: f64,
    pub days_until_review: f64,
    pub review_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewPriority {
    pub skill_id: String,
    pub decayed: DecayedState,
}

pub fn calculate_decay_rate(opportunities: u32, streak: u32, params: &DecayParams) -> f64 {
    let base = params.base_rate.max(0.0);
    let floor = base * params.min_rate_fraction.clamp(0.0, 1.0);
    let strength = (opportunities as f64 + 1.0).ln() * params.strength_factor;
    let streak_bonus = streak as f64 * params.strength_factor * 0.5;
    (base - strength - streak_bonus).max(floor)
}

pub struct SkillDecayCalculator {
    params: DecayParams,
}

impl SkillDecayCalculator {
    pub fn new(params: DecayParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &DecayParams {
        &self.params
    }

    pub fn decay_rate_for(&self, state: &KnowledgeState) -> f64 {
        calculate_decay_rate(state.total_attempts, state.streak_correct, &self.params)
    }

    pub fn apply_decay(&self, state: &KnowledgeState, as_of: DateTime<Utc>) -> DecayedState {
        let mastery = state.mastery_probability;
        let days = state
            .last_practice
            .map(|last| ((as_of - last).num_seconds() as f64 / SECONDS_PER_DAY).max(0.0))
            .unwrap_or(0.0);

        if state.last_practice.is_none() || days < 1.0 {
            return DecayedState {
                skill_id: state.skill_id.clone(),
                original_mastery: mastery,
                decayed_mastery: mastery,
                days_since_last_practice: days,
                retention_rate: 1.0,
                needs_review: false,
                urgency: ReviewUrgency::Low,
            };
        }

        let lambda = self.decay_rate_for(state);
        let retention = (-lambda * days).exp().clamp(0.0, 1.0);
        let floor = self.params.mastery_floor.min(mastery);
        let decayed_mastery = (mastery * retention).max(floor);

        DecayedState {
            skill_id: state.skill_id.clone(),
            original_mastery: mastery,
            decayed_mastery,
            days_since_last_practice: days,
            retention_rate: retention,
            needs_review: retention < self.params.review_threshold,
            urgency: ReviewUrgency::from_retention(retention),
        }
    }

    /// Days after last practice until retention falls to `target_retention`.
    pub fn calculate_optimal_review_timing(
        &self,
        state: &KnowledgeState,
        target_retention: f64,
    ) -> ReviewTiming {
        let lambda = self.decay_rate_for(state);
        let target = if target_retention.is_finite() {
            target_retention.clamp(0.01, 0.99)
        } else {
            self.params.review_threshold
        };
        let days = if lambda <= 0.0 {
            MAX_REVIEW_DAYS
        } else {
            (-target.ln() / lambda).min(MAX_REVIEW_DAYS)
        };
        let review_at = state
            .last_practice
            .map(|last| last + Duration::seconds((days * SECONDS_PER_DAY).round() as i64));

        ReviewTiming {
            decay_rate: lambda,
            target_retention: target,
            days_until_review: days,
            review_at,
        }
    }

    /// Lowest retention first; ties broken by skill id.
    pub fn prioritize_reviews(
        &self,
        states: &[KnowledgeState],
        as_of: DateTime<Utc>,
    ) -> Vec<ReviewPriority> {
        let mut out: Vec<ReviewPriority> = states
            .iter()
            .map(|s| ReviewPriority {
                skill_id: s.skill_id.clone(),
                decayed: self.apply_decay(s, as_of),
            })
            .collect();
        out.sort_by(|a, b| {
            a.decayed
                .retention_rate
                .partial_cmp(&b.decayed.retention_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.skill_id.cmp(&b.skill_id))
        });
        out
    }
}

impl Default for SkillDecayCalculator {
    fn default() -> Self {
        Self::new(DecayParams::default())
    }
}

pub fn explain_decay(decayed: &DecayedState) -> String {
    if decayed.days_since_last_practice < 1.0 {
        return format!(
            "Practiced within the last day, so estimated mastery stays at {:.0}%.",
            decayed.original_mastery * 100.0
        );
    }
    let mut text = format!(
        "{:.0} days since last practice; about {:.0}% is likely retained, so estimated mastery drops from {:.0}% to {:.0}%.",
        decayed.days_since_last_practice.floor(),
        decayed.retention_rate * 100.0,
        decayed.original_mastery * 100.0,
        decayed.decayed_mastery * 100.0
    );
    if decayed.needs_review {
        text.push_str(&format!(
            " Review is recommended ({} urgency).",
            decayed.urgency.as_str()
        ));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learner::types::{BktParams, SkillDefinition};

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn practiced(days_ago: i64, attempts: u32, streak: u32) -> KnowledgeState {
        let mut s = KnowledgeState::new("l", &SkillDefinition::new("s", "S"), BktParams::default());
        s.mastery_probability = 0.8;
        s.total_attempts = attempts;
        s.streak_correct = streak;
        s.last_practice = Some(now() - Duration::days(days_ago));
        s
    }

    #[test]
    fn practice_slows_decay_with_floor() {
        let p = DecayParams::default();
        let novice = calculate_decay_rate(1, 0, &p);
        let veteran = calculate_decay_rate(50, 20, &p);
        assert!(veteran < novice);
        assert!((veteran - p.base_rate * p.min_rate_fraction).abs() < 1e-12);
    }

    #[test]
    fn no_decay_on_same_day() {
        let calc = SkillDecayCalculator::default();
        let d = calc.apply_decay(&practiced(0, 3, 1), now());
        assert_eq!(d.decayed_mastery, d.original_mastery);
        assert!(!d.needs_review);
    }

    #[test]
    fn never_practiced_does_not_decay() {
        let calc = SkillDecayCalculator::default();
        let mut s = practiced(0, 0, 0);
        s.last_practice = None;
        let d = calc.apply_decay(&s, now());
        assert_eq!(d.retention_rate, 1.0);
        assert_eq!(d.decayed_mastery, s.mastery_probability);
    }

    #[test]
    fn long_gap_needs_review() {
        let calc = SkillDecayCalculator::default();
        let d = calc.apply_decay(&practiced(30, 1, 0), now());
        assert!(d.retention_rate < 0.1);
        assert!(d.needs_review);
        assert_eq!(d.urgency, ReviewUrgency::Critical);
        assert!(d.decayed_mastery >= calc.params().mastery_floor);
    }

    #[test]
    fn review_timing_inverts_curve() {
        let calc = SkillDecayCalculator::default();
        let s = practiced(0, 1, 0);
        let timing = calc.calculate_optimal_review_timing(&s, 0.7);
        let at_due = calc.apply_decay(
            &s,
            s.last_practice.unwrap() + Duration::seconds((timing.days_until_review * 86_400.0) as i64),
        );
        assert!((at_due.retention_rate - 0.7).abs() < 1e-3);
        assert!(timing.review_at.is_some());
    }

    #[test]
    fn prioritize_orders_by_retention() {
        let calc = SkillDecayCalculator::default();
        let mut fresh = practiced(2, 40, 10);
        fresh.skill_id = "fresh".into();
        let mut stale = practiced(20, 1, 0);
        stale.skill_id = "stale".into();
        let order = calc.prioritize_reviews(&[fresh, stale], now());
        assert_eq!(order[0].skill_id, "stale");
    }

    #[test]
    fn urgency_buckets() {
        assert_eq!(ReviewUrgency::from_retention(0.2), ReviewUrgency::Critical);
        assert_eq!(ReviewUrgency::from_retention(0.4), ReviewUrgency::High);
        assert_eq!(ReviewUrgency::from_retention(0.6), ReviewUrgency::Medium);
        assert_eq!(ReviewUrgency::from_retention(0.9), ReviewUrgency::Low);
    }
}

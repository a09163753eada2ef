use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::learner::config::{CognitiveLoadConfig, LoadWeights};
use crate::learner::types::{sanitize_ms, AttemptRecord, Intervention};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub timestamp: DateTime<Utc>,
    pub correct: Option<bool>,
    pub response_time_ms: f64,
    pub expected_response_ms: Option<f64>,
    pub revision_count: u32,
    pub rage_clicks: u32,
    pub time_to_first_action_ms: Option<f64>,
}

impl TelemetryEvent {
    pub fn from_attempt(attempt: &AttemptRecord, expected_response_ms: Option<f64>) -> Self {
        Self {
            timestamp: attempt.timestamp,
            correct: Some(attempt.correct),
            response_time_ms: sanitize_ms(attempt.response_time_ms),
            expected_response_ms: expected_response_ms
                .filter(|e| e.is_finite() && *e > 0.0),
            revision_count: attempt.revision_count,
            rage_clicks: attempt.rage_clicks,
            time_to_first_action_ms: attempt.time_to_first_action_ms.map(sanitize_ms),
        }
    }
}

/// Time-ordered buffer holding only the events inside the trailing window.
#[derive(Debug, Clone)]
pub struct TelemetryWindow {
    events: VecDeque<TelemetryEvent>,
    window: Duration,
    max_events: usize,
}

impl TelemetryWindow {
    pub fn new(window_secs: i64, max_events: usize) -> Self {
        let max_events = max_events.max(1);
        Self {
            events: VecDeque::with_capacity(max_events.min(64)),
            window: Duration::seconds(window_secs.max(1)),
            max_events,
        }
    }

    pub fn push(&mut self, event: TelemetryEvent) {
        let idx = self
            .events
            .partition_point(|e| e.timestamp <= event.timestamp);
        self.events.insert(idx, event);
        self.evict();
    }

    fn evict(&mut self) {
        let Some(newest) = self.events.back().map(|e| e.timestamp) else {
            return;
        };
        let cutoff = newest - self.window;
        while self.events.front().is_some_and(|e| e.timestamp < cutoff) {
            self.events.pop_front();
        }
        while self.events.len() > self.max_events {
            self.events.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> impl Iterator<Item = &TelemetryEvent> {
        self.events.iter()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadFeatures {
    pub event_count: usize,
    pub error_rate: f64,
    pub revision_rate: f64,
    pub pace_deviation: f64,
    pub rage_click_rate: f64,
    pub first_action_delay: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadLevel {
    Low,
    Moderate,
    High,
    Overloaded,
}

impl LoadLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::High => "high",
            Self::Overloaded => "overloaded",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CognitiveLoadAssessment {
    pub learner_id: String,
    pub session_id: String,
    pub features: LoadFeatures,
    pub load_score: f64,
    pub load_level: LoadLevel,
    pub intervention: Option<Intervention>,
    pub rationale: String,
    pub assessed_at: DateTime<Utc>,
}

pub fn compute_features(window: &TelemetryWindow, config: &CognitiveLoadConfig) -> LoadFeatures {
    let n = window.len();
    if n == 0 {
        return LoadFeatures::default();
    }
    let count = n as f64;

    let graded: Vec<bool> = window.events().filter_map(|e| e.correct).collect();
    let error_rate = if graded.is_empty() {
        0.0
    } else {
        graded.iter().filter(|c| !**c).count() as f64 / graded.len() as f64
    };

    let revisions: f64 = window.events().map(|e| e.revision_count as f64).sum();
    let revision_rate = saturate(revisions / count, config.revision_saturation);

    let rage: f64 = window.events().map(|e| e.rage_clicks as f64).sum();
    let rage_click_rate = saturate(rage / count, config.rage_click_saturation);

    let pace_deviation = pace_deviation(window);

    let delays: Vec<f64> = window
        .events()
        .filter_map(|e| {
            let first = e.time_to_first_action_ms?;
            Some(match e.expected_response_ms {
                Some(expected) => (first / expected).clamp(0.0, 1.0),
                None => saturate(first, config.first_action_saturation_ms),
            })
        })
        .collect();
    let first_action_delay = mean(&delays).unwrap_or(0.0);

    LoadFeatures {
        event_count: n,
        error_rate,
        revision_rate,
        pace_deviation,
        rage_click_rate,
        first_action_delay,
    }
}

/// Mean relative deviation from expected pace when expectations are known,
/// otherwise the coefficient of variation of raw response times.
fn pace_deviation(window: &TelemetryWindow) -> f64 {
    let relative: Vec<f64> = window
        .events()
        .filter_map(|e| {
            let expected = e.expected_response_ms?;
            Some(((e.response_time_ms / expected) - 1.0).abs().min(2.0) / 2.0)
        })
        .collect();
    if let Some(m) = mean(&relative) {
        return m.clamp(0.0, 1.0);
    }

    let times: Vec<f64> = window.events().map(|e| e.response_time_ms).collect();
    let Some(avg) = mean(&times) else {
        return 0.0;
    };
    if times.len() < 2 || avg <= 0.0 {
        return 0.0;
    }
    let variance = times.iter().map(|t| (t - avg).powi(2)).sum::<f64>() / times.len() as f64;
    (variance.sqrt() / avg).clamp(0.0, 1.0)
}

pub fn score_load(features: &LoadFeatures, weights: &LoadWeights) -> f64 {
    let total = weights.error_rate
        + weights.revision_rate
        + weights.pace_deviation
        + weights.rage_click_rate
        + weights.first_action_delay;
    if total <= 0.0 {
        return 0.0;
    }
    let raw = weights.error_rate * features.error_rate
        + weights.revision_rate * features.revision_rate
        + weights.pace_deviation * features.pace_deviation
        + weights.rage_click_rate * features.rage_click_rate
        + weights.first_action_delay * features.first_action_delay;
    (raw / total).clamp(0.0, 1.0)
}

pub fn classify_load(score: f64, event_count: usize, config: &CognitiveLoadConfig) -> LoadLevel {
    if event_count < config.min_events {
        return LoadLevel::Low;
    }
    if score >= config.overload_threshold {
        LoadLevel::Overloaded
    } else if score >= config.high_threshold {
        LoadLevel::High
    } else if score >= config.moderate_threshold {
        LoadLevel::Moderate
    } else {
        LoadLevel::Low
    }
}

pub fn recommend_intervention(features: &LoadFeatures, level: LoadLevel) -> Option<Intervention> {
    let frantic = features.rage_click_rate >= 0.5 || features.pace_deviation >= 0.5;
    match level {
        LoadLevel::Low => None,
        LoadLevel::Moderate => frantic.then_some(Intervention::SlowDown),
        LoadLevel::High => {
            if frantic && features.rage_click_rate >= features.error_rate {
                Some(Intervention::SlowDown)
            } else {
                Some(Intervention::OfferHint)
            }
        }
        LoadLevel::Overloaded => {
            if features.error_rate >= 0.7 {
                Some(Intervention::Escalate)
            } else {
                Some(Intervention::TakeBreak)
            }
        }
    }
}

fn rationale(features: &LoadFeatures, level: LoadLevel, score: f64, min_events: usize) -> String {
    if features.event_count < min_events {
        return format!(
            "Only {} recent interaction(s) observed; at least {} are needed before load is rated above low.",
            features.event_count, min_events
        );
    }
    let mut drivers: Vec<(&str, f64)> = vec![
        ("errors", features.error_rate),
        ("revisions", features.revision_rate),
        ("irregular pacing", features.pace_deviation),
        ("rapid repeated clicking", features.rage_click_rate),
        ("slow starts", features.first_action_delay),
    ];
    drivers.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let top: Vec<&str> = drivers
        .iter()
        .filter(|(_, v)| *v >= 0.3)
        .take(2)
        .map(|(name, _)| *name)
        .collect();
    let cause = if top.is_empty() {
        "no single signal stands out".to_string()
    } else {
        format!("driven mostly by {}", top.join(" and "))
    };
    format!(
        "Cognitive load is {} (score {:.2}) over the last {} interactions, {}.",
        level.as_str(),
        score,
        features.event_count,
        cause
    )
}

pub fn assess_window(
    learner_id: &str,
    session_id: &str,
    window: &TelemetryWindow,
    config: &CognitiveLoadConfig,
) -> CognitiveLoadAssessment {
    let features = compute_features(window, config);
    let load_score = score_load(&features, &config.weights);
    let load_level = classify_load(load_score, features.event_count, config);
    let intervention = recommend_intervention(&features, load_level);
    let rationale = rationale(&features, load_level, load_score, config.min_events);
    let assessed_at = window
        .events()
        .last()
        .map(|e| e.timestamp)
        .unwrap_or_else(Utc::now);

    CognitiveLoadAssessment {
        learner_id: learner_id.to_string(),
        session_id: session_id.to_string(),
        features,
        load_score,
        load_level,
        intervention,
        rationale,
        assessed_at,
    }
}

fn session_key(learner_id: &str, session_id: &str) -> String {
    format!("{}:{}", learner_id, session_id)
}

pub struct CognitiveLoadDetector {
    config: CognitiveLoadConfig,
    sessions: Mutex<HashMap<String, TelemetryWindow>>,
}

impl CognitiveLoadDetector {
    pub fn new(config: CognitiveLoadConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_event(
        &self,
        learner_id: &str,
        session_id: &str,
        event: TelemetryEvent,
    ) -> CognitiveLoadAssessment {
        let assessment = {
            let mut sessions = self.sessions.lock();
            let window = sessions
                .entry(session_key(learner_id, session_id))
                .or_insert_with(|| {
                    TelemetryWindow::new(self.config.window_secs, self.config.max_events)
                });
            window.push(event);
            assess_window(learner_id, session_id, window, &self.config)
        };

        if let Some(intervention) = assessment.intervention {
            tracing::debug!(
                learner_id,
                session_id,
                level = assessment.load_level.as_str(),
                score = assessment.load_score,
                intervention = intervention.as_str(),
                "cognitive load intervention"
            );
        }
        assessment
    }

    pub fn current_assessment(
        &self,
        learner_id: &str,
        session_id: &str,
    ) -> Option<CognitiveLoadAssessment> {
        let sessions = self.sessions.lock();
        sessions
            .get(&session_key(learner_id, session_id))
            .map(|window| assess_window(learner_id, session_id, window, &self.config))
    }

    pub fn clear_session(&self, learner_id: &str, session_id: &str) -> bool {
        self.sessions
            .lock()
            .remove(&session_key(learner_id, session_id))
            .is_some()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().len()
    }
}

impl Default for CognitiveLoadDetector {
    fn default() -> Self {
        Self::new(CognitiveLoadConfig::default())
    }
}

fn saturate(value: f64, saturation: f64) -> f64 {
    if saturation <= 0.0 || !value.is_finite() {
        return 0.0;
    }
    (value / saturation).clamp(0.0, 1.0)
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

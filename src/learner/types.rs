use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MIN_PROBABILITY: f64 = 0.001;
pub const MAX_PROBABILITY: f64 = 0.999;

/// Clamp into the open interval used for every probability the engine emits.
/// Non-finite input is treated as "no information".
pub fn clamp_probability(p: f64) -> f64 {
    if p.is_finite() {
        p.clamp(MIN_PROBABILITY, MAX_PROBABILITY)
    } else {
        0.5
    }
}

pub(crate) fn sanitize_ms(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BktParams {
    pub p_init: f64,
    pub p_transit: f64,
    pub p_slip: f64,
    pub p_guess: f64,
}

impl Default for BktParams {
    fn default() -> Self {
        Self {
            p_init: 0.3,
            p_transit: 0.1,
            p_slip: 0.1,
            p_guess: 0.2,
        }
    }
}

impl BktParams {
    /// Stricter priors for skills where a false mastery claim is costly.
    pub fn safety_critical() -> Self {
        Self {
            p_init: 0.1,
            p_transit: 0.05,
            p_slip: 0.05,
            p_guess: 0.1,
        }
    }

    pub fn sanitized(&self) -> Self {
        Self {
            p_init: clamp_probability(self.p_init),
            p_transit: clamp_probability(self.p_transit),
            p_slip: clamp_probability(self.p_slip),
            p_guess: clamp_probability(self.p_guess),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    TrueFalse,
    #[default]
    MultipleChoice,
    FillInBlank,
    Matching,
    ShortAnswer,
    Essay,
    Simulation,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TrueFalse => "true_false",
            Self::MultipleChoice => "multiple_choice",
            Self::FillInBlank => "fill_in_blank",
            Self::Matching => "matching",
            Self::ShortAnswer => "short_answer",
            Self::Essay => "essay",
            Self::Simulation => "simulation",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().replace('-', "_").as_str() {
            "true_false" | "truefalse" | "boolean" => Self::TrueFalse,
            "fill_in_blank" | "fill_in" | "fillin" => Self::FillInBlank,
            "matching" => Self::Matching,
            "short_answer" | "shortanswer" => Self::ShortAnswer,
            "essay" | "long_answer" => Self::Essay,
            "simulation" => Self::Simulation,
            _ => Self::MultipleChoice,
        }
    }

    pub fn base_response_ms(&self) -> f64 {
        match self {
            Self::TrueFalse => 3_000.0,
            Self::MultipleChoice => 5_000.0,
            Self::FillInBlank => 8_000.0,
            Self::Matching => 12_000.0,
            Self::ShortAnswer => 15_000.0,
            Self::Essay => 25_000.0,
            Self::Simulation => 30_000.0,
        }
    }
}

/// Inputs to expected-latency estimation for a single item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseContext {
    pub content_type: ContentType,
    /// Item difficulty in [0, 1]; `None` means no difficulty scaling.
    pub difficulty: Option<f64>,
    pub historical_average_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillDefinition {
    pub skill_id: String,
    pub skill_name: String,
    #[serde(default)]
    pub is_safety_critical: bool,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub difficulty: Option<f64>,
    #[serde(default)]
    pub params: Option<BktParams>,
}

impl SkillDefinition {
    pub fn new(skill_id: impl Into<String>, skill_name: impl Into<String>) -> Self {
        Self {
            skill_id: skill_id.into(),
            skill_name: skill_name.into(),
            is_safety_critical: false,
            content_type: ContentType::default(),
            difficulty: None,
            params: None,
        }
    }

    pub fn safety_critical(mut self) -> Self {
        self.is_safety_critical = true;
        self
    }

    pub fn with_content(mut self, content_type: ContentType, difficulty: Option<f64>) -> Self {
        self.content_type = content_type;
        self.difficulty = difficulty;
        self
    }

    pub fn response_context(&self, historical_average_ms: Option<f64>) -> ResponseContext {
        ResponseContext {
            content_type: self.content_type,
            difficulty: self.difficulty,
            historical_average_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeState {
    pub learner_id: String,
    pub skill_id: String,
    pub skill_name: String,
    pub mastery_probability: f64,
    pub total_attempts: u32,
    pub streak_correct: u32,
    #[serde(default)]
    pub streak_incorrect: u32,
    pub last_practice: Option<DateTime<Utc>>,
    pub next_review_due: Option<DateTime<Utc>>,
    pub is_safety_critical: bool,
    pub params: BktParams,
}

impl KnowledgeState {
    /// Population-prior state for a learner who has never attempted the skill.
    pub fn new(learner_id: &str, skill: &SkillDefinition, params: BktParams) -> Self {
        let params = params.sanitized();
        Self {
            learner_id: learner_id.to_string(),
            skill_id: skill.skill_id.clone(),
            skill_name: skill.skill_name.clone(),
            mastery_probability: params.p_init,
            total_attempts: 0,
            streak_correct: 0,
            streak_incorrect: 0,
            last_practice: None,
            next_review_due: None,
            is_safety_critical: skill.is_safety_critical,
            params,
        }
    }

    pub fn mastery_level(&self) -> MasteryLevel {
        MasteryLevel::from_probability(self.mastery_probability)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub skill_id: String,
    pub correct: bool,
    pub response_time_ms: f64,
    #[serde(default)]
    pub confidence_rating: Option<f64>,
    #[serde(default)]
    pub revision_count: u32,
    #[serde(default)]
    pub time_to_first_action_ms: Option<f64>,
    #[serde(default)]
    pub rage_clicks: u32,
    pub timestamp: DateTime<Utc>,
}

impl AttemptRecord {
    pub fn new(skill_id: impl Into<String>, correct: bool, response_time_ms: f64) -> Self {
        Self {
            skill_id: skill_id.into(),
            correct,
            response_time_ms,
            confidence_rating: None,
            revision_count: 0,
            time_to_first_action_ms: None,
            rage_clicks: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Telemetry is noisy: negative or non-finite timings become 0, ratings are clamped.
    pub fn sanitized(&self) -> Self {
        Self {
            skill_id: self.skill_id.clone(),
            correct: self.correct,
            response_time_ms: sanitize_ms(self.response_time_ms),
            confidence_rating: self
                .confidence_rating
                .filter(|c| c.is_finite())
                .map(|c| c.clamp(0.0, 1.0)),
            revision_count: self.revision_count,
            time_to_first_action_ms: self.time_to_first_action_ms.map(sanitize_ms),
            rage_clicks: self.rage_clicks,
            timestamp: self.timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MasteryLevel {
    Novice,
    Developing,
    Proficient,
    Mastered,
}

impl MasteryLevel {
    pub const DEVELOPING: f64 = 0.4;
    pub const PROFICIENT: f64 = 0.7;
    pub const MASTERED: f64 = 0.95;

    pub fn from_probability(p: f64) -> Self {
        if p >= Self::MASTERED {
            Self::Mastered
        } else if p >= Self::PROFICIENT {
            Self::Proficient
        } else if p >= Self::DEVELOPING {
            Self::Developing
        } else {
            Self::Novice
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Novice => "novice",
            Self::Developing => "developing",
            Self::Proficient => "proficient",
            Self::Mastered => "mastered",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intervention {
    SlowDown,
    OfferHint,
    TakeBreak,
    Escalate,
    ReviewPrerequisites,
}

impl Intervention {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SlowDown => "slow_down",
            Self::OfferHint => "offer_hint",
            Self::TakeBreak => "take_break",
            Self::Escalate => "escalate",
            Self::ReviewPrerequisites => "review_prerequisites",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::SlowDown => "Responses are rushed or erratic; encourage the learner to slow down.",
            Self::OfferHint => "Errors are accumulating; offer a hint or worked example.",
            Self::TakeBreak => "Load is high across several signals; suggest a short break.",
            Self::Escalate => "The learner appears stuck; escalate to an instructor.",
            Self::ReviewPrerequisites => {
                "Mastery is regressing; revisit prerequisite material before continuing."
            }
        }
    }
}

//! xAPI ingestion adapter
//!
//! Only the assessment verbs `answered`, `attempted` and `completed` become
//! attempts. Statements without a correctness signal are ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::learner::types::{AttemptRecord, ContentType, SkillDefinition};

#[derive(Debug, Error)]
pub enum XapiError {
    #[error("statement object has no activity id")]
    MissingObject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XapiStatement {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub actor: Option<Value>,
    pub verb: XapiVerb,
    pub object: XapiObject,
    #[serde(default)]
    pub result: Option<XapiResult>,
    #[serde(default)]
    pub context: Option<XapiContext>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XapiVerb {
    pub id: String,
    #[serde(default)]
    pub display: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XapiObject {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub definition: Option<ActivityDefinition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityDefinition {
    #[serde(default)]
    pub name: Option<Map<String, Value>>,
    #[serde(default)]
    pub interaction_type: Option<String>,
    #[serde(default)]
    pub extensions: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XapiScore {
    #[serde(default)]
    pub scaled: Option<f64>,
    #[serde(default)]
    pub raw: Option<f64>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XapiResult {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub completion: Option<bool>,
    #[serde(default)]
    pub score: Option<XapiScore>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub extensions: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XapiContext {
    #[serde(default)]
    pub registration: Option<String>,
    #[serde(default)]
    pub extensions: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssessmentVerb {
    Answered,
    Attempted,
    Completed,
}

impl AssessmentVerb {
    /// Matches on the final IRI segment, e.g. `http://adlnet.gov/expapi/verbs/answered`.
    pub fn from_iri(iri: &str) -> Option<Self> {
        match last_segment(iri).to_lowercase().as_str() {
            "answered" => Some(Self::Answered),
            "attempted" => Some(Self::Attempted),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Answered => "answered",
            Self::Attempted => "attempted",
            Self::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractedAttempt {
    pub verb: AssessmentVerb,
    pub session_id: Option<String>,
    pub attempt: AttemptRecord,
    pub skill: SkillDefinition,
}

fn last_segment(iri: &str) -> &str {
    iri.trim_end_matches(['/', '#'])
        .rsplit(['/', '#', ':'])
        .next()
        .unwrap_or(iri)
}

/// Parses `PnW`, `PnDTnHnMnS` style durations (fractional seconds allowed) into
/// milliseconds. Year and month designators have no fixed length, so only
/// zero values are accepted for them.
pub fn parse_iso8601_duration(input: &str) -> Option<f64> {
    let rest = input.trim().strip_prefix('P')?;
    if rest.is_empty() {
        return None;
    }
    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) if !t.is_empty() => (d, Some(t)),
        Some(_) => return None,
        None => (rest, None),
    };

    let mut total_secs = 0.0;
    for (value, unit) in duration_components(date_part)? {
        total_secs += value
            * match unit {
                'W' => 604_800.0,
                'D' => 86_400.0,
                'Y' | 'M' if value == 0.0 => 0.0,
                _ => return None,
            };
    }
    if let Some(time) = time_part {
        for (value, unit) in duration_components(time)? {
            total_secs += value
                * match unit {
                    'H' => 3_600.0,
                    'M' => 60.0,
                    'S' => 1.0,
                    _ => return None,
                };
        }
    }
    total_secs.is_finite().then_some(total_secs * 1_000.0)
}

fn duration_components(part: &str) -> Option<Vec<(f64, char)>> {
    let mut out = Vec::new();
    let mut number = String::new();
    for c in part.chars() {
        if c.is_ascii_digit() || c == '.' || c == ',' {
            number.push(if c == ',' { '.' } else { c });
        } else {
            if number.is_empty() {
                return None;
            }
            let value: f64 = number.parse().ok()?;
            out.push((value, c.to_ascii_uppercase()));
            number.clear();
        }
    }
    number.is_empty().then_some(out)
}

fn content_type_for(interaction_type: Option<&str>) -> ContentType {
    match interaction_type.map(str::to_lowercase).as_deref() {
        Some("true-false") => ContentType::TrueFalse,
        Some("fill-in") | Some("numeric") => ContentType::FillInBlank,
        Some("long-fill-in") => ContentType::ShortAnswer,
        Some("matching") => ContentType::Matching,
        Some("performance") => ContentType::Simulation,
        _ => ContentType::MultipleChoice,
    }
}

fn correctness(result: &XapiResult) -> Option<bool> {
    result
        .success
        .or_else(|| {
            result
                .score
                .as_ref()
                .and_then(|s| s.scaled)
                .filter(|s| s.is_finite())
                .map(|s| s >= 0.5)
        })
        .or(result.completion)
}

fn extension<'a>(statement: &'a XapiStatement, name: &str) -> Option<&'a Value> {
    let from_result = statement.result.as_ref().and_then(|r| r.extensions.as_ref());
    let from_context = statement.context.as_ref().and_then(|c| c.extensions.as_ref());
    [from_result, from_context]
        .into_iter()
        .flatten()
        .flat_map(|map| map.iter())
        .find(|(key, _)| last_segment(key).eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
}

fn extension_f64(statement: &XapiStatement, name: &str) -> Option<f64> {
    extension(statement, name)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
}

fn extension_u32(statement: &XapiStatement, name: &str) -> u32 {
    extension_f64(statement, name)
        .map(|v| v.max(0.0).min(u32::MAX as f64) as u32)
        .unwrap_or(0)
}

fn display_name(definition: Option<&ActivityDefinition>) -> Option<String> {
    let names = definition?.name.as_ref()?;
    names
        .get("en-US")
        .or_else(|| names.get("en"))
        .or_else(|| names.values().next())
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// `Ok(None)` for non-assessment verbs or statements with no correctness signal.
pub fn extract_attempt(statement: &XapiStatement) -> Result<Option<ExtractedAttempt>, XapiError> {
    let Some(verb) = AssessmentVerb::from_iri(&statement.verb.id) else {
        return Ok(None);
    };
    let Some(result) = statement.result.as_ref() else {
        return Ok(None);
    };
    let Some(correct) = correctness(result) else {
        return Ok(None);
    };

    let skill_id = statement.object.id.trim();
    if skill_id.is_empty() {
        return Err(XapiError::MissingObject);
    }
    let definition = statement.object.definition.as_ref();
    let content_type = content_type_for(definition.and_then(|d| d.interaction_type.as_deref()));
    let skill = SkillDefinition::new(
        skill_id,
        display_name(definition).unwrap_or_else(|| last_segment(skill_id).to_string()),
    )
    .with_content(content_type, None);

    // Without a usable duration the item is assumed to take its typical time.
    let response_time_ms = match result.duration.as_deref() {
        Some(raw) => parse_iso8601_duration(raw).unwrap_or_else(|| {
            tracing::debug!(
                skill_id,
                duration = raw,
                "unreadable xAPI duration; using typical response time"
            );
            content_type.base_response_ms()
        }),
        None => content_type.base_response_ms(),
    };

    let mut attempt = AttemptRecord::new(skill_id, correct, response_time_ms)
        .at(statement.timestamp.unwrap_or_else(Utc::now));
    attempt.revision_count = extension_u32(statement, "revisionCount");
    attempt.rage_clicks = extension_u32(statement, "rageClicks");
    attempt.time_to_first_action_ms = extension_f64(statement, "timeToFirstAction");
    attempt.confidence_rating = extension_f64(statement, "confidence");

    Ok(Some(ExtractedAttempt {
        verb,
        session_id: statement
            .context
            .as_ref()
            .and_then(|c| c.registration.clone()),
        attempt,
        skill,
    }))
}

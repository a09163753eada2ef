use std::sync::Arc;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};

use learner_engine::config::Config;
use learner_engine::learner::{AttemptRecord, InMemoryStore, SkillDefinition};
use learner_engine::logging;
use learner_engine::services::xapi::XapiStatement;
use learner_engine::{AdaptiveLearningService, LearnerEngineConfig, ServiceError};

/// One JSON line: either a raw attempt or an xAPI statement for a learner.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplayRecord {
    learner_id: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    attempt: Option<AttemptRecord>,
    #[serde(default)]
    statement: Option<XapiStatement>,
    #[serde(default)]
    skill: Option<SkillDefinition>,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = logging::init_tracing(&config);

    let Some(path) = config.input_path.clone() else {
        tracing::error!("usage: learner-engine <attempts.jsonl>");
        std::process::exit(2);
    };

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(err) => {
            tracing::error!(path = %path.display(), error = %err, "cannot open input");
            std::process::exit(1);
        }
    };

    let service = AdaptiveLearningService::new(
        LearnerEngineConfig::from_env(),
        Arc::new(InMemoryStore::new()),
    );

    let mut lines = BufReader::new(file).lines();
    let mut line_no = 0usize;
    let (mut processed, mut skipped) = (0usize, 0usize);

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                tracing::error!(line = line_no + 1, error = %err, "failed to read input");
                std::process::exit(1);
            }
        };
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let record: ReplayRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(line = line_no, error = %err, "skipping malformed record");
                skipped += 1;
                continue;
            }
        };

        let outcome = match (&record.attempt, &record.statement) {
            (Some(attempt), _) => {
                let session = record.session_id.as_deref().unwrap_or("default");
                service
                    .process_attempt(&record.learner_id, session, attempt, record.skill.as_ref())
                    .await
                    .map(Some)
            }
            (None, Some(statement)) => {
                service
                    .process_xapi_statement(&record.learner_id, statement)
                    .await
            }
            (None, None) => {
                tracing::warn!(line = line_no, "record has neither attempt nor statement");
                skipped += 1;
                continue;
            }
        };

        match outcome {
            Ok(Some(result)) => match serde_json::to_string(&result) {
                Ok(json) => {
                    println!("{json}");
                    processed += 1;
                }
                Err(err) => {
                    tracing::error!(line = line_no, error = %err, "failed to encode result");
                    std::process::exit(1);
                }
            },
            Ok(None) => skipped += 1,
            Err(ServiceError::InvalidStatement(err)) => {
                tracing::warn!(line = line_no, error = %err, "skipping invalid statement");
                skipped += 1;
            }
            Err(err) => {
                tracing::error!(line = line_no, error = %err, "failed to process record");
                std::process::exit(1);
            }
        }
    }

    tracing::info!(
        processed,
        skipped,
        active_sessions = service.active_sessions(),
        "replay complete"
    );
}

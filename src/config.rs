use std::path::PathBuf;

const DEFAULT_LOG_DIR: &str = "./logs";

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub input_path: Option<PathBuf>,
    /// Mirror logs into a daily rolling file under `log_dir`.
    pub file_logs: bool,
    pub log_dir: PathBuf,
}

impl Config {
    /// The first CLI argument wins over `LEARNER_INPUT`.
    pub fn from_env() -> Self {
        let input_path = std::env::args_os()
            .nth(1)
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("LEARNER_INPUT").map(PathBuf::from));

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let file_logs = parse_flag(std::env::var("ENABLE_FILE_LOGS").ok().as_deref());
        let log_dir = std::env::var_os("LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR));

        Self {
            log_level,
            input_path,
            file_logs,
            log_dir,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            input_path: None,
            file_logs: false,
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
        }
    }
}

fn parse_flag(value: Option<&str>) -> bool {
    value
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

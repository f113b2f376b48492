//! Engine configuration.
//!
//! Loaded once at startup from the environment (a `.env` file is honored),
//! with defaults suitable for development. The improvement-loop bounds are
//! deliberately not configurable; they live as constants in
//! [`crate::improvement`].

use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the orchestration engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hard ceiling per capability call. A timeout becomes a failed
    /// StageResult, never a hung run.
    pub capability_timeout: Duration,
    /// Target size of re-chunked streaming pieces, in characters.
    pub stream_chunk_size: usize,
    /// SQLite database path for the bundled artifact repository.
    pub database_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capability_timeout: Duration::from_secs(45),
            stream_chunk_size: 20,
            database_path: PathBuf::from("story_engine.db"),
        }
    }
}

impl EngineConfig {
    /// Build a config from the environment, falling back to defaults.
    ///
    /// Recognized variables: `STORY_ENGINE_CAPABILITY_TIMEOUT_SECS`,
    /// `STORY_ENGINE_CHUNK_SIZE`, `STORY_ENGINE_DB`.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let mut config = Self::default();
        if let Some(secs) = env_parse::<u64>("STORY_ENGINE_CAPABILITY_TIMEOUT_SECS") {
            config.capability_timeout = Duration::from_secs(secs);
        }
        if let Some(size) = env_parse::<usize>("STORY_ENGINE_CHUNK_SIZE") {
            if size > 0 {
                config.stream_chunk_size = size;
            }
        }
        if let Ok(path) = std::env::var("STORY_ENGINE_DB") {
            config.database_path = PathBuf::from(path);
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

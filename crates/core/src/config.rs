//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and passed into the controller. Request
//! handling never reads process-wide environment variables. The `*_from_env_value` helpers take
//! the raw value rather than reading the environment themselves, so they are testable without
//! mutating global state.

use crate::error::{SubrecordError, SubrecordResult};
use crate::ids::EpisodeId;
use std::path::{Path, PathBuf};

/// Where committed change events are delivered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IntegrationMode {
    /// Events are dropped.
    Off,
    /// Events are written to the service log.
    Log,
    /// Events are appended as JSON lines to the given file.
    JsonLines(PathBuf),
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    data_dir: Option<PathBuf>,
    schema_file: Option<PathBuf>,
    users_file: Option<PathBuf>,
    listings_file: Option<PathBuf>,
    integration: IntegrationMode,
    seed_episodes: Vec<EpisodeId>,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`SubrecordError::InvalidInput`] if `data_dir` is set but is not an existing
    /// directory, or if `schema_file`, `users_file` or `listings_file` is set but is not an
    /// existing file.
    pub fn new(
        data_dir: Option<PathBuf>,
        schema_file: Option<PathBuf>,
        users_file: Option<PathBuf>,
        listings_file: Option<PathBuf>,
        integration: IntegrationMode,
        seed_episodes: Vec<EpisodeId>,
    ) -> SubrecordResult<Self> {
        if let Some(dir) = &data_dir {
            if !dir.is_dir() {
                return Err(SubrecordError::InvalidInput(format!(
                    "data directory does not exist: {}",
                    dir.display()
                )));
            }
        }
        for file in [&schema_file, &users_file, &listings_file].into_iter().flatten() {
            if !file.is_file() {
                return Err(SubrecordError::InvalidInput(format!(
                    "configuration file does not exist: {}",
                    file.display()
                )));
            }
        }

        Ok(Self {
            data_dir,
            schema_file,
            users_file,
            listings_file,
            integration,
            seed_episodes,
        })
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    pub fn schema_file(&self) -> Option<&Path> {
        self.schema_file.as_deref()
    }

    pub fn users_file(&self) -> Option<&Path> {
        self.users_file.as_deref()
    }

    pub fn listings_file(&self) -> Option<&Path> {
        self.listings_file.as_deref()
    }

    pub fn integration(&self) -> &IntegrationMode {
        &self.integration
    }

    pub fn seed_episodes(&self) -> &[EpisodeId] {
        &self.seed_episodes
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an optional path setting. Empty/whitespace values count as unset.
pub fn path_from_env_value(value: Option<String>) -> Option<PathBuf> {
    non_blank(value).map(PathBuf::from)
}

/// Parse the integration mode: `off`, `log` (the default) or `jsonl:<path>`.
pub fn integration_mode_from_env_value(value: Option<String>) -> SubrecordResult<IntegrationMode> {
    let Some(value) = non_blank(value) else {
        return Ok(IntegrationMode::Log);
    };

    match value.as_str() {
        "off" => Ok(IntegrationMode::Off),
        "log" => Ok(IntegrationMode::Log),
        other => match other.strip_prefix("jsonl:") {
            Some(path) if !path.trim().is_empty() => {
                Ok(IntegrationMode::JsonLines(PathBuf::from(path.trim())))
            }
            _ => Err(SubrecordError::InvalidInput(format!(
                "unsupported integration mode '{}' (expected off, log or jsonl:<path>)",
                other
            ))),
        },
    }
}

/// Parse a comma-separated list of episode ids to seed the episode directory with.
pub fn episode_ids_from_env_value(value: Option<String>) -> SubrecordResult<Vec<EpisodeId>> {
    let Some(value) = non_blank(value) else {
        return Ok(Vec::new());
    };

    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::parse::<EpisodeId>)
        .collect()
}

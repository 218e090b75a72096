//! Episodes of care.
//!
//! Episode lifecycle belongs to another part of the system. The subrecord core only asks whether
//! an episode exists before attaching a new record to it.

use crate::error::{SubrecordError, SubrecordResult};
use crate::ids::EpisodeId;
use std::collections::BTreeSet;
use std::sync::RwLock;

pub trait EpisodeDirectory: Send + Sync {
    fn exists(&self, episode_id: EpisodeId) -> SubrecordResult<bool>;
}

/// Episode ids held in memory, seeded from configuration.
#[derive(Debug, Default)]
pub struct InMemoryEpisodeDirectory {
    episodes: RwLock<BTreeSet<EpisodeId>>,
}

impl InMemoryEpisodeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_episodes(episodes: impl IntoIterator<Item = EpisodeId>) -> Self {
        Self {
            episodes: RwLock::new(episodes.into_iter().collect()),
        }
    }

    /// Registers a new episode with the next free id and returns it.
    pub fn create_episode(&self) -> SubrecordResult<EpisodeId> {
        let mut episodes = self
            .episodes
            .write()
            .map_err(|_| SubrecordError::LockPoisoned)?;
        let next = episodes.last().map_or(1, |last| last.get() + 1);
        let id = EpisodeId::new(next);
        episodes.insert(id);
        Ok(id)
    }
}

impl EpisodeDirectory for InMemoryEpisodeDirectory {
    fn exists(&self, episode_id: EpisodeId) -> SubrecordResult<bool> {
        let episodes = self
            .episodes
            .read()
            .map_err(|_| SubrecordError::LockPoisoned)?;
        Ok(episodes.contains(&episode_id))
    }
}

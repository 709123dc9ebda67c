use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::audio::{VoiceFamily, default_voice_families};
use crate::error::ConfigError;
use crate::timing::{DEFAULT_MAX_EVENTS, PartConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub progress_interval_ms: u64,
    /// Schedule cap. Notes past it are dropped and the schedule is flagged
    /// truncated.
    pub max_events: usize,
    pub lookahead_ms: u64,
    pub scheduler_tick_ms: u64,
    pub queue_capacity: usize,
    pub polyphony: usize,
    pub initial_volume: f32,
    pub voice_families: Vec<VoiceFamily>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: 50,
            max_events: DEFAULT_MAX_EVENTS,
            lookahead_ms: 100,
            scheduler_tick_ms: 25,
            queue_capacity: 4096,
            polyphony: 64,
            initial_volume: 0.8,
            voice_families: default_voice_families(),
        }
    }
}

impl PlayerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ron_string = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_ron(&ron_string)?;
        tracing::debug!(path = %path.display(), "loaded player config");
        Ok(config)
    }

    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: PlayerConfig = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_ron(&self) -> Result<String, ConfigError> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.voice_families.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one voice family is required".into(),
            ));
        }
        let zeros = [
            ("progress_interval_ms", self.progress_interval_ms as usize),
            ("max_events", self.max_events),
            ("lookahead_ms", self.lookahead_ms as usize),
            ("scheduler_tick_ms", self.scheduler_tick_ms as usize),
            ("queue_capacity", self.queue_capacity),
            ("polyphony", self.polyphony),
        ];
        if let Some((name, _)) = zeros.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
        }
        if !(0.0..=1.0).contains(&self.initial_volume) {
            return Err(ConfigError::Invalid(format!(
                "initial_volume {} is outside 0..1",
                self.initial_volume
            )));
        }
        for family in &self.voice_families {
            let adsr = &family.adsr;
            let stages = [adsr.attack, adsr.decay, adsr.release];
            if stages.iter().any(|s| !s.is_finite() || *s < 0.0)
                || !(0.0..=1.0).contains(&adsr.sustain)
                || !family.gain_db.is_finite()
            {
                return Err(ConfigError::Invalid(format!(
                    "voice family {} has an invalid envelope or gain",
                    family.name
                )));
            }
        }
        Ok(())
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn part_config(&self) -> PartConfig {
        PartConfig {
            lookahead: Duration::from_millis(self.lookahead_ms),
            tick: Duration::from_millis(self.scheduler_tick_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_ron_fills_defaults() {
        let config = PlayerConfig::from_ron("(polyphony: 16, initial_volume: 0.5)").unwrap();
        assert_eq!(config.polyphony, 16);
        assert_eq!(config.initial_volume, 0.5);
        assert_eq!(config.max_events, 10_000);
        assert_eq!(config.voice_families, default_voice_families());
    }

    #[test]
    fn test_default_survives_ron() {
        let config = PlayerConfig::default();
        let text = config.to_ron().unwrap();
        assert_eq!(PlayerConfig::from_ron(&text).unwrap(), config);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            PlayerConfig::from_ron("(voice_families: [])"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            PlayerConfig::from_ron("(progress_interval_ms: 0)"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            PlayerConfig::from_ron("(initial_volume: 1.5)"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            PlayerConfig::from_ron("(polyphony: \"many\")"),
            Err(ConfigError::Ron(_))
        ));
    }

    #[test]
    fn test_load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.ron");
        assert!(matches!(
            PlayerConfig::load(&path),
            Err(ConfigError::Io { .. })
        ));

        let path = dir.path().join("player.ron");
        fs::write(&path, "(lookahead_ms: 200)").unwrap();
        let config = PlayerConfig::load(&path).unwrap();
        assert_eq!(config.part_config().lookahead, Duration::from_millis(200));
    }
}

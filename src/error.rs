use std::path::PathBuf;

/// Failure while reading or decoding a MIDI resource.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed MIDI data in {label}: {source}")]
    Malformed {
        label: String,
        #[source]
        source: midly::Error,
    },

    #[error("MIDI source {0} is empty")]
    Empty(String),
}

/// The audio backend could not reach a running state.
///
/// Recoverable only through another user-initiated `play()`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AudioInitError {
    #[error("no audio output device available")]
    NoDevice,

    #[error("audio device configuration failed: {0}")]
    Config(String),

    #[error("audio stream could not be built: {0}")]
    Stream(String),

    #[error("audio stream refused to start: {0}")]
    NotRunning(String),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ScheduleError {
    #[error("note {index} of track {track} has a non-finite time ({time})")]
    NonFiniteTime { track: usize, index: usize, time: f64 },
}

/// Playback could not continue: a trigger failed or the part never started.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlaybackError {
    #[error("voice event queue is full")]
    QueueFull,

    #[error("audio stream failed: {0}")]
    StreamFailed(String),

    #[error("scheduler thread could not be started: {0}")]
    Spawn(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("RON error: {0}")]
    Ron(#[from] ron::error::SpannedError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    AudioInit(#[from] AudioInitError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_failure_reads_through_umbrella() {
        let err = Error::from(PlaybackError::Spawn("resource temporarily unavailable".into()));
        assert!(matches!(err, Error::Playback(PlaybackError::Spawn(_))));
        assert_eq!(
            err.to_string(),
            "scheduler thread could not be started: resource temporarily unavailable"
        );
    }
}

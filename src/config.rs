use crate::cache::CacheConfig;
use crate::chunking::ChunkStoreConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Playback scheduling parameters shared by every channel
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackConfig {
    /// Length of each fetched window in seconds (default: 5.0)
    pub window_seconds: f64,
    /// How long before the previous window runs out the next fetch starts (default: 2.0)
    pub fetch_lead_seconds: f64,
    /// Interval between position events while playing (default: 250ms)
    pub progress_interval: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        PlaybackConfig {
            window_seconds: 5.0,
            fetch_lead_seconds: 2.0,
            progress_interval: Duration::from_millis(250),
        }
    }
}

impl PlaybackConfig {
    /// Fix up values that would break the look-ahead loop
    ///
    /// The window must be positive and the lead strictly shorter than it,
    /// otherwise fetches would be requested before the previous window starts.
    pub fn normalized(mut self) -> Self {
        let defaults = PlaybackConfig::default();
        if !(self.window_seconds.is_finite() && self.window_seconds > 0.0) {
            warn!(
                "Invalid window length {}s, using {}s",
                self.window_seconds, defaults.window_seconds
            );
            self.window_seconds = defaults.window_seconds;
        }
        if !(self.fetch_lead_seconds.is_finite() && self.fetch_lead_seconds >= 0.0) {
            self.fetch_lead_seconds = 0.0;
        }
        if self.fetch_lead_seconds >= self.window_seconds {
            let clamped = self.window_seconds * 0.5;
            warn!(
                "Fetch lead {}s is not shorter than the {}s window, clamping to {}s",
                self.fetch_lead_seconds, self.window_seconds, clamped
            );
            self.fetch_lead_seconds = clamped;
        }
        if self.progress_interval.is_zero() {
            self.progress_interval = defaults.progress_interval;
        }
        self
    }
}

/// Application configuration
/// In debug builds: loads a .env file first, then reads environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// SQLite database holding chunk and metadata records
    pub database_path: PathBuf,
    pub chunk_store: ChunkStoreConfig,
    pub playback: PlaybackConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: default_database_path(),
            chunk_store: ChunkStoreConfig::default(),
            playback: PlaybackConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration based on build mode
    pub fn load() -> Self {
        #[cfg(debug_assertions)]
        {
            if dotenvy::dotenv().is_ok() {
                info!("Config: Dev mode activated - loaded .env file");
            }
        }

        Self::from_env()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let database_path = lookup("STEMDECK_DATABASE_PATH")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.database_path);

        let mut chunk_store = defaults.chunk_store;
        chunk_store.chunk_seconds =
            parse_or(&lookup, "STEMDECK_CHUNK_SECONDS", chunk_store.chunk_seconds);
        if chunk_store.chunk_seconds == 0 {
            warn!("Config: STEMDECK_CHUNK_SECONDS must be positive, using 5");
            chunk_store.chunk_seconds = 5;
        }
        chunk_store.cache = CacheConfig {
            max_chunks: parse_or(
                &lookup,
                "STEMDECK_CACHE_MAX_CHUNKS",
                chunk_store.cache.max_chunks,
            ),
            max_bytes: parse_or(
                &lookup,
                "STEMDECK_CACHE_MAX_BYTES",
                chunk_store.cache.max_bytes,
            ),
        };

        let playback = PlaybackConfig {
            window_seconds: parse_or(
                &lookup,
                "STEMDECK_WINDOW_SECONDS",
                defaults.playback.window_seconds,
            ),
            fetch_lead_seconds: parse_or(
                &lookup,
                "STEMDECK_FETCH_LEAD_SECONDS",
                defaults.playback.fetch_lead_seconds,
            ),
            progress_interval: Duration::from_millis(parse_or(
                &lookup,
                "STEMDECK_PROGRESS_INTERVAL_MS",
                defaults.playback.progress_interval.as_millis() as u64,
            )),
        }
        .normalized();

        info!(
            "Config: database {}, {}s chunks, {}s windows",
            database_path.display(),
            chunk_store.chunk_seconds,
            playback.window_seconds
        );

        Self {
            database_path,
            chunk_store,
            playback,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + std::fmt::Display + Copy,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Config: could not parse {}={:?}, using {}", key, raw, default);
                default
            }
        },
        None => default,
    }
}

/// `~/.stemdeck/chunks.db`, or the temp dir when there is no home directory
fn default_database_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".stemdeck")
        .join("chunks.db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.chunk_store.chunk_seconds, 5);
        assert_eq!(config.chunk_store.cache.max_chunks, 32);
        assert_eq!(config.playback, PlaybackConfig::default());
        assert!(config.database_path.ends_with(".stemdeck/chunks.db"));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("STEMDECK_DATABASE_PATH", "/tmp/stems.db"),
            ("STEMDECK_CHUNK_SECONDS", "10"),
            ("STEMDECK_WINDOW_SECONDS", "8"),
            ("STEMDECK_FETCH_LEAD_SECONDS", "3.5"),
            ("STEMDECK_PROGRESS_INTERVAL_MS", "100"),
        ]));
        assert_eq!(config.database_path, PathBuf::from("/tmp/stems.db"));
        assert_eq!(config.chunk_store.chunk_seconds, 10);
        assert_eq!(config.playback.window_seconds, 8.0);
        assert_eq!(config.playback.fetch_lead_seconds, 3.5);
        assert_eq!(config.playback.progress_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = Config::from_lookup(lookup_from(&[
            ("STEMDECK_CHUNK_SECONDS", "five"),
            ("STEMDECK_CACHE_MAX_BYTES", "-1"),
        ]));
        assert_eq!(config.chunk_store.chunk_seconds, 5);
        assert_eq!(config.chunk_store.cache.max_bytes, 64 * 1024 * 1024);
    }

    #[test]
    fn test_lead_clamped_below_window() {
        let config = PlaybackConfig {
            window_seconds: 4.0,
            fetch_lead_seconds: 6.0,
            ..Default::default()
        }
        .normalized();
        assert_eq!(config.fetch_lead_seconds, 2.0);

        let config = PlaybackConfig {
            window_seconds: -1.0,
            ..Default::default()
        }
        .normalized();
        assert_eq!(config.window_seconds, 5.0);
    }
}

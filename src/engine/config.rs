//! Configuration for a player session.

use std::time::Duration;

use tracing::warn;
use url::Url;

pub const DEFAULT_STUDIO_URL: &str = "ws://localhost:8000/ws/studio";
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";
pub const DEFAULT_METER_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// Orchestrator state channel endpoint.
    pub studio_url: String,
    /// Base for relative `track_url`s. Without one only absolute URLs load.
    pub backend_url: Option<Url>,
    pub meter_interval: Duration,
    pub initial_volume: f64,
    pub output_device_id: Option<cpal::DeviceId>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            studio_url: DEFAULT_STUDIO_URL.to_string(),
            backend_url: Url::parse(DEFAULT_BACKEND_URL).ok(),
            meter_interval: DEFAULT_METER_INTERVAL,
            initial_volume: 1.0,
            output_device_id: None,
        }
    }
}

impl PlayerConfig {
    /// Reads `AURA_STUDIO_URL`, `AURA_BACKEND_URL` (or `BACKEND_PUBLIC_BASE_URL`),
    /// `AURA_METER_INTERVAL_MS` and `AURA_INITIAL_VOLUME`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("AURA_STUDIO_URL") {
            match Url::parse(&url) {
                Ok(parsed) if matches!(parsed.scheme(), "ws" | "wss") => config.studio_url = url,
                _ => warn!("Ignoring AURA_STUDIO_URL={url:?}: not a ws:// or wss:// URL"),
            }
        }

        if let Some(url) = lookup("AURA_BACKEND_URL").or_else(|| lookup("BACKEND_PUBLIC_BASE_URL")) {
            match Url::parse(&url) {
                Ok(parsed) => config.backend_url = Some(parsed),
                Err(e) => warn!("Ignoring backend URL {url:?}: {e}"),
            }
        }

        if let Some(value) = lookup("AURA_METER_INTERVAL_MS") {
            match value.parse::<u64>() {
                Ok(ms) if ms > 0 => config.meter_interval = Duration::from_millis(ms),
                _ => warn!("Ignoring AURA_METER_INTERVAL_MS={value:?}"),
            }
        }

        if let Some(value) = lookup("AURA_INITIAL_VOLUME") {
            match value.parse::<f64>() {
                Ok(volume) if (0.0..=1.0).contains(&volume) => config.initial_volume = volume,
                _ => warn!("Ignoring AURA_INITIAL_VOLUME={value:?}: expected 0..1"),
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PlayerConfig::from_lookup(|_| None);
        assert_eq!(config.studio_url, DEFAULT_STUDIO_URL);
        assert_eq!(
            config.backend_url.as_ref().map(Url::as_str),
            Some("http://localhost:8000/")
        );
        assert_eq!(config.meter_interval, Duration::from_millis(16));
        assert_eq!(config.initial_volume, 1.0);
        assert_eq!(
            PlayerConfig::default().backend_url,
            Url::parse(DEFAULT_BACKEND_URL).ok()
        );
    }

    #[test]
    fn test_overrides() {
        let config = PlayerConfig::from_lookup(lookup(&[
            ("AURA_STUDIO_URL", "wss://studio.example/ws/studio"),
            ("BACKEND_PUBLIC_BASE_URL", "https://api.example"),
            ("AURA_METER_INTERVAL_MS", "20"),
            ("AURA_INITIAL_VOLUME", "0.4"),
        ]));
        assert_eq!(config.studio_url, "wss://studio.example/ws/studio");
        assert_eq!(
            config.backend_url.as_ref().map(Url::as_str),
            Some("https://api.example/")
        );
        assert_eq!(config.meter_interval, Duration::from_millis(20));
        assert_eq!(config.initial_volume, 0.4);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = PlayerConfig::from_lookup(lookup(&[
            ("AURA_STUDIO_URL", "http://not-a-socket"),
            ("AURA_BACKEND_URL", "::nope::"),
            ("AURA_METER_INTERVAL_MS", "0"),
            ("AURA_INITIAL_VOLUME", "7"),
        ]));
        assert_eq!(config.studio_url, DEFAULT_STUDIO_URL);
        assert_eq!(
            config.backend_url.as_ref().map(Url::as_str),
            Some("http://localhost:8000/")
        );
        assert_eq!(config.meter_interval, DEFAULT_METER_INTERVAL);
        assert_eq!(config.initial_volume, 1.0);
    }
}

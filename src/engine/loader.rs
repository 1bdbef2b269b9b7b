//! Asynchronous track fetching and decoding.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

use super::error::PlayerError;
use crate::audio::{AudioFileReader, CHANNELS, SAMPLE_RATE, Track};

/// Completion of one load request.
#[derive(Debug)]
pub struct LoadOutcome {
    pub generation: u64,
    pub url: String,
    pub result: Result<Arc<Track>, PlayerError>,
}

/// Starts loads. Completions are reported out of band as [`LoadOutcome`]s.
pub trait TrackLoader {
    /// Begins loading `url`. A previous request still in flight is abandoned.
    fn request(&mut self, url: &str, generation: u64);
}

/// Fetches over HTTP(S), or reads `file://` URLs from disk, then decodes on
/// the blocking pool.
pub struct HttpTrackLoader {
    client: reqwest::Client,
    outcomes: mpsc::UnboundedSender<LoadOutcome>,
    in_flight: Option<JoinHandle<()>>,
}

impl HttpTrackLoader {
    pub fn new(outcomes: mpsc::UnboundedSender<LoadOutcome>) -> Self {
        Self {
            client: reqwest::Client::new(),
            outcomes,
            in_flight: None,
        }
    }
}

impl TrackLoader for HttpTrackLoader {
    fn request(&mut self, url: &str, generation: u64) {
        if let Some(previous) = self.in_flight.take() {
            previous.abort();
        }

        let client = self.client.clone();
        let outcomes = self.outcomes.clone();
        let url = url.to_string();
        self.in_flight = Some(tokio::spawn(async move {
            let result = load_track(&client, &url)
                .await
                .map(Arc::new)
                .map_err(|e| PlayerError::MediaLoad(format!("{url}: {e:#}")));
            let _ = outcomes.send(LoadOutcome {
                generation,
                url,
                result,
            });
        }));
    }
}

impl Drop for HttpTrackLoader {
    fn drop(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.abort();
        }
    }
}

/// Last path segment of `url`, used as the display name and format hint.
pub fn track_name(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| url.rsplit('/').next().unwrap_or(url).to_string())
}

async fn load_track(client: &reqwest::Client, url: &str) -> Result<Track> {
    let parsed = Url::parse(url).context("Invalid track URL")?;
    let bytes = if parsed.scheme() == "file" {
        let path = parsed
            .to_file_path()
            .map_err(|_| anyhow::anyhow!("Not a local path"))?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?
    } else {
        debug!("Fetching {url}");
        client
            .get(parsed)
            .send()
            .await
            .context("Request failed")?
            .error_for_status()
            .context("Server rejected the request")?
            .bytes()
            .await
            .context("Failed to read response body")?
            .to_vec()
    };

    let name = track_name(url);
    let size = bytes.len();
    let track = tokio::task::spawn_blocking(move || {
        AudioFileReader::from_bytes(bytes, &name)?.decode_all_resampled::<CHANNELS, SAMPLE_RATE>()
    })
    .await
    .context("Decoder task failed")??;

    info!(
        "Loaded {} ({} bytes, {:.1}s)",
        track.name(),
        size,
        track.duration_secs()
    );
    Ok(track)
}

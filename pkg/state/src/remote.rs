use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pkg_constants::api::{ORIGIN_HEADER, WATCH_RECONNECT_DELAY_MS};
use pkg_constants::state::EVENT_BROADCAST_CAPACITY;

use crate::medium::Medium;
use crate::watch::{ChangeEvent, ChangeSignal};

/// Medium handle for a peer running in its own process, talking to a
/// `tablock-host` over HTTP.
///
/// Change notifications arrive over the host's SSE watch stream and are
/// re-broadcast locally. The stream reconnects after a short delay and resumes
/// from the last sequence number it saw.
pub struct RemoteMedium {
    client: reqwest::Client,
    base_url: String,
    origin: String,
    events: broadcast::Sender<ChangeEvent>,
    watcher: JoinHandle<()>,
}

impl RemoteMedium {
    /// Connect to the host at `base_url`. Must be called inside a Tokio runtime.
    pub fn connect(base_url: &str, origin: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().build()?;
        let base_url = base_url.trim_end_matches('/').to_string();
        let (events, _) = broadcast::channel(EVENT_BROADCAST_CAPACITY);
        let watcher = tokio::spawn(watch_loop(
            client.clone(),
            base_url.clone(),
            events.clone(),
        ));

        Ok(Self {
            client,
            base_url,
            origin: origin.into(),
            events,
            watcher,
        })
    }

    fn kv_url(&self, key: &str) -> String {
        format!("{}/api/v1/kv/{}", self.base_url, key)
    }
}

impl Drop for RemoteMedium {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

#[async_trait]
impl Medium for RemoteMedium {
    fn origin(&self) -> &str {
        &self.origin
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let resp = self.client.get(self.kv_url(key)).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => Ok(Some(resp.bytes().await?.to_vec())),
            s => Err(anyhow::anyhow!("host returned {} for GET {}", s, key)),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        let resp = self
            .client
            .put(self.kv_url(key))
            .header(ORIGIN_HEADER, &self.origin)
            .body(value.to_vec())
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(anyhow::anyhow!(
                "host returned {} for PUT {}",
                resp.status(),
                key
            ));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let resp = self
            .client
            .delete(self.kv_url(key))
            .header(ORIGIN_HEADER, &self.origin)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(anyhow::anyhow!(
                "host returned {} for DELETE {}",
                resp.status(),
                key
            ));
        }
        Ok(())
    }

    async fn take(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let resp = self
            .client
            .post(format!("{}/take", self.kv_url(key)))
            .header(ORIGIN_HEADER, &self.origin)
            .send()
            .await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => Ok(Some(resp.bytes().await?.to_vec())),
            s => Err(anyhow::anyhow!("host returned {} for TAKE {}", s, key)),
        }
    }

    fn subscribe(&self, key: &str) -> ChangeSignal {
        ChangeSignal::new(self.events.subscribe(), &self.origin, key)
    }
}

async fn watch_loop(
    client: reqwest::Client,
    base_url: String,
    events: broadcast::Sender<ChangeEvent>,
) {
    let mut last_seq: Option<u64> = None;
    loop {
        match stream_events(&client, &base_url, &mut last_seq, &events).await {
            Ok(()) => debug!("Watch stream from {} ended", base_url),
            Err(e) => warn!("Watch stream from {} failed: {}", base_url, e),
        }
        tokio::time::sleep(Duration::from_millis(WATCH_RECONNECT_DELAY_MS)).await;
    }
}

/// Follow one SSE connection until it ends.
async fn stream_events(
    client: &reqwest::Client,
    base_url: &str,
    last_seq: &mut Option<u64>,
    events: &broadcast::Sender<ChangeEvent>,
) -> anyhow::Result<()> {
    // Without a sequence number the host streams live events only.
    let url = match last_seq {
        Some(seq) => format!("{}/api/v1/watch?seq={}", base_url, seq),
        None => format!("{}/api/v1/watch", base_url),
    };
    let mut resp = client.get(&url).send().await?.error_for_status()?;
    info!("Watching {} for changes", url);

    let mut buf: Vec<u8> = Vec::new();
    while let Some(chunk) = resp.chunk().await? {
        buf.extend_from_slice(&chunk);
        while let Some(pos) = find_frame_end(&buf) {
            let frame: Vec<u8> = buf.drain(..pos + 2).collect();
            if let Some(event) = parse_sse_frame(&String::from_utf8_lossy(&frame)) {
                *last_seq = Some(event.seq);
                // No local subscribers is fine.
                let _ = events.send(event);
            }
        }
    }
    Ok(())
}

fn find_frame_end(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

/// Parse one SSE frame (`data:` lines terminated by a blank line).
/// Comments and keep-alives yield `None`.
fn parse_sse_frame(frame: &str) -> Option<ChangeEvent> {
    let data: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        .collect();
    if data.is_empty() {
        return None;
    }
    match serde_json::from_str(&data.join("\n")) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("Dropping malformed watch event: {}", e);
            None
        }
    }
}

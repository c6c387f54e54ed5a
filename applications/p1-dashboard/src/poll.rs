use crate::dashboard::DashboardHandle;
use crate::error::{AppError, Result};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// What the poll loop needs to know, published by the dashboard on every change.
#[derive(Debug, Clone, PartialEq)]
pub struct PollSettings {
    pub url: String,
    pub interval: Duration,
    pub connected: bool,
}

impl PollSettings {
    pub fn new(device_host: &str, interval_secs: f64, connected: bool) -> Self {
        Self {
            url: device_url(device_host),
            interval: Duration::from_secs_f64(interval_secs),
            connected,
        }
    }
}

/// `http://<host>/api/v1/data`, keeping an explicit scheme if one was given.
pub fn device_url(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        format!("{host}/api/v1/data")
    } else {
        format!("http://{host}/api/v1/data")
    }
}

#[derive(Clone)]
pub struct DeviceClient {
    http: reqwest::Client,
}

impl DeviceClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    /// One telemetry snapshot. Bad status, bad JSON or a non-object body are errors.
    pub async fn fetch(&self, url: &str) -> Result<Value> {
        let payload: Value = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if !payload.is_object() {
            return Err(AppError::Payload(format!(
                "expected a JSON object from {url}"
            )));
        }
        Ok(payload)
    }
}

/// Poll the device on a timer and hand every snapshot to the dashboard.
///
/// Failed ticks are logged and skipped. A tick always finishes before the next
/// one starts; ticks missed while a request was slow are dropped. Returns when
/// the dashboard goes away.
pub async fn run_poll_loop(
    client: DeviceClient,
    mut settings: watch::Receiver<PollSettings>,
    dashboard: DashboardHandle,
) {
    loop {
        let current = settings.borrow_and_update().clone();

        if !current.connected {
            info!("poller disconnected; waiting for connect");
            if settings.changed().await.is_err() {
                return;
            }
            continue;
        }

        info!(url = %current.url, interval = ?current.interval, "polling device");
        let mut ticker = tokio::time::interval(current.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = settings.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    break;
                }
                _ = ticker.tick() => {
                    match client.fetch(&current.url).await {
                        Ok(payload) => {
                            if dashboard.ingest(payload).await.is_err() {
                                debug!("dashboard stopped; ending poll loop");
                                return;
                            }
                        }
                        Err(e) => warn!(url = %current.url, error = %e, "poll failed"),
                    }
                }
            }
        }
    }
}

pub mod state;

pub use state::{DashboardState, Ingested, PendingSelection};

use crate::config::WindowConfig;
use crate::error::{AppError, Result};
use crate::ingest::StoredSample;
use crate::poll::PollSettings;
use crate::repositories::{DashboardSettings, SampleLog, SettingsPatch, SettingsRepository};
use crate::sample::Sample;
use crate::series::{Axis, ChartSet, Point};
use crate::stats::StatsSnapshot;
use crate::timeframe::{ResolvedRange, Selection, Timeframe};
use chrono::Local;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const COMMAND_BUFFER: usize = 64;
const LIVE_BUFFER: usize = 256;

/// Pushed to live subscribers for every ingested sample.
#[derive(Debug, Clone, Serialize)]
pub struct LiveUpdate {
    pub timestamp: i64,
    pub timeframe: Timeframe,
    pub power_import: Point,
    pub power_export: Point,
    pub gas: Option<Point>,
    pub axis: Axis,
    pub stats: Option<StatsSnapshot>,
    /// The open historical view picked this sample up.
    pub history_changed: bool,
}

/// The dashboard after a timeframe switch.
#[derive(Debug, Clone, Serialize)]
pub struct SelectionView {
    pub timeframe: Timeframe,
    pub range: ResolvedRange,
    pub charts: ChartSet,
    pub stats: Option<StatsSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStatus {
    pub timeframe: Timeframe,
    pub range: Option<ResolvedRange>,
    pub connected: bool,
    pub settings: DashboardSettings,
}

#[derive(Debug)]
enum Command {
    Ingest(Value),
    SelectTimeframe {
        timeframe: Timeframe,
        selection: Option<Selection>,
        reply: oneshot::Sender<Result<SelectionView>>,
    },
    HistoryLoaded {
        generation: u64,
        result: Result<Vec<StoredSample>>,
    },
    Charts(oneshot::Sender<ChartSet>),
    Stats(oneshot::Sender<Option<StatsSnapshot>>),
    Status(oneshot::Sender<DashboardStatus>),
    UpdateSettings {
        patch: SettingsPatch,
        reply: oneshot::Sender<Result<DashboardSettings>>,
    },
    SetConnected {
        connected: bool,
        reply: oneshot::Sender<bool>,
    },
}

/// Cheap, cloneable access to the running dashboard.
#[derive(Clone)]
pub struct DashboardHandle {
    commands: mpsc::Sender<Command>,
    live: broadcast::Sender<LiveUpdate>,
}

impl DashboardHandle {
    /// Queue one raw device payload. Errors only when the dashboard has stopped.
    pub async fn ingest(&self, payload: Value) -> Result<()> {
        self.send(Command::Ingest(payload)).await
    }

    pub async fn select_timeframe(
        &self,
        timeframe: Timeframe,
        selection: Option<Selection>,
    ) -> Result<SelectionView> {
        self.request(|reply| Command::SelectTimeframe {
            timeframe,
            selection,
            reply,
        })
        .await?
    }

    pub async fn charts(&self) -> Result<ChartSet> {
        self.request(Command::Charts).await
    }

    pub async fn stats(&self) -> Result<Option<StatsSnapshot>> {
        self.request(Command::Stats).await
    }

    pub async fn status(&self) -> Result<DashboardStatus> {
        self.request(Command::Status).await
    }

    pub async fn settings(&self) -> Result<DashboardSettings> {
        Ok(self.status().await?.settings)
    }

    pub async fn update_settings(&self, patch: SettingsPatch) -> Result<DashboardSettings> {
        self.request(|reply| Command::UpdateSettings { patch, reply })
            .await?
    }

    pub async fn set_connected(&self, connected: bool) -> Result<bool> {
        self.request(|reply| Command::SetConnected { connected, reply })
            .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LiveUpdate> {
        self.live.subscribe()
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| AppError::Unavailable("dashboard stopped".to_string()))
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx)).await?;
        rx.await
            .map_err(|_| AppError::Unavailable("dashboard dropped the request".to_string()))
    }
}

struct Waiter {
    generation: u64,
    reply: oneshot::Sender<Result<SelectionView>>,
}

/// Owns every piece of mutable dashboard state and serves commands one at a time.
pub struct Dashboard {
    state: DashboardState,
    settings: DashboardSettings,
    connected: bool,
    log: Arc<dyn SampleLog>,
    settings_repo: SettingsRepository,
    poll_tx: watch::Sender<PollSettings>,
    live: broadcast::Sender<LiveUpdate>,
    commands: mpsc::Receiver<Command>,
    self_tx: mpsc::WeakSender<Command>,
    waiter: Option<Waiter>,
}

impl Dashboard {
    /// Build the actor and the handle that drives it. The actor only holds a
    /// weak reference to its own queue, so it stops once every handle is gone.
    pub fn new(
        window: &WindowConfig,
        settings: DashboardSettings,
        connected: bool,
        log: Arc<dyn SampleLog>,
        settings_repo: SettingsRepository,
    ) -> (Self, DashboardHandle) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (live, _) = broadcast::channel(LIVE_BUFFER);
        let (poll_tx, _) = watch::channel(PollSettings::new(
            &settings.device_host,
            settings.poll_interval_secs,
            connected,
        ));

        let dashboard = Self {
            state: DashboardState::new(window, settings.caching_enabled),
            settings,
            connected,
            log,
            settings_repo,
            poll_tx,
            live: live.clone(),
            commands,
            self_tx: commands_tx.downgrade(),
            waiter: None,
        };
        let handle = DashboardHandle {
            commands: commands_tx,
            live,
        };
        (dashboard, handle)
    }

    /// Continue gas deltas from a previously persisted reading.
    pub fn seed_gas(&mut self, sample: &Sample) {
        self.state.seed_gas(sample);
    }

    /// Device address, interval and connect flag for the poll loop.
    pub fn poll_settings(&self) -> watch::Receiver<PollSettings> {
        self.poll_tx.subscribe()
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!(
            caching = self.state.caching_enabled(),
            connected = self.connected,
            "dashboard started"
        );
        while let Some(command) = self.commands.recv().await {
            self.handle_command(command).await;
        }
        info!("dashboard stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Ingest(payload) => self.ingest(payload).await,
            Command::SelectTimeframe {
                timeframe,
                selection,
                reply,
            } => self.select(timeframe, selection, reply),
            Command::HistoryLoaded { generation, result } => {
                self.history_loaded(generation, result)
            }
            Command::Charts(reply) => {
                let _ = reply.send(self.state.charts(&Local::now()));
            }
            Command::Stats(reply) => {
                let _ = reply.send(self.state.stats().cloned());
            }
            Command::Status(reply) => {
                let _ = reply.send(DashboardStatus {
                    timeframe: self.state.timeframe(),
                    range: self.state.current_range(&Local::now()),
                    connected: self.connected,
                    settings: self.settings.clone(),
                });
            }
            Command::UpdateSettings { patch, reply } => {
                let _ = reply.send(self.update_settings(patch).await);
            }
            Command::SetConnected { connected, reply } => {
                if connected != self.connected {
                    info!(connected, "connection toggled");
                }
                self.connected = connected;
                self.poll_tx.send_if_modified(|s| {
                    let changed = s.connected != connected;
                    s.connected = connected;
                    changed
                });
                let _ = reply.send(connected);
            }
        }
    }

    async fn ingest(&mut self, payload: Value) {
        let now = Local::now();
        let ingested = self
            .state
            .ingest(&payload, now.timestamp_millis(), &now);
        let stored = &ingested.stored;
        debug!(timestamp = stored.timestamp, gas_delta = ?stored.gas_delta, "sample ingested");

        if self.state.caching_enabled() {
            if let Err(e) = self.log.append(stored).await {
                warn!(timestamp = stored.timestamp, error = %e, "failed to persist sample");
            }
        }

        let update = LiveUpdate {
            timestamp: stored.timestamp,
            timeframe: self.state.timeframe(),
            power_import: ingested.live.power_import,
            power_export: ingested.live.power_export,
            gas: ingested.live.gas,
            axis: self.state.live_axis(&now),
            stats: self.state.stats().cloned(),
            history_changed: ingested.history_changed,
        };
        // No subscribers is fine.
        let _ = self.live.send(update);
    }

    fn select(
        &mut self,
        timeframe: Timeframe,
        selection: Option<Selection>,
        reply: oneshot::Sender<Result<SelectionView>>,
    ) {
        let now = Local::now();
        let pending = match self.state.select(timeframe, selection, &now) {
            Ok(pending) => pending,
            Err(e) => {
                debug!(%timeframe, error = %e, "selection refused");
                let _ = reply.send(Err(e));
                return;
            }
        };
        self.supersede_waiter();

        let Some(pending) = pending else {
            let range = self
                .state
                .range()
                .cloned()
                .ok_or_else(|| AppError::Selection(format!("no range for {timeframe}")));
            let _ = reply.send(range.map(|range| SelectionView {
                timeframe,
                range,
                charts: self.state.charts(&now),
                stats: self.state.stats().cloned(),
            }));
            return;
        };

        let generation = pending.generation;
        info!(%timeframe, generation, "loading history");
        self.waiter = Some(Waiter { generation, reply });

        let log = Arc::clone(&self.log);
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            let result = log.get_all().await;
            if let Some(tx) = self_tx.upgrade() {
                let _ = tx.send(Command::HistoryLoaded { generation, result }).await;
            }
        });
    }

    fn history_loaded(&mut self, generation: u64, result: Result<Vec<StoredSample>>) {
        let rendered = match result {
            Ok(samples) => self
                .state
                .complete_history(generation, samples)
                .map(|view| view.charts),
            Err(e) => {
                warn!(generation, error = %e, "failed to load history");
                self.state.fail_history(generation)
            }
        };

        let charts = match rendered {
            Ok(charts) => charts,
            Err(e) => {
                debug!(generation, error = %e, "discarding history load");
                return;
            }
        };

        if self.waiter.as_ref().map(|w| w.generation) != Some(generation) {
            return;
        }
        let Some(waiter) = self.waiter.take() else {
            return;
        };
        let view = self.state.range().cloned().map(|range| SelectionView {
            timeframe: self.state.timeframe(),
            range,
            charts,
            stats: self.state.stats().cloned(),
        });
        let _ = waiter.reply.send(view.ok_or(AppError::Superseded));
    }

    async fn update_settings(&mut self, patch: SettingsPatch) -> Result<DashboardSettings> {
        let next = self.settings.apply(&patch)?;
        self.settings_repo.save(&next).await?;

        if next.caching_enabled != self.settings.caching_enabled {
            info!(caching = next.caching_enabled, "caching toggled");
            self.state.set_caching(next.caching_enabled);
            let generation = self.state.generation();
            if self.waiter.as_ref().is_some_and(|w| w.generation != generation) {
                self.supersede_waiter();
            }
        }

        let poll = PollSettings::new(&next.device_host, next.poll_interval_secs, self.connected);
        self.poll_tx.send_if_modified(|current| {
            if *current == poll {
                return false;
            }
            *current = poll;
            true
        });
        self.settings = next.clone();
        Ok(next)
    }

    fn supersede_waiter(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            debug!(generation = waiter.generation, "history request superseded");
            let _ = waiter.reply.send(Err(AppError::Superseded));
        }
    }
}

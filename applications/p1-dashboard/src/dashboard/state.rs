use crate::config::WindowConfig;
use crate::error::{AppError, Result};
use crate::history::{self, HistoryView};
use crate::ingest::{Ingestor, StoredSample};
use crate::sample::Sample;
use crate::series::{Axis, ChartSet, Point};
use crate::stats::{StatsPanel, StatsSnapshot};
use crate::timeframe::{resolve_range, ResolvedRange, Selection, Timeframe};
use crate::window::{LivePoints, LiveSeries};
use chrono::{DateTime, TimeZone};
use serde_json::Value;

/// Result of ingesting one device payload.
#[derive(Debug, Clone)]
pub struct Ingested {
    pub stored: StoredSample,
    pub live: LivePoints,
    /// Set when the sample extended the historical range on screen.
    pub history_changed: bool,
}

/// A selection waiting for its history load.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSelection {
    pub generation: u64,
    pub range: ResolvedRange,
}

/// All mutable dashboard state. Owned by exactly one task.
#[derive(Debug)]
pub struct DashboardState {
    timeframe: Timeframe,
    range: Option<ResolvedRange>,
    caching_enabled: bool,
    ingestor: Ingestor,
    live: LiveSeries,
    stats: StatsPanel,
    /// In-range samples ingested while a history load is in flight
    pending: Vec<StoredSample>,
    history_charts: Option<ChartSet>,
    generation: u64,
}

impl DashboardState {
    pub fn new(window: &WindowConfig, caching_enabled: bool) -> Self {
        Self {
            timeframe: Timeframe::Now,
            range: None,
            caching_enabled,
            ingestor: Ingestor::new(),
            live: LiveSeries::new(window),
            stats: StatsPanel::default(),
            pending: Vec::new(),
            history_charts: None,
            generation: 0,
        }
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn range(&self) -> Option<&ResolvedRange> {
        self.range.as_ref()
    }

    /// The range on screen as of `now`. The "now" view ends at the current
    /// instant, so it is resolved afresh on every call.
    pub fn current_range<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<ResolvedRange> {
        match self.timeframe {
            Timeframe::Now => resolve_range(Timeframe::Now, now, None).ok(),
            _ => self.range.clone(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn caching_enabled(&self) -> bool {
        self.caching_enabled
    }

    pub fn stats(&self) -> Option<&StatsSnapshot> {
        self.stats.current()
    }

    pub fn seed_gas(&mut self, sample: &Sample) {
        self.ingestor.seed_gas(sample);
    }

    /// Normalize, stamp and distribute one payload.
    ///
    /// The live window is always fed. The stats panel follows live data in the
    /// "now" view; in a historical view it only moves when the new sample falls
    /// inside the range being shown. Ingestion timestamps only increase, so an
    /// in-range sample is appended to the rendered series as is. Samples outside
    /// the range are not kept.
    pub fn ingest<Tz: TimeZone>(
        &mut self,
        raw: &Value,
        wall_ms: i64,
        now: &DateTime<Tz>,
    ) -> Ingested {
        let stored = self.ingestor.ingest(raw, wall_ms);
        let live = self.live.push(&stored, now);

        let mut history_changed = false;
        if self.timeframe == Timeframe::Now {
            self.stats.update(&stored);
        } else if self
            .range
            .as_ref()
            .is_some_and(|r| r.contains(stored.timestamp))
        {
            match self.history_charts.as_mut() {
                Some(charts) => {
                    charts.push_power(stored.timestamp, stored.sample.active_power_kw());
                    if let Some(delta) = stored.gas_delta {
                        charts.gas.push(Point::new(stored.timestamp, delta));
                    }
                    self.stats.update(&stored);
                    history_changed = true;
                }
                None => self.pending.push(stored.clone()),
            }
        }

        Ingested {
            stored,
            live,
            history_changed,
        }
    }

    /// Switch timeframes. Historical views need caching; a refused switch
    /// leaves the previous view in place.
    ///
    /// Returns `Some` when history must be loaded before the view can render.
    pub fn select<Tz: TimeZone>(
        &mut self,
        timeframe: Timeframe,
        selection: Option<Selection>,
        now: &DateTime<Tz>,
    ) -> Result<Option<PendingSelection>> {
        if timeframe.is_historical() && !self.caching_enabled {
            return Err(AppError::Selection(format!(
                "the {timeframe} view needs local caching; enable caching to record history"
            )));
        }

        let range = resolve_range(timeframe, now, selection)?;

        self.generation += 1;
        self.timeframe = timeframe;
        self.range = Some(range.clone());
        self.history_charts = None;
        self.pending.clear();

        if timeframe.is_historical() {
            Ok(Some(PendingSelection {
                generation: self.generation,
                range,
            }))
        } else {
            Ok(None)
        }
    }

    /// Render a finished history load, unless a newer selection replaced it.
    ///
    /// Samples ingested during the load are merged in; the loaded snapshot may
    /// or may not already hold them.
    pub fn complete_history(
        &mut self,
        generation: u64,
        samples: Vec<StoredSample>,
    ) -> Result<HistoryView> {
        if generation != self.generation {
            return Err(AppError::Superseded);
        }
        let range = self
            .range
            .as_ref()
            .filter(|_| self.timeframe.is_historical())
            .ok_or(AppError::Superseded)?;

        let mut in_range: Vec<StoredSample> = samples
            .into_iter()
            .filter(|s| range.contains(s.timestamp))
            .collect();
        in_range.append(&mut self.pending);
        in_range.sort_by_key(|s| s.timestamp);
        in_range.dedup_by_key(|s| s.timestamp);

        let view = history::render(&in_range, range);
        self.stats.apply_history(&view);
        self.history_charts = Some(view.charts.clone());
        Ok(view)
    }

    /// A history load failed; show empty charts and keep the stats panel.
    pub fn fail_history(&mut self, generation: u64) -> Result<ChartSet> {
        self.complete_history(generation, Vec::new())
            .map(|view| view.charts)
    }

    /// Whatever the charts should currently show.
    pub fn charts<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> ChartSet {
        match (&self.history_charts, self.timeframe) {
            (_, Timeframe::Now) => self.live.charts(now),
            (Some(charts), _) => charts.clone(),
            (None, _) => ChartSet::empty(self.live.axis(now)),
        }
    }

    pub fn live_axis<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Axis {
        self.live.axis(now)
    }

    /// Turning caching off drops back to the live view.
    pub fn set_caching(&mut self, enabled: bool) {
        self.caching_enabled = enabled;
        if !enabled && self.timeframe.is_historical() {
            self.generation += 1;
            self.timeframe = Timeframe::Now;
            self.range = None;
            self.pending.clear();
            self.history_charts = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::Point;
    use chrono::{Duration, FixedOffset};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn tz() -> FixedOffset {
        FixedOffset::east_opt(3600).unwrap()
    }

    fn state(caching: bool) -> DashboardState {
        DashboardState::new(&WindowConfig::default(), caching)
    }

    #[test]
    fn test_repeated_gas_timestamp_adds_no_gas_point() {
        let mut state = state(false);
        let now = tz().with_ymd_and_hms(2023, 1, 1, 13, 0, 0).unwrap();
        let payloads = [
            json!({"total_gas_m3": 10, "gas_timestamp": "230101120000"}),
            json!({"total_gas_m3": 10, "gas_timestamp": "230101120000"}),
            json!({"total_gas_m3": 12, "gas_timestamp": "230101130000"}),
        ];
        for (i, raw) in payloads.iter().enumerate() {
            let at = now + Duration::seconds(i as i64);
            state.ingest(raw, at.timestamp_millis(), &at);
        }

        let gas: Vec<Option<f64>> = state.charts(&now).gas.iter().map(|p| p.value).collect();
        assert_eq!(gas, vec![Some(0.0), Some(2.0)]);
    }

    #[test]
    fn test_history_needs_caching() {
        let mut state = state(false);
        let now = tz().with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap();
        state.ingest(&json!({"active_power_w": 100}), now.timestamp_millis(), &now);

        let err = state.select(Timeframe::Week, None, &now).unwrap_err();
        assert!(matches!(err, AppError::Selection(_)));
        assert_eq!(state.timeframe(), Timeframe::Now);
        assert_eq!(state.generation(), 0);
        assert_eq!(state.charts(&now).power_import.len(), 1);
    }

    #[test]
    fn test_stale_history_load_is_discarded() {
        let mut state = state(true);
        let now = tz().with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap();

        let first = state.select(Timeframe::Week, None, &now).unwrap().unwrap();
        let second = state.select(Timeframe::Month, None, &now).unwrap().unwrap();
        assert!(second.generation > first.generation);

        let err = state.complete_history(first.generation, Vec::new()).unwrap_err();
        assert!(matches!(err, AppError::Superseded));

        let view = state.complete_history(second.generation, Vec::new()).unwrap();
        assert!(view.charts.is_empty());
        assert_eq!(state.timeframe(), Timeframe::Month);
    }

    #[test]
    fn test_empty_history_keeps_stats() {
        let mut state = state(true);
        let now = tz().with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap();
        state.ingest(&json!({"active_power_w": 1234}), now.timestamp_millis(), &now);
        let before = state.stats().cloned();
        assert!(before.is_some());

        let pending = state
            .select(Timeframe::Yesterday, None, &now)
            .unwrap()
            .unwrap();
        let view = state.complete_history(pending.generation, Vec::new()).unwrap();

        assert!(view.charts.is_empty());
        assert_eq!(state.stats().cloned(), before);
    }

    #[test]
    fn test_history_replay_matches_live_series() {
        let mut state = state(true);
        let start = tz().with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap();
        let payloads = [
            json!({"active_power_w": 500, "total_gas_m3": 1.0, "gas_timestamp": "240304110000"}),
            json!({"active_power_w": -200, "total_gas_m3": 1.0, "gas_timestamp": "240304110000"}),
            json!({"active_power_w": 800, "total_gas_m3": 1.75, "gas_timestamp": "240304120000"}),
        ];
        let mut stored = Vec::new();
        for (i, raw) in payloads.iter().enumerate() {
            let at = start + Duration::seconds(i as i64);
            stored.push(state.ingest(raw, at.timestamp_millis(), &at).stored);
        }
        let live = state.charts(&start);

        let pending = state.select(Timeframe::Today, None, &start).unwrap().unwrap();
        let view = state.complete_history(pending.generation, stored).unwrap();

        assert_eq!(view.charts.power_import, live.power_import);
        assert_eq!(view.charts.power_export, live.power_export);
        assert_eq!(view.charts.gas, live.gas);
        assert_eq!(
            view.charts.gas,
            vec![
                Point::new(start.timestamp_millis(), 0.0),
                Point::new(start.timestamp_millis() + 2_000, 0.75)
            ]
        );
    }

    #[test]
    fn test_new_sample_extends_open_historical_range() {
        let mut state = state(true);
        let now = tz().with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap();
        let pending = state.select(Timeframe::Today, None, &now).unwrap().unwrap();
        state.complete_history(pending.generation, Vec::new()).unwrap();

        let ingested = state.ingest(&json!({"active_power_w": 2500}), now.timestamp_millis(), &now);
        assert!(ingested.history_changed);
        assert_eq!(state.charts(&now).power_import.len(), 1);
        assert_eq!(state.stats().map(|s| s.active_power_kw), Some(2.5));
    }

    #[test]
    fn test_disabling_caching_returns_to_live() {
        let mut state = state(true);
        let now = tz().with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap();
        let pending = state.select(Timeframe::Year, None, &now).unwrap().unwrap();

        state.set_caching(false);
        assert_eq!(state.timeframe(), Timeframe::Now);
        assert!(matches!(
            state.complete_history(pending.generation, Vec::new()),
            Err(AppError::Superseded)
        ));
    }

    fn stored_at(ts: i64, power_w: f64) -> StoredSample {
        StoredSample {
            timestamp: ts,
            sample: Sample::normalize(&json!({ "active_power_w": power_w })),
            gas_delta: None,
        }
    }

    #[test]
    fn test_samples_outside_open_range_are_not_kept() {
        let mut state = state(true);
        let now = tz().with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap();
        let yesterday_noon = (now - Duration::days(1)).timestamp_millis();

        let mut log: Vec<StoredSample> = (0..10_000)
            .map(|i| stored_at(now.timestamp_millis() - 10_000_000 + i * 1_000, 100.0))
            .collect();
        log.push(stored_at(yesterday_noon, 300.0));
        log.push(stored_at(yesterday_noon + 1_000, 400.0));

        let pending = state
            .select(Timeframe::Yesterday, None, &now)
            .unwrap()
            .unwrap();
        let view = state.complete_history(pending.generation, log).unwrap();
        assert_eq!(view.charts.power_import.len(), 2);

        for i in 0..100 {
            let at = now + Duration::seconds(i);
            let ingested = state.ingest(&json!({"active_power_w": 500}), at.timestamp_millis(), &at);
            assert!(!ingested.history_changed);
        }

        assert_eq!(state.charts(&now).power_import.len(), 2);
        assert!(state.pending.is_empty());
        assert_eq!(state.stats().map(|s| s.active_power_kw), Some(0.4));
    }

    #[test]
    fn test_sample_ingested_during_history_load_is_shown() {
        let mut state = state(true);
        let now = tz().with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap();
        let earlier = stored_at(now.timestamp_millis() - 60_000, 200.0);

        let pending = state.select(Timeframe::Today, None, &now).unwrap().unwrap();
        let x = state
            .ingest(&json!({"active_power_w": 1000}), now.timestamp_millis(), &now)
            .stored;

        // the snapshot was read before `x` was committed
        state
            .complete_history(pending.generation, vec![earlier.clone()])
            .unwrap();

        let later = now + Duration::seconds(1);
        let y = state
            .ingest(&json!({"active_power_w": 1100}), later.timestamp_millis(), &later)
            .stored;

        let shown: Vec<i64> = state
            .charts(&later)
            .power_import
            .iter()
            .map(|p| p.ts)
            .collect();
        assert_eq!(shown, vec![earlier.timestamp, x.timestamp, y.timestamp]);
    }

    #[test]
    fn test_sample_in_both_snapshot_and_buffer_is_shown_once() {
        let mut state = state(true);
        let now = tz().with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap();

        let pending = state.select(Timeframe::Today, None, &now).unwrap().unwrap();
        let x = state
            .ingest(&json!({"active_power_w": 1000}), now.timestamp_millis(), &now)
            .stored;
        let view = state
            .complete_history(pending.generation, vec![x.clone()])
            .unwrap();

        assert_eq!(view.charts.power_import, vec![Point::new(x.timestamp, 1.0)]);
        assert_eq!(view.latest, Some(x));
    }

    #[test]
    fn test_now_range_follows_the_clock() {
        let state = state(false);
        let first = tz().with_ymd_and_hms(2024, 3, 4, 12, 10, 0).unwrap();
        let later = first + Duration::minutes(5);

        let range = state.current_range(&first).unwrap();
        assert_eq!(range.timeframe, Timeframe::Now);
        assert_eq!(range.start, tz().with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap());
        assert_eq!(range.end, first);
        assert_eq!(state.current_range(&later).unwrap().end, later);
    }
}

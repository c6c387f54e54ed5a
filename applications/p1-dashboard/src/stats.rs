use crate::history::HistoryView;
use crate::ingest::StoredSample;
use crate::sample::{format_gas_timestamp, Sample};
use serde::Serialize;

/// Active power at which the power bar is full.
pub const POWER_BAR_FULL_SCALE_W: f64 = 6000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerDirection {
    Import,
    Export,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeterInfo {
    pub wifi_ssid: String,
    pub wifi_strength_pct: f64,
    pub meter_model: String,
    pub smr_version: String,
    pub unique_id: String,
    pub gas_unique_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerBar {
    /// |W| relative to [`POWER_BAR_FULL_SCALE_W`], in `[0, 1]`
    pub magnitude: f64,
    pub direction: PowerDirection,
}

/// The single-sample readouts next to the charts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub timestamp: i64,
    pub meter: MeterInfo,

    pub active_power_kw: f64,
    pub active_current_a: f64,
    pub average_voltage_v: f64,
    pub voltage_imbalance_pct: f64,
    pub tariff: String,
    pub power_bar: PowerBar,

    pub phase_power_kw: [f64; 3],
    pub phase_voltage_v: [f64; 3],
    pub phase_current_a: [f64; 3],
    pub power_factor: [f64; 3],

    pub import_kwh: f64,
    pub export_kwh: f64,
    pub import_mwh: f64,
    pub export_mwh: f64,
    pub import_t1_kwh: f64,
    pub import_t2_kwh: f64,
    pub export_t1_kwh: f64,
    pub export_t2_kwh: f64,

    pub sag_count: f64,
    pub swell_count: f64,
    pub power_fail_count: f64,
    pub long_power_fail_count: f64,

    pub gas_total_m3: f64,
    pub gas_reported_at: String,
}

impl StatsSnapshot {
    pub fn from_stored(stored: &StoredSample) -> Self {
        let s: &Sample = &stored.sample;
        Self {
            timestamp: stored.timestamp,
            meter: MeterInfo {
                wifi_ssid: s.wifi_ssid.clone(),
                wifi_strength_pct: s.wifi_strength,
                meter_model: s.meter_model.clone(),
                smr_version: s.smr_version.clone(),
                unique_id: s.unique_id.clone(),
                gas_unique_id: s.gas_unique_id.clone(),
            },

            active_power_kw: s.active_power_kw(),
            active_current_a: s.active_current_a,
            average_voltage_v: s.average_voltage(),
            voltage_imbalance_pct: s.phase_imbalance(),
            tariff: s
                .active_tariff
                .map(|t| format!("T{t}"))
                .unwrap_or_else(|| crate::sample::PLACEHOLDER.to_string()),
            power_bar: PowerBar {
                magnitude: (s.active_power_w.abs() / POWER_BAR_FULL_SCALE_W).min(1.0),
                direction: if s.active_power_w >= 0.0 {
                    PowerDirection::Import
                } else {
                    PowerDirection::Export
                },
            },

            phase_power_kw: [
                s.active_power_l1_w / 1000.0,
                s.active_power_l2_w / 1000.0,
                s.active_power_l3_w / 1000.0,
            ],
            phase_voltage_v: [
                s.active_voltage_l1_v,
                s.active_voltage_l2_v,
                s.active_voltage_l3_v,
            ],
            phase_current_a: [
                s.active_current_l1_a,
                s.active_current_l2_a,
                s.active_current_l3_a,
            ],
            power_factor: [
                s.power_factor_l1(),
                s.power_factor_l2(),
                s.power_factor_l3(),
            ],

            import_kwh: s.total_power_import_kwh,
            export_kwh: s.total_power_export_kwh,
            import_mwh: s.total_power_import_kwh / 1000.0,
            export_mwh: s.total_power_export_kwh / 1000.0,
            import_t1_kwh: s.total_power_import_t1_kwh,
            import_t2_kwh: s.total_power_import_t2_kwh,
            export_t1_kwh: s.total_power_export_t1_kwh,
            export_t2_kwh: s.total_power_export_t2_kwh,

            sag_count: s.total_sags(),
            swell_count: s.total_swells(),
            power_fail_count: s.any_power_fail_count,
            long_power_fail_count: s.long_power_fail_count,

            gas_total_m3: s.total_gas_m3,
            gas_reported_at: format_gas_timestamp(s.gas_timestamp.as_deref()),
        }
    }
}

/// Holds whatever the stats panel currently shows.
#[derive(Debug, Clone, Default)]
pub struct StatsPanel {
    current: Option<StatsSnapshot>,
}

impl StatsPanel {
    pub fn update(&mut self, stored: &StoredSample) {
        self.current = Some(StatsSnapshot::from_stored(stored));
    }

    /// Show the last sample of a history view. An empty view leaves the panel as is.
    /// Returns whether the panel changed.
    pub fn apply_history(&mut self, view: &HistoryView) -> bool {
        match &view.latest {
            Some(latest) => {
                self.update(latest);
                true
            }
            None => false,
        }
    }

    pub fn current(&self) -> Option<&StatsSnapshot> {
        self.current.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::{Axis, ChartSet};
    use crate::timeframe::AxisUnit;
    use serde_json::json;

    fn stored(ts: i64, raw: serde_json::Value) -> StoredSample {
        StoredSample {
            timestamp: ts,
            sample: Sample::normalize(&raw),
            gas_delta: None,
        }
    }

    #[test]
    fn test_snapshot_readouts() {
        let snap = StatsSnapshot::from_stored(&stored(
            7,
            json!({
                "active_power_w": -9000,
                "active_tariff": 2,
                "total_power_import_kwh": 12345.0,
                "gas_timestamp": "240301101500",
                "active_power_l2_w": 250,
            }),
        ));
        assert_eq!(snap.timestamp, 7);
        assert_eq!(snap.active_power_kw, -9.0);
        assert_eq!(snap.tariff, "T2");
        assert_eq!(snap.power_bar.magnitude, 1.0);
        assert_eq!(snap.power_bar.direction, PowerDirection::Export);
        assert_eq!(snap.import_mwh, 12.345);
        assert_eq!(snap.phase_power_kw, [0.0, 0.25, 0.0]);
        assert_eq!(snap.power_factor, [1.0, 1.0, 1.0]);
        assert_eq!(snap.gas_reported_at, "01/03/2024 10:15:00");
    }

    #[test]
    fn test_missing_tariff_shows_placeholder() {
        let snap = StatsSnapshot::from_stored(&stored(1, json!({"active_power_w": 3000})));
        assert_eq!(snap.tariff, "--");
        assert_eq!(snap.power_bar.magnitude, 0.5);
        assert_eq!(snap.power_bar.direction, PowerDirection::Import);
    }

    #[test]
    fn test_empty_history_leaves_panel_alone() {
        let mut panel = StatsPanel::default();
        panel.update(&stored(1, json!({"active_power_w": 1000})));
        let before = panel.current().cloned();

        let empty = HistoryView {
            charts: ChartSet::empty(Axis::auto(AxisUnit::Day)),
            latest: None,
        };
        assert!(!panel.apply_history(&empty));
        assert_eq!(panel.current().cloned(), before);
    }
}

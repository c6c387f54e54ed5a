//! Typed meter readings.
//!
//! The P1 device answers with a flat JSON object whose fields may be missing,
//! null, or occasionally encoded as strings. [`Sample::normalize`] is the one
//! place that deals with that: numbers default to `0`, labels default to
//! [`PLACEHOLDER`], and nothing in here can fail.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Shown for identity strings the meter did not report.
pub const PLACEHOLDER: &str = "--";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub wifi_ssid: String,
    pub wifi_strength: f64,
    pub smr_version: String,
    pub meter_model: String,
    pub unique_id: String,
    pub active_tariff: Option<i64>,

    // Power import/export (kWh)
    pub total_power_import_kwh: f64,
    pub total_power_import_t1_kwh: f64,
    pub total_power_import_t2_kwh: f64,
    pub total_power_export_kwh: f64,
    pub total_power_export_t1_kwh: f64,
    pub total_power_export_t2_kwh: f64,

    // Active power (W)
    pub active_power_w: f64,
    pub active_power_l1_w: f64,
    pub active_power_l2_w: f64,
    pub active_power_l3_w: f64,

    // Voltage (V)
    pub active_voltage_l1_v: f64,
    pub active_voltage_l2_v: f64,
    pub active_voltage_l3_v: f64,

    // Current (A)
    pub active_current_a: f64,
    pub active_current_l1_a: f64,
    pub active_current_l2_a: f64,
    pub active_current_l3_a: f64,

    // Reliability counters
    pub voltage_sag_l1_count: f64,
    pub voltage_sag_l2_count: f64,
    pub voltage_sag_l3_count: f64,
    pub voltage_swell_l1_count: f64,
    pub voltage_swell_l2_count: f64,
    pub voltage_swell_l3_count: f64,
    pub any_power_fail_count: f64,
    pub long_power_fail_count: f64,

    // Gas
    pub total_gas_m3: f64,
    /// Meter clock, `YYMMDDhhmmss`; only changes when the gas meter reports.
    pub gas_timestamp: Option<String>,
    pub gas_unique_id: String,

    #[serde(default)]
    pub external: Vec<ExternalReading>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalReading {
    pub unique_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub timestamp: Option<String>,
    pub value: f64,
    pub unit: Option<String>,
}

impl Sample {
    /// Build a sample from whatever the device sent. Never fails.
    pub fn normalize(raw: &Value) -> Self {
        let num = |key: &str| number(raw.get(key));
        let label = |key: &str| text(raw.get(key)).unwrap_or_else(|| PLACEHOLDER.to_string());

        Self {
            wifi_ssid: label("wifi_ssid"),
            wifi_strength: num("wifi_strength"),
            smr_version: label("smr_version"),
            meter_model: label("meter_model"),
            unique_id: label("unique_id"),
            active_tariff: tariff(raw.get("active_tariff")),

            total_power_import_kwh: num("total_power_import_kwh"),
            total_power_import_t1_kwh: num("total_power_import_t1_kwh"),
            total_power_import_t2_kwh: num("total_power_import_t2_kwh"),
            total_power_export_kwh: num("total_power_export_kwh"),
            total_power_export_t1_kwh: num("total_power_export_t1_kwh"),
            total_power_export_t2_kwh: num("total_power_export_t2_kwh"),

            active_power_w: num("active_power_w"),
            active_power_l1_w: num("active_power_l1_w"),
            active_power_l2_w: num("active_power_l2_w"),
            active_power_l3_w: num("active_power_l3_w"),

            active_voltage_l1_v: num("active_voltage_l1_v"),
            active_voltage_l2_v: num("active_voltage_l2_v"),
            active_voltage_l3_v: num("active_voltage_l3_v"),

            active_current_a: num("active_current_a"),
            active_current_l1_a: num("active_current_l1_a"),
            active_current_l2_a: num("active_current_l2_a"),
            active_current_l3_a: num("active_current_l3_a"),

            voltage_sag_l1_count: num("voltage_sag_l1_count"),
            voltage_sag_l2_count: num("voltage_sag_l2_count"),
            voltage_sag_l3_count: num("voltage_sag_l3_count"),
            voltage_swell_l1_count: num("voltage_swell_l1_count"),
            voltage_swell_l2_count: num("voltage_swell_l2_count"),
            voltage_swell_l3_count: num("voltage_swell_l3_count"),
            any_power_fail_count: num("any_power_fail_count"),
            long_power_fail_count: num("long_power_fail_count"),

            total_gas_m3: num("total_gas_m3"),
            gas_timestamp: gas_timestamp(raw.get("gas_timestamp")),
            gas_unique_id: label("gas_unique_id"),

            external: raw
                .get("external")
                .and_then(Value::as_array)
                .map(|items| items.iter().map(ExternalReading::normalize).collect())
                .unwrap_or_default(),
        }
    }

    pub fn average_voltage(&self) -> f64 {
        (self.active_voltage_l1_v + self.active_voltage_l2_v + self.active_voltage_l3_v) / 3.0
    }

    /// Largest single-phase deviation from the mean voltage, in percent of the mean.
    pub fn phase_imbalance(&self) -> f64 {
        let avg = self.average_voltage();
        if avg == 0.0 {
            return 0.0;
        }
        let max_dev = [
            self.active_voltage_l1_v,
            self.active_voltage_l2_v,
            self.active_voltage_l3_v,
        ]
        .iter()
        .map(|v| (v - avg).abs())
        .fold(0.0_f64, f64::max);
        max_dev / avg * 100.0
    }

    pub fn power_factor_l1(&self) -> f64 {
        power_factor(
            self.active_power_l1_w,
            self.active_voltage_l1_v,
            self.active_current_l1_a,
        )
    }

    pub fn power_factor_l2(&self) -> f64 {
        power_factor(
            self.active_power_l2_w,
            self.active_voltage_l2_v,
            self.active_current_l2_a,
        )
    }

    pub fn power_factor_l3(&self) -> f64 {
        power_factor(
            self.active_power_l3_w,
            self.active_voltage_l3_v,
            self.active_current_l3_a,
        )
    }

    pub fn total_sags(&self) -> f64 {
        self.voltage_sag_l1_count + self.voltage_sag_l2_count + self.voltage_sag_l3_count
    }

    pub fn total_swells(&self) -> f64 {
        self.voltage_swell_l1_count + self.voltage_swell_l2_count + self.voltage_swell_l3_count
    }

    pub fn active_power_kw(&self) -> f64 {
        self.active_power_w / 1000.0
    }
}

impl ExternalReading {
    fn normalize(raw: &Value) -> Self {
        Self {
            unique_id: text(raw.get("unique_id")),
            kind: text(raw.get("type")),
            timestamp: text(raw.get("timestamp")),
            value: number(raw.get("value")),
            unit: text(raw.get("unit")),
        }
    }
}

/// `|P| / (V * I)`, capped at 1. No voltage or no current counts as a clean 1.
fn power_factor(power_w: f64, voltage_v: f64, current_a: f64) -> f64 {
    if voltage_v == 0.0 || current_a == 0.0 {
        return 1.0;
    }
    let pf = power_w.abs() / (voltage_v * current_a).abs();
    if pf.is_finite() {
        pf.min(1.0)
    } else {
        1.0
    }
}

fn number(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}

fn text(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// A meter without a gas reading reports `0` or nothing at all.
fn gas_timestamp(value: Option<&Value>) -> Option<String> {
    text(value).filter(|t| t.trim_start_matches('0') != "")
}

fn tariff(value: Option<&Value>) -> Option<i64> {
    let t = number(value);
    (t != 0.0).then_some(t as i64)
}

/// Render a meter gas timestamp (`YYMMDDhhmmss`) as `dd/mm/20yy hh:mm:ss`.
pub fn format_gas_timestamp(raw: Option<&str>) -> String {
    let Some(raw) = raw.filter(|s| !s.is_empty()) else {
        return PLACEHOLDER.to_string();
    };
    let s = format!("{:0>12}", raw);
    match (
        s.get(0..2),
        s.get(2..4),
        s.get(4..6),
        s.get(6..8),
        s.get(8..10),
        s.get(10..12),
    ) {
        (Some(yy), Some(mm), Some(dd), Some(hh), Some(mi), Some(ss)) => {
            format!("{dd}/{mm}/20{yy} {hh}:{mi}:{ss}")
        }
        _ => PLACEHOLDER.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn with_phases(v: [f64; 3], i: [f64; 3], p: [f64; 3]) -> Sample {
        Sample::normalize(&json!({
            "active_voltage_l1_v": v[0], "active_voltage_l2_v": v[1], "active_voltage_l3_v": v[2],
            "active_current_l1_a": i[0], "active_current_l2_a": i[1], "active_current_l3_a": i[2],
            "active_power_l1_w": p[0], "active_power_l2_w": p[1], "active_power_l3_w": p[2],
        }))
    }

    #[test]
    fn test_empty_object_defaults() {
        let s = Sample::normalize(&json!({}));
        assert_eq!(s.wifi_ssid, "--");
        assert_eq!(s.unique_id, "--");
        assert_eq!(s.gas_unique_id, "--");
        assert_eq!(s.active_power_w, 0.0);
        assert_eq!(s.total_gas_m3, 0.0);
        assert_eq!(s.active_tariff, None);
        assert_eq!(s.gas_timestamp, None);
        assert!(s.external.is_empty());
    }

    #[test]
    fn test_non_object_input_does_not_panic() {
        for raw in [json!(null), json!([1, 2, 3]), json!("text"), json!(42)] {
            let s = Sample::normalize(&raw);
            assert_eq!(s.active_power_w, 0.0);
            assert_eq!(s.meter_model, "--");
        }
    }

    #[test]
    fn test_malformed_numbers_default_to_zero() {
        let s = Sample::normalize(&json!({
            "active_power_w": "not a number",
            "total_gas_m3": null,
            "active_voltage_l1_v": {"nested": true},
            "active_current_a": "3.5",
        }));
        assert_eq!(s.active_power_w, 0.0);
        assert_eq!(s.total_gas_m3, 0.0);
        assert_eq!(s.active_voltage_l1_v, 0.0);
        assert_eq!(s.active_current_a, 3.5);
    }

    #[test]
    fn test_numeric_gas_timestamp_becomes_text() {
        let s = Sample::normalize(&json!({"gas_timestamp": 230101120000u64, "active_tariff": 2}));
        assert_eq!(s.gas_timestamp.as_deref(), Some("230101120000"));
        assert_eq!(Sample::normalize(&json!({"gas_timestamp": 0})).gas_timestamp, None);
        assert_eq!(Sample::normalize(&json!({"gas_timestamp": "0"})).gas_timestamp, None);
        assert_eq!(s.active_tariff, Some(2));
    }

    #[test]
    fn test_external_devices() {
        let s = Sample::normalize(&json!({
            "external": [
                {"unique_id": "abc", "type": "gas_meter", "timestamp": 230101120000u64, "value": 12.5, "unit": "m3"},
                {"type": "water_meter"}
            ]
        }));
        assert_eq!(s.external.len(), 2);
        assert_eq!(s.external[0].kind.as_deref(), Some("gas_meter"));
        assert_eq!(s.external[0].value, 12.5);
        assert_eq!(s.external[1].value, 0.0);
        assert_eq!(s.external[1].unique_id, None);
    }

    #[test]
    fn test_average_voltage_and_kw() {
        let mut s = with_phases([230.0, 231.0, 232.0], [0.0; 3], [0.0; 3]);
        s.active_power_w = 1500.0;
        assert!((s.average_voltage() - 231.0).abs() < 1e-9);
        assert_eq!(s.active_power_kw(), 1.5);
    }

    #[test]
    fn test_imbalance_zero_for_equal_phases() {
        let s = with_phases([230.0, 230.0, 230.0], [0.0; 3], [0.0; 3]);
        assert_eq!(s.phase_imbalance(), 0.0);
    }

    #[test]
    fn test_imbalance_zero_for_dead_phases() {
        let s = with_phases([0.0, 0.0, 0.0], [0.0; 3], [0.0; 3]);
        assert_eq!(s.phase_imbalance(), 0.0);
    }

    #[test]
    fn test_imbalance_scales_with_max_deviation() {
        // mean 230, max deviation 6 -> 2.6087 %
        let a = with_phases([236.0, 227.0, 227.0], [0.0; 3], [0.0; 3]);
        // mean 230, max deviation 12 -> twice as much
        let b = with_phases([242.0, 224.0, 224.0], [0.0; 3], [0.0; 3]);
        assert!((a.phase_imbalance() - 6.0 / 230.0 * 100.0).abs() < 1e-9);
        assert!((b.phase_imbalance() - 2.0 * a.phase_imbalance()).abs() < 1e-9);
    }

    #[test]
    fn test_power_factor_is_one_without_voltage_or_current() {
        let s = with_phases([0.0, 230.0, 230.0], [5.0, 0.0, 2.0], [800.0, 100.0, 460.0]);
        assert_eq!(s.power_factor_l1(), 1.0);
        assert_eq!(s.power_factor_l2(), 1.0);
        assert!((s.power_factor_l3() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_power_factor_bounded() {
        // 230 V * 10 A = 2300 VA, 1150 W -> 0.5; export power uses |P|; oversize P is capped
        let s = with_phases([230.0, 230.0, 230.0], [10.0, 10.0, 1.0], [1150.0, -1150.0, 5000.0]);
        assert!((s.power_factor_l1() - 0.5).abs() < 1e-9);
        assert!((s.power_factor_l2() - 0.5).abs() < 1e-9);
        assert_eq!(s.power_factor_l3(), 1.0);
        for pf in [s.power_factor_l1(), s.power_factor_l2(), s.power_factor_l3()] {
            assert!((0.0..=1.0).contains(&pf));
        }
    }

    #[test]
    fn test_sag_and_swell_totals() {
        let s = Sample::normalize(&json!({
            "voltage_sag_l1_count": 1, "voltage_sag_l2_count": 2, "voltage_sag_l3_count": 3,
            "voltage_swell_l1_count": 4, "voltage_swell_l3_count": "5",
        }));
        assert_eq!(s.total_sags(), 6.0);
        assert_eq!(s.total_swells(), 9.0);
    }

    #[test]
    fn test_format_gas_timestamp() {
        assert_eq!(
            format_gas_timestamp(Some("230101123456")),
            "01/01/2023 12:34:56"
        );
        assert_eq!(format_gas_timestamp(Some("1011200000")), "11/10/2000 20:00:00");
        assert_eq!(format_gas_timestamp(None), "--");
    }
}

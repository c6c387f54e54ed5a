use crate::ingest::StoredSample;
use crate::series::{Axis, ChartSet, Point};
use crate::timeframe::ResolvedRange;

/// Chart series rebuilt for a historical range, plus the sample the stats
/// panel should show.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryView {
    pub charts: ChartSet,
    /// Chronologically last sample inside the range
    pub latest: Option<StoredSample>,
}

/// Rebuild the power and gas series for `range` out of the whole sample log.
///
/// The log is not assumed to be ordered. Samples are kept when
/// `start <= timestamp < end`. Gas points come from the delta stored with each
/// sample and are never recomputed here.
pub fn render(samples: &[StoredSample], range: &ResolvedRange) -> HistoryView {
    let mut in_range: Vec<&StoredSample> = samples
        .iter()
        .filter(|s| range.contains(s.timestamp))
        .collect();
    in_range.sort_by_key(|s| s.timestamp);

    let axis = Axis {
        min: Some(range.start_ms()),
        max: Some(range.end_ms()),
        unit: range.axis_unit,
        step: range.axis_step,
    };

    let mut charts = ChartSet::empty(axis);
    for stored in &in_range {
        charts.push_power(stored.timestamp, stored.sample.active_power_kw());
        if let Some(delta) = stored.gas_delta {
            charts.gas.push(Point::new(stored.timestamp, delta));
        }
    }

    HistoryView {
        charts,
        latest: in_range.last().map(|s| (*s).clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Sample;
    use crate::timeframe::{resolve_range, Timeframe};
    use chrono::{FixedOffset, TimeZone};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn stored(ts: i64, power_w: f64, gas_delta: Option<f64>) -> StoredSample {
        StoredSample {
            timestamp: ts,
            sample: Sample::normalize(&json!({ "active_power_w": power_w })),
            gas_delta,
        }
    }

    fn yesterday_range() -> ResolvedRange {
        let tz = FixedOffset::east_opt(3600).unwrap();
        let reference = tz.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap();
        resolve_range(Timeframe::Yesterday, &reference, None).unwrap()
    }

    #[test]
    fn test_filters_half_open_and_sorts() {
        let range = yesterday_range();
        let start = range.start_ms();
        let end = range.end_ms();
        let samples = vec![
            stored(end, 9000.0, None),
            stored(start + 2_000, -500.0, Some(0.1)),
            stored(start - 1, 9000.0, None),
            stored(start, 1000.0, Some(0.0)),
            stored(end - 1, 2000.0, None),
        ];

        let view = render(&samples, &range);

        let ts: Vec<i64> = view.charts.power_import.iter().map(|p| p.ts).collect();
        assert_eq!(ts, vec![start, start + 2_000, end - 1]);
        assert_eq!(
            view.charts.power_import,
            vec![
                Point::new(start, 1.0),
                Point::gap(start + 2_000),
                Point::new(end - 1, 2.0)
            ]
        );
        assert_eq!(view.charts.power_export[1], Point::new(start + 2_000, -0.5));
        assert_eq!(
            view.charts.gas,
            vec![Point::new(start, 0.0), Point::new(start + 2_000, 0.1)]
        );
        assert_eq!(view.latest.map(|s| s.timestamp), Some(end - 1));
        assert_eq!(view.charts.axis.min, Some(start));
        assert_eq!(view.charts.axis.max, Some(end));
    }

    #[test]
    fn test_empty_range_clears_charts() {
        let range = yesterday_range();
        let samples = vec![stored(range.end_ms() + 10, 100.0, Some(1.0))];

        let view = render(&samples, &range);
        assert!(view.charts.is_empty());
        assert!(view.latest.is_none());
    }
}

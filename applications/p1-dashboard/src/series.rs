use crate::timeframe::AxisUnit;
use serde::{Deserialize, Serialize};

/// One chart point. `value: None` is a gap in the line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub ts: i64,
    pub value: Option<f64>,
}

impl Point {
    pub fn new(ts: i64, value: f64) -> Self {
        Self {
            ts,
            value: Some(value),
        }
    }

    pub fn gap(ts: i64) -> Self {
        Self { ts, value: None }
    }
}

/// Visible x-axis range and tick granularity. `None` bounds mean "fit the data".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub unit: AxisUnit,
    pub step: u32,
}

impl Axis {
    pub fn auto(unit: AxisUnit) -> Self {
        Self {
            min: None,
            max: None,
            unit,
            step: 1,
        }
    }
}

/// Everything the power and gas charts need to redraw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSet {
    /// "Power +": kW while importing, gaps while exporting
    pub power_import: Vec<Point>,
    /// "Power -": kW while exporting, gaps while importing
    pub power_export: Vec<Point>,
    /// Gas consumed between consecutive gas meter reports (m3)
    pub gas: Vec<Point>,
    pub axis: Axis,
}

impl ChartSet {
    pub fn empty(axis: Axis) -> Self {
        Self {
            power_import: Vec::new(),
            power_export: Vec::new(),
            gas: Vec::new(),
            axis,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.power_import.is_empty() && self.power_export.is_empty() && self.gas.is_empty()
    }

    pub fn push_power(&mut self, ts: i64, kw: f64) {
        let (import, export) = split_power(ts, kw);
        self.power_import.push(import);
        self.power_export.push(export);
    }
}

/// Route an active power reading to the import or export series.
pub fn split_power(ts: i64, kw: f64) -> (Point, Point) {
    if kw >= 0.0 {
        (Point::new(ts, kw), Point::gap(ts))
    } else {
        (Point::gap(ts), Point::new(ts, kw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_power_routes_by_sign() {
        assert_eq!(split_power(1, 0.0), (Point::new(1, 0.0), Point::gap(1)));
        assert_eq!(split_power(2, 1.2), (Point::new(2, 1.2), Point::gap(2)));
        assert_eq!(split_power(3, -0.4), (Point::gap(3), Point::new(3, -0.4)));
    }

    #[test]
    fn test_push_power_keeps_series_aligned() {
        let mut charts = ChartSet::empty(Axis::auto(AxisUnit::Minute));
        charts.push_power(10, 1.0);
        charts.push_power(20, -1.0);
        assert_eq!(charts.power_import.len(), 2);
        assert_eq!(charts.power_export.len(), 2);
        assert!(!charts.is_empty());
    }
}

use crate::config::{WindowConfig, WindowMode};
use crate::ingest::StoredSample;
use crate::series::{split_power, Axis, ChartSet, Point};
use crate::timeframe::{start_of_hour, AxisUnit};
use chrono::{DateTime, TimeZone};
use std::collections::VecDeque;

/// One hour at one sample per second.
pub const DEFAULT_CAPACITY: usize = 3600;

/// Bounded buffer of recent points for the live charts.
///
/// The capacity bound always applies. In [`WindowMode::Calendar`] each push
/// also drops everything before the top of the current local hour.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    points: VecDeque<Point>,
    capacity: usize,
    mode: WindowMode,
}

impl RollingWindow {
    pub fn new(capacity: usize, mode: WindowMode) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity: capacity.max(1),
            mode,
        }
    }

    pub fn push<Tz: TimeZone>(&mut self, point: Point, now: &DateTime<Tz>) {
        self.points.push_back(point);
        while self.points.len() > self.capacity {
            self.points.pop_front();
        }
        if self.mode == WindowMode::Calendar {
            let cutoff = start_of_hour(now).timestamp_millis();
            while self.points.front().is_some_and(|p| p.ts < cutoff) {
                self.points.pop_front();
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Point> {
        self.points.iter()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}

/// Points added to the live charts by a single sample.
#[derive(Debug, Clone, PartialEq)]
pub struct LivePoints {
    pub power_import: Point,
    pub power_export: Point,
    pub gas: Option<Point>,
}

/// The "now" view: power and gas windows fed sample by sample.
#[derive(Debug, Clone)]
pub struct LiveSeries {
    power: RollingWindow,
    gas: RollingWindow,
    mode: WindowMode,
}

impl LiveSeries {
    pub fn new(config: &WindowConfig) -> Self {
        Self {
            power: RollingWindow::new(config.capacity, config.mode),
            gas: RollingWindow::new(config.capacity, config.mode),
            mode: config.mode,
        }
    }

    /// The gas window only moves when the sample carries a gas delta.
    pub fn push<Tz: TimeZone>(&mut self, stored: &StoredSample, now: &DateTime<Tz>) -> LivePoints {
        let kw = stored.sample.active_power_kw();
        self.power.push(Point::new(stored.timestamp, kw), now);

        let gas = stored.gas_delta.map(|delta| {
            let point = Point::new(stored.timestamp, delta);
            self.gas.push(point, now);
            point
        });

        let (power_import, power_export) = split_power(stored.timestamp, kw);
        LivePoints {
            power_import,
            power_export,
            gas,
        }
    }

    pub fn axis<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Axis {
        match self.mode {
            WindowMode::Fifo => Axis::auto(AxisUnit::Minute),
            WindowMode::Calendar => Axis {
                min: Some(start_of_hour(now).timestamp_millis()),
                max: Some(now.timestamp_millis()),
                unit: AxisUnit::Minute,
                step: 1,
            },
        }
    }

    pub fn charts<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> ChartSet {
        let mut charts = ChartSet::empty(self.axis(now));
        for point in self.power.iter() {
            charts.push_power(point.ts, point.value.unwrap_or_default());
        }
        charts.gas = self.gas.iter().copied().collect();
        charts
    }

    pub fn power_len(&self) -> usize {
        self.power.len()
    }

    pub fn gas_len(&self) -> usize {
        self.gas.len()
    }
}

//! Coordinate values and sorted, de-duplicated coordinate axes.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use grib_parser::TimeInfo;
use serde::{Deserialize, Serialize};

use crate::config::IntervalPolicy;

/// Forecast time of a record in minutes after its run time.
///
/// Axes order time coordinates by valid (end) time, then by width, so that
/// the narrowest interval comes first among intervals sharing an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeCoord {
    Instant(i64),
    Interval { start: i64, end: i64 },
}

impl TimeCoord {
    /// Offset of the valid time; the end for intervals.
    pub fn end(&self) -> i64 {
        match *self {
            Self::Instant(offset) => offset,
            Self::Interval { end, .. } => end,
        }
    }

    pub fn start(&self) -> i64 {
        match *self {
            Self::Instant(offset) => offset,
            Self::Interval { start, .. } => start,
        }
    }

    pub fn width(&self) -> i64 {
        self.end() - self.start()
    }

    pub fn is_interval(&self) -> bool {
        matches!(self, Self::Interval { .. })
    }

    /// The same coordinate moved by `minutes`.
    pub fn shifted(&self, minutes: i64) -> Self {
        match *self {
            Self::Instant(offset) => Self::Instant(offset + minutes),
            Self::Interval { start, end } => Self::Interval {
                start: start + minutes,
                end: end + minutes,
            },
        }
    }
}

impl From<TimeInfo> for TimeCoord {
    fn from(info: TimeInfo) -> Self {
        match info {
            TimeInfo::Instant { offset } => Self::Instant(offset),
            TimeInfo::Interval { start, end } => Self::Interval { start, end },
        }
    }
}

impl Ord for TimeCoord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.end()
            .cmp(&other.end())
            .then_with(|| self.width().cmp(&other.width()))
            .then_with(|| self.is_interval().cmp(&other.is_interval()))
    }
}

impl PartialOrd for TimeCoord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TimeCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Instant(offset) => write!(f, "{}", format_minutes(offset)),
            Self::Interval { start, end } => {
                write!(f, "{{{},{}}}", format_minutes(start), format_minutes(end))
            }
        }
    }
}

fn format_minutes(minutes: i64) -> String {
    if minutes % 60 == 0 {
        format!("{}h", minutes / 60)
    } else {
        format!("{}m", minutes)
    }
}

/// Vertical coordinate; `value2` is set for layers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LevelCoord {
    pub value1: f64,
    pub value2: Option<f64>,
}

impl LevelCoord {
    pub fn single(value: f64) -> Self {
        Self {
            value1: value,
            value2: None,
        }
    }

    pub fn layer(top: f64, bottom: f64) -> Self {
        Self {
            value1: top,
            value2: Some(bottom),
        }
    }
}

impl Ord for LevelCoord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value1.total_cmp(&other.value1).then_with(|| {
            match (self.value2, other.value2) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(a), Some(b)) => a.total_cmp(&b),
            }
        })
    }
}

impl PartialOrd for LevelCoord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for LevelCoord {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for LevelCoord {}

impl fmt::Display for LevelCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value2 {
            Some(bottom) => write!(f, "{}-{}", self.value1, bottom),
            None => write!(f, "{}", self.value1),
        }
    }
}

/// An ordered, de-duplicated set of coordinate values for one dimension.
///
/// An empty axis is a degenerate dimension of extent 1 (for example the
/// ensemble axis of a deterministic variable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinateAxis<T> {
    values: Vec<T>,
}

impl<T> Default for CoordinateAxis<T> {
    fn default() -> Self {
        Self { values: Vec::new() }
    }
}

impl<T: Ord + Clone> CoordinateAxis<T> {
    pub fn from_values(values: impl IntoIterator<Item = T>) -> Self {
        let mut values: Vec<T> = values.into_iter().collect();
        values.sort();
        values.dedup();
        Self { values }
    }

    /// Axis holding `values` in the given order.
    ///
    /// Returns `None` unless the values are strictly ascending.
    pub fn from_ordered(values: Vec<T>) -> Option<Self> {
        if values.windows(2).all(|w| w[0] < w[1]) {
            Some(Self { values })
        } else {
            None
        }
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Size of the dimension this axis spans.
    pub fn extent(&self) -> usize {
        self.values.len().max(1)
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.values.get(index)
    }

    /// Position of `value`; an empty axis maps every lookup of nothing to 0.
    pub fn index_of(&self, value: &T) -> Option<usize> {
        self.values.binary_search(value).ok()
    }

    /// Position of an optional value; `None` resolves only on an empty axis.
    pub fn position(&self, value: Option<&T>) -> Option<usize> {
        match value {
            Some(v) => self.index_of(v),
            None if self.values.is_empty() => Some(0),
            None => None,
        }
    }

    pub fn union(&self, other: &Self) -> Self {
        Self::from_values(self.values.iter().chain(&other.values).cloned())
    }
}

/// Chooses which time coordinates of a variable are indexed.
///
/// Under [`IntervalPolicy::SmallestPerEnd`], for each run and end time only
/// intervals of the narrowest width are retained. Instants are always kept.
#[derive(Debug, Default)]
pub struct IntervalSelector {
    narrowest: BTreeMap<(DateTime<Utc>, i64), i64>,
    policy: IntervalPolicy,
}

impl IntervalSelector {
    pub fn new<'a>(
        policy: IntervalPolicy,
        times: impl IntoIterator<Item = (DateTime<Utc>, &'a TimeCoord)>,
    ) -> Self {
        let mut narrowest = BTreeMap::new();
        if policy == IntervalPolicy::SmallestPerEnd {
            for (run, time) in times {
                if !time.is_interval() {
                    continue;
                }
                narrowest
                    .entry((run, time.end()))
                    .and_modify(|w: &mut i64| *w = (*w).min(time.width()))
                    .or_insert(time.width());
            }
        }
        Self { narrowest, policy }
    }

    /// Whether the coordinate is indexed or only derivable.
    pub fn keep(&self, run: DateTime<Utc>, time: &TimeCoord) -> bool {
        match self.policy {
            IntervalPolicy::KeepAll => true,
            IntervalPolicy::SmallestPerEnd => match self.narrowest.get(&(run, time.end())) {
                Some(&width) => time.width() <= width,
                None => true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hours(start: i64, end: i64) -> TimeCoord {
        TimeCoord::Interval {
            start: start * 60,
            end: end * 60,
        }
    }

    #[test]
    fn test_interval_axis_sorts_by_end_then_width() {
        let axis = CoordinateAxis::from_values(vec![
            hours(3, 15),
            hours(0, 12),
            hours(12, 15),
            hours(9, 15),
            hours(0, 12),
        ]);
        assert_eq!(
            axis.values(),
            &[hours(0, 12), hours(12, 15), hours(9, 15), hours(3, 15)]
        );
        assert_eq!(axis.index_of(&hours(9, 15)), Some(2));
    }

    #[test]
    fn test_selector_keeps_narrowest_per_end() {
        let run = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let times = vec![hours(12, 15), hours(9, 15), hours(3, 15), hours(0, 12)];
        let selector = IntervalSelector::new(
            IntervalPolicy::SmallestPerEnd,
            times.iter().map(|t| (run, t)),
        );

        let kept: Vec<_> = times.iter().filter(|t| selector.keep(run, t)).collect();
        assert_eq!(kept, vec![&hours(12, 15), &hours(0, 12)]);

        let all = IntervalSelector::new(IntervalPolicy::KeepAll, times.iter().map(|t| (run, t)));
        assert!(times.iter().all(|t| all.keep(run, t)));
    }

    #[test]
    fn test_level_axis_orders_layers_after_single_levels() {
        let axis = CoordinateAxis::from_values(vec![
            LevelCoord::layer(0.0, 10.0),
            LevelCoord::single(850.0),
            LevelCoord::single(0.0),
            LevelCoord::single(850.0),
        ]);
        assert_eq!(axis.len(), 3);
        assert_eq!(axis.values()[0], LevelCoord::single(0.0));
        assert_eq!(axis.values()[1], LevelCoord::layer(0.0, 10.0));
    }

    #[test]
    fn test_empty_axis_is_a_unit_dimension() {
        let axis: CoordinateAxis<u16> = CoordinateAxis::default();
        assert_eq!(axis.extent(), 1);
        assert_eq!(axis.position(None), Some(0));
        assert_eq!(axis.position(Some(&3)), None);
    }

    #[test]
    fn test_from_ordered_rejects_unsorted() {
        assert!(CoordinateAxis::from_ordered(vec![1, 2, 5]).is_some());
        assert!(CoordinateAxis::from_ordered(vec![1, 5, 2]).is_none());
        assert!(CoordinateAxis::from_ordered(vec![1, 1]).is_none());
    }

    #[test]
    fn test_time_coord_display() {
        assert_eq!(hours(0, 12).to_string(), "{0h,12h}");
        assert_eq!(TimeCoord::Instant(90).to_string(), "90m");
    }
}

//! Best time series over multi-run variables.
//!
//! For every valid time covered by any run, the best time series picks the
//! record from the most recent run that has one.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use crate::collection::Variable;

/// One time step of a best time series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BestTime {
    /// Start of the valid interval; equals `end` for instants.
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Run axis index the value is taken from.
    pub run: usize,
    /// Time axis index within that run.
    pub time: usize,
}

impl BestTime {
    pub fn is_interval(&self) -> bool {
        self.start != self.end
    }
}

/// Valid-time axis of a variable built from its most recent runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BestTimeSeries {
    times: Vec<BestTime>,
}

impl BestTimeSeries {
    pub fn for_variable(variable: &Variable) -> Self {
        let [_, ensembles, _, levels] = variable.shape();
        // (end, width) keeps interval ordering consistent with the time axis
        let mut best: BTreeMap<(DateTime<Utc>, i64), BestTime> = BTreeMap::new();

        for (r, run) in variable.runs.values().iter().enumerate() {
            for (t, time) in variable.times.values().iter().enumerate() {
                let present = (0..ensembles)
                    .any(|e| (0..levels).any(|l| variable.entry([r, e, t, l]).is_some()));
                if !present {
                    continue;
                }
                let start = *run + Duration::minutes(time.start());
                let end = *run + Duration::minutes(time.end());
                // Runs ascend, so later runs overwrite earlier ones
                best.insert(
                    (end, time.width()),
                    BestTime {
                        start,
                        end,
                        run: r,
                        time: t,
                    },
                );
            }
        }

        Self {
            times: best.into_values().collect(),
        }
    }

    pub fn times(&self) -> &[BestTime] {
        &self.times
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&BestTime> {
        self.times.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::IndexEntry;
    use crate::coords::{CoordinateAxis, TimeCoord};
    use crate::extract::ParameterKey;
    use chrono::TimeZone;
    use grib_parser::ParamId;

    fn variable(cells: &[(usize, usize)]) -> Variable {
        let runs = CoordinateAxis::from_values([
            Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 15, 6, 0, 0).unwrap(),
        ]);
        let times = CoordinateAxis::from_values((0..4).map(|h| TimeCoord::Instant(h * 360)));
        let key = ParameterKey {
            param: ParamId::Grib2 {
                discipline: 0,
                category: 0,
                number: 0,
            },
            level_type: 1,
            layer: false,
            interval: false,
            statistic: None,
            interval_length: None,
            derived: None,
            error_kind: None,
            ensemble: false,
            grid_hash: 0,
        };
        let mut var = Variable::new(
            "TMP_surface".into(),
            key,
            0,
            runs,
            CoordinateAxis::default(),
            times,
            CoordinateAxis::default(),
        );
        for (i, &(r, t)) in cells.iter().enumerate() {
            let entry = IndexEntry {
                file: r as u32,
                pos: i as u64,
                len: 1,
                field: 0,
            };
            var.set_entry([r, 0, t, 0], entry).unwrap();
        }
        var
    }

    #[test]
    fn test_latest_run_wins_each_valid_time() {
        // Run 0 covers 00Z..18Z, run 1 (06Z) covers 06Z..00Z next day
        let cells: Vec<_> = (0..4).map(|t| (0, t)).chain((0..4).map(|t| (1, t))).collect();
        let best = BestTimeSeries::for_variable(&variable(&cells));

        assert_eq!(best.len(), 5);
        let picks: Vec<(usize, usize)> = best.times().iter().map(|b| (b.run, b.time)).collect();
        assert_eq!(picks, vec![(0, 0), (1, 0), (1, 1), (1, 2), (1, 3)]);
        assert_eq!(
            best.get(4).unwrap().end,
            Utc.with_ymd_and_hms(2024, 1, 16, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_missing_records_fall_back_to_older_run() {
        // Run 1 lacks its first step (06Z); run 0 supplies it
        let cells = vec![(0, 0), (0, 1), (1, 1)];
        let best = BestTimeSeries::for_variable(&variable(&cells));

        let picks: Vec<(usize, usize)> = best.times().iter().map(|b| (b.run, b.time)).collect();
        assert_eq!(picks, vec![(0, 0), (0, 1), (1, 1)]);
        assert!(!best.get(0).unwrap().is_interval());
    }
}

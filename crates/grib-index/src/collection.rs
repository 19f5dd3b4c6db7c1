//! The indexed collection: variables, their axes and record locators.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use grib_parser::{GridDefinition, RecordLocator};
use serde::{Deserialize, Serialize};

use crate::coords::{CoordinateAxis, LevelCoord, TimeCoord};
use crate::error::AggregationError;
use crate::extract::{CoordTuple, ParameterKey};

/// Physical location of one indexed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Index into [`Collection::files`].
    pub file: u32,
    pub pos: u64,
    pub len: u64,
    pub field: u16,
}

impl IndexEntry {
    pub fn new(file: u32, locator: RecordLocator) -> Self {
        Self {
            file,
            pos: locator.pos,
            len: locator.len,
            field: locator.field,
        }
    }

    pub fn locator(&self) -> RecordLocator {
        RecordLocator {
            pos: self.pos,
            len: self.len,
            field: self.field,
        }
    }
}

/// Dense cell position: (run, ensemble, time, level).
pub type Cell = [usize; 4];

/// One logical variable and its index table.
///
/// Entries are stored densely over the product of the four outer axes;
/// cells without a record hold `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub key: ParameterKey,
    /// Index into [`Collection::grids`].
    pub grid: usize,
    pub runs: CoordinateAxis<DateTime<Utc>>,
    pub ensembles: CoordinateAxis<u16>,
    pub times: CoordinateAxis<TimeCoord>,
    pub levels: CoordinateAxis<LevelCoord>,
    entries: Vec<Option<IndexEntry>>,
}

impl Variable {
    pub fn new(
        name: String,
        key: ParameterKey,
        grid: usize,
        runs: CoordinateAxis<DateTime<Utc>>,
        ensembles: CoordinateAxis<u16>,
        times: CoordinateAxis<TimeCoord>,
        levels: CoordinateAxis<LevelCoord>,
    ) -> Self {
        let size = runs.extent() * ensembles.extent() * times.extent() * levels.extent();
        Self {
            name,
            key,
            grid,
            runs,
            ensembles,
            times,
            levels,
            entries: vec![None; size],
        }
    }

    /// Extent of (run, ensemble, time, level).
    pub fn shape(&self) -> [usize; 4] {
        [
            self.runs.extent(),
            self.ensembles.extent(),
            self.times.extent(),
            self.levels.extent(),
        ]
    }

    fn offset(&self, cell: Cell) -> Option<usize> {
        let shape = self.shape();
        if cell.iter().zip(shape.iter()).any(|(i, n)| i >= n) {
            return None;
        }
        Some(((cell[0] * shape[1] + cell[1]) * shape[2] + cell[2]) * shape[3] + cell[3])
    }

    fn cell_at(&self, mut offset: usize) -> Cell {
        let shape = self.shape();
        let mut cell = [0; 4];
        for dim in (0..4).rev() {
            cell[dim] = offset % shape[dim];
            offset /= shape[dim];
        }
        cell
    }

    pub fn entry(&self, cell: Cell) -> Option<&IndexEntry> {
        self.offset(cell)
            .and_then(|o| self.entries.get(o))
            .and_then(|e| e.as_ref())
    }

    /// Store `entry` at `cell`.
    ///
    /// An occupied cell is left untouched and its existing entry returned
    /// as the error.
    pub fn set_entry(&mut self, cell: Cell, entry: IndexEntry) -> Result<(), Option<IndexEntry>> {
        let offset = self.offset(cell).ok_or(None)?;
        match &self.entries[offset] {
            Some(existing) => Err(Some(*existing)),
            None => {
                self.entries[offset] = Some(entry);
                Ok(())
            }
        }
    }

    /// Cell addressed by a coordinate tuple, if every coordinate is on an axis.
    pub fn cell_of(&self, tuple: &CoordTuple) -> Option<Cell> {
        Some([
            self.runs.index_of(&tuple.run)?,
            self.ensembles.position(tuple.ensemble.as_ref())?,
            self.times.index_of(&tuple.time)?,
            self.levels.position(tuple.level.as_ref())?,
        ])
    }

    /// Coordinate tuple of a cell.
    pub fn tuple_at(&self, cell: Cell) -> Option<CoordTuple> {
        self.offset(cell)?;
        Some(CoordTuple {
            run: *self.runs.get(cell[0])?,
            ensemble: self.ensembles.get(cell[1]).copied(),
            time: *self.times.get(cell[2])?,
            level: self.levels.get(cell[3]).copied(),
        })
    }

    /// Present entries with their cells, in storage order.
    pub fn entries(&self) -> impl Iterator<Item = (Cell, &IndexEntry)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(move |(offset, e)| e.as_ref().map(|e| (self.cell_at(offset), e)))
    }

    pub fn record_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn missing_count(&self) -> usize {
        self.entries.len() - self.record_count()
    }
}

/// A set of variables over one or more source files.
///
/// Immutable once built; rebuilds produce a new value that is swapped in
/// as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub name: String,
    pub files: Vec<PathBuf>,
    pub grids: Vec<GridDefinition>,
    /// Sorted by name; names are unique.
    pub variables: Vec<Variable>,
}

impl Collection {
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables
            .binary_search_by(|v| v.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.variables[i])
    }

    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variables.iter().map(|v| v.name.as_str())
    }

    pub fn grid(&self, variable: &Variable) -> Option<&GridDefinition> {
        self.grids.get(variable.grid)
    }

    pub fn record_count(&self) -> usize {
        self.variables.iter().map(|v| v.record_count()).sum()
    }

    /// Every run time present in any variable.
    pub fn runs(&self) -> CoordinateAxis<DateTime<Utc>> {
        CoordinateAxis::from_values(
            self.variables
                .iter()
                .flat_map(|v| v.runs.values().iter().copied()),
        )
    }

    /// Source path used when reporting problems with this collection.
    pub fn display_path(&self) -> PathBuf {
        self.files
            .first()
            .cloned()
            .unwrap_or_else(|| PathBuf::from(&self.name))
    }

    /// Replace the run time of every variable with `run`.
    ///
    /// Fails when a variable spans more than one run.
    pub fn with_run_time(mut self, run: DateTime<Utc>) -> Result<Self, AggregationError> {
        if self.variables.iter().any(|v| v.runs.len() > 1) {
            return Err(AggregationError::RunTimeUnavailable(self.display_path()));
        }
        for variable in &mut self.variables {
            variable.runs = CoordinateAxis::from_values([run]);
        }
        Ok(self)
    }

    pub(crate) fn sort_variables(&mut self) {
        self.variables.sort_by(|a, b| a.name.cmp(&b.name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use grib_parser::ParamId;

    fn key() -> ParameterKey {
        ParameterKey {
            param: ParamId::Grib2 {
                discipline: 0,
                category: 0,
                number: 0,
            },
            level_type: 100,
            layer: false,
            interval: false,
            statistic: None,
            interval_length: None,
            derived: None,
            error_kind: None,
            ensemble: false,
            grid_hash: 1,
        }
    }

    fn variable() -> Variable {
        let run = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        Variable::new(
            "TMP_isobaric".to_string(),
            key(),
            0,
            CoordinateAxis::from_values([run]),
            CoordinateAxis::default(),
            CoordinateAxis::from_values([TimeCoord::Instant(0), TimeCoord::Instant(180)]),
            CoordinateAxis::from_values([LevelCoord::single(500.0), LevelCoord::single(850.0)]),
        )
    }

    fn entry(pos: u64) -> IndexEntry {
        IndexEntry {
            file: 0,
            pos,
            len: 10,
            field: 0,
        }
    }

    #[test]
    fn test_dense_layout_and_missing_cells() {
        let mut var = variable();
        assert_eq!(var.shape(), [1, 1, 2, 2]);
        assert_eq!(var.missing_count(), 4);

        var.set_entry([0, 0, 1, 0], entry(100)).unwrap();
        assert_eq!(var.entry([0, 0, 1, 0]), Some(&entry(100)));
        assert_eq!(var.entry([0, 0, 0, 0]), None);
        assert_eq!(var.entry([0, 1, 0, 0]), None);

        let present: Vec<_> = var.entries().collect();
        assert_eq!(present, vec![([0, 0, 1, 0], &entry(100))]);
    }

    #[test]
    fn test_set_entry_keeps_first() {
        let mut var = variable();
        var.set_entry([0, 0, 0, 1], entry(1)).unwrap();
        assert_eq!(var.set_entry([0, 0, 0, 1], entry(2)), Err(Some(entry(1))));
        assert_eq!(var.entry([0, 0, 0, 1]), Some(&entry(1)));
        assert_eq!(var.set_entry([0, 0, 5, 0], entry(3)), Err(None));
    }

    #[test]
    fn test_cell_and_tuple_agree() {
        let var = variable();
        let tuple = var.tuple_at([0, 0, 1, 1]).unwrap();
        assert_eq!(tuple.time, TimeCoord::Instant(180));
        assert_eq!(tuple.level, Some(LevelCoord::single(850.0)));
        assert_eq!(tuple.ensemble, None);
        assert_eq!(var.cell_of(&tuple), Some([0, 0, 1, 1]));
    }
}

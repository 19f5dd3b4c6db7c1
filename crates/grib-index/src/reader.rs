//! Slice reads against an immutable collection.
//!
//! A read resolves every requested (run, ensemble, time, level) cell to its
//! index entry, decodes each distinct record exactly once and copies the
//! requested `y`/`x` window into the output array. Cells without an entry
//! are filled with the missing-value marker; a record that is indexed but
//! cannot be read is an error, never a fill.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use grib_parser::{decode_message, read_message, DecodedField, GribError, GridDefinition, ScanModePolicy};
use ndarray::{s, Array5, Array6, ArrayView2, Axis};
use tracing::{debug, instrument};

use crate::best::BestTimeSeries;
use crate::collection::{Cell, Collection, IndexEntry, Variable};
use crate::error::{IndexError, Result};
use crate::geo::GridLocator;
use crate::pool::FilePool;

/// Index ranges of a slice read, one per dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceRequest {
    pub run: Range<usize>,
    pub ensemble: Range<usize>,
    pub time: Range<usize>,
    pub level: Range<usize>,
    pub y: Range<usize>,
    pub x: Range<usize>,
}

impl SliceRequest {
    /// A single point.
    pub fn point(run: usize, ensemble: usize, time: usize, level: usize, y: usize, x: usize) -> Self {
        Self {
            run: run..run + 1,
            ensemble: ensemble..ensemble + 1,
            time: time..time + 1,
            level: level..level + 1,
            y: y..y + 1,
            x: x..x + 1,
        }
    }

    /// Every cell and grid point of `variable`.
    pub fn full(variable: &Variable, grid: &GridDefinition) -> Self {
        let [runs, ensembles, times, levels] = variable.shape();
        Self {
            run: 0..runs,
            ensemble: 0..ensembles,
            time: 0..times,
            level: 0..levels,
            y: 0..grid.ny as usize,
            x: 0..grid.nx as usize,
        }
    }

    /// Output shape (run, ensemble, time, level, y, x).
    pub fn shape(&self) -> [usize; 6] {
        [
            self.run.len(),
            self.ensemble.len(),
            self.time.len(),
            self.level.len(),
            self.y.len(),
            self.x.len(),
        ]
    }
}

fn check_range(dimension: &'static str, range: &Range<usize>, size: usize) -> Result<()> {
    if range.start > range.end || range.end > size {
        return Err(IndexError::OutOfRange {
            dimension,
            start: range.start,
            end: range.end,
            size,
        });
    }
    Ok(())
}

/// Reads slices of one collection snapshot.
///
/// Cheap to clone; concurrent reads share the collection and the handle pool.
#[derive(Debug, Clone)]
pub struct SliceReader {
    collection: Arc<Collection>,
    pool: Arc<FilePool>,
    policy: ScanModePolicy,
    missing_value: f32,
}

impl SliceReader {
    pub fn new(collection: Arc<Collection>, pool: Arc<FilePool>, policy: ScanModePolicy) -> Self {
        Self {
            collection,
            pool,
            policy,
            missing_value: f32::NAN,
        }
    }

    /// Marker written for cells without a record (NaN by default).
    pub fn with_missing_value(mut self, value: f32) -> Self {
        self.missing_value = value;
        self
    }

    pub fn collection(&self) -> &Arc<Collection> {
        &self.collection
    }

    fn variable(&self, name: &str) -> Result<(&Variable, &GridDefinition)> {
        let variable = self
            .collection
            .variable(name)
            .ok_or_else(|| IndexError::VariableNotFound(name.to_string()))?;
        let grid = self.collection.grid(variable).ok_or_else(|| {
            IndexError::serialization(format!("variable {} references a missing grid", name))
        })?;
        Ok((variable, grid))
    }

    /// Locator translating lat/lon into `(x, y)` indices of `name`'s grid.
    pub fn grid_locator(&self, name: &str) -> Result<GridLocator> {
        let (_, grid) = self.variable(name)?;
        GridLocator::new(grid, &self.policy)
    }

    /// Read a (run, ensemble, time, level, y, x) block of `name`.
    #[instrument(skip(self, request), fields(collection = %self.collection.name))]
    pub fn read_slice(&self, name: &str, request: &SliceRequest) -> Result<Array6<f32>> {
        let (variable, grid) = self.variable(name)?;
        let [runs, ensembles, times, levels] = variable.shape();
        check_range("run", &request.run, runs)?;
        check_range("ensemble", &request.ensemble, ensembles)?;
        check_range("time", &request.time, times)?;
        check_range("level", &request.level, levels)?;
        check_range("y", &request.y, grid.ny as usize)?;
        check_range("x", &request.x, grid.nx as usize)?;

        let mut targets = Vec::new();
        for (r, run) in request.run.clone().enumerate() {
            for (e, ens) in request.ensemble.clone().enumerate() {
                for (t, time) in request.time.clone().enumerate() {
                    for (l, level) in request.level.clone().enumerate() {
                        targets.push(([run, ens, time, level], [r, e, t, l]));
                    }
                }
            }
        }

        let mut out = Array6::from_elem(request.shape(), self.missing_value);
        self.fill(variable, grid, targets, request, &mut out)?;
        Ok(out)
    }

    /// Read a single value.
    #[allow(clippy::too_many_arguments)]
    pub fn read_point(
        &self,
        name: &str,
        run: usize,
        ensemble: usize,
        time: usize,
        level: usize,
        y: usize,
        x: usize,
    ) -> Result<f32> {
        let block = self.read_slice(name, &SliceRequest::point(run, ensemble, time, level, y, x))?;
        Ok(block[[0, 0, 0, 0, 0, 0]])
    }

    /// Read along the best time series of `name`.
    ///
    /// `request.time` indexes [`BestTimeSeries::for_variable`]; `request.run`
    /// is ignored. The result has shape (ensemble, time, level, y, x).
    pub fn read_best(&self, name: &str, request: &SliceRequest) -> Result<Array5<f32>> {
        let (variable, grid) = self.variable(name)?;
        let best = BestTimeSeries::for_variable(variable);
        let [_, ensembles, _, levels] = variable.shape();
        check_range("time", &request.time, best.len())?;
        check_range("ensemble", &request.ensemble, ensembles)?;
        check_range("level", &request.level, levels)?;
        check_range("y", &request.y, grid.ny as usize)?;
        check_range("x", &request.x, grid.nx as usize)?;

        let mut targets = Vec::new();
        for (e, ens) in request.ensemble.clone().enumerate() {
            for (t, step) in best.times()[request.time.clone()].iter().enumerate() {
                for (l, level) in request.level.clone().enumerate() {
                    targets.push(([step.run, ens, step.time, level], [0, e, t, l]));
                }
            }
        }

        let request = SliceRequest {
            run: 0..1,
            ..request.clone()
        };
        let mut out = Array6::from_elem(request.shape(), self.missing_value);
        self.fill(variable, grid, targets, &request, &mut out)?;
        Ok(out.index_axis_move(Axis(0), 0))
    }

    /// Decode each distinct record behind `targets` once and copy its
    /// window into every output cell that references it.
    fn fill(
        &self,
        variable: &Variable,
        grid: &GridDefinition,
        targets: Vec<(Cell, [usize; 4])>,
        request: &SliceRequest,
        out: &mut Array6<f32>,
    ) -> Result<()> {
        let mut by_record: BTreeMap<IndexEntry, Vec<[usize; 4]>> = BTreeMap::new();
        for (cell, out_cell) in targets {
            if let Some(entry) = variable.entry(cell) {
                by_record.entry(*entry).or_default().push(out_cell);
            }
        }

        debug!(
            variable = %variable.name,
            records = by_record.len(),
            "Reading slice"
        );

        for (entry, out_cells) in by_record {
            let field = self.decode(&entry, grid)?;
            let field = ArrayView2::from_shape((field.ny, field.nx), &field.values[..])
                .map_err(|e| self.decode_error(&entry, GribError::unpacking(e.to_string())))?;
            let window = field.slice(s![request.y.clone(), request.x.clone()]);
            for [r, e, t, l] in out_cells {
                out.slice_mut(s![r, e, t, l, .., ..]).assign(&window);
            }
        }
        Ok(())
    }

    fn decode(&self, entry: &IndexEntry, grid: &GridDefinition) -> Result<DecodedField> {
        let path = self.collection.files.get(entry.file as usize).ok_or_else(|| {
            IndexError::serialization(format!("index entry references unknown file {}", entry.file))
        })?;

        let message = {
            let mut file = self.pool.acquire(path)?;
            read_message(&mut *file, &entry.locator()).map_err(|e| match e {
                GribError::Io(io) => IndexError::Io(io),
                other => self.decode_error(entry, other),
            })?
        };

        let field = decode_message(&message, entry.field, &self.policy)
            .map_err(|e| self.decode_error(entry, e))?;
        if field.nx != grid.nx as usize || field.ny != grid.ny as usize {
            return Err(self.decode_error(
                entry,
                GribError::unpacking(format!(
                    "decoded {}x{} field for a {}x{} grid",
                    field.nx, field.ny, grid.nx, grid.ny
                )),
            ));
        }
        Ok(field)
    }

    fn decode_error(&self, entry: &IndexEntry, source: GribError) -> IndexError {
        IndexError::Decode {
            path: self
                .collection
                .files
                .get(entry.file as usize)
                .cloned()
                .unwrap_or_default(),
            pos: entry.pos,
            source,
        }
    }
}

//! Field values that identify where they came from.
//!
//! A decoded slice can be checked against these patterns to confirm it was
//! read from the right record and the right grid cells.

/// Row-major `width * height` values where cell (col, row) holds
/// `col * 1000 + row`.
///
/// ```
/// use test_utils::create_test_grid;
///
/// let grid = create_test_grid(10, 5);
/// assert_eq!(grid[1], 1000.0); // col 1, row 0
/// assert_eq!(grid[10], 1.0); // col 0, row 1
/// ```
pub fn create_test_grid(width: usize, height: usize) -> Vec<f32> {
    (0..height)
        .flat_map(|row| (0..width).map(move |col| (col * 1000 + row) as f32))
        .collect()
}

/// Row-major values `tag + index`. Distinct tags per record (the forecast
/// hour, or hour plus a run offset) tell records apart after aggregation.
pub fn create_tagged_grid(width: usize, height: usize, tag: f32) -> Vec<f32> {
    (0..width * height).map(|i| tag + i as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_grid() {
        let grid = create_test_grid(10, 5);
        assert_eq!(grid.len(), 50);
        assert_eq!(grid[0], 0.0);
        assert_eq!(grid[49], 9004.0);
    }

    #[test]
    fn test_create_tagged_grid() {
        let grid = create_tagged_grid(3, 2, 6000.0);
        assert_eq!(grid, vec![6000.0, 6001.0, 6002.0, 6003.0, 6004.0, 6005.0]);
    }
}

//! Depression filling and D8 flow routing.
//!
//! Compiled with the `hydrology` feature; without it every entry point
//! returns [`TerrainError::DerivativeUnavailable`].
//!
//! ## Direction codes
//!
//! ```text
//!  32  64 128
//!  16   x   1
//!   8   4   2
//! ```
//!
//! 0 marks an interior cell with no downslope neighbour (a flat left by the
//! fill). Cells on the border or next to nodata have no direction and are
//! nodata.
//!
//! When several neighbours share the steepest drop, cardinal directions win
//! over diagonals, in the order E, S, W, N, SE, SW, NW, NE.

use crate::derived::DerivedRaster;
#[cfg(feature = "hydrology")]
use crate::derived::Product;
use crate::{Result, TerrainError};
use terrafetch_dem::Raster;

/// East.
pub const D8_EAST: u8 = 1;
/// South-east.
pub const D8_SOUTH_EAST: u8 = 2;
/// South.
pub const D8_SOUTH: u8 = 4;
/// South-west.
pub const D8_SOUTH_WEST: u8 = 8;
/// West.
pub const D8_WEST: u8 = 16;
/// North-west.
pub const D8_NORTH_WEST: u8 = 32;
/// North.
pub const D8_NORTH: u8 = 64;
/// North-east.
pub const D8_NORTH_EAST: u8 = 128;
/// No downslope neighbour.
pub const D8_UNRESOLVED: u8 = 0;

/// Which cells may drain out of the grid during depression filling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Outlets {
    /// Only the lowest edge cell of each connected region of valid data.
    #[default]
    Min,
    /// Every edge cell.
    Edge,
}

/// Raise every depression to its spill level.
///
/// Edge cells are cells on the grid border and cells next to nodata; water
/// leaves the grid only through the cells `outlets` selects. Nodata stays
/// nodata.
pub fn fill_depressions(elevation: &Raster, outlets: Outlets) -> Result<DerivedRaster> {
    #[cfg(feature = "hydrology")]
    {
        Ok(DerivedRaster::new(
            Product::FilledElevation,
            routing::fill(elevation, outlets),
        ))
    }
    #[cfg(not(feature = "hydrology"))]
    {
        let _ = (elevation, outlets);
        Err(unavailable("depression filling"))
    }
}

/// D8 flow direction of `elevation`, after filling depressions with
/// [`Outlets::Min`].
pub fn flow_direction(elevation: &Raster) -> Result<DerivedRaster> {
    #[cfg(feature = "hydrology")]
    {
        let filled = routing::fill(elevation, Outlets::Min);
        Ok(DerivedRaster::new(
            Product::FlowDirection,
            routing::directions(&filled),
        ))
    }
    #[cfg(not(feature = "hydrology"))]
    {
        let _ = elevation;
        Err(unavailable("flow direction"))
    }
}

/// Number of cells draining through each cell, counting the cell itself.
///
/// Flow stops at cells without a direction: it is not passed on to border
/// cells or nodata.
pub fn flow_accumulation(flow_direction: &DerivedRaster) -> Result<DerivedRaster> {
    #[cfg(feature = "hydrology")]
    {
        if flow_direction.product() != Product::FlowDirection {
            return Err(TerrainError::UnexpectedProduct {
                expected: "flow direction",
                found: flow_direction.product(),
            });
        }
        Ok(DerivedRaster::new(
            Product::FlowAccumulation,
            routing::accumulate(flow_direction.raster()),
        ))
    }
    #[cfg(not(feature = "hydrology"))]
    {
        let _ = flow_direction;
        Err(unavailable("flow accumulation"))
    }
}

#[cfg(not(feature = "hydrology"))]
fn unavailable(what: &str) -> TerrainError {
    TerrainError::DerivativeUnavailable(format!(
        "{} requires the `hydrology` feature",
        what
    ))
}

#[cfg(feature = "hydrology")]
mod routing {
    use super::*;
    use crate::surface::neighbourhood;
    use ndarray::Array2;
    use std::cmp::Ordering;
    use std::collections::{BinaryHeap, VecDeque};
    use tracing::{debug, warn};

    /// (code, row offset, col offset) in tie-break order.
    const NEIGHBOURS: [(u8, isize, isize); 8] = [
        (D8_EAST, 0, 1),
        (D8_SOUTH, 1, 0),
        (D8_WEST, 0, -1),
        (D8_NORTH, -1, 0),
        (D8_SOUTH_EAST, 1, 1),
        (D8_SOUTH_WEST, 1, -1),
        (D8_NORTH_WEST, -1, -1),
        (D8_NORTH_EAST, -1, 1),
    ];

    fn offset(code: u8) -> Option<(isize, isize)> {
        NEIGHBOURS
            .iter()
            .find(|(c, _, _)| *c == code)
            .map(|&(_, dr, dc)| (dr, dc))
    }

    fn step(row: usize, col: usize, dr: isize, dc: isize, rows: usize, cols: usize) -> Option<(usize, usize)> {
        let r = row.checked_add_signed(dr)?;
        let c = col.checked_add_signed(dc)?;
        (r < rows && c < cols).then_some((r, c))
    }

    /// Min-heap entry ordered by elevation, then by cell index.
    #[derive(Debug, Clone, Copy)]
    struct Cell {
        z: f32,
        index: usize,
    }

    impl PartialEq for Cell {
        fn eq(&self, other: &Self) -> bool {
            self.cmp(other) == Ordering::Equal
        }
    }

    impl Eq for Cell {}

    impl PartialOrd for Cell {
        fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
            Some(self.cmp(other))
        }
    }

    impl Ord for Cell {
        fn cmp(&self, other: &Self) -> Ordering {
            other
                .z
                .total_cmp(&self.z)
                .then_with(|| other.index.cmp(&self.index))
        }
    }

    fn is_edge(raster: &Raster, row: usize, col: usize) -> bool {
        let (cols, rows) = raster.dimensions();
        if row == 0 || col == 0 || row + 1 == rows || col + 1 == cols {
            return true;
        }
        NEIGHBOURS.iter().any(|&(_, dr, dc)| {
            step(row, col, dr, dc, rows, cols).is_some_and(|(r, c)| raster.get(r, c).is_none())
        })
    }

    /// Priority-flood fill.
    pub(super) fn fill(elevation: &Raster, outlets: Outlets) -> Raster {
        let (cols, rows) = elevation.dimensions();
        let mut filled = elevation.clone();
        let mut visited = Array2::from_elem((rows, cols), false);

        let mut edges: Vec<Cell> = Vec::new();
        for ((row, col), &z) in elevation.data().indexed_iter() {
            if !elevation.is_nodata(z) && is_edge(elevation, row, col) {
                edges.push(Cell {
                    z,
                    index: row * cols + col,
                });
            }
        }

        let mut heap = BinaryHeap::new();
        match outlets {
            Outlets::Edge => {
                for cell in edges {
                    visited[[cell.index / cols, cell.index % cols]] = true;
                    heap.push(cell);
                }
                flood(&mut filled, &mut visited, &mut heap);
            }
            Outlets::Min => {
                // Ascending (z, index); each flood covers the seed's whole region.
                edges.sort_by(|a, b| b.cmp(a));
                for cell in edges {
                    let (row, col) = (cell.index / cols, cell.index % cols);
                    if visited[[row, col]] {
                        continue;
                    }
                    visited[[row, col]] = true;
                    heap.push(cell);
                    flood(&mut filled, &mut visited, &mut heap);
                }
            }
        }

        let raised = elevation
            .data()
            .iter()
            .zip(filled.data().iter())
            .filter(|(before, after)| before != after && !elevation.is_nodata(**before))
            .count();
        debug!(?outlets, raised, "Filled depressions");
        filled
    }

    fn flood(filled: &mut Raster, visited: &mut Array2<bool>, heap: &mut BinaryHeap<Cell>) {
        let (cols, rows) = filled.dimensions();
        while let Some(cell) = heap.pop() {
            let (row, col) = (cell.index / cols, cell.index % cols);
            for &(_, dr, dc) in &NEIGHBOURS {
                let Some((r, c)) = step(row, col, dr, dc, rows, cols) else {
                    continue;
                };
                if visited[[r, c]] {
                    continue;
                }
                let Some(z) = filled.get(r, c) else {
                    continue;
                };
                visited[[r, c]] = true;
                let level = z.max(cell.z);
                filled.data_mut()[[r, c]] = level;
                heap.push(Cell {
                    z: level,
                    index: r * cols + c,
                });
            }
        }
    }

    /// Steepest-descent D8 codes.
    pub(super) fn directions(elevation: &Raster) -> Raster {
        let (cols, rows) = elevation.dimensions();
        let (dx, dy) = elevation.pixel_size_meters();
        let diagonal = dx.hypot(dy);
        let nodata = elevation.nodata();
        let mut unresolved = 0usize;

        let data = Array2::from_shape_fn((rows, cols), |(row, col)| {
            let Some(window) = neighbourhood(elevation, row, col) else {
                return nodata;
            };
            let z = window[4];
            let mut best = (D8_UNRESOLVED, 0.0);
            for &(code, dr, dc) in &NEIGHBOURS {
                let neighbour = window[((dr + 1) * 3 + dc + 1) as usize];
                let distance = match (dr, dc) {
                    (0, _) => dx,
                    (_, 0) => dy,
                    _ => diagonal,
                };
                let drop = (z - neighbour) / distance;
                if drop > best.1 {
                    best = (code, drop);
                }
            }
            if best.0 == D8_UNRESOLVED {
                unresolved += 1;
            }
            f32::from(best.0)
        });

        debug!(unresolved, "Derived flow direction");
        Raster::new(data, elevation.transform(), elevation.crs(), nodata)
    }

    /// Topological accumulation over the direction graph.
    pub(super) fn accumulate(directions: &Raster) -> Raster {
        let (cols, rows) = directions.dimensions();
        let nodata = directions.nodata();

        let target = |row: usize, col: usize| -> Option<usize> {
            let code = directions.get(row, col)?;
            let (dr, dc) = offset(code as u8)?;
            let (r, c) = step(row, col, dr, dc, rows, cols)?;
            directions.get(r, c).map(|_| r * cols + c)
        };

        let targets: Vec<Option<usize>> = (0..rows * cols).map(|i| target(i / cols, i % cols)).collect();
        let mut inflow = vec![0u32; rows * cols];
        for t in targets.iter().flatten() {
            inflow[*t] += 1;
        }

        let mut accumulation = vec![0f64; rows * cols];
        let mut queue = VecDeque::new();
        for (i, value) in directions.data().iter().enumerate() {
            if directions.is_nodata(*value) {
                continue;
            }
            accumulation[i] = 1.0;
            if inflow[i] == 0 {
                queue.push_back(i);
            }
        }

        let mut processed = 0usize;
        while let Some(i) = queue.pop_front() {
            processed += 1;
            if let Some(t) = targets[i] {
                accumulation[t] += accumulation[i];
                inflow[t] -= 1;
                if inflow[t] == 0 {
                    queue.push_back(t);
                }
            }
        }

        let data = Array2::from_shape_fn((rows, cols), |(row, col)| {
            let i = row * cols + col;
            if directions.get(row, col).is_none() || inflow[i] > 0 {
                nodata
            } else {
                accumulation[i] as f32
            }
        });

        let cyclic = inflow.iter().filter(|n| **n > 0).count();
        if cyclic > 0 {
            warn!(cells = cyclic, "Flow directions contain cycles, cells left as nodata");
        }
        debug!(cells = processed, "Accumulated flow");
        Raster::new(data, directions.transform(), directions.crs(), nodata)
    }
}


#[cfg(all(test, not(feature = "hydrology")))]
mod unavailable_tests {
    use super::*;
    use ndarray::Array2;
    use terrafetch_dem::{Crs, GeoTransform};

    #[test]
    fn test_routing_needs_hydrology_feature() {
        let dem = Raster::new(
            Array2::from_shape_fn((4, 4), |(r, c)| (r + c) as f32),
            GeoTransform {
                origin_x: 0.0,
                origin_y: 40.0,
                pixel_width: 10.0,
                pixel_height: 10.0,
            },
            Crs::WEB_MERCATOR,
            -9999.0,
        );
        assert!(matches!(
            fill_depressions(&dem, Outlets::Edge),
            Err(TerrainError::DerivativeUnavailable(_))
        ));
        match flow_direction(&dem) {
            Err(TerrainError::DerivativeUnavailable(msg)) => assert!(msg.contains("hydrology")),
            other => panic!("expected DerivativeUnavailable, got {:?}", other),
        }
        let elevation = DerivedRaster::elevation(dem);
        assert!(matches!(
            flow_accumulation(&elevation),
            Err(TerrainError::DerivativeUnavailable(_))
        ));
    }
}

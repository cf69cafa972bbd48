use std::collections::{BTreeMap, BTreeSet};

use crate::cell::{Cell, CellId};
use crate::coords::{Frame, LocalCoords};
use crate::geometry::Geometry;
use crate::math::{direction, point_at, Point2, TINY_MOVE, TOLERANCE};

/// Unique identifier for a universe, assigned by the caller.
pub type UniverseId = i32;

/// The distinguished root universe every chain starts in.
pub const ROOT_UNIVERSE: UniverseId = 0;

/// A local coordinate system populated by cells.
///
/// Cells are kept in ascending-id order; point location tests them in that
/// order and the first containing cell wins (the cells of a consistent
/// universe partition it, so at any interior point exactly one contains).
#[derive(Debug, Clone)]
pub struct SimpleUniverse {
    id: UniverseId,
    cells: BTreeSet<CellId>,
    fsr_map: BTreeMap<CellId, usize>,
}

impl SimpleUniverse {
    #[must_use]
    pub fn new(id: UniverseId) -> Self {
        Self {
            id,
            cells: BTreeSet::new(),
            fsr_map: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> UniverseId {
        self.id
    }

    pub fn add_cell(&mut self, cell: CellId) {
        self.cells.insert(cell);
    }

    pub fn cells(&self) -> impl Iterator<Item = CellId> + '_ {
        self.cells.iter().copied()
    }

    #[must_use]
    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    /// Prefix count of flat source regions under the subtree rooted at
    /// `cell`, relative to this universe.
    #[must_use]
    pub fn fsr_offset(&self, cell: CellId) -> Option<usize> {
        self.fsr_map.get(&cell).copied()
    }

    pub(crate) fn set_fsr_map(&mut self, map: BTreeMap<CellId, usize>) {
        self.fsr_map = map;
    }

    /// Locates the cell containing the chain's tail point in this universe.
    ///
    /// Stamps the resolved cell on the tail frame; fill cells push a child
    /// frame and recurse into the filling universe. Returns the terminal
    /// material cell, or `None` if no cell contains the point.
    pub fn find_cell(&self, coords: &mut LocalCoords, geometry: &Geometry) -> Option<CellId> {
        let point = *coords.lowest_level().point();
        for cell_id in self.cells() {
            let cell = geometry.cells().get(&cell_id)?;
            if !cell.contains(&point, geometry.surfaces()) {
                continue;
            }
            if let Frame::Universe { cell: slot, .. } = coords.lowest_level_mut() {
                *slot = Some(cell_id);
            }
            return match cell {
                Cell::Basic(_) => Some(cell_id),
                Cell::Fill(fill) => {
                    coords.push(Frame::Universe {
                        universe: fill.fill(),
                        point,
                        cell: None,
                    });
                    geometry
                        .universes()
                        .get(&fill.fill())?
                        .find_cell(coords, geometry)
                }
            };
        }
        None
    }
}

/// A universe tiling sub-universes on a regular rectangular grid.
///
/// The lattice is centered on `(x0, y0)`; tile `(i, j)` counts columns from
/// the left and rows from the bottom.
#[derive(Debug, Clone)]
pub struct Lattice {
    id: UniverseId,
    num_x: usize,
    num_y: usize,
    dx: f64,
    dy: f64,
    x0: f64,
    y0: f64,
    tiles: Vec<UniverseId>,
    fsr_map: Vec<usize>,
}

impl Lattice {
    /// Creates a lattice from a tile grid given row-by-row, top row first
    /// (the way lattice decks are written); rows are flipped on storage so
    /// that row index `j = 0` is the bottom row.
    ///
    /// # Errors
    ///
    /// Returns [`crate::GeometryError::LatticeShape`] if the grid is not
    /// `num_y` rows of `num_x` tiles.
    pub fn new(
        id: UniverseId,
        num_x: usize,
        num_y: usize,
        dx: f64,
        dy: f64,
        x0: f64,
        y0: f64,
        grid: Vec<Vec<UniverseId>>,
    ) -> crate::Result<Self> {
        if grid.len() != num_y || grid.iter().any(|row| row.len() != num_x) {
            return Err(crate::GeometryError::LatticeShape { lattice_id: id });
        }
        let mut tiles = Vec::with_capacity(num_x * num_y);
        for row in grid.iter().rev() {
            tiles.extend_from_slice(row);
        }
        Ok(Self {
            id,
            num_x,
            num_y,
            dx,
            dy,
            x0,
            y0,
            tiles,
            fsr_map: vec![0; num_x * num_y],
        })
    }

    #[must_use]
    pub fn id(&self) -> UniverseId {
        self.id
    }

    #[must_use]
    pub fn num_x(&self) -> usize {
        self.num_x
    }

    #[must_use]
    pub fn num_y(&self) -> usize {
        self.num_y
    }

    #[must_use]
    pub fn x_min(&self) -> f64 {
        self.x0 - self.num_x as f64 * self.dx / 2.0
    }

    #[must_use]
    pub fn y_min(&self) -> f64 {
        self.y0 - self.num_y as f64 * self.dy / 2.0
    }

    /// Universe id tiled at column `i`, row `j` (row 0 at the bottom).
    #[must_use]
    pub fn tile(&self, i: usize, j: usize) -> UniverseId {
        self.tiles[j * self.num_x + i]
    }

    /// Prefix count of flat source regions under tile `(i, j)`.
    #[must_use]
    pub fn fsr_offset(&self, i: usize, j: usize) -> usize {
        self.fsr_map[j * self.num_x + i]
    }

    pub(crate) fn set_fsr_map(&mut self, map: Vec<usize>) {
        self.fsr_map = map;
    }

    /// Lattice cell indices containing a point in the lattice frame, or
    /// `None` when the point lies outside the grid.
    #[must_use]
    pub fn tile_indices(&self, point: &Point2) -> Option<(usize, usize)> {
        let fi = ((point.x - self.x_min()) / self.dx).floor();
        let fj = ((point.y - self.y_min()) / self.dy).floor();
        if fi < 0.0 || fj < 0.0 || fi >= self.num_x as f64 || fj >= self.num_y as f64 {
            return None;
        }
        Some((fi as usize, fj as usize))
    }

    /// Locates the cell containing the chain's tail point.
    ///
    /// Stamps the tail as a lattice frame with the tile indices, pushes a
    /// child frame translated into the tile universe's coordinate system,
    /// and recurses. Returns `None` when the point is outside the grid.
    pub fn find_cell(&self, coords: &mut LocalCoords, geometry: &Geometry) -> Option<CellId> {
        let point = *coords.lowest_level().point();
        let (i, j) = self.tile_indices(&point)?;
        *coords.lowest_level_mut() = Frame::Lattice {
            lattice: self.id,
            point,
            i,
            j,
        };
        let center_x = self.x_min() + (i as f64 + 0.5) * self.dx;
        let center_y = self.y_min() + (j as f64 + 0.5) * self.dy;
        let tile = self.tile(i, j);
        coords.push(Frame::Universe {
            universe: tile,
            point: Point2::new(point.x - center_x, point.y - center_y),
            cell: None,
        });
        geometry.universes().get(&tile)?.find_cell(coords, geometry)
    }

    /// Steps the chain across the boundary of its current lattice cell
    /// along `phi` and relocates it.
    ///
    /// The chain's tail must be this lattice's frame (descendant levels
    /// already pruned). The tail is advanced to the nearest edge of the
    /// current `(i, j)` cell plus a tiny nudge, every ancestor shifted by
    /// the same delta, and the point relocated with [`Lattice::find_cell`].
    /// Returns `None` when no edge lies ahead or the step leaves the grid;
    /// the caller then ascends a level.
    pub fn find_next_lattice_cell(
        &self,
        coords: &mut LocalCoords,
        phi: f64,
        geometry: &Geometry,
    ) -> Option<CellId> {
        let Frame::Lattice { point, i, j, .. } = coords.lowest_level() else {
            return None;
        };
        let (point, i, j) = (*point, *i, *j);
        let dir = direction(phi);

        let x_lo = self.x_min() + i as f64 * self.dx;
        let y_lo = self.y_min() + j as f64 * self.dy;
        let mut nearest: Option<f64> = None;
        if dir.x.abs() > TOLERANCE {
            for edge in [x_lo, x_lo + self.dx] {
                let t = (edge - point.x) / dir.x;
                if t > 0.0 && nearest.is_none_or(|best| t < best) {
                    nearest = Some(t);
                }
            }
        }
        if dir.y.abs() > TOLERANCE {
            for edge in [y_lo, y_lo + self.dy] {
                let t = (edge - point.y) / dir.y;
                if t > 0.0 && nearest.is_none_or(|best| t < best) {
                    nearest = Some(t);
                }
            }
        }

        let t = nearest?;
        let crossing = point_at(&point, &dir, t);
        coords.update_most_local(&crossing);
        coords.adjust_coords(&(dir * TINY_MOVE));
        self.find_cell(coords, geometry)
    }
}

/// A universe: simple (a group of cells) or a lattice tiling.
///
/// Both live in the geometry's single universe registry; a lattice is a
/// universe for every descent purpose.
#[derive(Debug, Clone)]
pub enum Universe {
    Simple(SimpleUniverse),
    Lattice(Lattice),
}

impl Universe {
    #[must_use]
    pub fn id(&self) -> UniverseId {
        match self {
            Universe::Simple(u) => u.id,
            Universe::Lattice(l) => l.id,
        }
    }

    #[must_use]
    pub fn as_simple(&self) -> Option<&SimpleUniverse> {
        match self {
            Universe::Simple(u) => Some(u),
            Universe::Lattice(_) => None,
        }
    }

    #[must_use]
    pub fn as_lattice(&self) -> Option<&Lattice> {
        match self {
            Universe::Simple(_) => None,
            Universe::Lattice(l) => Some(l),
        }
    }

    /// Dispatches point location to the variant's descent.
    pub fn find_cell(&self, coords: &mut LocalCoords, geometry: &Geometry) -> Option<CellId> {
        match self {
            Universe::Simple(u) => u.find_cell(coords, geometry),
            Universe::Lattice(l) => l.find_cell(coords, geometry),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn lattice_2x2() -> Lattice {
        Lattice::new(5, 2, 2, 1.0, 1.0, 0.0, 0.0, vec![vec![8, 9], vec![6, 7]]).unwrap()
    }

    #[test]
    fn grid_rows_flip_to_bottom_up() {
        let lat = lattice_2x2();
        // Input top row [8, 9] lands at j = 1.
        assert_eq!(lat.tile(0, 0), 6);
        assert_eq!(lat.tile(1, 0), 7);
        assert_eq!(lat.tile(0, 1), 8);
        assert_eq!(lat.tile(1, 1), 9);
    }

    #[test]
    fn tile_indices_inside_and_outside() {
        let lat = lattice_2x2();
        assert_eq!(lat.tile_indices(&Point2::new(-0.5, -0.5)), Some((0, 0)));
        assert_eq!(lat.tile_indices(&Point2::new(0.25, 0.75)), Some((1, 1)));
        assert_eq!(lat.tile_indices(&Point2::new(-1.5, 0.0)), None);
        assert_eq!(lat.tile_indices(&Point2::new(0.0, 1.0)), None);
    }

    #[test]
    fn ragged_grid_rejected() {
        let err = Lattice::new(5, 2, 2, 1.0, 1.0, 0.0, 0.0, vec![vec![8, 9], vec![6]]).unwrap_err();
        assert!(matches!(
            err,
            crate::GeometryError::LatticeShape { lattice_id: 5 }
        ));
    }
}

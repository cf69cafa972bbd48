use std::collections::BTreeMap;

use crate::material::MaterialId;
use crate::math::Point2;
use crate::surface::{Surface, SurfaceId};
use crate::universe::UniverseId;

/// Unique identifier for a cell, assigned by the caller.
pub type CellId = i32;

/// Which side of a surface a cell keeps.
///
/// A point satisfies a halfspace iff `sign * evaluate(point) >= 0`, so a
/// point exactly on the surface belongs to both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Halfspace {
    Positive,
    Negative,
}

impl Halfspace {
    #[must_use]
    pub fn sign(self) -> f64 {
        match self {
            Halfspace::Positive => 1.0,
            Halfspace::Negative => -1.0,
        }
    }
}

/// A cell holding a material: a leaf region of the universe tree.
///
/// `rings` and `sectors` request a subdivision refinement that the geometry
/// performs during initialization; afterwards the cell has been replaced by
/// a fill cell over a synthetic universe of unsubdivided children.
#[derive(Debug, Clone)]
pub struct CellBasic {
    id: CellId,
    universe: UniverseId,
    material: MaterialId,
    halfspaces: Vec<(SurfaceId, Halfspace)>,
    rings: u32,
    sectors: u32,
}

impl CellBasic {
    #[must_use]
    pub fn new(
        id: CellId,
        universe: UniverseId,
        material: MaterialId,
        halfspaces: Vec<(SurfaceId, Halfspace)>,
        rings: u32,
        sectors: u32,
    ) -> Self {
        Self {
            id,
            universe,
            material,
            halfspaces,
            rings,
            sectors,
        }
    }

    #[must_use]
    pub fn material(&self) -> MaterialId {
        self.material
    }

    #[must_use]
    pub fn universe(&self) -> UniverseId {
        self.universe
    }

    #[must_use]
    pub fn halfspaces(&self) -> &[(SurfaceId, Halfspace)] {
        &self.halfspaces
    }

    #[must_use]
    pub fn rings(&self) -> u32 {
        self.rings
    }

    #[must_use]
    pub fn sectors(&self) -> u32 {
        self.sectors
    }
}

/// A cell filled by another universe rather than a material.
#[derive(Debug, Clone)]
pub struct CellFill {
    id: CellId,
    universe: UniverseId,
    fill: UniverseId,
    halfspaces: Vec<(SurfaceId, Halfspace)>,
}

impl CellFill {
    #[must_use]
    pub fn new(
        id: CellId,
        universe: UniverseId,
        fill: UniverseId,
        halfspaces: Vec<(SurfaceId, Halfspace)>,
    ) -> Self {
        Self {
            id,
            universe,
            fill,
            halfspaces,
        }
    }

    #[must_use]
    pub fn fill(&self) -> UniverseId {
        self.fill
    }
}

/// A region of a universe bounded by the intersection of halfspaces.
#[derive(Debug, Clone)]
pub enum Cell {
    Basic(CellBasic),
    Fill(CellFill),
}

impl Cell {
    #[must_use]
    pub fn id(&self) -> CellId {
        match self {
            Cell::Basic(c) => c.id,
            Cell::Fill(c) => c.id,
        }
    }

    /// Id of the universe this cell belongs to.
    #[must_use]
    pub fn universe(&self) -> UniverseId {
        match self {
            Cell::Basic(c) => c.universe,
            Cell::Fill(c) => c.universe,
        }
    }

    #[must_use]
    pub fn halfspaces(&self) -> &[(SurfaceId, Halfspace)] {
        match self {
            Cell::Basic(c) => &c.halfspaces,
            Cell::Fill(c) => &c.halfspaces,
        }
    }

    #[must_use]
    pub fn as_basic(&self) -> Option<&CellBasic> {
        match self {
            Cell::Basic(c) => Some(c),
            Cell::Fill(_) => None,
        }
    }

    #[must_use]
    pub fn fill_universe(&self) -> Option<UniverseId> {
        match self {
            Cell::Basic(_) => None,
            Cell::Fill(c) => Some(c.fill),
        }
    }

    /// Whether `point` satisfies every halfspace of the cell.
    #[must_use]
    pub fn contains(&self, point: &Point2, surfaces: &BTreeMap<SurfaceId, Surface>) -> bool {
        self.halfspaces().iter().all(|&(sid, half)| {
            surfaces
                .get(&sid)
                .is_some_and(|s| half.sign() * s.evaluate(point) >= 0.0)
        })
    }

    /// Smallest strictly positive distance from `point` along `phi` to any
    /// of the cell's surfaces, with the intersection point.
    ///
    /// Returns `None` when the trajectory intersects none of them. Ties
    /// between surfaces are irrelevant: the ray crosses into a neighboring
    /// cell either way.
    #[must_use]
    pub fn min_surface_dist(
        &self,
        point: &Point2,
        phi: f64,
        surfaces: &BTreeMap<SurfaceId, Surface>,
    ) -> Option<(f64, Point2)> {
        let mut nearest: Option<(f64, Point2)> = None;
        for &(sid, _) in self.halfspaces() {
            let Some(surface) = surfaces.get(&sid) else {
                continue;
            };
            if let Some((dist, hit)) = surface.intersection(point, phi) {
                if nearest.is_none_or(|(best, _)| dist < best) {
                    nearest = Some((dist, hit));
                }
            }
        }
        nearest
    }
}

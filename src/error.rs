use std::fmt;

use thiserror::Error;

/// The registry a failing id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Surface,
    Cell,
    Universe,
    Lattice,
    Material,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Surface => "surface",
            EntityKind::Cell => "cell",
            EntityKind::Universe => "universe",
            EntityKind::Lattice => "lattice",
            EntityKind::Material => "material",
        };
        write!(f, "{name}")
    }
}

/// Top-level error type for the geometry engine.
///
/// All variants are structural inconsistencies detected at build-up,
/// initialization, or traversal time. None are retried; every failure is
/// fatal to the current operation and propagates to the caller.
#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("cannot add a second {kind} with id = {id}")]
    DuplicateId { kind: EntityKind, id: i32 },

    #[error("reference to {kind} with id = {id} which does not exist")]
    MissingReference { kind: EntityKind, id: i32 },

    #[error(
        "material {material_id} has {got} energy groups but the geometry \
         contains material(s) with {expected}"
    )]
    EnergyGroupMismatch {
        material_id: i32,
        expected: usize,
        got: usize,
    },

    #[error(
        "material {material_id}: sigma_a + sigma_s does not equal sigma_t \
         in group {group}"
    )]
    SigmaTotalMismatch { material_id: i32, group: usize },

    #[error("point ({x}, {y}) is outside the geometry")]
    OutOfGeometry { x: f64, y: f64 },

    #[error("created a segment with the same start and end point: x = {x}, y = {y}")]
    ZeroSegment { x: f64, y: f64 },

    #[error("could not find a cell for fsr_id = {fsr_id}")]
    FsrLookup { fsr_id: usize },

    #[error("cell {cell_id} requests ring subdivision but has no interior circle")]
    Subdivision { cell_id: i32 },

    #[error("lattice {lattice_id} grid is not num_y rows of num_x universe ids")]
    LatticeShape { lattice_id: i32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for results using [`GeometryError`].
pub type Result<T> = std::result::Result<T, GeometryError>;

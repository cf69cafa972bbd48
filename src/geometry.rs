use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::cell::{Cell, CellBasic, CellFill, CellId, Halfspace};
use crate::coords::{Frame, LocalCoords};
use crate::error::{EntityKind, GeometryError, Result};
use crate::material::{Material, MaterialId};
use crate::math::{direction, TINY_MOVE};
use crate::surface::{BoundaryType, Surface, SurfaceId, SurfaceKind};
use crate::track::{Segment, Track};
use crate::universe::{Lattice, SimpleUniverse, Universe, UniverseId, ROOT_UNIVERSE};

/// Registry of every geometric primitive plus the derived flat-source-region
/// numbering, the bounding box, and the per-edge boundary conditions.
///
/// The geometry is mutable during build-up; calling
/// [`Geometry::initialize_flat_source_regions`] is the transition to
/// read-only: afterwards every traversal query treats the registries as
/// frozen, and coordinate chains and emitted segments are owned by the
/// caller.
///
/// Primitives reference each other by id only: cells name surfaces, fill
/// cells and lattice tiles name universes. Ids are resolved through the
/// registries at use time, so no primitive ever holds a pointer into
/// another.
#[derive(Debug)]
pub struct Geometry {
    materials: BTreeMap<MaterialId, Material>,
    surfaces: BTreeMap<SurfaceId, Surface>,
    cells: BTreeMap<CellId, Cell>,
    universes: BTreeMap<UniverseId, Universe>,
    num_groups: usize,
    x_min: f64,
    x_max: f64,
    y_min: f64,
    y_max: f64,
    top_bc: bool,
    bottom_bc: bool,
    left_bc: bool,
    right_bc: bool,
    num_fsrs: usize,
    fsr_to_cell: Vec<CellId>,
    fsr_to_material: Vec<MaterialId>,
    max_seg_length: f64,
    min_seg_length: f64,
}

impl Default for Geometry {
    fn default() -> Self {
        Self::new()
    }
}

impl Geometry {
    /// Creates an empty geometry with an inverted bounding box and
    /// reflective default boundary conditions.
    #[must_use]
    pub fn new() -> Self {
        Self {
            materials: BTreeMap::new(),
            surfaces: BTreeMap::new(),
            cells: BTreeMap::new(),
            universes: BTreeMap::new(),
            num_groups: 0,
            x_min: f64::MAX,
            x_max: -f64::MAX,
            y_min: f64::MAX,
            y_max: -f64::MAX,
            top_bc: true,
            bottom_bc: true,
            left_bc: true,
            right_bc: true,
            num_fsrs: 0,
            fsr_to_cell: Vec::new(),
            fsr_to_material: Vec::new(),
            max_seg_length: 0.0,
            min_seg_length: f64::INFINITY,
        }
    }

    // --- Extents and boundary conditions ---

    #[must_use]
    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    #[must_use]
    pub fn x_min(&self) -> f64 {
        self.x_min
    }

    #[must_use]
    pub fn x_max(&self) -> f64 {
        self.x_max
    }

    #[must_use]
    pub fn y_min(&self) -> f64 {
        self.y_min
    }

    #[must_use]
    pub fn y_max(&self) -> f64 {
        self.y_max
    }

    /// Boundary condition of the top edge: `true` is reflective, `false`
    /// vacuum.
    #[must_use]
    pub fn bc_top(&self) -> bool {
        self.top_bc
    }

    #[must_use]
    pub fn bc_bottom(&self) -> bool {
        self.bottom_bc
    }

    #[must_use]
    pub fn bc_left(&self) -> bool {
        self.left_bc
    }

    #[must_use]
    pub fn bc_right(&self) -> bool {
        self.right_bc
    }

    // --- Registry access ---

    #[must_use]
    pub fn surfaces(&self) -> &BTreeMap<SurfaceId, Surface> {
        &self.surfaces
    }

    #[must_use]
    pub fn cells(&self) -> &BTreeMap<CellId, Cell> {
        &self.cells
    }

    #[must_use]
    pub fn universes(&self) -> &BTreeMap<UniverseId, Universe> {
        &self.universes
    }

    #[must_use]
    pub fn materials(&self) -> &BTreeMap<MaterialId, Material> {
        &self.materials
    }

    #[must_use]
    pub fn num_materials(&self) -> usize {
        self.materials.len()
    }

    /// Number of energy groups shared by every registered material; zero
    /// until the first material is added.
    #[must_use]
    pub fn num_groups(&self) -> usize {
        self.num_groups
    }

    /// # Errors
    ///
    /// Returns [`GeometryError::MissingReference`] if no material has this id.
    pub fn material(&self, id: MaterialId) -> Result<&Material> {
        self.materials
            .get(&id)
            .ok_or(GeometryError::MissingReference {
                kind: EntityKind::Material,
                id,
            })
    }

    /// # Errors
    ///
    /// Returns [`GeometryError::MissingReference`] if no surface has this id.
    pub fn surface(&self, id: SurfaceId) -> Result<&Surface> {
        self.surfaces
            .get(&id)
            .ok_or(GeometryError::MissingReference {
                kind: EntityKind::Surface,
                id,
            })
    }

    /// # Errors
    ///
    /// Returns [`GeometryError::MissingReference`] if no cell has this id.
    pub fn cell(&self, id: CellId) -> Result<&Cell> {
        self.cells.get(&id).ok_or(GeometryError::MissingReference {
            kind: EntityKind::Cell,
            id,
        })
    }

    /// # Errors
    ///
    /// Returns [`GeometryError::MissingReference`] if no universe has this id.
    pub fn universe(&self, id: UniverseId) -> Result<&Universe> {
        self.universes
            .get(&id)
            .ok_or(GeometryError::MissingReference {
                kind: EntityKind::Universe,
                id,
            })
    }

    /// # Errors
    ///
    /// Returns [`GeometryError::MissingReference`] if no lattice has this id.
    pub fn lattice(&self, id: UniverseId) -> Result<&Lattice> {
        self.universes
            .get(&id)
            .and_then(Universe::as_lattice)
            .ok_or(GeometryError::MissingReference {
                kind: EntityKind::Lattice,
                id,
            })
    }

    // --- Flat source region access ---

    #[must_use]
    pub fn num_fsrs(&self) -> usize {
        self.num_fsrs
    }

    /// Cell id of each flat source region, indexed by region id.
    #[must_use]
    pub fn fsr_to_cell(&self) -> &[CellId] {
        &self.fsr_to_cell
    }

    /// Material id of each flat source region, indexed by region id.
    #[must_use]
    pub fn fsr_to_material(&self) -> &[MaterialId] {
        &self.fsr_to_material
    }

    /// Longest segment length observed across all segmentations so far.
    #[must_use]
    pub fn max_segment_length(&self) -> f64 {
        self.max_seg_length
    }

    /// Shortest segment length observed across all segmentations so far.
    #[must_use]
    pub fn min_segment_length(&self) -> f64 {
        self.min_seg_length
    }

    // --- Registration ---

    /// Adds a material, checking group-count consistency across the
    /// geometry and the total cross-section identity.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::DuplicateId`] on id re-use,
    /// [`GeometryError::EnergyGroupMismatch`] when the group count
    /// disagrees with previously added materials (or is zero), and
    /// [`GeometryError::SigmaTotalMismatch`] when
    /// `sigma_a + sigma_s` fails to reproduce `sigma_t`.
    pub fn add_material(&mut self, material: Material) -> Result<()> {
        let id = material.id();
        if self.materials.contains_key(&id) {
            return Err(GeometryError::DuplicateId {
                kind: EntityKind::Material,
                id,
            });
        }
        if material.num_groups() == 0 {
            return Err(GeometryError::EnergyGroupMismatch {
                material_id: id,
                expected: self.num_groups,
                got: 0,
            });
        }
        if self.num_groups == 0 {
            self.num_groups = material.num_groups();
        } else if self.num_groups != material.num_groups() {
            return Err(GeometryError::EnergyGroupMismatch {
                material_id: id,
                expected: self.num_groups,
                got: material.num_groups(),
            });
        }
        material.check_sigma_t()?;
        info!(id, "added material");
        self.materials.insert(id, material);
        Ok(())
    }

    /// Adds a surface. Re-adding an already registered id is a silent
    /// no-op: surfaces are idempotent on id, and the bounding box is left
    /// untouched on a re-add.
    ///
    /// A reflective or vacuum surface with finite extents expands the
    /// bounding box and records the boundary condition of each edge it
    /// pushes outward.
    pub fn add_surface(&mut self, surface: Surface) {
        if self.surfaces.contains_key(&surface.id()) {
            return;
        }
        let reflective = match surface.boundary() {
            BoundaryType::Reflective => Some(true),
            BoundaryType::Vacuum => Some(false),
            BoundaryType::None => None,
        };
        if let Some(reflective) = reflective {
            if surface.x_min() < self.x_min && surface.x_min().is_finite() {
                self.x_min = surface.x_min();
                self.left_bc = reflective;
            }
            if surface.x_max() > self.x_max && surface.x_max().is_finite() {
                self.x_max = surface.x_max();
                self.right_bc = reflective;
            }
            if surface.y_min() < self.y_min && surface.y_min().is_finite() {
                self.y_min = surface.y_min();
                self.bottom_bc = reflective;
            }
            if surface.y_max() > self.y_max && surface.y_max().is_finite() {
                self.y_max = surface.y_max();
                self.top_bc = reflective;
            }
        }
        info!(id = surface.id(), "added surface");
        self.surfaces.insert(surface.id(), surface);
    }

    /// Adds a cell, auto-creating its owning simple universe if absent.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::DuplicateId`] on id re-use and
    /// [`GeometryError::MissingReference`] when the cell names an
    /// unregistered material or surface, or its owning universe id is
    /// taken by a lattice.
    pub fn add_cell(&mut self, cell: Cell) -> Result<()> {
        let id = cell.id();
        if self.cells.contains_key(&id) {
            return Err(GeometryError::DuplicateId {
                kind: EntityKind::Cell,
                id,
            });
        }
        if let Cell::Basic(basic) = &cell {
            if !self.materials.contains_key(&basic.material()) {
                return Err(GeometryError::MissingReference {
                    kind: EntityKind::Material,
                    id: basic.material(),
                });
            }
        }
        for &(surface_id, _) in cell.halfspaces() {
            if !self.surfaces.contains_key(&surface_id) {
                return Err(GeometryError::MissingReference {
                    kind: EntityKind::Surface,
                    id: surface_id,
                });
            }
        }
        let universe_id = cell.universe();
        match self.universes.get_mut(&universe_id) {
            Some(Universe::Simple(universe)) => universe.add_cell(id),
            Some(Universe::Lattice(_)) => {
                return Err(GeometryError::MissingReference {
                    kind: EntityKind::Universe,
                    id: universe_id,
                })
            }
            None => {
                let mut universe = SimpleUniverse::new(universe_id);
                universe.add_cell(id);
                self.universes
                    .insert(universe_id, Universe::Simple(universe));
                info!(universe_id, "created universe");
            }
        }
        info!(id, "added cell");
        self.cells.insert(id, cell);
        Ok(())
    }

    /// Adds an explicit (possibly empty) simple universe.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::DuplicateId`] on id re-use.
    pub fn add_universe(&mut self, universe: SimpleUniverse) -> Result<()> {
        let id = universe.id();
        if self.universes.contains_key(&id) {
            return Err(GeometryError::DuplicateId {
                kind: EntityKind::Universe,
                id,
            });
        }
        info!(id, "added universe");
        self.universes.insert(id, Universe::Simple(universe));
        Ok(())
    }

    /// Adds a lattice. The lattice enters the universe registry under its
    /// own id: a lattice is a universe for every descent purpose.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::DuplicateId`] when the id is taken by any
    /// universe (lattice or simple) and [`GeometryError::MissingReference`]
    /// when a tile names an unregistered universe.
    pub fn add_lattice(&mut self, lattice: Lattice) -> Result<()> {
        let id = lattice.id();
        if self.universes.contains_key(&id) {
            return Err(GeometryError::DuplicateId {
                kind: EntityKind::Lattice,
                id,
            });
        }
        for j in 0..lattice.num_y() {
            for i in 0..lattice.num_x() {
                let tile = lattice.tile(i, j);
                if !self.universes.contains_key(&tile) {
                    return Err(GeometryError::MissingReference {
                        kind: EntityKind::Universe,
                        id: tile,
                    });
                }
            }
        }
        info!(id, "added lattice");
        self.universes.insert(id, Universe::Lattice(lattice));
        Ok(())
    }

    // --- Flat source region numbering ---

    /// Computes the flat source region numbering for the whole universe
    /// tree and the derived region-to-cell and region-to-material maps.
    ///
    /// Must be called once after all primitives are registered and before
    /// any traversal query; afterwards the geometry is frozen. The pass is
    /// idempotent: repeating it reproduces the identical numbering.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::MissingReference`] when a fill cell or
    /// lattice tile names an unregistered universe or the root universe is
    /// absent, [`GeometryError::Subdivision`] when a ring refinement has no
    /// circle to subdivide, and [`GeometryError::FsrLookup`] when the
    /// numbering cannot be inverted.
    pub fn initialize_flat_source_regions(&mut self) -> Result<()> {
        for cell in self.cells.values() {
            if let Some(fill) = cell.fill_universe() {
                if !self.universes.contains_key(&fill) {
                    return Err(GeometryError::MissingReference {
                        kind: EntityKind::Universe,
                        id: fill,
                    });
                }
            }
        }
        self.subdivide_cells()?;
        self.num_fsrs = self.compute_fsr_maps(ROOT_UNIVERSE)?;
        info!(num_fsrs = self.num_fsrs, "number of flat source regions");

        self.fsr_to_cell.clear();
        self.fsr_to_material.clear();
        for region in 0..self.num_fsrs {
            let cell_id = self.descend_fsr(ROOT_UNIVERSE, region)?;
            match self.cells.get(&cell_id) {
                Some(Cell::Basic(basic)) => {
                    self.fsr_to_cell.push(cell_id);
                    self.fsr_to_material.push(basic.material());
                }
                _ => return Err(GeometryError::FsrLookup { fsr_id: region }),
            }
        }
        Ok(())
    }

    /// Replaces every basic cell carrying a ring/sector refinement by a
    /// fill cell over a synthetic universe of unsubdivided children.
    fn subdivide_cells(&mut self) -> Result<()> {
        let targets: Vec<CellId> = self
            .cells
            .iter()
            .filter_map(|(id, cell)| match cell {
                Cell::Basic(basic) if basic.rings() > 0 || basic.sectors() > 0 => Some(*id),
                _ => None,
            })
            .collect();
        for cell_id in targets {
            self.subdivide_cell(cell_id)?;
        }
        Ok(())
    }

    fn subdivide_cell(&mut self, cell_id: CellId) -> Result<()> {
        let Some(Cell::Basic(basic)) = self.cells.get(&cell_id) else {
            return Ok(());
        };
        let universe_id = basic.universe();
        let material = basic.material();
        let rings = basic.rings();
        let sectors = basic.sectors();
        let halfspaces = basic.halfspaces().to_vec();

        // The innermost negative-halfspace circle bounds the region being
        // refined and centers the sector planes.
        let circle = halfspaces.iter().find_map(|&(surface_id, half)| {
            if half != Halfspace::Negative {
                return None;
            }
            match self.surfaces.get(&surface_id)?.kind() {
                SurfaceKind::Circle { x, y, radius } => Some((*x, *y, *radius)),
                _ => None,
            }
        });
        if rings > 0 && circle.is_none() {
            return Err(GeometryError::Subdivision { cell_id });
        }
        let (center_x, center_y) = circle.map_or((0.0, 0.0), |(x, y, _)| (x, y));

        let mut next_surface = self.surfaces.keys().next_back().map_or(1, |id| id + 1);
        let mut next_cell = self.cells.keys().next_back().map_or(1, |id| id + 1);
        let child_universe_id = self.universes.keys().next_back().map_or(1, |id| id + 1);

        let mut sector_planes: Vec<SurfaceId> = Vec::new();
        for k in 0..sectors {
            let theta = 2.0 * std::f64::consts::PI * f64::from(k) / f64::from(sectors);
            let (a, b) = (theta.cos(), theta.sin());
            let c = -(center_x * a + center_y * b);
            self.surfaces.insert(
                next_surface,
                Surface::new(
                    next_surface,
                    SurfaceKind::Plane { a, b, c },
                    BoundaryType::None,
                ),
            );
            sector_planes.push(next_surface);
            next_surface += 1;
        }

        // Equal-area radii; the outermost ring bound is the cell's own
        // circle, which the cloned halfspaces already carry.
        let mut ring_circles: Vec<SurfaceId> = Vec::new();
        if let Some((x, y, radius)) = circle {
            for i in 1..rings {
                let r = radius * (f64::from(i) / f64::from(rings)).sqrt();
                self.surfaces.insert(
                    next_surface,
                    Surface::new(
                        next_surface,
                        SurfaceKind::Circle { x, y, radius: r },
                        BoundaryType::None,
                    ),
                );
                ring_circles.push(next_surface);
                next_surface += 1;
            }
        }

        let mut child_universe = SimpleUniverse::new(child_universe_id);
        for ring in 0..rings.max(1) as usize {
            for sector in 0..sectors.max(1) as usize {
                let mut child_halfspaces = halfspaces.clone();
                if ring > 0 {
                    child_halfspaces.push((ring_circles[ring - 1], Halfspace::Positive));
                }
                if ring < ring_circles.len() {
                    child_halfspaces.push((ring_circles[ring], Halfspace::Negative));
                }
                if sectors > 0 {
                    child_halfspaces.push((sector_planes[sector], Halfspace::Positive));
                    child_halfspaces
                        .push((sector_planes[(sector + 1) % sectors as usize], Halfspace::Negative));
                }
                self.cells.insert(
                    next_cell,
                    Cell::Basic(CellBasic::new(
                        next_cell,
                        child_universe_id,
                        material,
                        child_halfspaces,
                        0,
                        0,
                    )),
                );
                child_universe.add_cell(next_cell);
                next_cell += 1;
            }
        }
        self.universes
            .insert(child_universe_id, Universe::Simple(child_universe));
        self.cells.insert(
            cell_id,
            Cell::Fill(CellFill::new(
                cell_id,
                universe_id,
                child_universe_id,
                halfspaces,
            )),
        );
        debug!(cell_id, rings, sectors, "subdivided cell");
        Ok(())
    }

    /// Depth-first prefix-sum labeling: records, per child of `universe_id`,
    /// the count of flat source regions preceding that child's subtree, and
    /// returns the subtree total.
    fn compute_fsr_maps(&mut self, universe_id: UniverseId) -> Result<usize> {
        enum Child {
            Basic(CellId),
            Fill(CellId, UniverseId),
            Tile(UniverseId),
        }
        let children: Vec<Child> = match self.universes.get(&universe_id) {
            None => {
                return Err(GeometryError::MissingReference {
                    kind: EntityKind::Universe,
                    id: universe_id,
                })
            }
            Some(Universe::Simple(universe)) => {
                let mut children = Vec::with_capacity(universe.num_cells());
                for cell_id in universe.cells() {
                    match self.cells.get(&cell_id) {
                        Some(Cell::Basic(_)) => children.push(Child::Basic(cell_id)),
                        Some(Cell::Fill(fill)) => children.push(Child::Fill(cell_id, fill.fill())),
                        None => {
                            return Err(GeometryError::MissingReference {
                                kind: EntityKind::Cell,
                                id: cell_id,
                            })
                        }
                    }
                }
                children
            }
            Some(Universe::Lattice(lattice)) => {
                let mut children = Vec::with_capacity(lattice.num_x() * lattice.num_y());
                for j in 0..lattice.num_y() {
                    for i in 0..lattice.num_x() {
                        children.push(Child::Tile(lattice.tile(i, j)));
                    }
                }
                children
            }
        };

        let mut count = 0;
        let mut cell_map = BTreeMap::new();
        let mut tile_map = Vec::new();
        for child in children {
            match child {
                Child::Basic(cell_id) => {
                    cell_map.insert(cell_id, count);
                    count += 1;
                }
                Child::Fill(cell_id, fill) => {
                    cell_map.insert(cell_id, count);
                    count += self.compute_fsr_maps(fill)?;
                }
                Child::Tile(tile) => {
                    tile_map.push(count);
                    count += self.compute_fsr_maps(tile)?;
                }
            }
        }
        match self.universes.get_mut(&universe_id) {
            Some(Universe::Simple(universe)) => universe.set_fsr_map(cell_map),
            Some(Universe::Lattice(lattice)) => lattice.set_fsr_map(tile_map),
            None => {}
        }
        Ok(count)
    }

    /// Recovers the material cell a flat source region id addresses by
    /// inverting the prefix-sum maps from the root down.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::FsrLookup`] when the id is out of range or
    /// no consistent descent exists.
    pub fn find_cell_by_fsr(&self, fsr_id: usize) -> Result<&Cell> {
        if fsr_id >= self.num_fsrs {
            return Err(GeometryError::FsrLookup { fsr_id });
        }
        let cell_id = self.descend_fsr(ROOT_UNIVERSE, fsr_id)?;
        self.cell(cell_id)
    }

    /// One level of the region-id descent: picks the child whose map entry
    /// is the largest value not exceeding `fsr_id` (ties keep the later
    /// child), subtracts it, and recurses.
    fn descend_fsr(&self, universe_id: UniverseId, fsr_id: usize) -> Result<CellId> {
        match self.universes.get(&universe_id) {
            None => Err(GeometryError::MissingReference {
                kind: EntityKind::Universe,
                id: universe_id,
            }),
            Some(Universe::Simple(universe)) => {
                let mut chosen: Option<(usize, CellId)> = None;
                for cell_id in universe.cells() {
                    let Some(offset) = universe.fsr_offset(cell_id) else {
                        continue;
                    };
                    if offset <= fsr_id && chosen.is_none_or(|(best, _)| offset >= best) {
                        chosen = Some((offset, cell_id));
                    }
                }
                let Some((offset, cell_id)) = chosen else {
                    return Err(GeometryError::FsrLookup { fsr_id });
                };
                let remainder = fsr_id - offset;
                match self.cells.get(&cell_id) {
                    Some(Cell::Basic(_)) if remainder == 0 => Ok(cell_id),
                    Some(Cell::Basic(_)) => Err(GeometryError::FsrLookup { fsr_id }),
                    Some(Cell::Fill(fill)) => self.descend_fsr(fill.fill(), remainder),
                    None => Err(GeometryError::MissingReference {
                        kind: EntityKind::Cell,
                        id: cell_id,
                    }),
                }
            }
            Some(Universe::Lattice(lattice)) => {
                let mut chosen: Option<(usize, UniverseId)> = None;
                for j in 0..lattice.num_y() {
                    for i in 0..lattice.num_x() {
                        let offset = lattice.fsr_offset(i, j);
                        if offset <= fsr_id && chosen.is_none_or(|(best, _)| offset >= best) {
                            chosen = Some((offset, lattice.tile(i, j)));
                        }
                    }
                }
                let Some((offset, tile)) = chosen else {
                    return Err(GeometryError::FsrLookup { fsr_id });
                };
                self.descend_fsr(tile, fsr_id - offset)
            }
        }
    }

    // --- Point location and traversal ---

    /// Locates the material cell containing the chain's tail point,
    /// descending the universe tree and extending the chain one frame per
    /// level. Returns `None` for a point outside every cell.
    pub fn find_cell(&self, coords: &mut LocalCoords) -> Option<CellId> {
        let universe_id = coords.lowest_level().universe();
        self.universes.get(&universe_id)?.find_cell(coords, self)
    }

    /// Nudges the chain a tiny step along `phi` before locating it, so a
    /// track starting exactly on a boundary lands strictly inside its
    /// first flat source region.
    pub fn find_first_cell(&self, coords: &mut LocalCoords, phi: f64) -> Option<CellId> {
        coords.adjust_coords(&(direction(phi) * TINY_MOVE));
        self.find_cell(coords)
    }

    /// Moves the chain across the boundary of its current cell along `phi`
    /// and returns the cell it lands in, ascending through lattice levels
    /// when the trajectory leaves them. Returns `None` once the trajectory
    /// has left the geometry; the chain then rests at the exit point.
    pub fn find_next_cell(&self, coords: &mut LocalCoords, phi: f64) -> Option<CellId> {
        coords.prune_to_head();
        let cell_id = self.find_cell(coords)?;
        let cell = self.cells.get(&cell_id)?;
        let tail_point = *coords.lowest_level().point();
        let mut crossing = cell.min_surface_dist(&tail_point, phi, &self.surfaces);

        if let Some((_, hit)) = crossing {
            let snapshot = coords.clone();
            coords.update_most_local(&hit);
            coords.adjust_coords(&(direction(phi) * TINY_MOVE));
            coords.prune_to_head();
            let next = self.find_cell(coords);

            // Compare the nearest lattice ancestor of each chain: if they
            // disagree on the tile, the crossing actually leaves the current
            // lattice cell and the surface hit is bogus. The chains may have
            // different depths (a subdivided pin nests one level deeper than
            // a plain cell), so each side is searched independently; tile
            // indices are only comparable within the same lattice.
            let mut left_lattice_cell = next.is_none();
            let old_lattice = snapshot.frames().iter().rev().find(|f| f.is_lattice());
            let new_lattice = coords.frames().iter().rev().find(|f| f.is_lattice());
            if let (
                Some(Frame::Lattice {
                    lattice: old_id,
                    i: old_i,
                    j: old_j,
                    ..
                }),
                Some(Frame::Lattice {
                    lattice: new_id,
                    i: new_i,
                    j: new_j,
                    ..
                }),
            ) = (old_lattice, new_lattice)
            {
                if old_id == new_id && (old_i != new_i || old_j != new_j) {
                    left_lattice_cell = true;
                }
            }

            if !left_lattice_cell {
                return next;
            }
            if !snapshot.frames().iter().any(Frame::is_lattice) {
                // No lattice to escape to: the trajectory has left the
                // geometry. The chain stays at the moved exit point so the
                // final segment spans to the boundary.
                return None;
            }
            snapshot.copy_coords(coords);
            crossing = None;
        }

        if crossing.is_none() {
            // Ascend to the nearest lattice level and step across lattice
            // cells, climbing further out each time a lattice is exhausted.
            loop {
                let lattice_level = coords.frames().iter().rposition(Frame::is_lattice)?;
                coords.prune_below(lattice_level);
                let Frame::Lattice { lattice, .. } = coords.lowest_level() else {
                    return None;
                };
                let lattice = self.universes.get(lattice)?.as_lattice()?;
                let next = lattice.find_next_lattice_cell(coords, phi, self);
                if next.is_some() {
                    return next;
                }
                if lattice_level == 0 {
                    return None;
                }
                coords.prune_below(lattice_level - 1);
            }
        }
        None
    }

    /// Global flat source region id of the chain's tail: the sum of the
    /// prefix-map entries recorded along the chain.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::FsrLookup`] for a chain with an unresolved
    /// level and [`GeometryError::MissingReference`] when a frame names an
    /// unregistered universe.
    pub fn find_fsr_id(&self, coords: &LocalCoords) -> Result<usize> {
        let mut fsr_id = 0;
        for frame in coords.frames() {
            match frame {
                Frame::Universe {
                    universe,
                    cell: Some(cell),
                    ..
                } => {
                    let offset = self
                        .universes
                        .get(universe)
                        .and_then(Universe::as_simple)
                        .and_then(|u| u.fsr_offset(*cell))
                        .ok_or(GeometryError::FsrLookup { fsr_id })?;
                    fsr_id += offset;
                }
                Frame::Universe { cell: None, .. } => {
                    return Err(GeometryError::FsrLookup { fsr_id });
                }
                Frame::Lattice { lattice, i, j, .. } => {
                    let lattice = self
                        .universes
                        .get(lattice)
                        .and_then(Universe::as_lattice)
                        .ok_or(GeometryError::MissingReference {
                            kind: EntityKind::Lattice,
                            id: *lattice,
                        })?;
                    fsr_id += lattice.fsr_offset(*i, *j);
                }
            }
        }
        Ok(fsr_id)
    }

    // --- Segmentation ---

    /// Splits a track into segments, one per flat source region crossed,
    /// appending them to the track in ray-parameter order.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::OutOfGeometry`] when the track starts
    /// outside every cell and [`GeometryError::ZeroSegment`] when a
    /// traversal step fails to advance the chain.
    pub fn segmentize(&mut self, track: &mut Track) -> Result<()> {
        let x0 = track.start().x;
        let y0 = track.start().y;
        let phi = track.phi();
        debug!(x0, y0, phi, "segmentizing track");

        let mut segment_start = LocalCoords::new(ROOT_UNIVERSE, x0, y0);
        let mut segment_end = LocalCoords::new(ROOT_UNIVERSE, x0, y0);

        let mut curr = self.find_first_cell(&mut segment_end, phi);
        if curr.is_none() {
            return Err(GeometryError::OutOfGeometry { x: x0, y: y0 });
        }

        while let Some(cell_id) = curr {
            segment_end.copy_coords(&mut segment_start);
            curr = self.find_next_cell(&mut segment_end, phi);

            let start_point = *segment_start.head().point();
            let end_point = *segment_end.head().point();
            let length = (end_point - start_point).norm();
            let material = self
                .cells
                .get(&cell_id)
                .and_then(Cell::as_basic)
                .map(CellBasic::material)
                .ok_or(GeometryError::MissingReference {
                    kind: EntityKind::Cell,
                    id: cell_id,
                })?;
            let region = self.find_fsr_id(&segment_start)?;

            if start_point.x == end_point.x && start_point.y == end_point.y {
                return Err(GeometryError::ZeroSegment {
                    x: start_point.x,
                    y: start_point.y,
                });
            }

            if length > self.max_seg_length {
                self.max_seg_length = length;
            }
            if length < self.min_seg_length {
                self.min_seg_length = length;
            }
            debug!(length, material, region, "created segment");
            track.add_segment(Segment {
                length,
                material,
                region,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_4, SQRT_2};

    fn one_group(id: MaterialId) -> Material {
        Material::new(id, 1, vec![1.0], vec![0.2], vec![0.8], vec![0.0], vec![1.0]).unwrap()
    }

    fn add_box(geometry: &mut Geometry, half: f64, boundary: BoundaryType) {
        geometry.add_surface(Surface::new(1, SurfaceKind::XPlane { x: -half }, boundary));
        geometry.add_surface(Surface::new(2, SurfaceKind::XPlane { x: half }, boundary));
        geometry.add_surface(Surface::new(3, SurfaceKind::YPlane { y: -half }, boundary));
        geometry.add_surface(Surface::new(4, SurfaceKind::YPlane { y: half }, boundary));
    }

    fn box_halfspaces() -> Vec<(SurfaceId, Halfspace)> {
        vec![
            (1, Halfspace::Positive),
            (2, Halfspace::Negative),
            (3, Halfspace::Positive),
            (4, Halfspace::Negative),
        ]
    }

    /// One material cell filling a reflective 2x2 box.
    fn single_cell_geometry() -> Geometry {
        let mut geometry = Geometry::new();
        geometry.add_material(one_group(1)).unwrap();
        add_box(&mut geometry, 1.0, BoundaryType::Reflective);
        geometry
            .add_cell(Cell::Basic(CellBasic::new(10, 0, 1, box_halfspaces(), 0, 0)))
            .unwrap();
        geometry.initialize_flat_source_regions().unwrap();
        geometry
    }

    /// A 2x2 lattice of bare one-cell pin universes inside a reflective box.
    fn lattice_geometry() -> Geometry {
        let mut geometry = Geometry::new();
        geometry.add_material(one_group(1)).unwrap();
        add_box(&mut geometry, 1.0, BoundaryType::Reflective);
        geometry
            .add_cell(Cell::Basic(CellBasic::new(20, 2, 1, Vec::new(), 0, 0)))
            .unwrap();
        geometry
            .add_lattice(
                Lattice::new(5, 2, 2, 1.0, 1.0, 0.0, 0.0, vec![vec![2, 2], vec![2, 2]]).unwrap(),
            )
            .unwrap();
        geometry
            .add_cell(Cell::Fill(CellFill::new(30, 0, 5, box_halfspaces())))
            .unwrap();
        geometry.initialize_flat_source_regions().unwrap();
        geometry
    }

    /// A circular fuel pin subdivided into 8 sectors inside a box of
    /// moderator.
    fn subdivided_pin_geometry() -> Geometry {
        let mut geometry = Geometry::new();
        geometry.add_material(one_group(1)).unwrap();
        geometry.add_material(one_group(2)).unwrap();
        add_box(&mut geometry, 0.5, BoundaryType::Reflective);
        geometry.add_surface(Surface::new(
            5,
            SurfaceKind::Circle {
                x: 0.0,
                y: 0.0,
                radius: 0.4,
            },
            BoundaryType::None,
        ));
        geometry
            .add_cell(Cell::Basic(CellBasic::new(
                10,
                0,
                1,
                vec![(5, Halfspace::Negative)],
                0,
                8,
            )))
            .unwrap();
        let mut moderator = box_halfspaces();
        moderator.push((5, Halfspace::Positive));
        geometry
            .add_cell(Cell::Basic(CellBasic::new(11, 0, 2, moderator, 0, 0)))
            .unwrap();
        geometry.initialize_flat_source_regions().unwrap();
        geometry
    }

    // --- Scenario: single cell, reflective box ---

    #[test]
    fn single_cell_one_region() {
        let geometry = single_cell_geometry();
        assert_eq!(geometry.num_fsrs(), 1);
        assert_eq!(geometry.fsr_to_cell(), &[10]);
        assert_eq!(geometry.fsr_to_material(), &[1]);
        assert!((geometry.width() - 2.0).abs() < 1e-12);
        assert!((geometry.height() - 2.0).abs() < 1e-12);
        assert!(geometry.bc_top() && geometry.bc_bottom());
        assert!(geometry.bc_left() && geometry.bc_right());
    }

    #[test]
    fn single_cell_full_chord() {
        let mut geometry = single_cell_geometry();
        let mut track = Track::new(-1.0, 0.0, 0.0);
        geometry.segmentize(&mut track).unwrap();
        assert_eq!(track.num_segments(), 1);
        let segment = track.segments()[0];
        assert!((segment.length - 2.0).abs() < 1e-9);
        assert_eq!(segment.material, 1);
        assert_eq!(segment.region, 0);
    }

    // --- Scenario: two-cell slab ---

    fn slab_geometry() -> Geometry {
        let mut geometry = Geometry::new();
        geometry.add_material(one_group(1)).unwrap();
        geometry.add_material(one_group(2)).unwrap();
        add_box(&mut geometry, 1.0, BoundaryType::Reflective);
        geometry.add_surface(Surface::new(5, SurfaceKind::XPlane { x: 0.0 }, BoundaryType::None));
        geometry
            .add_cell(Cell::Basic(CellBasic::new(
                10,
                0,
                1,
                vec![
                    (1, Halfspace::Positive),
                    (5, Halfspace::Negative),
                    (3, Halfspace::Positive),
                    (4, Halfspace::Negative),
                ],
                0,
                0,
            )))
            .unwrap();
        geometry
            .add_cell(Cell::Basic(CellBasic::new(
                11,
                0,
                2,
                vec![
                    (5, Halfspace::Positive),
                    (2, Halfspace::Negative),
                    (3, Halfspace::Positive),
                    (4, Halfspace::Negative),
                ],
                0,
                0,
            )))
            .unwrap();
        geometry.initialize_flat_source_regions().unwrap();
        geometry
    }

    #[test]
    fn slab_two_segments() {
        let mut geometry = slab_geometry();
        assert_eq!(geometry.num_fsrs(), 2);
        let mut track = Track::new(-1.0, 0.5, 0.0);
        geometry.segmentize(&mut track).unwrap();
        assert_eq!(track.num_segments(), 2);
        let [left, right] = track.segments() else {
            panic!("expected two segments");
        };
        assert!((left.length - 1.0).abs() < 1e-9);
        assert!((right.length - 1.0).abs() < 1e-9);
        assert_eq!((left.material, left.region), (1, 0));
        assert_eq!((right.material, right.region), (2, 1));
    }

    #[test]
    fn slab_chord_sum_matches_extent() {
        let mut geometry = slab_geometry();
        let mut track = Track::new(-1.0, -0.25, 0.0);
        geometry.segmentize(&mut track).unwrap();
        let total: f64 = track.segments().iter().map(|s| s.length).sum();
        assert!((total - 2.0).abs() / 2.0 < 1e-6);
    }

    // --- Scenario: 2x2 lattice ---

    #[test]
    fn lattice_four_regions() {
        let geometry = lattice_geometry();
        assert_eq!(geometry.num_fsrs(), 4);
        // Every region resolves to the shared pin cell and its material.
        assert_eq!(geometry.fsr_to_cell(), &[20, 20, 20, 20]);
        assert_eq!(geometry.fsr_to_material(), &[1, 1, 1, 1]);
    }

    #[test]
    fn lattice_horizontal_track_crosses_top_row() {
        let mut geometry = lattice_geometry();
        let mut track = Track::new(-1.0, 0.25, 0.0);
        geometry.segmentize(&mut track).unwrap();
        assert_eq!(track.num_segments(), 2);
        let [first, second] = track.segments() else {
            panic!("expected two segments");
        };
        assert!((first.length - 1.0).abs() < 1e-9);
        assert!((second.length - 1.0).abs() < 1e-9);
        // Top row tiles (0,1) then (1,1) in bottom-up indexing.
        assert_eq!(first.region, 2);
        assert_eq!(second.region, 3);
    }

    #[test]
    fn lattice_point_location_descends_to_tile() {
        let geometry = lattice_geometry();
        let mut coords = LocalCoords::new(ROOT_UNIVERSE, 0.5, -0.5);
        let cell = geometry.find_cell(&mut coords).unwrap();
        assert_eq!(cell, 20);
        let region = geometry.find_fsr_id(&coords).unwrap();
        assert_eq!(region, 1);
        // Chain: root cell frame, lattice frame, pin universe frame.
        assert_eq!(coords.len(), 3);
        assert!(coords.frames()[1].is_lattice());
    }

    // --- Scenario: subdivided pin ---

    #[test]
    fn subdivided_pin_region_count() {
        let geometry = subdivided_pin_geometry();
        assert_eq!(geometry.num_fsrs(), 9);
        let fuel_regions = geometry
            .fsr_to_material()
            .iter()
            .filter(|&&m| m == 1)
            .count();
        assert_eq!(fuel_regions, 8);
        // The subdivided parent is now a fill cell over a synthetic
        // universe of eight sector children.
        let parent = geometry.cell(10).unwrap();
        let fill = parent.fill_universe().unwrap();
        let children = geometry.universe(fill).unwrap().as_simple().unwrap();
        assert_eq!(children.num_cells(), 8);
    }

    #[test]
    fn subdivided_pin_diagonal_chord() {
        let mut geometry = subdivided_pin_geometry();
        let mut track = Track::new(-0.5, -0.5, FRAC_PI_4);
        geometry.segmentize(&mut track).unwrap();

        let total: f64 = track.segments().iter().map(|s| s.length).sum();
        assert!((total - SQRT_2).abs() < 1e-9);

        let fuel: f64 = track
            .segments()
            .iter()
            .filter(|s| s.material == 1)
            .map(|s| s.length)
            .sum();
        assert!((fuel - 0.8).abs() < 1e-9);

        // The ray pierces the sector fan through its apex, so the fuel
        // chord splits at the pin center.
        assert_eq!(track.num_segments(), 4);
        assert_eq!(track.segments()[0].material, 2);
        assert_eq!(track.segments()[0].region, 8);
        assert_eq!(track.segments()[3].material, 2);
        assert_eq!(track.segments()[3].region, 8);
    }

    // --- Scenario: lattice escape through a corner ---

    #[test]
    fn lattice_corner_crossing_reaches_diagonal_tile() {
        let mut geometry = lattice_geometry();
        let mut track = Track::new(-1.0, -1.0, FRAC_PI_4);
        geometry.segmentize(&mut track).unwrap();
        assert_eq!(track.num_segments(), 2);
        let [first, second] = track.segments() else {
            panic!("expected two segments");
        };
        assert!((first.length - SQRT_2).abs() < 1e-9);
        assert!((second.length - SQRT_2).abs() < 1e-9);
        assert_eq!(first.region, 0);
        assert_eq!(second.region, 3);
        let total: f64 = track.segments().iter().map(|s| s.length).sum();
        assert!((total - 2.0 * SQRT_2).abs() < 1e-9);
    }

    // --- Scenario: subdivided pin inside a lattice tile ---

    /// A 2x2 lattice mixing a sector-subdivided pin universe (whose circle
    /// overhangs the tile) with a bare one-cell universe.
    fn sectored_lattice_geometry() -> Geometry {
        let mut geometry = Geometry::new();
        geometry.add_material(one_group(1)).unwrap();
        geometry.add_material(one_group(2)).unwrap();
        geometry.add_material(one_group(3)).unwrap();
        add_box(&mut geometry, 1.0, BoundaryType::Reflective);
        geometry.add_surface(Surface::new(
            5,
            SurfaceKind::Circle {
                x: 0.0,
                y: 0.0,
                radius: 0.6,
            },
            BoundaryType::None,
        ));
        geometry
            .add_cell(Cell::Basic(CellBasic::new(
                10,
                2,
                1,
                vec![(5, Halfspace::Negative)],
                0,
                4,
            )))
            .unwrap();
        geometry
            .add_cell(Cell::Basic(CellBasic::new(
                11,
                2,
                2,
                vec![(5, Halfspace::Positive)],
                0,
                0,
            )))
            .unwrap();
        geometry
            .add_cell(Cell::Basic(CellBasic::new(12, 3, 3, Vec::new(), 0, 0)))
            .unwrap();
        geometry
            .add_lattice(
                Lattice::new(5, 2, 2, 1.0, 1.0, 0.0, 0.0, vec![vec![2, 3], vec![2, 3]]).unwrap(),
            )
            .unwrap();
        geometry
            .add_cell(Cell::Fill(CellFill::new(30, 0, 5, box_halfspaces())))
            .unwrap();
        geometry.initialize_flat_source_regions().unwrap();
        geometry
    }

    #[test]
    fn sectored_pin_in_lattice_region_count() {
        let geometry = sectored_lattice_geometry();
        // Per pin tile: 4 sectors + moderator; per bare tile: 1 region.
        assert_eq!(geometry.num_fsrs(), 12);
        let fuel_regions = geometry
            .fsr_to_material()
            .iter()
            .filter(|&&m| m == 1)
            .count();
        assert_eq!(fuel_regions, 8);
    }

    #[test]
    fn sectored_pin_in_lattice_clips_fuel_at_tile_boundary() {
        let mut geometry = sectored_lattice_geometry();
        // The pin circle (radius 0.6) overhangs its tile: the ray's exit
        // crossing through it lands in the neighboring tile and must be
        // rejected in favor of the tile-edge step.
        let mut track = Track::new(-1.0, -0.4, 0.0);
        geometry.segmentize(&mut track).unwrap();
        assert_eq!(track.num_segments(), 3);
        let [first, second, third] = track.segments() else {
            panic!("expected three segments");
        };
        // The fuel chord splits at the vertical sector plane through the
        // pin center and is clipped at the lattice edge, not at the
        // overhanging circle.
        assert!((first.length - 0.5).abs() < 1e-9);
        assert!((second.length - 0.5).abs() < 1e-9);
        assert!((third.length - 1.0).abs() < 1e-9);
        assert_eq!(first.material, 1);
        assert_eq!(second.material, 1);
        assert_eq!(third.material, 3);
        assert_eq!(first.region, 2);
        assert_eq!(second.region, 1);
        assert_eq!(third.region, 5);
        let total: f64 = track.segments().iter().map(|s| s.length).sum();
        assert!((total - 2.0).abs() < 1e-9);
    }

    // --- Point location and numbering invariants ---

    #[test]
    fn located_cell_agrees_with_region_maps() {
        let geometry = subdivided_pin_geometry();
        let probes = [
            (0.0, 0.1),
            (0.1, 0.0),
            (-0.2, -0.15),
            (0.3, -0.1),
            (0.45, 0.45),
            (-0.45, 0.2),
        ];
        for (x, y) in probes {
            let mut coords = LocalCoords::new(ROOT_UNIVERSE, x, y);
            let cell_id = geometry.find_cell(&mut coords).unwrap();
            let region = geometry.find_fsr_id(&coords).unwrap();
            assert_eq!(geometry.fsr_to_cell()[region], cell_id, "probe ({x}, {y})");
            let by_region = geometry.find_cell_by_fsr(region).unwrap();
            assert_eq!(by_region.id(), cell_id, "probe ({x}, {y})");
        }
    }

    #[test]
    fn region_lookup_roundtrip() {
        let geometry = subdivided_pin_geometry();
        for region in 0..geometry.num_fsrs() {
            let cell = geometry.find_cell_by_fsr(region).unwrap();
            assert_eq!(cell.id(), geometry.fsr_to_cell()[region]);
        }
        assert!(matches!(
            geometry.find_cell_by_fsr(geometry.num_fsrs()),
            Err(GeometryError::FsrLookup { .. })
        ));
    }

    #[test]
    fn renumbering_is_deterministic() {
        let mut geometry = subdivided_pin_geometry();
        let num_fsrs = geometry.num_fsrs();
        let to_cell = geometry.fsr_to_cell().to_vec();
        let to_material = geometry.fsr_to_material().to_vec();
        geometry.initialize_flat_source_regions().unwrap();
        assert_eq!(geometry.num_fsrs(), num_fsrs);
        assert_eq!(geometry.fsr_to_cell(), &to_cell[..]);
        assert_eq!(geometry.fsr_to_material(), &to_material[..]);
    }

    // --- Registration rules ---

    #[test]
    fn duplicate_cell_rejected() {
        let mut geometry = Geometry::new();
        geometry.add_material(one_group(1)).unwrap();
        geometry
            .add_cell(Cell::Basic(CellBasic::new(10, 0, 1, Vec::new(), 0, 0)))
            .unwrap();
        let err = geometry
            .add_cell(Cell::Basic(CellBasic::new(10, 0, 1, Vec::new(), 0, 0)))
            .unwrap_err();
        assert!(matches!(
            err,
            GeometryError::DuplicateId {
                kind: EntityKind::Cell,
                id: 10
            }
        ));
    }

    #[test]
    fn cell_with_unknown_material_rejected() {
        let mut geometry = Geometry::new();
        let err = geometry
            .add_cell(Cell::Basic(CellBasic::new(10, 0, 9, Vec::new(), 0, 0)))
            .unwrap_err();
        assert!(matches!(
            err,
            GeometryError::MissingReference {
                kind: EntityKind::Material,
                id: 9
            }
        ));
    }

    #[test]
    fn cell_with_unknown_surface_rejected() {
        let mut geometry = Geometry::new();
        geometry.add_material(one_group(1)).unwrap();
        let err = geometry
            .add_cell(Cell::Basic(CellBasic::new(
                10,
                0,
                1,
                vec![(99, Halfspace::Positive)],
                0,
                0,
            )))
            .unwrap_err();
        assert!(matches!(
            err,
            GeometryError::MissingReference {
                kind: EntityKind::Surface,
                id: 99
            }
        ));
    }

    #[test]
    fn surface_readd_is_silent_noop() {
        let mut geometry = Geometry::new();
        geometry.add_surface(Surface::new(
            1,
            SurfaceKind::XPlane { x: -1.0 },
            BoundaryType::Reflective,
        ));
        // Re-adding the same id with different data is skipped entirely.
        geometry.add_surface(Surface::new(
            1,
            SurfaceKind::XPlane { x: -5.0 },
            BoundaryType::Vacuum,
        ));
        assert_eq!(geometry.surfaces().len(), 1);
        assert!((geometry.x_min() + 1.0).abs() < 1e-12);
        assert!(geometry.bc_left());
    }

    #[test]
    fn duplicate_material_rejected() {
        let mut geometry = Geometry::new();
        geometry.add_material(one_group(1)).unwrap();
        let err = geometry.add_material(one_group(1)).unwrap_err();
        assert!(matches!(
            err,
            GeometryError::DuplicateId {
                kind: EntityKind::Material,
                id: 1
            }
        ));
    }

    #[test]
    fn sigma_t_mismatch_rejected_at_add() {
        let mut geometry = Geometry::new();
        let material = Material::new(
            7,
            1,
            vec![1.0],
            vec![0.2],
            vec![0.79],
            vec![0.0],
            vec![1.0],
        )
        .unwrap();
        let err = geometry.add_material(material).unwrap_err();
        assert!(matches!(
            err,
            GeometryError::SigmaTotalMismatch {
                material_id: 7,
                group: 0
            }
        ));
    }

    #[test]
    fn group_count_must_match_existing_materials() {
        let mut geometry = Geometry::new();
        geometry.add_material(one_group(1)).unwrap();
        let two_group = Material::new(
            2,
            2,
            vec![1.0, 1.0],
            vec![0.2, 0.2],
            vec![0.4, 0.4, 0.4, 0.4],
            vec![0.0, 0.0],
            vec![1.0, 0.0],
        )
        .unwrap();
        let err = geometry.add_material(two_group).unwrap_err();
        assert!(matches!(
            err,
            GeometryError::EnergyGroupMismatch {
                material_id: 2,
                expected: 1,
                got: 2
            }
        ));
        assert_eq!(geometry.num_groups(), 1);
    }

    #[test]
    fn lattice_with_unknown_tile_rejected() {
        let mut geometry = Geometry::new();
        let lattice =
            Lattice::new(5, 1, 1, 1.0, 1.0, 0.0, 0.0, vec![vec![2]]).unwrap();
        let err = geometry.add_lattice(lattice).unwrap_err();
        assert!(matches!(
            err,
            GeometryError::MissingReference {
                kind: EntityKind::Universe,
                id: 2
            }
        ));
    }

    #[test]
    fn lattice_id_clash_with_universe_rejected() {
        let mut geometry = Geometry::new();
        geometry.add_material(one_group(1)).unwrap();
        geometry
            .add_cell(Cell::Basic(CellBasic::new(20, 2, 1, Vec::new(), 0, 0)))
            .unwrap();
        let lattice =
            Lattice::new(2, 1, 1, 1.0, 1.0, 0.0, 0.0, vec![vec![2]]).unwrap();
        let err = geometry.add_lattice(lattice).unwrap_err();
        assert!(matches!(
            err,
            GeometryError::DuplicateId {
                kind: EntityKind::Lattice,
                id: 2
            }
        ));
    }

    #[test]
    fn fill_cell_with_unknown_universe_fails_initialization() {
        let mut geometry = Geometry::new();
        geometry
            .add_cell(Cell::Fill(CellFill::new(30, 0, 42, Vec::new())))
            .unwrap();
        let err = geometry.initialize_flat_source_regions().unwrap_err();
        assert!(matches!(
            err,
            GeometryError::MissingReference {
                kind: EntityKind::Universe,
                id: 42
            }
        ));
    }

    // --- Bounding box and boundary conditions ---

    #[test]
    fn vacuum_box_clears_boundary_bits() {
        let mut geometry = Geometry::new();
        add_box(&mut geometry, 1.5, BoundaryType::Vacuum);
        assert!((geometry.x_min() + 1.5).abs() < 1e-12);
        assert!((geometry.x_max() - 1.5).abs() < 1e-12);
        assert!((geometry.y_min() + 1.5).abs() < 1e-12);
        assert!((geometry.y_max() - 1.5).abs() < 1e-12);
        assert!(!geometry.bc_top());
        assert!(!geometry.bc_bottom());
        assert!(!geometry.bc_left());
        assert!(!geometry.bc_right());
    }

    #[test]
    fn interior_surface_leaves_bounding_box_alone() {
        let mut geometry = Geometry::new();
        add_box(&mut geometry, 1.0, BoundaryType::Reflective);
        geometry.add_surface(Surface::new(
            9,
            SurfaceKind::Circle {
                x: 0.0,
                y: 0.0,
                radius: 0.25,
            },
            BoundaryType::None,
        ));
        assert!((geometry.width() - 2.0).abs() < 1e-12);
        assert!((geometry.height() - 2.0).abs() < 1e-12);
    }

    // --- Traversal failure modes ---

    #[test]
    fn track_starting_outside_geometry_rejected() {
        let mut geometry = single_cell_geometry();
        let mut track = Track::new(5.0, 5.0, 0.0);
        let err = geometry.segmentize(&mut track).unwrap_err();
        assert!(matches!(err, GeometryError::OutOfGeometry { .. }));
    }

    #[test]
    fn segment_length_statistics_fold_over_tracks() {
        let mut geometry = slab_geometry();
        let mut track = Track::new(-1.0, 0.5, 0.0);
        geometry.segmentize(&mut track).unwrap();
        assert!((geometry.max_segment_length() - 1.0).abs() < 1e-9);
        assert!((geometry.min_segment_length() - 1.0).abs() < 1e-9);
    }
}

use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use tracing::debug;

use crate::cell::Cell;
use crate::error::{GeometryError, Result};
use crate::geometry::Geometry;
use crate::universe::{Universe, UniverseId, ROOT_UNIVERSE};

/// Rolls per-region fission rates up the universe tree into per-pin powers
/// and writes one power map file per lattice level.
///
/// Each lattice produces `<dir>/universe0[...]_lattice{id}_power.txt` with
/// one row per lattice row, top row first, comma-separated cell powers;
/// nested lattices append `_x{i}_y{j}` for the tile they sit in. Files
/// whose total power is zero are deleted after writing.
pub struct PinPowerReport {
    output_dir: PathBuf,
}

impl PinPowerReport {
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Executes the rollup over a frozen geometry.
    ///
    /// `fsr_powers` holds the fission rate of each flat source region;
    /// `fsr_to_pin_powers` receives, for each region, the total power of
    /// the pin (simple universe) it belongs to. Returns the total power
    /// under the root universe.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::FsrLookup`] when either array is shorter
    /// than the region count, [`GeometryError::MissingReference`] for a
    /// dangling universe or cell id, and [`GeometryError::Io`] when a
    /// power map file cannot be written.
    pub fn execute(
        &self,
        geometry: &Geometry,
        fsr_powers: &[f64],
        fsr_to_pin_powers: &mut [f64],
    ) -> Result<f64> {
        let num_fsrs = geometry.num_fsrs();
        if fsr_powers.len() < num_fsrs || fsr_to_pin_powers.len() < num_fsrs {
            return Err(GeometryError::FsrLookup {
                fsr_id: fsr_powers.len().min(fsr_to_pin_powers.len()),
            });
        }
        self.roll_up(
            geometry,
            ROOT_UNIVERSE,
            "universe0",
            0,
            fsr_powers,
            fsr_to_pin_powers,
        )
    }

    fn roll_up(
        &self,
        geometry: &Geometry,
        universe_id: UniverseId,
        prefix: &str,
        fsr_offset: usize,
        fsr_powers: &[f64],
        fsr_to_pin_powers: &mut [f64],
    ) -> Result<f64> {
        match geometry.universe(universe_id)? {
            Universe::Simple(universe) => {
                let mut power = 0.0;
                let mut member_regions = Vec::new();
                for cell_id in universe.cells() {
                    let offset = universe
                        .fsr_offset(cell_id)
                        .ok_or(GeometryError::FsrLookup { fsr_id: fsr_offset })?;
                    let region = fsr_offset + offset;
                    match geometry.cell(cell_id)? {
                        Cell::Basic(_) => {
                            member_regions.push(region);
                            power += fsr_powers[region];
                        }
                        Cell::Fill(fill) => {
                            power += self.roll_up(
                                geometry,
                                fill.fill(),
                                prefix,
                                region,
                                fsr_powers,
                                fsr_to_pin_powers,
                            )?;
                        }
                    }
                }
                for region in member_regions {
                    fsr_to_pin_powers[region] = power;
                }
                Ok(power)
            }
            Universe::Lattice(lattice) => {
                fs::create_dir_all(&self.output_dir)?;
                let path = self
                    .output_dir
                    .join(format!("{prefix}_lattice{}_power.txt", lattice.id()));

                let mut rows = String::new();
                let mut power = 0.0;
                for j in (0..lattice.num_y()).rev() {
                    for i in 0..lattice.num_x() {
                        let cell_prefix =
                            format!("{prefix}_lattice{}_x{i}_y{j}", lattice.id());
                        let cell_power = self.roll_up(
                            geometry,
                            lattice.tile(i, j),
                            &cell_prefix,
                            fsr_offset + lattice.fsr_offset(i, j),
                            fsr_powers,
                            fsr_to_pin_powers,
                        )?;
                        let _ = write!(rows, "{cell_power:.6}, ");
                        power += cell_power;
                    }
                    rows.push('\n');
                }
                fs::write(&path, rows)?;
                if power > 0.0 {
                    debug!(path = %path.display(), power, "wrote lattice power map");
                } else {
                    fs::remove_file(&path)?;
                }
                Ok(power)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cell::{CellBasic, CellFill, Halfspace};
    use crate::material::Material;
    use crate::surface::{BoundaryType, Surface, SurfaceId, SurfaceKind};
    use crate::universe::Lattice;

    fn lattice_geometry() -> Geometry {
        let mut geometry = Geometry::new();
        geometry
            .add_material(
                Material::new(1, 1, vec![1.0], vec![0.2], vec![0.8], vec![0.0], vec![1.0])
                    .unwrap(),
            )
            .unwrap();
        geometry.add_surface(Surface::new(
            1,
            SurfaceKind::XPlane { x: -1.0 },
            BoundaryType::Reflective,
        ));
        geometry.add_surface(Surface::new(
            2,
            SurfaceKind::XPlane { x: 1.0 },
            BoundaryType::Reflective,
        ));
        geometry.add_surface(Surface::new(
            3,
            SurfaceKind::YPlane { y: -1.0 },
            BoundaryType::Reflective,
        ));
        geometry.add_surface(Surface::new(
            4,
            SurfaceKind::YPlane { y: 1.0 },
            BoundaryType::Reflective,
        ));
        geometry
            .add_cell(Cell::Basic(CellBasic::new(20, 2, 1, Vec::new(), 0, 0)))
            .unwrap();
        geometry
            .add_lattice(
                Lattice::new(5, 2, 2, 1.0, 1.0, 0.0, 0.0, vec![vec![2, 2], vec![2, 2]]).unwrap(),
            )
            .unwrap();
        let halfspaces: Vec<(SurfaceId, Halfspace)> = vec![
            (1, Halfspace::Positive),
            (2, Halfspace::Negative),
            (3, Halfspace::Positive),
            (4, Halfspace::Negative),
        ];
        geometry
            .add_cell(Cell::Fill(CellFill::new(30, 0, 5, halfspaces)))
            .unwrap();
        geometry.initialize_flat_source_regions().unwrap();
        geometry
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mocray-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn lattice_power_map_rows_top_to_bottom() {
        let geometry = lattice_geometry();
        let dir = temp_dir("rows");
        let report = PinPowerReport::new(&dir);

        let fsr_powers = [1.0, 2.0, 3.0, 4.0];
        let mut pin_powers = [0.0; 4];
        let total = report
            .execute(&geometry, &fsr_powers, &mut pin_powers)
            .unwrap();
        assert!((total - 10.0).abs() < 1e-12);
        // Single-region pins: each region's pin power is its own power.
        for (pin, fsr) in pin_powers.iter().zip(fsr_powers.iter()) {
            assert!((pin - fsr).abs() < 1e-12);
        }

        let contents = fs::read_to_string(dir.join("universe0_lattice5_power.txt")).unwrap();
        // Regions number bottom-up; rows print top-down.
        assert_eq!(contents, "3.000000, 4.000000, \n1.000000, 2.000000, \n");
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn zero_power_map_is_deleted() {
        let geometry = lattice_geometry();
        let dir = temp_dir("zero");
        let report = PinPowerReport::new(&dir);

        let fsr_powers = [0.0; 4];
        let mut pin_powers = [0.0; 4];
        let total = report
            .execute(&geometry, &fsr_powers, &mut pin_powers)
            .unwrap();
        assert!(total.abs() < 1e-12);
        assert!(!dir.join("universe0_lattice5_power.txt").exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn short_power_array_rejected() {
        let geometry = lattice_geometry();
        let report = PinPowerReport::new(temp_dir("short"));
        let fsr_powers = [1.0; 2];
        let mut pin_powers = [0.0; 4];
        let err = report
            .execute(&geometry, &fsr_powers, &mut pin_powers)
            .unwrap_err();
        assert!(matches!(err, GeometryError::FsrLookup { fsr_id: 2 }));
    }
}

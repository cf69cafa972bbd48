use crate::error::{GeometryError, Result};

/// Unique identifier for a material, assigned by the caller.
pub type MaterialId = i32;

/// Relative tolerance on the total cross-section identity
/// `sigma_t = sigma_a + sum_g' sigma_s(g -> g')`.
const SIGMA_T_TOLERANCE: f64 = 1e-5;

/// Multigroup nuclear data for one material.
///
/// Cross sections are stored per energy group; the scattering matrix is
/// row-major `sigma_s[g * num_groups + g']` for scattering from group `g`
/// into group `g'`.
#[derive(Debug, Clone)]
pub struct Material {
    id: MaterialId,
    num_groups: usize,
    sigma_t: Vec<f64>,
    sigma_a: Vec<f64>,
    sigma_s: Vec<f64>,
    nu_sigma_f: Vec<f64>,
    chi: Vec<f64>,
}

impl Material {
    /// Creates a material from its multigroup data.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::EnergyGroupMismatch`] if any array length
    /// disagrees with `num_groups`.
    pub fn new(
        id: MaterialId,
        num_groups: usize,
        sigma_t: Vec<f64>,
        sigma_a: Vec<f64>,
        sigma_s: Vec<f64>,
        nu_sigma_f: Vec<f64>,
        chi: Vec<f64>,
    ) -> Result<Self> {
        for (len, expected) in [
            (sigma_t.len(), num_groups),
            (sigma_a.len(), num_groups),
            (sigma_s.len(), num_groups * num_groups),
            (nu_sigma_f.len(), num_groups),
            (chi.len(), num_groups),
        ] {
            if len != expected {
                return Err(GeometryError::EnergyGroupMismatch {
                    material_id: id,
                    expected,
                    got: len,
                });
            }
        }
        Ok(Self {
            id,
            num_groups,
            sigma_t,
            sigma_a,
            sigma_s,
            nu_sigma_f,
            chi,
        })
    }

    #[must_use]
    pub fn id(&self) -> MaterialId {
        self.id
    }

    #[must_use]
    pub fn num_groups(&self) -> usize {
        self.num_groups
    }

    #[must_use]
    pub fn sigma_t(&self) -> &[f64] {
        &self.sigma_t
    }

    #[must_use]
    pub fn sigma_a(&self) -> &[f64] {
        &self.sigma_a
    }

    /// Row-major scattering matrix, `num_groups * num_groups` entries.
    #[must_use]
    pub fn sigma_s(&self) -> &[f64] {
        &self.sigma_s
    }

    #[must_use]
    pub fn nu_sigma_f(&self) -> &[f64] {
        &self.nu_sigma_f
    }

    #[must_use]
    pub fn chi(&self) -> &[f64] {
        &self.chi
    }

    /// Checks that absorption plus out-scattering reproduces the total
    /// cross-section in every group, within relative tolerance `1e-5`.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::SigmaTotalMismatch`] naming the first
    /// offending group.
    pub fn check_sigma_t(&self) -> Result<()> {
        for g in 0..self.num_groups {
            let scatter: f64 = self.sigma_s[g * self.num_groups..(g + 1) * self.num_groups]
                .iter()
                .sum();
            let reconstructed = self.sigma_a[g] + scatter;
            if (self.sigma_t[g] - reconstructed).abs() > SIGMA_T_TOLERANCE * self.sigma_t[g] {
                return Err(GeometryError::SigmaTotalMismatch {
                    material_id: self.id,
                    group: g,
                });
            }
        }
        Ok(())
    }
}

use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::grid::Grid;

/// Rectangular inclusion, interior cell ranges `[z0, z1) x [x0, x1)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub x0: usize,
    pub x1: usize,
    pub z0: usize,
    pub z1: usize,
    pub vp: f64,  // P-wave velocity inside the box (m/s)
    pub vs: f64,  // S-wave velocity inside the box (m/s)
    pub rho: f64, // Density inside the box (kg/m³)
}

/// Isotropic elastic model on the interior grid, shape `(nz, nx)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub vp: Array2<f64>,  // P-wave velocity (m/s)
    pub vs: Array2<f64>,  // S-wave velocity (m/s)
    pub rho: Array2<f64>, // Density (kg/m³)
}

impl Model {
    pub fn new(vp: Array2<f64>, vs: Array2<f64>, rho: Array2<f64>) -> Result<Self> {
        let model = Model { vp, vs, rho };
        model.validate()?;
        Ok(model)
    }

    pub fn homogeneous(grid: &Grid, vp: f64, vs: f64, rho: f64) -> Result<Self> {
        let shape = grid.interior_shape();
        Model::new(
            Array2::from_elem(shape, vp),
            Array2::from_elem(shape, vs),
            Array2::from_elem(shape, rho),
        )
    }

    /// Copy of the model with the box overwritten.
    pub fn with_anomaly(&self, anomaly: &Anomaly) -> Result<Self> {
        let (nz, nx) = self.shape();
        if anomaly.x0 >= anomaly.x1 || anomaly.z0 >= anomaly.z1 || anomaly.x1 > nx || anomaly.z1 > nz {
            return Err(Error::InvalidParameter(format!(
                "anomaly x {}..{}, z {}..{} does not fit a {nz}x{nx} grid",
                anomaly.x0, anomaly.x1, anomaly.z0, anomaly.z1
            )));
        }
        let mut model = self.clone();
        let (rows, cols) = (anomaly.z0..anomaly.z1, anomaly.x0..anomaly.x1);
        model
            .vp
            .slice_mut(s![rows.clone(), cols.clone()])
            .fill(anomaly.vp);
        model
            .vs
            .slice_mut(s![rows.clone(), cols.clone()])
            .fill(anomaly.vs);
        model.rho.slice_mut(s![rows, cols]).fill(anomaly.rho);
        model.validate()?;
        Ok(model)
    }

    pub fn shape(&self) -> (usize, usize) {
        self.vp.dim()
    }

    pub fn max_vp(&self) -> f64 {
        self.vp.iter().fold(0.0, |m: f64, &v| m.max(v))
    }

    /// Lamé parameters `(λ, μ)` with `μ = ρ vs²` and `λ = ρ vp² - 2μ`.
    pub fn lame(&self) -> (Array2<f64>, Array2<f64>) {
        let mu = &self.rho * &self.vs * &self.vs;
        let lambda = &self.rho * &self.vp * &self.vp - &mu * 2.0;
        (lambda, mu)
    }

    fn validate(&self) -> Result<()> {
        if self.vs.dim() != self.vp.dim() || self.rho.dim() != self.vp.dim() {
            return Err(Error::Shape(format!(
                "vp {:?}, vs {:?} and rho {:?} differ",
                self.vp.dim(),
                self.vs.dim(),
                self.rho.dim()
            )));
        }
        if self.vp.iter().chain(self.rho.iter()).any(|&v| !(v > 0.0)) {
            return Err(Error::InvalidParameter(
                "P-wave velocity and density must be positive".into(),
            ));
        }
        if self.vs.iter().any(|&v| !(v >= 0.0)) {
            return Err(Error::InvalidParameter(
                "S-wave velocity must be non-negative".into(),
            ));
        }
        if self.vs.iter().zip(self.vp.iter()).any(|(s, p)| s > p) {
            return Err(Error::InvalidParameter(
                "S-wave velocity must not exceed P-wave velocity".into(),
            ));
        }
        Ok(())
    }
}

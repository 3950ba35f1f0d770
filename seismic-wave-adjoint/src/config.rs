use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;

use seismic_wave_adjoint::materials::{Anomaly, Model};
use seismic_wave_adjoint::propagator::{compute_stable_dt, courant_limit, ricker, Propagator};
use seismic_wave_adjoint::survey::Shot;
use seismic_wave_adjoint::{Cell, Grid};

/// Grid configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub nx: usize,
    pub nz: usize,
    pub dh: f64,
    #[serde(default = "default_halo")]
    pub halo: usize,
}

fn default_halo() -> usize {
    2
}

impl GridConfig {
    fn validate(&self) -> Result<()> {
        if self.nx == 0 || self.nz == 0 {
            return Err(anyhow!("Grid dimensions must be positive (nx={}, nz={})", self.nx, self.nz));
        }
        if self.dh <= 0.0 {
            return Err(anyhow!("Grid spacing must be positive (dh={})", self.dh));
        }
        if self.halo < 2 {
            return Err(anyhow!("Halo must be at least 2 cells wide, got {}", self.halo));
        }
        Ok(())
    }

    pub fn grid(&self) -> Grid {
        Grid::new(self.nx, self.nz, self.dh, self.halo)
    }
}

/// Homogeneous starting model, plus the box that only the true model carries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialConfig {
    pub vp: f64,  // P-wave velocity (m/s)
    pub vs: f64,  // S-wave velocity (m/s)
    pub rho: f64, // Density (kg/m³)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly: Option<Anomaly>,
}

impl MaterialConfig {
    fn validate(&self) -> Result<()> {
        if self.vp <= 0.0 || self.vs < 0.0 || self.rho <= 0.0 {
            return Err(anyhow!(
                "Material properties must be positive (vp={}, vs={}, rho={})",
                self.vp,
                self.vs,
                self.rho
            ));
        }
        if self.vs > self.vp {
            return Err(anyhow!(
                "S-wave velocity must be less than P-wave velocity (vs={} > vp={})",
                self.vs,
                self.vp
            ));
        }
        Ok(())
    }

    pub fn starting_model(&self, grid: &Grid) -> Result<Model> {
        Ok(Model::homogeneous(grid, self.vp, self.vs, self.rho)?)
    }

    /// Starting model with the anomaly applied, if any
    pub fn true_model(&self, grid: &Grid) -> Result<Model> {
        let model = self.starting_model(grid)?;
        match &self.anomaly {
            Some(anomaly) => Ok(model.with_anomaly(anomaly)?),
            None => Ok(model),
        }
    }

    fn vp_max(&self) -> f64 {
        self.anomaly
            .as_ref()
            .map_or(self.vp, |anomaly| anomaly.vp.max(self.vp))
    }
}

/// Simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dt: Option<f64>, // Optional: derived from the Courant limit if not provided
    pub nt: usize,
    #[serde(default = "default_cfl_safety")]
    pub cfl_safety: f64,
}

fn default_cfl_safety() -> f64 {
    0.5
}

impl SimulationConfig {
    fn validate(&self) -> Result<()> {
        if self.nt == 0 {
            return Err(anyhow!("nt must be positive"));
        }
        if self.cfl_safety <= 0.0 || self.cfl_safety > courant_limit() {
            return Err(anyhow!(
                "cfl_safety must be in (0, {:.4}], got {}",
                courant_limit(),
                self.cfl_safety
            ));
        }
        if let Some(dt) = self.dt {
            if dt <= 0.0 {
                return Err(anyhow!("dt must be positive, got {}", dt));
            }
        }
        Ok(())
    }

    /// Compute dt from the Courant number if not specified
    pub fn compute_dt_if_needed(&mut self, dh: f64, vp_max: f64) {
        if self.dt.is_none() {
            self.dt = Some(compute_stable_dt(dh, vp_max, self.cfl_safety));
        }
    }
}

/// Absorbing taper and top-edge condition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryConfig {
    #[serde(default = "default_nab")]
    pub nab: usize, // Taper width (cells)
    #[serde(default = "default_abpc")]
    pub abpc: f64, // Amplitude lost across the taper (%)
    #[serde(default)]
    pub free_surface: bool,
}

fn default_nab() -> usize {
    10
}

fn default_abpc() -> f64 {
    4.0
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        BoundaryConfig {
            nab: default_nab(),
            abpc: default_abpc(),
            free_surface: false,
        }
    }
}

impl BoundaryConfig {
    fn validate(&self, nx: usize, nz: usize) -> Result<()> {
        if !(0.0..100.0).contains(&self.abpc) {
            return Err(anyhow!("abpc must be in [0, 100), got {}", self.abpc));
        }
        if 2 * self.nab > nx.min(nz) {
            return Err(anyhow!(
                "Absorbing width {} does not fit a {}x{} grid",
                self.nab,
                nx,
                nz
            ));
        }
        Ok(())
    }
}

/// One shot: injection cells sharing a Ricker wavelet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShotConfig {
    pub cells: Vec<Cell>,
    pub frequency: f64,
    #[serde(default = "default_amplitude")]
    pub amplitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<f64>, // Default: 1.2 / frequency
}

fn default_amplitude() -> f64 {
    1.0
}

impl ShotConfig {
    fn validate(&self, grid: &Grid) -> Result<()> {
        if self.cells.is_empty() {
            return Err(anyhow!("Every shot needs at least one source cell"));
        }
        for cell in &self.cells {
            grid.check(*cell)?;
        }
        if self.frequency <= 0.0 {
            return Err(anyhow!("Source frequency must be positive, got {}", self.frequency));
        }
        if let Some(delay) = self.delay {
            if delay < 0.0 {
                return Err(anyhow!("Source delay must be non-negative, got {}", delay));
            }
        }
        Ok(())
    }

    pub fn delay(&self) -> f64 {
        self.delay.unwrap_or(1.2 / self.frequency)
    }

    pub fn shot(&self, dt: f64, nt: usize) -> Shot {
        Shot {
            cells: self.cells.clone(),
            signal: ricker(self.frequency, self.delay(), dt, nt)
                .into_iter()
                .map(|v| self.amplitude * v)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    pub cells: Vec<Cell>,
}

/// Complete run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub grid: GridConfig,
    pub materials: MaterialConfig,
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub boundary: BoundaryConfig,
    pub shots: Vec<ShotConfig>,
    pub receivers: ReceiverConfig,
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config file '{}': {}", path, e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(content).map_err(|e| anyhow!("Failed to parse TOML config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration parameters
    pub fn validate(&mut self) -> Result<()> {
        self.grid.validate()?;
        self.materials.validate()?;
        self.simulation.validate()?;
        self.boundary.validate(self.grid.nx, self.grid.nz)?;

        let grid = self.grid.grid();
        if self.shots.is_empty() {
            return Err(anyhow!("At least one shot must be defined"));
        }
        for shot in &self.shots {
            shot.validate(&grid)?;
        }
        if self.receivers.cells.is_empty() {
            return Err(anyhow!("At least one receiver must be defined"));
        }
        for cell in &self.receivers.cells {
            grid.check(*cell)?;
        }

        self.simulation
            .compute_dt_if_needed(self.grid.dh, self.materials.vp_max());
        Ok(())
    }

    pub fn dt(&self) -> f64 {
        self.simulation
            .dt
            .unwrap_or_else(|| {
                compute_stable_dt(self.grid.dh, self.materials.vp_max(), self.simulation.cfl_safety)
            })
    }

    pub fn propagator(&self) -> Propagator {
        Propagator {
            grid: self.grid.grid(),
            nt: self.simulation.nt,
            dt: self.dt(),
            nab: self.boundary.nab,
            abpc: self.boundary.abpc,
            free_surface: self.boundary.free_surface,
            sources: Vec::new(),
            receivers: self.receivers.cells.clone(),
        }
    }

    pub fn shots(&self) -> Vec<Shot> {
        let (dt, nt) = (self.dt(), self.simulation.nt);
        self.shots.iter().map(|shot| shot.shot(dt, nt)).collect()
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        let grid = self.grid.grid();
        println!("=== Inversion Gradient Configuration ===");
        println!(
            "Grid: {}x{} ({} x {} m), halo {}",
            self.grid.nx,
            self.grid.nz,
            grid.width(),
            grid.height(),
            self.grid.halo
        );
        println!(
            "Starting model: Vp={} m/s, Vs={} m/s, ρ={} kg/m³",
            self.materials.vp, self.materials.vs, self.materials.rho
        );
        if let Some(a) = &self.materials.anomaly {
            println!(
                "  True-model anomaly: x {}..{}, z {}..{}, Vp={} m/s, Vs={} m/s, ρ={} kg/m³",
                a.x0, a.x1, a.z0, a.z1, a.vp, a.vs, a.rho
            );
        }
        let propagator = self.propagator();
        println!(
            "Simulation: dt={} s, nt={}, total_time={} s, Courant={:.3} (limit {:.3})",
            propagator.dt,
            propagator.nt,
            propagator.total_time(),
            propagator.courant(self.materials.vp_max()),
            courant_limit()
        );
        println!(
            "Boundary: {} absorbing cells, {}% decay, free surface {}",
            self.boundary.nab,
            self.boundary.abpc,
            if self.boundary.free_surface { "on" } else { "off" }
        );
        println!("Shots: {} shot(s)", self.shots.len());
        for (i, shot) in self.shots.iter().enumerate() {
            println!(
                "  Shot {}: {} cell(s) from ({}, {}), freq={} Hz, amp={}, delay={} s",
                i,
                shot.cells.len(),
                shot.cells[0].z,
                shot.cells[0].x,
                shot.frequency,
                shot.amplitude,
                shot.delay()
            );
        }
        println!("Receivers: {}", self.receivers.cells.len());
        println!("========================================");
    }
}

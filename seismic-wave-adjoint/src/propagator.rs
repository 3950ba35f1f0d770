//! Chained elastic time stepping on a tape.

use std::f64::consts::PI;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::field::States;
use crate::grid::{Cell, Grid};
use crate::operators::{
    Cerjan, CerjanArgs, FreeSurface, PointSource, Receiver, ReceiverArgs, ScaleArgs,
    ScaleParameters, SourceArgs, StressArgs, SurfaceArgs, UpdateStress, UpdateVelocity,
    VelocityArgs,
};
use crate::selftest::Differentiable;
use crate::stencil::HC;
use crate::tape::Tape;
use crate::wavefield::ElasticFields;

/// Largest Courant number `vp dt / dh` the 2-D fourth-order staggered scheme
/// tolerates: `1 / (√2 (|c0| + |c1|))`.
pub fn courant_limit() -> f64 {
    1.0 / (2f64.sqrt() * (HC[0].abs() + HC[1].abs()))
}

/// Time step giving a Courant number of `cfl_safety`.
pub fn compute_stable_dt(dh: f64, vp_max: f64, cfl_safety: f64) -> f64 {
    cfl_safety * dh / vp_max
}

/// Ricker wavelet with peak frequency `f0` (Hz) delayed by `t0` (s), sampled
/// at `nt` steps of `dt`.
pub fn ricker(f0: f64, t0: f64, dt: f64, nt: usize) -> Vec<f64> {
    (0..nt)
        .map(|i| {
            let tau = i as f64 * dt - t0;
            let arg = (PI * f0 * tau).powi(2);
            (1.0 - 2.0 * arg) * (-arg).exp()
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Propagator {
    pub grid: Grid,
    pub nt: usize,            // Number of time steps
    pub dt: f64,              // Time step (seconds)
    pub nab: usize,           // Absorbing band width (cells)
    pub abpc: f64,            // Amplitude lost across the band (%)
    pub free_surface: bool,   // Traction-free top edge
    pub sources: Vec<Cell>,   // Injection cells for vz
    pub receivers: Vec<Cell>, // Sampled for both vx and vz
}

impl Propagator {
    pub fn total_time(&self) -> f64 {
        self.nt as f64 * self.dt
    }

    pub fn courant(&self, vp_max: f64) -> f64 {
        vp_max * self.dt / self.grid.dh
    }

    /// True when the run is within the stability limit for `vp_max`.
    pub fn check_cfl(&self, vp_max: f64) -> bool {
        let courant = self.courant(vp_max);
        let limit = courant_limit();
        if courant > limit {
            warn!(courant, limit, "time step exceeds the stability limit");
            return false;
        }
        true
    }

    /// Same configuration, different source cells.
    pub fn with_sources(&self, sources: Vec<Cell>) -> Self {
        Propagator {
            sources,
            ..self.clone()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.nt == 0 {
            return Err(Error::InvalidParameter("at least one time step is required".into()));
        }
        for &cell in self.sources.iter().chain(&self.receivers) {
            self.grid.check(cell)?;
        }
        Ok(())
    }

    /// Run the simulation forward, recording every step:
    ///
    /// scale, then per step: source, velocity, taper(v), stress,
    /// [free surface], taper(σ), receivers.
    ///
    /// The returned tape is positioned at the end of the run.
    pub fn record(&self, states: &mut States, fields: &ElasticFields) -> Result<Tape> {
        self.validate()?;
        let mut tape = Tape::new();
        let scale = tape.register(ScaleParameters::new(self.dt, self.grid.dh)?);
        let source = tape.register(PointSource::new());
        let velocity = tape.register(UpdateVelocity::new());
        let stress = tape.register(UpdateStress::new());
        let taper = tape.register(Cerjan::new(self.free_surface, self.abpc, self.nab)?);
        let surface = self
            .free_surface
            .then(|| tape.register(FreeSurface::new(self.nt)));
        let receiver = tape.register(Receiver::new());

        let f = fields;
        tape.call(
            scale,
            states,
            ScaleArgs {
                vp: f.vp,
                vs: f.vs,
                rho: f.rho,
            },
        )?;
        let velocities = CerjanArgs {
            fields: vec![f.vx, f.vz],
        };
        let stresses = CerjanArgs {
            fields: vec![f.sxx, f.szz, f.sxz],
        };
        for t in 0..self.nt {
            tape.call(
                source,
                states,
                SourceArgs {
                    target: f.vz,
                    signal: f.signal,
                    time: t,
                    cells: self.sources.clone(),
                },
            )?;
            tape.call(
                velocity,
                states,
                VelocityArgs {
                    vx: f.vx,
                    vz: f.vz,
                    sxx: f.sxx,
                    szz: f.szz,
                    sxz: f.sxz,
                    buoyancy: f.rho,
                },
            )?;
            tape.call(taper, states, velocities.clone())?;
            tape.call(
                stress,
                states,
                StressArgs {
                    vx: f.vx,
                    vz: f.vz,
                    sxx: f.sxx,
                    szz: f.szz,
                    sxz: f.sxz,
                    modulus: f.vp,
                    shear: f.vs,
                },
            )?;
            if let Some(surface) = surface {
                tape.call(
                    surface,
                    states,
                    SurfaceArgs {
                        vx: f.vx,
                        vz: f.vz,
                        sxx: f.sxx,
                        szz: f.szz,
                        sxz: f.sxz,
                        modulus: f.vp,
                        shear: f.vs,
                    },
                )?;
            }
            tape.call(taper, states, stresses.clone())?;
            for (field, traces) in [(f.vx, f.vx_out), (f.vz, f.vz_out)] {
                tape.call(
                    receiver,
                    states,
                    ReceiverArgs {
                        field,
                        traces,
                        time: t,
                        cells: self.receivers.clone(),
                    },
                )?;
            }
        }
        info!(nt = self.nt, entries = tape.len(), "forward run recorded");
        Ok(tape)
    }
}

/// A propagator bound to the fields of one simulation, checkable as a
/// single differentiable map over the whole state.
#[derive(Debug)]
pub struct Elastic2d {
    pub propagator: Propagator,
    pub fields: ElasticFields,
    tape: Option<Tape>,
}

impl Elastic2d {
    pub fn new(propagator: Propagator, fields: ElasticFields) -> Self {
        Elastic2d {
            propagator,
            fields,
            tape: None,
        }
    }
}

impl Differentiable for Elastic2d {
    fn forward(&mut self, states: &mut States) -> Result<()> {
        self.tape = Some(self.propagator.record(states, &self.fields)?);
        Ok(())
    }

    fn backward(&mut self, states: &mut States) -> Result<()> {
        let mut tape = self.tape.take().ok_or(Error::NotRecorded {
            operator: "Elastic2d",
        })?;
        tape.unwind(states)
    }

    fn linear(&mut self, states: &mut States) -> Result<()> {
        let mut tape = self.propagator.record(states, &self.fields)?;
        tape.unwind(states)?;
        tape.linear(states)?;
        tape.unwind(states)
    }

    fn adjoint(&mut self, states: &mut States) -> Result<()> {
        self.propagator
            .record(states, &self.fields)?
            .gradient(states)
    }
}

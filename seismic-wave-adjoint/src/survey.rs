//! Multi-shot synthesis and least-squares misfit gradients.
//!
//! Shots are independent: each one gets its own [`States`] and tape, so they
//! run in parallel and their gradients are summed afterwards.

use ndarray::{Array2, Zip};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::field::{Layer, States};
use crate::grid::Cell;
use crate::materials::Model;
use crate::propagator::Propagator;
use crate::tape::Tape;
use crate::wavefield::ElasticFields;

/// One source position and its time function (one sample per step).
#[derive(Debug, Clone, PartialEq)]
pub struct Shot {
    pub cells: Vec<Cell>,
    pub signal: Vec<f64>,
}

/// Receiver recordings of one shot, shape `(nt, nrec)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Traces {
    pub vx: Array2<f64>,
    pub vz: Array2<f64>,
}

/// `0.5 * ||d_syn - d_obs||²` summed over shots, with its gradient with
/// respect to the physical model on the interior grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Gradient {
    pub misfit: f64,
    pub vp: Array2<f64>,
    pub vs: Array2<f64>,
    pub rho: Array2<f64>,
}

impl Gradient {
    fn zeros(shape: (usize, usize)) -> Self {
        Gradient {
            misfit: 0.0,
            vp: Array2::zeros(shape),
            vs: Array2::zeros(shape),
            rho: Array2::zeros(shape),
        }
    }

    fn accumulate(mut self, other: Gradient) -> Self {
        self.misfit += other.misfit;
        self.vp += &other.vp;
        self.vs += &other.vs;
        self.rho += &other.rho;
        self
    }
}

/// A recorded forward run together with the state it ran on.
struct Run {
    states: States,
    fields: ElasticFields,
    tape: Tape,
}

fn run_shot(propagator: &Propagator, model: &Model, shot: &Shot) -> Result<Run> {
    let propagator = propagator.with_sources(shot.cells.clone());
    let mut states = States::new();
    let fields = ElasticFields::allocate(
        &mut states,
        &propagator.grid,
        model,
        propagator.nt,
        propagator.receivers.len(),
    )?;
    fields.set_signal(&mut states, &shot.signal)?;
    let tape = propagator.record(&mut states, &fields)?;
    Ok(Run {
        states,
        fields,
        tape,
    })
}

fn recordings(states: &States, fields: &ElasticFields) -> Result<Traces> {
    Ok(Traces {
        vx: states.layer(fields.vx_out, Layer::Value)?.to_owned(),
        vz: states.layer(fields.vz_out, Layer::Value)?.to_owned(),
    })
}

/// Forward-model a single shot.
pub fn simulate_shot(propagator: &Propagator, model: &Model, shot: &Shot) -> Result<Traces> {
    let run = run_shot(propagator, model, shot)?;
    recordings(&run.states, &run.fields)
}

/// Forward-model every shot in parallel, in shot order.
pub fn synthesize(propagator: &Propagator, model: &Model, shots: &[Shot]) -> Result<Vec<Traces>> {
    info!(shots = shots.len(), nt = propagator.nt, "synthesizing");
    shots
        .par_iter()
        .map(|shot| simulate_shot(propagator, model, shot))
        .collect()
}

fn shot_gradient(
    propagator: &Propagator,
    model: &Model,
    shot: &Shot,
    observed: &Traces,
) -> Result<Gradient> {
    let Run {
        mut states,
        fields,
        tape,
    } = run_shot(propagator, model, shot)?;

    let mut misfit = 0.0;
    for (id, data) in [(fields.vx_out, &observed.vx), (fields.vz_out, &observed.vz)] {
        let synthetic = states.layer(id, Layer::Value)?;
        if synthetic.dim() != data.dim() {
            return Err(Error::Shape(format!(
                "observed traces are {:?}, synthetics are {:?}",
                data.dim(),
                synthetic.dim()
            )));
        }
        let residual = &synthetic - data;
        misfit += 0.5 * residual.iter().map(|r| r * r).sum::<f64>();
        states.layer_mut(id, Layer::Gradient)?.assign(&residual);
    }
    debug!(misfit, "shot residual seeded");

    tape.gradient(&mut states)?;
    Ok(Gradient {
        misfit,
        vp: states.interior(fields.vp, Layer::Gradient)?.to_owned(),
        vs: states.interior(fields.vs, Layer::Gradient)?.to_owned(),
        rho: states.interior(fields.rho, Layer::Gradient)?.to_owned(),
    })
}

/// Misfit against `observed` (one entry per shot) and its model gradient,
/// summed over shots.
pub fn misfit_gradient(
    propagator: &Propagator,
    model: &Model,
    shots: &[Shot],
    observed: &[Traces],
) -> Result<Gradient> {
    if shots.len() != observed.len() {
        return Err(Error::Shape(format!(
            "{} shots but {} observed gathers",
            shots.len(),
            observed.len()
        )));
    }
    let total = shots
        .par_iter()
        .zip(observed)
        .map(|(shot, data)| shot_gradient(propagator, model, shot, data))
        .try_reduce(
            || Gradient::zeros(model.shape()),
            |a, b| Ok(a.accumulate(b)),
        )?;
    info!(misfit = total.misfit, "misfit gradient computed");
    Ok(total)
}

/// Root-mean-square amplitude of a gather.
pub fn rms(traces: &Traces) -> f64 {
    let n = traces.vx.len() + traces.vz.len();
    if n == 0 {
        return 0.0;
    }
    let mut sum = 0.0;
    Zip::from(&traces.vx).for_each(|&v| sum += v * v);
    Zip::from(&traces.vz).for_each(|&v| sum += v * v);
    (sum / n as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Grid;
    use crate::materials::Anomaly;
    use crate::propagator::ricker;
    use approx::assert_relative_eq;

    const NT: usize = 16;
    const DT: f64 = 0.1;

    fn propagator() -> Propagator {
        Propagator {
            grid: Grid::new(14, 12, 1.0, 2),
            nt: NT,
            dt: DT,
            nab: 3,
            abpc: 4.0,
            free_surface: true,
            sources: Vec::new(),
            receivers: vec![Cell::new(2, 3), Cell::new(2, 7), Cell::new(2, 11)],
        }
    }

    fn shots() -> Vec<Shot> {
        let signal = ricker(1.0, 0.4, DT, NT);
        [Cell::new(5, 4), Cell::new(5, 9)]
            .into_iter()
            .map(|cell| Shot {
                cells: vec![cell],
                signal: signal.clone(),
            })
            .collect()
    }

    fn background() -> Model {
        Model::homogeneous(&propagator().grid, 2.0, 1.0, 1.5).unwrap()
    }

    fn target() -> Model {
        background()
            .with_anomaly(&Anomaly {
                x0: 5,
                x1: 9,
                z0: 4,
                z1: 7,
                vp: 2.2,
                vs: 1.1,
                rho: 1.6,
            })
            .unwrap()
    }

    #[test]
    fn parallel_synthesis_matches_sequential() {
        let p = propagator();
        let model = target();
        let shots = shots();
        let parallel = synthesize(&p, &model, &shots).unwrap();
        for (shot, traces) in shots.iter().zip(&parallel) {
            assert_eq!(&simulate_shot(&p, &model, shot).unwrap(), traces);
        }
        assert!(rms(&parallel[0]) > 0.0);
        assert_ne!(parallel[0], parallel[1]);
    }

    #[test]
    fn identical_models_give_zero_misfit() {
        let p = propagator();
        let model = target();
        let shots = shots();
        let observed = synthesize(&p, &model, &shots).unwrap();
        let grad = misfit_gradient(&p, &model, &shots, &observed).unwrap();
        assert_eq!(grad.misfit, 0.0);
        assert_eq!(grad.vp.iter().map(|g| g.abs()).sum::<f64>(), 0.0);
    }

    #[test]
    fn gradient_matches_finite_difference() {
        let p = propagator();
        let shots = shots();
        let observed = synthesize(&p, &target(), &shots).unwrap();
        let model = background();
        let grad = misfit_gradient(&p, &model, &shots, &observed).unwrap();
        assert!(grad.misfit > 0.0);

        let cell = [5, 6];
        let eps = 1e-5;
        let misfit_at = |delta: f64| {
            let mut m = model.clone();
            m.vp[cell] += delta;
            misfit_gradient(&p, &m, &shots, &observed).unwrap().misfit
        };
        let fd = (misfit_at(eps) - misfit_at(-eps)) / (2.0 * eps);
        assert_relative_eq!(grad.vp[cell], fd, max_relative = 1e-4);
    }

    #[test]
    fn gathers_must_pair_with_shots() {
        let p = propagator();
        let model = background();
        let shots = shots();
        let observed = synthesize(&p, &model, &shots[..1]).unwrap();
        assert!(matches!(
            misfit_gradient(&p, &model, &shots, &observed),
            Err(Error::Shape(_))
        ));
    }
}

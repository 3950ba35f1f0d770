use ndarray::{Array2, Zip};

use crate::error::{Error, Result};
use crate::field::{FieldId, Layer, States};
use crate::operator::Reversible;
use crate::operators::interior;

/// Physical material fields rescaled in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleArgs {
    pub vp: FieldId,  // P-wave speed -> scaled P modulus
    pub vs: FieldId,  // S-wave speed -> scaled shear modulus
    pub rho: FieldId, // Density -> scaled buoyancy
}

/// Converts wave speeds and density into the coefficients consumed by the
/// velocity and stress updates:
///
/// ```text
/// M = vp² ρ,  μ = vs² ρ,  sc = trunc(log2(max(M) dt/dh))
/// rho <- 2^sc (dt/dh) / ρ
/// vp  <- (dt/dh) M 2^-sc
/// vs  <- (dt/dh) μ 2^-sc
/// ```
///
/// The exponent `sc` is a discrete choice frozen by the forward call. Linear
/// and adjoint evaluations reuse it and never differentiate it.
#[derive(Debug, Clone)]
pub struct ScaleParameters {
    dtdx: f64,
    exponent: Option<i32>,
}

impl ScaleParameters {
    pub fn new(dt: f64, dh: f64) -> Result<Self> {
        if !(dt > 0.0 && dh > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "time step and grid spacing must be positive (dt={dt}, dh={dh})"
            )));
        }
        Ok(ScaleParameters {
            dtdx: dt / dh,
            exponent: None,
        })
    }

    /// Exponent chosen by the most recent forward call.
    pub fn exponent(&self) -> Option<i32> {
        self.exponent
    }

    fn frozen(&self) -> Result<f64> {
        self.exponent
            .map(|sc| 2f64.powi(sc))
            .ok_or(Error::ExponentNotRecorded {
                operator: "ScaleParameters",
            })
    }

    fn scale(&mut self, states: &mut States, args: &ScaleArgs) -> Result<()> {
        let vp = interior(states, args.vp, Layer::Value)?;
        let vs = interior(states, args.vs, Layer::Value)?;
        let rho = interior(states, args.rho, Layer::Value)?;
        if rho.iter().any(|&r| !(r > 0.0)) {
            return Err(Error::InvalidParameter(
                "density must be positive everywhere in the interior".into(),
            ));
        }
        let modulus = &vp * &vp * &rho;
        let shear = &vs * &vs * &rho;
        let peak = modulus.iter().fold(0.0_f64, |m, &v| m.max(v)) * self.dtdx;
        if !(peak > 0.0) || !peak.is_finite() {
            return Err(Error::InvalidParameter(format!(
                "largest P modulus must be positive and finite, got {peak}"
            )));
        }
        let sc = peak.log2().trunc() as i32;
        let two_sc = 2f64.powi(sc);
        let factor = self.dtdx / two_sc;
        self.exponent = Some(sc);

        states
            .interior_mut(args.rho, Layer::Value)?
            .assign(&rho.mapv(|r| two_sc * self.dtdx / r));
        states
            .interior_mut(args.vp, Layer::Value)?
            .assign(&(modulus * factor));
        states
            .interior_mut(args.vs, Layer::Value)?
            .assign(&(shear * factor));
        Ok(())
    }

    fn unscale(&mut self, states: &mut States, args: &ScaleArgs) -> Result<()> {
        let two_sc = self.frozen()?;
        let buoyancy = interior(states, args.rho, Layer::Value)?;
        if buoyancy.iter().any(|&b| !(b > 0.0)) {
            return Err(Error::InvalidParameter(
                "scaled buoyancy must be positive to invert the rescaling".into(),
            ));
        }
        let rho = buoyancy.mapv(|b| two_sc * self.dtdx / b);
        let unfactor = two_sc / self.dtdx;
        let speed = |scaled: Array2<f64>| {
            let mut out = scaled * unfactor;
            Zip::from(&mut out)
                .and(&rho)
                .for_each(|m, &r| *m = (*m / r).max(0.0).sqrt());
            out
        };
        let vp = speed(interior(states, args.vp, Layer::Value)?);
        let vs = speed(interior(states, args.vs, Layer::Value)?);

        states.interior_mut(args.rho, Layer::Value)?.assign(&rho);
        states.interior_mut(args.vp, Layer::Value)?.assign(&vp);
        states.interior_mut(args.vs, Layer::Value)?.assign(&vs);
        Ok(())
    }
}

impl Reversible for ScaleParameters {
    type Args = ScaleArgs;

    fn name(&self) -> &'static str {
        "ScaleParameters"
    }

    fn required_states(&self, args: &ScaleArgs) -> Vec<FieldId> {
        vec![args.vp, args.vs, args.rho]
    }

    fn updated_states(&self, args: &ScaleArgs) -> Vec<FieldId> {
        vec![args.vp, args.vs, args.rho]
    }

    fn forward(&mut self, states: &mut States, args: &ScaleArgs, backpropagate: bool) -> Result<()> {
        if backpropagate {
            self.unscale(states, args)
        } else {
            self.scale(states, args)
        }
    }

    fn linear(&mut self, states: &mut States, args: &ScaleArgs) -> Result<()> {
        let two_sc = self.frozen()?;
        let factor = self.dtdx / two_sc;
        let vp = interior(states, args.vp, Layer::Value)?;
        let vs = interior(states, args.vs, Layer::Value)?;
        let rho = interior(states, args.rho, Layer::Value)?;
        let dvp = interior(states, args.vp, Layer::Linear)?;
        let dvs = interior(states, args.vs, Layer::Linear)?;
        let drho = interior(states, args.rho, Layer::Linear)?;

        let dmodulus = (&vp * &rho * &dvp) * 2.0 + &vp * &vp * &drho;
        let dshear = (&vs * &rho * &dvs) * 2.0 + &vs * &vs * &drho;
        let mut dbuoyancy = drho;
        Zip::from(&mut dbuoyancy)
            .and(&rho)
            .for_each(|d, &r| *d *= -two_sc * self.dtdx / (r * r));

        states
            .interior_mut(args.rho, Layer::Linear)?
            .assign(&dbuoyancy);
        states
            .interior_mut(args.vp, Layer::Linear)?
            .assign(&(dmodulus * factor));
        states
            .interior_mut(args.vs, Layer::Linear)?
            .assign(&(dshear * factor));
        Ok(())
    }

    fn adjoint(&mut self, states: &mut States, args: &ScaleArgs) -> Result<()> {
        let two_sc = self.frozen()?;
        let factor = self.dtdx / two_sc;
        let vp = interior(states, args.vp, Layer::Value)?;
        let vs = interior(states, args.vs, Layer::Value)?;
        let rho = interior(states, args.rho, Layer::Value)?;
        let gmodulus = interior(states, args.vp, Layer::Gradient)? * factor;
        let gshear = interior(states, args.vs, Layer::Gradient)? * factor;
        let gbuoyancy = interior(states, args.rho, Layer::Gradient)?;

        let mut grho = &vp * &vp * &gmodulus + &vs * &vs * &gshear;
        Zip::from(&mut grho)
            .and(&gbuoyancy)
            .and(&rho)
            .for_each(|g, &gb, &r| *g -= two_sc * self.dtdx / (r * r) * gb);
        let gvp = (&vp * &rho * &gmodulus) * 2.0;
        let gvs = (&vs * &rho * &gshear) * 2.0;

        states.interior_mut(args.rho, Layer::Gradient)?.assign(&grho);
        states.interior_mut(args.vp, Layer::Gradient)?.assign(&gvp);
        states.interior_mut(args.vs, Layer::Gradient)?.assign(&gvs);
        Ok(())
    }
}

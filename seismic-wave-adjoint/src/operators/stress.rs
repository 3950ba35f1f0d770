use ndarray::Array2;

use crate::error::Result;
use crate::field::{FieldId, Layer, States};
use crate::operator::{check_binding, check_stencil_halo, Reversible};
use crate::operators::{derivative, interior, scatter_gradient};
use crate::stencil::Stencil::{BackwardX, BackwardZ, ForwardX, ForwardZ};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StressArgs {
    pub vx: FieldId,
    pub vz: FieldId,
    pub sxx: FieldId,
    pub szz: FieldId,
    pub sxz: FieldId,
    pub modulus: FieldId, // Scaled P modulus M = ρ vp²
    pub shear: FieldId,   // Scaled shear modulus μ = ρ vs²
}

/// Velocity gradients on the interior.
struct Strain {
    vxx: Array2<f64>,
    vxz: Array2<f64>,
    vzx: Array2<f64>,
    vzz: Array2<f64>,
}

impl Strain {
    fn of(states: &States, args: &StressArgs, layer: Layer) -> Result<Self> {
        Ok(Strain {
            vxx: derivative(states, args.vx, layer, BackwardX)?,
            vxz: derivative(states, args.vx, layer, ForwardZ)?,
            vzx: derivative(states, args.vz, layer, ForwardX)?,
            vzz: derivative(states, args.vz, layer, BackwardZ)?,
        })
    }

    /// Stress increments for moduli `m` and `mu`.
    fn increments(&self, m: &Array2<f64>, mu: &Array2<f64>) -> [Array2<f64>; 3] {
        let trace = &self.vxx + &self.vzz;
        let dxx = m * &trace - (mu * &self.vzz) * 2.0;
        let dzz = m * &trace - (mu * &self.vxx) * 2.0;
        let dxz = mu * &(&self.vxz + &self.vzx);
        [dxx, dzz, dxz]
    }
}

/// Stress half step for an isotropic medium:
///
/// ```text
/// sxx += M (vxx + vzz) - 2μ vzz
/// szz += M (vxx + vzz) - 2μ vxx
/// sxz += μ (vxz + vzx)
/// ```
///
/// with `vxx = D-x vx`, `vxz = D+z vx`, `vzx = D+x vz`, `vzz = D-z vz`.
#[derive(Debug, Clone, Default)]
pub struct UpdateStress;

impl UpdateStress {
    pub fn new() -> Self {
        UpdateStress
    }

    fn accumulate(
        states: &mut States,
        args: &StressArgs,
        layer: Layer,
        sign: f64,
        increments: [Array2<f64>; 3],
    ) -> Result<()> {
        let [dxx, dzz, dxz] = increments;
        states
            .interior_mut(args.sxx, layer)?
            .scaled_add(sign, &dxx);
        states
            .interior_mut(args.szz, layer)?
            .scaled_add(sign, &dzz);
        states
            .interior_mut(args.sxz, layer)?
            .scaled_add(sign, &dxz);
        Ok(())
    }
}

impl Reversible for UpdateStress {
    type Args = StressArgs;

    fn name(&self) -> &'static str {
        "UpdateStress"
    }

    fn required_states(&self, args: &StressArgs) -> Vec<FieldId> {
        vec![
            args.vx,
            args.vz,
            args.sxx,
            args.szz,
            args.sxz,
            args.modulus,
            args.shear,
        ]
    }

    fn updated_states(&self, args: &StressArgs) -> Vec<FieldId> {
        vec![args.sxx, args.szz, args.sxz]
    }

    fn check(&self, states: &States, args: &StressArgs) -> Result<()> {
        let required = self.required_states(args);
        check_binding(self.name(), states, &required, &required)?;
        check_stencil_halo(self.name(), states, args.vx)
    }

    fn forward(&mut self, states: &mut States, args: &StressArgs, backpropagate: bool) -> Result<()> {
        let strain = Strain::of(states, args, Layer::Value)?;
        let m = interior(states, args.modulus, Layer::Value)?;
        let mu = interior(states, args.shear, Layer::Value)?;
        let sign = if backpropagate { -1.0 } else { 1.0 };
        Self::accumulate(states, args, Layer::Value, sign, strain.increments(&m, &mu))
    }

    fn linear(&mut self, states: &mut States, args: &StressArgs) -> Result<()> {
        let strain = Strain::of(states, args, Layer::Value)?;
        let dstrain = Strain::of(states, args, Layer::Linear)?;
        let m = interior(states, args.modulus, Layer::Value)?;
        let mu = interior(states, args.shear, Layer::Value)?;
        let dm = interior(states, args.modulus, Layer::Linear)?;
        let dmu = interior(states, args.shear, Layer::Linear)?;
        Self::accumulate(states, args, Layer::Linear, 1.0, dstrain.increments(&m, &mu))?;
        Self::accumulate(states, args, Layer::Linear, 1.0, strain.increments(&dm, &dmu))
    }

    fn adjoint(&mut self, states: &mut States, args: &StressArgs) -> Result<()> {
        let strain = Strain::of(states, args, Layer::Value)?;
        let m = interior(states, args.modulus, Layer::Value)?;
        let mu = interior(states, args.shear, Layer::Value)?;
        let gxx = interior(states, args.sxx, Layer::Gradient)?;
        let gzz = interior(states, args.szz, Layer::Gradient)?;
        let gxz = interior(states, args.sxz, Layer::Gradient)?;

        let gm = (&strain.vxx + &strain.vzz) * &(&gxx + &gzz);
        let gmu = (&strain.vzz * &gxx + &strain.vxx * &gzz) * -2.0
            + (&strain.vxz + &strain.vzx) * &gxz;
        states
            .interior_mut(args.modulus, Layer::Gradient)?
            .zip_mut_with(&gm, |g, &d| *g += d);
        states
            .interior_mut(args.shear, Layer::Gradient)?
            .zip_mut_with(&gmu, |g, &d| *g += d);

        let lame = &m - &(&mu * 2.0);
        let to_vxx = &m * &gxx + &lame * &gzz;
        let to_vzz = &lame * &gxx + &m * &gzz;
        let to_shear = &mu * &gxz;
        scatter_gradient(states, args.vx, BackwardX, to_vxx.view())?;
        scatter_gradient(states, args.vx, ForwardZ, to_shear.view())?;
        scatter_gradient(states, args.vz, BackwardZ, to_vzz.view())?;
        scatter_gradient(states, args.vz, ForwardX, to_shear.view())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::max_abs_diff;
    use crate::operators::testing::*;
    use crate::selftest::{check_all, Bound};
    use approx::assert_relative_eq;

    fn setup() -> (States, StressArgs) {
        let mut states = States::new();
        let args = StressArgs {
            vx: wave(&mut states, "vx", 11),
            vz: wave(&mut states, "vz", 12),
            sxx: wave(&mut states, "sxx", 13),
            szz: wave(&mut states, "szz", 14),
            sxz: wave(&mut states, "sxz", 15),
            modulus: material(&mut states, "vp", 16),
            shear: material(&mut states, "vs", 17),
        };
        (states, args)
    }

    #[test]
    fn negated_step_is_identity() {
        let (mut states, args) = setup();
        let before = states.snapshot(Layer::Value);
        let mut op = UpdateStress::new();
        op.forward(&mut states, &args, false).unwrap();
        op.forward(&mut states, &args, true).unwrap();
        assert!(max_abs_diff(&before, &states.snapshot(Layer::Value)) < 1e-12);
    }

    #[test]
    fn pure_shear_leaves_normal_stress() {
        let (mut states, args) = setup();
        // vx varying along z only: vxx = 0, vxz != 0
        let ramp = Array2::from_shape_fn((14, 14), |(i, _)| i as f64);
        states
            .layer_mut(args.vx, Layer::Value)
            .unwrap()
            .assign(&ramp);
        states.layer_mut(args.vz, Layer::Value).unwrap().fill(0.0);
        let sxx = interior(&states, args.sxx, Layer::Value).unwrap();
        let sxz = interior(&states, args.sxz, Layer::Value).unwrap();
        let mu = interior(&states, args.shear, Layer::Value).unwrap();
        UpdateStress::new()
            .forward(&mut states, &args, false)
            .unwrap();
        let sxx_after = interior(&states, args.sxx, Layer::Value).unwrap();
        let sxz_after = interior(&states, args.sxz, Layer::Value).unwrap();
        assert!(max_abs_diff(&[sxx], &[sxx_after]) < 1e-14);
        let slope = crate::stencil::HC[0] + 3.0 * crate::stencil::HC[1];
        assert_relative_eq!(
            sxz_after[[4, 4]] - sxz[[4, 4]],
            mu[[4, 4]] * slope,
            max_relative = 1e-12
        );
    }

    #[test]
    fn satisfies_self_tests() {
        let (mut states, args) = setup();
        let mut op = Bound::new(UpdateStress::new(), args);
        let report = check_all(&mut op, &mut states, 29).unwrap();
        assert!(report.backward < 1e-12, "{report:?}");
        assert!(report.linear < 1e-10, "{report:?}");
        assert!(report.dot < 1e-12, "{report:?}");
    }
}

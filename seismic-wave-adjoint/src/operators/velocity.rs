use ndarray::Array2;

use crate::error::Result;
use crate::field::{FieldId, Layer, States};
use crate::operator::{check_binding, check_stencil_halo, Reversible};
use crate::operators::{derivative, interior, scatter_gradient};
use crate::stencil::Stencil::{BackwardX, BackwardZ, ForwardX, ForwardZ};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VelocityArgs {
    pub vx: FieldId,
    pub vz: FieldId,
    pub sxx: FieldId,
    pub szz: FieldId,
    pub sxz: FieldId,
    pub buoyancy: FieldId, // Scaled 1/ρ produced by ScaleParameters
}

/// Velocity half step:
///
/// ```text
/// vx += (D+x sxx + D-z sxz) b
/// vz += (D+z szz + D-x sxz) b
/// ```
#[derive(Debug, Clone, Default)]
pub struct UpdateVelocity;

impl UpdateVelocity {
    pub fn new() -> Self {
        UpdateVelocity
    }

    /// Stress divergence on the interior for one layer.
    fn divergence(
        states: &States,
        args: &VelocityArgs,
        layer: Layer,
    ) -> Result<(Array2<f64>, Array2<f64>)> {
        let ax = derivative(states, args.sxx, layer, ForwardX)?
            + derivative(states, args.sxz, layer, BackwardZ)?;
        let az = derivative(states, args.szz, layer, ForwardZ)?
            + derivative(states, args.sxz, layer, BackwardX)?;
        Ok((ax, az))
    }
}

impl Reversible for UpdateVelocity {
    type Args = VelocityArgs;

    fn name(&self) -> &'static str {
        "UpdateVelocity"
    }

    fn required_states(&self, args: &VelocityArgs) -> Vec<FieldId> {
        vec![args.vx, args.vz, args.sxx, args.szz, args.sxz, args.buoyancy]
    }

    fn updated_states(&self, args: &VelocityArgs) -> Vec<FieldId> {
        vec![args.vx, args.vz]
    }

    fn check(&self, states: &States, args: &VelocityArgs) -> Result<()> {
        let required = self.required_states(args);
        check_binding(self.name(), states, &required, &required)?;
        check_stencil_halo(self.name(), states, args.vx)
    }

    fn forward(&mut self, states: &mut States, args: &VelocityArgs, backpropagate: bool) -> Result<()> {
        let (ax, az) = Self::divergence(states, args, Layer::Value)?;
        let b = interior(states, args.buoyancy, Layer::Value)?;
        let sign = if backpropagate { -1.0 } else { 1.0 };
        states
            .interior_mut(args.vx, Layer::Value)?
            .scaled_add(sign, &(ax * &b));
        states
            .interior_mut(args.vz, Layer::Value)?
            .scaled_add(sign, &(az * &b));
        Ok(())
    }

    fn linear(&mut self, states: &mut States, args: &VelocityArgs) -> Result<()> {
        let (ax, az) = Self::divergence(states, args, Layer::Value)?;
        let (dax, daz) = Self::divergence(states, args, Layer::Linear)?;
        let b = interior(states, args.buoyancy, Layer::Value)?;
        let db = interior(states, args.buoyancy, Layer::Linear)?;
        states
            .interior_mut(args.vx, Layer::Linear)?
            .zip_mut_with(&(dax * &b + ax * &db), |v, &d| *v += d);
        states
            .interior_mut(args.vz, Layer::Linear)?
            .zip_mut_with(&(daz * &b + az * &db), |v, &d| *v += d);
        Ok(())
    }

    fn adjoint(&mut self, states: &mut States, args: &VelocityArgs) -> Result<()> {
        let (ax, az) = Self::divergence(states, args, Layer::Value)?;
        let b = interior(states, args.buoyancy, Layer::Value)?;
        let gvx = interior(states, args.vx, Layer::Gradient)?;
        let gvz = interior(states, args.vz, Layer::Gradient)?;

        let gb = &ax * &gvx + &az * &gvz;
        states
            .interior_mut(args.buoyancy, Layer::Gradient)?
            .zip_mut_with(&gb, |g, &d| *g += d);

        let bgx = &b * &gvx;
        let bgz = &b * &gvz;
        scatter_gradient(states, args.sxx, ForwardX, bgx.view())?;
        scatter_gradient(states, args.sxz, BackwardZ, bgx.view())?;
        scatter_gradient(states, args.szz, ForwardZ, bgz.view())?;
        scatter_gradient(states, args.sxz, BackwardX, bgz.view())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::field::{max_abs_diff, Field, Init};
    use crate::operators::testing::*;
    use crate::selftest::{check_all, Bound};

    fn setup() -> (States, VelocityArgs) {
        let mut states = States::new();
        let args = VelocityArgs {
            vx: wave(&mut states, "vx", 1),
            vz: wave(&mut states, "vz", 2),
            sxx: wave(&mut states, "sxx", 3),
            szz: wave(&mut states, "szz", 4),
            sxz: wave(&mut states, "sxz", 5),
            buoyancy: material(&mut states, "rho", 6),
        };
        (states, args)
    }

    #[test]
    fn negated_step_is_identity() {
        let (mut states, args) = setup();
        let before = states.snapshot(Layer::Value);
        let mut op = UpdateVelocity::new();
        op.forward(&mut states, &args, false).unwrap();
        assert!(max_abs_diff(&before, &states.snapshot(Layer::Value)) > 1e-3);
        op.forward(&mut states, &args, true).unwrap();
        assert!(max_abs_diff(&before, &states.snapshot(Layer::Value)) < 1e-12);
    }

    #[test]
    fn only_velocity_interior_changes() {
        let (mut states, args) = setup();
        let before = states.snapshot(Layer::Value);
        UpdateVelocity::new()
            .forward(&mut states, &args, false)
            .unwrap();
        let after = states.snapshot(Layer::Value);
        for id in [args.sxx, args.szz, args.sxz, args.buoyancy] {
            assert_eq!(before[id.index()], after[id.index()]);
        }
        let vx = &after[args.vx.index()];
        assert_eq!(vx.row(1), before[args.vx.index()].row(1));
    }

    #[test]
    fn narrow_halo_is_rejected() {
        let (mut states, mut args) = setup();
        args.vx = states.insert(Field::new("thin", (12, 12), 1, Init::Zeros));
        let op = UpdateVelocity::new();
        assert!(matches!(op.check(&states, &args), Err(Error::Shape(_))));
    }

    #[test]
    fn satisfies_self_tests() {
        let (mut states, args) = setup();
        let mut op = Bound::new(UpdateVelocity::new(), args);
        let report = check_all(&mut op, &mut states, 23).unwrap();
        assert!(report.backward < 1e-12, "{report:?}");
        assert!(report.linear < 1e-10, "{report:?}");
        assert!(report.dot < 1e-12, "{report:?}");
    }
}

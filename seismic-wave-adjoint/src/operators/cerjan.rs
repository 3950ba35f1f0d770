use ndarray::{s, Array1, Array2, Axis, Zip};

use crate::error::{Error, Result};
use crate::field::{FieldId, Layer, States};
use crate::operator::Reversible;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CerjanArgs {
    pub fields: Vec<FieldId>,
}

/// Cerjan sponge: a diagonal exponential taper over an absorbing band of
/// `nab` cells just inside every edge of the interior. The top edge is left
/// alone when a free surface is active.
#[derive(Debug, Clone)]
pub struct Cerjan {
    free_surface: bool,
    nab: usize,
    profile: Array1<f64>, // profile[k] = exp(ln(1 - abpc/100) / nab² · k²)
}

impl Cerjan {
    pub fn new(free_surface: bool, abpc: f64, nab: usize) -> Result<Self> {
        if nab == 0 {
            return Err(Error::InvalidParameter(
                "absorbing band must be at least one cell wide".into(),
            ));
        }
        if !(0.0..100.0).contains(&abpc) {
            return Err(Error::InvalidParameter(format!(
                "decay percentage must lie in [0, 100), got {abpc}"
            )));
        }
        let rate = (1.0 - abpc / 100.0).ln() / (nab * nab) as f64;
        let profile = Array1::from_shape_fn(nab, |k| (rate * (k * k) as f64).exp());
        Ok(Cerjan {
            free_surface,
            nab,
            profile,
        })
    }

    pub fn profile(&self) -> &Array1<f64> {
        &self.profile
    }

    /// The full diagonal of the taper for a padded array. Corner cells carry
    /// the product of the row and column factors.
    pub fn multiplier(&self, shape: (usize, usize), halo: usize) -> Result<Array2<f64>> {
        let (rows, cols) = shape;
        let nab = self.nab;
        if rows < 2 * (halo + nab) || cols < 2 * (halo + nab) {
            return Err(Error::Shape(format!(
                "{rows}x{cols} with halo {halo} is too small for an absorbing band of {nab}"
            )));
        }
        let reversed = self.profile.slice(s![..;-1]);
        let mut taper = Array2::ones(shape);
        for (axis, len) in [(Axis(0), rows), (Axis(1), cols)] {
            let top = axis.index() != 0 || !self.free_surface;
            for k in 0..nab {
                if top {
                    taper
                        .index_axis_mut(axis, halo + k)
                        .mapv_inplace(|v| v * reversed[k]);
                }
                taper
                    .index_axis_mut(axis, len - halo - nab + k)
                    .mapv_inplace(|v| v * self.profile[k]);
            }
        }
        Ok(taper)
    }

    fn apply(&self, states: &mut States, args: &CerjanArgs, layer: Layer, invert: bool) -> Result<()> {
        for &id in &args.fields {
            let field = states.field_mut(id)?;
            let taper = self.multiplier(field.shape(), field.halo())?;
            let target = field.layer_mut(layer);
            if invert {
                Zip::from(target).and(&taper).for_each(|v, &t| *v /= t);
            } else {
                Zip::from(target).and(&taper).for_each(|v, &t| *v *= t);
            }
        }
        Ok(())
    }
}

impl Reversible for Cerjan {
    type Args = CerjanArgs;

    fn name(&self) -> &'static str {
        "Cerjan"
    }

    fn required_states(&self, args: &CerjanArgs) -> Vec<FieldId> {
        args.fields.clone()
    }

    fn updated_states(&self, args: &CerjanArgs) -> Vec<FieldId> {
        args.fields.clone()
    }

    fn forward(&mut self, states: &mut States, args: &CerjanArgs, backpropagate: bool) -> Result<()> {
        self.apply(states, args, Layer::Value, backpropagate)
    }

    fn linear(&mut self, states: &mut States, args: &CerjanArgs) -> Result<()> {
        self.apply(states, args, Layer::Linear, false)
    }

    fn adjoint(&mut self, states: &mut States, args: &CerjanArgs) -> Result<()> {
        self.apply(states, args, Layer::Gradient, false)
    }
}

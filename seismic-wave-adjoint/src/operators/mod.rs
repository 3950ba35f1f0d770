//! Elastic-wave operators built on the reversible contract.

mod cerjan;
mod receiver;
mod scaling;
mod source;
mod stress;
mod surface;
mod velocity;

pub use cerjan::{Cerjan, CerjanArgs};
pub use receiver::{Receiver, ReceiverArgs};
pub use scaling::{ScaleArgs, ScaleParameters};
pub use source::{PointSource, SourceArgs};
pub use stress::{StressArgs, UpdateStress};
pub use surface::{FreeSurface, SurfaceArgs};
pub use velocity::{UpdateVelocity, VelocityArgs};

use ndarray::{Array2, ArrayView2};

use crate::error::Result;
use crate::field::{FieldId, Layer, States};
use crate::stencil::Stencil;

/// Apply a stencil to one layer of a field.
pub(crate) fn derivative(
    states: &States,
    id: FieldId,
    layer: Layer,
    stencil: Stencil,
) -> Result<Array2<f64>> {
    let field = states.field(id)?;
    stencil.apply(field.layer(layer), field.halo())
}

/// Scatter the transpose of a stencil into the gradient layer of a field.
pub(crate) fn scatter_gradient(
    states: &mut States,
    id: FieldId,
    stencil: Stencil,
    output: ArrayView2<'_, f64>,
) -> Result<()> {
    let field = states.field_mut(id)?;
    let halo = field.halo();
    stencil.apply_adjoint(output, halo, field.layer_mut(Layer::Gradient))
}

/// Owned copy of the interior of one layer.
pub(crate) fn interior(states: &States, id: FieldId, layer: Layer) -> Result<Array2<f64>> {
    Ok(states.interior(id, layer)?.to_owned())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Helpers shared by the operator tests.

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::field::{Field, FieldId, Init, Layer, States};

    pub const SHAPE: (usize, usize) = (10, 10);
    pub const HALO: usize = 2;

    /// Wavefield values uniform in `[0, 1)`.
    pub fn wave(states: &mut States, name: &str, seed: u64) -> FieldId {
        states.insert(Field::new(name, SHAPE, HALO, Init::random(seed)))
    }

    /// Strictly positive material values in `[1, 2)`.
    pub fn material(states: &mut States, name: &str, seed: u64) -> FieldId {
        states.insert(Field::new(
            name,
            SHAPE,
            HALO,
            Init::Uniform {
                low: 1.0,
                high: 2.0,
                seed,
            },
        ))
    }

    /// Halo-free trace with every sample set to `value`.
    pub fn trace(states: &mut States, name: &str, nt: usize, ncols: usize, value: f64) -> FieldId {
        let mut field = Field::trace(name, nt, ncols);
        field.layer_mut(Layer::Value).fill(value);
        states.insert(field)
    }

    pub fn rng(seed: u64) -> StdRng {
        StdRng::seed_from_u64(seed)
    }

    pub fn fill_random(states: &mut States, id: FieldId, layer: Layer, rng: &mut StdRng) {
        if let Ok(mut view) = states.layer_mut(id, layer) {
            view.map_inplace(|v| *v = rng.gen_range(-1.0..1.0));
        }
    }
}

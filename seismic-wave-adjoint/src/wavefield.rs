use crate::error::{Error, Result};
use crate::field::{Field, FieldId, Init, Layer, States};
use crate::grid::Grid;
use crate::materials::Model;

/// Handles of every field an elastic simulation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElasticFields {
    // Material parameters, rescaled in place at the start of a run
    pub vp: FieldId,
    pub vs: FieldId,
    pub rho: FieldId,
    // Five wavefield components
    pub vx: FieldId,
    pub vz: FieldId,
    pub sxx: FieldId,
    pub szz: FieldId,
    pub sxz: FieldId,
    // Source time function (nt, 1) and receiver recordings (nt, nrec)
    pub signal: FieldId,
    pub vx_out: FieldId,
    pub vz_out: FieldId,
}

impl ElasticFields {
    /// Insert the fields for one simulation. The wavefield starts at rest and
    /// the signal at zero.
    pub fn allocate(
        states: &mut States,
        grid: &Grid,
        model: &Model,
        nt: usize,
        receivers: usize,
    ) -> Result<Self> {
        if model.shape() != grid.interior_shape() {
            return Err(Error::Shape(format!(
                "model is {:?}, grid interior is {:?}",
                model.shape(),
                grid.interior_shape()
            )));
        }
        let halo = grid.halo;
        Ok(ElasticFields {
            vp: states.insert(Field::from_interior("vp", model.vp.view(), halo)),
            vs: states.insert(Field::from_interior("vs", model.vs.view(), halo)),
            rho: states.insert(Field::from_interior("rho", model.rho.view(), halo)),
            vx: states.insert(grid.field("vx", Init::Zeros)),
            vz: states.insert(grid.field("vz", Init::Zeros)),
            sxx: states.insert(grid.field("sxx", Init::Zeros)),
            szz: states.insert(grid.field("szz", Init::Zeros)),
            sxz: states.insert(grid.field("sxz", Init::Zeros)),
            signal: states.insert(Field::trace("signal", nt, 1)),
            vx_out: states.insert(Field::trace("vx_out", nt, receivers)),
            vz_out: states.insert(Field::trace("vz_out", nt, receivers)),
        })
    }

    pub fn parameters(&self) -> [FieldId; 3] {
        [self.vp, self.vs, self.rho]
    }

    pub fn wavefield(&self) -> [FieldId; 5] {
        [self.vx, self.vz, self.sxx, self.szz, self.sxz]
    }

    pub fn recordings(&self) -> [FieldId; 2] {
        [self.vx_out, self.vz_out]
    }

    /// Write the source time function, one sample per time step.
    pub fn set_signal(&self, states: &mut States, samples: &[f64]) -> Result<()> {
        let mut signal = states.layer_mut(self.signal, Layer::Value)?;
        let nt = signal.nrows();
        if samples.len() != nt {
            return Err(Error::Shape(format!(
                "signal has {} samples, simulation has {nt} steps",
                samples.len()
            )));
        }
        for (row, &v) in samples.iter().enumerate() {
            signal[[row, 0]] = v;
        }
        Ok(())
    }

    /// Put the wavefield back at rest and clear the recordings.
    pub fn zero(&self, states: &mut States) -> Result<()> {
        for id in self.wavefield().into_iter().chain(self.recordings()) {
            states.field_mut(id)?.zero(Layer::Value);
        }
        Ok(())
    }
}

use ndarray::{s, Array1, Array2, ArrayView1, ArrayViewMut2};

use crate::error::{Error, Result};
use crate::field::{FieldId, Layer, States};
use crate::operator::{check_binding, check_stencil_halo, Reversible, SnapshotStack};
use crate::stencil::Stencil::{self, BackwardX, BackwardZ};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceArgs {
    pub vx: FieldId,
    pub vz: FieldId,
    pub sxx: FieldId,
    pub szz: FieldId,
    pub sxz: FieldId,
    pub modulus: FieldId, // Scaled P modulus (g)
    pub shear: FieldId,   // Scaled shear modulus (f = 2μ)
}

/// Stress rows `0..=halo` of sxx, szz and sxz saved before one application.
type Strip = [Array2<f64>; 3];

/// Zero-traction top boundary on the first interior row `h`:
///
/// ```text
/// szz[h] = 0
/// szz[h - j] = -szz[h + j],  sxz[h - j] = -sxz[h + j]   (j = 1..=h)
/// sxx[h] += -(g - f)² vxx / g - (g - f) vzz
/// ```
///
/// with `f = 2μ`, `g = M`, `vxx = D-x vx` and `vzz = D-z vz` on row `h`.
/// The mirroring discards the halo, so each forward call pushes the affected
/// strip and `backward` pops it.
#[derive(Debug, Clone)]
pub struct FreeSurface {
    saved: SnapshotStack<Strip>,
}

/// Row `h` of the moduli, the velocity gradients and the partial
/// derivatives of the sxx correction.
struct Surface {
    vxx: Array1<f64>,
    vzz: Array1<f64>,
    f: Array1<f64>,
    g: Array1<f64>,
}

impl Surface {
    fn of(states: &States, args: &SurfaceArgs, layer: Layer) -> Result<Self> {
        Ok(Surface {
            vxx: surface_derivative(states, args.vx, layer, BackwardX)?,
            vzz: surface_derivative(states, args.vz, layer, BackwardZ)?,
            f: surface_row(states, args.shear, Layer::Value)? * 2.0,
            g: surface_row(states, args.modulus, Layer::Value)?,
        })
    }

    fn correction(&self) -> Array1<f64> {
        let gf = &self.g - &self.f;
        -(&gf * &gf * &self.vxx / &self.g) - &gf * &self.vzz
    }

    /// ∂h/∂vxx
    fn dvxx(&self) -> Array1<f64> {
        let gf = &self.g - &self.f;
        -(&gf * &gf / &self.g)
    }

    /// ∂h/∂vzz
    fn dvzz(&self) -> Array1<f64> {
        -(&self.g - &self.f)
    }

    /// ∂h/∂f
    fn df(&self) -> Array1<f64> {
        let gf = &self.g - &self.f;
        &gf * &self.vxx / &self.g * 2.0 + &self.vzz
    }

    /// ∂h/∂g
    fn dg(&self) -> Array1<f64> {
        let gf = &self.g - &self.f;
        let ratio = &gf / &self.g;
        (&ratio * &ratio - &ratio * 2.0) * &self.vxx - &self.vzz
    }
}

fn surface_derivative(
    states: &States,
    id: FieldId,
    layer: Layer,
    stencil: Stencil,
) -> Result<Array1<f64>> {
    let field = states.field(id)?;
    let halo = field.halo();
    // Rows 0..2h+1: a window whose only interior row is the surface row h.
    let window = field.layer(layer).slice_move(s![..2 * halo + 1, ..]);
    Ok(stencil.apply(window, halo)?.row(0).to_owned())
}

fn surface_row(states: &States, id: FieldId, layer: Layer) -> Result<Array1<f64>> {
    let field = states.field(id)?;
    Ok(field.interior(layer).row(0).to_owned())
}

fn add_to_surface_row(
    states: &mut States,
    id: FieldId,
    layer: Layer,
    values: ArrayView1<'_, f64>,
) -> Result<()> {
    states
        .interior_mut(id, layer)?
        .row_mut(0)
        .zip_mut_with(&values, |v, &d| *v += d);
    Ok(())
}

fn scatter_surface(
    states: &mut States,
    id: FieldId,
    stencil: Stencil,
    row: ArrayView1<'_, f64>,
) -> Result<()> {
    let field = states.field_mut(id)?;
    let halo = field.halo();
    let window = field
        .layer_mut(Layer::Gradient)
        .slice_move(s![..2 * halo + 1, ..]);
    let output = row.insert_axis(ndarray::Axis(0));
    stencil.apply_adjoint(output, halo, window)
}

/// `rows[h - j] = -rows[h + j]` for `j = 1..=h`.
fn mirror(mut a: ArrayViewMut2<'_, f64>, halo: usize) {
    for j in 1..=halo {
        let below = a.row(halo + j).to_owned();
        a.row_mut(halo - j).assign(&below.mapv(|v| -v));
    }
}

/// Transpose of [`mirror`]: fold the halo rows back onto their sources.
fn fold(mut a: ArrayViewMut2<'_, f64>, halo: usize) {
    for j in 1..=halo {
        let above = a.row(halo - j).to_owned();
        a.row_mut(halo + j).zip_mut_with(&above, |v, &u| *v -= u);
    }
    a.slice_mut(s![..halo, ..]).fill(0.0);
}

impl FreeSurface {
    /// `capacity` bounds the number of unmatched forward calls.
    pub fn new(capacity: usize) -> Self {
        FreeSurface {
            saved: SnapshotStack::new("FreeSurface", capacity),
        }
    }

    /// Number of strips awaiting a backward call.
    pub fn saved(&self) -> usize {
        self.saved.len()
    }

    /// Discard every saved strip.
    pub fn clear(&mut self) {
        self.saved.clear();
    }

    fn stresses(args: &SurfaceArgs) -> [FieldId; 3] {
        [args.sxx, args.szz, args.sxz]
    }

    /// Zero, mirror and correct one layer of the stresses.
    fn impose(states: &mut States, args: &SurfaceArgs, layer: Layer, h: Array1<f64>) -> Result<()> {
        let halo = states.field(args.szz)?.halo();
        {
            let mut szz = states.layer_mut(args.szz, layer)?;
            szz.row_mut(halo).fill(0.0);
            mirror(szz, halo);
        }
        mirror(states.layer_mut(args.sxz, layer)?, halo);
        add_to_surface_row(states, args.sxx, layer, h.view())
    }
}

impl Reversible for FreeSurface {
    type Args = SurfaceArgs;

    fn name(&self) -> &'static str {
        "FreeSurface"
    }

    fn required_states(&self, args: &SurfaceArgs) -> Vec<FieldId> {
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

    fn updated_states(&self, args: &SurfaceArgs) -> Vec<FieldId> {
        Self::stresses(args).to_vec()
    }

    fn check(&self, states: &States, args: &SurfaceArgs) -> Result<()> {
        let required = self.required_states(args);
        check_binding(self.name(), states, &required, &required)?;
        check_stencil_halo(self.name(), states, args.vx)?;
        let (nz, nx) = states.field(args.szz)?.interior_shape();
        if nz == 0 || nx == 0 {
            return Err(Error::Shape(format!(
                "{}: the surface needs a non-empty interior, got {nz}x{nx}",
                self.name()
            )));
        }
        Ok(())
    }

    fn forward(&mut self, states: &mut States, args: &SurfaceArgs, backpropagate: bool) -> Result<()> {
        let halo = states.field(args.szz)?.halo();
        if backpropagate {
            let strip = self.saved.pop()?;
            for (id, saved) in Self::stresses(args).into_iter().zip(strip.iter()) {
                states
                    .layer_mut(id, Layer::Value)?
                    .slice_mut(s![..=halo, ..])
                    .assign(saved);
            }
            return Ok(());
        }
        let strip = [
            states.layer(args.sxx, Layer::Value)?.slice(s![..=halo, ..]).to_owned(),
            states.layer(args.szz, Layer::Value)?.slice(s![..=halo, ..]).to_owned(),
            states.layer(args.sxz, Layer::Value)?.slice(s![..=halo, ..]).to_owned(),
        ];
        let h = Surface::of(states, args, Layer::Value)?.correction();
        self.saved.push(strip)?;
        Self::impose(states, args, Layer::Value, h)
    }

    fn linear(&mut self, states: &mut States, args: &SurfaceArgs) -> Result<()> {
        let primal = Surface::of(states, args, Layer::Value)?;
        let tangent = Surface::of(states, args, Layer::Linear)?;
        let df = surface_row(states, args.shear, Layer::Linear)? * 2.0;
        let dg = surface_row(states, args.modulus, Layer::Linear)?;
        let dh = primal.dvxx() * &tangent.vxx
            + primal.dvzz() * &tangent.vzz
            + primal.df() * &df
            + primal.dg() * &dg;
        Self::impose(states, args, Layer::Linear, dh)
    }

    fn adjoint(&mut self, states: &mut States, args: &SurfaceArgs) -> Result<()> {
        let halo = states.field(args.szz)?.halo();
        {
            let mut szz = states.layer_mut(args.szz, Layer::Gradient)?;
            szz.row_mut(halo).fill(0.0);
            fold(szz, halo);
        }
        fold(states.layer_mut(args.sxz, Layer::Gradient)?, halo);

        let primal = Surface::of(states, args, Layer::Value)?;
        let gh = surface_row(states, args.sxx, Layer::Gradient)?;
        let to_vxx = primal.dvxx() * &gh;
        let to_vzz = primal.dvzz() * &gh;
        let to_shear = primal.df() * &gh * 2.0;
        let to_modulus = primal.dg() * &gh;
        scatter_surface(states, args.vx, BackwardX, to_vxx.view())?;
        scatter_surface(states, args.vz, BackwardZ, to_vzz.view())?;
        add_to_surface_row(states, args.shear, Layer::Gradient, to_shear.view())?;
        add_to_surface_row(states, args.modulus, Layer::Gradient, to_modulus.view())
    }
}

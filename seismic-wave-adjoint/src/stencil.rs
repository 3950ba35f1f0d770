//! Fourth-order staggered finite differences and their exact transposes.
//!
//! Each stencil reads a padded array and produces an interior-shaped result.
//! The transpose scatters an interior-shaped array back into a padded one so
//! that `sum(b * D(a)) == sum(Dᵀ(b) * a)` holds term by term.

use ndarray::{s, Array2, ArrayView2, ArrayViewMut2};

use crate::error::{Error, Result};

/// Staggered-grid coefficients for the ±1 and ±2 neighbours.
pub const HC: [f64; 2] = [1.1382, -0.046414];

/// Halo cells a stencil reads past the interior edge.
pub const REACH: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stencil {
    /// `D+x`: forward-biased along columns.
    ForwardX,
    /// `D-x`: backward-biased along columns.
    BackwardX,
    /// `D+z`: forward-biased along rows.
    ForwardZ,
    /// `D-z`: backward-biased along rows.
    BackwardZ,
}

impl Stencil {
    pub const ALL: [Stencil; 4] = [
        Stencil::ForwardX,
        Stencil::BackwardX,
        Stencil::ForwardZ,
        Stencil::BackwardZ,
    ];

    /// `(offset, coefficient)` pairs along the stencil axis.
    fn taps(self) -> [(isize, f64); 4] {
        let [c0, c1] = HC;
        match self {
            Stencil::ForwardX | Stencil::ForwardZ => [(1, c0), (0, -c0), (2, c1), (-1, -c1)],
            Stencil::BackwardX | Stencil::BackwardZ => [(0, c0), (-1, -c0), (1, c1), (-2, -c1)],
        }
    }

    fn along_x(self) -> bool {
        matches!(self, Stencil::ForwardX | Stencil::BackwardX)
    }

    /// Window of the padded array that lines up with the interior when
    /// shifted by `offset` along the stencil axis.
    fn window(self, padded: (usize, usize), halo: usize, offset: isize) -> [(usize, usize); 2] {
        let (rows, cols) = padded;
        let shift = |start: usize| (start as isize + offset) as usize;
        let rows = (halo, rows - halo);
        let cols = (halo, cols - halo);
        if self.along_x() {
            [rows, (shift(cols.0), shift(cols.1))]
        } else {
            [(shift(rows.0), shift(rows.1)), cols]
        }
    }

    fn check(padded: (usize, usize), halo: usize) -> Result<(usize, usize)> {
        let (rows, cols) = padded;
        if halo < REACH {
            return Err(Error::Shape(format!(
                "stencils need a halo of at least {REACH}, got {halo}"
            )));
        }
        if rows <= 2 * halo || cols <= 2 * halo {
            return Err(Error::Shape(format!(
                "padded array {rows}x{cols} has no interior with halo {halo}"
            )));
        }
        Ok((rows - 2 * halo, cols - 2 * halo))
    }

    /// Apply the derivative to a padded array.
    pub fn apply(self, input: ArrayView2<'_, f64>, halo: usize) -> Result<Array2<f64>> {
        let interior = Self::check(input.dim(), halo)?;
        let mut out = Array2::zeros(interior);
        for (offset, coeff) in self.taps() {
            let [(r0, r1), (c0, c1)] = self.window(input.dim(), halo, offset);
            out.scaled_add(coeff, &input.slice(s![r0..r1, c0..c1]));
        }
        Ok(out)
    }

    /// Scatter-add the transpose of the derivative of `output` into `target`.
    pub fn apply_adjoint(
        self,
        output: ArrayView2<'_, f64>,
        halo: usize,
        mut target: ArrayViewMut2<'_, f64>,
    ) -> Result<()> {
        let interior = Self::check(target.dim(), halo)?;
        if output.dim() != interior {
            return Err(Error::Shape(format!(
                "adjoint input is {:?}, interior is {:?}",
                output.dim(),
                interior
            )));
        }
        let padded = target.dim();
        for (offset, coeff) in self.taps() {
            let [(r0, r1), (c0, c1)] = self.window(padded, halo, offset);
            target
                .slice_mut(s![r0..r1, c0..c1])
                .scaled_add(coeff, &output);
        }
        Ok(())
    }

    /// Allocating form of [`Stencil::apply_adjoint`].
    pub fn adjoint(
        self,
        output: ArrayView2<'_, f64>,
        halo: usize,
        padded: (usize, usize),
    ) -> Result<Array2<f64>> {
        let mut target = Array2::zeros(padded);
        self.apply_adjoint(output, halo, target.view_mut())?;
        Ok(target)
    }
}

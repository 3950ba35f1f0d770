//! Fields and the driver-owned state arena.
//!
//! A [`Field`] carries three arrays of identical padded shape: the primal
//! `value`, the `linear` (tangent) perturbation and the accumulated
//! `gradient`. Physics is computed on the interior only; the halo exists so
//! stencils can read past the interior edge.

use std::ops::Range;

use ndarray::{s, Array2, ArrayView2, ArrayViewMut2, Zip};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};
use crate::grid::Cell;

/// Which of the three parallel arrays of a field an evaluation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    Value,
    Linear,
    Gradient,
}

impl Layer {
    pub const ALL: [Layer; 3] = [Layer::Value, Layer::Linear, Layer::Gradient];
}

/// How the interior of a freshly created field is filled. The halo always
/// starts at zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Init {
    Zeros,
    Uniform { low: f64, high: f64, seed: u64 },
}

impl Init {
    /// Uniform values in `[0, 1)`.
    pub fn random(seed: u64) -> Self {
        Init::Uniform {
            low: 0.0,
            high: 1.0,
            seed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    halo: usize,
    value: Array2<f64>,
    linear: Array2<f64>,
    gradient: Array2<f64>,
}

impl Field {
    /// `interior` is `(nz, nx)`.
    pub fn new(name: &str, interior: (usize, usize), halo: usize, init: Init) -> Self {
        let (nz, nx) = interior;
        let shape = (nz + 2 * halo, nx + 2 * halo);
        let mut field = Field {
            name: name.to_string(),
            halo,
            value: Array2::zeros(shape),
            linear: Array2::zeros(shape),
            gradient: Array2::zeros(shape),
        };
        if let Init::Uniform { low, high, seed } = init {
            let mut rng = StdRng::seed_from_u64(seed);
            field
                .interior_mut(Layer::Value)
                .map_inplace(|v| *v = rng.gen_range(low..high));
        }
        field
    }

    /// Wrap caller-supplied interior data, padding it with a zero halo.
    pub fn from_interior(name: &str, data: ArrayView2<'_, f64>, halo: usize) -> Self {
        let mut field = Field::new(name, data.dim(), halo, Init::Zeros);
        field.interior_mut(Layer::Value).assign(&data);
        field
    }

    /// A halo-free `(nt, ncols)` time series.
    pub fn trace(name: &str, nt: usize, ncols: usize) -> Self {
        Field::new(name, (nt, ncols), 0, Init::Zeros)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn halo(&self) -> usize {
        self.halo
    }

    /// Padded shape `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        self.value.dim()
    }

    pub fn interior_shape(&self) -> (usize, usize) {
        let (rows, cols) = self.shape();
        (rows - 2 * self.halo, cols - 2 * self.halo)
    }

    /// Row and column ranges of the valid (non-halo) region.
    pub fn valid(&self) -> (Range<usize>, Range<usize>) {
        let (rows, cols) = self.shape();
        (self.halo..rows - self.halo, self.halo..cols - self.halo)
    }

    pub fn layer(&self, layer: Layer) -> ArrayView2<'_, f64> {
        match layer {
            Layer::Value => self.value.view(),
            Layer::Linear => self.linear.view(),
            Layer::Gradient => self.gradient.view(),
        }
    }

    pub fn layer_mut(&mut self, layer: Layer) -> ArrayViewMut2<'_, f64> {
        match layer {
            Layer::Value => self.value.view_mut(),
            Layer::Linear => self.linear.view_mut(),
            Layer::Gradient => self.gradient.view_mut(),
        }
    }

    pub fn interior(&self, layer: Layer) -> ArrayView2<'_, f64> {
        let (rows, cols) = self.valid();
        self.layer(layer).slice_move(s![rows, cols])
    }

    pub fn interior_mut(&mut self, layer: Layer) -> ArrayViewMut2<'_, f64> {
        let (rows, cols) = self.valid();
        self.layer_mut(layer).slice_move(s![rows, cols])
    }

    pub fn value(&self) -> ArrayView2<'_, f64> {
        self.layer(Layer::Value)
    }

    pub fn linear(&self) -> ArrayView2<'_, f64> {
        self.layer(Layer::Linear)
    }

    pub fn gradient(&self) -> ArrayView2<'_, f64> {
        self.layer(Layer::Gradient)
    }

    /// Padded index of an interior cell.
    pub fn index(&self, cell: Cell) -> Result<[usize; 2]> {
        let (nz, nx) = self.interior_shape();
        if cell.z >= nz || cell.x >= nx {
            return Err(Error::CellOutOfBounds {
                z: cell.z,
                x: cell.x,
                nz,
                nx,
            });
        }
        Ok([cell.z + self.halo, cell.x + self.halo])
    }

    pub fn zero(&mut self, layer: Layer) {
        self.layer_mut(layer).fill(0.0);
    }
}

/// Handle to a field inside a [`States`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(usize);

impl FieldId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// All fields of one simulation. The driver owns this; operators only ever
/// borrow it for the duration of a single evaluation.
#[derive(Debug, Clone, Default)]
pub struct States {
    fields: Vec<Field>,
}

impl States {
    pub fn new() -> Self {
        States::default()
    }

    pub fn insert(&mut self, field: Field) -> FieldId {
        self.fields.push(field);
        FieldId(self.fields.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, id: FieldId) -> Result<&Field> {
        self.fields.get(id.0).ok_or(Error::UnknownField(id))
    }

    pub fn field_mut(&mut self, id: FieldId) -> Result<&mut Field> {
        self.fields.get_mut(id.0).ok_or(Error::UnknownField(id))
    }

    pub fn layer(&self, id: FieldId, layer: Layer) -> Result<ArrayView2<'_, f64>> {
        Ok(self.field(id)?.layer(layer))
    }

    pub fn layer_mut(&mut self, id: FieldId, layer: Layer) -> Result<ArrayViewMut2<'_, f64>> {
        Ok(self.field_mut(id)?.layer_mut(layer))
    }

    pub fn interior(&self, id: FieldId, layer: Layer) -> Result<ArrayView2<'_, f64>> {
        Ok(self.field(id)?.interior(layer))
    }

    pub fn interior_mut(&mut self, id: FieldId, layer: Layer) -> Result<ArrayViewMut2<'_, f64>> {
        Ok(self.field_mut(id)?.interior_mut(layer))
    }

    pub fn zero(&mut self, layer: Layer) {
        for field in &mut self.fields {
            field.zero(layer);
        }
    }

    /// Copy one layer of every field, in field order.
    pub fn snapshot(&self, layer: Layer) -> Vec<Array2<f64>> {
        self.fields
            .iter()
            .map(|f| f.layer(layer).to_owned())
            .collect()
    }

    /// Inverse of [`States::snapshot`].
    pub fn load(&mut self, layer: Layer, arrays: &[Array2<f64>]) -> Result<()> {
        if arrays.len() != self.fields.len() {
            return Err(Error::Shape(format!(
                "{} arrays supplied for {} fields",
                arrays.len(),
                self.fields.len()
            )));
        }
        for (field, array) in self.fields.iter_mut().zip(arrays) {
            if field.shape() != array.dim() {
                return Err(Error::Shape(format!(
                    "field '{}' is {:?}, array is {:?}",
                    field.name,
                    field.shape(),
                    array.dim()
                )));
            }
            field.layer_mut(layer).assign(array);
        }
        Ok(())
    }

    /// Fill a layer of every field (halo included) with values in `[-1, 1)`.
    pub fn randomize(&mut self, layer: Layer, rng: &mut impl Rng) {
        for field in &mut self.fields {
            field
                .layer_mut(layer)
                .map_inplace(|v| *v = rng.gen_range(-1.0..1.0));
        }
    }

    /// Sum over all fields of the elementwise product of two layers.
    pub fn inner(&self, a: Layer, b: Layer) -> f64 {
        self.fields
            .iter()
            .map(|f| {
                Zip::from(&f.layer(a))
                    .and(&f.layer(b))
                    .fold(0.0, |acc, &x, &y| acc + x * y)
            })
            .sum()
    }
}

/// Elementwise `max |a - b|` over two snapshots.
pub fn max_abs_diff(a: &[Array2<f64>], b: &[Array2<f64>]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            Zip::from(x)
                .and(y)
                .fold(0.0_f64, |m, &p, &q| m.max((p - q).abs()))
        })
        .fold(0.0, f64::max)
}

/// Largest absolute entry over a snapshot.
pub fn max_abs(a: &[Array2<f64>]) -> f64 {
    a.iter()
        .map(|x| x.iter().fold(0.0_f64, |m, &v| m.max(v.abs())))
        .fold(0.0, f64::max)
}

/// Sum of elementwise products of two snapshots.
pub fn dot(a: &[Array2<f64>], b: &[Array2<f64>]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| Zip::from(x).and(y).fold(0.0, |acc, &p, &q| acc + p * q))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn layers_share_shape_and_halo() {
        let field = Field::new("vx", (10, 12), 2, Init::random(7));
        assert_eq!(field.shape(), (14, 16));
        assert_eq!(field.interior_shape(), (10, 12));
        for layer in Layer::ALL {
            assert_eq!(field.layer(layer).dim(), (14, 16));
        }
    }

    #[test]
    fn random_init_leaves_halo_zero() {
        let field = Field::new("sxx", (6, 6), 2, Init::random(3));
        let value = field.value();
        assert!(value.row(0).iter().all(|&v| v == 0.0));
        assert!(value.column(9).iter().all(|&v| v == 0.0));
        assert!(field.interior(Layer::Value).iter().all(|&v| (0.0..1.0).contains(&v)));
        assert!(field.linear().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn same_seed_same_field() {
        let a = Field::new("a", (5, 5), 2, Init::random(11));
        let b = Field::new("b", (5, 5), 2, Init::random(11));
        assert_eq!(a.value(), b.value());
    }

    #[test]
    fn supplied_data_lands_in_interior() {
        let data = Array2::from_shape_fn((3, 4), |(i, j)| (i * 4 + j) as f64);
        let field = Field::from_interior("rho", data.view(), 2);
        assert_eq!(field.interior(Layer::Value), data);
        assert_eq!(field.value()[[2, 2]], 0.0);
        assert_eq!(field.value()[[4, 5]], 11.0);
    }

    #[test]
    fn index_maps_cells_into_padding() {
        let field = Field::new("vz", (4, 4), 2, Init::Zeros);
        assert_eq!(field.index(Cell::new(1, 3)).unwrap(), [3, 5]);
        assert!(field.index(Cell::new(4, 0)).is_err());
    }

    #[test]
    fn unknown_field_is_an_error() {
        let mut states = States::new();
        let id = states.insert(Field::trace("rec", 3, 2));
        let mut other = States::new();
        assert!(matches!(other.field_mut(id), Err(Error::UnknownField(_))));
        assert_eq!(states.field(id).unwrap().name(), "rec");
        assert_eq!(states.field(id).unwrap().shape(), (3, 2));
    }

    #[test]
    fn snapshot_round_trips() {
        let mut states = States::new();
        states.insert(Field::new("a", (3, 3), 2, Init::random(1)));
        states.insert(Field::trace("b", 4, 1));
        let saved = states.snapshot(Layer::Value);
        states.zero(Layer::Value);
        assert_eq!(max_abs(&states.snapshot(Layer::Value)), 0.0);
        states.load(Layer::Value, &saved).unwrap();
        assert_eq!(max_abs_diff(&saved, &states.snapshot(Layer::Value)), 0.0);
    }

    #[test]
    fn inner_product_matches_snapshot_dot() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut states = States::new();
        states.insert(Field::new("a", (3, 4), 2, Init::Zeros));
        states.insert(Field::new("b", (3, 4), 2, Init::Zeros));
        states.randomize(Layer::Linear, &mut rng);
        states.randomize(Layer::Gradient, &mut rng);
        let expected = dot(
            &states.snapshot(Layer::Linear),
            &states.snapshot(Layer::Gradient),
        );
        assert_abs_diff_eq!(
            states.inner(Layer::Linear, Layer::Gradient),
            expected,
            epsilon = 1e-12
        );
    }
}

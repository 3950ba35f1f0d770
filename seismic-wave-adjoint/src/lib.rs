//! Reverse-mode differentiable 2-D elastic wave propagation.
//!
//! Every step of the time loop is a reversible operator with forward,
//! backward (inverse), linear (tangent) and adjoint evaluations. A [`Tape`]
//! records a forward run and replays it to compute exact gradients of a
//! misfit with respect to the material model without storing the wavefield
//! history.

pub mod error;
pub mod field;
pub mod grid;
pub mod materials;
pub mod operator;
pub mod operators;
pub mod propagator;
pub mod selftest;
pub mod stencil;
pub mod survey;
pub mod tape;
pub mod wavefield;

pub use error::{Error, Result};
pub use field::{Field, FieldId, Layer, States};
pub use grid::{Cell, Grid};
pub use materials::{Anomaly, Model};
pub use propagator::{Elastic2d, Propagator};
pub use tape::Tape;
pub use wavefield::ElasticFields;

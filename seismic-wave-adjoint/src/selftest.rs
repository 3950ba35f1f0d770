//! Consistency checks every operator and the chained pipeline must pass.
//!
//! * backward: `forward` followed by `backward` returns the primal values.
//! * linear: the tangent evaluation matches a finite difference of `forward`.
//! * dot product: `<J x, y> == <x, Jᵀ y>` for random `x` and `y`.
//!
//! All three run over every field of the [`States`], so untouched fields
//! check that an evaluation leaves them alone.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::error::Result;
use crate::field::{dot, max_abs, max_abs_diff, Layer, States};
use crate::operator::Reversible;

/// Anything with the four evaluation faces over a state arena.
pub trait Differentiable {
    fn forward(&mut self, states: &mut States) -> Result<()>;
    fn backward(&mut self, states: &mut States) -> Result<()>;
    fn linear(&mut self, states: &mut States) -> Result<()>;
    fn adjoint(&mut self, states: &mut States) -> Result<()>;
}

/// An operator together with the arguments of one invocation.
#[derive(Debug, Clone)]
pub struct Bound<T: Reversible> {
    pub op: T,
    pub args: T::Args,
}

impl<T: Reversible> Bound<T> {
    pub fn new(op: T, args: T::Args) -> Self {
        Bound { op, args }
    }
}

impl<T: Reversible> Differentiable for Bound<T> {
    fn forward(&mut self, states: &mut States) -> Result<()> {
        self.op.check(states, &self.args)?;
        self.op.forward(states, &self.args, false)
    }

    fn backward(&mut self, states: &mut States) -> Result<()> {
        self.op.backward(states, &self.args)
    }

    fn linear(&mut self, states: &mut States) -> Result<()> {
        self.op.linear(states, &self.args)
    }

    fn adjoint(&mut self, states: &mut States) -> Result<()> {
        self.op.adjoint(states, &self.args)
    }
}

/// Step of the central differences used by [`linear_check`].
pub const FD_STEP: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Report {
    pub backward: f64, // max |x - backward(forward(x))|
    pub linear: f64,   // relative max-norm error of the tangent
    pub dot: f64,      // relative mismatch of the two inner products
}

/// Max absolute difference between the values before `forward` and after
/// the matching `backward`.
pub fn backward_check<D: Differentiable>(target: &mut D, states: &mut States) -> Result<f64> {
    let before = states.snapshot(Layer::Value);
    target.forward(states)?;
    target.backward(states)?;
    Ok(max_abs_diff(&before, &states.snapshot(Layer::Value)))
}

/// Run forward and backward once so state frozen by a forward call (such as
/// a rescaling exponent) is available, then put the values back.
fn prime<D: Differentiable>(target: &mut D, states: &mut States) -> Result<Vec<Array2<f64>>> {
    let x0 = states.snapshot(Layer::Value);
    target.forward(states)?;
    target.backward(states)?;
    states.load(Layer::Value, &x0)?;
    Ok(x0)
}

/// Forward image of `x0 + step * dx`, with the operator unwound afterwards.
fn perturbed_forward<D: Differentiable>(
    target: &mut D,
    states: &mut States,
    x0: &[Array2<f64>],
    dx: &[Array2<f64>],
    step: f64,
) -> Result<Vec<Array2<f64>>> {
    let shifted: Vec<Array2<f64>> = x0
        .iter()
        .zip(dx)
        .map(|(x, d)| x + &(d * step))
        .collect();
    states.load(Layer::Value, &shifted)?;
    target.forward(states)?;
    let image = states.snapshot(Layer::Value);
    target.backward(states)?;
    Ok(image)
}

fn central_difference<D: Differentiable>(
    target: &mut D,
    states: &mut States,
    x0: &[Array2<f64>],
    dx: &[Array2<f64>],
    step: f64,
) -> Result<Vec<Array2<f64>>> {
    let plus = perturbed_forward(target, states, x0, dx, step)?;
    let minus = perturbed_forward(target, states, x0, dx, -step)?;
    Ok(plus
        .iter()
        .zip(&minus)
        .map(|(p, m)| (p - m) / (2.0 * step))
        .collect())
}

/// Relative max-norm error of the tangent against a Richardson-extrapolated
/// central difference, `(64 D(h/4) - 20 D(h/2) + D(h)) / 45`.
pub fn linear_check<D: Differentiable>(
    target: &mut D,
    states: &mut States,
    rng: &mut StdRng,
) -> Result<f64> {
    let x0 = prime(target, states)?;
    states.randomize(Layer::Linear, rng);
    let dx = states.snapshot(Layer::Linear);

    target.linear(states)?;
    let jdx = states.snapshot(Layer::Linear);
    states.load(Layer::Value, &x0)?;

    let d1 = central_difference(target, states, &x0, &dx, FD_STEP)?;
    let d2 = central_difference(target, states, &x0, &dx, FD_STEP / 2.0)?;
    let d4 = central_difference(target, states, &x0, &dx, FD_STEP / 4.0)?;
    states.load(Layer::Value, &x0)?;

    let extrapolated: Vec<Array2<f64>> = d1
        .iter()
        .zip(&d2)
        .zip(&d4)
        .map(|((a, b), c)| (c * 64.0 - b * 20.0 + a) / 45.0)
        .collect();
    let scale = max_abs(&jdx).max(f64::MIN_POSITIVE);
    let err = max_abs_diff(&extrapolated, &jdx) / scale;
    debug!(err, scale, "linear check");
    Ok(err)
}

/// Relative mismatch `|<Jx, y> - <x, Jᵀy>| / max(|<Jx, y>|, |<x, Jᵀy>|)`.
pub fn dot_check<D: Differentiable>(
    target: &mut D,
    states: &mut States,
    rng: &mut StdRng,
) -> Result<f64> {
    let x0 = prime(target, states)?;
    states.randomize(Layer::Linear, rng);
    states.randomize(Layer::Gradient, rng);
    let x = states.snapshot(Layer::Linear);
    let y = states.snapshot(Layer::Gradient);

    target.linear(states)?;
    let jx = states.snapshot(Layer::Linear);
    states.load(Layer::Value, &x0)?;
    target.adjoint(states)?;
    let jty = states.snapshot(Layer::Gradient);
    states.load(Layer::Value, &x0)?;

    let lhs = dot(&jx, &y);
    let rhs = dot(&x, &jty);
    let scale = lhs.abs().max(rhs.abs()).max(f64::MIN_POSITIVE);
    let err = (lhs - rhs).abs() / scale;
    debug!(lhs, rhs, err, "dot product check");
    Ok(err)
}

/// Run all three checks from one seed. Linear and gradient layers are left
/// holding the last check's data.
pub fn check_all<D: Differentiable>(target: &mut D, states: &mut States, seed: u64) -> Result<Report> {
    let mut rng = StdRng::seed_from_u64(seed);
    let backward = backward_check(target, states)?;
    let linear = linear_check(target, states, &mut rng)?;
    let dot = dot_check(target, states, &mut rng)?;
    Ok(Report {
        backward,
        linear,
        dot,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{Field, FieldId, Init};

    /// `x <- 2x` on a single field, with a deliberately wrong adjoint.
    struct Doubling {
        id: FieldId,
        adjoint_factor: f64,
    }

    impl Differentiable for Doubling {
        fn forward(&mut self, states: &mut States) -> Result<()> {
            states.layer_mut(self.id, Layer::Value)?.mapv_inplace(|v| v * 2.0);
            Ok(())
        }

        fn backward(&mut self, states: &mut States) -> Result<()> {
            states.layer_mut(self.id, Layer::Value)?.mapv_inplace(|v| v / 2.0);
            Ok(())
        }

        fn linear(&mut self, states: &mut States) -> Result<()> {
            states.layer_mut(self.id, Layer::Linear)?.mapv_inplace(|v| v * 2.0);
            Ok(())
        }

        fn adjoint(&mut self, states: &mut States) -> Result<()> {
            let factor = self.adjoint_factor;
            states
                .layer_mut(self.id, Layer::Gradient)?
                .mapv_inplace(|v| v * factor);
            Ok(())
        }
    }

    fn states() -> (States, FieldId) {
        let mut states = States::new();
        let id = states.insert(Field::new("x", (4, 4), 2, Init::random(1)));
        (states, id)
    }

    #[test]
    fn consistent_operator_passes() {
        let (mut states, id) = states();
        let mut op = Doubling {
            id,
            adjoint_factor: 2.0,
        };
        let report = check_all(&mut op, &mut states, 5).unwrap();
        assert_eq!(report.backward, 0.0);
        assert!(report.linear < 1e-10);
        assert!(report.dot < 1e-14);
    }

    #[test]
    fn wrong_adjoint_is_caught() {
        let (mut states, id) = states();
        let mut op = Doubling {
            id,
            adjoint_factor: 3.0,
        };
        let report = check_all(&mut op, &mut states, 5).unwrap();
        assert!(report.dot > 0.1);
    }

    #[test]
    fn checks_leave_values_in_place() {
        let (mut states, id) = states();
        let before = states.snapshot(Layer::Value);
        let mut op = Doubling {
            id,
            adjoint_factor: 2.0,
        };
        check_all(&mut op, &mut states, 9).unwrap();
        assert_eq!(max_abs_diff(&before, &states.snapshot(Layer::Value)), 0.0);
    }
}

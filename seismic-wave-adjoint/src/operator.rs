//! The reversible-operator contract and the closed set of domain operators.
//!
//! An operator is evaluated in one of four modes over a [`States`] arena:
//! `forward` advances the primal values, `backward` restores them, `linear`
//! pushes the tangent layer through the step and `adjoint` pulls the gradient
//! layer back through it. Linear and adjoint both expect the primal values to
//! sit exactly where they were before the matching forward call.

use std::collections::HashSet;
use std::fmt::Debug;

use crate::error::{Error, Result};
use crate::field::{FieldId, States};
use crate::operators::{
    Cerjan, FreeSurface, PointSource, Receiver, ScaleParameters, UpdateStress, UpdateVelocity,
};
use crate::stencil::REACH;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Forward,
    Backward,
    Linear,
    Adjoint,
}

pub trait Reversible {
    /// Field handles and scalars captured for one invocation.
    type Args: Clone + Debug;

    fn name(&self) -> &'static str;

    /// Every field the call reads, including the ones it updates.
    fn required_states(&self, args: &Self::Args) -> Vec<FieldId>;

    /// The fields whose values the call mutates.
    fn updated_states(&self, args: &Self::Args) -> Vec<FieldId>;

    /// Fields that must share the padded grid shape. Defaults to all of them.
    fn grid_states(&self, args: &Self::Args) -> Vec<FieldId> {
        self.required_states(args)
    }

    /// Reject a binding before anything is mutated.
    fn check(&self, states: &States, args: &Self::Args) -> Result<()> {
        check_binding(
            self.name(),
            states,
            &self.required_states(args),
            &self.grid_states(args),
        )
    }

    /// With `backpropagate` set, undo a previous forward call.
    fn forward(&mut self, states: &mut States, args: &Self::Args, backpropagate: bool)
        -> Result<()>;

    fn backward(&mut self, states: &mut States, args: &Self::Args) -> Result<()> {
        self.forward(states, args, true)
    }

    fn linear(&mut self, states: &mut States, args: &Self::Args) -> Result<()>;

    fn adjoint(&mut self, states: &mut States, args: &Self::Args) -> Result<()>;

    fn evaluate(&mut self, states: &mut States, args: &Self::Args, mode: Mode) -> Result<()> {
        match mode {
            Mode::Forward => self.forward(states, args, false),
            Mode::Backward => self.backward(states, args),
            Mode::Linear => self.linear(states, args),
            Mode::Adjoint => self.adjoint(states, args),
        }
    }
}

/// Shared binding rules: every field exists, no field is bound twice, and
/// the grid fields agree on shape and halo.
pub fn check_binding(
    operator: &'static str,
    states: &States,
    required: &[FieldId],
    grid: &[FieldId],
) -> Result<()> {
    let mut seen = HashSet::new();
    for &id in required {
        states.field(id)?;
        if !seen.insert(id) {
            return Err(Error::Aliased {
                operator,
                field: id,
            });
        }
    }
    let mut grid = grid.iter();
    if let Some(&first) = grid.next() {
        let reference = states.field(first)?;
        for &id in grid {
            let field = states.field(id)?;
            if field.shape() != reference.shape() || field.halo() != reference.halo() {
                return Err(Error::Shape(format!(
                    "{operator}: '{}' is {:?} with halo {}, '{}' is {:?} with halo {}",
                    reference.name(),
                    reference.shape(),
                    reference.halo(),
                    field.name(),
                    field.shape(),
                    field.halo()
                )));
            }
        }
    }
    Ok(())
}

/// Stencil operators additionally need room to read past the interior.
pub fn check_stencil_halo(operator: &'static str, states: &States, id: FieldId) -> Result<()> {
    let halo = states.field(id)?.halo();
    if halo < REACH {
        return Err(Error::Shape(format!(
            "{operator}: halo {halo} is narrower than the stencil reach {REACH}"
        )));
    }
    Ok(())
}

/// A bounded LIFO of saved state owned by one non-invertible operator.
#[derive(Debug, Clone)]
pub struct SnapshotStack<T> {
    owner: &'static str,
    capacity: usize,
    items: Vec<T>,
}

impl<T> SnapshotStack<T> {
    pub fn new(owner: &'static str, capacity: usize) -> Self {
        SnapshotStack {
            owner,
            capacity,
            items: Vec::new(),
        }
    }

    pub fn push(&mut self, item: T) -> Result<()> {
        if self.items.len() >= self.capacity {
            return Err(Error::SnapshotOverflow {
                operator: self.owner,
                capacity: self.capacity,
            });
        }
        self.items.push(item);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<T> {
        self.items.pop().ok_or(Error::SnapshotUnderflow {
            operator: self.owner,
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// Operators that can be stored on a tape.
pub trait TapeOperator: Reversible + Sized {
    fn into_operator(self) -> Operator;
    fn wrap(args: Self::Args) -> Call;
    fn unwrap_mut(operator: &mut Operator) -> Option<&mut Self>;
}

macro_rules! closed_operator_set {
    ($($variant:ident),* $(,)?) => {
        /// One registered operator instance.
        #[derive(Debug, Clone)]
        pub enum Operator {
            $($variant($variant),)*
        }

        /// The captured arguments of one recorded invocation.
        #[derive(Debug, Clone)]
        pub enum Call {
            $($variant(<$variant as Reversible>::Args),)*
        }

        impl Operator {
            pub fn name(&self) -> &'static str {
                match self {
                    $(Operator::$variant(op) => op.name(),)*
                }
            }

            pub fn check(&self, states: &States, call: &Call) -> Result<()> {
                match (self, call) {
                    $((Operator::$variant(op), Call::$variant(args)) => op.check(states, args),)*
                    (op, call) => Err(Error::CallMismatch {
                        operator: op.name(),
                        call: call.kind(),
                    }),
                }
            }

            pub fn run(&mut self, states: &mut States, call: &Call, mode: Mode) -> Result<()> {
                match (self, call) {
                    $((Operator::$variant(op), Call::$variant(args)) => {
                        op.evaluate(states, args, mode)
                    })*
                    (op, call) => Err(Error::CallMismatch {
                        operator: op.name(),
                        call: call.kind(),
                    }),
                }
            }
        }

        impl Call {
            pub fn kind(&self) -> &'static str {
                match self {
                    $(Call::$variant(_) => stringify!($variant),)*
                }
            }
        }

        $(
            impl TapeOperator for $variant {
                fn into_operator(self) -> Operator {
                    Operator::$variant(self)
                }

                fn wrap(args: Self::Args) -> Call {
                    Call::$variant(args)
                }

                fn unwrap_mut(operator: &mut Operator) -> Option<&mut Self> {
                    match operator {
                        Operator::$variant(op) => Some(op),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }
            }
        )*
    };
}

closed_operator_set!(
    ScaleParameters,
    UpdateVelocity,
    UpdateStress,
    Cerjan,
    PointSource,
    Receiver,
    FreeSurface,
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{Field, Init};
    use crate::grid::Cell;
    use crate::operators::{CerjanArgs, ReceiverArgs};

    #[test]
    fn stack_is_lifo_and_bounded() {
        let mut stack = SnapshotStack::new("test", 2);
        stack.push(1).unwrap();
        stack.push(2).unwrap();
        assert!(matches!(
            stack.push(3),
            Err(Error::SnapshotOverflow { capacity: 2, .. })
        ));
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.pop().unwrap(), 2);
        assert_eq!(stack.pop().unwrap(), 1);
        assert!(stack.is_empty());
        assert!(matches!(stack.pop(), Err(Error::SnapshotUnderflow { .. })));
    }

    #[test]
    fn aliased_binding_is_rejected() {
        let mut states = States::new();
        let a = states.insert(Field::new("a", (4, 4), 2, Init::Zeros));
        let err = check_binding("op", &states, &[a, a], &[a]).unwrap_err();
        assert!(matches!(err, Error::Aliased { field, .. } if field == a));
    }

    #[test]
    fn grid_fields_must_agree() {
        let mut states = States::new();
        let a = states.insert(Field::new("a", (4, 4), 2, Init::Zeros));
        let b = states.insert(Field::new("b", (4, 4), 3, Init::Zeros));
        let c = states.insert(Field::new("c", (5, 4), 2, Init::Zeros));
        assert!(matches!(
            check_binding("op", &states, &[a, b], &[a, b]),
            Err(Error::Shape(_))
        ));
        assert!(matches!(
            check_binding("op", &states, &[a, c], &[a, c]),
            Err(Error::Shape(_))
        ));
    }

    #[test]
    fn mismatched_call_is_rejected() {
        let mut states = States::new();
        let v = states.insert(Field::new("v", (4, 4), 2, Init::Zeros));
        let out = states.insert(Field::trace("out", 2, 1));
        let mut op = Cerjan::new(false, 4.0, 2).unwrap().into_operator();
        let call = Receiver::wrap(ReceiverArgs {
            field: v,
            traces: out,
            time: 0,
            cells: vec![Cell::new(0, 0)],
        });
        let err = op.run(&mut states, &call, Mode::Forward).unwrap_err();
        assert!(matches!(
            err,
            Error::CallMismatch {
                operator: "Cerjan",
                call: "Receiver"
            }
        ));
        let ok = Cerjan::wrap(CerjanArgs { fields: vec![v] });
        assert!(op.run(&mut states, &ok, Mode::Forward).is_ok());
    }
}

//! Recording and reverse replay of operator calls.
//!
//! The tape owns its operator instances and the list of recorded calls. It
//! never owns field data: every pass borrows the driver's [`States`].
//!
//! Passes move the tape between two positions. Recording and [`Tape::linear`]
//! leave the primal values at [`Position::End`]; [`Tape::unwind`] and
//! [`Tape::gradient`] walk back to [`Position::Start`]. Any failure aborts the
//! tape for good, since the fields may be half way through a step.

use std::marker::PhantomData;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::field::States;
use crate::operator::{Call, Mode, Operator, TapeOperator};

/// Where the primal values currently sit relative to the recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Position {
    /// Before the first recorded call.
    Start,
    /// After the last recorded call. An empty tape sits here.
    #[default]
    End,
}

/// Typed index of an operator registered on a tape.
#[derive(Debug)]
pub struct OpHandle<T> {
    index: usize,
    marker: PhantomData<fn() -> T>,
}

impl<T> Clone for OpHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for OpHandle<T> {}

#[derive(Debug, Clone)]
struct Entry {
    operator: usize,
    call: Call,
}

#[derive(Debug, Default)]
pub struct Tape {
    operators: Vec<Operator>,
    entries: Vec<Entry>,
    position: Position,
    aborted: bool,
}

impl Tape {
    pub fn new() -> Self {
        Tape::default()
    }

    pub fn register<T: TapeOperator>(&mut self, operator: T) -> OpHandle<T> {
        self.operators.push(operator.into_operator());
        OpHandle {
            index: self.operators.len() - 1,
            marker: PhantomData,
        }
    }

    /// Mutable access to a registered operator, e.g. to inspect its state.
    pub fn operator_mut<T: TapeOperator>(&mut self, handle: OpHandle<T>) -> Result<&mut T> {
        let operator = self
            .operators
            .get_mut(handle.index)
            .ok_or(Error::UnknownOperator(handle.index))?;
        T::unwrap_mut(operator).ok_or(Error::UnknownOperator(handle.index))
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Operator name and call kind of every recorded entry, in call order.
    pub fn calls(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.entries.iter().map(|entry| {
            let name = self
                .operators
                .get(entry.operator)
                .map_or("?", Operator::name);
            (name, entry.call.kind())
        })
    }

    fn expect(&self, expected: Position) -> Result<()> {
        if self.aborted {
            return Err(Error::TapeAborted);
        }
        let found = self.position();
        if found != expected {
            return Err(Error::TapePosition { expected, found });
        }
        Ok(())
    }

    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.aborted = true;
        }
        result
    }

    /// Run one forward step and record it.
    pub fn call<T: TapeOperator>(
        &mut self,
        handle: OpHandle<T>,
        states: &mut States,
        args: T::Args,
    ) -> Result<()> {
        self.expect(Position::End)?;
        let call = T::wrap(args);
        let operator = self
            .operators
            .get_mut(handle.index)
            .ok_or(Error::UnknownOperator(handle.index))?;
        // A rejected binding leaves the fields untouched, so the tape survives it.
        operator.check(states, &call)?;
        let result = operator.run(states, &call, Mode::Forward);
        self.guard(result)?;
        self.entries.push(Entry {
            operator: handle.index,
            call,
        });
        Ok(())
    }

    fn replay(&mut self, states: &mut States, modes: &[Mode], reverse: bool) -> Result<()> {
        let order: Box<dyn Iterator<Item = usize>> = if reverse {
            Box::new((0..self.entries.len()).rev())
        } else {
            Box::new(0..self.entries.len())
        };
        for i in order {
            let entry = &self.entries[i];
            let operator = &mut self.operators[entry.operator];
            debug!(step = i, operator = operator.name(), ?modes, "replay");
            for &mode in modes {
                operator.run(states, &entry.call, mode)?;
            }
        }
        Ok(())
    }

    /// Undo every recorded call, restoring the primal values to `Start`.
    pub fn unwind(&mut self, states: &mut States) -> Result<()> {
        self.expect(Position::End)?;
        let result = self.replay(states, &[Mode::Backward], true);
        self.guard(result)?;
        self.position = Position::Start;
        info!(entries = self.entries.len(), "tape unwound");
        Ok(())
    }

    /// Replay the recording forward, propagating the tangent layer.
    pub fn linear(&mut self, states: &mut States) -> Result<()> {
        self.expect(Position::Start)?;
        let result = self.replay(states, &[Mode::Linear, Mode::Forward], false);
        self.guard(result)?;
        self.position = Position::End;
        info!(entries = self.entries.len(), "linear pass complete");
        Ok(())
    }

    /// Reverse replay: restore each step's primal state, then accumulate its
    /// adjoint. Consumes the recording.
    pub fn gradient(mut self, states: &mut States) -> Result<()> {
        self.expect(Position::End)?;
        self.replay(states, &[Mode::Backward, Mode::Adjoint], true)?;
        info!(entries = self.entries.len(), "gradient pass complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{max_abs_diff, Field, Init, Layer};
    use crate::grid::Cell;
    use crate::operators::{Cerjan, CerjanArgs, FreeSurface, PointSource, SourceArgs};

    fn setup() -> (States, crate::field::FieldId, crate::field::FieldId) {
        let mut states = States::new();
        let v = states.insert(Field::new("v", (6, 6), 2, Init::random(1)));
        let mut signal = Field::trace("signal", 3, 1);
        signal.layer_mut(Layer::Value).fill(1.0);
        let s = states.insert(signal);
        (states, v, s)
    }

    #[test]
    fn unwind_restores_recorded_state() {
        let (mut states, v, s) = setup();
        let before = states.snapshot(Layer::Value);
        let mut tape = Tape::new();
        let taper = tape.register(Cerjan::new(false, 4.0, 2).unwrap());
        let source = tape.register(PointSource::new());
        for t in 0..3 {
            let args = SourceArgs {
                target: v,
                signal: s,
                time: t,
                cells: vec![Cell::new(2, 2)],
            };
            tape.call(source, &mut states, args).unwrap();
            tape.call(taper, &mut states, CerjanArgs { fields: vec![v] })
                .unwrap();
        }
        assert_eq!(tape.len(), 6);
        assert_eq!(
            tape.calls().next(),
            Some(("PointSource", "PointSource"))
        );
        tape.unwind(&mut states).unwrap();
        assert_eq!(tape.position(), Position::Start);
        assert!(max_abs_diff(&before, &states.snapshot(Layer::Value)) < 1e-12);
    }

    #[test]
    fn recording_needs_end_position() {
        let (mut states, v, _) = setup();
        let mut tape = Tape::new();
        let taper = tape.register(Cerjan::new(false, 4.0, 2).unwrap());
        tape.call(taper, &mut states, CerjanArgs { fields: vec![v] })
            .unwrap();
        tape.unwind(&mut states).unwrap();
        let err = tape
            .call(taper, &mut states, CerjanArgs { fields: vec![v] })
            .unwrap_err();
        assert!(matches!(
            err,
            Error::TapePosition {
                expected: Position::End,
                found: Position::Start
            }
        ));
        assert!(matches!(
            tape.unwind(&mut states),
            Err(Error::TapePosition { .. })
        ));
    }

    #[test]
    fn underflow_aborts_the_tape() {
        let mut states = States::new();
        let grid = (6, 6);
        let ids: Vec<_> = ["vx", "vz", "sxx", "szz", "sxz", "m", "mu"]
            .iter()
            .map(|n| states.insert(Field::new(n, grid, 2, Init::random(4))))
            .collect();
        let args = crate::operators::SurfaceArgs {
            vx: ids[0],
            vz: ids[1],
            sxx: ids[2],
            szz: ids[3],
            sxz: ids[4],
            modulus: ids[5],
            shear: ids[6],
        };
        let mut tape = Tape::new();
        let surface = tape.register(FreeSurface::new(4));
        tape.call(surface, &mut states, args).unwrap();
        // Drop the snapshot behind the tape's back.
        tape.operator_mut(surface).unwrap().clear();
        assert!(matches!(
            tape.unwind(&mut states),
            Err(Error::SnapshotUnderflow { .. })
        ));
        assert!(tape.is_aborted());
        assert!(matches!(tape.unwind(&mut states), Err(Error::TapeAborted)));
    }

    #[test]
    fn rejected_binding_keeps_tape_usable() {
        let (mut states, v, _) = setup();
        let mut tape = Tape::new();
        let taper = tape.register(Cerjan::new(false, 4.0, 2).unwrap());
        let err = tape
            .call(taper, &mut states, CerjanArgs { fields: vec![v, v] })
            .unwrap_err();
        assert!(matches!(err, Error::Aliased { .. }));
        assert!(!tape.is_aborted());
        assert!(tape.is_empty());
    }
}

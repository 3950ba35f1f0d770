use crate::error::{Error, Result};
use crate::field::{FieldId, Layer, States};
use crate::grid::Cell;
use crate::operator::{check_binding, Reversible};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverArgs {
    pub field: FieldId,   // Wavefield being sampled
    pub traces: FieldId,  // (nt, ncells) recording
    pub time: usize,      // Row of the recording written by this call
    pub cells: Vec<Cell>, // One trace column per cell
}

/// Samples a wavefield into row `time` of a recording. The sample is added,
/// so a backward call can subtract it again.
#[derive(Debug, Clone, Default)]
pub struct Receiver;

impl Receiver {
    pub fn new() -> Self {
        Receiver
    }

    fn validate(states: &States, args: &ReceiverArgs) -> Result<()> {
        let (nt, ncols) = states.field(args.traces)?.shape();
        if args.time >= nt {
            return Err(Error::TimeOutOfRange {
                time: args.time,
                nt,
            });
        }
        if ncols != args.cells.len() {
            return Err(Error::Shape(format!(
                "recording has {ncols} columns for {} receivers",
                args.cells.len()
            )));
        }
        let field = states.field(args.field)?;
        for &cell in &args.cells {
            field.index(cell)?;
        }
        Ok(())
    }

    fn record(states: &mut States, args: &ReceiverArgs, layer: Layer, sign: f64) -> Result<()> {
        Self::validate(states, args)?;
        let field = states.field(args.field)?;
        let samples = args
            .cells
            .iter()
            .map(|&cell| -> Result<f64> { Ok(field.layer(layer)[field.index(cell)?]) })
            .collect::<Result<Vec<f64>>>()?;
        let mut traces = states.layer_mut(args.traces, layer)?;
        for (i, sample) in samples.into_iter().enumerate() {
            traces[[args.time, i]] += sign * sample;
        }
        Ok(())
    }
}

impl Reversible for Receiver {
    type Args = ReceiverArgs;

    fn name(&self) -> &'static str {
        "Receiver"
    }

    fn required_states(&self, args: &ReceiverArgs) -> Vec<FieldId> {
        vec![args.field, args.traces]
    }

    fn updated_states(&self, args: &ReceiverArgs) -> Vec<FieldId> {
        vec![args.traces]
    }

    fn check(&self, states: &States, args: &ReceiverArgs) -> Result<()> {
        check_binding(self.name(), states, &self.required_states(args), &[args.field])?;
        Self::validate(states, args)
    }

    fn forward(&mut self, states: &mut States, args: &ReceiverArgs, backpropagate: bool) -> Result<()> {
        let sign = if backpropagate { -1.0 } else { 1.0 };
        Self::record(states, args, Layer::Value, sign)
    }

    fn linear(&mut self, states: &mut States, args: &ReceiverArgs) -> Result<()> {
        Self::record(states, args, Layer::Linear, 1.0)
    }

    fn adjoint(&mut self, states: &mut States, args: &ReceiverArgs) -> Result<()> {
        Self::validate(states, args)?;
        let seeds = states
            .layer(args.traces, Layer::Gradient)?
            .row(args.time)
            .to_owned();
        let field = states.field_mut(args.field)?;
        for (&cell, &seed) in args.cells.iter().zip(seeds.iter()) {
            let index = field.index(cell)?;
            field.layer_mut(Layer::Gradient)[index] += seed;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::testing::*;
    use crate::selftest::{check_all, Bound};

    fn setup() -> (States, ReceiverArgs) {
        let mut states = States::new();
        let field = wave(&mut states, "vz", 6);
        let traces = trace(&mut states, "vz_out", 4, 2, 0.0);
        let args = ReceiverArgs {
            field,
            traces,
            time: 2,
            cells: vec![Cell::new(5, 5), Cell::new(6, 6)],
        };
        (states, args)
    }

    #[test]
    fn samples_land_in_their_row() {
        let (mut states, args) = setup();
        let expected = [
            states.field(args.field).unwrap().value()[[7, 7]],
            states.field(args.field).unwrap().value()[[8, 8]],
        ];
        Receiver::new()
            .forward(&mut states, &args, false)
            .unwrap();
        let rec = states.field(args.traces).unwrap().value().to_owned();
        assert_eq!(rec[[2, 0]], expected[0]);
        assert_eq!(rec[[2, 1]], expected[1]);
        assert_eq!(rec.row(1).sum(), 0.0);
        Receiver::new()
            .forward(&mut states, &args, true)
            .unwrap();
        assert_eq!(states.field(args.traces).unwrap().value()[[2, 0]], 0.0);
    }

    #[test]
    fn adjoint_scatters_seeds() {
        let (mut states, args) = setup();
        {
            let mut g = states.layer_mut(args.traces, Layer::Gradient).unwrap();
            g[[2, 0]] = 1.5;
            g[[2, 1]] = -2.0;
            g[[3, 0]] = 7.0;
        }
        Receiver::new().adjoint(&mut states, &args).unwrap();
        let g = states.field(args.field).unwrap().gradient().to_owned();
        assert_eq!(g[[7, 7]], 1.5);
        assert_eq!(g[[8, 8]], -2.0);
        assert_eq!(g.sum(), -0.5);
    }

    #[test]
    fn column_count_must_match() {
        let (states, mut args) = setup();
        args.cells.pop();
        assert!(matches!(
            Receiver::new().check(&states, &args),
            Err(Error::Shape(_))
        ));
    }

    #[test]
    fn satisfies_self_tests() {
        let (mut states, args) = setup();
        let mut op = Bound::new(Receiver::new(), args);
        let report = check_all(&mut op, &mut states, 41).unwrap();
        assert!(report.backward < 1e-12, "{report:?}");
        assert!(report.linear < 1e-10, "{report:?}");
        assert!(report.dot < 1e-12, "{report:?}");
    }
}

use crate::error::{Error, Result};
use crate::field::{FieldId, Layer, States};
use crate::grid::Cell;
use crate::operator::{check_binding, Reversible};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceArgs {
    pub target: FieldId,  // Wavefield receiving the injection
    pub signal: FieldId,  // (nt, 1) source time function
    pub time: usize,      // Sample of the signal injected by this call
    pub cells: Vec<Cell>, // Injection points, interior coordinates
}

/// Point force: adds `signal[time]` at every source cell of the target.
#[derive(Debug, Clone, Default)]
pub struct PointSource;

impl PointSource {
    pub fn new() -> Self {
        PointSource
    }

    fn sample_index(states: &States, args: &SourceArgs) -> Result<[usize; 2]> {
        let (nt, _) = states.field(args.signal)?.shape();
        if args.time >= nt {
            return Err(Error::TimeOutOfRange {
                time: args.time,
                nt,
            });
        }
        Ok([args.time, 0])
    }

    fn inject(states: &mut States, args: &SourceArgs, layer: Layer, sign: f64) -> Result<()> {
        let sample = Self::sample_index(states, args)?;
        let amplitude = states.layer(args.signal, layer)?[sample];
        let target = states.field_mut(args.target)?;
        for &cell in &args.cells {
            let index = target.index(cell)?;
            target.layer_mut(layer)[index] += sign * amplitude;
        }
        Ok(())
    }
}

impl Reversible for PointSource {
    type Args = SourceArgs;

    fn name(&self) -> &'static str {
        "PointSource"
    }

    fn required_states(&self, args: &SourceArgs) -> Vec<FieldId> {
        vec![args.target, args.signal]
    }

    fn updated_states(&self, args: &SourceArgs) -> Vec<FieldId> {
        vec![args.target]
    }

    fn check(&self, states: &States, args: &SourceArgs) -> Result<()> {
        check_binding(self.name(), states, &self.required_states(args), &[args.target])?;
        let (_, ncols) = states.field(args.signal)?.shape();
        if ncols != 1 {
            return Err(Error::Shape(format!(
                "source signal must have a single column, got {ncols}"
            )));
        }
        Self::sample_index(states, args)?;
        let target = states.field(args.target)?;
        for &cell in &args.cells {
            target.index(cell)?;
        }
        Ok(())
    }

    fn forward(&mut self, states: &mut States, args: &SourceArgs, backpropagate: bool) -> Result<()> {
        let sign = if backpropagate { -1.0 } else { 1.0 };
        Self::inject(states, args, Layer::Value, sign)
    }

    fn linear(&mut self, states: &mut States, args: &SourceArgs) -> Result<()> {
        Self::inject(states, args, Layer::Linear, 1.0)
    }

    fn adjoint(&mut self, states: &mut States, args: &SourceArgs) -> Result<()> {
        let sample = Self::sample_index(states, args)?;
        let target = states.field(args.target)?;
        let mut gathered = 0.0;
        for &cell in &args.cells {
            gathered += target.gradient()[target.index(cell)?];
        }
        states.layer_mut(args.signal, Layer::Gradient)?[sample] += gathered;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::testing::*;
    use crate::selftest::{check_all, Bound, Differentiable};

    fn setup() -> (States, SourceArgs) {
        let mut states = States::new();
        let target = wave(&mut states, "vz", 4);
        let signal = trace(&mut states, "signal", 3, 1, 1.0);
        let args = SourceArgs {
            target,
            signal,
            time: 1,
            cells: vec![Cell::new(5, 5), Cell::new(5, 6)],
        };
        (states, args)
    }

    #[test]
    fn injects_signal_sample() {
        let (mut states, mut args) = setup();
        states.layer_mut(args.signal, Layer::Value).unwrap()[[1, 0]] = 2.5;
        args.cells.push(Cell::new(5, 5));
        let before = states.field(args.target).unwrap().value()[[7, 7]];
        PointSource::new()
            .forward(&mut states, &args, false)
            .unwrap();
        let after = states.field(args.target).unwrap().value()[[7, 7]];
        assert!((after - before - 5.0).abs() < 1e-12);
    }

    #[test]
    fn adjoint_gathers_into_signal() {
        let (mut states, args) = setup();
        {
            let mut g = states.layer_mut(args.target, Layer::Gradient).unwrap();
            g[[7, 7]] = 0.5;
            g[[7, 8]] = 0.25;
            g[[0, 0]] = 9.0;
        }
        PointSource::new().adjoint(&mut states, &args).unwrap();
        let g = states.field(args.signal).unwrap().gradient().to_owned();
        assert_eq!(g[[1, 0]], 0.75);
        assert_eq!(g[[0, 0]], 0.0);
    }

    #[test]
    fn out_of_range_time_is_rejected() {
        let (mut states, mut args) = setup();
        args.time = 3;
        let mut op = Bound::new(PointSource::new(), args);
        assert!(matches!(
            op.forward(&mut states),
            Err(Error::TimeOutOfRange { time: 3, nt: 3 })
        ));
    }

    #[test]
    fn satisfies_self_tests() {
        let (mut states, args) = setup();
        let mut op = Bound::new(PointSource::new(), args);
        let report = check_all(&mut op, &mut states, 37).unwrap();
        assert!(report.backward < 1e-12, "{report:?}");
        assert!(report.linear < 1e-10, "{report:?}");
        assert!(report.dot < 1e-12, "{report:?}");
    }
}

//! Error types for the reversible simulator.

use thiserror::Error;

use crate::field::FieldId;
use crate::tape::Position;

#[derive(Debug, Error)]
pub enum Error {
    #[error("field {0:?} is not part of this state set")]
    UnknownField(FieldId),

    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("{operator}: field {field:?} is bound to more than one argument")]
    Aliased {
        operator: &'static str,
        field: FieldId,
    },

    #[error("cell (z={z}, x={x}) lies outside the {nz}x{nx} interior")]
    CellOutOfBounds {
        z: usize,
        x: usize,
        nz: usize,
        nx: usize,
    },

    #[error("time index {time} out of range for a trace of {nt} samples")]
    TimeOutOfRange { time: usize, nt: usize },

    #[error("{operator}: backward without a matching forward (snapshot stack is empty)")]
    SnapshotUnderflow { operator: &'static str },

    #[error("{operator}: snapshot stack is full ({capacity} entries)")]
    SnapshotOverflow {
        operator: &'static str,
        capacity: usize,
    },

    #[error("{operator}: backward called with no recorded forward run")]
    NotRecorded { operator: &'static str },

    #[error("{operator}: rescaling exponent was never recorded by a forward pass")]
    ExponentNotRecorded { operator: &'static str },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("tape is positioned at {found:?}, this pass needs {expected:?}")]
    TapePosition { expected: Position, found: Position },

    #[error("tape was aborted by an earlier failure and cannot be resumed")]
    TapeAborted,

    #[error("operator {operator} cannot evaluate a {call} call")]
    CallMismatch {
        operator: &'static str,
        call: &'static str,
    },

    #[error("operator handle {0} does not belong to this tape")]
    UnknownOperator(usize),
}

pub type Result<T> = std::result::Result<T, Error>;

//! Error taxonomy for the simulation engine.
//!
//! Only configuration problems and numerical failures are errors. Running
//! out of iterations, running out of time, or being cancelled are reported
//! through [`crate::solution::Termination`] and
//! [`crate::equilibrium::EquilibriumReason`] instead.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("unknown place \"{0}\"")]
    UnknownPlace(String),
    #[error("unknown transition \"{0}\"")]
    UnknownTransition(String),
    #[error("arc {from} -> {to} references a node that does not exist")]
    DanglingArc { from: String, to: String },
    #[error("arc {from} -> {to} must connect a place and a transition")]
    InvalidArc { from: String, to: String },
    #[error("duplicate node id \"{0}\"")]
    DuplicateNode(String),
    #[error("rate for transition \"{transition}\" must be finite and nonnegative, got {rate}")]
    InvalidRate { transition: String, rate: f64 },
    #[error("initial value for place \"{place}\" must be finite, got {value}")]
    InvalidInitialState { place: String, value: f64 },
    #[error("time span [{t0}, {tf}] is invalid: bounds must be finite with t0 <= tf")]
    InvalidTimeSpan { t0: f64, tf: f64 },
    #[error("invalid options: {0}")]
    InvalidOptions(String),
    #[error("invalid tableau \"{name}\": {reason}")]
    InvalidTableau { name: String, reason: String },
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("numerical divergence: non-finite state at t = {time}")]
    NumericalDivergence { time: f64 },
    #[error("Jacobian is singular at t = {time}")]
    SingularJacobian { time: f64 },
    #[error("implicit stage at t = {time} did not converge in {iterations} iterations")]
    ImplicitNonConvergence { time: f64, iterations: usize },
    #[error("step size {step} vanishes against t = {time}")]
    StepSizeUnderflow { time: f64, step: f64 },
}

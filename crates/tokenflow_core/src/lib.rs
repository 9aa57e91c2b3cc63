//! The `tokenflow_core` crate turns token-flow networks into mass-action ODE
//! systems and integrates them.
//!
//! Key components:
//! - **Net**: places, transitions and weighted arcs (`Network`), loadable from JSON.
//! - **Kinetics**: compiles a network and its rates into a `MassActionSystem`.
//! - **Tableau**: the Butcher tableau registry behind every `Method`.
//! - **Stepper**: the adaptive embedded Runge-Kutta `Integrator`.
//! - **Implicit**: backward Euler, TR-BDF2 and stiffness-based method selection.
//! - **Equilibrium**: steady-state detection on top of the stepper.
pub mod equilibrium;
pub mod error;
pub mod implicit;
pub mod kinetics;
pub mod net;
pub mod options;
pub mod problem;
pub mod solution;
pub mod stepper;
pub mod tableau;
pub mod traits;

pub use equilibrium::{
    find_equilibrium, is_equilibrium, solve_until_equilibrium, solve_until_equilibrium_with_cancel,
    EquilibriumDetector, EquilibriumOptions, EquilibriumReason, EquilibriumResult,
};
pub use error::{Error, Result};
pub use implicit::{is_stiff, select_method, solve_auto, stiffness_ratio};
pub use kinetics::{MassActionSystem, DEFAULT_RATE};
pub use net::{ArcWeight, Network, PlaceId, TransitionId};
pub use options::{NonlinearSolver, SolverOptions};
pub use problem::Problem;
pub use solution::{Solution, SolveStats, Termination};
pub use stepper::{solve, solve_with_cancel, solve_with_tableau, CancelToken, Integrator, StepEvent};
pub use tableau::{Method, Tableau};
pub use traits::{DynamicalSystem, JacobianSystem, Scalar};

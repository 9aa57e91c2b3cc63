//! Implicit methods for stiff networks and the stiffness heuristic.
//!
//! Both methods run at a fixed step size. Each implicit stage equation has the
//! form `x = base + c * f(t, x)` and is solved either by fixed-point (Picard)
//! iteration or by Newton's method, capped at [`MAX_STAGE_ITERATIONS`] and
//! converged once the largest update drops below `10 * abstol`.

use log::{debug, warn};
use nalgebra::{DMatrix, DVector};

use crate::error::{Error, Result};
use crate::options::{NonlinearSolver, SolverOptions};
use crate::problem::Problem;
use crate::solution::Solution;
use crate::stepper::solve;
use crate::tableau::Method;
use crate::traits::{DynamicalSystem, JacobianSystem};

pub const MAX_STAGE_ITERATIONS: usize = 50;

/// Derivative-magnitude ratio above which a system is treated as stiff.
pub const STIFFNESS_THRESHOLD: f64 = 1000.0;

/// Components smaller than this are ignored by the stiffness heuristic.
const NEGLIGIBLE: f64 = 1e-10;

/// Scratch space for solving `x = base + c * f(t, x)`.
struct StageSolver {
    f: Vec<f64>,
    update: Vec<f64>,
    jac: Vec<f64>,
}

impl StageSolver {
    fn new(dim: usize) -> Self {
        Self {
            f: vec![0.0; dim],
            update: vec![0.0; dim],
            jac: Vec::new(),
        }
    }

    /// Refines `x` (holding the initial guess) in place. Returns the number of
    /// iterations used; hitting the cap is an error.
    fn solve(
        &mut self,
        system: &impl JacobianSystem,
        t: f64,
        base: &[f64],
        c: f64,
        x: &mut [f64],
        options: &SolverOptions,
    ) -> Result<usize> {
        let tolerance = 10.0 * options.abstol;
        for iteration in 1..=MAX_STAGE_ITERATIONS {
            let change = match options.nonlinear {
                NonlinearSolver::FixedPoint => self.picard_update(system, t, base, c, x),
                NonlinearSolver::Newton => self.newton_update(system, t, base, c, x)?,
            };
            if change < tolerance {
                return Ok(iteration);
            }
        }
        Err(Error::ImplicitNonConvergence {
            time: t,
            iterations: MAX_STAGE_ITERATIONS,
        })
    }

    fn picard_update(
        &mut self,
        system: &impl JacobianSystem,
        t: f64,
        base: &[f64],
        c: f64,
        x: &mut [f64],
    ) -> f64 {
        system.apply(t, x, &mut self.f);
        let mut change: f64 = 0.0;
        for i in 0..x.len() {
            let next = base[i] + c * self.f[i];
            change = change.max((next - x[i]).abs());
            x[i] = next;
        }
        change
    }

    /// One Newton step on `G(x) = x - base - c f(t, x)`.
    fn newton_update(
        &mut self,
        system: &impl JacobianSystem,
        t: f64,
        base: &[f64],
        c: f64,
        x: &mut [f64],
    ) -> Result<f64> {
        let n = x.len();
        self.jac.resize(n * n, 0.0);
        system.apply(t, x, &mut self.f);
        system.jacobian(t, x, &mut self.jac);
        for i in 0..n {
            self.update[i] = x[i] - base[i] - c * self.f[i];
        }
        let mut matrix = DMatrix::from_row_slice(n, n, &self.jac);
        matrix *= -c;
        for i in 0..n {
            matrix[(i, i)] += 1.0;
        }
        let rhs = DVector::from_column_slice(&self.update);
        let delta = matrix
            .lu()
            .solve(&rhs)
            .ok_or(Error::SingularJacobian { time: t })?;
        let mut change: f64 = 0.0;
        for i in 0..n {
            x[i] -= delta[i];
            change = change.max(delta[i].abs());
        }
        Ok(change)
    }
}

/// Implicit (backward) Euler: `u_{n+1} = u_n + h f(t_{n+1}, u_{n+1})`.
pub(crate) struct BackwardEuler {
    stage: StageSolver,
    k0: Vec<f64>,
}

impl BackwardEuler {
    pub(crate) fn new(dim: usize) -> Self {
        Self {
            stage: StageSolver::new(dim),
            k0: vec![0.0; dim],
        }
    }

    pub(crate) fn attempt(
        &mut self,
        system: &impl JacobianSystem,
        t: f64,
        u: &[f64],
        h: f64,
        options: &SolverOptions,
        next: &mut [f64],
    ) -> Result<()> {
        // Explicit Euler predictor.
        system.apply(t, u, &mut self.k0);
        for i in 0..u.len() {
            next[i] = u[i] + h * self.k0[i];
        }
        self.stage.solve(system, t + h, u, h, next, options)?;
        Ok(())
    }
}

/// TR-BDF2: trapezoidal stage to `t + γh`, then BDF2 to `t + h`, with
/// `γ = 2 - √2`.
pub(crate) struct TrBdf2 {
    stage: StageSolver,
    k0: Vec<f64>,
    base: Vec<f64>,
    mid: Vec<f64>,
}

impl TrBdf2 {
    pub(crate) const GAMMA: f64 = 2.0 - std::f64::consts::SQRT_2;

    pub(crate) fn new(dim: usize) -> Self {
        Self {
            stage: StageSolver::new(dim),
            k0: vec![0.0; dim],
            base: vec![0.0; dim],
            mid: vec![0.0; dim],
        }
    }

    pub(crate) fn attempt(
        &mut self,
        system: &impl JacobianSystem,
        t: f64,
        u: &[f64],
        h: f64,
        options: &SolverOptions,
        next: &mut [f64],
    ) -> Result<()> {
        let gamma = Self::GAMMA;
        let half = 0.5 * gamma * h;

        // Trapezoidal stage: x = u + γh/2 (f(u) + f(x)).
        system.apply(t, u, &mut self.k0);
        for i in 0..u.len() {
            self.base[i] = u[i] + half * self.k0[i];
            self.mid[i] = u[i] + gamma * h * self.k0[i];
        }
        self.stage
            .solve(system, t + gamma * h, &self.base, half, &mut self.mid, options)?;

        // BDF2 stage: x = a u_γ - b u + d h f(x).
        let denom = gamma * (2.0 - gamma);
        let a = 1.0 / denom;
        let b = (1.0 - gamma) * (1.0 - gamma) / denom;
        let d = (1.0 - gamma) / (2.0 - gamma);
        for i in 0..u.len() {
            self.base[i] = a * self.mid[i] - b * u[i];
        }
        next.copy_from_slice(&self.mid);
        self.stage.solve(system, t + h, &self.base, d * h, next, options)?;
        Ok(())
    }
}

/// Ratio of the largest to the smallest non-negligible derivative magnitude at
/// `u0`. Returns 1 when fewer than two components are non-negligible.
pub fn stiffness_ratio(system: &impl DynamicalSystem<f64>, t0: f64, u0: &[f64]) -> f64 {
    let mut du = vec![0.0; system.dimension()];
    system.apply(t0, u0, &mut du);
    let mut largest: f64 = 0.0;
    let mut smallest = f64::INFINITY;
    for magnitude in du.iter().map(|v| v.abs()).filter(|&m| m >= NEGLIGIBLE) {
        largest = largest.max(magnitude);
        smallest = smallest.min(magnitude);
    }
    if smallest.is_finite() && smallest > 0.0 {
        largest / smallest
    } else {
        1.0
    }
}

/// One-shot stiffness test at the initial state. The decision is not revisited
/// during integration.
pub fn is_stiff(problem: &Problem) -> bool {
    let (t0, _) = problem.tspan();
    stiffness_ratio(problem.system(), t0, problem.u0()) > STIFFNESS_THRESHOLD
}

/// Method the stiffness heuristic picks for `problem`.
pub fn select_method(problem: &Problem) -> Method {
    let (t0, _) = problem.tspan();
    let ratio = stiffness_ratio(problem.system(), t0, problem.u0());
    if ratio > STIFFNESS_THRESHOLD {
        warn!("stiffness ratio {ratio:.3e} exceeds {STIFFNESS_THRESHOLD}; using backward Euler");
        Method::BackwardEuler
    } else {
        debug!("stiffness ratio {ratio:.3e}; using {}", Method::default().name());
        Method::default()
    }
}

/// Integrates with whichever method [`select_method`] picks. Stiff problems
/// run with `stiff_options`, the rest with `options`.
pub fn solve_auto(
    problem: &Problem,
    options: &SolverOptions,
    stiff_options: &SolverOptions,
) -> Result<(Method, Solution)> {
    let method = select_method(problem);
    let chosen = if method.is_implicit() {
        stiff_options
    } else {
        options
    };
    let solution = solve(problem, method, chosen)?;
    Ok((method, solution))
}

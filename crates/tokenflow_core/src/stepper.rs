//! Time-marching loop shared by every method.
//!
//! [`Integrator::advance`] is the single stepping primitive: it attempts one
//! step, decides accept/reject from the embedded error estimate, adapts the
//! step size, and reports what happened. [`Integrator::run`] drives it to the
//! end of the time span; the equilibrium detector drives the same primitive
//! with a different stopping rule.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::implicit::{BackwardEuler, TrBdf2};
use crate::options::SolverOptions;
use crate::problem::Problem;
use crate::solution::{Solution, SolveStats, Termination};
use crate::tableau::{Method, Tableau};
use crate::traits::{DynamicalSystem, JacobianSystem};

/// Cooperative cancellation flag, checked once per step attempt.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Outcome of one call to [`Integrator::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEvent {
    Accepted,
    Rejected,
    Done(Termination),
}

/// Wraps a system and counts derivative evaluations.
struct Counted<S> {
    inner: S,
    evals: Cell<usize>,
}

impl<S: JacobianSystem> Counted<S> {
    fn new(inner: S) -> Self {
        Self {
            inner,
            evals: Cell::new(0),
        }
    }
}

impl<S: JacobianSystem> DynamicalSystem<f64> for Counted<S> {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) {
        self.evals.set(self.evals.get() + 1);
        self.inner.apply(t, x, out);
    }
}

impl<S: JacobianSystem> JacobianSystem for Counted<S> {
    fn jacobian(&self, t: f64, x: &[f64], out: &mut [f64]) {
        self.inner.jacobian(t, x, out);
    }
}

/// Explicit Runge-Kutta step driven by a Butcher tableau.
struct ExplicitRk<'a> {
    tableau: &'a Tableau,
    k: Vec<Vec<f64>>,
    stage: Vec<f64>,
}

impl<'a> ExplicitRk<'a> {
    fn new(tableau: &'a Tableau, dim: usize) -> Self {
        Self {
            tableau,
            k: vec![vec![0.0; dim]; tableau.stages()],
            stage: vec![0.0; dim],
        }
    }

    /// Writes the candidate state into `next` and returns the scaled error
    /// (zero when `estimate` is false).
    fn attempt(
        &mut self,
        system: &impl DynamicalSystem<f64>,
        t: f64,
        u: &[f64],
        h: f64,
        options: &SolverOptions,
        estimate: bool,
        next: &mut [f64],
    ) -> f64 {
        let tab = self.tableau;
        system.apply(t, u, &mut self.k[0]);
        for i in 1..tab.stages() {
            self.stage.copy_from_slice(u);
            for (j, &a) in tab.a[i].iter().enumerate() {
                if a == 0.0 {
                    continue;
                }
                for (s, kj) in self.stage.iter_mut().zip(&self.k[j]) {
                    *s += h * a * kj;
                }
            }
            system.apply(t + tab.c[i] * h, &self.stage, &mut self.k[i]);
        }

        next.copy_from_slice(u);
        for (j, &b) in tab.b.iter().enumerate() {
            if b == 0.0 {
                continue;
            }
            for (n, kj) in next.iter_mut().zip(&self.k[j]) {
                *n += h * b * kj;
            }
        }

        if !estimate {
            return 0.0;
        }

        let mut error: f64 = 0.0;
        for comp in 0..u.len() {
            let e: f64 = h * tab
                .bhat
                .iter()
                .zip(&self.k)
                .map(|(w, k)| w * k[comp])
                .sum::<f64>();
            let mut scale = options.abstol + options.reltol * u[comp].abs().max(next[comp].abs());
            if scale == 0.0 {
                scale = options.abstol;
            }
            error = error.max(e.abs() / scale);
        }
        error
    }
}

enum Scheme<'a> {
    Explicit(ExplicitRk<'a>),
    BackwardEuler(BackwardEuler),
    TrBdf2(TrBdf2),
}

/// Step-by-step integrator over one system and time span.
///
/// The system is held by value; pass a reference to integrate a borrowed one.
pub struct Integrator<'a, S: JacobianSystem> {
    system: Counted<S>,
    scheme: Scheme<'a>,
    name: String,
    order: usize,
    adaptive: bool,
    options: SolverOptions,
    t: f64,
    tf: f64,
    h: f64,
    last_h: f64,
    u: Vec<f64>,
    next: Vec<f64>,
    rejected: usize,
    accepted: usize,
    cancel: Option<CancelToken>,
}

impl<'a, S: JacobianSystem> Integrator<'a, S> {
    pub fn new(
        system: S,
        method: Method,
        u0: &[f64],
        tspan: (f64, f64),
        options: SolverOptions,
    ) -> Result<Self> {
        let dim = system.dimension();
        let scheme = match method {
            Method::BackwardEuler => Scheme::BackwardEuler(BackwardEuler::new(dim)),
            Method::TrBdf2 => Scheme::TrBdf2(TrBdf2::new(dim)),
            explicit => {
                let tableau = explicit.tableau().ok_or_else(|| Error::InvalidTableau {
                    name: explicit.name().to_string(),
                    reason: "method has no explicit tableau".into(),
                })?;
                Scheme::Explicit(ExplicitRk::new(tableau, dim))
            }
        };
        Self::build(system, scheme, method.name(), method.order(), u0, tspan, options)
    }

    /// Integrator for a caller-supplied explicit tableau.
    pub fn with_tableau(
        system: S,
        tableau: &'a Tableau,
        u0: &[f64],
        tspan: (f64, f64),
        options: SolverOptions,
    ) -> Result<Self> {
        tableau.validate()?;
        let scheme = Scheme::Explicit(ExplicitRk::new(tableau, system.dimension()));
        Self::build(system, scheme, &tableau.name, tableau.order, u0, tspan, options)
    }

    fn build(
        system: S,
        scheme: Scheme<'a>,
        name: &str,
        order: usize,
        u0: &[f64],
        tspan: (f64, f64),
        options: SolverOptions,
    ) -> Result<Self> {
        options.validate()?;
        let (t0, tf) = tspan;
        if !t0.is_finite() || !tf.is_finite() || tf < t0 {
            return Err(Error::InvalidTimeSpan { t0, tf });
        }
        let dim = system.dimension();
        if u0.len() != dim {
            return Err(Error::DimensionMismatch {
                expected: dim,
                got: u0.len(),
            });
        }
        let adaptive = match &scheme {
            Scheme::Explicit(rk) => options.adaptive && rk.tableau.is_adaptive(),
            Scheme::BackwardEuler(_) | Scheme::TrBdf2(_) => false,
        };
        let h = options.dt.clamp(options.dtmin, options.dtmax);
        Ok(Self {
            system: Counted::new(system),
            scheme,
            name: name.to_string(),
            order,
            adaptive,
            options,
            t: t0,
            tf,
            h,
            last_h: 0.0,
            u: u0.to_vec(),
            next: vec![0.0; dim],
            rejected: 0,
            accepted: 0,
            cancel: None,
        })
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn t(&self) -> f64 {
        self.t
    }

    pub fn state(&self) -> &[f64] {
        &self.u
    }

    /// Step size the next attempt will use (before clamping to the span end).
    pub fn step_size(&self) -> f64 {
        self.h
    }

    /// Size of the most recently accepted step.
    pub fn last_step(&self) -> f64 {
        self.last_h
    }

    pub fn is_adaptive(&self) -> bool {
        self.adaptive
    }

    pub fn method_name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> SolveStats {
        SolveStats {
            accepted: self.accepted,
            rejected: self.rejected,
            derivative_evals: self.system.evals.get(),
        }
    }

    /// Evaluates `du/dt` at the current state.
    pub fn derivative(&self, out: &mut [f64]) {
        self.system.apply(self.t, &self.u, out);
    }

    /// Attempts one step.
    pub fn advance(&mut self) -> Result<StepEvent> {
        if self.t >= self.tf {
            return Ok(StepEvent::Done(Termination::Completed));
        }
        if self.accepted >= self.options.maxiters {
            return Ok(StepEvent::Done(Termination::MaxIterations));
        }
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Ok(StepEvent::Done(Termination::Cancelled));
        }

        let mut h = self.h;
        let reaches_end = self.t + h >= self.tf;
        if reaches_end {
            h = self.tf - self.t;
        }

        let error = match &mut self.scheme {
            Scheme::Explicit(rk) => rk.attempt(
                &self.system,
                self.t,
                &self.u,
                h,
                &self.options,
                self.adaptive,
                &mut self.next,
            ),
            Scheme::BackwardEuler(be) => {
                be.attempt(&self.system, self.t, &self.u, h, &self.options, &mut self.next)?;
                0.0
            }
            Scheme::TrBdf2(tr) => {
                tr.attempt(&self.system, self.t, &self.u, h, &self.options, &mut self.next)?;
                0.0
            }
        };

        let exponent = -1.0 / (self.order as f64 + 1.0);
        if !self.adaptive || error <= 1.0 || h <= self.options.dtmin {
            let t_new = if reaches_end { self.tf } else { self.t + h };
            if t_new <= self.t {
                return Err(Error::StepSizeUnderflow { time: self.t, step: h });
            }
            if self.next.iter().any(|v| !v.is_finite()) {
                return Err(Error::NumericalDivergence { time: t_new });
            }
            std::mem::swap(&mut self.u, &mut self.next);
            self.t = t_new;
            self.last_h = h;
            self.accepted += 1;
            if self.adaptive && error > 0.0 {
                let factor = (0.9 * error.powf(exponent)).min(5.0);
                self.h = (h * factor).clamp(self.options.dtmin, self.options.dtmax);
            }
            trace!("accept t = {:.6e} h = {:.3e} err = {:.3e}", self.t, h, error);
            Ok(StepEvent::Accepted)
        } else {
            let factor = (0.9 * error.powf(exponent)).max(0.1);
            self.h = (h * factor).max(self.options.dtmin);
            self.rejected += 1;
            trace!("reject t = {:.6e} h = {:.3e} err = {:.3e}", self.t, h, error);
            Ok(StepEvent::Rejected)
        }
    }

    /// Integrates to the end of the span (or until a soft stop) and records
    /// every accepted step.
    pub fn run(mut self, labels: Vec<String>) -> Result<Solution> {
        debug!(
            "integrating with {} over [{}, {}], adaptive = {}",
            self.name, self.t, self.tf, self.adaptive
        );
        let mut solution = Solution::start(labels, self.t, self.u.clone());
        let termination = loop {
            match self.advance()? {
                StepEvent::Accepted => solution.push(self.t, &self.u),
                StepEvent::Rejected => {}
                StepEvent::Done(reason) => break reason,
            }
        };
        solution.termination = termination;
        solution.stats = self.stats();
        debug!(
            "{} finished at t = {} ({:?}): {} accepted, {} rejected, {} evaluations",
            self.name,
            self.t,
            termination,
            solution.stats.accepted,
            solution.stats.rejected,
            solution.stats.derivative_evals
        );
        Ok(solution)
    }
}

/// Integrates `problem` with `method`.
pub fn solve(problem: &Problem, method: Method, options: &SolverOptions) -> Result<Solution> {
    Integrator::new(problem.system(), method, problem.u0(), problem.tspan(), *options)?
        .run(problem.labels().to_vec())
}

/// Integrates `problem` with a caller-supplied explicit tableau.
pub fn solve_with_tableau(
    problem: &Problem,
    tableau: &Tableau,
    options: &SolverOptions,
) -> Result<Solution> {
    Integrator::with_tableau(problem.system(), tableau, problem.u0(), problem.tspan(), *options)?
        .run(problem.labels().to_vec())
}

/// Like [`solve`], stopping early when `cancel` is triggered.
pub fn solve_with_cancel(
    problem: &Problem,
    method: Method,
    options: &SolverOptions,
    cancel: CancelToken,
) -> Result<Solution> {
    Integrator::new(problem.system(), method, problem.u0(), problem.tspan(), *options)?
        .with_cancel(cancel)
        .run(problem.labels().to_vec())
}

//! Steady-state detection layered on the stepping primitive.
//!
//! [`EquilibriumDetector`] drives [`Integrator::advance`] and, after each
//! accepted step past the warm-up time, samples the largest derivative
//! component. A run of `consecutive_steps` small samples ends the integration
//! early. Running out of time or iterations is a weaker answer, not an error.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::options::SolverOptions;
use crate::problem::Problem;
use crate::solution::{Solution, Termination};
use crate::stepper::{CancelToken, Integrator, StepEvent};
use crate::tableau::Method;
use crate::traits::{DynamicalSystem, JacobianSystem};

/// Settings for the equilibrium detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquilibriumOptions {
    /// Largest derivative component still considered "no change".
    pub tolerance: f64,
    /// Number of consecutive small samples required.
    pub consecutive_steps: usize,
    /// Warm-up measured from the start of the span; no sampling before it.
    pub min_time: f64,
    /// Sample every `check_interval`-th accepted step.
    pub check_interval: usize,
}

impl Default for EquilibriumOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            consecutive_steps: 5,
            min_time: 0.1,
            check_interval: 1,
        }
    }
}

impl EquilibriumOptions {
    pub fn fast() -> Self {
        Self {
            tolerance: 1e-4,
            consecutive_steps: 3,
            min_time: 0.0,
            check_interval: 5,
        }
    }

    pub fn strict() -> Self {
        Self {
            tolerance: 1e-9,
            consecutive_steps: 10,
            min_time: 1.0,
            check_interval: 1,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(Error::InvalidOptions(format!(
                "equilibrium tolerance must be finite and positive, got {}",
                self.tolerance
            )));
        }
        if self.consecutive_steps == 0 {
            return Err(Error::InvalidOptions(
                "consecutive_steps must be greater than zero".into(),
            ));
        }
        if !self.min_time.is_finite() || self.min_time < 0.0 {
            return Err(Error::InvalidOptions(format!(
                "min_time must be finite and nonnegative, got {}",
                self.min_time
            )));
        }
        if self.check_interval == 0 {
            return Err(Error::InvalidOptions(
                "check_interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquilibriumReason {
    EquilibriumReached,
    TimeExhausted,
    MaxIterations,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquilibriumResult {
    pub reason: EquilibriumReason,
    pub time: f64,
    pub state: Vec<f64>,
    /// Largest derivative component at `state`.
    pub max_change: f64,
    /// Accepted steps taken.
    pub steps: usize,
}

impl EquilibriumResult {
    pub fn reached(&self) -> bool {
        self.reason == EquilibriumReason::EquilibriumReached
    }
}

/// Equilibrium-terminated integration on top of an [`Integrator`].
pub struct EquilibriumDetector<'a, S: JacobianSystem> {
    integrator: Integrator<'a, S>,
    options: EquilibriumOptions,
    warmup_end: f64,
    solution: Solution,
    du: Vec<f64>,
    since_check: usize,
    consecutive: usize,
    max_change: Option<f64>,
    outcome: Option<EquilibriumReason>,
}

impl<'a, S: JacobianSystem> EquilibriumDetector<'a, S> {
    pub fn new(
        integrator: Integrator<'a, S>,
        labels: Vec<String>,
        options: EquilibriumOptions,
    ) -> Result<Self> {
        options.validate()?;
        let dim = integrator.state().len();
        let warmup_end = integrator.t() + options.min_time;
        let solution = Solution::start(labels, integrator.t(), integrator.state().to_vec());
        Ok(Self {
            integrator,
            options,
            warmup_end,
            solution,
            du: vec![0.0; dim],
            since_check: 0,
            consecutive: 0,
            max_change: None,
            outcome: None,
        })
    }

    pub fn is_done(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn integrator(&self) -> &Integrator<'a, S> {
        &self.integrator
    }

    /// Largest derivative component from the most recent sample.
    pub fn last_change(&self) -> Option<f64> {
        self.max_change
    }

    /// Advances by one step attempt; returns the outcome once decided.
    pub fn poll(&mut self) -> Result<Option<EquilibriumReason>> {
        if self.outcome.is_some() {
            return Ok(self.outcome);
        }
        let reason = match self.integrator.advance()? {
            StepEvent::Accepted => {
                self.solution.push(self.integrator.t(), self.integrator.state());
                if self.sample_after_accept() {
                    Some(EquilibriumReason::EquilibriumReached)
                } else {
                    None
                }
            }
            StepEvent::Rejected => None,
            StepEvent::Done(Termination::Completed) => Some(EquilibriumReason::TimeExhausted),
            StepEvent::Done(Termination::MaxIterations) => Some(EquilibriumReason::MaxIterations),
            StepEvent::Done(Termination::Cancelled) => Some(EquilibriumReason::Cancelled),
            StepEvent::Done(Termination::Equilibrium) => Some(EquilibriumReason::EquilibriumReached),
        };
        self.outcome = reason;
        Ok(reason)
    }

    /// Runs at most `attempts` step attempts.
    pub fn run_steps(&mut self, attempts: usize) -> Result<Option<EquilibriumReason>> {
        for _ in 0..attempts {
            if let Some(reason) = self.poll()? {
                return Ok(Some(reason));
            }
        }
        Ok(self.outcome)
    }

    fn sample_after_accept(&mut self) -> bool {
        if self.integrator.t() < self.warmup_end {
            return false;
        }
        self.since_check += 1;
        if self.since_check < self.options.check_interval {
            return false;
        }
        self.since_check = 0;
        let change = self.current_change();
        if change < self.options.tolerance {
            self.consecutive += 1;
        } else {
            self.consecutive = 0;
        }
        self.consecutive >= self.options.consecutive_steps
    }

    fn current_change(&mut self) -> f64 {
        self.integrator.derivative(&mut self.du);
        let change = self.du.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
        self.max_change = Some(change);
        change
    }

    /// Drives the detector to an outcome.
    pub fn run(mut self) -> Result<(Solution, EquilibriumResult)> {
        while self.poll()?.is_none() {}
        Ok(self.finish())
    }

    /// Consumes the detector. If no outcome has been reached yet the result
    /// reports the current state as time exhausted.
    pub fn finish(mut self) -> (Solution, EquilibriumResult) {
        let reason = self.outcome.unwrap_or(EquilibriumReason::TimeExhausted);
        let sampled_here = reason == EquilibriumReason::EquilibriumReached;
        let max_change = match self.max_change {
            Some(change) if sampled_here => change,
            _ => self.current_change(),
        };
        let stats = self.integrator.stats();
        let result = EquilibriumResult {
            reason,
            time: self.integrator.t(),
            state: self.integrator.state().to_vec(),
            max_change,
            steps: stats.accepted,
        };
        let mut solution = self.solution;
        solution.stats = stats;
        solution.termination = match reason {
            EquilibriumReason::EquilibriumReached => Termination::Equilibrium,
            EquilibriumReason::TimeExhausted => Termination::Completed,
            EquilibriumReason::MaxIterations => Termination::MaxIterations,
            EquilibriumReason::Cancelled => Termination::Cancelled,
        };
        debug!(
            "equilibrium search ended at t = {} ({:?}), max change {:.3e}",
            result.time, result.reason, result.max_change
        );
        (solution, result)
    }
}

/// Integrates `problem` until equilibrium or the end of its span.
pub fn solve_until_equilibrium(
    problem: &Problem,
    method: Method,
    options: &SolverOptions,
    eq_options: &EquilibriumOptions,
) -> Result<(Solution, EquilibriumResult)> {
    let integrator = Integrator::new(problem.system(), method, problem.u0(), problem.tspan(), *options)?;
    EquilibriumDetector::new(integrator, problem.labels().to_vec(), *eq_options)?.run()
}

/// Like [`solve_until_equilibrium`], stopping early when `cancel` is triggered.
pub fn solve_until_equilibrium_with_cancel(
    problem: &Problem,
    method: Method,
    options: &SolverOptions,
    eq_options: &EquilibriumOptions,
    cancel: CancelToken,
) -> Result<(Solution, EquilibriumResult)> {
    let integrator = Integrator::new(problem.system(), method, problem.u0(), problem.tspan(), *options)?
        .with_cancel(cancel);
    EquilibriumDetector::new(integrator, problem.labels().to_vec(), *eq_options)?.run()
}

/// Equilibrium search returning only the result.
pub fn find_equilibrium(
    problem: &Problem,
    method: Method,
    options: &SolverOptions,
    eq_options: &EquilibriumOptions,
) -> Result<EquilibriumResult> {
    solve_until_equilibrium(problem, method, options, eq_options).map(|(_, result)| result)
}

/// One-shot test: is every derivative component of `u` below `tolerance`?
pub fn is_equilibrium(system: &impl DynamicalSystem<f64>, u: &[f64], tolerance: f64) -> bool {
    let mut du = vec![0.0; system.dimension()];
    system.apply(0.0, u, &mut du);
    du.iter().all(|v| v.abs() < tolerance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Network;
    use std::collections::HashMap;

    fn reversible(forward: f64, backward: f64) -> Problem {
        let mut net = Network::new();
        net.add_place("A", 10.0, None).expect("place");
        net.add_place("B", 0.0, None).expect("place");
        net.add_transition("fwd").expect("transition");
        net.add_transition("bwd").expect("transition");
        net.add_arc("A", "fwd", 1.0)
            .add_arc("fwd", "B", 1.0)
            .add_arc("B", "bwd", 1.0)
            .add_arc("bwd", "A", 1.0);
        let rates = HashMap::from([("fwd".to_string(), forward), ("bwd".to_string(), backward)]);
        Problem::from_network(&net, (0.0, 200.0), &rates).expect("problem")
    }

    #[test]
    fn reversible_pair_settles_at_rate_ratio() {
        let problem = reversible(1.0, 0.25);
        let (solution, result) = solve_until_equilibrium(
            &problem,
            Method::Tsit5,
            &SolverOptions::default(),
            &EquilibriumOptions::default(),
        )
        .expect("equilibrium search");
        assert!(result.reached());
        assert!(result.time < 200.0);
        assert!(result.max_change < 1e-6);
        // A * 1.0 = B * 0.25 with A + B = 10.
        assert!((result.state[0] - 2.0).abs() < 1e-4);
        assert!((result.state[1] - 8.0).abs() < 1e-4);
        assert_eq!(solution.termination, Termination::Equilibrium);
        assert_eq!(solution.final_time(), Some(result.time));
        assert_eq!(solution.len(), result.steps + 1);
    }

    #[test]
    fn warmup_and_interval_delay_detection() {
        let problem = reversible(1.0, 1.0);
        let base = solve_until_equilibrium(
            &problem,
            Method::Tsit5,
            &SolverOptions::default(),
            &EquilibriumOptions::default(),
        )
        .expect("search")
        .1;
        let delayed = find_equilibrium(
            &problem,
            Method::Tsit5,
            &SolverOptions::default(),
            &EquilibriumOptions {
                min_time: base.time + 10.0,
                check_interval: 4,
                ..EquilibriumOptions::default()
            },
        )
        .expect("search");
        assert!(delayed.reached());
        assert!(delayed.time >= base.time + 10.0);
    }

    #[test]
    fn short_span_reports_time_exhausted_with_last_state() {
        let mut problem_net = Network::new();
        problem_net.add_place("A", 10.0, None).expect("place");
        problem_net.add_place("B", 0.0, None).expect("place");
        problem_net.add_transition("t").expect("transition");
        problem_net.add_arc("A", "t", 1.0).add_arc("t", "B", 1.0);
        let rates = HashMap::from([("t".to_string(), 0.1)]);
        let problem = Problem::from_network(&problem_net, (0.0, 5.0), &rates).expect("problem");
        let result = find_equilibrium(
            &problem,
            Method::Tsit5,
            &SolverOptions::default(),
            &EquilibriumOptions::default(),
        )
        .expect("search");
        assert_eq!(result.reason, EquilibriumReason::TimeExhausted);
        assert_eq!(result.time, 5.0);
        let expected = 0.1 * 10.0 * (-0.5f64).exp();
        assert!((result.max_change - expected).abs() < 1e-3);
    }

    #[test]
    fn max_iterations_is_reported() {
        let problem = reversible(1.0, 1.0);
        let options = SolverOptions {
            maxiters: 5,
            ..SolverOptions::default()
        };
        let result = find_equilibrium(&problem, Method::Tsit5, &options, &EquilibriumOptions::strict())
            .expect("search");
        assert_eq!(result.reason, EquilibriumReason::MaxIterations);
        assert_eq!(result.steps, 5);
        assert!(result.max_change > 0.0);
    }

    #[test]
    fn cancellation_is_reported() {
        let problem = reversible(1.0, 1.0);
        let token = CancelToken::new();
        token.cancel();
        let (_, result) = solve_until_equilibrium_with_cancel(
            &problem,
            Method::Tsit5,
            &SolverOptions::default(),
            &EquilibriumOptions::default(),
            token,
        )
        .expect("search");
        assert_eq!(result.reason, EquilibriumReason::Cancelled);
        assert_eq!(result.steps, 0);
    }

    #[test]
    fn detector_runs_in_batches() {
        let problem = reversible(2.0, 2.0);
        let integrator = Integrator::new(
            problem.system(),
            Method::DormandPrince5,
            problem.u0(),
            problem.tspan(),
            SolverOptions::default(),
        )
        .expect("integrator");
        let mut detector =
            EquilibriumDetector::new(integrator, problem.labels().to_vec(), EquilibriumOptions::default())
                .expect("detector");
        let mut batches = 0;
        while detector.run_steps(10).expect("batch").is_none() {
            batches += 1;
            assert!(batches < 10_000);
        }
        assert!(detector.is_done());
        let (_, result) = detector.finish();
        assert!(result.reached());
        assert!((result.state[0] - result.state[1]).abs() < 1e-4);
    }

    #[test]
    fn options_validation_and_point_test() {
        let bad = EquilibriumOptions {
            consecutive_steps: 0,
            ..EquilibriumOptions::default()
        };
        assert!(bad.validate().is_err());
        let bad = EquilibriumOptions {
            check_interval: 0,
            ..EquilibriumOptions::default()
        };
        assert!(bad.validate().is_err());
        EquilibriumOptions::fast().validate().expect("fast preset");
        EquilibriumOptions::strict().validate().expect("strict preset");

        let problem = reversible(1.0, 1.0);
        assert!(is_equilibrium(problem.system(), &[5.0, 5.0], 1e-12));
        assert!(!is_equilibrium(problem.system(), &[10.0, 0.0], 1e-12));
    }
}

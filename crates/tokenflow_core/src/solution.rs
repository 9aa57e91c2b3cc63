//! Integrated trajectories.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Reached the end of the time span.
    Completed,
    /// Ran out of accepted steps before reaching the end of the time span.
    MaxIterations,
    /// Stopped through a [`crate::stepper::CancelToken`].
    Cancelled,
    /// Stopped early by the equilibrium detector.
    Equilibrium,
}

/// Work counters for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolveStats {
    pub accepted: usize,
    pub rejected: usize,
    pub derivative_evals: usize,
}

/// Ordered `(t, u)` samples; rejected steps never appear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub t: Vec<f64>,
    pub u: Vec<Vec<f64>>,
    labels: Vec<String>,
    pub termination: Termination,
    pub stats: SolveStats,
}

impl Solution {
    pub(crate) fn start(labels: Vec<String>, t0: f64, u0: Vec<f64>) -> Self {
        Self {
            t: vec![t0],
            u: vec![u0],
            labels,
            termination: Termination::Completed,
            stats: SolveStats::default(),
        }
    }

    pub(crate) fn push(&mut self, t: f64, u: &[f64]) {
        self.t.push(t);
        self.u.push(u.to_vec());
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.labels.iter().position(|label| label == name)
    }

    /// Time series of one place.
    pub fn variable(&self, name: &str) -> Option<Vec<f64>> {
        self.index_of(name).and_then(|i| self.variable_by_index(i))
    }

    pub fn variable_by_index(&self, index: usize) -> Option<Vec<f64>> {
        if index >= self.labels.len() {
            return None;
        }
        Some(self.u.iter().map(|state| state[index]).collect())
    }

    pub fn state(&self, i: usize) -> Option<&[f64]> {
        self.u.get(i).map(Vec::as_slice)
    }

    pub fn state_map(&self, i: usize) -> Option<HashMap<String, f64>> {
        self.state(i).map(|state| self.to_map(state))
    }

    pub fn final_state(&self) -> Option<&[f64]> {
        self.u.last().map(Vec::as_slice)
    }

    pub fn final_state_map(&self) -> Option<HashMap<String, f64>> {
        self.final_state().map(|state| self.to_map(state))
    }

    pub fn final_time(&self) -> Option<f64> {
        self.t.last().copied()
    }

    /// Piecewise-linear state at time `t`; `None` outside the recorded range
    /// or for NaN.
    pub fn interpolate(&self, t: f64) -> Option<Vec<f64>> {
        let first = *self.t.first()?;
        let last = *self.t.last()?;
        if !(first..=last).contains(&t) {
            return None;
        }
        let hi = self.t.partition_point(|&ti| ti < t);
        if self.t[hi] == t || hi == 0 {
            return Some(self.u[hi].clone());
        }
        let lo = hi - 1;
        let w = (t - self.t[lo]) / (self.t[hi] - self.t[lo]);
        Some(
            self.u[lo]
                .iter()
                .zip(&self.u[hi])
                .map(|(a, b)| a + w * (b - a))
                .collect(),
        )
    }

    fn to_map(&self, state: &[f64]) -> HashMap<String, f64> {
        self.labels
            .iter()
            .cloned()
            .zip(state.iter().copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Solution {
        let mut sol = Solution::start(vec!["A".into(), "B".into()], 0.0, vec![4.0, 0.0]);
        sol.push(1.0, &[2.0, 2.0]);
        sol.push(3.0, &[1.0, 3.0]);
        sol
    }

    #[test]
    fn accessors_follow_label_order() {
        let sol = sample();
        assert_eq!(sol.len(), 3);
        assert!(!sol.is_empty());
        assert_eq!(sol.variable("B"), Some(vec![0.0, 2.0, 3.0]));
        assert_eq!(sol.variable("C"), None);
        assert_eq!(sol.variable_by_index(0), Some(vec![4.0, 2.0, 1.0]));
        assert_eq!(sol.variable_by_index(2), None);
        assert_eq!(sol.state(1), Some(&[2.0, 2.0][..]));
        assert_eq!(sol.final_state(), Some(&[1.0, 3.0][..]));
        assert_eq!(sol.final_time(), Some(3.0));
        let map = sol.final_state_map().expect("final map");
        assert_eq!(map["A"], 1.0);
        assert_eq!(sol.state_map(0).expect("map")["B"], 0.0);
    }

    #[test]
    fn interpolate_is_linear_between_samples() {
        let sol = sample();
        assert_eq!(sol.interpolate(0.0), Some(vec![4.0, 0.0]));
        assert_eq!(sol.interpolate(1.0), Some(vec![2.0, 2.0]));
        assert_eq!(sol.interpolate(2.0), Some(vec![1.5, 2.5]));
        assert_eq!(sol.interpolate(3.0), Some(vec![1.0, 3.0]));
        assert_eq!(sol.interpolate(3.5), None);
        assert_eq!(sol.interpolate(-0.1), None);
        assert_eq!(sol.interpolate(f64::NAN), None);
    }
}

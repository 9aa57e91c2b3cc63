//! Simulation problems: a compiled network, its initial state and time span.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::kinetics::{resolve_rates, MassActionSystem};
use crate::net::{Idx, Network};

/// Immutable bundle of everything one integration needs.
///
/// The place index assignment is the network's interning order and never
/// changes for the lifetime of the problem; every state vector produced
/// from it uses the same order.
#[derive(Debug, Clone)]
pub struct Problem {
    labels: Vec<String>,
    index: HashMap<String, usize>,
    capacities: Vec<Option<f64>>,
    rates: Vec<f64>,
    system: MassActionSystem,
    u0: Vec<f64>,
    tspan: (f64, f64),
}

impl Problem {
    /// Builds a problem, overriding each place's declared initial amount with
    /// any entry in `initial_state`. Transitions absent from `rates` use
    /// [`crate::kinetics::DEFAULT_RATE`].
    pub fn new(
        network: &Network,
        initial_state: &HashMap<String, f64>,
        tspan: (f64, f64),
        rates: &HashMap<String, f64>,
    ) -> Result<Self> {
        let mut u0: Vec<f64> = network.places().iter().map(|p| p.initial).collect();
        for (name, &value) in initial_state {
            let id = network
                .place_id(name)
                .ok_or_else(|| Error::UnknownPlace(name.clone()))?;
            u0[id.index()] = value;
        }
        let dense_rates = resolve_rates(network, rates)?;
        Self::from_dense(network, u0, tspan, dense_rates)
    }

    /// Builds a problem from the network's declared initial amounts.
    pub fn from_network(
        network: &Network,
        tspan: (f64, f64),
        rates: &HashMap<String, f64>,
    ) -> Result<Self> {
        Self::new(network, &HashMap::new(), tspan, rates)
    }

    /// Builds a problem from vectors already in place/transition index order.
    pub fn from_dense(
        network: &Network,
        u0: Vec<f64>,
        tspan: (f64, f64),
        rates: Vec<f64>,
    ) -> Result<Self> {
        let (t0, tf) = tspan;
        if !t0.is_finite() || !tf.is_finite() || tf < t0 {
            return Err(Error::InvalidTimeSpan { t0, tf });
        }
        let places = network.places();
        if u0.len() != places.len() {
            return Err(Error::DimensionMismatch {
                expected: places.len(),
                got: u0.len(),
            });
        }
        for (place, &value) in places.iter().zip(&u0) {
            if !value.is_finite() {
                return Err(Error::InvalidInitialState {
                    place: place.id.clone(),
                    value,
                });
            }
        }
        for (transition, &rate) in network.transitions().iter().zip(&rates) {
            if !rate.is_finite() || rate < 0.0 {
                return Err(Error::InvalidRate {
                    transition: transition.id.clone(),
                    rate,
                });
            }
        }

        let system = MassActionSystem::compile(network, &rates)?;
        let labels: Vec<String> = places.iter().map(|p| p.id.clone()).collect();
        let index = labels
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        Ok(Self {
            labels,
            index,
            capacities: places.iter().map(|p| p.capacity).collect(),
            rates,
            system,
            u0,
            tspan,
        })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn place_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn capacities(&self) -> &[Option<f64>] {
        &self.capacities
    }

    pub fn rates(&self) -> &[f64] {
        &self.rates
    }

    pub fn system(&self) -> &MassActionSystem {
        &self.system
    }

    pub fn u0(&self) -> &[f64] {
        &self.u0
    }

    pub fn tspan(&self) -> (f64, f64) {
        self.tspan
    }

    pub fn dimension(&self) -> usize {
        self.u0.len()
    }

    /// Initial state keyed by place name.
    pub fn initial_state_map(&self) -> HashMap<String, f64> {
        self.labels.iter().cloned().zip(self.u0.iter().copied()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> Network {
        let mut net = Network::new();
        net.add_place("A", 10.0, Some(20.0)).expect("place");
        net.add_place("B", 0.0, None).expect("place");
        net.add_transition("t").expect("transition");
        net.add_arc("A", "t", 1.0).add_arc("t", "B", 1.0);
        net
    }

    #[test]
    fn new_overrides_declared_initial_amounts() {
        let net = network();
        let initial = HashMap::from([("B".to_string(), 2.5)]);
        let rates = HashMap::from([("t".to_string(), 0.1)]);
        let problem = Problem::new(&net, &initial, (0.0, 5.0), &rates).expect("problem");
        assert_eq!(problem.u0(), &[10.0, 2.5]);
        assert_eq!(problem.labels(), &["A".to_string(), "B".to_string()]);
        assert_eq!(problem.place_index("B"), Some(1));
        assert_eq!(problem.rates(), &[0.1]);
        assert_eq!(problem.capacities(), &[Some(20.0), None]);
        assert_eq!(problem.initial_state_map()["A"], 10.0);
    }

    #[test]
    fn new_fails_fast_on_configuration_errors() {
        let net = network();
        let none = HashMap::new();

        let initial = HashMap::from([("Z".to_string(), 1.0)]);
        assert_eq!(
            Problem::new(&net, &initial, (0.0, 1.0), &none).expect_err("unknown place"),
            Error::UnknownPlace("Z".into())
        );

        assert!(matches!(
            Problem::from_network(&net, (1.0, 0.0), &none).expect_err("reversed span"),
            Error::InvalidTimeSpan { .. }
        ));

        let initial = HashMap::from([("A".to_string(), f64::INFINITY)]);
        assert!(matches!(
            Problem::new(&net, &initial, (0.0, 1.0), &none).expect_err("infinite"),
            Error::InvalidInitialState { .. }
        ));

        let mut dangling = network();
        dangling.add_arc("t", "ghost", 1.0);
        assert!(matches!(
            Problem::from_network(&dangling, (0.0, 1.0), &none).expect_err("dangling"),
            Error::DanglingArc { .. }
        ));
    }

    #[test]
    fn from_dense_checks_lengths() {
        let net = network();
        assert_eq!(
            Problem::from_dense(&net, vec![1.0], (0.0, 1.0), vec![1.0]).expect_err("short"),
            Error::DimensionMismatch {
                expected: 2,
                got: 1
            }
        );
        assert!(matches!(
            Problem::from_dense(&net, vec![1.0, 0.0], (0.0, 1.0), vec![]).expect_err("rates"),
            Error::DimensionMismatch { .. }
        ));
    }
}

//! Mass-action kinetics compiler.
//!
//! Turns a [`Network`] plus per-transition rate constants into a
//! [`MassActionSystem`], a vector field over dense place-indexed state
//! vectors. Arc endpoints are resolved once here, so evaluating the
//! derivative costs O(total arcs) with no name lookups.
//!
//! Flux through a transition is `rate * Π u[input]`, taking one factor per
//! input arc. The flux is forced to zero when any input value is `<= 0`, or
//! when an inhibiting place holds at least its arc weight.

use std::collections::HashMap;

use log::debug;

use crate::error::{Error, Result};
use crate::net::{Idx, Network, NodeRef, TransitionId};
use crate::traits::{DynamicalSystem, JacobianSystem, Scalar};

/// Rate assumed for transitions missing from the rate map.
pub const DEFAULT_RATE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
struct ArcRef {
    place: usize,
    weight: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct TransitionFlux {
    rate: f64,
    inputs: Vec<ArcRef>,
    outputs: Vec<ArcRef>,
    inhibitors: Vec<ArcRef>,
}

impl TransitionFlux {
    fn flux<T: Scalar>(&self, u: &[T]) -> T {
        for inh in &self.inhibitors {
            if u[inh.place] >= lift::<T>(inh.weight) {
                return T::zero();
            }
        }
        let mut flux = lift::<T>(self.rate);
        for input in &self.inputs {
            let value = u[input.place];
            if value <= T::zero() {
                return T::zero();
            }
            flux = flux * value;
        }
        flux
    }

    fn is_active(&self, u: &[f64]) -> bool {
        self.inhibitors.iter().all(|inh| u[inh.place] < inh.weight)
            && self.inputs.iter().all(|input| u[input.place] > 0.0)
    }
}

fn lift<T: Scalar>(value: f64) -> T {
    T::from_f64(value).unwrap_or_else(T::nan)
}

/// Compiled mass-action vector field for one network and rate assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct MassActionSystem {
    dimension: usize,
    transitions: Vec<TransitionFlux>,
}

impl MassActionSystem {
    /// Compiles `network` with one rate per transition, indexed by `TransitionId`.
    pub fn compile(network: &Network, rates: &[f64]) -> Result<Self> {
        let transition_count = network.transitions().len();
        if rates.len() != transition_count {
            return Err(Error::DimensionMismatch {
                expected: transition_count,
                got: rates.len(),
            });
        }

        let mut transitions: Vec<TransitionFlux> = rates
            .iter()
            .map(|&rate| TransitionFlux {
                rate,
                inputs: Vec::new(),
                outputs: Vec::new(),
                inhibitors: Vec::new(),
            })
            .collect();

        for arc in network.arcs() {
            let dangling = || Error::DanglingArc {
                from: arc.source.clone(),
                to: arc.target.clone(),
            };
            let invalid = || Error::InvalidArc {
                from: arc.source.clone(),
                to: arc.target.clone(),
            };
            let source = network.node(&arc.source).ok_or_else(dangling)?;
            let target = network.node(&arc.target).ok_or_else(dangling)?;
            let weight = arc.weight.weight_sum();

            match (source, target, arc.inhibit) {
                (NodeRef::Place(p), NodeRef::Transition(t), false) => {
                    transitions[t.index()].inputs.push(ArcRef {
                        place: p.index(),
                        weight,
                    });
                }
                (NodeRef::Place(p), NodeRef::Transition(t), true) => {
                    transitions[t.index()].inhibitors.push(ArcRef {
                        place: p.index(),
                        weight,
                    });
                }
                (NodeRef::Transition(t), NodeRef::Place(p), false) => {
                    transitions[t.index()].outputs.push(ArcRef {
                        place: p.index(),
                        weight,
                    });
                }
                _ => return Err(invalid()),
            }
        }

        debug!(
            "compiled mass-action system: {} places, {} transitions, {} arcs",
            network.places().len(),
            transition_count,
            network.arcs().len()
        );

        Ok(Self {
            dimension: network.places().len(),
            transitions,
        })
    }

    /// Per-transition flux at state `u`, indexed by `TransitionId`.
    pub fn fluxes(&self, u: &[f64]) -> Vec<f64> {
        self.transitions.iter().map(|tr| tr.flux(u)).collect()
    }

    pub fn transition_count(&self) -> usize {
        self.transitions.len()
    }
}

impl<T: Scalar> DynamicalSystem<T> for MassActionSystem {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn apply(&self, _t: T, x: &[T], out: &mut [T]) {
        for slot in out.iter_mut() {
            *slot = T::zero();
        }
        for tr in &self.transitions {
            let flux = tr.flux(x);
            if flux == T::zero() {
                continue;
            }
            for input in &tr.inputs {
                out[input.place] = out[input.place] - flux * lift::<T>(input.weight);
            }
            for output in &tr.outputs {
                out[output.place] = out[output.place] + flux * lift::<T>(output.weight);
            }
        }
    }
}

impl JacobianSystem for MassActionSystem {
    fn jacobian(&self, _t: f64, x: &[f64], out: &mut [f64]) {
        let n = self.dimension;
        out.iter_mut().for_each(|v| *v = 0.0);
        for tr in &self.transitions {
            if !tr.is_active(x) {
                continue;
            }
            for (j, wrt) in tr.inputs.iter().enumerate() {
                let partial = tr
                    .inputs
                    .iter()
                    .enumerate()
                    .filter(|(k, _)| *k != j)
                    .fold(tr.rate, |acc, (_, other)| acc * x[other.place]);
                for input in &tr.inputs {
                    out[input.place * n + wrt.place] -= partial * input.weight;
                }
                for output in &tr.outputs {
                    out[output.place * n + wrt.place] += partial * output.weight;
                }
            }
        }
    }
}

/// Resolves a name-keyed rate map into a dense per-transition vector.
///
/// Transitions absent from the map run at [`DEFAULT_RATE`].
pub fn resolve_rates(network: &Network, rates: &HashMap<String, f64>) -> Result<Vec<f64>> {
    let mut dense = vec![DEFAULT_RATE; network.transitions().len()];
    for (name, &rate) in rates {
        let id: TransitionId = network
            .transition_id(name)
            .ok_or_else(|| Error::UnknownTransition(name.clone()))?;
        if !rate.is_finite() || rate < 0.0 {
            return Err(Error::InvalidRate {
                transition: name.clone(),
                rate,
            });
        }
        dense[id.index()] = rate;
    }
    Ok(dense)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::ArcWeight;
    use crate::traits::finite_difference_jacobian;

    fn decay_network() -> Network {
        let mut net = Network::new();
        net.add_place("A", 10.0, None).expect("place");
        net.add_place("B", 0.0, None).expect("place");
        net.add_transition("convert").expect("transition");
        net.add_arc("A", "convert", 1.0).add_arc("convert", "B", 1.0);
        net
    }

    fn dimerization_network() -> Network {
        let mut net = Network::new();
        net.add_place("M", 4.0, None).expect("place");
        net.add_place("N", 3.0, None).expect("place");
        net.add_place("D", 0.0, None).expect("place");
        net.add_transition("bind").expect("transition");
        net.add_transition("split").expect("transition");
        net.add_arc("M", "bind", 1.0)
            .add_arc("N", "bind", 1.0)
            .add_arc("bind", "D", 2.0)
            .add_arc("D", "split", 1.0)
            .add_arc("split", "M", 1.0);
        net
    }

    #[test]
    fn apply_matches_mass_action_by_hand() {
        let net = decay_network();
        let system = MassActionSystem::compile(&net, &[0.5]).expect("compile");
        let mut du = vec![0.0; 2];
        system.apply(0.0, &[10.0, 0.0], &mut du);
        assert_eq!(du, vec![-5.0, 5.0]);
    }

    #[test]
    fn flux_uses_product_of_all_inputs_and_output_weights() {
        let net = dimerization_network();
        let system = MassActionSystem::compile(&net, &[0.1, 2.0]).expect("compile");
        let u = [4.0, 3.0, 0.5];
        let mut du = vec![0.0f64; 3];
        system.apply(0.0, &u, &mut du);
        // bind flux = 0.1 * 4 * 3 = 1.2, split flux = 2.0 * 0.5 = 1.0
        assert!((du[0] - (-1.2 + 1.0)).abs() < 1e-12);
        assert!((du[1] + 1.2).abs() < 1e-12);
        assert!((du[2] - (2.4 - 1.0)).abs() < 1e-12);
        assert_eq!(system.fluxes(&u), vec![0.1 * 4.0 * 3.0, 1.0]);
    }

    #[test]
    fn nonpositive_input_zeroes_flux() {
        let net = decay_network();
        let system = MassActionSystem::compile(&net, &[1.0]).expect("compile");
        let mut du = vec![1.0; 2];
        system.apply(0.0, &[-0.5, 3.0], &mut du);
        assert_eq!(du, vec![0.0, 0.0]);
        system.apply(0.0, &[0.0, 3.0], &mut du);
        assert_eq!(du, vec![0.0, 0.0]);
    }

    #[test]
    fn source_transition_without_inputs_runs_at_rate() {
        let mut net = Network::new();
        net.add_place("P", 0.0, None).expect("place");
        net.add_transition("spawn").expect("transition");
        net.add_arc("spawn", "P", 3.0);
        let system = MassActionSystem::compile(&net, &[0.25]).expect("compile");
        let mut du = vec![0.0];
        system.apply(0.0, &[7.0], &mut du);
        assert_eq!(du, vec![0.75]);
    }

    #[test]
    fn inhibitor_gates_flux_at_threshold() {
        let mut net = decay_network();
        net.add_place("Stop", 0.0, None).expect("place");
        net.add_inhibitor_arc("Stop", "convert", 2.0);
        let system = MassActionSystem::compile(&net, &[1.0]).expect("compile");
        let mut du = vec![0.0; 3];

        system.apply(0.0, &[1.0, 0.0, 1.9], &mut du);
        assert_eq!(du, vec![-1.0, 1.0, 0.0]);

        system.apply(0.0, &[1.0, 0.0, 2.0], &mut du);
        assert_eq!(du, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn colored_arcs_contribute_their_component_sum() {
        let mut net = Network::new();
        net.add_place("R", 2.0, None).expect("place");
        net.add_place("G", 0.0, None).expect("place");
        net.add_transition("paint").expect("transition");
        net.add_arc("R", "paint", ArcWeight::Colored(vec![1.0, 0.5]))
            .add_arc("paint", "G", ArcWeight::Colored(vec![2.0, 0.0, 1.0]));
        let system = MassActionSystem::compile(&net, &[0.5]).expect("compile");
        assert_eq!(system.transition_count(), 1);

        // flux = 0.5 * R = 1.0; consumes 1.5 per firing, produces 3.0.
        let mut du = vec![0.0f64; 2];
        system.apply(0.0, &[2.0, 0.0], &mut du);
        assert!((du[0] + 1.5).abs() < 1e-12);
        assert!((du[1] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn apply_is_generic_over_scalar() {
        let net = decay_network();
        let system = MassActionSystem::compile(&net, &[0.5]).expect("compile");
        let mut du = vec![0.0f32; 2];
        system.apply(0.0f32, &[2.0f32, 0.0], &mut du);
        assert_eq!(du, vec![-1.0f32, 1.0]);
    }

    #[test]
    fn analytic_jacobian_matches_finite_differences() {
        let net = dimerization_network();
        let system = MassActionSystem::compile(&net, &[0.1, 2.0]).expect("compile");
        let u = [4.0, 3.0, 0.5];
        let mut analytic = vec![0.0; 9];
        let mut numeric = vec![0.0; 9];
        system.jacobian(0.0, &u, &mut analytic);
        finite_difference_jacobian(&system, 0.0, &u, &mut numeric);
        for (a, n) in analytic.iter().zip(&numeric) {
            assert!((a - n).abs() < 1e-5, "analytic {a} vs numeric {n}");
        }
    }

    #[test]
    fn compile_rejects_dangling_and_same_kind_arcs() {
        let mut net = decay_network();
        net.add_arc("A", "missing", 1.0);
        let err = MassActionSystem::compile(&net, &[1.0]).expect_err("dangling");
        assert!(matches!(err, Error::DanglingArc { .. }));
        assert_eq!(
            err.to_string(),
            "arc A -> missing references a node that does not exist"
        );

        let mut net = decay_network();
        net.add_arc("A", "B", 1.0);
        let err = MassActionSystem::compile(&net, &[1.0]).expect_err("place to place");
        assert!(matches!(err, Error::InvalidArc { .. }));

        let mut net = decay_network();
        net.add_inhibitor_arc("convert", "B", 1.0);
        let err = MassActionSystem::compile(&net, &[1.0]).expect_err("inhibitor output");
        assert!(matches!(err, Error::InvalidArc { .. }));
    }

    #[test]
    fn resolve_rates_defaults_and_validates() {
        let net = dimerization_network();
        let mut rates = HashMap::new();
        rates.insert("split".to_string(), 0.3);
        assert_eq!(resolve_rates(&net, &rates).expect("rates"), vec![DEFAULT_RATE, 0.3]);

        rates.insert("nope".to_string(), 1.0);
        assert_eq!(
            resolve_rates(&net, &rates).expect_err("unknown"),
            Error::UnknownTransition("nope".into())
        );

        let mut rates = HashMap::new();
        rates.insert("bind".to_string(), -1.0);
        assert!(matches!(
            resolve_rates(&net, &rates).expect_err("negative"),
            Error::InvalidRate { .. }
        ));
    }
}

#![allow(dead_code)]

use std::collections::HashMap;

use tokenflow_core::{Network, Problem};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn rates(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
    pairs.iter().map(|(name, k)| (name.to_string(), *k)).collect()
}

/// `A -> B` through a single transition `t`.
pub fn decay_network(a0: f64) -> Network {
    let mut net = Network::new();
    net.add_place("A", a0, None).expect("place A");
    net.add_place("B", 0.0, None).expect("place B");
    net.add_transition("t").expect("transition t");
    net.add_arc("A", "t", 1.0).add_arc("t", "B", 1.0);
    net
}

/// `A <-> B` through `fwd` and `bwd`.
pub fn reversible_network(a0: f64, b0: f64) -> Network {
    let mut net = Network::new();
    net.add_place("A", a0, None).expect("place A");
    net.add_place("B", b0, None).expect("place B");
    net.add_transition("fwd").expect("transition fwd");
    net.add_transition("bwd").expect("transition bwd");
    net.add_arc("A", "fwd", 1.0)
        .add_arc("fwd", "B", 1.0)
        .add_arc("B", "bwd", 1.0)
        .add_arc("bwd", "A", 1.0);
    net
}

/// Two independent decays, `A -> B` via `fast` and `C -> D` via `slow`.
pub fn two_timescale_network() -> Network {
    let mut net = Network::new();
    for place in ["A", "B", "C", "D"] {
        let initial = if place == "A" || place == "C" { 1.0 } else { 0.0 };
        net.add_place(place, initial, None).expect("place");
    }
    net.add_transition("fast").expect("transition fast");
    net.add_transition("slow").expect("transition slow");
    net.add_arc("A", "fast", 1.0)
        .add_arc("fast", "B", 1.0)
        .add_arc("C", "slow", 1.0)
        .add_arc("slow", "D", 1.0);
    net
}

pub fn decay_problem(k: f64, tf: f64) -> Problem {
    Problem::from_network(&decay_network(10.0), (0.0, tf), &rates(&[("t", k)])).expect("problem")
}

//! Batched equilibrium search, so the host can keep its event loop responsive.

use std::collections::HashMap;

use anyhow::anyhow;
use js_sys::Float64Array;
use serde::{Deserialize, Serialize};
use tokenflow_core::{
    EquilibriumDetector, EquilibriumOptions, EquilibriumResult, Integrator, MassActionSystem,
    Problem, SolveStats,
};
use wasm_bindgen::prelude::*;

use crate::simulation::{parse_map, parse_network, parse_options, plan_run, OptionsInput};
use crate::{serialize, to_js_error};

/// Progress payload for the stepped equilibrium search.
#[derive(Debug, PartialEq, Serialize)]
struct EquilibriumProgress {
    done: bool,
    time: f64,
    steps: usize,
    rejected: usize,
    last_change: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EquilibriumInput {
    preset: Option<String>,
    tolerance: Option<f64>,
    consecutive_steps: Option<usize>,
    min_time: Option<f64>,
    check_interval: Option<usize>,
}

impl EquilibriumInput {
    fn resolve(&self) -> anyhow::Result<EquilibriumOptions> {
        let mut options = match self.preset.as_deref() {
            None | Some("default") => EquilibriumOptions::default(),
            Some("fast") => EquilibriumOptions::fast(),
            Some("strict") => EquilibriumOptions::strict(),
            Some(other) => return Err(anyhow!("unknown equilibrium preset '{other}'")),
        };
        if let Some(tolerance) = self.tolerance {
            options.tolerance = tolerance;
        }
        if let Some(steps) = self.consecutive_steps {
            options.consecutive_steps = steps;
        }
        if let Some(min_time) = self.min_time {
            options.min_time = min_time;
        }
        if let Some(interval) = self.check_interval {
            options.check_interval = interval;
        }
        options.validate()?;
        Ok(options)
    }
}

type OwnedDetector = EquilibriumDetector<'static, MassActionSystem>;

fn start_detector(
    problem: &Problem,
    method: &str,
    input: &OptionsInput,
    eq_options: EquilibriumOptions,
) -> anyhow::Result<OwnedDetector> {
    let (method, options) = plan_run(method, problem, input)?;
    let integrator = Integrator::new(
        problem.system().clone(),
        method,
        problem.u0(),
        problem.tspan(),
        options,
    )?;
    Ok(EquilibriumDetector::new(integrator, problem.labels().to_vec(), eq_options)?)
}

#[wasm_bindgen]
pub struct WasmEquilibriumRunner {
    detector: Option<OwnedDetector>,
    labels: Vec<String>,
    result: Option<EquilibriumResult>,
    final_stats: SolveStats,
}

impl WasmEquilibriumRunner {
    fn start(
        problem: &Problem,
        method: &str,
        input: &OptionsInput,
        eq_options: EquilibriumOptions,
    ) -> anyhow::Result<Self> {
        let detector = start_detector(problem, method, input, eq_options)?;
        Ok(WasmEquilibriumRunner {
            detector: Some(detector),
            labels: problem.labels().to_vec(),
            result: None,
            final_stats: SolveStats::default(),
        })
    }

    fn conclude(&mut self) {
        if let Some(detector) = self.detector.take() {
            let (solution, result) = detector.finish();
            self.final_stats = solution.stats;
            self.result = Some(result);
        }
    }

    fn advance(&mut self, batch_size: usize) -> anyhow::Result<()> {
        if let Some(detector) = self.detector.as_mut() {
            if detector.run_steps(batch_size)?.is_some() {
                self.conclude();
            }
        }
        Ok(())
    }

    fn progress(&self) -> anyhow::Result<EquilibriumProgress> {
        match (&self.detector, &self.result) {
            (_, Some(result)) => Ok(EquilibriumProgress {
                done: true,
                time: result.time,
                steps: result.steps,
                rejected: self.final_stats.rejected,
                last_change: Some(result.max_change),
            }),
            (Some(detector), None) => {
                let stats = detector.integrator().stats();
                Ok(EquilibriumProgress {
                    done: false,
                    time: detector.integrator().t(),
                    steps: stats.accepted,
                    rejected: stats.rejected,
                    last_change: detector.last_change(),
                })
            }
            (None, None) => Err(anyhow!("Runner not initialized")),
        }
    }

    fn finished(&self) -> Result<&EquilibriumResult, JsValue> {
        self.result
            .as_ref()
            .ok_or_else(|| JsValue::from_str("Equilibrium search has not finished yet."))
    }
}

#[wasm_bindgen]
impl WasmEquilibriumRunner {
    #[wasm_bindgen(constructor)]
    pub fn new(
        network_json: &str,
        initial_state: JsValue,
        rates: JsValue,
        tf: f64,
        method: &str,
        options: JsValue,
        equilibrium_options: JsValue,
    ) -> Result<WasmEquilibriumRunner, JsValue> {
        console_error_panic_hook::set_once();

        let network = parse_network(network_json).map_err(to_js_error)?;
        let initial_state: HashMap<String, f64> =
            parse_map(initial_state, "initial state").map_err(to_js_error)?;
        let rates = parse_map(rates, "rates").map_err(to_js_error)?;
        let problem = Problem::new(&network, &initial_state, (0.0, tf), &rates)
            .map_err(|e| to_js_error(e.into()))?;
        let eq_input: EquilibriumInput = if equilibrium_options.is_undefined() || equilibrium_options.is_null() {
            EquilibriumInput::default()
        } else {
            serde_wasm_bindgen::from_value(equilibrium_options)
                .map_err(|e| JsValue::from_str(&format!("invalid equilibrium options: {}", e)))?
        };
        let eq_options = eq_input.resolve().map_err(to_js_error)?;
        let input = parse_options(options).map_err(to_js_error)?;
        Self::start(&problem, method, &input, eq_options).map_err(to_js_error)
    }

    pub fn is_done(&self) -> bool {
        self.result.is_some()
    }

    /// Performs up to `batch_size` step attempts and reports progress.
    pub fn run_steps(&mut self, batch_size: u32) -> Result<JsValue, JsValue> {
        self.advance(batch_size as usize).map_err(to_js_error)?;
        self.get_progress()
    }

    pub fn get_progress(&self) -> Result<JsValue, JsValue> {
        let progress = self.progress().map_err(to_js_error)?;
        serialize(&progress)
    }

    pub fn get_result(&self) -> Result<JsValue, JsValue> {
        serialize(self.finished()?)
    }

    /// Final state in place order, as a typed array.
    pub fn get_final_state(&self) -> Result<Float64Array, JsValue> {
        Ok(Float64Array::from(self.finished()?.state.as_slice()))
    }

    /// Final state keyed by place name.
    pub fn get_state_map(&self) -> Result<JsValue, JsValue> {
        let result = self.finished()?;
        let map: HashMap<&str, f64> = self
            .labels
            .iter()
            .map(String::as_str)
            .zip(result.state.iter().copied())
            .collect();
        serialize(&map)
    }
}


#[cfg(all(test, target_arch = "wasm32"))]
mod wasm_tests {
    use super::*;
    use wasm_bindgen_test::wasm_bindgen_test;

    const NETWORK: &str = r#"{
        "places": [{"id": "A", "initial": 4.0}, {"id": "B"}],
        "transitions": [{"id": "fwd"}, {"id": "bwd"}],
        "arcs": [
            {"source": "A", "target": "fwd"},
            {"source": "fwd", "target": "B"},
            {"source": "B", "target": "bwd"},
            {"source": "bwd", "target": "A"}
        ]
    }"#;

    #[wasm_bindgen_test]
    fn runner_rejects_malformed_network() {
        let result = WasmEquilibriumRunner::new(
            "{",
            JsValue::UNDEFINED,
            JsValue::UNDEFINED,
            10.0,
            "tsit5",
            JsValue::UNDEFINED,
            JsValue::UNDEFINED,
        );
        let message = result.err().and_then(|err| err.as_string()).unwrap_or_default();
        assert!(message.contains("invalid network JSON"), "{message}");
    }

    #[wasm_bindgen_test]
    fn runner_returns_final_state_array() {
        let mut runner = WasmEquilibriumRunner::new(
            NETWORK,
            JsValue::UNDEFINED,
            JsValue::UNDEFINED,
            100.0,
            "auto",
            JsValue::UNDEFINED,
            JsValue::UNDEFINED,
        )
        .expect("runner");
        assert!(runner.get_final_state().is_err());
        while !runner.is_done() {
            runner.run_steps(50).expect("batch");
        }
        let state = runner.get_final_state().expect("final state").to_vec();
        assert_eq!(state.len(), 2);
        assert!((state[0] - 2.0).abs() < 1e-3);
        assert!((state[0] + state[1] - 4.0).abs() < 1e-6);
    }
}

//! One-shot simulation wrapper.

use std::collections::HashMap;

use anyhow::{anyhow, Context};
use serde::Deserialize;
use tokenflow_core::{
    select_method, solve, solve_auto, stiffness_ratio, Method, Network, NonlinearSolver, Problem,
    Solution, SolverOptions,
};
use wasm_bindgen::prelude::*;

use crate::{serialize, to_js_error};

pub(crate) fn parse_network(json: &str) -> anyhow::Result<Network> {
    serde_json::from_str(json).context("invalid network JSON")
}

pub(crate) fn parse_map(value: JsValue, what: &str) -> anyhow::Result<HashMap<String, f64>> {
    if value.is_undefined() || value.is_null() {
        return Ok(HashMap::new());
    }
    serde_wasm_bindgen::from_value(value).map_err(|e| anyhow!("invalid {what}: {e}"))
}

/// Solver settings accepted from JS: a preset name plus field overrides.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct OptionsInput {
    preset: Option<String>,
    dt: Option<f64>,
    dtmin: Option<f64>,
    dtmax: Option<f64>,
    abstol: Option<f64>,
    reltol: Option<f64>,
    maxiters: Option<usize>,
    adaptive: Option<bool>,
    nonlinear: Option<NonlinearSolver>,
}

impl OptionsInput {
    /// Overrides applied to the named preset, or to the default options.
    pub(crate) fn resolve(&self) -> anyhow::Result<SolverOptions> {
        self.resolve_over(SolverOptions::default())
    }

    /// Like [`OptionsInput::resolve`], but falls back to the stiff preset.
    pub(crate) fn resolve_stiff(&self) -> anyhow::Result<SolverOptions> {
        self.resolve_over(SolverOptions::stiff())
    }

    fn resolve_over(&self, fallback: SolverOptions) -> anyhow::Result<SolverOptions> {
        let mut options = match self.preset.as_deref() {
            Some(name) => SolverOptions::from_preset(name)
                .ok_or_else(|| anyhow!("unknown options preset '{name}'"))?,
            None => fallback,
        };
        if let Some(dt) = self.dt {
            options.dt = dt;
        }
        if let Some(dtmin) = self.dtmin {
            options.dtmin = dtmin;
        }
        if let Some(dtmax) = self.dtmax {
            options.dtmax = dtmax;
        }
        if let Some(abstol) = self.abstol {
            options.abstol = abstol;
        }
        if let Some(reltol) = self.reltol {
            options.reltol = reltol;
        }
        if let Some(maxiters) = self.maxiters {
            options.maxiters = maxiters;
        }
        if let Some(adaptive) = self.adaptive {
            options.adaptive = adaptive;
        }
        if let Some(nonlinear) = self.nonlinear {
            options.nonlinear = nonlinear;
        }
        options.validate()?;
        Ok(options)
    }
}

pub(crate) fn parse_options(value: JsValue) -> anyhow::Result<OptionsInput> {
    if value.is_undefined() || value.is_null() {
        return Ok(OptionsInput::default());
    }
    serde_wasm_bindgen::from_value(value).map_err(|e| anyhow!("invalid solver options: {e}"))
}

fn is_auto(name: &str) -> bool {
    name.is_empty() || name == "auto"
}

/// Method and options for a run. `"auto"` defers to the stiffness heuristic
/// and gives implicit picks the stiff preset underneath the caller's overrides.
pub(crate) fn plan_run(
    name: &str,
    problem: &Problem,
    input: &OptionsInput,
) -> anyhow::Result<(Method, SolverOptions)> {
    if is_auto(name) {
        let method = select_method(problem);
        let options = if method.is_implicit() {
            input.resolve_stiff()?
        } else {
            input.resolve()?
        };
        return Ok((method, options));
    }
    let method = Method::from_name(name).ok_or_else(|| anyhow!("unknown method '{name}'"))?;
    Ok((method, input.resolve()?))
}

pub(crate) fn run_simulation(problem: &Problem, name: &str, input: &OptionsInput) -> anyhow::Result<Solution> {
    if is_auto(name) {
        let (_, solution) = solve_auto(problem, &input.resolve()?, &input.resolve_stiff()?)
            .context("auto-selected integration failed")?;
        return Ok(solution);
    }
    let (method, options) = plan_run(name, problem, input)?;
    solve(problem, method, &options).with_context(|| format!("{} integration failed", method.name()))
}

#[wasm_bindgen]
pub struct WasmSimulation {
    network: Network,
    initial_state: HashMap<String, f64>,
    rates: HashMap<String, f64>,
}

impl WasmSimulation {
    fn problem(&self, t0: f64, tf: f64) -> anyhow::Result<Problem> {
        Ok(Problem::new(&self.network, &self.initial_state, (t0, tf), &self.rates)?)
    }
}

#[wasm_bindgen]
impl WasmSimulation {
    #[wasm_bindgen(constructor)]
    pub fn new(network_json: &str, initial_state: JsValue, rates: JsValue) -> Result<WasmSimulation, JsValue> {
        console_error_panic_hook::set_once();
        let network = parse_network(network_json).map_err(to_js_error)?;
        let initial_state = parse_map(initial_state, "initial state").map_err(to_js_error)?;
        let rates = parse_map(rates, "rates").map_err(to_js_error)?;
        // Surface unknown names and bad arcs at construction.
        Problem::new(&network, &initial_state, (0.0, 1.0), &rates)
            .map_err(|e| to_js_error(e.into()))?;
        Ok(WasmSimulation {
            network,
            initial_state,
            rates,
        })
    }

    pub fn place_names(&self) -> Vec<String> {
        self.network.places().iter().map(|p| p.id.clone()).collect()
    }

    /// Integrates over `[t0, tf]` and returns the serialized solution.
    pub fn solve(&self, method: &str, options: JsValue, t0: f64, tf: f64) -> Result<JsValue, JsValue> {
        let problem = self.problem(t0, tf).map_err(to_js_error)?;
        let input = parse_options(options).map_err(to_js_error)?;
        let solution = run_simulation(&problem, method, &input).map_err(to_js_error)?;
        serialize(&solution)
    }

    pub fn stiffness_ratio(&self) -> Result<f64, JsValue> {
        let problem = self.problem(0.0, 1.0).map_err(to_js_error)?;
        Ok(stiffness_ratio(problem.system(), 0.0, problem.u0()))
    }

    pub fn set_rate(&mut self, transition: &str, rate: f64) -> Result<(), JsValue> {
        if self.network.transition_id(transition).is_none() {
            return Err(JsValue::from_str(&format!("unknown transition '{transition}'")));
        }
        self.rates.insert(transition.to_string(), rate);
        Ok(())
    }

    pub fn set_initial(&mut self, place: &str, value: f64) -> Result<(), JsValue> {
        if self.network.place_id(place).is_none() {
            return Err(JsValue::from_str(&format!("unknown place '{place}'")));
        }
        self.initial_state.insert(place.to_string(), value);
        Ok(())
    }
}

//! WebAssembly bindings for `tokenflow_core`.
//!
//! Networks cross the boundary as JSON text; initial states and rates as
//! plain `{ name: number }` objects. Results come back as serialized JS values.

mod equilibrium;
mod simulation;

pub use equilibrium::WasmEquilibriumRunner;
pub use simulation::WasmSimulation;

use wasm_bindgen::prelude::*;

pub(crate) fn to_js_error(err: anyhow::Error) -> JsValue {
    JsValue::from_str(&format!("{err:#}"))
}

pub(crate) fn serialize<T: serde::Serialize>(value: &T) -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(value)
        .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

/// Names of all built-in integration methods.
#[wasm_bindgen]
pub fn available_methods() -> Vec<String> {
    tokenflow_core::Method::ALL
        .iter()
        .map(|method| method.name().to_string())
        .collect()
}

//! Integration settings and named presets.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How implicit methods solve their stage equations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonlinearSolver {
    /// Picard iteration `u <- u_n + h f(u)`.
    #[default]
    FixedPoint,
    /// Newton iteration with the system Jacobian.
    Newton,
}

/// Settings controlling the time-marching loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverOptions {
    /// Initial step size (the fixed step when `adaptive` is false).
    pub dt: f64,
    pub dtmin: f64,
    pub dtmax: f64,
    pub abstol: f64,
    pub reltol: f64,
    /// Maximum number of accepted steps.
    pub maxiters: usize,
    pub adaptive: bool,
    #[serde(default)]
    pub nonlinear: NonlinearSolver,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            dt: 0.01,
            dtmin: 1e-6,
            dtmax: 0.1,
            abstol: 1e-6,
            reltol: 1e-3,
            maxiters: 100_000,
            adaptive: true,
            nonlinear: NonlinearSolver::FixedPoint,
        }
    }
}

impl SolverOptions {
    /// Loose tolerances and large steps for quick previews.
    pub fn fast() -> Self {
        Self {
            dt: 0.1,
            dtmin: 1e-4,
            dtmax: 1.0,
            abstol: 1e-2,
            reltol: 1e-2,
            maxiters: 1_000,
            ..Self::default()
        }
    }

    pub fn accurate() -> Self {
        Self {
            dt: 0.001,
            dtmin: 1e-8,
            dtmax: 0.1,
            abstol: 1e-9,
            reltol: 1e-6,
            maxiters: 1_000_000,
            ..Self::default()
        }
    }

    /// Small fixed steps for the implicit methods.
    pub fn stiff() -> Self {
        Self {
            dt: 1e-4,
            dtmin: 1e-10,
            dtmax: 0.01,
            abstol: 1e-8,
            reltol: 1e-5,
            maxiters: 1_000_000,
            adaptive: false,
            nonlinear: NonlinearSolver::Newton,
        }
    }

    /// Short horizon, coarse accuracy: scoring many candidate moves.
    pub fn game_ai() -> Self {
        Self {
            dt: 0.1,
            dtmin: 1e-3,
            dtmax: 1.0,
            abstol: 1e-2,
            reltol: 1e-2,
            maxiters: 500,
            ..Self::default()
        }
    }

    /// Compartmental epidemic models spanning hundreds of days.
    pub fn epidemic() -> Self {
        Self {
            dt: 0.1,
            dtmin: 1e-6,
            dtmax: 2.0,
            abstol: 1e-6,
            reltol: 1e-4,
            maxiters: 200_000,
            ..Self::default()
        }
    }

    /// Queue/throughput networks with moderate rates.
    pub fn workflow() -> Self {
        Self {
            dt: 0.05,
            dtmin: 1e-5,
            dtmax: 1.0,
            abstol: 1e-4,
            reltol: 1e-3,
            maxiters: 50_000,
            ..Self::default()
        }
    }

    /// Long horizons where the step must be allowed to grow large.
    pub fn long_run() -> Self {
        Self {
            dt: 0.1,
            dtmin: 1e-6,
            dtmax: 10.0,
            abstol: 1e-6,
            reltol: 1e-3,
            maxiters: 1_000_000,
            ..Self::default()
        }
    }

    pub fn from_preset(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Self::default()),
            "fast" => Some(Self::fast()),
            "accurate" => Some(Self::accurate()),
            "stiff" => Some(Self::stiff()),
            "game_ai" => Some(Self::game_ai()),
            "epidemic" => Some(Self::epidemic()),
            "workflow" => Some(Self::workflow()),
            "long_run" => Some(Self::long_run()),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let positive = |value: f64, name: &str| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(Error::InvalidOptions(format!(
                    "{name} must be finite and positive, got {value}"
                )))
            }
        };
        positive(self.dt, "dt")?;
        positive(self.dtmin, "dtmin")?;
        positive(self.dtmax, "dtmax")?;
        positive(self.abstol, "abstol")?;
        if !self.reltol.is_finite() || self.reltol < 0.0 {
            return Err(Error::InvalidOptions(format!(
                "reltol must be finite and nonnegative, got {}",
                self.reltol
            )));
        }
        if self.dtmin > self.dtmax {
            return Err(Error::InvalidOptions(format!(
                "dtmin ({}) exceeds dtmax ({})",
                self.dtmin, self.dtmax
            )));
        }
        if self.maxiters == 0 {
            return Err(Error::InvalidOptions("maxiters must be greater than zero".into()));
        }
        Ok(())
    }
}

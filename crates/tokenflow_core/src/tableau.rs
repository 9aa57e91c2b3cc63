//! Butcher tableaux and the closed set of integration methods.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Coefficients of an explicit Runge-Kutta method.
///
/// `a` is stored as ragged rows: row `i` holds `A[i][0..i]` and may be shorter
/// (trailing zeros omitted). `bhat` holds the error weights `b - b_embedded`;
/// an empty or all-zero `bhat` means the method has no error estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tableau {
    pub name: String,
    pub order: usize,
    pub c: Vec<f64>,
    pub a: Vec<Vec<f64>>,
    pub b: Vec<f64>,
    pub bhat: Vec<f64>,
}

impl Tableau {
    pub fn new(
        name: impl Into<String>,
        order: usize,
        c: Vec<f64>,
        a: Vec<Vec<f64>>,
        b: Vec<f64>,
        bhat: Vec<f64>,
    ) -> Result<Self> {
        let tableau = Self {
            name: name.into(),
            order,
            c,
            a,
            b,
            bhat,
        };
        tableau.validate()?;
        Ok(tableau)
    }

    pub fn stages(&self) -> usize {
        self.c.len()
    }

    /// True when the tableau carries a usable embedded error estimate.
    pub fn is_adaptive(&self) -> bool {
        self.bhat.iter().any(|&w| w != 0.0)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| Error::InvalidTableau {
            name: self.name.clone(),
            reason,
        };
        let s = self.c.len();
        if s == 0 {
            return Err(fail("tableau has no stages".into()));
        }
        if self.order == 0 {
            return Err(fail("order must be at least 1".into()));
        }
        if self.b.len() != s {
            return Err(fail(format!("len(b) = {} but {} stages", self.b.len(), s)));
        }
        if !self.bhat.is_empty() && self.bhat.len() != s {
            return Err(fail(format!(
                "len(bhat) = {} but {} stages",
                self.bhat.len(),
                s
            )));
        }
        if self.a.len() != s {
            return Err(fail(format!("A has {} rows but {} stages", self.a.len(), s)));
        }
        for (i, row) in self.a.iter().enumerate() {
            if row.len() > i {
                return Err(fail(format!(
                    "A row {i} has {} entries; explicit rows hold at most {i}",
                    row.len()
                )));
            }
        }
        let all = self.c.iter().chain(&self.b).chain(&self.bhat);
        if all.chain(self.a.iter().flatten()).any(|v| !v.is_finite()) {
            return Err(fail("coefficients must be finite".into()));
        }
        let weight_sum: f64 = self.b.iter().sum();
        if (weight_sum - 1.0).abs() > 1e-10 {
            return Err(fail(format!("weights sum to {weight_sum}, expected 1")));
        }
        Ok(())
    }
}

/// Every supported integration method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Tsitouras 5(4): fewest effective stages for a 5th-order pair.
    #[default]
    Tsit5,
    /// Dormand-Prince 5(4).
    DormandPrince5,
    /// Classical 4th-order Runge-Kutta, fixed step.
    Rk4,
    /// Improved Euler (Heun), fixed step.
    Heun,
    /// Explicit midpoint rule, fixed step.
    Midpoint,
    /// Bogacki-Shampine 3(2).
    BogackiShampine3,
    /// Implicit Euler.
    BackwardEuler,
    /// Trapezoidal + BDF2 two-stage L-stable method.
    TrBdf2,
}

impl Method {
    pub const ALL: [Method; 8] = [
        Method::Tsit5,
        Method::DormandPrince5,
        Method::Rk4,
        Method::Heun,
        Method::Midpoint,
        Method::BogackiShampine3,
        Method::BackwardEuler,
        Method::TrBdf2,
    ];

    /// Tableau for explicit methods; `None` for implicit ones.
    pub fn tableau(self) -> Option<&'static Tableau> {
        let registry = &*REGISTRY;
        match self {
            Method::Tsit5 => Some(&registry.tsit5),
            Method::DormandPrince5 => Some(&registry.dormand_prince5),
            Method::Rk4 => Some(&registry.rk4),
            Method::Heun => Some(&registry.heun),
            Method::Midpoint => Some(&registry.midpoint),
            Method::BogackiShampine3 => Some(&registry.bogacki_shampine3),
            Method::BackwardEuler | Method::TrBdf2 => None,
        }
    }

    pub fn is_implicit(self) -> bool {
        matches!(self, Method::BackwardEuler | Method::TrBdf2)
    }

    pub fn order(self) -> usize {
        match self {
            Method::BackwardEuler => 1,
            Method::TrBdf2 => 2,
            explicit => explicit.tableau().map_or(0, |t| t.order),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Method::Tsit5 => "tsit5",
            Method::DormandPrince5 => "dormand_prince5",
            Method::Rk4 => "rk4",
            Method::Heun => "heun",
            Method::Midpoint => "midpoint",
            Method::BogackiShampine3 => "bogacki_shampine3",
            Method::BackwardEuler => "backward_euler",
            Method::TrBdf2 => "tr_bdf2",
        }
    }

    pub fn from_name(name: &str) -> Option<Method> {
        let lowered = name.to_ascii_lowercase();
        match lowered.as_str() {
            "rk45" | "dp5" => Some(Method::DormandPrince5),
            "bs3" | "rk23" => Some(Method::BogackiShampine3),
            "euler_improved" | "improved_euler" => Some(Method::Heun),
            "implicit_euler" => Some(Method::BackwardEuler),
            "trbdf2" => Some(Method::TrBdf2),
            other => Method::ALL.into_iter().find(|m| m.name() == other),
        }
    }
}

struct Registry {
    tsit5: Tableau,
    dormand_prince5: Tableau,
    rk4: Tableau,
    heun: Tableau,
    midpoint: Tableau,
    bogacki_shampine3: Tableau,
}

// Built-in coefficients are validated on first use; a failure here is a bug
// in the constants below, not a runtime condition.
static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry {
        tsit5: tsit5(),
        dormand_prince5: dormand_prince5(),
        rk4: rk4(),
        heun: heun(),
        midpoint: midpoint(),
        bogacki_shampine3: bogacki_shampine3(),
    };
    for tableau in [
        &registry.tsit5,
        &registry.dormand_prince5,
        &registry.rk4,
        &registry.heun,
        &registry.midpoint,
        &registry.bogacki_shampine3,
    ] {
        if let Err(err) = tableau.validate() {
            panic!("built-in tableau failed validation: {err}");
        }
    }
    registry
});

fn raw(name: &str, order: usize, c: &[f64], a: &[&[f64]], b: &[f64], bhat: &[f64]) -> Tableau {
    Tableau {
        name: name.to_string(),
        order,
        c: c.to_vec(),
        a: a.iter().map(|row| row.to_vec()).collect(),
        b: b.to_vec(),
        bhat: bhat.to_vec(),
    }
}

fn tsit5() -> Tableau {
    raw(
        "tsit5",
        5,
        &[0.0, 0.161, 0.327, 0.9, 0.9800255409045097, 1.0, 1.0],
        &[
            &[],
            &[0.161],
            &[-0.008480655492356989, 0.335480655492357],
            &[2.898, -6.359447987781783, 4.361447987781783],
            &[
                5.325864858437957,
                -11.748883564062828,
                7.495539342889693,
                -0.09249506636030195,
            ],
            &[
                5.86145544294642,
                -12.92096931784711,
                8.159367898576159,
                -0.071584973281401,
                -0.02826857949054663,
            ],
            &[
                0.09646076681806523,
                0.01,
                0.4798896504144996,
                1.379008574103742,
                -3.290069515436099,
                2.324710524099774,
            ],
        ],
        &[
            0.09646076681806523,
            0.01,
            0.4798896504144996,
            1.379008574103742,
            -3.290069515436099,
            2.324710524099774,
            0.0,
        ],
        &[
            -0.00178001105222577714,
            -0.0008164344596567469,
            0.007880878010261995,
            -0.1447110071732629,
            0.5823571654525552,
            -0.45808210592918697,
            1.0 / 66.0,
        ],
    )
}

fn dormand_prince5() -> Tableau {
    raw(
        "dormand_prince5",
        5,
        &[0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0],
        &[
            &[],
            &[1.0 / 5.0],
            &[3.0 / 40.0, 9.0 / 40.0],
            &[44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0],
            &[19372.0 / 6561.0, -25360.0 / 2187.0, 64448.0 / 6561.0, -212.0 / 729.0],
            &[
                9017.0 / 3168.0,
                -355.0 / 33.0,
                46732.0 / 5247.0,
                49.0 / 176.0,
                -5103.0 / 18656.0,
            ],
            &[
                35.0 / 384.0,
                0.0,
                500.0 / 1113.0,
                125.0 / 192.0,
                -2187.0 / 6784.0,
                11.0 / 84.0,
            ],
        ],
        &[
            35.0 / 384.0,
            0.0,
            500.0 / 1113.0,
            125.0 / 192.0,
            -2187.0 / 6784.0,
            11.0 / 84.0,
            0.0,
        ],
        &[
            71.0 / 57600.0,
            0.0,
            -71.0 / 16695.0,
            71.0 / 1920.0,
            -17253.0 / 339200.0,
            22.0 / 525.0,
            -1.0 / 40.0,
        ],
    )
}

fn rk4() -> Tableau {
    raw(
        "rk4",
        4,
        &[0.0, 0.5, 0.5, 1.0],
        &[&[], &[0.5], &[0.0, 0.5], &[0.0, 0.0, 1.0]],
        &[1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
        &[],
    )
}

fn heun() -> Tableau {
    raw("heun", 2, &[0.0, 1.0], &[&[], &[1.0]], &[0.5, 0.5], &[])
}

fn midpoint() -> Tableau {
    raw("midpoint", 2, &[0.0, 0.5], &[&[], &[0.5]], &[0.0, 1.0], &[])
}

fn bogacki_shampine3() -> Tableau {
    raw(
        "bogacki_shampine3",
        3,
        &[0.0, 0.5, 0.75, 1.0],
        &[&[], &[0.5], &[0.0, 0.75], &[2.0 / 9.0, 1.0 / 3.0, 4.0 / 9.0]],
        &[2.0 / 9.0, 1.0 / 3.0, 4.0 / 9.0, 0.0],
        &[-5.0 / 72.0, 1.0 / 12.0, 1.0 / 9.0, -1.0 / 8.0],
    )
}

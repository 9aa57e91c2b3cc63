use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as token quantities.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// An autonomous or time-dependent vector field `du/dt = f(t, u)`.
pub trait DynamicalSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// t: current time
    /// x: current state
    /// out: buffer to write du/dt into
    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}

impl<T: Scalar, S: DynamicalSystem<T> + ?Sized> DynamicalSystem<T> for &S {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn apply(&self, t: T, x: &[T], out: &mut [T]) {
        (**self).apply(t, x, out);
    }
}

/// A system that can also provide its Jacobian `∂f/∂u`.
///
/// The default falls back to central finite differences; override it when an
/// analytic Jacobian is available.
pub trait JacobianSystem: DynamicalSystem<f64> {
    /// Writes the Jacobian at `(t, x)` into `out` in row-major order
    /// (`out[i * n + j] = ∂f_i/∂x_j`).
    fn jacobian(&self, t: f64, x: &[f64], out: &mut [f64]) {
        finite_difference_jacobian(self, t, x, out);
    }
}

impl<S: JacobianSystem + ?Sized> JacobianSystem for &S {
    fn jacobian(&self, t: f64, x: &[f64], out: &mut [f64]) {
        (**self).jacobian(t, x, out);
    }
}

/// Central finite-difference Jacobian for systems without an analytic one.
pub fn finite_difference_jacobian<S: DynamicalSystem<f64> + ?Sized>(
    system: &S,
    t: f64,
    x: &[f64],
    out: &mut [f64],
) {
    let n = system.dimension();
    let mut shifted = x.to_vec();
    let mut plus = vec![0.0; n];
    let mut minus = vec![0.0; n];
    for j in 0..n {
        let orig = shifted[j];
        let h = 1e-7 * (1.0 + orig.abs());
        shifted[j] = orig + h;
        system.apply(t, &shifted, &mut plus);
        shifted[j] = orig - h;
        system.apply(t, &shifted, &mut minus);
        shifted[j] = orig;
        for i in 0..n {
            out[i * n + j] = (plus[i] - minus[i]) / (2.0 * h);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Rotation;

    impl DynamicalSystem<f64> for Rotation {
        fn dimension(&self) -> usize {
            2
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = -x[1];
            out[1] = x[0] * x[0];
        }
    }

    #[test]
    fn finite_difference_jacobian_matches_analytic() {
        let mut jac = vec![0.0; 4];
        finite_difference_jacobian(&Rotation, 0.0, &[3.0, 1.0], &mut jac);
        let expected = [0.0, -1.0, 6.0, 0.0];
        for (got, want) in jac.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "got {got}, want {want}");
        }
    }
}

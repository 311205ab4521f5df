//! Orthogonal polynomials of the random variables in the coefficient field.
//!
//! Every family is described by its three-term recurrence
//!
//! ```text
//! p_{n+1}(x) = (a_n + b_n x) p_n(x) - c_n p_{n-1}(x),    p_{-1} = 0,  p_0 = 1,
//! ```
//!
//! and orthogonality is with respect to a probability measure, so `||p_0|| = 1`.
use nalgebra::{convert, DMatrix, SymmetricEigen};
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};
use sgfem_traits::Real;

fn from_usize<T: Real>(n: usize) -> T {
    convert(n as f64)
}

pub trait PolynomialFamily {
    /// The recurrence coefficients `(a_n, b_n, c_n)` of the *unnormalised* family.
    fn raw_recurrence_coefficients<T: Real>(&self, n: usize) -> (T, T, T);

    /// The squared norm of the *unnormalised* polynomial of degree `n`.
    fn raw_sqnorm<T: Real>(&self, n: usize) -> T;

    /// Whether the polynomials are scaled to unit norm.
    fn normalised(&self) -> bool;

    /// The recurrence coefficients `(a_n, b_n, c_n)` of the family.
    fn recurrence_coefficients<T: Real>(&self, n: usize) -> (T, T, T) {
        let (a, b, c) = self.raw_recurrence_coefficients::<T>(n);
        if !self.normalised() {
            return (a, b, c);
        }
        // p_n = h_n q_n with q_n the normalised polynomials
        let h = |k: usize| self.raw_sqnorm::<T>(k).sqrt();
        let h_next = h(n + 1);
        let ratio = h(n) / h_next;
        let c = if n == 0 { T::zero() } else { c * h(n - 1) / h_next };
        (a * ratio, b * ratio, c)
    }

    /// The norm of the polynomial of degree `n`.
    fn norm<T: Real>(&self, n: usize) -> T {
        if self.normalised() {
            T::one()
        } else {
            self.raw_sqnorm::<T>(n).sqrt()
        }
    }

    /// Returns `(β0, β1, β-1)` such that `x p_n = β1 p_{n+1} - β0 p_n + β-1 p_{n-1}`.
    fn get_beta<T: Real>(&self, n: usize) -> (T, T, T) {
        let (a, b, c) = self.recurrence_coefficients::<T>(n);
        (a / b, T::one() / b, c / b)
    }

    /// Evaluates the polynomials of degree `0..=n` at `x`.
    fn eval_all<T: Real>(&self, n: usize, x: T) -> Vec<T> {
        let mut values = Vec::with_capacity(n + 1);
        values.push(T::one());
        let mut previous = T::zero();
        for k in 0..n {
            let current = values[k];
            let (a, b, c) = self.recurrence_coefficients::<T>(k);
            let next = (a + b * x) * current - c * previous;
            previous = current;
            values.push(next);
        }
        values
    }

    /// Evaluates the polynomial of degree `n` at `x`.
    fn eval<T: Real>(&self, n: usize, x: T) -> T {
        let values = self.eval_all(n, x);
        values[n]
    }

    /// The `n`-point Gauss rule of the orthogonality measure.
    ///
    /// Points are the eigenvalues of the symmetric Jacobi matrix of the normalised recurrence
    /// and the weights are the squared first components of the eigenvectors (Golub-Welsch).
    /// Points are returned in increasing order. The rule is exact for polynomials of degree
    /// up to `2n - 1`.
    fn gauss_rule<T: Real>(&self, n: usize) -> (Vec<T>, Vec<T>) {
        assert!(n > 0, "Gauss rule needs at least one point");
        let normalised = Normalised(self);
        let mut jacobi = DMatrix::zeros(n, n);
        for k in 0..n {
            let (beta0, beta1, _) = normalised.get_beta::<T>(k);
            jacobi[(k, k)] = -beta0;
            if k + 1 < n {
                jacobi[(k, k + 1)] = beta1;
                jacobi[(k + 1, k)] = beta1;
            }
        }

        let eigen = SymmetricEigen::new(jacobi);
        let mut rule: Vec<(T, T)> = (0..n)
            .map(|k| {
                let v0 = eigen.eigenvectors[(0, k)];
                (eigen.eigenvalues[k], v0 * v0)
            })
            .collect();
        rule.sort_by(|(x1, _), (x2, _)| x1.partial_cmp(x2).unwrap_or(std::cmp::Ordering::Equal));
        rule.into_iter().unzip()
    }
}

/// The normalised version of a family, used internally for the Jacobi matrix.
struct Normalised<'a, F: ?Sized>(&'a F);

impl<'a, F: ?Sized + PolynomialFamily> PolynomialFamily for Normalised<'a, F> {
    fn raw_recurrence_coefficients<T: Real>(&self, n: usize) -> (T, T, T) {
        self.0.raw_recurrence_coefficients(n)
    }

    fn raw_sqnorm<T: Real>(&self, n: usize) -> T {
        self.0.raw_sqnorm(n)
    }

    fn normalised(&self) -> bool {
        true
    }
}

/// Legendre polynomials, orthogonal w.r.t. the uniform probability measure on `[-1, 1]`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Legendre {
    pub normalised: bool,
}

impl Default for Legendre {
    fn default() -> Self {
        Self { normalised: true }
    }
}

impl PolynomialFamily for Legendre {
    #[replace_float_literals(convert::<f64, T>(literal))]
    fn raw_recurrence_coefficients<T: Real>(&self, n: usize) -> (T, T, T) {
        let n = from_usize::<T>(n);
        (0.0, (2.0 * n + 1.0) / (n + 1.0), n / (n + 1.0))
    }

    #[replace_float_literals(convert::<f64, T>(literal))]
    fn raw_sqnorm<T: Real>(&self, n: usize) -> T {
        1.0 / (2.0 * from_usize::<T>(n) + 1.0)
    }

    fn normalised(&self) -> bool {
        self.normalised
    }
}

/// Probabilists' Hermite polynomials, orthogonal w.r.t. the standard normal distribution.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StochasticHermite {
    pub normalised: bool,
}

impl Default for StochasticHermite {
    fn default() -> Self {
        Self { normalised: true }
    }
}

impl PolynomialFamily for StochasticHermite {
    fn raw_recurrence_coefficients<T: Real>(&self, n: usize) -> (T, T, T) {
        (T::zero(), T::one(), from_usize(n))
    }

    fn raw_sqnorm<T: Real>(&self, n: usize) -> T {
        (1..=n).fold(T::one(), |factorial, k| factorial * from_usize(k))
    }

    fn normalised(&self) -> bool {
        self.normalised
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrthogonalPolynomials {
    Legendre(Legendre),
    StochasticHermite(StochasticHermite),
}

impl PolynomialFamily for OrthogonalPolynomials {
    fn raw_recurrence_coefficients<T: Real>(&self, n: usize) -> (T, T, T) {
        match self {
            Self::Legendre(family) => family.raw_recurrence_coefficients(n),
            Self::StochasticHermite(family) => family.raw_recurrence_coefficients(n),
        }
    }

    fn raw_sqnorm<T: Real>(&self, n: usize) -> T {
        match self {
            Self::Legendre(family) => family.raw_sqnorm(n),
            Self::StochasticHermite(family) => family.raw_sqnorm(n),
        }
    }

    fn normalised(&self) -> bool {
        match self {
            Self::Legendre(family) => family.normalised(),
            Self::StochasticHermite(family) => family.normalised(),
        }
    }
}

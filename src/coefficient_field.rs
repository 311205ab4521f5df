//! Affine random coefficient fields `a(x, y) = a_0(x) + Σ_m a_m(x) y_m`.
use crate::polynomials::{Legendre, OrthogonalPolynomials, StochasticHermite};
use serde::{Deserialize, Serialize};

/// The distribution of a single random parameter `y_m`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RandomVariable {
    /// Uniform on `[-1, 1]`.
    Uniform,
    /// Standard normal.
    Normal,
}

impl RandomVariable {
    /// The normalised orthogonal polynomials of the distribution.
    pub fn orth_polys(&self) -> OrthogonalPolynomials {
        match self {
            Self::Uniform => OrthogonalPolynomials::Legendre(Legendre::default()),
            Self::Normal => OrthogonalPolynomials::StochasticHermite(StochasticHermite::default()),
        }
    }
}

/// A mean coefficient and a finite sequence of fluctuation terms.
///
/// Term `m` (zero-based) multiplies the random variable indexed by coordinate `m` of a
/// multi-index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientField<C> {
    mean: C,
    terms: Vec<(C, RandomVariable)>,
}

impl<C> CoefficientField<C> {
    pub fn new(mean: C) -> Self {
        Self {
            mean,
            terms: Vec::new(),
        }
    }

    pub fn with_term(mut self, coefficient: C, rv: RandomVariable) -> Self {
        self.terms.push((coefficient, rv));
        self
    }

    pub fn mean(&self) -> &C {
        &self.mean
    }

    /// The number of fluctuation terms.
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn term(&self, m: usize) -> Option<(&C, RandomVariable)> {
        self.terms
            .get(m)
            .map(|(coefficient, rv)| (coefficient, *rv))
    }

    pub fn terms(&self) -> impl '_ + Iterator<Item = (&C, RandomVariable)> {
        self.terms
            .iter()
            .map(|(coefficient, rv)| (coefficient, *rv))
    }
}

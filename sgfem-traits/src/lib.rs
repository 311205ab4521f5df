//! Core traits shared by the `sgfem` crates.
//!
//! The stochastic Galerkin machinery never looks inside the finite element discretisation.
//! Everything it needs from a discretisation is captured by the traits in this crate:
//! a [`FunctionBasis`] describes a finite-dimensional space, and a [`CoefficientVector`] is an
//! element of such a space expressed through its coefficients.
use nalgebra::{DVectorView, DVectorViewMut, RealField};
use num::{One, Zero};
use std::fmt::Debug;

pub use nalgebra;

pub trait Real: RealField + Copy {}

impl<T: RealField + Copy> Real for T {}

/// A finite-dimensional basis, typically a finite element space on some mesh.
pub trait FunctionBasis: Clone + Debug + PartialEq {
    type Scalar: Real;
    type Vector: CoefficientVector<Scalar = Self::Scalar, Basis = Self>;

    /// The number of basis functions.
    fn dim(&self) -> usize;

    /// The polynomial degree of the basis functions.
    fn degree(&self) -> usize;

    /// Returns a basis of the same family on the same mesh, but with the given polynomial degree.
    fn with_degree(&self, degree: usize) -> Self;

    /// Re-expresses the given vector in this basis.
    ///
    /// The projection must be linear. Projecting a vector onto its own basis must reproduce it.
    fn project_onto(&self, vector: &Self::Vector) -> Self::Vector;

    /// Returns the zero vector of this basis.
    fn zero_vector(&self) -> Self::Vector;
}

/// A basis whose underlying mesh can be locally refined.
pub trait RefinableBasis: FunctionBasis {
    fn num_cells(&self) -> usize;

    /// Refines the given cells, returning the basis on the refined mesh.
    ///
    /// Cell indices refer to the cells of `self`. Duplicate indices are allowed.
    fn refine(&self, cell_ids: &[usize]) -> eyre::Result<Self>;

    /// Transfers a vector of a coarser basis to this basis.
    fn prolongate(&self, vector: &Self::Vector) -> Self::Vector {
        self.project_onto(vector)
    }
}

/// A coefficient vector tied to a [`FunctionBasis`].
///
/// Vectors have value semantics: cloning a vector produces an independent copy
/// of its coefficients.
pub trait CoefficientVector: Clone + Debug + PartialEq {
    type Scalar: Real;
    type Basis: FunctionBasis<Scalar = Self::Scalar, Vector = Self>;

    fn basis(&self) -> &Self::Basis;

    fn coefficients(&self) -> DVectorView<'_, Self::Scalar>;

    fn coefficients_mut(&mut self) -> DVectorViewMut<'_, Self::Scalar>;

    fn dim(&self) -> usize {
        self.coefficients().len()
    }

    fn degree(&self) -> usize {
        self.basis().degree()
    }

    fn set_zero(&mut self) {
        self.coefficients_mut().fill(Self::Scalar::zero());
    }

    fn scale(&mut self, alpha: Self::Scalar) {
        self.coefficients_mut().scale_mut(alpha);
    }

    /// Computes `self <- self + alpha * x`.
    ///
    /// # Panics
    ///
    /// Panics if the two vectors do not share the same basis.
    fn axpy(&mut self, alpha: Self::Scalar, x: &Self) {
        assert!(self.basis() == x.basis(), "Basis mismatch in vector arithmetic");
        self.coefficients_mut()
            .axpy(alpha, &x.coefficients(), Self::Scalar::one());
    }

    /// The Euclidean inner product of the coefficients.
    ///
    /// # Panics
    ///
    /// Panics if the vectors have different dimensions.
    fn inner(&self, other: &Self) -> Self::Scalar {
        assert_eq!(self.dim(), other.dim(), "Dimension mismatch in inner product");
        self.coefficients().dot(&other.coefficients())
    }
}

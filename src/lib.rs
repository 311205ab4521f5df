//! Adaptive stochastic Galerkin finite element methods.
//!
//! The solution of a PDE with a random coefficient field `a(x, y) = a_0(x) + Σ_m a_m(x) y_m` is
//! sought as a polynomial chaos expansion `u(x, y) = Σ_μ u_μ(x) P_μ(y)` over a finite set of
//! active multi-indices. Each coefficient `u_μ` lives in its own finite element space, which the
//! adaptive loop in [`adaptive`] refines independently, while the set of active multi-indices is
//! enriched based on a tail estimator.
//!
//! The stochastic machinery only relies on the traits of [`sgfem_traits`]. A one-dimensional
//! Lagrange backend is provided in [`fem`].
pub mod adaptive;
pub mod coefficient_field;
pub mod estimator;
pub mod fem;
pub mod io;
pub mod marking;
pub mod multi_vector;
pub mod multiindex;
pub mod operator;
pub mod pcg;
pub mod polynomials;

#[cfg(feature = "proptest-support")]
pub mod proptest;

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;

pub use sgfem_traits::{CoefficientVector, FunctionBasis, Real, RefinableBasis};

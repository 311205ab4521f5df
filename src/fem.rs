//! A one-dimensional Lagrange finite element backend.
//!
//! Discretises `-(a u')' = f` on an interval with homogeneous Dirichlet conditions, with
//! continuous piecewise polynomials of arbitrary degree on non-uniform meshes. Every component
//! of a multivector may live on its own mesh, obtained by bisecting marked cells.
pub mod assembly;
pub mod estimator;
pub mod mesh;
pub mod problem;
pub mod space;

pub use estimator::ResidualEstimator1d;
pub use mesh::IntervalMesh;
pub use problem::{AssembledMatrix, CholeskySolver, PoissonProblem1d, ScalarFunction};
pub use space::{LagrangeSpace, LagrangeVector};

//! Contracts for a posteriori error estimators of the stochastic Galerkin solution.
use crate::multi_vector::MultiVectorWithProjection;
use crate::multiindex::MultiIndex;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use sgfem_traits::{CoefficientVector, Real};
use std::collections::BTreeMap;

/// Parameters forwarded to the estimator in every iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorParameters {
    /// Maximal mesh width used when evaluating maximum norms of the coefficients.
    pub maxh: f64,
    /// Number of modes beyond the maximal active order that are searched for new indices.
    pub add_maxm: usize,
    /// Quadrature degree of the residual estimator, `None` to let the estimator choose.
    pub quadrature_degree: Option<usize>,
}

/// The spatial residual indicator.
#[derive(Debug, Clone, PartialEq)]
pub struct ResidualEstimate<T: Real> {
    /// The global estimate `η`.
    pub global: T,
    /// The estimate restricted to each active component.
    pub per_index: BTreeMap<MultiIndex, T>,
    /// Cell-wise indicators of each active component, indexed by the cells of its basis.
    pub local: BTreeMap<MultiIndex, DVector<T>>,
}

/// The stochastic tail indicator.
#[derive(Debug, Clone, PartialEq)]
pub struct TailEstimate<T: Real> {
    /// The global estimate `ζ`.
    pub global: T,
    /// Contributions of inactive candidate indices adjacent to the active set.
    pub per_mode: BTreeMap<MultiIndex, T>,
    /// Bound for all modes beyond the evaluated ones.
    pub upper_bound: T,
    /// The number of stochastic modes that were evaluated individually.
    pub evaluated_modes: usize,
}

pub trait Estimator<V: CoefficientVector> {
    fn evaluate_residual_estimator(
        &self,
        w: &MultiVectorWithProjection<V>,
        parameters: &EstimatorParameters,
    ) -> eyre::Result<ResidualEstimate<V::Scalar>>;

    fn evaluate_upper_tail_bound(
        &self,
        w: &MultiVectorWithProjection<V>,
        parameters: &EstimatorParameters,
    ) -> eyre::Result<TailEstimate<V::Scalar>>;
}

impl<'a, V, E> Estimator<V> for &'a E
where
    V: CoefficientVector,
    E: ?Sized + Estimator<V>,
{
    fn evaluate_residual_estimator(
        &self,
        w: &MultiVectorWithProjection<V>,
        parameters: &EstimatorParameters,
    ) -> eyre::Result<ResidualEstimate<V::Scalar>> {
        <E as Estimator<V>>::evaluate_residual_estimator(self, w, parameters)
    }

    fn evaluate_upper_tail_bound(
        &self,
        w: &MultiVectorWithProjection<V>,
        parameters: &EstimatorParameters,
    ) -> eyre::Result<TailEstimate<V::Scalar>> {
        <E as Estimator<V>>::evaluate_upper_tail_bound(self, w, parameters)
    }
}

/// Combines the residual and tail estimates into `ξ = sqrt(η² + ζ²)`.
pub fn combined_estimate<T: Real>(eta: T, zeta: T) -> T {
    (eta * eta + zeta * zeta).sqrt()
}

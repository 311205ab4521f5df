//! Bulk marking of cells and multi-indices, and the refinement actions that follow.
use crate::estimator::{ResidualEstimate, TailEstimate};
use crate::multi_vector::{MultiVector, MultiVectorWithProjection};
use crate::multiindex::MultiIndex;
use itertools::Itertools;
use log::debug;
use nalgebra::convert;
use sgfem_traits::{CoefficientVector, FunctionBasis, Real, RefinableBasis};
use std::collections::BTreeMap;

/// Creates the initial vector of a newly activated index from the current solution.
pub type VectorFactory<'a, V> = dyn 'a + Fn(&MultiIndex, &MultiVector<V>) -> V;

/// Dörfler marking.
///
/// Returns the positions of the largest `indicators` whose squares sum to at least
/// `theta` times `total_sq`, in order of decreasing indicator. Ties are broken by position.
/// `total_sq` must be at least the sum of the squared indicators.
pub fn bulk_mark_with_total<T: Real>(indicators: &[T], total_sq: T, theta: T) -> Vec<usize> {
    let target = theta * total_sq;
    let mut marked = Vec::new();
    if total_sq <= T::zero() {
        return marked;
    }

    let order = (0..indicators.len()).sorted_by(|&i, &j| {
        indicators[j]
            .abs()
            .partial_cmp(&indicators[i].abs())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(i.cmp(&j))
    });

    let mut sum = T::zero();
    for i in order {
        if sum >= target {
            break;
        }
        sum += indicators[i] * indicators[i];
        marked.push(i);
    }
    marked
}

/// Dörfler marking relative to the sum of the squared indicators.
pub fn bulk_mark<T: Real>(indicators: &[T], theta: T) -> Vec<usize> {
    let total_sq = indicators
        .iter()
        .fold(T::zero(), |acc, &eta| acc + eta * eta);
    bulk_mark_with_total(indicators, total_sq, theta)
}

/// Marking and refinement strategies of the adaptive loop.
pub trait Marking<V>
where
    V: CoefficientVector,
    V::Basis: RefinableBasis,
{
    /// Selects cells of each component for spatial refinement.
    fn mark_x(&self, residual: &ResidualEstimate<V::Scalar>, theta_x: f64) -> BTreeMap<MultiIndex, Vec<usize>>;

    /// Selects inactive multi-indices to activate.
    fn mark_y(&self, tail: &TailEstimate<V::Scalar>, theta_y: f64) -> Vec<MultiIndex>;

    /// Selects cells for refinement due to oscillations of the coefficient field.
    fn mark_osc(&self, _w: &MultiVectorWithProjection<V>) -> BTreeMap<MultiIndex, Vec<usize>> {
        BTreeMap::new()
    }

    /// Refines the marked cells, returning the number of refined cells.
    fn refine_x(
        &self,
        w: &mut MultiVectorWithProjection<V>,
        markers: &BTreeMap<MultiIndex, Vec<usize>>,
    ) -> eyre::Result<usize> {
        w.refine_components(markers)
    }

    /// Activates `new_indices` with vectors created by `factory`, returning the number of
    /// indices that were not active before.
    fn refine_y(
        &self,
        w: &mut MultiVectorWithProjection<V>,
        new_indices: &[MultiIndex],
        factory: &VectorFactory<V>,
    ) -> usize {
        let mut activated = 0;
        for index in new_indices {
            if w.contains(index) {
                continue;
            }
            let vector = factory(index, w.as_multi_vector());
            debug!("Activating multi-index {} with dim {}", index, vector.dim());
            w.insert(index.clone(), vector);
            activated += 1;
        }
        activated
    }
}

/// Dörfler marking on the squared indicators.
#[derive(Debug, Copy, Clone, Default)]
pub struct BulkMarking;

impl<V> Marking<V> for BulkMarking
where
    V: CoefficientVector,
    V::Basis: RefinableBasis,
{
    fn mark_x(&self, residual: &ResidualEstimate<V::Scalar>, theta_x: f64) -> BTreeMap<MultiIndex, Vec<usize>> {
        // Cells of all components compete for the same bulk
        let (labels, indicators): (Vec<_>, Vec<_>) = residual
            .local
            .iter()
            .flat_map(|(index, local)| {
                local
                    .iter()
                    .enumerate()
                    .map(move |(cell, &eta)| ((index, cell), eta))
            })
            .unzip();

        let mut markers: BTreeMap<MultiIndex, Vec<usize>> = BTreeMap::new();
        for i in bulk_mark(&indicators, convert(theta_x)) {
            let (index, cell) = labels[i];
            markers.entry(index.clone()).or_default().push(cell);
        }
        for cells in markers.values_mut() {
            cells.sort_unstable();
        }
        markers
    }

    fn mark_y(&self, tail: &TailEstimate<V::Scalar>, theta_y: f64) -> Vec<MultiIndex> {
        let (candidates, indicators): (Vec<_>, Vec<_>) = tail.per_mode.iter().unzip();
        let total_sq = indicators
            .iter()
            .fold(tail.upper_bound * tail.upper_bound, |acc, &&zeta| acc + zeta * zeta);
        let indicators: Vec<V::Scalar> = indicators.into_iter().copied().collect();
        bulk_mark_with_total(&indicators, total_sq, convert(theta_y))
            .into_iter()
            .map(|i| candidates[i].clone())
            .collect()
    }
}

/// Creates zero vectors in the basis of the mean component.
pub fn zero_in_mean_basis<V: CoefficientVector>(_index: &MultiIndex, w: &MultiVector<V>) -> V {
    w[&MultiIndex::zero()].basis().zero_vector()
}

//! Proptest strategies for multi-indices, meshes and multivectors.
use crate::fem::{IntervalMesh, LagrangeSpace, LagrangeVector};
use crate::multi_vector::MultiVector;
use crate::multiindex::MultiIndex;
use ::proptest::collection::{btree_set, vec};
use ::proptest::prelude::*;
use nalgebra::DVector;
use sgfem_traits::FunctionBasis;
use std::sync::Arc;

pub fn multi_index(max_len: usize, max_value: u32) -> impl Strategy<Value = MultiIndex> {
    vec(0..=max_value, 0..=max_len).prop_map(MultiIndex::from)
}

impl Arbitrary for MultiIndex {
    type Parameters = (usize, u32);
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with((max_len, max_value): Self::Parameters) -> Self::Strategy {
        let (max_len, max_value) = if max_len == 0 && max_value == 0 {
            (4, 3)
        } else {
            (max_len, max_value)
        };
        multi_index(max_len, max_value).boxed()
    }
}

/// Meshes of `[0, 1]` with between 2 and `max_cells` cells of random widths.
pub fn interval_mesh(max_cells: usize) -> impl Strategy<Value = IntervalMesh<f64>> {
    vec(0.1..1.0, 2..=max_cells.max(2)).prop_map(|widths| {
        let total: f64 = widths.iter().sum();
        let mut vertices = Vec::with_capacity(widths.len() + 1);
        let mut x = 0.0;
        vertices.push(x);
        for width in &widths[..widths.len() - 1] {
            x += width / total;
            vertices.push(x);
        }
        vertices.push(1.0);
        IntervalMesh::from_vertices(vertices).expect("Widths are positive")
    })
}

pub fn lagrange_space(max_cells: usize, max_degree: usize) -> impl Strategy<Value = LagrangeSpace<f64>> {
    (interval_mesh(max_cells), 1..=max_degree.max(1))
        .prop_map(|(mesh, degree)| LagrangeSpace::new(Arc::new(mesh), degree))
}

pub fn lagrange_vector(space: LagrangeSpace<f64>) -> impl Strategy<Value = LagrangeVector<f64>> {
    vec(-10.0..10.0, space.dim())
        .prop_map(move |coefficients| LagrangeVector::new(space.clone(), DVector::from_vec(coefficients)))
}

/// Multivectors whose components all share `space`, with at most `max_indices` active indices.
pub fn multi_vector(space: LagrangeSpace<f64>, max_indices: usize) -> impl Strategy<Value = MultiVector<LagrangeVector<f64>>> {
    btree_set(multi_index(3, 2), 1..=max_indices.max(1))
        .prop_flat_map(move |indices| multi_vector_with_indices(space.clone(), indices.into_iter().collect()))
}

/// Multivectors with exactly the given active indices, all in `space`.
pub fn multi_vector_with_indices(
    space: LagrangeSpace<f64>,
    indices: Vec<MultiIndex>,
) -> impl Strategy<Value = MultiVector<LagrangeVector<f64>>> {
    let components: Vec<_> = indices
        .iter()
        .map(|_| lagrange_vector(space.clone()))
        .collect();
    (Just(indices), components).prop_map(|(indices, components)| indices.into_iter().zip(components).collect())
}

/// Two multivectors with identical active indices and bases.
pub fn multi_vector_pair(
    max_cells: usize,
    max_degree: usize,
    max_indices: usize,
) -> impl Strategy<Value = (MultiVector<LagrangeVector<f64>>, MultiVector<LagrangeVector<f64>>)> {
    (lagrange_space(max_cells, max_degree), btree_set(multi_index(3, 2), 1..=max_indices.max(1))).prop_flat_map(
        |(space, indices)| {
            let indices: Vec<_> = indices.into_iter().collect();
            (
                multi_vector_with_indices(space.clone(), indices.clone()),
                multi_vector_with_indices(space, indices),
            )
        },
    )
}

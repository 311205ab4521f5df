use crate::multi_vector::MultiVector;
use crate::multiindex::MultiIndex;
use nalgebra::{DVector, DVectorView};
use sgfem_traits::{CoefficientVector, FunctionBasis};

/// Converts between a [`MultiVector`] and one contiguous (Euclidean) vector.
///
/// The layout (active indices, their bases and dimensions) is recorded when the operator is
/// created. Components are concatenated in sorted index order on both paths. The last produced
/// object is kept so that repeated conversions reuse its storage.
#[derive(Debug, Clone)]
pub struct FlattenOperator<V: CoefficientVector> {
    layout: Vec<(MultiIndex, V::Basis)>,
    dim: usize,
    last_flat: Option<DVector<V::Scalar>>,
    last_multi: Option<MultiVector<V>>,
}

impl<V: CoefficientVector> FlattenOperator<V> {
    /// Records the layout of `template`.
    pub fn new(template: &MultiVector<V>) -> Self {
        let layout: Vec<_> = template
            .iter()
            .map(|(index, vector)| (index.clone(), vector.basis().clone()))
            .collect();
        let dim = layout.iter().map(|(_, basis)| basis.dim()).sum();
        Self {
            layout,
            dim,
            last_flat: None,
            last_multi: None,
        }
    }

    /// The total dimension of the recorded layout.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn active_indices(&self) -> impl '_ + Iterator<Item = &MultiIndex> {
        self.layout.iter().map(|(index, _)| index)
    }

    /// Concatenates the components of `vector` into one contiguous vector.
    ///
    /// # Panics
    ///
    /// Panics if `vector` does not match the recorded layout.
    pub fn flatten(&mut self, vector: &MultiVector<V>) -> &DVector<V::Scalar> {
        assert_eq!(vector.len(), self.layout.len(), "Multivector does not match flattening layout");
        let dim = self.dim;
        let flat = self
            .last_flat
            .get_or_insert_with(|| DVector::zeros(dim));

        let mut offset = 0;
        for (index, basis) in &self.layout {
            let component = &vector[index];
            assert_eq!(
                component.dim(),
                basis.dim(),
                "Dimension of component {} does not match flattening layout",
                index
            );
            flat.rows_mut(offset, basis.dim())
                .copy_from(&component.coefficients());
            offset += basis.dim();
        }
        flat
    }

    /// Splits a contiguous vector into components according to the recorded layout.
    ///
    /// # Panics
    ///
    /// Panics if the length of `flat` differs from [`dim`](Self::dim).
    pub fn unflatten<'a>(&mut self, flat: impl Into<DVectorView<'a, V::Scalar>>) -> &MultiVector<V> {
        let flat = flat.into();
        assert_eq!(flat.len(), self.dim, "Flat vector does not match flattening layout");
        let layout = &self.layout;
        let multi = self.last_multi.get_or_insert_with(|| {
            layout
                .iter()
                .map(|(index, basis)| (index.clone(), basis.zero_vector()))
                .collect()
        });

        let mut offset = 0;
        for (index, basis) in layout {
            let component = multi
                .get_mut(index)
                .expect("Cached multivector always has the recorded layout");
            component
                .coefficients_mut()
                .copy_from(&flat.rows(offset, basis.dim()));
            offset += basis.dim();
        }
        multi
    }
}

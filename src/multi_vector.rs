//! Vectors indexed by multi-indices.
//!
//! A [`MultiVector`] stores one [`CoefficientVector`] per active multi-index. Every component
//! may live in its own basis, so arithmetic is carried out component by component with the
//! arithmetic of the component vectors.
use crate::multiindex::MultiIndex;
use nalgebra::{ComplexField, DVector};
use num::{One, Zero};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use sgfem_traits::CoefficientVector;
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::ops::{Add, AddAssign, Index, Mul, MulAssign, Neg, Sub, SubAssign};

mod flatten;
mod projection;

pub use flatten::FlattenOperator;
pub use projection::{BasisProjector, MultiVectorWithProjection, Projector, ProjectorId};

/// A mapping from active multi-indices to owned coefficient vectors.
///
/// Iteration always follows the order of [`MultiIndex`], so sums over active indices and the
/// flattened layout are reproducible.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiVector<V> {
    mi2vec: BTreeMap<MultiIndex, V>,
}

impl<V> Default for MultiVector<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> MultiVector<V> {
    pub fn new() -> Self {
        Self { mi2vec: BTreeMap::new() }
    }

    pub fn len(&self) -> usize {
        self.mi2vec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mi2vec.is_empty()
    }

    pub fn contains(&self, index: &MultiIndex) -> bool {
        self.mi2vec.contains_key(index)
    }

    pub fn get(&self, index: &MultiIndex) -> Option<&V> {
        self.mi2vec.get(index)
    }

    pub fn get_mut(&mut self, index: &MultiIndex) -> Option<&mut V> {
        self.mi2vec.get_mut(index)
    }

    /// Stores `vector` at `index`, returning the previously stored vector, if any.
    pub fn insert(&mut self, index: MultiIndex, vector: V) -> Option<V> {
        self.mi2vec.insert(index, vector)
    }

    pub fn keys(&self) -> impl '_ + Iterator<Item = &MultiIndex> {
        self.mi2vec.keys()
    }

    pub fn values(&self) -> impl '_ + Iterator<Item = &V> {
        self.mi2vec.values()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, MultiIndex, V> {
        self.mi2vec.iter()
    }

    pub fn iter_mut(&mut self) -> btree_map::IterMut<'_, MultiIndex, V> {
        self.mi2vec.iter_mut()
    }

    /// The active multi-indices in sorted order.
    pub fn active_indices(&self) -> Vec<MultiIndex> {
        self.mi2vec.keys().cloned().collect()
    }

    /// The maximum length of the active multi-indices, zero if there are none.
    pub fn max_order(&self) -> usize {
        self.mi2vec.keys().map(MultiIndex::len).max().unwrap_or(0)
    }

    /// Returns `true` if both multivectors have exactly the same active indices.
    pub fn has_same_indices<W>(&self, other: &MultiVector<W>) -> bool {
        self.mi2vec.keys().eq(other.mi2vec.keys())
    }

    /// # Panics
    ///
    /// Panics if the active index sets differ.
    pub(crate) fn assert_same_indices<W>(&self, other: &MultiVector<W>) {
        assert!(
            self.has_same_indices(other),
            "Active index sets differ: {:?} vs. {:?}",
            self.active_indices(),
            other.active_indices()
        );
    }
}

impl<V> MultiVector<V>
where
    V: CoefficientVector,
{
    /// Activates every index in `indices` with an independent copy of `init_vector`.
    pub fn set_defaults<'a>(&mut self, indices: impl IntoIterator<Item = &'a MultiIndex>, init_vector: &V) {
        for index in indices {
            self.mi2vec.insert(index.clone(), init_vector.clone());
        }
    }

    pub fn set_zero(&mut self) {
        for vector in self.mi2vec.values_mut() {
            vector.set_zero();
        }
    }

    /// The dimension of every active component.
    pub fn dim(&self) -> BTreeMap<MultiIndex, usize> {
        self.mi2vec
            .iter()
            .map(|(index, vector)| (index.clone(), vector.dim()))
            .collect()
    }

    /// The sum of the dimensions of all components.
    pub fn total_dim(&self) -> usize {
        self.mi2vec.values().map(|v| v.dim()).sum()
    }

    /// Computes `self <- self + alpha * x` component-wise.
    ///
    /// # Panics
    ///
    /// Panics if the active index sets differ.
    pub fn axpy(&mut self, alpha: V::Scalar, x: &Self) {
        self.assert_same_indices(x);
        for (vector, x_vector) in self.mi2vec.values_mut().zip(x.mi2vec.values()) {
            vector.axpy(alpha, x_vector);
        }
    }

    pub fn scale(&mut self, alpha: V::Scalar) {
        for vector in self.mi2vec.values_mut() {
            vector.scale(alpha);
        }
    }

    /// The sum of the component inner products.
    ///
    /// # Panics
    ///
    /// Panics if the active index sets differ.
    pub fn inner(&self, other: &Self) -> V::Scalar {
        self.assert_same_indices(other);
        self.mi2vec
            .values()
            .zip(other.mi2vec.values())
            .fold(V::Scalar::zero(), |acc, (u, v)| acc + u.inner(v))
    }

    pub fn norm(&self) -> V::Scalar {
        self.inner(self).sqrt()
    }

    /// Concatenates the coefficients of all components in sorted index order.
    pub fn flatten(&self) -> DVector<V::Scalar> {
        let mut flat = DVector::zeros(self.total_dim());
        let mut offset = 0;
        for vector in self.mi2vec.values() {
            let dim = vector.dim();
            flat.rows_mut(offset, dim)
                .copy_from(&vector.coefficients());
            offset += dim;
        }
        flat
    }
}

impl<V> FromIterator<(MultiIndex, V)> for MultiVector<V> {
    fn from_iter<I: IntoIterator<Item = (MultiIndex, V)>>(iter: I) -> Self {
        Self {
            mi2vec: iter.into_iter().collect(),
        }
    }
}

impl<'a, V> IntoIterator for &'a MultiVector<V> {
    type Item = (&'a MultiIndex, &'a V);
    type IntoIter = btree_map::Iter<'a, MultiIndex, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<V> Index<&MultiIndex> for MultiVector<V> {
    type Output = V;

    fn index(&self, index: &MultiIndex) -> &V {
        self.mi2vec
            .get(index)
            .unwrap_or_else(|| panic!("Multi-index {} is not active", index))
    }
}

impl<'a, V: CoefficientVector> AddAssign<&'a MultiVector<V>> for MultiVector<V> {
    fn add_assign(&mut self, rhs: &'a MultiVector<V>) {
        self.axpy(V::Scalar::one(), rhs);
    }
}

impl<'a, V: CoefficientVector> SubAssign<&'a MultiVector<V>> for MultiVector<V> {
    fn sub_assign(&mut self, rhs: &'a MultiVector<V>) {
        self.axpy(-V::Scalar::one(), rhs);
    }
}

impl<V: CoefficientVector> MulAssign<V::Scalar> for MultiVector<V> {
    fn mul_assign(&mut self, rhs: V::Scalar) {
        self.scale(rhs);
    }
}

impl<'a, V: CoefficientVector> Add<&'a MultiVector<V>> for &'a MultiVector<V> {
    type Output = MultiVector<V>;

    fn add(self, rhs: &'a MultiVector<V>) -> MultiVector<V> {
        let mut result = self.clone();
        result += rhs;
        result
    }
}

impl<'a, V: CoefficientVector> Sub<&'a MultiVector<V>> for &'a MultiVector<V> {
    type Output = MultiVector<V>;

    fn sub(self, rhs: &'a MultiVector<V>) -> MultiVector<V> {
        let mut result = self.clone();
        result -= rhs;
        result
    }
}

impl<V: CoefficientVector> Mul<V::Scalar> for MultiVector<V> {
    type Output = MultiVector<V>;

    fn mul(mut self, rhs: V::Scalar) -> MultiVector<V> {
        self *= rhs;
        self
    }
}

impl<'a, V: CoefficientVector> Mul<V::Scalar> for &'a MultiVector<V> {
    type Output = MultiVector<V>;

    fn mul(self, rhs: V::Scalar) -> MultiVector<V> {
        self.clone() * rhs
    }
}

impl<V: CoefficientVector> Neg for MultiVector<V> {
    type Output = MultiVector<V>;

    fn neg(self) -> MultiVector<V> {
        self * -V::Scalar::one()
    }
}

impl<'a, V: CoefficientVector> Neg for &'a MultiVector<V> {
    type Output = MultiVector<V>;

    fn neg(self) -> MultiVector<V> {
        -self.clone()
    }
}

// JSON maps only admit string keys, so the components are stored as an (index, vector) sequence
impl<V: Serialize> Serialize for MultiVector<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.mi2vec.iter())
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for MultiVector<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = Vec::<(MultiIndex, V)>::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}


//! Multi-indices identifying stochastic (polynomial chaos) modes.
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Index;

/// A finitely supported sequence of non-negative integers.
///
/// The coefficients are stored without trailing zeros, so two multi-indices compare equal
/// exactly when their non-zero coordinates agree. The total order is the lexicographic order
/// of the stored coefficients, which makes iteration over sets of multi-indices reproducible.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Vec<u32>", into = "Vec<u32>")]
pub struct MultiIndex {
    coeffs: Vec<u32>,
}

impl MultiIndex {
    /// The zero multi-index, associated with the mean of the expansion.
    pub fn zero() -> Self {
        Self { coeffs: Vec::new() }
    }

    pub fn from_slice(coeffs: &[u32]) -> Self {
        Self::from(coeffs.to_vec())
    }

    /// The unit multi-index with a single one at coordinate `m`.
    pub fn unit(m: usize) -> Self {
        Self::zero().inc(m)
    }

    /// One past the position of the highest non-zero coordinate.
    pub fn len(&self) -> usize {
        self.coeffs.len()
    }

    pub fn is_zero(&self) -> bool {
        self.coeffs.is_empty()
    }

    /// The total order `|μ| = Σ_m μ_m`.
    pub fn order(&self) -> u32 {
        self.coeffs.iter().sum()
    }

    /// The coordinate at position `m`, zero beyond the support.
    pub fn get(&self, m: usize) -> u32 {
        self.coeffs.get(m).copied().unwrap_or(0)
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.coeffs
    }

    /// Returns a new multi-index with coordinate `m` incremented by one.
    pub fn inc(&self, m: usize) -> Self {
        let mut coeffs = self.coeffs.clone();
        if coeffs.len() <= m {
            coeffs.resize(m + 1, 0);
        }
        coeffs[m] += 1;
        Self { coeffs }
    }

    /// Returns a new multi-index with coordinate `m` decremented by one,
    /// or `None` if that coordinate is already zero.
    pub fn dec(&self, m: usize) -> Option<Self> {
        if self.get(m) == 0 {
            return None;
        }
        let mut coeffs = self.coeffs.clone();
        coeffs[m] -= 1;
        Some(Self::from(coeffs))
    }

    /// Positions of the non-zero coordinates, in increasing order.
    pub fn support(&self) -> impl '_ + Iterator<Item = usize> {
        self.coeffs
            .iter()
            .enumerate()
            .filter(|(_, &c)| c > 0)
            .map(|(m, _)| m)
    }
}

impl From<Vec<u32>> for MultiIndex {
    fn from(mut coeffs: Vec<u32>) -> Self {
        while coeffs.last() == Some(&0) {
            coeffs.pop();
        }
        Self { coeffs }
    }
}

impl From<MultiIndex> for Vec<u32> {
    fn from(index: MultiIndex) -> Self {
        index.coeffs
    }
}

impl<const N: usize> From<[u32; N]> for MultiIndex {
    fn from(coeffs: [u32; N]) -> Self {
        Self::from(coeffs.to_vec())
    }
}

impl Index<usize> for MultiIndex {
    type Output = u32;

    fn index(&self, m: usize) -> &u32 {
        self.coeffs.get(m).unwrap_or(&0)
    }
}

impl fmt::Display for MultiIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, c) in self.coeffs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", c)?;
        }
        write!(f, ")")
    }
}

/// All multi-indices in `m` variables with total order at most `p`, sorted.
pub fn complete_order_set(m: usize, p: u32) -> Vec<MultiIndex> {
    let mut indices = BTreeSet::new();
    indices.insert(MultiIndex::zero());
    let mut frontier = vec![MultiIndex::zero()];
    for _ in 0..p {
        let mut next = Vec::new();
        for index in &frontier {
            for var in 0..m {
                let candidate = index.inc(var);
                if indices.insert(candidate.clone()) {
                    next.push(candidate);
                }
            }
        }
        frontier = next;
    }
    indices.into_iter().collect()
}

/// The union of the supports of the given multi-indices.
pub fn support_of<'a>(indices: impl IntoIterator<Item = &'a MultiIndex>) -> BTreeSet<usize> {
    indices
        .into_iter()
        .flat_map(|index| index.support())
        .collect()
}

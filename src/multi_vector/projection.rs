use crate::multi_vector::MultiVector;
use crate::multiindex::MultiIndex;
use eyre::eyre;
use log::debug;
use num::One;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use sgfem_traits::{CoefficientVector, FunctionBasis, RefinableBasis};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{AddAssign, Deref, Index, MulAssign, SubAssign};
use std::sync::Arc;

/// Projects a vector onto a (possibly different) basis.
pub trait Projector<V: CoefficientVector>: Send + Sync {
    fn project(&self, source: &V, destination: &V::Basis) -> V;
}

/// Projection through [`FunctionBasis::project_onto`] of the destination basis.
#[derive(Debug, Copy, Clone, Default)]
pub struct BasisProjector;

impl<V: CoefficientVector> Projector<V> for BasisProjector {
    fn project(&self, source: &V, destination: &V::Basis) -> V {
        destination.project_onto(source)
    }
}

/// Identifies the projector instance a cached projection was computed with.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ProjectorId(usize);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ProjectionKey {
    source: MultiIndex,
    destination: MultiIndex,
    degree: usize,
    projector: ProjectorId,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BackProjectionKey {
    source: MultiIndex,
    destination: MultiIndex,
    projector: ProjectorId,
}

struct ProjectionCache<V: CoefficientVector> {
    projections: FxHashMap<ProjectionKey, Arc<V>>,
    back_projections: FxHashMap<BackProjectionKey, Arc<V>>,
    // Bases of destination components at a degree different from their own
    degree_bases: FxHashMap<(MultiIndex, usize), V::Basis>,
}

impl<V: CoefficientVector> Default for ProjectionCache<V> {
    fn default() -> Self {
        Self {
            projections: FxHashMap::default(),
            back_projections: FxHashMap::default(),
            degree_bases: FxHashMap::default(),
        }
    }
}

impl<V: CoefficientVector> ProjectionCache<V> {
    fn clear(&mut self) {
        self.projections.clear();
        self.back_projections.clear();
        self.degree_bases.clear();
    }

    fn len(&self) -> usize {
        self.projections.len() + self.back_projections.len()
    }
}

/// A [`MultiVector`] with cached projections between the bases of its components.
///
/// Components of different multi-indices are generally discretised on independently refined
/// meshes. Coupling them requires projecting one component onto the basis of another. Since
/// an estimator or operator visits many index pairs per iteration, projections and
/// back-projections are cached.
///
/// Every mutating method clears both caches before touching the data, so a cached projection
/// always corresponds to the current state of the container. Read-only access to the
/// underlying [`MultiVector`] is available through [`Deref`].
pub struct MultiVectorWithProjection<V: CoefficientVector> {
    vectors: MultiVector<V>,
    projector: Arc<dyn Projector<V>>,
    cache_active: bool,
    cache: Mutex<ProjectionCache<V>>,
}

impl<V: CoefficientVector> MultiVectorWithProjection<V> {
    /// Wraps `vectors`, projecting with [`BasisProjector`] and with caching enabled.
    pub fn new(vectors: MultiVector<V>) -> Self {
        Self::with_projector(vectors, Arc::new(BasisProjector))
    }

    pub fn with_projector(vectors: MultiVector<V>, projector: Arc<dyn Projector<V>>) -> Self {
        Self {
            vectors,
            projector,
            cache_active: true,
            cache: Mutex::new(ProjectionCache::default()),
        }
    }

    pub fn projector(&self) -> &Arc<dyn Projector<V>> {
        &self.projector
    }

    pub fn projector_id(&self) -> ProjectorId {
        ProjectorId(Arc::as_ptr(&self.projector) as *const () as usize)
    }

    pub fn set_projector(&mut self, projector: Arc<dyn Projector<V>>) {
        self.invalidate();
        self.projector = projector;
    }

    pub fn cache_active(&self) -> bool {
        self.cache_active
    }

    /// Enables or disables caching. Disabling clears both caches.
    pub fn set_cache_active(&mut self, active: bool) {
        self.cache_active = active;
        if !active {
            self.invalidate();
        }
    }

    /// Clears the projection and back-projection caches.
    pub fn invalidate(&mut self) {
        self.cache.get_mut().clear();
    }

    /// The number of cached projections and back-projections.
    pub fn num_cached(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn as_multi_vector(&self) -> &MultiVector<V> {
        &self.vectors
    }

    pub fn into_multi_vector(self) -> MultiVector<V> {
        self.vectors
    }

    /// Replaces all components, keeping the projector and cache setting.
    pub fn replace_vectors(&mut self, vectors: MultiVector<V>) {
        self.invalidate();
        self.vectors = vectors;
    }

    pub fn insert(&mut self, index: MultiIndex, vector: V) -> Option<V> {
        self.invalidate();
        self.vectors.insert(index, vector)
    }

    pub fn get_mut(&mut self, index: &MultiIndex) -> Option<&mut V> {
        self.invalidate();
        self.vectors.get_mut(index)
    }

    pub fn iter_mut(&mut self) -> impl '_ + Iterator<Item = (&MultiIndex, &mut V)> {
        self.invalidate();
        self.vectors.iter_mut()
    }

    pub fn set_defaults<'a>(&mut self, indices: impl IntoIterator<Item = &'a MultiIndex>, init_vector: &V) {
        self.invalidate();
        self.vectors.set_defaults(indices, init_vector);
    }

    pub fn set_zero(&mut self) {
        self.invalidate();
        self.vectors.set_zero();
    }

    pub fn axpy(&mut self, alpha: V::Scalar, x: &MultiVector<V>) {
        self.invalidate();
        self.vectors.axpy(alpha, x);
    }

    pub fn scale(&mut self, alpha: V::Scalar) {
        self.invalidate();
        self.vectors.scale(alpha);
    }

    /// Returns `self[source]` projected onto the basis of `self[destination]`.
    ///
    /// If `degree` is given and differs from the degree of the destination component, the
    /// projection is onto the basis of the same family at that degree instead.
    ///
    /// # Panics
    ///
    /// Panics if either index is inactive.
    pub fn get_projection(&self, source: &MultiIndex, destination: &MultiIndex, degree: Option<usize>) -> Arc<V> {
        let source_vector = &self.vectors[source];
        let destination_vector = &self.vectors[destination];
        let degree = degree.unwrap_or_else(|| destination_vector.degree());

        if !self.cache_active {
            let projected = if destination_vector.degree() == degree {
                self.projector
                    .project(source_vector, destination_vector.basis())
            } else {
                destination_vector
                    .basis()
                    .with_degree(degree)
                    .project_onto(source_vector)
            };
            return Arc::new(projected);
        }

        let key = ProjectionKey {
            source: source.clone(),
            destination: destination.clone(),
            degree,
            projector: self.projector_id(),
        };
        if let Some(projected) = self.cache.lock().projections.get(&key) {
            return Arc::clone(projected);
        }

        // Projection runs without holding the lock
        debug!("Projection cache miss for {} -> {} (degree {})", source, destination, degree);
        let projected = if destination_vector.degree() == degree {
            self.projector
                .project(source_vector, destination_vector.basis())
        } else {
            let basis = self
                .cache
                .lock()
                .degree_bases
                .entry((destination.clone(), degree))
                .or_insert_with(|| destination_vector.basis().with_degree(degree))
                .clone();
            basis.project_onto(source_vector)
        };
        let mut cache = self.cache.lock();
        let projected = cache
            .projections
            .entry(key)
            .or_insert_with(|| Arc::new(projected));
        Arc::clone(projected)
    }

    /// Projects `self[source]` onto the basis of `self[destination]` and back onto the basis
    /// of `self[source]`.
    ///
    /// # Panics
    ///
    /// Panics if either index is inactive.
    pub fn get_back_projection(&self, source: &MultiIndex, destination: &MultiIndex) -> Arc<V> {
        let source_basis = self.vectors[source].basis();

        if !self.cache_active {
            let projected = self.get_projection(source, destination, None);
            return Arc::new(self.projector.project(&projected, source_basis));
        }

        let key = BackProjectionKey {
            source: source.clone(),
            destination: destination.clone(),
            projector: self.projector_id(),
        };
        if let Some(back_projected) = self.cache.lock().back_projections.get(&key) {
            return Arc::clone(back_projected);
        }

        debug!("Back-projection cache miss for {} -> {}", source, destination);
        let projected = self.get_projection(source, destination, None);
        let back_projected = Arc::new(self.projector.project(&projected, source_basis));
        self.cache
            .lock()
            .back_projections
            .insert(key, Arc::clone(&back_projected));
        back_projected
    }

    /// Approximates the error of projecting `self[source]` onto the basis of
    /// `self[destination]`.
    ///
    /// The error is measured in the basis of the destination family at `reference_degree`,
    /// as the ordinary projection minus the projection at the reference degree.
    pub fn projection_error(&self, source: &MultiIndex, destination: &MultiIndex, reference_degree: usize) -> V {
        let reference = self.get_projection(source, destination, Some(reference_degree));
        let projected = self.get_projection(source, destination, None);
        let mut error = reference.basis().project_onto(&projected);
        error.axpy(-V::Scalar::one(), &reference);
        error
    }
}

impl<V> MultiVectorWithProjection<V>
where
    V: CoefficientVector,
    V::Basis: RefinableBasis,
{
    /// Refines the bases of the marked components.
    ///
    /// Each marked component is replaced by its prolongation onto the refined basis.
    /// Returns the total number of marked cells.
    pub fn refine_components(&mut self, markers: &BTreeMap<MultiIndex, Vec<usize>>) -> eyre::Result<usize> {
        self.invalidate();
        let mut num_marked = 0;
        for (index, cells) in markers {
            if cells.is_empty() {
                continue;
            }
            let vector = self
                .vectors
                .get(index)
                .ok_or_else(|| eyre!("Cells marked for inactive multi-index {}", index))?;
            let refined_basis = vector.basis().refine(cells)?;
            let prolongated = refined_basis.prolongate(vector);
            debug!(
                "Refined {} cells of component {}: dim {} -> {}",
                cells.len(),
                index,
                vector.dim(),
                prolongated.dim()
            );
            self.vectors.insert(index.clone(), prolongated);
            num_marked += cells.len();
        }
        Ok(num_marked)
    }
}

impl<V: CoefficientVector> From<MultiVector<V>> for MultiVectorWithProjection<V> {
    fn from(vectors: MultiVector<V>) -> Self {
        Self::new(vectors)
    }
}

impl<V: CoefficientVector> Deref for MultiVectorWithProjection<V> {
    type Target = MultiVector<V>;

    fn deref(&self) -> &MultiVector<V> {
        &self.vectors
    }
}

impl<V: CoefficientVector> Index<&MultiIndex> for MultiVectorWithProjection<V> {
    type Output = V;

    fn index(&self, index: &MultiIndex) -> &V {
        &self.vectors[index]
    }
}

/// Copies the components and shares the projector. The copy starts with empty caches.
impl<V: CoefficientVector> Clone for MultiVectorWithProjection<V> {
    fn clone(&self) -> Self {
        Self {
            vectors: self.vectors.clone(),
            projector: Arc::clone(&self.projector),
            cache_active: self.cache_active,
            cache: Mutex::new(ProjectionCache::default()),
        }
    }
}

impl<V: CoefficientVector> PartialEq for MultiVectorWithProjection<V> {
    fn eq(&self, other: &Self) -> bool {
        self.vectors == other.vectors && self.projector_id() == other.projector_id()
    }
}

impl<V: CoefficientVector> fmt::Debug for MultiVectorWithProjection<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiVectorWithProjection")
            .field("vectors", &self.vectors)
            .field("projector", &self.projector_id())
            .field("cache_active", &self.cache_active)
            .finish()
    }
}

impl<'a, V: CoefficientVector> AddAssign<&'a MultiVectorWithProjection<V>> for MultiVectorWithProjection<V> {
    fn add_assign(&mut self, rhs: &'a MultiVectorWithProjection<V>) {
        self.axpy(V::Scalar::one(), &rhs.vectors);
    }
}

impl<'a, V: CoefficientVector> SubAssign<&'a MultiVectorWithProjection<V>> for MultiVectorWithProjection<V> {
    fn sub_assign(&mut self, rhs: &'a MultiVectorWithProjection<V>) {
        self.axpy(-V::Scalar::one(), &rhs.vectors);
    }
}

impl<V: CoefficientVector> MulAssign<V::Scalar> for MultiVectorWithProjection<V> {
    fn mul_assign(&mut self, rhs: V::Scalar) {
        self.scale(rhs);
    }
}

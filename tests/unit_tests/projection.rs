use crate::{TestBasis, TestVector};
use sgfem::multi_vector::{MultiVector, MultiVectorWithProjection, Projector};
use sgfem::multiindex::MultiIndex;
use sgfem::{CoefficientVector, FunctionBasis};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Counts how often it is asked to project.
#[derive(Default)]
struct CountingProjector {
    calls: AtomicUsize,
}

impl Projector<TestVector> for CountingProjector {
    fn project(&self, source: &TestVector, destination: &TestBasis) -> TestVector {
        self.calls.fetch_add(1, Ordering::SeqCst);
        destination.project_onto(source)
    }
}

fn two_component_vector() -> MultiVector<TestVector> {
    let mut w = MultiVector::new();
    w.insert(MultiIndex::zero(), TestBasis::new(3, 1).vector(&[1.0, 2.0, 3.0]));
    w.insert(MultiIndex::unit(0), TestBasis::new(2, 1).vector(&[4.0, 5.0]));
    w
}

#[test]
fn projection_onto_other_component_basis() {
    let w = MultiVectorWithProjection::new(two_component_vector());
    let zero = MultiIndex::zero();
    let e0 = MultiIndex::unit(0);

    let projected = w.get_projection(&zero, &e0, None);
    assert_eq!(projected.basis(), &TestBasis::new(2, 1));
    assert_eq!(projected.coefficients.as_slice(), &[1.0, 2.0]);

    let projected = w.get_projection(&e0, &zero, None);
    assert_eq!(projected.coefficients.as_slice(), &[4.0, 5.0, 0.0]);

    // Projection onto the own basis reproduces the component
    let own = w.get_projection(&zero, &zero, None);
    assert_eq!(*own, w[&zero]);
}

#[test]
fn repeated_projection_hits_cache() {
    let projector = Arc::new(CountingProjector::default());
    let w = MultiVectorWithProjection::with_projector(two_component_vector(), projector.clone());
    let zero = MultiIndex::zero();
    let e0 = MultiIndex::unit(0);

    let first = w.get_projection(&zero, &e0, None);
    let second = w.get_projection(&zero, &e0, None);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(projector.calls.load(Ordering::SeqCst), 1);
    assert_eq!(w.num_cached(), 1);
}

#[test]
fn mutation_invalidates_cache() {
    let projector = Arc::new(CountingProjector::default());
    let mut w = MultiVectorWithProjection::with_projector(two_component_vector(), projector.clone());
    let zero = MultiIndex::zero();
    let e0 = MultiIndex::unit(0);

    let before = w.get_projection(&zero, &e0, None);
    w.insert(zero.clone(), TestBasis::new(3, 1).vector(&[7.0, 8.0, 9.0]));
    assert_eq!(w.num_cached(), 0);

    let after = w.get_projection(&zero, &e0, None);
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(after.coefficients.as_slice(), &[7.0, 8.0]);
    assert_eq!(projector.calls.load(Ordering::SeqCst), 2);

    // Every mutating method clears the cache
    let _ = w.get_projection(&zero, &e0, None);
    w.scale(2.0);
    assert_eq!(w.num_cached(), 0);
    assert_eq!(w.get_projection(&zero, &e0, None).coefficients.as_slice(), &[14.0, 16.0]);

    w.get_mut(&e0).unwrap().coefficients[0] = 1.0;
    assert_eq!(w.num_cached(), 0);

    let _ = w.get_projection(&e0, &zero, None);
    w.set_zero();
    assert_eq!(w.num_cached(), 0);

    let _ = w.get_projection(&e0, &zero, None);
    for (_, v) in w.iter_mut() {
        v.coefficients.fill(1.0);
    }
    assert_eq!(w.num_cached(), 0);
}

#[test]
fn disabled_cache_recomputes() {
    let projector = Arc::new(CountingProjector::default());
    let mut w = MultiVectorWithProjection::with_projector(two_component_vector(), projector.clone());
    let zero = MultiIndex::zero();
    let e0 = MultiIndex::unit(0);

    let _ = w.get_projection(&zero, &e0, None);
    assert_eq!(w.num_cached(), 1);
    w.set_cache_active(false);
    assert!(!w.cache_active());
    assert_eq!(w.num_cached(), 0);

    let first = w.get_projection(&zero, &e0, None);
    let second = w.get_projection(&zero, &e0, None);
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(*first, *second);
    assert_eq!(w.num_cached(), 0);
    assert_eq!(projector.calls.load(Ordering::SeqCst), 3);
}

#[test]
fn changing_projector_invalidates_cache() {
    let mut w = MultiVectorWithProjection::new(two_component_vector());
    let zero = MultiIndex::zero();
    let e0 = MultiIndex::unit(0);
    let _ = w.get_projection(&zero, &e0, None);
    let id_before = w.projector_id();

    let projector = Arc::new(CountingProjector::default());
    w.set_projector(projector.clone());
    assert_ne!(w.projector_id(), id_before);
    assert_eq!(w.num_cached(), 0);
    let _ = w.get_projection(&zero, &e0, None);
    assert_eq!(projector.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn projection_with_different_degree() {
    let w = MultiVectorWithProjection::new(two_component_vector());
    let zero = MultiIndex::zero();
    let e0 = MultiIndex::unit(0);

    let projected = w.get_projection(&zero, &e0, Some(2));
    assert_eq!(projected.basis(), &TestBasis::new(2, 2));
    assert_eq!(projected.coefficients.as_slice(), &[1.0, 2.0, 3.0, 0.0]);

    // Cached separately from the projection at the own degree
    let own_degree = w.get_projection(&zero, &e0, None);
    assert_eq!(own_degree.dim(), 2);
    assert_eq!(w.num_cached(), 2);
}

#[test]
fn back_projection_round_trip() {
    let w = MultiVectorWithProjection::new(two_component_vector());
    let zero = MultiIndex::zero();
    let e0 = MultiIndex::unit(0);

    let back = w.get_back_projection(&zero, &e0);
    assert_eq!(back.basis(), w[&zero].basis());
    assert_eq!(back.coefficients.as_slice(), &[1.0, 2.0, 0.0]);

    let again = w.get_back_projection(&zero, &e0);
    assert!(Arc::ptr_eq(&back, &again));
    // One projection and one back-projection
    assert_eq!(w.num_cached(), 2);
}

#[test]
fn projection_error_against_reference_degree() {
    let w = MultiVectorWithProjection::new(two_component_vector());
    let zero = MultiIndex::zero();
    let e0 = MultiIndex::unit(0);

    // Reference projection keeps [1, 2, 3, 0], the ordinary one only [1, 2]
    let error = w.projection_error(&zero, &e0, 2);
    assert_eq!(error.basis(), &TestBasis::new(2, 2));
    assert_eq!(error.coefficients.as_slice(), &[0.0, 0.0, -3.0, 0.0]);
}

#[test]
fn clones_do_not_share_caches() {
    let w = MultiVectorWithProjection::new(two_component_vector());
    let zero = MultiIndex::zero();
    let e0 = MultiIndex::unit(0);
    let _ = w.get_projection(&zero, &e0, None);

    let mut copy = w.clone();
    assert_eq!(copy, w);
    assert_eq!(copy.num_cached(), 0);
    copy.scale(3.0);
    assert_eq!(w.num_cached(), 1);
    assert_eq!(w[&zero].coefficients.as_slice(), &[1.0, 2.0, 3.0]);
}

#[test]
fn refine_components_replaces_marked_components() {
    let mut w = MultiVectorWithProjection::new(two_component_vector());
    let zero = MultiIndex::zero();
    let e0 = MultiIndex::unit(0);
    let _ = w.get_projection(&zero, &e0, None);

    let markers = BTreeMap::from([(e0.clone(), vec![0, 1]), (zero.clone(), vec![])]);
    let marked = w.refine_components(&markers).unwrap();
    assert_eq!(marked, 2);
    assert_eq!(w.num_cached(), 0);
    assert_eq!(w[&e0].basis(), &TestBasis::new(4, 1));
    assert_eq!(w[&e0].coefficients.as_slice(), &[4.0, 5.0, 0.0, 0.0]);
    assert_eq!(w[&zero].basis(), &TestBasis::new(3, 1));
}

#[test]
fn refine_components_rejects_inactive_index() {
    let mut w = MultiVectorWithProjection::new(two_component_vector());
    let markers = BTreeMap::from([(MultiIndex::unit(4), vec![0])]);
    assert!(w.refine_components(&markers).is_err());
}

/// Waits inside `project` until a second projection is running concurrently, or gives up.
#[derive(Default)]
struct RendezvousProjector {
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl Projector<TestVector> for RendezvousProjector {
    fn project(&self, source: &TestVector, destination: &TestBasis) -> TestVector {
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
        let start = Instant::now();
        while self.running.load(Ordering::SeqCst) < 2 && start.elapsed() < Duration::from_secs(2) {
            std::thread::sleep(Duration::from_millis(1));
        }
        self.max_running
            .fetch_max(self.running.load(Ordering::SeqCst), Ordering::SeqCst);
        self.running.fetch_sub(1, Ordering::SeqCst);
        destination.project_onto(source)
    }
}

#[test]
fn cache_misses_are_projected_concurrently() {
    let projector = Arc::new(RendezvousProjector::default());
    let w = MultiVectorWithProjection::with_projector(two_component_vector(), projector.clone());
    let zero = MultiIndex::zero();
    let e0 = MultiIndex::unit(0);

    let (forward, backward) = std::thread::scope(|scope| {
        let forward = scope.spawn(|| w.get_projection(&zero, &e0, None));
        let backward = scope.spawn(|| w.get_projection(&e0, &zero, None));
        (forward.join().unwrap(), backward.join().unwrap())
    });
    assert_eq!(projector.max_running.load(Ordering::SeqCst), 2);
    assert_eq!(forward.coefficients.as_slice(), &[1.0, 2.0]);
    assert_eq!(backward.coefficients.as_slice(), &[4.0, 5.0, 0.0]);
    assert_eq!(w.num_cached(), 2);

    // Both results are served from the cache afterwards
    assert!(Arc::ptr_eq(&forward, &w.get_projection(&zero, &e0, None)));
}

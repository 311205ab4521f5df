use crate::{multi_vector_from, TestVector};
use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;
use proptest::prelude::*;
use sgfem::multi_vector::MultiVector;
use sgfem::operator::{IdentityOperator, LinearOperator};
use sgfem::pcg::{pcg, ConjugateGradient, RelativeResidualCriterion, SolveErrorKind};
use std::error::Error;

/// Scales every component coefficient by a fixed diagonal.
struct DiagonalOperator {
    diagonal: Vec<f64>,
}

impl LinearOperator<MultiVector<TestVector>> for DiagonalOperator {
    fn apply(
        &self,
        y: &mut MultiVector<TestVector>,
        x: &MultiVector<TestVector>,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        *y = x.clone();
        let mut k = 0;
        for (_, v) in y.iter_mut() {
            for c in v.coefficients.iter_mut() {
                *c *= self.diagonal[k];
                k += 1;
            }
        }
        Ok(())
    }
}

#[test]
fn pcg_solves_diagonal_system_on_multi_vectors() {
    let diagonal = vec![1.0, 2.0, 4.0, 8.0, 16.0];
    let a = DiagonalOperator { diagonal };
    let b = multi_vector_from(vec![(vec![], vec![1.0, 2.0, 3.0]), (vec![1], vec![4.0, 5.0])]);
    let mut w0 = b.clone();
    w0.set_zero();

    let (w, output) = pcg(&a, &b, &IdentityOperator, w0, 1e-10, 100).unwrap();
    assert!(output.converged);
    assert!(output.zeta <= 1e-10);
    // Five distinct eigenvalues
    assert!(output.num_iterations <= 5);

    let expected = DVector::from_column_slice(&[1.0, 1.0, 0.75, 0.5, 5.0 / 16.0]);
    assert_matrix_eq!(w.flatten(), expected, comp = abs, tol = 1e-9);
}

#[test]
fn exact_preconditioner_converges_in_one_iteration() {
    let diagonal = vec![2.0, 3.0, 5.0];
    let inverse = DiagonalOperator {
        diagonal: diagonal.iter().map(|d| 1.0 / d).collect(),
    };
    let a = DiagonalOperator { diagonal };
    let b = multi_vector_from(vec![(vec![], vec![2.0, 3.0]), (vec![0, 1], vec![5.0])]);
    let mut w0 = b.clone();
    w0.set_zero();

    let (w, output) = pcg(&a, &b, &inverse, w0, 1e-12, 10).unwrap();
    assert_eq!(output.num_iterations, 1);
    assert_matrix_eq!(w.flatten(), DVector::from_element(3, 1.0), comp = abs, tol = 1e-12);
}

#[test]
fn iteration_cap_is_not_an_error() {
    let a = DiagonalOperator {
        diagonal: vec![1.0, 10.0, 100.0, 1000.0],
    };
    let b = multi_vector_from(vec![(vec![], vec![1.0, 1.0, 1.0, 1.0])]);
    let mut w0 = b.clone();
    w0.set_zero();

    let (_, output) = pcg(&a, &b, &IdentityOperator, w0, 1e-14, 2).unwrap();
    assert!(!output.converged);
    assert_eq!(output.num_iterations, 2);
    assert!(output.zeta > 1e-14);
}

#[test]
fn zero_rhs_gives_zero_solution() {
    let a = DiagonalOperator { diagonal: vec![1.0, 2.0] };
    let mut b = multi_vector_from(vec![(vec![], vec![1.0, 2.0])]);
    b.set_zero();
    let w0 = multi_vector_from(vec![(vec![], vec![3.0, 4.0])]);

    let (w, output) = pcg(&a, &b, &IdentityOperator, w0, 1e-10, 10).unwrap();
    assert!(output.converged);
    assert_eq!(output.num_iterations, 0);
    assert_eq!(w.flatten(), DVector::zeros(2));
}

#[test]
fn indefinite_operator_is_reported() {
    let a = DiagonalOperator {
        diagonal: vec![-1.0, -2.0],
    };
    let b = multi_vector_from(vec![(vec![], vec![1.0, 1.0])]);
    let mut w0 = b.clone();
    w0.set_zero();

    let err = pcg(&a, &b, &IdentityOperator, w0, 1e-10, 10).unwrap_err();
    assert!(matches!(err.kind, SolveErrorKind::IndefiniteOperator));
}

#[test]
fn cg_builder_with_sparse_matrix() {
    // 1D Laplacian
    let n = 10;
    let mut dense = DMatrix::zeros(n, n);
    for i in 0..n {
        dense[(i, i)] = 2.0;
        if i + 1 < n {
            dense[(i, i + 1)] = -1.0;
            dense[(i + 1, i)] = -1.0;
        }
    }
    let matrix = CsrMatrix::from(&dense);
    let b = DVector::from_fn(n, |i, _| (i as f64 + 1.0).sin());
    let mut x = DVector::zeros(n);

    let output = ConjugateGradient::new()
        .with_operator(&matrix)
        .with_stopping_criterion(RelativeResidualCriterion::new(1e-12))
        .with_max_iter(100)
        .solve_with_guess(&b, &mut x)
        .unwrap();
    assert!(output.converged);
    assert!(output.num_iterations <= n);

    let expected = dense.lu().solve(&b).unwrap();
    assert_matrix_eq!(x, expected, comp = abs, tol = 1e-9);
}

proptest! {
    #[test]
    fn pcg_converges_for_random_diagonal_operators(
        diagonal in proptest::collection::vec(0.5 .. 20.0, 1 .. 8),
        seed in -10.0 .. 10.0,
    ) {
        let n = diagonal.len();
        let rhs: Vec<f64> = (0..n).map(|i| seed + i as f64).collect();
        let b = multi_vector_from(vec![(vec![], rhs.clone())]);
        let mut w0 = b.clone();
        w0.set_zero();
        let a = DiagonalOperator { diagonal: diagonal.clone() };

        let (w, output) = pcg(&a, &b, &IdentityOperator, w0, 1e-10, 100).unwrap();
        prop_assert!(output.converged);
        prop_assert!(output.num_iterations <= n + 1);
        for (k, &value) in w.flatten().iter().enumerate() {
            let expected = rhs[k] / diagonal[k];
            prop_assert!((value - expected).abs() <= 1e-8 * (1.0 + expected.abs()));
        }
    }
}

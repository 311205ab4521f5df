use crate::{scaling_field, ScalingDiscretisation, TestBasis, TestVector};
use nalgebra::DVector;
use sgfem::adaptive::{
    AdaptiveConfig, AdaptiveSolver, ConfigError, IterationStatistics, RefinementToggles, RunHistory, Timings,
};
use sgfem::estimator::{Estimator, EstimatorParameters, ResidualEstimate, TailEstimate};
use sgfem::marking::BulkMarking;
use sgfem::multi_vector::{MultiVector, MultiVectorWithProjection};
use sgfem::multiindex::MultiIndex;
use sgfem::{CoefficientVector, FunctionBasis, RefinableBasis};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Reports `eta / dofs` spread over all cells and a fixed tail contribution for every
/// inactive first-order index.
struct MockEstimator {
    eta: f64,
    zeta: f64,
    residual_calls: AtomicUsize,
    tail_calls: AtomicUsize,
    failing_tail_call: Option<usize>,
}

impl MockEstimator {
    fn new(eta: f64, zeta: f64) -> Self {
        Self {
            eta,
            zeta,
            residual_calls: AtomicUsize::new(0),
            tail_calls: AtomicUsize::new(0),
            failing_tail_call: None,
        }
    }

    /// Fails the `call`-th evaluation of the tail estimator, counting from one.
    fn failing_at_tail_call(self, call: usize) -> Self {
        Self {
            failing_tail_call: Some(call),
            ..self
        }
    }
}

impl Estimator<TestVector> for MockEstimator {
    fn evaluate_residual_estimator(
        &self,
        w: &MultiVectorWithProjection<TestVector>,
        _parameters: &EstimatorParameters,
    ) -> eyre::Result<ResidualEstimate<f64>> {
        self.residual_calls.fetch_add(1, Ordering::SeqCst);
        let indicator = self.eta / w.total_dim() as f64;
        let local: BTreeMap<_, _> = w
            .iter()
            .map(|(index, v)| (index.clone(), DVector::from_element(v.basis().num_cells(), indicator)))
            .collect();
        let per_index: BTreeMap<_, _> = local
            .iter()
            .map(|(index, local)| (index.clone(), local.norm()))
            .collect();
        let global = per_index.values().map(|eta| eta * eta).sum::<f64>().sqrt();
        Ok(ResidualEstimate {
            global,
            per_index,
            local,
        })
    }

    fn evaluate_upper_tail_bound(
        &self,
        w: &MultiVectorWithProjection<TestVector>,
        _parameters: &EstimatorParameters,
    ) -> eyre::Result<TailEstimate<f64>> {
        let call = self.tail_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_tail_call == Some(call) {
            return Err(eyre::eyre!("Tail estimator backend unavailable"));
        }
        let per_mode: BTreeMap<_, _> = (0..2)
            .map(MultiIndex::unit)
            .filter(|index| !w.contains(index))
            .map(|index| (index, self.zeta))
            .collect();
        let global = per_mode.values().map(|zeta| zeta * zeta).sum::<f64>().sqrt();
        Ok(TailEstimate {
            global,
            per_mode,
            upper_bound: 0.0,
            evaluated_modes: 2,
        })
    }
}

fn initial_solution() -> MultiVectorWithProjection<TestVector> {
    let mut w = MultiVector::new();
    w.insert(MultiIndex::zero(), TestBasis::new(2, 1).zero_vector());
    MultiVectorWithProjection::new(w)
}

fn solver<'a>(
    estimator: &'a MockEstimator,
    config: AdaptiveConfig,
) -> AdaptiveSolver<ScalingDiscretisation, &'a MockEstimator, BulkMarking> {
    AdaptiveSolver::new(Arc::new(ScalingDiscretisation), scaling_field(), estimator, BulkMarking).with_config(config)
}

#[test]
fn config_defaults() {
    let config = AdaptiveConfig::default();
    assert_eq!(config.rho, 1.0);
    assert_eq!(config.sigma, 1.0);
    assert_eq!(config.theta_x, 0.4);
    assert_eq!(config.theta_y, 0.4);
    assert_eq!(config.maxh, 0.1);
    assert_eq!(config.add_maxm, 20);
    assert_eq!(config.quadrature_degree, None);
    assert_eq!(config.pcg_eps, 1e-6);
    assert_eq!(config.pcg_maxiter, 100);
    assert_eq!(config.error_eps, 1e-2);
    assert_eq!(config.max_refinements, 5);
    assert_eq!(
        config.refinement,
        RefinementToggles {
            residual: true,
            tail: true,
            oscillation: false
        }
    );
    assert!(!config.uniform_refinement);
    assert!(config.cache_projections);
    assert!(!config.store_solutions);
    assert!(config.validate().is_ok());

    let parameters = config.estimator_parameters();
    assert_eq!(parameters.maxh, 0.1);
    assert_eq!(parameters.add_maxm, 20);
    assert_eq!(parameters.quadrature_degree, None);
}

#[test]
fn config_validation_rejects_invalid_parameters() {
    let invalid = [
        AdaptiveConfig {
            theta_x: 0.0,
            ..Default::default()
        },
        AdaptiveConfig {
            theta_y: 1.5,
            ..Default::default()
        },
        AdaptiveConfig {
            rho: -1.0,
            ..Default::default()
        },
        AdaptiveConfig {
            sigma: 0.0,
            ..Default::default()
        },
        AdaptiveConfig {
            pcg_eps: -1e-3,
            ..Default::default()
        },
        AdaptiveConfig {
            maxh: 0.0,
            ..Default::default()
        },
    ];
    for config in invalid {
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidParameter { .. }));
    }

    let err = AdaptiveConfig {
        theta_x: 2.0,
        ..Default::default()
    }
    .validate()
    .unwrap_err();
    assert_eq!(
        err,
        ConfigError::InvalidParameter {
            name: "theta_x",
            value: 2.0,
            expected: "in (0, 1]"
        }
    );
    assert_eq!(err.to_string(), "Invalid value 2 for parameter theta_x (expected in (0, 1])");
}

#[test]
fn config_from_partial_json() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{ "theta_x": 0.5, "max_refinements": 2, "refinement": {{ "tail": false }} }}"#
    )
    .unwrap();
    let config = AdaptiveConfig::from_json_file(file.path()).unwrap();
    assert_eq!(config.theta_x, 0.5);
    assert_eq!(config.max_refinements, 2);
    assert!(config.refinement.residual);
    assert!(!config.refinement.tail);
    assert_eq!(config.theta_y, 0.4);

    let mut invalid = tempfile::NamedTempFile::new().unwrap();
    write!(invalid, r#"{{ "theta_y": 0.0 }}"#).unwrap();
    assert!(AdaptiveConfig::from_json_file(invalid.path()).is_err());
    assert!(AdaptiveConfig::from_json_file("does/not/exist.json").is_err());
}

fn statistics(iteration: usize) -> IterationStatistics<f64> {
    IterationStatistics {
        iteration,
        pcg_iterations: 3,
        pcg_zeta: 1e-8,
        pcg_converged: true,
        residual_norm: 1e-8,
        error_estimate: 0.5,
        error_residual: 0.4,
        error_tail: 0.3,
        dofs: 10,
        cells: 5,
        active_indices: vec![MultiIndex::zero()],
        dim: vec![(MultiIndex::zero(), 10)],
        marked_cells: 2,
        marked_indices: 1,
        timings: Timings::default(),
    }
}

#[test]
fn run_history_ignores_duplicate_records() {
    let mut history = RunHistory::new();
    assert!(history.record(statistics(0)));
    assert!(history.record(statistics(1)));
    let mut duplicate = statistics(1);
    duplicate.dofs = 1000;
    assert!(!history.record(duplicate));
    assert_eq!(history.len(), 2);
    assert_eq!(history.get(1).unwrap().dofs, 10);

    assert_eq!(history.cursor().iteration, 0);
    history.advance(2);
    assert_eq!(history.cursor().iteration, 2);
    assert!(!history.is_done());
    history.finish();
    assert!(history.is_done());
}

#[test]
fn loop_stops_after_max_refinements_plus_one_solves() {
    let estimator = MockEstimator::new(1.0, 1.0);
    let config = AdaptiveConfig {
        max_refinements: 3,
        error_eps: 0.0,
        ..Default::default()
    };
    let output = solver(&estimator, config).run(initial_solution()).unwrap();

    let history = &output.history;
    assert_eq!(history.len(), 4);
    assert!(history.is_done());
    assert_eq!(estimator.tail_calls.load(Ordering::SeqCst), 4);
    assert_eq!(estimator.residual_calls.load(Ordering::SeqCst), 4);
    let iterations: Vec<_> = history
        .records()
        .iter()
        .map(|record| record.iteration)
        .collect();
    assert_eq!(iterations, vec![0, 1, 2, 3]);

    // No refinement after the final solve
    let last = history.last().unwrap();
    assert_eq!(last.marked_cells, 0);
    assert_eq!(last.marked_indices, 0);
    assert_eq!(last.dofs, output.solution.total_dim());

    // Earlier iterations refined something
    assert!(history.records()[..3]
        .iter()
        .all(|record| record.marked_cells + record.marked_indices > 0));
    for pair in history.records().windows(2) {
        assert!(pair[1].dofs > pair[0].dofs);
    }
}

#[test]
fn loop_never_refines_after_reaching_accuracy() {
    let estimator = MockEstimator::new(1e-6, 1e-6);
    let output = solver(&estimator, AdaptiveConfig::default())
        .run(initial_solution())
        .unwrap();

    assert_eq!(output.history.len(), 1);
    assert!(output.history.is_done());
    let record = &output.history.records()[0];
    assert!(record.error_estimate <= 1e-2);
    assert_eq!(record.marked_cells, 0);
    assert_eq!(record.marked_indices, 0);
    assert_eq!(output.solution.active_indices(), vec![MultiIndex::zero()]);
    assert_eq!(output.solution[&MultiIndex::zero()].basis, TestBasis::new(2, 1));
}

#[test]
fn solution_of_mean_problem() {
    let estimator = MockEstimator::new(1e-6, 1e-6);
    let output = solver(&estimator, AdaptiveConfig::default())
        .run(initial_solution())
        .unwrap();
    // Only the mean index is active, so A w = 2 w = 1
    let mean = &output.solution[&MultiIndex::zero()];
    for &c in mean.coefficients.iter() {
        assert!((c - 0.5).abs() <= 1e-10);
    }
    let record = &output.history.records()[0];
    assert!(record.pcg_converged);
    assert!(record.residual_norm <= 1e-10);
}

#[test]
fn tail_dominated_iterations_skip_spatial_marking() {
    let estimator = MockEstimator::new(1e-3, 1.0);
    let config = AdaptiveConfig {
        max_refinements: 1,
        error_eps: 0.0,
        ..Default::default()
    };
    let output = solver(&estimator, config).run(initial_solution()).unwrap();

    let first = &output.history.records()[0];
    assert_eq!(first.marked_cells, 0);
    assert!(first.marked_indices > 0);
    assert_eq!(output.solution[&MultiIndex::zero()].basis, TestBasis::new(2, 1));
}

#[test]
fn residual_dominated_iterations_refine_cells() {
    let estimator = MockEstimator::new(1.0, 1e-3);
    let config = AdaptiveConfig {
        max_refinements: 1,
        error_eps: 0.0,
        ..Default::default()
    };
    let output = solver(&estimator, config).run(initial_solution()).unwrap();

    let first = &output.history.records()[0];
    assert!(first.marked_cells > 0);
    assert!(output.solution[&MultiIndex::zero()].basis.num_cells > 2);
}

#[test]
fn uniform_refinement_marks_every_cell() {
    let estimator = MockEstimator::new(1.0, 1.0);
    let config = AdaptiveConfig {
        max_refinements: 1,
        error_eps: 0.0,
        uniform_refinement: true,
        refinement: RefinementToggles {
            residual: true,
            tail: false,
            oscillation: false,
        },
        store_solutions: true,
        ..Default::default()
    };
    let output = solver(&estimator, config).run(initial_solution()).unwrap();

    let first = &output.history.records()[0];
    assert_eq!(first.marked_cells, 2);
    assert_eq!(first.marked_indices, 0);
    assert_eq!(output.solution[&MultiIndex::zero()].basis, TestBasis::new(4, 1));
    assert_eq!(output.solutions.len(), 2);
    assert_eq!(output.solutions[0][&MultiIndex::zero()].dim(), 2);
    assert_eq!(output.solutions[1][&MultiIndex::zero()].dim(), 4);
}

#[test]
fn resume_continues_at_cursor() {
    let estimator = MockEstimator::new(1.0, 1.0);
    let config = AdaptiveConfig {
        max_refinements: 3,
        error_eps: 0.0,
        ..Default::default()
    };
    let mut history = RunHistory::new();
    history.advance(2);
    let output = solver(&estimator, config)
        .resume(initial_solution(), history)
        .unwrap();
    let iterations: Vec<_> = output
        .history
        .records()
        .iter()
        .map(|record| record.iteration)
        .collect();
    assert_eq!(iterations, vec![2, 3]);
    assert_eq!(estimator.tail_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn failed_run_keeps_progress_for_resuming() {
    let config = AdaptiveConfig {
        max_refinements: 5,
        error_eps: 0.0,
        ..Default::default()
    };
    let mut w = initial_solution();
    let initial_dofs = w.total_dim();
    let mut history = RunHistory::new();

    let failing = MockEstimator::new(1.0, 1.0).failing_at_tail_call(3);
    let err = solver(&failing, config.clone())
        .resume_in_place(&mut w, &mut history)
        .unwrap_err();
    assert!(err.to_string().contains("Failed to evaluate the tail estimator"));
    assert_eq!(failing.tail_calls.load(Ordering::SeqCst), 3);

    // The completed iterations and the refined iterate survive the failure
    assert_eq!(history.len(), 2);
    assert!(!history.is_done());
    assert_eq!(history.cursor().iteration, 2);
    assert!(w.total_dim() > initial_dofs);
    let dofs_at_failure = w.total_dim();

    let estimator = MockEstimator::new(1.0, 1.0);
    solver(&estimator, config)
        .resume_in_place(&mut w, &mut history)
        .unwrap();
    assert_eq!(estimator.tail_calls.load(Ordering::SeqCst), 4);
    assert!(history.is_done());
    let iterations: Vec<_> = history
        .records()
        .iter()
        .map(|record| record.iteration)
        .collect();
    assert_eq!(iterations, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(history.records()[2].dofs, dofs_at_failure);
}

#[test]
fn resuming_past_max_refinements_finishes_run() {
    let estimator = MockEstimator::new(1.0, 1.0);
    let config = AdaptiveConfig {
        max_refinements: 2,
        error_eps: 0.0,
        ..Default::default()
    };
    let mut history = RunHistory::new();
    history.advance(5);
    let output = solver(&estimator, config)
        .resume(initial_solution(), history)
        .unwrap();
    assert!(output.history.is_done());
    assert!(output.history.is_empty());
    assert_eq!(estimator.tail_calls.load(Ordering::SeqCst), 0);
    assert_eq!(estimator.residual_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn finished_run_is_not_resumed() {
    let estimator = MockEstimator::new(1.0, 1.0);
    let mut history = RunHistory::new();
    history.finish();
    let output = solver(&estimator, AdaptiveConfig::default())
        .resume(initial_solution(), history)
        .unwrap();
    assert!(output.history.is_empty());
    assert_eq!(estimator.tail_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn invalid_initial_solutions_are_rejected() {
    let estimator = MockEstimator::new(1.0, 1.0);
    let solver = solver(&estimator, AdaptiveConfig::default());

    let err = solver
        .run(MultiVectorWithProjection::new(MultiVector::new()))
        .unwrap_err();
    assert_eq!(err.downcast_ref::<ConfigError>(), Some(&ConfigError::EmptyIndexSet));

    let mut w = MultiVector::new();
    w.insert(MultiIndex::unit(0), TestBasis::new(2, 1).zero_vector());
    let err = solver
        .run(MultiVectorWithProjection::new(w))
        .unwrap_err();
    assert_eq!(err.downcast_ref::<ConfigError>(), Some(&ConfigError::MissingMeanIndex));

    let invalid = self::solver(
        &estimator,
        AdaptiveConfig {
            theta_y: 0.0,
            ..Default::default()
        },
    );
    let err = invalid.run(initial_solution()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::InvalidParameter { name: "theta_y", .. })
    ));
    assert_eq!(estimator.tail_calls.load(Ordering::SeqCst), 0);
}

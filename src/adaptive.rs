//! The adaptive solve, estimate, mark and refine loop.
//!
//! Each iteration solves the stochastic Galerkin system with PCG, evaluates the residual and
//! tail estimators and combines them into `ξ = sqrt(η² + ζ²)`. The loop stops once `ξ` reaches
//! the requested accuracy or after `max_refinements + 1` solves. Otherwise it refines the
//! spatial discretisation of marked components and activates new multi-indices.
use crate::coefficient_field::CoefficientField;
use crate::estimator::{combined_estimate, Estimator, ResidualEstimate, TailEstimate};
use crate::marking::{zero_in_mean_basis, Marking, VectorFactory};
use crate::multi_vector::{MultiVector, MultiVectorWithProjection};
use crate::multiindex::MultiIndex;
use crate::operator::{prepare_rhs, residual_norm, FemDiscretisation, MultiOperator, PreconditioningOperator};
use crate::pcg::{pcg, CgOutput};
use eyre::WrapErr;
use log::info;
use nalgebra::convert;
use sgfem_traits::{CoefficientVector, RefinableBasis};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

mod config;
mod statistics;

pub use config::{AdaptiveConfig, ConfigError, RefinementToggles};
pub use statistics::{Cursor, IterationStatistics, RunHistory, Timings};

/// Runs `f`, logging and returning its duration in seconds.
fn timed<R>(label: &str, f: impl FnOnce() -> R) -> (R, f64) {
    let start = Instant::now();
    let result = f();
    let seconds = start.elapsed().as_secs_f64();
    info!("{} took {:.3} s", label, seconds);
    (result, seconds)
}

/// The outcome of an adaptive run.
#[derive(Debug)]
pub struct AdaptiveOutput<V: CoefficientVector> {
    pub solution: MultiVectorWithProjection<V>,
    pub history: RunHistory<V::Scalar>,
    /// Solutions of the individual iterations, if requested in the configuration.
    pub solutions: Vec<MultiVector<V>>,
}

pub struct AdaptiveSolver<D, E, M>
where
    D: FemDiscretisation,
{
    config: AdaptiveConfig,
    discretisation: Arc<D>,
    coefficient_field: Arc<CoefficientField<D::Coefficient>>,
    estimator: E,
    marking: M,
    vector_factory: Box<VectorFactory<'static, D::Vector>>,
}

impl<D, E, M> AdaptiveSolver<D, E, M>
where
    D: FemDiscretisation,
    D::Vector: 'static,
    D::Basis: RefinableBasis,
    E: Estimator<D::Vector>,
    M: Marking<D::Vector>,
{
    /// Creates a solver with the default configuration.
    ///
    /// Newly activated multi-indices start from zero in the basis of the mean component.
    pub fn new(
        discretisation: Arc<D>,
        coefficient_field: Arc<CoefficientField<D::Coefficient>>,
        estimator: E,
        marking: M,
    ) -> Self {
        Self {
            config: AdaptiveConfig::default(),
            discretisation,
            coefficient_field,
            estimator,
            marking,
            vector_factory: Box::new(zero_in_mean_basis::<D::Vector>),
        }
    }

    pub fn with_config(self, config: AdaptiveConfig) -> Self {
        Self { config, ..self }
    }

    pub fn with_vector_factory(
        self,
        factory: impl 'static + Fn(&MultiIndex, &MultiVector<D::Vector>) -> D::Vector,
    ) -> Self {
        Self {
            vector_factory: Box::new(factory),
            ..self
        }
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    /// Runs the adaptive loop from `w0`.
    pub fn run(&self, w0: MultiVectorWithProjection<D::Vector>) -> eyre::Result<AdaptiveOutput<D::Vector>> {
        self.resume(w0, RunHistory::new())
    }

    /// Continues a run at the iteration given by the cursor of `history`.
    ///
    /// `w` is the solution the previous run left off with. Use
    /// [`resume_in_place`](Self::resume_in_place) to keep the progress of a run that fails.
    pub fn resume(
        &self,
        mut w: MultiVectorWithProjection<D::Vector>,
        mut history: RunHistory<D::Scalar>,
    ) -> eyre::Result<AdaptiveOutput<D::Vector>> {
        let solutions = self.resume_in_place(&mut w, &mut history)?;
        Ok(AdaptiveOutput {
            solution: w,
            history,
            solutions,
        })
    }

    /// Continues a run at the iteration given by the cursor of `history`, updating `w` and
    /// `history` as the iterations complete.
    ///
    /// If an iteration fails, `w` holds the latest iterate and `history` the completed
    /// iterations with its cursor on the failed one, so the run can be resumed from there.
    /// Returns the solutions of the iterations carried out, if requested in the configuration.
    pub fn resume_in_place(
        &self,
        w: &mut MultiVectorWithProjection<D::Vector>,
        history: &mut RunHistory<D::Scalar>,
    ) -> eyre::Result<Vec<MultiVector<D::Vector>>> {
        self.config.validate()?;
        if w.is_empty() {
            return Err(ConfigError::EmptyIndexSet.into());
        }
        if !w.contains(&MultiIndex::zero()) {
            return Err(ConfigError::MissingMeanIndex.into());
        }

        w.set_cache_active(self.config.cache_projections);
        let mut solutions = Vec::new();

        if history.is_done() {
            info!("Run already finished after iteration {}", history.cursor().iteration);
            return Ok(solutions);
        }

        let max_refinements = self.config.max_refinements;
        let start = history.cursor().iteration;
        if start > max_refinements {
            info!(
                "Iteration {} exceeds the maximal number of refinements {}, finishing run",
                start, max_refinements
            );
            history.finish();
            return Ok(solutions);
        }

        let a = MultiOperator::new(Arc::clone(&self.discretisation), Arc::clone(&self.coefficient_field));
        let p = PreconditioningOperator::new(Arc::clone(&self.discretisation), Arc::clone(&self.coefficient_field));
        info!("Starting adaptive loop at iteration {}", start);

        for iteration in start..=max_refinements {
            info!("Refinement loop iteration {} (of {})", iteration, max_refinements);
            let mut timings = Timings::default();

            let (solved, seconds) = timed("PCG solve", || self.solve(&a, &p, w));
            let (output, residual) = solved?;
            timings.pcg = seconds;
            info!("DIM of w = {}", w.total_dim());

            let (tail, seconds) = timed("Tail estimator", || {
                self.estimator
                    .evaluate_upper_tail_bound(w, &self.config.estimator_parameters())
            });
            let tail = tail.wrap_err("Failed to evaluate the tail estimator")?;
            timings.tail = seconds;

            let (res, seconds) = timed("Residual estimator", || {
                self.estimator
                    .evaluate_residual_estimator(w, &self.config.estimator_parameters())
            });
            let res = res.wrap_err("Failed to evaluate the residual estimator")?;
            timings.residual = seconds;

            let xi = combined_estimate(res.global, tail.global);
            info!(
                "Overall error estimate xi = {} with residual error {} and tail error {}",
                xi, res.global, tail.global
            );

            let mut statistics = IterationStatistics {
                iteration,
                pcg_iterations: output.num_iterations,
                pcg_zeta: output.zeta,
                pcg_converged: output.converged,
                residual_norm: residual,
                error_estimate: xi,
                error_residual: res.global,
                error_tail: tail.global,
                dofs: w.total_dim(),
                cells: w.values().map(|v| v.basis().num_cells()).sum(),
                active_indices: w.active_indices(),
                dim: w.dim().into_iter().collect(),
                marked_cells: 0,
                marked_indices: 0,
                timings,
            };
            if self.config.store_solutions {
                solutions.push(w.as_multi_vector().clone());
            }

            let accurate = xi <= convert(self.config.error_eps);
            let last = iteration >= max_refinements;
            if accurate {
                info!("Error estimate reached requested accuracy, xi = {}", xi);
            } else if last {
                info!("Skipping refinement after final solve in iteration {}", iteration);
            } else {
                self.mark_and_refine(w, &res, &tail, &mut statistics)?;
            }

            history.record(statistics);
            if accurate || last {
                history.finish();
                break;
            }
            history.advance(iteration + 1);
        }

        if let Some(last) = history.last() {
            info!(
                "Ended refinement loop after iteration {} of {} with {} dofs and {} active multi-indices",
                last.iteration,
                max_refinements,
                last.dofs,
                last.active_indices.len()
            );
        }

        Ok(solutions)
    }

    /// Solves the Galerkin system with `w` as initial guess and stores the solution in `w`.
    fn solve(
        &self,
        a: &MultiOperator<D>,
        p: &PreconditioningOperator<D>,
        w: &mut MultiVectorWithProjection<D::Vector>,
    ) -> eyre::Result<(CgOutput<D::Scalar>, D::Scalar)> {
        let b = prepare_rhs(&*self.discretisation, w)?;
        let (solved, output) = pcg(a, &b, p, w.clone(), convert(self.config.pcg_eps), self.config.pcg_maxiter)
            .wrap_err("PCG solve failed")?;
        info!(
            "PCG finished with zeta = {} after {} iterations",
            output.zeta, output.num_iterations
        );
        let residual = residual_norm(a, &b, &solved)?;
        info!("Residual = {} with {} dofs", residual, solved.total_dim());
        *w = solved;
        Ok((output, residual))
    }

    fn mark_and_refine(
        &self,
        w: &mut MultiVectorWithProjection<D::Vector>,
        res: &ResidualEstimate<D::Scalar>,
        tail: &TailEstimate<D::Scalar>,
        statistics: &mut IterationStatistics<D::Scalar>,
    ) -> eyre::Result<()> {
        let toggles = self.config.refinement;
        let timings = &mut statistics.timings;

        let mut markers: BTreeMap<MultiIndex, Vec<usize>> = BTreeMap::new();
        if toggles.residual {
            if self.config.uniform_refinement {
                info!("Uniform spatial refinement");
                markers = w
                    .iter()
                    .map(|(index, v)| (index.clone(), (0..v.basis().num_cells()).collect()))
                    .collect();
            } else {
                let sigma: D::Scalar = convert(self.config.sigma);
                let rho: D::Scalar = convert(self.config.rho);
                if !toggles.tail || sigma * res.global > rho * tail.global {
                    let (marked, seconds) = timed("Residual marking", || self.marking.mark_x(res, self.config.theta_x));
                    markers = marked;
                    timings.mark_residual = seconds;
                } else {
                    info!("Residual error dominated by tail error, no spatial marking");
                }
            }
        } else {
            info!("Skipping residual refinement");
        }

        if toggles.oscillation {
            let (osc_markers, seconds) = timed("Oscillation marking", || self.marking.mark_osc(w));
            timings.refine_oscillation = seconds;
            for (index, cells) in osc_markers {
                let entry = markers.entry(index).or_default();
                entry.extend(cells);
                entry.sort_unstable();
                entry.dedup();
            }
        }

        let (refined, seconds) = timed("Spatial refinement", || self.marking.refine_x(w, &markers));
        let marked_cells = refined.wrap_err("Spatial refinement failed")?;
        timings.refine_residual = seconds;

        let new_indices = if toggles.tail {
            let (new_indices, seconds) = timed("Tail marking", || self.marking.mark_y(tail, self.config.theta_y));
            timings.mark_tail = seconds;
            new_indices
        } else {
            info!("Skipping tail refinement");
            Vec::new()
        };
        let (activated, seconds) = timed("Activating multi-indices", || {
            self.marking
                .refine_y(w, &new_indices, &*self.vector_factory)
        });
        timings.refine_tail = seconds;

        info!(
            "Marking carried out with {} cells and {} new multi-indices",
            marked_cells, activated
        );
        statistics.marked_cells = marked_cells;
        statistics.marked_indices = activated;
        Ok(())
    }
}

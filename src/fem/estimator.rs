use crate::coefficient_field::CoefficientField;
use crate::estimator::{Estimator, EstimatorParameters, ResidualEstimate, TailEstimate};
use crate::fem::problem::{PoissonProblem1d, ScalarFunction};
use crate::fem::space::{unit_gauss_rule, LagrangeVector};
use crate::multi_vector::MultiVectorWithProjection;
use crate::multiindex::MultiIndex;
use crate::polynomials::PolynomialFamily;
use eyre::eyre;
use nalgebra::{convert, DVector};
use sgfem_traits::{CoefficientVector, FunctionBasis, Real};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Residual and tail estimators for [`PoissonProblem1d`] with an affine coefficient field.
///
/// The residual indicator of cell `T` in component `μ` is
///
/// ```text
/// η_T² = h_T² ||δ_{μ0} f + σ_μ'||²_T + Σ_{interior vertices v of T} h_T/2 |[σ_μ](v)|²
/// ```
///
/// with the discrete flux `σ_μ = a_0 w_μ' + Σ_m a_m (β1 w_{μ-e_m} - β0 w_μ + β-1 w_{μ+e_m})'`,
/// where neighbouring components are projected onto the basis of `w_μ`.
///
/// The tail indicator of an inactive index `ν` adjacent to the active set bounds the dual norm
/// of the residual in component `ν` by `Σ β ||a_m / a_0||_∞ ||w_μ||_{A_0}` over its active
/// neighbours `μ = ν ∓ e_m`.
#[derive(Debug, Clone)]
pub struct ResidualEstimator1d<T> {
    problem: Arc<PoissonProblem1d<T>>,
    coefficient_field: Arc<CoefficientField<ScalarFunction<T>>>,
}

impl<T: Real> ResidualEstimator1d<T> {
    pub fn new(problem: Arc<PoissonProblem1d<T>>, coefficient_field: Arc<CoefficientField<ScalarFunction<T>>>) -> Self {
        Self {
            problem,
            coefficient_field,
        }
    }

    /// The derivative of the flux `σ_μ` at `x` in `cell`.
    fn flux_derivative(&self, w_mu: &LagrangeVector<T>, couplings: &[Option<LagrangeVector<T>>], cell: usize, x: T) -> T {
        let field = &self.coefficient_field;
        let a0 = field.mean();
        let (_, dw, d2w) = evaluate_in_cell(w_mu, cell, x);
        let mut flux_derivative = a0.derivative(x) * dw + a0.eval(x) * d2w;
        for ((a_m, _), coupling) in field.terms().zip(couplings) {
            if let Some(coupling) = coupling {
                let (_, dv, d2v) = evaluate_in_cell(coupling, cell, x);
                flux_derivative += a_m.derivative(x) * dv + a_m.eval(x) * d2v;
            }
        }
        flux_derivative
    }

    /// The combinations of components multiplying `a_m` in the flux of `μ`.
    fn couplings(
        &self,
        w: &MultiVectorWithProjection<LagrangeVector<T>>,
        index: &MultiIndex,
    ) -> Vec<Option<LagrangeVector<T>>> {
        let w_mu = &w[index];
        self.coefficient_field
            .terms()
            .enumerate()
            .map(|(m, (_, rv))| {
                let polys = rv.orth_polys();
                let mu_m = index.get(m) as usize;
                let mut coupling = w_mu.basis().zero_vector();
                let mut coupled = false;

                let (beta0, _, _) = polys.get_beta::<T>(mu_m);
                if beta0 != T::zero() {
                    coupling.axpy(-beta0, w_mu);
                    coupled = true;
                }
                if let Some(lower) = index.dec(m).filter(|lower| w.contains(lower)) {
                    let (_, beta_plus, _) = polys.get_beta::<T>(mu_m - 1);
                    coupling.axpy(beta_plus, &w.get_projection(&lower, index, None));
                    coupled = true;
                }
                let upper = index.inc(m);
                if w.contains(&upper) {
                    let (_, _, beta_minus) = polys.get_beta::<T>(mu_m + 1);
                    coupling.axpy(beta_minus, &w.get_projection(&upper, index, None));
                    coupled = true;
                }
                coupled.then(|| coupling)
            })
            .collect()
    }

    fn energy_norm(&self, v: &LagrangeVector<T>, num_points: usize) -> T {
        let a0 = self.coefficient_field.mean();
        let mesh = v.basis().mesh();
        let (points, weights) = unit_gauss_rule::<T>(num_points);
        let mut energy = T::zero();
        for cell in 0..mesh.num_cells() {
            let (a, _) = mesh.cell(cell);
            let h = mesh.cell_width(cell);
            for (&xi, &weight) in points.iter().zip(&weights) {
                let (_, dv, _) = v
                    .basis()
                    .evaluate_on_cell(v.coefficient_vector(), cell, xi);
                energy += weight * h * a0.eval(a + h * xi) * dv * dv;
            }
        }
        energy.sqrt()
    }
}

fn evaluate_in_cell<T: Real>(v: &LagrangeVector<T>, cell: usize, x: T) -> (T, T, T) {
    let mesh = v.basis().mesh();
    let (a, _) = mesh.cell(cell);
    v.basis()
        .evaluate_on_cell(v.coefficient_vector(), cell, (x - a) / mesh.cell_width(cell))
}

impl<T: Real> Estimator<LagrangeVector<T>> for ResidualEstimator1d<T> {
    fn evaluate_residual_estimator(
        &self,
        w: &MultiVectorWithProjection<LagrangeVector<T>>,
        parameters: &EstimatorParameters,
    ) -> eyre::Result<ResidualEstimate<T>> {
        let half: T = convert(0.5);
        let mut per_index = BTreeMap::new();
        let mut local = BTreeMap::new();
        let mut global_sq = T::zero();

        for (index, w_mu) in w.iter() {
            let basis = w_mu.basis();
            let mesh = basis.mesh();
            let num_points = parameters
                .quadrature_degree
                .map(|degree| degree / 2 + 1)
                .unwrap_or_else(|| self.problem.quadrature_points(basis));
            let (points, weights) = unit_gauss_rule::<T>(num_points);
            let couplings = self.couplings(w, index);
            let is_mean = index.is_zero();

            // Flux of the cell on the left and right of each vertex, evaluated in the cell
            let flux_in_cell = |cell: usize, x: T| {
                let (_, dw, _) = evaluate_in_cell(w_mu, cell, x);
                let mut flux = self.coefficient_field.mean().eval(x) * dw;
                for ((a_m, _), coupling) in self.coefficient_field.terms().zip(&couplings) {
                    if let Some(coupling) = coupling {
                        let (_, dv, _) = evaluate_in_cell(coupling, cell, x);
                        flux += a_m.eval(x) * dv;
                    }
                }
                flux
            };

            let mut indicators = DVector::zeros(mesh.num_cells());
            for cell in 0..mesh.num_cells() {
                let (a, b) = mesh.cell(cell);
                let h = mesh.cell_width(cell);

                let mut volume = T::zero();
                for (&xi, &weight) in points.iter().zip(&weights) {
                    let x = a + h * xi;
                    let flux_derivative = self.flux_derivative(w_mu, &couplings, cell, x);
                    let source = if is_mean { self.problem.source().eval(x) } else { T::zero() };
                    let residual = source + flux_derivative;
                    volume += weight * h * residual * residual;
                }

                let mut jumps = T::zero();
                if cell > 0 {
                    let jump = flux_in_cell(cell, a) - flux_in_cell(cell - 1, a);
                    jumps += half * h * jump * jump;
                }
                if cell + 1 < mesh.num_cells() {
                    let jump = flux_in_cell(cell + 1, b) - flux_in_cell(cell, b);
                    jumps += half * h * jump * jump;
                }
                indicators[cell] = (h * h * volume + jumps).sqrt();
            }

            let eta_mu_sq = indicators.norm_squared();
            global_sq += eta_mu_sq;
            per_index.insert(index.clone(), eta_mu_sq.sqrt());
            local.insert(index.clone(), indicators);
        }

        Ok(ResidualEstimate {
            global: global_sq.sqrt(),
            per_index,
            local,
        })
    }

    fn evaluate_upper_tail_bound(
        &self,
        w: &MultiVectorWithProjection<LagrangeVector<T>>,
        parameters: &EstimatorParameters,
    ) -> eyre::Result<TailEstimate<T>> {
        let field = &self.coefficient_field;
        let num_modes = field.len();
        let evaluated_modes = num_modes.min(w.max_order() + parameters.add_maxm);
        let maxh: T = convert(parameters.maxh);
        let (a, b) = w
            .get(&MultiIndex::zero())
            .ok_or_else(|| eyre!("The tail estimator needs an active mean index"))?
            .basis()
            .mesh()
            .bounds();
        let ratios: Vec<T> = field
            .terms()
            .map(|(a_m, _)| a_m.max_abs_ratio(field.mean(), a, b, maxh))
            .collect();

        let energies: BTreeMap<&MultiIndex, T> = w
            .iter()
            .map(|(index, w_mu)| {
                let num_points = self.problem.quadrature_points(w_mu.basis());
                (index, self.energy_norm(w_mu, num_points))
            })
            .collect();

        let mut per_mode: BTreeMap<MultiIndex, T> = BTreeMap::new();
        let mut upper_bound_sq = T::zero();
        for (m, (_, rv)) in field.terms().enumerate() {
            let polys = rv.orth_polys();
            let mut beyond_evaluated = T::zero();
            for (index, &energy) in &energies {
                let mu_m = index.get(m) as usize;
                let (_, _, beta_minus) = polys.get_beta::<T>(mu_m + 1);
                let upper = index.inc(m);
                if !w.contains(&upper) {
                    let contribution = beta_minus * ratios[m] * energy;
                    if m < evaluated_modes {
                        *per_mode.entry(upper).or_insert_with(T::zero) += contribution;
                    } else {
                        beyond_evaluated += contribution;
                    }
                }
                if let Some(lower) = index.dec(m).filter(|lower| !w.contains(lower)) {
                    let (_, beta_plus, _) = polys.get_beta::<T>(mu_m - 1);
                    if m < evaluated_modes {
                        *per_mode.entry(lower).or_insert_with(T::zero) += beta_plus * ratios[m] * energy;
                    }
                }
            }
            upper_bound_sq += beyond_evaluated * beyond_evaluated;
        }

        let upper_bound = upper_bound_sq.sqrt();
        let global_sq = per_mode
            .values()
            .fold(upper_bound_sq, |acc, &zeta| acc + zeta * zeta);
        Ok(TailEstimate {
            global: global_sq.sqrt(),
            per_mode,
            upper_bound,
            evaluated_modes,
        })
    }
}

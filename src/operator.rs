//! Linear operators on (multi-)vectors and the stochastic Galerkin operator.
use crate::coefficient_field::CoefficientField;
use crate::multi_vector::{MultiVector, MultiVectorWithProjection};
use crate::multiindex::MultiIndex;
use crate::polynomials::PolynomialFamily;
use eyre::eyre;
use log::debug;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::ops::serial::spmm_csr_dense;
use nalgebra_sparse::ops::Op;
use nalgebra_sparse::CsrMatrix;
use num::One;
use parking_lot::Mutex;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use sgfem_traits::{CoefficientVector, FunctionBasis, Real};
use std::error::Error;
use std::sync::Arc;

pub trait LinearOperator<X> {
    /// Computes `y = A x`.
    fn apply(&self, y: &mut X, x: &X) -> Result<(), Box<dyn Error + Send + Sync>>;
}

impl<'a, X, A> LinearOperator<X> for &'a A
where
    A: ?Sized + LinearOperator<X>,
{
    fn apply(&self, y: &mut X, x: &X) -> Result<(), Box<dyn Error + Send + Sync>> {
        <A as LinearOperator<X>>::apply(self, y, x)
    }
}

impl<T: Real> LinearOperator<DVector<T>> for DMatrix<T> {
    fn apply(&self, y: &mut DVector<T>, x: &DVector<T>) -> Result<(), Box<dyn Error + Send + Sync>> {
        y.resize_vertically_mut(self.nrows(), T::zero());
        y.gemv(T::one(), self, x, T::zero());
        Ok(())
    }
}

impl<T: Real> LinearOperator<DVector<T>> for CsrMatrix<T> {
    fn apply(&self, y: &mut DVector<T>, x: &DVector<T>) -> Result<(), Box<dyn Error + Send + Sync>> {
        y.resize_vertically_mut(self.nrows(), T::zero());
        spmm_csr_dense(T::zero(), &mut *y, T::one(), Op::NoOp(self), Op::NoOp(x));
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, Default)]
pub struct IdentityOperator;

impl<X: Clone> LinearOperator<X> for IdentityOperator {
    fn apply(&self, y: &mut X, x: &X) -> Result<(), Box<dyn Error + Send + Sync>> {
        y.clone_from(x);
        Ok(())
    }
}

/// The finite element backend consumed by the stochastic Galerkin operators.
///
/// Assembly is deterministic given its inputs. Operators act on a single component and are
/// expressed in the basis they were assembled for.
pub trait FemDiscretisation: Send + Sync {
    type Scalar: Real;
    type Basis: FunctionBasis<Scalar = Self::Scalar, Vector = Self::Vector> + Send + Sync;
    type Vector: CoefficientVector<Scalar = Self::Scalar, Basis = Self::Basis> + Send + Sync;
    /// A (spatial) coefficient function of the differential operator.
    type Coefficient: Send + Sync;
    type Operator: LinearOperator<Self::Vector> + Send + Sync;
    type SolveOperator: LinearOperator<Self::Vector> + Send + Sync;

    /// Assembles the operator of the PDE with the given coefficient.
    fn assemble_operator(&self, coefficient: &Self::Coefficient, basis: &Self::Basis) -> eyre::Result<Self::Operator>;

    /// Assembles an operator applying the inverse of the PDE operator with the given coefficient.
    fn assemble_solve_operator(
        &self,
        coefficient: &Self::Coefficient,
        basis: &Self::Basis,
    ) -> eyre::Result<Self::SolveOperator>;

    /// Assembles the (deterministic) right-hand side.
    fn assemble_rhs(&self, basis: &Self::Basis) -> eyre::Result<Self::Vector>;
}

struct AssembledOperators<B, Op> {
    basis: B,
    mean: Op,
    terms: Vec<Op>,
}

type OperatorCache<B, Op> = Mutex<FxHashMap<MultiIndex, Arc<AssembledOperators<B, Op>>>>;

/// Looks up operators assembled for `index`, reassembling them if the basis has changed.
fn cached_or_assemble<B, Op>(
    cache: &OperatorCache<B, Op>,
    index: &MultiIndex,
    basis: &B,
    assemble: impl FnOnce() -> eyre::Result<AssembledOperators<B, Op>>,
) -> eyre::Result<Arc<AssembledOperators<B, Op>>>
where
    B: PartialEq,
{
    if let Some(assembled) = cache.lock().get(index) {
        if &assembled.basis == basis {
            return Ok(Arc::clone(assembled));
        }
    }
    debug!("Assembling operators for component {}", index);
    let assembled = Arc::new(assemble()?);
    cache
        .lock()
        .insert(index.clone(), Arc::clone(&assembled));
    Ok(assembled)
}

/// The stochastic Galerkin operator of an affine coefficient field.
///
/// For the field `a(x, y) = a_0(x) + Σ_m a_m(x) y_m` with orthonormal polynomials in `y_m`,
/// the component `μ` of `A w` is
///
/// ```text
/// A_0 w_μ + Σ_m A_m ( β1(μ_m - 1) w_{μ-e_m} - β0(μ_m) w_μ + β-1(μ_m + 1) w_{μ+e_m} )
/// ```
///
/// where the neighbouring components are projected onto the basis of `w_μ` and only active
/// neighbours contribute.
pub struct MultiOperator<D: FemDiscretisation> {
    discretisation: Arc<D>,
    coefficient_field: Arc<CoefficientField<D::Coefficient>>,
    cache: OperatorCache<D::Basis, D::Operator>,
}

impl<D: FemDiscretisation> MultiOperator<D> {
    pub fn new(discretisation: Arc<D>, coefficient_field: Arc<CoefficientField<D::Coefficient>>) -> Self {
        Self {
            discretisation,
            coefficient_field,
            cache: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn coefficient_field(&self) -> &CoefficientField<D::Coefficient> {
        &self.coefficient_field
    }

    fn operators(
        &self,
        index: &MultiIndex,
        basis: &D::Basis,
    ) -> eyre::Result<Arc<AssembledOperators<D::Basis, D::Operator>>> {
        cached_or_assemble(&self.cache, index, basis, || {
            let mean = self
                .discretisation
                .assemble_operator(self.coefficient_field.mean(), basis)?;
            let terms = self
                .coefficient_field
                .terms()
                .map(|(a_m, _)| self.discretisation.assemble_operator(a_m, basis))
                .collect::<eyre::Result<Vec<_>>>()?;
            Ok(AssembledOperators {
                basis: basis.clone(),
                mean,
                terms,
            })
        })
    }

    fn apply_component(
        &self,
        x: &MultiVectorWithProjection<D::Vector>,
        index: &MultiIndex,
    ) -> Result<D::Vector, Box<dyn Error + Send + Sync>> {
        let w_mu = &x[index];
        let basis = w_mu.basis();
        let operators = self.operators(index, basis)?;

        let mut result = basis.zero_vector();
        operators.mean.apply(&mut result, w_mu)?;

        let mut coupled = basis.zero_vector();
        let mut applied = basis.zero_vector();
        for (m, ((_, rv), a_m)) in self
            .coefficient_field
            .terms()
            .zip(&operators.terms)
            .enumerate()
        {
            let polys = rv.orth_polys();
            let mu_m = index.get(m) as usize;
            coupled.set_zero();

            let (beta0, _, _) = polys.get_beta::<D::Scalar>(mu_m);
            coupled.axpy(-beta0, w_mu);
            if let Some(lower) = index.dec(m).filter(|lower| x.contains(lower)) {
                let (_, beta_plus, _) = polys.get_beta::<D::Scalar>(mu_m - 1);
                coupled.axpy(beta_plus, &x.get_projection(&lower, index, None));
            }
            let upper = index.inc(m);
            if x.contains(&upper) {
                let (_, _, beta_minus) = polys.get_beta::<D::Scalar>(mu_m + 1);
                coupled.axpy(beta_minus, &x.get_projection(&upper, index, None));
            }

            a_m.apply(&mut applied, &coupled)?;
            result.axpy(D::Scalar::one(), &applied);
        }
        Ok(result)
    }
}

impl<D: FemDiscretisation> LinearOperator<MultiVectorWithProjection<D::Vector>> for MultiOperator<D> {
    fn apply(
        &self,
        y: &mut MultiVectorWithProjection<D::Vector>,
        x: &MultiVectorWithProjection<D::Vector>,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let indices = x.active_indices();
        let components = indices
            .into_par_iter()
            .map(|index| -> Result<_, Box<dyn Error + Send + Sync>> {
                let component = self.apply_component(x, &index)?;
                Ok((index, component))
            })
            .collect::<Result<Vec<_>, Box<dyn Error + Send + Sync>>>()?;
        y.replace_vectors(components.into_iter().collect());
        Ok(())
    }
}

/// Applies the inverse of the mean operator to every component.
pub struct PreconditioningOperator<D: FemDiscretisation> {
    discretisation: Arc<D>,
    coefficient_field: Arc<CoefficientField<D::Coefficient>>,
    cache: OperatorCache<D::Basis, D::SolveOperator>,
}

impl<D: FemDiscretisation> PreconditioningOperator<D> {
    pub fn new(discretisation: Arc<D>, coefficient_field: Arc<CoefficientField<D::Coefficient>>) -> Self {
        Self {
            discretisation,
            coefficient_field,
            cache: Mutex::new(FxHashMap::default()),
        }
    }

    fn apply_component(&self, index: &MultiIndex, r_mu: &D::Vector) -> Result<D::Vector, Box<dyn Error + Send + Sync>> {
        let basis = r_mu.basis();
        let solver = cached_or_assemble(&self.cache, index, basis, || {
            Ok(AssembledOperators {
                basis: basis.clone(),
                mean: self
                    .discretisation
                    .assemble_solve_operator(self.coefficient_field.mean(), basis)?,
                terms: Vec::new(),
            })
        })?;
        let mut z_mu = basis.zero_vector();
        solver.mean.apply(&mut z_mu, r_mu)?;
        Ok(z_mu)
    }
}

impl<D: FemDiscretisation> LinearOperator<MultiVectorWithProjection<D::Vector>> for PreconditioningOperator<D> {
    fn apply(
        &self,
        y: &mut MultiVectorWithProjection<D::Vector>,
        x: &MultiVectorWithProjection<D::Vector>,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let components = x
            .iter()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|(index, r_mu)| -> Result<_, Box<dyn Error + Send + Sync>> {
                Ok((index.clone(), self.apply_component(index, r_mu)?))
            })
            .collect::<Result<Vec<_>, Box<dyn Error + Send + Sync>>>()?;
        y.replace_vectors(components.into_iter().collect());
        Ok(())
    }
}

/// Assembles the right-hand side of the stochastic Galerkin system in the bases of `w`.
///
/// The source term is deterministic, so only the mean component is non-zero.
pub fn prepare_rhs<D: FemDiscretisation>(
    discretisation: &D,
    w: &MultiVectorWithProjection<D::Vector>,
) -> eyre::Result<MultiVectorWithProjection<D::Vector>> {
    let mean_index = MultiIndex::zero();
    let mean = w
        .get(&mean_index)
        .ok_or_else(|| eyre!("The mean multi-index {} must be active", mean_index))?;

    let mut b: MultiVector<D::Vector> = w
        .iter()
        .map(|(index, vector)| (index.clone(), vector.basis().zero_vector()))
        .collect();
    b.insert(mean_index, discretisation.assemble_rhs(mean.basis())?);

    let mut b_with_projection = MultiVectorWithProjection::with_projector(b, Arc::clone(w.projector()));
    b_with_projection.set_cache_active(w.cache_active());
    Ok(b_with_projection)
}

/// Computes `||b - A w||`.
pub fn residual_norm<X, A>(a: &A, b: &X, w: &X) -> eyre::Result<X::Scalar>
where
    X: crate::pcg::InnerProductSpace,
    A: ?Sized + LinearOperator<X>,
{
    let mut r = b.clone();
    a.apply(&mut r, w)
        .map_err(|err| eyre!("Failed to apply operator: {}", err))?;
    r.scale(-X::Scalar::one());
    r.axpy(X::Scalar::one(), b);
    Ok(r.norm())
}

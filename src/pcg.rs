//! Preconditioned Conjugate-Gradient over general inner product spaces.
//!
//! The solver only relies on the [`InnerProductSpace`] operations of the iterate, so the same
//! implementation serves plain [`DVector`]s and the multi-index indexed vectors of the
//! stochastic Galerkin system.
use crate::multi_vector::{MultiVector, MultiVectorWithProjection};
use crate::operator::{IdentityOperator, LinearOperator};
use core::fmt;
use log::{debug, warn};
use nalgebra::{ComplexField, DVector, RealField};
use num::{One, Zero};
use sgfem_traits::{CoefficientVector, Real};
use std::error::Error;

/// A Hilbert space element with the operations needed by CG.
pub trait InnerProductSpace: Clone {
    type Scalar: Real;

    fn inner(&self, other: &Self) -> Self::Scalar;

    /// Computes `self <- self + alpha * x`.
    fn axpy(&mut self, alpha: Self::Scalar, x: &Self);

    fn scale(&mut self, alpha: Self::Scalar);

    fn norm(&self) -> Self::Scalar {
        self.inner(self).sqrt()
    }
}

impl<T: Real> InnerProductSpace for DVector<T> {
    type Scalar = T;

    fn inner(&self, other: &Self) -> T {
        self.dot(other)
    }

    fn axpy(&mut self, alpha: T, x: &Self) {
        nalgebra::Matrix::axpy(self, alpha, x, T::one());
    }

    fn scale(&mut self, alpha: T) {
        self.scale_mut(alpha);
    }
}

impl<V: CoefficientVector> InnerProductSpace for MultiVector<V> {
    type Scalar = V::Scalar;

    fn inner(&self, other: &Self) -> V::Scalar {
        MultiVector::inner(self, other)
    }

    fn axpy(&mut self, alpha: V::Scalar, x: &Self) {
        MultiVector::axpy(self, alpha, x);
    }

    fn scale(&mut self, alpha: V::Scalar) {
        MultiVector::scale(self, alpha);
    }
}

impl<V: CoefficientVector> InnerProductSpace for MultiVectorWithProjection<V> {
    type Scalar = V::Scalar;

    fn inner(&self, other: &Self) -> V::Scalar {
        self.as_multi_vector().inner(other)
    }

    fn axpy(&mut self, alpha: V::Scalar, x: &Self) {
        MultiVectorWithProjection::axpy(self, alpha, x.as_multi_vector());
    }

    fn scale(&mut self, alpha: V::Scalar) {
        MultiVectorWithProjection::scale(self, alpha);
    }
}

/// Decides when a CG solve has converged.
pub trait CgStoppingCriterion<T: Real> {
    /// Called by CG at the start of a new solve.
    fn reset(&self) {}

    /// `zeta` is the preconditioned residual measure `sqrt(<r, P r>)`.
    fn has_converged(&self, b_norm: T, iteration: usize, residual_norm: T, zeta: T) -> Result<bool, SolveErrorKind>;
}

/// Preconditioned residual tolerance `sqrt(<r, P r>) <= tol`.
///
/// This is the error measure reported by [`CgOutput::zeta`].
#[derive(Debug, Clone)]
pub struct PreconditionedResidualCriterion<T> {
    tol: T,
}

impl<T: Real> PreconditionedResidualCriterion<T> {
    pub fn new(tol: T) -> Self {
        Self { tol }
    }
}

impl Default for PreconditionedResidualCriterion<f64> {
    fn default() -> Self {
        Self::new(1e-6)
    }
}

impl<T: Real> CgStoppingCriterion<T> for PreconditionedResidualCriterion<T> {
    fn has_converged(&self, _b_norm: T, _iteration: usize, _residual_norm: T, zeta: T) -> Result<bool, SolveErrorKind> {
        Ok(zeta <= self.tol)
    }
}

/// Relative residual tolerance ||r|| <= tol * ||b||.
///
/// Note that we use the *approximate* residual given by Conjugate-Gradient. For ill-conditioned
/// problems, it is possible that CG's residual converges, but the real residual does not.
#[derive(Debug, Clone)]
pub struct RelativeResidualCriterion<T> {
    tol: T,
}

impl<T: Real> RelativeResidualCriterion<T> {
    pub fn new(tol: T) -> Self {
        Self { tol }
    }
}

impl Default for RelativeResidualCriterion<f64> {
    fn default() -> Self {
        Self::new(1e-8)
    }
}

impl<T: Real> CgStoppingCriterion<T> for RelativeResidualCriterion<T> {
    fn has_converged(&self, b_norm: T, _iteration: usize, residual_norm: T, _zeta: T) -> Result<bool, SolveErrorKind> {
        Ok(residual_norm <= self.tol * b_norm)
    }
}

#[derive(Debug)]
pub struct ConjugateGradient<A, P, Criterion> {
    operator: A,
    preconditioner: P,
    stopping_criterion: Criterion,
    max_iter: Option<usize>,
}

impl ConjugateGradient<(), IdentityOperator, ()> {
    pub fn new() -> Self {
        Self {
            operator: (),
            preconditioner: IdentityOperator,
            stopping_criterion: (),
            max_iter: None,
        }
    }
}

impl Default for ConjugateGradient<(), IdentityOperator, ()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P, Criterion> ConjugateGradient<(), P, Criterion> {
    pub fn with_operator<A>(self, operator: A) -> ConjugateGradient<A, P, Criterion> {
        ConjugateGradient {
            operator,
            preconditioner: self.preconditioner,
            stopping_criterion: self.stopping_criterion,
            max_iter: self.max_iter,
        }
    }
}

impl<A, P, Criterion> ConjugateGradient<A, P, Criterion> {
    pub fn with_preconditioner<P2>(self, preconditioner: P2) -> ConjugateGradient<A, P2, Criterion> {
        ConjugateGradient {
            operator: self.operator,
            preconditioner,
            stopping_criterion: self.stopping_criterion,
            max_iter: self.max_iter,
        }
    }

    /// Caps the number of iterations. Reaching the cap is reported through
    /// [`CgOutput::converged`], not as an error.
    pub fn with_max_iter(self, max_iter: usize) -> Self {
        Self {
            max_iter: Some(max_iter),
            ..self
        }
    }
}

impl<A, P> ConjugateGradient<A, P, ()> {
    pub fn with_stopping_criterion<Criterion>(self, stopping_criterion: Criterion) -> ConjugateGradient<A, P, Criterion> {
        ConjugateGradient {
            operator: self.operator,
            preconditioner: self.preconditioner,
            stopping_criterion,
            max_iter: self.max_iter,
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum SolveErrorKind {
    OperatorError(Box<dyn Error + Send + Sync>),
    PreconditionerError(Box<dyn Error + Send + Sync>),
    StoppingCriterionError(Box<dyn Error + Send + Sync>),
    IndefiniteOperator,
    IndefinitePreconditioner,
}

impl fmt::Display for SolveErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperatorError(err) => {
                write!(f, "Error applying operator: ")?;
                err.fmt(f)
            }
            Self::PreconditionerError(err) => {
                write!(f, "Error applying preconditioner: ")?;
                err.fmt(f)
            }
            Self::StoppingCriterionError(err) => {
                write!(f, "Error evaluating stopping criterion: ")?;
                err.fmt(f)
            }
            Self::IndefiniteOperator => write!(f, "Operator appears to be indefinite"),
            Self::IndefinitePreconditioner => write!(f, "Indefinite preconditioner"),
        }
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct SolveError<T> {
    pub output: CgOutput<T>,
    pub kind: SolveErrorKind,
}

impl<T> SolveError<T> {
    fn new(output: CgOutput<T>, kind: SolveErrorKind) -> Self {
        Self { output, kind }
    }
}

impl<T> fmt::Display for SolveError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CG solve failed after {} iterations. ", self.output.num_iterations)?;
        write!(f, "Error: {}", self.kind)
    }
}

impl<T: fmt::Debug> std::error::Error for SolveError<T> {}

#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct CgOutput<T> {
    /// Number of iterations of the solver.
    ///
    /// Corresponds to the number of updates made to the (initial) solution vector,
    pub num_iterations: usize,
    /// The preconditioned residual measure `sqrt(<r, P r>)` of the returned iterate.
    pub zeta: T,
    /// Whether the stopping criterion was met before the iteration cap.
    pub converged: bool,
}

impl<A, P, Criterion> ConjugateGradient<A, P, Criterion> {
    #[allow(non_snake_case)]
    pub fn solve_with_guess<X>(&mut self, b: &X, x: &mut X) -> Result<CgOutput<X::Scalar>, SolveError<X::Scalar>>
    where
        X: InnerProductSpace,
        A: LinearOperator<X>,
        P: LinearOperator<X>,
        Criterion: CgStoppingCriterion<X::Scalar>,
    {
        use SolveErrorKind::*;
        let zero = X::Scalar::zero();

        let mut output = CgOutput {
            num_iterations: 0,
            zeta: zero,
            converged: false,
        };
        self.stopping_criterion.reset();

        // r = b - Ax
        let mut r = b.clone();
        if let Err(err) = self.operator.apply(&mut r, x) {
            return Err(SolveError::new(output, OperatorError(err)));
        }
        r.scale(-X::Scalar::one());
        r.axpy(X::Scalar::one(), b);

        // z = Pr
        let mut z = r.clone();
        if let Err(err) = self.preconditioner.apply(&mut z, &r) {
            return Err(SolveError::new(output, PreconditionerError(err)));
        }

        // p = z
        let mut p = z.clone();
        let mut Ap = z.clone();

        let mut zTr = z.inner(&r);
        let mut pAp;

        let b_norm = b.norm();

        if b_norm == zero {
            x.scale(zero);
            output.converged = true;
            return Ok(output);
        }

        loop {
            output.zeta = zTr.max(zero).sqrt();
            let convergence =
                self.stopping_criterion
                    .has_converged(b_norm, output.num_iterations, r.norm(), output.zeta);

            let has_converged = match convergence {
                Ok(converged) => converged,
                Err(error_kind) => return Err(SolveError::new(output, error_kind)),
            };

            if has_converged {
                output.converged = true;
                break;
            } else if let Some(max_iter) = self.max_iter {
                if output.num_iterations >= max_iter {
                    warn!(
                        "CG reached the iteration cap ({}) with zeta = {}",
                        max_iter, output.zeta
                    );
                    break;
                }
            }

            // Ap = A * p
            if let Err(err) = self.operator.apply(&mut Ap, &p) {
                return Err(SolveError::new(output, OperatorError(err)));
            }
            pAp = p.inner(&Ap);

            if pAp <= zero {
                return Err(SolveError::new(output, IndefiniteOperator));
            }
            if zTr <= zero {
                return Err(SolveError::new(output, IndefinitePreconditioner));
            }

            let alpha = zTr / pAp;
            // x <- x + alpha * p
            x.axpy(alpha, &p);
            // r <- r - alpha * Ap
            r.axpy(-alpha, &Ap);

            // Number of iterations corresponds to number of updates to the x vector
            output.num_iterations += 1;

            // z <- P r
            if let Err(err) = self.preconditioner.apply(&mut z, &r) {
                return Err(SolveError::new(output, PreconditionerError(err)));
            }
            let zTr_next = z.inner(&r);
            let beta = zTr_next / zTr;

            // p <- z + beta * p
            p.scale(beta);
            p.axpy(X::Scalar::one(), &z);

            zTr = zTr_next;
            debug!("CG iteration {}: zeta = {}", output.num_iterations, zTr.max(zero).sqrt());
        }

        Ok(output)
    }
}

/// Solves `A w = b` with preconditioner `P`, starting from `w0`.
///
/// Stops once `sqrt(<r, P r>) <= eps` or after `maxiter` iterations, whichever comes first,
/// and returns the final iterate together with the achieved accuracy and iteration count.
pub fn pcg<X, A, P>(
    a: &A,
    b: &X,
    p: &P,
    w0: X,
    eps: X::Scalar,
    maxiter: usize,
) -> Result<(X, CgOutput<X::Scalar>), SolveError<X::Scalar>>
where
    X: InnerProductSpace,
    A: ?Sized + LinearOperator<X>,
    P: ?Sized + LinearOperator<X>,
{
    let mut w = w0;
    let output = ConjugateGradient::new()
        .with_operator(a)
        .with_preconditioner(p)
        .with_stopping_criterion(PreconditionedResidualCriterion::new(eps))
        .with_max_iter(maxiter)
        .solve_with_guess(b, &mut w)?;
    Ok((w, output))
}

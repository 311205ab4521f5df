use crate::fem::assembly::{assemble_load, assemble_stiffness, default_quadrature_points};
use crate::fem::space::{LagrangeSpace, LagrangeVector};
use crate::operator::{FemDiscretisation, LinearOperator};
use eyre::eyre;
use nalgebra::{convert, DMatrix};
use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::ops::serial::spmm_csr_dense;
use nalgebra_sparse::ops::Op;
use nalgebra_sparse::{CscMatrix, CsrMatrix};
use sgfem_traits::{CoefficientVector, FunctionBasis, Real};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// A scalar function of one variable, shared between threads.
#[derive(Clone)]
pub struct ScalarFunction<T>(Arc<dyn Fn(T) -> T + Send + Sync>);

impl<T: Real> ScalarFunction<T> {
    pub fn new(f: impl Fn(T) -> T + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn constant(value: T) -> Self {
        Self::new(move |_| value)
    }

    pub fn eval(&self, x: T) -> T {
        (self.0)(x)
    }

    /// Central difference approximation of the derivative at `x`.
    pub fn derivative(&self, x: T) -> T {
        let delta: T = convert::<f64, T>(1e-5) * (T::one() + x.abs());
        (self.eval(x + delta) - self.eval(x - delta)) / (delta + delta)
    }

    /// The maximum of `|f|` over equispaced samples of `[a, b]` with spacing at most `maxh`.
    pub fn max_abs(&self, a: T, b: T, maxh: T) -> T {
        self.max_abs_of(a, b, maxh, |x| self.eval(x))
    }

    /// The maximum of `|f / g|` over equispaced samples of `[a, b]` with spacing at most `maxh`.
    pub fn max_abs_ratio(&self, other: &Self, a: T, b: T, maxh: T) -> T {
        self.max_abs_of(a, b, maxh, |x| self.eval(x) / other.eval(x))
    }

    fn max_abs_of(&self, a: T, b: T, maxh: T, f: impl Fn(T) -> T) -> T {
        let mut n = 1;
        while (b - a) / convert::<f64, T>(n as f64) > maxh {
            n *= 2;
        }
        let h = (b - a) / convert::<f64, T>(n as f64);
        (0..=n)
            .map(|i| f(a + h * convert::<f64, T>(i as f64)).abs())
            .fold(T::zero(), |max, value| max.max(value))
    }
}

impl<T> fmt::Debug for ScalarFunction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScalarFunction")
    }
}

#[derive(Debug)]
pub struct DimensionMismatch {
    expected: usize,
    actual: usize,
}

impl fmt::Display for DimensionMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Operator of dimension {} applied to vector of dimension {}",
            self.expected, self.actual
        )
    }
}

impl Error for DimensionMismatch {}

/// An assembled matrix acting on vectors of the basis it was assembled for.
#[derive(Debug, Clone)]
pub struct AssembledMatrix<T> {
    matrix: CsrMatrix<T>,
}

impl<T: Real> AssembledMatrix<T> {
    pub fn matrix(&self) -> &CsrMatrix<T> {
        &self.matrix
    }
}

impl<T: Real> LinearOperator<LagrangeVector<T>> for AssembledMatrix<T> {
    fn apply(&self, y: &mut LagrangeVector<T>, x: &LagrangeVector<T>) -> Result<(), Box<dyn Error + Send + Sync>> {
        if x.dim() != self.matrix.ncols() {
            return Err(Box::new(DimensionMismatch {
                expected: self.matrix.ncols(),
                actual: x.dim(),
            }));
        }
        if y.basis() != x.basis() {
            *y = x.basis().zero_vector();
        }
        spmm_csr_dense(
            T::zero(),
            y.coefficient_vector_mut(),
            T::one(),
            Op::NoOp(&self.matrix),
            Op::NoOp(x.coefficient_vector()),
        );
        Ok(())
    }
}

/// Applies the inverse of an assembled matrix through its Cholesky factor.
pub struct CholeskySolver<T: Real> {
    factor: CscCholesky<T>,
    dim: usize,
}

impl<T: Real> fmt::Debug for CholeskySolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CholeskySolver")
            .field("dim", &self.dim)
            .finish()
    }
}

impl<T: Real> LinearOperator<LagrangeVector<T>> for CholeskySolver<T> {
    fn apply(&self, y: &mut LagrangeVector<T>, x: &LagrangeVector<T>) -> Result<(), Box<dyn Error + Send + Sync>> {
        if x.dim() != self.dim {
            return Err(Box::new(DimensionMismatch {
                expected: self.dim,
                actual: x.dim(),
            }));
        }
        if y.basis() != x.basis() {
            *y = x.basis().zero_vector();
        }
        if self.dim > 0 {
            let solution: DMatrix<T> = self.factor.solve(x.coefficient_vector());
            y.coefficient_vector_mut()
                .copy_from(&solution.column(0));
        }
        Ok(())
    }
}

/// The model problem `-(a u')' = f` on an interval with homogeneous Dirichlet conditions.
#[derive(Debug, Clone)]
pub struct PoissonProblem1d<T> {
    source: ScalarFunction<T>,
    quadrature_points: Option<usize>,
}

impl<T: Real> PoissonProblem1d<T> {
    pub fn new(source: ScalarFunction<T>) -> Self {
        Self {
            source,
            quadrature_points: None,
        }
    }

    /// Overrides the number of Gauss points per cell used in assembly.
    pub fn with_quadrature_points(self, num_points: usize) -> Self {
        Self {
            quadrature_points: Some(num_points),
            ..self
        }
    }

    pub fn source(&self) -> &ScalarFunction<T> {
        &self.source
    }

    pub fn quadrature_points(&self, basis: &LagrangeSpace<T>) -> usize {
        self.quadrature_points
            .unwrap_or_else(|| default_quadrature_points(basis.degree()))
    }

    pub fn assemble_stiffness_matrix(&self, coefficient: &ScalarFunction<T>, basis: &LagrangeSpace<T>) -> CsrMatrix<T> {
        assemble_stiffness(basis, coefficient, self.quadrature_points(basis))
    }
}

impl<T: Real> FemDiscretisation for PoissonProblem1d<T> {
    type Scalar = T;
    type Basis = LagrangeSpace<T>;
    type Vector = LagrangeVector<T>;
    type Coefficient = ScalarFunction<T>;
    type Operator = AssembledMatrix<T>;
    type SolveOperator = CholeskySolver<T>;

    fn assemble_operator(&self, coefficient: &ScalarFunction<T>, basis: &LagrangeSpace<T>) -> eyre::Result<Self::Operator> {
        Ok(AssembledMatrix {
            matrix: self.assemble_stiffness_matrix(coefficient, basis),
        })
    }

    fn assemble_solve_operator(
        &self,
        coefficient: &ScalarFunction<T>,
        basis: &LagrangeSpace<T>,
    ) -> eyre::Result<Self::SolveOperator> {
        let matrix = self.assemble_stiffness_matrix(coefficient, basis);
        let factor = CscCholesky::factor(&CscMatrix::from(&matrix))
            .map_err(|err| eyre!("Failed to factor stiffness matrix. Error: {}", err))?;
        Ok(CholeskySolver {
            factor,
            dim: basis.dim(),
        })
    }

    fn assemble_rhs(&self, basis: &LagrangeSpace<T>) -> eyre::Result<LagrangeVector<T>> {
        let load = assemble_load(basis, &self.source, self.quadrature_points(basis));
        Ok(LagrangeVector::new(basis.clone(), load))
    }
}

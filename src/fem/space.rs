use crate::fem::assembly::{assemble_mass, l2_project};
use crate::fem::mesh::IntervalMesh;
use crate::polynomials::{Legendre, PolynomialFamily};
use nalgebra::{convert, DVector, DVectorView, DVectorViewMut};
use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::CscMatrix;
use sgfem_traits::{CoefficientVector, FunctionBasis, Real, RefinableBasis};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Values and derivatives of the Lagrange shape functions at a reference point in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct ShapeFunctions<T> {
    pub values: Vec<T>,
    pub first: Vec<T>,
    pub second: Vec<T>,
}

/// Evaluates the Lagrange shape functions of `degree` with equispaced nodes `k / degree`.
pub fn lagrange_shape_functions<T: Real>(degree: usize, xi: T) -> ShapeFunctions<T> {
    let nodes: Vec<T> = (0..=degree)
        .map(|k| convert(k as f64 / degree as f64))
        .collect();
    // Product of (xi - node_j) over all j not in `skip`
    let product_except = |skip: &[usize]| {
        nodes
            .iter()
            .enumerate()
            .filter(|(j, _)| !skip.contains(j))
            .fold(T::one(), |acc, (_, &node)| acc * (xi - node))
    };

    let mut shape = ShapeFunctions {
        values: Vec::with_capacity(degree + 1),
        first: Vec::with_capacity(degree + 1),
        second: Vec::with_capacity(degree + 1),
    };
    for k in 0..=degree {
        let denominator = nodes
            .iter()
            .enumerate()
            .filter(|&(j, _)| j != k)
            .fold(T::one(), |acc, (_, &node)| acc * (nodes[k] - node));

        let mut first = T::zero();
        let mut second = T::zero();
        for a in (0..=degree).filter(|&a| a != k) {
            first += product_except(&[k, a]);
            for b in (0..=degree).filter(|&b| b != k && b != a) {
                second += product_except(&[k, a, b]);
            }
        }
        shape.values.push(product_except(&[k]) / denominator);
        shape.first.push(first / denominator);
        shape.second.push(second / denominator);
    }
    shape
}

/// Gauss-Legendre points and weights on `[0, 1]`.
pub fn unit_gauss_rule<T: Real>(num_points: usize) -> (Vec<T>, Vec<T>) {
    let (points, weights) = Legendre::default().gauss_rule::<T>(num_points);
    let half: T = convert(0.5);
    let points = points
        .into_iter()
        .map(|x| half * (x + T::one()))
        .collect();
    (points, weights)
}

/// Continuous piecewise polynomials of fixed degree on an interval mesh, vanishing at the
/// boundary.
///
/// Global nodes are numbered from left to right, with node `cell * degree + k` being the
/// local node `k` of `cell`. The two boundary nodes carry no unknowns, so unknown `i` is global
/// node `i + 1`.
#[derive(Clone)]
pub struct LagrangeSpace<T: Real> {
    mesh: Arc<IntervalMesh<T>>,
    degree: usize,
    mass_factor: Arc<OnceLock<CscCholesky<T>>>,
}

impl<T: Real> LagrangeSpace<T> {
    pub fn new(mesh: Arc<IntervalMesh<T>>, degree: usize) -> Self {
        assert!(degree > 0, "Lagrange spaces need degree at least 1");
        Self {
            mesh,
            degree,
            mass_factor: Arc::new(OnceLock::new()),
        }
    }

    pub fn mesh(&self) -> &Arc<IntervalMesh<T>> {
        &self.mesh
    }

    /// The unknown of local node `k` of `cell`, `None` on the boundary.
    pub fn unknown(&self, cell: usize, k: usize) -> Option<usize> {
        let node = cell * self.degree + k;
        let last = self.mesh.num_cells() * self.degree;
        (node > 0 && node < last).then(|| node - 1)
    }

    /// Values and physical derivatives of `coefficients` at local coordinate `xi` of `cell`.
    pub fn evaluate_on_cell(&self, coefficients: &DVector<T>, cell: usize, xi: T) -> (T, T, T) {
        let shape = lagrange_shape_functions(self.degree, xi);
        let h = self.mesh.cell_width(cell);
        let (mut value, mut first, mut second) = (T::zero(), T::zero(), T::zero());
        for k in 0..=self.degree {
            if let Some(i) = self.unknown(cell, k) {
                let c = coefficients[i];
                value += c * shape.values[k];
                first += c * shape.first[k];
                second += c * shape.second[k];
            }
        }
        (value, first / h, second / (h * h))
    }

    /// The local coordinate of `x` in the cell containing it.
    pub fn locate(&self, x: T) -> (usize, T) {
        let cell = self.mesh.locate(x);
        let (a, _) = self.mesh.cell(cell);
        (cell, (x - a) / self.mesh.cell_width(cell))
    }

    /// The Cholesky factor of the mass matrix, computed on first use.
    pub(crate) fn mass_factor(&self) -> &CscCholesky<T> {
        self.mass_factor.get_or_init(|| {
            let mass = CscMatrix::from(&assemble_mass(self));
            CscCholesky::factor(&mass).expect("Mass matrix of a Lagrange space is positive definite")
        })
    }
}

impl<T: Real> PartialEq for LagrangeSpace<T> {
    fn eq(&self, other: &Self) -> bool {
        self.degree == other.degree && (Arc::ptr_eq(&self.mesh, &other.mesh) || self.mesh == other.mesh)
    }
}

impl<T: Real> fmt::Debug for LagrangeSpace<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LagrangeSpace")
            .field("num_cells", &self.mesh.num_cells())
            .field("degree", &self.degree)
            .finish()
    }
}

impl<T: Real> FunctionBasis for LagrangeSpace<T> {
    type Scalar = T;
    type Vector = LagrangeVector<T>;

    fn dim(&self) -> usize {
        (self.mesh.num_cells() * self.degree).saturating_sub(1)
    }

    fn degree(&self) -> usize {
        self.degree
    }

    fn with_degree(&self, degree: usize) -> Self {
        Self::new(Arc::clone(&self.mesh), degree)
    }

    fn project_onto(&self, vector: &LagrangeVector<T>) -> LagrangeVector<T> {
        if vector.basis() == self {
            LagrangeVector::new(self.clone(), vector.coefficients.clone())
        } else {
            l2_project(vector, self)
        }
    }

    fn zero_vector(&self) -> LagrangeVector<T> {
        LagrangeVector::new(self.clone(), DVector::zeros(self.dim()))
    }
}

impl<T: Real> RefinableBasis for LagrangeSpace<T> {
    fn num_cells(&self) -> usize {
        self.mesh.num_cells()
    }

    fn refine(&self, cells: &[usize]) -> eyre::Result<Self> {
        let mesh = self.mesh.refine(cells)?;
        Ok(Self::new(Arc::new(mesh), self.degree))
    }
}

/// A finite element function in a [`LagrangeSpace`].
#[derive(Debug, Clone, PartialEq)]
pub struct LagrangeVector<T: Real> {
    basis: LagrangeSpace<T>,
    coefficients: DVector<T>,
}

impl<T: Real> LagrangeVector<T> {
    pub fn new(basis: LagrangeSpace<T>, coefficients: DVector<T>) -> Self {
        assert_eq!(
            coefficients.len(),
            basis.dim(),
            "Number of coefficients must match dimension of basis"
        );
        Self { basis, coefficients }
    }

    /// Interpolates `f` at the nodes of `basis`.
    pub fn interpolate(basis: &LagrangeSpace<T>, f: impl Fn(T) -> T) -> Self {
        let p: T = convert(basis.degree as f64);
        let mut coefficients = DVector::zeros(basis.dim());
        for cell in 0..basis.mesh.num_cells() {
            let (a, _) = basis.mesh.cell(cell);
            let h = basis.mesh.cell_width(cell);
            for k in 0..=basis.degree {
                if let Some(i) = basis.unknown(cell, k) {
                    coefficients[i] = f(a + h * convert::<f64, T>(k as f64) / p);
                }
            }
        }
        Self::new(basis.clone(), coefficients)
    }

    pub fn coefficient_vector(&self) -> &DVector<T> {
        &self.coefficients
    }

    pub(crate) fn coefficient_vector_mut(&mut self) -> &mut DVector<T> {
        &mut self.coefficients
    }

    pub fn into_coefficients(self) -> DVector<T> {
        self.coefficients
    }

    pub fn evaluate(&self, x: T) -> T {
        let (cell, xi) = self.basis.locate(x);
        self.basis
            .evaluate_on_cell(&self.coefficients, cell, xi)
            .0
    }

    pub fn derivative(&self, x: T) -> T {
        let (cell, xi) = self.basis.locate(x);
        self.basis
            .evaluate_on_cell(&self.coefficients, cell, xi)
            .1
    }
}

impl<T: Real> CoefficientVector for LagrangeVector<T> {
    type Scalar = T;
    type Basis = LagrangeSpace<T>;

    fn basis(&self) -> &LagrangeSpace<T> {
        &self.basis
    }

    fn coefficients(&self) -> DVectorView<T> {
        self.coefficients.as_view()
    }

    fn coefficients_mut(&mut self) -> DVectorViewMut<T> {
        self.coefficients.as_view_mut()
    }
}

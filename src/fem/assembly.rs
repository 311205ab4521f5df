//! Assembly of the one-dimensional finite element matrices and vectors.
use crate::fem::problem::ScalarFunction;
use crate::fem::space::{lagrange_shape_functions, unit_gauss_rule, LagrangeSpace, LagrangeVector};
use itertools::Itertools;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use sgfem_traits::{CoefficientVector, FunctionBasis, Real};

/// The number of Gauss points for integrating products of shape functions with a smooth
/// coefficient.
pub fn default_quadrature_points(degree: usize) -> usize {
    degree + 2
}

/// Assembles `∫ f(x, φ_i(x), φ_j(x), φ_i'(x), φ_j'(x))` over all unknowns `i, j`.
fn assemble_matrix<T, F>(space: &LagrangeSpace<T>, num_points: usize, integrand: F) -> CsrMatrix<T>
where
    T: Real,
    F: Fn(T, T, T, T, T) -> T,
{
    let n = space.dim();
    let degree = space.degree();
    let mesh = space.mesh();
    let (points, weights) = unit_gauss_rule::<T>(num_points);
    let shapes: Vec<_> = points
        .iter()
        .map(|&xi| lagrange_shape_functions(degree, xi))
        .collect();

    let mut coo = CooMatrix::new(n, n);
    for cell in 0..mesh.num_cells() {
        let (a, _) = mesh.cell(cell);
        let h = mesh.cell_width(cell);
        let unknowns: Vec<_> = (0..=degree)
            .filter_map(|k| space.unknown(cell, k).map(|i| (k, i)))
            .collect();
        for ((k, i), (l, j)) in unknowns.iter().cartesian_product(&unknowns) {
            let entry = points
                .iter()
                .zip(&weights)
                .zip(&shapes)
                .fold(T::zero(), |acc, ((&xi, &w), shape)| {
                    let x = a + h * xi;
                    let value = integrand(
                        x,
                        shape.values[*k],
                        shape.values[*l],
                        shape.first[*k] / h,
                        shape.first[*l] / h,
                    );
                    acc + w * h * value
                });
            coo.push(*i, *j, entry);
        }
    }
    CsrMatrix::from(&coo)
}

/// Assembles `K_ij = ∫ c φ_i' φ_j'`.
pub fn assemble_stiffness<T: Real>(
    space: &LagrangeSpace<T>,
    coefficient: &ScalarFunction<T>,
    num_points: usize,
) -> CsrMatrix<T> {
    assemble_matrix(space, num_points, |x, _, _, dphi_i, dphi_j| coefficient.eval(x) * dphi_i * dphi_j)
}

/// Assembles `M_ij = ∫ φ_i φ_j`.
pub fn assemble_mass<T: Real>(space: &LagrangeSpace<T>) -> CsrMatrix<T> {
    // Products of shape functions are integrated exactly
    let num_points = space.degree() + 1;
    assemble_matrix(space, num_points, |_, phi_i, phi_j, _, _| phi_i * phi_j)
}

/// Assembles `F_i = ∫ f φ_i`.
pub fn assemble_load<T: Real>(space: &LagrangeSpace<T>, source: &ScalarFunction<T>, num_points: usize) -> DVector<T> {
    let degree = space.degree();
    let mesh = space.mesh();
    let (points, weights) = unit_gauss_rule::<T>(num_points);
    let mut load = DVector::zeros(space.dim());
    for cell in 0..mesh.num_cells() {
        let (a, _) = mesh.cell(cell);
        let h = mesh.cell_width(cell);
        for (&xi, &w) in points.iter().zip(&weights) {
            let shape = lagrange_shape_functions(degree, xi);
            let f = source.eval(a + h * xi);
            for k in 0..=degree {
                if let Some(i) = space.unknown(cell, k) {
                    load[i] += w * h * f * shape.values[k];
                }
            }
        }
    }
    load
}

/// Solves with the Cholesky factor of the mass matrix of `space`.
fn solve_mass<T: Real>(space: &LagrangeSpace<T>, rhs: &DVector<T>) -> DVector<T> {
    if rhs.is_empty() {
        return DVector::zeros(0);
    }
    let solution: DMatrix<T> = space.mass_factor().solve(rhs);
    solution.column(0).into_owned()
}

/// Returns the union of the vertices of both meshes, sorted.
fn merged_breakpoints<T: Real>(a: &[T], b: &[T]) -> Vec<T> {
    a.iter()
        .chain(b)
        .copied()
        .sorted_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal))
        .dedup()
        .collect()
}

/// `L²` projection of `vector` onto `target`.
///
/// The right-hand side is integrated exactly over the intervals of the merged meshes, on which
/// both the source function and the target basis functions are polynomials.
pub fn l2_project<T: Real>(vector: &LagrangeVector<T>, target: &LagrangeSpace<T>) -> LagrangeVector<T> {
    let source = vector.basis();
    let source_mesh = source.mesh();
    let target_mesh = target.mesh();
    let num_points = (source.degree() + target.degree()) / 2 + 1;
    let (points, weights) = unit_gauss_rule::<T>(num_points);
    let half: T = nalgebra::convert(0.5);

    let breakpoints = merged_breakpoints(source_mesh.vertices(), target_mesh.vertices());
    let mut rhs = DVector::zeros(target.dim());
    for (&l, &r) in breakpoints.iter().tuple_windows() {
        let mid = half * (l + r);
        let source_cell = source_mesh.locate(mid);
        let target_cell = target_mesh.locate(mid);
        let (source_a, _) = source_mesh.cell(source_cell);
        let (target_a, _) = target_mesh.cell(target_cell);
        let source_h = source_mesh.cell_width(source_cell);
        let target_h = target_mesh.cell_width(target_cell);

        for (&xi, &w) in points.iter().zip(&weights) {
            let x = l + (r - l) * xi;
            let (u, _, _) =
                source.evaluate_on_cell(vector.coefficient_vector(), source_cell, (x - source_a) / source_h);
            let shape = lagrange_shape_functions(target.degree(), (x - target_a) / target_h);
            for k in 0..=target.degree() {
                if let Some(i) = target.unknown(target_cell, k) {
                    rhs[i] += w * (r - l) * u * shape.values[k];
                }
            }
        }
    }

    LagrangeVector::new(target.clone(), solve_mass(target, &rhs))
}

use eyre::eyre;
use nalgebra::convert;
use sgfem_traits::Real;

/// A mesh of an interval, given by its strictly increasing vertices.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalMesh<T> {
    vertices: Vec<T>,
}

impl<T: Real> IntervalMesh<T> {
    pub fn from_vertices(vertices: Vec<T>) -> eyre::Result<Self> {
        if vertices.len() < 2 {
            return Err(eyre!("An interval mesh needs at least two vertices"));
        }
        if vertices.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(eyre!("Mesh vertices must be strictly increasing"));
        }
        Ok(Self { vertices })
    }

    /// Creates `num_cells` cells of equal width on `[a, b]`.
    pub fn uniform(a: T, b: T, num_cells: usize) -> eyre::Result<Self> {
        if num_cells == 0 {
            return Err(eyre!("A uniform mesh needs at least one cell"));
        }
        let h = (b - a) / convert::<f64, T>(num_cells as f64);
        let vertices = (0..=num_cells)
            .map(|i| if i == num_cells { b } else { a + h * convert(i as f64) })
            .collect();
        Self::from_vertices(vertices)
    }

    pub fn vertices(&self) -> &[T] {
        &self.vertices
    }

    pub fn num_cells(&self) -> usize {
        self.vertices.len() - 1
    }

    /// The endpoints of the mesh.
    pub fn bounds(&self) -> (T, T) {
        (self.vertices[0], self.vertices[self.vertices.len() - 1])
    }

    /// The endpoints of cell `i`.
    pub fn cell(&self, i: usize) -> (T, T) {
        (self.vertices[i], self.vertices[i + 1])
    }

    pub fn cell_width(&self, i: usize) -> T {
        self.vertices[i + 1] - self.vertices[i]
    }

    pub fn max_cell_width(&self) -> T {
        (0..self.num_cells())
            .map(|i| self.cell_width(i))
            .fold(T::zero(), |max, h| max.max(h))
    }

    /// The cell containing `x`. Points on a shared vertex belong to the cell on the right,
    /// and points outside the mesh to the nearest cell.
    pub fn locate(&self, x: T) -> usize {
        let n = self.num_cells();
        let after = self.vertices.partition_point(|&v| v <= x);
        after.saturating_sub(1).min(n - 1)
    }

    /// Bisects the given cells.
    pub fn refine(&self, cells: &[usize]) -> eyre::Result<Self> {
        let mut marked = vec![false; self.num_cells()];
        for &cell in cells {
            let flag = marked
                .get_mut(cell)
                .ok_or_else(|| eyre!("Cell {} out of bounds for mesh with {} cells", cell, self.num_cells()))?;
            *flag = true;
        }

        let half: T = convert(0.5);
        let mut vertices = Vec::with_capacity(self.vertices.len() + cells.len());
        for (i, &is_marked) in marked.iter().enumerate() {
            let (a, b) = self.cell(i);
            vertices.push(a);
            if is_marked {
                vertices.push(half * (a + b));
            }
        }
        vertices.push(self.bounds().1);
        Ok(Self { vertices })
    }
}

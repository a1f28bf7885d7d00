use crate::io::read_named_matrix;
use crate::random::RandomSource;
use log::info;
use nalgebra::DMatrix;

/// Model-fit residuals between pairs of taxa, rows and columns in tip
/// index order (tip `i` has index `i + 1` in the graph).
#[derive(Debug, Clone, PartialEq)]
pub struct Residuals {
    values: DMatrix<f64>,
    names: Vec<String>,
}

impl Residuals {
    pub fn zeros(num_taxa: usize) -> Self {
        Self {
            values: DMatrix::zeros(num_taxa, num_taxa),
            names: vec![],
        }
    }

    pub fn from_matrix(values: DMatrix<f64>) -> anyhow::Result<Self> {
        if values.nrows() != values.ncols() {
            return Err(anyhow::anyhow!(
                "residual matrix must be square, got {} x {}",
                values.nrows(),
                values.ncols()
            ));
        }
        Ok(Self {
            values,
            names: vec![],
        })
    }

    pub fn with_names(mut self, names: Vec<String>) -> anyhow::Result<Self> {
        if names.len() != self.num_taxa() {
            return Err(anyhow::anyhow!(
                "{} names for {} taxa",
                names.len(),
                self.num_taxa()
            ));
        }
        self.names = names;
        Ok(self)
    }

    /// Read a square matrix whose rows start with the taxon name
    /// (gzipped or not); row order becomes the tip order.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let (names, values) = read_named_matrix(path)?;
        info!("read {} x {} residuals from {}", values.nrows(), values.ncols(), path);
        Self::from_matrix(values)?.with_names(names)
    }

    pub fn num_taxa(&self) -> usize {
        self.values.nrows()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[(i, j)]
    }

    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        self.values[(i, j)] = value;
    }

    pub fn max(&self) -> f64 {
        self.values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Pair weights `exp(lambda * r_ij)` for `i != j` with
    /// `lambda = delta / max(r)`.
    ///
    /// Returns `None` when no residual is positive, i.e. there is no
    /// evidence to aim a new edge at.
    pub fn weights(&self, delta: f64) -> Option<ResidualWeights> {
        let n = self.num_taxa();
        let max_residual = self.max();
        if n < 2 || !(max_residual > 0.0) {
            return None;
        }
        let lambda = delta / max_residual;

        let mut weights = DMatrix::zeros(n, n);
        let mut row_mass = vec![0.0; n];
        let mut total = 0.0;
        for i in 0..n {
            for j in 0..n {
                let w = (lambda * self.values[(i, j)]).exp();
                if i != j && w > 0.0 && w.is_finite() {
                    weights[(i, j)] = w;
                    row_mass[i] += w;
                    total += w;
                }
            }
        }
        if total > 0.0 {
            Some(ResidualWeights {
                weights,
                row_mass,
                total,
            })
        } else {
            None
        }
    }
}

/// Residual weights ready for drawing taxon pairs
#[derive(Debug, Clone)]
pub struct ResidualWeights {
    weights: DMatrix<f64>,
    row_mass: Vec<f64>,
    total: f64,
}

impl ResidualWeights {
    /// Draw `a` by row mass, then `b` by `w_ab`
    pub fn sample_pair(&self, rng: &mut dyn RandomSource) -> (usize, usize) {
        let a = pick_by_mass(&self.row_mass, self.total, rng.uniform01());
        let row: Vec<f64> = self.weights.row(a).iter().copied().collect();
        let b = pick_by_mass(&row, self.row_mass[a], rng.uniform01());
        (a, b)
    }

    /// Probability of drawing the ordered pair `(a, b)`; the row mass
    /// cancels, leaving `w_ab / total`.
    pub fn pair_probability(&self, a: usize, b: usize) -> f64 {
        self.weights[(a, b)] / self.total
    }
}

fn pick_by_mass(mass: &[f64], total: f64, u: f64) -> usize {
    let target = u * total;
    let mut cum = 0.0;
    let mut last_positive = 0;
    for (i, &m) in mass.iter().enumerate() {
        if m > 0.0 {
            last_positive = i;
        }
        cum += m;
        if cum > target {
            return i;
        }
    }
    last_positive
}

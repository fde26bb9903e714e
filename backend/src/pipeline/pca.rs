//! Principal component analysis on the sample covariance matrix.
//!
//! Components are found one at a time by power iteration, each iterate kept
//! orthogonal to the components already accepted.

use ndarray::{Array1, Array2, ArrayView2, Axis};

use super::dataset::{Dataset, PipelineError};

pub const DEFAULT_VARIANCE_THRESHOLD: f64 = 0.95;

const MAX_ITERATIONS: usize = 1000;
const TOLERANCE: f64 = 1e-12;
// eigenvalues below this share of the total variance end the search
const NEGLIGIBLE_SHARE: f64 = 1e-12;

/// A fitted projection onto the leading principal components.
#[derive(Debug, Clone)]
pub struct Pca {
    pub means: Array1<f64>,
    /// One unit-length component per row.
    pub components: Array2<f64>,
    pub explained_variance: Vec<f64>,
    pub explained_variance_ratio: Vec<f64>,
}

fn orthogonalize(v: &mut Array1<f64>, accepted: &[Array1<f64>]) {
    for c in accepted {
        let overlap = c.dot(v);
        v.scaled_add(-overlap, c);
    }
}

fn normalized(v: Array1<f64>) -> Option<Array1<f64>> {
    let norm = v.dot(&v).sqrt();
    (norm > f64::EPSILON).then(|| v / norm)
}

/// Largest remaining eigenpair of `cov` orthogonal to `accepted`.
fn leading_eigenpair(cov: &Array2<f64>, accepted: &[Array1<f64>]) -> Option<(f64, Array1<f64>)> {
    let n = cov.nrows();
    // start from the unit axis with the most residual variance
    let start = (0..n)
        .map(|j| {
            let mut e = Array1::zeros(n);
            e[j] = 1.0;
            orthogonalize(&mut e, accepted);
            e
        })
        .filter_map(normalized)
        .max_by(|a, b| a.dot(&cov.dot(a)).total_cmp(&b.dot(&cov.dot(b))))?;

    let mut v = start;
    for _ in 0..MAX_ITERATIONS {
        let mut next = cov.dot(&v);
        orthogonalize(&mut next, accepted);
        let next = normalized(next)?;
        let delta = (&next - &v).mapv(f64::abs).sum();
        v = next;
        if delta < TOLERANCE {
            break;
        }
    }

    // largest absolute loading is positive
    let pivot = v
        .iter()
        .copied()
        .max_by(|a, b| a.abs().total_cmp(&b.abs()))
        .unwrap_or(1.0);
    if pivot < 0.0 {
        v.mapv_inplace(|x| -x);
    }
    Some((v.dot(&cov.dot(&v)), v))
}

impl Pca {
    /// Fits on `x`. With `n_components` unset, keeps the fewest components
    /// whose cumulative explained variance reaches `variance_threshold`.
    pub fn fit(
        x: ArrayView2<f64>,
        n_components: Option<usize>,
        variance_threshold: f64,
    ) -> Result<Self, PipelineError> {
        if x.nrows() < 2 || x.ncols() == 0 {
            return Err(PipelineError::InvalidArgument(
                "PCA needs at least two rows and one column".into(),
            ));
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::InvalidArgument(
                "PCA input contains missing or infinite values".into(),
            ));
        }
        if !(variance_threshold > 0.0 && variance_threshold <= 1.0) {
            return Err(PipelineError::InvalidArgument(format!(
                "variance_threshold must be in (0, 1], got {variance_threshold}"
            )));
        }

        let means = x.mean_axis(Axis(0)).ok_or(PipelineError::Empty)?;
        let centred = &x - &means;
        let cov = centred.t().dot(&centred) / (x.nrows() - 1) as f64;
        let total: f64 = cov.diag().sum();
        if total <= f64::EPSILON {
            return Err(PipelineError::InvalidArgument("data has no variance".into()));
        }

        let max_components = x.ncols().min(x.nrows());
        let mut vectors: Vec<Array1<f64>> = Vec::new();
        let mut variances = Vec::new();
        while vectors.len() < max_components {
            let Some((value, vector)) = leading_eigenpair(&cov, &vectors) else {
                break;
            };
            if value <= total * NEGLIGIBLE_SHARE {
                break;
            }
            variances.push(value);
            vectors.push(vector);
        }
        let ratios: Vec<f64> = variances.iter().map(|v| v / total).collect();

        let keep = match n_components {
            Some(k) if k == 0 || k > vectors.len() => {
                return Err(PipelineError::InvalidArgument(format!(
                    "n_components must be between 1 and {}, got {k}",
                    vectors.len()
                )));
            }
            Some(k) => k,
            None => {
                let mut cumulative = 0.0;
                ratios
                    .iter()
                    .position(|r| {
                        cumulative += r;
                        cumulative >= variance_threshold
                    })
                    .map_or(ratios.len(), |i| i + 1)
            }
        };

        let mut components = Array2::zeros((keep, x.ncols()));
        for (mut row, vector) in components.outer_iter_mut().zip(&vectors) {
            row.assign(vector);
        }
        log::debug!("PCA kept {} of {} components", keep, vectors.len());

        Ok(Self {
            means,
            components,
            explained_variance: variances[..keep].to_vec(),
            explained_variance_ratio: ratios[..keep].to_vec(),
        })
    }

    pub fn n_components(&self) -> usize {
        self.components.nrows()
    }

    pub fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, PipelineError> {
        if x.ncols() != self.means.len() {
            return Err(PipelineError::InvalidArgument(format!(
                "PCA fitted on {} columns, got {}",
                self.means.len(),
                x.ncols()
            )));
        }
        Ok((&x - &self.means).dot(&self.components.t()))
    }
}

/// Replaces the features with `PC1..PCk` projections, keeping the labels.
pub fn apply_pca(
    ds: &Dataset,
    n_components: Option<usize>,
    variance_threshold: f64,
) -> Result<(Dataset, Pca), PipelineError> {
    let pca = Pca::fit(ds.features.view(), n_components, variance_threshold)?;
    let projected = pca.transform(ds.features.view())?;
    let names = (1..=pca.n_components()).map(|i| format!("PC{i}")).collect();
    let dataset = Dataset::new(names, projected, ds.labels.clone())?;
    Ok((dataset, pca))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::dataset::tests::sample;
    use ckd_shared::MissingValueStrategy;
    use ndarray::array;

    #[test]
    fn collinear_data_needs_one_component() {
        let x = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0], [4.0, 8.0]];
        let pca = Pca::fit(x.view(), None, DEFAULT_VARIANCE_THRESHOLD).unwrap();
        assert_eq!(pca.n_components(), 1);
        assert!((pca.explained_variance_ratio[0] - 1.0).abs() < 1e-9);

        let direction = pca.components.row(0);
        let expected = [1.0 / 5f64.sqrt(), 2.0 / 5f64.sqrt()];
        assert!((direction[0] - expected[0]).abs() < 1e-9);
        assert!((direction[1] - expected[1]).abs() < 1e-9);

        let projected = pca.transform(x.view()).unwrap();
        assert!((projected[[0, 0]] + 1.5 * 5f64.sqrt()).abs() < 1e-9);
        assert!(pca.transform(array![[1.0]].view()).is_err());
    }

    #[test]
    fn components_are_orthonormal_on_the_sample() {
        let ds = sample().handle_missing(MissingValueStrategy::FillMedian);
        let (projected, pca) = apply_pca(&ds, Some(3), DEFAULT_VARIANCE_THRESHOLD).unwrap();
        assert_eq!(projected.feature_names, vec!["PC1", "PC2", "PC3"]);
        assert_eq!(projected.features.dim(), (12, 3));
        assert_eq!(projected.labels, ds.labels);

        let gram = pca.components.dot(&pca.components.t());
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((gram[[i, j]] - expected).abs() < 1e-8, "gram[{i}][{j}] = {}", gram[[i, j]]);
            }
        }
        assert!(pca.explained_variance_ratio.iter().sum::<f64>() <= 1.0 + 1e-9);
        assert!(pca.explained_variance.iter().all(|v| *v > 0.0));
    }

    #[test]
    fn rejects_bad_arguments() {
        let x = array![[1.0, 2.0], [2.0, 1.0], [3.0, 5.0]];
        assert!(Pca::fit(x.view(), Some(0), 0.95).is_err());
        assert!(Pca::fit(x.view(), Some(5), 0.95).is_err());
        assert!(Pca::fit(x.view(), None, 1.5).is_err());
        assert!(Pca::fit(array![[1.0, f64::NAN], [2.0, 3.0]].view(), None, 0.95).is_err());
        assert!(Pca::fit(array![[1.0, 1.0], [1.0, 1.0]].view(), None, 0.95).is_err());
    }
}

//! Principal component scores of a spectrum window.
//!
//! With `n` spectra of `m` pixels each, the scores are obtained from the
//! eigen-decomposition of the `n × n` Gram matrix of the centred data, which
//! is much smaller than the `m × m` covariance matrix for the window sizes
//! used here.

use nalgebra::{DMatrix, SymmetricEigen};

/// Mean absolute score below which the absolute spread is used.
const NEAR_ZERO_MEAN: f64 = 1e-5;

/// Scores of the first `components` principal components.
///
/// Returns one column per component and one row per spectrum. The number of
/// components is capped at `min(components, n - 1, m)`. Spectra of unequal
/// length are truncated to the shortest. Returns `None` with fewer than two
/// spectra.
pub fn pca_scores(spectra: &[&[f64]], components: usize) -> Option<DMatrix<f64>> {
    let n = spectra.len();
    let m = spectra.iter().map(|s| s.len()).min()?;
    if n < 2 || m == 0 {
        return None;
    }
    let k = components.min(n - 1).min(m);
    if k == 0 {
        return None;
    }

    let mut data = DMatrix::from_fn(n, m, |i, j| spectra[i][j]);
    for j in 0..m {
        let mean = data.column(j).mean();
        data.column_mut(j).add_scalar_mut(-mean);
    }

    let gram = &data * data.transpose();
    let eigen = SymmetricEigen::new(gram);

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

    let mut scores = DMatrix::zeros(n, k);
    for (c, &idx) in order.iter().take(k).enumerate() {
        let lambda = eigen.eigenvalues[idx].max(0.0);
        let scale = lambda.sqrt();
        for i in 0..n {
            scores[(i, c)] = eigen.eigenvectors[(i, idx)] * scale;
        }
    }
    Some(scores)
}

/// Relative spread of each score column.
///
/// `std / |mean|` (population std), or plain `std` when the mean is
/// essentially zero.
pub fn score_rsd(scores: &DMatrix<f64>) -> Vec<f64> {
    scores
        .column_iter()
        .map(|col| {
            let mean = col.mean();
            let std = col.variance().sqrt();
            if mean.abs() < NEAR_ZERO_MEAN {
                std
            } else {
                std / mean.abs()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_spectra_have_zero_scores() {
        let spectrum = vec![0.1, 0.5, 0.9, 0.5];
        let spectra: Vec<&[f64]> = (0..6).map(|_| spectrum.as_slice()).collect();
        let scores = pca_scores(&spectra, 5).unwrap();
        assert_eq!(scores.ncols(), 4);
        assert!(score_rsd(&scores).iter().all(|r| *r < 1e-9));
    }

    #[test]
    fn test_varying_spectra_are_spread() {
        let spectra: Vec<Vec<f64>> = (0..6)
            .map(|i| vec![i as f64, 2.0 * i as f64, 1.0])
            .collect();
        let refs: Vec<&[f64]> = spectra.iter().map(Vec::as_slice).collect();
        let scores = pca_scores(&refs, 2).unwrap();
        assert_eq!(scores.shape(), (6, 2));
        let rsd = score_rsd(&scores);
        assert!(rsd[0] > 0.1, "rsd {rsd:?}");
    }

    #[test]
    fn test_too_few_spectra() {
        let one = [1.0, 2.0];
        assert!(pca_scores(&[&one], 3).is_none());
        assert!(pca_scores(&[], 3).is_none());
    }
}

use anyhow::{Context, Result};
use nalgebra::{Cholesky, DMatrix};

use crate::model::{Sector, CROSS_GROUP_CORR, INDEPENDENT_MOVER, INDEPENDENT_MOVER_CORR};

/// Correlation between two symbols under the sector-grouping policy.
pub fn pairwise_correlation(a: &str, b: &str) -> f64 {
    if a == INDEPENDENT_MOVER || b == INDEPENDENT_MOVER {
        return INDEPENDENT_MOVER_CORR;
    }

    match (Sector::of(a), Sector::of(b)) {
        (Some(left), Some(right)) if left == right => left.intra_correlation(),
        _ => CROSS_GROUP_CORR,
    }
}

pub fn correlation_matrix(symbols: &[String]) -> DMatrix<f64> {
    let size = symbols.len();
    let mut matrix = DMatrix::identity(size, size);
    for i in 0..size {
        for j in (i + 1)..size {
            let rho = pairwise_correlation(&symbols[i], &symbols[j]);
            matrix[(i, j)] = rho;
            matrix[(j, i)] = rho;
        }
    }
    matrix
}

/// Lower-triangular factor for the current symbol set, or `None` below two
/// symbols. Always rebuilt from scratch.
pub fn factorize(symbols: &[String]) -> Result<Option<DMatrix<f64>>> {
    if symbols.len() < 2 {
        return Ok(None);
    }
    compute_cholesky(&correlation_matrix(symbols))
        .with_context(|| format!("correlation matrix for {} symbols", symbols.len()))
        .map(Some)
}

fn compute_cholesky(matrix: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    Cholesky::new(matrix.clone())
        .map(|decomposition| decomposition.l().clone_owned())
        .with_context(|| "failed to compute Cholesky factor for correlation matrix")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn sector_pairs_use_group_coefficients() {
        assert_eq!(pairwise_correlation("AAPL", "MSFT"), 0.6);
        assert_eq!(pairwise_correlation("JPM", "V"), 0.5);
        assert_eq!(pairwise_correlation("AAPL", "JPM"), 0.3);
        assert_eq!(pairwise_correlation("XOM", "CVX"), 0.3);
        assert_eq!(pairwise_correlation("AAPL", "XOM"), 0.3);
    }

    #[test]
    fn independent_mover_ignores_sector() {
        for partner in ["AAPL", "NVDA", "JPM", "XOM"] {
            assert_eq!(pairwise_correlation("TSLA", partner), 0.3);
            assert_eq!(pairwise_correlation(partner, "TSLA"), 0.3);
        }
    }

    #[test]
    fn matrix_is_symmetric_with_unit_diagonal() {
        let universe = symbols(&["AAPL", "GOOGL", "TSLA", "JPM", "V", "XOM"]);
        let corr = correlation_matrix(&universe);

        for i in 0..corr.nrows() {
            assert_eq!(corr[(i, i)], 1.0);
            for j in 0..corr.ncols() {
                assert_eq!(corr[(i, j)], corr[(j, i)]);
            }
        }
    }

    #[test]
    fn factor_reconstructs_correlation() {
        let universe = symbols(&[
            "AAPL", "GOOGL", "MSFT", "AMZN", "TSLA", "NVDA", "META", "JPM", "V", "NFLX",
        ]);
        let corr = correlation_matrix(&universe);
        let factor = factorize(&universe).expect("factorize").expect("factor");

        let rebuilt = &factor * factor.transpose();
        assert!((rebuilt - corr).abs().max() < 1e-9);
        for i in 0..factor.nrows() {
            for j in (i + 1)..factor.ncols() {
                assert_eq!(factor[(i, j)], 0.0, "factor must be lower triangular");
            }
        }
    }

    #[test]
    fn single_symbol_has_no_factor() {
        assert!(factorize(&symbols(&["AAPL"])).expect("factorize").is_none());
        assert!(factorize(&[]).expect("factorize").is_none());
    }

    #[test]
    fn non_positive_definite_matrix_is_rejected() {
        let mut bad = DMatrix::identity(3, 3);
        for (i, j, rho) in [(0, 1, 0.9), (0, 2, 0.9), (1, 2, -0.9)] {
            bad[(i, j)] = rho;
            bad[(j, i)] = rho;
        }
        assert!(compute_cholesky(&bad).is_err());
    }
}

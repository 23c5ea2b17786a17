use log::{debug, warn};
use statrs::distribution::{ChiSquared, ContinuousCDF};

/// Log-likelihood and number of free parameters of a fitted model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fit {
    pub lnl: f64,
    pub np: usize,
}

/// Likelihood-ratio test statistic `2 (lnL_alt - lnL_null)` and its degrees of freedom
/// `np_alt - np_null`. The alternative model has to nest the null model; the order is not
/// checked, so misordered models give a negative statistic and negative degrees of freedom.
pub fn lrt_statistic(alternative: &Fit, null: &Fit) -> (f64, i64) {
    let statistic = 2.0 * (alternative.lnl - null.lnl);
    let df = alternative.np as i64 - null.np as i64;
    (statistic, df)
}

/// Upper-tail chi-squared probability of `statistic` with `df` degrees of freedom.
///
/// A negative statistic means the null model fits better and gives 1.0 whatever `df` is,
/// so swapped models show no evidence for the alternative. Otherwise NaN is returned when
/// `df` is not positive.
///
/// # Example
/// ```
/// use approx::assert_relative_eq;
/// use phylo_evol::lrt::chi2_pvalue;
/// assert_relative_eq!(chi2_pvalue(10.0, 2), (-5.0f64).exp(), epsilon = 1e-12);
/// assert_eq!(chi2_pvalue(-10.0, -2), 1.0);
/// assert!(chi2_pvalue(1.0, 0).is_nan());
/// ```
pub fn chi2_pvalue(statistic: f64, df: i64) -> f64 {
    if statistic < 0.0 {
        if df <= 0 {
            warn!(
                "Likelihood-ratio test with {} degrees of freedom, check the order of the models.",
                df
            );
        }
        return 1.0;
    }
    if df <= 0 {
        warn!(
            "Likelihood-ratio test with {} degrees of freedom, check the order of the models.",
            df
        );
        return f64::NAN;
    }
    match ChiSquared::new(df as f64) {
        Ok(chi2) => chi2.sf(statistic),
        Err(e) => {
            warn!("Cannot build chi-squared distribution: {}", e);
            f64::NAN
        }
    }
}

/// p-value of the likelihood-ratio test of `alternative` against the nested `null` model.
pub fn lrt_pvalue(alternative: &Fit, null: &Fit) -> f64 {
    let (statistic, df) = lrt_statistic(alternative, null);
    debug!("LRT statistic {} with {} degrees of freedom", statistic, df);
    chi2_pvalue(statistic, df)
}

#[cfg(test)]
#[cfg_attr(coverage, coverage(off))]
mod tests;

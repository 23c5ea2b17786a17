use approx::assert_relative_eq;
use rstest::*;

use crate::lrt::{chi2_pvalue, lrt_pvalue, lrt_statistic, Fit};

#[test]
fn statistic_and_degrees_of_freedom() {
    let alternative = Fit { lnl: -100.0, np: 5 };
    let null = Fit { lnl: -105.0, np: 3 };
    let (statistic, df) = lrt_statistic(&alternative, &null);
    assert_relative_eq!(statistic, 10.0);
    assert_eq!(df, 2);
    assert_relative_eq!(lrt_pvalue(&alternative, &null), 0.006737947, epsilon = 1e-8);
}

#[test]
fn misordered_models_show_no_evidence() {
    let alternative = Fit { lnl: -105.0, np: 3 };
    let null = Fit { lnl: -100.0, np: 5 };
    let (statistic, df) = lrt_statistic(&alternative, &null);
    assert_relative_eq!(statistic, -10.0);
    assert_eq!(df, -2);
    assert_eq!(lrt_pvalue(&alternative, &null), 1.0);
}

#[rstest]
#[case::one_df(3.841459, 1, 0.05)]
#[case::two_df(5.991465, 2, 0.05)]
#[case::one_df_strict(6.634897, 1, 0.01)]
#[case::zero_statistic(0.0, 3, 1.0)]
#[case::negative_statistic(-2.0, 1, 1.0)]
#[case::negative_statistic_negative_df(-10.0, -2, 1.0)]
#[case::negative_statistic_zero_df(-0.5, 0, 1.0)]
fn pvalues(#[case] statistic: f64, #[case] df: i64, #[case] expected: f64) {
    assert_relative_eq!(chi2_pvalue(statistic, df), expected, epsilon = 1e-6);
}

#[rstest]
#[case::zero(0)]
#[case::negative(-4)]
fn non_positive_degrees_of_freedom(#[case] df: i64) {
    assert!(chi2_pvalue(10.0, df).is_nan());
}

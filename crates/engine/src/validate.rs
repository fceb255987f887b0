//! Self-validation of computed results.
//!
//! These checks audit our own output, not the client's data. They produce an
//! informational report and never fail the run on their own; the caller
//! decides what a failed check means for exit status.

use std::collections::BTreeMap;

use crate::config::ExpectedTotals;
use crate::model::{AgingReport, CheckResult, ThreeWaySummary, ValidationReport};

/// Rounding slack for dollar-total comparisons.
const TOTAL_TOLERANCE: f64 = 0.01;

/// Cross-check the aging report's internal consistency: summary against
/// detail, per-row bucket sums, and the over-90 rollup.
pub fn validate_aging(report: &AgingReport) -> ValidationReport {
    let mut checks: BTreeMap<String, bool> = BTreeMap::new();
    let mut recommendations: Vec<String> = Vec::new();

    if report.is_empty() {
        recommendations.push("no aging population to validate".to_string());
        return ValidationReport {
            is_valid: true,
            checks,
            recommendations,
        };
    }

    let summary_total = report.summary_total();
    let detailed_total = report.detailed_total();
    let totals_match = (summary_total - detailed_total).abs() <= TOTAL_TOLERANCE;
    checks.insert("totals_match".to_string(), totals_match);
    if !totals_match {
        recommendations.push(format!(
            "summary total (${summary_total:.2}) does not match detailed total (${detailed_total:.2})"
        ));
    }

    let rows_consistent = report.summary.iter().all(|row| {
        let bucket_sum = row.current + row.days_31_60 + row.days_61_90 + row.over_90;
        (row.total - bucket_sum).abs() <= TOTAL_TOLERANCE
    });
    checks.insert("summary_rows_consistent".to_string(), rows_consistent);
    if !rows_consistent {
        recommendations.push("summary rows where Total does not equal the bucket sum".to_string());
    }

    let rollup_total: f64 = report.over_90.iter().map(|b| b.total_due).sum();
    let detail_over_90: f64 = report
        .detailed
        .iter()
        .filter(|row| row.days_past_due > 90)
        .map(|row| row.total_due)
        .sum();
    let rollup_matches = (rollup_total - detail_over_90).abs() <= TOTAL_TOLERANCE;
    checks.insert("over_90_matches_detail".to_string(), rollup_matches);
    if !rollup_matches {
        recommendations.push(format!(
            "over-90 rollup (${rollup_total:.2}) does not match detail (${detail_over_90:.2})"
        ));
    }

    // Informational observations, not pass/fail checks.
    if let Some(max_days) = report.detailed.iter().map(|r| r.days_past_due).max() {
        if max_days > 365 {
            recommendations.push(format!(
                "some invoices are {max_days} days past due; review for accuracy"
            ));
        }
    }
    let negative_days = report
        .detailed
        .iter()
        .filter(|r| r.days_past_due < 0)
        .count();
    if negative_days > 0 {
        recommendations.push(format!(
            "{negative_days} invoices show negative days past due (future dated)"
        ));
    }

    let is_valid = checks.values().all(|&passed| passed);
    if is_valid {
        recommendations.push("all validation checks passed".to_string());
    } else {
        recommendations.push("some validation checks failed; review results".to_string());
    }

    log::info!("self-validation: valid={is_valid}, {} checks", checks.len());

    ValidationReport {
        is_valid,
        checks,
        recommendations,
    }
}

/// Reconcile computed totals against the engagement figures the config
/// supplied. Absent expectations produce no checks.
pub fn reconciliation_checks(
    expected: &ExpectedTotals,
    three_way: &ThreeWaySummary,
    aging: &AgingReport,
) -> Vec<CheckResult> {
    let mut checks = Vec::new();

    if let Some(expected_revenue) = expected.period_revenue {
        checks.push(check(
            "period_revenue",
            expected_revenue,
            three_way.period_revenue,
            expected.tolerance_pct,
        ));
    }
    if let Some(expected_receivables) = expected.receivables_total {
        checks.push(check(
            "receivables_total",
            expected_receivables,
            aging.summary_total(),
            expected.tolerance_pct,
        ));
    }

    for c in &checks {
        if !c.within_tolerance {
            log::warn!(
                "reconciliation check '{}' out of tolerance: expected {:.2}, actual {:.2}",
                c.name,
                c.expected,
                c.actual
            );
        }
    }

    checks
}

fn check(name: &str, expected: f64, actual: f64, tolerance_pct: f64) -> CheckResult {
    let difference_pct = if expected != 0.0 {
        ((actual - expected) / expected).abs()
    } else if actual == 0.0 {
        0.0
    } else {
        1.0
    };
    CheckResult {
        name: name.to_string(),
        expected,
        actual,
        difference_pct,
        within_tolerance: difference_pct <= tolerance_pct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AgingBucket, AgingDetailRow, AgingMetadata, AgingSummaryRow, CustomerBalance,
        MatchDiagnostics,
    };
    use chrono::NaiveDate;

    fn diag() -> MatchDiagnostics {
        MatchDiagnostics {
            success: true,
            merge_rate: 1.0,
            left_matched: 1,
            right_matched: 1,
            left_unmatched: 0,
            right_unmatched: 0,
            error: None,
        }
    }

    fn report_with(detail: Vec<AgingDetailRow>, summary: Vec<AgingSummaryRow>) -> AgingReport {
        AgingReport {
            over_90: detail
                .iter()
                .filter(|r| r.days_past_due > 90)
                .map(|r| CustomerBalance {
                    cust_id: r.cust_id,
                    total_due: r.total_due,
                })
                .collect(),
            metadata: AgingMetadata {
                as_of_date: NaiveDate::from_ymd_opt(2017, 12, 31).unwrap(),
                total_invoices: detail.len(),
                total_customers: summary.len(),
                elapsed_ms: 0,
            },
            detailed: detail,
            summary,
            order_join: diag(),
            notes: Vec::new(),
        }
    }

    fn detail(cust_id: i64, days: i64, amount: f64) -> AgingDetailRow {
        AgingDetailRow {
            invoice_id: cust_id * 100 + days,
            cust_id,
            invoice_date: NaiveDate::from_ymd_opt(2017, 6, 1).unwrap(),
            total_due: amount,
            days_past_due: days,
            bucket: AgingBucket::for_days(days),
        }
    }

    #[test]
    fn consistent_report_is_valid() {
        let report = report_with(
            vec![detail(1, 45, 100.0), detail(1, 95, 50.0)],
            vec![AgingSummaryRow {
                cust_id: 1,
                current: 0.0,
                days_31_60: 100.0,
                days_61_90: 0.0,
                over_90: 50.0,
                total: 150.0,
            }],
        );
        let validation = validate_aging(&report);
        assert!(validation.is_valid);
        assert_eq!(validation.checks["totals_match"], true);
        assert!(validation
            .recommendations
            .iter()
            .any(|r| r.contains("all validation checks passed")));
    }

    #[test]
    fn mismatched_totals_flagged_not_raised() {
        let report = report_with(
            vec![detail(1, 45, 100.0)],
            vec![AgingSummaryRow {
                cust_id: 1,
                current: 0.0,
                days_31_60: 175.0,
                days_61_90: 0.0,
                over_90: 0.0,
                total: 175.0,
            }],
        );
        let validation = validate_aging(&report);
        assert!(!validation.is_valid);
        assert_eq!(validation.checks["totals_match"], false);
        assert!(validation
            .recommendations
            .iter()
            .any(|r| r.contains("does not match detailed total")));
    }

    #[test]
    fn empty_report_is_vacuously_valid() {
        let report = report_with(Vec::new(), Vec::new());
        let validation = validate_aging(&report);
        assert!(validation.is_valid);
        assert!(validation.checks.is_empty());
        assert!(validation
            .recommendations
            .iter()
            .any(|r| r.contains("no aging population")));
    }

    #[test]
    fn negative_days_observed_but_not_failing() {
        let report = report_with(
            vec![detail(1, -5, 100.0)],
            vec![AgingSummaryRow {
                cust_id: 1,
                current: 100.0,
                days_31_60: 0.0,
                days_61_90: 0.0,
                over_90: 0.0,
                total: 100.0,
            }],
        );
        let validation = validate_aging(&report);
        assert!(validation.is_valid);
        assert!(validation
            .recommendations
            .iter()
            .any(|r| r.contains("future dated")));
    }

    #[test]
    fn reconciliation_within_and_out_of_tolerance() {
        let summary = ThreeWaySummary {
            total_invoices: 10,
            complete_matches: 10,
            exceptions: 0,
            match_rate: 1.0,
            period_revenue: 1_005_000.0,
            unshipped_revenue: 0.0,
            unshipped_pct: 0.0,
        };
        let aging = report_with(Vec::new(), Vec::new());
        let expected = ExpectedTotals {
            period_revenue: Some(1_000_000.0),
            receivables_total: Some(500_000.0),
            tolerance_pct: 0.01,
        };
        let checks = reconciliation_checks(&expected, &summary, &aging);
        assert_eq!(checks.len(), 2);
        assert!(checks[0].within_tolerance); // 0.5% revenue difference
        assert!(!checks[1].within_tolerance); // empty aging vs 500k expected
        assert_eq!(checks[1].difference_pct, 1.0);
    }

    #[test]
    fn no_expectations_no_checks() {
        let summary = ThreeWaySummary {
            total_invoices: 0,
            complete_matches: 0,
            exceptions: 0,
            match_rate: 0.0,
            period_revenue: 0.0,
            unshipped_revenue: 0.0,
            unshipped_pct: 0.0,
        };
        let aging = report_with(Vec::new(), Vec::new());
        let checks = reconciliation_checks(&ExpectedTotals::default(), &summary, &aging);
        assert!(checks.is_empty());
    }
}

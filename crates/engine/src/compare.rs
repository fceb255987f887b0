//! Comparison of our aging summary against the client's own aging table.
//!
//! Client exports name their columns inconsistently, so headers pass through
//! a synonym table before any arithmetic. The comparison itself never fails:
//! an unresolvable bucket becomes a per-bucket error, not an abort.

use std::collections::BTreeMap;

use crate::error::EngineError;
use crate::model::{
    AgingBucket, AgingSummaryRow, BucketComparison, ClientAgingRow, Comparison,
    ComparisonMetrics, CustomerDifference,
};

/// Canonical column targets after synonym resolution.
const CUST_ID: &str = "CustID";
const TOTAL_DUE: &str = "TotalDue";

/// Normalize one raw header the way client exports vary: lowercase, spaces
/// and hyphens collapsed to underscores, then a synonym lookup.
fn canonical_column(raw: &str) -> Option<&'static str> {
    let normalized: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect();
    match normalized.as_str() {
        "custid" | "cust_id" | "customer_id" | "customerid" | "customer" => Some(CUST_ID),
        "totaldue" | "total_due" | "amount_due" | "balance" => Some(TOTAL_DUE),
        "0_30" | "0_30_days" | "current" => Some("0-30"),
        "31_60" | "31_60_days" => Some("31-60"),
        "61_90" | "61_90_days" => Some("61-90"),
        "90+" | "aging_90+" | "aging_90" | "over_90" | "past_due_90" | "current_90+" => {
            Some("90+")
        }
        _ => None,
    }
}

/// Standardize raw client rows (header → value maps straight off the file)
/// into typed aging rows. A missing customer column is the one hard failure;
/// unparseable numbers coerce to zero like the rest of the pipeline.
pub fn standardize_client_rows(
    raw: &[BTreeMap<String, String>],
) -> Result<Vec<ClientAgingRow>, EngineError> {
    let has_customer_column = raw
        .iter()
        .any(|record| record.keys().any(|h| canonical_column(h) == Some(CUST_ID)));
    if !raw.is_empty() && !has_customer_column {
        return Err(EngineError::MissingColumn {
            table: "client_aging".into(),
            column: CUST_ID.into(),
        });
    }

    let mut rows = Vec::with_capacity(raw.len());
    let mut skipped = 0usize;
    for record in raw {
        let mut cust_id: Option<i64> = None;
        let mut total_due: Option<f64> = None;
        let mut amounts: BTreeMap<AgingBucket, f64> = BTreeMap::new();

        for (header, value) in record {
            match canonical_column(header) {
                Some(CUST_ID) => cust_id = value.trim().parse().ok(),
                Some(TOTAL_DUE) => total_due = Some(parse_amount(value)),
                Some(label) => {
                    if let Some(bucket) = AgingBucket::from_label(label) {
                        amounts.insert(bucket, parse_amount(value));
                    }
                }
                None => {}
            }
        }

        match cust_id {
            Some(cust_id) => rows.push(ClientAgingRow {
                cust_id,
                amounts,
                total_due,
            }),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        log::warn!("client aging: {skipped} rows skipped (no parseable customer ID)");
    }
    Ok(rows)
}

/// Comparison result for when the client table could not be used at all.
/// The original workflow reports this as a recommendation, never a failure.
pub fn comparison_unavailable(reason: &str) -> Comparison {
    Comparison {
        agrees: false,
        buckets: Vec::new(),
        metrics: ComparisonMetrics {
            buckets_compared: 0,
            agreed_buckets: 0,
            buckets_within_tolerance: 0,
            total_our_amount: 0.0,
            total_client_amount: 0.0,
            total_difference: 0.0,
            overall_difference_pct: 0.0,
        },
        recommendations: vec![
            reason.to_string(),
            "obtain the client's detailed aging report for comparison".to_string(),
        ],
    }
}

fn parse_amount(value: &str) -> f64 {
    value.trim().replace(['$', ','], "").parse().unwrap_or(0.0)
}

/// Compare bucket totals and per-customer amounts against the client aging.
///
/// A bucket agrees only when the aggregate difference is within `tolerance`
/// (relative) AND no individual customer differs by more than
/// `tolerance * 1000` dollars. Overall agreement requires every bucket to
/// agree; zero compared buckets never counts as agreement.
pub fn compare_with_client(
    summary: &[AgingSummaryRow],
    client: &[ClientAgingRow],
    buckets: &[AgingBucket],
    tolerance: f64,
) -> Comparison {
    let mut results: Vec<BucketComparison> = Vec::with_capacity(buckets.len());
    for &bucket in buckets {
        results.push(compare_bucket(summary, client, bucket, tolerance));
    }

    let metrics = metrics(&results);
    let agrees = !results.is_empty() && results.iter().all(|r| r.agrees);
    let recommendations = recommendations(&results, &metrics);

    log::info!(
        "client comparison: {} buckets, {} agree, overall agreement {}",
        metrics.buckets_compared,
        metrics.agreed_buckets,
        agrees
    );

    Comparison {
        agrees,
        buckets: results,
        metrics,
        recommendations,
    }
}

fn compare_bucket(
    summary: &[AgingSummaryRow],
    client: &[ClientAgingRow],
    bucket: AgingBucket,
    tolerance: f64,
) -> BucketComparison {
    // Column present means at least one client row carried this bucket.
    if !client.iter().any(|row| row.amounts.contains_key(&bucket)) {
        return BucketComparison {
            bucket,
            our_total: 0.0,
            client_total: 0.0,
            difference: 0.0,
            difference_pct: 0.0,
            within_tolerance: false,
            customer_differences: Vec::new(),
            agrees: false,
            error: Some(format!("bucket '{bucket}' not found in client data")),
        };
    }

    let our_total: f64 = summary.iter().map(|row| row.amount(bucket)).sum();
    let client_total: f64 = client
        .iter()
        .filter_map(|row| row.amounts.get(&bucket))
        .sum();
    let difference = our_total - client_total;
    let difference_pct = if client_total != 0.0 {
        (difference / client_total).abs()
    } else {
        0.0
    };
    let within_tolerance = difference_pct <= tolerance;

    // Outer merge on customer, absent sides read as zero.
    let mut per_customer: BTreeMap<i64, (f64, f64)> = BTreeMap::new();
    for row in summary {
        per_customer.entry(row.cust_id).or_insert((0.0, 0.0)).0 += row.amount(bucket);
    }
    for row in client {
        if let Some(amount) = row.amounts.get(&bucket) {
            per_customer.entry(row.cust_id).or_insert((0.0, 0.0)).1 += amount;
        }
    }

    // Absolute threshold for customer-level noise on small amounts.
    let customer_threshold = tolerance * 1000.0;
    let customer_differences: Vec<CustomerDifference> = per_customer
        .into_iter()
        .filter_map(|(cust_id, (ours, theirs))| {
            let difference = ours - theirs;
            (difference.abs() > customer_threshold).then_some(CustomerDifference {
                cust_id,
                our_amount: ours,
                client_amount: theirs,
                difference,
            })
        })
        .collect();

    BucketComparison {
        bucket,
        our_total,
        client_total,
        difference,
        difference_pct,
        within_tolerance,
        agrees: within_tolerance && customer_differences.is_empty(),
        customer_differences,
        error: None,
    }
}

fn metrics(results: &[BucketComparison]) -> ComparisonMetrics {
    let total_our_amount: f64 = results.iter().map(|r| r.our_total).sum();
    let total_client_amount: f64 = results.iter().map(|r| r.client_total).sum();
    let total_difference: f64 = results.iter().map(|r| r.difference).sum();
    ComparisonMetrics {
        buckets_compared: results.len(),
        agreed_buckets: results.iter().filter(|r| r.agrees).count(),
        buckets_within_tolerance: results.iter().filter(|r| r.within_tolerance).count(),
        total_our_amount,
        total_client_amount,
        total_difference,
        overall_difference_pct: if total_client_amount != 0.0 {
            (total_difference / total_client_amount).abs()
        } else {
            0.0
        },
    }
}

fn recommendations(results: &[BucketComparison], metrics: &ComparisonMetrics) -> Vec<String> {
    let mut out = Vec::new();

    if metrics.agreed_buckets == metrics.buckets_compared {
        out.push("aging analysis agrees with client data across all buckets".to_string());
    } else if metrics.buckets_within_tolerance == metrics.buckets_compared {
        out.push("aging analysis within tolerance of client data".to_string());
    } else {
        out.push("significant differences found between our analysis and client data".to_string());
    }

    if metrics.total_difference != 0.0 {
        out.push(format!(
            "net difference: ${:.2} ({:.1}% of client total)",
            metrics.total_difference,
            metrics.overall_difference_pct * 100.0
        ));
    }

    for result in results {
        if let Some(error) = &result.error {
            out.push(error.clone());
        }
        if !result.customer_differences.is_empty() {
            out.push(format!(
                "bucket {}: {} customers with material differences; investigate individually",
                result.bucket,
                result.customer_differences.len()
            ));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn our_row(cust_id: i64, over_90: f64) -> AgingSummaryRow {
        AgingSummaryRow {
            cust_id,
            current: 0.0,
            days_31_60: 0.0,
            days_61_90: 0.0,
            over_90,
            total: over_90,
        }
    }

    fn client_row(cust_id: i64, over_90: f64) -> ClientAgingRow {
        ClientAgingRow {
            cust_id,
            amounts: BTreeMap::from([(AgingBucket::Over90, over_90)]),
            total_due: None,
        }
    }

    /// 50,000 vs 49,500 disagrees at the aggregate level (1.01% > 1%) even
    /// before customer detail is considered.
    #[test]
    fn off_by_a_hair_still_disagrees() {
        let ours = vec![our_row(1, 50_000.0)];
        let client = vec![client_row(1, 49_500.0)];
        let cmp = compare_with_client(&ours, &client, &[AgingBucket::Over90], 0.01);

        let bucket = &cmp.buckets[0];
        assert!((bucket.difference - 500.0).abs() < 0.01);
        assert!(bucket.difference_pct > 0.01);
        assert!(!bucket.within_tolerance);
        assert!(!cmp.agrees);
    }

    /// Swapping which side is "ours" and which is the client's preserves the
    /// tolerance outcome whenever the difference is clearly inside or clearly
    /// outside the band. The relative difference is always measured against
    /// the client total, so only the exact boundary is direction-sensitive.
    #[test]
    fn tolerance_is_symmetric_away_from_the_boundary() {
        let bucket = [AgingBucket::Over90];

        // 0.5% apart: within tolerance from either direction.
        let cmp = compare_with_client(&[our_row(1, 10_050.0)], &[client_row(1, 10_000.0)], &bucket, 0.01);
        let swapped = compare_with_client(&[our_row(1, 10_000.0)], &[client_row(1, 10_050.0)], &bucket, 0.01);
        assert!(cmp.buckets[0].within_tolerance);
        assert!(swapped.buckets[0].within_tolerance);
        assert!((cmp.buckets[0].difference + swapped.buckets[0].difference).abs() < 0.01);

        // 5% apart: outside tolerance from either direction.
        let cmp = compare_with_client(&[our_row(1, 10_500.0)], &[client_row(1, 10_000.0)], &bucket, 0.01);
        let swapped = compare_with_client(&[our_row(1, 10_000.0)], &[client_row(1, 10_500.0)], &bucket, 0.01);
        assert!(!cmp.buckets[0].within_tolerance);
        assert!(!swapped.buckets[0].within_tolerance);
    }

    /// A $100 difference straddling a $9,900 / $10,000 pair sits exactly on
    /// the boundary: 100 / 9,900 is 1.01% but 100 / 10,000 is 1.00%, so the
    /// client-total denominator decides which direction passes.
    #[test]
    fn tolerance_boundary_uses_client_total_as_denominator() {
        let bucket = [AgingBucket::Over90];

        let cmp = compare_with_client(&[our_row(1, 10_000.0)], &[client_row(1, 9_900.0)], &bucket, 0.01);
        assert!(!cmp.buckets[0].within_tolerance);

        let swapped = compare_with_client(&[our_row(1, 9_900.0)], &[client_row(1, 10_000.0)], &bucket, 0.01);
        assert!(swapped.buckets[0].within_tolerance);
    }

    #[test]
    fn exact_match_agrees() {
        let ours = vec![our_row(1, 10_000.0), our_row(2, 5_000.0)];
        let client = vec![client_row(1, 10_000.0), client_row(2, 5_000.0)];
        let cmp = compare_with_client(&ours, &client, &[AgingBucket::Over90], 0.01);
        assert!(cmp.agrees);
        assert_eq!(cmp.metrics.agreed_buckets, 1);
        assert!(cmp.recommendations[0].contains("agrees with client data"));
    }

    #[test]
    fn customer_level_difference_blocks_agreement() {
        // Totals match but two customers offset each other by $50 each,
        // above the 0.01 * 1000 = $10 customer threshold.
        let ours = vec![our_row(1, 1_050.0), our_row(2, 950.0)];
        let client = vec![client_row(1, 1_000.0), client_row(2, 1_000.0)];
        let cmp = compare_with_client(&ours, &client, &[AgingBucket::Over90], 0.01);

        let bucket = &cmp.buckets[0];
        assert!(bucket.within_tolerance);
        assert_eq!(bucket.customer_differences.len(), 2);
        assert!(!bucket.agrees);
        assert!(!cmp.agrees);
    }

    #[test]
    fn customer_missing_on_one_side_reads_as_zero() {
        let ours = vec![our_row(1, 100.0)];
        let client = vec![client_row(2, 100.0)];
        let cmp = compare_with_client(&ours, &client, &[AgingBucket::Over90], 0.01);
        let diffs = &cmp.buckets[0].customer_differences;
        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[0].client_amount, 0.0);
        assert_eq!(diffs[1].our_amount, 0.0);
    }

    #[test]
    fn missing_bucket_is_error_not_panic() {
        let ours = vec![our_row(1, 100.0)];
        let client = vec![ClientAgingRow {
            cust_id: 1,
            amounts: BTreeMap::new(),
            total_due: Some(100.0),
        }];
        let cmp = compare_with_client(&ours, &client, &[AgingBucket::Over90], 0.01);
        assert!(!cmp.agrees);
        assert!(cmp.buckets[0].error.as_deref().unwrap().contains("not found"));
    }

    #[test]
    fn zero_buckets_never_agrees() {
        let cmp = compare_with_client(&[], &[], &[], 0.01);
        assert!(!cmp.agrees);
        assert_eq!(cmp.metrics.buckets_compared, 0);
    }

    #[test]
    fn header_synonyms_standardize() {
        let raw = vec![BTreeMap::from([
            ("Customer ID".to_string(), "42".to_string()),
            ("Over 90".to_string(), "$1,250.00".to_string()),
            ("0-30 Days".to_string(), "300".to_string()),
            ("Balance".to_string(), "1550".to_string()),
            ("Region".to_string(), "West".to_string()),
        ])];
        let rows = standardize_client_rows(&raw).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cust_id, 42);
        assert_eq!(rows[0].amounts[&AgingBucket::Over90], 1250.0);
        assert_eq!(rows[0].amounts[&AgingBucket::Current], 300.0);
        assert_eq!(rows[0].total_due, Some(1550.0));
    }

    #[test]
    fn missing_customer_column_is_hard_error() {
        let raw = vec![BTreeMap::from([(
            "Over 90".to_string(),
            "100".to_string(),
        )])];
        let err = standardize_client_rows(&raw).unwrap_err();
        assert!(matches!(err, EngineError::MissingColumn { .. }));
    }

    #[test]
    fn rows_without_parseable_customer_id_are_skipped() {
        let raw = vec![
            BTreeMap::from([
                ("CustID".to_string(), "abc".to_string()),
                ("90+".to_string(), "100".to_string()),
            ]),
            BTreeMap::from([
                ("CustID".to_string(), "7".to_string()),
                ("90+".to_string(), "200".to_string()),
            ]),
        ];
        let rows = standardize_client_rows(&raw).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cust_id, 7);
    }

    #[test]
    fn unavailable_comparison_carries_reason() {
        let cmp = comparison_unavailable("could not read client file");
        assert!(!cmp.agrees);
        assert_eq!(cmp.metrics.buckets_compared, 0);
        assert!(cmp.recommendations[0].contains("could not read"));
    }

    #[test]
    fn unparseable_amounts_coerce_to_zero() {
        let raw = vec![BTreeMap::from([
            ("CustID".to_string(), "1".to_string()),
            ("90+".to_string(), "n/a".to_string()),
        ])];
        let rows = standardize_client_rows(&raw).unwrap();
        assert_eq!(rows[0].amounts[&AgingBucket::Over90], 0.0);
    }
}

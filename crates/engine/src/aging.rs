//! Receivables aging engine.
//!
//! Computes days past due per unpaid invoice relative to an as-of date,
//! assigns aging buckets, pivots to a per-customer summary, and derives a
//! recommended allowance for doubtful accounts from bucket percentages.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::NaiveDate;

use crate::config::NegativeDaysPolicy;
use crate::error::EngineError;
use crate::join::{self, JoinKind};
use crate::model::{
    AgingBucket, AgingDetailRow, AgingMetadata, AgingReport, AgingSummaryRow, Assessment,
    AllowanceVerdict, BucketAllowance, Comparison, CustomerBalance, Dataset, MatchDiagnostics,
};

/// Retention window for days past due. Rows outside it are dropped as a
/// data-quality guard against corrupt future or very stale dates.
pub const MIN_DAYS_PAST_DUE: i64 = -30;
pub const MAX_DAYS_PAST_DUE: i64 = 365;

/// Per-invoice amount and fallback date backfilled from the order table.
#[derive(Debug, Clone)]
struct OrderAmount {
    invoice_id: i64,
    total_due: Option<f64>,
    order_date: Option<NaiveDate>,
}

/// Run the aging analysis as of `as_of`.
///
/// No invoices at all is fatal; no *unpaid* invoices returns an explicit
/// empty report. The result is an immutable value: rerunning with the same
/// inputs yields an identical report.
pub fn perform_aging(
    dataset: &Dataset,
    as_of: NaiveDate,
    policy: NegativeDaysPolicy,
    merge_threshold: f64,
    validate: bool,
) -> Result<AgingReport, EngineError> {
    let start = Instant::now();
    log::info!("aging analysis as of {as_of}");

    if dataset.invoices.is_empty() {
        return Err(EngineError::EmptyTable {
            table: "customer_invoices".into(),
            detail: "no invoice rows loaded".into(),
        });
    }

    let unpaid: Vec<_> = dataset
        .invoices
        .iter()
        .filter(|inv| !inv.is_paid())
        .cloned()
        .collect();

    let mut notes = Vec::new();

    if unpaid.is_empty() {
        log::warn!("no unpaid invoices found");
        notes.push("no unpaid invoices found".to_string());
        return Ok(empty_report(as_of, notes, start));
    }

    if validate {
        notes.extend(validate_unpaid(&unpaid, &dataset.orders));
    }

    // Invoice amounts live on the order, not the invoice. Dedupe by
    // InvoiceID before the merge (first occurrence wins).
    let mut seen: BTreeMap<i64, ()> = BTreeMap::new();
    let mut amounts: Vec<OrderAmount> = Vec::new();
    for order in &dataset.orders {
        if let Some(invoice_id) = order.invoice_id {
            if seen.insert(invoice_id, ()).is_none() {
                amounts.push(OrderAmount {
                    invoice_id,
                    total_due: order.total_due,
                    order_date: order.order_date,
                });
            }
        }
    }

    let joined = join::merge(
        &unpaid,
        &amounts,
        |inv| Some(inv.invoice_id),
        |amt| Some(amt.invoice_id),
        JoinKind::Left,
        merge_threshold,
    );
    if !joined.diagnostics.success {
        notes.push(format!(
            "invoice amount join rate {:.1}% below threshold {:.1}%; unmatched invoices age with zero balances",
            joined.diagnostics.merge_rate * 100.0,
            merge_threshold * 100.0
        ));
    }

    let mut detailed: Vec<AgingDetailRow> = Vec::new();
    let mut dropped_no_date = 0usize;
    let mut dropped_no_customer = 0usize;
    let mut dropped_out_of_range = 0usize;
    let mut dropped_future = 0usize;

    for (inv, amount) in &joined.rows {
        let inv = match inv {
            Some(inv) => inv,
            None => continue,
        };
        // OrderDate stands in only when the invoice has no date of its own.
        let invoice_date = inv
            .invoice_date
            .or_else(|| amount.as_ref().and_then(|a| a.order_date));
        let invoice_date = match invoice_date {
            Some(d) => d,
            None => {
                dropped_no_date += 1;
                continue;
            }
        };
        let cust_id = match inv.cust_id {
            Some(id) => id,
            None => {
                dropped_no_customer += 1;
                continue;
            }
        };

        let days_past_due = (as_of - invoice_date).num_days();
        if !(MIN_DAYS_PAST_DUE..=MAX_DAYS_PAST_DUE).contains(&days_past_due) {
            dropped_out_of_range += 1;
            continue;
        }
        if policy == NegativeDaysPolicy::Exclude && days_past_due < 0 {
            dropped_future += 1;
            continue;
        }

        detailed.push(AgingDetailRow {
            invoice_id: inv.invoice_id,
            cust_id,
            invoice_date,
            total_due: amount.as_ref().and_then(|a| a.total_due).unwrap_or(0.0),
            days_past_due,
            bucket: AgingBucket::for_days(days_past_due),
        });
    }

    detailed.sort_by_key(|row| (row.cust_id, row.invoice_id));

    if dropped_no_date > 0 {
        notes.push(format!(
            "{dropped_no_date} invoices dropped: no resolvable invoice or order date"
        ));
    }
    if dropped_no_customer > 0 {
        notes.push(format!(
            "{dropped_no_customer} invoices dropped: missing customer ID"
        ));
    }
    if dropped_out_of_range > 0 {
        notes.push(format!(
            "{dropped_out_of_range} invoices dropped outside days-past-due range [{MIN_DAYS_PAST_DUE}, {MAX_DAYS_PAST_DUE}] (data-quality filter, not a business rule)"
        ));
    }
    if dropped_future > 0 {
        notes.push(format!(
            "{dropped_future} future-dated invoices excluded per negative-days policy"
        ));
    }

    if detailed.is_empty() {
        log::warn!("no valid invoice details after merging");
        notes.push("no valid invoice details after merging".to_string());
        let mut report = empty_report(as_of, notes, start);
        report.order_join = joined.diagnostics;
        return Ok(report);
    }

    let summary = pivot_summary(&detailed);
    let over_90 = over_90_rollup(&detailed);

    let metadata = AgingMetadata {
        as_of_date: as_of,
        total_invoices: detailed.len(),
        total_customers: summary.len(),
        elapsed_ms: start.elapsed().as_millis(),
    };
    log::info!(
        "aging complete: {} invoices, {} customers, {} over 90 days",
        metadata.total_invoices,
        metadata.total_customers,
        over_90.len()
    );

    Ok(AgingReport {
        detailed,
        summary,
        over_90,
        metadata,
        order_join: joined.diagnostics,
        notes,
    })
}

fn empty_report(as_of: NaiveDate, notes: Vec<String>, start: Instant) -> AgingReport {
    AgingReport {
        detailed: Vec::new(),
        summary: Vec::new(),
        over_90: Vec::new(),
        metadata: AgingMetadata {
            as_of_date: as_of,
            total_invoices: 0,
            total_customers: 0,
            elapsed_ms: start.elapsed().as_millis(),
        },
        order_join: MatchDiagnostics {
            success: false,
            merge_rate: 0.0,
            left_matched: 0,
            right_matched: 0,
            left_unmatched: 0,
            right_unmatched: 0,
            error: Some(join::ERR_EMPTY_LEFT.to_string()),
        },
        notes,
    }
}

/// Pre-merge data-quality observations, mirroring what a reviewer would ask.
fn validate_unpaid(
    unpaid: &[crate::model::InvoiceRecord],
    orders: &[crate::model::OrderRecord],
) -> Vec<String> {
    let mut notes = Vec::new();

    let missing_dates = unpaid.iter().filter(|i| i.invoice_date.is_none()).count();
    if missing_dates > 0 {
        notes.push(format!("{missing_dates} unpaid invoices missing invoice dates"));
    }

    let missing_customers = unpaid.iter().filter(|i| i.cust_id.is_none()).count();
    if missing_customers > 0 {
        notes.push(format!("{missing_customers} unpaid invoices missing customer IDs"));
    }

    if orders.is_empty() {
        notes.push("sales orders table is empty".to_string());
    } else {
        let known: std::collections::BTreeSet<i64> =
            orders.iter().filter_map(|o| o.invoice_id).collect();
        let orphaned = unpaid
            .iter()
            .filter(|i| !known.contains(&i.invoice_id))
            .count();
        if orphaned > 0 {
            notes.push(format!("{orphaned} unpaid invoices not found in sales orders"));
        }
    }

    notes
}

/// Group by (customer, bucket), sum TotalDue, pivot to one row per customer
/// with zero-filled bucket columns and an appended Total.
fn pivot_summary(detailed: &[AgingDetailRow]) -> Vec<AgingSummaryRow> {
    let mut per_customer: BTreeMap<i64, [f64; 4]> = BTreeMap::new();
    for row in detailed {
        let buckets = per_customer.entry(row.cust_id).or_insert([0.0; 4]);
        let slot = match row.bucket {
            AgingBucket::Current => 0,
            AgingBucket::Days31To60 => 1,
            AgingBucket::Days61To90 => 2,
            AgingBucket::Over90 => 3,
        };
        buckets[slot] += row.total_due;
    }

    per_customer
        .into_iter()
        .map(|(cust_id, b)| AgingSummaryRow {
            cust_id,
            current: b[0],
            days_31_60: b[1],
            days_61_90: b[2],
            over_90: b[3],
            total: b.iter().sum(),
        })
        .collect()
}

/// Per-customer subtotal of balances more than 90 days past due.
fn over_90_rollup(detailed: &[AgingDetailRow]) -> Vec<CustomerBalance> {
    let mut rollup: BTreeMap<i64, f64> = BTreeMap::new();
    for row in detailed {
        if row.days_past_due > 90 {
            *rollup.entry(row.cust_id).or_insert(0.0) += row.total_due;
        }
    }
    rollup
        .into_iter()
        .map(|(cust_id, total_due)| CustomerBalance { cust_id, total_due })
        .collect()
}

// ---------------------------------------------------------------------------
// Allowance assessment
// ---------------------------------------------------------------------------

/// Assess the client's allowance for doubtful accounts against the aging
/// profile. `buckets` carries (bucket, loss percentage) pairs; when
/// comparison results are supplied, disagreement with the client aging table
/// escalates the verdict; the more severe classification wins.
pub fn assess_allowance(
    report: &AgingReport,
    client_allowance: f64,
    buckets: &[(AgingBucket, f64)],
    comparison: Option<&Comparison>,
) -> Assessment {
    let mut bucket_breakdown = Vec::with_capacity(buckets.len());
    let mut recommended = 0.0;
    for &(bucket, percentage) in buckets {
        let amount = report.bucket_total(bucket);
        let allowance = amount * percentage;
        recommended += allowance;
        bucket_breakdown.push(BucketAllowance {
            bucket,
            amount,
            percentage,
            allowance,
        });
    }

    let difference = client_allowance - recommended;

    // Allowance-only test: 10% / 5% of the client's figure.
    let allowance_verdict = if difference.abs() > client_allowance * 0.10 {
        AllowanceVerdict::Questionable
    } else if difference.abs() > client_allowance * 0.05 {
        AllowanceVerdict::RequiresReview
    } else {
        AllowanceVerdict::Reasonable
    };

    let mut factors = Vec::new();

    // Comparison escalation: aggregate disagreement with the client aging.
    let comparison_verdict = match comparison {
        Some(c) if c.metrics.buckets_compared == 0 => {
            factors.push("client aging comparison unavailable".to_string());
            AllowanceVerdict::Reasonable
        }
        Some(c) if !c.agrees => {
            let pct = c.metrics.overall_difference_pct;
            factors.push(format!(
                "client aging comparison disagrees ({:.1}% of client amounts)",
                pct * 100.0
            ));
            if pct > 0.05 {
                AllowanceVerdict::Questionable
            } else if pct > 0.02 {
                AllowanceVerdict::RequiresReview
            } else {
                AllowanceVerdict::Reasonable
            }
        }
        Some(_) => {
            factors.push("client aging comparison agrees".to_string());
            AllowanceVerdict::Reasonable
        }
        None => AllowanceVerdict::Reasonable,
    };

    let verdict = allowance_verdict.max(comparison_verdict);

    for b in &bucket_breakdown {
        factors.push(format!(
            "{}: ${:.2} x {:.0}% = ${:.2}",
            b.bucket,
            b.amount,
            b.percentage * 100.0,
            b.allowance
        ));
    }
    factors.push(format!("total recommended allowance: ${recommended:.2}"));
    factors.push(format!("client allowance: ${client_allowance:.2}"));
    if difference != 0.0 && client_allowance != 0.0 {
        factors.push(format!(
            "difference: ${:.2} ({:.1}% of client allowance)",
            difference,
            (difference / client_allowance).abs() * 100.0
        ));
    }
    match verdict {
        AllowanceVerdict::Questionable => {
            factors.push("obtain additional evidence for allowance reasonableness".to_string());
        }
        AllowanceVerdict::RequiresReview => {
            factors.push("discuss allowance methodology with the client".to_string());
        }
        AllowanceVerdict::Reasonable => {}
    }

    Assessment {
        client_allowance,
        recommended_allowance: recommended,
        difference,
        verdict,
        bucket_breakdown,
        factors,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

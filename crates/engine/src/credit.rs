//! Credit limit analysis.
//!
//! Two passes: credit-approved sales against missing or zero limits, and
//! per-customer open balances against authorized limits. Balance amounts come
//! from the lossy invoice-to-order join; when that join is too poor to trust,
//! the report falls back to invoice counts and says so.

use std::collections::BTreeMap;

use crate::error::EngineError;
use crate::join::{self, JoinKind};
use crate::model::{
    BalanceReport, BalanceRow, BalanceSource, CreditReport, CreditViolation, Dataset,
    MatchDiagnostics, RiskGrade, ViolationKind,
};

/// Below this merge rate the order amounts are not trusted at all and the
/// balance analysis degrades to count-only.
const AMOUNT_FALLBACK_RATE: f64 = 0.5;

/// High-utilization watch threshold.
const HIGH_UTILIZATION: f64 = 0.8;

#[derive(Debug, Clone)]
struct LimitSide {
    cust_id: i64,
    credit_limit: Option<f64>,
}

fn limit_table(dataset: &Dataset) -> Vec<LimitSide> {
    dataset
        .customers
        .iter()
        .map(|c| LimitSide {
            cust_id: c.cust_id,
            credit_limit: c.credit_limit,
        })
        .collect()
}

/// Find credit-approved sales whose customers have no usable credit limit.
pub fn analyze_credit_limits(
    dataset: &Dataset,
    merge_threshold: f64,
) -> Result<CreditReport, EngineError> {
    log::info!("credit limit analysis over {} orders", dataset.orders.len());

    if dataset.orders.is_empty() {
        return Err(EngineError::EmptyTable {
            table: "sales_orders".into(),
            detail: "no order rows loaded".into(),
        });
    }

    let mut notes = Vec::new();

    let approved: Vec<_> = dataset
        .orders
        .iter()
        .filter(|o| o.credit_approval.is_some())
        .cloned()
        .collect();
    log::debug!("{} credit-approved sales", approved.len());

    if approved.is_empty() {
        notes.push("no credit-approved sales found".to_string());
        return Ok(CreditReport {
            violations: Vec::new(),
            by_territory: BTreeMap::new(),
            by_product: BTreeMap::new(),
            limit_join: empty_diag(),
            notes,
        });
    }

    let limits = limit_table(dataset);
    let joined = join::merge(
        &approved,
        &limits,
        |o| o.cust_id,
        |l| Some(l.cust_id),
        JoinKind::Left,
        merge_threshold,
    );
    if !joined.diagnostics.success {
        notes.push(format!(
            "credit limit join rate {:.1}% below threshold; possible data quality issue",
            joined.diagnostics.merge_rate * 100.0
        ));
    }

    let mut violations: Vec<CreditViolation> = Vec::new();
    for (order, limit) in &joined.rows {
        let order = match order {
            Some(order) => order,
            None => continue,
        };
        let kind = match limit.as_ref().and_then(|l| l.credit_limit) {
            None => Some(ViolationKind::MissingLimit),
            Some(limit) if limit == 0.0 => Some(ViolationKind::ZeroLimit),
            Some(_) => None,
        };
        if let Some(kind) = kind {
            violations.push(CreditViolation {
                sales_order_id: order.sales_order_id,
                cust_id: order.cust_id,
                territory_id: order.territory_id,
                prod_id: order.prod_id,
                amount: order.sub_total,
                kind,
            });
        }
    }
    violations.sort_by_key(|v| v.sales_order_id);

    let mut by_territory: BTreeMap<i64, usize> = BTreeMap::new();
    let mut by_product: BTreeMap<i64, usize> = BTreeMap::new();
    for v in &violations {
        if let Some(territory) = v.territory_id {
            *by_territory.entry(territory).or_insert(0) += 1;
        }
        if let Some(product) = v.prod_id {
            *by_product.entry(product).or_insert(0) += 1;
        }
    }

    if let Some((&territory, &count)) = by_territory.iter().max_by_key(|(_, &count)| count) {
        notes.push(format!(
            "territory {territory} has the most violations ({count})"
        ));
    }

    log::info!("{} credit limit violations", violations.len());

    Ok(CreditReport {
        violations,
        by_territory,
        by_product,
        limit_join: joined.diagnostics,
        notes,
    })
}

/// Compare per-customer open balances with authorized credit limits.
pub fn analyze_balances(
    dataset: &Dataset,
    lossy_threshold: f64,
    merge_threshold: f64,
) -> Result<BalanceReport, EngineError> {
    log::info!("balance vs credit limit analysis");

    if dataset.invoices.is_empty() {
        return Err(EngineError::EmptyTable {
            table: "customer_invoices".into(),
            detail: "no invoice rows loaded".into(),
        });
    }

    let mut notes = Vec::new();

    let unpaid: Vec<_> = dataset
        .invoices
        .iter()
        .filter(|inv| !inv.is_paid() && inv.cust_id.is_some())
        .cloned()
        .collect();

    if unpaid.is_empty() {
        notes.push("no unpaid invoices; balance analysis skipped".to_string());
        return Ok(BalanceReport {
            rows: Vec::new(),
            source: BalanceSource::CountOnly,
            risk: RiskGrade::Low,
            amount_join: empty_diag(),
            limit_join: empty_diag(),
            notes,
        });
    }

    // Amounts come from orders keyed by InvoiceID; this join is known lossy.
    let mut seen: BTreeMap<i64, ()> = BTreeMap::new();
    let mut amounts: Vec<(i64, Option<f64>)> = Vec::new();
    for order in &dataset.orders {
        if let Some(invoice_id) = order.invoice_id {
            if seen.insert(invoice_id, ()).is_none() {
                amounts.push((invoice_id, order.total_due));
            }
        }
    }

    let amount_join = join::merge(
        &unpaid,
        &amounts,
        |inv| Some(inv.invoice_id),
        |(invoice_id, _)| Some(*invoice_id),
        JoinKind::Left,
        lossy_threshold,
    );

    let source = if amount_join.diagnostics.merge_rate > AMOUNT_FALLBACK_RATE {
        BalanceSource::OrderAmounts
    } else {
        notes.push(format!(
            "order amount join rate {:.1}% too low; balances degraded to invoice counts",
            amount_join.diagnostics.merge_rate * 100.0
        ));
        BalanceSource::CountOnly
    };
    if source == BalanceSource::OrderAmounts && !amount_join.diagnostics.success {
        notes.push("order amount join below threshold; missing amounts read as zero".to_string());
    }

    let mut per_customer: BTreeMap<i64, (usize, f64)> = BTreeMap::new();
    for (inv, amount) in &amount_join.rows {
        let inv = match inv {
            Some(inv) => inv,
            None => continue,
        };
        let cust_id = match inv.cust_id {
            Some(id) => id,
            None => continue,
        };
        let entry = per_customer.entry(cust_id).or_insert((0, 0.0));
        entry.0 += 1;
        if source == BalanceSource::OrderAmounts {
            entry.1 += amount.as_ref().and_then(|(_, due)| *due).unwrap_or(0.0);
        }
    }

    #[derive(Debug, Clone)]
    struct CustomerTotal {
        cust_id: i64,
        invoice_count: usize,
        total_balance: f64,
    }
    let balances: Vec<CustomerTotal> = per_customer
        .into_iter()
        .map(|(cust_id, (invoice_count, total_balance))| CustomerTotal {
            cust_id,
            invoice_count,
            total_balance,
        })
        .collect();

    let limits = limit_table(dataset);
    let limit_join = join::merge(
        &balances,
        &limits,
        |b| Some(b.cust_id),
        |l| Some(l.cust_id),
        JoinKind::Left,
        merge_threshold,
    );
    if !limit_join.diagnostics.success {
        notes.push(
            "credit limit join below threshold; missing limits treated as zero".to_string(),
        );
    }

    let mut rows: Vec<BalanceRow> = Vec::new();
    for (balance, limit) in &limit_join.rows {
        let balance = match balance {
            Some(balance) => balance,
            None => continue,
        };
        let credit_limit = limit
            .as_ref()
            .and_then(|l| l.credit_limit)
            .unwrap_or(0.0);
        let utilization = if credit_limit > 0.0 {
            balance.total_balance / credit_limit
        } else {
            0.0
        };
        rows.push(BalanceRow {
            cust_id: balance.cust_id,
            invoice_count: balance.invoice_count,
            total_balance: balance.total_balance,
            credit_limit,
            utilization,
            exceeds_limit: balance.total_balance > credit_limit,
        });
    }
    rows.sort_by_key(|r| r.cust_id);

    let excess = rows.iter().filter(|r| r.exceeds_limit).count();
    let high_utilization = rows.iter().filter(|r| r.utilization > HIGH_UTILIZATION).count();
    let excess_rate = if rows.is_empty() {
        0.0
    } else {
        excess as f64 / rows.len() as f64
    };
    let risk = if excess_rate > 0.10 {
        RiskGrade::High
    } else if excess_rate > 0.05 {
        RiskGrade::Moderate
    } else {
        RiskGrade::Low
    };
    if high_utilization > 0 {
        notes.push(format!(
            "{high_utilization} customers above {:.0}% credit utilization",
            HIGH_UTILIZATION * 100.0
        ));
    }

    log::info!(
        "balance analysis: {} customers, {} exceed limits ({:.1}%), risk {:?}",
        rows.len(),
        excess,
        excess_rate * 100.0,
        risk
    );

    Ok(BalanceReport {
        rows,
        source,
        risk,
        amount_join: amount_join.diagnostics,
        limit_join: limit_join.diagnostics,
        notes,
    })
}

fn empty_diag() -> MatchDiagnostics {
    MatchDiagnostics {
        success: false,
        merge_rate: 0.0,
        left_matched: 0,
        right_matched: 0,
        left_unmatched: 0,
        right_unmatched: 0,
        error: Some(join::ERR_EMPTY_LEFT.to_string()),
    }
}

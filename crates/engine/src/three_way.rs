//! Three-way match: invoice against sales order against shipment.
//!
//! Every invoice in the analysis year is classified by whether its order and
//! shipment evidence exist. Invoiced-not-shipped is the audit-critical cutoff
//! exception: revenue recognized before goods moved.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};

use crate::error::EngineError;
use crate::join::{self, JoinKind};
use crate::model::{
    CutoffException, Dataset, ThreeWayReport, ThreeWayRow, ThreeWaySummary,
};

/// Order-side columns carried through the match. Customer and territory come
/// from the order, not the invoice, so exception rows can be attributed even
/// when the invoice side is sparse.
#[derive(Debug, Clone)]
struct OrderSide {
    sales_order_id: i64,
    sub_total: Option<f64>,
    ship_id: Option<i64>,
    territory_id: Option<i64>,
    cust_id: Option<i64>,
}

#[derive(Debug, Clone)]
struct ShipSide {
    ship_id: i64,
    ship_date: Option<NaiveDate>,
}

/// Classify every invoice dated in `year` against order and shipment
/// evidence. Join health is reported, never raised; only a dataset with no
/// invoices at all is fatal.
pub fn perform_three_way_match(
    dataset: &Dataset,
    year: i32,
    merge_threshold: f64,
) -> Result<ThreeWayReport, EngineError> {
    log::info!("three-way match for calendar year {year}");

    if dataset.invoices.is_empty() {
        return Err(EngineError::EmptyTable {
            table: "customer_invoices".into(),
            detail: "no invoice rows loaded".into(),
        });
    }

    // Undated invoices cannot be assigned to the period and are excluded.
    let period: Vec<_> = dataset
        .invoices
        .iter()
        .filter(|inv| inv.invoice_date.map(|d| d.year()) == Some(year))
        .cloned()
        .collect();
    log::debug!("{} of {} invoices dated in {year}", period.len(), dataset.invoices.len());

    let mut order_index: BTreeMap<i64, ()> = BTreeMap::new();
    let mut orders: Vec<OrderSide> = Vec::new();
    for o in &dataset.orders {
        if order_index.insert(o.sales_order_id, ()).is_none() {
            orders.push(OrderSide {
                sales_order_id: o.sales_order_id,
                sub_total: o.sub_total,
                ship_id: o.ship_id,
                territory_id: o.territory_id,
                cust_id: o.cust_id,
            });
        }
    }

    let order_joined = join::merge(
        &period,
        &orders,
        |inv| inv.sales_order_id,
        |o| Some(o.sales_order_id),
        JoinKind::Left,
        merge_threshold,
    );

    // Intermediate pairs keyed by the order's ShipID for the second leg.
    let paired: Vec<(crate::model::InvoiceRecord, Option<OrderSide>)> = order_joined
        .rows
        .iter()
        .filter_map(|(inv, o)| inv.clone().map(|inv| (inv, o.clone())))
        .collect();

    let mut ship_index: BTreeMap<i64, ()> = BTreeMap::new();
    let mut ships: Vec<ShipSide> = Vec::new();
    for s in &dataset.shipments {
        if ship_index.insert(s.ship_id, ()).is_none() {
            ships.push(ShipSide {
                ship_id: s.ship_id,
                ship_date: s.ship_date,
            });
        }
    }

    let ship_joined = join::merge(
        &paired,
        &ships,
        |(_, o)| o.as_ref().and_then(|o| o.ship_id),
        |s| Some(s.ship_id),
        JoinKind::Left,
        merge_threshold,
    );

    let mut rows: Vec<ThreeWayRow> = Vec::new();
    for ((inv, order), ship) in ship_joined
        .rows
        .iter()
        .filter_map(|(left, ship)| left.clone().map(|l| (l, ship.clone())))
    {
        // Order evidence means an amount actually came across the join.
        let amount = order.as_ref().and_then(|o| o.sub_total);
        rows.push(ThreeWayRow {
            invoice_id: inv.invoice_id,
            sales_order_id: inv.sales_order_id,
            cust_id: order.as_ref().and_then(|o| o.cust_id).or(inv.cust_id),
            territory_id: order.as_ref().and_then(|o| o.territory_id),
            invoice_date: inv.invoice_date,
            amount,
            has_order: amount.is_some(),
            has_shipment: ship.as_ref().and_then(|s| s.ship_date).is_some(),
        });
    }
    rows.sort_by_key(|r| r.invoice_id);

    let summary = summarize(&rows);
    let cutoff_exceptions = cutoff_exceptions(dataset, &rows);

    log::info!(
        "three-way match: {} invoices, {} complete ({:.1}%), {} cutoff exceptions",
        summary.total_invoices,
        summary.complete_matches,
        summary.match_rate * 100.0,
        cutoff_exceptions.len()
    );

    Ok(ThreeWayReport {
        year,
        summary,
        rows,
        cutoff_exceptions,
        order_join: order_joined.diagnostics,
        shipment_join: ship_joined.diagnostics,
    })
}

fn summarize(rows: &[ThreeWayRow]) -> ThreeWaySummary {
    let total_invoices = rows.len();
    let complete_matches = rows.iter().filter(|r| r.complete_match()).count();
    let period_revenue: f64 = rows.iter().filter_map(|r| r.amount).sum();
    let unshipped_revenue: f64 = rows
        .iter()
        .filter(|r| r.has_order && !r.has_shipment)
        .filter_map(|r| r.amount)
        .sum();

    ThreeWaySummary {
        total_invoices,
        complete_matches,
        exceptions: total_invoices - complete_matches,
        match_rate: if total_invoices == 0 {
            0.0
        } else {
            complete_matches as f64 / total_invoices as f64
        },
        period_revenue,
        unshipped_revenue,
        unshipped_pct: if period_revenue == 0.0 {
            0.0
        } else {
            unshipped_revenue / period_revenue
        },
    }
}

/// Invoiced-not-shipped rows, enriched with customer / territory names and
/// payment status, ordered by invoice date then ID.
fn cutoff_exceptions(dataset: &Dataset, rows: &[ThreeWayRow]) -> Vec<CutoffException> {
    let customers = dataset.customer_names();
    let territories = dataset.territory_names();
    let payment: BTreeMap<i64, crate::model::PaymentStatus> = dataset
        .invoices
        .iter()
        .map(|inv| (inv.invoice_id, inv.payment_status()))
        .collect();

    let mut exceptions: Vec<CutoffException> = rows
        .iter()
        .filter(|r| r.has_order && !r.has_shipment)
        .map(|r| CutoffException {
            invoice_id: r.invoice_id,
            sales_order_id: r.sales_order_id,
            invoice_date: r.invoice_date,
            customer: r
                .cust_id
                .and_then(|id| customers.get(&id).map(|n| n.to_string())),
            territory: r
                .territory_id
                .and_then(|id| territories.get(&id).map(|n| n.to_string())),
            amount: r.amount.unwrap_or(0.0),
            payment_status: payment
                .get(&r.invoice_id)
                .copied()
                .unwrap_or(crate::model::PaymentStatus::Unpaid),
        })
        .collect();

    exceptions.sort_by_key(|e| (e.invoice_date, e.invoice_id));
    exceptions
}

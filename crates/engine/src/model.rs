use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Input records
// ---------------------------------------------------------------------------

/// A customer invoice row from the engagement extract.
///
/// `paid_date` is `None` for open invoices; the loader strips the year-9999
/// "unpaid" sentinel before any date arithmetic happens.
#[derive(Debug, Clone)]
pub struct InvoiceRecord {
    pub invoice_id: i64,
    pub cust_id: Option<i64>,
    pub invoice_date: Option<NaiveDate>,
    pub paid_date: Option<NaiveDate>,
    pub sales_order_id: Option<i64>,
}

impl InvoiceRecord {
    pub fn is_paid(&self) -> bool {
        self.paid_date.is_some()
    }

    pub fn payment_status(&self) -> PaymentStatus {
        if self.is_paid() {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Unpaid
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Paid,
    Unpaid,
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paid => write!(f, "paid"),
            Self::Unpaid => write!(f, "unpaid"),
        }
    }
}

/// A sales order row. Order-side `cust_id` is authoritative when an invoice
/// disagrees (the invoice copy is dropped before the three-way merge).
#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub sales_order_id: i64,
    pub cust_id: Option<i64>,
    pub territory_id: Option<i64>,
    pub prod_id: Option<i64>,
    pub sub_total: Option<f64>,
    pub total_due: Option<f64>,
    pub ship_id: Option<i64>,
    pub invoice_id: Option<i64>,
    pub order_date: Option<NaiveDate>,
    /// Credit-approval marker carried through from the extract; `None` means
    /// the order went out without credit approval on file.
    pub credit_approval: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ShipmentRecord {
    pub ship_id: i64,
    pub sales_order_id: Option<i64>,
    pub ship_date: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct CustomerRecord {
    pub cust_id: i64,
    pub cust_name: Option<String>,
    pub territory_id: Option<i64>,
    pub credit_limit: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ProductRecord {
    pub prod_id: i64,
    pub prod_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TerritoryRecord {
    pub territory_id: i64,
    pub territory_name: Option<String>,
}

/// Pre-loaded engagement tables. Column coercion happens in the loader; the
/// engine only ever sees typed records.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub invoices: Vec<InvoiceRecord>,
    pub orders: Vec<OrderRecord>,
    pub shipments: Vec<ShipmentRecord>,
    pub customers: Vec<CustomerRecord>,
    pub products: Vec<ProductRecord>,
    pub territories: Vec<TerritoryRecord>,
}

impl Dataset {
    /// Customer-name lookup keyed by CustID. Misses are display-only, never fatal.
    pub fn customer_names(&self) -> BTreeMap<i64, &str> {
        self.customers
            .iter()
            .filter_map(|c| c.cust_name.as_deref().map(|n| (c.cust_id, n)))
            .collect()
    }

    /// Territory-name lookup keyed by TerritoryID.
    pub fn territory_names(&self) -> BTreeMap<i64, &str> {
        self.territories
            .iter()
            .filter_map(|t| t.territory_name.as_deref().map(|n| (t.territory_id, n)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Aging buckets
// ---------------------------------------------------------------------------

/// Days-past-due bucket. Boundary values 30/60/90 land in the lower bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum AgingBucket {
    #[serde(rename = "0-30")]
    Current,
    #[serde(rename = "31-60")]
    Days31To60,
    #[serde(rename = "61-90")]
    Days61To90,
    #[serde(rename = "90+")]
    Over90,
}

impl AgingBucket {
    pub const ALL: [AgingBucket; 4] = [
        Self::Current,
        Self::Days31To60,
        Self::Days61To90,
        Self::Over90,
    ];

    /// Total and deterministic over all of `i64`. Negative days fall into
    /// "0-30"; callers wanting to exclude future-dated rows filter first
    /// (see `NegativeDaysPolicy`).
    pub fn for_days(days: i64) -> Self {
        if days <= 30 {
            Self::Current
        } else if days <= 60 {
            Self::Days31To60
        } else if days <= 90 {
            Self::Days61To90
        } else {
            Self::Over90
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Current => "0-30",
            Self::Days31To60 => "31-60",
            Self::Days61To90 => "61-90",
            Self::Over90 => "90+",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "0-30" => Some(Self::Current),
            "31-60" => Some(Self::Days31To60),
            "61-90" => Some(Self::Days61To90),
            "90+" => Some(Self::Over90),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgingBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ---------------------------------------------------------------------------
// Join diagnostics
// ---------------------------------------------------------------------------

/// Side-channel diagnostics produced by every merge. Never embedded in data
/// rows; always returned alongside them.
#[derive(Debug, Clone, Serialize)]
pub struct MatchDiagnostics {
    pub success: bool,
    pub merge_rate: f64,
    pub left_matched: usize,
    pub right_matched: usize,
    pub left_unmatched: usize,
    pub right_unmatched: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Aging report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct AgingDetailRow {
    pub invoice_id: i64,
    pub cust_id: i64,
    pub invoice_date: NaiveDate,
    pub total_due: f64,
    pub days_past_due: i64,
    pub bucket: AgingBucket,
}

/// One row per customer, one column per bucket, zero-filled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgingSummaryRow {
    pub cust_id: i64,
    #[serde(rename = "0-30")]
    pub current: f64,
    #[serde(rename = "31-60")]
    pub days_31_60: f64,
    #[serde(rename = "61-90")]
    pub days_61_90: f64,
    #[serde(rename = "90+")]
    pub over_90: f64,
    pub total: f64,
}

impl AgingSummaryRow {
    pub fn amount(&self, bucket: AgingBucket) -> f64 {
        match bucket {
            AgingBucket::Current => self.current,
            AgingBucket::Days31To60 => self.days_31_60,
            AgingBucket::Days61To90 => self.days_61_90,
            AgingBucket::Over90 => self.over_90,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomerBalance {
    pub cust_id: i64,
    pub total_due: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgingMetadata {
    pub as_of_date: NaiveDate,
    pub total_invoices: usize,
    pub total_customers: usize,
    pub elapsed_ms: u128,
}

/// Immutable result of one aging run. Replaced wholesale per run and threaded
/// explicitly into allowance assessment / comparison — no hidden engine state.
#[derive(Debug, Clone, Serialize)]
pub struct AgingReport {
    pub detailed: Vec<AgingDetailRow>,
    pub summary: Vec<AgingSummaryRow>,
    pub over_90: Vec<CustomerBalance>,
    pub metadata: AgingMetadata,
    /// Diagnostics for the invoice → order amount join.
    pub order_join: MatchDiagnostics,
    /// Data-quality observations (dropped rows, range filter, validation).
    pub notes: Vec<String>,
}

impl AgingReport {
    /// Explicit empty marker: distinguishable from "not yet computed".
    pub fn is_empty(&self) -> bool {
        self.detailed.is_empty() && self.summary.is_empty()
    }

    /// Sum of one bucket column across all customers.
    pub fn bucket_total(&self, bucket: AgingBucket) -> f64 {
        self.summary.iter().map(|row| row.amount(bucket)).sum()
    }

    /// Sum of the per-customer `Total` column.
    pub fn summary_total(&self) -> f64 {
        self.summary.iter().map(|row| row.total).sum()
    }

    /// Sum of `TotalDue` over the detailed rows.
    pub fn detailed_total(&self) -> f64 {
        self.detailed.iter().map(|row| row.total_due).sum()
    }
}

// ---------------------------------------------------------------------------
// Three-way match
// ---------------------------------------------------------------------------

/// Terminal exception classes for an incomplete three-way match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchException {
    /// The invoice's order join failed.
    NoOrder,
    /// Order found but no shipment evidence, the audit-critical cutoff case.
    InvoicedNotShipped,
    /// Any other incomplete combination (unexpected under normal schema).
    Other,
}

impl std::fmt::Display for MatchException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoOrder => write!(f, "no_order"),
            Self::InvoicedNotShipped => write!(f, "invoiced_not_shipped"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// One classified invoice in the three-way match pass.
#[derive(Debug, Clone, Serialize)]
pub struct ThreeWayRow {
    pub invoice_id: i64,
    pub sales_order_id: Option<i64>,
    pub cust_id: Option<i64>,
    pub territory_id: Option<i64>,
    pub invoice_date: Option<NaiveDate>,
    pub amount: Option<f64>,
    pub has_order: bool,
    pub has_shipment: bool,
}

impl ThreeWayRow {
    pub fn complete_match(&self) -> bool {
        self.has_order && self.has_shipment
    }

    pub fn exception(&self) -> Option<MatchException> {
        match (self.has_order, self.has_shipment) {
            (true, true) => None,
            (false, _) => Some(MatchException::NoOrder),
            (true, false) => Some(MatchException::InvoicedNotShipped),
        }
    }
}

/// Invoiced-not-shipped detail with display fields resolved null-safe.
#[derive(Debug, Clone, Serialize)]
pub struct CutoffException {
    pub invoice_id: i64,
    pub sales_order_id: Option<i64>,
    pub invoice_date: Option<NaiveDate>,
    pub customer: Option<String>,
    pub territory: Option<String>,
    pub amount: f64,
    pub payment_status: PaymentStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreeWaySummary {
    pub total_invoices: usize,
    pub complete_matches: usize,
    pub exceptions: usize,
    /// complete_matches / total_invoices.
    pub match_rate: f64,
    pub period_revenue: f64,
    pub unshipped_revenue: f64,
    /// unshipped_revenue as a percentage of period_revenue.
    pub unshipped_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreeWayReport {
    pub year: i32,
    pub summary: ThreeWaySummary,
    pub rows: Vec<ThreeWayRow>,
    /// Invoiced-not-shipped exceptions, ordered by invoice date.
    pub cutoff_exceptions: Vec<CutoffException>,
    pub order_join: MatchDiagnostics,
    pub shipment_join: MatchDiagnostics,
}

// ---------------------------------------------------------------------------
// Client comparison
// ---------------------------------------------------------------------------

/// One standardized client aging row after column-synonym resolution.
#[derive(Debug, Clone)]
pub struct ClientAgingRow {
    pub cust_id: i64,
    pub amounts: BTreeMap<AgingBucket, f64>,
    pub total_due: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomerDifference {
    pub cust_id: i64,
    pub our_amount: f64,
    pub client_amount: f64,
    pub difference: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BucketComparison {
    pub bucket: AgingBucket,
    pub our_total: f64,
    pub client_total: f64,
    pub difference: f64,
    /// |difference| / client_total, 0 when the client total is 0.
    pub difference_pct: f64,
    pub within_tolerance: bool,
    pub customer_differences: Vec<CustomerDifference>,
    pub agrees: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonMetrics {
    pub buckets_compared: usize,
    pub agreed_buckets: usize,
    pub buckets_within_tolerance: usize,
    pub total_our_amount: f64,
    pub total_client_amount: f64,
    pub total_difference: f64,
    pub overall_difference_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    pub agrees: bool,
    pub buckets: Vec<BucketComparison>,
    pub metrics: ComparisonMetrics,
    pub recommendations: Vec<String>,
}

// ---------------------------------------------------------------------------
// Allowance assessment
// ---------------------------------------------------------------------------

/// Ordered by severity so two triggers combine by taking the max.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowanceVerdict {
    Reasonable,
    RequiresReview,
    Questionable,
}

impl std::fmt::Display for AllowanceVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reasonable => write!(f, "reasonable"),
            Self::RequiresReview => write!(f, "requires_review"),
            Self::Questionable => write!(f, "questionable"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BucketAllowance {
    pub bucket: AgingBucket,
    pub amount: f64,
    pub percentage: f64,
    pub allowance: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Assessment {
    pub client_allowance: f64,
    pub recommended_allowance: f64,
    /// client_allowance − recommended_allowance.
    pub difference: f64,
    pub verdict: AllowanceVerdict,
    pub bucket_breakdown: Vec<BucketAllowance>,
    pub factors: Vec<String>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Informational audit of the engine's own output. Never an error path.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub checks: BTreeMap<String, bool>,
    pub recommendations: Vec<String>,
}

/// One reconciliation check against a configured engagement expectation.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub expected: f64,
    pub actual: f64,
    pub difference_pct: f64,
    pub within_tolerance: bool,
}

// ---------------------------------------------------------------------------
// Credit analysis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Credit-approved sale with no credit limit on file.
    MissingLimit,
    /// Credit-approved sale against a zero credit limit.
    ZeroLimit,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreditViolation {
    pub sales_order_id: i64,
    pub cust_id: Option<i64>,
    pub territory_id: Option<i64>,
    pub prod_id: Option<i64>,
    pub amount: Option<f64>,
    pub kind: ViolationKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskGrade {
    Low,
    Moderate,
    High,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreditReport {
    pub violations: Vec<CreditViolation>,
    pub by_territory: BTreeMap<i64, usize>,
    pub by_product: BTreeMap<i64, usize>,
    pub limit_join: MatchDiagnostics,
    pub notes: Vec<String>,
}

/// Which path produced customer balances. The fallback is named, never silent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceSource {
    /// Amounts backfilled from the sales-order join.
    OrderAmounts,
    /// Join quality too poor; invoice counts only, balances zeroed.
    CountOnly,
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceRow {
    pub cust_id: i64,
    pub invoice_count: usize,
    pub total_balance: f64,
    pub credit_limit: f64,
    pub utilization: f64,
    pub exceeds_limit: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceReport {
    pub rows: Vec<BalanceRow>,
    pub source: BalanceSource,
    pub risk: RiskGrade,
    pub amount_join: MatchDiagnostics,
    pub limit_join: MatchDiagnostics,
    pub notes: Vec<String>,
}

// ---------------------------------------------------------------------------
// Engagement report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ReportMeta {
    pub config_name: String,
    pub engine_version: String,
    pub run_at: String,
    pub as_of_date: NaiveDate,
    pub analysis_year: i32,
}

/// The assembled result of one engagement run, serializable as JSON for the
/// reporting layer.
#[derive(Debug, Clone, Serialize)]
pub struct EngagementReport {
    pub meta: ReportMeta,
    pub aging: AgingReport,
    pub three_way: ThreeWayReport,
    pub credit: CreditReport,
    pub balances: BalanceReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<Comparison>,
    pub allowance: Assessment,
    pub validation: ValidationReport,
    pub reconciliation_checks: Vec<CheckResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_boundaries_assigned_to_lower_bucket() {
        assert_eq!(AgingBucket::for_days(30), AgingBucket::Current);
        assert_eq!(AgingBucket::for_days(31), AgingBucket::Days31To60);
        assert_eq!(AgingBucket::for_days(60), AgingBucket::Days31To60);
        assert_eq!(AgingBucket::for_days(61), AgingBucket::Days61To90);
        assert_eq!(AgingBucket::for_days(90), AgingBucket::Days61To90);
        assert_eq!(AgingBucket::for_days(91), AgingBucket::Over90);
    }

    #[test]
    fn bucket_assignment_is_total_over_retained_range() {
        for days in -30..=365 {
            // Must not panic and must round-trip through the label.
            let bucket = AgingBucket::for_days(days);
            assert_eq!(AgingBucket::from_label(bucket.label()), Some(bucket));
        }
    }

    #[test]
    fn negative_days_bucket_as_current() {
        assert_eq!(AgingBucket::for_days(-30), AgingBucket::Current);
        assert_eq!(AgingBucket::for_days(-1), AgingBucket::Current);
    }

    #[test]
    fn unpaid_sentinel_already_stripped_by_loader() {
        let open = InvoiceRecord {
            invoice_id: 1,
            cust_id: Some(10),
            invoice_date: None,
            paid_date: None,
            sales_order_id: None,
        };
        assert!(!open.is_paid());
        assert_eq!(open.payment_status(), PaymentStatus::Unpaid);
    }

    #[test]
    fn verdict_severity_ordering() {
        assert!(AllowanceVerdict::Questionable > AllowanceVerdict::RequiresReview);
        assert!(AllowanceVerdict::RequiresReview > AllowanceVerdict::Reasonable);
    }
}

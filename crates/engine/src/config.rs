use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::model::AgingBucket;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AnalysisConfig {
    pub name: String,
    /// Aging cutoff. Defaults to the engagement's fiscal year-end.
    #[serde(default = "default_as_of_date")]
    pub as_of_date: NaiveDate,
    /// Calendar year restricting the three-way match population.
    #[serde(default = "default_analysis_year")]
    pub analysis_year: i32,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub tolerance: ToleranceConfig,
    #[serde(default)]
    pub allowance: AllowanceConfig,
    #[serde(default)]
    pub comparison: ComparisonConfig,
    /// How future-dated (negative days-past-due) invoices age.
    #[serde(default)]
    pub negative_days: NegativeDaysPolicy,
    #[serde(default)]
    pub expected: ExpectedTotals,
    #[serde(default)]
    pub output: OutputConfig,
}

fn default_as_of_date() -> NaiveDate {
    // 12/31 of the engagement year under audit.
    NaiveDate::from_ymd_opt(2017, 12, 31).expect("static date")
}

fn default_analysis_year() -> i32 {
    2017
}

// ---------------------------------------------------------------------------
// Data files
// ---------------------------------------------------------------------------

/// Where the Table Provider finds the six engagement extracts. Column names
/// inside the files are bit-exact contracts; only the file names move.
#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub dir: String,
    #[serde(default = "default_sales_orders")]
    pub sales_orders: String,
    #[serde(default = "default_shipments")]
    pub shipments: String,
    #[serde(default = "default_customer_invoices")]
    pub customer_invoices: String,
    #[serde(default = "default_customer_master")]
    pub customer_master: String,
    #[serde(default = "default_products")]
    pub products: String,
    #[serde(default = "default_sales_territory")]
    pub sales_territory: String,
    /// Optional client-provided aging table for the comparison step.
    #[serde(default)]
    pub client_aging: Option<String>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
            sales_orders: default_sales_orders(),
            shipments: default_shipments(),
            customer_invoices: default_customer_invoices(),
            customer_master: default_customer_master(),
            products: default_products(),
            sales_territory: default_sales_territory(),
            client_aging: None,
        }
    }
}

fn default_data_dir() -> String {
    "data".into()
}
fn default_sales_orders() -> String {
    "sales_orders.csv".into()
}
fn default_shipments() -> String {
    "shipments.csv".into()
}
fn default_customer_invoices() -> String {
    "customer_invoices.csv".into()
}
fn default_customer_master() -> String {
    "customer_master.csv".into()
}
fn default_products() -> String {
    "products.csv".into()
}
fn default_sales_territory() -> String {
    "sales_territory.csv".into()
}

// ---------------------------------------------------------------------------
// Tolerances + thresholds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ToleranceConfig {
    /// Relative tolerance for client-comparison bucket totals.
    #[serde(default = "default_comparison_tolerance")]
    pub comparison: f64,
    /// Minimum acceptable merge rate for standard joins.
    #[serde(default = "default_merge_threshold")]
    pub merge_threshold: f64,
    /// Lowered threshold for the known-lossy invoice → order amount join.
    #[serde(default = "default_lossy_merge_threshold")]
    pub lossy_merge_threshold: f64,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            comparison: default_comparison_tolerance(),
            merge_threshold: default_merge_threshold(),
            lossy_merge_threshold: default_lossy_merge_threshold(),
        }
    }
}

fn default_comparison_tolerance() -> f64 {
    0.01
}
fn default_merge_threshold() -> f64 {
    0.8
}
fn default_lossy_merge_threshold() -> f64 {
    0.7
}

// ---------------------------------------------------------------------------
// Allowance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AllowanceConfig {
    /// The client's reported allowance for doubtful accounts.
    #[serde(default = "default_client_allowance")]
    pub client_allowance: f64,
    /// Buckets contributing to the recommended allowance.
    #[serde(default = "default_allowance_buckets")]
    pub buckets: Vec<String>,
    /// Loss percentage assumed per bucket; missing buckets contribute 0.
    #[serde(default = "default_allowance_percentages")]
    pub percentages: BTreeMap<String, f64>,
}

impl Default for AllowanceConfig {
    fn default() -> Self {
        Self {
            client_allowance: default_client_allowance(),
            buckets: default_allowance_buckets(),
            percentages: default_allowance_percentages(),
        }
    }
}

impl AllowanceConfig {
    /// Resolve configured labels into typed buckets with their percentages.
    pub fn bucket_percentages(&self) -> Result<Vec<(AgingBucket, f64)>, EngineError> {
        self.buckets
            .iter()
            .map(|label| {
                let bucket = AgingBucket::from_label(label)
                    .ok_or_else(|| EngineError::UnknownBucket(label.clone()))?;
                let pct = self.percentages.get(label).copied().unwrap_or(0.0);
                Ok((bucket, pct))
            })
            .collect()
    }
}

fn default_client_allowance() -> f64 {
    315_000.0
}

fn default_allowance_buckets() -> Vec<String> {
    vec!["61-90".into(), "90+".into()]
}

fn default_allowance_percentages() -> BTreeMap<String, f64> {
    BTreeMap::from([("61-90".to_string(), 0.25), ("90+".to_string(), 0.75)])
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ComparisonConfig {
    /// Buckets compared against the client aging table.
    #[serde(default = "default_comparison_buckets")]
    pub buckets: Vec<String>,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            buckets: default_comparison_buckets(),
        }
    }
}

impl ComparisonConfig {
    pub fn typed_buckets(&self) -> Result<Vec<AgingBucket>, EngineError> {
        self.buckets
            .iter()
            .map(|label| {
                AgingBucket::from_label(label)
                    .ok_or_else(|| EngineError::UnknownBucket(label.clone()))
            })
            .collect()
    }
}

fn default_comparison_buckets() -> Vec<String> {
    vec!["90+".into()]
}

// ---------------------------------------------------------------------------
// Negative days policy
// ---------------------------------------------------------------------------

/// What to do with future-dated invoices (days past due < 0) that survive
/// the [-30, 365] retention filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NegativeDaysPolicy {
    /// Age them into "0-30"; future-dated invoices are not penalized.
    BucketAsCurrent,
    /// Drop them from the aging population entirely.
    Exclude,
}

impl Default for NegativeDaysPolicy {
    fn default() -> Self {
        Self::BucketAsCurrent
    }
}

// ---------------------------------------------------------------------------
// Expected engagement totals
// ---------------------------------------------------------------------------

/// Engagement figures to reconcile computed totals against. These belong to
/// one specific engagement, so they are inputs, never engine constants.
#[derive(Debug, Clone, Deserialize)]
pub struct ExpectedTotals {
    #[serde(default)]
    pub period_revenue: Option<f64>,
    #[serde(default)]
    pub receivables_total: Option<f64>,
    /// Relative tolerance for the reconciliation checks.
    #[serde(default = "default_expected_tolerance")]
    pub tolerance_pct: f64,
}

impl Default for ExpectedTotals {
    fn default() -> Self {
        Self {
            period_revenue: None,
            receivables_total: None,
            tolerance_pct: default_expected_tolerance(),
        }
    }
}

fn default_expected_tolerance() -> f64 {
    0.01
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub json: Option<String>,
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl AnalysisConfig {
    pub fn from_toml(input: &str) -> Result<Self, EngineError> {
        let config: AnalysisConfig =
            toml::from_str(input).map_err(|e| EngineError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !(1900..=2100).contains(&self.analysis_year) {
            return Err(EngineError::ConfigValidation(format!(
                "analysis_year out of range: {}",
                self.analysis_year
            )));
        }
        if self.as_of_date.year() < self.analysis_year {
            return Err(EngineError::ConfigValidation(format!(
                "as_of_date {} predates analysis_year {}",
                self.as_of_date, self.analysis_year
            )));
        }

        for (name, value) in [
            ("tolerance.comparison", self.tolerance.comparison),
            ("tolerance.merge_threshold", self.tolerance.merge_threshold),
            (
                "tolerance.lossy_merge_threshold",
                self.tolerance.lossy_merge_threshold,
            ),
            ("expected.tolerance_pct", self.expected.tolerance_pct),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::ConfigValidation(format!(
                    "{name} must be in [0, 1], got {value}"
                )));
            }
        }

        if self.allowance.client_allowance < 0.0 {
            return Err(EngineError::ConfigValidation(
                "allowance.client_allowance must be >= 0".into(),
            ));
        }
        for (label, pct) in &self.allowance.percentages {
            if !(0.0..=1.0).contains(pct) {
                return Err(EngineError::ConfigValidation(format!(
                    "allowance percentage for '{label}' must be in [0, 1], got {pct}"
                )));
            }
        }

        // Bucket labels must resolve to the four known buckets.
        self.allowance.bucket_percentages()?;
        self.comparison.typed_buckets()?;

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = AnalysisConfig::from_toml(r#"name = "UMD FY2017""#).unwrap();
        assert_eq!(config.name, "UMD FY2017");
        assert_eq!(config.analysis_year, 2017);
        assert_eq!(
            config.as_of_date,
            NaiveDate::from_ymd_opt(2017, 12, 31).unwrap()
        );
        assert_eq!(config.tolerance.comparison, 0.01);
        assert_eq!(config.tolerance.merge_threshold, 0.8);
        assert_eq!(config.tolerance.lossy_merge_threshold, 0.7);
        assert_eq!(config.allowance.client_allowance, 315_000.0);
        assert_eq!(config.negative_days, NegativeDaysPolicy::BucketAsCurrent);
        assert_eq!(config.comparison.buckets, vec!["90+"]);
        assert!(config.data.client_aging.is_none());
    }

    #[test]
    fn default_allowance_percentages_resolve() {
        let config = AnalysisConfig::from_toml(r#"name = "t""#).unwrap();
        let pcts = config.allowance.bucket_percentages().unwrap();
        assert_eq!(
            pcts,
            vec![
                (AgingBucket::Days61To90, 0.25),
                (AgingBucket::Over90, 0.75),
            ]
        );
    }

    #[test]
    fn full_config_parses() {
        let input = r#"
name = "UMD FY2017"
as_of_date = "2017-12-31"
analysis_year = 2017
negative_days = "exclude"

[data]
dir = "extracts"
client_aging = "client_aging.csv"

[tolerance]
comparison = 0.02
merge_threshold = 0.75

[allowance]
client_allowance = 315000.0
buckets = ["61-90", "90+"]

[allowance.percentages]
"61-90" = 0.30
"90+" = 0.80

[comparison]
buckets = ["61-90", "90+"]

[expected]
period_revenue = 24000000.0
tolerance_pct = 0.02

[output]
json = "report.json"
"#;
        let config = AnalysisConfig::from_toml(input).unwrap();
        assert_eq!(config.negative_days, NegativeDaysPolicy::Exclude);
        assert_eq!(config.data.dir, "extracts");
        assert_eq!(config.data.client_aging.as_deref(), Some("client_aging.csv"));
        assert_eq!(config.tolerance.comparison, 0.02);
        let pcts = config.allowance.bucket_percentages().unwrap();
        assert_eq!(pcts[0], (AgingBucket::Days61To90, 0.30));
        assert_eq!(config.expected.period_revenue, Some(24_000_000.0));
        assert_eq!(config.output.json.as_deref(), Some("report.json"));
    }

    #[test]
    fn reject_unknown_bucket_label() {
        let input = r#"
name = "bad"

[comparison]
buckets = ["91+"]
"#;
        let err = AnalysisConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("91+"));
    }

    #[test]
    fn reject_threshold_out_of_range() {
        let input = r#"
name = "bad"

[tolerance]
merge_threshold = 1.5
"#;
        let err = AnalysisConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("merge_threshold"));
    }

    #[test]
    fn reject_as_of_before_analysis_year() {
        let input = r#"
name = "bad"
as_of_date = "2016-12-31"
analysis_year = 2017
"#;
        assert!(AnalysisConfig::from_toml(input).is_err());
    }
}

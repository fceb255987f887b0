// Auditgrid CLI - receivables audit runs over CSV extracts

mod exit_codes;

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use auditgrid_engine::{
    aging, compare, config::AnalysisConfig, credit, model, three_way, validate, EngagementReport,
};

use exit_codes::{
    load_exit_code, EXIT_CUTOFF_EXCEPTIONS, EXIT_ERROR, EXIT_RECONCILIATION, EXIT_SUCCESS,
    EXIT_USAGE, EXIT_VALIDATION_FAILED,
};

#[derive(Parser)]
#[command(name = "agrid")]
#[command(about = "Receivables audit analysis over engagement CSV extracts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full engagement analysis
    #[command(after_help = "\
Examples:
  agrid run audit.toml
  agrid run audit.toml --json > report.json
  agrid run audit.toml --data-dir extracts/ --as-of 2017-12-31
  agrid run audit.toml --output report.json --quiet

Exit codes 3-5 report audit findings, not failures.")]
    Run {
        /// Engagement config (TOML)
        config: PathBuf,

        /// Override the data directory from the config
        #[arg(long)]
        data_dir: Option<String>,

        /// Override the aging as-of date (YYYY-MM-DD)
        #[arg(long)]
        as_of: Option<NaiveDate>,

        /// Override the analysis year
        #[arg(long)]
        year: Option<i32>,

        /// Print the full report as JSON on stdout
        #[arg(long)]
        json: bool,

        /// Write the full report as JSON to a file
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Suppress the human-readable summary on stderr
        #[arg(long, short = 'q')]
        quiet: bool,
    },

    /// Parse and validate an engagement config without running
    Validate {
        /// Engagement config (TOML)
        config: PathBuf,

        /// Print the resolved settings as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run {
            config,
            data_dir,
            as_of,
            year,
            json,
            output,
            quiet,
        } => cmd_run(config, data_dir, as_of, year, json, output, quiet),
        Commands::Validate { config, json } => cmd_validate(config, json),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn usage(msg: impl Into<String>) -> Self {
        Self {
            code: EXIT_USAGE,
            message: msg.into(),
            hint: None,
        }
    }

    pub fn general(msg: impl Into<String>) -> Self {
        Self {
            code: EXIT_ERROR,
            message: msg.into(),
            hint: None,
        }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<auditgrid_io::IoError> for CliError {
    fn from(err: auditgrid_io::IoError) -> Self {
        let hint = match &err {
            auditgrid_io::IoError::UnsupportedFormat(_) => {
                Some("re-export the extract as CSV".to_string())
            }
            auditgrid_io::IoError::MissingColumn { .. } => {
                Some("column names are case-sensitive and must match the extract contract".to_string())
            }
            _ => None,
        };
        Self {
            code: load_exit_code(&err),
            message: err.to_string(),
            hint,
        }
    }
}

impl From<auditgrid_engine::EngineError> for CliError {
    fn from(err: auditgrid_engine::EngineError) -> Self {
        use auditgrid_engine::EngineError;
        let code = match err {
            EngineError::ConfigParse(_) | EngineError::ConfigValidation(_)
            | EngineError::UnknownBucket(_) => EXIT_USAGE,
            _ => EXIT_ERROR,
        };
        Self {
            code,
            message: err.to_string(),
            hint: None,
        }
    }
}

// ============================================================================
// run
// ============================================================================

#[allow(clippy::too_many_arguments)]
fn cmd_run(
    config_path: PathBuf,
    data_dir: Option<String>,
    as_of: Option<NaiveDate>,
    year: Option<i32>,
    json: bool,
    output: Option<PathBuf>,
    quiet: bool,
) -> Result<u8, CliError> {
    let mut config = read_config(&config_path)?;
    if let Some(dir) = data_dir {
        config.data.dir = dir;
    }
    if let Some(as_of) = as_of {
        config.as_of_date = as_of;
    }
    if let Some(year) = year {
        config.analysis_year = year;
    }
    config.validate()?;

    let dataset = auditgrid_io::load_dataset(&config.data)?;

    let aging_report = aging::perform_aging(
        &dataset,
        config.as_of_date,
        config.negative_days,
        config.tolerance.lossy_merge_threshold,
        true,
    )?;
    let validation = validate::validate_aging(&aging_report);

    let three_way_report = three_way::perform_three_way_match(
        &dataset,
        config.analysis_year,
        config.tolerance.merge_threshold,
    )?;

    let credit_report = credit::analyze_credit_limits(&dataset, config.tolerance.merge_threshold)?;
    let balances = credit::analyze_balances(
        &dataset,
        config.tolerance.lossy_merge_threshold,
        config.tolerance.merge_threshold,
    )?;

    // A broken client file degrades to a recommendation; the engagement run
    // itself keeps going.
    let comparison = match &config.data.client_aging {
        Some(file) => {
            let path = std::path::Path::new(&config.data.dir).join(file);
            let result = auditgrid_io::load_client_aging(&path)
                .map_err(|e| e.to_string())
                .and_then(|raw| {
                    compare::standardize_client_rows(&raw).map_err(|e| e.to_string())
                });
            Some(match result {
                Ok(client_rows) => compare::compare_with_client(
                    &aging_report.summary,
                    &client_rows,
                    &config.comparison.typed_buckets()?,
                    config.tolerance.comparison,
                ),
                Err(reason) => {
                    log::warn!("client aging unusable: {reason}");
                    compare::comparison_unavailable(&reason)
                }
            })
        }
        None => None,
    };

    let allowance = aging::assess_allowance(
        &aging_report,
        config.allowance.client_allowance,
        &config.allowance.bucket_percentages()?,
        comparison.as_ref(),
    );

    let reconciliation =
        validate::reconciliation_checks(&config.expected, &three_way_report.summary, &aging_report);

    let report = EngagementReport {
        meta: model::ReportMeta {
            config_name: config.name.clone(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
            as_of_date: config.as_of_date,
            analysis_year: config.analysis_year,
        },
        aging: aging_report,
        three_way: three_way_report,
        credit: credit_report,
        balances,
        comparison,
        allowance,
        validation,
        reconciliation_checks: reconciliation,
    };

    if !quiet {
        print_summary(&report);
    }

    let serialized = serde_json::to_string_pretty(&report)
        .map_err(|e| CliError::general(format!("failed to serialize report: {e}")))?;
    let output = output.or_else(|| config.output.json.as_ref().map(PathBuf::from));
    if let Some(path) = &output {
        std::fs::write(path, &serialized)
            .map_err(|e| CliError::general(format!("failed to write {}: {e}", path.display())))?;
        if !quiet {
            eprintln!("report written to {}", path.display());
        }
    }
    if json {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        writeln!(handle, "{serialized}")
            .map_err(|e| CliError::general(format!("failed to write report: {e}")))?;
    }

    Ok(findings_exit_code(&report))
}

/// The most serious finding wins the exit code. A report that cannot pass its
/// own validation outranks everything else.
fn findings_exit_code(report: &EngagementReport) -> u8 {
    if !report.validation.is_valid {
        return EXIT_VALIDATION_FAILED;
    }
    if !report.three_way.cutoff_exceptions.is_empty() {
        return EXIT_CUTOFF_EXCEPTIONS;
    }
    if report
        .reconciliation_checks
        .iter()
        .any(|c| !c.within_tolerance)
    {
        return EXIT_RECONCILIATION;
    }
    EXIT_SUCCESS
}

fn print_summary(report: &EngagementReport) {
    let aging = &report.aging;
    let three_way = &report.three_way;

    eprintln!("== {} ==", report.meta.config_name);
    eprintln!(
        "aging as of {}: {} invoices, {} customers, ${:.2} outstanding",
        aging.metadata.as_of_date,
        aging.metadata.total_invoices,
        aging.metadata.total_customers,
        aging.summary_total()
    );
    for bucket in model::AgingBucket::ALL {
        eprintln!("  {:>5}: ${:.2}", bucket.label(), aging.bucket_total(bucket));
    }
    for note in &aging.notes {
        eprintln!("  note: {note}");
    }

    eprintln!(
        "three-way match {}: {}/{} complete ({:.1}%), ${:.2} invoiced without shipment ({:.2}% of revenue)",
        three_way.year,
        three_way.summary.complete_matches,
        three_way.summary.total_invoices,
        three_way.summary.match_rate * 100.0,
        three_way.summary.unshipped_revenue,
        three_way.summary.unshipped_pct * 100.0
    );
    for exception in &three_way.cutoff_exceptions {
        eprintln!(
            "  cutoff: invoice {} ({}) {} / {} ${:.2} [{}]",
            exception.invoice_id,
            exception
                .invoice_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "undated".to_string()),
            exception.customer.as_deref().unwrap_or("unknown customer"),
            exception.territory.as_deref().unwrap_or("unknown territory"),
            exception.amount,
            exception.payment_status
        );
    }

    eprintln!(
        "credit: {} violations; balances: {} customers, risk {:?} (source: {:?})",
        report.credit.violations.len(),
        report.balances.rows.len(),
        report.balances.risk,
        report.balances.source
    );

    if let Some(comparison) = &report.comparison {
        eprintln!(
            "client comparison: {} ({} of {} buckets agree)",
            if comparison.agrees { "agrees" } else { "DISAGREES" },
            comparison.metrics.agreed_buckets,
            comparison.metrics.buckets_compared
        );
        for recommendation in &comparison.recommendations {
            eprintln!("  {recommendation}");
        }
    }

    eprintln!(
        "allowance: client ${:.2} vs recommended ${:.2} -> {}",
        report.allowance.client_allowance,
        report.allowance.recommended_allowance,
        report.allowance.verdict
    );

    eprintln!(
        "self-validation: {}",
        if report.validation.is_valid { "passed" } else { "FAILED" }
    );
    for check in &report.reconciliation_checks {
        eprintln!(
            "  reconciliation {}: expected ${:.2}, actual ${:.2} ({})",
            check.name,
            check.expected,
            check.actual,
            if check.within_tolerance { "ok" } else { "OUT OF TOLERANCE" }
        );
    }
}

// ============================================================================
// validate
// ============================================================================

fn cmd_validate(config_path: PathBuf, json: bool) -> Result<u8, CliError> {
    let config = read_config(&config_path)?;

    if json {
        let resolved = serde_json::json!({
            "name": config.name,
            "as_of_date": config.as_of_date.to_string(),
            "analysis_year": config.analysis_year,
            "data_dir": config.data.dir,
            "client_aging": config.data.client_aging,
            "merge_threshold": config.tolerance.merge_threshold,
            "lossy_merge_threshold": config.tolerance.lossy_merge_threshold,
            "comparison_tolerance": config.tolerance.comparison,
            "client_allowance": config.allowance.client_allowance,
        });
        println!("{}", serde_json::to_string_pretty(&resolved).map_err(|e| {
            CliError::general(format!("failed to serialize settings: {e}"))
        })?);
    } else {
        eprintln!(
            "{}: valid (as of {}, year {}, data dir {})",
            config.name, config.as_of_date, config.analysis_year, config.data.dir
        );
    }
    Ok(EXIT_SUCCESS)
}

fn read_config(path: &PathBuf) -> Result<AnalysisConfig, CliError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        CliError::usage(format!("cannot read config {}: {e}", path.display()))
            .with_hint("pass the engagement TOML as the first argument")
    })?;
    Ok(AnalysisConfig::from_toml(&content)?)
}

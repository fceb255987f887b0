//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract — scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain    | Description                                   |
//! |---------|-----------|-----------------------------------------------|
//! | 0       | Universal | Success, no findings                          |
//! | 1       | Universal | General error (unspecified)                   |
//! | 2       | Universal | CLI usage error (bad args, bad config)        |
//! | 3-9     | run       | Audit findings (analysis completed)           |
//! | 10-19   | load      | Extract loading failures                      |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant command's error handling

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - analysis completed with no reportable findings.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, unreadable or invalid config.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Run findings (3-9) — the analysis itself succeeded
// =============================================================================

/// Self-validation of computed results failed. Trumps every other finding
/// because the rest of the report cannot be trusted.
pub const EXIT_VALIDATION_FAILED: u8 = 3;

/// Invoiced-not-shipped cutoff exceptions were found.
pub const EXIT_CUTOFF_EXCEPTIONS: u8 = 4;

/// A reconciliation check against configured engagement totals was out of
/// tolerance.
pub const EXIT_RECONCILIATION: u8 = 5;

// =============================================================================
// Extract loading (10-19)
// =============================================================================

/// Extract file could not be read.
pub const EXIT_LOAD_READ: u8 = 10;

/// Extract is not a supported format (only .csv).
pub const EXIT_LOAD_FORMAT: u8 = 11;

/// Extract is missing a required key column.
pub const EXIT_LOAD_COLUMN: u8 = 12;

/// Extract is structurally malformed CSV.
pub const EXIT_LOAD_MALFORMED: u8 = 13;

/// Map an IO-layer error onto its registry code.
pub fn load_exit_code(err: &auditgrid_io::IoError) -> u8 {
    use auditgrid_io::IoError;
    match err {
        IoError::Read { .. } => EXIT_LOAD_READ,
        IoError::UnsupportedFormat(_) => EXIT_LOAD_FORMAT,
        IoError::MissingColumn { .. } => EXIT_LOAD_COLUMN,
        IoError::Csv { .. } => EXIT_LOAD_MALFORMED,
    }
}

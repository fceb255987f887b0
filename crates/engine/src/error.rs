use std::fmt;

#[derive(Debug)]
pub enum EngineError {
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (bad threshold, unknown bucket label, etc.).
    ConfigValidation(String),
    /// A required input table is absent from the dataset.
    MissingTable(String),
    /// A required input table is empty where no fallback exists.
    EmptyTable { table: String, detail: String },
    /// A required column could not be resolved in external data.
    MissingColumn { table: String, column: String },
    /// An aging bucket label that is not one of the four known buckets.
    UnknownBucket(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::MissingTable(table) => write!(f, "required table missing: {table}"),
            Self::EmptyTable { table, detail } => {
                write!(f, "table '{table}' is empty: {detail}")
            }
            Self::MissingColumn { table, column } => {
                write!(f, "table '{table}': missing column '{column}'")
            }
            Self::UnknownBucket(label) => write!(f, "unknown aging bucket: {label}"),
        }
    }
}

impl std::error::Error for EngineError {}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PanelError {
    /// Caller mis-specified a window, reference category, or grouping
    /// variable. Fail fast, never recoverable.
    #[error("Configuration: {0}")]
    Configuration(String),

    /// Design matrix is collinear after absorption. Carries the names of
    /// the offending columns.
    #[error("Rank deficiency: collinear columns {columns:?}")]
    RankDeficiency { columns: Vec<String> },

    /// Clustering variable has too few groups for valid variance
    /// estimation. Fatal for the specification, not for its siblings.
    #[error("Inference: {0}")]
    Inference(String),

    /// A degenerate numeric case (log of non-positive wage, zero
    /// pre-period RMSPE) that would otherwise propagate NaN/Inf.
    #[error("Numeric: {0}")]
    Numeric(String),

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("InvalidData: {0}")]
    InvalidData(String),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PanelError>;

/// Non-fatal data-quality accounting carried alongside estimation results.
///
/// Dropped rows are counted here and reported via `tracing::warn!`, never
/// silently lost.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataQualityReport {
    /// Rows dropped because outcome or a regressor was missing.
    pub missing_dropped: usize,
    /// Rows dropped because their fixed-effect group was a singleton.
    pub singletons_dropped: usize,
}

impl DataQualityReport {
    pub fn is_clean(&self) -> bool {
        self.missing_dropped == 0 && self.singletons_dropped == 0
    }
}

/// Errors returned by implicit-als-rs operations.
#[derive(Debug, thiserror::Error)]
pub enum AlsError {
    /// A training parameter failed validation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A required input of a computation step was not set.
    #[error("input '{0}' is not set")]
    NullInput(&'static str),

    /// A partial result handed to a step was not allocated.
    #[error("partial result '{0}' is not allocated")]
    NullPartialResult(&'static str),

    /// A partial model slot was empty or held no factors.
    #[error("partial model is not set")]
    NullPartialModel,

    /// A factor table does not have `n_factors` columns.
    #[error("incorrect number of factors: expected {expected}, got {actual}")]
    IncorrectNumberOfFactors {
        /// `n_factors` from the parameter.
        expected: usize,
        /// Column count actually found.
        actual: usize,
    },

    /// A table has the wrong shape.
    #[error("incorrect size of table '{name}': expected {expected}, got {actual}")]
    IncorrectTableSize {
        /// Name of the offending table.
        name: &'static str,
        /// Expected `rows x cols`.
        expected: String,
        /// Observed `rows x cols`.
        actual: String,
    },

    /// A dense table uses a packed (symmetric or triangular) layout where a
    /// full row-major matrix is required.
    #[error("table '{0}' has a packed layout; a full matrix is required")]
    IncorrectTableLayout(&'static str),

    /// CSR offsets or column indices are malformed.
    #[error("incorrect CSR indices: {0}")]
    IncorrectCsrIndices(String),

    /// A row or column index is out of range or unresolvable.
    #[error("incorrect index: {0}")]
    IncorrectIndex(String),

    /// A collection input holds no elements.
    #[error("collection '{0}' is empty")]
    EmptyCollection(&'static str),

    /// The computation method does not accept the supplied data kind.
    #[error("method {method} does not support {data} input")]
    UnsupportedMethod {
        /// Requested method name.
        method: &'static str,
        /// Kind of table supplied.
        data: &'static str,
    },

    /// The normal-equation system of a row is not positive definite.
    #[error("system for row {row} is not positive definite")]
    NotPositiveDefinite {
        /// Global index of the row being solved.
        row: usize,
    },

    /// A parse error occurred while reading a ratings file.
    #[error("parse error at line {line}: {message}")]
    ParseError {
        /// 1-based line number where the error occurred.
        line: usize,
        /// Description of the parse failure.
        message: String,
    },

    /// A model file could not be loaded due to format issues.
    #[error("model format error: {0}")]
    ModelFormatError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

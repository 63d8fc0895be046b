use thiserror::Error;

/// Canonical kflow error taxonomy used across crates.
///
/// Classification guidance:
/// - [`KflowError::Planning`]: plan shape/arity issues discovered before execution
/// - [`KflowError::SchemaMismatch`]: a plan references a column its input does not have
/// - [`KflowError::Capacity`] / [`KflowError::InvalidEncoding`]: kernel output failures
/// - [`KflowError::Execution`]: other runtime operator failures
/// - [`KflowError::Io`]: raw filesystem failures from std APIs
#[derive(Debug, Error)]
pub enum KflowError {
    /// Invalid or inconsistent configuration/registration state.
    ///
    /// Examples:
    /// - registering a function name twice
    /// - unparsable config file
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Plan construction or validation failures.
    ///
    /// Examples:
    /// - a node consumed by two parents
    /// - wrong number of arguments for a function
    #[error("planning error: {0}")]
    Planning(String),

    /// Runtime execution failures after planning succeeded.
    #[error("execution error: {0}")]
    Execution(String),

    /// Output would not fit the offset domain of the output column, or a transform
    /// tried to write past its declared bound.
    ///
    /// Not retryable without switching to a wider-offset representation.
    #[error("capacity error: {0}")]
    Capacity(String),

    /// Input (or produced output) cannot be represented in the target encoding.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// A function needing configuration was invoked without a usable options object
    /// or without its options type being registered.
    #[error("missing options: {0}")]
    MissingOptions(String),

    /// Column referenced by the plan is absent from the upstream schema.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Registry lookup miss.
    #[error("function not found: {0}")]
    FunctionNotFound(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Valid request for a feature not implemented.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Standard kflow result alias.
pub type Result<T> = std::result::Result<T, KflowError>;

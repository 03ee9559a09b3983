use thiserror::Error;

/// Analysis-level failures. Either variant aborts the current trajectory
/// source; the caller decides whether to continue with remaining sources.
///
/// Internal invariant breaks (out-of-order event samples, mismatched
/// vehicle ids) are not represented here — they panic, since continuing
/// would silently corrupt measures.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Configuration outside its documented range, or a degenerate
    /// observation area.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Malformed trajectory input or truncated record stream.
    #[error("invalid trajectory input: {0}")]
    Input(String),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

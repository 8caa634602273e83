//! Error classification used to route recovery in the turn engine.

/// Broad error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The model requested a tool that does not exist. Retried with a bound.
    HallucinatedTool,
    /// User-initiated cancellation. Not a failure.
    Abort,
    Authentication,
    RateLimit,
    Transport,
    Server,
    Provider,
    Configuration,
    Serialization,
    InvalidState,
    Unknown,
}

impl ErrorCategory {
    /// Whether the turn engine retries errors of this category itself.
    pub fn is_retried_by_engine(self) -> bool {
        matches!(self, Self::HallucinatedTool)
    }
}

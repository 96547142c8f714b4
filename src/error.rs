use crate::se::SeError;
use crate::store::StoreError;

/// Crate-wide error type.
///
/// Orchestration entry points stop at the first failure and report exactly
/// one of these; there is no partial-success reporting. The idempotent
/// "already done" outcome of chip writes is not an error, see
/// [`WriteOutcome`](crate::se::WriteOutcome).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Malformed length or oversized input. Caller misuse, fatal to the
    /// current command only.
    Param,
    /// The chip is unreachable or reported a protocol failure.
    Transport,
    /// A verifying read disagreed with the intended value. Wrong chip,
    /// corruption or a logic defect; never retried automatically.
    VerificationMismatch,
    /// The chip is not in the paired end state required for this operation.
    NotPaired,
    /// Secure-channel operation issued in the wrong session state.
    ChannelState,
    /// A cryptographic primitive failed internally.
    Crypto,
    /// Durable device storage failed or holds corrupt data.
    Storage,
}

impl From<SeError> for Error {
    fn from(_err: SeError) -> Self {
        Self::Transport
    }
}

impl From<StoreError> for Error {
    fn from(_err: StoreError) -> Self {
        Self::Storage
    }
}

//! Error types of the compositing core.
//!
//! Every condition here is fatal to the collective: the algorithms assume all
//! peers stay reachable and consistent, so there is no local recovery. Errors
//! are propagated to the frame driver, which is expected to abort the run.

use crate::comm::CommError;
use tessel_sparse::FormatError;

/// A specialized Result type for compositing operations.
pub type Result<T> = core::result::Result<T, Error>;

/// A fatal compositing failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The local process is not a member of the compose group it was asked
    /// to composite with.
    NotInGroup,
    /// The factorization of the group size does not multiply back to it.
    FactorProductMismatch,
    /// The factorization produced more factors than ⌊log₂ G⌋, which no
    /// sequence of factors ≥ 2 can.
    TooManyFactors,
    /// A group larger than one process factored into zero rounds.
    NoRounds,
    /// A peer's image piece has different dimensions than the local piece of
    /// the same round.
    PieceSizeMismatch {
        /// The compositing round the piece arrived in.
        round: usize,
        /// Local piece dimensions.
        expected: (u32, u32),
        /// Received piece dimensions.
        received: (u32, u32),
    },
    /// A gathered plane slice does not have the byte length its size header
    /// announced.
    PlaneSizeMismatch {
        /// Bytes announced by the header.
        expected: usize,
        /// Bytes actually received.
        received: usize,
    },
    /// The contributor list of a tile does not match its contribution count.
    ContributorMiscount {
        /// The tile in question.
        tile: usize,
        /// Contributors found by walking the composite order.
        counted: usize,
        /// Contributions the frame state declares.
        expected: usize,
    },
    /// A tile's display process is missing from the group composing the tile.
    DisplayNotInGroup {
        /// The tile in question.
        tile: usize,
    },
    /// The messaging collaborator failed; propagated as-is, never retried.
    Comm(CommError),
    /// A received buffer is not a well-formed sparse image, or images with
    /// incompatible shapes met.
    Format(FormatError),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotInGroup => write!(f, "local process not in compose group"),
            Self::FactorProductMismatch => {
                write!(f, "product of factors does not equal the group size")
            }
            Self::TooManyFactors => write!(f, "more factors than possible for the group size"),
            Self::NoRounds => write!(f, "compositing group has no rounds"),
            Self::PieceSizeMismatch {
                round,
                expected,
                received,
            } => write!(
                f,
                "round {round} received a {}x{} piece, expected {}x{}",
                received.0, received.1, expected.0, expected.1
            ),
            Self::PlaneSizeMismatch { expected, received } => write!(
                f,
                "collected plane slice is {received} bytes, header announced {expected}"
            ),
            Self::ContributorMiscount {
                tile,
                counted,
                expected,
            } => write!(
                f,
                "tile {tile} has {counted} contributors in composite order, expected {expected}"
            ),
            Self::DisplayNotInGroup { tile } => {
                write!(f, "display process not in the group composing tile {tile}")
            }
            Self::Comm(err) => write!(f, "communication failed: {err}"),
            Self::Format(err) => write!(f, "malformed image: {err}"),
        }
    }
}

impl core::error::Error for Error {}

impl From<CommError> for Error {
    fn from(err: CommError) -> Self {
        Self::Comm(err)
    }
}

impl From<FormatError> for Error {
    fn from(err: FormatError) -> Self {
        Self::Format(err)
    }
}

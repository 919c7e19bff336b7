//! Checks over captured frame metadata.
//!
//! Used by the tests and the vivid integration suite to verify that frames
//! arrive in driver order and, on drivers that never drop frames, without
//! gaps.

use std::fmt;

use crate::traits::FrameMetadata;

/// Why a metadata sequence failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Nothing to validate.
    Empty,
    /// A sequence number skipped ahead.
    Gap {
        /// Position in the slice.
        position: usize,
        /// Sequence number that should have followed.
        expected: u32,
        /// Sequence number found.
        actual: u32,
    },
    /// A sequence number did not increase.
    OutOfOrder {
        /// Position in the slice.
        position: usize,
        /// Sequence number before it.
        previous: u32,
        /// Sequence number found.
        actual: u32,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "cannot validate an empty frame sequence"),
            Self::Gap {
                position,
                expected,
                actual,
            } => write!(
                f,
                "frame sequence gap at position {position}: expected {expected}, got {actual}"
            ),
            Self::OutOfOrder {
                position,
                previous,
                actual,
            } => write!(
                f,
                "frame out of order at position {position}: {actual} after {previous}"
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validates that sequence numbers increase by exactly 1.
///
/// Like [`validate_delivery_order`], this treats the counter as never
/// wrapping: `u32::MAX` followed by 0 is out of order.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] for an empty slice, and
/// [`ValidationError::Gap`] or [`ValidationError::OutOfOrder`] at the first
/// step that is not +1.
pub fn validate_frame_sequence(frames: &[FrameMetadata]) -> Result<(), ValidationError> {
    validate_delivery_order(frames)?;

    for (position, pair) in frames.windows(2).enumerate() {
        if let [previous, current] = pair {
            // Ordering was checked above, so `previous` is below u32::MAX
            let expected = previous.sequence + 1;
            if current.sequence != expected {
                return Err(ValidationError::Gap {
                    position: position + 1,
                    expected,
                    actual: current.sequence,
                });
            }
        }
    }
    Ok(())
}

/// Validates that sequence numbers strictly increase.
///
/// Gaps are allowed: a real driver drops frames when the consumer is slow.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] for an empty slice and
/// [`ValidationError::OutOfOrder`] at the first non-increasing step.
pub fn validate_delivery_order(frames: &[FrameMetadata]) -> Result<(), ValidationError> {
    if frames.is_empty() {
        return Err(ValidationError::Empty);
    }

    for (position, pair) in frames.windows(2).enumerate() {
        if let [previous, current] = pair {
            if current.sequence <= previous.sequence {
                return Err(ValidationError::OutOfOrder {
                    position: position + 1,
                    previous: previous.sequence,
                    actual: current.sequence,
                });
            }
        }
    }
    Ok(())
}

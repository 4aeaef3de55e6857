use thiserror::Error;

use crate::stream::Placement;

#[derive(Error, Debug)]
pub enum AcqError {
    #[error("Requested count {0} already evicted from the stream buffer")]
    OutOfRetention(u64),

    #[error("Requested count {0} not yet produced")]
    NotYetAvailable(u64),

    #[error("Exactly {requested} scans requested from count {from_ct}, only {available} available")]
    InexactUnavailable {
        from_ct: u64,
        requested: usize,
        available: usize,
    },

    #[error("Low memory: could not reserve {0} samples")]
    LowMemory(usize),

    #[error("Segment writer error: {0}")]
    Writer(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AcqError {
    /// Error for a count classified outside the retention window.
    ///
    /// `Inside` has no error counterpart and maps to `None`.
    pub fn from_placement(placement: Placement, ct: u64) -> Option<Self> {
        match placement {
            Placement::WayLeft | Placement::Left => Some(AcqError::OutOfRetention(ct)),
            Placement::Right => Some(AcqError::NotYetAvailable(ct)),
            Placement::Inside => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, AcqError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placement_mapping() {
        assert!(matches!(
            AcqError::from_placement(Placement::Left, 4),
            Some(AcqError::OutOfRetention(4))
        ));
        assert!(matches!(
            AcqError::from_placement(Placement::WayLeft, 0),
            Some(AcqError::OutOfRetention(0))
        ));
        assert!(matches!(
            AcqError::from_placement(Placement::Right, 9),
            Some(AcqError::NotYetAvailable(9))
        ));
        assert!(AcqError::from_placement(Placement::Inside, 1).is_none());
    }

    #[test]
    fn test_display() {
        let e = AcqError::InexactUnavailable {
            from_ct: 10,
            requested: 5,
            available: 2,
        };
        assert!(e.to_string().contains("only 2 available"));
    }
}

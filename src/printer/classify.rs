use super::{StatusErrorFlags as ErrorFlags, StatusFrame};

use std::fmt::Display;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("unknown error information 1 ({0:#04x})")]
    UnknownError1(u8),

    #[error("transmission error")]
    TransmissionError,

    #[error("cannot feed print media")]
    CannotFeed,

    #[error("unknown error information 2 ({0:#04x})")]
    UnknownError2(u8),
}

/// Conditions an operator can fix at the printer.
/// Only one of them is reported at a time.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum TransientError {
    #[default]
    AllIsWell,
    NoTapeCartridge,
    TapeRanOut,
    TapeJammed,
    CoverOpen,
}

impl Display for TransientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use TransientError::*;

        match self {
            AllIsWell => write!(f, "all is well"),
            NoTapeCartridge => write!(f, "no tape cartridge"),
            TapeRanOut => write!(f, "tape ran out"),
            TapeJammed => write!(f, "tape jammed"),
            CoverOpen => write!(f, "cover open"),
        }
    }
}

/// Reduce the error flags of a status frame to the one condition worth reporting.
///
/// Error information 1 is evaluated first. An open cover is only reported if it did not
/// select anything. Every bit not understood here is fatal.
pub fn classify(frame: &StatusFrame) -> Result<TransientError, Error> {
    classify_flags(frame.error_flags)
}

pub fn classify_flags(flags: ErrorFlags) -> Result<TransientError, Error> {
    use TransientError::*;

    let mut state = if flags.contains(ErrorFlags::NO_MEDIA) {
        NoTapeCartridge
    } else if flags.contains(ErrorFlags::END_OF_MEDIA) {
        TapeRanOut
    } else if flags.contains(ErrorFlags::CUTTER_JAM) {
        TapeJammed
    } else if flags.error1() != 0x00 {
        return Err(Error::UnknownError1(flags.error1()));
    } else {
        AllIsWell
    };

    if flags.contains(ErrorFlags::TRANSMISSION_ERROR) {
        return Err(Error::TransmissionError);
    } else if flags.contains(ErrorFlags::CANNOT_FEED) {
        return Err(Error::CannotFeed);
    } else if flags.contains(ErrorFlags::COVER_OPEN) {
        if state == AllIsWell {
            state = CoverOpen;
        }
    } else if flags.error2() != 0x00 {
        return Err(Error::UnknownError2(flags.error2()));
    }

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransientError::*;

    fn classify_bytes(error1: u8, error2: u8) -> Result<TransientError, Error> {
        classify_flags(ErrorFlags::from_bytes(error1, error2))
    }

    #[test]
    fn classification_table() {
        let table = [
            (0x00, 0x00, Ok(AllIsWell)),
            (0x01, 0x00, Ok(NoTapeCartridge)),
            (0x02, 0x00, Ok(TapeRanOut)),
            (0x04, 0x00, Ok(TapeJammed)),
            (0x00, 0x10, Ok(CoverOpen)),
            (0x01, 0x10, Ok(NoTapeCartridge)),
            (0x04, 0x10, Ok(TapeJammed)),
            (0x00, 0x04, Err(Error::TransmissionError)),
            (0x00, 0x40, Err(Error::CannotFeed)),
            (0x01, 0x04, Err(Error::TransmissionError)),
        ];

        for (error1, error2, expected) in table {
            assert_eq!(
                classify_bytes(error1, error2),
                expected,
                "Error1={:#04x} Error2={:#04x}",
                error1,
                error2
            );
        }
    }

    #[test]
    fn error1_bits_are_ranked() {
        assert_eq!(classify_bytes(0x07, 0x00), Ok(NoTapeCartridge));
        assert_eq!(classify_bytes(0x06, 0x00), Ok(TapeRanOut));
    }

    #[test]
    fn unknown_bits_are_fatal() {
        assert_eq!(classify_bytes(0x08, 0x00), Err(Error::UnknownError1(0x08)));
        assert_eq!(classify_bytes(0x00, 0x80), Err(Error::UnknownError2(0x80)));
    }

    #[test]
    fn transmission_error_wins_over_cannot_feed() {
        assert_eq!(classify_bytes(0x00, 0x44), Err(Error::TransmissionError));
    }

    #[test]
    fn cover_open_masks_other_error2_bits() {
        assert_eq!(classify_bytes(0x00, 0x11), Ok(CoverOpen));
    }
}

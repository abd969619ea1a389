use std::fmt::Display;

/// The kind of tape in the cartridge, as reported by the status frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MediaType {
    NoMedia,
    Laminated,
    NonLaminated,
    HeatShrinkTube,
    Incompatible,
    Unknown(u8),
}

impl From<u8> for MediaType {
    fn from(value: u8) -> Self {
        use MediaType::*;

        match value {
            0x00 => NoMedia,
            0x01 => Laminated,
            0x03 => NonLaminated,
            0x11 => HeatShrinkTube,
            0xff => Incompatible,
            other => Unknown(other),
        }
    }
}

impl Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use MediaType::*;

        match self {
            NoMedia => write!(f, "no media"),
            Laminated => write!(f, "laminated tape"),
            NonLaminated => write!(f, "non-laminated tape"),
            HeatShrinkTube => write!(f, "heat-shrink tube"),
            Incompatible => write!(f, "incompatible tape"),
            Unknown(value) => write!(f, "unknown media ({:#04x})", value),
        }
    }
}

/// Printable height in pixels for a tape of the given width.
///
/// Narrow tapes only use the middle of the 128-pin print head. A bitmap rendered for the
/// tape should be this many pixels across its short side.
pub fn printable_pixels(media_width_mm: u8) -> u32 {
    match media_width_mm {
        6 => 48,
        9 => 64,
        12 => 96,
        _ => 128,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_tapes_use_fewer_pins() {
        assert_eq!(printable_pixels(6), 48);
        assert_eq!(printable_pixels(9), 64);
        assert_eq!(printable_pixels(12), 96);
    }

    #[test]
    fn wide_and_unknown_tapes_use_the_whole_head() {
        assert_eq!(printable_pixels(18), 128);
        assert_eq!(printable_pixels(24), 128);
        assert_eq!(printable_pixels(0), 128);
    }

    #[test]
    fn media_type_codes() {
        assert_eq!(MediaType::from(0x11), MediaType::HeatShrinkTube);
        assert_eq!(MediaType::from(0x42), MediaType::Unknown(0x42));
    }
}

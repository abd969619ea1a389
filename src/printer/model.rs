use std::fmt::Display;

use serde::Deserialize;

/// The P-touch models we know how to talk to.
/// They report themselves through the hardware version byte of the status frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum HardwareVersion {
    PT2430PC,
    PTP700,
}

impl Display for HardwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use HardwareVersion::*;

        let model_nr = match self {
            PT2430PC => "2430PC",
            PTP700 => "P700",
        };

        write!(f, "Brother PT-{}", model_nr)
    }
}

impl HardwareVersion {
    /// The value of the hardware version byte (offset 4) in the status frame.
    pub fn status_byte(&self) -> u8 {
        use HardwareVersion::*;

        match self {
            PT2430PC => 0x5a,
            PTP700 => 0x67,
        }
    }

    /// The USB product ID the printer enumerates with.
    pub fn product_id(&self) -> u16 {
        use HardwareVersion::*;

        match self {
            PT2430PC => 0x2007,
            PTP700 => 0x2061,
        }
    }

    pub fn from_product_id(value: u16) -> Option<Self> {
        use HardwareVersion::*;

        [PT2430PC, PTP700]
            .into_iter()
            .find(|model| model.product_id() == value)
    }
}

impl TryFrom<u8> for HardwareVersion {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use HardwareVersion::*;

        Ok(match value {
            0x5a => PT2430PC,
            0x67 => PTP700,

            other => return Err(other),
        })
    }
}

impl TryFrom<&str> for HardwareVersion {
    type Error = String;

    fn try_from(mut value: &str) -> Result<Self, Self::Error> {
        use HardwareVersion::*;

        value = value.strip_prefix("Brother").unwrap_or(value).trim_start();
        value = value.strip_prefix("PT").unwrap_or(value);
        value = value.strip_prefix('-').unwrap_or(value);

        Ok(match value {
            "2430PC" => PT2430PC,
            "P700" => PTP700,

            _ => return Err(format!("Unknown printer model: {}", value)),
        })
    }
}

impl TryFrom<String> for HardwareVersion {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_byte_round_trips() {
        for model in [HardwareVersion::PT2430PC, HardwareVersion::PTP700] {
            assert_eq!(HardwareVersion::try_from(model.status_byte()), Ok(model));
        }
    }

    #[test]
    fn unknown_status_byte_is_rejected() {
        assert_eq!(HardwareVersion::try_from(0x00u8), Err(0x00));
        assert_eq!(HardwareVersion::try_from(0x66u8), Err(0x66));
    }

    #[test]
    fn parses_model_names() {
        assert_eq!(
            HardwareVersion::try_from("Brother PT-P700"),
            Ok(HardwareVersion::PTP700)
        );
        assert_eq!(
            HardwareVersion::try_from("PT2430PC"),
            Ok(HardwareVersion::PT2430PC)
        );
        assert!(HardwareVersion::try_from("QL-700").is_err());
    }

    #[test]
    fn product_ids_are_distinct() {
        assert_eq!(
            HardwareVersion::from_product_id(0x2061),
            Some(HardwareVersion::PTP700)
        );
        assert_eq!(HardwareVersion::from_product_id(0x2042), None);
    }
}

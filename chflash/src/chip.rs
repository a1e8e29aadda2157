//! Chip profiles for the CH55x family.
//!
//! The bootloader reports a one-byte chip id during identification; the
//! flash size and erase granularity follow from it. Supported parts are
//! CH551, CH552, CH554, CH558 and CH559.

use crate::error::ProtocolError;
use std::fmt;

/// Chip ids with the 64 KB flash / 11 erase block profile.
const LARGE_FLASH_IDS: [u8; 2] = [0x58, 0x59];

/// Chip ids with the default 16 KB flash / 8 erase block profile.
const SMALL_FLASH_IDS: [u8; 3] = [0x51, 0x52, 0x54];

/// Per-device parameters derived from the identification reply.
///
/// Owned by the session for its lifetime and never mutated after
/// identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipProfile {
    /// Chip id byte as reported by the bootloader.
    pub chip_id: u8,
    /// Flash size in kilobytes.
    pub flash_size_kb: u32,
    /// Number of erase blocks covering the flash.
    pub erase_block_count: u8,
}

impl ChipProfile {
    /// Derive the profile for a reported chip id.
    ///
    /// Ids outside the supported set are rejected rather than guessed at.
    pub fn from_chip_id(chip_id: u8) -> Result<Self, ProtocolError> {
        if LARGE_FLASH_IDS.contains(&chip_id) {
            Ok(Self {
                chip_id,
                flash_size_kb: 64,
                erase_block_count: 11,
            })
        } else if SMALL_FLASH_IDS.contains(&chip_id) {
            Ok(Self {
                chip_id,
                flash_size_kb: 16,
                erase_block_count: 8,
            })
        } else {
            Err(ProtocolError::UnknownChip(chip_id))
        }
    }

    /// Marketing name of the part, e.g. "CH552".
    pub fn name(&self) -> String {
        // The id encodes the part number: 0x51 = 81 decimal -> CH5"51".
        format!("CH5{}", self.chip_id as u32 - 30)
    }
}

impl fmt::Display for ChipProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} KB flash, {} erase blocks)",
            self.name(),
            self.flash_size_kb,
            self.erase_block_count
        )
    }
}

/// Bootloader version as read back from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootloaderVersion {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Extended bootloaders report a third digit.
    pub patch: Option<u8>,
}

impl fmt::Display for BootloaderVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.patch {
            // Extended readback prints as e.g. "2.31".
            Some(patch) => write!(f, "{}.{}{}", self.major, self.minor, patch),
            None => write!(f, "{}.{}", self.major, self.minor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_large_flash_profile() {
        for id in [0x58, 0x59] {
            let profile = ChipProfile::from_chip_id(id).unwrap();
            assert_eq!(profile.flash_size_kb, 64);
            assert_eq!(profile.erase_block_count, 11);
        }
    }

    #[test]
    fn test_small_flash_profile() {
        for id in [0x51, 0x52, 0x54] {
            let profile = ChipProfile::from_chip_id(id).unwrap();
            assert_eq!(profile.flash_size_kb, 16);
            assert_eq!(profile.erase_block_count, 8);
        }
    }

    #[test]
    fn test_unknown_chip_id_rejected() {
        for id in [0x00, 0x55, 0x5a, 0xff] {
            assert!(matches!(
                ChipProfile::from_chip_id(id),
                Err(ProtocolError::UnknownChip(got)) if got == id
            ));
        }
    }

    #[test]
    fn test_chip_names() {
        assert_eq!(ChipProfile::from_chip_id(0x51).unwrap().name(), "CH551");
        assert_eq!(ChipProfile::from_chip_id(0x52).unwrap().name(), "CH552");
        assert_eq!(ChipProfile::from_chip_id(0x59).unwrap().name(), "CH559");
    }

    #[test]
    fn test_version_display() {
        let legacy = BootloaderVersion {
            major: 1,
            minor: 1,
            patch: None,
        };
        assert_eq!(legacy.to_string(), "1.1");

        let extended = BootloaderVersion {
            major: 2,
            minor: 3,
            patch: Some(1),
        };
        assert_eq!(extended.to_string(), "2.31");
    }
}

//! Extended (v2) bootloader codec.
//!
//! The v2 bootloader frames data with an 8-byte header:
//!
//! ```text
//! +--------+-------+------+----------------+------+------+-----------+----------------+
//! | opcode | len+5 | 0x00 | address (LE16) | 0x00 | 0x00 | remaining | payload (..56) |
//! +--------+-------+------+----------------+------+------+-----------+----------------+
//! |   1    |   1   |  1   |       2        |  1   |  1   |     1     |    0..=56      |
//! +--------+-------+------+----------------+------+------+-----------+----------------+
//! ```
//!
//! After the header and payload are populated, every byte at an offset
//! `p` with `p % 8 == 7` is XORed with the chip id. The mask is its own
//! inverse and is recomputed per frame.
//!
//! Before erase/write/verify are accepted the host must answer the
//! key-response handshake: a 0x30-byte payload filled with the 8-bit
//! wrapped sum of configuration bytes 22..=25.
//!
//! Replies carry their status at byte 4; 0x00 always passes and 0xfe is
//! a non-fatal variant-specific status on data frames.

use {
    crate::{
        chip::{BootloaderVersion, ChipProfile},
        error::ProtocolError,
        protocol::{Codec, DataMode, ProtocolVariant},
        transport::MAX_TRANSFER,
    },
    byteorder::{ByteOrder, LittleEndian},
};

/// Detect/identify magic ("MCU ISP & WCH.CN").
pub const DETECT_SEQUENCE: &[u8] = &[
    0xa1, 0x12, 0x00, 0x52, 0x11, 0x4d, 0x43, 0x55, 0x20, 0x49, 0x53, 0x50, 0x20, 0x26, 0x20,
    0x57, 0x43, 0x48, 0x2e, 0x43, 0x4e,
];

/// Exit-bootloader sequence.
pub const EXIT_SEQUENCE: &[u8] = &[0xa2, 0x01, 0x00, 0x01];

/// Configuration readback request (30-byte reply).
pub const CONFIG_READ: &[u8] = &[0xa7, 0x02, 0x00, 0x1f, 0x00];

/// Erase-all opcode.
pub const OP_ERASE: u8 = 0xa4;

/// Key-response handshake opcode.
pub const OP_KEY: u8 = 0xa3;

/// Write data frame opcode.
pub const OP_WRITE: u8 = 0xa5;

/// Verify data frame opcode.
pub const OP_VERIFY: u8 = 0xa6;

/// Non-fatal data reply status alongside 0x00.
pub const STATUS_ALTERNATE_OK: u8 = 0xfe;

/// Length of the configuration reply.
pub const CONFIG_REPLY_LEN: usize = 30;

/// Offset of the status byte in replies.
const STATUS_OFFSET: usize = 4;

/// Data header bytes preceding the payload.
const DATA_HEADER_LEN: usize = 8;

/// Size of the key-response payload.
const KEY_PAYLOAD_LEN: usize = 0x30;

/// XOR the chip id into every 8th byte of a populated frame region.
///
/// Applied exactly once after the payload is in place; applying it twice
/// restores the original bytes.
pub fn apply_key_mask(frame: &mut [u8], chip_id: u8) {
    for (position, byte) in frame.iter_mut().enumerate() {
        if position % 8 == 7 {
            *byte ^= chip_id;
        }
    }
}

/// Codec for the extended wire protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtendedCodec;

impl ExtendedCodec {
    fn opcode(mode: DataMode) -> u8 {
        match mode {
            DataMode::Write => OP_WRITE,
            DataMode::Verify => OP_VERIFY,
        }
    }
}

impl Codec for ExtendedCodec {
    fn variant(&self) -> ProtocolVariant {
        ProtocolVariant::Extended
    }

    fn identify_frame(&self) -> &'static [u8] {
        DETECT_SEQUENCE
    }

    fn chip_id_from_identify(&self, reply: &[u8]) -> Result<u8, ProtocolError> {
        if reply.len() != 6 {
            return Err(ProtocolError::UnexpectedReplyLength {
                expected: 6,
                actual: reply.len(),
            });
        }
        Ok(reply[4])
    }

    fn version_request(&self) -> &'static [u8] {
        CONFIG_READ
    }

    fn interpret_version_reply(
        &self,
        reply: &[u8],
    ) -> Result<BootloaderVersion, ProtocolError> {
        if reply.len() != CONFIG_REPLY_LEN {
            return Err(ProtocolError::UnknownBootloaderVersion);
        }
        Ok(BootloaderVersion {
            major: reply[19],
            minor: reply[20],
            patch: Some(reply[21]),
        })
    }

    fn key_frame(&self, config_reply: &[u8]) -> Option<Vec<u8>> {
        // Checksum seed lives at configuration bytes 22..=25.
        let seed = config_reply.get(22..26)?;
        let checksum = seed
            .iter()
            .fold(0u8, |sum, &byte| sum.wrapping_add(byte));

        let mut frame = vec![0u8; MAX_TRANSFER];
        frame[0] = OP_KEY;
        frame[1] = KEY_PAYLOAD_LEN as u8;
        frame[2] = 0x00;
        frame[3..3 + KEY_PAYLOAD_LEN].fill(checksum);
        Some(frame)
    }

    fn erase_frames(&self, profile: &ChipProfile) -> Vec<Vec<u8>> {
        vec![vec![OP_ERASE, 0x01, 0x00, profile.erase_block_count]]
    }

    fn interpret_erase_reply(&self, _step: usize, reply: &[u8]) -> Result<(), ProtocolError> {
        match reply.get(STATUS_OFFSET) {
            Some(0x00) => Ok(()),
            _ => Err(ProtocolError::EraseFailed),
        }
    }

    fn data_frame(
        &self,
        mode: DataMode,
        profile: &ChipProfile,
        address: u16,
        remaining: usize,
        chunk: &[u8],
    ) -> Vec<u8> {
        debug_assert!(chunk.len() <= self.max_chunk());

        let mut frame = vec![0u8; MAX_TRANSFER];
        frame[0] = Self::opcode(mode);
        frame[1] = chunk.len() as u8 + 5;
        frame[2] = 0x00;
        LittleEndian::write_u16(&mut frame[3..5], address);
        frame[5] = 0x00;
        frame[6] = 0x00;
        frame[7] = (remaining & 0xff) as u8;
        frame[DATA_HEADER_LEN..DATA_HEADER_LEN + chunk.len()].copy_from_slice(chunk);

        // Obfuscation pass over the populated region, once, after the
        // payload is in place.
        apply_key_mask(
            &mut frame[..DATA_HEADER_LEN + chunk.len()],
            profile.chip_id,
        );
        frame
    }

    fn interpret_data_reply(
        &self,
        mode: DataMode,
        reply: &[u8],
        address: u16,
    ) -> Result<(), ProtocolError> {
        match reply.get(STATUS_OFFSET) {
            Some(&status) if status == 0x00 || status == STATUS_ALTERNATE_OK => Ok(()),
            _ => Err(match mode {
                DataMode::Write => ProtocolError::WriteFailed { address },
                DataMode::Verify => ProtocolError::VerifyFailed { address },
            }),
        }
    }

    fn parse_data_header(&self, frame: &[u8]) -> Result<(u16, usize), ProtocolError> {
        if frame.len() < DATA_HEADER_LEN {
            return Err(ProtocolError::UnexpectedReplyLength {
                expected: DATA_HEADER_LEN,
                actual: frame.len(),
            });
        }
        let address = LittleEndian::read_u16(&frame[3..5]);
        Ok((address, frame[1] as usize - 5))
    }

    fn status_byte(&self, reply: &[u8]) -> Option<u8> {
        reply.get(STATUS_OFFSET).copied()
    }

    fn exit_frame(&self) -> &'static [u8] {
        EXIT_SEQUENCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> ChipProfile {
        ChipProfile::from_chip_id(0x59).unwrap()
    }

    #[test]
    fn test_detect_sequence_spells_isp_magic() {
        assert_eq!(DETECT_SEQUENCE.len(), 21);
        assert_eq!(DETECT_SEQUENCE[0], 0xa1);
        assert_eq!(&DETECT_SEQUENCE[5..21], b"MCU ISP & WCH.CN");
    }

    #[test]
    fn test_chip_id_at_reply_byte_four() {
        let codec = ExtendedCodec;
        let reply = [0x52, 0x11, 0x00, 0x00, 0x59, 0x00];
        assert_eq!(codec.chip_id_from_identify(&reply).unwrap(), 0x59);
        assert!(codec.chip_id_from_identify(&reply[..2]).is_err());
    }

    #[test]
    fn test_version_from_config_bytes_19_to_21() {
        let codec = ExtendedCodec;
        let mut reply = [0u8; 30];
        reply[19] = 2;
        reply[20] = 3;
        reply[21] = 1;
        let version = codec.interpret_version_reply(&reply).unwrap();
        assert_eq!(version.to_string(), "2.31");

        assert!(codec.interpret_version_reply(&reply[..29]).is_err());
    }

    #[test]
    fn test_key_frame_checksum_fill() {
        // Seed bytes 0x10 + 0x20 + 0x05 + 0x01 wrap to 0x36.
        let codec = ExtendedCodec;
        let mut config = [0u8; 30];
        config[22..26].copy_from_slice(&[0x10, 0x20, 0x05, 0x01]);

        let frame = codec.key_frame(&config).unwrap();
        assert_eq!(frame.len(), MAX_TRANSFER);
        assert_eq!(frame[0], OP_KEY);
        assert_eq!(frame[1], 0x30);
        assert_eq!(frame[2], 0x00);
        assert!(frame[3..3 + 0x30].iter().all(|&b| b == 0x36));
    }

    #[test]
    fn test_key_frame_checksum_wraps() {
        let codec = ExtendedCodec;
        let mut config = [0u8; 30];
        config[22..26].copy_from_slice(&[0xff, 0xff, 0x01, 0x02]);
        let frame = codec.key_frame(&config).unwrap();
        assert_eq!(frame[3], 0x01); // 0x201 mod 256
    }

    #[test]
    fn test_key_mask_is_self_inverse() {
        let original: Vec<u8> = (0u8..64).collect();
        let mut masked = original.clone();
        apply_key_mask(&mut masked, 0x59);
        assert_ne!(masked, original);
        apply_key_mask(&mut masked, 0x59);
        assert_eq!(masked, original);
    }

    #[test]
    fn test_key_mask_touches_every_eighth_byte_only() {
        let mut buf = [0u8; 64];
        apply_key_mask(&mut buf, 0x59);
        for (position, &byte) in buf.iter().enumerate() {
            if position % 8 == 7 {
                assert_eq!(byte, 0x59);
            } else {
                assert_eq!(byte, 0x00);
            }
        }
    }

    #[test]
    fn test_erase_frame_carries_block_count() {
        let codec = ExtendedCodec;
        let frames = codec.erase_frames(&profile());
        assert_eq!(frames, vec![vec![OP_ERASE, 0x01, 0x00, 11]]);
    }

    #[test]
    fn test_erase_reply_status_at_byte_four() {
        let codec = ExtendedCodec;
        assert!(codec
            .interpret_erase_reply(0, &[0x00, 0x00, 0x00, 0x00, 0x00, 0x00])
            .is_ok());
        assert!(matches!(
            codec.interpret_erase_reply(0, &[0x00, 0x00, 0x00, 0x00, 0x01, 0x00]),
            Err(ProtocolError::EraseFailed)
        ));
        // A short reply never passes.
        assert!(codec.interpret_erase_reply(0, &[0x00]).is_err());
    }

    #[test]
    fn test_data_frame_layout_and_mask() {
        // Fourth frame of a 300-byte image: address 0x00a8, 132 bytes
        // still to go including this chunk.
        let codec = ExtendedCodec;
        let chunk = [0x11; 56];
        let mut frame = codec.data_frame(DataMode::Write, &profile(), 0x00a8, 300 - 0x00a8, &chunk);

        // Undo the mask to inspect the plain layout.
        apply_key_mask(&mut frame[..64], 0x59);
        assert_eq!(frame[0], OP_WRITE);
        assert_eq!(frame[1], 56 + 5);
        assert_eq!(frame[2], 0x00);
        assert_eq!(&frame[3..5], &[0xa8, 0x00]);
        assert_eq!(frame[7], ((300 - 0x00a8) & 0xff) as u8);
        assert_eq!(&frame[8..64], &chunk);
    }

    #[test]
    fn test_data_frame_mask_applied_once() {
        let codec = ExtendedCodec;
        let chunk = [0x00; 56];
        let frame = codec.data_frame(DataMode::Verify, &profile(), 0, 56, &chunk);
        // With an all-zero payload, the masked positions read back as the
        // chip id (except byte 7, which carries the remaining count).
        assert_eq!(frame[15], 0x59);
        assert_eq!(frame[23], 0x59);
        assert_eq!(frame[63], 0x59);
        assert_eq!(frame[7], 56 ^ 0x59);
    }

    #[test]
    fn test_data_header_round_trip() {
        let codec = ExtendedCodec;
        for (address, len) in [(0u16, 56usize), (0x0e00, 20), (0xff00, 1)] {
            let chunk = vec![0xa5; len];
            let frame = codec.data_frame(DataMode::Write, &profile(), address, len, &chunk);
            assert_eq!(codec.parse_data_header(&frame).unwrap(), (address, len));
        }
    }

    #[test]
    fn test_data_reply_accepts_fe_status() {
        let codec = ExtendedCodec;
        let ok = [0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let alt = [0x00, 0x00, 0x00, 0x00, 0xfe, 0x00];
        let bad = [0x00, 0x00, 0x00, 0x00, 0xf5, 0x00];

        assert!(codec.interpret_data_reply(DataMode::Write, &ok, 0).is_ok());
        assert!(codec.interpret_data_reply(DataMode::Verify, &alt, 0).is_ok());
        assert!(matches!(
            codec.interpret_data_reply(DataMode::Verify, &bad, 0x00a8),
            Err(ProtocolError::VerifyFailed { address: 0x00a8 })
        ));
    }

    #[test]
    fn test_exit_sequence() {
        assert_eq!(ExtendedCodec.exit_frame(), &[0xa2, 0x01, 0x00, 0x01]);
    }
}

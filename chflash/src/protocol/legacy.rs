//! Legacy (v1) bootloader codec.
//!
//! The v1 bootloader speaks compact frames with a 4-byte data header:
//!
//! ```text
//! +--------+--------+----------------+----------------+
//! | opcode | length | address (LE16) | payload (..60) |
//! +--------+--------+----------------+----------------+
//! |   1    |   1    |       2        |    0..=60      |
//! +--------+--------+----------------+----------------+
//! ```
//!
//! Erase is a bulk command followed by one confirmation exchange per
//! erase block. All replies carry their status in byte 0, where zero
//! means success.

use {
    crate::{
        chip::{BootloaderVersion, ChipProfile},
        error::ProtocolError,
        protocol::{Codec, DataMode, ProtocolVariant},
        transport::MAX_TRANSFER,
    },
    byteorder::{ByteOrder, LittleEndian},
};

/// Detect/identify magic ("USB DBG CH559 & ISP").
pub const DETECT_SEQUENCE: &[u8] = &[
    0xa2, 0x13, 0x55, 0x53, 0x42, 0x20, 0x44, 0x42, 0x47, 0x20, 0x43, 0x48, 0x35, 0x35, 0x39,
    0x20, 0x26, 0x20, 0x49, 0x53, 0x50, 0x00,
];

/// Exit-bootloader sequence.
pub const EXIT_SEQUENCE: &[u8] = &[0xa5, 0x02, 0x01, 0x00];

/// Bootloader version readback request.
pub const VERSION_REQUEST: &[u8] = &[0xbb, 0x00];

/// Bulk erase command preceding the per-block confirmations.
pub const ERASE_BULK: &[u8] = &[0xa6, 0x04, 0x00, 0x00, 0x00, 0x00];

/// Per-block erase confirmation opcode.
pub const OP_ERASE_BLOCK: u8 = 0xa9;

/// Write data frame opcode.
pub const OP_WRITE: u8 = 0xa8;

/// Verify data frame opcode.
pub const OP_VERIFY: u8 = 0xa7;

/// Data header bytes preceding the payload.
const DATA_HEADER_LEN: usize = 4;

/// Codec for the legacy wire protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyCodec;

impl LegacyCodec {
    fn opcode(mode: DataMode) -> u8 {
        match mode {
            DataMode::Write => OP_WRITE,
            DataMode::Verify => OP_VERIFY,
        }
    }
}

impl Codec for LegacyCodec {
    fn variant(&self) -> ProtocolVariant {
        ProtocolVariant::Legacy
    }

    fn identify_frame(&self) -> &'static [u8] {
        DETECT_SEQUENCE
    }

    fn chip_id_from_identify(&self, reply: &[u8]) -> Result<u8, ProtocolError> {
        if reply.len() != 2 {
            return Err(ProtocolError::UnexpectedReplyLength {
                expected: 2,
                actual: reply.len(),
            });
        }
        Ok(reply[0])
    }

    fn version_request(&self) -> &'static [u8] {
        VERSION_REQUEST
    }

    fn interpret_version_reply(
        &self,
        reply: &[u8],
    ) -> Result<BootloaderVersion, ProtocolError> {
        if reply.len() != 2 {
            return Err(ProtocolError::UnknownBootloaderVersion);
        }
        Ok(BootloaderVersion {
            major: reply[0] >> 4,
            minor: reply[0] & 0x0f,
            patch: None,
        })
    }

    fn key_frame(&self, _config_reply: &[u8]) -> Option<Vec<u8>> {
        None
    }

    fn erase_frames(&self, profile: &ChipProfile) -> Vec<Vec<u8>> {
        let mut frames = Vec::with_capacity(1 + profile.erase_block_count as usize);
        frames.push(ERASE_BULK.to_vec());
        for block in 0..profile.erase_block_count {
            frames.push(vec![OP_ERASE_BLOCK, 0x02, 0x00, block * 4]);
        }
        frames
    }

    fn interpret_erase_reply(&self, step: usize, reply: &[u8]) -> Result<(), ProtocolError> {
        // The bulk command's reply carries no status; only the per-block
        // confirmations do.
        if step == 0 {
            return Ok(());
        }
        match reply.first() {
            Some(0x00) => Ok(()),
            _ => Err(ProtocolError::EraseFailed),
        }
    }

    fn data_frame(
        &self,
        mode: DataMode,
        _profile: &ChipProfile,
        address: u16,
        _remaining: usize,
        chunk: &[u8],
    ) -> Vec<u8> {
        debug_assert!(chunk.len() <= self.max_chunk());

        let mut frame = vec![0u8; MAX_TRANSFER];
        frame[0] = Self::opcode(mode);
        frame[1] = chunk.len() as u8;
        LittleEndian::write_u16(&mut frame[2..4], address);
        frame[DATA_HEADER_LEN..DATA_HEADER_LEN + chunk.len()].copy_from_slice(chunk);
        frame
    }

    fn interpret_data_reply(
        &self,
        mode: DataMode,
        reply: &[u8],
        address: u16,
    ) -> Result<(), ProtocolError> {
        match reply.first() {
            Some(0x00) => Ok(()),
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
        let address = LittleEndian::read_u16(&frame[2..4]);
        Ok((address, frame[1] as usize))
    }

    fn status_byte(&self, reply: &[u8]) -> Option<u8> {
        reply.first().copied()
    }

    fn exit_frame(&self) -> &'static [u8] {
        EXIT_SEQUENCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> ChipProfile {
        ChipProfile::from_chip_id(0x52).unwrap()
    }

    #[test]
    fn test_detect_sequence_spells_isp_magic() {
        assert_eq!(DETECT_SEQUENCE.len(), 22);
        assert_eq!(DETECT_SEQUENCE[0], 0xa2);
        // The magic embeds the ASCII marker of the v1 bootloader.
        assert_eq!(&DETECT_SEQUENCE[2..21], b"USB DBG CH559 & ISP");
    }

    #[test]
    fn test_chip_id_from_identify_reply() {
        let codec = LegacyCodec;
        assert_eq!(codec.chip_id_from_identify(&[0x52, 0x11]).unwrap(), 0x52);
        assert!(codec.chip_id_from_identify(&[0x52]).is_err());
    }

    #[test]
    fn test_version_reply_split_into_nibbles() {
        let codec = LegacyCodec;
        let version = codec.interpret_version_reply(&[0x11, 0x00]).unwrap();
        assert_eq!(version.to_string(), "1.1");

        let version = codec.interpret_version_reply(&[0x23, 0x00]).unwrap();
        assert_eq!(version.to_string(), "2.3");
    }

    #[test]
    fn test_erase_sequence_covers_all_blocks() {
        let codec = LegacyCodec;
        let frames = codec.erase_frames(&profile());
        assert_eq!(frames.len(), 9); // bulk + 8 blocks
        assert_eq!(frames[0], ERASE_BULK);
        assert_eq!(frames[1], vec![OP_ERASE_BLOCK, 0x02, 0x00, 0x00]);
        assert_eq!(frames[8], vec![OP_ERASE_BLOCK, 0x02, 0x00, 7 * 4]);
    }

    #[test]
    fn test_erase_reply_status() {
        let codec = LegacyCodec;
        assert!(codec.interpret_erase_reply(0, &[]).is_ok());
        assert!(codec.interpret_erase_reply(1, &[0x00, 0x00]).is_ok());
        assert!(matches!(
            codec.interpret_erase_reply(1, &[0x01, 0x00]),
            Err(ProtocolError::EraseFailed)
        ));
    }

    #[test]
    fn test_data_frame_layout() {
        let codec = LegacyCodec;
        let chunk = [0xaa; 60];
        let frame = codec.data_frame(DataMode::Write, &profile(), 0x0234, 300, &chunk);

        assert_eq!(frame.len(), MAX_TRANSFER);
        assert_eq!(frame[0], OP_WRITE);
        assert_eq!(frame[1], 60);
        assert_eq!(&frame[2..4], &[0x34, 0x02]);
        assert_eq!(&frame[4..64], &chunk);
    }

    #[test]
    fn test_data_header_round_trip() {
        let codec = LegacyCodec;
        for (address, len) in [(0u16, 60usize), (0x0f00, 17), (0xfffc, 1)] {
            let chunk = vec![0x5a; len];
            let frame = codec.data_frame(DataMode::Verify, &profile(), address, len, &chunk);
            assert_eq!(codec.parse_data_header(&frame).unwrap(), (address, len));
        }
    }

    #[test]
    fn test_data_reply_status_byte_zero() {
        let codec = LegacyCodec;
        assert!(codec
            .interpret_data_reply(DataMode::Write, &[0x00, 0x00], 0)
            .is_ok());
        assert!(matches!(
            codec.interpret_data_reply(DataMode::Write, &[0x01, 0x00], 0x3c),
            Err(ProtocolError::WriteFailed { address: 0x3c })
        ));
        assert!(matches!(
            codec.interpret_data_reply(DataMode::Verify, &[0xfe, 0x00], 0x78),
            Err(ProtocolError::VerifyFailed { address: 0x78 })
        ));
    }

    #[test]
    fn test_exit_sequence() {
        assert_eq!(LegacyCodec.exit_frame(), &[0xa5, 0x02, 0x01, 0x00]);
    }
}

//! CH55x bootloader protocol codecs.
//!
//! Two incompatible wire protocols exist in the field: the legacy v1
//! bootloader (CH55x "DBG ISP") and the extended v2 bootloader ("MCU ISP
//! & WCH.CN"). Both exchange fixed 64-byte USB bulk transfers; they differ
//! in frame layout, opcode values, payload capacity and — for the extended
//! variant — an XOR pass keyed by the chip id.
//!
//! The [`Codec`] trait is the single interface over both variants. A
//! concrete codec is selected once, when the detect reply reveals which
//! bootloader is resident, and held for the whole session.

pub mod extended;
pub mod legacy;

use crate::chip::{BootloaderVersion, ChipProfile};
use crate::error::{Error, ProtocolError, TransportError};

/// Wire protocol variant spoken by the resident bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVariant {
    /// v1 bootloader (bootloader version 1.1).
    Legacy,
    /// v2 bootloader (bootloader version 2.3x).
    Extended,
}

impl ProtocolVariant {
    /// Maximum firmware payload bytes carried by one data frame.
    ///
    /// The 64-byte transfer leaves 60 bytes after the legacy 4-byte
    /// header and 56 bytes after the extended 8-byte header.
    pub fn max_chunk(self) -> usize {
        match self {
            Self::Legacy => 60,
            Self::Extended => 56,
        }
    }
}

impl std::fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Legacy => write!(f, "legacy (v1)"),
            Self::Extended => write!(f, "extended (v2)"),
        }
    }
}

/// Whether a data frame writes flash or verifies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataMode {
    /// Program the chunk into flash.
    Write,
    /// Compare the chunk against flash contents.
    Verify,
}

/// The detection probe sent before any variant is locked in.
///
/// Both bootloader generations answer it; only the reply length tells
/// them apart.
pub fn detect_probe() -> &'static [u8] {
    extended::DETECT_SEQUENCE
}

/// Disambiguate the protocol variant from the detect reply.
///
/// Reply length alone decides: 2 bytes means legacy, 6 bytes means
/// extended. An empty reply is a transport failure, never a variant
/// selection; any other length matches no known bootloader.
pub fn variant_from_detect_reply(reply: &[u8]) -> Result<ProtocolVariant, Error> {
    match reply.len() {
        0 => Err(TransportError::Other("empty reply to detect probe".into()).into()),
        2 => Ok(ProtocolVariant::Legacy),
        6 => Ok(ProtocolVariant::Extended),
        actual => Err(ProtocolError::UnexpectedReplyLength { expected: 6, actual }.into()),
    }
}

/// Construct the codec for a detected variant.
pub fn codec_for(variant: ProtocolVariant) -> Box<dyn Codec> {
    match variant {
        ProtocolVariant::Legacy => Box::new(legacy::LegacyCodec),
        ProtocolVariant::Extended => Box::new(extended::ExtendedCodec),
    }
}

/// Pure translation between logical operations and wire frames for one
/// protocol variant.
///
/// Codecs are stateless; chip-specific inputs (chip id, erase block
/// count) come in through the [`ChipProfile`] argument where a frame
/// needs them.
pub trait Codec {
    /// The variant this codec implements.
    fn variant(&self) -> ProtocolVariant;

    /// Maximum firmware payload bytes per data frame.
    fn max_chunk(&self) -> usize {
        self.variant().max_chunk()
    }

    /// Magic identify sequence for this variant; sent after the variant
    /// is locked so the chip reports its id.
    fn identify_frame(&self) -> &'static [u8];

    /// Extract the chip id from the reply to [`Codec::identify_frame`].
    fn chip_id_from_identify(&self, reply: &[u8]) -> Result<u8, ProtocolError>;

    /// Request for the bootloader version / configuration readback.
    fn version_request(&self) -> &'static [u8];

    /// Interpret the version/configuration reply.
    fn interpret_version_reply(&self, reply: &[u8])
    -> Result<BootloaderVersion, ProtocolError>;

    /// Key-response handshake frame, derived from the configuration
    /// reply. `None` for variants without the handshake.
    fn key_frame(&self, config_reply: &[u8]) -> Option<Vec<u8>>;

    /// Full erase command sequence for the given chip, in send order.
    fn erase_frames(&self, profile: &ChipProfile) -> Vec<Vec<u8>>;

    /// Interpret the reply to erase step `step` (index into
    /// [`Codec::erase_frames`]).
    fn interpret_erase_reply(&self, step: usize, reply: &[u8]) -> Result<(), ProtocolError>;

    /// Build one write/verify data frame.
    ///
    /// `remaining` is the number of firmware bytes not yet transferred,
    /// including `chunk` itself. The chunk must not exceed
    /// [`Codec::max_chunk`]; the last frame of a transfer may be shorter.
    fn data_frame(
        &self,
        mode: DataMode,
        profile: &ChipProfile,
        address: u16,
        remaining: usize,
        chunk: &[u8],
    ) -> Vec<u8>;

    /// Interpret the reply to a data frame sent for `address`.
    fn interpret_data_reply(
        &self,
        mode: DataMode,
        reply: &[u8],
        address: u16,
    ) -> Result<(), ProtocolError>;

    /// Recover `(address, payload_len)` from a built data frame's header.
    fn parse_data_header(&self, frame: &[u8]) -> Result<(u16, usize), ProtocolError>;

    /// The status byte of a reply, if the reply is long enough to have
    /// one. Used for transcript annotation only.
    fn status_byte(&self, reply: &[u8]) -> Option<u8>;

    /// Fixed exit-bootloader sequence; fire-and-forget, no reply awaited.
    fn exit_frame(&self) -> &'static [u8];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_reply_disambiguation() {
        assert_eq!(
            variant_from_detect_reply(&[0x52, 0x11]).unwrap(),
            ProtocolVariant::Legacy
        );
        assert_eq!(
            variant_from_detect_reply(&[0x52, 0x11, 0x00, 0x00, 0x52, 0x00]).unwrap(),
            ProtocolVariant::Extended
        );
    }

    #[test]
    fn test_empty_detect_reply_is_transport_failure() {
        match variant_from_detect_reply(&[]) {
            Err(Error::Transport(TransportError::Other(_))) => {},
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[test]
    fn test_odd_detect_reply_length_is_protocol_error() {
        match variant_from_detect_reply(&[0x00; 4]) {
            Err(Error::Protocol(ProtocolError::UnexpectedReplyLength { actual: 4, .. })) => {},
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[test]
    fn test_chunk_capacities() {
        assert_eq!(ProtocolVariant::Legacy.max_chunk(), 60);
        assert_eq!(ProtocolVariant::Extended.max_chunk(), 56);
    }

    #[test]
    fn test_codec_for_matches_variant() {
        for variant in [ProtocolVariant::Legacy, ProtocolVariant::Extended] {
            assert_eq!(codec_for(variant).variant(), variant);
        }
    }
}

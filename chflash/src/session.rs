//! Bootloader session state machine.
//!
//! A [`Session`] owns one [`Transport`] exclusively and drives the
//! detect, identify, erase, write, verify, exit sequence against the
//! resident bootloader. The protocol variant and chip parameters are
//! locked in during [`Session::attach`] and never change for the
//! lifetime of the session.
//!
//! The protocol is strictly synchronous: one frame out, one frame in,
//! no pipelining and no retries. A single transport failure or negative
//! reply moves the session to [`SessionState::Failed`] and ends the run.
//!
//! ## Example
//!
//! ```rust,no_run
//! use chflash::session::Session;
//! use chflash::image::Firmware;
//! use chflash::transport::UsbTransport;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = UsbTransport::open()?;
//!     let mut session = Session::attach(transport)?;
//!     println!("found {}", session.device().profile);
//!
//!     let firmware = Firmware::from_file("firmware.bin")?;
//!     session.flash(&firmware, |current, total| {
//!         println!("{current}/{total}");
//!     })?;
//!     Ok(())
//! }
//! ```

use log::{debug, info, trace};

use crate::chip::{BootloaderVersion, ChipProfile};
use crate::error::{Error, InputError, ProtocolError, Result, TransportError};
use crate::image::Firmware;
use crate::protocol::{self, Codec, DataMode, ProtocolVariant};
use crate::transcript::{Direction, NullTranscript, TranscriptSink, TransferRecord};
use crate::transport::{MAX_TRANSFER, Transport};

/// Lifecycle of a session, advanced only by the session's operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No bootloader conversation yet.
    Unidentified,
    /// Variant locked, chip profiled, key handshake (if any) done.
    Identified,
    /// Flash erased.
    Erased,
    /// All firmware chunks programmed.
    Written,
    /// All firmware chunks verified.
    Verified,
    /// Exit command sent; device left bootloader mode.
    Exited,
    /// A step failed; terminal, no further commands are sent.
    Failed,
}

impl SessionState {
    fn name(self) -> &'static str {
        match self {
            Self::Unidentified => "unidentified",
            Self::Identified => "identified",
            Self::Erased => "erased",
            Self::Written => "written",
            Self::Verified => "verified",
            Self::Exited => "exited",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything learned about the device during identification.
///
/// Constructed once in [`Session::attach`] and immutable afterwards.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Wire protocol the resident bootloader speaks.
    pub variant: ProtocolVariant,
    /// Chip id and flash geometry.
    pub profile: ChipProfile,
    /// Resident bootloader version.
    pub version: BootloaderVersion,
}

/// Stateful orchestrator of one bootloader conversation.
pub struct Session<T: Transport> {
    transport: T,
    codec: Box<dyn Codec>,
    device: DeviceInfo,
    transcript: Box<dyn TranscriptSink>,
    state: SessionState,
}

impl<T: Transport> Session<T> {
    /// Attach to the bootloader without a transcript.
    ///
    /// Runs detection and identification; on success the session is in
    /// [`SessionState::Identified`].
    pub fn attach(transport: T) -> Result<Self> {
        Self::attach_with_transcript(transport, Box::new(NullTranscript))
    }

    /// Attach to the bootloader, recording the conversation into
    /// `transcript`.
    ///
    /// The transcript also carries the operator policy: with a real
    /// transcript attached, verify failures are collected instead of
    /// aborting and the final exit command is suppressed.
    pub fn attach_with_transcript(
        mut transport: T,
        mut transcript: Box<dyn TranscriptSink>,
    ) -> Result<Self> {
        match Self::identify(&mut transport, transcript.as_mut()) {
            Ok((codec, device)) => {
                info!(
                    "found {} with {} bootloader, version {}",
                    device.profile, device.variant, device.version
                );
                Ok(Self {
                    transport,
                    codec,
                    device,
                    transcript,
                    state: SessionState::Identified,
                })
            },
            Err(err) => {
                transcript.note_error(&err.to_string());
                Err(err)
            },
        }
    }

    /// Detect the protocol variant, read the chip profile and bootloader
    /// version, and run the key handshake where the variant requires one.
    fn identify(
        transport: &mut T,
        transcript: &mut dyn TranscriptSink,
    ) -> Result<(Box<dyn Codec>, DeviceInfo)> {
        transcript.begin_section("Bootloader detection:");

        let reply = raw_exchange(transport, transcript, None, protocol::detect_probe())?;
        let variant = protocol::variant_from_detect_reply(&reply)?;
        debug!("detect reply of {} bytes, {variant} bootloader", reply.len());

        // The probe only classifies the variant; the chip id comes from
        // the variant's own identify exchange.
        let codec = protocol::codec_for(variant);
        transcript.begin_section("Chip identification:");
        let ident = raw_exchange(
            transport,
            transcript,
            Some(codec.as_ref()),
            codec.identify_frame(),
        )?;
        let chip_id = codec.chip_id_from_identify(&ident)?;
        let profile = ChipProfile::from_chip_id(chip_id)?;

        transcript.begin_section("Config read:");
        let config = raw_exchange(
            transport,
            transcript,
            Some(codec.as_ref()),
            codec.version_request(),
        )?;
        let version = codec.interpret_version_reply(&config)?;

        if let Some(key) = codec.key_frame(&config) {
            debug!("sending key handshake");
            raw_exchange(transport, transcript, Some(codec.as_ref()), &key)?;
        }

        let device = DeviceInfo {
            variant,
            profile,
            version,
        };
        Ok((codec, device))
    }

    /// Device parameters locked in at attach time.
    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Erase the chip's flash.
    pub fn erase(&mut self) -> Result<()> {
        self.ensure_state("erase", &[SessionState::Identified])?;
        self.run_step(SessionState::Erased, |session| {
            session.transcript.begin_section("Erasing flash:");
            let frames = session.codec.erase_frames(&session.device.profile);
            for (step, frame) in frames.iter().enumerate() {
                let reply = session.exchange(frame)?;
                session.codec.interpret_erase_reply(step, &reply)?;
            }
            info!("flash erased");
            Ok(())
        })
    }

    /// Program the firmware image, chunk by chunk in increasing address
    /// order. The flash must have been erased first.
    ///
    /// `progress` receives `(bytes_done, bytes_total)` after every frame.
    pub fn write<F>(&mut self, firmware: &Firmware, mut progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        self.ensure_state("write", &[SessionState::Erased])?;
        self.check_capacity(firmware)?;
        self.run_step(SessionState::Written, |session| {
            session
                .transcript
                .begin_data_section(&format!("Writing {} bytes to flash:", firmware.len()));
            session.transfer(DataMode::Write, firmware, &mut progress)?;
            info!("wrote {} bytes", firmware.len());
            Ok(())
        })
    }

    /// Verify flash contents against the firmware image.
    ///
    /// With a transcript attached, a mismatch is recorded and the
    /// remaining addresses are still checked; the first mismatch is then
    /// reported as the error. Without one, the first mismatch aborts.
    pub fn verify<F>(&mut self, firmware: &Firmware, mut progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        // Verify also runs directly after attach, against an untouched chip.
        self.ensure_state("verify", &[SessionState::Identified, SessionState::Written])?;
        self.check_capacity(firmware)?;
        self.run_step(SessionState::Verified, |session| {
            session
                .transcript
                .begin_data_section(&format!("Verifying {} bytes of flash:", firmware.len()));
            session.transfer(DataMode::Verify, firmware, &mut progress)?;
            info!("verified {} bytes", firmware.len());
            Ok(())
        })
    }

    /// Leave bootloader mode so the programmed firmware starts.
    ///
    /// Fire-and-forget, no reply is awaited. Suppressed entirely when
    /// the transcript asks for the device to stay inspectable.
    pub fn exit_bootloader(&mut self) -> Result<()> {
        self.ensure_state(
            "exit the bootloader",
            &[
                SessionState::Identified,
                SessionState::Erased,
                SessionState::Written,
                SessionState::Verified,
            ],
        )?;
        if self.transcript.suppress_exit() {
            info!("transcript active, leaving the bootloader resident");
            self.transcript.finalize();
            return Ok(());
        }

        let frame = self.codec.exit_frame();
        match self.transport.send(frame) {
            Ok(()) => {
                self.transcript.record(&TransferRecord {
                    direction: Direction::Tx,
                    bytes: frame,
                    annotated_address: None,
                    status: None,
                });
                self.state = SessionState::Exited;
                self.transcript.finalize();
                info!("left bootloader mode");
                Ok(())
            },
            Err(err) => Err(self.fail(err.into())),
        }
    }

    /// Full flash run: erase, write, verify, then exit bootloader mode.
    pub fn flash<F>(&mut self, firmware: &Firmware, mut progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        // Catch an oversized image before the erase touches the chip.
        self.check_capacity(firmware)?;
        self.erase()?;
        self.write(firmware, &mut progress)?;
        self.verify(firmware, &mut progress)?;
        self.exit_bootloader()
    }

    /// Run one step, advancing to `on_success` or to the terminal
    /// [`SessionState::Failed`] with the error appended to the transcript.
    fn run_step(
        &mut self,
        on_success: SessionState,
        step: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()> {
        match step(self) {
            Ok(()) => {
                self.state = on_success;
                Ok(())
            },
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Reject an operation attempted from a state that does not allow it.
    ///
    /// Nothing has gone on the wire, so the state is left untouched and
    /// the session stays usable.
    fn ensure_state(&self, operation: &'static str, allowed: &[SessionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation,
                state: self.state.name(),
            })
        }
    }

    /// Check that the image fits the identified chip's flash.
    ///
    /// Also applied internally before any write or verify; callers
    /// composing their own erase/write sequence can check earlier.
    pub fn check_capacity(&self, firmware: &Firmware) -> Result<()> {
        let capacity = self.device.profile.flash_size_kb as usize * 1024;
        if firmware.len() > capacity {
            return Err(InputError::FileTooLarge {
                size: firmware.len(),
                capacity,
            }
            .into());
        }
        Ok(())
    }

    fn fail(&mut self, err: Error) -> Error {
        self.state = SessionState::Failed;
        self.transcript.note_error(&err.to_string());
        err
    }

    /// One request/reply exchange, recorded in the transcript.
    fn exchange(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        raw_exchange(
            &mut self.transport,
            self.transcript.as_mut(),
            Some(self.codec.as_ref()),
            frame,
        )
    }

    /// Stream all firmware chunks for one data mode.
    #[allow(clippy::cast_possible_truncation)]
    fn transfer<F>(&mut self, mode: DataMode, firmware: &Firmware, progress: &mut F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        let total = firmware.len();
        let max_chunk = self.codec.max_chunk();
        let mut offset = 0usize;
        let mut first_failure: Option<ProtocolError> = None;

        for chunk in firmware.as_bytes().chunks(max_chunk) {
            if crate::is_interrupt_requested() {
                return Err(Error::Interrupted);
            }

            // Offsets stay below the checked 64 KB flash capacity.
            let address = offset as u16;
            let frame =
                self.codec
                    .data_frame(mode, &self.device.profile, address, total - offset, chunk);
            trace!("{mode:?} frame at 0x{address:04x}, {} bytes", chunk.len());

            self.transport.send(&frame)?;
            let reply = self.transport.receive(MAX_TRANSFER)?;
            if reply.is_empty() {
                return Err(TransportError::Other("device returned an empty reply".into()).into());
            }

            let status = self.codec.status_byte(&reply);
            let outcome = self.codec.interpret_data_reply(mode, &reply, address);
            self.transcript
                .data_exchange(address, &frame, status, outcome.is_ok());

            match outcome {
                Ok(()) => {},
                Err(err @ ProtocolError::VerifyFailed { .. })
                    if self.transcript.continue_on_verify_error() =>
                {
                    debug!("{err}, continuing for a complete diagnostic map");
                    if first_failure.is_none() {
                        first_failure = Some(err);
                    }
                },
                Err(err) => return Err(err.into()),
            }

            offset += chunk.len();
            progress(offset, total);
        }

        match first_failure {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

/// Exchange usable before a [`Session`] exists (during identification).
///
/// `codec` is only consulted for transcript status annotation and is
/// absent for the very first probe, when no variant is locked yet.
fn raw_exchange<T: Transport>(
    transport: &mut T,
    transcript: &mut dyn TranscriptSink,
    codec: Option<&dyn Codec>,
    frame: &[u8],
) -> Result<Vec<u8>> {
    if crate::is_interrupt_requested() {
        return Err(Error::Interrupted);
    }

    transport.send(frame)?;
    transcript.record(&TransferRecord {
        direction: Direction::Tx,
        bytes: frame,
        annotated_address: None,
        status: None,
    });

    let reply = transport.receive(MAX_TRANSFER)?;
    if reply.is_empty() {
        return Err(TransportError::Other("device returned an empty reply".into()).into());
    }
    transcript.record(&TransferRecord {
        direction: Direction::Rx,
        bytes: &reply,
        annotated_address: None,
        status: codec.and_then(|codec| codec.status_byte(&reply)),
    });

    Ok(reply)
}

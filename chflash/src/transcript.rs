//! Transcript logging of the USB conversation.
//!
//! A transcript sink observes every request/reply pair for diagnostics.
//! Beyond recording, the sink is also the strategy object for the two
//! operator-facing policy decisions that depend on whether logging is
//! active:
//!
//! - with a transcript attached, a verify failure is recorded and the
//!   remaining addresses are still checked, producing a complete
//!   diagnostic map instead of aborting at the first mismatch;
//! - with a transcript attached, the final exit-bootloader command is
//!   suppressed so the device stays inspectable.
//!
//! [`NullTranscript`] gives the strict no-logging behavior,
//! [`FileTranscript`] the diagnostic behavior with the plain-text log
//! format.

use {
    crate::transport::MAX_TRANSFER,
    log::warn,
    std::{
        fmt::Write as _,
        fs::File,
        io::{self, BufWriter, Write},
        path::Path,
        time::SystemTime,
    },
};

/// Row of dashes delimiting transcript sections and error banners.
pub const SEPARATOR: &str =
    "-----------------------------------------------------------------------------------------";

/// Transfer direction of a recorded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to device.
    Tx,
    /// Device to host.
    Rx,
}

/// One transport call as seen by the transcript.
#[derive(Debug, Clone, Copy)]
pub struct TransferRecord<'a> {
    /// Transfer direction.
    pub direction: Direction,
    /// Raw frame bytes.
    pub bytes: &'a [u8],
    /// Flash address the frame refers to, when it is a data frame.
    pub annotated_address: Option<u16>,
    /// Reply status byte, when the frame carries one.
    pub status: Option<u8>,
}

/// Observer and policy strategy for a bootloader session.
///
/// All recording methods default to no-ops so policy-only
/// implementations stay small.
pub trait TranscriptSink {
    /// Start a named section of the conversation (e.g. "Erasing flash:").
    fn begin_section(&mut self, _title: &str) {}

    /// Start a write/verify section. The compact OK/ERR rows that follow
    /// share one column key, emitted here rather than per frame.
    fn begin_data_section(&mut self, _title: &str) {}

    /// Record one transport call.
    fn record(&mut self, _record: &TransferRecord<'_>) {}

    /// Record one write/verify data exchange as a compact OK/ERR row.
    fn data_exchange(&mut self, _address: u16, _tx: &[u8], _status: Option<u8>, _ok: bool) {}

    /// Append a fatal error message before the transcript is closed.
    fn note_error(&mut self, _message: &str) {}

    /// Flush buffered output; called on every session exit path.
    fn finalize(&mut self) {}

    /// Whether verify failures are recorded and iteration continues.
    fn continue_on_verify_error(&self) -> bool {
        false
    }

    /// Whether the final exit-bootloader command is suppressed.
    fn suppress_exit(&self) -> bool {
        false
    }
}

/// Sink for running without a transcript: records nothing, first verify
/// failure aborts, exit command is sent.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTranscript;

impl TranscriptSink for NullTranscript {}

/// Plain-text transcript writer.
///
/// Layout (one exchange):
///
/// ```text
/// add= 00|01|02|03|...
/// tx = a1:12:00:52:...
/// rx = 52:11:00:00:59:00
/// ```
///
/// Data-phase exchanges are compacted to one row per frame:
///
/// ```text
/// 0x0150:OK :a5:3d:00:50:01:...
/// ```
pub struct FileTranscript<W: Write> {
    out: W,
}

impl FileTranscript<BufWriter<File>> {
    /// Create a transcript file at `path`, truncating any existing file.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file))
    }
}

impl<W: Write> FileTranscript<W> {
    /// Wrap a writer and emit the timestamped header.
    pub fn new(mut out: W) -> io::Result<Self> {
        writeln!(out, "{SEPARATOR}")?;
        writeln!(out, "{}", humantime::format_rfc3339_seconds(SystemTime::now()))?;
        writeln!(out, "{SEPARATOR}")?;
        Ok(Self { out })
    }

    /// The wrapped writer, for inspection in tests.
    pub fn inner(&self) -> &W {
        &self.out
    }

    fn write_line(&mut self, line: &str) {
        if let Err(err) = writeln!(self.out, "{line}") {
            warn!("transcript write failed: {err}");
        }
    }
}

/// Render bytes as colon-separated hex, the transcript's byte format.
fn hex_row(bytes: &[u8]) -> String {
    let mut row = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            row.push(':');
        }
        let _ = write!(row, "{byte:02x}");
    }
    row
}

/// Render the column-offset header row for a frame of `len` bytes.
fn offset_row(len: usize) -> String {
    let mut row = String::from("add= ");
    for i in 0..len {
        if i > 0 {
            row.push('|');
        }
        let _ = write!(row, "{i:02x}");
    }
    row
}

impl<W: Write> TranscriptSink for FileTranscript<W> {
    fn begin_section(&mut self, title: &str) {
        self.write_line(SEPARATOR);
        self.write_line(title);
    }

    fn begin_data_section(&mut self, title: &str) {
        self.write_line(SEPARATOR);
        self.write_line(title);
        self.write_line(&offset_row(MAX_TRANSFER));
    }

    fn record(&mut self, record: &TransferRecord<'_>) {
        match record.direction {
            Direction::Tx => {
                self.write_line(&offset_row(record.bytes.len()));
                self.write_line(&format!("tx = {}", hex_row(record.bytes)));
            },
            Direction::Rx => {
                self.write_line(&format!("rx = {}", hex_row(record.bytes)));
            },
        }
    }

    fn data_exchange(&mut self, address: u16, tx: &[u8], _status: Option<u8>, ok: bool) {
        let marker = if ok { "OK " } else { "ERR" };
        self.write_line(&format!("0x{address:04x}:{marker}:{}", hex_row(tx)));
    }

    fn note_error(&mut self, message: &str) {
        self.write_line(SEPARATOR);
        self.write_line(message);
        self.finalize();
    }

    fn finalize(&mut self) {
        if let Err(err) = self.out.flush() {
            warn!("transcript flush failed: {err}");
        }
    }

    fn continue_on_verify_error(&self) -> bool {
        true
    }

    fn suppress_exit(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript() -> FileTranscript<Vec<u8>> {
        FileTranscript::new(Vec::new()).unwrap()
    }

    fn contents(transcript: &FileTranscript<Vec<u8>>) -> String {
        String::from_utf8(transcript.inner().clone()).unwrap()
    }

    #[test]
    fn test_header_has_separators_and_timestamp() {
        let transcript = transcript();
        let text = contents(&transcript);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], SEPARATOR);
        assert_eq!(lines[2], SEPARATOR);
        // RFC 3339 timestamp in the middle row.
        assert!(lines[1].contains('T') && lines[1].ends_with('Z'));
    }

    #[test]
    fn test_records_tx_and_rx_rows() {
        let mut transcript = transcript();
        transcript.begin_section("Chip identification:");
        transcript.record(&TransferRecord {
            direction: Direction::Tx,
            bytes: &[0xa1, 0x12, 0x00],
            annotated_address: None,
            status: None,
        });
        transcript.record(&TransferRecord {
            direction: Direction::Rx,
            bytes: &[0x52, 0x11],
            annotated_address: None,
            status: None,
        });

        let text = contents(&transcript);
        assert!(text.contains("Chip identification:"));
        assert!(text.contains("add= 00|01|02"));
        assert!(text.contains("tx = a1:12:00"));
        assert!(text.contains("rx = 52:11"));
    }

    #[test]
    fn test_data_section_leads_with_offset_header() {
        let mut transcript = transcript();
        transcript.begin_data_section("Writing 300 bytes to flash:");
        transcript.data_exchange(0x0000, &[0xa5, 0x3d], Some(0x00), true);

        let text = contents(&transcript);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[4], "Writing 300 bytes to flash:");
        assert!(lines[5].starts_with("add= 00|01|"));
        assert!(lines[5].ends_with("|3f"));
        assert!(lines[6].starts_with("0x0000:OK "));
    }

    #[test]
    fn test_data_exchange_rows_mark_ok_and_err() {
        let mut transcript = transcript();
        transcript.data_exchange(0x0000, &[0xa5, 0x3d], Some(0x00), true);
        transcript.data_exchange(0x0150, &[0xa6, 0x3d], Some(0xf5), false);

        let text = contents(&transcript);
        assert!(text.contains("0x0000:OK :a5:3d"));
        assert!(text.contains("0x0150:ERR:a6:3d"));
    }

    #[test]
    fn test_note_error_appends_banner() {
        let mut transcript = transcript();
        transcript.note_error("verify failed at address 0x0150");

        let text = contents(&transcript);
        assert!(text.ends_with("verify failed at address 0x0150\n"));
    }

    #[test]
    fn test_policy_asymmetry() {
        let with_log = transcript();
        assert!(with_log.continue_on_verify_error());
        assert!(with_log.suppress_exit());

        let without = NullTranscript;
        assert!(!without.continue_on_verify_error());
        assert!(!without.suppress_exit());
    }
}

//! Firmware image header gate.
//!
//! ```text
//! 0        24       32                                          288
//! ├────────┼────────┼───────────────────────────────────────────┤
//! │ image  │segment │ application descriptor (256 bytes)        │
//! │ header │ header │ magic · version · project name · ...      │
//! └────────┴────────┴───────────────────────────────────────────┘
//! ```
//!
//! Decrypted bytes are held back until the first 288 are available, then
//! the header is checked once and everything staged so far is released to
//! the sink.  Later bytes pass straight through.

use log::{error, info};

use super::{FirmwareSink, OtaError};

/// First byte of every image.
pub const IMAGE_MAGIC: u8 = 0xE9;
/// First word of the application descriptor.
pub const APP_DESC_MAGIC: u32 = 0xABCD_5432;

pub const IMAGE_HEADER_LEN: usize = 24;
pub const SEGMENT_HEADER_LEN: usize = 8;
pub const APP_DESC_OFFSET: usize = IMAGE_HEADER_LEN + SEGMENT_HEADER_LEN;
pub const APP_DESC_LEN: usize = 256;
/// Bytes needed before the header can be checked.
pub const HEADER_GATE_LEN: usize = APP_DESC_OFFSET + APP_DESC_LEN;

const VERSION_OFFSET: usize = 16;
const PROJECT_NAME_OFFSET: usize = 48;
const NAME_FIELD_LEN: usize = 32;

/// Fields of the application descriptor that are checked or logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDescriptor {
    pub version: heapless::String<NAME_FIELD_LEN>,
    pub project_name: heapless::String<NAME_FIELD_LEN>,
}

/// Parse the descriptor out of the first [`HEADER_GATE_LEN`] bytes.
pub fn parse_header(image: &[u8]) -> Result<AppDescriptor, OtaError> {
    if image.len() < HEADER_GATE_LEN {
        return Err(OtaError::HeaderRejected);
    }
    if image[0] != IMAGE_MAGIC {
        error!("Image magic 0x{:02x} != 0x{:02x}", image[0], IMAGE_MAGIC);
        return Err(OtaError::HeaderRejected);
    }
    let desc = &image[APP_DESC_OFFSET..HEADER_GATE_LEN];
    let magic = u32::from_le_bytes([desc[0], desc[1], desc[2], desc[3]]);
    if magic != APP_DESC_MAGIC {
        error!("App descriptor magic 0x{:08x} != 0x{:08x}", magic, APP_DESC_MAGIC);
        return Err(OtaError::HeaderRejected);
    }
    Ok(AppDescriptor {
        version: c_field(&desc[VERSION_OFFSET..VERSION_OFFSET + NAME_FIELD_LEN])?,
        project_name: c_field(&desc[PROJECT_NAME_OFFSET..PROJECT_NAME_OFFSET + NAME_FIELD_LEN])?,
    })
}

/// NUL-padded fixed-width string field.
fn c_field(raw: &[u8]) -> Result<heapless::String<NAME_FIELD_LEN>, OtaError> {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    let s = core::str::from_utf8(&raw[..end]).map_err(|_| OtaError::HeaderRejected)?;
    heapless::String::try_from(s).map_err(|_| OtaError::HeaderRejected)
}

/// Stages plaintext until the header has been validated.
pub struct HeaderGate<'a> {
    expected_project: &'a str,
    staged: Vec<u8>,
    checked: bool,
}

impl<'a> HeaderGate<'a> {
    pub fn new(expected_project: &'a str) -> Self {
        Self {
            expected_project,
            staged: Vec::with_capacity(HEADER_GATE_LEN),
            checked: false,
        }
    }

    pub fn is_checked(&self) -> bool {
        self.checked
    }

    /// Feed decrypted bytes.  Writes to `sink` only once the header passed.
    pub fn process(&mut self, plaintext: &[u8], sink: &mut dyn FirmwareSink) -> Result<(), OtaError> {
        if self.checked {
            return sink.write(plaintext);
        }
        self.staged.extend_from_slice(plaintext);
        if self.staged.len() < HEADER_GATE_LEN {
            info!(
                "Header deferred ({}/{} bytes)",
                self.staged.len(),
                HEADER_GATE_LEN
            );
            return Ok(());
        }

        let desc = parse_header(&self.staged)?;
        if desc.project_name != self.expected_project {
            error!(
                "Image is for project '{}', running '{}'",
                desc.project_name, self.expected_project
            );
            return Err(OtaError::HeaderRejected);
        }
        info!("New firmware version: {}", desc.version);
        self.checked = true;

        let staged = core::mem::take(&mut self.staged);
        sink.write(&staged)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Plaintext image prefix with a valid header for `project`.
    pub(crate) fn header(project: &str, version: &str) -> Vec<u8> {
        let mut img = vec![0u8; HEADER_GATE_LEN];
        img[0] = IMAGE_MAGIC;
        img[APP_DESC_OFFSET..APP_DESC_OFFSET + 4].copy_from_slice(&APP_DESC_MAGIC.to_le_bytes());
        let v = APP_DESC_OFFSET + VERSION_OFFSET;
        img[v..v + version.len()].copy_from_slice(version.as_bytes());
        let p = APP_DESC_OFFSET + PROJECT_NAME_OFFSET;
        img[p..p + project.len()].copy_from_slice(project.as_bytes());
        img
    }

    #[derive(Default)]
    struct VecSink(Vec<u8>);

    impl FirmwareSink for VecSink {
        fn running_project(&self) -> heapless::String<32> {
            heapless::String::new()
        }
        fn begin(&mut self) -> Result<(), OtaError> {
            Ok(())
        }
        fn write(&mut self, data: &[u8]) -> Result<(), OtaError> {
            self.0.extend_from_slice(data);
            Ok(())
        }
        fn finalize(&mut self) -> Result<(), OtaError> {
            Ok(())
        }
        fn abort(&mut self) {}
    }

    #[test]
    fn parses_descriptor() {
        let d = parse_header(&header("thingcore", "0.3.0")).unwrap();
        assert_eq!(d.project_name.as_str(), "thingcore");
        assert_eq!(d.version.as_str(), "0.3.0");
    }

    #[test]
    fn rejects_bad_magics() {
        let mut img = header("thingcore", "1");
        img[0] = 0;
        assert_eq!(parse_header(&img), Err(OtaError::HeaderRejected));

        let mut img = header("thingcore", "1");
        img[APP_DESC_OFFSET] ^= 0xFF;
        assert_eq!(parse_header(&img), Err(OtaError::HeaderRejected));
    }

    #[test]
    fn short_first_chunk_defers_check() {
        let img = header("thingcore", "1");
        let mut gate = HeaderGate::new("thingcore");
        let mut sink = VecSink::default();

        gate.process(&img[..100], &mut sink).unwrap();
        assert!(!gate.is_checked());
        assert!(sink.0.is_empty());

        gate.process(&img[100..], &mut sink).unwrap();
        assert!(gate.is_checked());
        assert_eq!(sink.0, img);

        gate.process(b"tail", &mut sink).unwrap();
        assert!(sink.0.ends_with(b"tail"));
    }

    #[test]
    fn foreign_project_rejected_before_any_write() {
        let img = header("other", "1");
        let mut gate = HeaderGate::new("thingcore");
        let mut sink = VecSink::default();
        assert_eq!(gate.process(&img, &mut sink), Err(OtaError::HeaderRejected));
        assert!(sink.0.is_empty());
    }
}

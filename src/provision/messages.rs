//! Provisioning wire documents.
//!
//! Inbound (companion → device, decrypted):
//!
//! ```json
//! { "type": "wifi_credentials", "ssid": "...", "password": "..." }
//! { "type": "aws_root_ca" | "aws_thing_certificate" | "aws_thing_key",
//!   "row": "...", "ready": 0 | 1 }
//! ```
//!
//! Outbound notifications (device → companion, plaintext):
//!
//! ```json
//! { "type": "provision", "status": "progress" | "done" | "fail" }
//! { "type": "wifi_scan", "ssid": "...", "rssi": -40, "count": 0 }
//! ```

use serde::{Deserialize, Serialize};

use super::ProvisionError;
use crate::app::ports::AccessPoint;
use crate::secrets::Blob;

pub const TYPE_WIFI_CREDENTIALS: &str = "wifi_credentials";

/// `type` tag of the chunk document for each blob.
pub const fn chunk_type(blob: Blob) -> &'static str {
    match blob {
        Blob::RootCa => "aws_root_ca",
        Blob::ThingCert => "aws_thing_certificate",
        Blob::ThingKey => "aws_thing_key",
    }
}

// ── Inbound ──────────────────────────────────────────────────

#[derive(Deserialize)]
struct TypeTag {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
pub struct WifiCredentialsDoc {
    pub ssid: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct ChunkDoc {
    pub row: String,
    pub ready: i64,
}

impl ChunkDoc {
    pub fn is_last(&self) -> bool {
        self.ready != 0
    }
}

/// Decrypted payloads may be NUL-terminated by the sender.
fn trim_nul(plaintext: &[u8]) -> &[u8] {
    let end = plaintext
        .iter()
        .rposition(|b| *b != 0)
        .map_or(0, |i| i + 1);
    &plaintext[..end]
}

/// Check the `type` tag, then decode the full document.
fn parse_tagged<'a, T: Deserialize<'a>>(
    plaintext: &'a [u8],
    expected: &str,
) -> Result<T, ProvisionError> {
    let json = trim_nul(plaintext);
    let tag: TypeTag = serde_json::from_slice(json).map_err(|_| ProvisionError::MalformedJson)?;
    if tag.kind != expected {
        return Err(ProvisionError::WrongType);
    }
    serde_json::from_slice(json).map_err(|_| ProvisionError::MissingField)
}

pub fn parse_wifi_credentials(plaintext: &[u8]) -> Result<WifiCredentialsDoc, ProvisionError> {
    parse_tagged(plaintext, TYPE_WIFI_CREDENTIALS)
}

pub fn parse_chunk(plaintext: &[u8], blob: Blob) -> Result<ChunkDoc, ProvisionError> {
    parse_tagged(plaintext, chunk_type(blob))
}

// ── Outbound ─────────────────────────────────────────────────

/// Status carried by a `provision` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionStatus {
    Progress,
    Done,
    Fail,
}

#[derive(Serialize)]
struct StatusMessage {
    #[serde(rename = "type")]
    kind: &'static str,
    status: ProvisionStatus,
}

#[derive(Serialize)]
struct ScanMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    ssid: &'a str,
    rssi: i8,
    count: usize,
}

pub fn status_message(status: ProvisionStatus) -> Result<Vec<u8>, ProvisionError> {
    serde_json::to_vec(&StatusMessage {
        kind: "provision",
        status,
    })
    .map_err(|_| ProvisionError::Encode)
}

/// One scan result; `remaining` is how many more follow.
pub fn scan_message(ap: &AccessPoint, remaining: usize) -> Result<Vec<u8>, ProvisionError> {
    serde_json::to_vec(&ScanMessage {
        kind: "wifi_scan",
        ssid: ap.ssid.as_str(),
        rssi: ap.rssi,
        count: remaining,
    })
    .map_err(|_| ProvisionError::Encode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_message_shape() {
        let m = status_message(ProvisionStatus::Progress).unwrap();
        assert_eq!(m, br#"{"type":"provision","status":"progress"}"#);
        let m = status_message(ProvisionStatus::Fail).unwrap();
        assert_eq!(m, br#"{"type":"provision","status":"fail"}"#);
    }

    #[test]
    fn scan_message_shape() {
        let ap = AccessPoint {
            ssid: heapless::String::try_from("home-5g").unwrap(),
            rssi: -42,
        };
        let m = scan_message(&ap, 0).unwrap();
        assert_eq!(
            m,
            br#"{"type":"wifi_scan","ssid":"home-5g","rssi":-42,"count":0}"#
        );
    }

    #[test]
    fn wifi_credentials_parse() {
        let doc = parse_wifi_credentials(
            br#"{"type":"wifi_credentials","ssid":"a","password":"b"}"#,
        )
        .unwrap();
        assert_eq!(doc.ssid, "a");
        assert_eq!(doc.password, "b");
    }

    #[test]
    fn trailing_nul_is_ignored() {
        let mut raw = br#"{"type":"aws_root_ca","row":"r","ready":1}"#.to_vec();
        raw.extend_from_slice(&[0, 0]);
        assert!(parse_chunk(&raw, Blob::RootCa).unwrap().is_last());
    }

    #[test]
    fn wrong_type_and_missing_fields() {
        assert_eq!(
            parse_chunk(br#"{"type":"aws_root_ca","row":"r","ready":0}"#, Blob::ThingKey).err(),
            Some(ProvisionError::WrongType)
        );
        assert_eq!(
            parse_chunk(br#"{"type":"aws_thing_key","ready":0}"#, Blob::ThingKey).err(),
            Some(ProvisionError::MissingField)
        );
        assert_eq!(
            parse_wifi_credentials(br#"{"type":"wifi_credentials","ssid":1,"password":"b"}"#)
                .err(),
            Some(ProvisionError::MissingField)
        );
        assert_eq!(
            parse_wifi_credentials(b"not json").err(),
            Some(ProvisionError::MalformedJson)
        );
    }
}

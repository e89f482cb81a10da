//! Session description codec.
//!
//! Signals travel by copy/paste, so the parser has to tell the user precisely what went
//! wrong with what they pasted: nothing at all, text that is not JSON, or JSON that lacks
//! the fields a description needs. Two text forms are accepted:
//!
//! * plain JSON: `{"type":"offer","sdp":"v=0...","id":"...","ts":1700000000}`
//! * compact: the same JSON gzip-compressed and base64-encoded
//!
//! `id` and `ts` are informational and optional on input.

use crate::error::SignalError;
use crate::utils::random_id;
use base64::{engine::general_purpose, Engine as _};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{Read, Write};

/// Upper bound on an inflated compact signal, against zip bombs.
const MAX_DECOMPRESSED_SIZE: u64 = 256 * 1024;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpKind::Offer => f.write_str("offer"),
            SdpKind::Answer => f.write_str("answer"),
        }
    }
}

/// An offer or answer, final once the producing side finished ICE gathering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
    pub id: Option<String>,
    pub ts: Option<i64>,
}

impl SessionDescription {
    pub fn new(kind: SdpKind, sdp: impl Into<String>) -> Self {
        Self {
            kind,
            sdp: sdp.into(),
            id: None,
            ts: None,
        }
    }

    /// Stamps a fresh session id and the current time, keeping an existing id.
    pub fn stamped(mut self, id: Option<String>) -> Self {
        self.id = Some(id.or(self.id).unwrap_or_else(random_id));
        self.ts = Some(chrono::Utc::now().timestamp());
        self
    }

    pub fn encode(&self) -> String {
        let mut obj = serde_json::Map::new();
        obj.insert("type".into(), Value::String(self.kind.to_string()));
        obj.insert("sdp".into(), Value::String(self.sdp.clone()));
        if let Some(id) = &self.id {
            obj.insert("id".into(), Value::String(id.clone()));
        }
        if let Some(ts) = self.ts {
            obj.insert("ts".into(), Value::from(ts));
        }
        Value::Object(obj).to_string()
    }

    /// JSON -> gzip -> base64, for channels that mangle long JSON.
    pub fn encode_compact(&self) -> std::io::Result<String> {
        let mut gz = GzEncoder::new(Vec::new(), Compression::fast());
        gz.write_all(self.encode().as_bytes())?;
        let compressed = gz.finish()?;
        Ok(general_purpose::STANDARD.encode(compressed))
    }

    pub fn parse(text: &str) -> Result<Self, SignalError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(SignalError::Empty);
        }

        let json = if trimmed.starts_with('{') {
            trimmed.to_owned()
        } else {
            decompress(trimmed)?
        };

        let value: Value =
            serde_json::from_str(&json).map_err(|e| SignalError::MalformedJson(e.to_string()))?;
        let obj = value
            .as_object()
            .ok_or(SignalError::MissingFields("expected a JSON object"))?;

        let kind = match obj.get("type").and_then(Value::as_str) {
            Some("offer") => SdpKind::Offer,
            Some("answer") => SdpKind::Answer,
            _ => return Err(SignalError::MissingFields("type must be \"offer\" or \"answer\"")),
        };
        let sdp = match obj.get("sdp").and_then(Value::as_str) {
            Some(sdp) if !sdp.trim().is_empty() => sdp.to_owned(),
            _ => return Err(SignalError::MissingFields("sdp")),
        };

        Ok(Self {
            kind,
            sdp,
            id: obj.get("id").and_then(Value::as_str).map(str::to_owned),
            ts: obj.get("ts").and_then(Value::as_i64),
        })
    }
}

fn decompress(text: &str) -> Result<String, SignalError> {
    let compressed = general_purpose::STANDARD
        .decode(text)
        .map_err(|_| SignalError::MalformedJson("not JSON and not a compact signal".into()))?;

    let gz = GzDecoder::new(&compressed[..]);
    let mut json = String::new();
    gz.take(MAX_DECOMPRESSED_SIZE)
        .read_to_string(&mut json)
        .map_err(|e| SignalError::MalformedJson(format!("compact signal: {e}")))?;
    Ok(json)
}

fn fingerprint_lines(sdp: &str) -> Vec<&str> {
    sdp.lines()
        .map(str::trim)
        .filter(|l| l.starts_with("a=fingerprint:"))
        .collect()
}

/// Short verification code both users can compare out loud.
///
/// Derived from the DTLS certificate fingerprints of both descriptions, so it is the
/// same on both sides and changes if anyone in the copy/paste path swapped a signal.
pub fn fingerprint(local: &SessionDescription, remote: &SessionDescription) -> Option<String> {
    let mut lines = fingerprint_lines(&local.sdp);
    let theirs = fingerprint_lines(&remote.sdp);
    if lines.is_empty() || theirs.is_empty() {
        return None;
    }
    lines.extend(theirs);
    lines.sort_unstable();

    let digest = Sha256::digest(lines.join("\n").as_bytes());
    Some(hex::encode(&digest[..6]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_reported_as_empty() {
        assert_eq!(SessionDescription::parse(""), Err(SignalError::Empty));
        assert_eq!(SessionDescription::parse("  \n\t"), Err(SignalError::Empty));
    }

    #[test]
    fn broken_json_is_malformed() {
        assert!(matches!(
            SessionDescription::parse("{not json"),
            Err(SignalError::MalformedJson(_))
        ));
        assert!(matches!(
            SessionDescription::parse("hello there"),
            Err(SignalError::MalformedJson(_))
        ));
    }

    #[test]
    fn missing_or_wrong_fields() {
        assert!(matches!(
            SessionDescription::parse(r#"{"type":"offer"}"#),
            Err(SignalError::MissingFields("sdp"))
        ));
        assert!(matches!(
            SessionDescription::parse(r#"{"type":"offer","sdp":"   "}"#),
            Err(SignalError::MissingFields("sdp"))
        ));
        assert!(matches!(
            SessionDescription::parse(r#"{"type":"pranswer","sdp":"v=0"}"#),
            Err(SignalError::MissingFields(_))
        ));
        assert!(matches!(
            SessionDescription::parse(r#"{"sdp":"v=0"}"#),
            Err(SignalError::MissingFields(_))
        ));
        assert!(matches!(
            SessionDescription::parse(r#"{"type":"OFFER","sdp":"v=0"}"#),
            Err(SignalError::MissingFields(_))
        ));
    }

    #[test]
    fn minimal_offer_is_accepted() {
        let d = SessionDescription::parse(r#"{"type":"offer","sdp":"v=0..."}"#).unwrap();
        assert_eq!(d.kind, SdpKind::Offer);
        assert_eq!(d.sdp, "v=0...");
        assert_eq!(d.id, None);
    }

    #[test]
    fn encode_then_parse_keeps_metadata() {
        let d = SessionDescription::new(SdpKind::Answer, "v=0\r\na=x\r\n").stamped(Some("abc".into()));
        let back = SessionDescription::parse(&d.encode()).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn compact_form_is_accepted() {
        let d = SessionDescription::new(SdpKind::Offer, "v=0\r\n".repeat(50));
        let compact = d.encode_compact().unwrap();
        assert!(!compact.starts_with('{'));
        assert_eq!(SessionDescription::parse(&compact).unwrap(), d);
    }

    #[test]
    fn base64_of_garbage_is_malformed() {
        let not_gzip = general_purpose::STANDARD.encode(b"plain bytes");
        assert!(matches!(
            SessionDescription::parse(&not_gzip),
            Err(SignalError::MalformedJson(_))
        ));
    }

    #[test]
    fn fingerprint_is_symmetric() {
        let a = SessionDescription::new(SdpKind::Offer, "v=0\r\na=fingerprint:sha-256 AA:BB\r\n");
        let b = SessionDescription::new(SdpKind::Answer, "v=0\r\na=fingerprint:sha-256 CC:DD\r\n");
        let ab = fingerprint(&a, &b).unwrap();
        assert_eq!(ab.len(), 12);
        assert_eq!(Some(ab), fingerprint(&b, &a));

        let c = SessionDescription::new(SdpKind::Answer, "v=0\r\na=fingerprint:sha-256 EE:FF\r\n");
        assert_ne!(fingerprint(&a, &b), fingerprint(&a, &c));
        assert_eq!(fingerprint(&a, &SessionDescription::new(SdpKind::Answer, "v=0")), None);
    }
}

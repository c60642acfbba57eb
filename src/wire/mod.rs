//! # Link wire format
//!
//! Every frame on the serial link is one newline-terminated ASCII line:
//!
//! ```text
//! TEL:lat,lon,alt_rel,groundspeed,heading,voltage,battery_remaining,fix_type,satellites,mode,armed
//! DET:class,confidence,track_id,lat,lon,alt
//! STS:recording,fps,active_tracks,model_name,confidence,image_size,inference_ms,cpu_temp
//! CMD:NAME | CMD:NAME:ARG            ground -> host
//! AP:ssid,password                   field unit -> host
//! WIFI:host_ip,hostname,port         host -> field unit
//! IMG:chunk_index:total_chunks:hex   host -> field unit
//! ```
//!
//! Any received line may carry a trailing `RSSI:<int>` token appended by the
//! field unit firmware.
//!
//! Encoders are deterministic and lossy: fixed decimal precision and fixed
//! field order. Free-text fields are scrubbed of separators and capped in
//! length so a line can never outgrow the radio payload.

pub mod frames;
pub mod image;

use crate::error::WireError;

pub use frames::{DetectionFrame, StatusFrame, TelemetryFrame};
pub use image::{ImageAssembler, ImageChunk, ImageTransferJob};

pub const TEL_PREFIX: &str = "TEL:";
pub const DET_PREFIX: &str = "DET:";
pub const STS_PREFIX: &str = "STS:";
pub const CMD_PREFIX: &str = "CMD:";
pub const AP_PREFIX: &str = "AP:";
pub const WIFI_PREFIX: &str = "WIFI:";
pub const RSSI_MARKER: &str = "RSSI:";

/// Replace field/record separators and control bytes, then cap the byte length.
pub(crate) fn scrub_field(value: &str, max_bytes: usize) -> String {
    let mut out = String::with_capacity(value.len().min(max_bytes));
    for ch in value.trim().chars() {
        let ch = match ch {
            ',' | ':' => '_',
            c if c.is_control() => '_',
            c if !c.is_ascii() => '?',
            c => c,
        };
        if out.len() + ch.len_utf8() > max_bytes {
            break;
        }
        out.push(ch);
    }
    out
}

/// Ground-originated command, parsed once right after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    StartRecording,
    StopRecording,
    SetConfidence(f32),
    SetImageSize(u32),
    SetModel(String),
    RequestThumbnail(u64),
    /// Recognized name with an argument that does not parse.
    Malformed { name: String, arg: String },
    Unknown(String),
}

impl Command {
    /// Parse a stripped command body (`NAME` or `NAME:ARG`).
    pub fn parse(body: &str) -> Self {
        let body = body.trim();
        let (name, arg) = match body.split_once(':') {
            Some((n, a)) => (n.trim(), Some(a.trim())),
            None => (body, None),
        };
        let malformed = |arg: &str| Command::Malformed {
            name: name.to_string(),
            arg: arg.to_string(),
        };
        match (name, arg) {
            ("REC_START", None) => Command::StartRecording,
            ("REC_STOP", None) => Command::StopRecording,
            ("SET_CONF", Some(a)) => match a.parse::<f32>() {
                Ok(v) if v.is_finite() => Command::SetConfidence(v),
                _ => malformed(a),
            },
            ("SET_IMGSZ", Some(a)) => a
                .parse::<u32>()
                .map(Command::SetImageSize)
                .unwrap_or_else(|_| malformed(a)),
            ("SET_MODEL", Some(a)) if !a.is_empty() && !a.contains(['/', '\\']) => {
                Command::SetModel(a.to_string())
            }
            ("SET_MODEL", Some(a)) => malformed(a),
            ("GET_IMG", Some(a)) => a
                .parse::<u64>()
                .map(Command::RequestThumbnail)
                .unwrap_or_else(|_| malformed(a)),
            _ => Command::Unknown(body.to_string()),
        }
    }

    /// Encode as a ground station would send it.
    pub fn encode(&self) -> String {
        match self {
            Command::StartRecording => format!("{CMD_PREFIX}REC_START"),
            Command::StopRecording => format!("{CMD_PREFIX}REC_STOP"),
            Command::SetConfidence(v) => format!("{CMD_PREFIX}SET_CONF:{v}"),
            Command::SetImageSize(v) => format!("{CMD_PREFIX}SET_IMGSZ:{v}"),
            Command::SetModel(name) => format!("{CMD_PREFIX}SET_MODEL:{name}"),
            Command::RequestThumbnail(id) => format!("{CMD_PREFIX}GET_IMG:{id}"),
            Command::Malformed { name, arg } => format!("{CMD_PREFIX}{name}:{arg}"),
            Command::Unknown(raw) => format!("{CMD_PREFIX}{raw}"),
        }
    }
}

/// Access point credentials announced by the field unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApCredentials {
    pub ssid: String,
    pub password: String,
}

impl ApCredentials {
    /// Parse the body of an `AP:` line (`ssid,password[,extra...]`).
    pub fn parse(body: &str) -> Result<Self, WireError> {
        let mut parts = body.trim().split(',');
        let ssid = parts.next().unwrap_or_default().trim();
        let password = parts.next().ok_or(WireError::FieldCount {
            frame: "AP",
            expected: 2,
            found: 1,
        })?;
        if ssid.is_empty() {
            return Err(WireError::Field {
                frame: "AP",
                field: "ssid",
                value: String::new(),
            });
        }
        Ok(Self {
            ssid: ssid.to_string(),
            password: password.trim().to_string(),
        })
    }
}

/// Host reachability announcement sent back to the field unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiAnnounce {
    pub address: String,
    pub hostname: String,
    pub port: u16,
}

impl WifiAnnounce {
    pub fn encode(&self) -> String {
        format!(
            "{WIFI_PREFIX}{},{},{}",
            scrub_field(&self.address, 45),
            scrub_field(&self.hostname, 63),
            self.port
        )
    }

    pub fn decode(line: &str) -> Result<Self, WireError> {
        let body = line.strip_prefix(WIFI_PREFIX).ok_or(WireError::Prefix {
            expected: WIFI_PREFIX,
        })?;
        let parts: Vec<&str> = body.split(',').collect();
        if parts.len() != 3 {
            return Err(WireError::FieldCount {
                frame: "WIFI",
                expected: 3,
                found: parts.len(),
            });
        }
        let port = parts[2].trim().parse().map_err(|_| WireError::Field {
            frame: "WIFI",
            field: "port",
            value: parts[2].to_string(),
        })?;
        Ok(Self {
            address: parts[0].to_string(),
            hostname: parts[1].to_string(),
            port,
        })
    }
}

/// Signal strength from a trailing `RSSI:<int>` token, if present and numeric.
pub fn parse_rssi(line: &str) -> Option<i32> {
    let (_, tail) = line.rsplit_once(RSSI_MARKER)?;
    tail.split_whitespace().next()?.parse().ok()
}

/// Line with a trailing RSSI token removed, for parsing the frame body.
pub fn strip_rssi(line: &str) -> &str {
    match line.rfind(RSSI_MARKER) {
        Some(pos) if pos > 0 && parse_rssi(&line[pos..]).is_some() => {
            let head = &line[..pos];
            // Only treat it as a trailer when separated from the body.
            if head.ends_with(char::is_whitespace) {
                head.trim_end()
            } else {
                line
            }
        }
        _ => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_command_form() {
        assert_eq!(Command::parse("REC_START"), Command::StartRecording);
        assert_eq!(Command::parse("REC_STOP"), Command::StopRecording);
        assert_eq!(Command::parse("SET_CONF:0.35"), Command::SetConfidence(0.35));
        assert_eq!(Command::parse("SET_IMGSZ:640"), Command::SetImageSize(640));
        assert_eq!(
            Command::parse("SET_MODEL:yolov8n.pt"),
            Command::SetModel("yolov8n.pt".into())
        );
        assert_eq!(Command::parse("GET_IMG:42"), Command::RequestThumbnail(42));
        assert_eq!(Command::parse("FOO_BAR"), Command::Unknown("FOO_BAR".into()));
        assert_eq!(
            Command::parse("REC_START:now"),
            Command::Unknown("REC_START:now".into())
        );
    }

    #[test]
    fn malformed_arguments_are_tagged() {
        assert_eq!(
            Command::parse("GET_IMG:abc"),
            Command::Malformed {
                name: "GET_IMG".into(),
                arg: "abc".into()
            }
        );
        assert!(matches!(Command::parse("SET_CONF:nan"), Command::Malformed { .. }));
        assert!(matches!(
            Command::parse("SET_MODEL:../etc/passwd"),
            Command::Malformed { .. }
        ));
        assert!(matches!(Command::parse("GET_IMG:-1"), Command::Malformed { .. }));
    }

    #[test]
    fn command_encode_parses_back() {
        for cmd in [
            Command::StartRecording,
            Command::SetImageSize(320),
            Command::RequestThumbnail(7),
            Command::SetModel("best.onnx".into()),
        ] {
            let line = cmd.encode();
            let body = line.strip_prefix(CMD_PREFIX).unwrap();
            assert_eq!(Command::parse(body), cmd);
        }
    }

    #[test]
    fn ap_credentials_parse() {
        let creds = ApCredentials::parse("DC-AIR-01,secret123,192.168.4.1").unwrap();
        assert_eq!(creds.ssid, "DC-AIR-01");
        assert_eq!(creds.password, "secret123");
        assert!(ApCredentials::parse("only-ssid").is_err());
        assert!(ApCredentials::parse(",pw").is_err());
    }

    #[test]
    fn wifi_announce_roundtrip() {
        let ann = WifiAnnounce {
            address: "192.168.4.2".into(),
            hostname: "dc-detect".into(),
            port: 8080,
        };
        let line = ann.encode();
        assert_eq!(line, "WIFI:192.168.4.2,dc-detect,8080");
        assert_eq!(WifiAnnounce::decode(&line).unwrap(), ann);
    }

    #[test]
    fn rssi_token_is_extracted_and_stripped() {
        assert_eq!(parse_rssi("TEL:1,2,3 RSSI:-87"), Some(-87));
        assert_eq!(parse_rssi("hello RSSI:x"), None);
        assert_eq!(parse_rssi("no marker"), None);
        assert_eq!(strip_rssi("CMD:REC_START RSSI:-70"), "CMD:REC_START");
        assert_eq!(strip_rssi("CMD:REC_START"), "CMD:REC_START");
        assert_eq!(strip_rssi("RSSI:-70"), "RSSI:-70");
    }

    #[test]
    fn scrub_removes_separators_and_caps() {
        assert_eq!(scrub_field("a,b:c\nd", 32), "a_b_c_d");
        assert_eq!(scrub_field("abcdef", 3), "abc");
        assert_eq!(scrub_field("Müller", 32), "M?ller");
    }
}

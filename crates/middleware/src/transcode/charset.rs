use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::warn;

const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Byte encoding used to turn text chunks into bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Charset {
    #[default]
    Utf8,
    /// one byte per char, code points above `0xff` keep their low byte
    Latin1,
    Utf16Le,
    /// the text is base64 and is decoded to the bytes it carries
    Base64,
    /// the text is hex and is decoded to the bytes it carries
    Hex,
}

impl Charset {
    /// Maps a charset label, case-insensitively. Unknown labels fall back to UTF-8.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "iso-8859-1" | "ascii" | "binary" | "latin1" => Self::Latin1,
            "utf-16le" | "ucs-2" | "ucs2" | "utf16le" => Self::Utf16Le,
            "base64" => Self::Base64,
            "hex" => Self::Hex,
            _ => Self::Utf8,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Latin1 => "latin1",
            Self::Utf16Le => "utf-16le",
            Self::Base64 => "base64",
            Self::Hex => "hex",
        }
    }

    /// Turns text into bytes. Malformed base64 or hex input never fails: decoding keeps what it
    /// can read and drops the rest.
    pub fn encode(&self, text: &str) -> Bytes {
        match self {
            Self::Utf8 => Bytes::copy_from_slice(text.as_bytes()),
            Self::Latin1 => text.chars().map(|c| c as u8).collect::<Vec<u8>>().into(),
            Self::Utf16Le => {
                let mut buf = BytesMut::with_capacity(text.len() * 2);
                for unit in text.encode_utf16() {
                    buf.put_u16_le(unit);
                }
                buf.freeze()
            }
            Self::Base64 => decode_base64(text),
            Self::Hex => decode_hex(text),
        }
    }
}

/// Decodes base64 up to the first `=`, accepting both alphabets and skipping any other character.
fn decode_base64(text: &str) -> Bytes {
    let mut normalized: Vec<u8> = text
        .bytes()
        .take_while(|&b| b != b'=')
        .filter_map(|b| match b {
            b'-' => Some(b'+'),
            b'_' => Some(b'/'),
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'+' | b'/' => Some(b),
            _ => None,
        })
        .collect();

    // a single dangling symbol carries no full byte
    if normalized.len() % 4 == 1 {
        normalized.pop();
    }

    match LENIENT_BASE64.decode(&normalized) {
        Ok(bytes) => bytes.into(),
        Err(e) => {
            warn!(cause = %e, "base64 chunk dropped");
            Bytes::new()
        }
    }
}

/// Decodes hex pairs up to the first invalid one.
fn decode_hex(text: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(text.len() / 2);
    for pair in text.as_bytes().chunks_exact(2) {
        match (hex_value(pair[0]), hex_value(pair[1])) {
            (Some(high), Some(low)) => buf.put_u8(high << 4 | low),
            _ => break,
        }
    }
    buf.freeze()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

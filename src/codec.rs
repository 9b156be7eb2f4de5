use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{Error, Result};
use crate::haar::{NUM_CHANNELS, NUM_COEFS, Signature};

pub const BLOB_VERSION: u8 = 1;

const HEADER_LEN: usize = 4;
pub const BLOB_LEN: usize = HEADER_LEN + NUM_CHANNELS * 8 + NUM_CHANNELS * NUM_COEFS * 4;

/// Big-endian: version, channel count, coefficient count, the channel
/// averages as `f64`, then every coefficient as `i32`.
pub fn encode(sig: &Signature) -> Vec<u8> {
    let mut out = Vec::with_capacity(BLOB_LEN);
    out.push(BLOB_VERSION);
    out.push(NUM_CHANNELS as u8);
    out.extend_from_slice(&(NUM_COEFS as u16).to_be_bytes());
    for avg in sig.averages {
        out.extend_from_slice(&avg.to_be_bytes());
    }
    for coefs in &sig.coefficients {
        for c in coefs {
            out.extend_from_slice(&c.to_be_bytes());
        }
    }
    out
}

pub fn decode(blob: &[u8]) -> Result<Signature> {
    if blob.len() != BLOB_LEN {
        return Err(Error::MalformedSignature(format!(
            "expected {BLOB_LEN} bytes, got {}",
            blob.len()
        )));
    }

    let (header, mut rest) = blob.split_at(HEADER_LEN);
    if header[0] != BLOB_VERSION {
        return Err(Error::MalformedSignature(format!(
            "unsupported version {}",
            header[0]
        )));
    }
    let channels = header[1] as usize;
    let coefs = u16::from_be_bytes([header[2], header[3]]) as usize;
    if channels != NUM_CHANNELS || coefs != NUM_COEFS {
        return Err(Error::MalformedSignature(format!(
            "shape {channels}x{coefs}, expected {NUM_CHANNELS}x{NUM_COEFS}"
        )));
    }

    let mut averages = [0.0; NUM_CHANNELS];
    for avg in averages.iter_mut() {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&rest[..8]);
        *avg = f64::from_be_bytes(bytes);
        rest = &rest[8..];
    }

    let mut coefficients = [[0; NUM_COEFS]; NUM_CHANNELS];
    for channel in coefficients.iter_mut() {
        for c in channel.iter_mut() {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&rest[..4]);
            *c = i32::from_be_bytes(bytes);
            rest = &rest[4..];
        }
    }

    let sig = Signature {
        averages,
        coefficients,
    };
    sig.validate().map_err(Error::MalformedSignature)?;
    Ok(sig)
}

pub fn encode_text(sig: &Signature) -> String {
    STANDARD.encode(encode(sig))
}

pub fn decode_text(text: &str) -> Result<Signature> {
    let blob = STANDARD
        .decode(text.trim())
        .map_err(|e| Error::MalformedSignature(format!("bad base64: {e}")))?;
    decode(&blob)
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_text(self))
    }
}

impl FromStr for Signature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        decode_text(s)
    }
}

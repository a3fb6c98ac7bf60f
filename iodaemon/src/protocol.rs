//! Wire format for the per-connection link-request stream: a 4-byte
//! big-endian length prefix followed by a JSON-encoded [`LinkRequest`].
use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct WindowSize {
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct LinkRequest {
    #[serde(default, with = "data_as_base64")]
    pub data: Vec<u8>,
    #[serde(rename = "EOF", default)]
    pub eof: bool,
    #[serde(default)]
    pub window_size: Option<WindowSize>,
}

/// Reads one length-prefixed JSON record. Returns `Ok(None)` on a clean EOF
/// before any bytes of the next record have arrived.
pub fn read_request<R: Read>(reader: &mut R) -> io::Result<Option<LinkRequest>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    let len = u32::from_be_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;

    let request: LinkRequest = serde_json::from_slice(&payload)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    Ok(Some(request))
}

pub fn write_request<W: Write>(writer: &mut W, request: &LinkRequest) -> io::Result<()> {
    let payload =
        serde_json::to_vec(request).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    writer.write_all(&(payload.len() as u32).to_be_bytes())?;
    writer.write_all(&payload)?;
    Ok(())
}

/// `Data` travels as base64 text inside the JSON payload rather than raw
/// bytes, since JSON strings must be valid UTF-8.
mod data_as_base64 {
    use base64::Engine as _;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(text)
            .map_err(D::Error::custom)
    }
}

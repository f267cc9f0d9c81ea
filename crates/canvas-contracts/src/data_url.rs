use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl {
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DataUrlError {
    #[error("data URL has no payload separator")]
    MissingPayload,
    #[error("data URL payload is empty")]
    EmptyPayload,
    #[error("data URL payload is not valid base64: {0}")]
    InvalidBase64(String),
}

/// Decodes `data:<mime>;base64,<payload>`. Only the part after the first
/// comma is interpreted; the header is kept for its mime type.
pub fn decode(raw: &str) -> Result<DataUrl, DataUrlError> {
    let (header, payload) = raw
        .trim()
        .split_once(',')
        .ok_or(DataUrlError::MissingPayload)?;
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(DataUrlError::EmptyPayload);
    }
    let bytes = BASE64
        .decode(payload.as_bytes())
        .map_err(|err| DataUrlError::InvalidBase64(err.to_string()))?;
    let mime_type = header
        .strip_prefix("data:")
        .and_then(|rest| rest.split(';').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    Ok(DataUrl { mime_type, bytes })
}

/// Wraps an already base64-encoded payload.
pub fn from_base64(mime_type: &str, payload: &str) -> String {
    format!("data:{mime_type};base64,{payload}")
}

pub fn from_bytes(mime_type: &str, bytes: &[u8]) -> String {
    from_base64(mime_type, &BASE64.encode(bytes))
}

//! spamd request framing and response parsing
//!
//! Only the `PROCESS` command is used: the message is sent to spamd, which
//! answers with the processed message (including its `X-Spam-*` headers).

use thiserror::Error;

/// Protocol version announced in requests
pub const SPAMC_PROTOCOL_VERSION: &str = "SPAMC/1.5";

/// Response code spamd uses for success
pub const EX_OK: u32 = 0;

/// Errors in the spamd exchange
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed status line: {0}")]
    MalformedStatusLine(String),

    #[error("spamd returned {code} {message}")]
    Engine { code: u32, message: String },

    #[error("Response ended before the end of the headers")]
    IncompleteHeaders,

    #[error("Malformed response header: {0}")]
    MalformedHeader(String),

    #[error("Content-length mismatch: expected {expected} bytes, got {actual}")]
    ContentLengthMismatch { expected: usize, actual: usize },

    #[error("Response has an empty body")]
    EmptyBody,

    #[error("Response exceeds {limit} bytes")]
    ResponseTooLarge { limit: usize },

    #[error("Result no longer wanted by the caller")]
    Abandoned,

    #[error("Message store error: {0}")]
    Storage(#[from] spamgate_common::Error),
}

/// Build a `PROCESS` request for `message`
pub fn build_request(message: &[u8], user: Option<&str>) -> Vec<u8> {
    let mut header = format!(
        "PROCESS {}\r\nContent-length: {}\r\n",
        SPAMC_PROTOCOL_VERSION,
        message.len()
    );
    if let Some(user) = user.filter(|u| !u.is_empty()) {
        header.push_str(&format!("User: {}\r\n", user));
    }
    header.push_str("\r\n");

    let mut request = Vec::with_capacity(header.len() + message.len());
    request.extend_from_slice(header.as_bytes());
    request.extend_from_slice(message);
    request
}

/// Successful spamd response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpamdResponse {
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl SpamdResponse {
    /// Processed message
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// First header with the given name, compared case-insensitively
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Parse a complete spamd response to a `PROCESS` request
pub fn parse_response(raw: &[u8]) -> Result<SpamdResponse, ProtocolError> {
    let (status_line, rest) = split_line(raw).ok_or(ProtocolError::IncompleteHeaders)?;
    let (code, message) = parse_status_line(status_line)?;

    if code != EX_OK {
        return Err(ProtocolError::Engine { code, message });
    }

    let mut headers = Vec::new();
    let mut rest = rest;
    loop {
        let (line, remaining) = split_line(rest).ok_or(ProtocolError::IncompleteHeaders)?;
        rest = remaining;
        if line.is_empty() {
            break;
        }

        let line = String::from_utf8_lossy(line);
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ProtocolError::MalformedHeader(line.to_string()))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    let response = SpamdResponse {
        headers,
        body: rest.to_vec(),
    };

    if let Some(length) = response.header("Content-length") {
        let expected: usize = length
            .parse()
            .map_err(|_| ProtocolError::MalformedHeader(format!("Content-length: {}", length)))?;
        if expected != response.body.len() {
            return Err(ProtocolError::ContentLengthMismatch {
                expected,
                actual: response.body.len(),
            });
        }
    }

    if response.body.is_empty() {
        return Err(ProtocolError::EmptyBody);
    }

    Ok(response)
}

/// Split off the first line. Accepts both CRLF and bare LF endings.
fn split_line(data: &[u8]) -> Option<(&[u8], &[u8])> {
    let pos = data.iter().position(|&b| b == b'\n')?;
    let line = &data[..pos];
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    Some((line, &data[pos + 1..]))
}

/// `SPAMD/<version> <code> <message>`; the version is checked but not kept
fn parse_status_line(line: &[u8]) -> Result<(u32, String), ProtocolError> {
    let text = String::from_utf8_lossy(line);
    let malformed = || ProtocolError::MalformedStatusLine(text.to_string());

    let mut parts = text.splitn(3, ' ');
    parts
        .next()
        .and_then(|p| p.strip_prefix("SPAMD/"))
        .filter(|v| !v.is_empty())
        .ok_or_else(malformed)?;
    let code = parts
        .next()
        .and_then(|c| c.parse::<u32>().ok())
        .ok_or_else(malformed)?;
    let message = parts.next().unwrap_or("").trim().to_string();

    Ok((code, message))
}

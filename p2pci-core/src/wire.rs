//! Text codec: request lines, header blocks, status lines, and result lines.
//! Pure functions over strings and bytes; reading them off a stream lives in `stream`.

use crate::protocol::{
    Method, Request, ResourceRecord, Response, StatusCode, OBJECT_ALL, OBJECT_RFC,
    PROTOCOL_VERSION, VERSION_PREFIX,
};
use crate::stream::MAX_HEADERS;

pub const HEADER_HOST: &str = "Host";
pub const HEADER_PORT: &str = "Port";
pub const HEADER_TITLE: &str = "Title";
pub const HEADER_OS: &str = "OS";
pub const HEADER_DATE: &str = "Date";
pub const HEADER_LAST_MODIFIED: &str = "Last-Modified";
pub const HEADER_CONTENT_LENGTH: &str = "Content-Length";
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";

const CRLF: &str = "\r\n";

/// Malformed or unsupported protocol text. Every variant maps to a response status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed: {0}")]
    Malformed(&'static str),
    #[error("unsupported protocol version {0:?}")]
    UnsupportedVersion(String),
    #[error("missing required header {0}")]
    MissingHeader(&'static str),
    #[error("invalid value for header {name}: {value:?}")]
    InvalidHeader { name: &'static str, value: String },
}

impl ProtocolError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProtocolError::UnsupportedVersion(_) => StatusCode::VersionNotSupported,
            _ => StatusCode::BadRequest,
        }
    }
}

/// Check a version token: wrong prefix is malformed, right prefix but wrong version is unsupported.
pub fn check_version(token: &str) -> Result<(), ProtocolError> {
    if !token.starts_with(VERSION_PREFIX) {
        return Err(ProtocolError::Malformed("version token lacks protocol prefix"));
    }
    if token != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(token.to_string()));
    }
    Ok(())
}

/// Parse a resource id: a positive 32-bit integer.
pub fn parse_id(token: &str) -> Result<u32, ProtocolError> {
    match token.parse::<u32>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(ProtocolError::Malformed("resource id is not a positive integer")),
    }
}

/// What a request line addresses once its shape is validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Resource(u32),
    All,
}

/// A request line that passed the fail-fast checks (token count, method, version).
/// The remaining shape checks run in [`RequestHead::target`], after the header block is consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: Method,
    /// Tokens between the method and the version.
    pub args: Vec<String>,
}

impl RequestHead {
    /// Fail-fast parse of a request line. `served` lists the methods this endpoint answers;
    /// anything else is malformed here.
    pub fn parse(line: &str, served: &[Method]) -> Result<Self, ProtocolError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 3 {
            return Err(ProtocolError::Malformed("request line has too few tokens"));
        }
        let method = Method::from_token(tokens[0])
            .filter(|m| served.contains(m))
            .ok_or(ProtocolError::Malformed("unsupported method"))?;
        check_version(tokens[tokens.len() - 1])?;
        let args = tokens[1..tokens.len() - 1]
            .iter()
            .map(|t| t.to_string())
            .collect();
        Ok(Self { method, args })
    }

    /// Validate the object keyword and id for this method.
    pub fn target(&self) -> Result<Target, ProtocolError> {
        match self.method {
            Method::List => match self.args.as_slice() {
                [obj] if obj == OBJECT_ALL => Ok(Target::All),
                _ => Err(ProtocolError::Malformed("expected LIST ALL <version>")),
            },
            Method::Add | Method::Lookup | Method::Get => match self.args.as_slice() {
                [obj, id] if obj == OBJECT_RFC => parse_id(id).map(Target::Resource),
                [_, _] => Err(ProtocolError::Malformed("expected object keyword RFC")),
                _ => Err(ProtocolError::Malformed("expected <method> RFC <id> <version>")),
            },
        }
    }
}

/// Ordered header list; lookups are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Value for `name`, which must be present and non-empty.
    pub fn require(&self, name: &'static str) -> Result<&str, ProtocolError> {
        match self.get(name) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(ProtocolError::MissingHeader(name)),
        }
    }

    /// `Port` header as a non-zero port number.
    pub fn port(&self) -> Result<u16, ProtocolError> {
        let raw = self.require(HEADER_PORT)?;
        match raw.parse::<u16>() {
            Ok(p) if p > 0 => Ok(p),
            _ => Err(ProtocolError::InvalidHeader {
                name: HEADER_PORT,
                value: raw.to_string(),
            }),
        }
    }

    /// `Content-Length`, if present.
    pub fn content_length(&self) -> Result<Option<u64>, ProtocolError> {
        match self.get(HEADER_CONTENT_LENGTH) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<u64>()
                .map(Some)
                .map_err(|_| ProtocolError::InvalidHeader {
                    name: HEADER_CONTENT_LENGTH,
                    value: raw.to_string(),
                }),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Parse a header block: `Key: Value` lines each ending in CRLF, then an empty CRLF line.
pub fn parse_header_block(block: &[u8]) -> Result<Headers, ProtocolError> {
    let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
    match httparse::parse_headers(block, &mut raw) {
        Ok(httparse::Status::Complete((_, parsed))) => {
            let mut headers = Headers::new();
            for h in parsed.iter() {
                headers.push(h.name, String::from_utf8_lossy(h.value).trim());
            }
            Ok(headers)
        }
        Ok(httparse::Status::Partial) => Err(ProtocolError::Malformed("incomplete header block")),
        Err(_) => Err(ProtocolError::Malformed("invalid header line")),
    }
}

/// Encode a request with its header block.
pub fn encode_request(request: &Request) -> String {
    let method = request.method();
    let mut headers = Headers::new();
    let line = match request {
        Request::Add {
            id,
            title,
            host,
            port,
        } => {
            headers.push(HEADER_HOST, host.as_str());
            headers.push(HEADER_PORT, port.to_string());
            headers.push(HEADER_TITLE, title.as_str());
            format!("{} {} {} {}", method, OBJECT_RFC, id, PROTOCOL_VERSION)
        }
        Request::Lookup {
            id,
            host,
            port,
            title,
        } => {
            headers.push(HEADER_HOST, host.as_str());
            headers.push(HEADER_PORT, port.to_string());
            if let Some(t) = title {
                headers.push(HEADER_TITLE, t.as_str());
            }
            format!("{} {} {} {}", method, OBJECT_RFC, id, PROTOCOL_VERSION)
        }
        Request::ListAll { host, port } => {
            headers.push(HEADER_HOST, host.as_str());
            headers.push(HEADER_PORT, port.to_string());
            format!("{} {} {}", method, OBJECT_ALL, PROTOCOL_VERSION)
        }
        Request::Get { id, host, os } => {
            headers.push(HEADER_HOST, host.as_str());
            headers.push(HEADER_OS, os.as_str());
            format!("{} {} {} {}", method, OBJECT_RFC, id, PROTOCOL_VERSION)
        }
    };
    let mut out = line;
    out.push_str(CRLF);
    push_headers(&mut out, &headers);
    out
}

fn push_headers(out: &mut String, headers: &Headers) {
    for (name, value) in headers.iter() {
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str(CRLF);
    }
    out.push_str(CRLF);
}

/// `P2P-CI/1.0 <code> <reason>` with CRLF.
pub fn encode_status_line(status: StatusCode, reason: &str) -> String {
    format!("{} {} {}{}", PROTOCOL_VERSION, status.code(), reason, CRLF)
}

/// Status line followed by a header block (used for file responses).
pub fn encode_head(status: StatusCode, reason: &str, headers: &Headers) -> String {
    let mut out = encode_status_line(status, reason);
    push_headers(&mut out, headers);
    out
}

/// Encode a central index response. Errors are the status line and a blank line;
/// 200 adds a blank line, one result line per record, and a terminating blank line.
pub fn encode_response(response: &Response) -> String {
    let mut out = encode_status_line(response.status, &response.reason);
    out.push_str(CRLF);
    if response.status.is_success() {
        for record in &response.records {
            out.push_str(&encode_result_line(record));
            out.push_str(CRLF);
        }
        out.push_str(CRLF);
    }
    out
}

/// Parse `P2P-CI/1.0 <code> <reason...>`.
pub fn parse_status_line(line: &str) -> Result<(StatusCode, String), ProtocolError> {
    let mut parts = line.trim().splitn(3, ' ');
    let version = parts
        .next()
        .filter(|v| !v.is_empty())
        .ok_or(ProtocolError::Malformed("empty status line"))?;
    check_version(version)?;
    let status = parts
        .next()
        .and_then(|c| c.parse::<u16>().ok())
        .and_then(StatusCode::from_code)
        .ok_or(ProtocolError::Malformed("unknown status code"))?;
    let reason = parts.next().unwrap_or("").trim().to_string();
    Ok((status, reason))
}

/// `RFC <id> <title> <host> <port>`, no line terminator.
pub fn encode_result_line(record: &ResourceRecord) -> String {
    format!(
        "{} {} {} {} {}",
        OBJECT_RFC, record.id, record.title, record.host, record.port
    )
}

/// Decode a result line. The last two tokens are always host and port; the title is the
/// text between the id and the host, so it may contain spaces, be numeric, or be empty.
/// Lines without the leading `RFC` keyword are accepted as `<id> <title> <host> <port>`.
pub fn decode_result_line(line: &str) -> Result<ResourceRecord, ProtocolError> {
    const SHORT: ProtocolError = ProtocolError::Malformed("result line has too few tokens");
    let (rest, port) = split_last_token(line).ok_or(SHORT)?;
    let (rest, host) = split_last_token(rest).ok_or(SHORT)?;
    let (first, rest) = split_first_token(rest).ok_or(SHORT)?;
    let (id, title) = if first == OBJECT_RFC {
        split_first_token(rest).ok_or(SHORT)?
    } else {
        (first, rest)
    };
    let port = match port.parse::<u16>() {
        Ok(p) if p > 0 => p,
        _ => return Err(ProtocolError::Malformed("result line port is not a port number")),
    };
    Ok(ResourceRecord {
        id: parse_id(id)?,
        title: title.trim().to_string(),
        host: host.to_string(),
        port,
    })
}

/// Split off the first whitespace-delimited token. `None` if `s` is blank.
fn split_first_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    match s.find(char::is_whitespace) {
        Some(i) => Some((&s[..i], &s[i..])),
        None => Some((s, "")),
    }
}

/// Split off the last token. `None` unless something precedes it.
fn split_last_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_end();
    let (i, c) = s.char_indices().rev().find(|(_, c)| c.is_whitespace())?;
    Some((&s[..i], &s[i + c.len_utf8()..]))
}

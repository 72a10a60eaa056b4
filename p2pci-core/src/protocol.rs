//! P2P-CI protocol: version, methods, status codes, records, and message types.

use std::fmt;

/// Protocol version token carried by every request and status line.
pub const PROTOCOL_VERSION: &str = "P2P-CI/1.0";

/// Prefix shared by every version of the protocol. A version token without it is malformed (400);
/// one with it but not equal to [`PROTOCOL_VERSION`] is unsupported (505).
pub const VERSION_PREFIX: &str = "P2P-CI/";

/// Object keyword for single-resource requests.
pub const OBJECT_RFC: &str = "RFC";

/// Object keyword for `LIST`.
pub const OBJECT_ALL: &str = "ALL";

/// Default central index listening port.
pub const DEFAULT_SERVER_PORT: u16 = 7734;

/// `Content-Type` sent with every file response.
pub const CONTENT_TYPE_TEXT: &str = "text/text";

/// Reason phrase for the fatal port-conflict rejection.
pub const PORT_CONFLICT_REASON: &str = "Bad Request - Port already in use by another peer";

/// Local file name for resource `id`. Shared by the upload server and the downloader.
pub fn rfc_file_name(id: u32) -> String {
    format!("rfc{}.txt", id)
}

/// Request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Add,
    Lookup,
    List,
    Get,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Add => "ADD",
            Method::Lookup => "LOOKUP",
            Method::List => "LIST",
            Method::Get => "GET",
        }
    }

    /// Exact, case-sensitive match against the method token.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "ADD" => Some(Method::Add),
            "LOOKUP" => Some(Method::Lookup),
            "LIST" => Some(Method::List),
            "GET" => Some(Method::Get),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    BadRequest,
    NotFound,
    VersionNotSupported,
}

impl StatusCode {
    pub fn code(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::BadRequest => 400,
            StatusCode::NotFound => 404,
            StatusCode::VersionNotSupported => 505,
        }
    }

    /// Default reason phrase.
    pub fn reason(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::NotFound => "Not Found",
            StatusCode::VersionNotSupported => "P2P-CI Version Not Supported",
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            200 => Some(StatusCode::Ok),
            400 => Some(StatusCode::BadRequest),
            404 => Some(StatusCode::NotFound),
            505 => Some(StatusCode::VersionNotSupported),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StatusCode::Ok)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.reason())
    }
}

/// A registered peer: the host name it advertises and its upload port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerRecord {
    pub host: String,
    pub port: u16,
}

impl PeerRecord {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for PeerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One advertisement: resource `id` with `title`, offered by the peer at `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRecord {
    pub id: u32,
    pub title: String,
    pub host: String,
    pub port: u16,
}

impl ResourceRecord {
    pub fn new(id: u32, title: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            title: title.into(),
            host: host.into(),
            port,
        }
    }

    /// True if this advertisement belongs to `peer`.
    pub fn is_offered_by(&self, host: &str, port: u16) -> bool {
        self.host == host && self.port == port
    }
}

/// Requests a peer sends, either to the central index or to another peer's upload server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Add {
        id: u32,
        title: String,
        host: String,
        port: u16,
    },
    Lookup {
        id: u32,
        host: String,
        port: u16,
        title: Option<String>,
    },
    ListAll {
        host: String,
        port: u16,
    },
    Get {
        id: u32,
        host: String,
        os: String,
    },
}

impl Request {
    pub fn method(&self) -> Method {
        match self {
            Request::Add { .. } => Method::Add,
            Request::Lookup { .. } => Method::Lookup,
            Request::ListAll { .. } => Method::List,
            Request::Get { .. } => Method::Get,
        }
    }
}

/// A central index response: status line, then result lines for 200.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: StatusCode,
    pub reason: String,
    pub records: Vec<ResourceRecord>,
}

impl Response {
    pub fn ok(records: Vec<ResourceRecord>) -> Self {
        Self {
            status: StatusCode::Ok,
            reason: StatusCode::Ok.reason().to_string(),
            records,
        }
    }

    /// Error status with its default reason and no body.
    pub fn error(status: StatusCode) -> Self {
        Self::error_with_reason(status, status.reason())
    }

    pub fn error_with_reason(status: StatusCode, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            records: Vec::new(),
        }
    }

    /// 200 with the given records, or 404 when there are none.
    pub fn found(records: Vec<ResourceRecord>) -> Self {
        if records.is_empty() {
            Self::error(StatusCode::NotFound)
        } else {
            Self::ok(records)
        }
    }
}

//! P2P-CI protocol core.
//! No sockets here: servers and clients own the streams and call into the codec, readers, and registry.

pub mod protocol;
pub mod registry;
pub mod stream;
pub mod wire;

pub use protocol::{
    rfc_file_name, Method, PeerRecord, Request, ResourceRecord, Response, StatusCode,
    DEFAULT_SERVER_PORT, PROTOCOL_VERSION,
};
pub use registry::{PortConflict, Registry};
pub use stream::WireError;
pub use wire::{Headers, ProtocolError, RequestHead, Target};

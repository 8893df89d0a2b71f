//! Upstream relay module
//!
//! The stateless half of the relay: one client request becomes exactly one
//! upstream HTTP exchange, with headers filtered on both legs, HTML bodies
//! rewritten and upstream cookies translated onto the relay origin.

mod error;
mod forwarder;

pub use error::RelayError;
pub use forwarder::{
    build_cookie_header, filter_request_headers, filter_response_headers, ForwardedRequest,
    Forwarder, RelayCookie, UpstreamReply,
};

//! Real-time side of Kindred: authenticated WebSocket sessions, presence and
//! chat routing.

pub mod connection;
pub mod handshake;
pub mod presence;
pub mod router;
pub mod sweep;

pub use handshake::{
    AuthenticatedUser, HandshakeAuthenticator, HandshakeError, HandshakeParams, TokenAuthority,
    UserDirectory,
};
pub use presence::{Outbound, PresenceRegistry, SessionHandle};
pub use router::{FrameError, MessageRouter};

//! Client side of the canvas protocol: a local grid replica and the session feeding it.

pub mod mirror;
pub mod session;

pub use mirror::{ClientMirror, MirrorEvent};
pub use session::{ClientError, ClientSession, ConnectionStatus, SessionConfig, SessionEvent};

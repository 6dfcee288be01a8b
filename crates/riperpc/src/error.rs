//! # Error Definitions
//!
//! Protocol-level failures, and the `Fault` payload that carries a failed
//! delegation back to the caller.

use crate::pack;

/// Operational failures of the wire protocol itself.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The underlying pack encoding failed.
    Serialization(pack::Error),
    /// The frame was structurally valid but violated the protocol.
    ProtocolViolation(String),
    /// An unknown top-level frame, value tag or fault kind was encountered.
    UnknownVariant(String),
    /// The nested depth of a value exceeded the safety limit.
    RecursionLimitExceeded,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(e) => write!(f, "serialization failed: {}", e),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
            Self::UnknownVariant(name) => write!(f, "unknown variant: {}", name),
            Self::RecursionLimitExceeded => write!(f, "value nesting exceeds recursion limit"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<pack::Error> for Error {
    fn from(e: pack::Error) -> Self { Self::Serialization(e) }
}

/// A specialized Result type for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a delegated call failed on the remote side.
///
/// These are distinct from `Error`: a fault is the *callee* failing and is
/// carried as data inside a Return, whereas `Error` is the *protocol* failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// No object is exported under the target handle.
    NoImplementation,
    /// The target object has no method matching the signature or key.
    NoSuchMethod,
    /// Argument count or shape did not match the method.
    BadArguments,
    /// The application method returned an error.
    Application,
    /// The application method panicked.
    Panicked,
    /// The call itself broke a protocol invariant (e.g. unknown method key).
    Protocol,
    /// A live object was returned that could not be exported.
    Unexportable,
}

impl FaultKind {
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::NoImplementation => "no-implementation",
            Self::NoSuchMethod => "no-such-method",
            Self::BadArguments => "bad-arguments",
            Self::Application => "application",
            Self::Panicked => "panicked",
            Self::Protocol => "protocol",
            Self::Unexportable => "unexportable",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "no-implementation" => Ok(Self::NoImplementation),
            "no-such-method" => Ok(Self::NoSuchMethod),
            "bad-arguments" => Ok(Self::BadArguments),
            "application" => Ok(Self::Application),
            "panicked" => Ok(Self::Panicked),
            "protocol" => Ok(Self::Protocol),
            "unexportable" => Ok(Self::Unexportable),
            other => Err(Error::UnknownVariant(format!("fault kind: {}", other))),
        }
    }
}

/// The error payload of a fault Return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
}

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    /// Shorthand for an error raised by application code.
    pub fn application(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Application, message)
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_tag(), self.message)
    }
}

impl std::error::Error for Fault {}

//! # Messages
//!
//! The three wire message kinds. Plain values with accessors; all behavior
//! lives in the runtime.

use crate::error::Fault;
use crate::instance::RemoteInstance;
use crate::value::Value;

/// A request to run one method on a remote object.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    /// Correlates this call with its Return. Unique per connection.
    pub call_id: u64,
    /// The object the method runs on.
    pub target: RemoteInstance,
    /// Human-readable method signature. Only sent the first time a method is
    /// used on a connection; `None` afterwards.
    pub signature: Option<String>,
    /// Compact id used in place of the signature once the peer has cached it.
    pub method_key: u64,
    pub args: Vec<Value>,
}

impl Call {
    pub fn new(
        call_id: u64,
        target: RemoteInstance,
        signature: Option<String>,
        method_key: u64,
        args: Vec<Value>,
    ) -> Self {
        Self { call_id, target, signature, method_key, args }
    }
}

/// The outcome of a delegated Call.
#[derive(Debug, Clone, PartialEq)]
pub struct Return {
    /// Echoes `Call::call_id`.
    pub call_id: u64,
    pub outcome: Result<Value, Fault>,
}

impl Return {
    pub fn value(call_id: u64, value: Value) -> Self {
        Self { call_id, outcome: Ok(value) }
    }

    pub fn fault(call_id: u64, fault: Fault) -> Self {
        Self { call_id, outcome: Err(fault) }
    }

    pub fn is_fault(&self) -> bool {
        self.outcome.is_err()
    }

    pub fn result(&self) -> &Result<Value, Fault> {
        &self.outcome
    }

    pub fn into_result(self) -> Result<Value, Fault> {
        self.outcome
    }
}

/// Handshake marker with no meaning beyond its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Beacon {
    pub id: u32,
}

/// Ids of the beacons written when a connection opens.
pub const HANDSHAKE_BEACONS: [u32; 3] = [0, 1, 2];

/// Any frame that may appear on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Call(Call),
    Return(Return),
    Beacon(Beacon),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Call(_) => "Call",
            Self::Return(_) => "Return",
            Self::Beacon(_) => "Beacon",
        }
    }
}

impl From<Call> for Message {
    fn from(c: Call) -> Self { Self::Call(c) }
}

impl From<Return> for Message {
    fn from(r: Return) -> Self { Self::Return(r) }
}

impl From<Beacon> for Message {
    fn from(b: Beacon) -> Self { Self::Beacon(b) }
}

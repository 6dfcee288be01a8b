//! # Values
//!
//! The self-describing data model of call arguments and return values, and
//! its translation to and from the pack format.
//!
//! ## Invariants
//! - **Recursion Safety**: encode and decode are bounded by `MAX_RECURSION_DEPTH`.
//! - **Self-describing**: the receiver needs no schema to decode a value.

use crate::error::Error;
use crate::error::Result;
use crate::instance::RemoteInstance;
use crate::pack::Decoder;
use crate::pack::Encoder;

/// The maximum nesting depth for values before failing.
pub const MAX_RECURSION_DEPTH: usize = 64;

/// A serializable value.
///
/// `Remote` stands in for a reference-typed value: the object stays where it
/// is and only its handle crosses the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Unit,
    Bool(bool),
    S32(i32),
    S64(i64),
    U64(u64),
    F64(f64),
    Char(char),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Record(Vec<(String, Value)>),
    Option(Option<Box<Value>>),
    Remote(RemoteInstance),
}

impl Value {
    /// Short name of the value kind, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Bool(_) => "bool",
            Self::S32(_) => "s32",
            Self::S64(_) => "s64",
            Self::U64(_) => "u64",
            Self::F64(_) => "f64",
            Self::Char(_) => "char",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Record(_) => "record",
            Self::Option(_) => "option",
            Self::Remote(_) => "remote",
        }
    }

    pub fn as_s32(&self) -> Option<i32> {
        match self { Self::S32(v) => Some(*v), _ => None }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self { Self::String(v) => Some(v), _ => None }
    }

    pub fn as_remote(&self) -> Option<&RemoteInstance> {
        match self { Self::Remote(r) => Some(r), _ => None }
    }

    /// Looks up a record field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Record(fields) => fields.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Builds a record from `(name, value)` pairs.
    pub fn record<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self { Self::S32(v) }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self { Self::S64(v) }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self { Self::Bool(v) }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self { Self::String(v.to_string()) }
}

impl From<String> for Value {
    fn from(v: String) -> Self { Self::String(v) }
}

impl From<RemoteInstance> for Value {
    fn from(v: RemoteInstance) -> Self { Self::Remote(v) }
}

/// Encodes a remote handle as a two-entry map.
pub fn encode_instance(enc: &mut Encoder, instance: &RemoteInstance) -> Result<()> {
    enc.map_begin()?;
    enc.variant_begin("id")?;
    enc.u64(instance.instance_id())?;
    enc.variant_end()?;
    enc.variant_begin("interface")?;
    enc.str(instance.interface_name())?;
    enc.variant_end()?;
    enc.map_end()?;
    Ok(())
}

pub fn decode_instance(dec: &mut Decoder) -> Result<RemoteInstance> {
    let mut map = dec.map()?;
    let mut id = None;
    let mut interface = None;
    while let Some((key, mut val)) = map.next()? {
        match key {
            "id" => id = Some(val.u64()?),
            "interface" => interface = Some(val.str()?),
            _ => val.skip()?,
        }
    }
    let id = id.ok_or(Error::ProtocolViolation("remote handle missing id".into()))?;
    let interface = interface.ok_or(Error::ProtocolViolation("remote handle missing interface".into()))?;
    Ok(RemoteInstance::new(id, interface))
}

/// Encodes a value into the encoder stream.
///
/// Every value is written as a variant named after its kind, so decoding
/// needs no type information.
pub fn encode_value(enc: &mut Encoder, val: &Value) -> Result<()> {
    encode_value_impl(enc, val, 0)
}

fn encode_value_impl(enc: &mut Encoder, val: &Value, depth: usize) -> Result<()> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(Error::RecursionLimitExceeded);
    }

    enc.variant_begin(val.kind())?;
    match val {
        Value::Unit => enc.unit()?,
        Value::Bool(b) => enc.bool(*b)?,
        Value::S32(v) => enc.s32(*v)?,
        Value::S64(v) => enc.s64(*v)?,
        Value::U64(v) => enc.u64(*v)?,
        Value::F64(v) => enc.f64(*v)?,
        Value::Char(v) => enc.char(*v)?,
        Value::String(v) => enc.str(v)?,
        Value::Bytes(v) => enc.bytes(v)?,
        Value::List(items) => {
            enc.list_begin()?;
            for item in items {
                encode_value_impl(enc, item, depth + 1)?;
            }
            enc.list_end()?;
        }
        Value::Record(fields) => {
            enc.map_begin()?;
            for (name, value) in fields {
                enc.variant_begin(name)?;
                encode_value_impl(enc, value, depth + 1)?;
                enc.variant_end()?;
            }
            enc.map_end()?;
        }
        Value::Option(opt) => match opt {
            Some(inner) => {
                enc.option_some_begin()?;
                encode_value_impl(enc, inner, depth + 1)?;
                enc.option_some_end()?;
            }
            None => enc.option_none()?,
        },
        Value::Remote(instance) => encode_instance(enc, instance)?,
    }
    enc.variant_end()?;
    Ok(())
}

/// Decodes one value.
pub fn decode_value(dec: &mut Decoder) -> Result<Value> {
    decode_value_impl(dec, 0)
}

/// Decodes a list of values, e.g. call arguments.
pub fn decode_values(dec: &mut Decoder) -> Result<Vec<Value>> {
    let mut iter = dec.list()?;
    let mut vals = Vec::new();
    while let Some(mut item) = iter.next()? {
        vals.push(decode_value_impl(&mut item, 0)?);
    }
    Ok(vals)
}

/// Encodes a list of values, e.g. call arguments.
pub fn encode_values(enc: &mut Encoder, vals: &[Value]) -> Result<()> {
    enc.list_begin()?;
    for val in vals {
        encode_value_impl(enc, val, 0)?;
    }
    enc.list_end()?;
    Ok(())
}

fn decode_value_impl(dec: &mut Decoder, depth: usize) -> Result<Value> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(Error::RecursionLimitExceeded);
    }

    let (kind, mut body) = dec.variant()?;
    let val = match kind {
        "unit" => { body.unit()?; Value::Unit }
        "bool" => Value::Bool(body.bool()?),
        "s32" => Value::S32(body.s32()?),
        "s64" => Value::S64(body.s64()?),
        "u64" => Value::U64(body.u64()?),
        "f64" => Value::F64(body.f64()?),
        "char" => Value::Char(body.char()?),
        "string" => Value::String(body.str()?.to_string()),
        "bytes" => Value::Bytes(body.bytes()?.to_vec()),
        "list" => {
            let mut iter = body.list()?;
            let mut items = Vec::new();
            while let Some(mut item) = iter.next()? {
                items.push(decode_value_impl(&mut item, depth + 1)?);
            }
            Value::List(items)
        }
        "record" => {
            let mut iter = body.map()?;
            let mut fields = Vec::new();
            while let Some((name, mut field)) = iter.next()? {
                fields.push((name.to_string(), decode_value_impl(&mut field, depth + 1)?));
            }
            Value::Record(fields)
        }
        "option" => match body.option()? {
            Some(mut inner) => Value::Option(Some(Box::new(decode_value_impl(&mut inner, depth + 1)?))),
            None => Value::Option(None),
        },
        "remote" => Value::Remote(decode_instance(&mut body)?),
        other => return Err(Error::UnknownVariant(format!("value kind: {}", other))),
    };
    Ok(val)
}

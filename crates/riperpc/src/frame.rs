//! # Protocol Frames
//!
//! The envelope of each message: one top-level variant named after the
//! message kind, whose body is a map of named fields.
//!
//! ## Invariants
//! - **Panic Safety**: all decoding paths return `Result`, never panicking on unknown data.
//! - **Forward Compatibility**: unknown map keys are skipped.
//! - **Self-contained**: a frame never refers to data from another frame.

use crate::error::Error;
use crate::error::Fault;
use crate::error::FaultKind;
use crate::error::Result;
use crate::message::Beacon;
use crate::message::Call;
use crate::message::Message;
use crate::message::Return;
use crate::pack::Decoder;
use crate::pack::Encoder;
use crate::value::decode_instance;
use crate::value::decode_value;
use crate::value::decode_values;
use crate::value::encode_instance;
use crate::value::encode_value;
use crate::value::encode_values;
use crate::value::Value;

/// Encodes one message into a standalone frame.
pub fn encode_message(msg: &Message) -> Result<Vec<u8>> {
    let mut enc = Encoder::new();
    match msg {
        Message::Call(call) => encode_call(&mut enc, call)?,
        Message::Return(ret) => encode_return(&mut enc, ret)?,
        Message::Beacon(beacon) => encode_beacon(&mut enc, beacon)?,
    }
    Ok(enc.into_bytes()?)
}

/// Decodes exactly one message from a frame.
pub fn decode_message(bytes: &[u8]) -> Result<Message> {
    let mut dec = Decoder::new(bytes);
    let (kind, body) = dec.variant()?;
    let msg = match kind {
        "Call" => Message::Call(decode_call(body)?),
        "Return" => Message::Return(decode_return(body)?),
        "Beacon" => Message::Beacon(decode_beacon(body)?),
        other => return Err(Error::UnknownVariant(format!("top-level frame: {}", other))),
    };
    if dec.remaining() != 0 {
        return Err(Error::ProtocolViolation("trailing bytes after frame".into()));
    }
    Ok(msg)
}

fn encode_call(enc: &mut Encoder, call: &Call) -> Result<()> {
    enc.variant_begin("Call")?;
    enc.map_begin()?;

    write_map_u64(enc, "call_id", call.call_id)?;

    enc.variant_begin("target")?;
    encode_instance(enc, &call.target)?;
    enc.variant_end()?;

    // absent key means "use the cached signature"
    if let Some(signature) = &call.signature {
        write_map_str(enc, "signature", signature)?;
    }
    write_map_u64(enc, "method_key", call.method_key)?;

    enc.variant_begin("args")?;
    encode_values(enc, &call.args)?;
    enc.variant_end()?;

    enc.map_end()?;
    enc.variant_end()?;
    Ok(())
}

fn decode_call(mut body: Decoder) -> Result<Call> {
    let mut map = body.map()?;
    let mut call_id = None;
    let mut target = None;
    let mut signature = None;
    let mut method_key = None;
    let mut args = None;

    while let Some((key, mut val)) = map.next()? {
        match key {
            "call_id" => call_id = Some(val.u64()?),
            "target" => target = Some(decode_instance(&mut val)?),
            "signature" => signature = Some(val.str()?.to_string()),
            "method_key" => method_key = Some(val.u64()?),
            "args" => args = Some(decode_values(&mut val)?),
            _ => val.skip()?,
        }
    }

    Ok(Call {
        call_id: call_id.ok_or(Error::ProtocolViolation("Call missing call_id".into()))?,
        target: target.ok_or(Error::ProtocolViolation("Call missing target".into()))?,
        signature,
        method_key: method_key.ok_or(Error::ProtocolViolation("Call missing method_key".into()))?,
        args: args.ok_or(Error::ProtocolViolation("Call missing args".into()))?,
    })
}

fn encode_return(enc: &mut Encoder, ret: &Return) -> Result<()> {
    enc.variant_begin("Return")?;
    enc.map_begin()?;

    write_map_u64(enc, "call_id", ret.call_id)?;

    enc.variant_begin("outcome")?;
    match &ret.outcome {
        Ok(value) => {
            enc.result_ok_begin()?;
            encode_value(enc, value)?;
            enc.result_end()?;
        }
        Err(fault) => {
            enc.result_err_begin()?;
            enc.variant_begin(fault.kind.as_tag())?;
            enc.str(&fault.message)?;
            enc.variant_end()?;
            enc.result_end()?;
        }
    }
    enc.variant_end()?;

    enc.map_end()?;
    enc.variant_end()?;
    Ok(())
}

fn decode_return(mut body: Decoder) -> Result<Return> {
    let mut map = body.map()?;
    let mut call_id = None;
    let mut outcome = None;

    while let Some((key, mut val)) = map.next()? {
        match key {
            "call_id" => call_id = Some(val.u64()?),
            "outcome" => outcome = Some(decode_outcome(&mut val)?),
            _ => val.skip()?,
        }
    }

    Ok(Return {
        call_id: call_id.ok_or(Error::ProtocolViolation("Return missing call_id".into()))?,
        outcome: outcome.ok_or(Error::ProtocolViolation("Return missing outcome".into()))?,
    })
}

fn decode_outcome(dec: &mut Decoder) -> Result<std::result::Result<Value, Fault>> {
    match dec.result()? {
        Ok(mut ok) => Ok(Ok(decode_value(&mut ok)?)),
        Err(mut err) => {
            let (tag, mut msg) = err.variant()?;
            let kind = FaultKind::from_tag(tag)?;
            Ok(Err(Fault::new(kind, msg.str()?)))
        }
    }
}

fn encode_beacon(enc: &mut Encoder, beacon: &Beacon) -> Result<()> {
    enc.variant_begin("Beacon")?;
    enc.map_begin()?;
    enc.variant_begin("id")?;
    enc.u32(beacon.id)?;
    enc.variant_end()?;
    enc.map_end()?;
    enc.variant_end()?;
    Ok(())
}

fn decode_beacon(mut body: Decoder) -> Result<Beacon> {
    let mut map = body.map()?;
    let mut id = None;
    while let Some((key, mut val)) = map.next()? {
        match key {
            "id" => id = Some(val.u32()?),
            _ => val.skip()?,
        }
    }
    Ok(Beacon { id: id.ok_or(Error::ProtocolViolation("Beacon missing id".into()))? })
}

// Helper functions

fn write_map_u64(enc: &mut Encoder, key: &str, val: u64) -> Result<()> {
    enc.variant_begin(key)?;
    enc.u64(val)?;
    enc.variant_end()?;
    Ok(())
}

fn write_map_str(enc: &mut Encoder, key: &str, val: &str) -> Result<()> {
    enc.variant_begin(key)?;
    enc.str(val)?;
    enc.variant_end()?;
    Ok(())
}

//! Frame decode contract at the arbiter boundary (§6 "Wire protocol").
//!
//! The Unix-socket listener itself is external (§1): accept loop, readiness
//! notification, and UID-to-`permission_tag` resolution are its job. What
//! lives here is the pure, deterministic part of the boundary — turning the
//! bytes of one already-received frame into a typed request, and encoding
//! the one write-back the protocol defines (the `i64` handle after a tune).
//! Grounded on `original_source/server/Receiver/RequestReceiver.cpp` (module
//! id / request kind byte layout) and `Core/Server/Socket/SocketServer.cpp`
//! (the handle write-back-then-close behaviour).

use crate::registry::Priority;
use crate::request::{ResourceInstance, ResourceValue};
use crate::resource_id::{ResourceId, ResourceInfo};
use std::fmt;

pub const REQ_RESOURCE_TUNE: u8 = 1;
pub const REQ_RETUNE: u8 = 2;
pub const REQ_UNTUNE: u8 = 3;
pub const REQ_SIGNAL_TUNE: u8 = 4;
pub const REQ_SIGNAL_UNTUNE: u8 = 5;
pub const REQ_GET_PROP: u8 = 6;
pub const REQ_SET_PROP: u8 = 7;

const PRIORITY_HIGH_BIT: i32 = 1 << 0;
const BACKGROUND_BIT: i32 = 1 << 8;

#[derive(Debug, PartialEq, Eq)]
pub enum DecodeError {
    Truncated,
    /// `GET_PROP`/`SET_PROP` address a property store outside this core's
    /// scope (§1); the listener must handle them before reaching here.
    UnsupportedKind(u8),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "frame ended before the expected field"),
            Self::UnsupportedKind(k) => write!(f, "request kind {k} is not handled by the arbitration core"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// One already-parsed `Resource (instance)` (§3), decoded from its wire
/// layout: `u32 id, u16 info, u8 optional_info_present [+ i32], u16
/// num_values, i32[num_values]`.
pub struct DecodedResource {
    pub id: ResourceId,
    pub info: ResourceInfo,
    pub optional_info: Option<i32>,
    pub values: ResourceValue,
}

impl From<DecodedResource> for ResourceInstance {
    fn from(d: DecodedResource) -> Self {
        ResourceInstance {
            id: d.id,
            info: d.info,
            optional_info: d.optional_info,
            values: d.values,
        }
    }
}

pub struct TuneFrame {
    pub duration_ms: i64,
    pub priority: Priority,
    pub background: bool,
    pub resources: Vec<DecodedResource>,
}

pub enum DecodedFrame {
    Tune(TuneFrame),
    Retune { handle: u64, new_duration_ms: i64 },
    Untune { handle: u64 },
    SignalTune(TuneFrame),
    SignalUntune { handle: u64 },
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos + n;
        let slice = self.bytes.get(self.pos..end).ok_or(DecodeError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

fn decode_resource(cursor: &mut Cursor) -> Result<DecodedResource, DecodeError> {
    let id = ResourceId::from_raw(cursor.u32()?);
    let info = ResourceInfo::from_packed(cursor.u16()?);
    let optional_info = if cursor.u8()? != 0 {
        Some(cursor.i32()?)
    } else {
        None
    };
    let num_values = cursor.u16()?;
    let values = if num_values <= 1 {
        ResourceValue::OneValue(cursor.i32()?)
    } else {
        let mut values = Vec::with_capacity(num_values as usize);
        for _ in 0..num_values {
            values.push(cursor.i32()?);
        }
        ResourceValue::ManyValues(values.into_boxed_slice())
    };
    Ok(DecodedResource {
        id,
        info,
        optional_info,
        values,
    })
}

fn decode_tune_payload(cursor: &mut Cursor) -> Result<TuneFrame, DecodeError> {
    let duration_ms = cursor.i64()?;
    let properties = cursor.i32()?;
    let num_resources = cursor.i32()?;
    let mut resources = Vec::with_capacity(num_resources.max(0) as usize);
    for _ in 0..num_resources.max(0) {
        resources.push(decode_resource(cursor)?);
    }
    Ok(TuneFrame {
        duration_ms,
        priority: if properties & PRIORITY_HIGH_BIT != 0 {
            Priority::High
        } else {
            Priority::Low
        },
        background: properties & BACKGROUND_BIT != 0,
        resources,
    })
}

/// Decodes one frame: `u8 module_id, u8 request_kind, <kind-specific
/// payload>` (§6). `module_id` is part of the wire contract but not yet
/// used to route between modules in this core, so it is consumed and
/// discarded.
pub fn decode_frame(bytes: &[u8]) -> Result<DecodedFrame, DecodeError> {
    let mut cursor = Cursor::new(bytes);
    let _module_id = cursor.u8()?;
    let kind = cursor.u8()?;
    match kind {
        REQ_RESOURCE_TUNE => Ok(DecodedFrame::Tune(decode_tune_payload(&mut cursor)?)),
        REQ_RETUNE => Ok(DecodedFrame::Retune {
            handle: cursor.u64()?,
            new_duration_ms: cursor.i64()?,
        }),
        REQ_UNTUNE => Ok(DecodedFrame::Untune { handle: cursor.u64()? }),
        REQ_SIGNAL_TUNE => Ok(DecodedFrame::SignalTune(decode_tune_payload(&mut cursor)?)),
        REQ_SIGNAL_UNTUNE => Ok(DecodedFrame::SignalUntune { handle: cursor.u64()? }),
        other => Err(DecodeError::UnsupportedKind(other)),
    }
}

/// The only write-back in the protocol: `i64 handle`, written before the
/// listener closes the connection (§6).
#[must_use]
pub fn encode_handle_response(handle: u64) -> [u8; 8] {
    (handle as i64).to_le_bytes()
}

/// A decoded tune request still carries no `permission_tag`; the listener
/// assigns that from the caller's UID (§3) before handing the frame to the
/// lifecycle manager. `permission_tag` is threaded in here once resolved.
pub fn into_resource_instances(resources: Vec<DecodedResource>) -> Vec<ResourceInstance> {
    resources.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tune_bytes(duration_ms: i64, properties: i32, values: &[i32]) -> Vec<u8> {
        let mut bytes = vec![0u8, REQ_RESOURCE_TUNE];
        bytes.extend(duration_ms.to_le_bytes());
        bytes.extend(properties.to_le_bytes());
        bytes.extend(1i32.to_le_bytes());
        bytes.extend(ResourceId::new(0, 1, false).raw().to_le_bytes());
        bytes.extend(ResourceInfo { core: 0, cluster: 0 }.packed().to_le_bytes());
        bytes.push(0);
        bytes.extend((values.len() as u16).to_le_bytes());
        for v in values {
            bytes.extend(v.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn decodes_a_tune_frame() {
        let bytes = tune_bytes(200, PRIORITY_HIGH_BIT | BACKGROUND_BIT, &[750]);
        let DecodedFrame::Tune(frame) = decode_frame(&bytes).unwrap() else {
            panic!("expected Tune");
        };
        assert_eq!(frame.duration_ms, 200);
        assert_eq!(frame.priority, Priority::High);
        assert!(frame.background);
        assert_eq!(frame.resources.len(), 1);
        assert_eq!(frame.resources[0].values.values(), &[750]);
    }

    #[test]
    fn decodes_untune_and_retune() {
        let mut untune = vec![0u8, REQ_UNTUNE];
        untune.extend(42u64.to_le_bytes());
        assert!(matches!(
            decode_frame(&untune).unwrap(),
            DecodedFrame::Untune { handle: 42 }
        ));

        let mut retune = vec![0u8, REQ_RETUNE];
        retune.extend(42u64.to_le_bytes());
        retune.extend(400i64.to_le_bytes());
        match decode_frame(&retune).unwrap() {
            DecodedFrame::Retune {
                handle,
                new_duration_ms,
            } => {
                assert_eq!(handle, 42);
                assert_eq!(new_duration_ms, 400);
            }
            _ => panic!("expected Retune"),
        }
    }

    #[test]
    fn truncated_frame_is_an_error() {
        assert_eq!(decode_frame(&[0]).unwrap_err(), DecodeError::Truncated);
    }

    #[test]
    fn get_prop_is_unsupported_by_the_core() {
        assert_eq!(
            decode_frame(&[0, REQ_GET_PROP]).unwrap_err(),
            DecodeError::UnsupportedKind(REQ_GET_PROP)
        );
    }

    #[test]
    fn handle_response_round_trips_through_le_bytes() {
        let bytes = encode_handle_response(7);
        assert_eq!(i64::from_le_bytes(bytes), 7);
    }
}

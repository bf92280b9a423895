//! Wire sync between an authoritative machine and its mirrors.
//!
//! Frames are a one-byte tag followed by the payload. Integers are LEB128
//! varints, strings are length-prefixed UTF-8, and the template inside an
//! open message is a length-prefixed JSON document.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::Rng;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::core::availability::AvailabilityDelta;
use crate::core::condition::ActionRunner;
use crate::core::machine::{ChoiceRef, DialogueStateMachine, MachineError};
use crate::schema::state::Outcome;
use crate::schema::template::DialogueTemplate;

const TAG_OPEN: u8 = 0;
const TAG_AVAILABILITY: u8 = 1;
const TAG_CHOOSE: u8 = 2;
const TAG_REJECTED: u8 = 3;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame ended unexpectedly")]
    UnexpectedEof,
    #[error("varint is longer than 5 bytes")]
    VarintTooLong,
    #[error("invalid UTF-8 in string: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("unknown message tag {0}")]
    UnknownTag(u8),
    #[error("invalid boolean byte {0}")]
    InvalidBool(u8),
    #[error("invalid choice index {0}")]
    InvalidChoice(i32),
    #[error("choice {0} does not fit in a wire index")]
    ChoiceOutOfRange(ChoiceRef),
    #[error("template payload error: {0}")]
    Template(#[from] serde_json::Error),
    #[error("{0} unread bytes after message")]
    TrailingBytes(usize),
}

/// Everything a mirror needs to attach to a running dialogue.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenDialogue {
    pub dialogue_id: String,
    pub template: Arc<DialogueTemplate>,
    pub state_key: String,
    /// Full availability snapshot at the time of opening.
    pub availability: AvailabilityDelta,
}

impl OpenDialogue {
    pub fn from_machine<R: Rng>(machine: &DialogueStateMachine<R>) -> Self {
        Self {
            dialogue_id: machine.id().to_string(),
            template: Arc::clone(machine.template()),
            state_key: machine.current_state_key().to_string(),
            availability: machine.full_snapshot(),
        }
    }

    /// Build the mirror machine described by this message.
    pub fn into_mirror(self) -> Result<DialogueStateMachine, MachineError> {
        let mut mirror =
            DialogueStateMachine::mirror(self.dialogue_id, self.template, Some(&self.state_key))?;
        mirror.apply_delta(&self.availability)?;
        Ok(mirror)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncMessage {
    /// Authoritative → mirror, once when the mirror attaches.
    Open(OpenDialogue),
    /// Authoritative → mirror, whenever an evaluation changed something.
    Availability(AvailabilityDelta),
    /// Mirror → authoritative: the user picked a choice.
    Choose(ChoiceRef),
    /// Authoritative → mirror: the pick was refused; resync to this state.
    ChoiceRejected { state_key: String },
}

impl SyncMessage {
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let mut buf = BytesMut::new();
        match self {
            Self::Open(open) => {
                buf.put_u8(TAG_OPEN);
                put_string(&mut buf, &open.dialogue_id);
                let template = serde_json::to_vec(open.template.as_ref())?;
                put_varint(&mut buf, template.len() as u32);
                buf.put_slice(&template);
                put_string(&mut buf, &open.state_key);
                put_delta(&mut buf, &open.availability);
            }
            Self::Availability(delta) => {
                buf.put_u8(TAG_AVAILABILITY);
                put_delta(&mut buf, delta);
            }
            Self::Choose(choice) => {
                buf.put_u8(TAG_CHOOSE);
                let index = choice
                    .to_wire()
                    .map_err(|_| WireError::ChoiceOutOfRange(*choice))?;
                put_varint(&mut buf, zigzag(index));
            }
            Self::ChoiceRejected { state_key } => {
                buf.put_u8(TAG_REJECTED);
                put_string(&mut buf, state_key);
            }
        }
        Ok(buf.freeze())
    }

    pub fn decode(mut buf: impl Buf) -> Result<Self, WireError> {
        let message = match get_u8(&mut buf)? {
            TAG_OPEN => {
                let dialogue_id = get_string(&mut buf)?;
                let template_bytes = get_bytes(&mut buf)?;
                let template: DialogueTemplate = serde_json::from_slice(&template_bytes)?;
                let state_key = get_string(&mut buf)?;
                let availability = get_delta(&mut buf)?;
                Self::Open(OpenDialogue {
                    dialogue_id,
                    template: Arc::new(template),
                    state_key,
                    availability,
                })
            }
            TAG_AVAILABILITY => Self::Availability(get_delta(&mut buf)?),
            TAG_CHOOSE => {
                let raw = unzigzag(get_varint(&mut buf)?);
                Self::Choose(ChoiceRef::from_wire(raw).ok_or(WireError::InvalidChoice(raw))?)
            }
            TAG_REJECTED => Self::ChoiceRejected {
                state_key: get_string(&mut buf)?,
            },
            tag => return Err(WireError::UnknownTag(tag)),
        };

        if buf.has_remaining() {
            return Err(WireError::TrailingBytes(buf.remaining()));
        }
        Ok(message)
    }

    /// Apply an authoritative message to a mirror. Returns false for
    /// messages a mirror has nothing to do with.
    pub fn apply_to_mirror<R: Rng>(
        &self,
        mirror: &mut DialogueStateMachine<R>,
    ) -> Result<bool, MachineError> {
        match self {
            Self::Availability(delta) => mirror.apply_delta(delta).map(|_| true),
            Self::ChoiceRejected { state_key } => mirror.select_state(state_key).map(|_| true),
            Self::Open(_) | Self::Choose(_) => Ok(false),
        }
    }
}

/// Handle a mirror's pick on the authoritative machine.
///
/// On refusal the machine is unchanged and the returned error is the
/// message to send back so the mirror can resynchronise.
pub fn reply_to_choice<R, A>(
    machine: &mut DialogueStateMachine<R>,
    choice: ChoiceRef,
    runner: &mut A,
) -> Result<Outcome, SyncMessage>
where
    R: Rng,
    A: ActionRunner + ?Sized,
{
    machine.choose(choice, runner).map_err(|e| {
        debug!(dialogue = %machine.id(), error = %e, "choice rejected");
        SyncMessage::ChoiceRejected {
            state_key: machine.current_state_key().to_string(),
        }
    })
}

// ---------------------------------------------------------------------------
// Primitive codecs
// ---------------------------------------------------------------------------

fn zigzag(v: i32) -> u32 {
    ((v << 1) ^ (v >> 31)) as u32
}

fn unzigzag(v: u32) -> i32 {
    ((v >> 1) as i32) ^ -((v & 1) as i32)
}

fn put_varint(buf: &mut BytesMut, mut v: u32) {
    while v >= 0x80 {
        buf.put_u8((v as u8 & 0x7f) | 0x80);
        v >>= 7;
    }
    buf.put_u8(v as u8);
}

fn get_varint(buf: &mut impl Buf) -> Result<u32, WireError> {
    let mut value = 0u32;
    for i in 0..5 {
        let byte = get_u8(buf)?;
        value |= u32::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(WireError::VarintTooLong)
}

fn get_u8(buf: &mut impl Buf) -> Result<u8, WireError> {
    if !buf.has_remaining() {
        return Err(WireError::UnexpectedEof);
    }
    Ok(buf.get_u8())
}

fn put_string(buf: &mut BytesMut, s: &str) {
    put_varint(buf, s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn get_bytes(buf: &mut impl Buf) -> Result<Vec<u8>, WireError> {
    let len = get_varint(buf)? as usize;
    if buf.remaining() < len {
        return Err(WireError::UnexpectedEof);
    }
    let mut bytes = vec![0; len];
    buf.copy_to_slice(&mut bytes);
    Ok(bytes)
}

fn get_string(buf: &mut impl Buf) -> Result<String, WireError> {
    Ok(String::from_utf8(get_bytes(buf)?)?)
}

fn put_delta(buf: &mut BytesMut, delta: &AvailabilityDelta) {
    let states: Vec<_> = delta.states().filter(|(_, c)| !c.is_empty()).collect();
    put_varint(buf, states.len() as u32);
    for (state, choices) in states {
        put_string(buf, state);
        put_varint(buf, choices.len() as u32);
        for (&choice, &available) in choices {
            put_varint(buf, choice);
            buf.put_u8(u8::from(available));
        }
    }
}

fn get_delta(buf: &mut impl Buf) -> Result<AvailabilityDelta, WireError> {
    let mut delta = AvailabilityDelta::new();
    let states = get_varint(buf)?;
    for _ in 0..states {
        let state = get_string(buf)?;
        let choices = get_varint(buf)?;
        for _ in 0..choices {
            let choice = get_varint(buf)?;
            let available = match get_u8(buf)? {
                0 => false,
                1 => true,
                other => return Err(WireError::InvalidBool(other)),
            };
            delta.insert(state.clone(), choice, available);
        }
    }
    Ok(delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_round_trip() {
        for v in [0u32, 1, 127, 128, 300, 16_384, u32::MAX] {
            let mut buf = BytesMut::new();
            put_varint(&mut buf, v);
            let mut frozen = buf.freeze();
            assert_eq!(get_varint(&mut frozen).unwrap(), v);
            assert!(!frozen.has_remaining());
        }
    }

    #[test]
    fn small_varints_are_one_byte() {
        let mut buf = BytesMut::new();
        put_varint(&mut buf, 5);
        assert_eq!(&buf[..], &[5]);
    }

    #[test]
    fn zigzag_escape_hatch() {
        assert_eq!(zigzag(-1), 1);
        assert_eq!(unzigzag(1), -1);
        assert_eq!(unzigzag(zigzag(42)), 42);
    }

    #[test]
    fn overlong_varint_is_rejected() {
        let mut buf = Bytes::from_static(&[0xff, 0xff, 0xff, 0xff, 0xff, 0x01]);
        assert!(matches!(get_varint(&mut buf), Err(WireError::VarintTooLong)));
    }

    #[test]
    fn availability_message_round_trip() {
        let mut delta = AvailabilityDelta::new();
        delta.insert("shop", 1, false);
        delta.insert("shop", 200, true);
        delta.insert("gate", 0, true);
        let message = SyncMessage::Availability(delta);

        let bytes = message.encode().unwrap();
        assert_eq!(SyncMessage::decode(bytes).unwrap(), message);
    }

    #[test]
    fn empty_delta_is_two_bytes() {
        let bytes = SyncMessage::Availability(AvailabilityDelta::new())
            .encode()
            .unwrap();
        assert_eq!(&bytes[..], &[TAG_AVAILABILITY, 0]);
    }

    #[test]
    fn choose_message_round_trip() {
        for choice in [ChoiceRef::Real(0), ChoiceRef::Real(9), ChoiceRef::EscapeHatch] {
            let bytes = SyncMessage::Choose(choice).encode().unwrap();
            assert_eq!(bytes.len(), 2);
            assert_eq!(SyncMessage::decode(bytes).unwrap(), SyncMessage::Choose(choice));
        }
    }

    #[test]
    fn oversized_choice_is_not_encoded() {
        let message = SyncMessage::Choose(ChoiceRef::Real(i32::MAX as usize + 1));
        assert!(matches!(
            message.encode(),
            Err(WireError::ChoiceOutOfRange(ChoiceRef::Real(_)))
        ));
    }

    #[test]
    fn negative_choice_other_than_escape_hatch() {
        let bytes = Bytes::from(vec![TAG_CHOOSE, zigzag(-3) as u8]);
        assert!(matches!(
            SyncMessage::decode(bytes),
            Err(WireError::InvalidChoice(-3))
        ));
    }

    #[test]
    fn malformed_frames() {
        assert!(matches!(
            SyncMessage::decode(Bytes::new()),
            Err(WireError::UnexpectedEof)
        ));
        assert!(matches!(
            SyncMessage::decode(Bytes::from_static(&[9])),
            Err(WireError::UnknownTag(9))
        ));
        assert!(matches!(
            SyncMessage::decode(Bytes::from_static(&[TAG_REJECTED, 4, b'a'])),
            Err(WireError::UnexpectedEof)
        ));
        assert!(matches!(
            SyncMessage::decode(Bytes::from_static(&[TAG_AVAILABILITY, 1, 1, b's', 1, 0, 2])),
            Err(WireError::InvalidBool(2))
        ));
        assert!(matches!(
            SyncMessage::decode(Bytes::from_static(&[TAG_CHOOSE, 0, 0])),
            Err(WireError::TrailingBytes(1))
        ));
    }

    #[test]
    fn rejected_message_round_trip() {
        let message = SyncMessage::ChoiceRejected {
            state_key: "bargain".to_string(),
        };
        let bytes = message.encode().unwrap();
        assert_eq!(SyncMessage::decode(bytes).unwrap(), message);
    }
}

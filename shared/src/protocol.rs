//! Application messages exchanged once a connection is established.
//!
//! Every message carries an explicit kind tag, so decoding is driven by the
//! packet contents and never by its position in the stream. Two encodings are
//! available and both fail closed: anything that is not exactly one
//! well-formed message is rejected with a [`DecodeError`].

use crate::transport::bincode_options;
use crate::{EntityState, Identity};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Server → client, once, right after the connection is accepted.
    IdentityAssignment { identity: Identity },
    /// Client → server, once per client tick. Only the sender's own identity
    /// is meaningful.
    PositionUpdate { identity: Identity, x: f32, y: f32 },
    /// Server → client, once per server tick. Entities appear in store order.
    Snapshot { entities: Vec<EntityState> },
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::IdentityAssignment { .. } => "identity assignment",
            Message::PositionUpdate { .. } => "position update",
            Message::Snapshot { .. } => "snapshot",
        }
    }

    /// Rejects messages carrying NaN or infinite coordinates.
    fn validate(self) -> Result<Self, DecodeError> {
        match &self {
            Message::PositionUpdate { identity, x, y } => {
                if !(x.is_finite() && y.is_finite()) {
                    return Err(DecodeError::NonFinite(*identity));
                }
            }
            Message::Snapshot { entities } => {
                if let Some(bad) = entities.iter().find(|e| !e.is_finite()) {
                    return Err(DecodeError::NonFinite(bad.identity));
                }
            }
            Message::IdentityAssignment { .. } => {}
        }
        Ok(self)
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty packet")]
    Empty,
    #[error("packet is not valid UTF-8")]
    NotUtf8,
    #[error("unknown message tag {0:?}")]
    UnknownTag(String),
    #[error("truncated {0} packet")]
    Truncated(&'static str),
    #[error("malformed {kind} packet: {reason}")]
    Malformed { kind: &'static str, reason: String },
    #[error("snapshot announced {expected} records but carried {actual}")]
    CountMismatch { expected: usize, actual: usize },
    #[error("non-finite position for identity {0}")]
    NonFinite(Identity),
    #[error("binary decode failed: {0}")]
    Binary(#[from] bincode::Error),
}

#[derive(Debug, Error)]
#[error("failed to encode message: {0}")]
pub struct EncodeError(#[from] bincode::Error);

/// Encoding used for application messages.
///
/// The server picks one and announces it in its connect acknowledgment, so
/// clients never need to be configured to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WireFormat {
    /// bincode: enum discriminant as the tag, length-prefixed record list.
    #[default]
    Binary,
    /// ASCII decimal with a one-letter tag and `;`-delimited records.
    Text,
}

impl WireFormat {
    pub fn encode(&self, message: &Message) -> Result<Vec<u8>, EncodeError> {
        match self {
            WireFormat::Binary => Ok(bincode_options().serialize(message)?),
            WireFormat::Text => Ok(encode_text(message).into_bytes()),
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Message, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        let message = match self {
            WireFormat::Binary => bincode_options().deserialize::<Message>(bytes)?,
            WireFormat::Text => decode_text(bytes)?,
        };
        message.validate()
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Binary => write!(f, "binary"),
            WireFormat::Text => write!(f, "text"),
        }
    }
}

impl FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binary" => Ok(WireFormat::Binary),
            "text" => Ok(WireFormat::Text),
            other => Err(format!("unknown wire format '{other}' (expected binary or text)")),
        }
    }
}

const TAG_IDENTITY: &str = "A";
const TAG_UPDATE: &str = "U";
const TAG_SNAPSHOT: &str = "S";

fn encode_text(message: &Message) -> String {
    match message {
        Message::IdentityAssignment { identity } => format!("{TAG_IDENTITY} {identity}"),
        Message::PositionUpdate { identity, x, y } => {
            format!("{TAG_UPDATE} {identity} {x:.6} {y:.6}")
        }
        Message::Snapshot { entities } => {
            let mut out = format!("{TAG_SNAPSHOT} {}", entities.len());
            for entity in entities {
                out.push_str(&format!(
                    ";{} {:.6} {:.6}",
                    entity.identity, entity.x, entity.y
                ));
            }
            out
        }
    }
}

fn decode_text(bytes: &[u8]) -> Result<Message, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::NotUtf8)?;
    let (tag, body) = match text.split_once(' ') {
        Some(parts) => parts,
        None => {
            return match text {
                TAG_IDENTITY => Err(DecodeError::Truncated("identity assignment")),
                TAG_UPDATE => Err(DecodeError::Truncated("position update")),
                TAG_SNAPSHOT => Err(DecodeError::Truncated("snapshot")),
                other => Err(DecodeError::UnknownTag(other.to_string())),
            }
        }
    };

    match tag {
        TAG_IDENTITY => Ok(Message::IdentityAssignment {
            identity: parse_identity(body, "identity assignment")?,
        }),
        TAG_UPDATE => {
            let record = parse_record(body, "position update")?;
            Ok(Message::PositionUpdate {
                identity: record.identity,
                x: record.x,
                y: record.y,
            })
        }
        TAG_SNAPSHOT => {
            let mut sections = body.split(';');
            let count = sections.next().unwrap_or_default();
            let expected = match count.parse::<usize>() {
                Ok(expected) if is_digits(count) => expected,
                _ => {
                    return Err(DecodeError::Malformed {
                        kind: "snapshot",
                        reason: format!("bad record count {count:?}"),
                    })
                }
            };
            let entities = sections
                .map(|record| parse_record(record, "snapshot"))
                .collect::<Result<Vec<_>, _>>()?;
            if entities.len() != expected {
                return Err(DecodeError::CountMismatch {
                    expected,
                    actual: entities.len(),
                });
            }
            Ok(Message::Snapshot { entities })
        }
        other => Err(DecodeError::UnknownTag(other.to_string())),
    }
}

fn parse_record(record: &str, kind: &'static str) -> Result<EntityState, DecodeError> {
    let mut tokens = record.split(' ');
    let identity = parse_identity(tokens.next().ok_or(DecodeError::Truncated(kind))?, kind)?;
    let x = parse_coord(tokens.next().ok_or(DecodeError::Truncated(kind))?, kind)?;
    let y = parse_coord(tokens.next().ok_or(DecodeError::Truncated(kind))?, kind)?;
    if let Some(extra) = tokens.next() {
        return Err(DecodeError::Malformed {
            kind,
            reason: format!("unexpected trailing token {extra:?}"),
        });
    }
    Ok(EntityState::new(identity, x, y))
}

fn parse_identity(token: &str, kind: &'static str) -> Result<Identity, DecodeError> {
    if !is_digits(token) {
        return Err(DecodeError::Malformed {
            kind,
            reason: format!("bad identity {token:?}: expected decimal digits"),
        });
    }
    token
        .parse::<u8>()
        .map(Identity)
        .map_err(|e| DecodeError::Malformed {
            kind,
            reason: format!("bad identity {token:?}: {e}"),
        })
}

fn parse_coord(token: &str, kind: &'static str) -> Result<f32, DecodeError> {
    let unsigned = token.strip_prefix('-').unwrap_or(token);
    let fixed_point = matches!(
        unsigned.split_once('.'),
        Some((whole, fraction)) if is_digits(whole) && is_digits(fraction)
    );
    if !fixed_point {
        return Err(DecodeError::Malformed {
            kind,
            reason: format!("bad coordinate {token:?}: expected fixed-point decimal"),
        });
    }
    token.parse::<f32>().map_err(|e| DecodeError::Malformed {
        kind,
        reason: format!("bad coordinate {token:?}: {e}"),
    })
}

fn is_digits(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

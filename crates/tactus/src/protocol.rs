// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Coordinator-control and clock-sync wire messages.
//!
//! Every WebSocket frame starts with a family tag:
//!
//! ```text
//! +--------------+--------------+---------+
//! | family tag   | sub-tag      | payload |
//! | "~" or "-"   | e.g. "Ping"  |  ...    |
//! +--------------+--------------+---------+
//! ```
//!
//! `"~"` carries the election/liveness protocol, `"-"` carries application
//! payloads (the clock synchronizer among them). Sub-messages are modelled
//! as one sum type per direction so decoding is a tag peek followed by a
//! total match; an unrecognized sub-tag is a [`DecodeError::UnknownTag`]
//! and the frame is dropped by the caller.

use crate::ser::{Chunk, CodecError, Stream};
use crate::timing::TimeStamp;
use std::fmt;

/// Family tag of coordinator-control frames.
pub const CONTROL_TAG: &str = "~";

/// Family tag of application-payload frames.
pub const PAYLOAD_TAG: &str = "-";

const TAG_NEGOTIATE: &str = "Negotiate";
const TAG_CONFIRM: &str = "Confirm";
const TAG_SWITCH: &str = "Switch";
const TAG_PING: &str = "Ping";
const TAG_PEERS: &str = "Peers";
const TAG_SYNC: &str = "Sync";
const TAG_RESPOND: &str = "Respond";

/// Decode failure for a sub-message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The frame ended mid-field or carried invalid bytes.
    Codec(CodecError),
    /// The sub-tag did not match any expected message.
    UnknownTag(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Codec(err) => write!(f, "{}", err),
            DecodeError::UnknownTag(tag) => write!(f, "unknown message tag {:?}", tag),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<CodecError> for DecodeError {
    fn from(err: CodecError) -> Self {
        DecodeError::Codec(err)
    }
}

/// One peer record inside a `Peers` gossip frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub name: String,
    pub port: u16,
    pub age_ms: u32,
}

/// Coordinator-control messages travelling client -> server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToServerMsg {
    /// Offer to become this server's client, declaring own group size.
    Negotiate {
        name: String,
        port: u16,
        num_clients: i32,
    },
    /// Liveness response carrying the client's listener endpoint.
    Ping { name: String, port: u16 },
    /// Acknowledge a positive election decision.
    Confirm,
}

impl ToServerMsg {
    pub fn encode(&self) -> Chunk {
        let mut body = Chunk::new();
        match self {
            ToServerMsg::Negotiate {
                name,
                port,
                num_clients,
            } => {
                body.put_str(TAG_NEGOTIATE);
                body.put_str(name);
                body.put_u16(*port);
                body.put_i32(*num_clients);
            }
            ToServerMsg::Ping { name, port } => {
                body.put_str(TAG_PING);
                body.put_str(name);
                body.put_u16(*port);
            }
            ToServerMsg::Confirm => {
                body.put_str(TAG_CONFIRM);
            }
        }
        body
    }

    pub fn decode(stream: &mut Stream<'_>) -> Result<Self, DecodeError> {
        let tag = stream.read_str()?;
        match tag.as_str() {
            TAG_NEGOTIATE => Ok(ToServerMsg::Negotiate {
                name: stream.read_str()?,
                port: stream.read_u16()?,
                num_clients: stream.read_i32()?,
            }),
            TAG_PING => Ok(ToServerMsg::Ping {
                name: stream.read_str()?,
                port: stream.read_u16()?,
            }),
            TAG_CONFIRM => Ok(ToServerMsg::Confirm),
            _ => Err(DecodeError::UnknownTag(tag)),
        }
    }
}

/// Coordinator-control messages travelling server -> client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToClientMsg {
    /// Election decision for a pending `Negotiate`.
    Confirm { accept: bool },
    /// Redirect this client to a new coordinator.
    Switch { host: String, port: u16 },
    /// Liveness request.
    Ping,
    /// Gossip of the coordinator's peer set.
    Peers(Vec<PeerRecord>),
}

impl ToClientMsg {
    pub fn encode(&self) -> Chunk {
        let mut body = Chunk::new();
        match self {
            ToClientMsg::Confirm { accept } => {
                body.put_str(TAG_CONFIRM);
                body.put_i32(i32::from(*accept));
            }
            ToClientMsg::Switch { host, port } => {
                body.put_str(TAG_SWITCH);
                body.put_str(host);
                body.put_u16(*port);
            }
            ToClientMsg::Ping => {
                body.put_str(TAG_PING);
            }
            ToClientMsg::Peers(records) => {
                body.put_str(TAG_PEERS);
                body.put_i32(records.len() as i32);
                for record in records {
                    body.put_str(&record.name);
                    body.put_u16(record.port);
                    body.put_u32(record.age_ms);
                }
            }
        }
        body
    }

    pub fn decode(stream: &mut Stream<'_>) -> Result<Self, DecodeError> {
        let tag = stream.read_str()?;
        match tag.as_str() {
            TAG_CONFIRM => Ok(ToClientMsg::Confirm {
                accept: stream.read_i32()? != 0,
            }),
            TAG_SWITCH => Ok(ToClientMsg::Switch {
                host: stream.read_str()?,
                port: stream.read_u16()?,
            }),
            TAG_PING => Ok(ToClientMsg::Ping),
            TAG_PEERS => {
                let count = stream.read_i32()?.max(0);
                let mut records = Vec::with_capacity(count.min(1024) as usize);
                for _ in 0..count {
                    records.push(PeerRecord {
                        name: stream.read_str()?,
                        port: stream.read_u16()?,
                        age_ms: stream.read_u32()?,
                    });
                }
                Ok(ToClientMsg::Peers(records))
            }
            _ => Err(DecodeError::UnknownTag(tag)),
        }
    }
}

/// Clock synchronizer messages (the `"-"` payload family).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClockMsg {
    /// Client probe carrying its transmit time.
    Sync { t1: TimeStamp },
    /// Server answer echoing `t1` with its own reception time.
    Respond { t1: TimeStamp, t2: TimeStamp },
}

impl ClockMsg {
    pub fn encode(&self) -> Chunk {
        let mut body = Chunk::new();
        match self {
            ClockMsg::Sync { t1 } => {
                body.put_str(TAG_SYNC);
                body.put(t1);
            }
            ClockMsg::Respond { t1, t2 } => {
                body.put_str(TAG_RESPOND);
                body.put(t1);
                body.put(t2);
            }
        }
        body
    }

    pub fn decode(stream: &mut Stream<'_>) -> Result<Self, DecodeError> {
        let tag = stream.read_str()?;
        match tag.as_str() {
            TAG_SYNC => Ok(ClockMsg::Sync {
                t1: TimeStamp::new(stream.read_f64()?),
            }),
            TAG_RESPOND => Ok(ClockMsg::Respond {
                t1: TimeStamp::new(stream.read_f64()?),
                t2: TimeStamp::new(stream.read_f64()?),
            }),
            _ => Err(DecodeError::UnknownTag(tag)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_to_server(msg: ToServerMsg) {
        let body = msg.encode();
        let mut stream = Stream::new(body.as_bytes());
        let decoded = ToServerMsg::decode(&mut stream).expect("Decode should succeed");
        assert_eq!(decoded, msg);
        assert!(stream.is_eof());
    }

    fn roundtrip_to_client(msg: ToClientMsg) {
        let body = msg.encode();
        let mut stream = Stream::new(body.as_bytes());
        let decoded = ToClientMsg::decode(&mut stream).expect("Decode should succeed");
        assert_eq!(decoded, msg);
        assert!(stream.is_eof());
    }

    #[test]
    fn test_roundtrip_negotiate() {
        roundtrip_to_server(ToServerMsg::Negotiate {
            name: "host-a.local".into(),
            port: 8001,
            num_clients: 3,
        });
    }

    #[test]
    fn test_roundtrip_ping_response() {
        roundtrip_to_server(ToServerMsg::Ping {
            name: "host-b".into(),
            port: 9000,
        });
    }

    #[test]
    fn test_roundtrip_confirm_ack() {
        roundtrip_to_server(ToServerMsg::Confirm);
    }

    #[test]
    fn test_roundtrip_confirm_decision() {
        roundtrip_to_client(ToClientMsg::Confirm { accept: true });
        roundtrip_to_client(ToClientMsg::Confirm { accept: false });
    }

    #[test]
    fn test_roundtrip_switch() {
        roundtrip_to_client(ToClientMsg::Switch {
            host: "host-c.local.".into(),
            port: 8001,
        });
    }

    #[test]
    fn test_roundtrip_ping_request() {
        roundtrip_to_client(ToClientMsg::Ping);
    }

    #[test]
    fn test_roundtrip_peers() {
        roundtrip_to_client(ToClientMsg::Peers(vec![
            PeerRecord {
                name: "alpha".into(),
                port: 8001,
                age_ms: 0,
            },
            PeerRecord {
                name: "bravo".into(),
                port: 8002,
                age_ms: 4250,
            },
        ]));
        roundtrip_to_client(ToClientMsg::Peers(Vec::new()));
    }

    #[test]
    fn test_roundtrip_clock_messages() {
        for msg in [
            ClockMsg::Sync {
                t1: TimeStamp::new(1.25),
            },
            ClockMsg::Respond {
                t1: TimeStamp::new(1.25),
                t2: TimeStamp::new(1.2525),
            },
        ] {
            let body = msg.encode();
            let mut stream = Stream::new(body.as_bytes());
            let decoded = ClockMsg::decode(&mut stream).expect("Decode should succeed");
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn test_unknown_tag_is_reported() {
        let mut body = Chunk::new();
        body.put_str("Bogus");

        let mut stream = Stream::new(body.as_bytes());
        match ToServerMsg::decode(&mut stream) {
            Err(DecodeError::UnknownTag(tag)) => assert_eq!(tag, "Bogus"),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_truncated_frame_is_malformed() {
        let full = ToServerMsg::Negotiate {
            name: "host-a".into(),
            port: 8001,
            num_clients: 1,
        }
        .encode();
        let truncated = &full.as_bytes()[..full.len() - 2];

        let mut stream = Stream::new(truncated);
        match ToServerMsg::decode(&mut stream) {
            Err(DecodeError::Codec(CodecError::ReadFailed { .. })) => {}
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_negative_peer_count_reads_as_empty() {
        let mut body = Chunk::new();
        body.put_str("Peers");
        body.put_i32(-4);

        let mut stream = Stream::new(body.as_bytes());
        match ToClientMsg::decode(&mut stream) {
            Ok(ToClientMsg::Peers(records)) => assert!(records.is_empty()),
            other => panic!("unexpected result {:?}", other),
        }
    }
}

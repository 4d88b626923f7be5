//! Fixed-layout records exchanged with the directory broker.
//!
//! The broker speaks two well-known `SOCK_SEQPACKET` sockets: servers
//! connect to the "offers" socket and send one [`OfferOpenRecord`] per
//! advertised interface (the connection itself then sits idle, doubling as
//! the broker's only signal that the server process is still alive); clients
//! connect to the "opens" socket, send one [`OfferOpenRecord`] naming the
//! interface they want, and that same connection becomes their session
//! transport once the broker hands its far end's fd to the server.

use crate::protocol::MAX_PROTOCOL_ID_LEN;

const FIELD_LEN: usize = 128;

/// What a server or client sends on first connecting to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferOpenRecord {
    pub max_payload: u64,
    pub protocol_id: String,
    pub instance_name: String,
}

const MAX_PAYLOAD_LEN: usize = 8;

/// Wire size of an [`OfferOpenRecord`]: an 8-byte `max_payload` (`size_t`
/// on the wire) plus two fixed 128-byte NUL-padded string fields.
pub const RECORD_LEN: usize = MAX_PAYLOAD_LEN + FIELD_LEN + FIELD_LEN;

impl OfferOpenRecord {
    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let mut buf = [0u8; RECORD_LEN];
        buf[0..MAX_PAYLOAD_LEN].copy_from_slice(&self.max_payload.to_ne_bytes());
        write_field(&mut buf[MAX_PAYLOAD_LEN..MAX_PAYLOAD_LEN + FIELD_LEN], &self.protocol_id);
        write_field(&mut buf[MAX_PAYLOAD_LEN + FIELD_LEN..], &self.instance_name);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() != RECORD_LEN {
            return None;
        }
        let mut max_payload_bytes = [0u8; MAX_PAYLOAD_LEN];
        max_payload_bytes.copy_from_slice(&buf[0..MAX_PAYLOAD_LEN]);
        let max_payload = u64::from_ne_bytes(max_payload_bytes);
        let protocol_id = read_field(&buf[MAX_PAYLOAD_LEN..MAX_PAYLOAD_LEN + FIELD_LEN])?;
        let instance_name = read_field(&buf[MAX_PAYLOAD_LEN + FIELD_LEN..])?;
        if protocol_id.len() > MAX_PROTOCOL_ID_LEN {
            return None;
        }
        Some(Self {
            max_payload,
            protocol_id,
            instance_name,
        })
    }
}

fn write_field(dst: &mut [u8], value: &str) {
    let bytes = value.as_bytes();
    let n = bytes.len().min(dst.len() - 1);
    dst[..n].copy_from_slice(&bytes[..n]);
}

fn read_field(src: &[u8]) -> Option<String> {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    std::str::from_utf8(&src[..end]).ok().map(str::to_owned)
}

/// The single byte the broker forwards after handing the session fd to the
/// server (or, on denial, sends back directly to the client on its own
/// connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlByte {
    Welcome = 1,
    DeniedNotPermitted = 2,
    DeniedMaxPayloadMismatch = 3,
    DeniedNotFound = 4,
}

impl ControlByte {
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Welcome),
            2 => Some(Self::DeniedNotPermitted),
            3 => Some(Self::DeniedMaxPayloadMismatch),
            4 => Some(Self::DeniedNotFound),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trips() {
        let record = OfferOpenRecord {
            max_payload: 256,
            protocol_id: "echo.v1".to_string(),
            instance_name: "default".to_string(),
        };
        let bytes = record.to_bytes();
        assert_eq!(OfferOpenRecord::from_bytes(&bytes).unwrap(), record);
    }

    #[test]
    fn from_bytes_rejects_wrong_length() {
        assert!(OfferOpenRecord::from_bytes(&[0u8; 4]).is_none());
    }

    #[test]
    fn control_byte_round_trips() {
        for b in [
            ControlByte::Welcome,
            ControlByte::DeniedNotPermitted,
            ControlByte::DeniedMaxPayloadMismatch,
            ControlByte::DeniedNotFound,
        ] {
            assert_eq!(ControlByte::from_byte(b.to_byte()), Some(b));
        }
    }
}

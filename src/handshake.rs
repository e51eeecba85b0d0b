//! Tunnel handshake framing.
//!
//! The client opens every tunnel connection with one fixed 512-byte
//! request; the first 276 bytes are encrypted, the trailing IV travels in
//! the clear so the server can derive the same session key:
//!
//! ```text
//! +-------+------+------+------+
//! | MAGIC | HOST | PORT |  IV  |
//! +-------+------+------+------+
//! |   4   | 257  |  15  | 236  |
//! +-------+------+------+------+
//! ```
//!
//! The server answers with 4 encrypted bytes: MAGIC on success, zeros on
//! failure.

use std::io;
use std::str;

use crate::crypto::{self, Crypto};
use crate::proto::{
    HOST_OFFSET, IV_LEN, IV_OFFSET, MAGIC, MAX_HOST_LEN, PORT_OFFSET, REPLY_LEN, REQUEST_LEN,
};

#[derive(Debug, PartialEq, Eq)]
pub struct Request {
    pub host: String,
    pub port: String,
}

impl Request {
    pub fn new(host: &str, port: u16) -> io::Result<Request> {
        if host.is_empty() || host.len() > MAX_HOST_LEN {
            return Err(other(&format!("bad host length {}", host.len())));
        }
        Ok(Request {
            host: host.to_string(),
            port: port.to_string(),
        })
    }

    /// Build the 512-byte request frame, advancing `crypto`'s encrypt
    /// stream over the first 276 bytes.
    pub fn encode(&self, crypto: &mut Crypto, iv: &[u8; IV_LEN]) -> [u8; REQUEST_LEN] {
        let mut buf = [0u8; REQUEST_LEN];
        buf[..HOST_OFFSET].copy_from_slice(&MAGIC.to_be_bytes());
        buf[HOST_OFFSET..HOST_OFFSET + self.host.len()].copy_from_slice(self.host.as_bytes());
        buf[PORT_OFFSET..PORT_OFFSET + self.port.len()].copy_from_slice(self.port.as_bytes());
        buf[IV_OFFSET..].copy_from_slice(iv);
        crypto.encrypt(&mut buf[..IV_OFFSET]);
        buf
    }

    /// Derive the session key from the frame's IV and `key`, decrypt the
    /// header in place and extract the request. The returned `Crypto` has
    /// its decrypt stream advanced past the header, matching the peer.
    pub fn decode(buf: &mut [u8; REQUEST_LEN], key: &[u8]) -> io::Result<(Crypto, Request)> {
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&buf[IV_OFFSET..]);

        let session_key = crypto::derive_key(&iv, key);
        let mut crypto = Crypto::new(&session_key);
        crypto.decrypt(&mut buf[..IV_OFFSET]);

        let magic = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != MAGIC {
            return Err(other("request magic mismatch"));
        }

        let host = cstr(&buf[HOST_OFFSET..PORT_OFFSET], MAX_HOST_LEN)?;
        let port = cstr(&buf[PORT_OFFSET..IV_OFFSET], IV_OFFSET - PORT_OFFSET - 1)?;

        Ok((
            crypto,
            Request {
                host: host.to_string(),
                port: port.to_string(),
            },
        ))
    }
}

pub fn encode_reply(crypto: &mut Crypto, success: bool) -> [u8; REPLY_LEN] {
    let mut buf = [0u8; REPLY_LEN];
    if success {
        buf.copy_from_slice(&MAGIC.to_be_bytes());
    }
    crypto.encrypt(&mut buf);
    buf
}

pub fn decode_reply(crypto: &mut Crypto, buf: &mut [u8; REPLY_LEN]) -> bool {
    crypto.decrypt(buf);
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) == MAGIC
}

/// NUL-terminated string out of a fixed field, truncated to `max` bytes
/// when longer or unterminated.
fn cstr(field: &[u8], max: usize) -> io::Result<&str> {
    let len = field
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(field.len())
        .min(max);
    str::from_utf8(&field[..len]).map_err(|_| other("request field not ascii"))
}

#[inline]
fn other(desc: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, desc)
}

//! Socks5 protocol definition ([RFC1928](https://tools.ietf.org/rfc/rfc1928.txt)),
//! the subset spoken on the client's ingress side.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const VERSION: u8 = 0x05;
const AUTH_METHOD_NONE: u8 = 0x00;
const AUTH_METHOD_NO_ACCEPT: u8 = 0xff;
const CMD_TCP_CONNECT: u8 = 0x01;

pub const ADDR_TYPE_IPV4: u8 = 0x01;
pub const ADDR_TYPE_DOMAIN_NAME: u8 = 0x03;
pub const ADDR_TYPE_IPV6: u8 = 0x04;

pub const REPLY_SUCCEEDED: u8 = 0x00;
pub const REPLY_GENERAL_FAILURE: u8 = 0x01;
pub const REPLY_CONNECTION_REFUSED: u8 = 0x05;
pub const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const REPLY_ADDR_TYPE_NOT_SUPPORTED: u8 = 0x08;

// +----+-----+-------+------+----------+----------+
// |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
// +----+-----+-------+------+----------+----------+
// | 1  |  1  | X'00' |  1   |    4     |    2     |
// +----+-----+-------+------+----------+----------+
//
// BND.ADDR/BND.PORT are always the zeroed IPv4 form.
pub const REPLY_LEN: usize = 10;

pub fn reply(rep: u8) -> [u8; REPLY_LEN] {
    let mut buf = [0u8; REPLY_LEN];
    buf[0] = VERSION;
    buf[1] = rep;
    buf[3] = ADDR_TYPE_IPV4;
    buf
}

/// The destination named by a CONNECT request, in the presentation form
/// carried on the tunnel wire.
#[derive(Debug, PartialEq, Eq)]
pub struct ReqAddr {
    pub host: String,
    pub port: u16,
}

/// Drive the negotiation and request exchange with the application.
///
/// Protocol violations send their rejection frame (`05 ff` or a reply
/// with the matching rep code) before returning an
/// `ErrorKind::InvalidData` error, so the caller can linger and close.
/// Transport faults surface with their own error kind.
pub async fn handshake<S>(conn: &mut S) -> io::Result<ReqAddr>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // +-----+----------+----------+
    // | VER | NMETHODS | METHODS  |
    // +-----+----------+----------+
    // |  1  |    1     | 1 to 255 |
    // +-----+----------+----------+
    let mut head = [0u8; 2];
    conn.read_exact(&mut head).await?;
    let mut methods = vec![0u8; head[1] as usize];
    conn.read_exact(&mut methods).await?;

    if head[0] != VERSION || !methods.contains(&AUTH_METHOD_NONE) {
        conn.write_all(&[VERSION, AUTH_METHOD_NO_ACCEPT]).await?;
        return Err(invalid("no supported auth method given"));
    }
    conn.write_all(&[VERSION, AUTH_METHOD_NONE]).await?;

    // +-----+-----+-------+------+----------+----------+
    // | VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
    // +-----+-----+-------+------+----------+----------+
    // |  1  |  1  | X'00' |  1   | Variable |    2     |
    // +-----+-----+-------+------+----------+----------+
    let mut head = [0u8; 4];
    conn.read_exact(&mut head).await?;
    if head[0] != VERSION {
        conn.write_all(&reply(REPLY_GENERAL_FAILURE)).await?;
        return Err(invalid("only support socks version 5"));
    }
    if head[1] != CMD_TCP_CONNECT {
        conn.write_all(&reply(REPLY_COMMAND_NOT_SUPPORTED)).await?;
        return Err(invalid("only support tcp connect command"));
    }

    let host = match head[3] {
        ADDR_TYPE_IPV4 => {
            let mut buf = [0u8; 4];
            conn.read_exact(&mut buf).await?;
            Ipv4Addr::from(buf).to_string()
        }
        ADDR_TYPE_DOMAIN_NAME => {
            let mut len = [0u8; 1];
            conn.read_exact(&mut len).await?;
            let mut buf = vec![0u8; len[0] as usize];
            conn.read_exact(&mut buf).await?;
            match String::from_utf8(buf) {
                Ok(domain) => domain,
                Err(e) => {
                    conn.write_all(&reply(REPLY_GENERAL_FAILURE)).await?;
                    return Err(invalid(&format!("domain not valid utf-8, {}", e)));
                }
            }
        }
        ADDR_TYPE_IPV6 => {
            let mut buf = [0u8; 16];
            conn.read_exact(&mut buf).await?;
            Ipv6Addr::from(buf).to_string()
        }
        n => {
            conn.write_all(&reply(REPLY_ADDR_TYPE_NOT_SUPPORTED)).await?;
            return Err(invalid(&format!("unknown ATYP received: {}", n)));
        }
    };

    let mut port = [0u8; 2];
    conn.read_exact(&mut port).await?;

    Ok(ReqAddr {
        host,
        port: u16::from_be_bytes(port),
    })
}

#[inline]
fn invalid(desc: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, desc)
}

use std::fmt;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::crypto::{CipherStream, Crypto};
use crate::proto::BUF_SIZE;

/// One relay direction: read a chunk from the source, run the keystream
/// over it, then drain it into the sink before reading again. Holding
/// the read back until the sink has taken everything is what keeps a
/// slow receiver from being buried by a fast sender.
struct Pipe {
    cipher: CipherStream,
    buf: Vec<u8>,
    nread: u64,
    nwrite: u64,
}

impl Pipe {
    fn new(cipher: CipherStream) -> Pipe {
        Pipe {
            cipher,
            buf: vec![0u8; BUF_SIZE],
            nread: 0,
            nwrite: 0,
        }
    }

    async fn run<R, W>(&mut self, reader: &mut R, writer: &mut W) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            let n = reader.read(&mut self.buf).await?;
            if n == 0 {
                return Ok(());
            }
            self.nread += n as u64;

            self.cipher.apply(&mut self.buf[..n]);

            writer.write_all(&self.buf[..n]).await?;
            self.nwrite += n as u64;
        }
    }
}

/// Relay bytes between the cleartext side and the tunnel side until
/// either direction ends. Bytes headed into the tunnel pass through the
/// encrypt stream, bytes leaving it through the decrypt stream; both
/// streams continue from wherever the handshake left them.
///
/// EOF or a transport error on one direction tears down both: the
/// remaining pipe is dropped and both sockets close with it.
pub async fn relay<A, B>(plain: A, tunnel: B, crypto: Crypto) -> io::Result<Stat>
where
    A: AsyncRead + AsyncWrite,
    B: AsyncRead + AsyncWrite,
{
    let (enc, dec) = crypto.into_split();
    let (mut plain_r, mut plain_w) = tokio::io::split(plain);
    let (mut tunnel_r, mut tunnel_w) = tokio::io::split(tunnel);

    let mut tx = Pipe::new(enc);
    let mut rx = Pipe::new(dec);

    let result = tokio::select! {
        res = tx.run(&mut plain_r, &mut tunnel_w) => res,
        res = rx.run(&mut tunnel_r, &mut plain_w) => res,
    };

    let stat = Stat {
        tx_read: tx.nread,
        tx_write: tx.nwrite,
        rx_read: rx.nread,
        rx_write: rx.nwrite,
    };
    result.map(|_| stat)
}

#[derive(Copy, Clone, Debug)]
pub struct Stat {
    tx_read: u64,
    tx_write: u64,
    rx_read: u64,
    rx_write: u64,
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "recv: {}/{} send: {}/{}",
            self.rx_write, self.rx_read, self.tx_read, self.tx_write
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::{self, Crypto};
    use crate::proto::IV_LEN;

    fn key() -> [u8; crypto::KEY_LEN] {
        crypto::derive_key(&[0x5au8; IV_LEN], b"relay test")
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_relay_both_directions() {
        // small duplex buffers force plenty of partial writes
        let (plain_far, plain_near) = tokio::io::duplex(64);
        let (tunnel_near, tunnel_far) = tokio::io::duplex(64);

        let relay = tokio::spawn(relay(plain_near, tunnel_near, Crypto::new(&key())));

        let up = pattern(256 * 1024);
        let down = pattern(96 * 1024);

        let (mut plain_r, mut plain_w) = tokio::io::split(plain_far);
        let (mut tunnel_r, mut tunnel_w) = tokio::io::split(tunnel_far);

        // upload: the tunnel side sees it encrypted
        let up_send = {
            let up = up.clone();
            tokio::spawn(async move {
                plain_w.write_all(&up).await.unwrap();
                plain_w
            })
        };
        let mut got_up = vec![0u8; up.len()];
        tunnel_r.read_exact(&mut got_up).await.unwrap();
        let mut peer = Crypto::new(&key());
        peer.decrypt(&mut got_up);
        assert_eq!(got_up, up);
        let mut plain_w = up_send.await.unwrap();

        // download: the cleartext side sees it decrypted
        let down_send = {
            let down = down.clone();
            tokio::spawn(async move {
                let mut peer = Crypto::new(&key());
                let mut buf = down;
                peer.encrypt(&mut buf);
                tunnel_w.write_all(&buf).await.unwrap();
                tunnel_w
            })
        };
        let mut got_down = vec![0u8; down.len()];
        plain_r.read_exact(&mut got_down).await.unwrap();
        assert_eq!(got_down, down);
        down_send.await.unwrap();

        // upload EOF tears the relay down
        plain_w.shutdown().await.unwrap();
        let stat = relay.await.unwrap().unwrap();
        assert_eq!(
            format!("{}", stat),
            format!(
                "recv: {}/{} send: {}/{}",
                down.len(),
                down.len(),
                up.len(),
                up.len()
            )
        );
    }

    #[tokio::test]
    async fn test_relay_stops_on_tunnel_eof() {
        let (plain_far, plain_near) = tokio::io::duplex(64);
        let (tunnel_near, tunnel_far) = tokio::io::duplex(64);

        let relay = tokio::spawn(relay(plain_near, tunnel_near, Crypto::new(&key())));

        drop(tunnel_far);
        relay.await.unwrap().unwrap();

        // both sides are gone once the relay returns
        let (mut plain_r, _plain_w) = tokio::io::split(plain_far);
        let mut buf = [0u8; 1];
        assert_eq!(plain_r.read(&mut buf).await.unwrap(), 0);
    }
}

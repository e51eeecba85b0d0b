use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use log::debug;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{sleep, timeout};

use crate::proto::{CLOSE_WAIT_LINGER, CONNECT_TIMEOUT};

/// Resolve `address:port`, returning the first candidate.
pub async fn resolve(address: &str, port: u16) -> io::Result<SocketAddr> {
    lookup_host((address, port))
        .await?
        .next()
        .ok_or_else(|| other(&format!("no address found for {}:{}", address, port)))
}

/// Resolve the destination and dial the candidates in order, returning
/// the first stream that connects and otherwise the last error seen.
/// `port` arrives as the decimal string carried on the wire.
pub async fn connect(host: &str, port: &str) -> io::Result<TcpStream> {
    let port: u16 = port
        .parse()
        .map_err(|_| other(&format!("invalid port {:?}", port)))?;

    let addrs = io_timeout(CONNECT_TIMEOUT, async {
        lookup_host((host, port)).await
    })
    .await?;

    let mut err = None;
    for addr in addrs {
        match timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(conn)) => return Ok(conn),
            Ok(Err(e)) => {
                debug!("connect {} failed, {}", addr, e);
                err = Some(e);
            }
            Err(_) => {
                err = Some(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect {} timed out", addr),
                ));
            }
        }
    }

    Err(err.unwrap_or_else(|| other("no socket addr for connect")))
}

/// Bound an I/O operation, turning expiry into `ErrorKind::TimedOut`.
pub async fn io_timeout<F, T>(duration: Duration, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match timeout(duration, fut).await {
        Ok(res) => res,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "operation timed out")),
    }
}

/// Hold the socket open for one more second so the peer can drain a
/// final reply, then close it.
pub async fn close_wait(conn: TcpStream) {
    sleep(CLOSE_WAIT_LINGER).await;
    drop(conn);
}

#[inline]
fn other(desc: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, desc)
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_resolve_literal() {
        let addr = resolve("127.0.0.1", 1080).await.unwrap();
        assert_eq!(addr, "127.0.0.1:1080".parse().unwrap());
    }

    #[tokio::test]
    async fn test_connect_literal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let conn = connect("127.0.0.1", &port.to_string()).await.unwrap();
        let (_accepted, peer) = listener.accept().await.unwrap();
        assert_eq!(conn.local_addr().unwrap(), peer);
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_port() {
        let err = connect("127.0.0.1", "not-a-port").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }
}

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::ServerConfig;
use crate::handshake::{self, Request};
use crate::net;
use crate::proto::{HANDSHAKE_TIMEOUT, MAX_CONNECTIONS, REQUEST_LEN};
use crate::transfer::{self, Stat};

pub async fn serve(config: ServerConfig) -> io::Result<()> {
    let conns = Arc::new(Semaphore::new(MAX_CONNECTIONS));
    let mut tasks = JoinSet::new();

    // bind everything up front so a bad endpoint fails startup, then
    // accept on all listeners, each with its own pre-shared key
    for listener in config.listeners {
        let listen = net::resolve(&listener.address, listener.port).await?;
        let socket = TcpListener::bind(listen).await?;
        info!("listening for {}", listen);
        tasks.spawn(accept_loop(socket, Arc::new(listener.key), conns.clone()));
    }

    while let Some(res) = tasks.join_next().await {
        res.map_err(|e| other(&format!("listener task failed, {}", e)))??;
    }
    Ok(())
}

async fn accept_loop(
    listener: TcpListener,
    key: Arc<Vec<u8>>,
    conns: Arc<Semaphore>,
) -> io::Result<()> {
    loop {
        // a failed accept (EMFILE under load, a reset in the backlog)
        // must not take the listener down with it
        let (conn, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("accept failed, {}", e);
                continue;
            }
        };
        let permit = match conns.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!("connection limit reached, dropping {}", peer);
                continue;
            }
        };

        let key = key.clone();
        tokio::spawn(async move {
            let _permit = permit;
            match handle(conn, peer, &key).await {
                Ok(stat) => info!("{} - proxied, {}", peer, stat),
                Err(e) => warn!("{} - {}", peer, e),
            }
        });
    }
}

pub(crate) async fn handle(mut conn: TcpStream, peer: SocketAddr, key: &[u8]) -> io::Result<Stat> {
    conn.set_nodelay(true)?;

    let mut frame = [0u8; REQUEST_LEN];
    net::io_timeout(HANDSHAKE_TIMEOUT, conn.read_exact(&mut frame)).await?;

    // a wrong key decrypts to a wrong magic; both abort with no reply
    let (mut crypto, request) = Request::decode(&mut frame, key)?;
    info!("{} - connect {}:{}", peer, request.host, request.port);

    let remote = match net::connect(&request.host, &request.port).await {
        Ok(remote) => remote,
        Err(e) => {
            let reply = handshake::encode_reply(&mut crypto, false);
            net::io_timeout(HANDSHAKE_TIMEOUT, conn.write_all(&reply)).await?;
            net::close_wait(conn).await;
            return Err(other(&format!(
                "connect {}:{}, {}",
                request.host, request.port, e
            )));
        }
    };

    let reply = handshake::encode_reply(&mut crypto, true);
    net::io_timeout(HANDSHAKE_TIMEOUT, conn.write_all(&reply)).await?;

    transfer::relay(remote, conn, crypto).await
}

#[inline]
fn other(desc: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, desc)
}

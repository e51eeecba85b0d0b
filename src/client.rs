use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::config::ClientConfig;
use crate::crypto::{self, Crypto};
use crate::handshake::{self, Request};
use crate::net;
use crate::proto::{HANDSHAKE_TIMEOUT, IV_LEN, MAX_CONNECTIONS, REPLY_LEN};
use crate::socks5;
use crate::transfer::{self, Stat};
use crate::util;

/// Pre-resolved upstream descriptor, immutable after startup.
pub(crate) struct Server {
    addr: SocketAddr,
    key: Vec<u8>,
}

pub async fn serve(config: ClientConfig) -> io::Result<()> {
    let mut servers = Vec::with_capacity(config.servers.len());
    for server in &config.servers {
        let addr = net::resolve(&server.address, server.port).await?;
        servers.push(Server {
            addr,
            key: server.key.clone(),
        });
    }
    let servers = Arc::new(servers);

    let listen = net::resolve(&config.local.address, config.local.port).await?;
    let listener = TcpListener::bind(listen).await?;
    info!("listening for socks5 proxy on local {}", listen);

    let conns = Arc::new(Semaphore::new(MAX_CONNECTIONS));
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

        let servers = servers.clone();
        tokio::spawn(async move {
            let _permit = permit;
            match handle(conn, peer, &servers).await {
                Ok(stat) => info!("{} - proxied, {}", peer, stat),
                Err(e) => warn!("{} - {}", peer, e),
            }
        });
    }
}

async fn handle(mut conn: TcpStream, peer: SocketAddr, servers: &[Server]) -> io::Result<Stat> {
    let addr = match net::io_timeout(HANDSHAKE_TIMEOUT, socks5::handshake(&mut conn)).await {
        Ok(addr) => addr,
        Err(e) => {
            // the rejection frame is already on its way out; give the
            // application a second to pick it up
            if e.kind() == io::ErrorKind::InvalidData {
                net::close_wait(conn).await;
            }
            return Err(e);
        }
    };
    info!("{} - request {}:{}", peer, addr.host, addr.port);

    let server = &servers[util::rand_index(servers.len())?];

    // session key and request frame; the encrypt stream advances over the
    // 276-byte header here and stays in step with the server from then on
    let mut iv = [0u8; IV_LEN];
    util::rand_bytes(&mut iv)?;
    let key = crypto::derive_key(&iv, &server.key);
    let mut crypto = Crypto::new(&key);
    let frame = Request::new(&addr.host, addr.port)?.encode(&mut crypto, &iv);

    let mut remote =
        match net::io_timeout(HANDSHAKE_TIMEOUT, TcpStream::connect(server.addr)).await {
            Ok(remote) => remote,
            Err(e) => {
                net::io_timeout(
                    HANDSHAKE_TIMEOUT,
                    conn.write_all(&socks5::reply(socks5::REPLY_CONNECTION_REFUSED)),
                )
                .await?;
                net::close_wait(conn).await;
                return Err(other(&format!("connect server {}, {}", server.addr, e)));
            }
        };
    remote.set_nodelay(true)?;

    net::io_timeout(HANDSHAKE_TIMEOUT, remote.write_all(&frame)).await?;

    let mut reply = [0u8; REPLY_LEN];
    net::io_timeout(HANDSHAKE_TIMEOUT, remote.read_exact(&mut reply)).await?;
    if !handshake::decode_reply(&mut crypto, &mut reply) {
        net::io_timeout(
            HANDSHAKE_TIMEOUT,
            conn.write_all(&socks5::reply(socks5::REPLY_CONNECTION_REFUSED)),
        )
        .await?;
        net::close_wait(conn).await;
        return Err(other(&format!(
            "server {} failed the request",
            server.addr
        )));
    }

    net::io_timeout(
        HANDSHAKE_TIMEOUT,
        conn.write_all(&socks5::reply(socks5::REPLY_SUCCEEDED)),
    )
    .await?;

    transfer::relay(conn, remote, crypto).await
}

#[inline]
fn other(desc: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, desc)
}

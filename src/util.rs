use std::borrow::Cow;
use std::env;
use std::io::{self, Write};

use log::LevelFilter;
use ring::rand::{SecureRandom, SystemRandom};
use tokio::signal::unix::{signal, SignalKind};

pub fn init_logger() {
    let mut builder = env_logger::Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{:<5}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.args()
            )
        })
        .filter(None, LevelFilter::Info);

    if let Ok(filters) = env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    if let Ok(filters) = env::var("IOSOCKS_LOG") {
        builder.parse_filters(&filters);
    }

    builder.init();
}

pub fn expand_tilde_path(path: &str) -> Cow<'_, str> {
    match (path.strip_prefix('~'), env::var("HOME")) {
        (Some(rest), Ok(home)) => Cow::Owned(format!("{}{}", home, rest)),
        _ => Cow::Borrowed(path),
    }
}

/// Fill `buf` from the OS cryptographic random source.
pub fn rand_bytes(buf: &mut [u8]) -> io::Result<()> {
    SystemRandom::new()
        .fill(buf)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("rand failed by {}", e)))
}

/// Uniform index into `0..n`, used to spread connections over the
/// configured servers.
pub fn rand_index(n: usize) -> io::Result<usize> {
    debug_assert!(n > 0);
    let mut buf = [0u8; 4];
    rand_bytes(&mut buf)?;
    Ok(u32::from_ne_bytes(buf) as usize % n)
}

/// Resolves when SIGINT or SIGTERM arrives. Registration failure is
/// reported so the caller can refuse to start.
pub async fn shutdown_signal() -> io::Result<()> {
    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        _ = term.recv() => Ok(()),
    }
}

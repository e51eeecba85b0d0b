use std::error::Error;
use std::process;

use clap::error::ErrorKind;
use clap::Parser;
use log::{error, info};

use iosocks::{expand_tilde_path, init_logger, server, shutdown_signal, ServerConfig};

#[derive(Debug, Parser)]
#[command(name = "osocks", about = "iosocks server, terminates the encrypted tunnel")]
struct Args {
    /// config file
    #[arg(short = 'c', value_name = "FILE")]
    config: Option<String>,

    /// listen address (single-listener mode)
    #[arg(short = 's', value_name = "ADDR")]
    server: Option<String>,

    /// listen port (single-listener mode)
    #[arg(short = 'p', value_name = "PORT")]
    server_port: Option<u16>,

    /// pre-shared key (single-listener mode)
    #[arg(short = 'k', value_name = "KEY")]
    key: Option<String>,
}

fn load_config(args: &Args) -> Result<ServerConfig, Box<dyn Error>> {
    match &args.config {
        Some(path) => ServerConfig::new(&expand_tilde_path(path)),
        None => ServerConfig::single_listener(
            args.server.as_deref(),
            args.server_port,
            args.key.as_deref(),
        ),
    }
}

#[tokio::main]
async fn main() {
    init_logger();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            process::exit(code);
        }
    };

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            error!("load config failed, {}", err);
            process::exit(1);
        }
    };

    tokio::select! {
        res = server::serve(config) => {
            if let Err(err) = res {
                error!("start server failed, {}", err);
                process::exit(2);
            }
        }
        res = shutdown_signal() => {
            match res {
                Ok(()) => info!("Exit"),
                Err(err) => {
                    error!("signal setup failed, {}", err);
                    process::exit(4);
                }
            }
        }
    }
}

use std::error::Error;
use std::process;

use clap::error::ErrorKind;
use clap::Parser;
use log::{error, info};

use iosocks::{client, expand_tilde_path, init_logger, shutdown_signal, ClientConfig};

#[derive(Debug, Parser)]
#[command(name = "isocks", about = "iosocks client, a socks5 front end to the encrypted tunnel")]
struct Args {
    /// config file
    #[arg(short = 'c', value_name = "FILE")]
    config: Option<String>,

    /// server address (single-server mode)
    #[arg(short = 's', value_name = "ADDR")]
    server: Option<String>,

    /// server port (single-server mode)
    #[arg(short = 'p', value_name = "PORT")]
    server_port: Option<u16>,

    /// local binding address
    #[arg(short = 'b', value_name = "ADDR")]
    bind: Option<String>,

    /// local port
    #[arg(short = 'l', value_name = "PORT")]
    local_port: Option<u16>,

    /// pre-shared key (single-server mode)
    #[arg(short = 'k', value_name = "KEY")]
    key: Option<String>,
}

fn load_config(args: &Args) -> Result<ClientConfig, Box<dyn Error>> {
    match &args.config {
        Some(path) => ClientConfig::new(&expand_tilde_path(path)),
        None => ClientConfig::single_server(
            args.server.as_deref(),
            args.server_port,
            args.bind.as_deref(),
            args.local_port,
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
        res = client::serve(config) => {
            if let Err(err) = res {
                error!("start client failed, {}", err);
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

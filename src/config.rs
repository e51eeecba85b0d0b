use std::error;
use std::fmt;
use std::fs;
use std::result;

use serde::de;
use serde::Deserialize;

use crate::proto::{
    DEFAULT_LOCAL_ADDR, DEFAULT_LOCAL_PORT, DEFAULT_SERVER_ADDR, DEFAULT_SERVER_PORT, MAX_KEY_LEN,
    MAX_SERVER,
};

pub type Result<T> = result::Result<T, Box<dyn error::Error>>;

/// A bind or connect endpoint, resolved lazily at serve time.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// One tunnel endpoint plus its pre-shared key: an upstream for the
/// client, a listener for the server. The key is truncated to 256 bytes
/// on load.
#[derive(Debug, Clone)]
pub struct ServerEndpoint {
    pub address: String,
    pub port: u16,
    pub key: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub local: Endpoint,
    pub servers: Vec<ServerEndpoint>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listeners: Vec<ServerEndpoint>,
}

impl ClientConfig {
    pub fn new(path: &str) -> Result<ClientConfig> {
        let raw: TomlConfig = read_toml_config(path)?;
        let local = raw.local.unwrap_or_default();

        Ok(ClientConfig {
            local: Endpoint {
                address: local
                    .address
                    .unwrap_or_else(|| DEFAULT_LOCAL_ADDR.to_string()),
                port: local.port.unwrap_or(DEFAULT_LOCAL_PORT),
            },
            servers: check_servers(raw.server)?,
        })
    }

    /// Single-server mode, assembled from command line flags.
    pub fn single_server(
        server: Option<&str>,
        port: Option<u16>,
        bind: Option<&str>,
        local_port: Option<u16>,
        key: Option<&str>,
    ) -> Result<ClientConfig> {
        Ok(ClientConfig {
            local: Endpoint {
                address: bind.unwrap_or(DEFAULT_LOCAL_ADDR).to_string(),
                port: local_port.unwrap_or(DEFAULT_LOCAL_PORT),
            },
            servers: vec![single_endpoint(server, port, key)?],
        })
    }
}

impl ServerConfig {
    pub fn new(path: &str) -> Result<ServerConfig> {
        let raw: TomlConfig = read_toml_config(path)?;
        Ok(ServerConfig {
            listeners: check_servers(raw.server)?,
        })
    }

    /// Single-listener mode, assembled from command line flags.
    pub fn single_listener(
        address: Option<&str>,
        port: Option<u16>,
        key: Option<&str>,
    ) -> Result<ServerConfig> {
        Ok(ServerConfig {
            listeners: vec![single_endpoint(address, port, key)?],
        })
    }
}

fn single_endpoint(
    address: Option<&str>,
    port: Option<u16>,
    key: Option<&str>,
) -> Result<ServerEndpoint> {
    let key = key.ok_or("no pre-shared key given, use -k <key>")?;
    Ok(ServerEndpoint {
        address: address.unwrap_or(DEFAULT_SERVER_ADDR).to_string(),
        port: port.unwrap_or(DEFAULT_SERVER_PORT),
        key: truncate_key(key),
    })
}

fn check_servers(raw: Vec<TomlServer>) -> Result<Vec<ServerEndpoint>> {
    if raw.is_empty() {
        return Err("no server configured".into());
    }
    if raw.len() > MAX_SERVER {
        return Err(format!("too many servers, max {}", MAX_SERVER).into());
    }

    let mut servers = Vec::with_capacity(raw.len());
    for server in raw {
        if server.key.is_empty() {
            return Err("server key must not be empty".into());
        }
        servers.push(ServerEndpoint {
            address: server
                .address
                .unwrap_or_else(|| DEFAULT_SERVER_ADDR.to_string()),
            port: server.port.unwrap_or(DEFAULT_SERVER_PORT),
            key: truncate_key(&server.key),
        });
    }
    Ok(servers)
}

fn truncate_key(key: &str) -> Vec<u8> {
    let bytes = key.as_bytes();
    bytes[..bytes.len().min(MAX_KEY_LEN)].to_vec()
}

// One file format serves both daemons: the `[[server]]` tables are the
// upstreams of `isocks` and the listeners of `osocks`; `[local]` is only
// read by `isocks`.
#[derive(Debug, Deserialize)]
struct TomlConfig {
    local: Option<TomlLocal>,
    #[serde(default)]
    server: Vec<TomlServer>,
}

#[derive(Debug, Default, Deserialize)]
struct TomlLocal {
    address: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct TomlServer {
    address: Option<String>,
    port: Option<u16>,
    key: String,
}

fn read_toml_config<T>(path: &str) -> Result<T>
where
    T: de::DeserializeOwned,
{
    let content = fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &str) -> (tempfile::NamedTempFile, String) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        let path = file.path().to_str().unwrap().to_string();
        (file, path)
    }

    #[test]
    fn test_client_config() {
        let (_guard, path) = write_temp(
            r#"
            [local]
            address = "0.0.0.0"
            port = 1081

            [[server]]
            address = "tunnel.example.com"
            key = "secret"

            [[server]]
            address = "10.0.0.2"
            port = 1206
            key = "other"
            "#,
        );

        let config = ClientConfig::new(&path).unwrap();
        assert_eq!(config.local.to_string(), "0.0.0.0:1081");
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[0].address, "tunnel.example.com");
        assert_eq!(config.servers[0].port, DEFAULT_SERVER_PORT);
        assert_eq!(config.servers[0].key, b"secret");
        assert_eq!(config.servers[1].port, 1206);
    }

    #[test]
    fn test_defaults() {
        let (_guard, path) = write_temp("[[server]]\nkey = \"k\"\n");

        let config = ClientConfig::new(&path).unwrap();
        assert_eq!(config.local.address, DEFAULT_LOCAL_ADDR);
        assert_eq!(config.local.port, DEFAULT_LOCAL_PORT);
        assert_eq!(config.servers[0].address, DEFAULT_SERVER_ADDR);

        let config = ServerConfig::new(&path).unwrap();
        assert_eq!(config.listeners[0].port, DEFAULT_SERVER_PORT);
    }

    #[test]
    fn test_no_server_rejected() {
        let (_guard, path) = write_temp("[local]\nport = 1081\n");
        assert!(ClientConfig::new(&path).is_err());
        assert!(ServerConfig::new(&path).is_err());
    }

    #[test]
    fn test_key_truncated() {
        let long = "k".repeat(MAX_KEY_LEN + 44);
        let (_guard, path) = write_temp(&format!("[[server]]\nkey = \"{}\"\n", long));

        let config = ServerConfig::new(&path).unwrap();
        assert_eq!(config.listeners[0].key.len(), MAX_KEY_LEN);
    }

    #[test]
    fn test_single_server_mode() {
        let config =
            ClientConfig::single_server(Some("10.1.1.1"), None, None, Some(1081), Some("k"))
                .unwrap();
        assert_eq!(config.servers[0].address, "10.1.1.1");
        assert_eq!(config.servers[0].port, DEFAULT_SERVER_PORT);
        assert_eq!(config.local.to_string(), "127.0.0.1:1081");

        assert!(ClientConfig::single_server(None, None, None, None, None).is_err());
        assert!(ServerConfig::single_listener(None, Some(1205), None).is_err());
    }
}

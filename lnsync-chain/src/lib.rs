#![crate_name = "lnsync_chain"]

//! Chain backends for the graph mirror: a bitcoind RPC client and an
//! Esplora REST client, both implementing [`ChainClient`].

#![forbid(unsafe_code)]
#![allow(bare_trait_objects)]
#![warn(rustdoc::broken_intra_doc_links)]
#![warn(missing_docs)]

/// Bitcoind RPC client
pub mod bitcoind_client;
mod convert;
/// Esplora REST client
pub mod esplora_client;

pub use self::bitcoind_client::BitcoindClient;
pub use self::esplora_client::EsploraClient;

use core::fmt;
use core::str::FromStr;
use std::env;
use std::fmt::{Display, Formatter};
use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lnsync_core::bitcoin::Network;
use lnsync_core::chain::{ChainClient, ChainError};
use log::info;
use url::Url;

/// RPC errors
#[derive(Debug)]
pub enum Error {
    /// JSON RPC Error
    JsonRpc(jsonrpc_async::error::Error),
    /// JSON Error
    Json(serde_json::error::Error),
    /// IO Error
    Io(std::io::Error),
    /// Transport setup error
    Transport(String),
    /// Esplora request error
    Esplora(String),
    /// The requested object does not exist
    NotFound(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(format!("{:?}", self).as_str())
    }
}

impl std::error::Error for Error {}

impl From<jsonrpc_async::error::Error> for Error {
    fn from(e: jsonrpc_async::error::Error) -> Error {
        Error::JsonRpc(e)
    }
}

impl From<serde_json::error::Error> for Error {
    fn from(e: serde_json::error::Error) -> Error {
        Error::Json(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::Io(e)
    }
}

impl From<Error> for ChainError {
    fn from(e: Error) -> ChainError {
        match e {
            Error::JsonRpc(e) => ChainError::Rpc(e.to_string()),
            Error::Transport(s) | Error::Esplora(s) => ChainError::Rpc(s),
            Error::Json(e) => ChainError::Decode(e.to_string()),
            Error::Io(e) => ChainError::Decode(e.to_string()),
            Error::NotFound(s) => ChainError::NotFound(s),
        }
    }
}

/// The chain backend type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainBackend {
    /// A bitcoind RPC client
    Bitcoind,
    /// The Blockstream Esplora REST API
    Esplora,
}

impl FromStr for ChainBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bitcoind" => Ok(ChainBackend::Bitcoind),
            "esplora" => Ok(ChainBackend::Esplora),
            _ => Err(format!("unknown chain backend {}, expected bitcoind or esplora", s)),
        }
    }
}

impl Display for ChainBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ChainBackend::Bitcoind => write!(f, "bitcoind"),
            ChainBackend::Esplora => write!(f, "esplora"),
        }
    }
}

/// Construct a chain client from an URL, a network and a backend type
pub async fn chain_client_from_url(
    network: Network,
    backend: ChainBackend,
    url: Url,
) -> Result<Arc<dyn ChainClient>, Error> {
    match backend {
        ChainBackend::Bitcoind => Ok(Arc::new(bitcoind_client_from_url(url, network).await?)),
        ChainBackend::Esplora => Ok(Arc::new(EsploraClient::new(url)?)),
    }
}

/// The default bitcoind RPC URL for a network
pub fn default_bitcoind_url(network: Network) -> Result<Url, url::ParseError> {
    let port = match network {
        Network::Testnet => 18332,
        Network::Signet => 38332,
        Network::Regtest => 18443,
        _ => 8332,
    };
    Url::parse(&format!("http://127.0.0.1:{}", port))
}

fn bitcoin_network_path(base_path: PathBuf, network: Network) -> PathBuf {
    match network {
        Network::Bitcoin => base_path,
        Network::Testnet => base_path.join("testnet3"),
        Network::Signet => base_path.join("signet"),
        Network::Regtest => base_path.join("regtest"),
        _ => base_path.join(network.to_string()),
    }
}

fn parse_cookie(contents: &str) -> Result<(String, String), Error> {
    let mut iter = contents.trim_end().splitn(2, ':');
    match (iter.next(), iter.next()) {
        (Some(user), Some(pass)) if !user.is_empty() => Ok((user.to_string(), pass.to_string())),
        _ => Err(Error::Transport("malformed cookie file".to_string())),
    }
}

fn bitcoin_rpc_cookie(network: Network) -> Result<(String, String), Error> {
    let home = env::var("HOME")
        .map_err(|_| Error::Transport("cannot get cookie file if HOME is not set".to_string()))?;
    let bitcoin_path = Path::new(&home).join(".bitcoin");
    let bitcoin_net_path = bitcoin_network_path(bitcoin_path, network);
    let cookie_path = bitcoin_net_path.join(".cookie");
    info!("auth to bitcoind via cookie {}", cookie_path.to_string_lossy());
    parse_cookie(&read_to_string(cookie_path)?)
}

/// Construct a bitcoind client from an RPC URL and a network.
///
/// If the URL has no user, credentials are read from the bitcoind cookie file.
pub async fn bitcoind_client_from_url(mut url: Url, network: Network) -> Result<BitcoindClient, Error> {
    if url.username().is_empty() {
        let (user, pass) = bitcoin_rpc_cookie(network)?;
        url.set_username(&user).map_err(|_| Error::Transport("set user".to_string()))?;
        url.set_password(Some(&pass)).map_err(|_| Error::Transport("set pass".to_string()))?;
    }
    BitcoindClient::new(url).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_path_test() {
        let base = PathBuf::from("/home/u/.bitcoin");
        assert_eq!(bitcoin_network_path(base.clone(), Network::Bitcoin), base);
        assert_eq!(
            bitcoin_network_path(base.clone(), Network::Testnet),
            PathBuf::from("/home/u/.bitcoin/testnet3")
        );
        assert_eq!(
            bitcoin_network_path(base, Network::Regtest),
            PathBuf::from("/home/u/.bitcoin/regtest")
        );
    }

    #[test]
    fn cookie_test() {
        let (user, pass) = parse_cookie("__cookie__:s3cr3t:with:colons\n").unwrap();
        assert_eq!(user, "__cookie__");
        assert_eq!(pass, "s3cr3t:with:colons");
        assert!(parse_cookie("nocolon").is_err());
        assert!(parse_cookie(":pass").is_err());
    }

    #[test]
    fn backend_test() {
        assert_eq!("esplora".parse::<ChainBackend>().unwrap(), ChainBackend::Esplora);
        assert_eq!(ChainBackend::Bitcoind.to_string(), "bitcoind");
        assert!("electrum".parse::<ChainBackend>().is_err());
    }

    #[test]
    fn default_url_test() {
        assert_eq!(default_bitcoind_url(Network::Regtest).unwrap().port(), Some(18443));
        assert_eq!(default_bitcoind_url(Network::Bitcoin).unwrap().as_str(), "http://127.0.0.1:8332/");
    }

    #[test]
    fn error_mapping_test() {
        let e: ChainError = Error::NotFound("tx".to_string()).into();
        assert_eq!(e, ChainError::NotFound("tx".to_string()));
        let e: ChainError = Error::Esplora("503".to_string()).into();
        assert_eq!(e, ChainError::Rpc("503".to_string()));
    }
}

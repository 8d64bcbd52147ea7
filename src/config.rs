use log::LevelFilter;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::{env, fs::read_to_string, path::Path};

/// The server version extracted from the Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable key to load the config from
const CONFIG_ENV_KEY: &str = "MM_CONFIG_JSON";

pub fn load_config() -> Option<Config> {
    // Attempt to load the config from the env
    if let Ok(env) = env::var(CONFIG_ENV_KEY) {
        let config: Config = match serde_json::from_str(&env) {
            Ok(value) => value,
            Err(err) => {
                eprintln!("Failed to load env config (Using default): {:?}", err);
                return None;
            }
        };
        return Some(config);
    }

    // Attempt to load the config from disk
    let file = Path::new("config.json");
    if !file.exists() {
        return None;
    }

    let data = match read_to_string(file) {
        Ok(value) => value,
        Err(err) => {
            eprintln!("Failed to load config file (Using defaults): {:?}", err);
            return None;
        }
    };

    let config: Config = match serde_json::from_str(&data) {
        Ok(value) => value,
        Err(err) => {
            eprintln!("Failed to load config file (Using default): {:?}", err);
            return None;
        }
    };

    Some(config)
}

/// Which store implementations back the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Fixed-record files under the data directory
    File,
    /// Everything in memory; state dies with the process
    Memory,
}

#[derive(Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: IpAddr,
    /// Player listener ("userd") port
    pub userd_port: u16,
    /// Web/admin listener port
    pub web_port: u16,
    /// Room-server listener port
    pub room_port: u16,
    pub room_list_file: PathBuf,
    pub data_dir: PathBuf,
    pub storage: StorageMode,
    /// Upper bound on members per room
    pub max_room_occupancy: usize,
    /// Message of the day shown after login, empty to disable
    pub motd: String,
    /// Suppresses outbound mail notifications
    pub no_mail: bool,
    pub logging: LevelFilter,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            userd_port: 3453,
            web_port: 3454,
            room_port: 3455,
            room_list_file: PathBuf::from("rooms.lst"),
            data_dir: PathBuf::from("data"),
            storage: StorageMode::File,
            max_room_occupancy: 64,
            motd: String::new(),
            no_mail: false,
            logging: LevelFilter::Info,
        }
    }
}

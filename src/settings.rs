// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Persisted operator settings: the connection target of the arm and the Wi-Fi credentials
//! which are handed to the arm's access point configuration.
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

#[cfg(test)]
use mockall::automock;

use crate::exception::{BlinxException, BlinxResult};
use crate::network::LinkConfig;

pub static TARGET_IP_KEY: &str = "target_ip";
pub static TARGET_PORT_KEY: &str = "target_port";
pub static SSID_KEY: &str = "SSID";
pub static PASSWORD_KEY: &str = "passwd";

fn create_settings_exception(message: impl Into<String>) -> BlinxException {
    BlinxException::SettingsException {
        message: message.into(),
    }
}

/// A string keyed settings store.
#[cfg_attr(test, automock)]
pub trait SettingsStore {
    fn get(&self, key: &str) -> BlinxResult<Option<String>>;
    fn put(&mut self, key: &str, value: &str) -> BlinxResult<()>;
    fn remove(&mut self, key: &str) -> BlinxResult<()>;
}

/// Store which forgets everything when dropped.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> BlinxResult<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: &str) -> BlinxResult<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> BlinxResult<()> {
        self.values.remove(key);
        Ok(())
    }
}

/// Store backed by a JSON object in a file. Every change rewrites the file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl JsonFileStore {
    /// Opens the store at `path`. A missing file is an empty store and is created on the first
    /// change, together with its parent directories.
    pub fn open<S: AsRef<Path>>(path: S) -> BlinxResult<Self> {
        let path = path.as_ref().to_path_buf();
        let values = if path.exists() {
            let json = fs::read_to_string(&path).map_err(|e| {
                create_settings_exception(format!("cannot read {}: {}", path.display(), e))
            })?;
            serde_json::from_str(&json).map_err(|e| {
                create_settings_exception(format!("invalid settings file {}: {}", path.display(), e))
            })?
        } else {
            BTreeMap::new()
        };
        Ok(JsonFileStore { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self) -> BlinxResult<()> {
        let failed = |e: &dyn fmt::Display| {
            create_settings_exception(format!("cannot write {}: {}", self.path.display(), e))
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| failed(&e))?;
        }
        let json = serde_json::to_string_pretty(&self.values).map_err(|e| failed(&e))?;
        fs::write(&self.path, json).map_err(|e| failed(&e))
    }
}

impl SettingsStore for JsonFileStore {
    fn get(&self, key: &str) -> BlinxResult<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: &str) -> BlinxResult<()> {
        self.values.insert(key.to_string(), value.to_string());
        self.write()
    }

    fn remove(&mut self, key: &str) -> BlinxResult<()> {
        if self.values.remove(key).is_some() {
            self.write()?;
        }
        Ok(())
    }
}

/// Address and port of the arm's controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl ConnectionTarget {
    /// Validates the operator's input.
    /// # Errors
    /// * [`SettingsException`](`crate::exception::BlinxException::SettingsException`) - if `ip`
    /// is not a dotted IPv4 address or `port` is outside 1024..=65535.
    pub fn parse(ip: &str, port: &str) -> BlinxResult<Self> {
        Ok(ConnectionTarget {
            ip: parse_ipv4(ip.trim())?,
            port: parse_port(port.trim())?,
        })
    }

    /// Reads the saved target, `None` if nothing was saved yet.
    pub fn load(store: &dyn SettingsStore) -> BlinxResult<Option<Self>> {
        match (store.get(TARGET_IP_KEY)?, store.get(TARGET_PORT_KEY)?) {
            (Some(ip), Some(port)) => ConnectionTarget::parse(&ip, &port).map(Some),
            _ => Ok(None),
        }
    }

    pub fn save(&self, store: &mut dyn SettingsStore) -> BlinxResult<()> {
        store.put(TARGET_IP_KEY, &self.ip.to_string())?;
        store.put(TARGET_PORT_KEY, &self.port.to_string())?;
        log::info!("saved connection target {}", self);
        Ok(())
    }

    /// Forgets the saved target.
    pub fn reset(store: &mut dyn SettingsStore) -> BlinxResult<()> {
        store.remove(TARGET_IP_KEY)?;
        store.remove(TARGET_PORT_KEY)
    }

    /// Link configuration with default timing for this target.
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig::new(self.ip.to_string(), self.port)
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

fn parse_ipv4(ip: &str) -> BlinxResult<Ipv4Addr> {
    let invalid = || create_settings_exception(format!("{:?} is not an IPv4 address", ip));
    let octets: Vec<&str> = ip.split('.').collect();
    if octets.len() != 4 {
        return Err(invalid());
    }
    let mut parsed = [0u8; 4];
    for (value, octet) in parsed.iter_mut().zip(octets) {
        if octet.is_empty() || octet.len() > 3 || !octet.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        *value = octet.parse().map_err(|_| invalid())?;
    }
    Ok(Ipv4Addr::from(parsed))
}

fn parse_port(port: &str) -> BlinxResult<u16> {
    let invalid = || create_settings_exception(format!("{:?} is not a port in 1024..=65535", port));
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    match port.parse::<u16>() {
        Ok(port) if port >= 1024 => Ok(port),
        _ => Err(invalid()),
    }
}

/// Credentials of the Wi-Fi access point of the arm. They are only stored, never used by this
/// crate.
#[derive(Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
}

impl fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid)
            .field("password", &"***")
            .finish()
    }
}

fn is_credential_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

impl WifiCredentials {
    /// # Errors
    /// * [`SettingsException`](`crate::exception::BlinxException::SettingsException`) - if the
    /// SSID is not 1 to 32 or the password not 8 to 63 characters of `[A-Za-z0-9_-]`.
    pub fn new<S: Into<String>, P: Into<String>>(ssid: S, password: P) -> BlinxResult<Self> {
        let ssid = ssid.into().trim().to_string();
        let password = password.into().trim().to_string();
        if !(1..=32).contains(&ssid.len()) || !ssid.chars().all(is_credential_char) {
            return Err(create_settings_exception(format!(
                "{:?} is not a valid SSID",
                ssid
            )));
        }
        if !(8..=63).contains(&password.len()) || !password.chars().all(is_credential_char) {
            return Err(create_settings_exception(
                "the Wi-Fi password needs 8 to 63 letters, digits, '_' or '-'",
            ));
        }
        Ok(WifiCredentials { ssid, password })
    }

    pub fn load(store: &dyn SettingsStore) -> BlinxResult<Option<Self>> {
        match (store.get(SSID_KEY)?, store.get(PASSWORD_KEY)?) {
            (Some(ssid), Some(password)) => WifiCredentials::new(ssid, password).map(Some),
            _ => Ok(None),
        }
    }

    pub fn save(&self, store: &mut dyn SettingsStore) -> BlinxResult<()> {
        store.put(SSID_KEY, &self.ssid)?;
        store.put(PASSWORD_KEY, &self.password)
    }

    pub fn reset(store: &mut dyn SettingsStore) -> BlinxResult<()> {
        store.remove(SSID_KEY)?;
        store.remove(PASSWORD_KEY)
    }
}

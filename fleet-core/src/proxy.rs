//! Proxy descriptor entity, consumed by the dialer (`crate::net`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks5,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proxy {
    pub id: i64,
    pub protocol: ProxyProtocol,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub owner: String,
    pub active: bool,
}

impl Proxy {
    pub fn new(id: i64, protocol: ProxyProtocol, host: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            protocol,
            host: host.into(),
            port,
            username: None,
            password: None,
            owner: String::new(),
            active: true,
        }
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::IntegerMode;

pub const DEFAULT_PORT: u16 = 8860;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Credentials {
    User {
        username: String,
        password: String,
        /// Send `HASH` instead of `PASSWORD`
        #[serde(default)]
        hashed: bool,
    },
    ApiKey(String),
    Token(String),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::User {
                username, hashed, ..
            } => f
                .debug_struct("User")
                .field("username", username)
                .field("password", &"******")
                .field("hashed", hashed)
                .finish(),
            Credentials::ApiKey(_) => f.write_str("ApiKey(******)"),
            Credentials::Token(_) => f.write_str("Token(******)"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsOptions {
    /// Plain TCP instead of TLS
    pub insecure: bool,
    pub accept_invalid_certs: bool,
    /// Extra trusted root, PEM encoded
    pub root_certificate_pem: Option<Vec<u8>>,
}

/// Immutable connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
    pub tls: TlsOptions,
    /// Per-command deadline; `None` waits forever
    pub timeout: Option<Duration>,
    pub connect_timeout: Duration,

    pub database: Option<String>,
    /// `CREATE DATABASE ... IF NOT EXISTS` before selecting `database`
    pub create: bool,
    /// Target is an in-memory database; never created
    pub memory: bool,
    pub compression: bool,
    pub zerotext: bool,
    pub noblob: bool,
    pub maxdata: Option<u64>,
    pub maxrows: Option<u64>,
    pub maxrowset: Option<u64>,
    /// Keep the session non-linearizable after authentication
    pub non_linearizable: bool,

    pub integer_mode: IntegerMode,
    /// Initial value of the connection's verbose toggle
    pub verbose: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            credentials: None,
            tls: TlsOptions::default(),
            timeout: Some(DEFAULT_TIMEOUT),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            database: None,
            create: false,
            memory: false,
            compression: false,
            zerotext: false,
            noblob: false,
            maxdata: None,
            maxrows: None,
            maxrowset: None,
            non_linearizable: false,
            integer_mode: IntegerMode::default(),
            verbose: false,
        }
    }
}

impl ConnectionConfig {
    pub fn builder(host: &str) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::new(host)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    pub fn new(host: &str) -> Self {
        Self {
            config: ConnectionConfig {
                host: host.to_string(),
                ..Default::default()
            },
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn auth(mut self, username: &str, password: &str) -> Self {
        self.config.credentials = Some(Credentials::User {
            username: username.to_string(),
            password: password.to_string(),
            hashed: false,
        });
        self
    }

    pub fn auth_with_hash(mut self, username: &str, password_hash: &str) -> Self {
        self.config.credentials = Some(Credentials::User {
            username: username.to_string(),
            password: password_hash.to_string(),
            hashed: true,
        });
        self
    }

    pub fn auth_with_api_key(mut self, api_key: &str) -> Self {
        self.config.credentials = Some(Credentials::ApiKey(api_key.to_string()));
        self
    }

    pub fn auth_with_token(mut self, token: &str) -> Self {
        self.config.credentials = Some(Credentials::Token(token.to_string()));
        self
    }

    pub fn database(mut self, name: &str) -> Self {
        self.config.database = Some(name.to_string());
        self
    }

    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.config.create = create;
        self
    }

    pub fn memory(mut self, memory: bool) -> Self {
        self.config.memory = memory;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn timeout_ms(self, ms: u64) -> Self {
        self.timeout(Some(Duration::from_millis(ms)))
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn insecure(mut self, insecure: bool) -> Self {
        self.config.tls.insecure = insecure;
        self
    }

    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.config.tls.accept_invalid_certs = accept;
        self
    }

    pub fn root_certificate_pem(mut self, pem: Vec<u8>) -> Self {
        self.config.tls.root_certificate_pem = Some(pem);
        self
    }

    pub fn compression(mut self, enabled: bool) -> Self {
        self.config.compression = enabled;
        self
    }

    pub fn zerotext(mut self, enabled: bool) -> Self {
        self.config.zerotext = enabled;
        self
    }

    pub fn noblob(mut self, enabled: bool) -> Self {
        self.config.noblob = enabled;
        self
    }

    pub fn maxdata(mut self, bytes: u64) -> Self {
        self.config.maxdata = Some(bytes);
        self
    }

    pub fn maxrows(mut self, rows: u64) -> Self {
        self.config.maxrows = Some(rows);
        self
    }

    pub fn maxrowset(mut self, rows: u64) -> Self {
        self.config.maxrowset = Some(rows);
        self
    }

    pub fn non_linearizable(mut self, enabled: bool) -> Self {
        self.config.non_linearizable = enabled;
        self
    }

    pub fn integer_mode(mut self, mode: IntegerMode) -> Self {
        self.config.integer_mode = mode;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}

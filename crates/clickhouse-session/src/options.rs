//! Session configuration.

use std::collections::HashMap;
use std::time::Duration;

/// Default server host.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default native-protocol port.
pub const DEFAULT_PORT: u16 = 9000;
/// Default user.
pub const DEFAULT_USER: &str = "default";
/// Default password.
pub const DEFAULT_PASSWORD: &str = "";
/// Default database.
pub const DEFAULT_DATABASE: &str = "default";

/// TLS options for a secure session.
///
/// Only consumed when [`SessionOptions::secure`] is set. Context
/// construction itself is the session implementation's concern.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// Whether to verify the server certificate.
    pub verify: bool,
    /// Path to a CA certificate bundle, if not using system roots.
    pub ca_certs: Option<String>,
    /// OpenSSL-style cipher preference string.
    pub ciphers: Option<String>,
}

/// Connection parameters for establishing a session.
///
/// Fixed at construction time; a connection never changes the server it
/// points at. Protocol-specific settings that the driver core does not
/// interpret go through the [`settings`](Self::settings) escape hatch and
/// are forwarded to the session verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Server hostname or IP address.
    pub host: String,
    /// Native-protocol port (default: 9000, TLS: 9440).
    pub port: u16,
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
    /// Database name.
    pub database: String,
    /// Whether to negotiate TLS.
    pub secure: bool,
    /// TLS options, consumed when `secure` is set.
    pub tls: TlsOptions,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
    /// Additional server settings forwarded to the session.
    pub settings: HashMap<String, String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            user: DEFAULT_USER.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            secure: false,
            tls: TlsOptions::default(),
            connect_timeout: Duration::from_secs(10),
            settings: HashMap::new(),
        }
    }
}

impl SessionOptions {
    /// Create options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the user name.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Set the database name.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Enable or disable TLS.
    #[must_use]
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Set the TLS options.
    #[must_use]
    pub fn tls(mut self, tls: TlsOptions) -> Self {
        self.tls = tls;
        self
    }

    /// Set the connection establishment timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Forward an additional server setting to the session.
    #[must_use]
    pub fn setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// The `host:port` pair, for log and error messages.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

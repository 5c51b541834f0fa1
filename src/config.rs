use serde::{Deserialize, Serialize};

/// Connection and behavior options for an adapter instance.
///
/// Deserializable so deployments can keep these in a config file:
/// ```rust
/// use mssql_adapter::MssqlOptions;
///
/// let opts = MssqlOptions::new("db.example.com", "appdb", "app", "secret")
///     .with_prefix("app_")
///     .with_port(Some(1433));
/// # let _ = opts;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MssqlOptions {
    pub server: String,
    pub database: String,
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub instance_name: Option<String>,
    /// Prefix applied to `{tablename}` braces
    #[serde(default)]
    pub prefix: String,
    /// Override for the engine's default collation; queried lazily when unset
    #[serde(default)]
    pub collation: Option<String>,
    /// Force literal emulation for every statement, not just those over the
    /// parameter ceiling
    #[serde(default)]
    pub emulate_parameters: bool,
    /// Whether this connection backs a session store (enables best-effort
    /// lock release)
    #[serde(default)]
    pub used_for_sessions: bool,
}

impl MssqlOptions {
    #[must_use]
    pub fn new(
        server: impl Into<String>,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            database: database.into(),
            user: user.into(),
            password: password.into(),
            port: None,
            instance_name: None,
            prefix: String::new(),
            collation: None,
            emulate_parameters: false,
            used_for_sessions: false,
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_instance_name(mut self, instance_name: Option<String>) -> Self {
        self.instance_name = instance_name;
        self
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_collation(mut self, collation: Option<String>) -> Self {
        self.collation = collation;
        self
    }

    #[must_use]
    pub fn with_emulated_parameters(mut self, emulate: bool) -> Self {
        self.emulate_parameters = emulate;
        self
    }

    #[must_use]
    pub fn with_session_store(mut self, used_for_sessions: bool) -> Self {
        self.used_for_sessions = used_for_sessions;
        self
    }
}

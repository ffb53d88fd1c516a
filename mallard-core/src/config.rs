//! Connector configuration.
//!
//! Layered the usual way: built-in defaults, then an optional file, then
//! `MALLARD_*` environment variables. Nested keys use `__`
//! (`MALLARD_OPTIONS__THREADS=4`) and list values use `;`
//! (`MALLARD_EXTENSIONS=httpfs;json`).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::DriverError;

const IN_MEMORY_MARKER: &str = ":memory:";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Database file. Empty (or `:memory:`) opens a private in-memory database.
    pub path: String,
    /// Engine settings applied when the database is opened, e.g. `threads`,
    /// `access_mode` or `enable_progress_bar`.
    pub options: BTreeMap<String, String>,
    /// Extensions installed and loaded once, before any session is handed out.
    pub extensions: Vec<String>,
    /// Statements run on every native connection before user queries (pragmas, SET).
    pub init_sql: Vec<String>,
    /// Log format for binaries: "compact" or "json".
    pub log_format: String,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            options: BTreeMap::new(),
            extensions: Vec::new(),
            init_sql: Vec::new(),
            log_format: "compact".to_string(),
        }
    }
}

impl ConnectorConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(name.into(), value.into());
        self
    }

    pub fn with_extension(mut self, name: impl Into<String>) -> Self {
        self.extensions.push(name.into());
        self
    }

    pub fn with_init_sql(mut self, sql: impl Into<String>) -> Self {
        self.init_sql.push(sql.into());
        self
    }

    pub fn is_in_memory(&self) -> bool {
        let path = self.path.trim();
        path.is_empty() || path == IN_MEMORY_MARKER
    }

    /// Load defaults, then `file` (if given), then the environment.
    pub fn load(file: Option<&Path>) -> Result<Self, DriverError> {
        let mut builder = Self::defaults_builder()?;
        if let Some(file) = file {
            builder = builder.add_source(config::File::from(file).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("MALLARD")
                .prefix_separator("_")
                .separator("__")
                .list_separator(";")
                .with_list_parse_key("extensions")
                .with_list_parse_key("init_sql")
                .try_parsing(true),
        );
        Self::finish(builder)
    }

    /// Parse a TOML document layered over the defaults. Environment is ignored.
    pub fn from_toml_str(toml: &str) -> Result<Self, DriverError> {
        let builder = Self::defaults_builder()?
            .add_source(config::File::from_str(toml, config::FileFormat::Toml));
        Self::finish(builder)
    }

    fn defaults_builder(
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, DriverError> {
        let defaults_json = serde_json::to_string(&Self::default())
            .map_err(|err| DriverError::Config(format!("failed to serialize defaults: {err}")))?;
        Ok(config::Config::builder().add_source(
            config::File::from_str(&defaults_json, config::FileFormat::Json).required(false),
        ))
    }

    fn finish(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, DriverError> {
        let settings = builder
            .build()
            .map_err(|err| DriverError::Config(format!("failed to load configuration: {err}")))?;
        let cfg: ConnectorConfig = settings.try_deserialize().map_err(|err| {
            DriverError::Config(format!("failed to deserialize configuration: {err}"))
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), DriverError> {
        if self.path.contains('\0') {
            return Err(DriverError::Config("path contains null bytes".to_string()));
        }
        for (name, value) in &self.options {
            if !is_identifier(name) {
                return Err(DriverError::Config(format!(
                    "invalid engine option name `{name}`"
                )));
            }
            if value.contains('\0') {
                return Err(DriverError::Config(format!(
                    "engine option `{name}` contains null bytes"
                )));
            }
        }
        for extension in &self.extensions {
            if !is_identifier(extension) {
                return Err(DriverError::Config(format!(
                    "invalid extension name `{extension}`"
                )));
            }
        }
        if self.init_sql.iter().any(|sql| sql.contains('\0')) {
            return Err(DriverError::Config(
                "init SQL contains null bytes".to_string(),
            ));
        }
        match self.log_format.as_str() {
            "compact" | "json" => Ok(()),
            other => Err(DriverError::Config(format!(
                "unknown log format `{other}`, expected compact or json"
            ))),
        }
    }

    /// `INSTALL`/`LOAD` statements for the configured extensions.
    pub(crate) fn extension_sql(&self) -> String {
        self.extensions
            .iter()
            .map(|ext| format!("INSTALL {ext}; LOAD {ext};"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Statements replayed on every native connection.
    pub(crate) fn connection_init_sql(&self) -> String {
        self.init_sql
            .iter()
            .map(|sql| sql.trim())
            .filter(|sql| !sql.is_empty())
            .map(|sql| {
                if sql.ends_with(';') {
                    sql.to_string()
                } else {
                    format!("{sql};")
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub(crate) fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

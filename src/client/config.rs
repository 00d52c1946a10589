use std::path::PathBuf;
use std::time::Duration;

use crate::engine::{DbLocation, Engine};
use crate::error::SqlGateError;
use crate::statement::PlaceholderStyle;
use crate::transform::NameTransform;
use crate::types::DebugLevel;

use super::SqlClient;

/// Construction-time options for a [`SqlClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub location: DbLocation,
    pub placeholder_style: PlaceholderStyle,
    /// Applied to outgoing identifiers and incoming result field names.
    pub name_transform: Option<NameTransform>,
    /// Extra key/value pairs attached to every span the client opens.
    pub span_attributes: Vec<(String, String)>,
    pub debug_level: DebugLevel,
    /// Issue `RELEASE SAVEPOINT` when a nested transaction commits.
    pub release_savepoints: bool,
    pub busy_timeout: Option<Duration>,
    pub wal: bool,
}

impl ClientOptions {
    #[must_use]
    pub fn new(location: DbLocation) -> Self {
        Self {
            location,
            placeholder_style: PlaceholderStyle::Sqlite,
            name_transform: None,
            span_attributes: Vec::new(),
            debug_level: DebugLevel::Off,
            release_savepoints: false,
            busy_timeout: Some(Duration::from_secs(5)),
            wal: false,
        }
    }

    #[must_use]
    pub fn builder() -> ClientOptionsBuilder {
        ClientOptionsBuilder::new()
    }

    /// Check the options for values the engine cannot work with.
    ///
    /// # Errors
    /// Returns [`SqlGateError::ConfigError`] describing the first problem found.
    pub fn validate(&self) -> Result<(), SqlGateError> {
        if let DbLocation::Path(path) = &self.location
            && path.as_os_str().is_empty()
        {
            return Err(SqlGateError::ConfigError("database path is empty".into()));
        }
        if self.span_attributes.iter().any(|(key, _)| key.is_empty()) {
            return Err(SqlGateError::ConfigError(
                "span attribute keys must not be empty".into(),
            ));
        }
        Ok(())
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::new(DbLocation::Memory)
    }
}

/// Fluent builder for [`ClientOptions`].
#[derive(Debug, Clone, Default)]
pub struct ClientOptionsBuilder {
    opts: ClientOptions,
}

impl ClientOptionsBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            opts: ClientOptions::default(),
        }
    }

    #[must_use]
    pub fn location(mut self, location: DbLocation) -> Self {
        self.opts.location = location;
        self
    }

    /// Store the database in a file at `path`.
    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.opts.location = DbLocation::Path(path.into());
        self
    }

    #[must_use]
    pub fn placeholder_style(mut self, style: PlaceholderStyle) -> Self {
        self.opts.placeholder_style = style;
        self
    }

    #[must_use]
    pub fn name_transform(mut self, transform: NameTransform) -> Self {
        self.opts.name_transform = Some(transform);
        self
    }

    #[must_use]
    pub fn span_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.opts.span_attributes.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn debug_level(mut self, level: DebugLevel) -> Self {
        self.opts.debug_level = level;
        self
    }

    #[must_use]
    pub fn release_savepoints(mut self, release: bool) -> Self {
        self.opts.release_savepoints = release;
        self
    }

    /// `None` leaves `SQLite`'s default (fail immediately when locked).
    #[must_use]
    pub fn busy_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.opts.busy_timeout = timeout;
        self
    }

    #[must_use]
    pub fn wal(mut self, wal: bool) -> Self {
        self.opts.wal = wal;
        self
    }

    #[must_use]
    pub fn finish(self) -> ClientOptions {
        self.opts
    }

    /// Build a client that opens its engine on first use.
    ///
    /// # Errors
    /// Returns [`SqlGateError::ConfigError`] if the options are invalid.
    pub fn build(self) -> Result<SqlClient, SqlGateError> {
        SqlClient::new(self.finish())
    }

    /// Build a client around an engine that is already live.
    ///
    /// # Errors
    /// Returns [`SqlGateError::ConfigError`] if the options are invalid, or
    /// [`SqlGateError::ConnectionError`] if the worker thread cannot be started.
    pub fn build_with_engine(self, engine: Box<dyn Engine>) -> Result<SqlClient, SqlGateError> {
        SqlClient::from_engine(engine, self.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let opts = ClientOptions::builder()
            .path("/tmp/app.db")
            .placeholder_style(PlaceholderStyle::Postgres)
            .span_attribute("db.system", "sqlite")
            .debug_level(DebugLevel::Parameters)
            .release_savepoints(true)
            .busy_timeout(None)
            .wal(true)
            .finish();
        assert_eq!(opts.location, DbLocation::Path("/tmp/app.db".into()));
        assert_eq!(opts.placeholder_style, PlaceholderStyle::Postgres);
        assert_eq!(opts.span_attributes.len(), 1);
        assert_eq!(opts.debug_level, DebugLevel::Parameters);
        assert!(opts.release_savepoints);
        assert!(opts.busy_timeout.is_none());
        assert!(opts.wal);
    }

    #[test]
    fn empty_path_is_rejected() {
        let err = ClientOptions::builder().path("").build().unwrap_err();
        assert!(matches!(err, SqlGateError::ConfigError(_)));
    }

    #[test]
    fn empty_attribute_key_is_rejected() {
        let opts = ClientOptions::builder().span_attribute("", "x").finish();
        assert!(opts.validate().is_err());
    }
}

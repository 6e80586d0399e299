use thiserror::Error;

#[derive(Error, Debug)]
pub enum TripwireError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] ureq::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("Migration error: {0}")]
    MigrationError(#[from] refinery::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("Fetch engine failed to start: {0}")]
    EngineInitError(String),

    #[error("Browser session error: {0}")]
    BrowserError(String),

    #[error("Browser did not answer in time: {0}")]
    BrowserTimeout(String),

    #[error("Another sweep is already running")]
    SweepInProgress,

    #[error("Extraction failed: {0}")]
    ExtractionError(String),

    #[error("Notification failed: {0}")]
    DispatchError(String),

    #[error("Target not found: {0}")]
    TargetNotFound(String),

    #[error("Target name already exists: {0}")]
    DuplicateTargetName(String),

    #[error("Rule not found: {0}")]
    RuleNotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl TripwireError {
    /// Get an actionable hint for how to resolve this error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            TripwireError::HttpError(_) => Some(
                "Check your internet connection and proxy settings"
            ),
            TripwireError::TargetNotFound(_) => Some(
                "Run `tripwire target list` to see registered targets"
            ),
            TripwireError::DuplicateTargetName(_) => Some(
                "Choose a different name, or edit the existing target:\n  tripwire target edit \"<name>\" --url <new-url>"
            ),
            TripwireError::RuleNotFound(_) => Some(
                "Run `tripwire rule list \"<target>\"` to see the rules still armed"
            ),
            TripwireError::SweepInProgress => Some(
                "A daemon or another `tripwire run` holds the sweep lease; try again when it finishes"
            ),
            TripwireError::EngineInitError(_)
            | TripwireError::BrowserError(_)
            | TripwireError::BrowserTimeout(_) => Some(
                "Run `tripwire doctor` to check the stealth browser setup"
            ),
            TripwireError::DispatchError(_) => Some(
                "Check your channel settings with `tripwire notify show`\nOr reconfigure with `tripwire notify set`"
            ),
            TripwireError::ExtractionError(_) => Some(
                "Check the feed selectors of the target, or register it as a plain document"
            ),
            TripwireError::DatabaseError(_) | TripwireError::MigrationError(_) => Some(
                "Try running `tripwire doctor` to check database status"
            ),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TripwireError>;

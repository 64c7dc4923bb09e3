use thiserror::Error;

/// Parsing errors for TEXT-backed enum columns.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("{0} is not a valid EventStream")]
    InvalidEventStream(String),
    #[error("{0} is not a valid TransformState")]
    InvalidTransformState(String),
    #[error("{0} is not a valid RunStatus")]
    InvalidRunStatus(String),
    #[error("{0} is not a valid EntityKind")]
    InvalidEntityKind(String),
}

/// Errors coming out of the bronze and silver storage layers. These wrap sqlx
/// so callers can classify storage trouble without string inspection.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("query failed with: {0}")]
    Query(#[from] sqlx::Error),
    #[error("could not serialize jsonb field: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl StoreError {
    /// True when the underlying failure is a Postgres unique constraint
    /// violation. Schedulers use this to recover benign insert races between
    /// concurrent workers.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            StoreError::Query(err) => is_unique_violation(err),
            _ => false,
        }
    }
}

/// Errors reading per-estate settings. The two variants demand opposite
/// handling: `Unavailable` is transient and ingestion fails open, `Invalid`
/// means the stored shape no longer matches what this build expects, which
/// has to stop the run.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("settings store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
    #[error("settings for estate {estate_id} do not decode: {error}")]
    Invalid {
        estate_id: i32,
        error: serde_json::Error,
    },
}

/// Raised when an occurrence timestamp is not RFC 3339 with a UTC offset.
/// We refuse to guess a timezone for dedup key material.
#[derive(Error, Debug)]
#[error("timestamp {0:?} is not RFC 3339 with a timezone offset")]
pub struct TimezoneRequiredError(pub String);

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Scope that rejected a per-user request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaScope {
    Daily,
    Hourly,
}

impl std::fmt::Display for QuotaScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaScope::Daily => write!(f, "daily"),
            QuotaScope::Hourly => write!(f, "hourly"),
        }
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("upstream API error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("upstream response had no body")]
    EmptyBody,
    #[error("upstream rate limit exceeded")]
    RateLimit,
    #[error("upstream authentication failed")]
    Authentication,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ExtractError {
    #[error("no valid MCQ records in model output")]
    NoRecords,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing credential")]
    MissingCredential,
    #[error("credential rejected")]
    InvalidCredential,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("either text content or file data is required")]
    MissingContent,
    #[error("mime type is required when file data is provided")]
    MissingMimeType,
}

/// Durable-store failures never abort generation; callers degrade to
/// zero-usage assumptions and log the detail.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("usage store unavailable: {0}")]
    Unavailable(String),
}

/// Every failure path of a generation attempt, tagged structurally so the
/// user-facing mapping never has to sniff message text.
#[derive(Error, Debug)]
pub enum GenerateError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("global generation quota exhausted until {reset_at}")]
    GlobalQuota { reset_at: DateTime<Utc> },
    #[error("{scope} upload limit reached, resets at {reset_at}")]
    UserQuota {
        scope: QuotaScope,
        reset_at: DateTime<Utc>,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
}

/// Map an internal error to the closed set of client-safe strings.
///
/// Raw upstream detail is only included in development mode; production
/// callers get the generic form with no internal identifiers.
pub fn user_message(error: &GenerateError, dev_mode: bool) -> String {
    match error {
        GenerateError::Validation(v) => format!("Invalid request: {v}."),
        GenerateError::Auth(_) => "Please sign in again to continue.".to_string(),
        GenerateError::GlobalQuota { reset_at } => {
            let days = (*reset_at - Utc::now()).num_days().max(1);
            format!(
                "The service has reached its monthly generation limit. Please try again in {days} day(s)."
            )
        }
        GenerateError::UserQuota { scope, reset_at } => {
            format!(
                "Your {scope} upload limit has been reached. Try again in {}.",
                humanize_until(*reset_at)
            )
        }
        GenerateError::Transport(t) => {
            if dev_mode {
                format!("Generation service error: {t}")
            } else {
                "The generation service is unavailable right now. Please try again later."
                    .to_string()
            }
        }
        GenerateError::Extract(_) => {
            "No MCQs generated from this material. Try again with clearer source text.".to_string()
        }
    }
}

fn humanize_until(reset_at: DateTime<Utc>) -> String {
    let remaining = reset_at - Utc::now();
    let minutes = remaining.num_minutes().max(1);
    if minutes >= 24 * 60 {
        format!("{} day(s)", remaining.num_days().max(1))
    } else if minutes >= 60 {
        format!("{}h {}m", minutes / 60, minutes % 60)
    } else {
        format!("{minutes} minute(s)")
    }
}

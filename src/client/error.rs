use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DarkskyError {
    #[error("Bad request (400): {0}")]
    BadRequest(String),

    #[error("Unauthorized (401): {0}")]
    Unauthorized(String),

    #[error("Payment required (402): {0}")]
    PaymentRequired(String),

    // Dark Sky answers both 403 and 409 for keys that may not use the endpoint.
    #[error("Forbidden ({status}): {message}")]
    Forbidden { status: StatusCode, message: String },

    #[error("Not found (404): {0}")]
    NotFound(String),

    #[error("Internal service error (500): {0}")]
    InternalService(String),

    #[error("Dark Sky API error ({status}): {message}")]
    Api { status: StatusCode, message: String },

    #[error("HTTP request failed for {url} with status {status} and no readable body")]
    HttpStatus { url: String, status: StatusCode },

    #[error("Network request failed for {url}")]
    NetworkRequest {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to parse JSON response from {url}")]
    JsonParse {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Missing secret_key")]
    MissingSecretKey,
}

impl DarkskyError {
    /// Builds the error for a non-success response.
    ///
    /// A readable JSON body produces the status-specific variant carrying that body,
    /// anything else falls back to [`DarkskyError::HttpStatus`].
    pub fn from_response(url: &str, status: StatusCode, body: &[u8]) -> Self {
        let parsed = if body.is_empty() {
            None
        } else {
            serde_json::from_slice::<serde_json::Value>(body).ok()
        };
        let Some(json) = parsed else {
            return DarkskyError::HttpStatus {
                url: redact(url),
                status,
            };
        };

        let message = format!("RESPONSE: {json}");
        match status.as_u16() {
            400 => DarkskyError::BadRequest(message),
            401 => DarkskyError::Unauthorized(message),
            402 => DarkskyError::PaymentRequired(message),
            403 | 409 => DarkskyError::Forbidden { status, message },
            404 => DarkskyError::NotFound(message),
            500 => DarkskyError::InternalService(message),
            _ => DarkskyError::Api { status, message },
        }
    }

    /// The HTTP status behind this error, if the server answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            DarkskyError::BadRequest(_) => Some(StatusCode::BAD_REQUEST),
            DarkskyError::Unauthorized(_) => Some(StatusCode::UNAUTHORIZED),
            DarkskyError::PaymentRequired(_) => Some(StatusCode::PAYMENT_REQUIRED),
            DarkskyError::NotFound(_) => Some(StatusCode::NOT_FOUND),
            DarkskyError::InternalService(_) => Some(StatusCode::INTERNAL_SERVER_ERROR),
            DarkskyError::Forbidden { status, .. }
            | DarkskyError::Api { status, .. }
            | DarkskyError::HttpStatus { status, .. } => Some(*status),
            DarkskyError::NetworkRequest { source, .. } => source.status(),
            DarkskyError::JsonParse { .. } | DarkskyError::MissingSecretKey => None,
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.status().is_some_and(|s| s.is_server_error())
    }

    /// 5xx, 429 and connection-level failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        if let DarkskyError::NetworkRequest { source, .. } = self {
            return source.is_connect() || source.is_timeout() || source.is_request();
        }
        self.is_server_error() || self.status() == Some(StatusCode::TOO_MANY_REQUESTS)
    }
}

/// Strips the secret key segment from a forecast URL before it ends up in logs or errors.
pub(crate) fn redact(url: &str) -> String {
    match url.find("/forecast/") {
        Some(idx) => {
            let start = idx + "/forecast/".len();
            let rest = &url[start..];
            let end = rest.find('/').map(|i| start + i).unwrap_or(url.len());
            format!("{}<secret_key>{}", &url[..start], &url[end..])
        }
        None => url.to_string(),
    }
}

use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Invalid configuration"))]
    Config {
        #[snafu(source)]
        source: envy::Error,
    },

    #[snafu(display("Object store request failed"))]
    Gateway {
        #[snafu(source(false))]
        source: Option<eyre::Report>,
    },

    #[snafu(display("Malformed record document at {key}"))]
    Serialization {
        key: String,
        #[snafu(source)]
        source: serde_json::Error,
    },

    #[snafu(display("Message {message_id} is already pending"))]
    DuplicateMessage { message_id: String },

    #[snafu(display("Message identifier must not be empty"))]
    EmptyMessageId,

    #[snafu(display("Invalid parameter: {message}"))]
    InvalidParameter { message: String },

    #[snafu(display("Scheduler is shutting down"))]
    ShutdownInProgress,
}

impl From<envy::Error> for Error {
    fn from(source: envy::Error) -> Self {
        Self::Config { source }
    }
}

impl Error {
    pub fn gateway(e: impl Into<eyre::Report>) -> Self {
        Self::Gateway {
            source: Some(e.into()),
        }
    }

    pub fn serialization(key: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            key: key.into(),
            source,
        }
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }
}

impl actix_web::ResponseError for Error {
    fn status_code(&self) -> actix_web::http::StatusCode {
        match self {
            Self::EmptyMessageId | Self::InvalidParameter { .. } => {
                actix_web::http::StatusCode::BAD_REQUEST
            }
            Self::DuplicateMessage { .. } => actix_web::http::StatusCode::CONFLICT,
            Self::ShutdownInProgress => actix_web::http::StatusCode::SERVICE_UNAVAILABLE,
            Self::Gateway { .. } => actix_web::http::StatusCode::BAD_GATEWAY,

            Self::Config { .. } | Self::Serialization { .. } => {
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("malformed message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("room {0} does not exist")]
    RoomNotFound(String),

    #[error("participant {user_id} does not exist in room {room}")]
    ParticipantNotFound { room: String, user_id: i64 },

    #[error("device {device_id} does not exist for user {user_id}")]
    DeviceNotFound { user_id: i64, device_id: String },

    #[error("invalid token for room {0}")]
    InvalidToken(String),

    #[error("participant {user_id} already exists in room {room}")]
    DuplicateParticipant { room: String, user_id: i64 },

    #[error("device {device_id} already registered for user {user_id}")]
    DuplicateDevice { user_id: i64, device_id: String },

    #[error("unknown action {0}")]
    UnknownAction(String),

    #[error("media server error: {0}")]
    MediaServer(#[from] reqwest::Error),
}

impl AppError {
    /// Short machine-readable code used in error replies on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Decode(_) => "decode_error",
            AppError::RoomNotFound(_) => "room_not_found",
            AppError::ParticipantNotFound { .. } => "participant_not_found",
            AppError::DeviceNotFound { .. } => "device_not_found",
            AppError::InvalidToken(_) => "invalid_token",
            AppError::DuplicateParticipant { .. } => "duplicate_participant",
            AppError::DuplicateDevice { .. } => "duplicate_device",
            AppError::UnknownAction(_) => "unknown_action",
            AppError::MediaServer(_) => "media_server_error",
        }
    }

    /// A decode failure leaves the connection's protocol state unknown, so
    /// the dispatcher treats it as unrecoverable. Everything else is answered
    /// with an error reply and the connection stays open.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::Decode(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Decode(_) | AppError::UnknownAction(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            AppError::RoomNotFound(_)
            | AppError::ParticipantNotFound { .. }
            | AppError::DeviceNotFound { .. } => StatusCode::NOT_FOUND,
            AppError::DuplicateParticipant { .. } | AppError::DuplicateDevice { .. } => {
                StatusCode::CONFLICT
            }
            AppError::MediaServer(_) => StatusCode::BAD_GATEWAY,
        };

        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

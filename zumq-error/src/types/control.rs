use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки разбора control-фрейма подписки.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    /// Фрейм пустой, нет даже байта типа
    #[error("empty control frame")]
    Empty,
    /// Payload не является корректным JSON-конвертом подписки
    #[error("invalid subscription envelope: {reason}")]
    InvalidEnvelope { reason: String },
    /// Первый байт не является маркером подписки или отписки
    #[error("unknown subscription marker 0x{0:02x}")]
    UnknownMarker(u8),
}

impl ErrorExt for ControlError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Empty => StatusCode::EmptyMessage,
            Self::InvalidEnvelope { .. } => StatusCode::InvalidEnvelope,
            Self::UnknownMarker(_) => StatusCode::InvalidFlags,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_error_messages() {
        let err = ControlError::InvalidEnvelope {
            reason: "expected value at line 1 column 1".into(),
        };
        assert!(err.to_string().starts_with("invalid subscription envelope"));
        assert_eq!(err.status_code(), StatusCode::InvalidEnvelope);
        assert_eq!(ControlError::Empty.status_code(), StatusCode::EmptyMessage);
        assert_eq!(
            ControlError::UnknownMarker(7).to_string(),
            "unknown subscription marker 0x07"
        );
    }
}

use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки авторизации подписки.
///
/// Любой вариант означает отказ: подписка не пересылается дальше.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Подпись не соответствует каналу
    #[error("signature does not match channel '{channel}'")]
    InvalidSignature { channel: String },
    /// Подписка отклонена политикой
    #[error("subscription to '{channel}' rejected: {reason}")]
    Rejected { channel: String, reason: String },
    /// Сбой самой проверки
    #[error("signature checker failed: {reason}")]
    Checker { reason: String },
}

impl ErrorExt for AuthError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidSignature { .. } => StatusCode::InvalidSignature,
            Self::Rejected { .. } => StatusCode::PermissionDenied,
            Self::Checker { .. } => StatusCode::AuthFailed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "auth".to_string()),
            ("status_code", self.status_code().to_string()),
        ];
        match self {
            Self::InvalidSignature { channel } | Self::Rejected { channel, .. } => {
                tags.push(("channel", channel.clone()));
            }
            Self::Checker { .. } => {}
        }
        tags
    }
}

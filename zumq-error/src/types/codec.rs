use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки декодирования multipart-фреймов.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Заявленная длина фрейма превышает лимит
    #[error("frame too large: {size} > {max} bytes")]
    FrameTooLarge { size: usize, max: usize },
    /// Неизвестные биты в байте флагов
    #[error("unknown frame flags: {0:#04x}")]
    InvalidFlags(u8),
    /// Слишком много фреймов в одном сообщении
    #[error("message has too many frames: {count} > {max}")]
    TooManyFrames { count: usize, max: usize },
}

impl ErrorExt for CodecError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::FrameTooLarge { .. } | Self::TooManyFrames { .. } => StatusCode::SizeLimit,
            Self::InvalidFlags(_) => StatusCode::InvalidFlags,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "codec".to_string()),
            ("status_code", self.status_code().to_string()),
        ];
        if let Self::FrameTooLarge { size, .. } = self {
            tags.push(("frame_size", size.to_string()));
        }
        tags
    }
}

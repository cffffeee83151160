use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode, TransportError};

/// Ошибки создания прокси-узла.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Не удалось привязать один из сокетов
    #[error("failed to bind {role} endpoint on {address}: {source}")]
    Bind {
        role: &'static str,
        address: String,
        #[source]
        source: TransportError,
    },
    /// Ошибка транспорта вне этапа привязки
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ErrorExt for ProxyError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Bind { source, .. } | Self::Transport(source) => source.status_code(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "proxy".to_string()),
            ("status_code", self.status_code().to_string()),
        ];
        if let Self::Bind { role, address, .. } = self {
            tags.push(("role", role.to_string()));
            tags.push(("address", address.clone()));
        }
        tags
    }
}

use std::any::Any;

use thiserror::Error;

use crate::{CodecError, ErrorExt, StatusCode};

/// Ошибки транспортного уровня (сокеты, соединения, адреса).
#[derive(Debug, Error)]
pub enum TransportError {
    /// Адрес не удалось разобрать
    #[error("invalid endpoint address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
    /// Не удалось занять адрес
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    /// Нет ни одного подключённого пира
    #[error("no connected peers")]
    NotConnected,
    /// Сокет уже закрыт
    #[error("socket is closed")]
    Closed,
    /// Операция не поддерживается типом сокета
    #[error("{operation} is not supported by {socket_type} socket")]
    Unsupported {
        socket_type: &'static str,
        operation: &'static str,
    },
    /// Ошибка ввода-вывода
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Ошибка фрейминга
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl ErrorExt for TransportError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidAddress { .. } => StatusCode::InvalidAddress,
            Self::Bind { source, .. } if source.kind() == std::io::ErrorKind::AddrInUse => {
                StatusCode::AddressInUse
            }
            Self::Bind { .. } => StatusCode::ConnectionFailed,
            Self::NotConnected => StatusCode::NotConnected,
            Self::Closed => StatusCode::SocketClosed,
            Self::Unsupported { .. } => StatusCode::Unsupported,
            Self::Io(_) => StatusCode::Io,
            Self::Codec(e) => e.status_code(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "transport".to_string()),
            ("status_code", self.status_code().to_string()),
        ];
        match self {
            Self::InvalidAddress { address, .. } | Self::Bind { address, .. } => {
                tags.push(("address", address.clone()));
            }
            Self::Unsupported { socket_type, .. } => {
                tags.push(("socket_type", socket_type.to_string()));
            }
            _ => {}
        }
        tags
    }
}

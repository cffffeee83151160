use std::fmt;

use num_enum::TryFromPrimitive;
#[cfg(feature = "serde_repr")]
use serde_repr::{Deserialize_repr, Serialize_repr};
#[cfg(feature = "strum")]
use strum_macros::{AsRefStr, EnumIter};

/// Коды статуса для категоризации ошибок.
///
/// # Диапазоны:
/// - 0xxx: Успех
/// - 1xxx: Общие ошибки
/// - 2xxx: Ошибки данных и конфигурации
/// - 3xxx: Авторизация подписок
/// - 6xxx: Сеть / IO
/// - 8xxx: Протокольные ошибки (фрейминг, control-фреймы)
#[cfg_attr(feature = "strum", derive(AsRefStr, EnumIter))]
#[cfg_attr(feature = "serde_repr", derive(Serialize_repr, Deserialize_repr))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 0xxx: Успех ===
    Success = 0,

    // === 1xxx: Общие ошибки ===
    Unknown = 1000,
    Unsupported = 1001,
    Unexpected = 1002,
    Internal = 1003,
    InvalidArgs = 1004,

    // === 2xxx: Ошибки данных/конфигурации ===
    InvalidAddress = 2000,
    InvalidConfig = 2001,
    InvalidOperation = 2002,

    // === 3xxx: Авторизация ===
    AuthFailed = 3000,
    InvalidSignature = 3001,
    PermissionDenied = 3002,

    // === 6xxx: Сеть/IO ===
    Io = 6000,
    ConnectionClosed = 6001,
    Timeout = 6002,
    ConnectionFailed = 6003,
    NotConnected = 6004,
    AddressInUse = 6005,
    SocketClosed = 6006,

    // === 8xxx: Протокол ===
    InvalidFrame = 8000,
    SizeLimit = 8001,
    InvalidFlags = 8002,
    EmptyMessage = 8003,
    InvalidEnvelope = 8004,
    DecodingError = 8005,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Пытается получить вариант `StatusCode` из `u32`.
    ///
    /// Использует `TryFrom<u32>` из `num_enum`; возвращает `None`, если
    /// значение не соответствует ни одному варианту.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Возвращает `true`, если операцию с этим кодом имеет смысл повторить.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::ConnectionFailed | Self::NotConnected | Self::ConnectionClosed
        )
    }

    /// Ошибка вызвана удалённой стороной (неверный фрейм, подпись и т.д.).
    pub fn is_peer_error(&self) -> bool {
        let c = self.code();
        (3000..=3999).contains(&c) || (8000..=8999).contains(&c)
    }

    /// Ошибка протокола или парсинга (диапазон 8xxx).
    pub fn is_protocol_error(&self) -> bool {
        (8000..=8999).contains(&self.code())
    }

    /// Рекомендуемый уровень логирования для данного кода.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Success => LogLevel::Trace,
            Self::NotConnected | Self::ConnectionClosed | Self::SocketClosed => LogLevel::Debug,
            Self::AuthFailed
            | Self::InvalidSignature
            | Self::PermissionDenied
            | Self::InvalidEnvelope
            | Self::EmptyMessage => LogLevel::Info,
            Self::Internal | Self::Unexpected | Self::AddressInUse | Self::InvalidConfig => {
                LogLevel::Error
            }
            _ => LogLevel::Warn,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        #[cfg(feature = "strum")]
        {
            write!(f, "{} ({})", self.as_ref(), self.code())
        }
        #[cfg(not(feature = "strum"))]
        {
            write!(f, "{:?} ({})", self, self.code())
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет, что retryable-коды помечаются корректно.
    #[test]
    fn test_retryable() {
        assert!(StatusCode::Timeout.is_retryable());
        assert!(StatusCode::NotConnected.is_retryable());
        assert!(!StatusCode::InvalidSignature.is_retryable());
        assert!(!StatusCode::AddressInUse.is_retryable());
    }

    /// Тест проверяет разделение ошибок удалённой стороны.
    #[test]
    fn test_peer_errors() {
        assert!(StatusCode::InvalidSignature.is_peer_error());
        assert!(StatusCode::InvalidEnvelope.is_peer_error());
        assert!(!StatusCode::Io.is_peer_error());
        assert!(!StatusCode::Internal.is_peer_error());
    }

    /// Тест проверяет конвертацию через `TryFrom<u32>` и `from_u32`.
    #[test]
    fn test_from_try_from_u32() {
        let n = StatusCode::AddressInUse.code();
        assert_eq!(StatusCode::try_from(n).unwrap(), StatusCode::AddressInUse);
        assert!(StatusCode::from_u32(99999).is_none());
    }

    /// Тест проверяет числовое представление и `From<StatusCode> for u32`.
    #[test]
    fn test_code_and_into() {
        let n: u32 = StatusCode::InvalidFrame.into();
        assert_eq!(n, 8000);
        assert!(StatusCode::InvalidFlags.is_protocol_error());
        assert!(!StatusCode::AuthFailed.is_protocol_error());
    }

    /// Тест проверяет уровни логирования.
    #[test]
    fn test_log_level_mappings() {
        assert_eq!(StatusCode::Success.log_level(), LogLevel::Trace);
        assert_eq!(StatusCode::InvalidSignature.log_level(), LogLevel::Info);
        assert_eq!(StatusCode::AddressInUse.log_level(), LogLevel::Error);
        assert_eq!(StatusCode::Io.log_level(), LogLevel::Warn);
    }

    /// Тест проверяет формат `Display`.
    #[test]
    fn test_display_contains_name_and_code() {
        let s = format!("{}", StatusCode::InvalidEnvelope);
        assert!(s.contains("8004"), "got: {s}");
        assert!(s.contains("InvalidEnvelope"), "got: {s}");
    }
}

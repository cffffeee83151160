//! Разбор и переписывание control-фреймов подписки.
//!
//! Фрейм: байт 0 содержит маркер (`1` подписка, `0` отписка), остальное
//! составляет payload.
//! В прозрачном режиме payload является топиком, в режиме авторизации JSON
//! `{"channelName": "...", "signature": "..."}`.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use zumq_error::ControlError;

use crate::transport::{control_frame, SUBSCRIBE_MARKER, UNSUBSCRIBE_MARKER};

/// Тип control-фрейма.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    Subscribe,
    Unsubscribe,
    /// Любой другой первый байт
    Unknown(u8),
}

/// Разобранный control-фрейм.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionFrame {
    pub kind: SubscriptionKind,
    pub payload: Bytes,
}

/// Подписанный конверт подписки.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionEnvelope {
    pub channel_name: String,
    pub signature: String,
}

/// Какой маркер ставить в переписанный фрейм.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RewriteMarker {
    /// Тот же тип, что у входящего фрейма
    #[default]
    MirrorInput,
    /// Всегда подписка, даже для отписки
    AlwaysSubscribe,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl SubscriptionKind {
    pub fn from_marker(marker: u8) -> Self {
        match marker {
            SUBSCRIBE_MARKER => Self::Subscribe,
            UNSUBSCRIBE_MARKER => Self::Unsubscribe,
            other => Self::Unknown(other),
        }
    }

    pub fn marker(self) -> u8 {
        match self {
            Self::Subscribe => SUBSCRIBE_MARKER,
            Self::Unsubscribe => UNSUBSCRIBE_MARKER,
            Self::Unknown(marker) => marker,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl SubscriptionFrame {
    /// Делит фрейм на маркер и payload.
    pub fn parse(frame: &Bytes) -> Result<Self, ControlError> {
        let marker = *frame.first().ok_or(ControlError::Empty)?;
        Ok(Self {
            kind: SubscriptionKind::from_marker(marker),
            payload: frame.slice(1..),
        })
    }

    /// Разбирает payload как подписанный конверт.
    pub fn envelope(&self) -> Result<SubscriptionEnvelope, ControlError> {
        SubscriptionEnvelope::parse(&self.payload)
    }
}

impl SubscriptionEnvelope {
    pub fn new(
        channel_name: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        Self {
            channel_name: channel_name.into(),
            signature: signature.into(),
        }
    }

    /// Разбирает JSON-конверт. Оба поля обязательны и должны быть строками.
    pub fn parse(payload: &[u8]) -> Result<Self, ControlError> {
        serde_json::from_slice(payload).map_err(|e| ControlError::InvalidEnvelope {
            reason: e.to_string(),
        })
    }

    /// Собирает control-фрейм `marker | json`.
    pub fn to_frame(
        &self,
        kind: SubscriptionKind,
    ) -> Bytes {
        // Сериализация структуры из двух строк не падает.
        let json = serde_json::to_vec(self).unwrap_or_default();
        control_frame(kind.marker(), &json)
    }
}

impl RewriteMarker {
    /// Маркер переписанного фрейма для входящего типа.
    pub fn resolve(
        self,
        kind: SubscriptionKind,
    ) -> Result<u8, ControlError> {
        match (self, kind) {
            (Self::AlwaysSubscribe, _) => Ok(SUBSCRIBE_MARKER),
            (Self::MirrorInput, SubscriptionKind::Unknown(marker)) => {
                Err(ControlError::UnknownMarker(marker))
            }
            (Self::MirrorInput, kind) => Ok(kind.marker()),
        }
    }
}

/// Собирает новый фрейм `marker | channel_name` для отправки издателям.
pub fn rewrite(
    kind: SubscriptionKind,
    channel_name: &str,
    marker: RewriteMarker,
) -> Result<Bytes, ControlError> {
    Ok(control_frame(marker.resolve(kind)?, channel_name.as_bytes()))
}

/// Фрейм для логов: как текст (с заменой невалидного UTF-8) и в hex.
pub fn describe_frame(frame: &[u8]) -> (String, String) {
    (String::from_utf8_lossy(frame).into_owned(), hex::encode(frame))
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl fmt::Display for SubscriptionKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::Unknown(marker) => write!(f, "unknown(0x{marker:02x})"),
            other => f.write_str(other.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(bytes: &'static [u8]) -> Bytes {
        Bytes::from_static(bytes)
    }

    #[test]
    fn test_parse_kinds() {
        let sub = SubscriptionFrame::parse(&frame(b"\x01news")).unwrap();
        assert_eq!(sub.kind, SubscriptionKind::Subscribe);
        assert_eq!(&sub.payload[..], b"news");

        let unsub = SubscriptionFrame::parse(&frame(b"\x00")).unwrap();
        assert_eq!(unsub.kind, SubscriptionKind::Unsubscribe);
        assert!(unsub.payload.is_empty());

        let other = SubscriptionFrame::parse(&frame(b"\x05x")).unwrap();
        assert_eq!(other.kind, SubscriptionKind::Unknown(5));
        assert_eq!(other.kind.to_string(), "unknown(0x05)");
    }

    #[test]
    fn test_parse_empty_frame() {
        assert_eq!(
            SubscriptionFrame::parse(&Bytes::new()),
            Err(ControlError::Empty)
        );
    }

    /// Тест проверяет разбор корректного конверта.
    #[test]
    fn test_envelope_parse() {
        let parsed =
            SubscriptionFrame::parse(&frame(br#"{"channelName":"topicA","signature":"sig"}"#));
        // Без маркера первый байт `{` считается неизвестным типом.
        assert_eq!(parsed.unwrap().kind, SubscriptionKind::Unknown(b'{'));

        let envelope =
            SubscriptionEnvelope::parse(br#"{"channelName":"topicA","signature":"sig"}"#).unwrap();
        assert_eq!(envelope, SubscriptionEnvelope::new("topicA", "sig"));
    }

    /// Тест проверяет, что конверт без поля или с полем не того типа
    /// отвергается.
    #[test]
    fn test_envelope_requires_string_fields() {
        let cases: [&[u8]; 5] = [
            b"not json",
            br#"{"channelName":"a"}"#,
            br#"{"channelName":1,"signature":"s"}"#,
            br#"{"channelName":"a","signature":null}"#,
            br#""just a string""#,
        ];
        for bad in cases {
            assert!(
                matches!(
                    SubscriptionEnvelope::parse(bad),
                    Err(ControlError::InvalidEnvelope { .. })
                ),
                "{}",
                String::from_utf8_lossy(bad)
            );
        }
    }

    #[test]
    fn test_envelope_frame_round_trip() {
        let envelope = SubscriptionEnvelope::new("orders", "abc");
        let bytes = envelope.to_frame(SubscriptionKind::Subscribe);
        let parsed = SubscriptionFrame::parse(&bytes).unwrap();
        assert_eq!(parsed.kind, SubscriptionKind::Subscribe);
        assert_eq!(parsed.envelope().unwrap(), envelope);
    }

    /// Тест проверяет маркер переписанного фрейма в обоих режимах.
    #[test]
    fn test_rewrite_marker() {
        let mirror = RewriteMarker::MirrorInput;
        let always = RewriteMarker::AlwaysSubscribe;

        assert_eq!(
            &rewrite(SubscriptionKind::Subscribe, "topicA", mirror).unwrap()[..],
            b"\x01topicA"
        );
        assert_eq!(
            &rewrite(SubscriptionKind::Unsubscribe, "topicA", mirror).unwrap()[..],
            b"\x00topicA"
        );
        assert_eq!(
            &rewrite(SubscriptionKind::Unsubscribe, "topicA", always).unwrap()[..],
            b"\x01topicA"
        );
        assert_eq!(
            rewrite(SubscriptionKind::Unknown(9), "t", mirror),
            Err(ControlError::UnknownMarker(9))
        );
        assert!(rewrite(SubscriptionKind::Unknown(9), "t", always).is_ok());
    }

    #[test]
    fn test_describe_frame() {
        let (raw, hex) = describe_frame(b"\x01ab");
        assert_eq!(raw, "\u{1}ab");
        assert_eq!(hex, "016162");
    }

    #[test]
    fn test_rewrite_marker_deserializes_kebab_case() {
        let marker: RewriteMarker = serde_json::from_str("\"always-subscribe\"").unwrap();
        assert_eq!(marker, RewriteMarker::AlwaysSubscribe);
    }
}

use bytes::Bytes;

use crate::transport::Multipart;

/// Публикуемое сообщение: канал и произвольное число фреймов данных.
///
/// На проводе передаётся как `[channel, payload...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub channel: Bytes,
    pub payload: Vec<Bytes>,
}

impl Message {
    pub fn new(
        channel: impl Into<Bytes>,
        payload: Vec<Bytes>,
    ) -> Self {
        Self {
            channel: channel.into(),
            payload,
        }
    }

    /// Сообщение с одним фреймом данных.
    pub fn single(
        channel: impl Into<Bytes>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self::new(channel, vec![payload.into()])
    }

    /// Собирает сообщение из полученных фреймов.
    ///
    /// `None`, если фреймов нет.
    pub fn from_multipart(mut frames: Multipart) -> Option<Self> {
        if frames.is_empty() {
            return None;
        }
        let channel = frames.remove(0);
        Some(Self {
            channel,
            payload: frames,
        })
    }

    pub fn into_multipart(self) -> Multipart {
        let mut frames = Vec::with_capacity(self.payload.len() + 1);
        frames.push(self.channel);
        frames.extend(self.payload);
        frames
    }

    /// Канал как строка, если он в UTF-8.
    pub fn channel_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.channel).ok()
    }
}

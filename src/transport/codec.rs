//! Кодек multipart-сообщений.
//!
//! Сообщение есть упорядоченная последовательность фреймов. Каждый фрейм
//! кодируется как:
//!
//! ```text
//! +-------+-----------------+----------------+
//! | flags | length (u32 BE) | payload        |
//! +-------+-----------------+----------------+
//!   1 байт      4 байта        length байт
//! ```
//!
//! Бит `0x01` во флагах (`MORE`) означает, что за фреймом следует ещё один
//! фрейм того же сообщения. Сообщение заканчивается первым фреймом без
//! `MORE`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use zumq_error::CodecError;

/// Сообщение из нескольких фреймов.
pub type Multipart = Vec<Bytes>;

/// Флаг «за этим фреймом есть ещё фреймы».
pub const FLAG_MORE: u8 = 0x01;
/// Размер заголовка фрейма: флаги + длина.
pub const FRAME_HEADER_LEN: usize = 5;
/// Максимальный размер одного фрейма по умолчанию (16mb).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
/// Максимальное число фреймов в одном сообщении.
pub const MAX_FRAMES_PER_MESSAGE: usize = 1024;

/// Энкодер multipart-сообщений.
pub struct MultipartEncoder;

impl MultipartEncoder {
    /// Дописывает сообщение в `dst`.
    ///
    /// Пустое сообщение кодируется как один пустой фрейм: на проводе не
    /// бывает сообщений без фреймов.
    pub fn encode(
        message: &[Bytes],
        dst: &mut BytesMut,
    ) {
        if message.is_empty() {
            Self::encode_frame(&[], false, dst);
            return;
        }

        let last = message.len() - 1;
        for (idx, frame) in message.iter().enumerate() {
            Self::encode_frame(frame, idx != last, dst);
        }
    }

    /// Проверяет, что сообщение пройдёт декодер получателя с лимитом
    /// `max_frame_size`.
    ///
    /// Лимит не может превышать `u32::MAX`: длина фрейма на проводе
    /// занимает 4 байта.
    pub fn check(
        message: &[Bytes],
        max_frame_size: usize,
    ) -> Result<(), CodecError> {
        if message.len() > MAX_FRAMES_PER_MESSAGE {
            return Err(CodecError::TooManyFrames {
                count: message.len(),
                max: MAX_FRAMES_PER_MESSAGE,
            });
        }
        let max = max_frame_size.min(u32::MAX as usize);
        match message.iter().find(|frame| frame.len() > max) {
            Some(frame) => Err(CodecError::FrameTooLarge {
                size: frame.len(),
                max,
            }),
            None => Ok(()),
        }
    }

    /// Размер сообщения в закодированном виде.
    pub fn encoded_len(message: &[Bytes]) -> usize {
        if message.is_empty() {
            return FRAME_HEADER_LEN;
        }
        message.iter().map(|f| FRAME_HEADER_LEN + f.len()).sum()
    }

    fn encode_frame(
        frame: &[u8],
        more: bool,
        dst: &mut BytesMut,
    ) {
        // Сокет пропускает сюда только сообщения, прошедшие `check`.
        debug_assert!(frame.len() <= u32::MAX as usize, "frame length overflows u32");
        dst.reserve(FRAME_HEADER_LEN + frame.len());
        dst.put_u8(if more { FLAG_MORE } else { 0 });
        dst.put_u32(frame.len() as u32);
        dst.put_slice(frame);
    }
}

/// Потоковый декодер multipart-сообщений.
///
/// Хранит уже прочитанные фреймы незавершённого сообщения между вызовами
/// `decode`, поэтому входной буфер может приходить произвольными кусками.
#[derive(Debug)]
pub struct MultipartDecoder {
    max_frame_size: usize,
    pending: Multipart,
}

impl MultipartDecoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            pending: Vec::new(),
        }
    }

    /// Пытается извлечь из `src` одно полное сообщение.
    ///
    /// # Возвращает
    /// - `Ok(Some(message))`: сообщение собрано, его байты удалены из `src`
    /// - `Ok(None)`: данных недостаточно, нужно дочитать
    /// - `Err(CodecError)`: поток повреждён, соединение следует закрыть
    pub fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<Multipart>, CodecError> {
        while src.len() >= FRAME_HEADER_LEN {
            let flags = src[0];
            if flags & !FLAG_MORE != 0 {
                return Err(CodecError::InvalidFlags(flags));
            }

            let len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
            if len > self.max_frame_size {
                return Err(CodecError::FrameTooLarge {
                    size: len,
                    max: self.max_frame_size,
                });
            }
            if src.len() < FRAME_HEADER_LEN + len {
                src.reserve(FRAME_HEADER_LEN + len - src.len());
                return Ok(None);
            }

            src.advance(FRAME_HEADER_LEN);
            self.pending.push(src.split_to(len).freeze());

            if self.pending.len() > MAX_FRAMES_PER_MESSAGE {
                return Err(CodecError::TooManyFrames {
                    count: self.pending.len(),
                    max: MAX_FRAMES_PER_MESSAGE,
                });
            }

            if flags & FLAG_MORE == 0 {
                return Ok(Some(std::mem::take(&mut self.pending)));
            }
        }

        Ok(None)
    }
}

impl Default for MultipartDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(message: &[Bytes]) -> BytesMut {
        let mut buf = BytesMut::new();
        MultipartEncoder::encode(message, &mut buf);
        buf
    }

    /// Тест проверяет раскладку байтов одного фрейма.
    #[test]
    fn test_single_frame_layout() {
        let buf = encode(&[Bytes::from_static(b"abc")]);
        assert_eq!(&buf[..], &[0x00, 0, 0, 0, 3, b'a', b'b', b'c']);
    }

    /// Тест проверяет, что отправитель отвергает то, что отверг бы
    /// декодер получателя.
    #[test]
    fn test_check_matches_decoder_limits() {
        let frame = Bytes::from(vec![0u8; 10]);
        assert!(MultipartEncoder::check(&[frame.clone()], 10).is_ok());
        assert_eq!(
            MultipartEncoder::check(&[Bytes::new(), frame.clone()], 9),
            Err(CodecError::FrameTooLarge { size: 10, max: 9 })
        );

        let many = vec![Bytes::new(); MAX_FRAMES_PER_MESSAGE + 1];
        assert!(matches!(
            MultipartEncoder::check(&many, DEFAULT_MAX_FRAME_SIZE),
            Err(CodecError::TooManyFrames { .. })
        ));

        // Лимит больше 4 гб сводится к u32::MAX.
        assert!(MultipartEncoder::check(&[frame], usize::MAX).is_ok());
    }

    /// Тест проверяет, что все фреймы кроме последнего помечены `MORE`.
    #[test]
    fn test_more_flag_on_all_but_last() {
        let buf = encode(&[Bytes::from_static(b"ch"), Bytes::from_static(b"x")]);
        assert_eq!(buf[0], FLAG_MORE);
        assert_eq!(buf[FRAME_HEADER_LEN + 2], 0);
        assert_eq!(
            buf.len(),
            MultipartEncoder::encoded_len(&[Bytes::from_static(b"ch"), Bytes::from_static(b"x")])
        );
    }

    #[test]
    fn test_empty_message_is_one_empty_frame() {
        let mut buf = encode(&[]);
        let mut decoder = MultipartDecoder::default();
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(vec![Bytes::new()]));
    }

    /// Тест проверяет декодирование сообщения, пришедшего по одному байту.
    #[test]
    fn test_decode_byte_by_byte() {
        let message = vec![
            Bytes::from_static(b"news"),
            Bytes::from_static(b""),
            Bytes::from_static(b"payload"),
        ];
        let encoded = encode(&message);

        let mut decoder = MultipartDecoder::default();
        let mut src = BytesMut::new();
        let mut decoded = None;
        for byte in encoded.iter() {
            src.put_u8(*byte);
            if let Some(msg) = decoder.decode(&mut src).unwrap() {
                decoded = Some(msg);
            }
        }

        assert_eq!(decoded, Some(message));
        assert!(src.is_empty());
    }

    #[test]
    fn test_decode_two_messages_from_one_buffer() {
        let mut src = encode(&[Bytes::from_static(b"a")]);
        src.extend_from_slice(&encode(&[Bytes::from_static(b"b"), Bytes::from_static(b"c")]));

        let mut decoder = MultipartDecoder::default();
        assert_eq!(
            decoder.decode(&mut src).unwrap(),
            Some(vec![Bytes::from_static(b"a")])
        );
        assert_eq!(
            decoder.decode(&mut src).unwrap(),
            Some(vec![Bytes::from_static(b"b"), Bytes::from_static(b"c")])
        );
        assert_eq!(decoder.decode(&mut src).unwrap(), None);
    }

    #[test]
    fn test_rejects_unknown_flags() {
        let mut src = BytesMut::from(&[0x80, 0, 0, 0, 0][..]);
        let err = MultipartDecoder::default().decode(&mut src).unwrap_err();
        assert_eq!(err, CodecError::InvalidFlags(0x80));
    }

    /// Тест проверяет, что слишком длинный фрейм отвергается по заголовку,
    /// не дожидаясь тела.
    #[test]
    fn test_rejects_oversized_frame_from_header() {
        let mut src = BytesMut::from(&[0x00, 0, 0, 0x10, 0][..]);
        let err = MultipartDecoder::new(1024).decode(&mut src).unwrap_err();
        assert_eq!(
            err,
            CodecError::FrameTooLarge {
                size: 4096,
                max: 1024
            }
        );
    }

    #[test]
    fn test_rejects_too_many_frames() {
        let frames: Vec<Bytes> = (0..=MAX_FRAMES_PER_MESSAGE)
            .map(|_| Bytes::from_static(b"x"))
            .collect();
        let mut src = encode(&frames);
        let err = MultipartDecoder::default().decode(&mut src).unwrap_err();
        assert!(matches!(err, CodecError::TooManyFrames { .. }));
    }
}

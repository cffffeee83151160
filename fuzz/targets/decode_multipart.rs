#![no_main]

use arbitrary::Arbitrary;
use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use zumq::transport::{MultipartDecoder, MultipartEncoder};

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    data: Vec<u8>,
    /// Размеры кусков, которыми приходит поток
    chunks: Vec<u8>,
    max_frame_size: u16,
}

fuzz_target!(|input: FuzzInput| {
    let mut decoder = MultipartDecoder::new(input.max_frame_size as usize);
    let mut src = BytesMut::new();
    let mut rest = &input.data[..];
    let mut chunks = input.chunks.iter().map(|c| (*c as usize).max(1)).cycle();

    // Декодер не паникует на любом входе и любой нарезке.
    while !rest.is_empty() {
        let take = chunks.next().unwrap_or(rest.len()).min(rest.len());
        src.extend_from_slice(&rest[..take]);
        rest = &rest[take..];

        loop {
            match decoder.decode(&mut src) {
                Ok(Some(message)) => {
                    assert!(!message.is_empty());
                    assert!(message.iter().all(|f| f.len() <= input.max_frame_size as usize));

                    // Собранное сообщение кодируется обратно без потерь.
                    let mut wire = BytesMut::new();
                    MultipartEncoder::encode(&message, &mut wire);
                    assert_eq!(wire.len(), MultipartEncoder::encoded_len(&message));
                }
                Ok(None) => break,
                Err(_) => return,
            }
        }
    }
});

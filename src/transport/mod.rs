//! Транспорт pub/sub поверх TCP.
//!
//! Четыре роли сокетов (PUB, SUB, XPUB, XSUB), multipart-кодек и учёт
//! подписок. Подписки передаются по проводу control-фреймами
//! `0x01|topic` / `0x00|topic`, данные фильтруются по префиксу первого
//! фрейма.

pub mod address;
pub mod codec;
mod peer;
pub mod socket;
pub mod subscriptions;

pub use address::Address;
pub use codec::{Multipart, MultipartDecoder, MultipartEncoder};
pub use socket::{CloseMode, Inbound, Socket, SocketEvent, SocketOptions, SocketType};
pub use subscriptions::{
    control_frame, ReleasedTopic, SubscriptionTable, TopicSet, SUBSCRIBE_MARKER,
    UNSUBSCRIBE_MARKER,
};

/// Идентификатор соединения внутри сокета.
pub type PeerId = u64;

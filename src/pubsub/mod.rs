//! Публикация сообщений.
//!
//! - `message`: публикуемое сообщение `[channel, payload...]`.
//! - `publisher`: издатель, копящий сообщения до установки соединения.
//! - `registry`: реестр издателей по адресам.

pub mod message;
pub mod publisher;
pub mod registry;

pub use message::*;
pub use publisher::*;
pub use registry::*;

//! Прокси подписок XPUB/XSUB.
//!
//! - `control`: разбор и переписывание control-фреймов подписки.
//! - `checker`: проверка подписи подписки.
//! - `node`: сам прокси-узел.

pub mod checker;
pub mod control;
pub mod node;

pub use checker::*;
pub use control::*;
pub use node::*;

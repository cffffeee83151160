pub mod auth;
pub mod codec;
pub mod control;
pub mod proxy;
pub mod transport;

// Публичный экспорт всех типов ошибок из вложенных модулей,
// чтобы упростить доступ к ним из внешнего кода.
pub use auth::*;
pub use codec::*;
pub use control::*;
pub use proxy::*;
pub use transport::*;

//! Настройки процесса.

pub mod settings;

pub use settings::*;

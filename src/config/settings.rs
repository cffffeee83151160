use std::{path::Path, sync::Arc, time::Duration};

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use zumq_error::AuthError;

use crate::{
    proxy::{HmacSignatureChecker, ProxyConfig, RewriteMarker, SignatureChecker},
    pubsub::{DrainOrder, PublisherOptions},
    transport::{codec::DEFAULT_MAX_FRAME_SIZE, SocketOptions},
};

/// Адрес издателя по умолчанию.
pub const DEFAULT_FORWARD_ADDRESS: &str = "tcp://127.0.0.1:5000";
/// Адрес прокси для подписчиков по умолчанию.
pub const DEFAULT_SUB_ADDRESS: &str = "tcp://127.0.0.1:5000";
/// Адрес прокси для издателей по умолчанию.
pub const DEFAULT_PUB_ADDRESS: &str = "tcp://127.0.0.1:5001";
/// Префикс переменных окружения: `VMQ_ZEROMQ_SUB_ADDRESS` и т.д.
pub const ENV_PREFIX: &str = "VMQ_ZEROMQ";
/// Переменная окружения с путём к файлу настроек.
pub const CONFIG_PATH_ENV: &str = "ZUMQ_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub forward_address: String,
    pub sub_address: String,
    pub pub_address: String,
    pub drain_order: DrainOrder,
    pub rewrite_marker: RewriteMarker,
    /// Секрет HMAC; без него прокси работает прозрачно
    pub signature_secret: Option<String>,
    pub reconnect_interval_ms: u64,
    pub max_frame_size: usize,
}

impl Settings {
    /// Загружает настройки: значения по умолчанию, затем файл из
    /// `ZUMQ_CONFIG` (если задан), затем переменные `VMQ_ZEROMQ_*`.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).ok();
        Self::load_from(path.as_deref().map(Path::new))
    }

    /// Как [`Settings::load`], но с явным путём к файлу.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            // Добавляем значения по умолчанию
            .set_default("forward_address", DEFAULT_FORWARD_ADDRESS)?
            .set_default("sub_address", DEFAULT_SUB_ADDRESS)?
            .set_default("pub_address", DEFAULT_PUB_ADDRESS)?
            .set_default("drain_order", "fifo")?
            .set_default("rewrite_marker", "mirror-input")?
            .set_default("reconnect_interval_ms", 100_i64)?
            .set_default("max_frame_size", DEFAULT_MAX_FRAME_SIZE as i64)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let cfg = builder
            // Добавляем переменные окружения с префиксом VMQ_ZEROMQ_
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        // Десериализуем конфигурацию в нашу структуру
        cfg.try_deserialize()
    }

    pub fn socket_options(&self) -> SocketOptions {
        SocketOptions {
            reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
            max_frame_size: self.max_frame_size,
            ..Default::default()
        }
    }

    pub fn proxy_config(&self) -> ProxyConfig {
        ProxyConfig {
            sub_address: self.sub_address.clone(),
            pub_address: self.pub_address.clone(),
            rewrite_marker: self.rewrite_marker,
            socket: self.socket_options(),
        }
    }

    pub fn publisher_options(&self) -> PublisherOptions {
        PublisherOptions {
            drain_order: self.drain_order,
            socket: self.socket_options(),
        }
    }

    /// Проверка подписи по секрету, если он задан.
    pub fn signature_checker(&self) -> Result<Option<Arc<dyn SignatureChecker>>, AuthError> {
        match &self.signature_secret {
            Some(secret) if !secret.is_empty() => {
                let checker: Arc<dyn SignatureChecker> = Arc::new(HmacSignatureChecker::new(secret)?);
                Ok(Some(checker))
            }
            _ => Ok(None),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            forward_address: DEFAULT_FORWARD_ADDRESS.to_string(),
            sub_address: DEFAULT_SUB_ADDRESS.to_string(),
            pub_address: DEFAULT_PUB_ADDRESS.to_string(),
            drain_order: DrainOrder::default(),
            rewrite_marker: RewriteMarker::default(),
            signature_secret: None,
            reconnect_interval_ms: 100,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

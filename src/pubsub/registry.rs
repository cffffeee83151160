use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};
use tracing::debug;
use zumq_error::TransportError;

use super::{BufferingPublisher, PublisherOptions};
use crate::{
    shutdown::ShutdownToken,
    transport::{Address, CloseMode},
};

/// Реестр издателей, по одному на адрес.
///
/// Принадлежит приложению: сколько живёт реестр и сколько их создаётся,
/// решает тот, кто его собирает.
pub struct PublisherRegistry {
    publishers: DashMap<Address, Arc<BufferingPublisher>>,
    default_address: String,
    options: PublisherOptions,
    shutdown: ShutdownToken,
}

impl PublisherRegistry {
    /// Создаёт пустой реестр.
    ///
    /// `default_address` используется, когда адрес не указан явно.
    pub fn new(
        default_address: impl Into<String>,
        options: PublisherOptions,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            publishers: DashMap::new(),
            default_address: default_address.into(),
            options,
            shutdown,
        }
    }

    /// Возвращает издателя для адреса, создавая его при первом обращении.
    ///
    /// Без адреса используется адрес по умолчанию. Закрытый издатель
    /// заменяется новым. После сигнала остановки новые издатели не
    /// создаются.
    pub fn get_or_create(
        &self,
        address: Option<&str>,
    ) -> Result<Arc<BufferingPublisher>, TransportError> {
        let address = Address::parse(address.unwrap_or(&self.default_address))?;

        match self.publishers.entry(address) {
            Entry::Occupied(entry) if !entry.get().is_closed() => Ok(Arc::clone(entry.get())),
            Entry::Occupied(mut entry) => {
                let publisher = self.create(entry.key())?;
                debug!(address = %entry.key(), "Closed publisher replaced");
                entry.insert(Arc::clone(&publisher));
                Ok(publisher)
            }
            Entry::Vacant(entry) => {
                let publisher = self.create(entry.key())?;
                debug!(address = %entry.key(), "Publisher registered");
                entry.insert(Arc::clone(&publisher));
                Ok(publisher)
            }
        }
    }

    fn create(
        &self,
        address: &Address,
    ) -> Result<Arc<BufferingPublisher>, TransportError> {
        if self.shutdown.is_triggered() {
            return Err(TransportError::Closed);
        }
        Ok(Arc::new(BufferingPublisher::connect(
            &address.to_string(),
            self.options.clone(),
            self.shutdown.clone(),
        )?))
    }

    /// Издатель для адреса по умолчанию.
    pub fn default_publisher(&self) -> Result<Arc<BufferingPublisher>, TransportError> {
        self.get_or_create(None)
    }

    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }

    /// Закрывает и убирает всех издателей.
    pub async fn close_all(
        &self,
        mode: CloseMode,
    ) {
        let publishers: Vec<_> = self
            .publishers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.publishers.clear();

        for publisher in publishers {
            publisher.close(mode).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PublisherRegistry {
        PublisherRegistry::new(
            "tcp://127.0.0.1:1",
            PublisherOptions::default(),
            ShutdownToken::never(),
        )
    }

    /// Тест проверяет, что повторное обращение возвращает того же издателя.
    #[tokio::test]
    async fn test_same_address_same_publisher() {
        let registry = registry();
        let a = registry.default_publisher().unwrap();
        let b = registry.get_or_create(Some("tcp://127.0.0.1:1")).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
        registry.close_all(CloseMode::Immediate).await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_addresses_get_distinct_publishers() {
        let registry = registry();
        let a = registry.get_or_create(Some("tcp://127.0.0.1:1")).unwrap();
        let b = registry.get_or_create(Some("tcp://127.0.0.1:2")).unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(b.address().port(), 2);
        registry.close_all(CloseMode::Immediate).await;
    }

    /// Тест проверяет, что закрытый издатель заменяется новым.
    #[tokio::test]
    async fn test_closed_publisher_is_replaced() {
        let registry = registry();
        let first = registry.default_publisher().unwrap();
        first.close(CloseMode::Immediate).await;

        let second = registry.default_publisher().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!second.is_closed());
        assert_eq!(registry.len(), 1);
        registry.close_all(CloseMode::Immediate).await;
    }

    /// Тест проверяет, что после сигнала остановки реестр не выдаёт
    /// закрытых издателей и не создаёт новых.
    #[tokio::test]
    async fn test_no_publishers_after_shutdown() {
        let controller = crate::shutdown::ShutdownController::new();
        let registry = PublisherRegistry::new(
            "tcp://127.0.0.1:1",
            PublisherOptions::default(),
            controller.token(),
        );
        let publisher = registry.default_publisher().unwrap();

        controller.trigger();
        publisher.close(CloseMode::Immediate).await;
        assert!(matches!(
            registry.default_publisher(),
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_bad_address_is_not_registered() {
        let registry = registry();
        assert!(registry.get_or_create(Some("nonsense")).is_err());
        assert!(registry.is_empty());
    }
}

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tracing::{debug, info, trace, warn};
use zumq_error::TransportError;

use super::Message;
use crate::{
    shutdown::{Closeable, ShutdownToken},
    transport::{Address, CloseMode, Multipart, Socket, SocketEvent, SocketOptions, SocketType},
};

/// Порядок отправки накопленных сообщений после подключения.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrainOrder {
    /// В порядке вызовов `send`
    #[default]
    Fifo,
    /// От последнего к первому
    Lifo,
}

/// Настройки [`BufferingPublisher`].
#[derive(Debug, Clone, Default)]
pub struct PublisherOptions {
    pub drain_order: DrainOrder,
    pub socket: SocketOptions,
}

/// Снимок счётчиков издателя.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PublisherStats {
    /// Сообщений передано сокету
    pub sent: u64,
    /// Сообщений поставлено в очередь до подключения
    pub buffered: u64,
    /// Сообщений, которые сокет не принял
    pub failed: u64,
}

/// Издатель, принимающий сообщения до установки соединения.
///
/// Пока PUB-сокет не подключился, сообщения копятся в очереди. При первом
/// событии подключения очередь один раз отправляется целиком и больше не
/// используется.
///
/// Если подключение так и не произойдёт, очередь растёт без ограничений.
pub struct BufferingPublisher {
    address: Address,
    socket: Socket,
    shared: Arc<Shared>,
    monitor: JoinHandle<()>,
}

struct Shared {
    state: Mutex<PublisherState>,
    drain_order: DrainOrder,
    sent: AtomicU64,
    buffered: AtomicU64,
    failed: AtomicU64,
}

#[derive(Default)]
struct PublisherState {
    connected: bool,
    queue: VecDeque<Multipart>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl BufferingPublisher {
    /// Создаёт PUB-сокет и начинает подключение к `address`.
    ///
    /// Возвращается сразу, не дожидаясь соединения.
    pub fn connect(
        address: &str,
        options: PublisherOptions,
        shutdown: ShutdownToken,
    ) -> Result<Self, TransportError> {
        let address = Address::parse(address)?;
        let socket = Socket::with_options(SocketType::Pub, options.socket);
        let shared = Arc::new(Shared {
            state: Mutex::new(PublisherState::default()),
            drain_order: options.drain_order,
            sent: AtomicU64::new(0),
            buffered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });

        // Подписка на события до connect, чтобы не пропустить подключение.
        let events = socket.monitor();
        socket.connect(&address.to_string())?;

        let monitor = tokio::spawn(monitor_loop(
            socket.clone(),
            Arc::clone(&shared),
            events,
            shutdown,
        ));

        debug!(%address, order = ?options.drain_order, "Buffering publisher created");
        Ok(Self {
            address,
            socket,
            shared,
            monitor,
        })
    }

    /// Публикует сообщение.
    ///
    /// До подключения сообщение ставится в очередь. После подключения
    /// передаётся сокету; ошибки отправки логируются и учитываются в
    /// статистике, но не возвращаются. После закрытия сообщение
    /// отбрасывается и учитывается как `failed`.
    pub fn send(
        &self,
        message: Message,
    ) {
        let frames = message.into_multipart();
        {
            let mut state = self.shared.state.lock();
            // Проверка под блокировкой: `close` забирает очередь под ней же.
            if self.socket.is_closed() {
                self.shared.failed.fetch_add(1, Ordering::Relaxed);
                warn!(address = %self.address, "Publisher is closed, message dropped");
                return;
            }
            if !state.connected {
                state.queue.push_back(frames);
                self.shared.buffered.fetch_add(1, Ordering::Relaxed);
                trace!(queued = state.queue.len(), "Not connected yet, message queued");
                return;
            }
        }
        self.shared.transmit(&self.socket, frames);
    }

    /// Публикует `[channel, parts...]`.
    pub fn send_parts<I, P>(
        &self,
        channel: impl Into<Bytes>,
        parts: I,
    ) where
        I: IntoIterator<Item = P>,
        P: Into<Bytes>,
    {
        self.send(Message::new(
            channel,
            parts.into_iter().map(Into::into).collect(),
        ));
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.lock().connected
    }

    pub fn is_closed(&self) -> bool {
        self.socket.is_closed()
    }

    /// Количество сообщений в очереди.
    pub fn queued(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            sent: self.shared.sent.load(Ordering::Relaxed),
            buffered: self.shared.buffered.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
        }
    }

    /// Закрывает сокет. Неотправленная очередь теряется.
    pub async fn close(
        &self,
        mode: CloseMode,
    ) -> bool {
        let closed = self.socket.close(mode).await;
        if closed {
            let dropped = std::mem::take(&mut self.shared.state.lock().queue).len();
            if dropped > 0 {
                warn!(address = %self.address, dropped, "Publisher closed with queued messages");
            }
        }
        closed
    }
}

impl Shared {
    fn transmit(
        &self,
        socket: &Socket,
        frames: Multipart,
    ) {
        match socket.send(frames) {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Failed to publish message");
            }
        }
    }

    /// Переводит издателя в состояние «подключён» и отправляет очередь.
    ///
    /// Переключение и отправка идут под одной блокировкой: конкурентный
    /// `send` не может обогнать сообщения из очереди.
    fn flush(
        &self,
        socket: &Socket,
    ) {
        let mut state = self.state.lock();
        if state.connected {
            return;
        }
        state.connected = true;

        let queue = std::mem::take(&mut state.queue);
        let count = queue.len();
        match self.drain_order {
            DrainOrder::Fifo => queue.into_iter().for_each(|m| self.transmit(socket, m)),
            DrainOrder::Lifo => queue.into_iter().rev().for_each(|m| self.transmit(socket, m)),
        }
        info!(count, order = ?self.drain_order, "Outbound queue flushed");
    }
}

async fn monitor_loop(
    socket: Socket,
    shared: Arc<Shared>,
    mut events: tokio::sync::broadcast::Receiver<SocketEvent>,
    shutdown: ShutdownToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => {
                socket.close(CloseMode::Immediate).await;
                return;
            }
            event = events.recv() => event,
        };

        match event {
            Ok(SocketEvent::Connected { peer, remote }) => {
                info!(peer, %remote, "Publisher connected");
                shared.flush(&socket);
            }
            Ok(SocketEvent::ConnectRetried { address, reason }) => {
                debug!(%address, %reason, "Publisher connect attempt failed, retrying");
            }
            Ok(SocketEvent::Disconnected { peer }) => {
                warn!(peer, "Publisher lost connection");
            }
            Ok(SocketEvent::Closed) | Err(RecvError::Closed) => return,
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                // Событие подключения могло потеряться.
                warn!(skipped, "Publisher monitor lagged");
                if socket.peer_count() > 0 {
                    shared.flush(&socket);
                }
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Drop for BufferingPublisher {
    fn drop(&mut self) {
        self.monitor.abort();
    }
}

impl std::fmt::Debug for BufferingPublisher {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("BufferingPublisher")
            .field("address", &self.address)
            .field("connected", &self.is_connected())
            .field("queued", &self.queued())
            .finish()
    }
}

#[async_trait]
impl Closeable for BufferingPublisher {
    async fn close(
        &self,
        mode: CloseMode,
    ) -> bool {
        BufferingPublisher::close(self, mode).await
    }

    fn describe(&self) -> String {
        format!("publisher {}", self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownController;

    /// Тест проверяет, что до подключения сообщения только копятся.
    #[tokio::test]
    async fn test_send_before_connect_is_queued() {
        // Порт 1 заведомо закрыт: подключение не произойдёт.
        let publisher = BufferingPublisher::connect(
            "tcp://127.0.0.1:1",
            PublisherOptions::default(),
            ShutdownToken::never(),
        )
        .unwrap();

        publisher.send(Message::single("a", "1"));
        publisher.send_parts("b", ["2", "3"]);

        assert!(!publisher.is_connected());
        assert_eq!(publisher.queued(), 2);
        assert_eq!(
            publisher.stats(),
            PublisherStats {
                sent: 0,
                buffered: 2,
                failed: 0
            }
        );
        assert!(publisher.close(CloseMode::Immediate).await);
        assert_eq!(publisher.queued(), 0);
    }

    /// Тест проверяет, что закрытый, так и не подключившийся издатель
    /// отбрасывает сообщения вместо того, чтобы копить их.
    #[tokio::test]
    async fn test_send_after_close_is_dropped() {
        let publisher = BufferingPublisher::connect(
            "tcp://127.0.0.1:1",
            PublisherOptions::default(),
            ShutdownToken::never(),
        )
        .unwrap();
        publisher.send(Message::single("a", "queued"));
        assert!(publisher.close(CloseMode::Immediate).await);

        for i in 0..1000 {
            publisher.send(Message::single("a", i.to_string()));
        }

        assert!(publisher.is_closed());
        assert_eq!(publisher.queued(), 0);
        assert_eq!(
            publisher.stats(),
            PublisherStats {
                sent: 0,
                buffered: 1,
                failed: 1000
            }
        );
    }

    /// Тест проверяет то же после срабатывания токена остановки.
    #[tokio::test]
    async fn test_send_after_shutdown_is_dropped() {
        let controller = ShutdownController::new();
        let publisher = BufferingPublisher::connect(
            "tcp://127.0.0.1:1",
            PublisherOptions::default(),
            controller.token(),
        )
        .unwrap();

        controller.trigger();
        for _ in 0..200 {
            if publisher.is_closed() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(publisher.is_closed());

        publisher.send(Message::single("a", "late"));
        assert_eq!(publisher.queued(), 0);
        assert_eq!(publisher.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_invalid_address_is_rejected() {
        let err = BufferingPublisher::connect(
            "udp://127.0.0.1:5000",
            PublisherOptions::default(),
            ShutdownToken::never(),
        )
        .unwrap_err();
        assert!(matches!(err, TransportError::InvalidAddress { .. }));
    }

    #[test]
    fn test_drain_order_deserializes_lowercase() {
        let order: DrainOrder = serde_json::from_str("\"lifo\"").unwrap();
        assert_eq!(order, DrainOrder::Lifo);
        assert_eq!(DrainOrder::default(), DrainOrder::Fifo);
    }
}

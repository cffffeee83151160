use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use zumq_error::{ErrorExt, LogLevel, ProxyError, TransportError};

use super::{
    checker::SignatureChecker,
    control::{describe_frame, rewrite, RewriteMarker, SubscriptionKind},
    SubscriptionEnvelope, SubscriptionFrame,
};
use crate::{
    config::{DEFAULT_PUB_ADDRESS, DEFAULT_SUB_ADDRESS},
    shutdown::{Closeable, ShutdownToken},
    transport::{Address, CloseMode, Inbound, Multipart, PeerId, Socket, SocketOptions, SocketType},
};

/// Настройки прокси-узла.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Адрес для подписчиков (XPUB)
    pub sub_address: String,
    /// Адрес для издателей (XSUB)
    pub pub_address: String,
    pub rewrite_marker: RewriteMarker,
    /// Базовые настройки обоих сокетов
    pub socket: SocketOptions,
}

/// Снимок счётчиков прокси.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProxyStats {
    /// Сообщений данных переслано подписчикам
    pub forwarded_messages: u64,
    /// Подписок переслано издателям
    pub forwarded_subscriptions: u64,
    /// Подписок отклонено проверкой подписи
    pub rejected_subscriptions: u64,
    /// Нераспознанных control-фреймов
    pub malformed_subscriptions: u64,
}

/// Прокси между издателями (XSUB) и подписчиками (XPUB).
///
/// Данные от издателей пересылаются подписчикам без изменений. Подписки
/// от подписчиков пересылаются издателям: как есть, если проверка подписи
/// не задана, или после проверки и переписывания, если задана.
pub struct ProxyNode {
    handler: Arc<ControlHandler>,
    sub_address: Address,
    pub_address: Address,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct ControlHandler {
    upstream: Socket,
    downstream: Socket,
    checker: Option<Arc<dyn SignatureChecker>>,
    rewrite_marker: RewriteMarker,
    counters: Counters,
}

#[derive(Default)]
struct Counters {
    forwarded_messages: AtomicU64,
    forwarded_subscriptions: AtomicU64,
    rejected_subscriptions: AtomicU64,
    malformed_subscriptions: AtomicU64,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ProxyConfig {
    pub fn new(
        sub_address: impl Into<String>,
        pub_address: impl Into<String>,
    ) -> Self {
        Self {
            sub_address: sub_address.into(),
            pub_address: pub_address.into(),
            ..Default::default()
        }
    }

    pub fn with_rewrite_marker(
        mut self,
        marker: RewriteMarker,
    ) -> Self {
        self.rewrite_marker = marker;
        self
    }
}

impl ProxyNode {
    /// Привязывает оба сокета и запускает пересылку.
    ///
    /// Сначала привязывается сокет издателей, затем сокет подписчиков. Если
    /// вторая привязка не удалась, первый сокет закрывается: наполовину
    /// привязанный узел не остаётся.
    ///
    /// С `checker` подписки проходят проверку подписи; без него узел
    /// работает прозрачно.
    pub async fn bind(
        config: ProxyConfig,
        checker: Option<Arc<dyn SignatureChecker>>,
        shutdown: ShutdownToken,
    ) -> Result<Self, ProxyError> {
        let upstream = Socket::with_options(SocketType::XSub, config.socket.clone());
        let downstream = Socket::with_options(
            SocketType::XPub,
            SocketOptions {
                xpub_verbose: true,
                // Конверт с подписью не должен становиться фильтром.
                xpub_manual: checker.is_some(),
                ..config.socket.clone()
            },
        );

        let pub_address = match upstream.bind(&config.pub_address).await {
            Ok(address) => address,
            Err(source) => {
                upstream.close(CloseMode::Immediate).await;
                return Err(bind_error("upstream", &config.pub_address, source));
            }
        };
        let sub_address = match downstream.bind(&config.sub_address).await {
            Ok(address) => address,
            Err(source) => {
                upstream.close(CloseMode::Immediate).await;
                downstream.close(CloseMode::Immediate).await;
                return Err(bind_error("downstream", &config.sub_address, source));
            }
        };

        info!(
            subs = %sub_address,
            pubs = %pub_address,
            authorized = checker.is_some(),
            marker = ?config.rewrite_marker,
            "Starting proxy"
        );

        let handler = Arc::new(ControlHandler {
            upstream,
            downstream,
            checker,
            rewrite_marker: config.rewrite_marker,
            counters: Counters::default(),
        });
        let tasks = vec![
            tokio::spawn(data_loop(Arc::clone(&handler), shutdown.clone())),
            tokio::spawn(control_loop(Arc::clone(&handler), shutdown)),
        ];

        Ok(Self {
            handler,
            sub_address,
            pub_address,
            tasks: Mutex::new(tasks),
        })
    }

    /// Фактический адрес для подписчиков.
    pub fn sub_address(&self) -> &Address {
        &self.sub_address
    }

    /// Фактический адрес для издателей.
    pub fn pub_address(&self) -> &Address {
        &self.pub_address
    }

    pub fn is_authorized(&self) -> bool {
        self.handler.checker.is_some()
    }

    pub fn stats(&self) -> ProxyStats {
        let c = &self.handler.counters;
        ProxyStats {
            forwarded_messages: c.forwarded_messages.load(Ordering::Relaxed),
            forwarded_subscriptions: c.forwarded_subscriptions.load(Ordering::Relaxed),
            rejected_subscriptions: c.rejected_subscriptions.load(Ordering::Relaxed),
            malformed_subscriptions: c.malformed_subscriptions.load(Ordering::Relaxed),
        }
    }

    /// Ждёт остановки узла: закрытия сокетов или сигнала остановки.
    pub async fn run(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Закрывает оба сокета. Возвращает `true`, если закрыт хотя бы один.
    pub async fn close(
        &self,
        mode: CloseMode,
    ) -> bool {
        self.handler.close(mode).await
    }
}

impl ControlHandler {
    async fn close(
        &self,
        mode: CloseMode,
    ) -> bool {
        let upstream = self.upstream.close(mode).await;
        let downstream = self.downstream.close(mode).await;
        upstream || downstream
    }

    /// Обрабатывает сообщение от подписчика.
    fn handle(
        self: &Arc<Self>,
        peer: PeerId,
        message: Multipart,
    ) {
        let Some(first) = message.first() else {
            return;
        };
        let frame = match SubscriptionFrame::parse(first) {
            Ok(frame) => frame,
            Err(e) => {
                self.counters
                    .malformed_subscriptions
                    .fetch_add(1, Ordering::Relaxed);
                log_dropped(peer, &e, "", "Empty control frame dropped");
                return;
            }
        };
        debug!(peer, kind = %frame.kind, "Subscription frame received");

        let Some(checker) = self.checker.clone() else {
            trace!(peer, "No signature checker, forwarding as is");
            self.forward(message);
            return;
        };

        let envelope = match frame.envelope() {
            Ok(envelope) => envelope,
            Err(e) => {
                self.counters
                    .malformed_subscriptions
                    .fetch_add(1, Ordering::Relaxed);
                let (raw, _) = describe_frame(&frame.payload);
                log_dropped(peer, &e, &raw, "Malformed subscription dropped");
                return;
            }
        };

        let handler = Arc::clone(self);
        let original = first.clone();
        tokio::spawn(async move {
            handler
                .authorize(checker, peer, frame.kind, envelope, original)
                .await;
        });
    }

    async fn authorize(
        &self,
        checker: Arc<dyn SignatureChecker>,
        peer: PeerId,
        kind: SubscriptionKind,
        envelope: SubscriptionEnvelope,
        original: Bytes,
    ) {
        let channel = envelope.channel_name.as_str();
        if let Err(e) = checker.check(channel, &envelope.signature).await {
            self.counters
                .rejected_subscriptions
                .fetch_add(1, Ordering::Relaxed);
            log_dropped(peer, &e, channel, "Subscription rejected");
            return;
        }

        let rewritten = match rewrite(kind, channel, self.rewrite_marker) {
            Ok(frame) => frame,
            Err(e) => {
                self.counters
                    .malformed_subscriptions
                    .fetch_add(1, Ordering::Relaxed);
                log_dropped(peer, &e, channel, "Subscription cannot be rewritten");
                return;
            }
        };

        let filter = match kind {
            SubscriptionKind::Unsubscribe => self.downstream.unsubscribe_peer(peer, channel),
            _ => self.downstream.subscribe_peer(peer, Bytes::copy_from_slice(channel.as_bytes())),
        };
        if let Err(e) = filter {
            debug!(peer, channel, error = %e, "Filter not updated");
        }

        let (raw, hex) = describe_frame(&rewritten);
        let (_, original_hex) = describe_frame(&original);
        info!(peer, %kind, channel, original = %original_hex, hex = %hex, raw = %raw, "Sending subscription");
        self.forward(vec![rewritten]);
    }

    fn forward(
        &self,
        message: Multipart,
    ) {
        match self.upstream.send(message) {
            Ok(()) => {
                self.counters
                    .forwarded_subscriptions
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!(error = %e, "Failed to forward subscription"),
        }
    }
}

/// Логирует отброшенную подписку.
///
/// Уровень берётся из статуса ошибки, теги ошибки попадают в поле `tags`.
fn log_dropped<E: ErrorExt>(
    peer: PeerId,
    e: &E,
    context: &str,
    message: &str,
) {
    let status = e.status_code();
    let tags = e.metrics_tags();
    let details = e.log_message();
    match status.log_level() {
        LogLevel::Trace => {
            trace!(peer, context, %status, ?tags, %details, error = %e, "{message}")
        }
        LogLevel::Debug => {
            debug!(peer, context, %status, ?tags, %details, error = %e, "{message}")
        }
        LogLevel::Info => info!(peer, context, %status, ?tags, %details, error = %e, "{message}"),
        LogLevel::Warn => warn!(peer, context, %status, ?tags, %details, error = %e, "{message}"),
        LogLevel::Error => {
            error!(peer, context, %status, ?tags, %details, error = %e, "{message}")
        }
    }
}

fn bind_error(
    role: &'static str,
    address: &str,
    source: TransportError,
) -> ProxyError {
    warn!(role, address, error = %source, "Caught error on binding");
    ProxyError::Bind {
        role,
        address: address.to_string(),
        source,
    }
}

/// Пересылает данные от издателей подписчикам.
async fn data_loop(
    handler: Arc<ControlHandler>,
    shutdown: ShutdownToken,
) {
    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => break,
            message = handler.upstream.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        trace!(frames = message.len(), "Forwarding published message");
        match handler.downstream.send(message) {
            Ok(()) => {
                handler
                    .counters
                    .forwarded_messages
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(TransportError::Closed) => break,
            Err(e) => warn!(error = %e, "Failed to forward message"),
        }
    }
    handler.close(CloseMode::Immediate).await;
    debug!("Data loop stopped");
}

/// Обрабатывает подписки от подписчиков.
async fn control_loop(
    handler: Arc<ControlHandler>,
    shutdown: ShutdownToken,
) {
    loop {
        let Inbound { peer, message } = tokio::select! {
            _ = shutdown.cancelled() => break,
            inbound = handler.downstream.recv_from() => match inbound {
                Some(inbound) => inbound,
                None => break,
            },
        };
        handler.handle(peer, message);
    }
    handler.close(CloseMode::Immediate).await;
    debug!("Control loop stopped");
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            sub_address: DEFAULT_SUB_ADDRESS.to_string(),
            pub_address: DEFAULT_PUB_ADDRESS.to_string(),
            rewrite_marker: RewriteMarker::default(),
            socket: SocketOptions::default(),
        }
    }
}

impl Drop for ProxyNode {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

#[async_trait]
impl Closeable for ProxyNode {
    async fn close(
        &self,
        mode: CloseMode,
    ) -> bool {
        ProxyNode::close(self, mode).await
    }

    fn describe(&self) -> String {
        format!("proxy [subs:{}] [pubs:{}]", self.sub_address, self.pub_address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> ProxyConfig {
        ProxyConfig::new("tcp://127.0.0.1:0", "tcp://127.0.0.1:0")
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(
            &mut self,
            buf: &[u8],
        ) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Тест проверяет, что уровень записи об отброшенной подписке зависит
    /// от статуса ошибки, а теги попадают в запись.
    #[test]
    fn test_log_dropped_uses_status_level_and_tags() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::TRACE)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let rejected = zumq_error::AuthError::InvalidSignature {
                channel: "orders".into(),
            };
            log_dropped(7, &rejected, "orders", "Subscription rejected");
            log_dropped(
                7,
                &zumq_error::ControlError::UnknownMarker(5),
                "orders",
                "Subscription cannot be rewritten",
            );
        });

        let out = String::from_utf8_lossy(&captured.0.lock()).into_owned();
        let line = |needle: &str| {
            out.lines()
                .find(|l| l.contains(needle))
                .unwrap_or_default()
                .to_string()
        };
        let rejected = line("Subscription rejected");
        assert!(rejected.contains("INFO"), "{rejected}");
        assert!(rejected.contains("\"channel\", \"orders\""), "{rejected}");
        assert!(rejected.contains("peer=7"), "{rejected}");
        assert!(line("cannot be rewritten").contains("WARN"), "{out}");
    }

    #[test]
    fn test_default_config_addresses() {
        let config = ProxyConfig::default();
        assert_eq!(config.sub_address, "tcp://127.0.0.1:5000");
        assert_eq!(config.pub_address, "tcp://127.0.0.1:5001");
        assert_eq!(config.rewrite_marker, RewriteMarker::MirrorInput);
    }

    /// Тест проверяет, что узел привязывает оба сокета на разные порты.
    #[tokio::test]
    async fn test_bind_reports_addresses() {
        let node = ProxyNode::bind(local(), None, ShutdownToken::never())
            .await
            .unwrap();

        assert_ne!(node.sub_address().port(), 0);
        assert_ne!(node.pub_address().port(), 0);
        assert_ne!(node.sub_address(), node.pub_address());
        assert!(!node.is_authorized());
        assert_eq!(node.stats(), ProxyStats::default());

        assert!(node.close(CloseMode::Immediate).await);
        assert!(!node.close(CloseMode::Immediate).await);
        node.run().await;
    }

    #[tokio::test]
    async fn test_invalid_address_is_a_bind_error() {
        let config = ProxyConfig::new("tcp://127.0.0.1:0", "ipc:///tmp/x");
        let err = ProxyNode::bind(config, None, ShutdownToken::never())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, ProxyError::Bind { role: "upstream", .. }));
    }

    /// Тест проверяет, что сигнал остановки завершает узел.
    #[tokio::test]
    async fn test_shutdown_stops_node() {
        let controller = crate::shutdown::ShutdownController::new();
        let node = ProxyNode::bind(local(), None, controller.token())
            .await
            .unwrap();

        controller.trigger();
        tokio::time::timeout(std::time::Duration::from_secs(5), node.run())
            .await
            .unwrap();
        assert!(!node.close(CloseMode::Immediate).await);
    }
}

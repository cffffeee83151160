use std::{
    collections::HashMap,
    fmt,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{broadcast, mpsc, oneshot, watch, Mutex as AsyncMutex},
    task::JoinHandle,
    time::{sleep, timeout_at, Instant},
};
use tracing::{debug, info, trace, warn};
use zumq_error::TransportError;

use super::{
    codec::{Multipart, MultipartEncoder, DEFAULT_MAX_FRAME_SIZE},
    peer::{self, PeerHandle},
    subscriptions::{
        control_frame, SubscriptionTable, TopicSet, SUBSCRIBE_MARKER, UNSUBSCRIBE_MARKER,
    },
    Address, PeerId,
};

/// Ёмкость канала событий мониторинга.
const EVENT_CAPACITY: usize = 64;
/// Пауза после неудачного `accept`.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Роль сокета в схеме pub/sub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketType {
    /// Издатель: рассылает данные всем пирам
    Pub,
    /// Подписчик: отправляет подписки, получает данные
    Sub,
    /// Сторона брокера к подписчикам: принимает подписки, фильтрует данные
    XPub,
    /// Сторона брокера к издателям: принимает данные, пересылает подписки
    XSub,
}

impl SocketType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pub => "PUB",
            Self::Sub => "SUB",
            Self::XPub => "XPUB",
            Self::XSub => "XSUB",
        }
    }
}

impl fmt::Display for SocketType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Настройки сокета.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// XPUB: сообщать о каждой подписке/отписке, а не только о первой
    /// подписке на топик и уходе последнего подписчика
    pub xpub_verbose: bool,
    /// XPUB: не регистрировать фильтры из control-фреймов автоматически,
    /// это делает приложение через `subscribe_peer`
    pub xpub_manual: bool,
    /// Интервал между попытками подключения
    pub reconnect_interval: Duration,
    /// Максимальный размер входящего фрейма
    pub max_frame_size: usize,
    /// Ёмкость очереди входящих сообщений
    pub inbound_capacity: usize,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            xpub_verbose: false,
            xpub_manual: false,
            reconnect_interval: Duration::from_millis(100),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            inbound_capacity: 1024,
        }
    }
}

/// События мониторинга сокета.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// Сокет начал слушать адрес
    Listening(Address),
    /// Принято входящее соединение
    Accepted { peer: PeerId, remote: SocketAddr },
    /// Исходящее соединение установлено
    Connected { peer: PeerId, remote: SocketAddr },
    /// Попытка подключения не удалась, будет повтор
    ConnectRetried { address: Address, reason: String },
    /// Пир отключился
    Disconnected { peer: PeerId },
    /// Сокет закрыт
    Closed,
}

/// Способ закрытия сокета.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CloseMode {
    /// Закрыть сразу, неотправленные сообщения теряются
    #[default]
    Immediate,
    /// Дать писателям дописать очереди, но не дольше указанного времени
    Graceful(Duration),
}

/// Входящее сообщение вместе с пиром-отправителем.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub peer: PeerId,
    pub message: Multipart,
}

/// Сокет поверх TCP.
///
/// Дешёвый в клонировании хэндл. Клоны используются только задачами
/// компонента-владельца; сам сокет между компонентами не разделяется.
#[derive(Clone)]
pub struct Socket {
    inner: Arc<SocketInner>,
}

pub(super) struct SocketInner {
    kind: SocketType,
    options: SocketOptions,
    state: Mutex<SocketState>,
    inbound_tx: mpsc::Sender<Inbound>,
    inbound_rx: AsyncMutex<mpsc::Receiver<Inbound>>,
    events: broadcast::Sender<SocketEvent>,
    closed: watch::Sender<bool>,
    next_peer: AtomicU64,
}

#[derive(Default)]
struct SocketState {
    peers: HashMap<PeerId, PeerHandle>,
    endpoints: Vec<Address>,
    tasks: Vec<JoinHandle<()>>,
    /// XPUB: фильтры подписчиков
    filters: SubscriptionTable,
    /// SUB: локальные подписки; XSUB: подписки, отправленные издателям
    topics: TopicSet,
    /// SUB: произвольные control-фреймы из `send_control`
    controls: Vec<Bytes>,
    closed: bool,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Socket {
    /// Создаёт сокет с настройками по умолчанию.
    pub fn new(kind: SocketType) -> Self {
        Self::with_options(kind, SocketOptions::default())
    }

    pub fn with_options(
        kind: SocketType,
        options: SocketOptions,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(options.inbound_capacity.max(1));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (closed, _) = watch::channel(false);

        Self {
            inner: Arc::new(SocketInner {
                kind,
                options,
                state: Mutex::new(SocketState::default()),
                inbound_tx,
                inbound_rx: AsyncMutex::new(inbound_rx),
                events,
                closed,
                next_peer: AtomicU64::new(0),
            }),
        }
    }

    pub fn kind(&self) -> SocketType {
        self.inner.kind
    }

    pub fn options(&self) -> &SocketOptions {
        &self.inner.options
    }

    /// Подписка на события мониторинга.
    ///
    /// Получатель видит только события, произошедшие после вызова, поэтому
    /// `monitor()` следует вызывать до `connect`/`bind`.
    pub fn monitor(&self) -> broadcast::Receiver<SocketEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Фактические адреса, на которых слушает сокет.
    pub fn local_addresses(&self) -> Vec<Address> {
        self.inner.state.lock().endpoints.clone()
    }

    /// Количество подключённых пиров.
    pub fn peer_count(&self) -> usize {
        self.inner.state.lock().peers.len()
    }

    /// Начинает слушать адрес.
    ///
    /// Порт `0` разрешён: реальный адрес возвращается и доступен через
    /// [`Socket::local_addresses`].
    pub async fn bind(
        &self,
        address: &str,
    ) -> Result<Address, TransportError> {
        let requested = Address::parse(address)?;
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let listener = TcpListener::bind(requested.socket_target())
            .await
            .map_err(|source| TransportError::Bind {
                address: requested.to_string(),
                source,
            })?;
        let local = Address::from(listener.local_addr()?);

        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(TransportError::Closed);
            }
            let task = tokio::spawn(accept_loop(
                Arc::downgrade(&self.inner),
                listener,
                self.inner.closed.subscribe(),
            ));
            state.tasks.push(task);
            state.endpoints.push(local.clone());
        }

        info!(socket = %self.inner.kind, address = %local, "Socket bound");
        self.inner.emit(SocketEvent::Listening(local.clone()));
        Ok(local)
    }

    /// Запускает асинхронное подключение к адресу.
    ///
    /// Возвращается сразу. Об установке соединения сообщает событие
    /// [`SocketEvent::Connected`]; при неудаче попытки повторяются с
    /// интервалом `reconnect_interval`, в том числе после разрыва.
    pub fn connect(
        &self,
        address: &str,
    ) -> Result<(), TransportError> {
        let address = Address::parse(address)?;

        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        debug!(socket = %self.inner.kind, %address, "Connecting");
        let task = tokio::spawn(connect_loop(
            Arc::downgrade(&self.inner),
            address,
            self.inner.closed.subscribe(),
            self.inner.options.reconnect_interval,
        ));
        state.tasks.push(task);
        Ok(())
    }

    /// Отправляет сообщение в соответствии с ролью сокета.
    ///
    /// - PUB, SUB: всем пирам; без пиров `NotConnected`
    /// - XPUB: пирам, чей фильтр является префиксом первого фрейма
    /// - XSUB: всем пирам; подписки запоминаются и повторяются новым
    ///   издателям
    ///
    /// Запись в сеть выполняется фоновыми задачами, поэтому метод не
    /// ждёт и не блокирует.
    pub fn send(
        &self,
        message: Multipart,
    ) -> Result<(), TransportError> {
        MultipartEncoder::check(&message, self.inner.options.max_frame_size)?;

        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }

        match self.inner.kind {
            SocketType::XPub => {
                let topic: &[u8] = message.first().map(|f| f.as_ref()).unwrap_or_default();
                let mut delivered = 0usize;
                for (id, peer) in state.peers.iter() {
                    if state.filters.matches(*id, topic) && peer.tx.send(message.clone()).is_ok() {
                        delivered += 1;
                    }
                }
                trace!(delivered, "XPUB fan-out");
                Ok(())
            }
            SocketType::XSub => {
                if let [frame] = message.as_slice() {
                    match frame.first() {
                        Some(&SUBSCRIBE_MARKER) => {
                            state.topics.add(frame.slice(1..));
                        }
                        Some(&UNSUBSCRIBE_MARKER) => {
                            state.topics.remove(&frame[1..]);
                        }
                        _ => {}
                    }
                }
                broadcast_to_peers(&state.peers, &message);
                Ok(())
            }
            SocketType::Pub | SocketType::Sub => {
                if state.peers.is_empty() {
                    return Err(TransportError::NotConnected);
                }
                broadcast_to_peers(&state.peers, &message);
                Ok(())
            }
        }
    }

    /// SUB: подписка на топик-префикс.
    ///
    /// Подписка запоминается и отправляется каждому новому пиру.
    pub fn subscribe(
        &self,
        topic: impl Into<Bytes>,
    ) -> Result<(), TransportError> {
        self.ensure_kind(SocketType::Sub, "subscribe")?;
        let topic = topic.into();

        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        if state.topics.add(topic.clone()) {
            broadcast_to_peers(&state.peers, &[control_frame(SUBSCRIBE_MARKER, &topic)]);
        }
        Ok(())
    }

    /// SUB: отписка от топика-префикса.
    pub fn unsubscribe(
        &self,
        topic: impl AsRef<[u8]>,
    ) -> Result<(), TransportError> {
        self.ensure_kind(SocketType::Sub, "unsubscribe")?;
        let topic = topic.as_ref();

        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        if state.topics.remove(topic) {
            broadcast_to_peers(&state.peers, &[control_frame(UNSUBSCRIBE_MARKER, topic)]);
        }
        Ok(())
    }

    /// SUB: отправляет произвольный control-фрейм всем пирам.
    ///
    /// Фрейм не становится локальным фильтром, но повторяется при каждом
    /// новом подключении, как и обычные подписки. Так передаются, например,
    /// подписанные конверты.
    pub fn send_control(
        &self,
        frame: impl Into<Bytes>,
    ) -> Result<(), TransportError> {
        self.ensure_kind(SocketType::Sub, "send_control")?;
        let frame = frame.into();

        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        broadcast_to_peers(&state.peers, &[frame.clone()]);
        state.controls.push(frame);
        Ok(())
    }

    /// XPUB: регистрирует фильтр для конкретного пира.
    ///
    /// Используется в ручном режиме (`xpub_manual`). Отключившийся пир
    /// молча пропускается.
    pub fn subscribe_peer(
        &self,
        peer: PeerId,
        topic: impl Into<Bytes>,
    ) -> Result<(), TransportError> {
        self.ensure_kind(SocketType::XPub, "subscribe_peer")?;

        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        if !state.peers.contains_key(&peer) {
            debug!(peer, "Peer is gone, filter not registered");
            return Ok(());
        }
        state.filters.subscribe(peer, topic.into());
        Ok(())
    }

    /// XPUB: снимает фильтр пира.
    pub fn unsubscribe_peer(
        &self,
        peer: PeerId,
        topic: impl AsRef<[u8]>,
    ) -> Result<(), TransportError> {
        self.ensure_kind(SocketType::XPub, "unsubscribe_peer")?;

        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        state.filters.unsubscribe(peer, topic.as_ref());
        Ok(())
    }

    /// Ждёт следующее входящее сообщение.
    ///
    /// Возвращает `None` после закрытия сокета.
    pub async fn recv(&self) -> Option<Multipart> {
        self.recv_from().await.map(|inbound| inbound.message)
    }

    /// Как [`Socket::recv`], но вместе с идентификатором пира.
    pub async fn recv_from(&self) -> Option<Inbound> {
        let mut closed = self.inner.closed.subscribe();
        let already_closed = *closed.borrow();
        if already_closed {
            return None;
        }

        let mut rx = self.inner.inbound_rx.lock().await;
        tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => None,
            inbound = rx.recv() => inbound,
        }
    }

    /// Закрывает сокет.
    ///
    /// Останавливает слушателей и переподключение, разрывает соединения с
    /// пирами и будит всех, кто ждёт в `recv`.
    ///
    /// # Возвращает
    /// - `true`, если сокет был закрыт этим вызовом
    /// - `false`, если он уже был закрыт ранее
    pub async fn close(
        &self,
        mode: CloseMode,
    ) -> bool {
        let (peers, tasks) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
            (
                std::mem::take(&mut state.peers),
                std::mem::take(&mut state.tasks),
            )
        };
        self.inner.closed.send_replace(true);

        for task in tasks {
            task.abort();
        }

        match mode {
            CloseMode::Immediate => {
                for peer in peers.into_values() {
                    peer.reader.abort();
                    peer.writer.abort();
                }
            }
            CloseMode::Graceful(timeout) => {
                let deadline = Instant::now() + timeout;
                let mut writers = Vec::with_capacity(peers.len());
                for peer in peers.into_values() {
                    peer.reader.abort();
                    // Закрытие канала завершает writer после записи очереди.
                    drop(peer.tx);
                    writers.push(peer.writer);
                }
                for writer in writers {
                    let abort = writer.abort_handle();
                    if timeout_at(deadline, writer).await.is_err() {
                        warn!(socket = %self.inner.kind, "Close timeout expired, dropping unsent messages");
                        abort.abort();
                    }
                }
            }
        }

        info!(socket = %self.inner.kind, ?mode, "Socket closed");
        self.inner.emit(SocketEvent::Closed);
        true
    }

    fn ensure_kind(
        &self,
        expected: SocketType,
        operation: &'static str,
    ) -> Result<(), TransportError> {
        if self.inner.kind == expected {
            Ok(())
        } else {
            Err(TransportError::Unsupported {
                socket_type: self.inner.kind.as_str(),
                operation,
            })
        }
    }
}

impl fmt::Debug for Socket {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Socket")
            .field("kind", &self.inner.kind)
            .field("endpoints", &state.endpoints)
            .field("peers", &state.peers.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl SocketInner {
    pub(super) fn emit(
        &self,
        event: SocketEvent,
    ) {
        // Ошибка означает лишь отсутствие слушателей монитора.
        let _ = self.events.send(event);
    }

    pub(super) fn inbound_sender(&self) -> mpsc::Sender<Inbound> {
        self.inbound_tx.clone()
    }

    /// Регистрирует установленное соединение и запускает задачи чтения и
    /// записи.
    ///
    /// # Возвращает
    /// Идентификатор пира и приёмник, который срабатывает при разрыве
    /// соединения; `None`, если сокет уже закрыт.
    pub(super) fn register_peer(
        self: &Arc<Self>,
        stream: TcpStream,
        remote: SocketAddr,
    ) -> Option<(PeerId, oneshot::Receiver<()>)> {
        if let Err(e) = stream.set_nodelay(true) {
            trace!(error = %e, "Failed to set TCP_NODELAY");
        }
        let id = self.next_peer.fetch_add(1, Ordering::Relaxed) + 1;
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();

        let mut state = self.state.lock();
        if state.closed {
            return None;
        }

        if matches!(self.kind, SocketType::XSub | SocketType::Sub) {
            for topic in state.topics.topics() {
                let _ = tx.send(vec![control_frame(SUBSCRIBE_MARKER, topic)]);
            }
            for frame in &state.controls {
                let _ = tx.send(vec![frame.clone()]);
            }
        }

        let writer = tokio::spawn(peer::write_loop(id, write_half, rx));
        let reader = tokio::spawn(peer::read_loop(
            Arc::downgrade(self),
            id,
            read_half,
            self.options.max_frame_size,
            done_tx,
        ));
        state.peers.insert(
            id,
            PeerHandle {
                remote,
                tx,
                reader,
                writer,
            },
        );
        debug!(socket = %self.kind, peer = id, %remote, peers = state.peers.len(), "Peer attached");

        Some((id, done_rx))
    }

    /// Применяет семантику роли к входящему сообщению.
    ///
    /// # Возвращает
    /// Сообщение для приложения или `None`, если оно поглощено сокетом.
    pub(super) fn accept_incoming(
        &self,
        peer: PeerId,
        message: Multipart,
    ) -> Option<Inbound> {
        let first = message.first()?;

        match self.kind {
            SocketType::Pub => {
                trace!(peer, "PUB socket ignores inbound message");
                None
            }
            SocketType::XSub => Some(Inbound { peer, message }),
            SocketType::Sub => {
                let wanted = {
                    let state = self.state.lock();
                    state.topics.is_empty() || state.topics.matches(first)
                };
                wanted.then_some(Inbound { peer, message })
            }
            SocketType::XPub => {
                if self.options.xpub_manual {
                    return Some(Inbound { peer, message });
                }
                let transition = match first.first() {
                    Some(&SUBSCRIBE_MARKER) => {
                        self.state.lock().filters.subscribe(peer, first.slice(1..))
                    }
                    Some(&UNSUBSCRIBE_MARKER) => {
                        let mut state = self.state.lock();
                        if !state.filters.holds(peer, &first[1..]) {
                            trace!(peer, "Unsubscribe from a topic the peer does not hold");
                            return None;
                        }
                        state.filters.unsubscribe(peer, &first[1..])
                    }
                    // Не подписка: всегда отдаётся приложению.
                    _ => true,
                };
                (transition || self.options.xpub_verbose).then_some(Inbound { peer, message })
            }
        }
    }

    /// Убирает пира после разрыва соединения.
    ///
    /// # Возвращает
    /// Для XPUB в автоматическом режиме: уведомления об отписке. Без
    /// verbose по одному на топик, у которого не осталось подписчиков. С
    /// verbose по одному на каждую подписку пира, ведь каждая из них
    /// была отдана приложению.
    pub(super) fn detach_peer(
        &self,
        peer: PeerId,
    ) -> Vec<Inbound> {
        let (removed, released) = {
            let mut state = self.state.lock();
            let removed = state.peers.remove(&peer);
            let released = if self.kind == SocketType::XPub {
                state.filters.remove_peer(peer)
            } else {
                Vec::new()
            };
            (removed, released)
        };

        if let Some(handle) = removed {
            debug!(socket = %self.kind, peer, remote = %handle.remote, "Peer detached");
            self.emit(SocketEvent::Disconnected { peer });
        }

        if self.kind != SocketType::XPub || self.options.xpub_manual {
            return Vec::new();
        }
        let verbose = self.options.xpub_verbose;
        released
            .into_iter()
            .flat_map(|released| {
                let notices = match (verbose, released.orphaned) {
                    (true, _) => released.held,
                    (false, true) => 1,
                    (false, false) => 0,
                };
                let frame = control_frame(UNSUBSCRIBE_MARKER, &released.topic);
                std::iter::repeat(frame).take(notices)
            })
            .map(|frame| Inbound {
                peer,
                message: vec![frame],
            })
            .collect()
    }
}

impl Drop for SocketInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for task in state.tasks.drain(..) {
            task.abort();
        }
        for (_, peer) in state.peers.drain() {
            peer.reader.abort();
            peer.writer.abort();
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Фоновые задачи
////////////////////////////////////////////////////////////////////////////////

fn broadcast_to_peers(
    peers: &HashMap<PeerId, PeerHandle>,
    message: &[Bytes],
) {
    for peer in peers.values() {
        let _ = peer.tx.send(message.to_vec());
    }
}

pub(super) async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    // Ошибка означает, что сокет уничтожен: это тоже закрытие.
    let _ = closed.wait_for(|closed| *closed).await;
}

async fn accept_loop(
    socket: Weak<SocketInner>,
    listener: TcpListener,
    mut closed: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            _ = wait_closed(&mut closed) => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, remote)) => {
                let Some(inner) = socket.upgrade() else {
                    break;
                };
                if let Some((peer, _done)) = inner.register_peer(stream, remote) {
                    inner.emit(SocketEvent::Accepted { peer, remote });
                }
            }
            Err(e) => {
                warn!(error = %e, "Accept failed");
                sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

async fn connect_loop(
    socket: Weak<SocketInner>,
    address: Address,
    mut closed: watch::Receiver<bool>,
    interval: Duration,
) {
    loop {
        let attempt = tokio::select! {
            _ = wait_closed(&mut closed) => return,
            attempt = TcpStream::connect(address.socket_target()) => attempt,
        };

        let Some(inner) = socket.upgrade() else {
            return;
        };

        match attempt.and_then(|stream| stream.peer_addr().map(|remote| (stream, remote))) {
            Ok((stream, remote)) => {
                let Some((peer, done)) = inner.register_peer(stream, remote) else {
                    return;
                };
                info!(socket = %inner.kind, %address, peer, "Connected");
                inner.emit(SocketEvent::Connected { peer, remote });
                drop(inner);

                tokio::select! {
                    _ = wait_closed(&mut closed) => return,
                    _ = done => {}
                }
                debug!(%address, "Connection lost, reconnecting");
            }
            Err(e) => {
                trace!(%address, error = %e, "Connect attempt failed");
                inner.emit(SocketEvent::ConnectRetried {
                    address: address.clone(),
                    reason: e.to_string(),
                });
                drop(inner);
            }
        }

        tokio::select! {
            _ = wait_closed(&mut closed) => return,
            _ = sleep(interval) => {}
        }
    }
}

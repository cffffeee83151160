//! Остановка процесса.
//!
//! [`ShutdownController`] и [`ShutdownToken`] задают явный сигнал остановки,
//! который передаётся в каждый компонент. [`KillSwitch`] связывает этот
//! сигнал с сигналами ОС и паниками и закрывает зарегистрированные
//! конечные точки ровно один раз.

use std::{
    future::pending,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::transport::{CloseMode, Socket};

/// Источник сигнала остановки.
#[derive(Debug, Clone)]
pub struct ShutdownController {
    tx: Arc<watch::Sender<bool>>,
}

/// Получатель сигнала остановки.
///
/// Уничтожение контроллера без вызова `trigger` остановкой не считается.
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

/// Конечная точка, которую можно закрыть при остановке.
#[async_trait]
pub trait Closeable: Send + Sync {
    /// Закрывает конечную точку. Возвращает `true`, если закрыл этот вызов.
    async fn close(
        &self,
        mode: CloseMode,
    ) -> bool;

    /// Имя для логов.
    fn describe(&self) -> String;
}

struct Registered {
    name: String,
    endpoint: Arc<dyn Closeable>,
    mode: CloseMode,
}

/// Закрывает зарегистрированные конечные точки по сигналу ОС, панике или
/// явному вызову.
///
/// Срабатывает один раз: повторные триггеры ничего не делают.
pub struct KillSwitch {
    controller: ShutdownController,
    endpoints: Mutex<Vec<Registered>>,
    fired: AtomicBool,
    default_mode: CloseMode,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Подаёт сигнал остановки. Возвращает `true` при первом вызове.
    pub fn trigger(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownToken {
    /// Токен, который никогда не сработает.
    pub fn never() -> Self {
        ShutdownController::new().token()
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Ждёт сигнала остановки.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|triggered| *triggered).await.is_err() {
            // Контроллер уничтожен без сигнала.
            pending::<()>().await;
        }
    }
}

impl KillSwitch {
    pub fn new(controller: ShutdownController) -> Self {
        Self::with_mode(controller, CloseMode::Immediate)
    }

    /// Как [`KillSwitch::new`], но с другим режимом закрытия по умолчанию.
    pub fn with_mode(
        controller: ShutdownController,
        default_mode: CloseMode,
    ) -> Self {
        Self {
            controller,
            endpoints: Mutex::new(Vec::new()),
            fired: AtomicBool::new(false),
            default_mode,
        }
    }

    pub fn token(&self) -> ShutdownToken {
        self.controller.token()
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Регистрирует конечную точку с режимом закрытия по умолчанию.
    ///
    /// # Возвращает
    /// `false`, если переключатель уже сработал; конечная точка в этом
    /// случае не регистрируется.
    pub fn register(
        &self,
        endpoint: Arc<dyn Closeable>,
    ) -> bool {
        self.register_with_mode(endpoint, self.default_mode)
    }

    pub fn register_with_mode(
        &self,
        endpoint: Arc<dyn Closeable>,
        mode: CloseMode,
    ) -> bool {
        let mut endpoints = self.endpoints.lock();
        if self.is_fired() {
            return false;
        }
        let name = endpoint.describe();
        debug!(endpoint = %name, ?mode, "Endpoint registered for shutdown");
        endpoints.push(Registered {
            name,
            endpoint,
            mode,
        });
        true
    }

    pub fn registered(&self) -> usize {
        self.endpoints.lock().len()
    }

    /// Срабатывает: закрывает все конечные точки и подаёт сигнал остановки.
    ///
    /// # Возвращает
    /// `true`, если сработал этот вызов.
    pub async fn trigger(
        &self,
        reason: &str,
    ) -> bool {
        let endpoints = {
            let mut endpoints = self.endpoints.lock();
            if self.fired.swap(true, Ordering::AcqRel) {
                return false;
            }
            std::mem::take(&mut *endpoints)
        };

        info!(reason, endpoints = endpoints.len(), "Shutting down");
        self.controller.trigger();

        for Registered {
            name,
            endpoint,
            mode,
        } in endpoints
        {
            if endpoint.close(mode).await {
                debug!(endpoint = %name, "Endpoint closed");
            } else {
                debug!(endpoint = %name, "Endpoint was already closed");
            }
        }
        true
    }

    /// Запускает задачу, которая ждёт сигнал ОС или сигнал остановки и
    /// срабатывает.
    ///
    /// Сигнал остановки от другого источника (например, паники) тоже
    /// приводит к закрытию конечных точек.
    pub fn listen(self: &Arc<Self>) -> std::io::Result<JoinHandle<()>> {
        let signals = Signals::install()?;
        let token = self.token();
        let this = Arc::clone(self);

        Ok(tokio::spawn(async move {
            let reason = tokio::select! {
                name = signals.recv() => name,
                _ = token.cancelled() => "shutdown requested",
            };
            this.trigger(reason).await;
        }))
    }

    /// Устанавливает panic hook, подающий сигнал остановки.
    ///
    /// Предыдущий hook вызывается после этого.
    pub fn install_panic_hook(&self) {
        let controller = self.controller.clone();
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            error!(panic = %info, "Panic, triggering shutdown");
            controller.trigger();
            previous(info);
        }));
    }
}

////////////////////////////////////////////////////////////////////////////////
// Сигналы ОС
////////////////////////////////////////////////////////////////////////////////

#[cfg(unix)]
struct Signals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    user1: tokio::signal::unix::Signal,
    user2: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            user1: signal(SignalKind::user_defined1())?,
            user2: signal(SignalKind::user_defined2())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    async fn recv(mut self) -> &'static str {
        let name = tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.user1.recv() => "SIGUSR1",
            _ = self.user2.recv() => "SIGUSR2",
            _ = self.hangup.recv() => "SIGHUP",
        };
        info!(signal = name, "Signal received");
        name
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn install() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(self) -> &'static str {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl-C handler failed");
            pending::<()>().await;
        }
        info!(signal = "ctrl-c", "Signal received");
        "ctrl-c"
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

#[async_trait]
impl Closeable for Socket {
    async fn close(
        &self,
        mode: CloseMode,
    ) -> bool {
        Socket::close(self, mode).await
    }

    fn describe(&self) -> String {
        match self.local_addresses().first() {
            Some(address) => format!("{} {address}", self.kind()),
            None => self.kind().to_string(),
        }
    }
}

impl Drop for KillSwitch {
    fn drop(&mut self) {
        let pending = self.endpoints.get_mut().len();
        if pending > 0 && !self.is_fired() {
            warn!(pending, "Kill switch dropped without firing");
        }
    }
}

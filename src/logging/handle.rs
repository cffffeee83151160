use std::time::{Duration, Instant};

use tracing_appender::non_blocking::WorkerGuard;

/// Держит фоновые писатели логов до остановки процесса.
pub struct LoggingHandle {
    file_guard: Option<WorkerGuard>,
    /// Сколько допустимо ждать сброса буферов при остановке
    flush_timeout: Duration,
    shut_down: bool,
}

impl LoggingHandle {
    pub fn new(file_guard: Option<WorkerGuard>) -> Self {
        Self {
            file_guard,
            flush_timeout: Duration::from_secs(5),
            shut_down: false,
        }
    }

    /// Устанавливает custom flush timeout.
    pub fn with_flush_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.flush_timeout = timeout;
        self
    }

    pub fn has_file_sink(&self) -> bool {
        self.file_guard.is_some()
    }

    /// Сбрасывает буферы и отключает файловый вывод.
    pub fn shutdown(mut self) {
        self.shut_down = true;
        tracing::info!(
            timeout_secs = self.flush_timeout.as_secs(),
            "Initiating logging shutdown"
        );

        let start = Instant::now();
        drop(self.file_guard.take());
        let elapsed = start.elapsed();

        if elapsed > self.flush_timeout {
            eprintln!(
                "WARNING: Logging shutdown took {}ms (timeout: {}ms)",
                elapsed.as_millis(),
                self.flush_timeout.as_millis()
            );
        }
    }

    /// Как [`LoggingHandle::shutdown`], но не блокирует async-поток.
    pub async fn shutdown_async(mut self) {
        self.shut_down = true;
        let guard = self.file_guard.take();
        let timeout = self.flush_timeout;

        match tokio::time::timeout(timeout, tokio::task::spawn_blocking(move || drop(guard))).await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => eprintln!("Logging shutdown task panicked: {e}"),
            Err(_) => eprintln!(
                "WARNING: Logging shutdown exceeded timeout of {}ms",
                timeout.as_millis()
            ),
        }
    }
}

impl Drop for LoggingHandle {
    fn drop(&mut self) {
        if !self.shut_down && self.file_guard.is_some() {
            eprintln!("WARNING: LoggingHandle dropped without explicit shutdown(). Some logs may be lost.");
        }
    }
}

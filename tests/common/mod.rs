#![allow(dead_code)]

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::time::{sleep, timeout};
use zumq::{Multipart, Socket, SocketOptions, SocketType};

pub const WAIT: Duration = Duration::from_secs(5);
pub const QUIET: Duration = Duration::from_millis(200);

/// Следующее сообщение сокета или ошибка по таймауту.
pub async fn recv_within(socket: &Socket) -> Result<Multipart> {
    timeout(WAIT, socket.recv())
        .await
        .context("timed out waiting for a message")?
        .context("socket closed")
}

/// `true`, если за короткое время ничего не пришло.
pub async fn stays_silent(socket: &Socket) -> bool {
    timeout(QUIET, socket.recv()).await.is_err()
}

/// Ждёт, пока у сокета появится `peers` соединений.
pub async fn wait_for_peers(
    socket: &Socket,
    peers: usize,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + WAIT;
    while socket.peer_count() < peers {
        if tokio::time::Instant::now() >= deadline {
            bail!("expected {peers} peer(s), have {}", socket.peer_count());
        }
        sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

/// Ждёт выполнения условия.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            bail!("condition not reached in {WAIT:?}");
        }
        sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

/// XPUB в ручном режиме: отдаёт каждый входящий фрейм как есть.
///
/// Подключается к XSUB-стороне прокси и видит всё, что прокси отправляет
/// издателям.
pub fn upstream_observer() -> Socket {
    Socket::with_options(
        SocketType::XPub,
        SocketOptions {
            xpub_manual: true,
            ..Default::default()
        },
    )
}

pub fn frames(parts: &[&'static [u8]]) -> Multipart {
    parts.iter().map(|p| bytes::Bytes::from_static(p)).collect()
}

/// Привязывает сокет к адресу, который только что освободился.
///
/// Закрытие прошлого владельца завершает слушателя асинхронно.
pub async fn rebind(
    socket: &Socket,
    address: &str,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        match socket.bind(address).await {
            Ok(_) => return Ok(()),
            Err(e) if tokio::time::Instant::now() >= deadline => return Err(e.into()),
            Err(_) => sleep(Duration::from_millis(20)).await,
        }
    }
}

use std::{net::SocketAddr, sync::Weak};

use bytes::BytesMut;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::tcp::{OwnedReadHalf, OwnedWriteHalf},
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, trace, warn};

use super::{
    codec::{Multipart, MultipartDecoder, MultipartEncoder},
    socket::SocketInner,
    PeerId,
};

/// Начальный размер буфера чтения.
const READ_BUFFER_SIZE: usize = 8 * 1024;
/// Сколько сообщений писатель склеивает в одну запись.
const WRITE_BATCH: usize = 64;

/// Соединение с одним пиром: очередь исходящих и задачи ввода-вывода.
pub(super) struct PeerHandle {
    pub(super) remote: SocketAddr,
    pub(super) tx: mpsc::UnboundedSender<Multipart>,
    pub(super) reader: JoinHandle<()>,
    pub(super) writer: JoinHandle<()>,
}

/// Читает сообщения пира и передаёт их сокету.
///
/// По завершении (EOF, ошибка, повреждённый поток) убирает пира из сокета и
/// сигнализирует через `done`.
pub(super) async fn read_loop(
    socket: Weak<SocketInner>,
    peer: PeerId,
    mut reader: OwnedReadHalf,
    max_frame_size: usize,
    done: oneshot::Sender<()>,
) {
    let mut decoder = MultipartDecoder::new(max_frame_size);
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

    'read: loop {
        match reader.read_buf(&mut buf).await {
            Ok(0) => {
                trace!(peer, "Peer closed connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(peer, error = %e, "Read failed");
                break;
            }
        }

        loop {
            let message = match decoder.decode(&mut buf) {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => {
                    warn!(peer, error = %e, "Malformed stream, dropping peer");
                    break 'read;
                }
            };

            let Some(inner) = socket.upgrade() else {
                break 'read;
            };
            let Some(inbound) = inner.accept_incoming(peer, message) else {
                continue;
            };
            let tx = inner.inbound_sender();
            drop(inner);

            if tx.send(inbound).await.is_err() {
                break 'read;
            }
        }
    }

    if let Some(inner) = socket.upgrade() {
        let notices = inner.detach_peer(peer);
        let tx = inner.inbound_sender();
        drop(inner);
        for notice in notices {
            if tx.send(notice).await.is_err() {
                break;
            }
        }
    }
    let _ = done.send(());
}

/// Пишет исходящие сообщения пира, склеивая накопившиеся в одну запись.
///
/// Завершается, когда очередь закрыта и опустошена, или при ошибке записи.
pub(super) async fn write_loop(
    peer: PeerId,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Multipart>,
) {
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

    while let Some(message) = rx.recv().await {
        MultipartEncoder::encode(&message, &mut buf);
        for _ in 1..WRITE_BATCH {
            match rx.try_recv() {
                Ok(message) => MultipartEncoder::encode(&message, &mut buf),
                Err(_) => break,
            }
        }

        if let Err(e) = writer.write_all(&buf).await {
            debug!(peer, error = %e, "Write failed");
            return;
        }
        buf.clear();
    }

    let _ = writer.shutdown().await;
}

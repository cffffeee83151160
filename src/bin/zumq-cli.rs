//! CLI клиент zumq
//!
//! Публикует сообщения через буферизующего издателя, подписывается на
//! каналы прокси (в том числе подписанными подписками) и считает подписи.

use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use zumq::{
    config::{Settings, DEFAULT_SUB_ADDRESS},
    proxy::{HmacSignatureChecker, SubscriptionEnvelope, SubscriptionKind},
    pubsub::{DrainOrder, Message, PublisherRegistry},
    shutdown::ShutdownToken,
    transport::{CloseMode, Socket, SocketType},
};

/// Основная структура CLI аргументов
#[derive(Parser)]
#[command(name = "zumq-cli")]
#[command(author = "Zumq Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "zumq CLI - publish to and subscribe through a zumq proxy", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Включить подробный вывод (debug)
    #[arg(short, long, global = true, help = "Включить подробный вывод для отладки")]
    verbose: bool,
    /// Подавить логи
    #[arg(short = 'q', long, global = true, help = "Подавить логирование")]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

/// Формат вывода полученных сообщений
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    /// Человекочитаемый формат
    Pretty,
    /// Одна JSON-строка на сообщение
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum DrainArg {
    Fifo,
    Lifo,
}

impl From<DrainArg> for DrainOrder {
    fn from(arg: DrainArg) -> Self {
        match arg {
            DrainArg::Fifo => DrainOrder::Fifo,
            DrainArg::Lifo => DrainOrder::Lifo,
        }
    }
}

/// Подкоманды CLI
#[derive(Subcommand)]
enum Commands {
    /// Опубликовать сообщение
    #[command(alias = "pub")]
    Publish {
        /// Файл настроек
        #[arg(long, env = "ZUMQ_CONFIG", help = "Путь к файлу настроек")]
        config: Option<PathBuf>,
        /// Адрес издателя
        #[arg(
            short,
            long,
            help = "Адрес, к которому подключается издатель; по умолчанию forward_address из настроек"
        )]
        address: Option<String>,
        /// Канал
        #[arg(required = true, help = "Имя канала (первый фрейм)")]
        channel: String,
        /// Фреймы данных
        #[arg(help = "Фреймы данных сообщения")]
        payload: Vec<String>,
        /// Сколько раз повторить сообщение
        #[arg(short = 'n', long, default_value = "1", help = "Количество повторов")]
        count: usize,
        /// Порядок отправки очереди
        #[arg(
            long,
            value_enum,
            help = "Порядок отправки накопленной очереди; по умолчанию drain_order из настроек"
        )]
        drain: Option<DrainArg>,
        /// Сколько ждать подключения
        #[arg(
            long,
            default_value = "5000",
            help = "Таймаут ожидания подключения в миллисекундах"
        )]
        wait_ms: u64,
    },
    /// Подписаться и печатать сообщения
    #[command(alias = "sub")]
    Subscribe {
        /// Адрес XPUB-стороны прокси
        #[arg(
            short,
            long,
            default_value = DEFAULT_SUB_ADDRESS,
            env = "ZUMQ_SUBSCRIBE_ADDRESS",
            help = "Адрес, к которому подключается подписчик"
        )]
        address: String,
        /// Каналы
        #[arg(help = "Каналы (префиксы); без каналов принимается всё")]
        channels: Vec<String>,
        /// Готовая подпись
        #[arg(
            long,
            conflicts_with = "secret",
            help = "Подпись канала для прокси с авторизацией"
        )]
        signature: Option<String>,
        /// Секрет для вычисления подписи
        #[arg(long, help = "Секрет HMAC для подписи каналов")]
        secret: Option<String>,
        /// Выйти после N сообщений
        #[arg(short = 'n', long, help = "Выйти после указанного числа сообщений")]
        count: Option<usize>,
        /// Формат вывода
        #[arg(long, value_enum, default_value = "pretty", help = "Формат вывода сообщений")]
        output: OutputFormat,
    },
    /// Посчитать подпись канала
    Sign {
        #[arg(long, env = "ZUMQ_SIGNATURE_SECRET", help = "Секрет HMAC")]
        secret: String,
        #[arg(required = true, help = "Имя канала")]
        channel: String,
    },
}

/// Точка входа в CLI
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet)?;

    match handle_command(cli.command).await {
        Ok(()) => {
            debug!("Command completed");
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}

async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Publish {
            config,
            address,
            channel,
            payload,
            count,
            drain,
            wait_ms,
        } => {
            let mut settings =
                Settings::load_from(config.as_deref()).context("Failed to load settings")?;
            if let Some(drain) = drain {
                settings.drain_order = drain.into();
            }
            let registry = publisher_registry(&settings);
            let result = publish(
                &registry,
                address.as_deref(),
                &channel,
                payload,
                count,
                Duration::from_millis(wait_ms),
            )
            .await;
            registry.close_all(CloseMode::Immediate).await;
            result
        }
        Commands::Subscribe {
            address,
            channels,
            signature,
            secret,
            count,
            output,
        } => subscribe(&address, channels, signature, secret, count, output).await,
        Commands::Sign { secret, channel } => {
            let checker = HmacSignatureChecker::new(secret)?;
            println!("{}", checker.sign(&channel));
            Ok(())
        }
    }
}

/// Реестр издателей с адресом и порядком отправки из настроек.
fn publisher_registry(settings: &Settings) -> PublisherRegistry {
    PublisherRegistry::new(
        settings.forward_address.clone(),
        settings.publisher_options(),
        ShutdownToken::never(),
    )
}

/// Публикует `count` копий сообщения и ждёт, пока очередь уйдёт в сокет.
async fn publish(
    registry: &PublisherRegistry,
    address: Option<&str>,
    channel: &str,
    payload: Vec<String>,
    count: usize,
    wait: Duration,
) -> Result<()> {
    let publisher = registry
        .get_or_create(address)
        .context("Failed to create publisher")?;
    let address = publisher.address().clone();

    for _ in 0..count {
        publisher.send(Message::new(
            channel.to_string(),
            payload.iter().cloned().map(Into::into).collect(),
        ));
    }

    let connected = tokio::time::timeout(wait, async {
        while !publisher.is_connected() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    if connected.is_err() {
        publisher.close(CloseMode::Immediate).await;
        bail!("no connection to {address} within {wait:?}");
    }

    publisher.close(CloseMode::Graceful(Duration::from_secs(1))).await;
    let stats = publisher.stats();
    println!("published {} message(s) to {address}", stats.sent);
    if stats.failed > 0 {
        bail!("{} message(s) failed", stats.failed);
    }
    Ok(())
}

/// Подписывается на каналы и печатает сообщения до Ctrl-C или `count`.
async fn subscribe(
    address: &str,
    channels: Vec<String>,
    signature: Option<String>,
    secret: Option<String>,
    count: Option<usize>,
    output: OutputFormat,
) -> Result<()> {
    let socket = Socket::new(SocketType::Sub);
    let signer = secret.map(HmacSignatureChecker::new).transpose()?;

    match (signature, signer) {
        (Some(signature), _) => {
            for channel in &channels {
                let envelope = SubscriptionEnvelope::new(channel.as_str(), signature.as_str());
                socket.send_control(envelope.to_frame(SubscriptionKind::Subscribe))?;
            }
        }
        (None, Some(signer)) => {
            for channel in &channels {
                let envelope = SubscriptionEnvelope::new(channel.as_str(), signer.sign(channel));
                socket.send_control(envelope.to_frame(SubscriptionKind::Subscribe))?;
            }
        }
        (None, None) if channels.is_empty() => socket.subscribe("")?,
        (None, None) => {
            for channel in &channels {
                socket.subscribe(channel.clone())?;
            }
        }
    }
    socket
        .connect(address)
        .with_context(|| format!("Failed to connect to {address}"))?;
    debug!(address, ?channels, "Subscriber started");

    let mut received = 0usize;
    loop {
        let frames = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            frames = socket.recv() => frames,
        };
        let Some(message) = frames.and_then(Message::from_multipart) else {
            break;
        };
        print_message(&message, output);

        received += 1;
        if count.is_some_and(|limit| received >= limit) {
            break;
        }
    }

    socket.close(CloseMode::Immediate).await;
    Ok(())
}

fn print_message(
    message: &Message,
    output: OutputFormat,
) {
    let now = chrono::Local::now();
    let channel = String::from_utf8_lossy(&message.channel);
    let parts: Vec<String> = message
        .payload
        .iter()
        .map(|p| String::from_utf8_lossy(p).into_owned())
        .collect();

    match output {
        OutputFormat::Pretty => {
            println!(
                "[{}] {channel}: {}",
                now.format("%H:%M:%S%.3f"),
                parts.join(" | ")
            );
        }
        OutputFormat::Json => {
            let line = serde_json::json!({
                "time": now.to_rfc3339(),
                "channel": channel,
                "payload": parts,
            });
            println!("{line}");
        }
    }
}

/// Инициализация логирования
fn init_logging(
    verbose: bool,
    quiet: bool,
) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if quiet {
        "off"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };

    fmt()
        .with_env_filter(EnvFilter::new(level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Ошибка инициализации логирования: {e}"))?;

    Ok(())
}

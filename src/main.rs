//! zumq: прокси подписок XPUB/XSUB.
//!
//! Настройки берутся из значений по умолчанию, файла (`--config` или
//! `ZUMQ_CONFIG`), переменных `VMQ_ZEROMQ_*` и, в последнюю очередь, флагов
//! командной строки.

use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::info;
use zumq::{
    config::Settings,
    logging::{init_logging, LogFormat, LoggingConfig},
    proxy::{ProxyNode, RewriteMarker},
    shutdown::{KillSwitch, ShutdownController},
};

#[derive(Parser)]
#[command(name = "zumq")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "zumq - XPUB/XSUB subscription proxy", long_about = None)]
struct Args {
    /// Файл настроек (TOML, JSON, YAML)
    #[arg(long, env = "ZUMQ_CONFIG", help = "Путь к файлу настроек")]
    config: Option<PathBuf>,
    /// Адрес для подписчиков
    #[arg(long, help = "Адрес XPUB для подписчиков, например tcp://*:5000")]
    sub_address: Option<String>,
    /// Адрес для издателей
    #[arg(long, help = "Адрес XSUB для издателей, например tcp://*:5001")]
    pub_address: Option<String>,
    /// Секрет для проверки подписей
    #[arg(
        long,
        help = "Секрет HMAC; без него прокси пересылает подписки как есть"
    )]
    secret: Option<String>,
    /// Маркер переписанной подписки
    #[arg(
        long,
        value_parser = parse_marker,
        help = "mirror-input (по умолчанию) или always-subscribe"
    )]
    rewrite_marker: Option<RewriteMarker>,
    /// Уровень логирования
    #[arg(long, default_value = "info", help = "Уровень логирования")]
    log_level: String,
    /// Формат логов
    #[arg(long, help = "Формат логов: pretty, compact, json")]
    log_format: Option<LogFormat>,
    /// Каталог файловых логов
    #[arg(long, help = "Включить запись логов в файлы в этом каталоге")]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut logging = LoggingConfig::console_only(args.log_level.clone());
    if let Some(format) = args.log_format {
        logging.format = format;
    }
    if let Some(dir) = &args.log_dir {
        logging.log_dir = dir.clone();
        logging.file_enabled = true;
    }
    let log_handle =
        init_logging(logging).map_err(|e| anyhow!("Failed to initialize logging: {e}"))?;

    let mut settings =
        Settings::load_from(args.config.as_deref()).context("Failed to load settings")?;
    if let Some(address) = args.sub_address {
        settings.sub_address = address;
    }
    if let Some(address) = args.pub_address {
        settings.pub_address = address;
    }
    if let Some(secret) = args.secret {
        settings.signature_secret = Some(secret);
    }
    if let Some(marker) = args.rewrite_marker {
        settings.rewrite_marker = marker;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_commit = env!("ZUMQ_GIT_COMMIT"),
        build_time = env!("ZUMQ_BUILD_TIME"),
        "Starting zumq"
    );

    let checker = settings
        .signature_checker()
        .context("Invalid signature secret")?;

    let kill_switch = Arc::new(KillSwitch::new(ShutdownController::new()));
    kill_switch.install_panic_hook();
    let listener = kill_switch
        .listen()
        .context("Failed to install signal handlers")?;

    let node = Arc::new(
        ProxyNode::bind(settings.proxy_config(), checker, kill_switch.token())
            .await
            .context("Failed to start proxy")?,
    );
    kill_switch.register(node.clone());

    node.run().await;
    // Узел мог остановиться сам: закрываем всё остальное.
    kill_switch.trigger("proxy stopped").await;
    let _ = listener.await;

    info!(stats = ?node.stats(), "Proxy stopped");
    log_handle.shutdown_async().await;
    Ok(())
}

fn parse_marker(value: &str) -> Result<RewriteMarker, String> {
    match value {
        "mirror-input" => Ok(RewriteMarker::MirrorInput),
        "always-subscribe" => Ok(RewriteMarker::AlwaysSubscribe),
        other => Err(format!(
            "unknown marker '{other}', expected mirror-input or always-subscribe"
        )),
    }
}

use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

/// Переменная окружения с уровнем логирования.
pub const LOG_LEVEL_ENV: &str = "ZUMQ_LOG_LEVEL";
/// Переменная окружения с форматом вывода.
pub const LOG_FORMAT_ENV: &str = "ZUMQ_LOG_FORMAT";
/// Переменная окружения с каталогом логов.
pub const LOG_DIR_ENV: &str = "ZUMQ_LOG_DIR";

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Формат вывода логов.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Настройки консольного вывода.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    pub enabled: bool,
    /// Формат консоли; при `None` используется общий формат
    pub format: Option<LogFormat>,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_line_numbers: bool,
}

/// Настройки файлового вывода.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub enabled: bool,
    /// Имя файла; к нему дописывается дата ротации
    pub filename: String,
}

/// Конфигурация логирования.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Уровень по умолчанию
    pub level: String,
    pub format: LogFormat,
    pub log_dir: PathBuf,
    /// Дополнительные директивы фильтра, например `zumq::transport=trace`
    pub directives: Vec<String>,
    pub console_enabled: bool,
    pub file_enabled: bool,
    pub console: ConsoleConfig,
    pub file: FileConfig,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl LoggingConfig {
    /// Только консоль с указанным уровнем.
    pub fn console_only(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            file_enabled: false,
            ..Default::default()
        }
    }

    /// Применяет `ZUMQ_LOG_LEVEL`, `ZUMQ_LOG_FORMAT`, `ZUMQ_LOG_DIR`.
    ///
    /// Некорректный формат игнорируется.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var(LOG_LEVEL_ENV) {
            self.level = level.to_lowercase();
        }
        if let Ok(format) = std::env::var(LOG_FORMAT_ENV) {
            match format.parse() {
                Ok(format) => self.format = format,
                Err(e) => eprintln!("Ignoring {LOG_FORMAT_ENV}: {e}"),
            }
        }
        if let Ok(dir) = std::env::var(LOG_DIR_ENV) {
            self.log_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !LEVELS.contains(&self.level.as_str()) {
            return Err(format!(
                "invalid log level '{}', expected one of {}",
                self.level,
                LEVELS.join(", ")
            ));
        }
        if self.file_enabled && self.file.enabled && self.file.filename.is_empty() {
            return Err("file logging is enabled but filename is empty".to_string());
        }
        Ok(())
    }

    /// Создаёт каталог логов, если включён файловый вывод.
    pub fn ensure_log_dir(&self) -> std::io::Result<()> {
        if self.file_enabled && self.file.enabled {
            std::fs::create_dir_all(&self.log_dir)?;
        }
        Ok(())
    }

    /// Директива для `EnvFilter`: уровень и дополнительные директивы.
    pub fn build_filter_directive(&self) -> String {
        std::iter::once(self.level.clone())
            .chain(self.directives.iter().cloned())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn console_format(&self) -> LogFormat {
        self.console.format.unwrap_or(self.format)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: None,
            with_ansi: true,
            with_target: true,
            with_thread_ids: false,
            with_line_numbers: false,
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            filename: "zumq.log".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            log_dir: PathBuf::from("logs"),
            directives: Vec::new(),
            console_enabled: true,
            file_enabled: false,
            console: ConsoleConfig::default(),
            file: FileConfig::default(),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(match self {
            Self::Pretty => "pretty",
            Self::Compact => "compact",
            Self::Json => "json",
        })
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = LoggingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.build_filter_directive(), "info");
    }

    #[test]
    fn test_invalid_level_rejected() {
        let config = LoggingConfig::console_only("loud");
        assert!(config.validate().unwrap_err().contains("loud"));
    }

    /// Тест проверяет склейку уровня и дополнительных директив.
    #[test]
    fn test_filter_directive_with_extra_directives() {
        let config = LoggingConfig {
            level: "warn".into(),
            directives: vec!["zumq::proxy=debug".into()],
            ..Default::default()
        };
        assert_eq!(config.build_filter_directive(), "warn,zumq::proxy=debug");
    }

    #[test]
    fn test_console_format_falls_back_to_global() {
        let mut config = LoggingConfig {
            format: LogFormat::Json,
            ..Default::default()
        };
        assert_eq!(config.console_format(), LogFormat::Json);
        config.console.format = Some(LogFormat::Compact);
        assert_eq!(config.console_format(), LogFormat::Compact);
    }

    /// Тест проверяет переопределение из переменных окружения.
    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var(LOG_LEVEL_ENV, "DEBUG");
        std::env::set_var(LOG_FORMAT_ENV, "json");
        std::env::set_var(LOG_DIR_ENV, "/tmp/zumq-logs");

        let mut config = LoggingConfig::default();
        config.apply_env_overrides();

        std::env::remove_var(LOG_LEVEL_ENV);
        std::env::remove_var(LOG_FORMAT_ENV);
        std::env::remove_var(LOG_DIR_ENV);

        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.log_dir, PathBuf::from("/tmp/zumq-logs"));
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert!("xml".parse::<LogFormat>().is_err());
        assert_eq!(LogFormat::Compact.to_string(), "compact");
    }
}

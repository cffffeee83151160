use std::{fmt, net::SocketAddr, str::FromStr};

use zumq_error::TransportError;

/// Адрес конечной точки сокета.
///
/// Поддерживается только схема `tcp://host:port`. При `bind` хост `*`
/// означает «все интерфейсы».
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    host: String,
    port: u16,
}

impl Address {
    pub const TCP_SCHEME: &'static str = "tcp://";

    /// Разбирает строку вида `tcp://127.0.0.1:5000`.
    pub fn parse(raw: &str) -> Result<Self, TransportError> {
        let invalid = |reason: &str| TransportError::InvalidAddress {
            address: raw.to_string(),
            reason: reason.to_string(),
        };

        let rest = raw
            .strip_prefix(Self::TCP_SCHEME)
            .ok_or_else(|| invalid("only tcp:// endpoints are supported"))?;
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| invalid("missing port"))?;
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = port.parse::<u16>().map_err(|_| invalid("invalid port"))?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Строка `host:port`, пригодная для `TcpListener::bind` /
    /// `TcpStream::connect`.
    pub fn socket_target(&self) -> String {
        let host = if self.host == "*" {
            "0.0.0.0"
        } else {
            self.host.as_str()
        };
        format!("{host}:{}", self.port)
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        let host = match addr {
            SocketAddr::V4(v4) => v4.ip().to_string(),
            SocketAddr::V6(v6) => format!("[{}]", v6.ip()),
        };
        Self {
            host,
            port: addr.port(),
        }
    }
}

impl FromStr for Address {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}{}:{}", Self::TCP_SCHEME, self.host, self.port)
    }
}

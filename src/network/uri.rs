use std::{fmt, str::FromStr};

use redmux_error::MuxError;

/// Default broker port.
pub const DEFAULT_PORT: u16 = 6379;

/// Parsed `redis://[user[:password]@]host[:port][/db]` address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerUri {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: Option<u32>,
}

impl BrokerUri {
    /// `host:port` suitable for `TcpStream::connect`.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for BrokerUri {
    type Err = MuxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("redis://")
            .ok_or_else(|| MuxError::invalid(format!("unsupported broker URI '{s}'")))?;

        let (authority, path) = match rest.split_once('/') {
            Some((a, p)) => (a, p),
            None => (rest, ""),
        };

        let (userinfo, hostport) = match authority.rsplit_once('@') {
            Some((u, h)) => (Some(u), h),
            None => (None, authority),
        };

        let (username, password) = match userinfo {
            None => (None, None),
            Some(info) => match info.split_once(':') {
                Some((u, p)) => (non_empty(u), non_empty(p)),
                None => (non_empty(info), None),
            },
        };

        let (host, port) = split_host_port(hostport)?;
        if host.is_empty() {
            return Err(MuxError::invalid(format!("broker URI '{s}' has no host")));
        }

        let db = match path.trim_end_matches('/') {
            "" => None,
            db => Some(
                db.parse::<u32>()
                    .map_err(|_| MuxError::invalid(format!("invalid database index '{db}'")))?,
            ),
        };

        Ok(BrokerUri {
            host,
            port,
            username,
            password,
            db,
        })
    }
}

/// Never prints the password.
impl fmt::Display for BrokerUri {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "redis://")?;
        match (&self.username, &self.password) {
            (Some(u), Some(_)) => write!(f, "{u}:***@")?,
            (Some(u), None) => write!(f, "{u}@")?,
            (None, Some(_)) => write!(f, ":***@")?,
            (None, None) => {}
        }
        write!(f, "{}", self.address())?;
        if let Some(db) = self.db {
            write!(f, "/{db}")?;
        }
        Ok(())
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

fn split_host_port(hostport: &str) -> Result<(String, u16), MuxError> {
    // [::1]:6380
    if let Some(inner) = hostport.strip_prefix('[') {
        let (host, tail) = inner
            .split_once(']')
            .ok_or_else(|| MuxError::invalid(format!("unterminated IPv6 host '{hostport}'")))?;
        let port = match tail.strip_prefix(':') {
            Some(p) => parse_port(p)?,
            None => DEFAULT_PORT,
        };
        return Ok((host.to_string(), port));
    }
    match hostport.rsplit_once(':') {
        Some((host, port)) => Ok((host.to_string(), parse_port(port)?)),
        None => Ok((hostport.to_string(), DEFAULT_PORT)),
    }
}

fn parse_port(p: &str) -> Result<u16, MuxError> {
    p.parse::<u16>()
        .map_err(|_| MuxError::invalid(format!("invalid port '{p}'")))
}

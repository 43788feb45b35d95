use std::{env, net::SocketAddr, str::FromStr, time::Duration};

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub from_address: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub listen_addr: SocketAddr,
    pub smtp: SmtpConfig,
    pub fanout_concurrency: usize,
    pub mail_send_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://trips.db?mode=rwc".to_string());
        let database_max_connections = parse_var("DATABASE_MAX_CONNECTIONS", 10)?;
        let listen_addr: SocketAddr =
            parse_var("APP_LISTEN_ADDR", SocketAddr::from(([127, 0, 0, 1], 8080)))?;

        let smtp = SmtpConfig {
            host: env::var("SMTP_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: parse_var("SMTP_PORT", 1025)?,
            username: env::var("SMTP_USERNAME").ok().filter(|v| !v.is_empty()),
            password: env::var("SMTP_PASSWORD").ok().filter(|v| !v.is_empty()),
            use_tls: parse_var("SMTP_TLS", false)?,
            from_address: env::var("MAIL_FROM")
                .unwrap_or_else(|_| "no-reply@travelplanner.com".to_string()),
        };

        let fanout_concurrency: usize = parse_var("FANOUT_CONCURRENCY", 1)?;
        if fanout_concurrency == 0 {
            return Err(AppError::Config(
                "invalid FANOUT_CONCURRENCY: must be at least 1".into(),
            ));
        }
        let mail_send_timeout = Duration::from_secs(parse_var("MAIL_SEND_TIMEOUT_SECS", 30)?);

        Ok(Self {
            database_url,
            database_max_connections,
            listen_addr,
            smtp,
            fanout_concurrency,
            mail_send_timeout,
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|err| AppError::Config(format!("invalid {name}: {err}"))),
        _ => Ok(default),
    }
}

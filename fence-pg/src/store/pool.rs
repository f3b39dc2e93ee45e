//! Pool de connexions PostgreSQL

use anyhow::{Context, Result};
use deadpool_postgres::{Config, Pool, PoolConfig, Runtime, Timeouts};
use std::time::Duration;
use tokio_postgres::config::{Host, SslMode as PgSslMode};
use tokio_postgres::NoTls;
use tokio_postgres_rustls::MakeRustlsConnect;

/// Mode SSL pour la connexion PostgreSQL
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SslMode {
    /// Pas de SSL (défaut)
    #[default]
    Disable,
    /// SSL préféré mais non requis
    Prefer,
    /// SSL requis
    Require,
}

impl SslMode {
    /// Valeur `sslmode` comprise par libpq (pg_dump / pg_restore)
    pub fn as_libpq(self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
        }
    }
}

impl std::str::FromStr for SslMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "disable" | "off" | "false" | "no" => Ok(SslMode::Disable),
            "prefer" => Ok(SslMode::Prefer),
            "require" | "on" | "true" | "yes" => Ok(SslMode::Require),
            _ => Err(format!("Invalid SSL mode: {}. Use: disable, prefer, require", s)),
        }
    }
}

/// Configuration de la base de données
///
/// `url` (chaîne de connexion) prend le pas sur les champs individuels.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: Option<String>,
    pub pool_size: usize,
    pub ssl_mode: SslMode,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".into(),
            port: 5432,
            dbname: "geo".into(),
            user: "postgres".into(),
            password: None,
            pool_size: 16,
            ssl_mode: SslMode::Disable,
        }
    }
}

impl DatabaseConfig {
    /// Charge la configuration depuis les variables d'environnement
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Charge la configuration depuis une source clé/valeur quelconque
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            url: lookup("PGURL").filter(|u| !u.trim().is_empty()),
            host: lookup("PGHOST").unwrap_or(defaults.host),
            port: lookup("PGPORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            dbname: lookup("PGDATABASE").unwrap_or(defaults.dbname),
            user: lookup("PGUSER").unwrap_or(defaults.user),
            password: lookup("PGPASSWORD"),
            pool_size: lookup("POOL_SIZE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.pool_size),
            ssl_mode: lookup("PGSSLMODE")
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
        }
    }

    /// Chaîne de connexion libpq pour les outils externes, toujours sans
    /// mot de passe: celui-ci passe par `PGPASSWORD` (voir `password()`).
    ///
    /// # Errors
    /// Si `url` n'est pas une chaîne de connexion PostgreSQL valide
    pub fn conninfo(&self) -> Result<String, tokio_postgres::Error> {
        let Some(url) = &self.url else {
            return Ok(format!(
                "host={} port={} dbname={} user={} sslmode={}",
                quote_conninfo(&self.host),
                self.port,
                quote_conninfo(&self.dbname),
                quote_conninfo(&self.user),
                self.ssl_mode.as_libpq()
            ));
        };

        let parsed: tokio_postgres::Config = url.parse()?;
        let mut parts = Vec::new();

        let hosts: Vec<String> = parsed
            .get_hosts()
            .iter()
            .map(|host| match host {
                Host::Tcp(name) => name.clone(),
                #[cfg(unix)]
                Host::Unix(path) => path.display().to_string(),
            })
            .collect();
        if !hosts.is_empty() {
            parts.push(format!("host={}", quote_conninfo(&hosts.join(","))));
        }
        let ports: Vec<String> = parsed.get_ports().iter().map(|p| p.to_string()).collect();
        if !ports.is_empty() {
            parts.push(format!("port={}", ports.join(",")));
        }
        if let Some(dbname) = parsed.get_dbname() {
            parts.push(format!("dbname={}", quote_conninfo(dbname)));
        }
        if let Some(user) = parsed.get_user() {
            parts.push(format!("user={}", quote_conninfo(user)));
        }
        let sslmode = match parsed.get_ssl_mode() {
            PgSslMode::Disable => "disable",
            PgSslMode::Require => "require",
            _ => "prefer",
        };
        parts.push(format!("sslmode={}", sslmode));

        Ok(parts.join(" "))
    }

    /// Mot de passe effectif: celui de `url` s'il y en a un, sinon `PGPASSWORD`
    pub fn password(&self) -> Option<String> {
        self.url
            .as_deref()
            .and_then(|url| url.parse::<tokio_postgres::Config>().ok())
            .and_then(|parsed| {
                parsed
                    .get_password()
                    .map(|raw| String::from_utf8_lossy(raw).into_owned())
            })
            .or_else(|| self.password.clone())
    }

    /// Description lisible de la cible, sans secret
    pub fn describe(&self) -> String {
        match &self.url {
            Some(_) => format!("PGURL (SSL: {:?})", self.ssl_mode),
            None => format!(
                "{}@{}:{}/{} (SSL: {:?})",
                self.user, self.host, self.port, self.dbname, self.ssl_mode
            ),
        }
    }
}

/// Cite une valeur de conninfo libpq si nécessaire
fn quote_conninfo(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '\'' || c == '\\');
    if !needs_quotes {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}

/// Crée la configuration TLS pour rustls
fn make_tls_connector() -> Result<MakeRustlsConnect> {
    let root_store = rustls::RootCertStore::from_iter(
        webpki_roots::TLS_SERVER_ROOTS.iter().cloned()
    );

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(MakeRustlsConnect::new(config))
}

/// Mode SSL transmis à tokio-postgres: `require` refuse une connexion en clair
fn pg_ssl_mode(mode: SslMode) -> deadpool_postgres::SslMode {
    match mode {
        SslMode::Disable => deadpool_postgres::SslMode::Disable,
        SslMode::Prefer => deadpool_postgres::SslMode::Prefer,
        SslMode::Require => deadpool_postgres::SslMode::Require,
    }
}

/// Configuration deadpool correspondant à `DatabaseConfig`
fn pool_config(config: &DatabaseConfig) -> Config {
    let mut cfg = Config::new();
    match &config.url {
        Some(url) => cfg.url = Some(url.clone()),
        None => {
            cfg.host = Some(config.host.clone());
            cfg.port = Some(config.port);
            cfg.dbname = Some(config.dbname.clone());
            cfg.user = Some(config.user.clone());
            cfg.password = config.password.clone();
        }
    }

    cfg.pool = Some(PoolConfig {
        max_size: config.pool_size,
        timeouts: Timeouts {
            wait: Some(Duration::from_secs(30)),
            create: Some(Duration::from_secs(10)),
            recycle: Some(Duration::from_secs(30)),
        },
        ..Default::default()
    });
    cfg.ssl_mode = Some(pg_ssl_mode(config.ssl_mode));
    cfg
}

/// Crée un pool de connexions
pub async fn create_pool(config: &DatabaseConfig) -> Result<Pool> {
    let cfg = pool_config(config);
    match config.ssl_mode {
        SslMode::Disable => {
            cfg.create_pool(Some(Runtime::Tokio1), NoTls)
                .context("Failed to create database pool")
        }
        SslMode::Prefer | SslMode::Require => {
            let tls = make_tls_connector()?;
            cfg.create_pool(Some(Runtime::Tokio1), tls)
                .context("Failed to create database pool with TLS")
        }
    }
}

/// Teste la connexion à la base
pub async fn test_connection(pool: &Pool) -> Result<()> {
    let client = pool
        .get()
        .await
        .context("Failed to get connection from pool")?;
    client
        .execute("SELECT 1", &[])
        .await
        .context("Connection test failed")?;
    Ok(())
}

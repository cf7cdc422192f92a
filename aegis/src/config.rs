//! Locating and loading `aegis.config.ron`.

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::controller::Aegis;

pub const CONFIG_ENV: &str = "AEGIS_CONFIG";
pub const SMTP_PASSWORD_ENV: &str = "AEGIS_SMTP_PASSWORD";
pub const WEBHOOK_SECRET_ENV: &str = "AEGIS_WEBHOOK_SECRET";

/// Find the configuration file using the following precedence:
/// 1. an explicit path (the `--config` flag)
/// 2. `AEGIS_CONFIG` environment variable
/// 3. ./aegis.config.ron (current working directory)
/// 4. /etc/aegis/aegis.config.ron (system-wide config)
///
/// # Errors
///
/// Fails if an explicitly named file does not exist, or no candidate does.
pub fn find_config_file(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        anyhow::bail!("Config file does not exist: {}", path.display());
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = vec![
        PathBuf::from("./aegis.config.ron"),
        PathBuf::from("/etc/aegis/aegis.config.ron"),
    ];

    for path in &default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}

/// Parse a configuration document, then apply secrets from `lookup`.
///
/// # Errors
///
/// Fails if the document is not a valid `Aegis(...)` RON value.
pub fn parse(
    contents: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Aegis> {
    let mut aegis: Aegis = ron::from_str(contents)?;

    let secret = |name| lookup(name).filter(|value: &String| !value.is_empty());

    if let Some(password) = secret(SMTP_PASSWORD_ENV) {
        aegis.smtp.password = Some(password);
    }
    if let Some(secret) = secret(WEBHOOK_SECRET_ENV) {
        aegis.webhook.secret = Some(secret);
    }

    Ok(aegis)
}

/// Read and parse the configuration at `path`, taking secrets from the
/// environment.
///
/// # Errors
///
/// Fails if the file cannot be read or parsed.
pub fn load(path: &Path) -> anyhow::Result<Aegis> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;

    parse(&contents, |name| std::env::var(name).ok())
        .with_context(|| format!("Invalid config in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use aegis_delivery::TlsMode;
    use aegis_queue::QueueConfig;
    use pretty_assertions::assert_eq;

    use super::*;

    const CONFIG: &str = r#"
Aegis (
    queue: File(
        path: "/srv/aegis/queue",
        lease_secs: 120,
    ),
    ledger: (
        path: "/srv/aegis/failed",
        retention_days: Some(30),
    ),
    worker: (
        poll_interval_ms: 250,
        retry: Some((
            max_attempts: 3,
        )),
    ),
    smtp: (
        host: "smtp.example.com",
        tls: Tls,
        username: Some("mailer"),
        password: Some("from-file"),
        from_address: "noreply@example.com",
    ),
    webhook: (
        url: Some("https://hooks.example.com/aegis"),
    ),
    health: (
        enabled: true,
        listen_address: "127.0.0.1:9090",
    ),
    daemon: (
        pid_file: "/srv/aegis/aegis.pid",
    ),
)
"#;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_parse_full_config() {
        let aegis = parse(CONFIG, no_env).unwrap();

        assert_eq!(
            aegis.queue,
            QueueConfig::File {
                path: PathBuf::from("/srv/aegis/queue"),
                lease_secs: 120
            }
        );
        assert_eq!(aegis.ledger.retention_days, Some(30));
        assert_eq!(aegis.worker.poll_interval_ms, 250);
        assert_eq!(aegis.worker.retry.as_ref().map(|r| r.max_attempts), Some(3));
        assert_eq!(aegis.smtp.tls, TlsMode::Tls);
        assert_eq!(aegis.smtp.port(), 465);
        assert_eq!(aegis.smtp.password.as_deref(), Some("from-file"));
        assert_eq!(aegis.webhook.url.as_deref(), Some("https://hooks.example.com/aegis"));
        assert_eq!(aegis.webhook.timeout_secs, 10);
        assert!(aegis.health.enabled);
        assert_eq!(aegis.daemon.pid_file, PathBuf::from("/srv/aegis/aegis.pid"));
        assert_eq!(aegis.daemon.stop_timeout_secs, 30);
    }

    #[test]
    fn test_everything_defaults() {
        let aegis = parse("Aegis()", no_env).unwrap();

        assert_eq!(aegis.queue, QueueConfig::default());
        assert_eq!(aegis.smtp.from_address, "aegis@localhost");
        assert_eq!(aegis.worker.retry, None);
        assert!(!aegis.health.enabled);
        assert_eq!(aegis.webhook.url, None);
    }

    #[test]
    fn test_environment_secrets_win() {
        let env = HashMap::from([
            (SMTP_PASSWORD_ENV, "from-env".to_string()),
            (WEBHOOK_SECRET_ENV, "shh".to_string()),
        ]);

        let aegis = parse(CONFIG, |name| env.get(name).cloned()).unwrap();
        assert_eq!(aegis.smtp.password.as_deref(), Some("from-env"));
        assert_eq!(aegis.webhook.secret.as_deref(), Some("shh"));
    }

    #[test]
    fn test_empty_environment_secret_is_ignored() {
        let aegis = parse(CONFIG, |name| {
            (name == SMTP_PASSWORD_ENV).then(String::new)
        })
        .unwrap();
        assert_eq!(aegis.smtp.password.as_deref(), Some("from-file"));
    }

    #[test]
    fn test_example_config_parses() {
        let aegis = parse(include_str!("../../aegis.config.ron"), no_env).unwrap();

        assert_eq!(aegis.smtp.tls, TlsMode::StartTls);
        assert_eq!(aegis.smtp.port(), 587);
        assert_eq!(aegis.ledger.retention_days, Some(90));
        assert_eq!(aegis.daemon.log_file, Some(PathBuf::from("/var/log/aegis/aegis.log")));
    }

    #[test]
    fn test_unknown_queue_backend_is_rejected() {
        assert!(parse("Aegis(queue: Redis(url: \"redis://\"))", no_env).is_err());
    }

    #[test]
    fn test_explicit_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.ron");
        assert!(find_config_file(Some(&missing)).is_err());

        let present = dir.path().join("aegis.config.ron");
        std::fs::write(&present, "Aegis()").unwrap();
        assert_eq!(find_config_file(Some(&present)).unwrap(), present);
        assert!(load(&present).is_ok());
    }
}

//! `physiogold doctor`: diagnose configuration.

use physiogold_config::AppConfig;
use std::net::SocketAddr;
use std::path::Path;

#[derive(Debug, PartialEq, Eq)]
pub enum Status {
    Ok,
    Warn,
    Fail,
}

#[derive(Debug)]
pub struct Check {
    pub status: Status,
    pub message: String,
}

impl Check {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            message: message.into(),
        }
    }

    fn warn(message: impl Into<String>) -> Self {
        Self {
            status: Status::Warn,
            message: message.into(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            status: Status::Fail,
            message: message.into(),
        }
    }
}

pub fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("PhysioGold Doctor");
    println!("=================\n");

    let checks = diagnose(&super::config_path(config_path));
    for check in &checks {
        let icon = match check.status {
            Status::Ok => "ok  ",
            Status::Warn => "warn",
            Status::Fail => "FAIL",
        };
        println!("  [{icon}] {}", check.message);
    }

    let issues = checks.iter().filter(|c| c.status != Status::Ok).count();
    println!();
    if issues == 0 {
        println!("  All checks passed.");
    } else {
        println!("  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}

pub fn diagnose(path: &Path) -> Vec<Check> {
    let mut checks = Vec::new();

    let config = if path.exists() {
        match AppConfig::load_from(path) {
            Ok(config) => {
                checks.push(Check::ok(format!("Config file valid: {}", path.display())));
                config
            }
            Err(e) => {
                checks.push(Check::fail(format!("Config file invalid: {e}")));
                return checks;
            }
        }
    } else {
        checks.push(Check::warn(format!(
            "No config file at {}; using defaults (run `physiogold init`)",
            path.display()
        )));
        AppConfig::default()
    };

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    match addr.parse::<SocketAddr>() {
        Ok(_) => checks.push(Check::ok(format!("Bind address {addr}"))),
        Err(_) => checks.push(Check::warn(format!(
            "Bind address {addr} is not an IP literal; it will be resolved at startup"
        ))),
    }

    if config.provider.base_url.starts_with("https://") {
        checks.push(Check::ok(format!("Provider endpoint {}", config.provider.base_url)));
    } else {
        checks.push(Check::warn(format!(
            "Provider endpoint {} does not use HTTPS; API keys would be sent in clear text",
            config.provider.base_url
        )));
    }

    checks.push(Check::ok(format!(
        "Model preference: first '{}' model with '{}', fallback {}",
        config.provider.fast_tier_marker,
        config.provider.generation_capability,
        config.provider.fallback_model
    )));

    match (config.prompt.max_corpus_chars, config.prompt.max_history_turns) {
        (None, None) => checks.push(Check::warn(
            "Prompt size is unbounded; large documents or long chats may exceed model limits",
        )),
        (corpus, history) => checks.push(Check::ok(format!(
            "Prompt caps: corpus {}, history {}",
            corpus.map_or("unbounded".into(), |c| format!("{c} chars")),
            history.map_or("unbounded".into(), |h| format!("{h} turns")),
        ))),
    }

    checks
}

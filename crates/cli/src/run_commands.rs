//! `roost run`: a JSON-lines event source on stdin.
//!
//! Each input line is either an event, `{"event": "message", "payload": {...}}`,
//! or a control message, `{"control": "reload"}`. One JSON line is written to
//! stdout per input line. EOF or Ctrl-C disables every feature and exits.

use std::sync::Arc;

use {
    roost_features::FeatureManager,
    serde::Deserialize,
    serde_json::Value,
    tokio::io::{AsyncBufReadExt, BufReader},
    tracing::{info, warn},
};

use crate::{ConfigSource, start_host};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Control {
    Reload,
    Status,
}

#[derive(Debug, PartialEq, Deserialize)]
#[serde(untagged)]
enum Input {
    Control {
        control: Control,
    },
    Event {
        event: String,
        #[serde(default)]
        payload: Value,
    },
}

fn parse_line(line: &str) -> Result<Input, serde_json::Error> {
    serde_json::from_str(line)
}

pub async fn run(source: &ConfigSource) -> anyhow::Result<()> {
    let (manager, _) = start_host(source).await?;
    manager.enable_all().await;
    info!(features = manager.feature_names().len(), "host running, reading events from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("stdin closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let output = handle_line(&manager, source, &line).await;
                println!("{output}");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    let report = manager.disable_all().await;
    info!(
        disabled = report.disabled.len(),
        retained = report.retained.len(),
        "host stopped"
    );
    Ok(())
}

async fn handle_line(manager: &Arc<FeatureManager>, source: &ConfigSource, line: &str) -> Value {
    match parse_line(line) {
        Ok(Input::Event { event, payload }) => {
            let report = manager.dispatch(&event, payload).await;
            serde_json::to_value(report).unwrap_or_else(error_value)
        },
        Ok(Input::Control {
            control: Control::Reload,
        }) => {
            match source.load() {
                Ok(config) => manager.apply_config(&config),
                Err(e) => warn!(error = %e, "failed to re-read config, reloading with previous settings"),
            }
            match manager.reload_all().await {
                Ok(report) => serde_json::to_value(report).unwrap_or_else(error_value),
                Err(e) => error_value(e),
            }
        },
        Ok(Input::Control {
            control: Control::Status,
        }) => {
            let features: Vec<Value> = manager
                .features()
                .iter()
                .map(|f| {
                    serde_json::json!({
                        "name": f.name(),
                        "enabled": f.is_enabled(),
                        "handlers": f.context().handler_count(),
                    })
                })
                .collect();
            serde_json::json!({ "features": features })
        },
        Err(e) => {
            warn!(error = %e, "invalid input line");
            error_value(e)
        },
    }
}

fn error_value(error: impl std::fmt::Display) -> Value {
    serde_json::json!({ "error": error.to_string() })
}

//! CLI commands for feature inspection.

use {clap::Subcommand, roost_features::LoadFailure};

use crate::{ConfigSource, start_host};

#[derive(Subcommand)]
pub enum FeatureAction {
    /// List loaded features and manifests that failed to load.
    List {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show details about a feature.
    Info {
        /// Feature name.
        name: String,
    },
    /// List the declared event catalogue.
    Events,
}

pub async fn handle_features(action: FeatureAction, source: &ConfigSource) -> anyhow::Result<()> {
    let (manager, load) = start_host(source).await?;

    match action {
        FeatureAction::List { json } => {
            let features = manager.features();

            if json {
                let entries: Vec<serde_json::Value> = features
                    .iter()
                    .map(|f| {
                        let meta = f.metadata();
                        serde_json::json!({
                            "name": meta.name,
                            "class": meta.class,
                            "description": meta.description,
                            "disable": meta.disable,
                            "threaded": meta.threaded,
                            "depend": meta.depend,
                            "softdepend": meta.softdepend,
                            "path": f.source_path(),
                        })
                    })
                    .collect();
                let output = serde_json::json!({
                    "features": entries,
                    "failed": load.failed,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else if features.is_empty() && load.failed.is_empty() {
                println!("No features found.");
                println!("Place features in <features_dir>/<name>/FEATURE.md");
            } else {
                for f in &features {
                    let meta = f.metadata();
                    let flags = [
                        meta.disable.then_some("disabled"),
                        meta.threaded.then_some("threaded"),
                    ]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>();
                    let flags = if flags.is_empty() {
                        String::new()
                    } else {
                        format!(" ({})", flags.join(", "))
                    };
                    println!(
                        "  {name} [{class}]: {desc}{flags}",
                        name = meta.name,
                        class = meta.class,
                        desc = meta.description,
                    );
                    if !meta.depend.is_empty() {
                        println!("    ↳ depends on: {}", meta.depend.join(", "));
                    }
                }
                for line in failure_lines(&load.failed) {
                    println!("{line}");
                }
            }
        },
        FeatureAction::Info { name } => {
            let Some(feature) = manager.get_feature(&name) else {
                anyhow::bail!("feature '{name}' not found");
            };

            let meta = feature.metadata();
            println!("Name:        {}", meta.name);
            println!("Class:       {}", meta.class);
            println!("Description: {}", meta.description);
            if !meta.depend.is_empty() {
                println!("Depends:     {}", meta.depend.join(", "));
            }
            if !meta.softdepend.is_empty() {
                println!("Soft deps:   {}", meta.softdepend.join(", "));
            }
            println!("Disabled:    {}", meta.disable);
            println!("Threaded:    {}", meta.threaded);
            println!("Path:        {}", feature.source_path().display());
            println!(
                "Config:      {}",
                serde_json::to_string(feature.context().config_value())?
            );

            if !feature.body().is_empty() {
                println!("\n{}", feature.body());
            }
        },
        FeatureAction::Events => {
            for event in manager.bus().event_names() {
                println!("  {event}");
            }
        },
    }

    Ok(())
}

fn failure_lines(failed: &[LoadFailure]) -> Vec<String> {
    failed
        .iter()
        .map(|f| format!("  ✗ {}: {}", f.path.display(), f.error))
        .collect()
}

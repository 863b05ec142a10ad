//! `word-filter` feature: cancels `message` events containing blocked words.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use {
    anyhow::Result,
    async_trait::async_trait,
    roost_common::events::{Event, Flow},
    serde::Deserialize,
    tracing::info,
};

use crate::feature::{Feature, FeatureContext};

pub const CLASS: &str = "word-filter";

/// Runs ahead of ordinary handlers.
pub const PRIORITY: i32 = 100;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WordFilterConfig {
    pub words: Vec<String>,
}

pub struct WordFilter {
    /// Lowercased.
    words: Arc<Vec<String>>,
    blocked: Arc<AtomicU64>,
}

impl WordFilter {
    pub fn new(config: WordFilterConfig) -> Self {
        let words = config
            .words
            .iter()
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        Self {
            words: Arc::new(words),
            blocked: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn from_context(ctx: &FeatureContext) -> crate::Result<Self> {
        Ok(Self::new(ctx.config()?))
    }

    /// Messages canceled since load.
    pub fn blocked_count(&self) -> u64 {
        self.blocked.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Feature for WordFilter {
    async fn on_enable(&self, ctx: &FeatureContext) -> Result<()> {
        let words = Arc::clone(&self.words);
        let blocked = Arc::clone(&self.blocked);
        let feature = ctx.name().to_string();

        ctx.register_handler(
            "message",
            move |event: Event| {
                let words = Arc::clone(&words);
                let blocked = Arc::clone(&blocked);
                let feature = feature.clone();
                async move {
                    let Some(content) = event.payload_str("content") else {
                        return Ok::<_, anyhow::Error>(Flow::Continue);
                    };
                    let content = content.to_lowercase();
                    match words.iter().find(|w| content.contains(w.as_str())) {
                        Some(word) => {
                            blocked.fetch_add(1, Ordering::Relaxed);
                            info!(feature = %feature, word = %word, "message blocked");
                            Ok(Flow::Cancel)
                        },
                        None => Ok(Flow::Continue),
                    }
                }
            },
            PRIORITY,
            false,
        )?;
        Ok(())
    }
}

//! `auto-reply` feature: answers `message` events that contain a trigger
//! phrase. Replies go to an in-memory outbox the host drains.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use {
    anyhow::Result,
    async_trait::async_trait,
    roost_common::events::{Event, Flow},
    serde::{Deserialize, Serialize},
    tracing::info,
};

use crate::feature::{Feature, FeatureContext};

pub const CLASS: &str = "auto-reply";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutoReplyConfig {
    /// Trigger phrase → reply text.
    pub triggers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub trigger: String,
    pub text: String,
    pub channel: Option<String>,
}

pub struct AutoReply {
    /// Lowercased triggers in sorted order.
    triggers: Arc<Vec<(String, String)>>,
    outbox: Arc<Mutex<Vec<Reply>>>,
}

impl AutoReply {
    pub fn new(config: AutoReplyConfig) -> Self {
        let triggers = config
            .triggers
            .into_iter()
            .map(|(trigger, reply)| (trigger.trim().to_lowercase(), reply))
            .filter(|(trigger, _)| !trigger.is_empty())
            .collect();
        Self {
            triggers: Arc::new(triggers),
            outbox: Arc::default(),
        }
    }

    pub fn from_context(ctx: &FeatureContext) -> crate::Result<Self> {
        Ok(Self::new(ctx.config()?))
    }

    /// Replies produced so far.
    pub fn replies(&self) -> Vec<Reply> {
        self.outbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Take and clear the outbox.
    pub fn drain_replies(&self) -> Vec<Reply> {
        std::mem::take(&mut *self.outbox.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

#[async_trait]
impl Feature for AutoReply {
    async fn on_enable(&self, ctx: &FeatureContext) -> Result<()> {
        let triggers = Arc::clone(&self.triggers);
        let outbox = Arc::clone(&self.outbox);

        ctx.on("message", move |event: Event| {
            let triggers = Arc::clone(&triggers);
            let outbox = Arc::clone(&outbox);
            async move {
                let Some(content) = event.payload_str("content") else {
                    return Ok::<_, anyhow::Error>(Flow::Continue);
                };
                let content = content.to_lowercase();
                if let Some((trigger, text)) =
                    triggers.iter().find(|(t, _)| content.contains(t.as_str()))
                {
                    let reply = Reply {
                        trigger: trigger.clone(),
                        text: text.clone(),
                        channel: event.payload_str("channel").map(str::to_string),
                    };
                    info!(trigger = %reply.trigger, reply = %reply.text, "auto-reply sent");
                    outbox
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push(reply);
                }
                Ok(Flow::Continue)
            }
        })?;
        Ok(())
    }

    async fn on_disable(&self, _ctx: &FeatureContext) -> Result<()> {
        self.drain_replies();
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use roost_common::events::EventBus;

    use super::*;

    #[tokio::test]
    async fn replies_to_trigger_phrases() {
        let bus = EventBus::new();
        bus.define_event("message");
        let bus = Arc::new(bus);
        let ctx = FeatureContext::new(
            "greeter",
            serde_json::json!({ "triggers": { "Hello": "hi there" } }),
            Arc::clone(&bus),
        );
        let feature = AutoReply::from_context(&ctx).unwrap();
        feature.on_enable(&ctx).await.unwrap();

        bus.dispatch(Event::new(
            "message",
            serde_json::json!({"content": "well HELLO friend", "channel": "general"}),
        ))
        .await;
        bus.dispatch(Event::new("message", serde_json::json!({"content": "bye"})))
            .await;

        assert_eq!(feature.replies(), vec![Reply {
            trigger: "hello".into(),
            text: "hi there".into(),
            channel: Some("general".into()),
        }]);
        assert_eq!(feature.drain_replies().len(), 1);
        assert!(feature.replies().is_empty());
    }

    #[test]
    fn empty_config_is_valid() {
        let ctx = FeatureContext::new("greeter", serde_json::json!({}), Arc::new(EventBus::new()));
        let feature = AutoReply::from_context(&ctx).unwrap();
        assert!(feature.replies().is_empty());
    }
}

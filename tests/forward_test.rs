//! 多机器人 @提及转发集成测试

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

use clawdbot_relay::channels::feishu::{
    ConfiguredIdentityProbe, FeishuMonitor, FeishuOutbound, ForwardGuard, IdentityRegistry, MentionForwarder,
};
use clawdbot_relay::core::message::{
    ChatType, DispatchSummary, InboundContext, ReplyPipeline, SendResult, TextSender,
};
use clawdbot_relay::core::routing::BindingRouter;
use clawdbot_relay::infra::config::ConfigLoader;
use clawdbot_relay::{Config, Result};

const CONFIG: &str = r#"
[forwarding]
enabled = true
max_depth = 1

[channels.feishu.accounts.manager]
bot_name = "Manager"
open_id = "ou_m"

[channels.feishu.accounts.reviewer]
bot_name = "Reviewer"
open_id = "ou_r"
user_id = "u_r"

[routing]
default_agent = "main"

[[routing.bindings]]
agent_id = "review-agent"
priority = 10
[routing.bindings.match]
channel = "feishu"
account_id = "reviewer"
"#;

#[derive(Default)]
struct RecordingPipeline {
    received: Mutex<Vec<InboundContext>>,
    hold: Option<Arc<Notify>>,
}

#[async_trait]
impl ReplyPipeline for RecordingPipeline {
    async fn dispatch(&self, ctx: InboundContext) -> Result<DispatchSummary> {
        if let Some(hold) = &self.hold {
            hold.notified().await;
        }
        self.received.lock().await.push(ctx);
        Ok(DispatchSummary { queued: 1, sent: 1 })
    }
}

struct StaticSender;

#[async_trait]
impl TextSender for StaticSender {
    async fn send_text(&self, _account_id: &str, to: &str, _text: &str) -> Result<SendResult> {
        Ok(SendResult {
            message_id: "om_out".to_string(),
            chat_id: to.trim_start_matches("chat:").to_string(),
        })
    }
}

struct Harness {
    config: Arc<Config>,
    monitor: FeishuMonitor,
    forwarder: MentionForwarder,
    pipeline: Arc<RecordingPipeline>,
}

async fn harness(pipeline: RecordingPipeline) -> Harness {
    let config = Arc::new(ConfigLoader::new().parse(CONFIG).unwrap());
    let registry = Arc::new(IdentityRegistry::new());
    let resolver = Arc::new(BindingRouter::from_config(&config.routing));
    let pipeline = Arc::new(pipeline);

    let monitor = FeishuMonitor::new(
        config.clone(),
        registry.clone(),
        Arc::new(ConfiguredIdentityProbe::new()),
        resolver.clone(),
        pipeline.clone(),
    );
    monitor.start_all().await.unwrap();

    let forwarder = MentionForwarder::new(
        registry,
        ForwardGuard::new(config.forwarding.max_depth),
        resolver,
        pipeline.clone(),
    );

    Harness {
        config,
        monitor,
        forwarder,
        pipeline,
    }
}

#[tokio::test]
async fn test_manager_mentions_reviewer() {
    let h = harness(RecordingPipeline::default()).await;

    h.forwarder
        .forward(&h.config, "@Reviewer please check this", "g1", ChatType::Group, "manager")
        .await;

    let received = h.pipeline.received.lock().await;
    assert_eq!(received.len(), 1);
    let ctx = &received[0];
    assert_eq!(ctx.account_id, "reviewer");
    assert_eq!(ctx.body, "Manager: @Reviewer please check this");
    assert_eq!(ctx.raw_body, "@Reviewer please check this");
    assert_eq!(ctx.chat_id, "g1");
    assert_eq!(ctx.agent_id, "review-agent");
    assert_eq!(ctx.session_key, "agent:review-agent:feishu:group:g1");
}

#[tokio::test]
async fn test_name_needs_word_boundary() {
    let h = harness(RecordingPipeline::default()).await;

    h.forwarder
        .forward(&h.config, "@ReviewerExtra hello", "g1", ChatType::Group, "manager")
        .await;

    assert!(h.pipeline.received.lock().await.is_empty());
}

#[tokio::test]
async fn test_self_mention_never_forwards() {
    let h = harness(RecordingPipeline::default()).await;

    h.forwarder
        .forward(&h.config, "@Manager note to self", "g1", ChatType::Group, "manager")
        .await;

    assert!(h.pipeline.received.lock().await.is_empty());
}

#[tokio::test]
async fn test_direct_conversation_never_forwards() {
    let h = harness(RecordingPipeline::default()).await;

    h.forwarder
        .forward(&h.config, "@Reviewer <at user_id=\"ou_r\">Reviewer</at>", "p1", ChatType::Direct, "manager")
        .await;

    assert!(h.pipeline.received.lock().await.is_empty());
}

#[tokio::test]
async fn test_markup_only_resolves_owner() {
    let h = harness(RecordingPipeline::default()).await;

    h.forwarder
        .forward(&h.config, "<at user_id=\"u_r\"></at> over to you", "g1", ChatType::Group, "manager")
        .await;

    let received = h.pipeline.received.lock().await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].account_id, "reviewer");
    assert_eq!(received[0].mentions[0].open_id, "ou_r");
}

#[tokio::test]
async fn test_identical_text_twice_dispatches_twice() {
    let h = harness(RecordingPipeline::default()).await;

    for _ in 0..2 {
        h.forwarder
            .forward(&h.config, "@Reviewer ping", "g1", ChatType::Group, "manager")
            .await;
    }

    assert_eq!(h.pipeline.received.lock().await.len(), 2);
}

#[tokio::test]
async fn test_reply_chain_stops_at_depth_limit() {
    let hold = Arc::new(Notify::new());
    let h = harness(RecordingPipeline {
        hold: Some(hold.clone()),
        ..Default::default()
    })
    .await;

    let first = h
        .forwarder
        .spawn_forward(&h.config, "@Reviewer check", "g1", ChatType::Group, "manager")
        .expect("first forward admitted");
    assert_eq!(h.forwarder.guard().depth("g1"), 1);

    assert!(h
        .forwarder
        .spawn_forward(&h.config, "@Manager done", "g1", ChatType::Group, "reviewer")
        .is_none());

    hold.notify_one();
    first.await.unwrap();
    assert_eq!(h.forwarder.guard().depth("g1"), 0);

    let again = h
        .forwarder
        .spawn_forward(&h.config, "@Manager done", "g1", ChatType::Group, "reviewer")
        .expect("admitted after restore");
    hold.notify_one();
    again.await.unwrap();

    let received = h.pipeline.received.lock().await;
    assert_eq!(received.len(), 2);
    assert_eq!(received[1].account_id, "manager");
    assert_eq!(received[1].body, "Reviewer: @Manager done");
}

#[tokio::test]
async fn test_stopped_account_is_not_a_target() {
    let h = harness(RecordingPipeline::default()).await;
    h.monitor.stop_account("reviewer").await;

    h.forwarder
        .forward(&h.config, "@Reviewer anyone?", "g1", ChatType::Group, "manager")
        .await;

    assert!(h.pipeline.received.lock().await.is_empty());
}

#[tokio::test]
async fn test_outbound_send_forwards_in_background() {
    let h = harness(RecordingPipeline::default()).await;
    let outbound = FeishuOutbound::new(h.config.clone(), Arc::new(StaticSender), h.forwarder.clone());

    let sent = outbound
        .send("manager", "chat:oc_team", "@Reviewer please review")
        .await
        .unwrap();
    assert_eq!(sent.result.message_id, "om_out");
    sent.forward.expect("group send forwards").await.unwrap();

    let received = h.pipeline.received.lock().await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].chat_id, "oc_team");
    assert_eq!(received[0].chat_type, ChatType::Group);
}

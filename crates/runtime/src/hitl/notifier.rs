//! Non-blocking intervention notices for `NOTIFY`-level actions

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::reasoning::loop_types::ProposedAction;

/// What a human is told about an action that proceeds without review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionNotice {
    pub loop_index: u64,
    pub action: ProposedAction,
    pub reason: String,
    pub reasoning: String,
}

/// Receives notices. Implementations must not block the loop.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: &InterventionNotice);
}

/// Writes notices to the tracing subscriber.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: &InterventionNotice) {
        tracing::info!(
            cycle = notice.loop_index,
            tool = %notice.action.tool_name,
            reason = %notice.reason,
            "Intervention notice"
        );
    }
}

/// Forwards notices to an unbounded channel. Dropped receivers are ignored.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<InterventionNotice>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<InterventionNotice>) {
        let (sender, rx) = mpsc::unbounded_channel();
        (Self { sender }, rx)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, notice: &InterventionNotice) {
        if self.sender.send(notice.clone()).is_err() {
            tracing::debug!(cycle = notice.loop_index, "Notice receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice() -> InterventionNotice {
        InterventionNotice {
            loop_index: 8,
            action: ProposedAction::new("get_weather"),
            reason: "Loop 8 reached threshold 8".into(),
            reasoning: "check again".into(),
        }
    }

    #[tokio::test]
    async fn test_channel_notifier_forwards() {
        let (notifier, mut rx) = ChannelNotifier::new();
        notifier.notify(&notice()).await;
        assert_eq!(rx.recv().await.unwrap().loop_index, 8);
    }

    #[tokio::test]
    async fn test_channel_notifier_survives_dropped_receiver() {
        let (notifier, rx) = ChannelNotifier::new();
        drop(rx);
        notifier.notify(&notice()).await;
        LogNotifier.notify(&notice()).await;
    }
}

use async_trait::async_trait;
use serde_json::json;

use crate::core::redis::RedisHandle;
use crate::db::types::NotificationKind;
use crate::services::ports::Notifier;

/// Publishes student notifications on `notifications:{student_id}`.
#[derive(Clone)]
pub(crate) struct RedisNotifier {
    redis: RedisHandle,
}

impl RedisNotifier {
    pub(crate) fn new(redis: RedisHandle) -> Self {
        Self { redis }
    }
}

pub(crate) fn channel_for(student_id: &str) -> String {
    format!("notifications:{student_id}")
}

#[async_trait]
impl Notifier for RedisNotifier {
    async fn notify(
        &self,
        student_id: &str,
        kind: NotificationKind,
        payload: serde_json::Value,
    ) -> anyhow::Result<()> {
        let message = json!({ "kind": kind.as_str(), "payload": payload }).to_string();

        match self.redis.publish(&channel_for(student_id), &message).await? {
            Some(receivers) => {
                tracing::debug!(student_id, kind = kind.as_str(), receivers, "Notification published");
            }
            None => {
                tracing::info!(
                    student_id,
                    kind = kind.as_str(),
                    "Redis unavailable; notification logged only"
                );
            }
        }

        Ok(())
    }
}

use crate::services::{ForumContext, ForumService, NotificationJob, NotifyEvent, ServiceResult};
use chrono::Utc;

/// Queues a topic notification. Delivery and content belong to the mail queue.
pub fn notify_topic<S: ForumService>(
    service: &S,
    ctx: &ForumContext,
    topic_id: i64,
    event: NotifyEvent,
) -> ServiceResult<()> {
    service.enqueue_notification(NotificationJob {
        topic_id,
        event,
        member_id: ctx.user_info.id,
        queued_at: Utc::now(),
    })
}

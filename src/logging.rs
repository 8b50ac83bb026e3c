use crate::services::{ForumContext, ForumService, ServiceResult};
use serde_json::Value;

/// Writes one moderation log entry attributed to the acting member.
pub fn log_action<S: ForumService>(
    service: &S,
    ctx: &ForumContext,
    action: &str,
    details: Value,
) -> ServiceResult<()> {
    let member = (!ctx.user_info.is_guest).then_some(ctx.user_info.id);
    service.log_action(action, member, &details)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{ForumContext, InMemoryService};
    use serde_json::json;

    #[test]
    fn entry_carries_member_and_details() {
        let service = InMemoryService::default();
        let mut ctx = ForumContext::default();
        ctx.user_info.id = 2;
        ctx.user_info.is_guest = false;
        log_action(&service, &ctx, "lock", json!({"topic": 1, "board": 1})).unwrap();
        let logs = service.list_action_logs().unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].member_id, Some(2));
        assert_eq!(logs[0].details["topic"], 1);
    }
}

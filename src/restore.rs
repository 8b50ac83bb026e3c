use crate::logging::log_action;
use crate::manage_settings::{load_moderation_settings, ModerationSettings};
use crate::notify::notify_topic;
use crate::repair_boards::repair_after_move;
use crate::security::is_not_guest;
use crate::services::{
    ensure, BoardRecord, ForumContext, ForumError, ForumService, NotifyEvent, PreviousBoardMark,
    ServiceResult, SessionCheckMode, StatsKind, TopicMeta, TopicMove,
};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

/// Sends recycled topics back to the board they were removed from.
/// Returns the topics actually restored.
pub fn restore_topics<S: ForumService>(
    service: &S,
    ctx: &ForumContext,
    topic_ids: &[i64],
) -> ServiceResult<Vec<i64>> {
    service.check_session(ctx, SessionCheckMode::Request)?;
    is_not_guest(ctx)?;
    let settings = load_moderation_settings(ctx);
    let recycle = recycle_board_for(service, ctx, &settings)?;

    let ids: Vec<i64> = topic_ids
        .iter()
        .copied()
        .filter(|id| *id > 0)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let topics = service.fetch_topic_meta(&ids)?;

    let mut by_destination: BTreeMap<i64, Vec<TopicMeta>> = BTreeMap::new();
    for id in &ids {
        match topics.get(id) {
            Some(topic) if topic.board_id == recycle.id => match topic.previous_board {
                Some(previous) => by_destination
                    .entry(previous)
                    .or_default()
                    .push(topic.clone()),
                None => debug!(topic_id = id, "no previous board recorded"),
            },
            _ => debug!(topic_id = id, "topic is not in the recycle board"),
        }
    }

    let destination_ids: Vec<i64> = by_destination.keys().copied().collect();
    let destinations = service.fetch_boards(&destination_ids)?;
    let mut restored = Vec::new();
    for (to, group) in by_destination {
        let Some(board) = valid_destination(&destinations, to, recycle.id) else {
            debug!(board_id = to, "previous board cannot take topics back");
            continue;
        };
        let ids: Vec<i64> = group.iter().map(|topic| topic.id).collect();
        let messages = service.fetch_topic_messages(&ids)?;
        let moves: Vec<TopicMove> = ids
            .iter()
            .map(|topic_id| TopicMove {
                topic_id: *topic_id,
                from_board: recycle.id,
            })
            .collect();
        let moved = service.move_topics(&moves, to, PreviousBoardMark::Clear)?;
        let moved_topics: Vec<TopicMeta> = group
            .into_iter()
            .filter(|topic| moved.contains(&topic.id))
            .collect();
        repair_after_move(service, &recycle, board, &moved_topics, &messages)?;
        for topic in &moved_topics {
            log_action(
                service,
                ctx,
                "restore_topic",
                json!({ "topic": topic.id, "board": recycle.id, "board_to": to }),
            )?;
            notify_topic(service, ctx, topic.id, NotifyEvent::Restore)?;
        }
        restored.extend(moved);
    }

    if !restored.is_empty() {
        service.recount_stats(StatsKind::Topic)?;
        service.recount_stats(StatsKind::Message)?;
    }
    info!(requested = ids.len(), restored = restored.len(), "restored recycled topics");
    Ok(restored)
}

fn recycle_board_for<S: ForumService>(
    service: &S,
    ctx: &ForumContext,
    settings: &ModerationSettings,
) -> ServiceResult<BoardRecord> {
    let recycle = settings
        .active_recycle_board()
        .ok_or_else(|| ForumError::Validation("recycle_disabled".into()))?;
    let grants = service.boards_allowed_to(ctx, &["move_any".to_string()])?;
    ensure(
        grants
            .get("move_any")
            .is_some_and(|grant| grant.covers(recycle)),
        ForumError::PermissionDenied("move_any".into()),
    )?;
    service
        .fetch_boards(&[recycle])?
        .remove(&recycle)
        .ok_or_else(|| ForumError::Validation("recycle_no_valid_board".into()))
}

fn valid_destination(
    boards: &HashMap<i64, BoardRecord>,
    board_id: i64,
    recycle: i64,
) -> Option<&BoardRecord> {
    boards
        .get(&board_id)
        .filter(|board| !board.is_redirect && board.id != recycle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manage_settings::save_moderation_settings;
    use crate::repair_boards::find_counter_drift;
    use crate::security::{create_session_token, SESSION_TOKEN_VAR};
    use crate::services::InMemoryService;

    fn moderator(service: &InMemoryService) -> ForumContext {
        let mut ctx = ForumContext::default();
        ctx.user_info.id = 2;
        ctx.user_info.is_guest = false;
        ctx.session.set("session_id", "sess-1");
        let token = create_session_token(&service.session_secret(), "sess-1").unwrap();
        ctx.request.set(SESSION_TOKEN_VAR, token);
        save_moderation_settings(
            &mut ctx,
            ModerationSettings {
                recycle_enable: true,
                recycle_board: Some(3),
                ..Default::default()
            },
        )
        .unwrap();
        ctx
    }

    fn recycle(service: &InMemoryService, topic_id: i64, from: i64) {
        let topic = service.topic(topic_id).unwrap();
        let messages = service.fetch_topic_messages(&[topic_id]).unwrap();
        service
            .move_topics(
                &[TopicMove {
                    topic_id,
                    from_board: from,
                }],
                3,
                PreviousBoardMark::Record,
            )
            .unwrap();
        let from = service.board(from).unwrap();
        let bin = service.board(3).unwrap();
        repair_after_move(service, &from, &bin, &[topic], &messages).unwrap();
    }

    #[test]
    fn restores_into_previous_board() {
        let service = InMemoryService::new_with_sample();
        recycle(&service, 1, 1);
        assert_eq!(service.member(1).unwrap().posts, 0);

        let ctx = moderator(&service);
        let restored = restore_topics(&service, &ctx, &[1]).unwrap();
        assert_eq!(restored, vec![1]);
        let topic = service.topic(1).unwrap();
        assert_eq!(topic.board_id, 1);
        assert_eq!(topic.previous_board, None);
        assert_eq!(service.member(1).unwrap().posts, 1);
        assert!(find_counter_drift(&service).unwrap().is_clean());
        let logs = service.list_action_logs().unwrap();
        assert_eq!(logs[0].action, "restore_topic");
        assert_eq!(logs[0].details["board_to"], 1);
    }

    #[test]
    fn redirect_previous_board_is_skipped() {
        let service = InMemoryService::new_with_sample();
        recycle(&service, 1, 1);
        service.set_previous_board(1, Some(4));
        let ctx = moderator(&service);
        assert!(restore_topics(&service, &ctx, &[1]).unwrap().is_empty());
        assert_eq!(service.topic(1).unwrap().board_id, 3);
    }

    #[test]
    fn needs_move_rights_on_the_recycle_board() {
        let service = InMemoryService::new_with_sample();
        let mut ctx = moderator(&service);
        ctx.user_info.id = 3;
        assert!(matches!(
            restore_topics(&service, &ctx, &[1]),
            Err(ForumError::PermissionDenied(_))
        ));
    }

    #[test]
    fn bad_token_mutates_nothing() {
        let service = InMemoryService::new_with_sample();
        recycle(&service, 1, 1);
        let mut ctx = moderator(&service);
        ctx.request.set(SESSION_TOKEN_VAR, "forged");
        assert!(matches!(
            restore_topics(&service, &ctx, &[1]),
            Err(ForumError::InvalidSession)
        ));
        assert_eq!(service.topic(1).unwrap().board_id, 3);
    }
}

use crate::manage_settings::ModerationSettings;
use crate::mod_actions::{
    required_permissions, BoardRestriction, QuickAction, APPROVE_PERMISSION, POST_NEW_PERMISSION,
};
use crate::mod_request::{ActionMap, QuickModRequest};
use crate::services::{
    BoardGrant, BoardRecord, ForumContext, ForumError, ForumService, LockState, ServiceResult,
    TopicMeta,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

#[derive(Clone, Debug, Default)]
pub struct PermissionCache {
    grants: HashMap<String, BoardGrant>,
}

impl PermissionCache {
    pub fn new(grants: HashMap<String, BoardGrant>) -> Self {
        Self { grants }
    }

    pub fn covers(&self, permission: &str, board_id: i64) -> bool {
        self.grants
            .get(permission)
            .map(|grant| grant.covers(board_id))
            .unwrap_or(false)
    }

    pub fn revoke(&mut self, permission: &str) {
        self.grants
            .insert(permission.to_string(), BoardGrant::none());
    }

    pub fn has_any_scope(&self, action: QuickAction, board_id: i64) -> bool {
        action
            .requirement()
            .any
            .map(|permission| self.covers(permission, board_id))
            .unwrap_or(false)
    }
}

#[derive(Clone, Debug, Default)]
pub struct AuthorizedBatch {
    pub actions: ActionMap,
    /// Topic to destination board, for surviving moves only.
    pub move_targets: BTreeMap<i64, i64>,
    pub boards_can: PermissionCache,
    /// Set when removals go to the recycle bin.
    pub recycle_board: Option<BoardRecord>,
}

impl AuthorizedBatch {
    pub fn bucket(&self, action: QuickAction) -> Vec<i64> {
        self.actions
            .iter()
            .filter(|(_, requested)| **requested == action)
            .map(|(topic_id, _)| *topic_id)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

pub fn authorize<S: ForumService>(
    service: &S,
    ctx: &ForumContext,
    settings: &ModerationSettings,
    request: &QuickModRequest,
    mut actions: ActionMap,
) -> ServiceResult<AuthorizedBatch> {
    let pinned_board = ctx.board_id;

    let restore_allowed_here = match (settings.active_recycle_board(), pinned_board) {
        (Some(recycle), Some(board)) => recycle == board,
        (Some(_), None) => true,
        (None, _) => false,
    };
    if !restore_allowed_here {
        actions.retain(|topic_id, action| {
            let keep = *action != QuickAction::Restore;
            if !keep {
                debug!(topic_id, "restore outside the recycle board");
            }
            keep
        });
    }
    if actions.is_empty() {
        return Ok(AuthorizedBatch::default());
    }

    let requested: BTreeSet<QuickAction> = actions.values().copied().collect();
    let permissions = required_permissions(requested.iter().copied());
    let mut grants = service.boards_allowed_to(ctx, &permissions)?;
    if let Some(board) = pinned_board {
        for grant in grants.values_mut() {
            *grant = grant.narrow_to(board);
        }
    }
    let mut boards_can = PermissionCache::new(grants);

    if requested.contains(&QuickAction::Move)
        && !ctx.user_info.is_admin
        && !settings.topic_move_any
    {
        let post_new = service
            .boards_allowed_to(ctx, &[POST_NEW_PERMISSION.to_string()])?
            .remove(POST_NEW_PERMISSION)
            .unwrap_or_default();
        let post_new = match pinned_board {
            Some(board) => post_new.without(board),
            None => post_new,
        };
        if post_new.is_empty() {
            debug!("no board to move into; move revoked for this request");
            boards_can.revoke("move_any");
            boards_can.revoke("move_own");
        }
    }

    let topic_ids: Vec<i64> = actions.keys().copied().collect();
    let topics = service.fetch_topic_meta(&topic_ids)?;

    actions.retain(|topic_id, action| match topics.get(topic_id) {
        None => {
            debug!(topic_id, "topic no longer exists");
            false
        }
        Some(topic) => match rejection(ctx, settings, &boards_can, pinned_board, *action, topic) {
            Some(reason) => {
                debug!(topic_id, action = %action, reason, "dropping quick moderation action");
                false
            }
            None => true,
        },
    });

    let move_targets = resolve_move_targets(service, request, &mut actions, &topics)?;
    let recycle_board = match settings.active_recycle_board() {
        Some(id) if actions.values().any(|action| *action == QuickAction::Remove) => Some(
            service
                .fetch_boards(&[id])?
                .remove(&id)
                .ok_or_else(|| ForumError::Validation("recycle_no_valid_board".into()))?,
        ),
        _ => None,
    };

    Ok(AuthorizedBatch {
        actions,
        move_targets,
        boards_can,
        recycle_board,
    })
}

fn rejection(
    ctx: &ForumContext,
    settings: &ModerationSettings,
    boards_can: &PermissionCache,
    pinned_board: Option<i64>,
    action: QuickAction,
    topic: &TopicMeta,
) -> Option<&'static str> {
    let board = topic.board_id;
    if pinned_board.is_some_and(|pinned| pinned != board) {
        return Some("topic is not in this board");
    }
    if settings.postmod_active && !topic.approved && !boards_can.covers(APPROVE_PERMISSION, board)
    {
        return Some("unapproved topic");
    }

    let requirement = action.requirement();
    if requirement.members_only {
        return ctx.user_info.is_guest.then_some("guests cannot do this");
    }
    if requirement.restriction == BoardRestriction::RecycleBoard
        && !settings.is_recycle_board(board)
    {
        return Some("topic is not in the recycle board");
    }

    let any_scope = boards_can.has_any_scope(action, board);
    let own_scope = !any_scope
        && topic.member_started == ctx.user_info.id
        && !ctx.user_info.is_guest
        && requirement
            .own
            .map(|permission| boards_can.covers(permission, board))
            .unwrap_or(false);
    if !any_scope && !own_scope {
        return Some("not permitted");
    }
    if action == QuickAction::Lock && own_scope && topic.locked == LockState::LockedByModerator {
        return Some("locked by a moderator");
    }
    if action == QuickAction::Approve && topic.unapproved_posts == 0 {
        return Some("nothing to approve");
    }
    None
}

fn resolve_move_targets<S: ForumService>(
    service: &S,
    request: &QuickModRequest,
    actions: &mut ActionMap,
    topics: &HashMap<i64, TopicMeta>,
) -> ServiceResult<BTreeMap<i64, i64>> {
    let wanted: BTreeMap<i64, Option<i64>> = actions
        .iter()
        .filter(|(_, action)| **action == QuickAction::Move)
        .map(|(topic_id, _)| (*topic_id, request.move_destination(*topic_id)))
        .collect();
    if wanted.is_empty() {
        return Ok(BTreeMap::new());
    }

    let destinations: Vec<i64> = wanted
        .values()
        .flatten()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let boards = service.fetch_boards(&destinations)?;

    let mut targets = BTreeMap::new();
    for (topic_id, destination) in wanted {
        let source = topics.get(&topic_id).map(|topic| topic.board_id);
        let verdict = match destination {
            None => Err("no destination"),
            Some(to) => match boards.get(&to) {
                None => Err("destination does not exist"),
                Some(board) if board.is_redirect => Err("destination is a redirect board"),
                Some(_) if source == Some(to) => Err("already in destination"),
                Some(_) => Ok(to),
            },
        };
        match verdict {
            Ok(to) => {
                targets.insert(topic_id, to);
            }
            Err(reason) => {
                debug!(topic_id, reason, "dropping move");
                actions.remove(&topic_id);
            }
        }
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mod_request::normalize;
    use crate::services::InMemoryService;

    fn member(id: i64) -> ForumContext {
        let mut ctx = ForumContext::default();
        ctx.user_info.id = id;
        ctx.user_info.is_guest = false;
        ctx
    }

    fn run(
        service: &InMemoryService,
        ctx: &ForumContext,
        settings: ModerationSettings,
        request: &QuickModRequest,
    ) -> AuthorizedBatch {
        authorize(service, ctx, &settings, request, normalize(request)).unwrap()
    }

    #[test]
    fn owner_keeps_own_topic_only() {
        let service = InMemoryService::new_with_sample();
        let request = QuickModRequest::homogeneous(QuickAction::Remove, &[1, 2]);
        let batch = run(&service, &member(3), ModerationSettings::default(), &request);
        assert_eq!(batch.bucket(QuickAction::Remove), vec![2]);
    }

    #[test]
    fn pinned_board_drops_foreign_topics() {
        let service = InMemoryService::new_with_sample();
        let mut ctx = member(2);
        ctx.board_id = Some(1);
        let request = QuickModRequest::homogeneous(QuickAction::Lock, &[1, 3]);
        let batch = run(&service, &ctx, ModerationSettings::default(), &request);
        assert_eq!(batch.bucket(QuickAction::Lock), vec![1]);
    }

    #[test]
    fn moderator_lock_beats_own_scope() {
        let service = InMemoryService::new_with_sample();
        service.set_topic_lock(2, LockState::LockedByModerator);
        let request = QuickModRequest::homogeneous(QuickAction::Lock, &[2]);
        let batch = run(&service, &member(3), ModerationSettings::default(), &request);
        assert!(batch.is_empty());

        let batch = run(&service, &member(2), ModerationSettings::default(), &request);
        assert_eq!(batch.bucket(QuickAction::Lock), vec![2]);
    }

    #[test]
    fn unapproved_topics_need_approval_rights_under_postmod() {
        let service = InMemoryService::new_with_sample();
        let settings = ModerationSettings {
            postmod_active: true,
            ..Default::default()
        };
        let request = QuickModRequest::homogeneous(QuickAction::Remove, &[4]);
        assert!(run(&service, &member(3), settings, &request).is_empty());
        let batch = run(&service, &member(2), settings, &request);
        assert_eq!(batch.bucket(QuickAction::Remove), vec![4]);
    }

    #[test]
    fn approve_without_pending_posts_is_dropped() {
        let service = InMemoryService::new_with_sample();
        let request = QuickModRequest::homogeneous(QuickAction::Approve, &[1, 4]);
        let batch = run(&service, &member(2), ModerationSettings::default(), &request);
        assert_eq!(batch.bucket(QuickAction::Approve), vec![4]);
    }

    #[test]
    fn moves_to_redirect_or_missing_boards_are_dropped() {
        let service = InMemoryService::new_with_sample();
        let request = QuickModRequest::homogeneous(QuickAction::Move, &[1, 2, 3])
            .with_move_to(2)
            .with_move_tos([(1, 4), (2, 42)]);
        let batch = run(&service, &member(2), ModerationSettings::default(), &request);
        // Topic 3 already lives in board 2.
        assert!(batch.bucket(QuickAction::Move).is_empty());
        assert!(batch.move_targets.is_empty());
    }

    #[test]
    fn move_revoked_when_member_cannot_post_anywhere_else() {
        let service = InMemoryService::new_with_sample();
        service.grant(2, "post_new", BoardGrant::boards([1]));
        let mut ctx = member(2);
        ctx.board_id = Some(1);
        let request = QuickModRequest::homogeneous(QuickAction::Move, &[1]).with_move_to(2);
        assert!(run(&service, &ctx, ModerationSettings::default(), &request).is_empty());

        let settings = ModerationSettings {
            topic_move_any: true,
            ..Default::default()
        };
        let batch = run(&service, &ctx, settings, &request);
        assert_eq!(batch.move_targets.get(&1), Some(&2));
    }

    #[test]
    fn restore_needs_the_recycle_board() {
        let service = InMemoryService::new_with_sample();
        service.insert_topic(9, 3, 3, true);
        let request = QuickModRequest::homogeneous(QuickAction::Restore, &[9, 1]);
        let settings = ModerationSettings {
            recycle_enable: true,
            recycle_board: Some(3),
            ..Default::default()
        };
        let batch = run(&service, &member(2), settings, &request);
        assert_eq!(batch.bucket(QuickAction::Restore), vec![9]);

        let batch = run(&service, &member(2), ModerationSettings::default(), &request);
        assert!(batch.is_empty());
    }

    #[test]
    fn missing_recycle_board_fails_before_anything_runs() {
        let service = InMemoryService::new_with_sample();
        let settings = ModerationSettings {
            recycle_enable: true,
            recycle_board: Some(99),
            ..Default::default()
        };
        let request = QuickModRequest::homogeneous(QuickAction::Remove, &[1]);
        let result = authorize(&service, &member(2), &settings, &request, normalize(&request));
        assert!(matches!(result, Err(ForumError::Validation(_))));

        let request = QuickModRequest::homogeneous(QuickAction::Lock, &[1]);
        let batch = run(&service, &member(2), settings, &request);
        assert_eq!(batch.bucket(QuickAction::Lock), vec![1]);
        assert!(batch.recycle_board.is_none());
    }

    #[test]
    fn recycle_board_resolved_for_removals() {
        let service = InMemoryService::new_with_sample();
        let settings = ModerationSettings {
            recycle_enable: true,
            recycle_board: Some(3),
            ..Default::default()
        };
        let request = QuickModRequest::homogeneous(QuickAction::Remove, &[1]);
        let batch = run(&service, &member(2), settings, &request);
        assert_eq!(batch.recycle_board.map(|board| board.id), Some(3));
    }

    #[test]
    fn guests_cannot_mark_read() {
        let service = InMemoryService::new_with_sample();
        let request = QuickModRequest::homogeneous(QuickAction::MarkRead, &[1]);
        let batch = run(&service, &ForumContext::default(), ModerationSettings::default(), &request);
        assert!(batch.is_empty());
        let batch = run(&service, &member(3), ModerationSettings::default(), &request);
        assert_eq!(batch.bucket(QuickAction::MarkRead), vec![1]);
    }
}

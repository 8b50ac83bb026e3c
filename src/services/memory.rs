use super::{
    ActionLogEntry, BoardCounterDelta, BoardGrant, BoardRecord, ForumContext, ForumError,
    ForumService, ForumStats, LockState, LockUpdate, MemberRecord, MessageRecord,
    NotificationJob, PreviousBoardMark, ServiceResult, SessionCheckMode, StatsKind, TopicMeta,
    TopicMove, TopicReadEntry,
};
use crate::security::verify_session_token;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct InMemoryState {
    boards: BTreeMap<i64, BoardRecord>,
    topics: BTreeMap<i64, TopicMeta>,
    messages: BTreeMap<i64, MessageRecord>,
    members: BTreeMap<i64, MemberRecord>,
    grants: HashMap<i64, HashMap<String, BoardGrant>>,
    read_log: HashMap<(i64, i64), TopicReadEntry>,
    action_logs: Vec<ActionLogEntry>,
    next_action_log_id: i64,
    notifications: Vec<NotificationJob>,
    stats: ForumStats,
    session_secret: String,
}

impl InMemoryState {
    fn board_counts_posts(&self, board_id: i64) -> bool {
        self.boards
            .get(&board_id)
            .map(|board| board.count_posts)
            .unwrap_or(false)
    }
}

/// Process-local forum store. Every trait call runs under one lock, so each
/// primitive is atomic with respect to the others.
#[derive(Clone)]
pub struct InMemoryService {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryService {
    pub fn new() -> Self {
        let state = InMemoryState {
            next_action_log_id: 1,
            session_secret: "session_secret".into(),
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn new_with_sample() -> Self {
        let service = Self::new();
        service.insert_board(BoardRecord {
            id: 1,
            name: "General".into(),
            count_posts: true,
            ..Default::default()
        });
        service.insert_board(BoardRecord {
            id: 2,
            name: "Off-topic".into(),
            count_posts: false,
            ..Default::default()
        });
        service.insert_board(BoardRecord {
            id: 3,
            name: "Recycle Bin".into(),
            count_posts: false,
            ..Default::default()
        });
        service.insert_board(BoardRecord {
            id: 4,
            parent_id: 1,
            name: "Project site".into(),
            is_redirect: true,
            ..Default::default()
        });
        service.insert_member(1, "Alice");
        service.insert_member(2, "Bob");
        service.insert_member(3, "Carol");

        service.insert_topic(1, 1, 1, true);
        service.insert_message(1, 1, 1, true);
        service.insert_message(2, 1, 2, true);
        service.insert_topic(2, 1, 3, true);
        service.insert_message(3, 2, 3, true);
        service.insert_message(4, 2, 3, true);
        service.insert_topic(3, 2, 2, true);
        service.insert_message(5, 3, 2, true);
        service.insert_topic(4, 1, 3, false);
        service.insert_message(6, 4, 3, false);

        service.grant(
            2,
            "make_sticky",
            BoardGrant::boards([1, 2]),
        );
        for permission in ["lock_any", "move_any", "remove_any", "merge_any", "approve_posts"] {
            service.grant(2, permission, BoardGrant::boards([1, 2, 3]));
        }
        for permission in ["lock_own", "remove_own", "move_own"] {
            service.grant(3, permission, BoardGrant::boards([1, 2]));
        }
        for member in [2, 3] {
            service.grant(member, "post_new", BoardGrant::boards([1, 2]));
        }
        service
    }

    fn state(&self) -> ServiceResult<MutexGuard<'_, InMemoryState>> {
        self.state
            .lock()
            .map_err(|_| ForumError::Internal("forum state lock poisoned".into()))
    }

    fn seed(&self) -> MutexGuard<'_, InMemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_session_secret(&self, secret: &str) {
        self.seed().session_secret = secret.to_string();
    }

    pub fn session_secret(&self) -> String {
        self.seed().session_secret.clone()
    }

    pub fn insert_board(&self, board: BoardRecord) {
        self.seed().boards.insert(board.id, board);
    }

    pub fn insert_member(&self, id: i64, name: &str) {
        self.seed().members.insert(
            id,
            MemberRecord {
                id,
                name: name.into(),
                posts: 0,
            },
        );
    }

    /// Adds an empty topic and counts it on its board.
    pub fn insert_topic(&self, id: i64, board_id: i64, member_started: i64, approved: bool) {
        let mut state = self.seed();
        state.topics.insert(
            id,
            TopicMeta {
                id,
                member_started,
                board_id,
                approved,
                ..Default::default()
            },
        );
        if let Some(board) = state.boards.get_mut(&board_id) {
            if approved {
                board.num_topics += 1;
            } else {
                board.unapproved_topics += 1;
            }
        }
    }

    /// Adds a message to an existing topic, updating counters the way posting does.
    pub fn insert_message(&self, id: i64, topic_id: i64, member_id: i64, approved: bool) {
        let mut state = self.seed();
        let Some(board_id) = state.topics.get(&topic_id).map(|topic| topic.board_id) else {
            return;
        };
        state.messages.insert(
            id,
            MessageRecord {
                id,
                topic_id,
                board_id,
                member_id,
                approved,
            },
        );
        if !approved {
            if let Some(topic) = state.topics.get_mut(&topic_id) {
                topic.unapproved_posts += 1;
            }
        }
        let counts_posts = state.board_counts_posts(board_id);
        if let Some(board) = state.boards.get_mut(&board_id) {
            if approved {
                board.num_posts += 1;
            } else {
                board.unapproved_posts += 1;
            }
        }
        if approved && counts_posts {
            if let Some(member) = state.members.get_mut(&member_id) {
                member.posts += 1;
            }
        }
    }

    pub fn grant(&self, member_id: i64, permission: &str, boards: BoardGrant) {
        self.seed()
            .grants
            .entry(member_id)
            .or_default()
            .insert(permission.to_string(), boards);
    }

    pub fn set_topic_lock(&self, topic_id: i64, locked: LockState) {
        if let Some(topic) = self.seed().topics.get_mut(&topic_id) {
            topic.locked = locked;
        }
    }

    pub fn set_previous_board(&self, topic_id: i64, board_id: Option<i64>) {
        if let Some(topic) = self.seed().topics.get_mut(&topic_id) {
            topic.previous_board = board_id;
        }
    }

    pub fn topic(&self, topic_id: i64) -> Option<TopicMeta> {
        self.seed().topics.get(&topic_id).cloned()
    }

    pub fn board(&self, board_id: i64) -> Option<BoardRecord> {
        self.seed().boards.get(&board_id).cloned()
    }

    pub fn member(&self, member_id: i64) -> Option<MemberRecord> {
        self.seed().members.get(&member_id).cloned()
    }

    pub fn read_entry(&self, member_id: i64, topic_id: i64) -> Option<TopicReadEntry> {
        self.seed().read_log.get(&(member_id, topic_id)).copied()
    }

    pub fn notifications(&self) -> Vec<NotificationJob> {
        self.seed().notifications.clone()
    }

    pub fn stats(&self) -> ForumStats {
        self.seed().stats.clone()
    }
}

impl Default for InMemoryService {
    fn default() -> Self {
        Self::new_with_sample()
    }
}

impl ForumService for InMemoryService {
    fn check_session(&self, ctx: &ForumContext, mode: SessionCheckMode) -> ServiceResult<()> {
        let secret = self.state()?.session_secret.clone();
        verify_session_token(ctx, &secret, mode)
    }

    fn boards_allowed_to(
        &self,
        ctx: &ForumContext,
        permissions: &[String],
    ) -> ServiceResult<HashMap<String, BoardGrant>> {
        let state = self.state()?;
        let member_grants = state.grants.get(&ctx.user_info.id);
        Ok(permissions
            .iter()
            .map(|permission| {
                let grant = if ctx.user_info.is_admin
                    || ctx.user_info.permissions.contains(permission)
                {
                    BoardGrant::All
                } else if ctx.user_info.is_guest {
                    BoardGrant::none()
                } else {
                    member_grants
                        .and_then(|grants| grants.get(permission))
                        .cloned()
                        .unwrap_or_default()
                };
                (permission.clone(), grant)
            })
            .collect())
    }

    fn fetch_topic_meta(&self, topic_ids: &[i64]) -> ServiceResult<HashMap<i64, TopicMeta>> {
        let state = self.state()?;
        Ok(topic_ids
            .iter()
            .filter_map(|id| state.topics.get(id).map(|topic| (*id, topic.clone())))
            .collect())
    }

    fn list_topics(&self) -> ServiceResult<Vec<TopicMeta>> {
        Ok(self.state()?.topics.values().cloned().collect())
    }

    fn fetch_boards(&self, board_ids: &[i64]) -> ServiceResult<HashMap<i64, BoardRecord>> {
        let state = self.state()?;
        Ok(board_ids
            .iter()
            .filter_map(|id| state.boards.get(id).map(|board| (*id, board.clone())))
            .collect())
    }

    fn list_boards(&self) -> ServiceResult<Vec<BoardRecord>> {
        Ok(self.state()?.boards.values().cloned().collect())
    }

    fn list_members(&self) -> ServiceResult<Vec<MemberRecord>> {
        Ok(self.state()?.members.values().cloned().collect())
    }

    fn fetch_topic_messages(&self, topic_ids: &[i64]) -> ServiceResult<Vec<MessageRecord>> {
        let state = self.state()?;
        Ok(state
            .messages
            .values()
            .filter(|msg| topic_ids.contains(&msg.topic_id))
            .cloned()
            .collect())
    }

    fn list_messages(&self) -> ServiceResult<Vec<MessageRecord>> {
        Ok(self.state()?.messages.values().cloned().collect())
    }

    fn toggle_sticky(&self, topic_ids: &[i64]) -> ServiceResult<()> {
        let mut state = self.state()?;
        for topic_id in topic_ids {
            if let Some(topic) = state.topics.get_mut(topic_id) {
                topic.is_sticky = !topic.is_sticky;
            }
        }
        Ok(())
    }

    fn toggle_lock(&self, updates: &[LockUpdate]) -> ServiceResult<()> {
        let mut state = self.state()?;
        for update in updates {
            if let Some(topic) = state.topics.get_mut(&update.topic_id) {
                topic.locked = if topic.locked == LockState::Unlocked {
                    update.lock_to
                } else {
                    LockState::Unlocked
                };
            }
        }
        Ok(())
    }

    fn move_topics(
        &self,
        moves: &[TopicMove],
        to_board: i64,
        previous: PreviousBoardMark,
    ) -> ServiceResult<Vec<i64>> {
        let mut state = self.state()?;
        if !state.boards.contains_key(&to_board) {
            return Err(ForumError::Validation("no_board".into()));
        }
        let mut moved = Vec::new();
        for entry in moves {
            let Some(topic) = state.topics.get_mut(&entry.topic_id) else {
                continue;
            };
            if topic.board_id != entry.from_board || topic.board_id == to_board {
                continue;
            }
            match previous {
                PreviousBoardMark::Keep => {}
                PreviousBoardMark::Record => topic.previous_board = Some(topic.board_id),
                PreviousBoardMark::Clear => topic.previous_board = None,
            }
            topic.board_id = to_board;
            moved.push(entry.topic_id);
        }
        for msg in state.messages.values_mut() {
            if moved.contains(&msg.topic_id) {
                msg.board_id = to_board;
            }
        }
        Ok(moved)
    }

    fn remove_topics(&self, topic_ids: &[i64]) -> ServiceResult<()> {
        let mut state = self.state()?;
        for topic_id in topic_ids {
            state.topics.remove(topic_id);
        }
        state
            .messages
            .retain(|_, msg| !topic_ids.contains(&msg.topic_id));
        state
            .read_log
            .retain(|(_, topic_id), _| !topic_ids.contains(topic_id));
        Ok(())
    }

    fn approve_topics(&self, topic_ids: &[i64]) -> ServiceResult<()> {
        let mut state = self.state()?;
        for topic_id in topic_ids {
            if let Some(topic) = state.topics.get_mut(topic_id) {
                topic.approved = true;
                topic.unapproved_posts = 0;
            }
        }
        for msg in state.messages.values_mut() {
            if topic_ids.contains(&msg.topic_id) {
                msg.approved = true;
            }
        }
        Ok(())
    }

    fn adjust_board_counters(
        &self,
        board_id: i64,
        delta: &BoardCounterDelta,
    ) -> ServiceResult<()> {
        let mut state = self.state()?;
        let board = state
            .boards
            .get_mut(&board_id)
            .ok_or_else(|| ForumError::Validation("no_board".into()))?;
        board.num_posts = (board.num_posts + delta.posts).max(0);
        board.num_topics = (board.num_topics + delta.topics).max(0);
        board.unapproved_posts = (board.unapproved_posts + delta.unapproved_posts).max(0);
        board.unapproved_topics = (board.unapproved_topics + delta.unapproved_topics).max(0);
        Ok(())
    }

    fn adjust_member_posts(&self, member_id: i64, delta: i64) -> ServiceResult<()> {
        let mut state = self.state()?;
        if let Some(member) = state.members.get_mut(&member_id) {
            member.posts = (member.posts + delta).max(0);
        }
        Ok(())
    }

    fn fetch_read_log(
        &self,
        member_id: i64,
        topic_ids: &[i64],
    ) -> ServiceResult<HashMap<i64, bool>> {
        let state = self.state()?;
        Ok(topic_ids
            .iter()
            .filter_map(|topic_id| {
                state
                    .read_log
                    .get(&(member_id, *topic_id))
                    .map(|entry| (*topic_id, entry.unwatched))
            })
            .collect())
    }

    fn upsert_read_log(&self, entries: &[TopicReadEntry]) -> ServiceResult<()> {
        let mut state = self.state()?;
        for entry in entries {
            state
                .read_log
                .insert((entry.member_id, entry.topic_id), *entry);
        }
        Ok(())
    }

    fn max_message_id(&self) -> ServiceResult<i64> {
        let state = self.state()?;
        let highest = state.messages.keys().next_back().copied().unwrap_or(0);
        Ok(highest.max(state.stats.max_msg_id))
    }

    fn log_action(
        &self,
        action: &str,
        member_id: Option<i64>,
        details: &Value,
    ) -> ServiceResult<()> {
        let mut state = self.state()?;
        let id = state.next_action_log_id;
        state.next_action_log_id += 1;
        state.action_logs.push(ActionLogEntry {
            id,
            action: action.into(),
            member_id,
            details: details.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn list_action_logs(&self) -> ServiceResult<Vec<ActionLogEntry>> {
        Ok(self.state()?.action_logs.clone())
    }

    fn enqueue_notification(&self, job: NotificationJob) -> ServiceResult<()> {
        self.state()?.notifications.push(job);
        Ok(())
    }

    fn recount_stats(&self, kind: StatsKind) -> ServiceResult<()> {
        let mut state = self.state()?;
        match kind {
            StatsKind::Topic => {
                state.stats.total_topics =
                    state.topics.values().filter(|topic| topic.approved).count() as i64;
            }
            StatsKind::Message => {
                state.stats.total_messages =
                    state.messages.values().filter(|msg| msg.approved).count() as i64;
                let highest = state.messages.keys().next_back().copied().unwrap_or(0);
                state.stats.max_msg_id = state.stats.max_msg_id.max(highest);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_counters_follow_messages() {
        let service = InMemoryService::new_with_sample();
        let general = service.board(1).unwrap();
        assert_eq!(general.num_posts, 4);
        assert_eq!(general.num_topics, 2);
        assert_eq!(general.unapproved_posts, 1);
        assert_eq!(general.unapproved_topics, 1);
        // Off-topic does not count posts.
        assert_eq!(service.member(2).unwrap().posts, 1);
        assert_eq!(service.member(3).unwrap().posts, 2);
    }

    #[test]
    fn admin_and_session_permissions_are_forum_wide() {
        let service = InMemoryService::new_with_sample();
        let mut ctx = ForumContext::default();
        ctx.user_info.id = 3;
        ctx.user_info.is_guest = false;
        ctx.user_info.permissions.insert("make_sticky".into());
        let grants = service
            .boards_allowed_to(&ctx, &["make_sticky".into(), "lock_own".into()])
            .unwrap();
        assert_eq!(grants["make_sticky"], BoardGrant::All);
        assert_eq!(grants["lock_own"], BoardGrant::boards([1, 2]));

        ctx.user_info.is_admin = true;
        let grants = service
            .boards_allowed_to(&ctx, &["merge_any".into()])
            .unwrap();
        assert_eq!(grants["merge_any"], BoardGrant::All);
    }

    #[test]
    fn move_skips_topics_that_changed_board() {
        let service = InMemoryService::new_with_sample();
        let moved = service
            .move_topics(
                &[
                    TopicMove {
                        topic_id: 1,
                        from_board: 1,
                    },
                    TopicMove {
                        topic_id: 3,
                        from_board: 1,
                    },
                ],
                2,
                PreviousBoardMark::Keep,
            )
            .unwrap();
        assert_eq!(moved, vec![1]);
        assert_eq!(service.topic(1).unwrap().board_id, 2);
        assert_eq!(service.topic(3).unwrap().board_id, 2);
        let messages = service.fetch_topic_messages(&[1]).unwrap();
        assert!(messages.iter().all(|msg| msg.board_id == 2));
    }

    #[test]
    fn move_into_missing_board_is_rejected() {
        let service = InMemoryService::new_with_sample();
        let result = service.move_topics(
            &[TopicMove {
                topic_id: 1,
                from_board: 1,
            }],
            99,
            PreviousBoardMark::Keep,
        );
        assert!(matches!(result, Err(ForumError::Validation(_))));
        assert_eq!(service.topic(1).unwrap().board_id, 1);
    }

    #[test]
    fn member_posts_never_go_negative() {
        let service = InMemoryService::new_with_sample();
        service.adjust_member_posts(2, -10).unwrap();
        assert_eq!(service.member(2).unwrap().posts, 0);
    }

    #[test]
    fn lock_toggle_converges() {
        let service = InMemoryService::new_with_sample();
        let update = LockUpdate {
            topic_id: 1,
            lock_to: LockState::LockedByModerator,
        };
        service.toggle_lock(&[update]).unwrap();
        assert_eq!(service.topic(1).unwrap().locked, LockState::LockedByModerator);
        service.toggle_lock(&[update]).unwrap();
        assert_eq!(service.topic(1).unwrap().locked, LockState::Unlocked);
    }
}

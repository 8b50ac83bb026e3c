use crate::logging::log_action;
use crate::manage_settings::ModerationSettings;
use crate::mod_actions::QuickAction;
use crate::mod_filter::AuthorizedBatch;
use crate::notify::notify_topic;
use crate::repair_boards::{repair_after_approval, repair_after_move, repair_after_removal};
use crate::services::{
    BoardRecord, ForumContext, ForumService, LockState, LockUpdate, MessageRecord,
    NotifyEvent, PreviousBoardMark, ServiceResult, TopicMeta, TopicMove, TopicReadEntry,
};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Each executor re-reads its topics before mutating; a topic changed since
/// authorization is skipped.
pub struct Executors<'a, S: ForumService> {
    service: &'a S,
    ctx: &'a ForumContext,
    settings: &'a ModerationSettings,
    batch: &'a AuthorizedBatch,
}

impl<'a, S: ForumService> Executors<'a, S> {
    pub fn new(
        service: &'a S,
        ctx: &'a ForumContext,
        settings: &'a ModerationSettings,
        batch: &'a AuthorizedBatch,
    ) -> Self {
        Self {
            service,
            ctx,
            settings,
            batch,
        }
    }

    fn reload(&self, action: QuickAction) -> ServiceResult<Vec<TopicMeta>> {
        let ids = self.batch.bucket(action);
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut current = self.service.fetch_topic_meta(&ids)?;
        Ok(ids.iter().filter_map(|id| current.remove(id)).collect())
    }

    /// Any-scope on the topic's board, or own-scope on a topic the member started.
    fn may_touch(&self, action: QuickAction, topic: &TopicMeta) -> bool {
        let boards_can = &self.batch.boards_can;
        if boards_can.has_any_scope(action, topic.board_id) {
            return true;
        }
        let owns = !self.ctx.user_info.is_guest && topic.member_started == self.ctx.user_info.id;
        owns && action
            .requirement()
            .own
            .map(|permission| boards_can.covers(permission, topic.board_id))
            .unwrap_or(false)
    }

    fn boards_for<I>(&self, ids: I) -> ServiceResult<HashMap<i64, BoardRecord>>
    where
        I: IntoIterator<Item = i64>,
    {
        let ids: Vec<i64> = ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        self.service.fetch_boards(&ids)
    }

    pub fn sticky(&self) -> ServiceResult<Vec<i64>> {
        let topics = self.reload(QuickAction::Sticky)?;
        if topics.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = topics.iter().map(|topic| topic.id).collect();
        self.service.toggle_sticky(&ids)?;
        for topic in &topics {
            let action = if topic.is_sticky { "unsticky" } else { "sticky" };
            log_action(
                self.service,
                self.ctx,
                action,
                json!({ "topic": topic.id, "board": topic.board_id }),
            )?;
            notify_topic(self.service, self.ctx, topic.id, NotifyEvent::Sticky)?;
        }
        Ok(ids)
    }

    pub fn lock(&self) -> ServiceResult<Vec<i64>> {
        let mut updates = Vec::new();
        let mut was_unlocked = Vec::new();
        for topic in self.reload(QuickAction::Lock)? {
            let any_scope = self
                .batch
                .boards_can
                .has_any_scope(QuickAction::Lock, topic.board_id);
            if !any_scope
                && (!self.may_touch(QuickAction::Lock, &topic)
                    || topic.locked == LockState::LockedByModerator)
            {
                debug!(topic_id = topic.id, "lock no longer permitted");
                continue;
            }
            let lock_to = if any_scope {
                LockState::LockedByModerator
            } else {
                LockState::LockedByOwner
            };
            updates.push(LockUpdate {
                topic_id: topic.id,
                lock_to,
            });
            was_unlocked.push((topic.id, topic.board_id, !topic.locked.is_locked()));
        }
        if updates.is_empty() {
            return Ok(Vec::new());
        }
        self.service.toggle_lock(&updates)?;
        for (topic_id, board_id, locking) in &was_unlocked {
            let (action, event) = if *locking {
                ("lock", NotifyEvent::Lock)
            } else {
                ("unlock", NotifyEvent::Unlock)
            };
            log_action(
                self.service,
                self.ctx,
                action,
                json!({ "topic": topic_id, "board": board_id }),
            )?;
            notify_topic(self.service, self.ctx, *topic_id, event)?;
        }
        Ok(updates.iter().map(|update| update.topic_id).collect())
    }

    pub fn move_topics(&self) -> ServiceResult<Vec<i64>> {
        let mut by_destination: BTreeMap<i64, Vec<TopicMeta>> = BTreeMap::new();
        for topic in self.reload(QuickAction::Move)? {
            let Some(to) = self.batch.move_targets.get(&topic.id).copied() else {
                continue;
            };
            if topic.board_id == to || !self.may_touch(QuickAction::Move, &topic) {
                debug!(topic_id = topic.id, "move no longer applies");
                continue;
            }
            by_destination.entry(to).or_default().push(topic);
        }
        if by_destination.is_empty() {
            return Ok(Vec::new());
        }

        let boards = self.boards_for(
            by_destination
                .iter()
                .flat_map(|(to, topics)| topics.iter().map(|topic| topic.board_id).chain([*to])),
        )?;
        let mut moved_all = Vec::new();
        for (to, topics) in by_destination {
            let Some(to_board) = boards.get(&to) else {
                debug!(board_id = to, "destination vanished");
                continue;
            };
            let mark = if self.settings.is_recycle_board(to) {
                PreviousBoardMark::Record
            } else {
                PreviousBoardMark::Clear
            };
            let moved = self.relocate(&topics, to_board, &boards, mark)?;
            for topic in topics.iter().filter(|topic| moved.contains(&topic.id)) {
                log_action(
                    self.service,
                    self.ctx,
                    "move",
                    json!({ "topic": topic.id, "board_from": topic.board_id, "board_to": to }),
                )?;
                notify_topic(self.service, self.ctx, topic.id, NotifyEvent::Move)?;
            }
            moved_all.extend(moved);
        }
        Ok(moved_all)
    }

    /// Moves `topics` into `to_board` and repairs counters for each source board.
    fn relocate(
        &self,
        topics: &[TopicMeta],
        to_board: &BoardRecord,
        boards: &HashMap<i64, BoardRecord>,
        mark: PreviousBoardMark,
    ) -> ServiceResult<Vec<i64>> {
        let ids: Vec<i64> = topics.iter().map(|topic| topic.id).collect();
        let messages = self.service.fetch_topic_messages(&ids)?;
        let moves: Vec<TopicMove> = topics
            .iter()
            .map(|topic| TopicMove {
                topic_id: topic.id,
                from_board: topic.board_id,
            })
            .collect();
        let moved = self.service.move_topics(&moves, to_board.id, mark)?;

        let mut by_source: BTreeMap<i64, Vec<TopicMeta>> = BTreeMap::new();
        for topic in topics.iter().filter(|topic| moved.contains(&topic.id)) {
            by_source
                .entry(topic.board_id)
                .or_default()
                .push(topic.clone());
        }
        for (from, group) in by_source {
            let from_board = boards.get(&from).cloned().unwrap_or(BoardRecord {
                id: from,
                ..Default::default()
            });
            repair_after_move(self.service, &from_board, to_board, &group, &messages)?;
        }
        Ok(moved)
    }

    pub fn remove(&self) -> ServiceResult<Vec<i64>> {
        let topics: Vec<TopicMeta> = self
            .reload(QuickAction::Remove)?
            .into_iter()
            .filter(|topic| {
                let allowed = self.may_touch(QuickAction::Remove, topic);
                if !allowed {
                    debug!(topic_id = topic.id, "remove no longer permitted");
                }
                allowed
            })
            .collect();
        if topics.is_empty() {
            return Ok(Vec::new());
        }

        let boards = self.boards_for(topics.iter().map(|topic| topic.board_id))?;
        let recycle_board = self.batch.recycle_board.clone();
        let (to_recycle, to_delete): (Vec<TopicMeta>, Vec<TopicMeta>) =
            topics.into_iter().partition(|topic| {
                recycle_board
                    .as_ref()
                    .is_some_and(|bin| bin.id != topic.board_id)
            });

        for topic in &to_recycle {
            log_action(
                self.service,
                self.ctx,
                "remove",
                json!({ "topic": topic.id, "board": topic.board_id }),
            )?;
        }
        for topic in &to_delete {
            log_action(
                self.service,
                self.ctx,
                "remove",
                json!({ "old_topic_id": topic.id, "board": topic.board_id }),
            )?;
        }
        for topic in to_recycle.iter().chain(&to_delete) {
            notify_topic(self.service, self.ctx, topic.id, NotifyEvent::Remove)?;
        }

        let mut removed = Vec::new();
        if let Some(bin) = &recycle_board {
            if !to_recycle.is_empty() {
                removed.extend(self.relocate(&to_recycle, bin, &boards, PreviousBoardMark::Record)?);
            }
        }
        if !to_delete.is_empty() {
            removed.extend(self.hard_delete(&to_delete, &boards)?);
        }
        removed.sort_unstable();
        Ok(removed)
    }

    fn hard_delete(
        &self,
        topics: &[TopicMeta],
        boards: &HashMap<i64, BoardRecord>,
    ) -> ServiceResult<Vec<i64>> {
        let ids: Vec<i64> = topics.iter().map(|topic| topic.id).collect();
        let messages = self.service.fetch_topic_messages(&ids)?;
        self.service.remove_topics(&ids)?;
        for (board_id, group) in group_by_board(topics) {
            if let Some(board) = boards.get(&board_id) {
                repair_after_removal(self.service, board, &group, &messages)?;
            }
        }
        Ok(ids)
    }

    pub fn approve(&self) -> ServiceResult<Vec<i64>> {
        let topics: Vec<TopicMeta> = self
            .reload(QuickAction::Approve)?
            .into_iter()
            .filter(|topic| !topic.approved || topic.unapproved_posts > 0)
            .collect();
        if topics.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = topics.iter().map(|topic| topic.id).collect();
        let messages = self.service.fetch_topic_messages(&ids)?;
        let boards = self.boards_for(topics.iter().map(|topic| topic.board_id))?;
        self.service.approve_topics(&ids)?;
        for (board_id, group) in group_by_board(&topics) {
            if let Some(board) = boards.get(&board_id) {
                let pending: Vec<MessageRecord> = messages
                    .iter()
                    .filter(|msg| group.iter().any(|topic| topic.id == msg.topic_id))
                    .cloned()
                    .collect();
                repair_after_approval(self.service, board, &group, &pending)?;
            }
        }
        for topic in &topics {
            log_action(
                self.service,
                self.ctx,
                "approve_topic",
                json!({ "topic": topic.id, "member": topic.member_started }),
            )?;
            notify_topic(self.service, self.ctx, topic.id, NotifyEvent::Approve)?;
        }
        Ok(ids)
    }

    pub fn mark_read(&self) -> ServiceResult<Vec<i64>> {
        let ids = self.batch.bucket(QuickAction::MarkRead);
        if ids.is_empty() || self.ctx.user_info.is_guest {
            return Ok(Vec::new());
        }
        let member_id = self.ctx.user_info.id;
        let msg_id = self.service.max_message_id()?;
        let unwatched = self.service.fetch_read_log(member_id, &ids)?;
        let entries: Vec<TopicReadEntry> = ids
            .iter()
            .map(|topic_id| TopicReadEntry {
                topic_id: *topic_id,
                member_id,
                msg_id,
                unwatched: unwatched.get(topic_id).copied().unwrap_or(false),
            })
            .collect();
        self.service.upsert_read_log(&entries)?;
        Ok(ids)
    }
}

fn group_by_board(topics: &[TopicMeta]) -> BTreeMap<i64, Vec<TopicMeta>> {
    let mut groups: BTreeMap<i64, Vec<TopicMeta>> = BTreeMap::new();
    for topic in topics {
        groups.entry(topic.board_id).or_default().push(topic.clone());
    }
    groups
}

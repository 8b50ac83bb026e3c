use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::ops::{Add, Neg};
use thiserror::Error;

pub mod memory;

pub use memory::InMemoryService;

pub type ServiceResult<T> = Result<T, ForumError>;

#[derive(Debug, Error)]
pub enum ForumError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("session timeout")]
    SessionTimeout,
    #[error("session verification failed")]
    InvalidSession,
    #[error("validation error: {0}")]
    Validation(String),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Clone, Debug, Default)]
pub struct DataBag {
    inner: HashMap<String, Value>,
}

impl DataBag {
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.inner.get(key)
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: T) {
        self.inner.insert(
            key.to_string(),
            serde_json::to_value(value).unwrap_or(Value::Null),
        );
    }

    pub fn remove(&mut self, key: &str) {
        self.inner.remove(key);
    }

    pub fn bool(&self, key: &str) -> bool {
        self.inner
            .get(key)
            .and_then(|value| value.as_bool())
            .unwrap_or(false)
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.inner.get(key).and_then(|value| value.as_i64())
    }

    pub fn string(&self, key: &str) -> Option<String> {
        self.inner
            .get(key)
            .and_then(|value| value.as_str().map(|s| s.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }
}

#[derive(Clone, Debug, Default)]
pub struct RequestVars {
    data: DataBag,
}

impl RequestVars {
    pub fn new() -> Self {
        Self {
            data: DataBag::new(),
        }
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.data.int(key)
    }

    pub fn string(&self, key: &str) -> Option<String> {
        self.data.string(key)
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: T) {
        self.data.set(key, value);
    }

    pub fn remove(&mut self, key: &str) {
        self.data.remove(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains(key)
    }
}

#[derive(Clone, Debug)]
pub struct UserInfo {
    pub id: i64,
    pub is_guest: bool,
    pub is_admin: bool,
    /// Board-agnostic permissions already resolved for this request.
    pub permissions: HashSet<String>,
    pub name: String,
    pub groups: Vec<i64>,
}

impl Default for UserInfo {
    fn default() -> Self {
        Self {
            id: 0,
            is_guest: true,
            is_admin: false,
            permissions: HashSet::new(),
            name: String::from("Guest"),
            groups: vec![0],
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ForumContext {
    pub scripturl: String,
    pub board_id: Option<i64>,
    pub topic_id: Option<i64>,
    pub mod_settings: DataBag,
    pub context: DataBag,
    pub request: RequestVars,
    pub post_vars: RequestVars,
    pub session: DataBag,
    pub user_info: UserInfo,
}

/// Boards on which a member holds one permission.
///
/// `All` is kept apart from any finite set so a forum-wide grant never has
/// to be expanded into board ids.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum BoardGrant {
    All,
    Boards(BTreeSet<i64>),
}

impl Default for BoardGrant {
    fn default() -> Self {
        BoardGrant::Boards(BTreeSet::new())
    }
}

impl BoardGrant {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn boards<I: IntoIterator<Item = i64>>(ids: I) -> Self {
        BoardGrant::Boards(ids.into_iter().collect())
    }

    pub fn covers(&self, board_id: i64) -> bool {
        match self {
            BoardGrant::All => true,
            BoardGrant::Boards(ids) => ids.contains(&board_id),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            BoardGrant::All => false,
            BoardGrant::Boards(ids) => ids.is_empty(),
        }
    }

    /// Restricts the grant to a single board.
    pub fn narrow_to(&self, board_id: i64) -> Self {
        if self.covers(board_id) {
            BoardGrant::boards([board_id])
        } else {
            BoardGrant::none()
        }
    }

    /// Drops one board from a finite grant. A forum-wide grant stays forum-wide.
    pub fn without(&self, board_id: i64) -> Self {
        match self {
            BoardGrant::All => BoardGrant::All,
            BoardGrant::Boards(ids) => {
                BoardGrant::Boards(ids.iter().copied().filter(|id| *id != board_id).collect())
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockState {
    #[default]
    Unlocked,
    LockedByModerator,
    LockedByOwner,
}

impl LockState {
    pub fn as_i32(self) -> i32 {
        match self {
            LockState::Unlocked => 0,
            LockState::LockedByModerator => 1,
            LockState::LockedByOwner => 2,
        }
    }

    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => LockState::LockedByModerator,
            2 => LockState::LockedByOwner,
            _ => LockState::Unlocked,
        }
    }

    pub fn is_locked(self) -> bool {
        self != LockState::Unlocked
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TopicMeta {
    pub id: i64,
    pub member_started: i64,
    pub board_id: i64,
    pub locked: LockState,
    pub approved: bool,
    pub unapproved_posts: i64,
    pub is_sticky: bool,
    pub previous_board: Option<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BoardRecord {
    pub id: i64,
    pub parent_id: i64,
    pub name: String,
    pub count_posts: bool,
    pub is_redirect: bool,
    pub num_posts: i64,
    pub num_topics: i64,
    pub unapproved_posts: i64,
    pub unapproved_topics: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MessageRecord {
    pub id: i64,
    pub topic_id: i64,
    pub board_id: i64,
    pub member_id: i64,
    pub approved: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MemberRecord {
    pub id: i64,
    pub name: String,
    pub posts: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TopicMove {
    pub topic_id: i64,
    /// Board the caller last saw the topic in; the move is skipped when it changed.
    pub from_board: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreviousBoardMark {
    Keep,
    Record,
    Clear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockUpdate {
    pub topic_id: i64,
    /// State written when the topic is currently unlocked.
    pub lock_to: LockState,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BoardCounterDelta {
    pub posts: i64,
    pub topics: i64,
    pub unapproved_posts: i64,
    pub unapproved_topics: i64,
}

impl BoardCounterDelta {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl Add for BoardCounterDelta {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            posts: self.posts + other.posts,
            topics: self.topics + other.topics,
            unapproved_posts: self.unapproved_posts + other.unapproved_posts,
            unapproved_topics: self.unapproved_topics + other.unapproved_topics,
        }
    }
}

impl Neg for BoardCounterDelta {
    type Output = Self;

    fn neg(self) -> Self {
        Self {
            posts: -self.posts,
            topics: -self.topics,
            unapproved_posts: -self.unapproved_posts,
            unapproved_topics: -self.unapproved_topics,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TopicReadEntry {
    pub topic_id: i64,
    pub member_id: i64,
    pub msg_id: i64,
    pub unwatched: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyEvent {
    Sticky,
    Lock,
    Unlock,
    Move,
    Remove,
    Approve,
    Restore,
}

impl NotifyEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            NotifyEvent::Sticky => "sticky",
            NotifyEvent::Lock => "lock",
            NotifyEvent::Unlock => "unlock",
            NotifyEvent::Move => "move",
            NotifyEvent::Remove => "remove",
            NotifyEvent::Approve => "approve",
            NotifyEvent::Restore => "restore",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NotificationJob {
    pub topic_id: i64,
    pub event: NotifyEvent,
    /// Member who triggered the event; delivery skips them.
    pub member_id: i64,
    pub queued_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatsKind {
    Topic,
    Message,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ForumStats {
    pub total_topics: i64,
    pub total_messages: i64,
    pub max_msg_id: i64,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ActionLogEntry {
    pub id: i64,
    pub action: String,
    pub member_id: Option<i64>,
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionCheckMode {
    Get,
    Post,
    Request,
}

pub trait ForumService {
    fn check_session(&self, ctx: &ForumContext, mode: SessionCheckMode) -> ServiceResult<()>;
    fn boards_allowed_to(
        &self,
        ctx: &ForumContext,
        permissions: &[String],
    ) -> ServiceResult<HashMap<String, BoardGrant>>;
    fn fetch_topic_meta(&self, topic_ids: &[i64]) -> ServiceResult<HashMap<i64, TopicMeta>>;
    fn list_topics(&self) -> ServiceResult<Vec<TopicMeta>>;
    fn fetch_boards(&self, board_ids: &[i64]) -> ServiceResult<HashMap<i64, BoardRecord>>;
    fn list_boards(&self) -> ServiceResult<Vec<BoardRecord>>;
    fn list_members(&self) -> ServiceResult<Vec<MemberRecord>>;
    fn fetch_topic_messages(&self, topic_ids: &[i64]) -> ServiceResult<Vec<MessageRecord>>;
    fn list_messages(&self) -> ServiceResult<Vec<MessageRecord>>;
    /// `is_sticky = CASE WHEN is_sticky THEN false ELSE true END`.
    fn toggle_sticky(&self, topic_ids: &[i64]) -> ServiceResult<()>;
    /// `locked = CASE WHEN locked = 0 THEN lock_to ELSE 0 END`.
    fn toggle_lock(&self, updates: &[LockUpdate]) -> ServiceResult<()>;
    /// Rewrites the board of each topic and its messages. Returns the topics
    /// actually moved; a topic no longer in `from_board` is left alone.
    fn move_topics(
        &self,
        moves: &[TopicMove],
        to_board: i64,
        previous: PreviousBoardMark,
    ) -> ServiceResult<Vec<i64>>;
    fn remove_topics(&self, topic_ids: &[i64]) -> ServiceResult<()>;
    fn approve_topics(&self, topic_ids: &[i64]) -> ServiceResult<()>;
    fn adjust_board_counters(&self, board_id: i64, delta: &BoardCounterDelta)
        -> ServiceResult<()>;
    /// Adds `delta` to the member's post count, never going below zero.
    fn adjust_member_posts(&self, member_id: i64, delta: i64) -> ServiceResult<()>;
    fn fetch_read_log(
        &self,
        member_id: i64,
        topic_ids: &[i64],
    ) -> ServiceResult<HashMap<i64, bool>>;
    fn upsert_read_log(&self, entries: &[TopicReadEntry]) -> ServiceResult<()>;
    fn max_message_id(&self) -> ServiceResult<i64>;
    fn log_action(
        &self,
        action: &str,
        member_id: Option<i64>,
        details: &Value,
    ) -> ServiceResult<()>;
    fn list_action_logs(&self) -> ServiceResult<Vec<ActionLogEntry>>;
    fn enqueue_notification(&self, job: NotificationJob) -> ServiceResult<()>;
    fn recount_stats(&self, kind: StatsKind) -> ServiceResult<()>;
}

pub fn ensure(condition: bool, error: ForumError) -> ServiceResult<()> {
    if condition {
        Ok(())
    } else {
        Err(error)
    }
}

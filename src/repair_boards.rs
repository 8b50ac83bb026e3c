use crate::services::{
    BoardCounterDelta, BoardRecord, ForumContext, ForumService, MessageRecord, ServiceResult,
    TopicMeta,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

/// What a set of topics contributes to its board's counters.
pub fn topic_footprint(topics: &[TopicMeta], messages: &[MessageRecord]) -> BoardCounterDelta {
    let ids: HashSet<i64> = topics.iter().map(|topic| topic.id).collect();
    let mut delta = BoardCounterDelta::default();
    for topic in topics {
        if topic.approved {
            delta.topics += 1;
        } else {
            delta.unapproved_topics += 1;
        }
    }
    for msg in messages.iter().filter(|msg| ids.contains(&msg.topic_id)) {
        if msg.approved {
            delta.posts += 1;
        } else {
            delta.unapproved_posts += 1;
        }
    }
    delta
}

/// Approved messages per member within `topics`.
pub fn member_tallies(topics: &[TopicMeta], messages: &[MessageRecord]) -> BTreeMap<i64, i64> {
    let ids: HashSet<i64> = topics.iter().map(|topic| topic.id).collect();
    let mut tallies = BTreeMap::new();
    for msg in messages
        .iter()
        .filter(|msg| msg.approved && ids.contains(&msg.topic_id))
    {
        *tallies.entry(msg.member_id).or_insert(0) += 1;
    }
    tallies
}

fn adjust_members<S: ForumService>(
    service: &S,
    tallies: &BTreeMap<i64, i64>,
    sign: i64,
) -> ServiceResult<()> {
    for (member_id, count) in tallies {
        service.adjust_member_posts(*member_id, sign * count)?;
    }
    Ok(())
}

/// Shifts counters after `topics` went from `from` to `to`. `messages` is the
/// pre-move message set of those topics.
pub fn repair_after_move<S: ForumService>(
    service: &S,
    from: &BoardRecord,
    to: &BoardRecord,
    topics: &[TopicMeta],
    messages: &[MessageRecord],
) -> ServiceResult<()> {
    if topics.is_empty() {
        return Ok(());
    }
    let footprint = topic_footprint(topics, messages);
    if !footprint.is_zero() {
        service.adjust_board_counters(from.id, &-footprint)?;
        service.adjust_board_counters(to.id, &footprint)?;
    }
    if from.count_posts != to.count_posts {
        let sign = if to.count_posts { 1 } else { -1 };
        adjust_members(service, &member_tallies(topics, messages), sign)?;
    }
    Ok(())
}

/// Counters after a hard delete of `topics` from `board`.
pub fn repair_after_removal<S: ForumService>(
    service: &S,
    board: &BoardRecord,
    topics: &[TopicMeta],
    messages: &[MessageRecord],
) -> ServiceResult<()> {
    let footprint = topic_footprint(topics, messages);
    if !footprint.is_zero() {
        service.adjust_board_counters(board.id, &-footprint)?;
    }
    if board.count_posts {
        adjust_members(service, &member_tallies(topics, messages), -1)?;
    }
    Ok(())
}

/// Counters after every pending message of `topics` in `board` was approved.
/// `topics` and `messages` are the state read before approval.
pub fn repair_after_approval<S: ForumService>(
    service: &S,
    board: &BoardRecord,
    topics: &[TopicMeta],
    messages: &[MessageRecord],
) -> ServiceResult<()> {
    let pending: Vec<MessageRecord> = messages
        .iter()
        .filter(|msg| !msg.approved)
        .map(|msg| MessageRecord {
            approved: true,
            ..msg.clone()
        })
        .collect();
    let newly_visible = topics.iter().filter(|topic| !topic.approved).count() as i64;
    let delta = BoardCounterDelta {
        posts: pending.len() as i64,
        topics: newly_visible,
        unapproved_posts: -(pending.len() as i64),
        unapproved_topics: -newly_visible,
    };
    if !delta.is_zero() {
        service.adjust_board_counters(board.id, &delta)?;
    }
    if board.count_posts {
        adjust_members(service, &member_tallies(topics, &pending), 1)?;
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BoardDrift {
    pub board_id: i64,
    /// Delta that brings the stored counters back in line.
    pub correction: BoardCounterDelta,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MemberDrift {
    pub member_id: i64,
    pub correction: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CounterDrift {
    pub boards: Vec<BoardDrift>,
    pub members: Vec<MemberDrift>,
}

impl CounterDrift {
    pub fn is_clean(&self) -> bool {
        self.boards.is_empty() && self.members.is_empty()
    }

    pub fn len(&self) -> usize {
        self.boards.len() + self.members.len()
    }
}

/// Recounts every board and member counter from the stored topics and messages.
pub fn find_counter_drift<S: ForumService>(service: &S) -> ServiceResult<CounterDrift> {
    let boards = service.list_boards()?;
    let topics = service.list_topics()?;
    let messages = service.list_messages()?;
    let members = service.list_members()?;

    let counting: HashSet<i64> = boards
        .iter()
        .filter(|board| board.count_posts)
        .map(|board| board.id)
        .collect();
    let mut expected: HashMap<i64, BoardCounterDelta> = HashMap::new();
    for topic in &topics {
        let entry = expected.entry(topic.board_id).or_default();
        if topic.approved {
            entry.topics += 1;
        } else {
            entry.unapproved_topics += 1;
        }
    }
    let mut posts: HashMap<i64, i64> = HashMap::new();
    for msg in &messages {
        let entry = expected.entry(msg.board_id).or_default();
        if msg.approved {
            entry.posts += 1;
            if counting.contains(&msg.board_id) {
                *posts.entry(msg.member_id).or_insert(0) += 1;
            }
        } else {
            entry.unapproved_posts += 1;
        }
    }

    let mut drift = CounterDrift::default();
    for board in &boards {
        let want = expected.get(&board.id).copied().unwrap_or_default();
        let stored = BoardCounterDelta {
            posts: board.num_posts,
            topics: board.num_topics,
            unapproved_posts: board.unapproved_posts,
            unapproved_topics: board.unapproved_topics,
        };
        let correction = want + -stored;
        if !correction.is_zero() {
            drift.boards.push(BoardDrift {
                board_id: board.id,
                correction,
            });
        }
    }
    for member in &members {
        let correction = posts.get(&member.id).copied().unwrap_or(0) - member.posts;
        if correction != 0 {
            drift.members.push(MemberDrift {
                member_id: member.id,
                correction,
            });
        }
    }
    Ok(drift)
}

pub fn fix_counter_drift<S: ForumService>(
    service: &S,
    ctx: &mut ForumContext,
) -> ServiceResult<CounterDrift> {
    let drift = find_counter_drift(service)?;
    for board in &drift.boards {
        warn!(board_id = board.board_id, correction = ?board.correction, "board counters drifted");
        service.adjust_board_counters(board.board_id, &board.correction)?;
    }
    for member in &drift.members {
        debug!(member_id = member.member_id, correction = member.correction, "member post count drifted");
        service.adjust_member_posts(member.member_id, member.correction)?;
    }
    ctx.context.set("counter_repair_count", drift.len() as i64);
    Ok(drift)
}

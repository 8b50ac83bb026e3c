use crate::services::ForumError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

pub const APPROVE_PERMISSION: &str = "approve_posts";
pub const POST_NEW_PERMISSION: &str = "post_new";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuickAction {
    Sticky,
    Lock,
    Move,
    Remove,
    Approve,
    Merge,
    Restore,
    MarkRead,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoardRestriction {
    Anywhere,
    /// Only topics sitting in the configured recycle board.
    RecycleBoard,
}

/// Who may run an action, and where.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActionRequirement {
    /// Permission covering every topic in a board.
    pub any: Option<&'static str>,
    /// Permission covering the topics the member started.
    pub own: Option<&'static str>,
    pub restriction: BoardRestriction,
    /// Any logged-in member may use it; no board permission involved.
    pub members_only: bool,
}

impl QuickAction {
    pub const ALL: [QuickAction; 8] = [
        QuickAction::Sticky,
        QuickAction::Lock,
        QuickAction::Move,
        QuickAction::Remove,
        QuickAction::Approve,
        QuickAction::Merge,
        QuickAction::Restore,
        QuickAction::MarkRead,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QuickAction::Sticky => "sticky",
            QuickAction::Lock => "lock",
            QuickAction::Move => "move",
            QuickAction::Remove => "remove",
            QuickAction::Approve => "approve",
            QuickAction::Merge => "merge",
            QuickAction::Restore => "restore",
            QuickAction::MarkRead => "markread",
        }
    }

    pub fn requirement(self) -> ActionRequirement {
        let scoped = |any, own| ActionRequirement {
            any: Some(any),
            own,
            restriction: BoardRestriction::Anywhere,
            members_only: false,
        };
        match self {
            QuickAction::Sticky => scoped("make_sticky", None),
            QuickAction::Lock => scoped("lock_any", Some("lock_own")),
            QuickAction::Move => scoped("move_any", Some("move_own")),
            QuickAction::Remove => scoped("remove_any", Some("remove_own")),
            QuickAction::Approve => scoped(APPROVE_PERMISSION, None),
            QuickAction::Merge => scoped("merge_any", None),
            QuickAction::Restore => ActionRequirement {
                restriction: BoardRestriction::RecycleBoard,
                ..scoped("move_any", None)
            },
            QuickAction::MarkRead => ActionRequirement {
                any: None,
                own: None,
                restriction: BoardRestriction::Anywhere,
                members_only: true,
            },
        }
    }
}

impl fmt::Display for QuickAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuickAction {
    type Err = ForumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        QuickAction::ALL
            .into_iter()
            .find(|action| action.as_str() == value.trim())
            .ok_or_else(|| ForumError::Validation(format!("unknown_action: {value}")))
    }
}

/// Permission names needed to judge `actions`. `approve_posts` is always
/// included because unapproved topics are gated on it regardless of action.
pub fn required_permissions<I>(actions: I) -> Vec<String>
where
    I: IntoIterator<Item = QuickAction>,
{
    let mut names = BTreeSet::new();
    names.insert(APPROVE_PERMISSION);
    for action in actions {
        let requirement = action.requirement();
        names.extend(requirement.any);
        names.extend(requirement.own);
    }
    names.into_iter().map(String::from).collect()
}

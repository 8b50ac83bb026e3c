use crate::mod_actions::QuickAction;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Topic id to the single action requested for it.
pub type ActionMap = BTreeMap<i64, QuickAction>;

/// A quick-moderation submission in either form the board index can send:
/// checkboxes (`topics` + `qaction`) or per-topic icons (`actions`).
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct QuickModRequest {
    pub topics: Vec<i64>,
    pub qaction: Option<String>,
    pub actions: BTreeMap<i64, String>,
    pub move_to: Option<i64>,
    pub move_tos: BTreeMap<i64, i64>,
    pub redirect_url: Option<String>,
    pub start: i64,
}

impl QuickModRequest {
    pub fn homogeneous(action: QuickAction, topics: &[i64]) -> Self {
        Self {
            topics: topics.to_vec(),
            qaction: Some(action.as_str().to_string()),
            ..Default::default()
        }
    }

    pub fn heterogeneous<I>(actions: I) -> Self
    where
        I: IntoIterator<Item = (i64, QuickAction)>,
    {
        Self {
            actions: actions
                .into_iter()
                .map(|(topic, action)| (topic, action.as_str().to_string()))
                .collect(),
            ..Default::default()
        }
    }

    pub fn with_move_to(mut self, board_id: i64) -> Self {
        self.move_to = Some(board_id);
        self
    }

    pub fn with_move_tos<I>(mut self, destinations: I) -> Self
    where
        I: IntoIterator<Item = (i64, i64)>,
    {
        self.move_tos.extend(destinations);
        self
    }

    /// Per-topic destination first, then the shared one.
    pub fn move_destination(&self, topic_id: i64) -> Option<i64> {
        self.move_tos
            .get(&topic_id)
            .copied()
            .or(self.move_to)
            .filter(|board| *board > 0)
    }
}

/// Folds both request forms into one map. The checkbox form is applied last,
/// so it overwrites an icon action submitted for the same topic.
pub fn normalize(request: &QuickModRequest) -> ActionMap {
    let mut canonical = ActionMap::new();
    for (topic_id, name) in &request.actions {
        if *topic_id <= 0 {
            continue;
        }
        match name.parse::<QuickAction>() {
            Ok(action) => {
                canonical.insert(*topic_id, action);
            }
            Err(err) => debug!(topic_id, %err, "ignoring quick moderation entry"),
        }
    }

    if !request.topics.is_empty() {
        let action = request
            .qaction
            .as_deref()
            .and_then(|name| name.parse::<QuickAction>().ok());
        match action {
            Some(action) => {
                for topic_id in request.topics.iter().copied().filter(|id| *id > 0) {
                    canonical.insert(topic_id, action);
                }
            }
            None => debug!(qaction = ?request.qaction, "ignoring topics without a known action"),
        }
    }
    canonical
}

use crate::manage_settings::load_moderation_settings;
use crate::mod_actions::QuickAction;
use crate::mod_executors::Executors;
use crate::mod_filter::{authorize, AuthorizedBatch};
use crate::mod_request::{normalize, QuickModRequest};
use crate::security::SESSION_TOKEN_VAR;
use crate::services::{ForumContext, ForumService, ServiceResult, SessionCheckMode, StatsKind};
use serde::Serialize;
use tracing::info;

/// How a quick moderation batch ends. Merge never redirects; it hands the
/// topics to the interactive merge screen instead.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum QuickModOutcome {
    Redirected { url: String },
    HandedOffToMerge { topics: Vec<i64> },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub sticky: usize,
    pub moved: usize,
    pub removed: usize,
    pub approved: usize,
    pub locked: usize,
    pub marked_read: usize,
}

pub struct QuickModerationController<S: ForumService> {
    service: S,
}

impl<S: ForumService> QuickModerationController<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn quick_moderation(
        &self,
        ctx: &mut ForumContext,
        request: &QuickModRequest,
    ) -> ServiceResult<QuickModOutcome> {
        self.service.check_session(ctx, SessionCheckMode::Request)?;

        ctx.session.remove("topicseen_cache");
        if let Some(board) = request.move_to.filter(|board| *board > 0) {
            ctx.session.set("move_to_topic", board);
        }
        let redirect = redirect_target(ctx, request);

        let actions = normalize(request);
        if actions.is_empty() {
            return Ok(QuickModOutcome::Redirected { url: redirect });
        }
        let settings = load_moderation_settings(ctx);
        let batch = authorize(&self.service, ctx, &settings, request, actions)?;
        if batch.is_empty() {
            return Ok(QuickModOutcome::Redirected { url: redirect });
        }

        let executors = Executors::new(&self.service, ctx, &settings, &batch);
        let summary = BatchSummary {
            sticky: executors.sticky()?.len(),
            moved: executors.move_topics()?.len(),
            removed: executors.remove()?.len(),
            approved: executors.approve()?.len(),
            locked: executors.lock()?.len(),
            marked_read: executors.mark_read()?.len(),
        };

        self.service.recount_stats(StatsKind::Topic)?;
        self.service.recount_stats(StatsKind::Message)?;
        ctx.context.set("quick_mod_summary", summary);
        info!(
            member_id = ctx.user_info.id,
            authorized = batch.actions.len(),
            ?summary,
            "quick moderation batch applied"
        );

        let merge = batch.bucket(QuickAction::Merge);
        if merge.len() >= 2 {
            return Ok(QuickModOutcome::HandedOffToMerge { topics: merge });
        }
        let restore = batch.bucket(QuickAction::Restore);
        if !restore.is_empty() {
            return Ok(QuickModOutcome::Redirected {
                url: restore_url(ctx, &restore),
            });
        }
        Ok(QuickModOutcome::Redirected {
            url: with_anchor(redirect, &batch),
        })
    }
}

fn redirect_target(ctx: &ForumContext, request: &QuickModRequest) -> String {
    if let Some(board) = ctx.board_id {
        return format!("{}?board={}.{}", ctx.scripturl, board, request.start.max(0));
    }
    request
        .redirect_url
        .clone()
        .filter(|url| !url.is_empty())
        .or_else(|| ctx.session.string("old_url"))
        .unwrap_or_else(|| ctx.scripturl.clone())
}

fn restore_url(ctx: &ForumContext, topics: &[i64]) -> String {
    let ids: Vec<String> = topics.iter().map(|id| id.to_string()).collect();
    let token = ctx
        .post_vars
        .string(SESSION_TOKEN_VAR)
        .or_else(|| ctx.request.string(SESSION_TOKEN_VAR))
        .unwrap_or_default();
    format!(
        "{}?action=restoretopic;topics={};{}={}",
        ctx.scripturl,
        ids.join(","),
        SESSION_TOKEN_VAR,
        token
    )
}

/// Anchors the first topic still shown on the listing.
fn with_anchor(url: String, batch: &AuthorizedBatch) -> String {
    if url.contains('#') {
        return url;
    }
    let first = batch
        .actions
        .iter()
        .find(|(_, action)| !matches!(action, QuickAction::Move | QuickAction::Remove))
        .map(|(topic_id, _)| *topic_id);
    match first {
        Some(topic_id) => format!("{url}#topic_{topic_id}"),
        None => url,
    }
}

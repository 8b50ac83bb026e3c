use crate::services::{ForumContext, ForumError, ServiceResult};

/// Forum-wide switches the moderation engine consults.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ModerationSettings {
    /// Post moderation: unapproved topics are hidden from members without `approve_posts`.
    pub postmod_active: bool,
    pub recycle_enable: bool,
    pub recycle_board: Option<i64>,
    /// Lets members move topics even when they cannot start topics anywhere else.
    pub topic_move_any: bool,
}

impl ModerationSettings {
    /// The recycle board, only while recycling is switched on.
    pub fn active_recycle_board(&self) -> Option<i64> {
        if self.recycle_enable {
            self.recycle_board.filter(|board| *board > 0)
        } else {
            None
        }
    }

    pub fn is_recycle_board(&self, board_id: i64) -> bool {
        self.active_recycle_board() == Some(board_id)
    }
}

pub fn save_moderation_settings(
    ctx: &mut ForumContext,
    settings: ModerationSettings,
) -> ServiceResult<()> {
    if settings.recycle_enable && settings.recycle_board.unwrap_or(0) <= 0 {
        return Err(ForumError::Validation("recycle_no_valid_board".into()));
    }
    ctx.mod_settings.set("postmod_active", settings.postmod_active);
    ctx.mod_settings.set("recycle_enable", settings.recycle_enable);
    ctx.mod_settings
        .set("recycle_board", settings.recycle_board.unwrap_or(0));
    ctx.mod_settings.set("topic_move_any", settings.topic_move_any);
    Ok(())
}

pub fn load_moderation_settings(ctx: &ForumContext) -> ModerationSettings {
    ModerationSettings {
        postmod_active: ctx.mod_settings.bool("postmod_active"),
        recycle_enable: ctx.mod_settings.bool("recycle_enable"),
        recycle_board: ctx.mod_settings.int("recycle_board").filter(|id| *id > 0),
        topic_move_any: ctx.mod_settings.bool("topic_move_any"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ForumContext;

    #[test]
    fn save_and_load_moderation_settings() {
        let mut ctx = ForumContext::default();
        let settings = ModerationSettings {
            postmod_active: true,
            recycle_enable: true,
            recycle_board: Some(3),
            topic_move_any: false,
        };
        save_moderation_settings(&mut ctx, settings).unwrap();
        assert_eq!(load_moderation_settings(&ctx), settings);
        assert!(settings.is_recycle_board(3));
    }

    #[test]
    fn recycling_needs_a_board() {
        let mut ctx = ForumContext::default();
        let settings = ModerationSettings {
            recycle_enable: true,
            ..Default::default()
        };
        assert!(save_moderation_settings(&mut ctx, settings).is_err());
    }

    #[test]
    fn disabled_recycling_has_no_recycle_board() {
        let settings = ModerationSettings {
            recycle_enable: false,
            recycle_board: Some(3),
            ..Default::default()
        };
        assert_eq!(settings.active_recycle_board(), None);
        assert!(!settings.is_recycle_board(3));
    }
}

use forum_quickmod::controller::quick_mod::QuickModerationController;
use forum_quickmod::manage_settings::{save_moderation_settings, ModerationSettings};
use forum_quickmod::mod_actions::QuickAction;
use forum_quickmod::mod_request::QuickModRequest;
use forum_quickmod::repair_boards::find_counter_drift;
use forum_quickmod::restore::restore_topics;
use forum_quickmod::security::{create_session_token, SESSION_TOKEN_VAR};
use forum_quickmod::services::{ForumContext, InMemoryService};

fn main() {
    let service = InMemoryService::default();
    let controller = QuickModerationController::new(service.clone());

    let mut ctx = ForumContext::default();
    ctx.scripturl = "https://forum.local/index.php".into();
    ctx.user_info.id = 2;
    ctx.user_info.is_guest = false;
    ctx.user_info.name = "Bob".into();
    ctx.session.set("session_id", "cli-session");
    match create_session_token(&service.session_secret(), "cli-session") {
        Ok(token) => ctx.post_vars.set(SESSION_TOKEN_VAR, token),
        Err(error) => {
            eprintln!("session token -> {error}");
            return;
        }
    }
    let settings = ModerationSettings {
        recycle_enable: true,
        recycle_board: Some(3),
        ..Default::default()
    };
    if let Err(error) = save_moderation_settings(&mut ctx, settings) {
        eprintln!("settings -> {error}");
        return;
    }

    let batch = QuickModRequest::heterogeneous([
        (1, QuickAction::Sticky),
        (2, QuickAction::Lock),
        (3, QuickAction::Remove),
        (4, QuickAction::Approve),
    ]);
    match controller.quick_moderation(&mut ctx, &batch) {
        Ok(outcome) => println!("quick_moderation() -> {outcome:?}"),
        Err(error) => eprintln!("quick_moderation() -> {error}"),
    }

    let merge = QuickModRequest::homogeneous(QuickAction::Merge, &[1, 2]);
    match controller.quick_moderation(&mut ctx, &merge) {
        Ok(outcome) => println!("merge -> {outcome:?}"),
        Err(error) => eprintln!("merge -> {error}"),
    }

    match restore_topics(&service, &ctx, &[3]) {
        Ok(restored) => println!("restore_topics() -> {restored:?}"),
        Err(error) => eprintln!("restore_topics() -> {error}"),
    }

    match find_counter_drift(&service) {
        Ok(drift) if drift.is_clean() => println!("counters consistent"),
        Ok(drift) => println!("counter drift: {drift:?}"),
        Err(error) => eprintln!("drift audit -> {error}"),
    }
}

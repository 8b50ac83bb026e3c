use forum_quickmod::controller::quick_mod::{QuickModOutcome, QuickModerationController};
use forum_quickmod::mod_actions::QuickAction;
use forum_quickmod::mod_request::QuickModRequest;
use forum_quickmod::repair_boards::find_counter_drift;
use forum_quickmod::security::{create_session_token, SESSION_TOKEN_VAR};
use forum_quickmod::services::{
    ForumContext, ForumService, InMemoryService, LockState, NotifyEvent,
};

fn signed_in(service: &InMemoryService, member: i64) -> ForumContext {
    let mut ctx = ForumContext::default();
    ctx.scripturl = "https://forum.local/index.php".into();
    ctx.user_info.id = member;
    ctx.user_info.is_guest = false;
    ctx.session.set("session_id", "sess-it");
    let token = create_session_token(&service.session_secret(), "sess-it").unwrap();
    ctx.post_vars.set(SESSION_TOKEN_VAR, token);
    ctx
}

fn run(
    service: &InMemoryService,
    member: i64,
    request: QuickModRequest,
) -> QuickModOutcome {
    let controller = QuickModerationController::new(service.clone());
    let mut ctx = signed_in(service, member);
    controller.quick_moderation(&mut ctx, &request).unwrap()
}

#[test]
fn sticky_and_lock_toggles_return_to_start() {
    let service = InMemoryService::new_with_sample();
    for _ in 0..2 {
        run(&service, 2, QuickModRequest::homogeneous(QuickAction::Sticky, &[1]));
        run(&service, 2, QuickModRequest::homogeneous(QuickAction::Lock, &[1]));
    }
    let topic = service.topic(1).unwrap();
    assert!(!topic.is_sticky);
    assert_eq!(topic.locked, LockState::Unlocked);

    let actions: Vec<String> = service
        .list_action_logs()
        .unwrap()
        .into_iter()
        .map(|entry| entry.action)
        .collect();
    assert_eq!(actions, vec!["sticky", "lock", "unsticky", "unlock"]);
}

#[test]
fn own_scope_removes_only_own_topics() {
    let service = InMemoryService::new_with_sample();
    run(&service, 3, QuickModRequest::homogeneous(QuickAction::Remove, &[1, 2]));
    assert!(service.topic(1).is_some());
    assert!(service.topic(2).is_none());
    assert!(find_counter_drift(&service).unwrap().is_clean());
}

#[test]
fn moderator_lock_survives_owner_toggle() {
    let service = InMemoryService::new_with_sample();
    run(&service, 2, QuickModRequest::homogeneous(QuickAction::Lock, &[2]));
    assert_eq!(service.topic(2).unwrap().locked, LockState::LockedByModerator);

    run(&service, 3, QuickModRequest::homogeneous(QuickAction::Lock, &[2]));
    assert_eq!(service.topic(2).unwrap().locked, LockState::LockedByModerator);
    assert_eq!(service.list_action_logs().unwrap().len(), 1);
}

#[test]
fn owner_can_undo_own_lock() {
    let service = InMemoryService::new_with_sample();
    run(&service, 3, QuickModRequest::homogeneous(QuickAction::Lock, &[2]));
    assert_eq!(service.topic(2).unwrap().locked, LockState::LockedByOwner);
    run(&service, 3, QuickModRequest::homogeneous(QuickAction::Lock, &[2]));
    assert_eq!(service.topic(2).unwrap().locked, LockState::Unlocked);
}

#[test]
fn move_there_and_back_restores_every_counter() {
    let service = InMemoryService::new_with_sample();
    let general = service.board(1).unwrap();
    let off_topic = service.board(2).unwrap();

    run(
        &service,
        2,
        QuickModRequest::homogeneous(QuickAction::Move, &[1]).with_move_to(2),
    );
    assert_eq!(service.topic(1).unwrap().board_id, 2);
    assert_eq!(service.board(1).unwrap().num_posts, general.num_posts - 2);
    assert_eq!(service.board(2).unwrap().num_posts, off_topic.num_posts + 2);
    assert_eq!(service.member(1).unwrap().posts, 0);
    assert!(find_counter_drift(&service).unwrap().is_clean());

    run(
        &service,
        2,
        QuickModRequest::homogeneous(QuickAction::Move, &[1]).with_move_to(1),
    );
    assert_eq!(service.board(1).unwrap(), general);
    assert_eq!(service.board(2).unwrap(), off_topic);
    assert_eq!(service.member(1).unwrap().posts, 1);
    assert_eq!(service.member(2).unwrap().posts, 1);

    let log = service.list_action_logs().unwrap();
    assert_eq!(log[0].details["board_from"], 1);
    assert_eq!(log[0].details["board_to"], 2);
}

#[test]
fn move_to_redirect_board_changes_nothing() {
    let service = InMemoryService::new_with_sample();
    let before = service.list_boards().unwrap();
    run(
        &service,
        2,
        QuickModRequest::homogeneous(QuickAction::Move, &[1]).with_move_to(4),
    );
    assert_eq!(service.topic(1).unwrap().board_id, 1);
    assert_eq!(service.list_boards().unwrap(), before);
    assert!(service.list_action_logs().unwrap().is_empty());
    assert!(service.notifications().is_empty());
}

#[test]
fn merge_needs_two_topics() {
    let service = InMemoryService::new_with_sample();
    let single = run(&service, 2, QuickModRequest::homogeneous(QuickAction::Merge, &[1]));
    assert!(matches!(single, QuickModOutcome::Redirected { .. }));

    let pair = run(&service, 2, QuickModRequest::homogeneous(QuickAction::Merge, &[2, 1]));
    assert_eq!(pair, QuickModOutcome::HandedOffToMerge { topics: vec![1, 2] });
}

#[test]
fn approving_an_approved_topic_is_a_no_op() {
    let service = InMemoryService::new_with_sample();
    let before = service.board(1).unwrap();
    run(&service, 2, QuickModRequest::homogeneous(QuickAction::Approve, &[1]));
    assert_eq!(service.board(1).unwrap(), before);
    assert!(service.list_action_logs().unwrap().is_empty());
}

#[test]
fn approve_publishes_pending_topic() {
    let service = InMemoryService::new_with_sample();
    run(&service, 2, QuickModRequest::homogeneous(QuickAction::Approve, &[4]));
    let topic = service.topic(4).unwrap();
    assert!(topic.approved);
    assert_eq!(topic.unapproved_posts, 0);
    let board = service.board(1).unwrap();
    assert_eq!(board.unapproved_topics, 0);
    assert_eq!(board.num_topics, 3);
    let log = service.list_action_logs().unwrap();
    assert_eq!(log[0].action, "approve_topic");
    assert_eq!(log[0].details["member"], 3);
    assert!(find_counter_drift(&service).unwrap().is_clean());
}

#[test]
fn mixed_batch_logs_and_notifies_each_mutated_topic() {
    let service = InMemoryService::new_with_sample();
    let request = QuickModRequest::heterogeneous([
        (1, QuickAction::Sticky),
        (2, QuickAction::Lock),
        (3, QuickAction::Remove),
        (4, QuickAction::MarkRead),
    ]);
    run(&service, 2, request);

    let log = service.list_action_logs().unwrap();
    let actions: Vec<&str> = log.iter().map(|entry| entry.action.as_str()).collect();
    assert_eq!(actions, vec!["sticky", "remove", "lock"]);
    let events: Vec<NotifyEvent> = service
        .notifications()
        .into_iter()
        .map(|job| job.event)
        .collect();
    assert_eq!(
        events,
        vec![NotifyEvent::Sticky, NotifyEvent::Remove, NotifyEvent::Lock]
    );
    assert!(service.read_entry(2, 4).is_some());
    assert_eq!(service.stats().total_topics, 2);
}

/// End-to-end workflow scenarios against the in-memory store
use proptest::prelude::*;
use qcflow_core::{
    Action, Actor, ArbiterConfig, AssignmentArbiter, Drawing, DrawingStore, InMemoryDrawingStore,
    NewDrawing, NoopNotifier, Role, Stage, WorkflowEngine, WorkflowError,
};
use std::sync::Arc;

async fn setup_arbiter() -> (AssignmentArbiter, Drawing) {
    let store = Arc::new(InMemoryDrawingStore::new());
    let drawing = store
        .insert_drawing(NewDrawing {
            project_id: 1,
            title: "D1".to_string(),
            description: "Main housing".to_string(),
            author_id: None,
        })
        .await
        .expect("Failed to insert drawing");
    let arbiter = AssignmentArbiter::new(
        WorkflowEngine::new(store),
        Arc::new(NoopNotifier),
        ArbiterConfig::default(),
    );
    (arbiter, drawing)
}

#[tokio::test]
async fn test_drafter_to_rework_scenario() {
    let (arbiter, d1) = setup_arbiter().await;
    let alice = Actor::new(1, "alice", Role::Drafter);
    let bob = Actor::new(2, "bob", Role::ShiftLead);
    let carol = Actor::new(3, "carol", Role::ShiftLead);

    assert_eq!(d1.current_stage, Stage::Unassigned);
    assert_eq!(d1.assignee_id, None);
    assert_eq!((d1.revision, d1.version), (1, 1));

    let d = arbiter.execute(d1.id, Action::Claim, &alice).await.unwrap();
    assert_eq!((d.current_stage, d.assignee_id, d.version), (Stage::Unassigned, Some(1), 2));

    let d = arbiter.execute(d1.id, Action::Submit, &alice).await.unwrap();
    assert_eq!((d.current_stage, d.assignee_id, d.version), (Stage::FirstQc, None, 3));

    let d = arbiter.execute(d1.id, Action::Claim, &bob).await.unwrap();
    assert_eq!((d.current_stage, d.assignee_id, d.version), (Stage::FirstQc, Some(2), 4));
    let seen_by_carol = d.clone();

    let d = arbiter.execute(d1.id, Action::Reject, &bob).await.unwrap();
    assert_eq!(d.current_stage, Stage::Unassigned);
    assert_eq!(d.assignee_id, None);
    assert_eq!((d.revision, d.version), (2, 5));

    // Carol's v4 snapshot conflicts on the holder check
    let err = arbiter
        .engine()
        .apply(&seen_by_carol, Action::Claim, &carol)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)));

    // and on the conditional update once the holder check passes
    let mut stale = seen_by_carol;
    stale.assignee_id = None;
    let err = arbiter
        .engine()
        .apply(&stale, Action::Claim, &carol)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)));

    let history = arbiter.engine().store().history(d1.id).await.unwrap();
    let actions: Vec<Action> = history.iter().map(|entry| entry.action).collect();
    assert_eq!(
        actions,
        vec![Action::Claim, Action::Submit, Action::Claim, Action::Reject]
    );
    assert_eq!(history.last().map(|entry| entry.to_version), Some(5));
}

#[tokio::test]
async fn test_full_approval_path() {
    let (arbiter, d1) = setup_arbiter().await;
    let alice = Actor::new(1, "alice", Role::Drafter);
    let bob = Actor::new(2, "bob", Role::ShiftLead);
    let dana = Actor::new(4, "dana", Role::FinalQc);

    arbiter.execute(d1.id, Action::Claim, &alice).await.unwrap();
    arbiter.execute(d1.id, Action::Submit, &alice).await.unwrap();
    arbiter.execute(d1.id, Action::Claim, &bob).await.unwrap();
    arbiter.execute(d1.id, Action::Submit, &bob).await.unwrap();
    arbiter.execute(d1.id, Action::Claim, &dana).await.unwrap();
    let approved = arbiter.execute(d1.id, Action::Submit, &dana).await.unwrap();

    assert_eq!(approved.current_stage, Stage::Approved);
    assert_eq!(approved.assignee_id, None);
    assert_eq!(approved.version, 7);

    let err = arbiter
        .execute(d1.id, Action::Claim, &Actor::new(9, "root", Role::Admin))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_claim_then_release_restores_drawing() {
    let (arbiter, before) = setup_arbiter().await;
    let alice = Actor::new(1, "alice", Role::Drafter);

    arbiter.execute(before.id, Action::Claim, &alice).await.unwrap();
    let after = arbiter.execute(before.id, Action::Release, &alice).await.unwrap();

    assert_eq!(after.version, before.version + 2);
    assert_eq!(
        Drawing {
            version: before.version,
            updated_at: before.updated_at,
            ..after
        },
        before
    );
}

#[tokio::test]
async fn test_release_is_visible_in_history() {
    let (arbiter, d1) = setup_arbiter().await;
    let alice = Actor::new(1, "alice", Role::Drafter);

    arbiter.execute(d1.id, Action::Claim, &alice).await.unwrap();
    arbiter.execute(d1.id, Action::Release, &alice).await.unwrap();

    let history = arbiter.engine().store().history(d1.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].action, Action::Release);
    assert_eq!(history[1].actor_id, 1);
}

#[tokio::test]
async fn test_submit_by_non_holder_is_forbidden() {
    let (arbiter, d1) = setup_arbiter().await;
    let alice = Actor::new(1, "alice", Role::Drafter);
    let eve = Actor::new(5, "eve", Role::Drafter);

    arbiter.execute(d1.id, Action::Claim, &alice).await.unwrap();
    let err = arbiter.execute(d1.id, Action::Submit, &eve).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Forbidden(_)));

    let err = arbiter.execute(d1.id, Action::Release, &eve).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Forbidden(_)));
}

fn actor_for(stage: Stage) -> Actor {
    match stage {
        Stage::Unassigned => Actor::new(1, "alice", Role::Drafter),
        Stage::FirstQc => Actor::new(2, "bob", Role::ShiftLead),
        _ => Actor::new(3, "dana", Role::FinalQc),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_version_increases_by_one_per_commit(
        steps in proptest::collection::vec(0usize..4, 1..40)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let (arbiter, d1) = setup_arbiter().await;
            let mut current = d1;

            for step in steps {
                let action = Action::ALL[step];
                let actor = actor_for(current.current_stage);
                match arbiter.execute(current.id, action, &actor).await {
                    Ok(next) => {
                        prop_assert_eq!(next.version, current.version + 1);
                        prop_assert!(Stage::ALL.contains(&next.current_stage));
                        prop_assert!(next.revision >= current.revision);
                        current = next;
                    }
                    Err(_) => {
                        let stored = arbiter.engine().load(current.id).await.unwrap();
                        prop_assert_eq!(&stored, &current);
                    }
                }
            }
            Ok(())
        })?;
    }
}

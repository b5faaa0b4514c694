mod common;

use std::time::Duration;

use common::{split_router, Account, DATABASE};
use docrepo_core::{
    CallContext, Error, IndexDescriptor, MemoryConnector, ReconcilePhase, Repository, StoreError,
    PRIMARY_KEY_INDEX,
};

async fn setup(live: &[IndexDescriptor]) -> (MemoryConnector, Repository<Account>) {
    let connector = MemoryConnector::new();
    let router = split_router(&connector).await;
    let repo = Repository::<Account>::with_collection(&router, "ledger");
    for index in live {
        repo.write_collection().create_index(index).await.unwrap();
    }
    connector.server().clear_journal();
    (connector, repo)
}

fn a() -> IndexDescriptor {
    IndexDescriptor::new("A").ascending("owner")
}

fn b() -> IndexDescriptor {
    IndexDescriptor::new("B").descending("balance")
}

fn c() -> IndexDescriptor {
    IndexDescriptor::new("C").ascending("tier")
}

fn d() -> IndexDescriptor {
    IndexDescriptor::new("D").ascending("tier").descending("balance")
}

fn names(connector: &MemoryConnector) -> Vec<String> {
    connector.server().index_names(DATABASE, "ledger")
}

#[tokio::test]
async fn drops_undesired_then_creates_desired() {
    let (connector, repo) = setup(&[a(), c()]).await;

    let report = repo
        .ensure_indexes(&CallContext::background(), &[b(), a()])
        .await
        .unwrap();

    assert_eq!(report.dropped, vec!["C"]);
    assert_eq!(report.created, vec!["B"]);
    assert_eq!(report.unchanged, vec!["A"]);
    assert_eq!(names(&connector), vec![PRIMARY_KEY_INDEX, "A", "B"]);
    assert_eq!(
        connector.server().commands(),
        vec!["listIndexes", "dropIndexes", "createIndexes", "createIndexes"]
    );
}

#[tokio::test]
async fn second_run_changes_nothing() {
    let (connector, repo) = setup(&[a(), c()]).await;
    let ctx = CallContext::background();
    let desired = [a(), b()];

    repo.ensure_indexes(&ctx, &desired).await.unwrap();
    let before = names(&connector);

    let plan = repo.plan_indexes(&ctx, &desired).await.unwrap();
    assert!(plan.is_converged());

    let report = repo.ensure_indexes(&ctx, &desired).await.unwrap();
    assert_eq!(report.operations(), 0);
    assert_eq!(report.unchanged, vec!["A", "B"]);
    assert_eq!(names(&connector), before);
}

#[tokio::test]
async fn primary_key_index_is_never_dropped() {
    let (connector, repo) = setup(&[a(), b()]).await;

    let report = repo
        .ensure_indexes(&CallContext::background(), &[])
        .await
        .unwrap();

    assert_eq!(report.dropped, vec!["A", "B"]);
    assert_eq!(names(&connector), vec![PRIMARY_KEY_INDEX]);
}

#[tokio::test]
async fn invalid_descriptors_fail_before_listing() {
    let (connector, repo) = setup(&[a()]).await;
    let ctx = CallContext::background();

    let primary = IndexDescriptor::new(PRIMARY_KEY_INDEX).ascending("_id");
    let err = repo.ensure_indexes(&ctx, &[primary]).await.unwrap_err();
    assert!(matches!(
        err,
        Error::IndexReconciliation {
            phase: ReconcilePhase::Validate,
            ..
        }
    ));

    let err = repo.ensure_indexes(&ctx, &[a(), a()]).await.unwrap_err();
    assert!(err.to_string().contains("more than once"));

    let keyless = IndexDescriptor::new("empty");
    assert!(repo.ensure_indexes(&ctx, &[keyless]).await.is_err());

    for unnamed in ["", "   "] {
        let err = repo
            .ensure_indexes(&ctx, &[IndexDescriptor::new(unnamed).ascending("owner")])
            .await
            .unwrap_err();
        match err {
            Error::IndexReconciliation { phase, index, reason, .. } => {
                assert_eq!(phase, ReconcilePhase::Validate);
                assert_eq!(index, "");
                assert!(reason.contains("must carry a name"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    let padded = IndexDescriptor::new(" A ").ascending("owner");
    let err = repo.ensure_indexes(&ctx, &[padded]).await.unwrap_err();
    assert!(matches!(
        err,
        Error::IndexReconciliation {
            phase: ReconcilePhase::Validate,
            ..
        }
    ));
    assert!(err.to_string().contains("whitespace"));

    assert!(connector.server().journal().is_empty());
    assert_eq!(names(&connector), vec![PRIMARY_KEY_INDEX, "A"]);
}

#[tokio::test(start_paused = true)]
async fn deadline_during_drop_names_the_phase_and_index() {
    let (connector, repo) = setup(&[c()]).await;
    connector.server().set_latency(Duration::from_millis(40));
    let ctx = CallContext::background().with_timeout(Duration::from_millis(60));

    // listIndexes finishes at 40ms; dropIndexes would finish at 80ms
    let err = repo.ensure_indexes(&ctx, &[]).await.unwrap_err();
    match &err {
        Error::IndexReconciliation {
            phase,
            index,
            source: Some(StoreError::Backend(cause)),
            ..
        } => {
            assert_eq!(*phase, ReconcilePhase::Drop);
            assert_eq!(index, "C");
            assert!(matches!(
                cause.downcast_ref::<Error>(),
                Some(Error::Timeout { operation: "drop_index" })
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("exceeded its deadline"));
}

#[tokio::test]
async fn cancellation_before_listing_names_the_list_phase() {
    let (_connector, repo) = setup(&[c()]).await;
    let (ctx, cancel) = CallContext::background().cancellable();
    cancel.cancel();

    let err = repo.ensure_indexes(&ctx, &[a()]).await.unwrap_err();
    match err {
        Error::IndexReconciliation {
            phase,
            source: Some(StoreError::Backend(cause)),
            ..
        } => {
            assert_eq!(phase, ReconcilePhase::List);
            assert!(matches!(
                cause.downcast_ref::<Error>(),
                Some(Error::Cancelled { .. })
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn partial_failure_is_finished_by_a_rerun() {
    let (connector, repo) = setup(&[c(), d()]).await;
    let ctx = CallContext::background();
    connector.server().fail_on("createIndexes");

    let err = repo.ensure_indexes(&ctx, &[a(), b()]).await.unwrap_err();
    match err {
        Error::IndexReconciliation { phase, index, .. } => {
            assert_eq!(phase, ReconcilePhase::Create);
            assert_eq!(index, "A");
        }
        other => panic!("unexpected error: {other}"),
    }
    // Drops already applied; nothing created
    assert_eq!(names(&connector), vec![PRIMARY_KEY_INDEX]);

    let report = repo.ensure_indexes(&ctx, &[a(), b()]).await.unwrap();
    assert!(report.dropped.is_empty());
    assert_eq!(report.created, vec!["A", "B"]);
    assert_eq!(names(&connector), vec![PRIMARY_KEY_INDEX, "A", "B"]);
}

#[tokio::test]
async fn redefined_index_is_reported_and_rejected() {
    let (_connector, repo) = setup(&[a()]).await;
    let ctx = CallContext::background();
    let unique_a = a().unique();

    let plan = repo.plan_indexes(&ctx, &[unique_a.clone()]).await.unwrap();
    assert_eq!(plan.redefined, vec!["A"]);
    assert!(!plan.is_converged());

    let err = repo.ensure_indexes(&ctx, &[unique_a]).await.unwrap_err();
    assert!(matches!(
        err,
        Error::IndexReconciliation {
            phase: ReconcilePhase::Create,
            source: Some(StoreError::IndexConflict(_)),
            ..
        }
    ));
}

#[tokio::test]
async fn list_failure_names_the_phase() {
    let (connector, repo) = setup(&[]).await;
    connector.server().fail_on("listIndexes");

    let err = repo
        .ensure_indexes(&CallContext::background(), &[a()])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::IndexReconciliation {
            phase: ReconcilePhase::List,
            ..
        }
    ));
}

#[tokio::test]
async fn model_declares_its_indexes() {
    let connector = MemoryConnector::new();
    let router = split_router(&connector).await;
    let repo = Repository::<Account>::new(&router);

    let report = repo
        .ensure_model_indexes(&CallContext::background())
        .await
        .unwrap();
    assert_eq!(report.created, vec!["balance_desc", "owner_unique"]);
    assert_eq!(
        connector.server().index_names(DATABASE, "accounts"),
        vec![PRIMARY_KEY_INDEX, "balance_desc", "owner_unique"]
    );
}

mod common;

use std::time::Duration;

use common::{accounts, doc, split_router, Account, DATABASE};
use docrepo_core::{
    AggregateOptions, BulkOperation, BulkWriteOptions, CallContext, ConnectionRole, CountOptions,
    DeleteOptions, Error, FindOneAndUpdateOptions, FindOneOptions, FindOptions, Hint, HintPolicy,
    MemoryConnector, Pagination, Repository, RepositoryOptions, StoreError, Update, UpdateOptions,
};
use serde::Deserialize;
use serde_json::json;

async fn seeded(count: usize) -> (MemoryConnector, Repository<Account>) {
    let connector = MemoryConnector::new();
    let router = split_router(&connector).await;
    let repo = Repository::<Account>::new(&router);
    repo.insert_many(&CallContext::background(), &accounts(count))
        .await
        .unwrap();
    connector.server().clear_journal();
    (connector, repo)
}

#[tokio::test]
async fn find_pages_through_sorted_results() {
    let (_connector, repo) = seeded(25).await;
    let ctx = CallContext::background();

    let mut pagination = Pagination::new(2, 10);
    let page = repo
        .find(
            &ctx,
            doc(json!({})),
            FindOptions::sorted_by(doc(json!({"_id": 1}))),
            Some(&mut pagination),
        )
        .await
        .unwrap();

    let ids: Vec<_> = page.iter().map(|account| account.id.as_str()).collect();
    let expected: Vec<String> = (11..=20).map(|n| format!("acct-{n:02}")).collect();
    assert_eq!(ids, expected);
    assert_eq!(pagination.offset(), 10);
    assert_eq!(pagination.total_records(), 25);
    assert_eq!(pagination.total_pages(), 3);
    assert!(pagination.has_next());
    assert!(pagination.has_prev());
}

#[tokio::test]
async fn find_page_clamps_and_reports() {
    let (_connector, repo) = seeded(5).await;
    let ctx = CallContext::background();

    let page = repo
        .find_page(&ctx, doc(json!({})), FindOptions::default(), 0, 500)
        .await
        .unwrap();
    assert_eq!(page.items.len(), 5);
    assert_eq!(page.pagination.page(), 1);
    assert_eq!(page.pagination.limit(), 100);
    assert!(!page.has_next());
    assert!(!page.has_prev());

    let err = repo
        .find_page(&ctx, doc(json!({})), FindOptions::default(), 1, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput { .. }));
}

#[tokio::test]
async fn find_without_pagination_honours_options() {
    let (_connector, repo) = seeded(6).await;
    let ctx = CallContext::background();

    let richest = repo
        .find(
            &ctx,
            doc(json!({"balance": {"$gte": 30}})),
            FindOptions {
                sort: Some(doc(json!({"balance": -1}))),
                limit: Some(2),
                ..FindOptions::default()
            },
            None,
        )
        .await
        .unwrap();
    let balances: Vec<_> = richest.iter().map(|account| account.balance).collect();
    assert_eq!(balances, vec![60, 50]);
}

#[tokio::test]
async fn find_one_distinguishes_absent_from_failed() {
    let (connector, repo) = seeded(3).await;
    let ctx = CallContext::background();

    let found = repo
        .find_one(&ctx, doc(json!({"owner": "owner-02"})), FindOneOptions::default())
        .await
        .unwrap();
    assert_eq!(found.id, "acct-02");

    let missing = repo
        .find_one(&ctx, doc(json!({"owner": "nobody"})), FindOneOptions::default())
        .await
        .unwrap_err();
    assert!(missing.is_not_found());

    connector.server().fail_on("find");
    let broken = repo
        .find_one(&ctx, doc(json!({"owner": "owner-02"})), FindOneOptions::default())
        .await
        .unwrap_err();
    assert!(!broken.is_not_found());
    assert!(matches!(
        broken,
        Error::Query {
            operation: "find_one",
            source: StoreError::Backend(_),
            ..
        }
    ));
}

#[tokio::test]
async fn reads_use_read_connection_and_writes_use_write_connection() {
    let (connector, repo) = seeded(2).await;
    let ctx = CallContext::background();

    repo.count(&ctx, doc(json!({})), CountOptions::default())
        .await
        .unwrap();
    repo.insert_one(&ctx, &Account::new("acct-99", "owner-99", 1))
        .await
        .unwrap();

    let journal = connector.server().journal();
    assert_eq!(journal.len(), 2);
    assert_eq!((journal[0].command.as_str(), journal[0].role), ("count", ConnectionRole::Read));
    assert_eq!((journal[1].command.as_str(), journal[1].role), ("insert", ConnectionRole::Write));
    assert_eq!(journal[1].database, DATABASE);
    assert_eq!(journal[1].collection.as_deref(), Some("accounts"));
}

#[tokio::test]
async fn insert_many_of_nothing_never_reaches_the_store() {
    let (connector, repo) = seeded(0).await;
    repo.insert_many(&CallContext::background(), &[])
        .await
        .unwrap();
    assert!(connector.server().journal().is_empty());
}

#[tokio::test]
async fn delete_matching_removes_every_match() {
    let (connector, repo) = seeded(7).await;
    let ctx = CallContext::background();

    let deleted = repo
        .delete_matching(&ctx, doc(json!({"tier": "basic"})), DeleteOptions::default())
        .await
        .unwrap();
    assert_eq!(deleted, 7);
    assert!(connector.server().documents(DATABASE, "accounts").is_empty());
    assert_eq!(
        repo.count(&ctx, doc(json!({})), CountOptions::default())
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn set_and_raw_updates() {
    let (_connector, repo) = seeded(4).await;
    let ctx = CallContext::background();

    let outcome = repo
        .update_set_one(
            &ctx,
            doc(json!({"_id": "acct-01"})),
            doc(json!({"tier": "gold"})),
            UpdateOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!((outcome.matched, outcome.modified), (1, 1));

    let outcome = repo
        .update_many(
            &ctx,
            doc(json!({"balance": {"$lte": 30}})),
            Update::Raw(doc(json!({"$inc": {"balance": 5}}))),
            UpdateOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!((outcome.matched, outcome.modified), (3, 3));

    let first = repo
        .find_one(&ctx, doc(json!({"_id": "acct-01"})), FindOneOptions::default())
        .await
        .unwrap();
    assert_eq!((first.tier.as_str(), first.balance), ("gold", 15));

    let err = repo
        .update_one(
            &ctx,
            doc(json!({"_id": "acct-01"})),
            Update::Raw(doc(json!({"tier": "platinum"}))),
            UpdateOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput { .. }));
}

#[tokio::test]
async fn update_one_upserts_when_asked() {
    let (_connector, repo) = seeded(0).await;
    let ctx = CallContext::background();

    let outcome = repo
        .update_one(
            &ctx,
            doc(json!({"_id": "acct-new"})),
            Update::Set(doc(json!({"owner": "fresh", "balance": 0}))),
            UpdateOptions::default().upsert(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.upserted, 1);

    let created = repo
        .find_one(&ctx, doc(json!({"owner": "fresh"})), FindOneOptions::default())
        .await
        .unwrap();
    assert_eq!(created.id, "acct-new");
}

#[tokio::test]
async fn required_hint_is_checked_before_writing() {
    let (connector, repo) = seeded(2).await;
    let ctx = CallContext::background();
    repo.ensure_model_indexes(&ctx).await.unwrap();
    connector.server().clear_journal();

    let strict = repo.clone().with_options(RepositoryOptions {
        hint_policy: HintPolicy::Required,
    });
    let err = strict
        .update_one(
            &ctx,
            doc(json!({"owner": "owner-01"})),
            Update::Set(doc(json!({"tier": "gold"}))),
            UpdateOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));

    let err = strict
        .update_many(
            &ctx,
            doc(json!({})),
            Update::Raw(doc(json!({"$inc": {"balance": 1}}))),
            UpdateOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));
    assert!(err.to_string().contains("update_many"));

    let err = strict
        .update_set_one(
            &ctx,
            doc(json!({"owner": "owner-02"})),
            doc(json!({"tier": "gold"})),
            UpdateOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));
    assert!(connector.server().journal().is_empty());

    let outcome = strict
        .update_one(
            &ctx,
            doc(json!({"owner": "owner-01"})),
            Update::Set(doc(json!({"tier": "gold"}))),
            UpdateOptions::with_hint(Hint::name("owner_unique")),
        )
        .await
        .unwrap();
    assert_eq!(outcome.modified, 1);
    assert_eq!(connector.server().commands(), vec!["update"]);
}

#[tokio::test]
async fn find_one_and_update_returns_the_new_document() {
    let (_connector, repo) = seeded(1).await;
    let ctx = CallContext::background();

    let updated = repo
        .find_one_and_update(
            &ctx,
            doc(json!({"_id": "acct-01"})),
            Update::Raw(doc(json!({"$inc": {"balance": -4}}))),
            FindOneAndUpdateOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(updated.balance, 6);

    let missing = repo
        .find_one_and_update(
            &ctx,
            doc(json!({"_id": "nope"})),
            Update::Set(doc(json!({"tier": "gold"}))),
            FindOneAndUpdateOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(missing.is_not_found());
}

#[tokio::test]
async fn bulk_write_reports_counts() {
    let (_connector, repo) = seeded(3).await;
    let ctx = CallContext::background();

    let result = repo
        .bulk_write(
            &ctx,
            vec![
                BulkOperation::InsertOne(Account::new("acct-10", "owner-10", 100)),
                BulkOperation::UpdateOne {
                    filter: doc(json!({"_id": "acct-01"})),
                    update: Update::Set(doc(json!({"tier": "gold"}))),
                    upsert: false,
                },
                BulkOperation::UpdateMany {
                    filter: doc(json!({"tier": "basic"})),
                    update: Update::Raw(doc(json!({"$inc": {"balance": 1}}))),
                    upsert: false,
                },
                BulkOperation::ReplaceOne {
                    filter: doc(json!({"_id": "acct-20"})),
                    replacement: Account::new("acct-20", "owner-20", 0),
                    upsert: true,
                },
                BulkOperation::DeleteOne {
                    filter: doc(json!({"_id": "acct-02"})),
                },
            ],
            BulkWriteOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.inserted, 1);
    // acct-01 by the first update; acct-02, acct-03 and acct-10 by the second
    assert_eq!(result.matched, 4);
    assert_eq!(result.modified, 4);
    assert_eq!(result.upserted, 1);
    assert_eq!(result.deleted, 1);
    assert_eq!(
        repo.count(&ctx, doc(json!({})), CountOptions::default())
            .await
            .unwrap(),
        4
    );
}

#[tokio::test]
async fn empty_bulk_write_is_a_no_op() {
    let (connector, repo) = seeded(1).await;
    let result = repo
        .bulk_write(&CallContext::background(), Vec::new(), BulkWriteOptions::default())
        .await
        .unwrap();
    assert_eq!(result, Default::default());
    assert!(connector.server().journal().is_empty());
}

#[derive(Debug, Deserialize)]
struct Total {
    total: u64,
}

#[tokio::test]
async fn aggregate_decodes_into_any_shape() {
    let (connector, repo) = seeded(8).await;
    let totals: Vec<Total> = repo
        .aggregate(
            &CallContext::background(),
            vec![
                doc(json!({"$match": {"balance": {"$gt": 50}}})),
                doc(json!({"$count": "total"})),
            ],
            AggregateOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(totals.len(), 1);
    assert_eq!(totals[0].total, 3);
    assert_eq!(connector.server().journal()[0].role, ConnectionRole::Read);
}

#[tokio::test]
async fn undecodable_documents_are_reported() {
    let (_connector, repo) = seeded(0).await;
    let ctx = CallContext::background();
    repo.write_collection()
        .insert_one(&doc(json!({"_id": "bad", "owner": "x", "balance": "lots"})), None)
        .await
        .unwrap();

    let err = repo
        .find_one(&ctx, doc(json!({"_id": "bad"})), FindOneOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Decode { operation: "find_one", .. }));
}

#[tokio::test]
async fn duplicate_keys_surface_as_query_errors() {
    let (_connector, repo) = seeded(1).await;
    let err = repo
        .insert_one(&CallContext::background(), &Account::new("acct-01", "other", 0))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Query {
            source: StoreError::DuplicateKey(_),
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn deadline_interrupts_slow_store() {
    let (connector, repo) = seeded(1).await;
    connector.server().set_latency(Duration::from_secs(30));

    let ctx = CallContext::background().with_timeout(Duration::from_millis(100));
    let err = repo
        .count(&ctx, doc(json!({})), CountOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { operation: "count" }));
}

#[tokio::test]
async fn cancelled_context_skips_the_store() {
    let (connector, repo) = seeded(1).await;
    let (ctx, cancel) = CallContext::background().cancellable();
    cancel.cancel();

    let err = repo
        .find(&ctx, doc(json!({})), FindOptions::default(), None)
        .await
        .unwrap_err();
    assert!(err.is_interrupted());
    assert!(connector.server().journal().is_empty());
}

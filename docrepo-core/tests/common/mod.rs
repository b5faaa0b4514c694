#![allow(dead_code)]

use docrepo_core::{
    to_document, ConnectionRouter, Document, IndexDescriptor, MemoryConnector, Model, RouterConfig,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const WRITE_URL: &str = "memory://primary";
pub const READ_URL: &str = "memory://replica";
pub const DATABASE: &str = "bank";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "_id")]
    pub id: String,
    pub owner: String,
    pub balance: i64,
    #[serde(default)]
    pub tier: String,
}

impl Account {
    pub fn new(id: &str, owner: &str, balance: i64) -> Self {
        Self {
            id: id.to_string(),
            owner: owner.to_string(),
            balance,
            tier: "basic".to_string(),
        }
    }
}

impl Model for Account {
    fn collection_name() -> &'static str {
        "accounts"
    }

    fn indexes() -> Vec<IndexDescriptor> {
        vec![
            IndexDescriptor::new("owner_unique").ascending("owner").unique(),
            IndexDescriptor::new("balance_desc").descending("balance"),
        ]
    }
}

/// `count` accounts with ids `acct-01`, `acct-02`, ... and balances 10, 20, ...
pub fn accounts(count: usize) -> Vec<Account> {
    (1..=count)
        .map(|n| Account::new(&format!("acct-{n:02}"), &format!("owner-{n:02}"), n as i64 * 10))
        .collect()
}

pub fn doc(value: Value) -> Document {
    to_document("test", value).expect("test documents are objects")
}

pub async fn split_router(connector: &MemoryConnector) -> ConnectionRouter {
    ConnectionRouter::connect(RouterConfig::split(WRITE_URL, READ_URL, DATABASE), connector)
        .await
        .expect("router connects")
}

pub async fn single_router(connector: &MemoryConnector) -> ConnectionRouter {
    ConnectionRouter::connect(RouterConfig::single(WRITE_URL, DATABASE), connector)
        .await
        .expect("router connects")
}

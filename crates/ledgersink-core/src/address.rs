//! Address resolution store.
//!
//! Records which owner a derived (token) account belongs to. Links are
//! append-only and first-write-wins: once a derived address has an owner,
//! later links for it never overwrite that owner.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SinkError;
use crate::store::{LedgerQuery, WriteScope};
use crate::types::{AddressResolution, LinkOutcome, TransactionId};

/// What to do when a derived address shows up with a second, different owner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressConflictPolicy {
    /// Keep the first owner, log the conflict and carry on.
    #[default]
    Warn,
    /// Keep the first owner and fail the batch with an integrity violation.
    Reject,
}

/// Idempotent owner links for derived addresses.
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    conflicts: AddressConflictPolicy,
}

impl AddressBook {
    pub fn new(conflicts: AddressConflictPolicy) -> Self {
        Self { conflicts }
    }

    /// Link `derived` to `owner` unless it is already linked.
    pub async fn link_once(
        &self,
        scope: &mut dyn WriteScope,
        transaction: TransactionId,
        owner: &str,
        derived: &str,
    ) -> Result<LinkOutcome, SinkError> {
        let outcome = scope.link_address(transaction, owner, derived).await?;
        match &outcome {
            LinkOutcome::Inserted => debug!(owner, derived, "address linked"),
            LinkOutcome::AlreadyLinked => {}
            LinkOutcome::Conflict { existing_owner } => {
                warn!(
                    derived,
                    existing_owner = %existing_owner,
                    rejected_owner = owner,
                    "derived address already linked to another owner"
                );
                if self.conflicts == AddressConflictPolicy::Reject {
                    return Err(SinkError::IntegrityViolation(format!(
                        "derived address {derived} is linked to {existing_owner}, refusing {owner}"
                    )));
                }
            }
        }
        Ok(outcome)
    }

    /// Resolve a derived address against committed links.
    pub async fn resolve(
        &self,
        store: &dyn LedgerQuery,
        derived: &str,
    ) -> Result<AddressResolution, SinkError> {
        store.resolve_address(derived).await
    }

    /// Resolve a derived address inside an open scope, seeing its uncommitted links.
    pub async fn resolve_in(
        &self,
        scope: &mut dyn WriteScope,
        derived: &str,
    ) -> Result<AddressResolution, SinkError> {
        scope.resolve_address(derived).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLedger;
    use crate::store::LedgerStore;
    use crate::types::BlockHeader;
    use chrono::Utc;

    async fn open_with_tx(store: &MemoryLedger) -> (Box<dyn WriteScope>, TransactionId) {
        let mut scope = store.begin().await.unwrap();
        let block = scope
            .insert_block(&BlockHeader::new(1, "0x1", Utc::now()))
            .await
            .unwrap();
        let tx = scope.insert_transaction(block, "h1").await.unwrap();
        (scope, tx)
    }

    #[tokio::test]
    async fn linking_twice_stores_one_link() {
        let store = MemoryLedger::new();
        let book = AddressBook::default();
        let (mut scope, tx) = open_with_tx(&store).await;

        assert_eq!(book.link_once(scope.as_mut(), tx, "A", "D1").await.unwrap(), LinkOutcome::Inserted);
        assert_eq!(
            book.link_once(scope.as_mut(), tx, "A", "D1").await.unwrap(),
            LinkOutcome::AlreadyLinked
        );
        scope.commit().await.unwrap();

        assert_eq!(store.row_counts().await.unwrap().address_links, 1);
    }

    #[tokio::test]
    async fn first_owner_wins() {
        let store = MemoryLedger::new();
        let book = AddressBook::default();
        let (mut scope, tx) = open_with_tx(&store).await;

        book.link_once(scope.as_mut(), tx, "A", "D1").await.unwrap();
        let outcome = book.link_once(scope.as_mut(), tx, "Z", "D1").await.unwrap();
        assert_eq!(outcome, LinkOutcome::Conflict { existing_owner: "A".into() });
        scope.commit().await.unwrap();

        let resolved = book.resolve(&store, "D1").await.unwrap();
        assert_eq!(resolved, AddressResolution::Resolved("A".into()));
    }

    #[tokio::test]
    async fn reject_policy_fails_on_conflict() {
        let store = MemoryLedger::new();
        let book = AddressBook::new(AddressConflictPolicy::Reject);
        let (mut scope, tx) = open_with_tx(&store).await;

        book.link_once(scope.as_mut(), tx, "A", "D1").await.unwrap();
        let err = book.link_once(scope.as_mut(), tx, "Z", "D1").await.unwrap_err();
        assert!(err.is_integrity_violation());
    }

    #[tokio::test]
    async fn unknown_address_is_not_found() {
        let store = MemoryLedger::new();
        let book = AddressBook::default();
        assert_eq!(book.resolve(&store, "nope").await.unwrap(), AddressResolution::NotFound);
    }

    #[tokio::test]
    async fn scope_sees_its_own_links() {
        let store = MemoryLedger::new();
        let book = AddressBook::default();
        let (mut scope, tx) = open_with_tx(&store).await;

        book.link_once(scope.as_mut(), tx, "A", "D1").await.unwrap();
        assert_eq!(
            book.resolve_in(scope.as_mut(), "D1").await.unwrap().owner(),
            Some("A")
        );
        drop(scope);
        assert!(!book.resolve(&store, "D1").await.unwrap().is_found());
    }
}

//! The directory-service capability.
//!
//! The orchestrator asks it for a submitter's manager when a scope has a
//! manager gate, and for approver addresses when notifying. A missing manager
//! is an answer, not an error.

use async_trait::async_trait;
use formflow_core::types::DbId;
use formflow_db::repositories::DirectoryRepo;
use formflow_db::DbPool;

#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// The user's manager, if one is known.
    async fn resolve_manager(&self, user_id: DbId) -> Result<Option<DbId>, sqlx::Error>;

    async fn user_email(&self, user_id: DbId) -> Result<Option<String>, sqlx::Error>;

    /// Distinct member addresses across the given groups.
    async fn group_member_emails(&self, group_ids: &[DbId]) -> Result<Vec<String>, sqlx::Error>;
}

/// Directory backed by the `users` and `group_members` tables.
#[derive(Clone)]
pub struct DbDirectory {
    pool: DbPool,
}

impl DbDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DirectoryService for DbDirectory {
    async fn resolve_manager(&self, user_id: DbId) -> Result<Option<DbId>, sqlx::Error> {
        DirectoryRepo::manager_of(&self.pool, user_id).await
    }

    async fn user_email(&self, user_id: DbId) -> Result<Option<String>, sqlx::Error> {
        DirectoryRepo::email_of(&self.pool, user_id).await
    }

    async fn group_member_emails(&self, group_ids: &[DbId]) -> Result<Vec<String>, sqlx::Error> {
        DirectoryRepo::member_emails(&self.pool, group_ids).await
    }
}

/// Addresses of whoever can act on a task: the direct assignee, or every
/// member of the assigned group.
///
/// Lookup failures are logged and yield no recipients.
pub async fn approver_emails(
    directory: &dyn DirectoryService,
    assigned_to: Option<DbId>,
    assigned_group: Option<DbId>,
) -> Vec<String> {
    let result = match (assigned_to, assigned_group) {
        (Some(user_id), _) => directory
            .user_email(user_id)
            .await
            .map(|email| email.into_iter().collect()),
        (None, Some(group_id)) => directory.group_member_emails(&[group_id]).await,
        (None, None) => Ok(Vec::new()),
    };
    result.unwrap_or_else(|e| {
        tracing::warn!(?assigned_to, ?assigned_group, error = %e, "Failed to resolve approver emails");
        Vec::new()
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;

    use super::*;

    /// Fixed in-memory directory.
    #[derive(Default)]
    pub struct StaticDirectory {
        pub managers: HashMap<DbId, DbId>,
        pub emails: HashMap<DbId, String>,
        pub members: HashMap<DbId, Vec<DbId>>,
    }

    #[async_trait]
    impl DirectoryService for StaticDirectory {
        async fn resolve_manager(&self, user_id: DbId) -> Result<Option<DbId>, sqlx::Error> {
            Ok(self.managers.get(&user_id).copied())
        }

        async fn user_email(&self, user_id: DbId) -> Result<Option<String>, sqlx::Error> {
            Ok(self.emails.get(&user_id).cloned())
        }

        async fn group_member_emails(&self, group_ids: &[DbId]) -> Result<Vec<String>, sqlx::Error> {
            let mut out: Vec<String> = group_ids
                .iter()
                .filter_map(|g| self.members.get(g))
                .flatten()
                .filter_map(|u| self.emails.get(u).cloned())
                .collect();
            out.sort();
            out.dedup();
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::StaticDirectory;
    use super::*;

    fn directory() -> StaticDirectory {
        let mut d = StaticDirectory::default();
        d.emails.insert(1, "ada@x.org".to_string());
        d.emails.insert(2, "bob@x.org".to_string());
        d.emails.insert(3, "cy@x.org".to_string());
        d.members.insert(10, vec![2, 3]);
        d.members.insert(11, vec![3]);
        d
    }

    #[tokio::test]
    async fn direct_assignee_wins() {
        let d = directory();
        assert_eq!(approver_emails(&d, Some(1), Some(10)).await, vec!["ada@x.org"]);
    }

    #[tokio::test]
    async fn group_members_are_resolved() {
        let d = directory();
        assert_eq!(
            approver_emails(&d, None, Some(10)).await,
            vec!["bob@x.org", "cy@x.org"]
        );
    }

    #[tokio::test]
    async fn unknown_assignee_yields_nobody() {
        let d = directory();
        assert!(approver_emails(&d, Some(99), None).await.is_empty());
        assert!(approver_emails(&d, None, None).await.is_empty());
    }
}

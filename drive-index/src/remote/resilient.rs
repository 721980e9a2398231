use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use super::{Backoff, ChildPage, RemoteError, RemoteStore};
use crate::model::Node;

const DEFAULT_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Five attempts with waits of `unit * 2^(n-1)` clamped to `[4, 10]` units.
    pub fn with_time_unit(unit: Duration) -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            backoff: Backoff::new(unit, unit * 4, unit * 10, false),
        }
    }
}

impl Default for RetryPolicy {
    /// One-second units, jittered.
    fn default() -> Self {
        let unit = Duration::from_secs(1);
        Self {
            attempts: DEFAULT_ATTEMPTS,
            backoff: Backoff::new(unit, unit * 4, unit * 10, true),
        }
    }
}

/// Retries transient failures of the wrapped store and turns every failure that survives
/// the retries into an empty result. Callers treat `None`/`false` as "absent" and move on.
#[derive(Clone)]
pub struct ResilientRemote {
    inner: Arc<dyn RemoteStore>,
    policy: RetryPolicy,
}

impl ResilientRemote {
    pub fn new(inner: Arc<dyn RemoteStore>) -> Self {
        Self {
            inner,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn get(&self, id: &str) -> Option<Node> {
        let result = self.call("get", id, || self.inner.get(id)).await;
        soften("get", id, result)
    }

    pub async fn list_children(&self, id: &str, page_token: Option<&str>) -> Option<ChildPage> {
        let result = self
            .call("list_children", id, || self.inner.list_children(id, page_token))
            .await;
        soften("list_children", id, result)
    }

    /// Collects every page; `None` when the first page cannot be listed. A failure on a
    /// later page keeps what was gathered so far.
    pub async fn list_all_children(&self, id: &str) -> Option<Vec<Node>> {
        let mut first = self.list_children(id, None).await?;
        let mut nodes = std::mem::take(&mut first.nodes);
        let mut next = first.next_page_token;
        while let Some(token) = next {
            match self.list_children(id, Some(&token)).await {
                Some(page) => {
                    nodes.extend(page.nodes);
                    next = page.next_page_token;
                }
                None => break,
            }
        }
        Some(nodes)
    }

    pub async fn create_folder(&self, name: &str, parent_id: Option<&str>) -> Option<Node> {
        let result = self
            .call("create_folder", name, || {
                self.inner.create_folder(name, parent_id)
            })
            .await;
        soften("create_folder", name, result)
    }

    pub async fn create_shortcut(
        &self,
        name: &str,
        target_id: &str,
        parent_id: Option<&str>,
    ) -> Option<Node> {
        let result = self
            .call("create_shortcut", target_id, || {
                self.inner.create_shortcut(name, target_id, parent_id)
            })
            .await;
        soften("create_shortcut", target_id, result)
    }

    /// `true` once the object is gone, including when it was already missing.
    pub async fn delete(&self, id: &str) -> bool {
        match self.call("delete", id, || self.inner.delete(id)).await {
            Ok(()) => true,
            Err(RemoteError::NotFound(_)) => {
                warn!(id, "remote object was already deleted");
                true
            }
            Err(err) => {
                soften::<()>("delete", id, Err(err));
                false
            }
        }
    }

    async fn call<T, F, Fut>(
        &self,
        operation: &'static str,
        subject: &str,
        mut request: F,
    ) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut attempt = 1;
        loop {
            match request().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.policy.attempts => {
                    let delay = self.policy.backoff.delay(attempt);
                    warn!(
                        operation,
                        subject,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "remote call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn soften<T>(operation: &'static str, subject: &str, result: Result<T, RemoteError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err @ (RemoteError::NotFound(_) | RemoteError::PermissionDenied(_))) => {
            warn!(operation, subject, error = %err, "remote object unavailable");
            None
        }
        Err(err) => {
            error!(operation, subject, error = %err, "remote call failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::remote::memory::{FailureKind, MemoryRemote, file_node, folder_node};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::with_time_unit(Duration::from_millis(1))
    }

    fn wrap(remote: &Arc<MemoryRemote>) -> ResilientRemote {
        ResilientRemote::new(remote.clone()).with_policy(fast_policy())
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let remote = Arc::new(MemoryRemote::new());
        remote.insert(file_node("a", "A.txt", None));
        remote.fail("a", FailureKind::Transient, 2);

        let node = wrap(&remote).get("a").await;

        assert_eq!(node.map(|n| n.id), Some("a".to_string()));
        assert_eq!(remote.get_calls("a"), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_become_absent() {
        let remote = Arc::new(MemoryRemote::new());
        remote.insert(file_node("a", "A.txt", None));
        remote.fail("a", FailureKind::Transient, 10);

        assert!(wrap(&remote).get("a").await.is_none());
        assert_eq!(remote.get_calls("a"), 5);
    }

    #[test]
    fn default_policy_jitters_within_four_to_ten_seconds() {
        let policy = RetryPolicy::default();
        let mut rng = StdRng::seed_from_u64(7);
        let delays: Vec<Duration> = (1..policy.attempts)
            .map(|attempt| policy.backoff.delay_with_rng(attempt, &mut rng))
            .collect();
        assert!(
            delays
                .iter()
                .all(|d| *d >= Duration::from_secs(4) && *d <= Duration::from_secs(10))
        );
    }

    #[tokio::test]
    async fn not_found_and_permission_are_not_retried() {
        let remote = Arc::new(MemoryRemote::new());
        remote.insert(file_node("locked", "L", None));
        remote.fail("locked", FailureKind::PermissionDenied, 10);

        let resilient = wrap(&remote);
        assert!(resilient.get("missing").await.is_none());
        assert!(resilient.get("locked").await.is_none());
        assert_eq!(remote.get_calls("missing"), 1);
        assert_eq!(remote.get_calls("locked"), 1);
    }

    #[tokio::test]
    async fn list_all_children_walks_pages() {
        let remote = Arc::new(MemoryRemote::new());
        remote.insert(folder_node("root", "Root", None));
        for n in 0..5 {
            remote.insert(file_node(&format!("f{n}"), &format!("F{n}"), Some("root")));
        }

        let children = wrap(&remote).list_all_children("root").await.unwrap();

        let ids: Vec<_> = children.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["f0", "f1", "f2", "f3", "f4"]);
    }

    #[tokio::test]
    async fn deleting_a_missing_object_counts_as_gone() {
        let remote = Arc::new(MemoryRemote::new());
        assert!(wrap(&remote).delete("ghost").await);

        remote.insert(file_node("keep", "K", None));
        remote.fail("keep", FailureKind::PermissionDenied, 1);
        assert!(!wrap(&remote).delete("keep").await);
        assert!(remote.contains("keep"));
    }
}

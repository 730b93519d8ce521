//! The uniform optimistic-update capability.
//!
//! Every interactive control follows the same sequence: snapshot the prior
//! state, apply the optimistic value, run the backend call; on success the
//! snapshot is discarded, on failure it is restored and the error returned
//! for user display.  No control flips state without a snapshot to restore.

use std::future::Future;

use orunlink_backend::BackendError;

use crate::error::{ClientError, Result};

/// Apply `next` to `state` optimistically while `call` runs.
///
/// On rejection, `state` is restored to its prior value unconditionally.
pub async fn apply<S, R, Fut>(state: &mut S, next: S, call: Fut) -> Result<R>
where
    S: Clone,
    Fut: Future<Output = std::result::Result<R, BackendError>>,
{
    let snapshot = state.clone();
    *state = next;
    match call.await {
        Ok(value) => Ok(value),
        Err(e) => {
            *state = snapshot;
            Err(ClientError::Backend(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn success_keeps_the_optimistic_value() {
        let mut liked = false;
        let result = apply(&mut liked, true, async { Ok::<_, BackendError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert!(liked);
    }

    #[tokio::test]
    async fn failure_restores_the_snapshot() {
        let mut liked = false;
        let result = apply(&mut liked, true, async {
            Err::<(), _>(BackendError::Closed)
        })
        .await;
        assert!(result.is_err());
        assert!(!liked);
    }

    #[tokio::test]
    async fn works_on_collections_too() {
        let mut items = vec!["kept"];
        let mut next = items.clone();
        next.push("optimistic");

        let result = apply(&mut items, next, async {
            Err::<(), _>(BackendError::Closed)
        })
        .await;
        assert!(result.is_err());
        assert_eq!(items, vec!["kept"]);
    }
}

//! Failure & Abort Policy
//!
//! The one place where a fatal error turns into whole-run termination. A
//! process that fails inside a collective context would leave its peers
//! blocked forever, so every fatal error goes through `escalate`, which
//! signals `abort_all` before handing back `Error::ProcessAbort`.

use crate::comm::Communicator;
use crate::error::{ABORT_EXIT_CODE, Error, Result};
use std::future::Future;

/// Aborts the whole run on behalf of `error` and returns the resulting `ProcessAbort`.
///
/// An error that already is a `ProcessAbort` was raised by another process
/// (or an earlier escalation) and is passed through unchanged.
pub async fn escalate(comm: &Communicator, error: Error) -> Error {
    if error.is_abort() {
        return error;
    }

    let rank = comm.rank();
    tracing::error!("Error in process {}: {}", rank, error);
    comm.abort_all(ABORT_EXIT_CODE).await;

    Error::ProcessAbort {
        origin: rank,
        code: ABORT_EXIT_CODE,
    }
}

/// Runs `work`; any error it returns is escalated to a whole-run abort.
pub async fn guard<T, Fut>(comm: &Communicator, work: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match work.await {
        Ok(value) => Ok(value),
        Err(error) => Err(escalate(comm, error).await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::local::run_local;
    use crate::comm::types::Tag;

    #[tokio::test]
    async fn test_guard_passes_success_through() {
        let outcomes = run_local(2, |comm| async move {
            guard(&comm, async { Ok(comm.rank() * 10) }).await
        })
        .await
        .unwrap();

        let values: Vec<usize> = outcomes.into_iter().map(|o| o.unwrap()).collect();
        assert_eq!(values, vec![0, 10]);
    }

    #[tokio::test]
    async fn test_failure_on_one_rank_unblocks_every_peer() {
        // Rank 1 fails; ranks 0 and 2 sit in a receive that would never complete.
        let outcomes = run_local(3, |comm| async move {
            guard(&comm, async {
                if comm.rank() == 1 {
                    return Err(Error::Logic(anyhow::anyhow!("Intentional error")));
                }
                comm.receive::<u32>(1, Tag::User(1)).await
            })
            .await
        })
        .await
        .unwrap();

        for outcome in outcomes {
            assert!(matches!(
                outcome,
                Err(Error::ProcessAbort {
                    origin: 1,
                    code: ABORT_EXIT_CODE
                })
            ));
        }
    }

    #[tokio::test]
    async fn test_escalate_does_not_rewrap_aborts() {
        let outcomes = run_local(1, |comm| async move {
            let error = Error::ProcessAbort { origin: 7, code: 3 };
            Ok(escalate(&comm, error).await)
        })
        .await
        .unwrap();

        let error = outcomes.into_iter().next().unwrap().unwrap();
        assert!(matches!(error, Error::ProcessAbort { origin: 7, code: 3 }));
        assert_eq!(error.exit_code(), 3);
    }
}

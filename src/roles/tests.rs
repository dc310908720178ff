//! Role Module Tests
//!
//! ## Test Scopes
//! - **Identity**: Construction invariants and role queries.
//! - **Gate**: Predicate evaluation, the `NotExecuted` marker, and failure propagation.

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::roles::gate::{Gated, Role, gate, gate_with};
    use crate::roles::identity::ProcessIdentity;

    // ============================================================
    // IDENTITY TESTS
    // ============================================================

    #[test]
    fn test_identity_rejects_out_of_range_rank() {
        assert!(matches!(
            ProcessIdentity::new(3, 3),
            Err(Error::InvalidIdentity { rank: 3, size: 3 })
        ));
        assert!(ProcessIdentity::new(0, 0).is_err());
        assert!(ProcessIdentity::new(2, 3).is_ok());
    }

    #[test]
    fn test_identity_queries() {
        let root = ProcessIdentity::new(0, 4).unwrap();
        let worker = ProcessIdentity::new(2, 4).unwrap();

        assert!(root.is_root());
        assert!(!root.is_worker());
        assert!(worker.is_worker());
        assert!(worker.is_rank(2));
        assert!(!worker.is_rank(1));
        assert!(worker.is_in_set(&[1, 2]));
        assert!(!worker.is_in_set(&[0, 3]));
        assert_eq!(root.worker_count(), 3);
        assert_eq!(root.worker_ranks().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(root.check_rank(4).is_err());
    }

    // ============================================================
    // GATE TESTS
    // ============================================================

    #[test]
    fn test_root_gate_runs_on_exactly_one_rank() {
        let size = 5;
        let outcomes: Vec<Gated<u32>> = (0..size)
            .map(|rank| {
                let identity = ProcessIdentity::new(rank, size).unwrap();
                gate(&identity, &Role::Root, || Ok(42)).unwrap()
            })
            .collect();

        let executed: Vec<usize> = outcomes
            .iter()
            .enumerate()
            .filter(|(_, outcome)| outcome.is_executed())
            .map(|(rank, _)| rank)
            .collect();

        assert_eq!(executed, vec![0]);
        assert_eq!(outcomes[0], Gated::Executed(42));
        assert!(outcomes[1..].iter().all(|o| *o == Gated::NotExecuted));
    }

    #[test]
    fn test_workers_and_set_roles() {
        let size = 4;
        for rank in 0..size {
            let identity = ProcessIdentity::new(rank, size).unwrap();

            let workers = gate(&identity, &Role::Workers, || Ok(rank)).unwrap();
            assert_eq!(workers.is_executed(), rank != 0);

            let subset = gate(&identity, &Role::InSet(vec![1, 3]), || Ok(rank)).unwrap();
            assert_eq!(subset.is_executed(), rank == 1 || rank == 3);

            let single = gate(&identity, &Role::Rank(2), || Ok(rank)).unwrap();
            assert_eq!(single.into_executed(), if rank == 2 { Some(2) } else { None });
        }
    }

    #[test]
    fn test_executed_none_is_not_the_marker() {
        let identity = ProcessIdentity::new(0, 2).unwrap();

        let outcome: Gated<Option<u8>> = gate(&identity, &Role::Root, || Ok(None)).unwrap();

        assert_eq!(outcome, Gated::Executed(None));
        assert_ne!(outcome, Gated::NotExecuted);
    }

    #[test]
    fn test_gate_does_not_run_logic_when_predicate_fails() {
        let identity = ProcessIdentity::new(1, 2).unwrap();
        let mut called = false;

        let outcome = gate_with(&identity, |rank| rank == 0, || {
            called = true;
            Ok(())
        })
        .unwrap();

        assert_eq!(outcome, Gated::NotExecuted);
        assert!(!called);
    }

    #[test]
    fn test_gate_propagates_logic_failure() {
        let identity = ProcessIdentity::new(0, 2).unwrap();

        let result: Result<Gated<()>, Error> =
            gate(&identity, &Role::All, || Err(anyhow::anyhow!("Intentional error")));

        match result {
            Err(Error::Logic(e)) => assert!(e.to_string().contains("Intentional error")),
            other => panic!("expected logic failure, got {:?}", other),
        }
    }

    #[test]
    fn test_gated_map() {
        assert_eq!(Gated::Executed(2).map(|v| v * 10), Gated::Executed(20));
        assert_eq!(Gated::<i32>::NotExecuted.map(|v| v * 10), Gated::NotExecuted);
    }
}

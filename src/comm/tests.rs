//! Substrate Tests
//!
//! ## Test Scopes
//! - **Point-to-point**: Typed send/receive, any-source receive and rank validation.
//! - **Collectives**: The raw `Communicator` collectives, including mismatch detection.
//! - **Abort**: Aborts reach ranks that already finished, and a crashed rank
//!   tears the mesh down.
//! - **TCP**: Frame codec and a real loopback mesh.

#[cfg(test)]
mod tests {
    use crate::collective::reduction::ReduceOp;
    use crate::comm::local::{LocalTransport, run_local};
    use crate::comm::tcp::{TcpTransport, read_frame, write_frame};
    use crate::comm::types::{Envelope, Frame, Tag};
    use crate::error::Error;
    use crate::roles::gate::Gated;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::net::TcpListener;

    // ============================================================
    // TEST 1: Point-to-point
    // ============================================================

    #[tokio::test]
    async fn test_send_and_receive_typed_values() {
        let outcomes = run_local(2, |comm| async move {
            if comm.rank() == 0 {
                comm.send(&vec![1u32, 2, 3], 1, Tag::User(7)).await?;
                comm.send(&"second".to_string(), 1, Tag::User(7)).await?;
                Ok(None)
            } else {
                let first: Vec<u32> = comm.receive(0, Tag::User(7)).await?;
                let second: String = comm.receive(0, Tag::User(7)).await?;
                Ok(Some((first, second)))
            }
        })
        .await
        .unwrap();

        let received = outcomes.into_iter().nth(1).unwrap().unwrap();
        assert_eq!(received, Some((vec![1, 2, 3], "second".to_string())));
    }

    #[tokio::test]
    async fn test_receive_any_reports_sender() {
        let outcomes = run_local(4, |comm| async move {
            if comm.rank() != 0 {
                comm.send(&(comm.rank() as u64 * 11), 0, Tag::TaskQueue)
                    .await?;
                return Ok(Vec::new());
            }

            let mut seen = Vec::new();
            for _ in 1..comm.size() {
                let (source, value): (usize, u64) = comm.receive_any(Tag::TaskQueue).await?;
                seen.push((source, value));
            }
            seen.sort();
            Ok(seen)
        })
        .await
        .unwrap();

        let seen = outcomes.into_iter().next().unwrap().unwrap();
        assert_eq!(seen, vec![(1, 11), (2, 22), (3, 33)]);
    }

    #[tokio::test]
    async fn test_tags_do_not_cross() {
        let outcomes = run_local(2, |comm| async move {
            if comm.rank() == 0 {
                comm.send(&1u8, 1, Tag::User(1)).await?;
                comm.send(&2u8, 1, Tag::User(2)).await?;
                return Ok((0, 0));
            }
            // Ask for the later tag first.
            let b: u8 = comm.receive(0, Tag::User(2)).await?;
            let a: u8 = comm.receive(0, Tag::User(1)).await?;
            Ok((a, b))
        })
        .await
        .unwrap();

        assert_eq!(outcomes.into_iter().nth(1).unwrap().unwrap(), (1, 2));
    }

    #[tokio::test]
    async fn test_out_of_range_destination_is_rejected() {
        let comm = LocalTransport::cluster(2).unwrap().remove(0);

        let result = comm.send(&1u8, 5, Tag::User(0)).await;

        assert!(matches!(result, Err(Error::InvalidRank { rank: 5, size: 2 })));
    }

    #[test]
    fn test_empty_cluster_is_rejected() {
        assert!(matches!(
            LocalTransport::cluster(0),
            Err(Error::InvalidIdentity { .. })
        ));
    }

    // ============================================================
    // TEST 2: Communicator collectives
    // ============================================================

    #[tokio::test]
    async fn test_raw_collectives_in_sequence() {
        let outcomes = run_local(3, |comm| async move {
            let rank = comm.rank();
            let root_value = (rank == 0).then(|| "shared".to_string());

            let shared = comm.broadcast(root_value, 0).await?;
            let part = comm
                .scatter((rank == 1).then(|| vec![10u32, 20, 30]), 1)
                .await?;
            let gathered = comm.gather(part, 2).await?;
            let everyone = comm.all_gather(rank).await?;
            let total = comm.all_reduce(part, ReduceOp::Sum).await?;
            let smallest = comm.reduce(part, ReduceOp::Min, 0).await?;

            Ok((shared, part, gathered, everyone, total, smallest))
        })
        .await
        .unwrap();

        for (rank, outcome) in outcomes.into_iter().enumerate() {
            let (shared, part, gathered, everyone, total, smallest) = outcome.unwrap();
            assert_eq!(shared, "shared");
            assert_eq!(part, [10, 20, 30][rank]);
            assert_eq!(everyone, vec![0, 1, 2]);
            assert_eq!(total, 60);

            let expected_gather = if rank == 2 {
                Gated::Executed(vec![10, 20, 30])
            } else {
                Gated::NotExecuted
            };
            assert_eq!(gathered, expected_gather);

            let expected_min = if rank == 0 { Gated::Executed(10) } else { Gated::NotExecuted };
            assert_eq!(smallest, expected_min);
        }
    }

    #[tokio::test]
    async fn test_broadcast_without_root_value_fails_on_root() {
        let comm = LocalTransport::cluster(1).unwrap().remove(0);

        let result = comm.broadcast::<u32>(None, 0).await;

        assert!(matches!(result, Err(Error::MissingRootValue { .. })));
    }

    #[tokio::test]
    async fn test_mismatched_collectives_are_reported() {
        // Rank 0 broadcasts while rank 1 enters an all-gather.
        let outcomes = run_local(2, |comm| async move {
            if comm.rank() == 0 {
                comm.broadcast(Some(5u32), 0).await.map(|_| ())
            } else {
                comm.all_gather(9u32).await.map(|_| ())
            }
        })
        .await
        .unwrap();

        let mut outcomes = outcomes.into_iter();
        assert!(outcomes.next().unwrap().is_ok());
        match outcomes.next().unwrap() {
            Err(Error::CollectiveMismatch { expected, found }) => {
                assert!(expected.starts_with("all_gather"));
                assert!(found.starts_with("broadcast"));
            }
            other => panic!("expected CollectiveMismatch, got {:?}", other),
        }
    }

    // ============================================================
    // TEST 3: Whole-run abort
    // ============================================================

    #[tokio::test]
    async fn test_abort_after_peer_finished_still_fails_that_peer() {
        // Rank 1 is done before rank 0 aborts.
        let outcomes = run_local(2, |comm| async move {
            if comm.rank() == 0 {
                let _: u8 = comm.receive(1, Tag::User(1)).await?;
                comm.abort_all(6).await;
            } else {
                comm.send(&1u8, 0, Tag::User(1)).await?;
            }
            Ok(comm.rank())
        })
        .await
        .unwrap();

        for outcome in outcomes {
            assert!(matches!(outcome, Err(Error::ProcessAbort { origin: 0, code: 6 })));
        }
    }

    #[tokio::test]
    async fn test_finalize_fails_when_a_peer_aborted() {
        let outcomes = run_local(3, |comm| async move {
            if comm.rank() == 2 {
                comm.abort_all(1).await;
            }
            comm.finalize().await
        })
        .await
        .unwrap();

        for outcome in outcomes {
            assert!(matches!(outcome, Err(Error::ProcessAbort { origin: 2, .. })));
        }
    }

    #[tokio::test]
    async fn test_finalize_succeeds_for_a_clean_run() {
        let outcomes = run_local(3, |comm| async move { comm.finalize().await })
            .await
            .unwrap();

        assert!(outcomes.iter().all(|outcome| outcome.is_ok()));
    }

    #[tokio::test]
    async fn test_crashed_rank_aborts_the_mesh() {
        // ARRANGE: rank 1 panics while its peers wait on it
        let run = run_local(3, |comm| async move {
            if comm.rank() == 1 {
                panic!("rank crashed");
            }
            comm.receive::<u8>(1, Tag::User(2)).await
        });

        // ACT
        let outcomes = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("a crashed rank must not hang the mesh")
            .unwrap();

        // ASSERT
        for outcome in outcomes {
            let error = outcome.unwrap_err();
            assert!(matches!(error, Error::ProcessAbort { origin: 1, .. }));
            assert_ne!(error.exit_code(), 0);
        }
    }

    // ============================================================
    // TEST 4: TCP transport
    // ============================================================

    #[tokio::test]
    async fn test_frame_codec_over_a_pipe() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let frame = Frame::Message(Envelope {
            source: 3,
            tag: Tag::TaskQueue,
            payload: vec![9, 8, 7],
        });
        write_frame(&mut client, &frame).await.unwrap();
        write_frame(&mut client, &Frame::Abort { origin: 3, code: 1 })
            .await
            .unwrap();
        drop(client);

        match read_frame(&mut server).await.unwrap() {
            Some(Frame::Message(envelope)) => {
                assert_eq!(envelope.source, 3);
                assert_eq!(envelope.tag, Tag::TaskQueue);
                assert_eq!(envelope.payload, vec![9, 8, 7]);
            }
            other => panic!("expected a message frame, got {:?}", other),
        }
        assert!(matches!(
            read_frame(&mut server).await.unwrap(),
            Some(Frame::Abort { origin: 3, code: 1 })
        ));
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tcp_mesh_runs_collectives() {
        // ARRANGE: bind every rank on an ephemeral loopback port
        let size = 3;
        let mut listeners = Vec::new();
        let mut peers = Vec::new();
        for _ in 0..size {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            peers.push(listener.local_addr().unwrap());
            listeners.push(listener);
        }

        // ACT
        let handles: Vec<_> = listeners
            .into_iter()
            .enumerate()
            .map(|(rank, listener)| {
                let peers = peers.clone();
                tokio::spawn(async move {
                    let comm = TcpTransport::connect_with_listener(rank, listener, peers).await?;
                    let greeting = (comm.rank() == 0).then(|| "hello".to_string());
                    let shared = comm.broadcast(greeting, 0).await?;
                    let total = comm.all_reduce(comm.rank() as u64 + 1, ReduceOp::Sum).await?;
                    // Keep the connection open until every rank is done.
                    Ok::<_, Error>((shared, total, comm))
                })
            })
            .collect();

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap().unwrap());
        }

        // ASSERT
        for (shared, total, _comm) in &outcomes {
            assert_eq!(shared, "hello");
            assert_eq!(*total, 6);
        }
    }

    #[tokio::test]
    async fn test_tcp_abort_reaches_peers() {
        let size = 2;
        let mut listeners = Vec::new();
        let mut peers = Vec::new();
        for _ in 0..size {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            peers.push(listener.local_addr().unwrap());
            listeners.push(listener);
        }

        let handles: Vec<_> = listeners
            .into_iter()
            .enumerate()
            .map(|(rank, listener)| {
                let peers = peers.clone();
                tokio::spawn(async move {
                    let comm = TcpTransport::connect_with_listener(rank, listener, peers).await?;
                    if comm.rank() == 1 {
                        comm.abort_all(4).await;
                    }
                    let outcome = comm.receive::<u8>(1 - comm.rank(), Tag::User(0)).await;
                    Ok::<_, Error>((outcome, comm))
                })
            })
            .collect();

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap().unwrap());
        }

        for (outcome, _comm) in &outcomes {
            assert!(matches!(outcome, Err(Error::ProcessAbort { origin: 1, code: 4 })));
        }
    }

    #[tokio::test]
    async fn test_tcp_receive_fails_when_peer_disconnects() {
        let size = 2;
        let mut listeners = Vec::new();
        let mut peers = Vec::new();
        for _ in 0..size {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            peers.push(listener.local_addr().unwrap());
            listeners.push(listener);
        }

        let handles: Vec<_> = listeners
            .into_iter()
            .enumerate()
            .map(|(rank, listener)| {
                let peers = peers.clone();
                tokio::spawn(async move {
                    let comm = TcpTransport::connect_with_listener(rank, listener, peers).await?;
                    if comm.rank() == 1 {
                        // Leave without sending anything
                        drop(comm);
                        return Ok(None);
                    }
                    Ok::<_, Error>(Some(comm.receive::<u8>(1, Tag::User(3)).await))
                })
            })
            .collect();

        let mut outcomes = Vec::new();
        for handle in handles {
            let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("receive from a closed peer must not hang");
            outcomes.push(outcome.unwrap().unwrap());
        }

        assert!(matches!(outcomes[0], Some(Err(Error::Transport(_)))));
        assert!(outcomes[1].is_none());
    }
}

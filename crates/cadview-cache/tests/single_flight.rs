// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs, clippy::unwrap_used, clippy::panic)]
//! Concurrent acquisitions of one fingerprint collapse into one computation.

use std::sync::Arc;
use std::time::Duration;

use cadview_cache::{Acquired, FlightError, OwnerTicket, TessCache};
use cadview_geom::Fingerprint;
use cadview_tess::{TessellationError, TessellationResult};
use tokio::task::JoinHandle;

const JOINERS: u64 = 8;

fn key() -> Fingerprint {
    Fingerprint([7; 32])
}

fn result() -> TessellationResult {
    TessellationResult {
        points: vec![[1.0, 2.0, 3.0]],
        ..TessellationResult::default()
    }
}

async fn own(cache: &TessCache) -> OwnerTicket {
    match cache.acquire_or_wait(key()).await.unwrap() {
        Acquired::Owner(ticket) => ticket,
        other => panic!("expected ownership, got {other:?}"),
    }
}

fn spawn_joiners(cache: &TessCache) -> Vec<JoinHandle<Result<Acquired, FlightError>>> {
    (0..JOINERS)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.acquire_or_wait(key()).await })
        })
        .collect()
}

async fn until_all_joined(cache: &TessCache) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while cache.stats().joins < JOINERS {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn joiners_receive_the_owners_result() {
    let cache = TessCache::default();
    let ticket = own(&cache).await;
    let joiners = spawn_joiners(&cache);
    until_all_joined(&cache).await;

    let stored = ticket.commit(result());
    for handle in joiners {
        match handle.await.unwrap().unwrap() {
            Acquired::Joined(shared) => assert!(Arc::ptr_eq(&shared, &stored)),
            other => panic!("expected joined, got {other:?}"),
        }
    }
    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.joins, JOINERS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn joiners_receive_the_owners_failure() {
    let cache = TessCache::default();
    let ticket = own(&cache).await;
    let joiners = spawn_joiners(&cache);
    until_all_joined(&cache).await;

    ticket.fail(TessellationError::Degenerate("zero radius".into()));
    for handle in joiners {
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, FlightError::Failed(TessellationError::Degenerate(_))));
    }
    assert!(!cache.contains(&key()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dropped_owner_cancels_joiners_and_frees_the_key() {
    let cache = TessCache::default();
    let ticket = own(&cache).await;
    let joiners = spawn_joiners(&cache);
    until_all_joined(&cache).await;

    drop(ticket);
    for handle in joiners {
        assert_eq!(handle.await.unwrap().unwrap_err(), FlightError::Cancelled);
    }
    // A retry becomes the new owner.
    let retry = own(&cache).await;
    retry.commit(result());
    assert!(cache.lookup(&key()).is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_acquirers_elect_exactly_one_owner() {
    let cache = TessCache::default();
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move {
                match cache.acquire_or_wait(key()).await.unwrap() {
                    Acquired::Owner(ticket) => {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        ticket.commit(result());
                        1_u32
                    }
                    Acquired::Hit(_) | Acquired::Joined(_) => 0,
                }
            })
        })
        .collect();
    let mut owners = 0;
    for h in handles {
        owners += h.await.unwrap();
    }
    assert_eq!(owners, 1);
    assert_eq!(cache.stats().entries, 1);
}

//! Pool property-based tests
//!
//! Random interleavings of borrow, return, invalidate, idle maintenance and
//! time passing must keep the pool within capacity and keep its counters
//! consistent with what the test holds.

use std::sync::Arc;
use std::time::Duration;

use keypool_pool::{Lease, PoolConfig, ResourcePool};
use proptest::prelude::*;
use rstest::*;

use crate::fixtures::{TableFactory, initialize_logging, table_pool};

#[derive(Debug, Clone)]
enum Op {
    Borrow,
    Release(usize),
    Invalidate(usize),
    Drop(usize),
    Evict,
    Maintain,
    Sleep(u64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => Just(Op::Borrow),
        3 => any::<usize>().prop_map(Op::Release),
        1 => any::<usize>().prop_map(Op::Invalidate),
        1 => any::<usize>().prop_map(Op::Drop),
        1 => Just(Op::Evict),
        1 => Just(Op::Maintain),
        1 => (1u64..2_000).prop_map(Op::Sleep),
    ]
}

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .expect("test runtime")
}

/// Apply `ops` to a non-blocking pool, checking invariants after every step
fn run_interleaving(
    min_idle: usize,
    max_total: usize,
    ops: &[Op],
) -> Result<(), TestCaseError> {
    initialize_logging();
    let runtime = paused_runtime();
    runtime.block_on(async {
        let factory = TableFactory::new();
        let config = PoolConfig::new(min_idle, max_total)
            .with_block_when_exhausted(false)
            .with_soft_min_evictable_idle_ms(500);
        let pool = table_pool(&factory, "orders", config);
        let mut held: Vec<Lease<TableFactory>> = Vec::new();

        for op in ops {
            match op {
                Op::Borrow => match pool.borrow(Duration::from_millis(10)).await {
                    Ok(lease) => held.push(lease),
                    Err(err) => {
                        prop_assert!(err.is_retryable(), "unexpected error: {}", err);
                        prop_assert_eq!(held.len(), max_total);
                    }
                },
                Op::Release(i) if !held.is_empty() => {
                    let lease = held.swap_remove(i % held.len());
                    prop_assert!(pool.release(lease).is_ok());
                }
                Op::Invalidate(i) if !held.is_empty() => {
                    let lease = held.swap_remove(i % held.len());
                    prop_assert!(pool.invalidate(lease).await.is_ok());
                }
                Op::Drop(i) if !held.is_empty() => {
                    drop(held.swap_remove(i % held.len()));
                }
                Op::Evict => {
                    pool.evict_idle().await;
                }
                Op::Maintain => {
                    pool.run_maintenance().await;
                }
                Op::Sleep(ms) => {
                    tokio::time::advance(Duration::from_millis(*ms)).await;
                }
                _ => {}
            }

            check_invariants(&pool, &factory, &held, max_total)?;
        }

        Ok(())
    })
}

fn check_invariants(
    pool: &ResourcePool<TableFactory>,
    factory: &Arc<TableFactory>,
    held: &[Lease<TableFactory>],
    max_total: usize,
) -> Result<(), TestCaseError> {
    let stats = pool.stats();
    prop_assert!(stats.total() <= max_total, "total {} over cap {}", stats.total(), max_total);
    prop_assert_eq!(stats.active(), held.len());
    prop_assert_eq!(stats.idle() + stats.active(), stats.total());
    prop_assert_eq!(factory.live(), stats.total());
    prop_assert_eq!(stats.waiting(), 0);
    Ok(())
}

// ============================================================================
// Property-Based Tests: ResourcePool
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Test: capacity invariant under random interleavings
    ///
    /// Category: Property
    /// Verifies that idle + active never exceeds max_total and that every
    /// handle the factory created is accounted for by the pool.
    #[rstest]
    fn prop_pool_stays_within_capacity(
        max_total in 1usize..8,
        ops in prop::collection::vec(op_strategy(), 1..120)
    ) {
        run_interleaving(0, max_total, &ops)?;
    }

    /// Test: idle floor under random interleavings
    ///
    /// Category: Property
    /// Verifies the capacity invariant still holds when maintenance keeps
    /// a warm idle floor.
    #[rstest]
    fn prop_pool_with_idle_floor(
        (min_idle, max_total) in (1usize..8).prop_flat_map(|max| (0..=max, Just(max))),
        ops in prop::collection::vec(op_strategy(), 1..120)
    ) {
        run_interleaving(min_idle, max_total, &ops)?;
    }

    /// Test: borrowed handles are never shared
    ///
    /// Category: Property
    /// Verifies that no two live leases wrap the same handle.
    #[rstest]
    fn prop_leases_are_exclusive(
        max_total in 1usize..6,
        rounds in prop::collection::vec(1usize..6, 1..20)
    ) {
        let runtime = paused_runtime();
        runtime.block_on(async {
            let factory = TableFactory::new();
            let pool = table_pool(
                &factory,
                "orders",
                PoolConfig::new(0, max_total).with_block_when_exhausted(false),
            );

            for wanted in rounds {
                let mut held = Vec::new();
                for _ in 0..wanted {
                    if let Ok(lease) = pool.borrow(Duration::from_millis(10)).await {
                        held.push(lease);
                    }
                }
                prop_assert_eq!(held.len(), wanted.min(max_total));
                for lease in &held {
                    prop_assert!(lease.enter(), "handle {} lent out twice", lease.serial);
                }
                for lease in held {
                    lease.leave();
                    pool.release(lease).map_err(|e| TestCaseError::fail(e.to_string()))?;
                }
            }
            Ok(())
        })?;
    }
}

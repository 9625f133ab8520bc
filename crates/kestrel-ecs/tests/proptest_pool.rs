//! Property tests for object pools.
//!
//! Random acquire/release/reserve sequences must conserve instances: at every
//! step `in_use + available == total_created`, and a pool pre-warmed to `n`
//! never grows while at most `n` instances are held.

use kestrel_ecs::prelude::*;
use proptest::prelude::*;

#[derive(Debug, Default)]
struct Particle {
    life: u32,
}

impl Poolable for Box<Particle> {
    fn create() -> Self {
        Box::default()
    }

    fn reset(&mut self) {
        self.life = 0;
    }
}

#[derive(Debug, Clone)]
enum PoolOp {
    Acquire,
    Release(usize),
    Reserve(usize),
}

fn pool_op_strategy() -> impl Strategy<Value = PoolOp> {
    prop_oneof![
        3 => Just(PoolOp::Acquire),
        3 => (0..64usize).prop_map(PoolOp::Release),
        1 => (0..32usize).prop_map(PoolOp::Reserve),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2_000))]

    #[test]
    fn random_ops_conserve_instances(
        capacity in 0..16usize,
        ops in prop::collection::vec(pool_op_strategy(), 1..80),
    ) {
        let pool: ObjectPool<Box<Particle>> = ObjectPool::new(capacity);
        let mut held = Vec::new();

        for op in ops {
            match op {
                PoolOp::Acquire => {
                    let mut p = pool.acquire();
                    prop_assert_eq!(p.life, 0);
                    p.life = 7;
                    held.push(p);
                }
                PoolOp::Release(i) => {
                    if !held.is_empty() {
                        let p = held.swap_remove(i % held.len());
                        pool.release(p);
                    }
                }
                PoolOp::Reserve(n) => {
                    let before = pool.total_created();
                    pool.reserve(n);
                    prop_assert_eq!(pool.total_created(), before.max(n));
                }
            }
            prop_assert_eq!(pool.in_use(), held.len());
            prop_assert_eq!(pool.in_use() + pool.available(), pool.total_created());
        }
    }

    #[test]
    fn prewarmed_pool_never_grows(
        n in 1..32usize,
        pattern in prop::collection::vec(any::<bool>(), 1..200),
    ) {
        let pool: ObjectPool<Box<Particle>> = ObjectPool::new(0);
        pool.reserve(n);
        let mut held = Vec::new();

        for acquire in pattern {
            if acquire && held.len() < n {
                held.push(pool.acquire());
            } else if let Some(p) = held.pop() {
                pool.release(p);
            }
            prop_assert_eq!(pool.total_created(), n);
        }
    }
}

// ---------------------------------------------------------------------------
// Scenario: acquire beyond capacity, release, reacquire
// ---------------------------------------------------------------------------

#[test]
fn s4_pool_growth_and_reuse() {
    let pool: ObjectPool<Box<Particle>> = ObjectPool::new(2);
    let a = pool.acquire();
    let b = pool.acquire();
    let c = pool.acquire();
    let b_addr: *const Particle = &*b;
    pool.release(b);
    let d = pool.acquire();

    assert_eq!(pool.total_created(), 3);
    assert_eq!(pool.in_use(), 3);
    assert_eq!(pool.available(), 0);
    assert_eq!(&*d as *const Particle, b_addr);

    for p in [a, c, d] {
        pool.release(p);
    }
    assert_eq!(pool.available(), 3);
}

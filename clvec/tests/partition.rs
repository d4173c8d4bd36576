use clvec::{alignup, partition_by_weights, partition_equal, ClError, Context, HostConfig, ALIGNMENT};
use rand::{rngs::SmallRng, Rng, SeedableRng};

fn check(part: &[usize], n: usize, devices: usize) {
    assert_eq!(part.len(), devices + 1);
    assert_eq!(part[0], 0);
    assert_eq!(part[devices], n);
    for w in part.windows(2) {
        assert!(w[0] <= w[1], "{part:?} decreases");
    }
    for &boundary in &part[1..devices] {
        assert!(boundary == n || boundary % ALIGNMENT == 0, "{part:?} is not aligned");
    }
}

#[test]
fn equal_invariants() {
    let mut rng = SmallRng::seed_from_u64(69420);
    for n in 0..100 {
        for devices in 1..6 {
            check(&partition_equal(n, devices), n, devices);
        }
    }
    for _ in 0..1000 {
        let n = rng.gen_range(0..10_000_000);
        let devices = rng.gen_range(1..9);
        check(&partition_equal(n, devices), n, devices);
    }
}

#[test]
fn weighted_invariants() {
    let mut rng = SmallRng::seed_from_u64(69420);
    for _ in 0..1000 {
        let n = rng.gen_range(0..1_000_000);
        let devices = rng.gen_range(1..9);
        let weights: Vec<f64> = (0..devices).map(|_| rng.gen_range(0.0..100.0)).collect();
        check(&partition_by_weights(n, &weights), n, devices);
    }
}

#[test]
fn shares_follow_weights() {
    let part = partition_by_weights(1 << 20, &[1., 2., 1.]);
    assert_eq!(part, [0, 1 << 18, 3 << 18, 1 << 20]);
    assert_eq!(alignup(1, ALIGNMENT), ALIGNMENT);
}

#[test]
fn arrays_use_equal_partition() -> Result<(), ClError> {
    let queues = Context::host(&HostConfig::default().with_devices(4))?.queues();
    for n in [0, 5, 64, 1001] {
        let x = clvec::Array::<f32>::new(&queues, n)?;
        assert_eq!(x.partition(), partition_equal(n, 4));
        assert_eq!(clvec::partition(n, &queues[..1])?, [0, n]);
    }
    Ok(())
}

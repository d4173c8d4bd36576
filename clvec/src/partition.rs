//! Splitting a logical length into per-device ranges.
//!
//! A partition of `n` elements over `D` devices is a table of `D + 1`
//! non-decreasing offsets starting at 0 and ending at `n`. Device `d` holds the
//! elements `part[d]..part[d + 1]`. Inner boundaries are aligned to
//! [`ALIGNMENT`] elements.

use crate::{
    array::Array,
    backend::DeviceKey,
    config::Config,
    context::Queue,
    debug,
    error::ClError,
};
use parking_lot::Mutex;
use std::{collections::BTreeMap, time::Instant};

/// Alignment of inner partition boundaries, in elements
pub const ALIGNMENT: usize = 16;

/// Elements used by the throughput benchmark
const BENCHMARK_SIZE: usize = 1024 * 1024;

/// How arrays are split between devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionPolicy {
    /// Equal share per device
    #[default]
    Equal,
    /// Share proportional to measured vector arithmetic throughput
    VectorPerf,
}

static POLICY: Mutex<Option<PartitionPolicy>> = Mutex::new(None);

// Device throughput in 1/seconds, measured once per process
static VECTOR_PERF: Mutex<BTreeMap<DeviceKey, f64>> = Mutex::new(BTreeMap::new());

/// Rounds `n` up to a multiple of `m`
#[must_use]
pub const fn alignup(n: usize, m: usize) -> usize {
    if m == 0 {
        n
    } else {
        n.div_ceil(m) * m
    }
}

/// Partition with shares proportional to `weights`.
/// Negative and non finite weights count as zero, all zero weights split equally.
#[must_use]
pub fn partition_by_weights(n: usize, weights: &[f64]) -> Vec<usize> {
    let mut part = Vec::with_capacity(weights.len() + 1);
    part.push(0);
    if weights.is_empty() {
        return part;
    }
    let weights: Vec<f64> = weights.iter().map(|&w| if w.is_finite() && w > 0.0 { w } else { 0.0 }).collect();
    let total: f64 = weights.iter().sum();
    let (weights, total) = if total > 0.0 {
        (weights, total)
    } else {
        (vec![1.0; weights.len()], weights.len() as f64)
    };
    let mut cumulative = 0.0;
    let mut last = 0;
    for w in &weights[..weights.len() - 1] {
        cumulative += w;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let boundary = (n as f64 * cumulative / total) as usize;
        last = alignup(boundary, ALIGNMENT).min(n).max(last);
        part.push(last);
    }
    part.push(n);
    part
}

/// Partition with equal shares over `devices` devices
#[must_use]
pub fn partition_equal(n: usize, devices: usize) -> Vec<usize> {
    partition_by_weights(n, &vec![1.0; devices])
}

/// Throughput of `a = b + c` on one device, in runs per second.
/// Measured on first request for each device, memoized for the whole process.
///
/// # Errors
/// Returns error if the benchmark fails on the device.
pub fn device_vector_perf(queue: &Queue) -> Result<f64, ClError> {
    let key = queue.info().key;
    if let Some(&perf) = VECTOR_PERF.lock().get(&key) {
        return Ok(perf);
    }
    let queues = [queue.clone()];
    let a = Array::<f32>::new(&queues, BENCHMARK_SIZE)?;
    let b = Array::<f32>::new(&queues, BENCHMARK_SIZE)?;
    let c = Array::<f32>::new(&queues, BENCHMARK_SIZE)?;
    b.fill(1.0)?;
    c.fill(2.0)?;

    // Warm up, includes kernel compilation
    a.assign(&b + &c)?;
    queue.finish()?;

    let begin = Instant::now();
    a.assign(&b + &c)?;
    queue.finish()?;
    let seconds = begin.elapsed().as_secs_f64().max(f64::EPSILON);

    let perf = *VECTOR_PERF.lock().entry(key).or_insert(1.0 / seconds);
    if debug().perf() {
        tracing::info!("Device {} vector throughput {perf:.1}/s", queue.info().name);
    }
    Ok(perf)
}

/// Partition with shares proportional to measured device throughput
///
/// # Errors
/// Returns error if a benchmark fails.
pub fn partition_by_vector_perf(n: usize, queues: &[Queue]) -> Result<Vec<usize>, ClError> {
    if queues.len() < 2 {
        return Ok(partition_equal(n, queues.len()));
    }
    let weights = queues.iter().map(device_vector_perf).collect::<Result<Vec<f64>, ClError>>()?;
    Ok(partition_by_weights(n, &weights))
}

/// Policy used for new arrays. Defaults to the configured policy.
#[must_use]
pub fn partition_policy() -> PartitionPolicy {
    *POLICY.lock().get_or_insert_with(|| Config::load().partition_policy())
}

/// Sets the policy used for new arrays, for the whole process
pub fn set_partition_policy(policy: PartitionPolicy) {
    *POLICY.lock() = Some(policy);
}

/// Partition of `n` elements over `queues` under the active policy.
/// A single device always holds everything.
///
/// # Errors
/// Returns error if a throughput benchmark fails.
pub fn partition(n: usize, queues: &[Queue]) -> Result<Vec<usize>, ClError> {
    if queues.len() < 2 {
        return Ok(partition_equal(n, queues.len()));
    }
    match partition_policy() {
        PartitionPolicy::Equal => Ok(partition_equal(n, queues.len())),
        PartitionPolicy::VectorPerf => partition_by_vector_perf(n, queues),
    }
}

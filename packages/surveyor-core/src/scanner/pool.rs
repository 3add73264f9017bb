//! Bounded fan-out of probes across addresses

use super::{Probe, ProbeOutcome, ProbePhase, ProbeResult};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

/// Runs one probe per address with at most `workers` in flight.
///
/// Each pool owns its semaphore, so two phases never share permits.
pub struct WorkerPool {
    phase: ProbePhase,
    workers: usize,
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(phase: ProbePhase, workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            phase,
            workers,
            semaphore: Arc::new(Semaphore::new(workers)),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Probe every address and return one result per address, ascending.
    ///
    /// `on_progress` receives `(completed, total)` as tasks are collected.
    pub async fn sweep(
        &self,
        probe: Arc<dyn Probe>,
        addresses: &[IpAddr],
        mut on_progress: impl FnMut(usize, usize),
    ) -> Vec<ProbeResult> {
        let total = addresses.len();
        tracing::debug!(
            "{} phase: probing {} addresses with {} workers",
            self.phase,
            total,
            self.workers
        );

        let results: Arc<Mutex<Vec<ProbeResult>>> =
            Arc::new(Mutex::new(Vec::with_capacity(total)));
        let mut handles = Vec::with_capacity(total);

        for &address in addresses {
            let semaphore = Arc::clone(&self.semaphore);
            let results = Arc::clone(&results);
            let probe = Arc::clone(&probe);
            let phase = self.phase;

            let handle = tokio::spawn(async move {
                let outcome = match semaphore.acquire().await {
                    Ok(_permit) => probe.probe(address).await,
                    Err(e) => ProbeOutcome::Failed(format!("worker pool closed: {}", e)),
                };
                tracing::trace!("{} {}: {}", phase, address, outcome);
                results.lock().await.push(ProbeResult {
                    address,
                    phase,
                    outcome,
                });
            });
            handles.push(handle);
        }

        for (done, handle) in handles.into_iter().enumerate() {
            if let Err(e) = handle.await {
                tracing::warn!("{} probe task failed: {}", self.phase, e);
            }
            on_progress(done + 1, total);
        }

        let mut results = std::mem::take(&mut *results.lock().await);
        results.sort_by_key(|r| r.address);

        let responded = results.iter().filter(|r| r.outcome.is_responded()).count();
        tracing::debug!(
            "{} phase complete: {}/{} responded",
            self.phase,
            responded,
            total
        );
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Records the highest number of concurrent probes it observed
    #[derive(Default)]
    struct Gauge {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Probe for Gauge {
        async fn probe(&self, address: IpAddr) -> ProbeOutcome {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            match address {
                IpAddr::V4(v4) if v4.octets()[3] % 2 == 0 => ProbeOutcome::Responded,
                _ => ProbeOutcome::Timeout,
            }
        }
    }

    fn addresses(count: u8) -> Vec<IpAddr> {
        (1..=count)
            .map(|n| IpAddr::from([10, 0, 0, n]))
            .collect()
    }

    #[tokio::test]
    async fn test_in_flight_never_exceeds_workers() {
        let gauge = Arc::new(Gauge::default());
        let pool = WorkerPool::new(ProbePhase::Reachability, 4);
        let results = pool.sweep(gauge.clone(), &addresses(40), |_, _| {}).await;

        assert_eq!(results.len(), 40);
        let peak = gauge.peak.load(Ordering::SeqCst);
        assert!(peak <= 4, "peak in-flight was {}", peak);
        assert!(peak >= 1);
    }

    #[tokio::test]
    async fn test_results_sorted_and_complete() {
        let pool = WorkerPool::new(ProbePhase::Service, 8);
        let input: Vec<IpAddr> = addresses(20).into_iter().rev().collect();
        let results = pool.sweep(Arc::new(Gauge::default()), &input, |_, _| {}).await;

        let seen: Vec<IpAddr> = results.iter().map(|r| r.address).collect();
        assert_eq!(seen, addresses(20));
        assert!(results.iter().all(|r| r.phase == ProbePhase::Service));

        let responded: BTreeSet<IpAddr> = results
            .iter()
            .filter(|r| r.outcome.is_responded())
            .map(|r| r.address)
            .collect();
        assert_eq!(responded.len(), 10);
    }

    #[tokio::test]
    async fn test_worker_count_does_not_change_membership() {
        let input = addresses(30);
        let mut sets = Vec::new();
        for workers in [1, 3, 50] {
            let pool = WorkerPool::new(ProbePhase::Reachability, workers);
            let results = pool.sweep(Arc::new(Gauge::default()), &input, |_, _| {}).await;
            let set: BTreeSet<IpAddr> = results
                .into_iter()
                .filter(|r| r.outcome.is_responded())
                .map(|r| r.address)
                .collect();
            sets.push(set);
        }
        assert_eq!(sets[0], sets[1]);
        assert_eq!(sets[1], sets[2]);
    }

    #[tokio::test]
    async fn test_progress_reaches_total() {
        let pool = WorkerPool::new(ProbePhase::Reachability, 2);
        let mut ticks = Vec::new();
        pool.sweep(Arc::new(Gauge::default()), &addresses(5), |done, total| {
            ticks.push((done, total))
        })
        .await;
        assert_eq!(ticks.last(), Some(&(5, 5)));
        assert_eq!(ticks.len(), 5);
    }

    #[test]
    fn test_zero_workers_clamped() {
        assert_eq!(WorkerPool::new(ProbePhase::Service, 0).workers(), 1);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let pool = WorkerPool::new(ProbePhase::Service, 2);
        let results = pool.sweep(Arc::new(Gauge::default()), &[], |_, _| {}).await;
        assert!(results.is_empty());
    }
}

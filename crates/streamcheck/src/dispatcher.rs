// Probe dispatcher: fans candidates out over a fixed pool of workers.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::client::create_client;
use crate::config::ProbeConfig;
use crate::host_gate::{HostAdmission, HostMemoCache};
use crate::probe::{FailureKind, HttpProber, ProbeResult, ProbeVerdict, StreamProber};
use crate::stats::{RunStats, RunStatsSnapshot};
use crate::{Candidate, ProbeError};

/// Called once per finished candidate, in completion order
pub type ProgressCallback = Arc<dyn Fn(&ProbeResult) + Send + Sync>;

/// Runs a batch of candidates through a prober with bounded concurrency.
///
/// Every candidate handed to [`ProbeDispatcher::run`] comes back with exactly
/// one verdict, whatever happens to its probe.
///
/// Each run starts with fresh statistics and, unless a cache was injected with
/// [`ProbeDispatcher::with_host_cache`], fresh host gates.
pub struct ProbeDispatcher {
    prober: Arc<dyn StreamProber>,
    shared_host_cache: Option<Arc<HostMemoCache>>,
    config: Arc<ProbeConfig>,
    last_run: Mutex<RunState>,
    token: CancellationToken,
    on_progress: Option<ProgressCallback>,
}

/// State of the most recent run
#[derive(Default)]
struct RunState {
    host_cache: Arc<HostMemoCache>,
    stats: Arc<RunStats>,
}

impl ProbeDispatcher {
    pub fn new(prober: Arc<dyn StreamProber>, config: ProbeConfig) -> Self {
        Self {
            prober,
            shared_host_cache: None,
            config: Arc::new(config),
            last_run: Mutex::new(RunState::default()),
            token: CancellationToken::new(),
            on_progress: None,
        }
    }

    /// Dispatcher backed by the HTTP prober and a shared client.
    pub fn http(config: ProbeConfig) -> Result<Self, ProbeError> {
        config.validate()?;
        let client = create_client(&config)?;
        let config = Arc::new(config);
        let prober = Arc::new(HttpProber::new(client, config.clone()));
        Ok(Self {
            prober,
            shared_host_cache: None,
            config,
            last_run: Mutex::new(RunState::default()),
            token: CancellationToken::new(),
            on_progress: None,
        })
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    /// Ties the run to an outer token, e.g. a Ctrl-C handler.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Shares one host cache across every run of this dispatcher.
    pub fn with_host_cache(mut self, host_cache: Arc<HostMemoCache>) -> Self {
        self.last_run.get_mut().host_cache = host_cache.clone();
        self.shared_host_cache = Some(host_cache);
        self
    }

    /// Host gates used by the most recent run
    pub fn host_cache(&self) -> Arc<HostMemoCache> {
        self.last_run.lock().host_cache.clone()
    }

    /// Counters of the most recent run
    pub fn stats(&self) -> RunStatsSnapshot {
        self.last_run.lock().stats.snapshot()
    }

    /// Probes every candidate using the configured concurrency.
    pub async fn run(&self, candidates: Vec<Candidate>) -> Vec<ProbeResult> {
        self.run_with_concurrency(candidates, self.config.concurrency)
            .await
    }

    /// Probes every candidate with at most `concurrency` probes in flight.
    ///
    /// Results come back in completion order; callers that need input order
    /// sort by `candidate.seq`.
    pub async fn run_with_concurrency(
        &self,
        candidates: Vec<Candidate>,
        concurrency: usize,
    ) -> Vec<ProbeResult> {
        let total = candidates.len();
        let host_cache = self
            .shared_host_cache
            .clone()
            .unwrap_or_else(|| Arc::new(HostMemoCache::new()));
        let stats = Arc::new(RunStats::new());
        *self.last_run.lock() = RunState {
            host_cache: host_cache.clone(),
            stats: stats.clone(),
        };
        if total == 0 {
            return Vec::new();
        }

        let workers = concurrency.clamp(1, total);
        let run_token = self.token.child_token();
        info!(
            candidates = total,
            workers,
            deadline = ?self.config.batch_deadline,
            "Starting probe run"
        );

        let deadline_task = self.config.batch_deadline.map(|limit| {
            let token = run_token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                warn!(?limit, "Batch deadline reached, abandoning remaining probes");
                token.cancel();
            })
        });

        let (job_tx, job_rx) = flume::bounded::<Candidate>(workers * 2);
        let (result_tx, result_rx) = flume::unbounded::<ProbeResult>();

        let producer = tokio::spawn(async move {
            for candidate in candidates {
                if job_tx.send_async(candidate).await.is_err() {
                    break;
                }
            }
        });

        let mut worker_set = JoinSet::new();
        for worker_id in 0..workers {
            let worker = Worker {
                id: worker_id,
                prober: self.prober.clone(),
                host_cache: host_cache.clone(),
                stats: stats.clone(),
                token: run_token.clone(),
                host_gate: self.config.host_gate,
            };
            let jobs = job_rx.clone();
            let results = result_tx.clone();
            worker_set.spawn(async move {
                while let Ok(candidate) = jobs.recv_async().await {
                    let result = worker.process(candidate).await;
                    if results.send(result).is_err() {
                        break;
                    }
                }
                trace!(worker_id = worker.id, "Worker finished");
            });
        }
        drop(job_rx);
        drop(result_tx);

        let mut results = Vec::with_capacity(total);
        while let Ok(result) = result_rx.recv_async().await {
            if let Some(callback) = &self.on_progress {
                callback(&result);
            }
            results.push(result);
        }

        while let Some(joined) = worker_set.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Probe worker failed");
            }
        }
        if let Err(e) = producer.await {
            error!(error = %e, "Candidate producer failed");
        }
        if let Some(task) = deadline_task {
            task.abort();
        }

        if results.len() != total {
            error!(
                expected = total,
                got = results.len(),
                "Some candidates finished without a verdict"
            );
        }
        stats.log_summary();
        results
    }
}

struct Worker {
    id: usize,
    prober: Arc<dyn StreamProber>,
    host_cache: Arc<HostMemoCache>,
    stats: Arc<RunStats>,
    token: CancellationToken,
    host_gate: bool,
}

impl Worker {
    async fn process(&self, candidate: Candidate) -> ProbeResult {
        let verdict = if self.token.is_cancelled() {
            ProbeVerdict::dead(FailureKind::Deadline)
        } else {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => ProbeVerdict::dead(FailureKind::Deadline),
                verdict = self.gated_probe(&candidate) => verdict,
            }
        };

        self.stats.record(&verdict);
        debug!(
            worker_id = self.id,
            seq = candidate.seq,
            url = %candidate.url,
            outcome = %verdict.outcome,
            failure = ?verdict.failure.map(|f| f.to_string()),
            "Candidate probed"
        );
        ProbeResult { candidate, verdict }
    }

    async fn gated_probe(&self, candidate: &Candidate) -> ProbeVerdict {
        let host = match candidate.host_key() {
            Some(host) if self.host_gate => host,
            _ => return self.guarded_probe(candidate).await,
        };

        match self.host_cache.should_probe(&host).await {
            HostAdmission::First(ticket) => {
                let verdict = self.guarded_probe(candidate).await;
                ticket.record(verdict.is_reachable());
                verdict
            }
            HostAdmission::Open => self.guarded_probe(candidate).await,
            HostAdmission::Closed => {
                trace!(host = %host, url = %candidate.url, "Host gated, skipping probe");
                ProbeVerdict::dead(FailureKind::HostGated)
            }
        }
    }

    async fn guarded_probe(&self, candidate: &Candidate) -> ProbeVerdict {
        let _in_flight = self.stats.enter();
        match AssertUnwindSafe(self.prober.probe(candidate, &self.token))
            .catch_unwind()
            .await
        {
            Ok(verdict) => verdict,
            Err(_) => {
                error!(url = %candidate.url, "Probe panicked, recording candidate as dead");
                ProbeVerdict::dead(FailureKind::Panicked)
            }
        }
    }
}

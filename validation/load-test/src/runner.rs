//! Simulated user orchestration.

use crate::config::{TestConfig, WaitTime};
use crate::metrics::{Recorder, TestResults};
use crate::scenario::{QueryUser, Scenario};
use crate::session::HttpSession;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

/// Runs a scenario with a number of concurrent simulated users.
pub struct LoadRunner {
    client: reqwest::Client,
    config: TestConfig,
    scenario: Arc<dyn Scenario>,
}

impl LoadRunner {
    /// Create a runner for the default `GET /query` user.
    pub fn new(config: TestConfig) -> anyhow::Result<Self> {
        Self::with_scenario(config, Arc::new(QueryUser))
    }

    /// Create a runner for any scenario.
    pub fn with_scenario(config: TestConfig, scenario: Arc<dyn Scenario>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .pool_max_idle_per_host(config.users as usize)
            .build()?;

        Ok(Self {
            client,
            config,
            scenario,
        })
    }

    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    /// Run the load test until the configured duration elapses, the
    /// iteration budget is used up, or Ctrl-C is pressed.
    pub async fn run(&mut self) -> anyhow::Result<TestResults> {
        self.run_until(async {
            if tokio::signal::ctrl_c().await.is_err() {
                // No signal handler available; rely on duration/iterations
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run the load test, stopping early when `shutdown` resolves.
    pub async fn run_until<F>(&mut self, shutdown: F) -> anyhow::Result<TestResults>
    where
        F: Future<Output = ()>,
    {
        let recorder = Arc::new(self.create_recorder()?);

        let warmup_duration = Duration::from_secs(self.config.warmup_secs);
        let total_duration =
            Duration::from_secs(self.config.duration_secs + self.config.warmup_secs);

        println!("Starting load test: {}", self.config.name);
        println!("  Scenario: {}", self.scenario.name());
        println!("  Host: {}", self.config.host);
        println!("  Users: {}", self.config.users);
        println!("  Spawn rate: {:.1} users/s", self.config.spawn_rate);
        println!("  Warmup: {}s", self.config.warmup_secs);
        println!("  Test duration: {}s", self.config.duration_secs);
        if let Some(iterations) = self.config.iterations {
            println!("  Iterations: {}", iterations);
        }
        println!();

        let pb = ProgressBar::new(self.config.duration_secs);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len}s {msg}")?
                .progress_chars("##-"),
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let budget = self.config.iterations.map(|n| Arc::new(AtomicU64::new(n)));
        let spawn_interval = self.config.spawn_interval()?;

        let start = Instant::now();
        let mut test_start = start;
        let mut warmup_complete = warmup_duration.is_zero();
        let deadline = sleep(total_duration);
        let warmup_timer = sleep(warmup_duration);
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        tokio::pin!(deadline, warmup_timer, shutdown);

        let mut users = JoinSet::new();
        let mut spawned = 0u32;
        let mut next_spawn = start;

        loop {
            // Start every user whose spawn time has come
            while spawned < self.config.users && Instant::now() >= next_spawn {
                let session = HttpSession::new(self.client.clone(), &self.config.host, recorder.clone());
                users.spawn(user_loop(
                    self.scenario.clone(),
                    session,
                    budget.clone(),
                    self.config.wait_time.clone(),
                    stop_rx.clone(),
                ));
                spawned += 1;
                debug!(user = spawned, "Spawned user");
                if let Some(interval) = spawn_interval {
                    next_spawn += interval;
                }
            }

            tokio::select! {
                _ = &mut deadline => {
                    debug!("Test duration elapsed");
                    break;
                }
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping users");
                    break;
                }
                _ = &mut warmup_timer, if !warmup_complete => {
                    warmup_complete = true;
                    test_start = Instant::now();
                    recorder.reset().await;
                    pb.set_message("Test phase");
                }
                _ = sleep_until(next_spawn), if spawned < self.config.users => {}
                joined = users.join_next(), if !users.is_empty() => {
                    if let Some(Err(e)) = joined {
                        warn!(error = %e, "User task failed");
                    }
                    let budget_spent = budget
                        .as_ref()
                        .map(|b| b.load(Ordering::SeqCst) == 0)
                        .unwrap_or(false);
                    if users.is_empty() && (spawned == self.config.users || budget_spent) {
                        debug!("All users finished");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if warmup_complete {
                        let test_elapsed = test_start.elapsed().as_secs();
                        pb.set_position(test_elapsed.min(self.config.duration_secs));
                    } else {
                        pb.set_message(format!(
                            "Warmup ({}/{}s)",
                            start.elapsed().as_secs(),
                            self.config.warmup_secs
                        ));
                    }
                }
            }
        }

        // Let in-flight requests finish
        pb.set_message("Waiting for in-flight requests...");
        stop_tx.send(true).ok();
        while let Some(joined) = users.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "User task failed");
            }
        }

        pb.finish_with_message("Complete!");
        println!();

        recorder.flush().await;
        Ok(recorder
            .results(
                self.config.name.clone(),
                self.config.host.clone(),
                self.config.users,
                test_start.elapsed(),
            )
            .await)
    }

    fn create_recorder(&self) -> anyhow::Result<Recorder> {
        if !self.config.log_requests {
            return Ok(Recorder::new());
        }

        let results_dir = self.config.results_dir();
        std::fs::create_dir_all(&results_dir)?;
        let scenario_name = self.config.name.replace(' ', "_").to_lowercase();
        let log_path = results_dir.join(format!(
            "{}_{}.jsonl",
            scenario_name,
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        ));
        println!("  Logging requests to: {}", log_path.display());
        Ok(Recorder::with_log(&log_path)?)
    }
}

/// Take one ticket from the iteration budget.
fn claim_iteration(budget: &AtomicU64) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Body of one simulated user. Returns the number of tasks it ran.
async fn user_loop(
    scenario: Arc<dyn Scenario>,
    session: HttpSession,
    budget: Option<Arc<AtomicU64>>,
    wait_time: WaitTime,
    mut stop: watch::Receiver<bool>,
) -> u64 {
    let mut rng = StdRng::from_entropy();
    let mut invocations = 0u64;

    loop {
        if *stop.borrow() {
            break;
        }
        if let Some(ref budget) = budget {
            if !claim_iteration(budget) {
                break;
            }
        }

        scenario.run(&session).await;
        invocations += 1;

        let pause = wait_time.next_pause(&mut rng);
        if pause.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                _ = sleep(pause) => {}
                _ = stop.changed() => break,
            }
        }
    }

    invocations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_iteration_stops_at_zero() {
        let budget = AtomicU64::new(2);
        assert!(claim_iteration(&budget));
        assert!(claim_iteration(&budget));
        assert!(!claim_iteration(&budget));
        assert_eq!(budget.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_runner_stops_on_shutdown_signal() {
        // Nothing listens on port 9; every request fails fast
        let mut config = TestConfig::quick("http://127.0.0.1:9", 1, 1);
        config.iterations = None;
        config.duration_secs = 60;
        config.wait_time = WaitTime::Constant { secs: 0.05 };

        let mut runner = LoadRunner::new(config).unwrap();
        let results = tokio::time::timeout(
            Duration::from_secs(20),
            runner.run_until(sleep(Duration::from_millis(300))),
        )
        .await
        .expect("runner did not stop on shutdown")
        .unwrap();

        assert_eq!(results.successful_requests, 0);
        assert_eq!(results.total_requests, results.failed_requests);
    }

    /// Records when each task invocation started.
    #[derive(Default)]
    struct TimedScenario {
        started: std::sync::Mutex<Vec<Instant>>,
    }

    #[async_trait::async_trait]
    impl Scenario for TimedScenario {
        fn name(&self) -> &str {
            "timed"
        }

        async fn run(&self, _session: &HttpSession) {
            self.started.lock().unwrap().push(Instant::now());
        }
    }

    fn one_shot_per_user(users: u32, spawn_rate: f64) -> TestConfig {
        let mut config = TestConfig::quick("http://127.0.0.1:9", users, 1);
        config.iterations = None;
        config.spawn_rate = spawn_rate;
        config.duration_secs = 60;
        // Each user runs once, then parks until the run stops
        config.wait_time = WaitTime::Constant { secs: 600.0 };
        config
    }

    async fn start_times(config: TestConfig, run_for: Duration) -> Vec<Instant> {
        let scenario = Arc::new(TimedScenario::default());
        let mut runner = LoadRunner::with_scenario(config, scenario.clone()).unwrap();
        runner.run_until(sleep(run_for)).await.unwrap();
        let mut started = scenario.started.lock().unwrap().clone();
        started.sort();
        started
    }

    #[tokio::test]
    async fn test_users_are_spawned_at_spawn_rate() {
        let started = start_times(one_shot_per_user(3, 4.0), Duration::from_millis(900)).await;

        assert_eq!(started.len(), 3);
        // 4 users/s puts 250ms between consecutive spawns
        assert!(started[1] - started[0] >= Duration::from_millis(200));
        assert!(started[2] - started[0] >= Duration::from_millis(450));
    }

    #[tokio::test]
    async fn test_zero_spawn_rate_starts_all_users_at_once() {
        let started = start_times(one_shot_per_user(4, 0.0), Duration::from_millis(300)).await;

        assert_eq!(started.len(), 4);
        assert!(started[3] - started[0] < Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_ramp_up_stops_at_user_count() {
        let started = start_times(one_shot_per_user(2, 20.0), Duration::from_millis(500)).await;
        assert_eq!(started.len(), 2);
    }

    #[tokio::test]
    async fn test_tiny_spawn_rate_is_rejected_not_panicking() {
        let mut config = TestConfig::quick("http://127.0.0.1:9", 1, 1);
        config.spawn_rate = 1e-20;

        let mut runner = LoadRunner::new(config).unwrap();
        let result = runner.run_until(std::future::pending()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_request_log_goes_to_configured_results_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = TestConfig::quick("http://127.0.0.1:9", 1, 2);
        config.name = "Log Check".to_string();
        config.log_requests = true;
        config.results_dir = Some(dir.path().join("logs"));

        let mut runner = LoadRunner::new(config).unwrap();
        let results = runner.run_until(std::future::pending()).await.unwrap();
        assert_eq!(results.total_requests, 2);

        let logs: Vec<_> = std::fs::read_dir(dir.path().join("logs"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(logs.len(), 1);
        let name = logs[0].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("log_check_") && name.ends_with(".jsonl"));
        let content = std::fs::read_to_string(&logs[0]).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}

//! HTTP load generation against the storefront.
//!
//! Simulates N concurrent users, each with its own cookie session, running a
//! weighted mix of browsing, cart, login, and checkout behavior with uniform
//! think-time between actions. Checkout is kept small but non-zero in the
//! default weights so the payment/shipping/orders services still see
//! traffic during an experiment.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rand::Rng;
use regex::Regex;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::{LoadConfig, TaskWeights};

/// Product id used when the catalogue page yields nothing scrapeable.
const FALLBACK_ITEM_ID: &str = "03fef6ac-1896-4ce8-bd69-b798f85c6e0b";

/// Shared run counters, updated by every user task.
#[derive(Debug, Default)]
pub struct Counters {
    pub requests: AtomicU64,
    pub errors: AtomicU64,
    pub users_started: AtomicU64,
}

/// Final run summary.
#[derive(Debug)]
pub struct LoadReport {
    pub users: usize,
    pub requests: u64,
    pub errors: u64,
    pub elapsed: Duration,
}

impl LoadReport {
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.requests as f64 / secs
        } else {
            0.0
        }
    }
}

/// One step of simulated user behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UserTask {
    Home,
    BrowseCatalogue,
    ViewItem,
    ViewCart,
    AddToCart,
    Login,
    Checkout,
}

/// Behavior mix: browse weight covers the home and catalogue pages
/// separately, item views and cart views keep their fixed share.
fn weight_table(weights: &TaskWeights) -> [(UserTask, u32); 7] {
    [
        (UserTask::Home, weights.browse),
        (UserTask::BrowseCatalogue, weights.browse),
        (UserTask::ViewItem, 2),
        (UserTask::ViewCart, 1),
        (UserTask::AddToCart, weights.cart),
        (UserTask::Login, weights.login),
        (UserTask::Checkout, weights.checkout),
    ]
}

fn total_weight(weights: &TaskWeights) -> u32 {
    weight_table(weights).iter().map(|(_, w)| w).sum()
}

/// Map a roll in `0..total_weight` onto a task by cumulative weight.
fn pick_task(weights: &TaskWeights, roll: u32) -> UserTask {
    let mut cumulative = 0;
    for (task, weight) in weight_table(weights) {
        cumulative += weight;
        if roll < cumulative {
            return task;
        }
    }
    UserTask::Home
}

fn item_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")
            .expect("valid item id pattern")
    })
}

/// Extract product ids from a catalogue page body.
fn scrape_item_ids(body: &str) -> Vec<String> {
    item_id_pattern()
        .find_iter(body)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Run the load scenario to completion (duration elapsed or Ctrl-C).
pub async fn run(cfg: LoadConfig) -> Result<LoadReport> {
    cfg.validate()?;

    let counters = Arc::new(Counters::default());
    let stop = Arc::new(AtomicBool::new(false));
    let started = Instant::now();

    let deadline = if cfg.duration.is_zero() {
        None
    } else {
        Some(started + cfg.duration)
    };

    info!(
        users = cfg.users,
        duration_secs = cfg.duration.as_secs(),
        target = %cfg.target,
        "starting load run",
    );

    // Per-second progress reporter.
    let reporter = tokio::spawn(report_progress(
        Arc::clone(&counters),
        Arc::clone(&stop),
    ));

    // Stagger user starts across the ramp window.
    let ramp_delay = if cfg.users > 1 && !cfg.ramp.is_zero() {
        cfg.ramp / cfg.users as u32
    } else {
        Duration::ZERO
    };

    let mut users = Vec::with_capacity(cfg.users);
    for user_id in 0..cfg.users {
        if !ramp_delay.is_zero() {
            tokio::time::sleep(ramp_delay).await;
        }

        let cfg = cfg.clone();
        let counters = Arc::clone(&counters);
        let stop = Arc::clone(&stop);
        users.push(tokio::spawn(run_user(user_id, cfg, deadline, counters, stop)));
    }

    // Wait for the deadline or an interrupt, then stop every user.
    let all_users = async {
        for user in &mut users {
            let _ = user.await;
        }
    };

    tokio::select! {
        _ = all_users => {}
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, stopping load run");
        }
    }

    stop.store(true, Ordering::Relaxed);
    for user in users {
        if !user.is_finished() {
            let _ = user.await;
        }
    }
    reporter.abort();

    Ok(LoadReport {
        users: cfg.users,
        requests: counters.requests.load(Ordering::Relaxed),
        errors: counters.errors.load(Ordering::Relaxed),
        elapsed: started.elapsed(),
    })
}

async fn report_progress(counters: Arc<Counters>, stop: Arc<AtomicBool>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut previous = 0u64;

    loop {
        ticker.tick().await;
        if stop.load(Ordering::Relaxed) {
            break;
        }

        let total = counters.requests.load(Ordering::Relaxed);
        let delta = total - previous;
        previous = total;

        info!(
            active = counters.users_started.load(Ordering::Relaxed),
            rps = delta,
            total,
            errors = counters.errors.load(Ordering::Relaxed),
            "load progress",
        );
    }
}

async fn run_user(
    user_id: usize,
    cfg: LoadConfig,
    deadline: Option<Instant>,
    counters: Arc<Counters>,
    stop: Arc<AtomicBool>,
) {
    let mut session = match UserSession::new(&cfg, Arc::clone(&counters)) {
        Ok(session) => session,
        Err(e) => {
            warn!(user_id, error = %e, "failed to build user session");
            counters.errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    counters.users_started.fetch_add(1, Ordering::Relaxed);
    session.on_start(&cfg).await;

    let total = total_weight(&cfg.weights);
    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                break;
            }
        }

        let roll = rand::thread_rng().gen_range(0..total);
        session.perform(pick_task(&cfg.weights, roll), &cfg).await;

        let wait_ms = rand::thread_rng()
            .gen_range(cfg.wait_min.as_millis() as u64..=cfg.wait_max.as_millis() as u64);
        tokio::time::sleep(Duration::from_millis(wait_ms)).await;
    }
}

/// One simulated user: its own cookie jar, identity, and scraped catalogue.
struct UserSession {
    http: reqwest::Client,
    base: String,
    username: String,
    password: String,
    logged_in: bool,
    item_ids: Vec<String>,
    counters: Arc<Counters>,
}

impl UserSession {
    fn new(cfg: &LoadConfig, counters: Arc<Counters>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(30))
            .build()
            .context("building HTTP client")?;

        let suffix: u64 = rand::thread_rng().gen();
        Ok(Self {
            http,
            base: cfg.target.trim_end_matches('/').to_string(),
            username: format!("u_{:010x}", suffix & 0xff_ffff_ffff),
            password: "password".to_string(),
            logged_in: false,
            item_ids: Vec::new(),
            counters,
        })
    }

    /// Establish the session cookie, scrape product ids, and optionally
    /// register + log in.
    async fn on_start(&mut self, cfg: &LoadConfig) {
        self.get("/").await;

        if let Some(body) = self.get("/catalogue").await {
            self.item_ids = scrape_item_ids(&body);
        }
        if self.item_ids.is_empty() {
            self.item_ids = vec![FALLBACK_ITEM_ID.to_string()];
        }

        if cfg.enable_auth {
            self.ensure_logged_in().await;
        }
    }

    async fn perform(&mut self, task: UserTask, cfg: &LoadConfig) {
        match task {
            UserTask::Home => {
                self.get("/").await;
            }
            UserTask::BrowseCatalogue => {
                self.get("/catalogue").await;
                self.get("/category.html").await;
            }
            UserTask::ViewItem => {
                let id = self.random_item();
                self.get(&format!("/detail.html?id={id}")).await;
            }
            UserTask::ViewCart => {
                self.get("/basket.html").await;
            }
            UserTask::AddToCart => {
                // GET with a JSON body is what this storefront's cart
                // endpoint actually accepts.
                let id = self.random_item();
                let url = format!("{}/cart", self.base);
                let result = self
                    .http
                    .get(&url)
                    .json(&json!({"id": id, "quantity": 1}))
                    .send()
                    .await;
                self.record("/cart", result);
            }
            UserTask::Login => {
                if cfg.enable_auth {
                    self.ensure_logged_in().await;
                }
            }
            UserTask::Checkout => {
                if !cfg.enable_checkout {
                    return;
                }
                if cfg.enable_auth && !self.logged_in && !self.ensure_logged_in().await {
                    return;
                }
                self.checkout().await;
            }
        }
    }

    /// Register (tolerating "already exists"), then log in. Returns whether
    /// the session ended up authenticated.
    async fn ensure_logged_in(&mut self) -> bool {
        if self.logged_in {
            return true;
        }

        let register = json!({
            "username": self.username,
            "password": self.password,
            "email": format!("{}@test.com", self.username),
        });
        let url = format!("{}/register", self.base);
        let result = self.http.post(&url).json(&register).send().await;
        match &result {
            Ok(response) => {
                let code = response.status().as_u16();
                if !matches!(code, 200 | 201 | 204 | 409) {
                    debug!(code, "register not supported or failed");
                }
            }
            Err(e) => debug!(error = %e, "register request failed"),
        }
        self.count(result.is_err() || result.is_ok_and(|r| r.status().is_server_error()));

        let login = json!({"username": self.username, "password": self.password});
        let url = format!("{}/login", self.base);
        let result = self.http.post(&url).json(&login).send().await;
        match result {
            Ok(response) if matches!(response.status().as_u16(), 200 | 204) => {
                self.logged_in = true;
                self.count(false);
            }
            Ok(_) => self.count(true),
            Err(e) => {
                debug!(error = %e, "login request failed");
                self.count(true);
            }
        }

        self.logged_in
    }

    async fn checkout(&mut self) {
        let payload = json!({
            "address": {
                "number": "123",
                "street": "Main St",
                "city": "Bangkok",
                "postcode": "10110",
                "country": "TH",
            },
            "card": {
                "longNum": "4111111111111111",
                "expires": "12/29",
                "ccv": "123",
            },
        });

        let url = format!("{}/orders", self.base);
        let result = self.http.post(&url).json(&payload).send().await;
        self.record("/orders", result);
    }

    fn random_item(&self) -> String {
        let idx = rand::thread_rng().gen_range(0..self.item_ids.len());
        self.item_ids[idx].clone()
    }

    /// GET a path, returning the body when the request succeeded.
    async fn get(&self, path: &str) -> Option<String> {
        let url = format!("{}{}", self.base, path);
        let result = self.http.get(&url).send().await;

        match result {
            Ok(response) => {
                let failed = !response.status().is_success();
                self.count(failed);
                if failed {
                    return None;
                }
                response.text().await.ok()
            }
            Err(e) => {
                debug!(path, error = %e, "request failed");
                self.count(true);
                None
            }
        }
    }

    fn record(&self, path: &str, result: reqwest::Result<reqwest::Response>) {
        match result {
            Ok(response) => self.count(!response.status().is_success()),
            Err(e) => {
                debug!(path, error = %e, "request failed");
                self.count(true);
            }
        }
    }

    fn count(&self, failed: bool) {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_task_covers_cumulative_ranges() {
        let weights = TaskWeights::default(); // 6/3/1/1 -> table total 20

        assert_eq!(total_weight(&weights), 20);
        assert_eq!(pick_task(&weights, 0), UserTask::Home);
        assert_eq!(pick_task(&weights, 5), UserTask::Home);
        assert_eq!(pick_task(&weights, 6), UserTask::BrowseCatalogue);
        assert_eq!(pick_task(&weights, 11), UserTask::BrowseCatalogue);
        assert_eq!(pick_task(&weights, 12), UserTask::ViewItem);
        assert_eq!(pick_task(&weights, 14), UserTask::ViewCart);
        assert_eq!(pick_task(&weights, 15), UserTask::AddToCart);
        assert_eq!(pick_task(&weights, 17), UserTask::AddToCart);
        assert_eq!(pick_task(&weights, 18), UserTask::Login);
        assert_eq!(pick_task(&weights, 19), UserTask::Checkout);
    }

    #[test]
    fn test_zero_weight_tasks_are_never_picked() {
        let weights = TaskWeights {
            browse: 1,
            cart: 0,
            login: 0,
            checkout: 0,
        };

        // Table total = browse*2 + view-item 2 + view-cart 1.
        let total = total_weight(&weights);
        assert_eq!(total, 5);

        for roll in 0..total {
            let task = pick_task(&weights, roll);
            assert!(
                !matches!(
                    task,
                    UserTask::AddToCart | UserTask::Login | UserTask::Checkout
                ),
                "roll {roll} picked zero-weight task {task:?}",
            );
        }
    }

    #[test]
    fn test_scrape_item_ids_finds_uuids() {
        let body = r#"
            <a href="/detail.html?id=03fef6ac-1896-4ce8-bd69-b798f85c6e0b">socks</a>
            <a href="/detail.html?id=808A2DE1-1AAA-4C25-A9B9-6612E8F29A38">more</a>
            <a href="/about.html">nothing here</a>
        "#;

        let ids = scrape_item_ids(body);
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], "03fef6ac-1896-4ce8-bd69-b798f85c6e0b");
        // Case-insensitive, ids kept as found.
        assert_eq!(ids[1], "808A2DE1-1AAA-4C25-A9B9-6612E8F29A38");
    }

    #[test]
    fn test_scrape_item_ids_empty_body() {
        assert!(scrape_item_ids("<html></html>").is_empty());
    }

    #[test]
    fn test_throughput_handles_zero_elapsed() {
        let report = LoadReport {
            users: 1,
            requests: 10,
            errors: 0,
            elapsed: Duration::ZERO,
        };
        assert_eq!(report.throughput(), 0.0);
    }
}

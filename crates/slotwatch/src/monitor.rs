use std::time::Duration;

use crate::alert::{AlertPayload, Alerter};
use crate::client::{ClientError, WidgetClient};
use crate::config::MonitorConfig;
use crate::parser;
use crate::proxy::{ProxyError, ProxyPool, ProxyServer};
use crate::types::{Availability, ProbeReport, Route};

/// Backoff stops doubling here: at the default interval that is 8 minutes
/// between attempts.
const MAX_BACKOFF_FACTOR: u32 = 8;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Proxy list error: {0}")]
    Proxy(#[from] ProxyError),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// The polling loop: probe on a timer through rotating proxies, fall back to
/// a direct connection, back off on repeated failure, and fan out alerts
/// when availability appears.
pub struct Monitor {
    config: MonitorConfig,
    pool: ProxyPool,
    alerter: Alerter,
    cycle: u64,
    consecutive_failures: u32,
    /// Set from `config.simulate`; cleared when the fabricated report has
    /// been emitted, so failed cycles do not burn the simulation.
    simulate_pending: bool,
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Result<Self, MonitorError> {
        let pool = match &config.proxy_file {
            Some(path) => ProxyPool::from_file(path)?,
            None => ProxyPool::new(Vec::new()),
        };
        let alerter = Alerter::new(&config)?;
        let simulate_pending = config.simulate;
        Ok(Monitor {
            config,
            pool,
            alerter,
            cycle: 0,
            consecutive_failures: 0,
            simulate_pending,
        })
    }

    pub async fn run(&mut self) {
        log::info!(
            "Monitoring {} every {}s ({})",
            self.config.target.widget_url(),
            self.config.interval.as_secs(),
            self.pool.status()
        );
        if self.config.simulate {
            log::warn!("Simulation enabled: the first report that arrives will be replaced by a fabricated positive");
        }
        self.alerter
            .announce_start(&self.config, self.pool.status())
            .await;

        loop {
            self.cycle_once().await;
            let wait = backoff_interval(self.config.interval, self.consecutive_failures);
            if wait > self.config.interval {
                log::warn!(
                    "{} consecutive failed cycles, backing off for {}s",
                    self.consecutive_failures,
                    wait.as_secs()
                );
            }
            tokio::time::sleep(wait).await;
        }
    }

    /// One probe cycle. Tries the next proxy first when a pool is loaded,
    /// then retries direct; a blocking error quarantines the proxy that
    /// produced it.
    pub async fn cycle_once(&mut self) {
        self.cycle += 1;
        log::info!("Cycle #{} starting ({})", self.cycle, self.pool.status());

        let mut attempts: Vec<Option<ProxyServer>> = Vec::new();
        if !self.pool.is_empty() {
            if let Some(server) = self.pool.next() {
                attempts.push(Some(server));
            }
        }
        attempts.push(None);

        for proxy in attempts {
            match self.attempt(proxy.as_ref()).await {
                Ok(report) => {
                    self.consecutive_failures = 0;
                    let report = if self.take_simulation() {
                        log::warn!("SIMULATION: replacing real report ({}) with a fabricated positive", report);
                        simulated_report()
                    } else {
                        report
                    };
                    self.handle_report(report).await;
                    return;
                }
                Err(e) => {
                    let route = proxy
                        .as_ref()
                        .map(|p| Route::Proxy(p.to_string()))
                        .unwrap_or(Route::Direct);
                    log::error!("Cycle #{} failed via {}: {}", self.cycle, route, e);
                    if e.is_blocking()
                        && let Some(server) = &proxy
                    {
                        self.pool.quarantine(server, &e.to_string());
                    }
                }
            }
        }

        self.consecutive_failures += 1;
        log::error!(
            "Cycle #{} exhausted every route ({} consecutive failures)",
            self.cycle,
            self.consecutive_failures
        );
    }

    /// True exactly once, for the first report that actually arrives. The
    /// simulation must survive fully-failed cycles, so this is not tied to
    /// the cycle counter.
    fn take_simulation(&mut self) -> bool {
        let pending = self.simulate_pending;
        self.simulate_pending = false;
        pending
    }

    async fn attempt(&self, proxy: Option<&ProxyServer>) -> Result<ProbeReport, ClientError> {
        // Fresh client per attempt: the provider ties tokens to the cookie
        // jar, and a poisoned session must not leak into the next try.
        let client = WidgetClient::new(self.config.target.clone(), proxy)?;
        client.probe().await
    }

    async fn handle_report(&mut self, report: ProbeReport) {
        log::info!("Cycle #{}: {}", self.cycle, report);

        match alert_reason(&report) {
            Some(reason) => {
                let payload = AlertPayload {
                    booking_url: self.config.target.widget_url(),
                    reason: reason.to_string(),
                    cycle: self.cycle,
                    proxies: self.pool.status(),
                    report,
                };
                self.alerter.send(&payload).await;
            }
            None if report.has_content() => {
                log::info!("Cycle #{}: no-availability notice confirmed", self.cycle)
            }
            None => log::warn!("Cycle #{}: empty response, nothing to classify", self.cycle),
        }
    }
}

/// Alerting policy: anything with content that does not carry the
/// no-availability notice is worth a human look.
pub fn alert_reason(report: &ProbeReport) -> Option<&'static str> {
    match report.availability {
        Availability::SlotsDetected => {
            Some("slot markup present without the no-availability notice")
        }
        Availability::Inconclusive => {
            Some("no-availability notice missing from a non-empty response")
        }
        Availability::NoSlots | Availability::Empty => None,
    }
}

fn backoff_interval(base: Duration, consecutive_failures: u32) -> Duration {
    let factor = 2u32
        .saturating_pow(consecutive_failures)
        .min(MAX_BACKOFF_FACTOR);
    base * factor
}

fn simulated_report() -> ProbeReport {
    let content = "<div class=\"clsDivDatetimeSlot\"><a onclick=\"selecttime('2025-10-02','09:30')\">09:30 - Hueco libre</a></div>";
    let (availability, markers) = parser::classify(content);
    ProbeReport::new(availability, markers, content, Route::Direct)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(availability: Availability) -> ProbeReport {
        ProbeReport::new(availability, Vec::new(), "body", Route::Direct)
    }

    #[test]
    fn alerts_on_slots_and_inconclusive_only() {
        assert!(alert_reason(&report(Availability::SlotsDetected)).is_some());
        assert!(alert_reason(&report(Availability::Inconclusive)).is_some());
        assert!(alert_reason(&report(Availability::NoSlots)).is_none());
        assert!(alert_reason(&report(Availability::Empty)).is_none());
    }

    #[test]
    fn empty_report_is_not_inconclusive() {
        let r = ProbeReport::new(Availability::Empty, Vec::new(), "", Route::Direct);
        assert!(!r.has_content());
        assert!(alert_reason(&r).is_none());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(60);
        assert_eq!(backoff_interval(base, 0), base);
        assert_eq!(backoff_interval(base, 1), base * 2);
        assert_eq!(backoff_interval(base, 2), base * 4);
        assert_eq!(backoff_interval(base, 3), base * 8);
        assert_eq!(backoff_interval(base, 10), base * 8);
    }

    #[test]
    fn simulated_report_trips_the_alert_path() {
        let r = simulated_report();
        assert_eq!(r.availability, Availability::SlotsDetected);
        assert!(r.markers.contains(&"Hueco libre".to_string()));
        assert!(alert_reason(&r).is_some());
    }

    #[test]
    fn simulation_survives_failed_cycles_and_fires_once() {
        let config = MonitorConfig {
            simulate: true,
            ..MonitorConfig::default()
        };
        let mut monitor = Monitor::new(config).expect("Should build");

        // Cycles 1..=3 produced no report at all; the simulation must still
        // be armed for whichever report arrives first.
        monitor.cycle = 4;
        monitor.consecutive_failures = 3;
        assert!(monitor.take_simulation());

        // One-shot: later reports are real.
        assert!(!monitor.take_simulation());
    }

    #[test]
    fn simulation_off_by_default() {
        let mut monitor = Monitor::new(MonitorConfig::default()).expect("Should build");
        assert!(!monitor.take_simulation());
    }

    #[test]
    fn monitor_builds_without_network() {
        let monitor = Monitor::new(MonitorConfig::default()).expect("Should build");
        assert_eq!(monitor.cycle, 0);
        assert!(monitor.pool.is_empty());
    }

    #[test]
    fn missing_proxy_file_is_an_error() {
        let config = MonitorConfig {
            proxy_file: Some("does/not/exist.txt".into()),
            ..MonitorConfig::default()
        };
        assert!(matches!(
            Monitor::new(config),
            Err(MonitorError::Proxy(_))
        ));
    }
}

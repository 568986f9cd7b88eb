//! Connectivity evaluation
//!
//! Fans probes out to every target plus one DNS lookup, joins them and reduces
//! the outcomes to a single `HealthVerdict`.

use crate::sickbay::probe::{FailureReason, ProbeOutcome, ProbeTarget, Prober};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Health of the host's connectivity for one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    /// DNS works or enough targets answered
    Healthy,
    /// Some targets answered, but too few; counted as a failure
    Degraded,
    /// Nothing answered
    Unhealthy,
}

impl Health {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Health::Healthy)
    }
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Health::Healthy => write!(f, "healthy"),
            Health::Degraded => write!(f, "degraded"),
            Health::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Headline diagnosis for the fault report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Diagnosis {
    /// Every probe succeeded
    AllReachable,
    /// Some reachability probes failed
    PartialPingLoss,
    /// Name resolution works but no target answered (ICMP filtered?)
    DnsOnly,
    /// Targets answer but the resolver does not
    DnsResolutionFailed,
    /// Nothing succeeded
    AllProbesFailed,
}

impl std::fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Diagnosis::AllReachable => write!(f, "all probes reachable"),
            Diagnosis::PartialPingLoss => write!(f, "partial probe loss"),
            Diagnosis::DnsOnly => write!(f, "only DNS resolution succeeded"),
            Diagnosis::DnsResolutionFailed => write!(f, "DNS resolution failed"),
            Diagnosis::AllProbesFailed => write!(f, "all probes failed"),
        }
    }
}

/// Outcome of the probe against one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetResult {
    pub target: ProbeTarget,
    pub outcome: ProbeOutcome,
}

/// Aggregate verdict of one evaluation cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthVerdict {
    pub health: Health,
    pub diagnosis: Diagnosis,
    /// Most frequent individual failure reason, if anything failed
    pub dominant_failure: Option<FailureReason>,
    pub reachable: usize,
    pub total: usize,
    pub dns: ProbeOutcome,
    pub results: Vec<TargetResult>,
}

impl HealthVerdict {
    /// Reduce individual outcomes to a verdict
    ///
    /// Healthy when DNS resolves or at least 30% of targets answer. The floor
    /// is integer arithmetic so 3 of 10 is exactly on it.
    pub fn classify(results: Vec<TargetResult>, dns: ProbeOutcome) -> Self {
        let total = results.len();
        let reachable = results.iter().filter(|r| r.outcome.is_reachable()).count();
        let dns_ok = dns.is_reachable();
        let quorum = total > 0 && reachable * 10 >= total * 3;

        let health = if dns_ok || quorum {
            Health::Healthy
        } else if reachable > 0 {
            Health::Degraded
        } else {
            Health::Unhealthy
        };

        let diagnosis = if reachable == total && dns_ok {
            Diagnosis::AllReachable
        } else if reachable == 0 && !dns_ok {
            Diagnosis::AllProbesFailed
        } else if reachable == total {
            Diagnosis::DnsResolutionFailed
        } else if reachable == 0 {
            Diagnosis::DnsOnly
        } else {
            Diagnosis::PartialPingLoss
        };

        let failures = results
            .iter()
            .filter_map(|r| r.outcome.failure())
            .chain(dns.failure());
        let dominant_failure = dominant(failures);

        Self {
            health,
            diagnosis,
            dominant_failure,
            reachable,
            total,
            dns,
            results,
        }
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        let dns = if self.dns.is_reachable() { "ok" } else { "fail" };
        format!(
            "{} ({}/{} reachable, dns {}): {}",
            self.health, self.reachable, self.total, dns, self.diagnosis
        )
    }

    /// Human-readable fault analysis
    pub fn analysis(&self) -> String {
        let mut notes = Vec::new();

        if self.reachable == 0 && self.total > 0 {
            notes.push("every reachability probe failed, local link may be down".to_string());
        } else if self.reachable < self.total {
            notes.push(format!(
                "partial probe loss ({}/{} reachable), network may be unstable",
                self.reachable, self.total
            ));
        }

        if let Some(reason) = self.dns.failure() {
            notes.push(format!("DNS probe failed ({}), resolver may be unreachable", reason));
        }

        if let Some(reason) = self.dominant_failure {
            notes.push(format!("dominant failure: {}", reason));
        }

        if notes.is_empty() {
            "no fault detected".to_string()
        } else {
            notes.join("; ")
        }
    }
}

/// Most frequent reason; ties go to Timeout, then Refused
fn dominant(reasons: impl Iterator<Item = FailureReason>) -> Option<FailureReason> {
    const ORDER: [FailureReason; 3] = [
        FailureReason::Timeout,
        FailureReason::Refused,
        FailureReason::ResolutionFailed,
    ];

    let mut counts = [0usize; 3];
    for reason in reasons {
        if let Some(idx) = ORDER.iter().position(|r| *r == reason) {
            counts[idx] += 1;
        }
    }

    let mut best: Option<(FailureReason, usize)> = None;
    for (reason, count) in ORDER.iter().zip(counts) {
        if count > best.map(|(_, c)| c).unwrap_or(0) {
            best = Some((*reason, count));
        }
    }
    best.map(|(reason, _)| reason)
}

/// Runs the configured probes and classifies the result
pub struct ProbeAggregator {
    prober: Arc<dyn Prober>,
    targets: Vec<ProbeTarget>,
    dns_name: String,
    timeout: Duration,
}

impl ProbeAggregator {
    pub fn new(
        prober: Arc<dyn Prober>,
        targets: Vec<ProbeTarget>,
        dns_name: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            prober,
            targets,
            dns_name: dns_name.into(),
            timeout,
        }
    }

    /// Evaluate the configured targets
    pub async fn evaluate(&self) -> HealthVerdict {
        self.evaluate_targets(&self.targets, self.timeout).await
    }

    /// Evaluate an explicit target list
    ///
    /// All probes and the DNS lookup run concurrently; wall-clock cost is
    /// bounded by `timeout`.
    pub async fn evaluate_targets(&self, targets: &[ProbeTarget], timeout: Duration) -> HealthVerdict {
        let probes = targets.iter().map(|target| async move {
            let outcome = tokio::time::timeout(timeout, self.prober.probe(target, timeout))
                .await
                .unwrap_or(ProbeOutcome::failed(FailureReason::Timeout));
            TargetResult {
                target: target.clone(),
                outcome,
            }
        });

        let dns = async {
            tokio::time::timeout(timeout, self.prober.resolve(&self.dns_name, timeout))
                .await
                .unwrap_or(ProbeOutcome::failed(FailureReason::Timeout))
        };

        let (results, dns) = tokio::join!(join_all(probes), dns);

        for r in &results {
            debug!(target_host = %r.target, outcome = ?r.outcome, "probe finished");
        }
        debug!(name = %self.dns_name, outcome = ?dns, "dns probe finished");

        HealthVerdict::classify(results, dns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeProber;

    fn ok() -> ProbeOutcome {
        ProbeOutcome::Reachable {
            latency: Duration::from_millis(10),
        }
    }

    fn fail(reason: FailureReason) -> ProbeOutcome {
        ProbeOutcome::failed(reason)
    }

    fn results(outcomes: &[ProbeOutcome]) -> Vec<TargetResult> {
        outcomes
            .iter()
            .enumerate()
            .map(|(i, o)| TargetResult {
                target: ProbeTarget::Host(format!("10.0.0.{}", i + 1)),
                outcome: *o,
            })
            .collect()
    }

    #[test]
    fn test_health_display() {
        assert_eq!(Health::Healthy.to_string(), "healthy");
        assert_eq!(Health::Degraded.to_string(), "degraded");
        assert_eq!(Health::Unhealthy.to_string(), "unhealthy");
    }

    #[test]
    fn test_all_reachable() {
        let v = HealthVerdict::classify(results(&[ok(), ok(), ok()]), ok());
        assert_eq!(v.health, Health::Healthy);
        assert_eq!(v.diagnosis, Diagnosis::AllReachable);
        assert_eq!(v.dominant_failure, None);
        assert_eq!(v.analysis(), "no fault detected");
    }

    #[test]
    fn test_quorum_without_dns_is_healthy() {
        // 1 of 3 is 33%, above the floor
        let outcomes = [ok(), fail(FailureReason::Timeout), fail(FailureReason::Timeout)];
        let v = HealthVerdict::classify(results(&outcomes), fail(FailureReason::ResolutionFailed));
        assert_eq!(v.health, Health::Healthy);
        assert_eq!(v.diagnosis, Diagnosis::PartialPingLoss);
        assert_eq!(v.dominant_failure, Some(FailureReason::Timeout));
    }

    #[test]
    fn test_dns_alone_is_healthy() {
        let outcomes = [fail(FailureReason::Refused), fail(FailureReason::Refused)];
        let v = HealthVerdict::classify(results(&outcomes), ok());
        assert_eq!(v.health, Health::Healthy);
        assert_eq!(v.diagnosis, Diagnosis::DnsOnly);
        assert_eq!(v.reachable, 0);
    }

    #[test]
    fn test_exact_floor() {
        // 3 of 10 sits exactly on 30%
        let mut outcomes = vec![ok(); 3];
        outcomes.extend(vec![fail(FailureReason::Timeout); 7]);
        let v = HealthVerdict::classify(results(&outcomes), fail(FailureReason::Timeout));
        assert_eq!(v.health, Health::Healthy);

        // 2 of 10 is below it
        let mut outcomes = vec![ok(); 2];
        outcomes.extend(vec![fail(FailureReason::Timeout); 8]);
        let v = HealthVerdict::classify(results(&outcomes), fail(FailureReason::Timeout));
        assert_eq!(v.health, Health::Degraded);
        assert_eq!(v.diagnosis, Diagnosis::PartialPingLoss);
    }

    #[test]
    fn test_nothing_answers() {
        let outcomes = [fail(FailureReason::Timeout), fail(FailureReason::Refused)];
        let v = HealthVerdict::classify(results(&outcomes), fail(FailureReason::Refused));
        assert_eq!(v.health, Health::Unhealthy);
        assert_eq!(v.diagnosis, Diagnosis::AllProbesFailed);
        assert_eq!(v.dominant_failure, Some(FailureReason::Refused));
        assert!(v.analysis().contains("every reachability probe failed"));
        assert!(v.analysis().contains("DNS probe failed"));
    }

    #[test]
    fn test_dns_failure_with_all_targets_up() {
        let v = HealthVerdict::classify(results(&[ok(), ok()]), fail(FailureReason::ResolutionFailed));
        assert_eq!(v.health, Health::Healthy);
        assert_eq!(v.diagnosis, Diagnosis::DnsResolutionFailed);
        assert_eq!(v.dominant_failure, Some(FailureReason::ResolutionFailed));
    }

    #[test]
    fn test_empty_targets_depend_on_dns() {
        let v = HealthVerdict::classify(Vec::new(), fail(FailureReason::Timeout));
        assert_eq!(v.health, Health::Unhealthy);

        let v = HealthVerdict::classify(Vec::new(), ok());
        assert_eq!(v.health, Health::Healthy);
    }

    #[test]
    fn test_dominant_tie_prefers_timeout() {
        let reasons = [
            FailureReason::Refused,
            FailureReason::Timeout,
            FailureReason::ResolutionFailed,
        ];
        assert_eq!(dominant(reasons.into_iter()), Some(FailureReason::Timeout));

        let reasons = [
            FailureReason::ResolutionFailed,
            FailureReason::ResolutionFailed,
            FailureReason::Timeout,
        ];
        assert_eq!(
            dominant(reasons.into_iter()),
            Some(FailureReason::ResolutionFailed)
        );

        assert_eq!(dominant(std::iter::empty()), None);
    }

    #[tokio::test]
    async fn test_evaluate_uses_prober() {
        let prober = FakeProber::new()
            .with_target("8.8.8.8", ok())
            .with_target("1.1.1.1", fail(FailureReason::Timeout))
            .with_dns(fail(FailureReason::ResolutionFailed));
        let aggregator = ProbeAggregator::new(
            Arc::new(prober),
            vec![ProbeTarget::parse("8.8.8.8"), ProbeTarget::parse("1.1.1.1")],
            "google.com",
            Duration::from_secs(1),
        );

        let v = aggregator.evaluate().await;
        assert_eq!(v.health, Health::Healthy);
        assert_eq!(v.reachable, 1);
        assert_eq!(v.total, 2);
        assert_eq!(v.results[0].target.as_str(), "8.8.8.8");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_probes_time_out_concurrently() {
        let prober = FakeProber::new()
            .with_hang("10.0.0.1")
            .with_hang("10.0.0.2")
            .with_hang("10.0.0.3")
            .with_dns(fail(FailureReason::ResolutionFailed));
        let aggregator = ProbeAggregator::new(
            Arc::new(prober),
            vec![
                ProbeTarget::parse("10.0.0.1"),
                ProbeTarget::parse("10.0.0.2"),
                ProbeTarget::parse("10.0.0.3"),
            ],
            "google.com",
            Duration::from_secs(5),
        );

        let started = tokio::time::Instant::now();
        let v = aggregator.evaluate().await;

        // Joined, not sequential: one timeout worth of wall clock
        assert!(started.elapsed() < Duration::from_secs(6));
        assert_eq!(v.health, Health::Unhealthy);
        assert_eq!(v.dominant_failure, Some(FailureReason::Timeout));
    }
}

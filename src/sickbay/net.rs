//! Network probes against the real world
//!
//! ICMP echo through surge-ping, name resolution through hickory using the
//! system resolver configuration, and plain GETs through ureq for URL targets.

use crate::sickbay::probe::{FailureReason, ProbeOutcome, ProbeTarget, Prober};
use async_trait::async_trait;
use hickory_resolver::TokioResolver;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use surge_ping::{Client, Config, ICMP, PingIdentifier, PingSequence, SurgeError};
use tracing::{debug, warn};

const PAYLOAD: [u8; 56] = [0; 56];

/// Prober backed by raw sockets and the system resolver
pub struct NetProber {
    icmp_v4: Option<Client>,
    icmp_v6: Option<Client>,
}

impl NetProber {
    /// Open ICMP sockets; a family that can't be opened fails its probes
    pub fn new() -> Self {
        let icmp_v4 = Client::new(&Config::default())
            .map_err(|e| warn!(error = %e, "ICMPv4 socket unavailable, IPv4 pings will fail"))
            .ok();
        let icmp_v6 = Client::new(&Config::builder().kind(ICMP::V6).build())
            .map_err(|e| debug!(error = %e, "ICMPv6 socket unavailable"))
            .ok();

        Self { icmp_v4, icmp_v6 }
    }

    /// A fresh resolver per lookup, so a cached answer never masks a dead resolver
    fn resolver() -> TokioResolver {
        match TokioResolver::builder(TokioConnectionProvider::default()) {
            Ok(builder) => builder.build(),
            Err(e) => {
                warn!(error = %e, "system resolver config unreadable, using Cloudflare");
                TokioResolver::builder_with_config(
                    ResolverConfig::cloudflare(),
                    TokioConnectionProvider::default(),
                )
                .build()
            }
        }
    }

    async fn lookup(name: &str) -> Result<IpAddr, FailureReason> {
        if let Ok(ip) = name.parse::<IpAddr>() {
            return Ok(ip);
        }

        match Self::resolver().lookup_ip(name).await {
            Ok(lookup) => lookup.iter().next().ok_or(FailureReason::ResolutionFailed),
            Err(e) => {
                debug!(name, error = %e, "lookup failed");
                Err(FailureReason::ResolutionFailed)
            }
        }
    }

    async fn ping(&self, host: &str, timeout: Duration) -> ProbeOutcome {
        let ip = match Self::lookup(host).await {
            Ok(ip) => ip,
            Err(reason) => return ProbeOutcome::failed(reason),
        };

        let client = match ip {
            IpAddr::V4(_) => self.icmp_v4.as_ref(),
            IpAddr::V6(_) => self.icmp_v6.as_ref(),
        };
        let Some(client) = client else {
            return ProbeOutcome::failed(FailureReason::Refused);
        };

        let mut pinger = client.pinger(ip, PingIdentifier(rand::random())).await;
        pinger.timeout(timeout);

        match pinger.ping(PingSequence(0), &PAYLOAD).await {
            Ok((_, latency)) => ProbeOutcome::Reachable { latency },
            Err(SurgeError::Timeout { .. }) => ProbeOutcome::failed(FailureReason::Timeout),
            Err(e) => {
                debug!(host, error = %e, "ping rejected");
                ProbeOutcome::failed(FailureReason::Refused)
            }
        }
    }

    async fn http(url: &str, timeout: Duration) -> ProbeOutcome {
        let url = url.to_string();
        let task = tokio::task::spawn_blocking(move || {
            let agent: ureq::Agent = ureq::Agent::config_builder()
                .timeout_global(Some(timeout))
                .http_status_as_error(false)
                .build()
                .into();

            let started = Instant::now();
            match agent.get(&url).call() {
                // Any HTTP answer proves the path works
                Ok(_) => ProbeOutcome::Reachable {
                    latency: started.elapsed(),
                },
                Err(ureq::Error::Timeout(_)) => ProbeOutcome::failed(FailureReason::Timeout),
                Err(ureq::Error::HostNotFound) => {
                    ProbeOutcome::failed(FailureReason::ResolutionFailed)
                }
                Err(e) => {
                    debug!(url = %url, error = %e, "http probe failed");
                    ProbeOutcome::failed(FailureReason::Refused)
                }
            }
        });

        task.await
            .unwrap_or(ProbeOutcome::failed(FailureReason::Refused))
    }
}

impl Default for NetProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Prober for NetProber {
    async fn probe(&self, target: &ProbeTarget, timeout: Duration) -> ProbeOutcome {
        match target {
            ProbeTarget::Host(host) => self.ping(host, timeout).await,
            ProbeTarget::Http(url) => Self::http(url, timeout).await,
        }
    }

    async fn resolve(&self, name: &str, _timeout: Duration) -> ProbeOutcome {
        let started = Instant::now();
        match Self::resolver().lookup_ip(name).await {
            Ok(lookup) if lookup.iter().next().is_some() => ProbeOutcome::Reachable {
                latency: started.elapsed(),
            },
            Ok(_) => ProbeOutcome::failed(FailureReason::ResolutionFailed),
            Err(e) => {
                debug!(name, error = %e, "dns probe failed");
                ProbeOutcome::failed(FailureReason::ResolutionFailed)
            }
        }
    }
}

use crate::config::DEFAULT_LOG_FILTER;
use crate::peer::transport::Connectivity;
use tracing::{debug, warn};
use tracing_subscriber::{fmt::time::ChronoLocal, EnvFilter};

/// Installs the global subscriber. `RUST_LOG` overrides `filter`.
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging(filter: Option<&str>) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter.unwrap_or(DEFAULT_LOG_FILTER)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Logs one local ICE candidate as it is discovered.
pub fn dump_candidate(label: &str, candidate: &str) {
    debug!("trickle {label}: {candidate}");
}

/// Host/srflx/relay breakdown of the candidates embedded in a final SDP.
pub fn analyze_candidates(sdp: &str) {
    let mut host = 0;
    let mut srflx = 0;
    let mut relay = 0;
    for line in sdp.lines().filter(|l| l.starts_with("a=candidate:")) {
        if line.contains("typ host") {
            host += 1;
        } else if line.contains("typ srflx") {
            srflx += 1;
        } else if line.contains("typ relay") {
            relay += 1;
        }
    }
    debug!("candidate analysis: {host} host, {srflx} srflx, {relay} relay");
    if srflx == 0 && relay == 0 {
        warn!("no server-reflexive or relay candidates; peers behind NAT may not connect");
    }
}

pub fn log_connectivity(state: Connectivity) {
    match state {
        Connectivity::Failed | Connectivity::Disconnected => warn!("connectivity: {state:?}"),
        _ => debug!("connectivity: {state:?}"),
    }
}

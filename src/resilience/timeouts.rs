//! Timeout-bounded waits.
//!
//! # Responsibilities
//! - Wait for a draining member's in-flight requests to finish
//! - Give up at a deadline instead of blocking forever
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - A timed-out drain is reported, not an error: the caller force-terminates

use std::time::Duration;
use tokio::time;

use crate::fleet::FleetMember;

const DRAIN_POLL: Duration = Duration::from_millis(50);

/// True if in-flight requests reached zero before `timeout`.
pub async fn wait_for_drain(member: &FleetMember, timeout: Duration) -> bool {
    let drained = time::timeout(timeout, async {
        while member.in_flight() > 0 {
            time::sleep(DRAIN_POLL).await;
        }
    })
    .await
    .is_ok();

    if !drained {
        tracing::warn!(
            member = %member.id,
            in_flight = member.in_flight(),
            timeout = ?timeout,
            "Drain timed out, forcing termination"
        );
    }
    drained
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::MemberId;
    use crate::provision::Instance;
    use std::sync::Arc;

    fn member() -> Arc<FleetMember> {
        Arc::new(FleetMember::new(
            Instance {
                id: MemberId::new("i-drain"),
                address: "127.0.0.1:9".parse().unwrap(),
            },
            1,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_member_drains_immediately() {
        assert!(wait_for_drain(&member(), Duration::from_secs(30)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_in_flight_requests() {
        let m = member();
        let guard = m.begin_request();
        tokio::spawn(async move {
            time::sleep(Duration::from_secs(2)).await;
            drop(guard);
        });

        let start = time::Instant::now();
        assert!(wait_for_drain(&m, Duration::from_secs(30)).await);
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_request_hits_timeout() {
        let m = member();
        let _guard = m.begin_request();
        assert!(!wait_for_drain(&m, Duration::from_secs(5)).await);
        assert_eq!(m.in_flight(), 1);
    }
}

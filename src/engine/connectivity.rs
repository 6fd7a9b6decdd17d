use crate::model::Connectivity;
use futures::future::{join_all, BoxFuture};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;

/// Reachability check run once per run before any network job.
pub trait ConnectivityProbe: Send + Sync {
    fn probe(&self, timeout: Duration) -> BoxFuture<'_, Connectivity>;
}

/// Probe by opening TCP connections to well-known anycast resolvers.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    pub v4_targets: Vec<SocketAddr>,
    pub v6_targets: Vec<SocketAddr>,
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self {
            v4_targets: vec![
                SocketAddr::from((Ipv4Addr::new(1, 1, 1, 1), 443)),
                SocketAddr::from((Ipv4Addr::new(8, 8, 8, 8), 443)),
            ],
            v6_targets: vec![
                SocketAddr::from((Ipv6Addr::new(0x2606, 0x4700, 0x4700, 0, 0, 0, 0, 0x1111), 443)),
                SocketAddr::from((Ipv6Addr::new(0x2001, 0x4860, 0x4860, 0, 0, 0, 0, 0x8888), 443)),
            ],
        }
    }
}

async fn any_reachable(targets: &[SocketAddr], timeout: Duration) -> bool {
    let attempts = targets
        .iter()
        .map(|addr| tokio::time::timeout(timeout, TcpStream::connect(*addr)));
    join_all(attempts)
        .await
        .into_iter()
        .any(|r| matches!(r, Ok(Ok(_))))
}

impl ConnectivityProbe for TcpProbe {
    fn probe(&self, timeout: Duration) -> BoxFuture<'_, Connectivity> {
        Box::pin(async move {
            let (v4, v6) = tokio::join!(
                any_reachable(&self.v4_targets, timeout),
                any_reachable(&self.v6_targets, timeout)
            );
            let result = Connectivity::from_reachability(v4, v6);
            tracing::debug!(?result, "connectivity probe finished");
            result
        })
    }
}

/// Probe that always reports the same answer (offline mode, tests).
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe(pub Connectivity);

impl ConnectivityProbe for FixedProbe {
    fn probe(&self, _timeout: Duration) -> BoxFuture<'_, Connectivity> {
        let answer = self.0;
        Box::pin(async move { answer })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IpStack;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn local_listener_counts_as_ipv4() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let probe = TcpProbe {
            v4_targets: vec![listener.local_addr().unwrap()],
            v6_targets: vec![],
        };
        let result = probe.probe(Duration::from_secs(1)).await;
        assert!(result.connected);
        assert_eq!(result.stack, IpStack::Ipv4);
    }

    #[tokio::test]
    async fn no_targets_is_offline() {
        let probe = TcpProbe {
            v4_targets: vec![],
            v6_targets: vec![],
        };
        assert_eq!(
            probe.probe(Duration::from_millis(50)).await,
            Connectivity::offline()
        );
    }
}

//! Collaborators injected into a session: how accepted streams get their
//! local half, and how the peer's DNS requests are answered.

use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;

use anyhow::{anyhow, Context};
use futures::future::{self, BoxFuture};
use futures::FutureExt;

use crate::session::StreamSender;

/// Network name passed to [`Connector::connect`] for SYN requests.
pub const NETWORK_TCP: &str = "tcp";

/// Establishes the local half of a stream the peer asked to open.
///
/// The returned sender becomes the stream's inbound queue. Implementations
/// may take arbitrarily long; the session always calls this off its dispatch
/// task, and any dial timeout is the implementation's business.
pub trait Connector: Send + Sync + 'static {
    fn connect(
        &self,
        network: &str,
        address: &str,
        stream_id: u16,
    ) -> BoxFuture<'static, anyhow::Result<StreamSender>>;
}

impl<F, Fut> Connector for F
where
    F: Fn(String, String, u16) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<StreamSender>> + Send + 'static,
{
    fn connect(
        &self,
        network: &str,
        address: &str,
        stream_id: u16,
    ) -> BoxFuture<'static, anyhow::Result<StreamSender>> {
        self(network.to_owned(), address.to_owned(), stream_id).boxed()
    }
}

/// Rejects every stream. The default for sessions that only dial out.
pub struct RefuseConnector;

impl Connector for RefuseConnector {
    fn connect(
        &self,
        _network: &str,
        address: &str,
        _stream_id: u16,
    ) -> BoxFuture<'static, anyhow::Result<StreamSender>> {
        future::ready(Err(anyhow!(
            "inbound streams are not accepted (target {address})"
        )))
        .boxed()
    }
}

/// Resolves hostnames for the peer's DNS requests.
pub trait Resolver: Send + Sync + 'static {
    fn resolve(&self, hostname: &str) -> BoxFuture<'static, anyhow::Result<Vec<IpAddr>>>;
}

impl<F, Fut> Resolver for F
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<IpAddr>>> + Send + 'static,
{
    fn resolve(&self, hostname: &str) -> BoxFuture<'static, anyhow::Result<Vec<IpAddr>>> {
        self(hostname.to_owned()).boxed()
    }
}

/// Resolves through the operating system, bounded by a timeout.
pub struct SystemResolver {
    timeout: Duration,
}

impl SystemResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Resolver for SystemResolver {
    fn resolve(&self, hostname: &str) -> BoxFuture<'static, anyhow::Result<Vec<IpAddr>>> {
        let hostname = hostname.to_owned();
        let timeout = self.timeout;
        async move {
            let addrs = tokio::time::timeout(timeout, tokio::net::lookup_host((hostname.as_str(), 0)))
                .await
                .with_context(|| format!("lookup of {hostname} timed out"))?
                .with_context(|| format!("lookup of {hostname} failed"))?;
            let mut ips: Vec<IpAddr> = addrs.map(|a| a.ip()).collect();
            ips.dedup();
            Ok::<_, anyhow::Error>(ips)
        }
        .boxed()
    }
}

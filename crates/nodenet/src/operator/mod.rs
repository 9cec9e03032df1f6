//! Long-lived producers of network specs.
//!
//! An [`Operator`] runs until its token is cancelled and republishes its
//! spec lists whenever a lease or election changes them. The reconciler
//! listens on the [`Notifier`] channel and re-reads full snapshots through
//! the getters, so a dropped notification costs nothing.
//!
//! Operators never hold their state lock across an `.await`; the getters
//! always return clones.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use nodenet::operator::{Dhcp4, Dhcp4Config, Notifier, Operator};
//! use tokio_util::sync::CancellationToken;
//!
//! let operator = Arc::new(Dhcp4::new("eth0", Dhcp4Config::default(), transport, links));
//! let (notifier, mut rx) = Notifier::channel();
//! let token = CancellationToken::new();
//!
//! tokio::spawn({
//!     let operator = operator.clone();
//!     let token = token.clone();
//!     async move { operator.run(token, notifier).await }
//! });
//!
//! while rx.recv().await.is_some() {
//!     println!("{:?}", operator.address_specs());
//! }
//! ```

mod dhcp4;
mod dhcp6;
mod links;
mod vip;

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::netlink;
use crate::spec::{AddressSpec, HostnameSpec, LinkSpec, ResolverSpec, RouteSpec, TimeServerSpec};

pub use dhcp4::{
    Dhcp4, Dhcp4Ack, Dhcp4Config, Dhcp4Request, Dhcp4Transport, HostnameStatus, option,
};
pub use dhcp6::{Dhcp6, Dhcp6Config, Dhcp6Reply, Dhcp6Request, Dhcp6Transport};
pub use links::LinkAddressSource;
pub use vip::{
    ClusterEvent, ClusterWatch, Consensus, Election, EventStream, Leader, LeaderStream,
    NopHandler, Session, Vip, VipConfig, VipHandler,
};

/// Result type for operators and their collaborators.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Wire exchange failed (timeout, NAK, malformed reply, RPC failure).
    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid DUID {0:?}: {1}")]
    InvalidDuid(String, hex::FromHexError),

    /// A required input is missing; the operator cannot do its job.
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Spec(#[from] crate::spec::Error),

    #[error(transparent)]
    Netlink(#[from] netlink::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Single-slot change notification.
///
/// `notify` never blocks: when a notification is already pending the new
/// one is dropped.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::Sender<()>,
}

impl Notifier {
    /// Create a notifier and the receiving end the reconciler listens on.
    pub fn channel() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    pub fn notify(&self) {
        let _ = self.tx.try_send(());
    }
}

/// A spec producer.
///
/// Getters default to producing nothing; operators override the lists
/// they own.
#[async_trait]
pub trait Operator: Send + Sync {
    /// Unique namespace for produced specs, e.g. `dhcp4/eth0`.
    fn prefix(&self) -> String;

    /// Run until `token` is cancelled.
    async fn run(&self, token: CancellationToken, notifier: Notifier);

    fn address_specs(&self) -> Vec<AddressSpec> {
        Vec::new()
    }

    fn link_specs(&self) -> Vec<LinkSpec> {
        Vec::new()
    }

    fn route_specs(&self) -> Vec<RouteSpec> {
        Vec::new()
    }

    fn hostname_specs(&self) -> Vec<HostnameSpec> {
        Vec::new()
    }

    fn resolver_specs(&self) -> Vec<ResolverSpec> {
        Vec::new()
    }

    fn time_server_specs(&self) -> Vec<TimeServerSpec> {
        Vec::new()
    }
}

/// Everything a DHCP operator publishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Published {
    pub addresses: Vec<AddressSpec>,
    pub links: Vec<LinkSpec>,
    pub routes: Vec<RouteSpec>,
    pub hostnames: Vec<HostnameSpec>,
    pub resolvers: Vec<ResolverSpec>,
    pub time_servers: Vec<TimeServerSpec>,
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Renewals never happen more often than this.
pub(crate) const MIN_RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Half the lease when known, otherwise half the previous wait; never below
/// [`MIN_RENEW_INTERVAL`].
pub(crate) fn next_renew_interval(lease_time: Duration, previous: Duration) -> Duration {
    let next = if lease_time > Duration::ZERO {
        lease_time / 2
    } else {
        previous / 2
    };
    next.max(MIN_RENEW_INTERVAL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renew_interval() {
        let secs = Duration::from_secs;
        assert_eq!(next_renew_interval(secs(3600), secs(5)), secs(1800));
        assert_eq!(next_renew_interval(Duration::ZERO, secs(1800)), secs(900));
        assert_eq!(next_renew_interval(Duration::ZERO, secs(8)), secs(5));
        assert_eq!(next_renew_interval(secs(4), secs(100)), secs(5));
    }

    #[tokio::test]
    async fn test_notifier_single_slot() {
        let (notifier, mut rx) = Notifier::channel();
        notifier.notify();
        notifier.notify();
        notifier.notify();

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());

        notifier.notify();
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_notify_after_receiver_dropped() {
        let (notifier, rx) = Notifier::channel();
        drop(rx);
        notifier.notify();
    }

    #[test]
    fn test_cancelled_error() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::Transport("timeout".into()).is_cancelled());
    }
}

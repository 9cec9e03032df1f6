//! DHCPv6 lease operator.

use std::net::{IpAddr, Ipv6Addr};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ipnet::{IpNet, Ipv6Net};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    Error, LinkAddressSource, MIN_RENEW_INTERVAL, Notifier, Operator, Published, Result, lock,
    next_renew_interval,
};
use crate::spec::{
    AddressFlags, AddressSpec, ConfigLayer, Family, HostnameSpec, ResolverSpec, Scope,
    TimeServerSpec,
};

/// How long the link-local address may stay tentative before soliciting anyway.
const LINK_READY_TIMEOUT: Duration = Duration::from_secs(30);
const LINK_READY_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Dhcp6Config {
    /// Hex-encoded client DUID overriding the link-derived one.
    pub duid: String,
    pub skip_hostname_request: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dhcp6Request {
    /// Client identifier; the transport derives one when unset.
    pub client_id: Option<Vec<u8>>,
}

/// The parts of a rapid-commit REPLY the operator consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dhcp6Reply {
    /// First address of the first IA_NA.
    pub address: Option<Ipv6Addr>,
    /// Valid lifetime of `address`.
    pub valid_lifetime: Duration,
    pub dns_servers: Vec<Ipv6Addr>,
    /// Client FQDN option (39) labels.
    pub fqdn_labels: Vec<String>,
    pub ntp_servers: Vec<String>,
}

/// Wire side of the DHCPv6 client.
#[async_trait]
pub trait Dhcp6Transport: Send + Sync {
    /// SOLICIT with rapid commit and wait for the REPLY.
    async fn rapid_solicit(&self, request: &Dhcp6Request) -> Result<Dhcp6Reply>;
}

fn is_link_local(addr: IpAddr) -> bool {
    matches!(addr, IpAddr::V6(v6) if v6.segments()[0] & 0xffc0 == 0xfe80)
}

/// Keeps a DHCPv6 lease on one link and publishes what it grants.
pub struct Dhcp6<T, L> {
    link_name: String,
    duid: Option<Vec<u8>>,
    skip_hostname_request: bool,
    transport: T,
    links: L,
    state: Mutex<Published>,
}

impl<T: Dhcp6Transport, L: LinkAddressSource> Dhcp6<T, L> {
    /// Fails when the configured DUID is not valid hex.
    pub fn new(
        link_name: impl Into<String>,
        config: Dhcp6Config,
        transport: T,
        links: L,
    ) -> Result<Self> {
        let duid = if config.duid.is_empty() {
            None
        } else {
            Some(hex::decode(&config.duid).map_err(|e| Error::InvalidDuid(config.duid.clone(), e))?)
        };

        Ok(Self {
            link_name: link_name.into(),
            duid,
            skip_hostname_request: config.skip_hostname_request,
            transport,
            links,
            state: Mutex::new(Published::default()),
        })
    }

    /// Wait until the link has a link-local address that finished DAD.
    async fn wait_link_ready(&self, token: &CancellationToken) -> Result<()> {
        let Some(index) = self.links.link_index(&self.link_name).await? else {
            warn!(link = %self.link_name, "link not found");
            return Ok(());
        };

        let poll = async {
            loop {
                if self.link_local_ready(index).await? {
                    return Ok::<_, Error>(());
                }
                tokio::time::sleep(LINK_READY_POLL).await;
            }
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(LINK_READY_TIMEOUT, poll) => match result {
                Ok(result) => result,
                Err(_) => Err(Error::Precondition("IPv6 address is still tentative".into())),
            },
        }
    }

    async fn link_local_ready(&self, index: u32) -> Result<bool> {
        for status in self.links.addresses(index, Family::Inet6).await? {
            if status.family != Family::Inet6
                || !is_link_local(status.address.addr())
                || status.flags.contains(AddressFlags::TENTATIVE)
            {
                continue;
            }

            if status.flags.contains(AddressFlags::DADFAILED) {
                warn!(
                    link = %self.link_name,
                    address = %status.address,
                    "DADFAILED, continuing anyhow"
                );
            }
            return Ok(true);
        }
        Ok(false)
    }

    async fn renew(&self, token: &CancellationToken) -> Result<Duration> {
        let request = Dhcp6Request {
            client_id: self.duid.clone(),
        };

        let reply = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::Cancelled),
            reply = self.transport.rapid_solicit(&request) => reply?,
        };

        debug!(link = %self.link_name, address = ?reply.address, "DHCP6 REPLY");

        Ok(self.parse_reply(&reply))
    }

    /// Replace every published list from `reply`. Returns the lease time.
    fn parse_reply(&self, reply: &Dhcp6Reply) -> Duration {
        let mut state = lock(&self.state);
        let mut lease_time = Duration::ZERO;

        state.addresses = match reply.address {
            Some(addr) => {
                lease_time = reply.valid_lifetime;
                vec![AddressSpec {
                    address: IpNet::V6(Ipv6Net::from(addr)),
                    link_name: self.link_name.clone(),
                    family: Family::Inet6,
                    scope: Scope::Global,
                    flags: AddressFlags::PERMANENT,
                    announce_with_arp: false,
                    config_layer: ConfigLayer::Operator,
                }]
            }
            None => Vec::new(),
        };

        state.resolvers = if reply.dns_servers.is_empty() {
            Vec::new()
        } else {
            vec![ResolverSpec {
                dns_servers: reply.dns_servers.iter().copied().map(IpAddr::V6).collect(),
                config_layer: ConfigLayer::Operator,
            }]
        };

        state.hostnames = match reply.fqdn_labels.split_first() {
            Some((hostname, domain)) if !self.skip_hostname_request => vec![HostnameSpec {
                hostname: hostname.clone(),
                domainname: domain.join("."),
                config_layer: ConfigLayer::Operator,
            }],
            _ => Vec::new(),
        };

        state.time_servers = if reply.ntp_servers.is_empty() {
            Vec::new()
        } else {
            vec![TimeServerSpec {
                ntp_servers: reply.ntp_servers.clone(),
                config_layer: ConfigLayer::Operator,
            }]
        };

        lease_time
    }
}

#[async_trait]
impl<T: Dhcp6Transport, L: LinkAddressSource> Operator for Dhcp6<T, L> {
    fn prefix(&self) -> String {
        format!("dhcp6/{}", self.link_name)
    }

    async fn run(&self, token: CancellationToken, notifier: Notifier) {
        match self.wait_link_ready(&token).await {
            Ok(()) => {}
            Err(Error::Cancelled) => return,
            Err(e) => warn!(link = %self.link_name, error = %e, "error waiting for IPv6 ready"),
        }

        let mut interval = MIN_RENEW_INTERVAL;

        loop {
            let lease_time = match self.renew(&token).await {
                Ok(lease_time) => {
                    notifier.notify();
                    lease_time
                }
                Err(Error::Cancelled) => return,
                Err(e) => {
                    warn!(link = %self.link_name, error = %e, "renew failed");
                    Duration::ZERO
                }
            };

            interval = next_renew_interval(lease_time, interval);

            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    fn address_specs(&self) -> Vec<AddressSpec> {
        lock(&self.state).addresses.clone()
    }

    fn hostname_specs(&self) -> Vec<HostnameSpec> {
        lock(&self.state).hostnames.clone()
    }

    fn resolver_specs(&self) -> Vec<ResolverSpec> {
        lock(&self.state).resolvers.clone()
    }

    fn time_server_specs(&self) -> Vec<TimeServerSpec> {
        lock(&self.state).time_servers.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use tokio::time::Instant;

    use super::*;
    use crate::spec::AddressStatus;

    #[derive(Default)]
    struct Solicits {
        replies: Mutex<VecDeque<Result<Dhcp6Reply>>>,
        requests: Mutex<Vec<(Instant, Dhcp6Request)>>,
    }

    impl Solicits {
        fn new(replies: impl IntoIterator<Item = Result<Dhcp6Reply>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().collect()),
                requests: Mutex::default(),
            })
        }

        fn requests(&self) -> Vec<(Instant, Dhcp6Request)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Dhcp6Transport for Arc<Solicits> {
        async fn rapid_solicit(&self, request: &Dhcp6Request) -> Result<Dhcp6Reply> {
            self.requests
                .lock()
                .unwrap()
                .push((Instant::now(), request.clone()));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::Transport("timeout".into())))
        }
    }

    /// Walks through address snapshots, repeating the last one.
    struct Links {
        index: Option<u32>,
        snapshots: Mutex<VecDeque<Vec<AddressStatus>>>,
    }

    impl Links {
        fn new(index: Option<u32>, snapshots: Vec<Vec<AddressStatus>>) -> Self {
            Self {
                index,
                snapshots: Mutex::new(snapshots.into()),
            }
        }
    }

    #[async_trait]
    impl LinkAddressSource for Links {
        async fn link_index(&self, _name: &str) -> Result<Option<u32>> {
            Ok(self.index)
        }

        async fn addresses(&self, _index: u32, family: Family) -> Result<Vec<AddressStatus>> {
            assert_eq!(family, Family::Inet6);
            let mut snapshots = self.snapshots.lock().unwrap();
            if snapshots.len() > 1 {
                Ok(snapshots.pop_front().unwrap())
            } else {
                Ok(snapshots.front().cloned().unwrap_or_default())
            }
        }
    }

    fn link_local(flags: u32) -> AddressStatus {
        AddressStatus {
            address: "fe80::1/64".parse().unwrap(),
            local: None,
            link_index: 2,
            link_name: "eth0".into(),
            family: Family::Inet6,
            scope: Scope::Link,
            flags: AddressFlags(flags),
        }
    }

    fn reply() -> Dhcp6Reply {
        Dhcp6Reply {
            address: Some("2001:db8::10".parse().unwrap()),
            valid_lifetime: Duration::from_secs(7200),
            dns_servers: vec!["2001:db8::53".parse().unwrap()],
            fqdn_labels: vec!["node-1".into(), "example".into(), "com".into()],
            ntp_servers: vec!["2001:db8::123".into()],
        }
    }

    fn operator(
        config: Dhcp6Config,
        transport: &Arc<Solicits>,
        links: Links,
    ) -> Dhcp6<Arc<Solicits>, Links> {
        Dhcp6::new("eth0", config, transport.clone(), links).unwrap()
    }

    fn ready_links() -> Links {
        Links::new(Some(2), vec![vec![link_local(AddressFlags::PERMANENT.0)]])
    }

    #[test]
    fn test_parse_reply() {
        let op = operator(Dhcp6Config::default(), &Solicits::new([]), ready_links());
        let lease = op.parse_reply(&reply());

        assert_eq!(lease, Duration::from_secs(7200));
        let addresses = op.address_specs();
        assert_eq!(addresses.len(), 1);
        assert_eq!(addresses[0].address, "2001:db8::10/128".parse::<IpNet>().unwrap());
        assert_eq!(addresses[0].family, Family::Inet6);
        assert!(addresses[0].flags.contains(AddressFlags::PERMANENT));

        let hostnames = op.hostname_specs();
        assert_eq!(hostnames[0].hostname, "node-1");
        assert_eq!(hostnames[0].domainname, "example.com");
        assert_eq!(
            op.resolver_specs()[0].dns_servers,
            vec!["2001:db8::53".parse::<IpAddr>().unwrap()]
        );
        assert_eq!(op.time_server_specs()[0].ntp_servers, vec!["2001:db8::123"]);
        assert!(op.link_specs().is_empty());
        assert!(op.route_specs().is_empty());
    }

    #[test]
    fn test_parse_reply_without_address() {
        let op = operator(Dhcp6Config::default(), &Solicits::new([]), ready_links());
        op.parse_reply(&reply());

        let lease = op.parse_reply(&Dhcp6Reply {
            address: None,
            fqdn_labels: vec![],
            ..reply()
        });
        assert_eq!(lease, Duration::ZERO);
        assert!(op.address_specs().is_empty());
        assert!(op.hostname_specs().is_empty());
        assert_eq!(op.resolver_specs().len(), 1);
    }

    #[test]
    fn test_parse_reply_skips_hostname() {
        let config = Dhcp6Config {
            skip_hostname_request: true,
            ..Default::default()
        };
        let op = operator(config, &Solicits::new([]), ready_links());
        op.parse_reply(&reply());
        assert!(op.hostname_specs().is_empty());
    }

    #[test]
    fn test_bad_duid_rejected() {
        let config = Dhcp6Config {
            duid: "00:01:zz".into(),
            ..Default::default()
        };
        let err = Dhcp6::new("eth0", config, Solicits::new([]), ready_links())
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidDuid(..)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duid_sent_and_renew_scheduled() {
        let transport = Solicits::new([Ok(reply()), Ok(reply())]);
        let config = Dhcp6Config {
            duid: "0003000102030405".into(),
            ..Default::default()
        };
        let op = Arc::new(operator(config, &transport, ready_links()));
        let (notifier, mut rx) = Notifier::channel();
        let token = CancellationToken::new();
        let start = Instant::now();

        let task = tokio::spawn({
            let op = op.clone();
            let token = token.clone();
            async move { op.run(token, notifier).await }
        });

        rx.recv().await.unwrap();
        rx.recv().await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[0].1.client_id.as_deref(),
            Some(&[0, 3, 0, 1, 2, 3, 4, 5][..])
        );
        assert_eq!(requests[1].0 - start, Duration::from_secs(3600));
        assert_eq!(op.prefix(), "dhcp6/eth0");

        token.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_dad() {
        let transport = Solicits::new([Ok(reply())]);
        let links = Links::new(
            Some(2),
            vec![
                vec![],
                vec![link_local(AddressFlags::TENTATIVE.0)],
                vec![link_local(AddressFlags::PERMANENT.0)],
            ],
        );
        let op = operator(Dhcp6Config::default(), &transport, links);
        let (notifier, mut rx) = Notifier::channel();
        let token = CancellationToken::new();
        let start = Instant::now();

        let task = tokio::spawn({
            let token = token.clone();
            async move { op.run(token, notifier).await }
        });

        rx.recv().await.unwrap();
        assert_eq!(transport.requests()[0].0 - start, Duration::from_millis(200));

        token.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dad_failed_proceeds() {
        let transport = Solicits::new([Ok(reply())]);
        let links = Links::new(Some(2), vec![vec![link_local(AddressFlags::DADFAILED.0)]]);
        let op = operator(Dhcp6Config::default(), &transport, links);
        let (notifier, mut rx) = Notifier::channel();
        let token = CancellationToken::new();
        let start = Instant::now();

        let task = tokio::spawn({
            let token = token.clone();
            async move { op.run(token, notifier).await }
        });

        rx.recv().await.unwrap();
        assert_eq!(transport.requests()[0].0, start);

        token.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_times_out() {
        let transport = Solicits::new([Ok(reply())]);
        let links = Links::new(Some(2), vec![vec![link_local(AddressFlags::TENTATIVE.0)]]);
        let op = operator(Dhcp6Config::default(), &transport, links);
        let (notifier, mut rx) = Notifier::channel();
        let token = CancellationToken::new();
        let start = Instant::now();

        let task = tokio::spawn({
            let token = token.clone();
            async move { op.run(token, notifier).await }
        });

        rx.recv().await.unwrap();
        assert_eq!(transport.requests()[0].0 - start, LINK_READY_TIMEOUT);

        token.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_link_skips_gate() {
        let transport = Solicits::new([Ok(reply())]);
        let op = operator(Dhcp6Config::default(), &transport, Links::new(None, vec![]));
        let (notifier, mut rx) = Notifier::channel();
        let token = CancellationToken::new();
        let start = Instant::now();

        let task = tokio::spawn({
            let token = token.clone();
            async move { op.run(token, notifier).await }
        });

        rx.recv().await.unwrap();
        assert_eq!(transport.requests()[0].0, start);

        token.cancel();
        task.await.unwrap();
    }
}

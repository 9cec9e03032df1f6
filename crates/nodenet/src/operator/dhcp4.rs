//! DHCPv4 lease operator.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ipnet::{IpNet, Ipv4Net};
use serde::Deserialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    Error, LinkAddressSource, MIN_RENEW_INTERVAL, Notifier, Operator, Published, Result, lock,
    next_renew_interval,
};
use crate::spec::{
    AddressFlags, AddressSpec, ConfigLayer, Family, HostnameSpec, LinkSpec, ResolverSpec,
    RouteProtocol, RouteSpec, RouteType, RoutingTable, Scope, TimeServerSpec,
};

/// Lease time assumed when the server omits option 51.
const DEFAULT_LEASE_TIME: Duration = Duration::from_secs(30 * 60);

/// Hostname changes arriving within this window are applied as one.
const HOSTNAME_COALESCE: Duration = Duration::from_secs(1);

/// How long a fresh lease may wait for its address to show up on the link.
const ADDRESS_READY_TIMEOUT: Duration = Duration::from_secs(30);
const ADDRESS_READY_POLL: Duration = Duration::from_millis(100);

/// DHCPv4 option codes the operator requests or sends.
pub mod option {
    pub const SUBNET_MASK: u8 = 1;
    pub const ROUTER: u8 = 3;
    pub const DOMAIN_NAME_SERVER: u8 = 6;
    pub const HOSTNAME: u8 = 12;
    pub const DOMAIN_NAME: u8 = 15;
    pub const INTERFACE_MTU: u8 = 26;
    pub const NTP_SERVERS: u8 = 42;
    pub const DOMAIN_SEARCH: u8 = 119;
    pub const CLASSLESS_STATIC_ROUTE: u8 = 121;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Dhcp4Config {
    /// Priority of every route learned from the lease.
    pub route_metric: u32,
    /// Never ask the server for a hostname.
    pub skip_hostname_request: bool,
    /// Request option 26. Some platforms drop offers when it is asked for.
    pub request_mtu: bool,
}

impl Default for Dhcp4Config {
    fn default() -> Self {
        Self {
            route_metric: 0,
            skip_hostname_request: false,
            request_mtu: true,
        }
    }
}

/// The node's current hostname, as seen by whoever watches it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostnameStatus {
    pub hostname: String,
    pub domainname: String,
}

impl HostnameStatus {
    pub fn is_empty(&self) -> bool {
        self.hostname.is_empty() && self.domainname.is_empty()
    }
}

/// What the client asks for in one exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dhcp4Request {
    /// Parameter request list (option 55).
    pub requested_options: Vec<u8>,
    /// Sent as option 12 when set.
    pub hostname: Option<String>,
    /// Sent as option 15 when set.
    pub domainname: Option<String>,
}

/// The parts of a DHCPACK the operator consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dhcp4Ack {
    pub your_ip: Ipv4Addr,
    /// Server identifier (option 54); renewals are unicast here.
    pub server_ip: Option<Ipv4Addr>,
    pub subnet_mask: Option<Ipv4Addr>,
    pub routers: Vec<Ipv4Addr>,
    /// RFC 3442 routes; when present the router option is ignored.
    pub classless_routes: Vec<(Ipv4Net, Ipv4Addr)>,
    pub dns_servers: Vec<Ipv4Addr>,
    pub ntp_servers: Vec<Ipv4Addr>,
    pub hostname: Option<String>,
    pub domain_name: Option<String>,
    pub mtu: Option<u16>,
    pub lease_time: Option<Duration>,
}

impl Default for Dhcp4Ack {
    fn default() -> Self {
        Self {
            your_ip: Ipv4Addr::UNSPECIFIED,
            server_ip: None,
            subnet_mask: None,
            routers: Vec::new(),
            classless_routes: Vec::new(),
            dns_servers: Vec::new(),
            ntp_servers: Vec::new(),
            hostname: None,
            domain_name: None,
            mtu: None,
            lease_time: None,
        }
    }
}

/// Wire side of the DHCPv4 client.
#[async_trait]
pub trait Dhcp4Transport: Send + Sync {
    /// Broadcast DISCOVER, then REQUEST the first offer.
    async fn request(&self, request: &Dhcp4Request) -> Result<Dhcp4Ack>;

    /// Unicast REQUEST to the server that granted `lease`.
    async fn renew(&self, lease: &Dhcp4Ack, request: &Dhcp4Request) -> Result<Dhcp4Ack>;
}

#[derive(Debug, Default)]
struct State {
    lease: Option<Dhcp4Ack>,
    published: Published,
}

/// Keeps a DHCPv4 lease on one link and publishes what it grants.
pub struct Dhcp4<T, L> {
    link_name: String,
    config: Dhcp4Config,
    transport: T,
    links: L,
    hostname_watch: Mutex<Option<watch::Receiver<HostnameStatus>>>,
    state: Mutex<State>,
}

impl<T: Dhcp4Transport, L: LinkAddressSource> Dhcp4<T, L> {
    pub fn new(link_name: impl Into<String>, config: Dhcp4Config, transport: T, links: L) -> Self {
        Self {
            link_name: link_name.into(),
            config,
            transport,
            links,
            hostname_watch: Mutex::new(None),
            state: Mutex::new(State::default()),
        }
    }

    /// Follow the node hostname so a manually set one is sent to the server.
    pub fn with_hostname_watch(self, watch: watch::Receiver<HostnameStatus>) -> Self {
        *lock(&self.hostname_watch) = Some(watch);
        self
    }

    /// Whether `status` is a hostname this operator published.
    fn known_hostname(&self, status: &HostnameStatus) -> bool {
        lock(&self.state)
            .published
            .hostnames
            .iter()
            .any(|spec| spec.hostname == status.hostname && spec.domainname == status.domainname)
    }

    /// Build the request. The flag reports whether hostname and domain are
    /// asked for, which also decides whether the reply may set them.
    fn build_request(&self, current: &HostnameStatus) -> (Dhcp4Request, bool) {
        let mut request = Dhcp4Request {
            requested_options: vec![
                option::CLASSLESS_STATIC_ROUTE,
                option::DOMAIN_NAME_SERVER,
                option::DOMAIN_SEARCH,
                option::NTP_SERVERS,
            ],
            ..Default::default()
        };

        if self.config.request_mtu {
            request.requested_options.push(option::INTERFACE_MTU);
        }

        let foreign_hostname = !current.hostname.is_empty() && !self.known_hostname(current);
        let ask_hostname = !self.config.skip_hostname_request && !foreign_hostname;

        if ask_hostname {
            request
                .requested_options
                .extend([option::HOSTNAME, option::DOMAIN_NAME]);
        } else {
            if !current.hostname.is_empty() {
                request.hostname = Some(current.hostname.clone());
            }
            if !current.domainname.is_empty() {
                request.domainname = Some(current.domainname.clone());
            }
        }

        (request, ask_hostname)
    }

    /// Wait until the leased address is assigned to the link, so unicast
    /// renewals can bind to it.
    async fn wait_address_ready(&self, token: &CancellationToken) -> Result<()> {
        let Some(expected) = lock(&self.state).published.addresses.first().map(|a| a.address)
        else {
            return Ok(());
        };
        let Some(index) = self.links.link_index(&self.link_name).await? else {
            warn!(link = %self.link_name, "link not found");
            return Ok(());
        };

        let poll = async {
            loop {
                let assigned = self
                    .links
                    .addresses(index, Family::Inet4)
                    .await?
                    .iter()
                    .any(|status| {
                        status.address == expected && !status.flags.contains(AddressFlags::TENTATIVE)
                    });
                if assigned {
                    return Ok::<_, Error>(());
                }
                tokio::time::sleep(ADDRESS_READY_POLL).await;
            }
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(ADDRESS_READY_TIMEOUT, poll) => match result {
                Ok(result) => result,
                Err(_) => Err(Error::Precondition(format!("address {expected} was not assigned"))),
            },
        }
    }

    /// One request or renewal. Returns the granted lease time.
    async fn exchange(&self, token: &CancellationToken, current: &HostnameStatus) -> Result<Duration> {
        let (request, ask_hostname) = self.build_request(current);
        let lease = lock(&self.state)
            .lease
            .clone()
            .filter(|lease| lease.server_ip.is_some_and(|ip| !ip.is_unspecified()));

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            result = async {
                match &lease {
                    Some(lease) => {
                        debug!(link = %self.link_name, "DHCP RENEW");
                        self.transport.renew(lease, &request).await
                    }
                    None => {
                        debug!(link = %self.link_name, "DHCP REQUEST");
                        self.transport.request(&request).await
                    }
                }
            } => result,
        };

        let ack = match result {
            Ok(ack) => ack,
            Err(e) => {
                lock(&self.state).lease = None;
                return Err(e);
            }
        };

        debug!(link = %self.link_name, ip = %ack.your_ip, "DHCP ACK");

        let lease_time = ack.lease_time.unwrap_or(DEFAULT_LEASE_TIME);
        let mut state = lock(&self.state);
        self.parse_ack(&mut state.published, &ack, ask_hostname);
        state.lease = Some(ack);

        Ok(lease_time)
    }

    /// Turn an ACK into specs. Hostnames are only replaced when they were
    /// requested.
    fn parse_ack(&self, published: &mut Published, ack: &Dhcp4Ack, use_hostname: bool) {
        let prefix_len = ack
            .subnet_mask
            .and_then(|mask| ipnet::ipv4_mask_to_prefix(mask).ok())
            .unwrap_or(32);
        let address = Ipv4Net::new(ack.your_ip, prefix_len)
            .map(IpNet::V4)
            .unwrap_or_else(|_| IpNet::V4(Ipv4Net::from(ack.your_ip)));
        let source = Some(IpAddr::V4(ack.your_ip));

        published.addresses = vec![AddressSpec {
            address,
            link_name: self.link_name.clone(),
            family: Family::Inet4,
            scope: Scope::Global,
            flags: AddressFlags::PERMANENT,
            announce_with_arp: false,
            config_layer: ConfigLayer::Operator,
        }];

        published.links = ack
            .mtu
            .map(|mtu| LinkSpec {
                name: self.link_name.clone(),
                up: true,
                mtu: u32::from(mtu),
                ..Default::default()
            })
            .into_iter()
            .collect();

        let route = |destination: Option<Ipv4Net>, gateway: Option<Ipv4Addr>, scope: Scope| RouteSpec {
            family: Family::Inet4,
            destination: destination.map(IpNet::V4),
            source,
            gateway: gateway.map(IpAddr::V4),
            out_link_name: self.link_name.clone(),
            table: RoutingTable::Main,
            priority: self.config.route_metric,
            scope,
            route_type: RouteType::Unicast,
            protocol: RouteProtocol::Boot,
            mtu: 0,
            config_layer: ConfigLayer::Operator,
        };

        let mut routes = Vec::new();
        if !ack.classless_routes.is_empty() {
            for (destination, gateway) in &ack.classless_routes {
                routes.push(route(Some(*destination), Some(*gateway), Scope::Global));
            }
        } else {
            for gateway in &ack.routers {
                routes.push(route(None, Some(*gateway), Scope::Global));

                if !address.contains(&IpAddr::V4(*gateway)) {
                    routes.push(route(Some(Ipv4Net::from(*gateway)), None, Scope::Link));
                }
            }
        }
        for route in &mut routes {
            route.normalize();
        }
        published.routes = routes;

        if use_hostname {
            published.hostnames = ack
                .hostname
                .as_deref()
                .filter(|name| !name.is_empty())
                .and_then(|name| {
                    let mut spec = HostnameSpec {
                        config_layer: ConfigLayer::Operator,
                        ..Default::default()
                    };
                    if let Err(e) = spec.parse_fqdn(name) {
                        debug!(link = %self.link_name, error = %e, "ignoring DHCP hostname");
                        return None;
                    }
                    if let Some(domain) = ack.domain_name.as_deref().filter(|d| !d.is_empty()) {
                        spec.domainname = domain.to_string();
                    }
                    Some(spec)
                })
                .into_iter()
                .collect();
        }

        published.resolvers = if ack.dns_servers.is_empty() {
            Vec::new()
        } else {
            vec![ResolverSpec {
                dns_servers: ack.dns_servers.iter().copied().map(IpAddr::V4).collect(),
                config_layer: ConfigLayer::Operator,
            }]
        };

        published.time_servers = if ack.ntp_servers.is_empty() {
            Vec::new()
        } else {
            vec![TimeServerSpec {
                ntp_servers: ack.ntp_servers.iter().map(ToString::to_string).collect(),
                config_layer: ConfigLayer::Operator,
            }]
        };
    }
}

/// Wait for the next hostname value. A closed or absent watch never fires.
async fn next_hostname(watch: &mut Option<watch::Receiver<HostnameStatus>>) -> HostnameStatus {
    if let Some(rx) = watch.as_mut()
        && rx.changed().await.is_ok()
    {
        return rx.borrow_and_update().clone();
    }
    *watch = None;
    std::future::pending().await
}

#[async_trait]
impl<T: Dhcp4Transport, L: LinkAddressSource> Operator for Dhcp4<T, L> {
    fn prefix(&self) -> String {
        format!("dhcp4/{}", self.link_name)
    }

    async fn run(&self, token: CancellationToken, notifier: Notifier) {
        let mut watch = lock(&self.hostname_watch).take();
        // Start with no hostname so the first exchange asks the server for one.
        let mut hostname = HostnameStatus::default();
        let mut interval = MIN_RENEW_INTERVAL;

        loop {
            let fresh = lock(&self.state).lease.is_none();

            let lease_time = match self.exchange(&token, &hostname).await {
                Ok(lease_time) => {
                    notifier.notify();

                    if fresh {
                        match self.wait_address_ready(&token).await {
                            Ok(()) => {}
                            Err(Error::Cancelled) => return,
                            Err(e) => warn!(
                                link = %self.link_name,
                                error = %e,
                                "failed to wait for networking to become ready"
                            ),
                        }
                    }
                    lease_time
                }
                Err(Error::Cancelled) => return,
                Err(e) => {
                    warn!(link = %self.link_name, error = %e, "request/renew failed");
                    Duration::ZERO
                }
            };

            interval = next_renew_interval(lease_time, interval);

            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                    event = next_hostname(&mut watch) => {
                        let mut latest = event;
                        loop {
                            tokio::select! {
                                _ = token.cancelled() => return,
                                event = next_hostname(&mut watch) => latest = event,
                                _ = tokio::time::sleep(HOSTNAME_COALESCE) => break,
                            }
                        }

                        let old = std::mem::replace(&mut hostname, latest);
                        debug!(
                            link = %self.link_name,
                            old = %old.hostname,
                            new = %hostname.hostname,
                            "detected hostname change"
                        );

                        // Our own lease set it, or nothing changed.
                        if (old.is_empty() && self.known_hostname(&hostname)) || old == hostname {
                            continue;
                        }

                        // Only a fresh DISCOVER reliably carries a new hostname.
                        lock(&self.state).lease = None;
                        debug!(link = %self.link_name, "restarting DHCP sequence due to hostname change");
                    }
                }
                break;
            }
        }
    }

    fn address_specs(&self) -> Vec<AddressSpec> {
        lock(&self.state).published.addresses.clone()
    }

    fn link_specs(&self) -> Vec<LinkSpec> {
        lock(&self.state).published.links.clone()
    }

    fn route_specs(&self) -> Vec<RouteSpec> {
        lock(&self.state).published.routes.clone()
    }

    fn hostname_specs(&self) -> Vec<HostnameSpec> {
        lock(&self.state).published.hostnames.clone()
    }

    fn resolver_specs(&self) -> Vec<ResolverSpec> {
        lock(&self.state).published.resolvers.clone()
    }

    fn time_server_specs(&self) -> Vec<TimeServerSpec> {
        lock(&self.state).published.time_servers.clone()
    }
}

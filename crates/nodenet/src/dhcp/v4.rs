//! DHCPv4 client exchanges over UDP.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use async_trait::async_trait;
use dhcproto::{Decodable, Decoder, Encodable, Encoder, v4};
use tokio::net::UdpSocket;
use tracing::debug;

use super::{DEFAULT_EXCHANGE_TIMEOUT, MAX_DATAGRAM, client_socket};
use crate::operator::{Dhcp4Ack, Dhcp4Request, Dhcp4Transport, Error, Result};
use crate::util::ifname;

const CLIENT_PORT: u16 = 68;
const SERVER_PORT: u16 = 67;

/// DHCPv4 client for one link.
#[derive(Debug, Clone)]
pub struct Udp4Transport {
    link: String,
    mac: Vec<u8>,
    timeout: Duration,
}

impl Udp4Transport {
    /// Read the link's hardware address; fails when the link has none.
    pub fn new(link: impl Into<String>) -> Result<Self> {
        let link = link.into();
        let mac = ifname::hardware_address(&link).map_err(|e| Error::Precondition(e.to_string()))?;
        Ok(Self {
            link,
            mac,
            timeout: DEFAULT_EXCHANGE_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn socket(&self) -> Result<UdpSocket> {
        let bind = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, CLIENT_PORT));
        Ok(client_socket(&self.link, bind, true)?)
    }

    fn message(&self, xid: u32, kind: v4::MessageType, request: &Dhcp4Request) -> v4::Message {
        let mut msg = v4::Message::default();
        msg.set_xid(xid);
        msg.set_chaddr(&self.mac);

        let opts = msg.opts_mut();
        opts.insert(v4::DhcpOption::MessageType(kind));
        opts.insert(v4::DhcpOption::ParameterRequestList(
            request
                .requested_options
                .iter()
                .map(|&code| v4::OptionCode::from(code))
                .collect(),
        ));
        if let Some(hostname) = &request.hostname {
            opts.insert(v4::DhcpOption::Hostname(hostname.clone()));
        }
        if let Some(domain) = &request.domainname {
            opts.insert(v4::DhcpOption::DomainName(domain.clone()));
        }

        msg
    }

    async fn send(&self, socket: &UdpSocket, msg: &v4::Message, to: Ipv4Addr) -> Result<()> {
        let mut buf = Vec::new();
        let mut encoder = Encoder::new(&mut buf);
        msg.encode(&mut encoder)
            .map_err(|e| Error::Transport(format!("encode DHCPv4 message: {e}")))?;

        socket
            .send_to(&buf, SocketAddrV4::new(to, SERVER_PORT))
            .await?;
        Ok(())
    }

    /// Wait for an `accepted` reply to `xid`. A NAK fails the exchange.
    async fn recv(
        &self,
        socket: &UdpSocket,
        xid: u32,
        accepted: v4::MessageType,
    ) -> Result<v4::Message> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (n, from) = socket.recv_from(&mut buf).await?;
            let msg = match v4::Message::decode(&mut Decoder::new(&buf[..n])) {
                Ok(msg) => msg,
                Err(e) => {
                    debug!(link = %self.link, %from, error = %e, "ignoring undecodable DHCPv4 packet");
                    continue;
                }
            };
            if msg.xid() != xid {
                continue;
            }

            match message_type(&msg) {
                Some(kind) if kind == accepted => return Ok(msg),
                Some(v4::MessageType::Nak) => {
                    return Err(Error::Transport(format!("received DHCP NAK from {from}")));
                }
                _ => {}
            }
        }
    }

    async fn full_exchange(&self, request: &Dhcp4Request) -> Result<Dhcp4Ack> {
        let socket = self.socket()?;
        let xid = rand::random();

        let mut discover = self.message(xid, v4::MessageType::Discover, request);
        discover.set_flags(v4::Flags::default().set_broadcast());
        self.send(&socket, &discover, Ipv4Addr::BROADCAST).await?;
        debug!(link = %self.link, xid, "sent DHCP DISCOVER");

        let offer = self.recv(&socket, xid, v4::MessageType::Offer).await?;
        debug!(link = %self.link, ip = %offer.yiaddr(), "received DHCP OFFER");

        let mut req = self.message(xid, v4::MessageType::Request, request);
        req.set_flags(v4::Flags::default().set_broadcast());
        req.opts_mut()
            .insert(v4::DhcpOption::RequestedIpAddress(offer.yiaddr()));
        if let Some(v4::DhcpOption::ServerIdentifier(server)) =
            offer.opts().get(v4::OptionCode::ServerIdentifier)
        {
            req.opts_mut()
                .insert(v4::DhcpOption::ServerIdentifier(*server));
        }
        self.send(&socket, &req, Ipv4Addr::BROADCAST).await?;

        let ack = self.recv(&socket, xid, v4::MessageType::Ack).await?;
        Ok(parse_ack(&ack))
    }

    async fn renew_exchange(&self, lease: &Dhcp4Ack, request: &Dhcp4Request) -> Result<Dhcp4Ack> {
        let server = lease
            .server_ip
            .ok_or_else(|| Error::Precondition("lease has no server identifier".into()))?;

        let socket = self.socket()?;
        let xid = rand::random();

        let mut req = self.message(xid, v4::MessageType::Request, request);
        req.set_ciaddr(lease.your_ip);
        self.send(&socket, &req, server).await?;
        debug!(link = %self.link, %server, xid, "sent DHCP REQUEST (renew)");

        let ack = self.recv(&socket, xid, v4::MessageType::Ack).await?;
        Ok(parse_ack(&ack))
    }

    async fn timed<F>(&self, exchange: F) -> Result<Dhcp4Ack>
    where
        F: std::future::Future<Output = Result<Dhcp4Ack>>,
    {
        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| Error::Transport(format!("no DHCPv4 reply within {:?}", self.timeout)))?
    }
}

#[async_trait]
impl Dhcp4Transport for Udp4Transport {
    async fn request(&self, request: &Dhcp4Request) -> Result<Dhcp4Ack> {
        self.timed(self.full_exchange(request)).await
    }

    async fn renew(&self, lease: &Dhcp4Ack, request: &Dhcp4Request) -> Result<Dhcp4Ack> {
        self.timed(self.renew_exchange(lease, request)).await
    }
}

fn message_type(msg: &v4::Message) -> Option<v4::MessageType> {
    match msg.opts().get(v4::OptionCode::MessageType) {
        Some(v4::DhcpOption::MessageType(kind)) => Some(*kind),
        _ => None,
    }
}

/// Extract the options the operator consumes.
pub(crate) fn parse_ack(msg: &v4::Message) -> Dhcp4Ack {
    let opts = msg.opts();
    let mut ack = Dhcp4Ack {
        your_ip: msg.yiaddr(),
        ..Default::default()
    };

    if let Some(v4::DhcpOption::ServerIdentifier(ip)) = opts.get(v4::OptionCode::ServerIdentifier) {
        ack.server_ip = Some(*ip);
    }
    if let Some(v4::DhcpOption::SubnetMask(mask)) = opts.get(v4::OptionCode::SubnetMask) {
        ack.subnet_mask = Some(*mask);
    }
    if let Some(v4::DhcpOption::Router(routers)) = opts.get(v4::OptionCode::Router) {
        ack.routers = routers.clone();
    }
    if let Some(v4::DhcpOption::ClasslessStaticRoute(routes)) =
        opts.get(v4::OptionCode::ClasslessStaticRoute)
    {
        ack.classless_routes = routes.clone();
    }
    if let Some(v4::DhcpOption::DomainNameServer(servers)) =
        opts.get(v4::OptionCode::DomainNameServer)
    {
        ack.dns_servers = servers.clone();
    }
    if let Some(v4::DhcpOption::NtpServers(servers)) = opts.get(v4::OptionCode::NtpServers) {
        ack.ntp_servers = servers.clone();
    }
    if let Some(v4::DhcpOption::Hostname(name)) = opts.get(v4::OptionCode::Hostname) {
        ack.hostname = Some(name.clone());
    }
    if let Some(v4::DhcpOption::DomainName(name)) = opts.get(v4::OptionCode::DomainName) {
        ack.domain_name = Some(name.clone());
    }
    if let Some(v4::DhcpOption::InterfaceMtu(mtu)) = opts.get(v4::OptionCode::InterfaceMtu) {
        ack.mtu = Some(*mtu);
    }
    if let Some(v4::DhcpOption::AddressLeaseTime(secs)) = opts.get(v4::OptionCode::AddressLeaseTime)
    {
        ack.lease_time = Some(Duration::from_secs(u64::from(*secs)));
    }

    ack
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::option;

    fn transport() -> Udp4Transport {
        Udp4Transport {
            link: "eth0".into(),
            mac: vec![0x02, 0, 0, 0, 0, 0x01],
            timeout: DEFAULT_EXCHANGE_TIMEOUT,
        }
    }

    #[test]
    fn test_request_message_options() {
        let request = Dhcp4Request {
            requested_options: vec![option::CLASSLESS_STATIC_ROUTE, option::INTERFACE_MTU],
            hostname: Some("node-1".into()),
            domainname: None,
        };
        let msg = transport().message(0xdead_beef, v4::MessageType::Discover, &request);

        assert_eq!(msg.xid(), 0xdead_beef);
        assert_eq!(&msg.chaddr()[..6], &[0x02, 0, 0, 0, 0, 0x01]);
        assert_eq!(message_type(&msg), Some(v4::MessageType::Discover));
        assert!(matches!(
            msg.opts().get(v4::OptionCode::ParameterRequestList),
            Some(v4::DhcpOption::ParameterRequestList(codes))
                if codes == &vec![v4::OptionCode::ClasslessStaticRoute, v4::OptionCode::InterfaceMtu]
        ));
        assert!(matches!(
            msg.opts().get(v4::OptionCode::Hostname),
            Some(v4::DhcpOption::Hostname(name)) if name == "node-1"
        ));
        assert!(msg.opts().get(v4::OptionCode::DomainName).is_none());
    }

    #[test]
    fn test_parse_ack_wire() {
        let mut msg = v4::Message::default();
        msg.set_yiaddr(Ipv4Addr::new(10, 0, 0, 5));
        let opts = msg.opts_mut();
        opts.insert(v4::DhcpOption::MessageType(v4::MessageType::Ack));
        opts.insert(v4::DhcpOption::ServerIdentifier(Ipv4Addr::new(10, 0, 0, 1)));
        opts.insert(v4::DhcpOption::SubnetMask(Ipv4Addr::new(255, 255, 255, 0)));
        opts.insert(v4::DhcpOption::Router(vec![Ipv4Addr::new(192, 168, 1, 1)]));
        opts.insert(v4::DhcpOption::DomainNameServer(vec![Ipv4Addr::new(8, 8, 8, 8)]));
        opts.insert(v4::DhcpOption::AddressLeaseTime(7200));
        opts.insert(v4::DhcpOption::InterfaceMtu(1450));

        let mut buf = Vec::new();
        msg.encode(&mut Encoder::new(&mut buf)).unwrap();
        let decoded = v4::Message::decode(&mut Decoder::new(&buf)).unwrap();
        let ack = parse_ack(&decoded);

        assert_eq!(ack.your_ip, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(ack.server_ip, Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(ack.subnet_mask, Some(Ipv4Addr::new(255, 255, 255, 0)));
        assert_eq!(ack.routers, vec![Ipv4Addr::new(192, 168, 1, 1)]);
        assert_eq!(ack.dns_servers, vec![Ipv4Addr::new(8, 8, 8, 8)]);
        assert_eq!(ack.mtu, Some(1450));
        assert_eq!(ack.lease_time, Some(Duration::from_secs(7200)));
        assert!(ack.classless_routes.is_empty());
        assert_eq!(ack.hostname, None);
    }
}

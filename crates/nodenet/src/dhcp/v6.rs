//! DHCPv6 rapid-commit SOLICIT over UDP.

use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use std::time::Duration;

use async_trait::async_trait;
use dhcproto::{Decodable, Decoder, Encodable, Encoder, v6};
use tokio::net::UdpSocket;
use tracing::debug;

use super::{DEFAULT_EXCHANGE_TIMEOUT, MAX_DATAGRAM, client_socket, dns_labels};
use crate::operator::{Dhcp6Reply, Dhcp6Request, Dhcp6Transport, Error, Result};
use crate::util::ifname;

const CLIENT_PORT: u16 = 546;
const SERVER_PORT: u16 = 547;

/// All_DHCP_Relay_Agents_and_Servers.
const ALL_SERVERS: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 1, 2);

/// DHCPv6 client for one link.
#[derive(Debug, Clone)]
pub struct Udp6Transport {
    link: String,
    index: u32,
    /// DUID-LL from the link's hardware address.
    default_duid: Vec<u8>,
    iaid: u32,
    timeout: Duration,
}

impl Udp6Transport {
    pub fn new(link: impl Into<String>) -> Result<Self> {
        let link = link.into();
        let index =
            ifname::name_to_index(&link).map_err(|e| Error::Precondition(e.to_string()))?;
        let mac = ifname::hardware_address(&link).map_err(|e| Error::Precondition(e.to_string()))?;

        Ok(Self {
            link,
            index,
            default_duid: duid_ll(&mac),
            iaid: iaid(&mac),
            timeout: DEFAULT_EXCHANGE_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn solicit(&self, client_id: Vec<u8>) -> v6::Message {
        let mut msg = v6::Message::new(v6::MessageType::Solicit);
        let opts = msg.opts_mut();
        opts.insert(v6::DhcpOption::ClientId(client_id));
        opts.insert(v6::DhcpOption::RapidCommit);
        opts.insert(v6::DhcpOption::ElapsedTime(0));
        opts.insert(v6::DhcpOption::ORO(v6::ORO {
            opts: vec![
                v6::OptionCode::DomainNameServers,
                v6::OptionCode::DomainSearchList,
                v6::OptionCode::ClientFqdn,
                v6::OptionCode::NtpServer,
            ],
        }));
        opts.insert(v6::DhcpOption::IANA(v6::IANA {
            id: self.iaid,
            t1: 0,
            t2: 0,
            opts: v6::DhcpOptions::new(),
        }));
        msg
    }

    async fn exchange(&self, client_id: Vec<u8>) -> Result<Dhcp6Reply> {
        let bind = SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, CLIENT_PORT, 0, 0));
        let socket: UdpSocket = client_socket(&self.link, bind, false)?;

        let msg = self.solicit(client_id);
        let xid = msg.xid();

        let mut buf = Vec::new();
        msg.encode(&mut Encoder::new(&mut buf))
            .map_err(|e| Error::Transport(format!("encode DHCPv6 message: {e}")))?;
        socket
            .send_to(&buf, SocketAddrV6::new(ALL_SERVERS, SERVER_PORT, 0, self.index))
            .await?;
        debug!(link = %self.link, "sent DHCP6 SOLICIT");

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (n, from) = socket.recv_from(&mut buf).await?;
            let reply = match v6::Message::decode(&mut Decoder::new(&buf[..n])) {
                Ok(reply) => reply,
                Err(e) => {
                    debug!(link = %self.link, %from, error = %e, "ignoring undecodable DHCPv6 packet");
                    continue;
                }
            };
            if reply.xid() != xid || reply.msg_type() != v6::MessageType::Reply {
                continue;
            }
            return Ok(parse_reply(&reply));
        }
    }
}

#[async_trait]
impl Dhcp6Transport for Udp6Transport {
    async fn rapid_solicit(&self, request: &Dhcp6Request) -> Result<Dhcp6Reply> {
        let client_id = request
            .client_id
            .clone()
            .unwrap_or_else(|| self.default_duid.clone());

        tokio::time::timeout(self.timeout, self.exchange(client_id))
            .await
            .map_err(|_| Error::Transport(format!("no DHCPv6 reply within {:?}", self.timeout)))?
    }
}

/// DUID-LL (type 3) for an Ethernet address.
fn duid_ll(mac: &[u8]) -> Vec<u8> {
    let mut duid = vec![0x00, 0x03, 0x00, 0x01];
    duid.extend_from_slice(mac);
    duid
}

fn iaid(mac: &[u8]) -> u32 {
    let mut id = [0u8; 4];
    let tail = &mac[mac.len().saturating_sub(4)..];
    id[4 - tail.len()..].copy_from_slice(tail);
    u32::from_be_bytes(id)
}

/// Pull the operator's fields out of a REPLY.
pub(crate) fn parse_reply(msg: &v6::Message) -> Dhcp6Reply {
    let mut reply = Dhcp6Reply::default();
    let opts = msg.opts();

    if let Some(v6::DhcpOption::IANA(iana)) = opts.get(v6::OptionCode::IANA)
        && let Some(v6::DhcpOption::IAAddr(addr)) = iana.opts.get(v6::OptionCode::IAAddr)
    {
        reply.address = Some(addr.addr);
        reply.valid_lifetime = Duration::from_secs(u64::from(addr.valid_life));
    }

    if let Some(v6::DhcpOption::DomainNameServers(servers)) =
        opts.get(v6::OptionCode::DomainNameServers)
    {
        reply.dns_servers = servers.clone();
    }

    // dhcproto keeps the client FQDN opaque: a flags byte, then the name.
    if let Some(v6::DhcpOption::Unknown(fqdn)) = opts.get(v6::OptionCode::ClientFqdn)
        && let Some(labels) = fqdn.data().get(1..).and_then(dns_labels)
    {
        reply.fqdn_labels = labels;
    }

    if let Some(v6::DhcpOption::NtpServer(suboptions)) = opts.get(v6::OptionCode::NtpServer) {
        reply.ntp_servers = suboptions
            .iter()
            .filter_map(|sub| match sub {
                v6::NtpSuboption::ServerAddress(addr) | v6::NtpSuboption::MulticastAddress(addr) => {
                    Some(addr.to_string())
                }
                v6::NtpSuboption::FQDN(name) => {
                    let name = name.to_string();
                    let name = name.trim_end_matches('.');
                    (!name.is_empty()).then(|| name.to_string())
                }
            })
            .collect();
    }

    reply
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option(kind: u16, body: &[u8]) -> Vec<u8> {
        let mut out = kind.to_be_bytes().to_vec();
        out.extend_from_slice(&(body.len() as u16).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn test_duid_and_iaid() {
        let mac = [0x02, 0x42, 0xac, 0x11, 0x00, 0x02];
        assert_eq!(
            duid_ll(&mac),
            vec![0, 3, 0, 1, 0x02, 0x42, 0xac, 0x11, 0x00, 0x02]
        );
        assert_eq!(iaid(&mac), 0xac11_0002);
        assert_eq!(iaid(&[0x01, 0x02]), 0x0102);
    }

    #[test]
    fn test_parse_reply_options() {
        let mut raw = vec![7, 0x12, 0x34, 0x56];

        let addr: Ipv6Addr = "2001:db8::10".parse().unwrap();
        let mut iaaddr = addr.octets().to_vec();
        iaaddr.extend_from_slice(&3600u32.to_be_bytes());
        iaaddr.extend_from_slice(&7200u32.to_be_bytes());
        let mut iana = 1u32.to_be_bytes().to_vec();
        iana.extend_from_slice(&0u32.to_be_bytes());
        iana.extend_from_slice(&0u32.to_be_bytes());
        iana.extend(option(5, &iaaddr));
        raw.extend(option(3, &iana));

        let dns: Vec<Ipv6Addr> = vec!["2001:db8::53".parse().unwrap(), "2001:db8::54".parse().unwrap()];
        let dns_body: Vec<u8> = dns.iter().flat_map(|a| a.octets()).collect();
        raw.extend(option(23, &dns_body));
        raw.extend(option(39, b"\x01\x06node-1\x07example\x03com\x00"));

        let ntp_addr: Ipv6Addr = "2001:db8::123".parse().unwrap();
        let mut ntp_body = option(1, &ntp_addr.octets());
        ntp_body.extend(option(3, b"\x04time\x03lan\x00"));
        raw.extend(option(56, &ntp_body));

        let msg = v6::Message::decode(&mut Decoder::new(&raw)).unwrap();
        assert_eq!(msg.msg_type(), v6::MessageType::Reply);

        let reply = parse_reply(&msg);
        assert_eq!(reply.address, Some(addr));
        assert_eq!(reply.valid_lifetime, Duration::from_secs(7200));
        assert_eq!(reply.dns_servers, dns);
        assert_eq!(reply.fqdn_labels, vec!["node-1", "example", "com"]);
        assert_eq!(reply.ntp_servers, vec!["2001:db8::123", "time.lan"]);
    }

    #[test]
    fn test_parse_reply_empty() {
        let raw = [7, 0, 0, 1];
        let msg = v6::Message::decode(&mut Decoder::new(&raw)).unwrap();
        assert_eq!(parse_reply(&msg), Dhcp6Reply::default());
    }

    #[test]
    fn test_truncated_option_ignored() {
        let mut raw = vec![7, 0, 0, 1];
        raw.extend(option(23, &"2001:db8::53".parse::<Ipv6Addr>().unwrap().octets()));
        // Claims 32 bytes, carries 8.
        raw.extend_from_slice(&[0, 24, 0, 32]);
        raw.extend_from_slice(&[0u8; 8]);

        let msg = v6::Message::decode(&mut Decoder::new(&raw)).unwrap();
        let reply = parse_reply(&msg);
        assert_eq!(reply.dns_servers, vec!["2001:db8::53".parse::<Ipv6Addr>().unwrap()]);
    }

    #[test]
    fn test_solicit_options() {
        let transport = Udp6Transport {
            link: "eth0".into(),
            index: 2,
            default_duid: duid_ll(&[2, 0, 0, 0, 0, 1]),
            iaid: 1,
            timeout: DEFAULT_EXCHANGE_TIMEOUT,
        };
        let msg = transport.solicit(vec![0, 3, 0, 1, 2, 0, 0, 0, 0, 1]);

        let mut buf = Vec::new();
        msg.encode(&mut Encoder::new(&mut buf)).unwrap();
        assert_eq!(buf[0], 1);

        let sent = v6::Message::decode(&mut Decoder::new(&buf)).unwrap();
        let opts = sent.opts();
        for code in [
            v6::OptionCode::ClientId,
            v6::OptionCode::IANA,
            v6::OptionCode::ElapsedTime,
            v6::OptionCode::RapidCommit,
        ] {
            assert!(opts.get(code).is_some(), "missing option {code:?}");
        }
        let Some(v6::DhcpOption::ORO(oro)) = opts.get(v6::OptionCode::ORO) else {
            panic!("missing ORO");
        };
        let requested: Vec<u16> = oro.opts.iter().map(|&code| u16::from(code)).collect();
        assert_eq!(requested, [23, 24, 39, 56]);
    }
}

//! Lowering of a [`Rule`] into instruction lists and sets.

use serde::Serialize;

use super::expr::{
    CmpOp, CtKey, ExthdrOp, Instruction, LimitType, LimitUnit, MetaKey, NFPROTO_IPV4,
    NFPROTO_IPV6, PayloadBase, REG_1,
};
use super::rule::{
    AddressMatch, ConntrackState, IfNameMatch, MatchOperator, Mark, PortRange, Rule,
};
use super::set::NfTablesSet;
use super::{Error, Result};
use crate::ipset::{IpRange, IpSet};
use crate::util::ifname;

/// Compiled rule: one instruction list per emitted kernel rule, plus the
/// sets their `Lookup`s refer to by index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Compiled {
    pub rules: Vec<Vec<Instruction>>,
    pub sets: Vec<NfTablesSet>,
}

impl Compiled {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.sets.is_empty()
    }
}

/// Header offsets of an address field.
#[derive(Clone, Copy)]
struct Offsets {
    v4: u32,
    v6: u32,
}

const SOURCE: Offsets = Offsets { v4: 12, v6: 8 };
const DESTINATION: Offsets = Offsets { v4: 16, v6: 24 };

const TCP_FLAGS_OFFSET: u32 = 13;
const TCP_FLAG_SYN: u8 = 0x02;
const TCP_FLAG_RST: u8 = 0x04;
const TCPOPT_MAXSEG: u8 = 2;
const IPPROTO_TCP: u8 = 6;

/// TCP plus IP header overhead per family.
const MSS_OVERHEAD_V4: u16 = 40;
const MSS_OVERHEAD_V6: u16 = 60;

/// Compile `rule`.
pub fn compile(rule: &Rule) -> Result<Compiled> {
    rule.compile()
}

impl Rule {
    /// Compile into nftables instructions. A rule whose address matches
    /// can never be satisfied compiles to the empty result.
    pub fn compile(&self) -> Result<Compiled> {
        let mut c = Compiler::default();

        if let Some(m) = &self.iif_name {
            c.ifname(MetaKey::IifName, m)?;
        }
        if let Some(m) = &self.oif_name {
            c.ifname(MetaKey::OifName, m)?;
        }
        if let Some(m) = &self.mark {
            c.mark(m);
        }
        if let Some(m) = &self.conntrack_state {
            c.conntrack(&m.states);
        }

        if let Some(m) = &self.source_address
            && !c.address(m, SOURCE)
        {
            return Ok(Compiled::default());
        }
        if let Some(m) = &self.destination_address
            && !c.address(m, DESTINATION)
        {
            return Ok(Compiled::default());
        }

        if let Some(m) = &self.l4 {
            c.pre.push(Instruction::load_meta(MetaKey::L4Proto));
            c.pre.push(Instruction::cmp(CmpOp::Eq, [m.protocol.number()]));

            if !m.source_ports.is_empty() {
                c.ports(0, &m.source_ports)?;
            }
            if !m.destination_ports.is_empty() {
                c.ports(2, &m.destination_ports)?;
            }
        }

        if let Some(m) = &self.limit {
            c.pre.push(Instruction::Limit {
                limit_type: LimitType::Packets,
                rate: m.packet_rate_per_second,
                burst: u32::try_from(m.packet_rate_per_second).unwrap_or(u32::MAX),
                unit: LimitUnit::Second,
            });
        }

        if self.anon_counter {
            c.pre.push(Instruction::Counter);
        }

        if let Some(clamp) = &self.clamp_mss {
            let v4 = clamp_mss(clamp.mtu, MSS_OVERHEAD_V4)?;
            let v6 = clamp_mss(clamp.mtu, MSS_OVERHEAD_V6)?;
            c.v4.get_or_insert_with(Vec::new).extend(v4);
            c.v6.get_or_insert_with(Vec::new).extend(v6);
        }

        if let Some(m) = &self.set_mark {
            c.post.push(Instruction::load_meta(MetaKey::Mark));
            c.post.push(mark_bitwise(m));
            c.post.push(Instruction::store_meta(MetaKey::Mark));
        }

        if let Some(verdict) = self.verdict {
            c.post.push(Instruction::Verdict { kind: verdict });
        }

        Ok(c.finish())
    }
}

/// Instruction lists shared by every family (`pre`, `post`) and specific to
/// one (`v4`, `v6`). `None` means the family is not matched at all; an empty
/// list matches every packet of that family.
#[derive(Default)]
struct Compiler {
    pre: Vec<Instruction>,
    v4: Option<Vec<Instruction>>,
    v6: Option<Vec<Instruction>>,
    post: Vec<Instruction>,
    sets: Vec<NfTablesSet>,
}

impl Compiler {
    fn add_set(&mut self, set: NfTablesSet) -> u32 {
        self.sets.push(set);
        (self.sets.len() - 1) as u32
    }

    fn ifname(&mut self, key: MetaKey, m: &IfNameMatch) -> Result<()> {
        let names = m
            .interface_names
            .iter()
            .map(|name| {
                ifname::validate(name).map_err(|_| Error::InvalidInterfaceName(name.clone()))?;
                Ok(ifname::padded(name))
            })
            .collect::<Result<Vec<_>>>()?;

        self.pre.push(Instruction::load_meta(key));

        match names.as_slice() {
            [name] => {
                let op = match m.operator {
                    MatchOperator::Equal => CmpOp::Eq,
                    MatchOperator::NotEqual => CmpOp::Neq,
                };
                self.pre.push(Instruction::cmp(op, *name));
            }
            // An empty set matches nothing.
            _ => {
                let set = self.add_set(NfTablesSet::IfName(names));
                self.pre.push(Instruction::lookup(
                    set,
                    m.operator == MatchOperator::NotEqual,
                ));
            }
        }

        Ok(())
    }

    fn mark(&mut self, m: &Mark) {
        self.pre.push(Instruction::load_meta(MetaKey::Mark));
        self.pre.push(mark_bitwise(m));
        self.pre.push(Instruction::cmp(CmpOp::Eq, m.value.to_ne_bytes()));
    }

    fn conntrack(&mut self, states: &[ConntrackState]) {
        self.pre.push(Instruction::Ct {
            key: CtKey::State,
            register: REG_1,
        });

        match states {
            [state] => {
                self.pre.push(Instruction::bitwise(4, state.bit().to_ne_bytes(), [0u8; 4]));
                self.pre.push(Instruction::cmp(CmpOp::Neq, [0u8; 4]));
            }
            _ => {
                let set = self.add_set(NfTablesSet::ConntrackState(states.to_vec()));
                self.pre.push(Instruction::lookup(set, false));
            }
        }
    }

    /// Returns false when the match can never succeed.
    fn address(&mut self, m: &AddressMatch, offsets: Offsets) -> bool {
        let (v4, v6) = IpSet::build(&m.include_subnets, &m.exclude_subnets).split();

        if v4.is_empty() && v6.is_empty() && !m.invert {
            return false;
        }

        let v4_all = covers_all(&v4);
        let v6_all = covers_all(&v6);

        if v4_all && v6_all && m.invert {
            return false;
        }

        let v4 = self.family_branch(v4, v4_all, m.invert, offsets.v4, 4, NfTablesSet::Ipv4);
        if let Some(branch) = v4 {
            self.v4.get_or_insert_with(Vec::new).extend(branch);
        }

        let v6 = self.family_branch(v6, v6_all, m.invert, offsets.v6, 16, NfTablesSet::Ipv6);
        if let Some(branch) = v6 {
            self.v6.get_or_insert_with(Vec::new).extend(branch);
        }

        true
    }

    /// Instructions for one family of an address match, or `None` when the
    /// family cannot match.
    fn family_branch(
        &mut self,
        ranges: Vec<IpRange>,
        covers_all: bool,
        invert: bool,
        offset: u32,
        len: u32,
        make_set: fn(Vec<IpRange>) -> NfTablesSet,
    ) -> Option<Vec<Instruction>> {
        if (covers_all && !invert) || (invert && ranges.is_empty()) {
            return Some(Vec::new());
        }

        if (!covers_all && invert) || (!invert && !ranges.is_empty()) {
            let set = self.add_set(make_set(ranges));
            return Some(vec![
                Instruction::payload(PayloadBase::Network, offset, len),
                Instruction::lookup(set, invert),
            ]);
        }

        None
    }

    fn ports(&mut self, offset: u32, ranges: &[PortRange]) -> Result<()> {
        if let Some(bad) = ranges.iter().find(|r| r.lo > r.hi) {
            return Err(Error::InvalidPortRange {
                lo: bad.lo,
                hi: bad.hi,
            });
        }

        let set = self.add_set(NfTablesSet::Port(ranges.to_vec()));
        self.post.push(Instruction::payload(PayloadBase::Transport, offset, 2));
        self.post.push(Instruction::lookup(set, false));
        Ok(())
    }

    fn finish(self) -> Compiled {
        let Compiler {
            pre,
            v4,
            v6,
            post,
            sets,
        } = self;

        let with_family = |nfproto: u8, family: Vec<Instruction>| {
            let mut rule = pre.clone();
            rule.extend(Instruction::match_family(nfproto));
            rule.extend(family);
            rule.extend(post.iter().cloned());
            rule
        };

        let rules = match (v4, v6) {
            (None, None) if pre.is_empty() && post.is_empty() => Vec::new(),
            (None, None) => {
                let mut rule = pre.clone();
                rule.extend(post.iter().cloned());
                vec![rule]
            }
            (Some(v4), None) => vec![with_family(NFPROTO_IPV4, v4)],
            (None, Some(v6)) => vec![with_family(NFPROTO_IPV6, v6)],
            (Some(v4), Some(v6)) => vec![
                with_family(NFPROTO_IPV4, v4),
                with_family(NFPROTO_IPV6, v6),
            ],
        };

        Compiled { rules, sets }
    }
}

fn covers_all(ranges: &[IpRange]) -> bool {
    matches!(ranges, [only] if only.is_full_family())
}

fn mark_bitwise(m: &Mark) -> Instruction {
    Instruction::bitwise(4, m.mask.to_ne_bytes(), m.xor.to_ne_bytes())
}

/// Rewrite the MSS option of SYN packets down to `mtu - overhead`.
fn clamp_mss(mtu: u16, overhead: u16) -> Result<Vec<Instruction>> {
    let mss = mtu
        .checked_sub(overhead)
        .filter(|&mss| mss > 0)
        .ok_or(Error::MtuTooSmall(mtu))?;
    let mss = mss.to_be_bytes();

    Ok(vec![
        Instruction::load_meta(MetaKey::L4Proto),
        Instruction::cmp(CmpOp::Eq, [IPPROTO_TCP]),
        Instruction::payload(PayloadBase::Transport, TCP_FLAGS_OFFSET, 1),
        Instruction::bitwise(1, [TCP_FLAG_SYN | TCP_FLAG_RST], [0u8]),
        Instruction::cmp(CmpOp::Eq, [TCP_FLAG_SYN]),
        Instruction::Exthdr {
            kind: TCPOPT_MAXSEG,
            offset: 2,
            len: 2,
            op: ExthdrOp::TcpOpt,
            dest_register: REG_1,
            source_register: 0,
        },
        Instruction::cmp(CmpOp::Gt, mss),
        Instruction::Immediate {
            register: REG_1,
            data: mss.to_vec(),
        },
        Instruction::Exthdr {
            kind: TCPOPT_MAXSEG,
            offset: 2,
            len: 2,
            op: ExthdrOp::TcpOpt,
            dest_register: 0,
            source_register: REG_1,
        },
    ])
}

//! nftables VM instructions.
//!
//! The shapes mirror the kernel's `NFTA_*_` expression attributes closely
//! enough that a binding can turn each [`Instruction`] into one expression
//! of an `NFT_MSG_NEWRULE` message.

use serde::{Deserialize, Serialize};

/// The only register the compiler uses (`NFT_REG_1`).
pub const REG_1: u32 = 1;

/// `NFPROTO_IPV4`.
pub const NFPROTO_IPV4: u8 = 2;
/// `NFPROTO_IPV6`.
pub const NFPROTO_IPV6: u8 = 10;

/// `NFT_META_*` keys.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetaKey {
    Mark = 3,
    IifName = 6,
    OifName = 7,
    NfProto = 15,
    L4Proto = 16,
}

/// `NFT_CMP_*` operators.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CmpOp {
    Eq = 0,
    Neq = 1,
    Lt = 2,
    Lte = 3,
    Gt = 4,
    Gte = 5,
}

/// `NFT_PAYLOAD_*_HEADER` bases.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadBase {
    Link = 0,
    Network = 1,
    Transport = 2,
}

/// `NFT_EXTHDR_OP_*`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExthdrOp {
    Ipv6 = 0,
    TcpOpt = 1,
}

/// `NFT_CT_*` keys.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CtKey {
    State = 0,
}

/// `NFT_LIMIT_*` types.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitType {
    Packets = 0,
    Bytes = 1,
}

/// Limit rate unit, in seconds.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitUnit {
    Second = 1,
    Minute = 60,
    Hour = 3600,
}

/// Terminal verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictKind {
    Accept,
    Drop,
}

impl VerdictKind {
    /// Netfilter verdict code (`NF_DROP` / `NF_ACCEPT`).
    pub fn code(self) -> i32 {
        match self {
            Self::Drop => 0,
            Self::Accept => 1,
        }
    }
}

/// One nftables expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "expr", rename_all = "lowercase")]
pub enum Instruction {
    /// Load a meta key into `register`, or store `register` into the key
    /// when `source_register` is set.
    Meta {
        key: MetaKey,
        register: u32,
        source_register: bool,
    },
    Cmp {
        op: CmpOp,
        register: u32,
        data: Vec<u8>,
    },
    /// `dest = (source & mask) ^ xor`
    Bitwise {
        source_register: u32,
        dest_register: u32,
        len: u32,
        mask: Vec<u8>,
        xor: Vec<u8>,
    },
    Payload {
        base: PayloadBase,
        offset: u32,
        len: u32,
        dest_register: u32,
    },
    /// Extension header access. A non-zero `dest_register` loads, a
    /// non-zero `source_register` writes.
    Exthdr {
        kind: u8,
        offset: u32,
        len: u32,
        op: ExthdrOp,
        dest_register: u32,
        source_register: u32,
    },
    /// Match `source_register` against the set at `set` in the compiled
    /// set list.
    Lookup {
        source_register: u32,
        set: u32,
        invert: bool,
    },
    Ct {
        key: CtKey,
        register: u32,
    },
    Limit {
        limit_type: LimitType,
        rate: u64,
        burst: u32,
        unit: LimitUnit,
    },
    Counter,
    Immediate {
        register: u32,
        data: Vec<u8>,
    },
    Verdict {
        kind: VerdictKind,
    },
}

impl Instruction {
    pub fn load_meta(key: MetaKey) -> Self {
        Self::Meta {
            key,
            register: REG_1,
            source_register: false,
        }
    }

    pub fn store_meta(key: MetaKey) -> Self {
        Self::Meta {
            key,
            register: REG_1,
            source_register: true,
        }
    }

    pub fn cmp(op: CmpOp, data: impl Into<Vec<u8>>) -> Self {
        Self::Cmp {
            op,
            register: REG_1,
            data: data.into(),
        }
    }

    pub fn bitwise(len: u32, mask: impl Into<Vec<u8>>, xor: impl Into<Vec<u8>>) -> Self {
        Self::Bitwise {
            source_register: REG_1,
            dest_register: REG_1,
            len,
            mask: mask.into(),
            xor: xor.into(),
        }
    }

    pub fn payload(base: PayloadBase, offset: u32, len: u32) -> Self {
        Self::Payload {
            base,
            offset,
            len,
            dest_register: REG_1,
        }
    }

    pub fn lookup(set: u32, invert: bool) -> Self {
        Self::Lookup {
            source_register: REG_1,
            set,
            invert,
        }
    }

    /// Family guard: `meta nfproto == family`.
    pub(crate) fn match_family(nfproto: u8) -> [Self; 2] {
        [
            Self::load_meta(MetaKey::NfProto),
            Self::cmp(CmpOp::Eq, [nfproto]),
        ]
    }
}

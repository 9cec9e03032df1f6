//! Netlink attribute (rtattr/nlattr) framing.
//!
//! On the wire an attribute is `len(2) | type(2) | payload | pad`, where
//! `len` counts the header and payload but not the padding up to the next
//! 4-byte boundary.

use super::error::{Error, Result};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Netlink attribute alignment.
pub const NLA_ALIGNTO: usize = 4;

/// Align a length to NLA_ALIGNTO boundary.
#[inline]
pub const fn nla_align(len: usize) -> usize {
    (len + NLA_ALIGNTO - 1) & !(NLA_ALIGNTO - 1)
}

/// Size of the attribute header.
pub const NLA_HDRLEN: usize = 4;

/// Netlink attribute header (mirrors struct nlattr / struct rtattr).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NlAttr {
    /// Length including header.
    pub nla_len: u16,
    /// Attribute type, possibly carrying flag bits.
    pub nla_type: u16,
}

/// Attribute type flags.
pub const NLA_F_NESTED: u16 = 1 << 15;
pub const NLA_F_NET_BYTEORDER: u16 = 1 << 14;
pub const NLA_TYPE_MASK: u16 = !(NLA_F_NESTED | NLA_F_NET_BYTEORDER);

impl NlAttr {
    /// Create a new attribute header.
    pub fn new(attr_type: u16, data_len: usize) -> Self {
        Self {
            nla_len: (NLA_HDRLEN + data_len) as u16,
            nla_type: attr_type,
        }
    }

    /// Get the attribute type without flags.
    pub fn kind(&self) -> u16 {
        self.nla_type & NLA_TYPE_MASK
    }

    /// Check if this is a nested attribute.
    pub fn is_nested(&self) -> bool {
        self.nla_type & NLA_F_NESTED != 0
    }

    /// Convert to bytes.
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }

    /// Parse from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(data)
            .map(|(r, _)| r)
            .map_err(|_| Error::Truncated {
                expected: std::mem::size_of::<Self>(),
                actual: data.len(),
            })
    }
}

/// Lenient iterator over netlink attributes in a buffer.
///
/// Stops silently at the first malformed record. Use [`AttrIter::strict`]
/// when framing errors must be reported.
pub struct AttrIter<'a> {
    data: &'a [u8],
}

impl<'a> AttrIter<'a> {
    /// Create a new attribute iterator.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Iterator that yields an error for every framing problem instead of
    /// stopping.
    pub fn strict(data: &'a [u8]) -> StrictAttrIter<'a> {
        StrictAttrIter { data, failed: false }
    }

    /// Check if there are no more attributes.
    pub fn is_empty(&self) -> bool {
        self.data.len() < NLA_HDRLEN
    }
}

impl<'a> Iterator for AttrIter<'a> {
    /// Returns (attribute type, payload data).
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        match split_attr(self.data) {
            Ok(Some((kind, payload, rest))) => {
                self.data = rest;
                Some((kind, payload))
            }
            _ => None,
        }
    }
}

/// Attribute iterator that reports framing errors.
///
/// After the first error the iterator is fused.
pub struct StrictAttrIter<'a> {
    data: &'a [u8],
    failed: bool,
}

impl<'a> Iterator for StrictAttrIter<'a> {
    type Item = Result<(u16, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match split_attr(self.data) {
            Ok(Some((kind, payload, rest))) => {
                self.data = rest;
                Some(Ok((kind, payload)))
            }
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Split the first attribute off `data`.
///
/// Returns `Ok(None)` on an empty buffer.
fn split_attr(data: &[u8]) -> Result<Option<(u16, &[u8], &[u8])>> {
    if data.is_empty() {
        return Ok(None);
    }
    let attr = NlAttr::from_bytes(data)?;

    let len = attr.nla_len as usize;
    if len < NLA_HDRLEN {
        return Err(Error::InvalidAttribute(format!(
            "attribute length {} shorter than header",
            len
        )));
    }
    if len > data.len() {
        return Err(Error::Truncated {
            expected: len,
            actual: data.len(),
        });
    }

    let payload = &data[NLA_HDRLEN..len];
    let aligned_len = nla_align(len);
    let rest = if aligned_len >= data.len() {
        &[][..]
    } else {
        &data[aligned_len..]
    };

    Ok(Some((attr.kind(), payload, rest)))
}

/// Helper functions for extracting typed values from attribute payloads.
pub mod get {
    use super::*;

    /// Extract a u8 value.
    pub fn u8(data: &[u8]) -> Result<u8> {
        data.first()
            .copied()
            .ok_or_else(|| Error::InvalidAttribute("empty u8 attribute".into()))
    }

    /// Extract a u16 value (native endian).
    pub fn u16_ne(data: &[u8]) -> Result<u16> {
        Ok(u16::from_ne_bytes(array(data, "u16")?))
    }

    /// Extract a u32 value (native endian).
    pub fn u32_ne(data: &[u8]) -> Result<u32> {
        Ok(u32::from_ne_bytes(array(data, "u32")?))
    }

    /// Extract a u16 value (big endian / network order).
    pub fn u16_be(data: &[u8]) -> Result<u16> {
        Ok(u16::from_be_bytes(array(data, "u16")?))
    }

    /// Extract a null-terminated string.
    pub fn string(data: &[u8]) -> Result<&str> {
        let len = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        std::str::from_utf8(&data[..len])
            .map_err(|e| Error::InvalidAttribute(format!("invalid UTF-8: {}", e)))
    }

    /// Extract a fixed-size byte array from the start of the payload.
    pub fn array<const N: usize>(data: &[u8], what: &str) -> Result<[u8; N]> {
        data.get(..N)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| Error::InvalidAttribute(format!("truncated {} attribute", what)))
    }
}

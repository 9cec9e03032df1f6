//! Link kind-specific attribute codecs.
//!
//! Each spec encodes to the payload of `IFLA_INFO_DATA` for its kind and
//! decodes from the same payload as dumped by the kernel. Decoding is
//! forgiving: unknown attribute types are skipped and missing attributes
//! leave the field at its zero value. Only framing errors fail.
//!
//! # Example
//!
//! ```ignore
//! use nodenet::link::{KindData, bond::{BondMasterSpec, BondMode}};
//!
//! let mut bond = BondMasterSpec {
//!     mode: BondMode::ActiveBackup,
//!     mii_mon: 100,
//!     ..Default::default()
//! };
//! bond.fill_defaults();
//! let data = bond.encode()?;
//! assert_eq!(BondMasterSpec::decode(&data)?.mii_mon, 100);
//! ```

pub mod bond;
pub mod bridge;
pub mod vlan;
pub mod vrf;

use crate::netlink;

pub use bond::BondMasterSpec;
pub use bridge::BridgeMasterSpec;
pub use vlan::{VlanProtocol, VlanSpec};
pub use vrf::VrfMasterSpec;

/// Result type for link codecs.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by link codecs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed attribute stream.
    #[error(transparent)]
    Netlink(#[from] netlink::Error),

    /// An address list attribute was given an address of the other family.
    #[error("{attr}: {addr} is not an {expected} address")]
    WrongFamily {
        attr: &'static str,
        addr: std::net::IpAddr,
        expected: &'static str,
    },

    /// A textual value has no known meaning.
    #[error("invalid {what}: {value:?}")]
    InvalidValue { what: &'static str, value: String },
}

/// Codec for the `IFLA_INFO_DATA` payload of one link kind.
pub trait KindData: Sized {
    /// Value of `IFLA_INFO_KIND` for this kind.
    const KIND: &'static str;

    /// Encode into an attribute stream.
    fn encode(&self) -> Result<Vec<u8>>;

    /// Decode from an attribute stream.
    fn decode(data: &[u8]) -> Result<Self>;
}

/// Declare an enum over a kernel integer with lower-case names.
///
/// Values without a name decode to `Other(raw)` so a dump never fails on a
/// newer kernel.
macro_rules! kernel_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident: $repr:ty {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal => $text:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
            /// A kernel value with no name.
            Other($repr),
        }

        impl From<$repr> for $name {
            fn from(value: $repr) -> Self {
                match value {
                    $( $value => Self::$variant, )+
                    other => Self::Other(other),
                }
            }
        }

        impl From<$name> for $repr {
            fn from(value: $name) -> $repr {
                match value {
                    $( $name::$variant => $value, )+
                    $name::Other(raw) => raw,
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::from(0)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $( Self::$variant => f.write_str($text), )+
                    Self::Other(raw) => write!(f, "{}", raw),
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::link::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $( $text => Ok(Self::$variant), )+
                    other => other.parse::<$repr>().map(Self::from).map_err(|_| {
                        $crate::link::Error::InvalidValue {
                            what: stringify!($name),
                            value: other.to_string(),
                        }
                    }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = $crate::link::Error;

            fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
                s.parse()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> String {
                value.to_string()
            }
        }
    };
}

pub(crate) use kernel_enum;

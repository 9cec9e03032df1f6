//! Utility modules.

pub mod ifname;

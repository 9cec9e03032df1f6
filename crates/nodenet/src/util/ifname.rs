//! Interface name, index and hardware address helpers.

/// Maximum interface name length (including null terminator).
pub const IFNAMSIZ: usize = 16;

/// Error type for interface lookups.
#[derive(Debug, thiserror::Error)]
pub enum IfError {
    #[error("interface not found: {0}")]
    NotFound(String),

    #[error("invalid interface name: {0}")]
    InvalidName(String),

    #[error("invalid hardware address for {name}: {value}")]
    InvalidHardwareAddress { name: String, value: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IfError>;

/// Validate an interface name.
pub fn validate(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(IfError::InvalidName("empty name".to_string()));
    }

    if name.len() >= IFNAMSIZ {
        return Err(IfError::InvalidName(format!(
            "name too long (max {} chars)",
            IFNAMSIZ - 1
        )));
    }

    if name.contains('/') || name.contains('\0') || name.chars().any(|c| c.is_whitespace()) {
        return Err(IfError::InvalidName(format!("{:?}", name)));
    }

    Ok(())
}

/// Zero-pad a name to the fixed `IFNAMSIZ` key the kernel compares against.
///
/// Longer names are truncated so the last byte stays a terminator.
pub fn padded(name: &str) -> [u8; IFNAMSIZ] {
    let mut key = [0u8; IFNAMSIZ];
    let bytes = name.as_bytes();
    let len = bytes.len().min(IFNAMSIZ - 1);
    key[..len].copy_from_slice(&bytes[..len]);
    key
}

/// Convert an interface name to index.
pub fn name_to_index(name: &str) -> Result<u32> {
    validate(name)?;

    let path = format!("/sys/class/net/{}/ifindex", name);
    let content =
        std::fs::read_to_string(&path).map_err(|_| IfError::NotFound(name.to_string()))?;

    content
        .trim()
        .parse()
        .map_err(|_| IfError::NotFound(name.to_string()))
}

/// Read the hardware address of an interface.
pub fn hardware_address(name: &str) -> Result<Vec<u8>> {
    validate(name)?;

    let path = format!("/sys/class/net/{}/address", name);
    let content =
        std::fs::read_to_string(&path).map_err(|_| IfError::NotFound(name.to_string()))?;

    parse_mac(content.trim()).ok_or_else(|| IfError::InvalidHardwareAddress {
        name: name.to_string(),
        value: content.trim().to_string(),
    })
}

/// Parse a colon separated hardware address. An all-zero address is rejected.
pub fn parse_mac(s: &str) -> Option<Vec<u8>> {
    let bytes = s
        .split(':')
        .map(|part| u8::from_str_radix(part, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    if bytes.is_empty() || bytes.iter().all(|&b| b == 0) {
        return None;
    }
    Some(bytes)
}

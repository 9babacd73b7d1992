use super::file::FileRef;

/// Contiguous run of bytes decoded from a hex file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub address: u32,
    pub size: u32,
}

/// One addressed binary blob to be written.
#[derive(Debug, Clone)]
pub struct Partition {
    pub addr: u32,
    pub file: FileRef,
}

/// Parses a decimal or `0x` prefixed hexadecimal address.
pub fn parse_address(value: &str) -> Option<u32> {
    if let Some(hex) = value.strip_prefix("0x") {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        u32::from_str_radix(hex, 16).ok()
    } else if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        value.parse().ok()
    } else {
        None
    }
}

pub fn format_address(addr: u32) -> String {
    format!("0x{:08x}", addr)
}

//! ANSI control byte constants
//!
//! Readable names for the raw bytes the CSI filter keys on.

/// Escape byte (0x1b / 27)
pub const ESC: u8 = 0x1b;

/// Second byte of a Control Sequence Introducer (`ESC [`)
pub const CSI_BRACKET: u8 = b'[';

/// Lowest byte that terminates a CSI sequence (`@`)
pub const CSI_FINAL_MIN: u8 = 0x40;

/// Highest byte that terminates a CSI sequence (`~`)
pub const CSI_FINAL_MAX: u8 = 0x7e;

/// Whether `byte` ends a CSI sequence.
#[inline]
pub fn is_csi_final(byte: u8) -> bool {
    (CSI_FINAL_MIN..=CSI_FINAL_MAX).contains(&byte)
}

/// Build a CSI sequence from its parameter bytes and final byte
#[cfg(test)]
pub fn csi(params: &str, final_byte: char) -> Vec<u8> {
    format!("\x1b[{}{}", params, final_byte).into_bytes()
}

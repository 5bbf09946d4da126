//! Key code decoding for keyboard-wedge barcode scanners.
//!
//! A scanner in keyboard mode "types" each barcode character as a key press.
//! Decoding turns the raw key code carried by a capture event back into the
//! character the scanner meant to send.
//!
//! The lookup is pluggable through [`KeyDecoder`]: the capture backends only
//! hand over integer codes, and the framer asks the decoder for a character.
//! Full keyboard-layout decoding (shift state, dead keys, non-US layouts) is
//! deliberately not attempted; scanners emit a small, predictable alphabet.

pub mod linux_evdev;

/// Pluggable lookup from a raw key code to at most one character.
///
/// Returning `None` means "this key contributes nothing to the scan"; it is
/// not an error.  Modifier keys such as Shift fall into this category.
pub trait KeyDecoder: Send + Sync {
    /// Decodes a single key code.
    fn decode(&self, code: u16) -> Option<char>;
}

/// Decoder for Linux input-event key codes (`linux/input-event-codes.h`).
///
/// Letters decode to upper case regardless of Shift; digits decode from the
/// main number row only; Enter decodes to `'\n'`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxKeyDecoder;

impl LinuxKeyDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl KeyDecoder for LinuxKeyDecoder {
    fn decode(&self, code: u16) -> Option<char> {
        linux_evdev::code_to_char(code)
    }
}

impl<F> KeyDecoder for F
where
    F: Fn(u16) -> Option<char> + Send + Sync,
{
    fn decode(&self, code: u16) -> Option<char> {
        self(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linux_decoder_delegates_to_table() {
        let decoder = LinuxKeyDecoder::new();
        assert_eq!(decoder.decode(30), Some('A'));
        assert_eq!(decoder.decode(28), Some('\n'));
        assert_eq!(decoder.decode(42), None);
    }

    #[test]
    fn test_closure_can_act_as_decoder() {
        // Arrange: a decoder that maps every code to its ASCII value
        let decoder = |code: u16| char::from_u32(u32::from(code));

        // Act / Assert
        assert_eq!(decoder.decode(0x41), Some('A'));
    }
}

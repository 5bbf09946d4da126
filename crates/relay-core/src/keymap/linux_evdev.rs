//! Linux input-event key code to character table.
//!
//! Key codes are defined in `linux/input-event-codes.h`.
//! Reference: https://github.com/torvalds/linux/blob/master/include/uapi/linux/input-event-codes.h
//!
//! Codes describe *physical key positions* on a US keyboard, not characters.
//! `KEY_A` (30) is the key labelled "A" whether or not Shift is held, so this
//! table cannot distinguish 'a' from 'A'.  Scanners configured for keyboard
//! emulation normally send upper-case letters and digits, which is all this
//! table covers.

/// Translates a Linux key code to the character a barcode scanner sends with it.
///
/// Returns `None` for codes with no mapping, including modifiers.
pub fn code_to_char(code: u16) -> Option<char> {
    match code {
        // Number row
        2 => Some('1'),  // KEY_1
        3 => Some('2'),  // KEY_2
        4 => Some('3'),  // KEY_3
        5 => Some('4'),  // KEY_4
        6 => Some('5'),  // KEY_5
        7 => Some('6'),  // KEY_6
        8 => Some('7'),  // KEY_7
        9 => Some('8'),  // KEY_8
        10 => Some('9'), // KEY_9
        11 => Some('0'), // KEY_0

        // Top letter row
        16 => Some('Q'), // KEY_Q
        17 => Some('W'), // KEY_W
        18 => Some('E'), // KEY_E
        19 => Some('R'), // KEY_R
        20 => Some('T'), // KEY_T
        21 => Some('Y'), // KEY_Y
        22 => Some('U'), // KEY_U
        23 => Some('I'), // KEY_I
        24 => Some('O'), // KEY_O
        25 => Some('P'), // KEY_P

        // Enter terminates most scanner configurations
        28 => Some('\n'), // KEY_ENTER

        // Home letter row
        30 => Some('A'), // KEY_A
        31 => Some('S'), // KEY_S
        32 => Some('D'), // KEY_D
        33 => Some('F'), // KEY_F
        34 => Some('G'), // KEY_G
        35 => Some('H'), // KEY_H
        36 => Some('J'), // KEY_J
        37 => Some('K'), // KEY_K
        38 => Some('L'), // KEY_L

        // Bottom letter row
        44 => Some('Z'), // KEY_Z
        45 => Some('X'), // KEY_X
        46 => Some('C'), // KEY_C
        47 => Some('V'), // KEY_V
        48 => Some('B'), // KEY_B
        49 => Some('N'), // KEY_N
        50 => Some('M'), // KEY_M

        // KEY_LEFTSHIFT (42) and everything else contribute nothing.
        _ => None,
    }
}

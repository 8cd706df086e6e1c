//! Serial console contract and status formatting.
//!
//! The transport is byte-at-a-time in both directions (external interface:
//! 9600 8N1, RX by interrupt, TX transmit-and-wait). Everything above the
//! byte level lives here so it can be exercised on the host: the user
//! command decoding and the unit formatters the status lines use.

use core::fmt;

/// Byte-oriented console transport.
pub trait Console {
    /// Transmit-and-wait output of one byte.
    fn write_byte(&mut self, byte: u8);

    /// The most recent received byte, if one arrived since the last poll.
    fn poll_byte(&mut self) -> Option<u8>;
}

/// `core::fmt` adapter over a console.
pub struct ConsoleWriter<'a, C: Console>(pub &'a mut C);

impl<'a, C: Console> fmt::Write for ConsoleWriter<'a, C> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.0.write_byte(byte);
        }
        Ok(())
    }
}

/// ANSI escapes used by the status output.
pub mod ansi {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD_YELLOW: &str = "\x1b[1;33m";
    pub const BOLD_BRIGHT_GREEN: &str = "\x1b[1;92m";
    pub const BOLD_BRIGHT_RED: &str = "\x1b[1;91m";
    /// Cursor home plus screen clear, for the banner.
    pub const CLEAR: &str = "\x1b[0;0H\x1b[2J";
}

/// Single-byte user commands.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Command {
    /// ESC: exit the current app and clear the screen.
    Exit,
    /// `m`: render the fixed demo scene.
    DemoScene,
    /// `p`: enter the palette app.
    Palette,
    /// `e`: enter the file-explorer app.
    Explorer,
    /// `+`: app-specific increment.
    Increment,
    /// `-`: app-specific decrement.
    Decrement,
    /// CR, LF or space: app-specific confirm.
    Confirm,
    /// Backspace: app-specific back.
    Back,
    /// Anything else is passed through for apps to interpret.
    Other(u8),
}

impl Command {
    pub fn decode(byte: u8) -> Command {
        match byte {
            0x1B => Command::Exit,
            b'm' => Command::DemoScene,
            b'p' => Command::Palette,
            b'e' => Command::Explorer,
            b'+' => Command::Increment,
            b'-' => Command::Decrement,
            b'\r' | b'\n' | b' ' => Command::Confirm,
            0x08 => Command::Back,
            other => Command::Other(other),
        }
    }
}

/// Displays a duration in seconds with an auto-ranged suffix, down to
/// microseconds.
pub struct FmtSeconds(pub f32);

impl fmt::Display for FmtSeconds {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // A negative duration is not meaningful, so don't range it.
        if self.0 <= 0.0 {
            return write!(f, "{:.2} sec", self.0);
        }

        const SUFFIXES: [&str; 3] = ["sec", "ms", "us"];
        let mut value = self.0;
        let mut index = 0;
        while index < SUFFIXES.len() - 1 && value < 1.0 {
            value *= 1000.0;
            index += 1;
        }
        write!(f, "{:.2} {}", value, SUFFIXES[index])
    }
}

/// Displays a frequency in hertz with an auto-ranged suffix.
pub struct FmtHertz(pub f32);

impl fmt::Display for FmtHertz {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.0 <= 0.0 {
            return write!(f, "{:.2} Hz", self.0);
        }

        const SUFFIXES: [&str; 4] = ["Hz", "KHz", "MHz", "GHz"];
        let mut shown = self.0;
        let mut value = self.0;
        let mut index = 0;
        loop {
            value /= 1000.0;
            if index < SUFFIXES.len() - 1 && value > 1.0 {
                shown = value;
                index += 1;
            } else {
                break;
            }
        }
        write!(f, "{:.2} {}", shown, SUFFIXES[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_decoding() {
        assert_eq!(Command::decode(0x1B), Command::Exit);
        assert_eq!(Command::decode(b'm'), Command::DemoScene);
        assert_eq!(Command::decode(b'p'), Command::Palette);
        assert_eq!(Command::decode(b'e'), Command::Explorer);
        assert_eq!(Command::decode(b'+'), Command::Increment);
        assert_eq!(Command::decode(b'-'), Command::Decrement);
        for b in [b'\r', b'\n', b' '].iter() {
            assert_eq!(Command::decode(*b), Command::Confirm);
        }
        assert_eq!(Command::decode(0x08), Command::Back);
        assert_eq!(Command::decode(b'q'), Command::Other(b'q'));
    }

    #[test]
    fn seconds_ranging() {
        assert_eq!(format!("{}", FmtSeconds(2.5)), "2.50 sec");
        assert_eq!(format!("{}", FmtSeconds(0.016)), "16.00 ms");
        assert_eq!(format!("{}", FmtSeconds(26.4e-6)), "26.40 us");
        assert_eq!(format!("{}", FmtSeconds(0.0)), "0.00 sec");
    }

    #[test]
    fn hertz_ranging() {
        assert_eq!(format!("{}", FmtHertz(60.32)), "60.32 Hz");
        assert_eq!(format!("{}", FmtHertz(37_878.8)), "37.88 KHz");
        assert_eq!(format!("{}", FmtHertz(40e6)), "40.00 MHz");
    }
}

//! Line-oriented command/response vocabulary shared by both peers.
//!
//! Host to device: `P`, `T:<pulse_ms>`, `W:<addr>:<len>:<data>`, `E`.
//! Device to host: `OK:<msg>` or `ERR:<code>`.

use std::fmt;

use crate::hex::from_hex_digit;

pub const MIN_PULSE_MS: f64 = 0.1;
pub const MAX_PULSE_MS: f64 = 1000.0;

/// Longest payload a single `W` command can carry.
pub const MAX_WRITE_LEN: usize = 255;

pub fn pulse_in_range(pulse_ms: f64) -> bool {
    (MIN_PULSE_MS..=MAX_PULSE_MS).contains(&pulse_ms)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Ping,
    Timing { pulse_ms: f64 },
    Write { address: u8, data: Vec<u8> },
    End,
}

impl Command {
    /// Parse one received line (already stripped of its terminator).
    pub fn parse(line: &str) -> Result<Self, ErrorCode> {
        let line = line.trim();

        if line.len() == 1 {
            return match line {
                "P" => Ok(Command::Ping),
                "E" => Ok(Command::End),
                _ => Err(ErrorCode::Command),
            };
        }

        if let Some(value) = line.strip_prefix("T:") {
            let pulse_ms: f64 = value.trim().parse().map_err(|_| ErrorCode::Format)?;
            if !pulse_in_range(pulse_ms) {
                return Err(ErrorCode::Range);
            }
            return Ok(Command::Timing { pulse_ms });
        }

        if let Some(fields) = line.strip_prefix("W:") {
            return parse_write(fields);
        }

        Err(ErrorCode::Command)
    }
}

fn parse_write(fields: &str) -> Result<Command, ErrorCode> {
    let mut parts = fields.splitn(3, ':');
    let (Some(addr), Some(len), Some(data)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(ErrorCode::Format);
    };

    let address = parse_hex_byte(addr).ok_or(ErrorCode::Format)?;
    let len = parse_hex_byte(len).ok_or(ErrorCode::Format)? as usize;
    if len == 0 {
        return Err(ErrorCode::Length);
    }
    if data.len() != 2 * len {
        return Err(ErrorCode::Length);
    }

    let data = data
        .as_bytes()
        .chunks(2)
        .map(|pair| parse_hex_pair(pair[0], pair[1]))
        .collect::<Option<Vec<u8>>>()
        .ok_or(ErrorCode::Format)?;

    Ok(Command::Write { address, data })
}

fn parse_hex_byte(s: &str) -> Option<u8> {
    match s.as_bytes() {
        [hi, lo] => parse_hex_pair(*hi, *lo),
        _ => None,
    }
}

fn parse_hex_pair(hi: u8, lo: u8) -> Option<u8> {
    Some((from_hex_digit(hi)? << 4) | from_hex_digit(lo)?)
}

/// Renders the command without its line terminator.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Ping => f.write_str("P"),
            Command::Timing { pulse_ms } => write!(f, "T:{pulse_ms}"),
            Command::Write { address, data } => {
                write!(f, "W:{address:02X}:{:02X}:", data.len())?;
                for b in data {
                    write!(f, "{b:02X}")?;
                }
                Ok(())
            }
            Command::End => f.write_str("E"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Command,
    Format,
    Range,
    Length,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Command => "COMMAND",
            ErrorCode::Format => "FORMAT",
            ErrorCode::Range => "RANGE",
            ErrorCode::Length => "LENGTH",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "COMMAND" => Some(ErrorCode::Command),
            "FORMAT" => Some(ErrorCode::Format),
            "RANGE" => Some(ErrorCode::Range),
            "LENGTH" => Some(ErrorCode::Length),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Ready,
    Timing { pulse_ms: f64 },
    Write,
    End,
    Error(ErrorCode),
}

impl Response {
    pub fn parse(line: &str) -> Option<Self> {
        let (status, message) = line.trim().split_once(':')?;
        match status {
            "OK" => match message {
                "READY" => Some(Response::Ready),
                "WRITE" => Some(Response::Write),
                "END" => Some(Response::End),
                _ => {
                    let value = message.strip_prefix("TIMING:")?;
                    let pulse_ms = value.parse().ok()?;
                    Some(Response::Timing { pulse_ms })
                }
            },
            "ERR" => ErrorCode::parse(message).map(Response::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ready => f.write_str("OK:READY"),
            Response::Timing { pulse_ms } => write!(f, "OK:TIMING:{pulse_ms}"),
            Response::Write => f.write_str("OK:WRITE"),
            Response::End => f.write_str("OK:END"),
            Response::Error(code) => write!(f, "ERR:{code}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_rendering() {
        assert_eq!(Command::Ping.to_string(), "P");
        assert_eq!(Command::Timing { pulse_ms: 2.5 }.to_string(), "T:2.5");
        assert_eq!(
            Command::Write {
                address: 0x0A,
                data: vec![0xAA, 0x0B, 0xC0],
            }
            .to_string(),
            "W:0A:03:AA0BC0"
        );
        assert_eq!(Command::End.to_string(), "E");
    }

    #[test]
    fn test_parse_single_letter_commands() {
        assert_eq!(Command::parse("P"), Ok(Command::Ping));
        assert_eq!(Command::parse(" E "), Ok(Command::End));
        assert_eq!(Command::parse("X"), Err(ErrorCode::Command));
        assert_eq!(Command::parse("PING"), Err(ErrorCode::Command));
    }

    #[test]
    fn test_parse_timing() {
        assert_eq!(
            Command::parse("T:0.1"),
            Ok(Command::Timing { pulse_ms: 0.1 })
        );
        assert_eq!(
            Command::parse("T:1000"),
            Ok(Command::Timing { pulse_ms: 1000.0 })
        );
        assert_eq!(Command::parse("T:2000"), Err(ErrorCode::Range));
        assert_eq!(Command::parse("T:0.05"), Err(ErrorCode::Range));
        assert_eq!(Command::parse("T:NaN"), Err(ErrorCode::Range));
        assert_eq!(Command::parse("T:fast"), Err(ErrorCode::Format));
        assert_eq!(Command::parse("T:"), Err(ErrorCode::Format));
    }

    #[test]
    fn test_parse_write() {
        assert_eq!(
            Command::parse("W:00:03:AABBcc"),
            Ok(Command::Write {
                address: 0,
                data: vec![0xAA, 0xBB, 0xCC],
            })
        );
        assert_eq!(Command::parse("W:00:03"), Err(ErrorCode::Format));
        assert_eq!(Command::parse("W:0:01:AA"), Err(ErrorCode::Format));
        assert_eq!(Command::parse("W:ZZ:01:AA"), Err(ErrorCode::Format));
        assert_eq!(Command::parse("W:00:00:"), Err(ErrorCode::Length));
        assert_eq!(Command::parse("W:00:02:AA"), Err(ErrorCode::Length));
        assert_eq!(Command::parse("W:00:01:AAB"), Err(ErrorCode::Length));
        assert_eq!(Command::parse("W:00:01:G1"), Err(ErrorCode::Format));
        // A fourth ':' lands in the data field.
        assert_eq!(Command::parse("W:00:01:AA:"), Err(ErrorCode::Length));
        assert_eq!(Command::parse("W:00:01:A:"), Err(ErrorCode::Format));
    }

    #[test]
    fn test_write_round_trips_through_text() {
        let cmd = Command::Write {
            address: 0xFE,
            data: (0..=254).collect(),
        };
        assert_eq!(Command::parse(&cmd.to_string()), Ok(cmd));
    }

    #[test]
    fn test_response_parse() {
        assert_eq!(Response::parse("OK:READY"), Some(Response::Ready));
        assert_eq!(
            Response::parse("OK:TIMING:0.3\r"),
            Some(Response::Timing { pulse_ms: 0.3 })
        );
        assert_eq!(Response::parse("OK:WRITE"), Some(Response::Write));
        assert_eq!(Response::parse("OK:END"), Some(Response::End));
        assert_eq!(
            Response::parse("ERR:LENGTH"),
            Some(Response::Error(ErrorCode::Length))
        );
        assert_eq!(Response::parse("OK:MAYBE"), None);
        assert_eq!(Response::parse("ERR:OOPS"), None);
        assert_eq!(Response::parse("hello"), None);
    }

    #[test]
    fn test_response_rendering() {
        assert_eq!(Response::Timing { pulse_ms: 2.5 }.to_string(), "OK:TIMING:2.5");
        assert_eq!(Response::Error(ErrorCode::Range).to_string(), "ERR:RANGE");
    }
}

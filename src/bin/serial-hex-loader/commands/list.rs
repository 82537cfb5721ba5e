use serial_hex_loader::ports;

use crate::cli;
use crate::exit_codes;
use crate::output::{Event, Reporter};

pub fn run(_args: cli::ListArgs, out: &mut dyn Reporter) -> i32 {
    match ports::discover_ports() {
        Ok(found) => {
            out.emit(Event::ListPorts(found));
            exit_codes::EXIT_OK
        }
        Err(e) => {
            out.emit(Event::Error {
                code: exit_codes::EXIT_UNEXPECTED,
                message: e.to_string(),
            });
            exit_codes::EXIT_UNEXPECTED
        }
    }
}

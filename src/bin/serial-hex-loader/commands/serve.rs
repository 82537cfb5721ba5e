use std::time::Duration;

use serial_hex_loader::api;

use crate::cli;
use crate::exit_codes;
use crate::output::{Event, Reporter};

pub fn run(args: cli::ServeArgs, out: &mut dyn Reporter) -> i32 {
    out.emit(Event::Serving {
        port: args.port.clone(),
        baud_rate: args.baud,
    });

    match api::serve_port(
        &args.port,
        args.baud,
        args.realtime,
        Duration::from_millis(args.poll_ms),
    ) {
        Ok(()) => exit_codes::EXIT_OK,
        Err(e) => {
            let code = exit_codes::for_kind(e.kind());
            out.emit(Event::Error {
                code,
                message: e.to_string(),
            });
            code
        }
    }
}

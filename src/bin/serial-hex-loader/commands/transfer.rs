use std::time::Duration;

use serial_hex_loader::api;
use serial_hex_loader::operation::TransferEvent;
use serial_hex_loader::session::SessionConfig;

use crate::cli;
use crate::exit_codes;
use crate::output::{DryRunSummary, Event, Reporter, TransferRecorder};

pub fn run(args: cli::TransferArgs, out: &mut dyn Reporter) -> i32 {
    let opts = api::TransferOptions {
        port: args.port.clone(),
        baud_rate: args.baud,
        pulse_ms: args.pulse,
        session: SessionConfig {
            response_timeout: Duration::from_millis(args.timeout_ms.max(1)),
            ..SessionConfig::default()
        },
    };

    if args.dry_run {
        return dry_run(&args, &opts, out);
    }

    let operation = if args.simulate { "simulate" } else { "transfer" };
    let mut recorder = TransferRecorder::new(operation);
    let mut on_event = |ev: TransferEvent| {
        recorder.observe(&ev);
        out.emit(Event::Transfer(ev));
    };

    let r = if args.simulate {
        api::simulate_hex_file(&args.hex, &opts, args.realtime, &mut on_event).map(|_| ())
    } else {
        api::transfer_hex_file(&args.hex, &opts, &mut on_event).map(|_| ())
    };

    let (code, message) = match r {
        Ok(()) => (exit_codes::EXIT_OK, None),
        Err(e) => {
            let code = exit_codes::for_kind(e.kind());
            let message = e.to_string();
            out.emit(Event::Error {
                code,
                message: message.clone(),
            });
            if code == exit_codes::EXIT_NO_DEVICE {
                out.emit(Event::HintNoDevice);
            }
            (code, Some(message))
        }
    };

    out.emit(Event::TransferSummary(recorder.finish(code, message)));
    code
}

fn dry_run(args: &cli::TransferArgs, opts: &api::TransferOptions, out: &mut dyn Reporter) -> i32 {
    match api::plan_hex_file(&args.hex, opts, |_| {}) {
        Ok(plan) => {
            out.emit(Event::DryRun(DryRunSummary {
                bytes: plan.bytes(),
                regions: plan.image.contiguous_regions(),
                pulse_ms: plan.pulse_ms,
                chunk_size: plan.chunk_size,
                chunks: plan.chunks.len(),
                port: opts.port.clone(),
            }));
            exit_codes::EXIT_OK
        }
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

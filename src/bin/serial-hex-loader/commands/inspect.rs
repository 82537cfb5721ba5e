use serial_hex_loader::image::MemoryImage;

use crate::cli;
use crate::exit_codes;
use crate::output::{Event, InspectReport, Reporter};

pub fn run(args: cli::InspectArgs, out: &mut dyn Reporter) -> i32 {
    let image = match MemoryImage::load(&args.hex) {
        Ok(image) => image,
        Err(e) => {
            out.emit(Event::Error {
                code: exit_codes::EXIT_INVALID_HEX,
                message: format!("invalid HEX: {e}"),
            });
            return exit_codes::EXIT_INVALID_HEX;
        }
    };

    let mut written = None;
    if let Some(path) = &args.output {
        let bytes = image.flatten(args.fill, args.start, args.end);
        if let Err(e) = std::fs::write(path, &bytes) {
            out.emit(Event::Error {
                code: exit_codes::EXIT_UNEXPECTED,
                message: format!("unable to write {}: {e}", path.display()),
            });
            return exit_codes::EXIT_UNEXPECTED;
        }
        written = Some((path.clone(), bytes.len()));
    }

    out.emit(Event::Inspect(InspectReport {
        path: args.hex,
        regions: image.contiguous_regions(),
        entry_point: image.entry_point(),
        statistics: image.statistics(),
        written,
    }));
    exit_codes::EXIT_OK
}

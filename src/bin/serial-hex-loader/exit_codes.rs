use serial_hex_loader::api::TransferErrorKind;

pub const EXIT_OK: i32 = 0;
pub const EXIT_NO_DEVICE: i32 = 10;
pub const EXIT_INVALID_HEX: i32 = 11;
pub const EXIT_TRANSFER_FAILED: i32 = 12;
pub const EXIT_UNEXPECTED: i32 = 20;

pub fn for_kind(kind: TransferErrorKind) -> i32 {
    match kind {
        TransferErrorKind::NoDevice => EXIT_NO_DEVICE,
        TransferErrorKind::InvalidHex => EXIT_INVALID_HEX,
        TransferErrorKind::TransferFailed => EXIT_TRANSFER_FAILED,
        TransferErrorKind::Unexpected => EXIT_UNEXPECTED,
    }
}

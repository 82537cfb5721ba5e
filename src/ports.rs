use serde::Serialize;
use thiserror::Error;

/// Adafruit VID, used by CircuitPython boards.
pub const CIRCUITPYTHON_VID: u16 = 0x239A;
/// Raspberry Pi VID, used by MicroPython on the RP2040.
pub const MICROPYTHON_VID: u16 = 0x2E8A;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PortRuntime {
    CircuitPython,
    MicroPython,
}

impl PortRuntime {
    pub fn from_vid(vid: u16) -> Option<Self> {
        match vid {
            CIRCUITPYTHON_VID => Some(PortRuntime::CircuitPython),
            MICROPYTHON_VID => Some(PortRuntime::MicroPython),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoaderPort {
    pub port_name: String,
    pub runtime: PortRuntime,
    pub vid: u16,
    pub pid: u16,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

#[derive(Error, Debug)]
pub enum DiscoverError {
    #[error("no loader device found on any USB serial port")]
    NoPorts,

    #[error(
        "only MicroPython ports found ({}); flash CircuitPython with the loader firmware or pass --port",
        .0.join(", ")
    )]
    WrongFirmware(Vec<String>),

    #[error("serial discovery failed: {0}")]
    Serial(#[from] serialport::Error),
}

/// USB serial ports that may host the loader firmware, in [`sort_ports`] order.
pub fn discover_ports() -> Result<Vec<LoaderPort>, DiscoverError> {
    let mut out: Vec<LoaderPort> = Vec::new();

    for p in serialport::available_ports()? {
        let serialport::SerialPortInfo {
            port_name,
            port_type,
        } = p;

        let serialport::SerialPortType::UsbPort(usb) = port_type else {
            continue;
        };

        let Some(runtime) = PortRuntime::from_vid(usb.vid) else {
            continue;
        };

        out.push(LoaderPort {
            port_name,
            runtime,
            vid: usb.vid,
            pid: usb.pid,
            serial_number: usb.serial_number,
            manufacturer: usb.manufacturer,
            product: usb.product,
        });
    }

    sort_ports(&mut out);
    Ok(out)
}

/// Group ports by runtime and USB serial number, then order each device's
/// interfaces by port number, so `COM9` comes before `COM10`.
pub fn sort_ports(ports: &mut [LoaderPort]) {
    ports.sort_by(|a, b| {
        a.runtime
            .cmp(&b.runtime)
            .then_with(|| a.serial_number.cmp(&b.serial_number))
            .then_with(|| port_name_key(&a.port_name).cmp(&port_name_key(&b.port_name)))
    });
}

/// `"COM10"` -> `("COM", Some(10))`, `"/dev/ttyACM0"` -> `("/dev/ttyACM", Some(0))`.
fn port_name_key(name: &str) -> (&str, Option<u64>) {
    let stem = name.trim_end_matches(|c: char| c.is_ascii_digit());
    (stem, name[stem.len()..].parse().ok())
}

/// CircuitPython exposes a console port first and the data port second;
/// with two or more, the second one carries the protocol.
pub fn select_data_port(ports: &[LoaderPort]) -> Result<String, DiscoverError> {
    let circuitpython: Vec<&LoaderPort> = ports
        .iter()
        .filter(|p| p.runtime == PortRuntime::CircuitPython)
        .collect();

    match circuitpython.as_slice() {
        [] => {
            let micropython: Vec<String> = ports
                .iter()
                .filter(|p| p.runtime == PortRuntime::MicroPython)
                .map(|p| p.port_name.clone())
                .collect();
            if micropython.is_empty() {
                Err(DiscoverError::NoPorts)
            } else {
                Err(DiscoverError::WrongFirmware(micropython))
            }
        }
        [only] => Ok(only.port_name.clone()),
        [_, data, ..] => Ok(data.port_name.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, vid: u16) -> LoaderPort {
        LoaderPort {
            port_name: name.to_string(),
            runtime: PortRuntime::from_vid(vid).unwrap(),
            vid,
            pid: 0x0001,
            serial_number: None,
            manufacturer: None,
            product: None,
        }
    }

    #[test]
    fn test_single_circuitpython_port() {
        let ports = [port("/dev/ttyACM0", CIRCUITPYTHON_VID)];
        assert_eq!(select_data_port(&ports).unwrap(), "/dev/ttyACM0");
    }

    #[test]
    fn test_second_circuitpython_port_is_data_channel() {
        let ports = [
            port("COM3", CIRCUITPYTHON_VID),
            port("COM4", CIRCUITPYTHON_VID),
            port("COM9", MICROPYTHON_VID),
        ];
        assert_eq!(select_data_port(&ports).unwrap(), "COM4");
    }

    #[test]
    fn test_micropython_only_is_wrong_firmware() {
        let ports = [port("COM7", MICROPYTHON_VID)];
        match select_data_port(&ports).unwrap_err() {
            DiscoverError::WrongFirmware(names) => assert_eq!(names, vec!["COM7"]),
            e => panic!("expected WrongFirmware, got {e:?}"),
        }
    }

    #[test]
    fn test_no_ports() {
        assert!(matches!(select_data_port(&[]), Err(DiscoverError::NoPorts)));
    }

    fn with_serial(name: &str, serial: &str) -> LoaderPort {
        LoaderPort {
            serial_number: Some(serial.to_string()),
            ..port(name, CIRCUITPYTHON_VID)
        }
    }

    fn names(ports: &[LoaderPort]) -> Vec<&str> {
        ports.iter().map(|p| p.port_name.as_str()).collect()
    }

    #[test]
    fn test_sort_uses_port_number_not_text() {
        let mut ports = vec![
            port("COM10", CIRCUITPYTHON_VID),
            port("COM9", CIRCUITPYTHON_VID),
        ];
        sort_ports(&mut ports);
        assert_eq!(names(&ports), vec!["COM9", "COM10"]);
        // Console on COM9, data on COM10.
        assert_eq!(select_data_port(&ports).unwrap(), "COM10");
    }

    #[test]
    fn test_sort_keeps_one_device_together() {
        let mut ports = vec![
            with_serial("/dev/ttyACM2", "B"),
            with_serial("/dev/ttyACM1", "A"),
            with_serial("/dev/ttyACM3", "B"),
            with_serial("/dev/ttyACM0", "A"),
            port("/dev/ttyACM7", MICROPYTHON_VID),
        ];
        sort_ports(&mut ports);
        assert_eq!(
            names(&ports),
            vec![
                "/dev/ttyACM0",
                "/dev/ttyACM1",
                "/dev/ttyACM2",
                "/dev/ttyACM3",
                "/dev/ttyACM7"
            ]
        );
        assert_eq!(select_data_port(&ports).unwrap(), "/dev/ttyACM1");
    }

    #[test]
    fn test_port_name_key() {
        assert_eq!(port_name_key("COM10"), ("COM", Some(10)));
        assert_eq!(port_name_key("/dev/ttyACM0"), ("/dev/ttyACM", Some(0)));
        assert_eq!(port_name_key("/dev/cu.usbmodem"), ("/dev/cu.usbmodem", None));
    }

    #[test]
    fn test_runtime_from_vid() {
        assert_eq!(PortRuntime::from_vid(0x16C0), None);
        assert_eq!(
            PortRuntime::from_vid(0x2E8A),
            Some(PortRuntime::MicroPython)
        );
    }
}

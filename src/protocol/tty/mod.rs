use serialport::{SerialPortInfo, SerialPortType};
use std::collections::HashSet;

/// Available serial ports, USB adapters first, duplicates removed.
pub fn available_ports_sorted() -> Vec<SerialPortInfo> {
    match serialport::available_ports() {
        Ok(ports) => sort_and_dedup_ports(ports),
        Err(err) => {
            log::warn!("Failed to enumerate serial ports: {err}");
            Vec::new()
        }
    }
}

/// One-line description for listings: name, then USB ids and product when known.
pub fn describe_port(port: &SerialPortInfo) -> String {
    match &port.port_type {
        SerialPortType::UsbPort(usb) => {
            let mut line = format!("{} (usb {:04x}:{:04x}", port.port_name, usb.vid, usb.pid);
            if let Some(product) = &usb.product {
                line.push_str(&format!(" {product}"));
            }
            line.push(')');
            line
        }
        SerialPortType::BluetoothPort => format!("{} (bluetooth)", port.port_name),
        SerialPortType::PciPort => format!("{} (pci)", port.port_name),
        SerialPortType::Unknown => port.port_name.clone(),
    }
}

pub(crate) fn sort_and_dedup_ports(raw_ports: Vec<SerialPortInfo>) -> Vec<SerialPortInfo> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut ports: Vec<SerialPortInfo> = raw_ports
        .into_iter()
        .filter(|p| seen.insert(base_name(&p.port_name)))
        .collect();

    // EMS adapters are USB serial converters more often than not
    fn priority(port: &SerialPortInfo) -> i32 {
        let n = port.port_name.to_lowercase();
        if matches!(port.port_type, SerialPortType::UsbPort(_)) || n.contains("usb") {
            0
        } else if n.contains("acm") {
            1
        } else if n.contains("ttys") || n.contains("serial") || n.starts_with("com") {
            2
        } else {
            10
        }
    }

    ports.sort_by(|a, b| {
        priority(a)
            .cmp(&priority(b))
            .then_with(|| a.port_name.cmp(&b.port_name))
    });
    ports
}

fn base_name(port_name: &str) -> String {
    port_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(port_name)
        .to_lowercase()
}

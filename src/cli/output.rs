use crate::cli::args::OutputFormat;
use crate::core::bridge::StatisticsSnapshot;
use crate::domain::config::BridgeConfig;
use serde::Serialize;
use std::io;
use tabled::{Table, Tabled};

/// One serial port found on the host
#[derive(Debug, Clone, PartialEq, Serialize, Tabled)]
pub struct PortEntry {
    #[tabled(rename = "Port")]
    pub name: String,
    #[tabled(rename = "Type")]
    pub kind: String,
}

impl From<serialport::SerialPortInfo> for PortEntry {
    fn from(info: serialport::SerialPortInfo) -> Self {
        let kind = match info.port_type {
            serialport::SerialPortType::UsbPort(usb) => match usb.product {
                Some(product) => format!("USB {:04x}:{:04x} {}", usb.vid, usb.pid, product),
                None => format!("USB {:04x}:{:04x}", usb.vid, usb.pid),
            },
            serialport::SerialPortType::PciPort => "PCI".to_string(),
            serialport::SerialPortType::BluetoothPort => "Bluetooth".to_string(),
            serialport::SerialPortType::Unknown => "Unknown".to_string(),
        };

        Self {
            name: info.port_name,
            kind,
        }
    }
}

/// Output writer trait for different formats
pub trait OutputWriter {
    fn write_ports(&self, ports: &[PortEntry]) -> Result<(), OutputError>;
    fn write_config(&self, config: &BridgeConfig) -> Result<(), OutputError>;
    fn write_statistics(&self, stats: &StatisticsSnapshot) -> Result<(), OutputError>;
    fn write_message(&self, message: &str) -> Result<(), OutputError>;
    fn write_error(&self, error: &str) -> Result<(), OutputError>;
}

/// Output formatting errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("TOML serialization error: {0}")]
    TomlError(#[from] toml::ser::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl From<OutputError> for crate::domain::error::BridgeError {
    fn from(err: OutputError) -> Self {
        Self::Output(err.to_string())
    }
}

#[derive(Tabled)]
struct StatisticsRow {
    #[tabled(rename = "Device -> Client")]
    serial_to_network: u64,
    #[tabled(rename = "Client -> Device")]
    network_to_serial: u64,
    #[tabled(rename = "Dropped")]
    dropped_frames: u64,
    #[tabled(rename = "Undecodable")]
    undecodable_frames: u64,
    #[tabled(rename = "Serial Reconnects")]
    serial_reconnects: u64,
    #[tabled(rename = "Clients")]
    clients_accepted: u64,
}

impl From<&StatisticsSnapshot> for StatisticsRow {
    fn from(stats: &StatisticsSnapshot) -> Self {
        Self {
            serial_to_network: stats.serial_to_network,
            network_to_serial: stats.network_to_serial,
            dropped_frames: stats.dropped_frames,
            undecodable_frames: stats.undecodable_frames,
            serial_reconnects: stats.serial_reconnects,
            clients_accepted: stats.clients_accepted,
        }
    }
}

#[derive(Tabled)]
struct ConfigRow {
    #[tabled(rename = "Key")]
    key: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

fn config_rows(config: &BridgeConfig) -> Vec<ConfigRow> {
    vec![
        ConfigRow { key: "global.log_level", value: config.global.log_level.clone() },
        ConfigRow { key: "global.reconnect_delay_ms", value: config.global.reconnect_delay_ms.to_string() },
        ConfigRow { key: "serial.port", value: config.serial.port.clone() },
        ConfigRow { key: "serial.baud_rate", value: config.serial.baud_rate.to_string() },
        ConfigRow { key: "serial.data_bits", value: config.serial.data_bits.to_string() },
        ConfigRow { key: "serial.stop_bits", value: config.serial.stop_bits.to_string() },
        ConfigRow { key: "serial.parity", value: format!("{:?}", config.serial.parity).to_lowercase() },
        ConfigRow { key: "serial.flow_control", value: format!("{:?}", config.serial.flow_control).to_lowercase() },
        ConfigRow { key: "serial.read_timeout_ms", value: config.serial.read_timeout_ms.to_string() },
        ConfigRow { key: "serial.max_frame_len", value: config.serial.max_frame_len.to_string() },
        ConfigRow { key: "network.host", value: config.network.host.clone() },
        ConfigRow { key: "network.port", value: config.network.port.to_string() },
        ConfigRow { key: "network.accept_timeout_ms", value: config.network.accept_timeout_ms.to_string() },
        ConfigRow { key: "network.max_frame_len", value: config.network.max_frame_len.to_string() },
        ConfigRow { key: "network.write_timeout_ms", value: config.network.write_timeout_ms.to_string() },
        ConfigRow { key: "network.bind_retry", value: config.network.bind_retry.to_string() },
    ]
}

/// Console output writer
pub struct ConsoleWriter {
    format: OutputFormat,
}

impl ConsoleWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }
}

impl OutputWriter for ConsoleWriter {
    fn write_ports(&self, ports: &[PortEntry]) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                if ports.is_empty() {
                    println!("No serial ports found");
                }
                for port in ports {
                    println!("{}  ({})", port.name, port.kind);
                }
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(ports)?);
            }
            OutputFormat::Table => {
                if !ports.is_empty() {
                    println!("{}", Table::new(ports));
                }
            }
        }
        Ok(())
    }

    fn write_config(&self, config: &BridgeConfig) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                print!("{}", toml::to_string_pretty(config)?);
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(config)?);
            }
            OutputFormat::Table => {
                println!("{}", Table::new(config_rows(config)));
            }
        }
        Ok(())
    }

    fn write_statistics(&self, stats: &StatisticsSnapshot) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                println!("Frames device -> client: {}", stats.serial_to_network);
                println!("Frames client -> device: {}", stats.network_to_serial);
                println!("Frames dropped: {}", stats.dropped_frames);
                println!("Frames undecodable: {}", stats.undecodable_frames);
                println!("Serial reconnects: {}", stats.serial_reconnects);
                println!("Clients accepted: {}", stats.clients_accepted);
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(stats)?);
            }
            OutputFormat::Table => {
                println!("{}", Table::new(vec![StatisticsRow::from(stats)]));
            }
        }
        Ok(())
    }

    fn write_message(&self, message: &str) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({ "message": message });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            _ => println!("{}", message),
        }
        Ok(())
    }

    fn write_error(&self, error: &str) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({ "error": error });
                eprintln!("{}", serde_json::to_string_pretty(&output)?);
            }
            _ => eprintln!("Error: {}", error),
        }
        Ok(())
    }
}

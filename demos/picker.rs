use std::io::{self, Write};
use std::sync::Arc;

use clap::Parser;
use tokio::runtime::Handle;
use tracing_subscriber::EnvFilter;

use zebra_tester::{
    first_adapter, AccessoryRecord, BleBackend, Connection, ConnectionFactory, ControlLanguage,
    FixedLanguageFactory, PickerConfig, PickerParts, PrintResult, PrinterPicker, RadioHub,
    RadioState, StaticAccessories,
};

/// Interactive printer picker
/// - Lists connected accessories
/// - Lets user select one (or refresh)
/// - Sends the label setup and a test label to ZQ630 printers that speak ZPL
#[derive(Parser, Debug)]
#[command(name = "picker", about)]
struct Args {
    /// Only print to accessories whose model number starts with this
    #[arg(long, default_value = zebra_tester::config::DEFAULT_MODEL_PREFIX)]
    model_prefix: String,

    /// Control language the printer is assumed to speak (zpl, cpcl, line_print)
    #[arg(long, default_value = "zpl", value_parser = parse_language)]
    language: ControlLanguage,

    /// Bytes per BLE write
    #[arg(long, default_value_t = zebra_tester::config::DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Use a fake printer that echoes commands instead of Bluetooth
    #[arg(long)]
    fake: bool,
}

fn parse_language(s: &str) -> Result<ControlLanguage, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("zebra_tester=debug,picker=info")),
        )
        .init();

    let args = Args::parse();
    let config = PickerConfig::default()
        .with_model_prefix(args.model_prefix)
        .with_language(args.language)
        .with_chunk_size(args.chunk_size);

    // The backend must outlive the picker; dropping it stops the event pump.
    let (parts, _backend) = if args.fake {
        (fake_parts(&config), None)
    } else {
        let backend = BleBackend::start(first_adapter().await?).await?;
        (backend.picker_parts(&config, Handle::current()), Some(backend))
    };
    let picker = PrinterPicker::new(parts, config, Handle::current());

    let mut input = String::new();
    loop {
        let rows = picker.rows();
        if rows.is_empty() {
            println!("No connected accessories (radio: {}).", picker.radio_state());
        } else {
            println!("Connected accessories:");
            for (i, row) in rows.iter().enumerate() {
                println!("  {}) {}", i + 1, row);
            }
        }

        print!("Select printer number, r to refresh, q to quit: ");
        io::stdout().flush()?;
        input.clear();
        if io::stdin().read_line(&mut input)? == 0 {
            return Ok(());
        }
        match input.trim() {
            "q" => return Ok(()),
            "r" => {
                picker.on_refresh_requested();
            }
            choice => match choice.parse::<usize>() {
                Ok(n) if n >= 1 => match picker.on_accessory_selected(n - 1) {
                    Some(task) => match task.await? {
                        Ok(report) => println!(
                            "Sent {}/{} payloads.",
                            report.delivered, report.payloads
                        ),
                        Err(e) => println!("Nothing printed: {}", e),
                    },
                    None => println!("Invalid selection."),
                },
                _ => println!("Invalid selection."),
            },
        }
    }
}

fn fake_parts(config: &PickerConfig) -> PickerParts {
    PickerParts {
        accessories: Arc::new(StaticAccessories::new(vec![
            AccessoryRecord::new("Zebra", "ZQ630-AUBOCA", "S123"),
            AccessoryRecord::new("Zebra", "LP2844", "S456"),
        ])),
        radio: Arc::new(RadioHub::new(RadioState::PoweredOn)),
        connections: Arc::new(EchoConnections),
        printers: Arc::new(FixedLanguageFactory::new(config.language)),
    }
}

/// Connections that print what would go over the wire.
struct EchoConnections;

impl ConnectionFactory for EchoConnections {
    fn connect(&self, serial_number: &str) -> PrintResult<Box<dyn Connection>> {
        Ok(Box::new(EchoConnection {
            serial: serial_number.to_string(),
            open: false,
        }))
    }
}

struct EchoConnection {
    serial: String,
    open: bool,
}

impl Connection for EchoConnection {
    fn open(&mut self) -> PrintResult<()> {
        self.open = true;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> PrintResult<usize> {
        println!("[{}] {}", self.serial, String::from_utf8_lossy(data));
        Ok(data.len())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        self.open = false;
    }
}

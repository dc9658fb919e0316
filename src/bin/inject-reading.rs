//! UPS Reading Injection Utility
//!
//! Appends readings to the relay's queue database, standing in for the
//! acquisition process during bench testing.
//!
//! ## Usage
//!
//! ```bash
//! # One reading stamped now, statuses derived from the voltages
//! inject-reading --db /tmp/sensor_data.db --ac-voltage 231 --ups-voltage 120
//!
//! # Mains failure with an explicit status
//! inject-reading --db /tmp/sensor_data.db --ac-voltage 0 --ups-voltage 118 --ac-status 1
//!
//! # Backlog of 50 readings one minute apart, starting at a fixed time
//! inject-reading --db /tmp/sensor_data.db --ac-voltage 230 --ups-voltage 119 \
//!   --timestamp 1700000000 --count 50 --step-secs 60
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use ups_relay::protocol::{NewReading, PowerStatus, DEFAULT_STATUS_THRESHOLD};
use ups_relay::queue::{ReadingQueue, SqliteQueue};

#[derive(Parser)]
#[command(
    name = "inject-reading",
    about = "Append test readings to the ups-relay queue database"
)]
struct Args {
    /// Queue database path
    #[arg(long, required = true)]
    db: PathBuf,

    /// Acquisition time in Unix seconds (defaults to now)
    #[arg(long)]
    timestamp: Option<i64>,

    /// Mains voltage
    #[arg(long, required = true)]
    ac_voltage: i64,

    /// UPS output voltage
    #[arg(long, required = true)]
    ups_voltage: i64,

    /// Mains status code (0 = OK, 1 = LOW); derived from the voltage if omitted
    #[arg(long)]
    ac_status: Option<i64>,

    /// UPS status code (0 = OK, 1 = LOW); derived from the voltage if omitted
    #[arg(long)]
    ups_status: Option<i64>,

    /// Voltage at or above which a derived status is OK
    #[arg(long, default_value_t = DEFAULT_STATUS_THRESHOLD)]
    threshold: i64,

    /// Number of readings to append
    #[arg(long, default_value_t = 1)]
    count: u32,

    /// Seconds between consecutive readings when count > 1
    #[arg(long, default_value_t = 60)]
    step_secs: i64,

    /// SQLite busy timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    busy_timeout_ms: u64,
}

fn status(code: Option<i64>, voltage: i64, threshold: i64) -> Result<PowerStatus, String> {
    match code {
        Some(code) => PowerStatus::from_code(code).map_err(|e| e.to_string()),
        None => Ok(PowerStatus::from_voltage(voltage, threshold)),
    }
}

fn main() {
    let args = Args::parse();

    if args.count == 0 {
        eprintln!("✗ --count must be at least 1");
        std::process::exit(1);
    }

    let (ac_status, ups_status) = match (
        status(args.ac_status, args.ac_voltage, args.threshold),
        status(args.ups_status, args.ups_voltage, args.threshold),
    ) {
        (Ok(ac), Ok(ups)) => (ac, ups),
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("✗ {e}");
            std::process::exit(1);
        }
    };

    let queue = match SqliteQueue::open(&args.db, Duration::from_millis(args.busy_timeout_ms)) {
        Ok(queue) => queue,
        Err(e) => {
            eprintln!("✗ Failed to open queue at {}: {e}", args.db.display());
            std::process::exit(1);
        }
    };

    let start = args
        .timestamp
        .unwrap_or_else(|| chrono::Utc::now().timestamp());

    println!("📥 Injecting {} reading(s) into {}", args.count, args.db.display());

    for n in 0..args.count {
        let reading = NewReading {
            timestamp: start + i64::from(n) * args.step_secs,
            ac_voltage: args.ac_voltage,
            ac_status,
            ups_voltage: args.ups_voltage,
            ups_status,
        };

        match queue.enqueue(&reading) {
            Ok(stored) => println!(
                "   id={} timestamp={} ac={}V ({}) ups={}V ({})",
                stored.id,
                stored.timestamp,
                stored.ac_voltage,
                stored.ac_status.code(),
                stored.ups_voltage,
                stored.ups_status.code(),
            ),
            Err(e) => {
                eprintln!("✗ Failed to enqueue reading: {e}");
                std::process::exit(1);
            }
        }
    }

    match queue.pending_count() {
        Ok(pending) => println!("✓ Injected successfully, {pending} reading(s) pending"),
        Err(e) => eprintln!("✗ Injected, but failed to count pending readings: {e}"),
    }
}

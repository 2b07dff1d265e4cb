//! # Utility Functions and Helper Module
//!
//! Formatters for human-readable output and validation of user-supplied
//! parameters, shared by the server, the client and the load harness.
//!
//! ## Key Functionality Categories
//!
//! - **Formatting**: durations, byte counts, rates and report units
//! - **Validation**: ports and concurrency levels, checked before any socket
//!   is opened
//! - **Naming**: unique identifiers for temporary resources
//!
//! ## Usage Examples
//!
//! ```rust
//! use file_transfer_bench::utils::*;
//! use std::time::Duration;
//!
//! let duration_str = format_duration(Duration::from_micros(1500));
//! assert_eq!(duration_str, "1.50ms");
//!
//! let rate_str = format_rate(1048576.0);
//! assert_eq!(rate_str, "1.00 MB/s");
//!
//! # fn main() -> anyhow::Result<()> {
//! validate_concurrency(50)?;
//! # Ok(())
//! # }
//! ```

use anyhow::Result;
use std::time::Duration;
use uuid::Uuid;

/// Bytes in one report megabyte (binary, 2^20)
pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Generate a unique identifier for temporary resources
///
/// Creates a UUID v4 string. Used to name the process pool's control socket
/// so that several servers can run side by side, e.g. in parallel tests.
///
/// ## Returns
/// String representation of a UUID v4 (e.g., "550e8400-e29b-41d4-a716-446655440000")
pub fn generate_test_id() -> String {
    Uuid::new_v4().to_string()
}

/// Format duration in a human-readable way
///
/// ## Parameters
/// - `duration`: Duration to format
///
/// ## Returns
/// Human-readable string using the most significant unit
///
/// ## Examples
///
/// ```rust
/// # use file_transfer_bench::utils::format_duration;
/// # use std::time::Duration;
/// assert_eq!(format_duration(Duration::from_nanos(750)), "750ns");
/// assert_eq!(format_duration(Duration::from_micros(2500)), "2.50ms");
/// assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_ns = duration.as_nanos();

    if total_ns < 1_000 {
        format!("{}ns", total_ns)
    } else if total_ns < 1_000_000 {
        format!("{:.2}μs", total_ns as f64 / 1_000.0)
    } else if total_ns < 1_000_000_000 {
        format!("{:.2}ms", total_ns as f64 / 1_000_000.0)
    } else if total_ns < 60_000_000_000 {
        format!("{:.2}s", total_ns as f64 / 1_000_000_000.0)
    } else {
        let seconds = duration.as_secs();
        let minutes = seconds / 60;
        let remaining_seconds = seconds % 60;

        if minutes < 60 {
            format!("{}m {}s", minutes, remaining_seconds)
        } else {
            let hours = minutes / 60;
            let remaining_minutes = minutes % 60;
            format!("{}h {}m {}s", hours, remaining_minutes, remaining_seconds)
        }
    }
}

/// Format bytes in a human-readable way
///
/// Uses binary (1024-based) scaling, matching the MB used in reports.
///
/// ## Examples
///
/// ```rust
/// # use file_transfer_bench::utils::format_bytes;
/// assert_eq!(format_bytes(512), "512 B");
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// assert_eq!(format_bytes(2621440), "2.50 MB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    format_bytes_f64(bytes as f64)
}

/// Format bytes (as f64) in a human-readable way
pub fn format_bytes_f64(bytes: f64) -> String {
    if bytes < 1024.0 {
        format!("{:.0} B", bytes)
    } else if bytes < 1024.0 * 1024.0 {
        format!("{:.2} KB", bytes / 1024.0)
    } else if bytes < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.2} MB", bytes / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a rate (bytes per second) in a human-readable way
pub fn format_rate(bytes_per_second: f64) -> String {
    format!("{}/s", format_bytes_f64(bytes_per_second))
}

/// Convert bytes to report megabytes (fractional)
pub fn to_megabytes(bytes: f64) -> f64 {
    bytes / BYTES_PER_MB as f64
}

/// Round to two decimal places, as report columns are written
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Volume label for a report row, whole megabytes rounded down
///
/// ```rust
/// # use file_transfer_bench::utils::format_volume;
/// assert_eq!(format_volume(10 * 1024 * 1024), "10 MB");
/// assert_eq!(format_volume(1024 * 1024 - 1), "0 MB");
/// ```
pub fn format_volume(bytes: u64) -> String {
    format!("{} MB", bytes / BYTES_PER_MB)
}

/// Validate that a port number is usable
///
/// Ports below 1024 are reserved for system services and typically require
/// root privileges to bind, so they are rejected up front.
///
/// ## Returns
/// - `Ok(())`: Port is valid
/// - `Err(anyhow::Error)`: Port is in the privileged range
pub fn validate_port(port: u16) -> Result<()> {
    if port < 1024 {
        anyhow::bail!("Port number {} is too low (below 1024)", port);
    }
    Ok(())
}

/// Validate that concurrency level is reasonable
///
/// Applies to client worker counts and server pool sizes alike.
///
/// ## Validation Rules
///
/// - **Minimum**: 1 worker (prevent zero concurrency)
/// - **Maximum**: 1024 workers (prevent descriptor exhaustion)
pub fn validate_concurrency(concurrency: usize) -> Result<()> {
    if concurrency == 0 {
        anyhow::bail!("Concurrency cannot be zero");
    }
    if concurrency > 1024 {
        anyhow::bail!("Concurrency {} is too high (maximum 1024)", concurrency);
    }
    Ok(())
}

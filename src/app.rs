//! Core application runner for `mi-thermometer-exporter`.
//!
//! This module is decoupled from the Bluetooth backend, logging setup and
//! process exit codes so the whole pipeline can be tested with an injected
//! advertisement source.

use crate::activity::ActivityTracker;
use crate::filter::DeviceFilter;
use crate::output::SinkError;
use crate::output::prometheus::PrometheusSink;
use crate::reporter::Reporter;
use crate::scan_loop::ScanLoop;
use crate::scanner::{AdvertisementSource, ScanError};
use crate::server;
use clap::Parser;
use prometheus::Registry;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Configuration for the exporter.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Log level. RUST_LOG takes precedence when set.
    #[arg(
        long,
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: String,

    /// Allowed device MAC address, can be repeated. All devices are allowed
    /// when none is given.
    #[arg(long = "allow-device", value_name = "ADDRESS")]
    pub allowed_devices: Vec<String>,

    /// Interval between two cleanups of inactive devices.
    /// Accepts durations such as 30s, 1m, 1m30s, 500ms.
    #[arg(long, default_value = "1m", value_parser = parse_period)]
    pub clean_period: Duration,

    /// Maximum duration before a device is considered as inactive.
    #[arg(long, default_value = "5m", value_parser = parse_duration)]
    pub max_unseen: Duration,

    /// HTTP listen address for the metrics endpoint.
    #[arg(long, default_value = "0.0.0.0:9977")]
    pub listen_address: SocketAddr,

    /// Bluetooth adapter to scan with (e.g. hci0). Uses the default adapter
    /// when omitted.
    #[arg(long)]
    pub adapter: Option<String>,
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

fn unit_millis(unit: &str) -> Option<u64> {
    match unit {
        "ms" => Some(1),
        "s" => Some(1_000),
        "m" => Some(60_000),
        "h" => Some(3_600_000),
        _ => None,
    }
}

/// Parse a duration from a human-readable string.
///
/// Accepts one or more `<number><unit>` segments with units `ms`, `s`, `m`
/// and `h`, e.g. `500ms`, `1m30s` or `1.5h`. A bare integer is a number of
/// seconds.
///
/// # Examples
/// ```
/// use mi_thermometer_exporter::app::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    if let Ok(secs) = src.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let is_number = |c: char| c.is_ascii_digit() || c == '.';
    let mut total = Duration::ZERO;
    let mut rest = src;

    while !rest.is_empty() {
        let number_len = rest.find(|c: char| !is_number(c)).unwrap_or(rest.len());
        if number_len == 0 {
            return Err(format!("invalid duration: {src}"));
        }
        let (number, tail) = rest.split_at(number_len);

        let unit_len = tail.find(is_number).unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let millis = unit_millis(unit).ok_or_else(|| {
            if unit.is_empty() {
                format!("missing unit in duration: {src}")
            } else {
                format!("unknown unit '{unit}' in duration: {src}")
            }
        })?;

        let segment = if number.contains('.') {
            let value: f64 = number
                .parse()
                .map_err(|_| format!("invalid number: {number}"))?;
            Duration::try_from_secs_f64(value * millis as f64 / 1000.0)
                .map_err(|e| format!("invalid duration: {src}: {e}"))?
        } else {
            let value: u64 = number
                .parse()
                .map_err(|_| format!("invalid number: {number}"))?;
            value
                .checked_mul(millis)
                .map(Duration::from_millis)
                .ok_or_else(|| format!("duration too large: {src}"))?
        };

        total = total
            .checked_add(segment)
            .ok_or_else(|| format!("duration too large: {src}"))?;
        rest = tail;
    }

    Ok(total)
}

/// Like [`parse_duration`], rejecting zero.
pub fn parse_period(src: &str) -> Result<Duration, String> {
    match parse_duration(src)? {
        Duration::ZERO => Err("period must be greater than zero".to_string()),
        period => Ok(period),
    }
}

/// Run the exporter until `cancel` fires or one of its activities fails.
///
/// Three activities run concurrently: the scan loop fed by `source`, the
/// periodic sweep of inactive devices, and the `/metrics` HTTP server backed
/// by `registry`. The first failure ends the run. A scan loop that stops also
/// stops the others.
pub async fn run(
    options: Options,
    source: Arc<dyn AdvertisementSource>,
    registry: Registry,
    cancel: CancellationToken,
) -> Result<(), RunError> {
    let sink = PrometheusSink::new(&registry)?;
    let tracker = Arc::new(ActivityTracker::new(options.max_unseen));
    let reporter = Arc::new(Reporter::new(
        Arc::new(sink),
        tracker,
        options.clean_period,
    ));

    let filter = DeviceFilter::from_addresses(&options.allowed_devices);
    if matches!(filter, DeviceFilter::AllowList(_)) {
        info!(mac_addresses = ?options.allowed_devices, "Allowing only devices");
    }

    let scan_loop = ScanLoop::new(source, filter, Arc::clone(&reporter));
    let listener = TcpListener::bind(options.listen_address).await?;

    let scan = async {
        let result = scan_loop.run(cancel.clone()).await;
        cancel.cancel();
        result.map_err(RunError::from)
    };
    let sweep = async {
        reporter.sweep(cancel.clone()).await;
        Ok::<(), RunError>(())
    };
    let serve = async {
        server::serve(listener, registry, cancel.clone())
            .await
            .map_err(RunError::from)
    };

    tokio::try_join!(scan, sweep, serve)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ScriptedSource, TEST_ADDRESS, advertisement, series, series_count};
    use tokio::time::sleep;

    fn options() -> Options {
        Options {
            log_level: "info".to_string(),
            allowed_devices: vec![],
            clean_period: Duration::from_secs(60),
            max_unseen: Duration::from_secs(300),
            listen_address: "127.0.0.1:0".parse().unwrap(),
            adapter: None,
        }
    }

    #[test]
    fn test_options_defaults() {
        let options = Options::parse_from(["mi-thermometer-exporter"]);
        assert_eq!(options.log_level, "info");
        assert!(options.allowed_devices.is_empty());
        assert_eq!(options.clean_period, Duration::from_secs(60));
        assert_eq!(options.max_unseen, Duration::from_secs(300));
        assert_eq!(options.listen_address, "0.0.0.0:9977".parse().unwrap());
        assert_eq!(options.adapter, None);
    }

    #[test]
    fn test_options_repeated_allow_device() {
        let options = Options::parse_from([
            "mi-thermometer-exporter",
            "--allow-device",
            "A4:C1:38:20:94:A9",
            "--allow-device",
            "11:22:33:44:55:66",
            "--clean-period",
            "30s",
            "--max-unseen",
            "2m",
            "--log-level",
            "debug",
        ]);
        assert_eq!(
            options.allowed_devices,
            vec!["A4:C1:38:20:94:A9", "11:22:33:44:55:66"]
        );
        assert_eq!(options.clean_period, Duration::from_secs(30));
        assert_eq!(options.max_unseen, Duration::from_secs(120));
        assert_eq!(options.log_level, "debug");
    }

    #[test]
    fn test_options_reject_invalid_values() {
        assert!(Options::try_parse_from(["x", "--clean-period", "0s"]).is_err());
        assert!(Options::try_parse_from(["x", "--max-unseen", "soon"]).is_err());
        assert!(Options::try_parse_from(["x", "--log-level", "loud"]).is_err());
        assert!(Options::try_parse_from(["x", "--listen-address", ":9977"]).is_err());
    }

    #[test]
    fn test_parse_duration_single_units() {
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("0s").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration(" 3s ").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn test_parse_duration_compound_and_fractional() {
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(
            parse_duration("1h2m3s4ms").unwrap(),
            Duration::from_millis(3_723_004)
        );
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("1d").is_err());
        assert!(parse_duration("1m30").is_err());
        assert!(parse_duration("1..5s").is_err());
    }

    #[test]
    fn test_parse_period_rejects_zero() {
        assert!(parse_period("0").is_err());
        assert!(parse_period("0ms").is_err());
        assert_eq!(parse_period("1ms").unwrap(), Duration::from_millis(1));
    }

    #[tokio::test]
    async fn test_run_processes_advertisements_until_source_ends() {
        let source = ScriptedSource::new(vec![advertisement(TEST_ADDRESS, "bedroom")]);
        let registry = Registry::new();

        run(
            options(),
            Arc::new(source),
            registry.clone(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(series_count(&registry, TEST_ADDRESS), 5);
    }

    #[tokio::test]
    async fn test_run_propagates_source_failure() {
        let source = ScriptedSource::new(vec![]).failing_with("no adapter");

        let result = run(
            options(),
            Arc::new(source),
            Registry::new(),
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(RunError::Scan(ScanError::Bluetooth(_)))));
    }

    #[tokio::test]
    async fn test_run_applies_allow_list() {
        let source = ScriptedSource::new(vec![
            advertisement(TEST_ADDRESS, "bedroom"),
            advertisement("11:22:33:44:55:66", "kitchen"),
        ]);
        let registry = Registry::new();
        let mut options = options();
        options.allowed_devices = vec!["11:22:33:44:55:66".to_string()];

        run(options, Arc::new(source), registry.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(series_count(&registry, TEST_ADDRESS), 0);
        assert_eq!(series_count(&registry, "11:22:33:44:55:66"), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_record_then_evict() {
        let source = ScriptedSource::new(vec![advertisement("coucou", "bedroom")]).until_cancelled();
        let registry = Registry::new();
        let cancel = CancellationToken::new();

        let checks = async {
            sleep(Duration::from_secs(1)).await;
            let temperature = series(&registry, "atc_mi_thermometer_temperature_celsius_degrees");
            assert_eq!(temperature.len(), 1);
            assert_eq!(temperature[0].address, "coucou");
            assert_eq!(temperature[0].name, "bedroom");
            assert_eq!(temperature[0].value, 27.87);
            assert_eq!(series_count(&registry, "coucou"), 5);

            // past max-unseen plus one sweep period
            sleep(Duration::from_secs(300 + 60)).await;
            assert_eq!(series_count(&registry, "coucou"), 0);

            cancel.cancel();
        };

        let (result, ()) = tokio::join!(
            run(options(), Arc::new(source), registry.clone(), cancel.clone()),
            checks
        );
        result.unwrap();
    }
}

//! Historical logging of derived samples to files.

use crate::display::format_rate;
use crate::sampler::{DerivedMetrics, InterfaceRate};
use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

/// One derived sample as written to a JSON Lines log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub timestamp: DateTime<Utc>,
    pub cpu_average: f64,
    pub receive_rate: f64,
    pub transmit_rate: f64,
    #[serde(default)]
    pub interfaces: Vec<InterfaceRate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_used_percent: Option<f64>,
}

impl SampleRecord {
    pub fn new(derived: &DerivedMetrics, memory_used_percent: Option<f64>) -> Self {
        Self {
            timestamp: derived.timestamp,
            cpu_average: derived.cpu_average,
            receive_rate: derived.aggregate_receive_rate,
            transmit_rate: derived.aggregate_transmit_rate,
            interfaces: derived.per_interface_rates.clone(),
            memory_used_percent,
        }
    }
}

fn create_truncated(path: &Path, what: &str) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("Failed to create {}: {}", what, path.display()))
}

/// Logger for writing samples to a JSON Lines file
pub struct SampleLogger {
    writer: BufWriter<File>,
    samples_written: u64,
}

impl SampleLogger {
    /// Create a new logger writing to the specified file
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = create_truncated(path.as_ref(), "log file")?;
        Ok(Self {
            writer: BufWriter::new(file),
            samples_written: 0,
        })
    }

    /// Append a sample to the log file
    pub fn log(&mut self, record: &SampleRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        writeln!(self.writer, "{}", json)?;
        self.samples_written += 1;

        // Flush every 10 samples to avoid losing data on crash
        if self.samples_written % 10 == 0 {
            self.writer.flush()?;
        }

        Ok(())
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }
}

impl Drop for SampleLogger {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

/// Logger for writing human-readable sample lines to a file
pub struct TextLogger {
    writer: BufWriter<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = create_truncated(path.as_ref(), "text log file")?;
        let mut logger = Self {
            writer: BufWriter::new(file),
        };

        writeln!(logger.writer, "# hostdash log")?;
        writeln!(logger.writer, "# Started: {}", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(logger.writer, "#")?;
        writeln!(logger.writer, "#   CPU%     - Mean utilization across cores")?;
        writeln!(logger.writer, "#   Mem%     - Memory used, if reported")?;
        writeln!(logger.writer, "#   RX/TX    - Aggregate network throughput")?;
        writeln!(logger.writer, "#   Top      - Busiest interface this sample")?;
        writeln!(logger.writer, "#")?;
        writeln!(
            logger.writer,
            "{:<8} {:>6} {:>6} {:>14} {:>14} {:<12}",
            "Time", "CPU%", "Mem%", "RX", "TX", "Top"
        )?;
        writeln!(logger.writer, "{}", "-".repeat(65))?;

        Ok(logger)
    }

    /// Log a sample in human-readable format
    pub fn log(&mut self, record: &SampleRecord) -> Result<()> {
        let time = record.timestamp.with_timezone(&Local).format("%H:%M:%S");
        let mem = record
            .memory_used_percent
            .map(|p| format!("{:>6.1}", p))
            .unwrap_or_else(|| "   N/A".to_string());
        let top = record
            .interfaces
            .first()
            .map(|iface| iface.name.as_str())
            .unwrap_or("-");

        writeln!(
            self.writer,
            "{:<8} {:>6.1} {} {:>14} {:>14} {:<12}",
            time,
            record.cpu_average,
            mem,
            format_rate(record.receive_rate),
            format_rate(record.transmit_rate),
            top,
        )?;

        // Flush every sample for real-time logging
        self.writer.flush()?;
        Ok(())
    }
}

impl Drop for TextLogger {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

/// Summary statistics over a session
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub duration_secs: f64,
    pub samples_count: u64,

    pub cpu_avg: f64,
    pub cpu_max: f64,

    pub receive_avg: f64,
    pub receive_max: f64,
    pub transmit_avg: f64,
    pub transmit_max: f64,

    pub memory_max_used_percent: Option<f64>,
    pub counter_regressions: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Stat {
    sum: f64,
    max: f64,
}

impl Stat {
    fn add(&mut self, value: f64) {
        self.sum += value;
        self.max = self.max.max(value);
    }

    fn avg(&self, count: u64) -> f64 {
        if count == 0 {
            0.0
        } else {
            self.sum / count as f64
        }
    }
}

/// Accumulator for building summary statistics
#[derive(Debug, Default)]
pub struct SummaryAccumulator {
    first: Option<DateTime<Utc>>,
    last: Option<DateTime<Utc>>,
    count: u64,
    cpu: Stat,
    receive: Stat,
    transmit: Stat,
    memory_max: Option<f64>,
}

impl SummaryAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sample(&mut self, record: &SampleRecord) {
        self.first.get_or_insert(record.timestamp);
        self.last = Some(record.timestamp);
        self.count += 1;
        self.cpu.add(record.cpu_average);
        self.receive.add(record.receive_rate);
        self.transmit.add(record.transmit_rate);
        if let Some(mem) = record.memory_used_percent {
            self.memory_max = Some(self.memory_max.map_or(mem, |m| m.max(mem)));
        }
    }

    /// Summarize everything added so far; `None` before the first sample
    pub fn generate_summary(&self, counter_regressions: u64) -> Option<MetricsSummary> {
        let (first, last) = (self.first?, self.last?);
        Some(MetricsSummary {
            duration_secs: (last - first).num_milliseconds() as f64 / 1000.0,
            samples_count: self.count,
            cpu_avg: self.cpu.avg(self.count),
            cpu_max: self.cpu.max,
            receive_avg: self.receive.avg(self.count),
            receive_max: self.receive.max,
            transmit_avg: self.transmit.avg(self.count),
            transmit_max: self.transmit.max,
            memory_max_used_percent: self.memory_max,
            counter_regressions,
        })
    }
}

impl MetricsSummary {
    /// Print the summary to stdout
    pub fn print(&self) {
        println!();
        println!("=== Session Summary ===");
        println!("Duration: {:.1}s ({} samples)", self.duration_secs, self.samples_count);
        println!("CPU:      avg {:.1}%  max {:.1}%", self.cpu_avg, self.cpu_max);
        println!(
            "Network:  RX avg {}  max {}",
            format_rate(self.receive_avg),
            format_rate(self.receive_max)
        );
        println!(
            "          TX avg {}  max {}",
            format_rate(self.transmit_avg),
            format_rate(self.transmit_max)
        );
        if let Some(mem) = self.memory_max_used_percent {
            println!("Memory:   max {:.1}%", mem);
        }
        if self.counter_regressions > 0 {
            println!("Counter resets observed: {}", self.counter_regressions);
        }
    }
}

//! Plot generation from JSON sample logs.

use crate::logging::SampleRecord;
use anyhow::{Context, Result};
use plotters::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Load samples from a JSON Lines log file
pub fn load_samples<P: AsRef<Path>>(path: P) -> Result<Vec<SampleRecord>> {
    let file = File::open(path.as_ref())
        .with_context(|| format!("Failed to open log file: {}", path.as_ref().display()))?;

    let reader = BufReader::new(file);
    let mut samples = Vec::new();
    let mut seen_data = false;

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read line {}", line_num + 1))?;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let first_data_line = !seen_data;
        seen_data = true;
        match serde_json::from_str::<SampleRecord>(&line) {
            Ok(sample) => samples.push(sample),
            Err(e) => {
                // Later malformed lines are skipped, a bad first data line means the wrong file
                if first_data_line {
                    return Err(anyhow::anyhow!(
                        "Log file doesn't appear to be JSON format. Use --log to create JSON logs.\nError: {}",
                        e
                    ));
                }
            }
        }
    }

    if samples.is_empty() {
        return Err(anyhow::anyhow!("No samples found in log file"));
    }

    Ok(samples)
}

/// Generate all plots from samples, returning the written paths
pub fn generate_plots<P: AsRef<Path>>(samples: &[SampleRecord], output_dir: P) -> Result<Vec<String>> {
    let output_dir = output_dir.as_ref();
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create plot directory: {}", output_dir.display()))?;

    let mut generated = Vec::new();

    let cpu_path = output_dir.join("cpu.svg");
    plot_cpu(samples, &cpu_path)?;
    generated.push(cpu_path.display().to_string());

    let net_path = output_dir.join("network_io.svg");
    plot_network_io(samples, &net_path)?;
    generated.push(net_path.display().to_string());

    let overview_path = output_dir.join("overview.svg");
    plot_overview(samples, &overview_path)?;
    generated.push(overview_path.display().to_string());

    Ok(generated)
}

/// Convert timestamp to seconds from start
fn to_elapsed_secs(samples: &[SampleRecord]) -> Vec<f64> {
    let Some(start) = samples.first().map(|s| s.timestamp) else {
        return vec![];
    };
    samples
        .iter()
        .map(|s| (s.timestamp - start).num_milliseconds() as f64 / 1000.0)
        .collect()
}

/// X axis upper bound; a single sample still gets a non-empty range
fn time_range(times: &[f64]) -> f64 {
    times.last().copied().unwrap_or(0.0).max(1.0)
}

fn to_kb_per_sec(bytes: f64) -> f64 {
    bytes / 1024.0
}

fn max_with_headroom(values: &[f64]) -> f64 {
    values.iter().cloned().fold(0.0_f64, f64::max).max(1.0) * 1.1
}

fn plot_cpu<P: AsRef<Path>>(samples: &[SampleRecord], path: P) -> Result<()> {
    let times = to_elapsed_secs(samples);
    let avg: Vec<f64> = samples.iter().map(|s| s.cpu_average).collect();
    let mem: Vec<(f64, f64)> = times
        .iter()
        .zip(samples)
        .filter_map(|(t, s)| s.memory_used_percent.map(|m| (*t, m)))
        .collect();

    let root = SVGBackend::new(path.as_ref(), (1200, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("CPU and Memory Utilization", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0f64..time_range(&times), 0f64..100f64)?;

    chart
        .configure_mesh()
        .x_desc("Time (seconds)")
        .y_desc("%")
        .draw()?;

    chart
        .draw_series(LineSeries::new(
            times.iter().zip(avg.iter()).map(|(x, y)| (*x, *y)),
            &BLUE,
        ))?
        .label("CPU (avg)")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));

    if !mem.is_empty() {
        chart
            .draw_series(LineSeries::new(mem, &MAGENTA))?
            .label("Memory")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], MAGENTA));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

fn plot_network_io<P: AsRef<Path>>(samples: &[SampleRecord], path: P) -> Result<()> {
    let times = to_elapsed_secs(samples);
    let rx_kb: Vec<f64> = samples.iter().map(|s| to_kb_per_sec(s.receive_rate)).collect();
    let tx_kb: Vec<f64> = samples.iter().map(|s| to_kb_per_sec(s.transmit_rate)).collect();
    let max_y = max_with_headroom(&[rx_kb.as_slice(), tx_kb.as_slice()].concat());

    let root = SVGBackend::new(path.as_ref(), (1200, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Network I/O Throughput", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..time_range(&times), 0f64..max_y)?;

    chart
        .configure_mesh()
        .x_desc("Time (seconds)")
        .y_desc("Throughput (KB/s)")
        .draw()?;

    chart
        .draw_series(LineSeries::new(
            times.iter().zip(rx_kb.iter()).map(|(x, y)| (*x, *y)),
            &BLUE,
        ))?
        .label("RX (Download)")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));

    chart
        .draw_series(LineSeries::new(
            times.iter().zip(tx_kb.iter()).map(|(x, y)| (*x, *y)),
            &GREEN,
        ))?
        .label("TX (Upload)")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], GREEN));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

/// CPU on top, network below
fn plot_overview<P: AsRef<Path>>(samples: &[SampleRecord], path: P) -> Result<()> {
    let times = to_elapsed_secs(samples);
    let max_time = time_range(&times);

    let root = SVGBackend::new(path.as_ref(), (1600, 900)).into_drawing_area();
    root.fill(&WHITE)?;

    let (upper, lower) = root.split_vertically(450);

    {
        let avg: Vec<f64> = samples.iter().map(|s| s.cpu_average).collect();

        let mut chart = ChartBuilder::on(&upper)
            .caption("CPU Utilization", ("sans-serif", 20))
            .margin(5)
            .x_label_area_size(30)
            .y_label_area_size(40)
            .build_cartesian_2d(0f64..max_time, 0f64..100f64)?;

        chart.configure_mesh().draw()?;

        chart
            .draw_series(LineSeries::new(
                times.iter().zip(avg.iter()).map(|(x, y)| (*x, *y)),
                &BLUE,
            ))?
            .label("Average")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));

        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .position(SeriesLabelPosition::UpperRight)
            .draw()?;
    }

    {
        let rx_kb: Vec<f64> = samples.iter().map(|s| to_kb_per_sec(s.receive_rate)).collect();
        let tx_kb: Vec<f64> = samples.iter().map(|s| to_kb_per_sec(s.transmit_rate)).collect();
        let max_y = max_with_headroom(&[rx_kb.as_slice(), tx_kb.as_slice()].concat());

        let mut chart = ChartBuilder::on(&lower)
            .caption("Network I/O (KB/s)", ("sans-serif", 20))
            .margin(5)
            .x_label_area_size(30)
            .y_label_area_size(50)
            .build_cartesian_2d(0f64..max_time, 0f64..max_y)?;

        chart.configure_mesh().draw()?;

        chart
            .draw_series(LineSeries::new(
                times.iter().zip(rx_kb.iter()).map(|(x, y)| (*x, *y)),
                &BLUE,
            ))?
            .label("RX")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));

        chart
            .draw_series(LineSeries::new(
                times.iter().zip(tx_kb.iter()).map(|(x, y)| (*x, *y)),
                &GREEN,
            ))?
            .label("TX")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], GREEN));

        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .position(SeriesLabelPosition::UpperRight)
            .draw()?;
    }

    root.present()?;
    Ok(())
}

// Tactus meter fitting — CLI entry point.
//
// Reads observed attack points from a JSON file and prints the sequence
// of meters that best fits them.
//
// Usage:
//   cargo run -p tactus_meter --bin fit -- input.json [--meters 4/4,3/4,6/8]
//     [--denominator N] [--max-run N] [--step-limit N] [--lookahead N/D]
//
// Input format (offsets as [numerator, denominator] pairs; "counts"
// entries carry an explicit weight as a third element):
//   { "attacks": [[0,1], [1,4], [3,8]], "counts": [[5,8,3]] }

use serde::Deserialize;
use tactus_meter::{FitConfig, Meter, Offset, OffsetCounter, Weight, fit_meters};

#[derive(Deserialize, Default)]
struct PassageFile {
    /// Attack positions; duplicates accumulate.
    #[serde(default)]
    attacks: Vec<(i64, i64)>,
    /// Explicit (numerator, denominator, count) weights.
    #[serde(default)]
    counts: Vec<(i64, i64, u32)>,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let input_path = args
        .get(1)
        .filter(|s| !s.starts_with("--"))
        .map(|s| s.as_str());
    let Some(input_path) = input_path else {
        eprintln!(
            "usage: fit <input.json> [--meters 4/4,3/4,6/8] [--denominator N] \
             [--max-run N] [--step-limit N] [--lookahead N/D]"
        );
        std::process::exit(1);
    };

    let meter_list: String =
        parse_flag(&args, "--meters").unwrap_or_else(|| "2/4,3/4,4/4,6/8".to_string());
    let config = FitConfig {
        kernel_denominator: parse_flag(&args, "--denominator").unwrap_or(32),
        maximum_run_length: parse_flag(&args, "--max-run"),
        lookahead_weight: parse_flag::<String>(&args, "--lookahead")
            .map(|raw| parse_weight(&raw))
            .unwrap_or_else(|| Weight::from_integer(1)),
        step_limit: parse_flag(&args, "--step-limit"),
    };

    println!("=== Tactus meter fitting ===");
    println!("Input: {}", input_path);
    println!("Candidates: {}", meter_list);
    println!("Kernel grid: 1/{}", config.kernel_denominator);
    if let Some(run_length) = config.maximum_run_length {
        println!("Max run length: {}", run_length);
    }
    println!();

    println!("[1/3] Reading passage...");
    let counter = match read_passage(input_path) {
        Ok(counter) => counter,
        Err(message) => {
            eprintln!("  Error reading {}: {}", input_path, message);
            std::process::exit(1);
        }
    };
    println!(
        "  {} distinct offsets, span {}.",
        counter.len(),
        counter.last_offset().unwrap_or_else(Offset::zero)
    );

    println!("[2/3] Parsing candidate meters...");
    let mut candidates: Vec<Meter> = Vec::new();
    for spec in meter_list.split(',') {
        match spec.trim().parse() {
            Ok(meter) => candidates.push(meter),
            Err(error) => {
                eprintln!("  {}", error);
                std::process::exit(1);
            }
        }
    }
    println!("  {} candidates.", candidates.len());

    println!("[3/3] Fitting...");
    match fit_meters(&candidates, &counter, &config) {
        Ok(fitted) => {
            println!("  {} meters selected:", fitted.len());
            let mut offset = Offset::zero();
            for meter in &fitted {
                println!("    at {:>8}: {}", offset, meter);
                offset += meter.duration();
            }
            println!("  Covered span: {}", offset);
        }
        Err(error) => {
            eprintln!("  Error: {}", error);
            std::process::exit(1);
        }
    }
}

fn read_passage(path: &str) -> Result<OffsetCounter, String> {
    let raw = std::fs::read_to_string(path).map_err(|error| error.to_string())?;
    let file: PassageFile = serde_json::from_str(&raw).map_err(|error| error.to_string())?;
    let mut counter = OffsetCounter::new();
    for &(numerator, denominator) in &file.attacks {
        if denominator == 0 {
            return Err(format!("attack [{numerator}, 0] has a zero denominator"));
        }
        counter.add(Offset::new(numerator, denominator), 1);
    }
    for &(numerator, denominator, count) in &file.counts {
        if denominator == 0 {
            return Err(format!("count [{numerator}, 0] has a zero denominator"));
        }
        counter.add(Offset::new(numerator, denominator), count);
    }
    if counter.is_empty() {
        return Err("no attacks or counts in input".to_string());
    }
    Ok(counter)
}

fn parse_weight(raw: &str) -> Weight {
    let parsed = match raw.split_once('/') {
        Some((numerator, denominator)) => {
            match (numerator.parse::<i64>(), denominator.parse::<i64>()) {
                (Ok(n), Ok(d)) if d != 0 => Some(Weight::new(n, d)),
                _ => None,
            }
        }
        None => raw.parse::<i64>().ok().map(Weight::from_integer),
    };
    match parsed {
        Some(weight) => weight,
        None => {
            eprintln!("Invalid lookahead weight '{}'. Expected N or N/D.", raw);
            std::process::exit(1);
        }
    }
}

fn parse_flag<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}

use photometry_sync::{load_config, open_session, PipelineConfig};
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        println!("Usage: session_summary <block directory> [frame] [config.yaml]");
        return Ok(());
    }
    let frame: usize = match args.get(2) {
        Some(arg) => arg.parse()?,
        None => 1,
    };
    let config = match args.get(3) {
        Some(path) => load_config(path)?,
        None => PipelineConfig::default(),
    };

    let session = open_session(&args[1], &config)?;
    let table = &session.table;

    println!("Block: {}", session.directory.display());
    println!("Raw sample rate: {:.4} Hz", session.raw_sample_rate);
    println!(
        "Analysis table: {} rows at {:.4} Hz ({:.2} seconds)",
        table.len(),
        table.sample_rate(),
        table.duration()
    );
    if let (Some(first), Some(last)) = (table.utc_timestamp.first(), table.utc_timestamp.last()) {
        println!("  Time range: {} to {}", first, last);
    }

    match &session.frames {
        Some(frames) => println!("Video frames: {}", frames.len()),
        None => println!("No camera store configured"),
    }

    let window = session.window_at(frame);
    println!("\nWindow for frame {}: {} samples", frame, window.len());
    if let Some(ranges) = window.suggested_ranges() {
        println!("  X range: {:.3} to {:.3} s", ranges.x.0, ranges.x.1);
        println!("  Y range: {:.3} to {:.3} zdFF", ranges.y.0, ranges.y.1);
        let num_points = std::cmp::min(5, window.len());
        println!("  Last {} points:", num_points);
        for i in window.len() - num_points..window.len() {
            println!(
                "    {:.3} s: {:.4}",
                window.elapsed_seconds[i], window.signal[i]
            );
        }
    }

    Ok(())
}

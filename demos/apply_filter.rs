// demos/apply_filter.rs
//
// Apply one of the built-in filters to an image file.
//
// Usage:
//   cargo run --example apply_filter --release -- <input> <output> [filter]
//
//   filter   sepia (default) | negative | grayscale | halve
//
// Device selection follows the KILN_* environment variables, e.g.
//   KILN_DEVICE_CLASS=any KILN_CPU_FALLBACK=1 cargo run --example apply_filter -- in.png out.png
//
// Output format is chosen from the output file extension (png or jpeg).

use std::env;
use std::error::Error;
use std::time::Instant;

use kiln::convert::{image_to_rgba8, rgba8_to_image};
use kiln::FilterEngine;
use tracing::info;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <input> <output> [filter]", args[0]);
        eprintln!("  e.g.: {} photo.png photo_sepia.png sepia", args[0]);
        std::process::exit(1);
    }
    let (input, output) = (&args[1], &args[2]);
    let filter = args.get(3).map(String::as_str).unwrap_or("sepia");

    let engine = FilterEngine::from_env()?;
    if engine.registry().get(filter).is_err() {
        let known: Vec<&str> = engine.registry().names().collect();
        eprintln!("Unknown filter {filter:?}; available: {}", known.join(", "));
        std::process::exit(1);
    }

    let decoded = image::open(input)?.to_rgba8();
    let (w, h) = decoded.dimensions();
    let mut img = rgba8_to_image(w as usize, h as usize, decoded.as_raw())?;
    info!(input = %input, width = w, height = h, "image loaded");

    let start = Instant::now();
    let report = engine.apply(&mut img, filter)?;
    info!(
        filter = %report.filter,
        target = %report.target,
        elapsed_ms = start.elapsed().as_secs_f64() * 1e3,
        "filter applied"
    );

    let out = image::RgbaImage::from_raw(w, h, image_to_rgba8(&img))
        .ok_or("filtered buffer does not match the image dimensions")?;
    out.save(output)?;
    info!(output = %output, "image written");
    Ok(())
}

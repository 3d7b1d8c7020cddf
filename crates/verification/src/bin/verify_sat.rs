//! Summed-area-table verification binary
//!
//! Runs both pipeline strategies on the GPU and compares their output
//! against the CPU reference engine and a brute-force table. With an image
//! path argument the comparison runs over that image; otherwise a
//! deterministic synthetic image is used.

use sat_wgpu::{PixelFormat, RenderCaps, SatExecutor, ScanStrategy};
use sat_wgpu_verification::{
    compare::{compare_images, CompareResult},
    reference_engine::{execute_plan, reference_sat, Image4f},
    wgpu_helpers::{read_texture, upload_image},
};

/// Largest acceptable absolute difference between GPU and CPU output
///
/// The 16-bit fallback format carries far less precision than f32, so the
/// tolerance widens when it is in use.
fn tolerance_for(format: PixelFormat, max_value: f32) -> f32 {
    match format {
        PixelFormat::Rgba32Float => 1e-2,
        PixelFormat::Rgba16Float => (max_value * 1e-2).max(0.5),
    }
}

fn load_source(path: Option<&str>) -> Result<Image4f, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let image = image::open(path)?.to_rgba32f();
            let (width, height) = image.dimensions();
            Ok(Image4f::from_fn(width, height, |x, y| image.get_pixel(x, y).0))
        }
        None => {
            // Gradient plus a checker term; every channel differs so binding
            // mix-ups cannot cancel out.
            Ok(Image4f::from_fn(640, 359, |x, y| {
                let checker = ((x / 8 + y / 8) % 2) as f32;
                [
                    x as f32 / 640.0,
                    y as f32 / 359.0,
                    checker,
                    1.0,
                ]
            }))
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 2 {
        eprintln!("Usage: {} [input_image]", args[0]);
        return Ok(());
    }
    let source = load_source(args.get(1).map(String::as_str))?;
    println!("Source: {}x{}", source.width(), source.height());

    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))?;
    println!("Adapter: {}", adapter.get_info().name);
    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor::default()))?;

    let brute_force = reference_sat(&source);
    let max_value = brute_force
        .texels()
        .iter()
        .flat_map(|texel| texel.iter())
        .fold(0.0f32, |max, value| max.max(value.abs()));

    let mut failures = 0;
    for strategy in [ScanStrategy::SeparableSweep, ScanStrategy::BlockScan] {
        let (executor, output) = match SatExecutor::new(&device, &adapter, &upload_image(&device, &queue, &source, pick_format(&adapter, strategy)), strategy) {
            Ok(bound) => bound,
            Err(error) => {
                eprintln!("✗ {strategy:?}: construction failed: {error}");
                failures += 1;
                continue;
            }
        };
        let plan = executor.plan();
        println!("{strategy:?}: {} passes, format {:?}", plan.passes.len(), plan.format);

        let cpu_output = execute_plan(plan, &source)?;
        pollster::block_on(executor.execute(&device, &queue))?;
        let gpu_output = read_texture(&device, &queue, &output, plan.format)?;

        let tolerance = tolerance_for(plan.format, max_value);
        for (name, expected) in [("cpu reference", &cpu_output), ("brute force", &brute_force)] {
            match compare_images(expected, &gpu_output, tolerance) {
                CompareResult::Match { max_error } => {
                    println!("✓ {strategy:?} matches {name} (max error {max_error:.6})");
                }
                result => {
                    eprintln!("✗ {strategy:?} diverges from {name}: {result:?}");
                    failures += 1;
                }
            }
        }
    }

    if failures > 0 {
        Err(format!("{failures} verification failure(s)").into())
    } else {
        println!("All verifications passed");
        Ok(())
    }
}

/// The format construction will select for this strategy, so the source
/// texture is created in the matching format
fn pick_format(adapter: &wgpu::Adapter, strategy: ScanStrategy) -> PixelFormat {
    let usage = match strategy {
        ScanStrategy::SeparableSweep => sat_wgpu::BufferUsage::SWEEP,
        ScanStrategy::BlockScan => sat_wgpu::BufferUsage::BLOCK,
    };
    if adapter.supports_format(PixelFormat::Rgba32Float, usage) {
        PixelFormat::Rgba32Float
    } else {
        PixelFormat::Rgba16Float
    }
}

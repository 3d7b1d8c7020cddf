//! Summed-area table CLI demo
//!
//! Computes the summed-area table of an image on the GPU with either
//! pipeline strategy, demonstrates an O(1) box-filter query against the
//! table, and saves a normalized visualization.
//!
//! # Usage
//! ```bash
//! cargo run --example cli -- input.png --strategy block --output sat.png
//! ```

use clap::Parser;
use half::f16;
use sat_wgpu::{texture_format, PixelFormat, RenderCaps, SatExecutor, ScanStrategy};
use std::path::PathBuf;

/// Command-line arguments for the summed-area table demo
#[derive(Parser)]
#[command(version, about = "Compute an image's summed-area table on the GPU")]
struct Args {
    /// Input image file path
    input: PathBuf,

    /// Output path for the normalized table visualization
    #[arg(long, short, default_value = "sat.png")]
    output: PathBuf,

    /// Pipeline strategy (sweep, block)
    #[arg(long, short, default_value = "sweep")]
    strategy: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let strategy = match args.strategy.to_lowercase().as_str() {
        "sweep" => ScanStrategy::SeparableSweep,
        "block" => ScanStrategy::BlockScan,
        _ => {
            eprintln!("Invalid strategy '{}'. Valid strategies: sweep, block", args.strategy);
            std::process::exit(1);
        }
    };

    println!("Loading image from: {}", args.input.display());
    let input_image = image::open(&args.input)?.to_rgba32f();
    let (width, height) = input_image.dimensions();
    println!("Input image: {width}x{height}");

    println!("Initializing GPU...");
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))?;
    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor::default()))?;

    // The builders pick the format from the adapter caps; create the source
    // in the same format so the level-0 slot can alias it directly.
    let usage = match strategy {
        ScanStrategy::SeparableSweep => sat_wgpu::BufferUsage::SWEEP,
        ScanStrategy::BlockScan => sat_wgpu::BufferUsage::BLOCK,
    };
    let format = if adapter.supports_format(PixelFormat::Rgba32Float, usage) {
        PixelFormat::Rgba32Float
    } else {
        PixelFormat::Rgba16Float
    };
    let source = upload_image(&device, &queue, &input_image, format);

    println!("Building {strategy:?} pipeline...");
    let (executor, output) = SatExecutor::new(&device, &adapter, &source, strategy)?;
    println!("Pipeline: {} passes in {:?}", executor.plan().passes.len(), executor.plan().format);

    pollster::block_on(executor.execute(&device, &queue))?;
    let table = read_texture(&device, &queue, &output, executor.plan().format)?;

    // O(1) box-filter demo over the center quarter of the image.
    let (x0, y0) = (width / 4, height / 4);
    let (x1, y1) = ((3 * width / 4).max(x0 + 1) - 1, (3 * height / 4).max(y0 + 1) - 1);
    let area = ((x1 - x0 + 1) * (y1 - y0 + 1)) as f32;
    let sum = box_sum(&table, width, x0, y0, x1, y1);
    println!(
        "Average color over ({x0},{y0})..({x1},{y1}): [{:.4}, {:.4}, {:.4}, {:.4}]",
        sum[0] / area,
        sum[1] / area,
        sum[2] / area,
        sum[3] / area
    );

    println!("Saving visualization to: {}", args.output.display());
    save_visualization(&table, width, height, &args.output)?;

    Ok(())
}

/// Sum over an inclusive rectangle with four table taps
fn box_sum(table: &[[f32; 4]], width: u32, x0: u32, y0: u32, x1: u32, y1: u32) -> [f32; 4] {
    let tap = |x: i64, y: i64| -> [f32; 4] {
        if x < 0 || y < 0 {
            return [0.0; 4];
        }
        table[(y * i64::from(width) + x) as usize]
    };
    let (x0, y0, x1, y1) = (i64::from(x0), i64::from(y0), i64::from(x1), i64::from(y1));
    let mut sum = [0.0f32; 4];
    let corners = [(x1, y1, 1.0), (x0 - 1, y1, -1.0), (x1, y0 - 1, -1.0), (x0 - 1, y0 - 1, 1.0)];
    for (x, y, sign) in corners {
        let value = tap(x, y);
        for channel in 0..4 {
            sum[channel] += sign * value[channel];
        }
    }
    sum
}

/// Uploads an RGBA32F image into a texture in the pipeline format
fn upload_image(device: &wgpu::Device, queue: &wgpu::Queue, image: &image::Rgba32FImage, format: PixelFormat) -> wgpu::Texture {
    let (width, height) = image.dimensions();
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("sat source"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: texture_format(format),
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::STORAGE_BINDING
            | wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });

    let bytes: Vec<u8> = match format {
        PixelFormat::Rgba32Float => image.as_raw().iter().flat_map(|value| value.to_le_bytes()).collect(),
        PixelFormat::Rgba16Float => image.as_raw().iter().flat_map(|value| f16::from_f32(*value).to_le_bytes()).collect(),
    };
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &bytes,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(width * format.bytes_per_texel()),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    texture
}

/// Reads a pipeline texture back as row-major RGBA f32 texels
fn read_texture(device: &wgpu::Device, queue: &wgpu::Queue, texture: &wgpu::Texture, format: PixelFormat) -> Result<Vec<[f32; 4]>, Box<dyn std::error::Error>> {
    let (width, height) = (texture.width(), texture.height());
    let unpadded_bytes_per_row = width * format.bytes_per_texel();
    let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("sat readback"),
        size: u64::from(padded_bytes_per_row) * u64::from(height),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("sat readback") });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(std::iter::once(encoder.finish()));

    let buffer_slice = buffer.slice(..);
    let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |result| sender.send(result).unwrap());
    device.poll(wgpu::PollType::Wait)?;
    pollster::block_on(receiver.receive()).ok_or("failed to map readback buffer")??;

    let data = buffer_slice.get_mapped_range();
    let mut texels = Vec::with_capacity((width * height) as usize);
    for y in 0..height {
        let row = &data[(y * padded_bytes_per_row) as usize..(y * padded_bytes_per_row + unpadded_bytes_per_row) as usize];
        for x in 0..width {
            texels.push(match format {
                PixelFormat::Rgba32Float => {
                    let values: &[f32] = bytemuck::cast_slice(&row[(x * 16) as usize..(x * 16 + 16) as usize]);
                    [values[0], values[1], values[2], values[3]]
                }
                PixelFormat::Rgba16Float => {
                    let values: &[f16] = bytemuck::cast_slice(&row[(x * 8) as usize..(x * 8 + 8) as usize]);
                    [values[0].to_f32(), values[1].to_f32(), values[2].to_f32(), values[3].to_f32()]
                }
            });
        }
    }
    Ok(texels)
}

/// Saves the table normalized by its bottom-right (total-sum) entry
fn save_visualization(table: &[[f32; 4]], width: u32, height: u32, path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let total = table[table.len() - 1];
    let image = image::RgbaImage::from_fn(width, height, |x, y| {
        let texel = table[(y * width + x) as usize];
        let normalized = |channel: usize| {
            if total[channel] > 0.0 {
                ((texel[channel] / total[channel]).clamp(0.0, 1.0) * 255.0) as u8
            } else {
                0
            }
        };
        image::Rgba([normalized(0), normalized(1), normalized(2), 255])
    });
    image.save(path)?;
    Ok(())
}

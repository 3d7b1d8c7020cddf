//! wgpu utility functions for verification runs
//!
//! Helpers for moving [`Image4f`] data between the CPU and GPU in either of
//! the pipeline formats, used by the `verify_sat` binary.

use crate::reference_engine::Image4f;
use half::f16;
use sat_wgpu::{texture_format, PixelFormat};

/// Texture usage for pipeline sources: bindable everywhere the strategies
/// need, plus both copy directions for upload and readback
pub const TEXTURE_USAGE_SOURCE: wgpu::TextureUsages = wgpu::TextureUsages::TEXTURE_BINDING
    .union(wgpu::TextureUsages::STORAGE_BINDING)
    .union(wgpu::TextureUsages::RENDER_ATTACHMENT)
    .union(wgpu::TextureUsages::COPY_SRC)
    .union(wgpu::TextureUsages::COPY_DST);

/// Creates a 2D texture sized for an image in the given pipeline format
pub fn create_texture(device: &wgpu::Device, width: u32, height: u32, format: PixelFormat, usage: wgpu::TextureUsages) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("verification texture"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: texture_format(format),
        usage,
        view_formats: &[],
    })
}

fn encode_texels(image: &Image4f, format: PixelFormat) -> Vec<u8> {
    match format {
        PixelFormat::Rgba32Float => image.texels().iter().flat_map(|texel| texel.iter().flat_map(|value| value.to_le_bytes())).collect(),
        PixelFormat::Rgba16Float => image
            .texels()
            .iter()
            .flat_map(|texel| texel.iter().flat_map(|value| f16::from_f32(*value).to_le_bytes()))
            .collect(),
    }
}

/// Uploads an image into a fresh source texture
pub fn upload_image(device: &wgpu::Device, queue: &wgpu::Queue, image: &Image4f, format: PixelFormat) -> wgpu::Texture {
    let texture = create_texture(device, image.width(), image.height(), format, TEXTURE_USAGE_SOURCE);
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &encode_texels(image, format),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(image.width() * format.bytes_per_texel()),
            rows_per_image: Some(image.height()),
        },
        wgpu::Extent3d {
            width: image.width(),
            height: image.height(),
            depth_or_array_layers: 1,
        },
    );
    texture
}

/// Reads a pipeline texture back into an [`Image4f`]
///
/// Copy rows are padded to `COPY_BYTES_PER_ROW_ALIGNMENT` and stripped again
/// after mapping, so any texture width works.
pub fn read_texture(device: &wgpu::Device, queue: &wgpu::Queue, texture: &wgpu::Texture, format: PixelFormat) -> Result<Image4f, Box<dyn std::error::Error>> {
    let (width, height) = (texture.width(), texture.height());
    let unpadded_bytes_per_row = width * format.bytes_per_texel();
    let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback buffer"),
        size: u64::from(padded_bytes_per_row) * u64::from(height),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("readback encoder") });
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
    let mut image = Image4f::new(width, height);
    for y in 0..height {
        let row = &data[(y * padded_bytes_per_row) as usize..(y * padded_bytes_per_row + unpadded_bytes_per_row) as usize];
        for x in 0..width {
            let texel = match format {
                PixelFormat::Rgba32Float => {
                    let values: &[f32] = bytemuck::cast_slice(&row[(x * 16) as usize..(x * 16 + 16) as usize]);
                    [values[0], values[1], values[2], values[3]]
                }
                PixelFormat::Rgba16Float => {
                    let values: &[f16] = bytemuck::cast_slice(&row[(x * 8) as usize..(x * 8 + 8) as usize]);
                    [values[0].to_f32(), values[1].to_f32(), values[2].to_f32(), values[3].to_f32()]
                }
            };
            image.set_texel(x, y, texel);
        }
    }
    Ok(image)
}

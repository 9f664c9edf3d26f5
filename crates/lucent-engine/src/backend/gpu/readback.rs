//! Synchronous single-pixel read-back.

use crate::error::BackendError;

const BYTES_PER_PIXEL: u32 = 4;

/// Row pitch of a staging copy `width` pixels wide.
///
/// wgpu requires `bytes_per_row` to be a multiple of
/// `COPY_BYTES_PER_ROW_ALIGNMENT` (256).
pub(super) fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * BYTES_PER_PIXEL;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Converts a bottom-left-origin row to wgpu's top-left texture row.
#[inline]
pub(super) fn flip_y(y: u32, height: u32) -> u32 {
    height - 1 - y
}

/// Copies one texel of `texture` (top-left origin) and waits for it.
///
/// Blocks until the queue has drained, so it also serializes against every
/// pass submitted before it.
pub(super) fn read_texel(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    x: u32,
    y: u32,
) -> Result<[u8; 4], BackendError> {
    let bytes_per_row = padded_bytes_per_row(1);
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("lucent readback staging"),
        size: bytes_per_row as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("lucent readback encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d { x, y, z: 0 },
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(1),
            },
        },
        wgpu::Extent3d {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(std::iter::once(encoder.finish()));

    let (tx, rx) = crossbeam_channel::bounded(1);
    let slice = staging.slice(..);
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });

    device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?;

    rx.recv()
        .map_err(|_| BackendError::ReadbackFailed("map callback dropped".into()))?
        .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?;

    let data = slice.get_mapped_range();
    let mut out = [0u8; 4];
    out.copy_from_slice(&data[..BYTES_PER_PIXEL as usize]);
    drop(data);
    staging.unmap();
    Ok(out)
}

//! Headless upload/readback integration tests.
//!
//! These tests drive a real Vulkan device when one is available and skip
//! gracefully otherwise (no driver, no GPU). They exercise the staging
//! path end to end: fill a staging buffer, copy to a device-local buffer,
//! copy back into a readback buffer, and compare bytes after the fence.

use std::sync::Arc;

use framegraph_graph::UploadSource;
use framegraph_rhi::buffer::{Buffer, BufferUsage};
use framegraph_rhi::command::{CommandBuffer, CommandPool};
use framegraph_rhi::device::Device;
use framegraph_rhi::instance::Instance;
use framegraph_rhi::physical_device::select_physical_device;
use framegraph_rhi::sync::Fence;
use framegraph_rhi::vk;

/// Creates a headless instance + device, or `None` when no usable Vulkan
/// implementation is present.
fn headless_device() -> Option<(Instance, Arc<Device>)> {
    let instance = match Instance::new(false, &[]) {
        Ok(instance) => instance,
        Err(e) => {
            eprintln!("Skipping test: Vulkan not available ({e})");
            return None;
        }
    };

    let info = match select_physical_device(instance.handle(), None) {
        Ok(info) => info,
        Err(e) => {
            eprintln!("Skipping test: no suitable GPU ({e})");
            return None;
        }
    };

    let device = match Device::new(&instance, &info) {
        Ok(device) => device,
        Err(e) => {
            eprintln!("Skipping test: device creation failed ({e})");
            return None;
        }
    };

    Some((instance, device))
}

/// Records staging -> dst -> readback copies, submits, and waits.
fn roundtrip_through_device(
    device: &Arc<Device>,
    staging: &Buffer,
    dst: &Buffer,
    readback: &Buffer,
    size: vk::DeviceSize,
) -> Vec<u8> {
    let graphics_family = device
        .queue_families()
        .graphics_family
        .expect("selected device must have a graphics family");
    let pool = CommandPool::new(device.clone(), graphics_family).expect("command pool");
    let cmd = CommandBuffer::new(device.clone(), &pool).expect("command buffer");

    let region = vk::BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size,
    };

    cmd.begin().expect("begin recording");
    cmd.copy_buffer(staging.handle(), dst.handle(), &[region]);

    // Order the second copy after the first one's write
    let barrier = vk::MemoryBarrier::default()
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(vk::AccessFlags::TRANSFER_READ);
    cmd.memory_barrier(
        vk::PipelineStageFlags::TRANSFER,
        vk::PipelineStageFlags::TRANSFER,
        &[barrier],
    );

    cmd.copy_buffer(dst.handle(), readback.handle(), &[region]);
    cmd.end().expect("end recording");

    let fence = Fence::new(device.clone(), false).expect("fence");
    let command_buffers = [cmd.handle()];
    let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);

    unsafe {
        device
            .submit_graphics(&[submit_info], fence.handle())
            .expect("queue submit");
    }

    fence.wait(u64::MAX).expect("fence wait");

    readback
        .read_data(0, size as usize)
        .expect("readback buffer must be mappable")
}

#[test]
fn upload_bytes_then_read_back() {
    let Some((_instance, device)) = headless_device() else {
        return;
    };

    // 64 bytes of recognizable data
    let payload: Vec<u8> = (0..64u8).collect();
    let size = payload.len() as vk::DeviceSize;

    let staging = Buffer::new(device.clone(), BufferUsage::Staging, size).expect("staging buffer");
    UploadSource::Bytes(payload.clone())
        .write_into(&staging, 0)
        .expect("staging write");

    let dst = Buffer::new(device.clone(), BufferUsage::Storage, size).expect("dst buffer");
    let readback = Buffer::new(device.clone(), BufferUsage::Readback, size).expect("readback");

    let bytes = roundtrip_through_device(&device, &staging, &dst, &readback, size);
    assert_eq!(bytes, payload);
}

#[test]
fn upload_fill_callback_then_read_back() {
    let Some((_instance, device)) = headless_device() else {
        return;
    };

    // Payload produced lazily at staging time
    let values: [u32; 16] = std::array::from_fn(|i| (i as u32) * 0x0101_0101);
    let expected: Vec<u8> = bytemuck::cast_slice(&values).to_vec();
    let size = expected.len() as vk::DeviceSize;

    let staging = Buffer::new(device.clone(), BufferUsage::Staging, size).expect("staging buffer");
    let source = UploadSource::Fill {
        size: expected.len(),
        fill: Box::new(move |dst| {
            dst.copy_from_slice(bytemuck::cast_slice(&values));
        }),
    };
    source.write_into(&staging, 0).expect("staging fill");

    let dst = Buffer::new(device.clone(), BufferUsage::Storage, size).expect("dst buffer");
    let readback = Buffer::new(device.clone(), BufferUsage::Readback, size).expect("readback");

    let bytes = roundtrip_through_device(&device, &staging, &dst, &readback, size);
    assert_eq!(bytes, expected);
}

#[test]
fn staging_write_rejects_overflow() {
    let Some((_instance, device)) = headless_device() else {
        return;
    };

    let staging = Buffer::new(device.clone(), BufferUsage::Staging, 16).expect("staging buffer");

    // 32 bytes into a 16 byte buffer must fail without touching memory
    let result = UploadSource::Bytes(vec![0u8; 32]).write_into(&staging, 0);
    assert!(result.is_err());
}

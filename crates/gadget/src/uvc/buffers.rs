//! Frame buffer pipeline
//!
//! Owns the buffers shared with the kernel while streaming and tracks which
//! side currently holds each one. A buffer is either queued (kernel-owned)
//! or dequeued (process-owned); the process only writes to it in the latter
//! state.

use super::device::{GadgetDevice, MappedRegion, MemoryMode, QueueRequest};
use common::{Error, Result};
use nix::libc::c_ulong;
use tracing::{debug, info, warn};

/// Fewest buffers that keep the output queue moving
pub const MIN_BUFFERS: u32 = 2;

#[derive(Debug)]
enum Region {
    Mapped(MappedRegion),
    Owned(Box<[u8]>),
}

impl Region {
    fn as_slice(&self) -> &[u8] {
        match self {
            Self::Mapped(region) => region.as_slice(),
            Self::Owned(bytes) => bytes,
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Self::Mapped(region) => region.as_mut_slice(),
            Self::Owned(bytes) => bytes,
        }
    }
}

#[derive(Debug)]
struct Buffer {
    region: Region,
    queued: bool,
    /// Bytes of valid frame data
    bytes_used: u32,
}

/// Buffers of one streaming session
#[derive(Debug)]
pub struct BufferPipeline {
    memory: MemoryMode,
    buffers: Vec<Buffer>,
    allocated: bool,
    queue_count: u64,
    dequeue_count: u64,
}

impl BufferPipeline {
    pub fn new(memory: MemoryMode) -> Self {
        Self {
            memory,
            buffers: Vec::new(),
            allocated: false,
            queue_count: 0,
            dequeue_count: 0,
        }
    }

    pub fn memory(&self) -> MemoryMode {
        self.memory
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn queue_count(&self) -> u64 {
        self.queue_count
    }

    pub fn dequeue_count(&self) -> u64 {
        self.dequeue_count
    }

    /// Buffers currently held by the kernel
    pub fn in_flight(&self) -> u64 {
        self.queue_count - self.dequeue_count
    }

    pub fn is_queued(&self, index: u32) -> Option<bool> {
        self.buffers.get(index as usize).map(|buffer| buffer.queued)
    }

    /// Contents of a buffer, for inspection
    pub fn data(&self, index: u32) -> Option<&[u8]> {
        self.buffers
            .get(index as usize)
            .map(|buffer| buffer.region.as_slice())
    }

    /// Allocate `count` buffers
    ///
    /// User-pointer buffers are sized to and pre-filled with `payload`.
    /// Any failure leaves nothing allocated.
    pub fn allocate<D>(&mut self, device: &mut D, count: u32, payload: &[u8]) -> Result<()>
    where
        D: GadgetDevice + ?Sized,
    {
        if count < MIN_BUFFERS {
            return Err(Error::InsufficientBuffers {
                requested: count,
                minimum: MIN_BUFFERS,
            });
        }
        if self.allocated {
            return Err(Error::Buffer("buffers are already allocated".to_string()));
        }
        if payload.is_empty() {
            return Err(Error::Buffer("frame payload is empty".to_string()));
        }

        let granted = device.request_buffers(count, self.memory)?;
        if granted < MIN_BUFFERS {
            if granted > 0 {
                self.free_kernel_buffers(device);
            }
            return Err(Error::InsufficientBuffers {
                requested: granted,
                minimum: MIN_BUFFERS,
            });
        }

        let mut buffers = Vec::with_capacity(granted as usize);
        for index in 0..granted {
            let region = match self.memory {
                MemoryMode::Mmap => match device.map_buffer(index) {
                    Ok(region) => Region::Mapped(region),
                    Err(e) => {
                        // Unmap what was mapped before freeing the kernel side
                        drop(buffers);
                        self.free_kernel_buffers(device);
                        return Err(e);
                    }
                },
                MemoryMode::UserPtr => Region::Owned(payload.to_vec().into_boxed_slice()),
            };
            let bytes_used = match region {
                Region::Owned(_) => payload.len() as u32,
                Region::Mapped(_) => 0,
            };
            buffers.push(Buffer {
                region,
                queued: false,
                bytes_used,
            });
        }

        self.buffers = buffers;
        self.allocated = true;
        self.queue_count = 0;
        self.dequeue_count = 0;

        info!("{} buffers allocated ({})", granted, self.memory.name());
        Ok(())
    }

    fn free_kernel_buffers<D>(&self, device: &mut D)
    where
        D: GadgetDevice + ?Sized,
    {
        if let Err(e) = device.request_buffers(0, self.memory) {
            warn!("failed to free kernel buffers: {}", e);
        }
    }

    /// Copy `payload` into a process-owned buffer; returns the bytes copied
    pub fn fill(&mut self, index: u32, payload: &[u8]) -> Result<usize> {
        let buffer = self.owned_buffer(index)?;
        let data = buffer.region.as_mut_slice();
        let len = payload.len().min(data.len());
        data[..len].copy_from_slice(&payload[..len]);
        buffer.bytes_used = len as u32;
        Ok(len)
    }

    /// Hand a process-owned buffer to the kernel
    pub fn queue<D>(&mut self, device: &mut D, index: u32) -> Result<()>
    where
        D: GadgetDevice + ?Sized,
    {
        let memory = self.memory;
        let buffer = self.owned_buffer(index)?;
        let slice = buffer.region.as_slice();
        let request = QueueRequest {
            index,
            memory,
            bytes_used: buffer.bytes_used,
            user_ptr: match memory {
                MemoryMode::UserPtr => slice.as_ptr() as c_ulong,
                MemoryMode::Mmap => 0,
            },
            length: slice.len() as u32,
        };

        device.queue_buffer(&request)?;
        buffer.queued = true;
        self.queue_count += 1;
        self.check_counters();
        Ok(())
    }

    /// Take back a buffer the kernel has finished with
    pub fn dequeue<D>(&mut self, device: &mut D) -> Result<Option<u32>>
    where
        D: GadgetDevice + ?Sized,
    {
        let Some(index) = device.dequeue_buffer(self.memory)? else {
            return Ok(None);
        };

        let buffer = self
            .buffers
            .get_mut(index as usize)
            .filter(|buffer| buffer.queued)
            .ok_or_else(|| {
                Error::Buffer(format!("kernel returned buffer {} which was not queued", index))
            })?;
        buffer.queued = false;
        self.dequeue_count += 1;
        self.check_counters();
        Ok(Some(index))
    }

    /// Unmap/free all buffers and release them in the kernel
    pub fn release<D>(&mut self, device: &mut D) -> Result<()>
    where
        D: GadgetDevice + ?Sized,
    {
        if !self.allocated {
            return Ok(());
        }

        self.buffers.clear();
        self.allocated = false;
        self.queue_count = 0;
        self.dequeue_count = 0;

        device.request_buffers(0, self.memory)?;
        debug!("buffers released");
        Ok(())
    }

    fn owned_buffer(&mut self, index: u32) -> Result<&mut Buffer> {
        let buffer = self
            .buffers
            .get_mut(index as usize)
            .ok_or_else(|| Error::Buffer(format!("buffer {} does not exist", index)))?;
        if buffer.queued {
            return Err(Error::Buffer(format!("buffer {} is owned by the kernel", index)));
        }
        Ok(buffer)
    }

    fn check_counters(&self) {
        assert!(
            self.queue_count >= self.dequeue_count
                && self.in_flight() <= self.buffers.len() as u64,
            "buffer accounting broken: {} queued, {} dequeued, {} buffers",
            self.queue_count,
            self.dequeue_count,
            self.buffers.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{DeviceCall, MockDevice};

    const PAYLOAD: &[u8] = &[0xaa; 64];

    #[test]
    fn test_allocate_rejects_single_buffer() {
        let mut device = MockDevice::new();
        let mut pipeline = BufferPipeline::new(MemoryMode::Mmap);

        let err = pipeline.allocate(&mut device, 1, PAYLOAD).unwrap_err();
        assert!(matches!(err, Error::InsufficientBuffers { requested: 1, minimum: 2 }));
        assert!(device.calls().is_empty());
        assert!(pipeline.is_empty());
    }

    #[test]
    fn test_allocate_undoes_short_grant() {
        let mut device = MockDevice::new();
        device.grant_limit = Some(1);
        let mut pipeline = BufferPipeline::new(MemoryMode::Mmap);

        assert!(pipeline.allocate(&mut device, 4, PAYLOAD).is_err());
        assert_eq!(
            device.calls(),
            &[
                DeviceCall::RequestBuffers(4, MemoryMode::Mmap),
                DeviceCall::RequestBuffers(0, MemoryMode::Mmap),
            ]
        );
        assert!(pipeline.is_empty());
    }

    #[test]
    fn test_map_failure_releases_everything() {
        let mut device = MockDevice::new();
        device.fail_map_at = Some(2);
        let mut pipeline = BufferPipeline::new(MemoryMode::Mmap);

        assert!(pipeline.allocate(&mut device, 4, PAYLOAD).is_err());
        assert!(pipeline.is_empty());
        assert_eq!(
            device.calls().last(),
            Some(&DeviceCall::RequestBuffers(0, MemoryMode::Mmap))
        );
    }

    #[test]
    fn test_userptr_buffers_are_prefilled() {
        let mut device = MockDevice::new();
        let mut pipeline = BufferPipeline::new(MemoryMode::UserPtr);

        pipeline.allocate(&mut device, 3, PAYLOAD).unwrap();
        assert_eq!(pipeline.len(), 3);
        for index in 0..3 {
            assert_eq!(pipeline.data(index), Some(PAYLOAD));
        }

        pipeline.queue(&mut device, 0).unwrap();
        let queued = device.queued_requests().last().copied().unwrap();
        assert_eq!(queued.bytes_used, PAYLOAD.len() as u32);
        assert_ne!(queued.user_ptr, 0);
    }

    #[test]
    fn test_queue_twice_is_rejected() {
        let mut device = MockDevice::new();
        let mut pipeline = BufferPipeline::new(MemoryMode::Mmap);
        pipeline.allocate(&mut device, 2, PAYLOAD).unwrap();

        pipeline.fill(0, PAYLOAD).unwrap();
        pipeline.queue(&mut device, 0).unwrap();
        assert!(pipeline.queue(&mut device, 0).is_err());
        assert!(pipeline.fill(0, PAYLOAD).is_err());
        assert_eq!(pipeline.in_flight(), 1);
    }

    #[test]
    fn test_dequeue_round_trip() {
        let mut device = MockDevice::new();
        let mut pipeline = BufferPipeline::new(MemoryMode::Mmap);
        pipeline.allocate(&mut device, 2, PAYLOAD).unwrap();

        assert_eq!(pipeline.dequeue(&mut device).unwrap(), None);

        pipeline.fill(1, PAYLOAD).unwrap();
        pipeline.queue(&mut device, 1).unwrap();
        assert_eq!(pipeline.is_queued(1), Some(true));
        assert_eq!(pipeline.dequeue(&mut device).unwrap(), Some(1));
        assert_eq!(pipeline.is_queued(1), Some(false));
        assert_eq!(pipeline.data(1).map(|d| &d[..PAYLOAD.len()]), Some(PAYLOAD));
        assert_eq!((pipeline.queue_count(), pipeline.dequeue_count()), (1, 1));
    }

    #[test]
    fn test_release_is_noop_when_empty() {
        let mut device = MockDevice::new();
        let mut pipeline = BufferPipeline::new(MemoryMode::Mmap);
        pipeline.release(&mut device).unwrap();
        assert!(device.calls().is_empty());

        pipeline.allocate(&mut device, 2, PAYLOAD).unwrap();
        pipeline.release(&mut device).unwrap();
        assert!(pipeline.is_empty());
        assert_eq!(pipeline.in_flight(), 0);
    }
}

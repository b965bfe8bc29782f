use ash::vk;
use std::sync::Arc;

use super::error::{RendererError, RendererResult};

/// First memory type index allowed by `type_filter` whose flags contain `required`.
///
/// Used by buffers, images, and any other Vulkan memory allocation.
pub fn find_memory_type_index(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let count = memory_properties
        .memory_type_count
        .min(vk::MAX_MEMORY_TYPES as u32);

    (0..count).find(|&i| {
        type_filter & (1 << i) != 0
            && memory_properties.memory_types[i as usize]
                .property_flags
                .contains(required)
    })
}

pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> RendererResult<u32> {
    find_memory_type_index(memory_properties, type_filter, properties).ok_or(
        RendererError::NoSuitableMemoryType {
            type_filter,
            properties,
        },
    )
}

fn check_write_size(len: usize, capacity: vk::DeviceSize) -> RendererResult<()> {
    if len as vk::DeviceSize > capacity {
        return Err(RendererError::BufferOverflow { len, capacity });
    }
    Ok(())
}

/// Device memory freed on drop.
struct OwnedMemory {
    device: Arc<ash::Device>,
    memory: vk::DeviceMemory,
}

impl OwnedMemory {
    fn allocate(
        device: &Arc<ash::Device>,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        requirements: &vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> RendererResult<Self> {
        let memory_type_index =
            find_memory_type(memory_properties, requirements.memory_type_bits, properties)?;

        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = unsafe { device.allocate_memory(&alloc_info, None)? };
        Ok(Self {
            device: device.clone(),
            memory,
        })
    }
}

impl Drop for OwnedMemory {
    fn drop(&mut self) {
        unsafe {
            self.device.free_memory(self.memory, None);
        }
    }
}

/// A buffer together with the memory bound to it.
pub struct GpuBuffer {
    device: Arc<ash::Device>,
    buffer: vk::Buffer,
    memory: OwnedMemory,
    size: vk::DeviceSize,
}

impl GpuBuffer {
    pub fn new(
        device: &Arc<ash::Device>,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> RendererResult<Self> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let bound = OwnedMemory::allocate(device, memory_properties, &requirements, properties)
            .and_then(|memory| {
                unsafe { device.bind_buffer_memory(buffer, memory.memory, 0)? };
                Ok(memory)
            });

        match bound {
            Ok(memory) => Ok(Self {
                device: device.clone(),
                buffer,
                memory,
                size,
            }),
            Err(err) => {
                unsafe { device.destroy_buffer(buffer, None) };
                Err(err)
            }
        }
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory.memory
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Copies `data` to the start of a host-visible, host-coherent buffer.
    pub fn write<T: bytemuck::Pod>(&self, data: &[T]) -> RendererResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        check_write_size(bytes.len(), self.size)?;

        unsafe {
            let data_ptr = self.device.map_memory(
                self.memory.memory,
                0,
                bytes.len() as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), data_ptr as *mut u8, bytes.len());
            self.device.unmap_memory(self.memory.memory);
        }
        Ok(())
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
        }
        // `memory` is freed after the buffer by field drop order.
    }
}

/// An image together with the memory bound to it.
pub struct GpuImage {
    device: Arc<ash::Device>,
    image: vk::Image,
    memory: OwnedMemory,
}

impl GpuImage {
    pub fn new(
        device: &Arc<ash::Device>,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        image_info: &vk::ImageCreateInfo<'_>,
        properties: vk::MemoryPropertyFlags,
    ) -> RendererResult<Self> {
        let image = unsafe { device.create_image(image_info, None)? };
        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let bound = OwnedMemory::allocate(device, memory_properties, &requirements, properties)
            .and_then(|memory| {
                unsafe { device.bind_image_memory(image, memory.memory, 0)? };
                Ok(memory)
            });

        match bound {
            Ok(memory) => Ok(Self {
                device: device.clone(),
                image,
                memory,
            }),
            Err(err) => {
                unsafe { device.destroy_image(image, None) };
                Err(err)
            }
        }
    }

    pub fn handle(&self) -> vk::Image {
        self.image
    }

    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory.memory
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image(self.image, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_table(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, &property_flags) in flags.iter().enumerate() {
            props.memory_types[i] = vk::MemoryType {
                property_flags,
                heap_index: 0,
            };
        }
        props
    }

    #[test]
    fn picks_lowest_index_that_is_a_superset() {
        let table = memory_table(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT
                | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);
        let wanted = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        assert_eq!(find_memory_type_index(&table, 0b1111, wanted), Some(2));
        // Same inputs, same answer.
        assert_eq!(find_memory_type_index(&table, 0b1111, wanted), Some(2));
        assert_eq!(find_memory_type_index(&table, 0b1000, wanted), Some(3));
    }

    #[test]
    fn type_filter_excludes_otherwise_matching_types() {
        let table = memory_table(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        assert_eq!(
            find_memory_type_index(&table, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(1)
        );
    }

    #[test]
    fn no_match_is_reported_not_zero() {
        let table = memory_table(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        assert_eq!(
            find_memory_type_index(&table, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE),
            None
        );
        assert_eq!(
            find_memory_type_index(&table, 0b0, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            None
        );

        let err = find_memory_type(&table, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap_err();
        assert!(matches!(err, RendererError::NoSuitableMemoryType { type_filter: 1, .. }));
    }

    #[test]
    fn oversized_write_is_an_error() {
        assert!(check_write_size(64, 64).is_ok());
        assert!(check_write_size(0, 0).is_ok());

        let err = check_write_size(65, 64).unwrap_err();
        assert!(matches!(
            err,
            RendererError::BufferOverflow {
                len: 65,
                capacity: 64
            }
        ));
    }

    #[test]
    fn types_past_the_reported_count_are_ignored() {
        let mut table = memory_table(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        table.memory_types[1].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;
        assert_eq!(
            find_memory_type_index(&table, u32::MAX, vk::MemoryPropertyFlags::HOST_VISIBLE),
            None
        );
    }
}

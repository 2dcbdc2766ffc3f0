//! Picking memory types for allocations.

use ash::vk;
use color_eyre::{eyre::eyre, Result};

/// Index of the first memory type allowed by `requirements` that has all of
/// `properties`.
pub(crate) fn memory_type_index(
    memory: &vk::PhysicalDeviceMemoryProperties,
    properties: vk::MemoryPropertyFlags,
    requirements: vk::MemoryRequirements,
) -> Result<u32> {
    (0..memory.memory_type_count)
        .find(|i| {
            let allowed = requirements.memory_type_bits & (1 << i) != 0;
            allowed
                && memory.memory_types[*i as usize]
                    .property_flags
                    .contains(properties)
        })
        .ok_or_else(|| {
            eyre!(
                "No memory type with {:?} among allowed types {:#b}",
                properties,
                requirements.memory_type_bits
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut memory = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, flags) in memory.memory_types.iter_mut().zip(types) {
            slot.property_flags = *flags;
        }
        memory
    }

    fn requirements(memory_type_bits: u32) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size: 64,
            alignment: 16,
            memory_type_bits,
        }
    }

    #[test]
    fn picks_first_allowed_type_with_the_properties() {
        use vk::MemoryPropertyFlags as F;
        let memory = memory(&[
            F::DEVICE_LOCAL,
            F::HOST_VISIBLE | F::HOST_COHERENT,
            F::DEVICE_LOCAL | F::HOST_VISIBLE | F::HOST_COHERENT,
        ]);

        let host = F::HOST_VISIBLE | F::HOST_COHERENT;
        assert_eq!(memory_type_index(&memory, host, requirements(0b111)).unwrap(), 1);
        assert_eq!(memory_type_index(&memory, host, requirements(0b100)).unwrap(), 2);
        assert_eq!(
            memory_type_index(&memory, F::DEVICE_LOCAL, requirements(0b111)).unwrap(),
            0
        );
    }

    #[test]
    fn fails_when_no_allowed_type_fits() {
        use vk::MemoryPropertyFlags as F;
        let memory = memory(&[F::DEVICE_LOCAL, F::HOST_VISIBLE]);
        assert!(memory_type_index(&memory, F::HOST_VISIBLE, requirements(0b01)).is_err());
    }
}

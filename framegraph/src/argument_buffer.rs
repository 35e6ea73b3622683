//! Argument-buffer / bindless descriptor encoding (component K).
//!
//! Grounded on `bindless_descriptor.rs`'s fixed binding-index table
//! (`UNIFORM_BUFFER_BINDING`, `STORAGE_BUFFER_BINDING`, ...), generalized
//! from "one hard-coded Vulkan layout" to the Vulkan/Metal dual encoding
//! `spec.md` §4.K describes.

use ash::vk;

use crate::handle::Handle;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DescriptorType {
    UniformBuffer,
    StorageBuffer,
    SampledImage,
    StorageImage,
    Sampler,
    AccelerationStructure,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ViewType {
    Buffer,
    Texture1D,
    Texture2D,
    Texture3D,
    TextureCube,
}

/// Per-GPU-family Metal index overrides (Apple Silicon Metal 3 GPUs number
/// argument-buffer slots differently from macOS-family Metal GPUs).
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct PlatformBindingOverrides {
    pub macos_metal_index: Option<u32>,
    pub apple_silicon_metal_index: Option<u32>,
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct LogicalResourceBinding {
    pub binding: u32,
    pub array_length: u32,
    pub ty: DescriptorType,
    pub view_type: ViewType,
    pub platform_bindings: PlatformBindingOverrides,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct LogicalDescriptorSet {
    pub stages: vk::ShaderStageFlags,
    pub resources: Vec<LogicalResourceBinding>,
}

/// Compatibility heuristic for set reuse (§4.K): two sets are compatible iff
/// they share at least two resources with an identical
/// `(binding, arrayLength, name, type)`. Treated here as a hard contract
/// (see `DESIGN.md` for why), not a tunable policy.
pub fn sets_compatible(a: &LogicalDescriptorSet, b: &LogicalDescriptorSet) -> bool {
    let matches = a
        .resources
        .iter()
        .filter(|ra| {
            b.resources.iter().any(|rb| {
                ra.binding == rb.binding
                    && ra.array_length == rb.array_length
                    && ra.name == rb.name
                    && ra.ty == rb.ty
            })
        })
        .count();
    matches >= 2
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum GpuFamily {
    Vulkan,
    MetalMacos,
    MetalAppleSilicon,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ResourceBindingPath {
    Vulkan {
        set: u32,
        binding: u32,
        array_index: u32,
    },
    Metal {
        descriptor_set: u32,
        index: u32,
        ty: DescriptorType,
    },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BindingValue {
    pub resource: Handle,
    pub array_index: u32,
}

/// Storage images on Apple-silicon Metal bind directly on the encoder
/// rather than through the argument buffer (§4.K).
pub fn binds_through_argument_buffer(ty: DescriptorType, family: GpuFamily) -> bool {
    !(ty == DescriptorType::StorageImage && family == GpuFamily::MetalAppleSilicon)
}

/// Encode one logical descriptor set's bindings into `(path, value)` pairs
/// for the given backend family and set index.
pub fn encode(
    set_index: u32,
    family: GpuFamily,
    descriptor_set: &LogicalDescriptorSet,
    bound_values: &[(u32, BindingValue)],
) -> Vec<(ResourceBindingPath, BindingValue)> {
    let mut out = Vec::new();
    for &(binding_index, value) in bound_values {
        let Some(resource) = descriptor_set
            .resources
            .iter()
            .find(|r| r.binding == binding_index)
        else {
            continue;
        };
        if !binds_through_argument_buffer(resource.ty, family) {
            continue;
        }
        let path = match family {
            GpuFamily::Vulkan => ResourceBindingPath::Vulkan {
                set: set_index,
                binding: resource.binding,
                array_index: value.array_index,
            },
            GpuFamily::MetalMacos => ResourceBindingPath::Metal {
                descriptor_set: set_index,
                index: resource
                    .platform_bindings
                    .macos_metal_index
                    .unwrap_or(resource.binding),
                ty: resource.ty,
            },
            GpuFamily::MetalAppleSilicon => ResourceBindingPath::Metal {
                descriptor_set: set_index,
                index: resource
                    .platform_bindings
                    .apple_silicon_metal_index
                    .unwrap_or(resource.binding),
                ty: resource.ty,
            },
        };
        out.push((path, value));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(binding: u32, name: &str, ty: DescriptorType) -> LogicalResourceBinding {
        LogicalResourceBinding {
            binding,
            array_length: 1,
            ty,
            view_type: ViewType::Texture2D,
            platform_bindings: PlatformBindingOverrides::default(),
            name: name.to_string(),
        }
    }

    #[test]
    fn compatibility_requires_at_least_two_matching_resources() {
        let a = LogicalDescriptorSet {
            stages: vk::ShaderStageFlags::FRAGMENT,
            resources: vec![
                binding(0, "albedo", DescriptorType::SampledImage),
                binding(1, "normal", DescriptorType::SampledImage),
            ],
        };
        let one_match = LogicalDescriptorSet {
            stages: vk::ShaderStageFlags::FRAGMENT,
            resources: vec![binding(0, "albedo", DescriptorType::SampledImage)],
        };
        assert!(!sets_compatible(&a, &one_match));

        let two_match = LogicalDescriptorSet {
            stages: vk::ShaderStageFlags::FRAGMENT,
            resources: vec![
                binding(0, "albedo", DescriptorType::SampledImage),
                binding(1, "normal", DescriptorType::SampledImage),
            ],
        };
        assert!(sets_compatible(&a, &two_match));
    }

    #[test]
    fn apple_silicon_storage_images_skip_the_argument_buffer() {
        let set = LogicalDescriptorSet {
            stages: vk::ShaderStageFlags::COMPUTE,
            resources: vec![binding(3, "output", DescriptorType::StorageImage)],
        };
        let value = BindingValue {
            resource: Handle::from_raw(1),
            array_index: 0,
        };
        let encoded = encode(0, GpuFamily::MetalAppleSilicon, &set, &[(3, value)]);
        assert!(encoded.is_empty());

        let encoded_macos = encode(0, GpuFamily::MetalMacos, &set, &[(3, value)]);
        assert_eq!(encoded_macos.len(), 1);
    }

    #[test]
    fn vulkan_path_uses_set_binding_array_index() {
        let set = LogicalDescriptorSet {
            stages: vk::ShaderStageFlags::FRAGMENT,
            resources: vec![binding(2, "textures", DescriptorType::SampledImage)],
        };
        let value = BindingValue {
            resource: Handle::from_raw(9),
            array_index: 5,
        };
        let encoded = encode(1, GpuFamily::Vulkan, &set, &[(2, value)]);
        assert_eq!(
            encoded[0].0,
            ResourceBindingPath::Vulkan {
                set: 1,
                binding: 2,
                array_index: 5,
            }
        );
    }
}

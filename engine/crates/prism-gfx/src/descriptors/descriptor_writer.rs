use ash::vk;

use crate::{descriptors::descriptor::GfxDescriptorSet, gfx::Gfx};

enum WriteInfo {
    Image(vk::DescriptorImageInfo),
    Buffer(vk::DescriptorBufferInfo),
}

struct PendingWrite {
    binding: u32,
    descriptor_type: vk::DescriptorType,
    info: WriteInfo,
}

/// 收集一个 set 的所有 binding，最后一次性 update
///
/// ```ignore
/// GfxDescriptorWriter::new()
///     .buffer(0, vk::DescriptorType::STORAGE_BUFFER, buffer, vk::WHOLE_SIZE)
///     .image(1, vk::DescriptorType::STORAGE_IMAGE, view, vk::ImageLayout::GENERAL, None)
///     .update(set);
/// ```
#[derive(Default)]
pub struct GfxDescriptorWriter {
    writes: Vec<PendingWrite>,
}

impl GfxDescriptorWriter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn buffer(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        buffer: vk::Buffer,
        range: vk::DeviceSize,
    ) -> Self {
        self.writes.push(PendingWrite {
            binding,
            descriptor_type,
            info: WriteInfo::Buffer(vk::DescriptorBufferInfo::default().buffer(buffer).offset(0).range(range)),
        });
        self
    }

    #[inline]
    pub fn image(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        view: vk::ImageView,
        layout: vk::ImageLayout,
        sampler: Option<vk::Sampler>,
    ) -> Self {
        self.writes.push(PendingWrite {
            binding,
            descriptor_type,
            info: WriteInfo::Image(
                vk::DescriptorImageInfo::default()
                    .image_view(view)
                    .image_layout(layout)
                    .sampler(sampler.unwrap_or_default()),
            ),
        });
        self
    }

    pub fn update(self, set: GfxDescriptorSet) {
        let writes: Vec<vk::WriteDescriptorSet> = self
            .writes
            .iter()
            .map(|w| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(set.handle())
                    .dst_binding(w.binding)
                    .descriptor_type(w.descriptor_type);
                match &w.info {
                    WriteInfo::Image(info) => write.image_info(std::slice::from_ref(info)),
                    WriteInfo::Buffer(info) => write.buffer_info(std::slice::from_ref(info)),
                }
            })
            .collect();
        unsafe {
            Gfx::get().gfx_device().update_descriptor_sets(&writes, &[]);
        }
    }
}

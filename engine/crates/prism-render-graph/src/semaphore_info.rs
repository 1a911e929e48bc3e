use ash::vk;
use indexmap::IndexMap;

use prism_gfx::commands::semaphore::GfxSemaphore;

/// 外部 semaphore 的等待 / 信号信息
///
/// binary semaphore 的 value 为 None
#[derive(Clone)]
pub struct RgSemaphoreInfo {
    pub semaphore: GfxSemaphore,
    pub stage: vk::PipelineStageFlags2,
    pub value: Option<u64>,
}

impl RgSemaphoreInfo {
    #[inline]
    pub fn binary(semaphore: GfxSemaphore, stage: vk::PipelineStageFlags2) -> Self {
        Self {
            semaphore,
            stage,
            value: None,
        }
    }

    #[inline]
    pub fn timeline(semaphore: GfxSemaphore, stage: vk::PipelineStageFlags2, value: u64) -> Self {
        Self {
            semaphore,
            stage,
            value: Some(value),
        }
    }
}

/// 一个 frame slot 的 "<pass>-done" timeline semaphore 集合
///
/// 每个 pass 名字第一次需要信号时创建，之后每帧复用，
/// signal 的值是帧号 + 1，因此同一个 slot 上单调递增。
#[derive(Default)]
pub struct RgSignalSet {
    debug_prefix: String,
    signals: IndexMap<String, GfxSemaphore>,
}

// new & init
impl RgSignalSet {
    pub fn new(debug_prefix: impl Into<String>) -> Self {
        Self {
            debug_prefix: debug_prefix.into(),
            signals: IndexMap::new(),
        }
    }

    #[inline]
    pub fn signal_name(pass_name: &str) -> String {
        format!("{pass_name}-done")
    }
}

// getters
impl RgSignalSet {
    pub fn get_or_create(&mut self, pass_name: &str) -> anyhow::Result<&GfxSemaphore> {
        let name = Self::signal_name(pass_name);
        if !self.signals.contains_key(&name) {
            let semaphore = GfxSemaphore::new_timeline(0, &format!("{}-{}", self.debug_prefix, name))?;
            self.signals.insert(name.clone(), semaphore);
        }
        Ok(&self.signals[&name])
    }

    #[inline]
    pub fn get(&self, pass_name: &str) -> Option<&GfxSemaphore> {
        self.signals.get(&Self::signal_name(pass_name))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.signals.keys().map(|k| k.as_str())
    }
}

// destroy
impl RgSignalSet {
    pub fn destroy(self) {
        for (_, semaphore) in self.signals {
            semaphore.destroy();
        }
    }
}

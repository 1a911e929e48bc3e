use ash::vk;

use prism_gfx::commands::command_buffer::GfxCommandBuffer;
use prism_gfx::commands::semaphore::GfxSemaphore;

/// 一张可以呈现的图像
#[derive(Clone, Copy, Debug)]
pub struct PresentImage {
    /// 在 present target 中的索引，OIT 目标与 render-complete semaphore 都按它分配
    pub index: usize,
    pub image: vk::Image,
    pub view: vk::ImageView,
}

/// 渲染结果的呈现目标，通常是窗口的 swapchain
///
/// 渲染器只在每帧的开头 acquire、结尾 present，不关心窗口系统
pub trait PresentTarget {
    /// 获取下一张图像，图像可用时 signal `image_acquired`
    ///
    /// 这是每帧的第二个阻塞点
    fn acquire(&mut self, image_acquired: &GfxSemaphore) -> anyhow::Result<PresentImage>;

    /// 等待 `render_complete` 之后呈现
    fn present(&mut self, index: usize, render_complete: &GfxSemaphore) -> anyhow::Result<()>;

    fn image_count(&self) -> usize;

    fn format(&self) -> vk::Format;

    fn extent(&self) -> vk::Extent2D;
}

/// 在合成 pass 的 rendering 范围内追加绘制，例如 UI
pub trait OverlayRenderer {
    fn draw(&self, cmd: &GfxCommandBuffer, extent: vk::Extent2D) -> anyhow::Result<()>;
}

/// 不绘制任何内容
pub struct NoOverlay;
impl OverlayRenderer for NoOverlay {
    #[inline]
    fn draw(&self, _cmd: &GfxCommandBuffer, _extent: vk::Extent2D) -> anyhow::Result<()> {
        Ok(())
    }
}

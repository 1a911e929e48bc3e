/// 帧计数器
///
/// frame id 一直累加；frame slot 是 frame id 在 frames in flight 环上的位置。
pub struct FrameCounter {
    /// 当前的帧序号，一直累加
    frame_id: u64,
    fif_count: usize,
}
// new & init
impl FrameCounter {
    pub fn new(init_frame_id: u64, fif_count: usize) -> Self {
        assert!(fif_count >= 1, "frames in flight must be at least 1");
        Self {
            frame_id: init_frame_id,
            fif_count,
        }
    }
}
// update
impl FrameCounter {
    #[inline]
    pub fn next_frame(&mut self) {
        self.frame_id = self.frame_id.wrapping_add(1);
    }
}
// getters
impl FrameCounter {
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }
    #[inline]
    pub fn fif_count(&self) -> usize {
        self.fif_count
    }
    /// 当前帧使用的 slot 索引
    #[inline]
    pub fn frame_slot(&self) -> usize {
        (self.frame_id % self.fif_count as u64) as usize
    }
    /// slot 的字母标签：A, B, C ...
    #[inline]
    pub fn frame_label(&self) -> char {
        (b'A' + (self.frame_slot() % 26) as u8) as char
    }
    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}{}]", self.frame_id, self.frame_label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_cycles_through_ring() {
        let mut counter = FrameCounter::new(0, 3);
        let slots: Vec<_> = (0..7)
            .map(|_| {
                let slot = counter.frame_slot();
                counter.next_frame();
                slot
            })
            .collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(counter.frame_id(), 7);
    }

    #[test]
    fn test_single_slot() {
        let mut counter = FrameCounter::new(5, 1);
        assert_eq!(counter.frame_slot(), 0);
        counter.next_frame();
        assert_eq!(counter.frame_slot(), 0);
        assert_eq!(counter.frame_name(), "[F6A]");
    }

    #[test]
    #[should_panic]
    fn test_zero_fif_rejected() {
        let _ = FrameCounter::new(0, 0);
    }
}

/// 延迟销毁队列
///
/// 资源在 `retire_frame` 被退役后，GPU 可能仍在使用它；
/// 只有当 `retire_frame + fif_count <= current_frame` 时，所有可能引用它的帧都已经完成。
pub struct RetireQueue<T> {
    pending: Vec<(T, u64)>,
}
impl<T> Default for RetireQueue<T> {
    fn default() -> Self {
        Self { pending: Vec::new() }
    }
}
impl<T> RetireQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn retire(&mut self, item: T, retire_frame: u64) {
        self.pending.push((item, retire_frame));
    }

    /// 取出所有已经过期的资源，保持退役时的顺序
    pub fn drain_expired(&mut self, current_frame: u64, fif_count: u64) -> Vec<T> {
        let (expired, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|(_, retire_frame)| retire_frame + fif_count <= current_frame);
        self.pending = pending;
        expired.into_iter().map(|(item, _)| item).collect()
    }

    /// 取出所有资源，只能在 device idle 之后调用
    pub fn drain_all(&mut self) -> Vec<T> {
        std::mem::take(&mut self.pending).into_iter().map(|(item, _)| item).collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn remove_if(&mut self, mut pred: impl FnMut(&T) -> bool) {
        self.pending.retain(|(item, _)| !pred(item));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_after_in_flight_window() {
        let mut queue = RetireQueue::new();
        queue.retire("gbuffer-normal", 10);
        queue.retire("ao-half", 11);

        // fif = 2：frame 10 退役的资源在 frame 12 开始时才能释放
        assert!(queue.drain_expired(11, 2).is_empty());
        assert_eq!(queue.drain_expired(12, 2), vec!["gbuffer-normal"]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.drain_expired(13, 2), vec!["ao-half"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_single_frame_in_flight() {
        let mut queue = RetireQueue::new();
        queue.retire(1, 4);
        assert!(queue.drain_expired(4, 1).is_empty());
        assert_eq!(queue.drain_expired(5, 1), vec![1]);
    }

    #[test]
    fn test_drain_all_returns_everything() {
        let mut queue = RetireQueue::new();
        for i in 0..5 {
            queue.retire(i, 100 + i);
        }
        assert_eq!(queue.drain_all(), vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }
}

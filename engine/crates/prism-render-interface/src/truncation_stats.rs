/// 容量溢出的统计
///
/// - `lights_dropped`：超过全局点光源上限而被丢弃的光源数
/// - `cluster_overflows`：GPU 上因为 cluster 光源列表已满而丢弃的索引数
/// - `saturated_frames`：发生过任意截断的帧数
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TruncationStats {
    pub lights_dropped: u64,
    pub cluster_overflows: u64,
    pub saturated_frames: u64,
}
impl TruncationStats {
    /// 累加一帧的截断结果，返回这一帧是否发生了截断
    pub fn record_frame(&mut self, frame_id: u64, lights_dropped: u64, cluster_overflows: u64) -> bool {
        if lights_dropped == 0 && cluster_overflows == 0 {
            return false;
        }
        self.lights_dropped += lights_dropped;
        self.cluster_overflows += cluster_overflows;
        self.saturated_frames += 1;
        log::warn!(
            "frame {frame_id} truncated: {lights_dropped} point lights over the global cap, \
             {cluster_overflows} light indices over the per-cluster cap"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_frame_not_counted() {
        let mut stats = TruncationStats::default();
        assert!(!stats.record_frame(0, 0, 0));
        assert_eq!(stats, TruncationStats::default());
    }

    #[test]
    fn test_accumulates_across_frames() {
        let mut stats = TruncationStats::default();
        assert!(stats.record_frame(1, 3, 0));
        assert!(stats.record_frame(2, 0, 1));
        assert_eq!(
            stats,
            TruncationStats {
                lights_dropped: 3,
                cluster_overflows: 1,
                saturated_frames: 2,
            }
        );
    }
}

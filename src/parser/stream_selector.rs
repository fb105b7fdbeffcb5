use crate::common::client::models::video::DashItem;

pub struct StreamSelector;

impl StreamSelector {
    /// 选择不高于目标画质的最高一路视频流；都高于目标时退回最低的一路
    pub fn select_video(streams: &[DashItem], quality: u32) -> Option<&DashItem> {
        streams
            .iter()
            .filter(|s| s.id <= quality)
            .max_by_key(|s| (s.id, s.bandwidth))
            .or_else(|| streams.iter().min_by_key(|s| s.id))
    }

    /// 选择码率最高的音频流
    pub fn select_audio(streams: &[DashItem]) -> Option<&DashItem> {
        streams.iter().max_by_key(|s| s.bandwidth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: u32, bandwidth: u64) -> DashItem {
        DashItem {
            id,
            base_url: format!("https://upos.bilivideo.com/{}-{}.m4s", id, bandwidth),
            backup_url: None,
            bandwidth,
        }
    }

    #[test]
    fn test_select_video_prefers_best_not_above_target() {
        let streams = vec![item(120, 9000), item(80, 3000), item(80, 2000), item(32, 800)];
        let picked = StreamSelector::select_video(&streams, 80).expect("stream");
        assert_eq!((picked.id, picked.bandwidth), (80, 3000));

        let picked = StreamSelector::select_video(&streams, 64).expect("stream");
        assert_eq!(picked.id, 32);
    }

    #[test]
    fn test_select_video_falls_back_to_lowest() {
        let streams = vec![item(120, 9000), item(80, 3000)];
        let picked = StreamSelector::select_video(&streams, 16).expect("stream");
        assert_eq!(picked.id, 80);
        assert!(StreamSelector::select_video(&[], 80).is_none());
    }

    #[test]
    fn test_select_audio_highest_bandwidth() {
        let streams = vec![item(30216, 67000), item(30280, 192000), item(30232, 132000)];
        assert_eq!(StreamSelector::select_audio(&streams).expect("audio").id, 30280);
    }
}

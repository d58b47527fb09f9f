// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 编码帧广播 (处理线程 → N 个 HTTP 观众)

use bytes::Bytes;
use std::sync::{RwLock, RwLockReadGuard};
use tokio::sync::broadcast;

/// JPEG 编码帧
pub type EncodedFrame = Bytes;

/// 每个订阅者独立的有界缓冲, 落后时跳到最新
///
/// `close` 换入新的通道, 旧通道的观众读完缓冲后收到 `Closed`
pub struct FrameHub {
    depth: usize,
    tx: RwLock<broadcast::Sender<EncodedFrame>>,
}

impl FrameHub {
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        let (tx, _rx) = broadcast::channel(depth);
        Self {
            depth,
            tx: RwLock::new(tx),
        }
    }

    fn sender(&self) -> RwLockReadGuard<'_, broadcast::Sender<EncodedFrame>> {
        self.tx.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EncodedFrame> {
        self.sender().subscribe()
    }

    /// 无订阅者时直接丢弃, 返回收到的订阅者数
    pub fn publish(&self, frame: EncodedFrame) -> usize {
        self.sender().send(frame).unwrap_or(0)
    }

    pub fn receiver_count(&self) -> usize {
        self.sender().receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.receiver_count() > 0
    }

    /// 结束当前所有观众的流, 之后的订阅者接到新通道
    pub fn close(&self) -> usize {
        let (fresh, _rx) = broadcast::channel(self.depth);
        let mut tx = self.tx.write().unwrap_or_else(|e| e.into_inner());
        let old = std::mem::replace(&mut *tx, fresh);
        old.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    fn frame(i: u8) -> EncodedFrame {
        Bytes::from(vec![i])
    }

    #[test]
    fn test_publish_without_subscribers() {
        let hub = FrameHub::new(2);
        assert!(!hub.has_subscribers());
        assert_eq!(hub.publish(frame(1)), 0);
    }

    #[test]
    fn test_lagging_consumer_sees_newest_two() {
        let hub = FrameHub::new(2);
        let mut rx = hub.subscribe();
        for i in 0..5 {
            hub.publish(frame(i));
        }
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Lagged(3))));
        assert_eq!(rx.try_recv().unwrap(), frame(3));
        assert_eq!(rx.try_recv().unwrap(), frame(4));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_each_viewer_gets_every_frame() {
        let hub = FrameHub::new(2);
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        assert_eq!(hub.receiver_count(), 2);

        hub.publish(frame(1));
        hub.publish(frame(2));
        for rx in [&mut a, &mut b] {
            assert_eq!(rx.recv().await.unwrap(), frame(1));
            assert_eq!(rx.recv().await.unwrap(), frame(2));
        }

        drop(a);
        assert_eq!(hub.receiver_count(), 1);
        drop(hub);
        assert!(matches!(b.recv().await, Err(RecvError::Closed)));
    }

    #[tokio::test]
    async fn test_close_ends_current_viewers() {
        let hub = FrameHub::new(2);
        let mut old = hub.subscribe();
        hub.publish(frame(1));
        assert_eq!(hub.close(), 1);

        // 缓冲内的帧仍可读完
        assert_eq!(old.recv().await.unwrap(), frame(1));
        assert!(matches!(old.recv().await, Err(RecvError::Closed)));

        assert!(!hub.has_subscribers());
        let mut new = hub.subscribe();
        assert_eq!(hub.publish(frame(2)), 1);
        assert_eq!(new.recv().await.unwrap(), frame(2));
    }
}

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 有界丢旧队列 (采集 → 处理)

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::time::Duration;

/// 满时丢弃最旧元素, 保证消费端拿到最新帧
pub struct DropOldestQueue<T> {
    tx: Sender<T>,
    // 生产端持有一个接收端副本用于淘汰
    evict: Receiver<T>,
}

impl<T> Clone for DropOldestQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            evict: self.evict.clone(),
        }
    }
}

impl<T> DropOldestQueue<T> {
    /// 返回 (生产端, 消费端)
    pub fn new(depth: usize) -> (Self, Receiver<T>) {
        let (tx, rx) = bounded(depth.max(1));
        (
            Self {
                tx,
                evict: rx.clone(),
            },
            rx,
        )
    }

    /// 入队, 返回被丢弃的元素个数
    pub fn push(&self, mut item: T) -> usize {
        let mut dropped = 0;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => return dropped,
                Err(TrySendError::Full(back)) => {
                    item = back;
                    if self.evict.try_recv().is_ok() {
                        dropped += 1;
                    }
                }
                // 生产端自身持有接收端, 不会断开
                Err(TrySendError::Disconnected(_)) => return dropped,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

/// 带超时的出队 (`None` 表示超时或已断开)
pub fn pop_timeout<T>(rx: &Receiver<T>, timeout: Duration) -> Option<T> {
    match rx.recv_timeout(timeout) {
        Ok(item) => Some(item),
        Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_two_keeps_newest() {
        let (queue, rx) = DropOldestQueue::new(2);
        let mut dropped = 0;
        for i in 0..5 {
            dropped += queue.push(i);
        }
        assert_eq!(dropped, 3);
        assert_eq!(queue.len(), 2);

        let got: Vec<i32> = rx.try_iter().collect();
        assert_eq!(got, vec![3, 4]);
    }

    #[test]
    fn test_pop_timeout() {
        let (queue, rx) = DropOldestQueue::new(5);
        assert_eq!(pop_timeout(&rx, Duration::from_millis(10)), None::<u8>);
        queue.push(7u8);
        assert_eq!(pop_timeout(&rx, Duration::from_millis(10)), Some(7));
    }

    #[test]
    fn test_concurrent_producer_consumer() {
        let (queue, rx) = DropOldestQueue::new(3);
        let producer = std::thread::spawn(move || {
            for i in 0..1000u32 {
                queue.push(i);
            }
        });
        let mut last = None;
        let mut seen = 0;
        while let Some(v) = pop_timeout(&rx, Duration::from_millis(200)) {
            // 顺序不乱
            if let Some(prev) = last {
                assert!(v > prev);
            }
            last = Some(v);
            seen += 1;
        }
        producer.join().unwrap();
        assert!(seen >= 1);
        assert_eq!(last, Some(999));
    }
}

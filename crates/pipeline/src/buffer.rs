//! 최근 패킷 링 버퍼
//!
//! [`RingBuffer`]는 고정 용량의 FIFO입니다. 가득 찬 상태에서 추가하면
//! 가장 오래된 엔트리를 밀어내므로 `len() <= capacity()`가 항상 성립합니다.

use std::collections::VecDeque;

/// 고정 용량 링 버퍼
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    buffer: VecDeque<T>,
    capacity: usize,
    /// 밀려난 엔트리 수 (통계용)
    evicted_count: u64,
}

impl<T: Clone> RingBuffer<T> {
    /// 새 링 버퍼를 생성합니다. 용량 0은 1로 올립니다.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity.min(10_000)),
            capacity,
            evicted_count: 0,
        }
    }

    /// 엔트리를 추가합니다. 가장 오래된 엔트리를 밀어냈으면 `true`를 반환합니다.
    pub fn push(&mut self, item: T) -> bool {
        let evicted = if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
            self.evicted_count += 1;
            true
        } else {
            false
        };
        self.buffer.push_back(item);
        evicted
    }

    /// 내용을 오래된 것부터 최신 순으로 복사해 반환합니다.
    pub fn snapshot(&self) -> Vec<T> {
        self.buffer.iter().cloned().collect()
    }

    /// 가장 최근 엔트리
    pub fn latest(&self) -> Option<&T> {
        self.buffer.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buffer.iter()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evicted_count(&self) -> u64 {
        self.evicted_count
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// 버퍼 사용률을 0.0~1.0 범위로 반환합니다.
    pub fn utilization(&self) -> f64 {
        f64::from(u32::try_from(self.buffer.len()).unwrap_or(u32::MAX))
            / f64::from(u32::try_from(self.capacity).unwrap_or(u32::MAX))
    }
}

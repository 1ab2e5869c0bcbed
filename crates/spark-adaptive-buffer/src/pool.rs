use std::sync::{
    Arc,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};

use bytes::BytesMut;
use spin::Mutex;

use crate::{
    block::{BufferRecycler, PooledBlock, ReclaimedBuffer, ensure_allocatable},
    error::{BufferError, Result},
};

/// `BlockPool` 是自适应分配器消费的池化内存契约。
///
/// # 契约说明（What）
/// - `allocate(min_capacity)` 返回容量不小于 `min_capacity` 的独占块；
/// - 返回的块通过租约引用计数归还，调用方无需显式调用池的释放接口；
/// - 实现必须 `Send + Sync`，允许多个句柄并发租借；
/// - 无法满足请求时返回 [`BufferError::AllocationFailed`]，池内部不做重试。
pub trait BlockPool: Send + Sync + 'static {
    /// 租借一块可写内存。
    fn allocate(&self, min_capacity: usize) -> Result<PooledBlock>;

    /// 释放闲置容量，返回回收的字节数。
    fn shrink_to_fit(&self) -> usize;

    /// 读取统计快照。
    fn statistics(&self) -> PoolStats;
}

/// 池统计快照。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// 池向系统申请过、尚未丢弃的总字节数。
    pub allocated_bytes: usize,
    /// 自由链表中闲置的字节数。
    pub available_bytes: usize,
    /// 仍在外借的租约数。
    pub active_leases: usize,
    /// 自由链表中的块数量。
    pub free_slots: usize,
    /// 自由链表未命中、需要新分配的次数。
    pub misses: u64,
    /// 因超过块上限而拒绝的次数。
    pub failed_acquisitions: u64,
}

/// `SlabBlockPool` 基于自由链表复用 `BytesMut`。
///
/// # 核心机制（How）
/// - `spin::Mutex<Vec<BytesMut>>` 作为自由链表，租借时优先复用容量足够的块；
/// - `PoolMetrics` 以原子计数追踪分配量、闲置量、活跃租约；
/// - 块的回收通过 [`BufferRecycler`] 回调完成，租约结束即回到链表。
///
/// # 契约说明（What）
/// - `max_block_capacity` 同时约束首次分配与后续增长，超过时返回
///   [`BufferError::AllocationFailed`]；默认上限为 `isize::MAX`，即单次分配的理论极限；
/// - 上限以内但系统分配器无法满足的请求同样返回 `AllocationFailed`，不会终止进程。
///
/// # 设计权衡（Trade-offs）
/// - 自旋锁持有时间仅覆盖一次线性扫描，适合块数量有限的场景；
/// - 无法夺回底层内存（仍有别名）时只更新统计，下一次租借重新分配。
#[derive(Clone)]
pub struct SlabBlockPool {
    inner: Arc<PoolInner>,
}

impl Default for SlabBlockPool {
    fn default() -> Self {
        Self::with_max_block_capacity(isize::MAX as usize)
    }
}

impl SlabBlockPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建带块容量上限的池。
    pub fn with_max_block_capacity(limit: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner::new(limit)),
        }
    }

    pub fn max_block_capacity(&self) -> usize {
        self.inner.max_block_capacity
    }
}

impl BlockPool for SlabBlockPool {
    fn allocate(&self, min_capacity: usize) -> Result<PooledBlock> {
        let limit = self.inner.max_block_capacity;
        if min_capacity > limit {
            self.inner
                .metrics
                .failed_acquisitions
                .fetch_add(1, Ordering::Relaxed);
            tracing::warn!(requested = min_capacity, limit, "block allocation refused");
            return Err(BufferError::AllocationFailed {
                requested: min_capacity,
                limit,
            });
        }
        let raw = self.inner.acquire_buffer(min_capacity).inspect_err(|_| {
            self.inner
                .metrics
                .failed_acquisitions
                .fetch_add(1, Ordering::Relaxed);
        })?;
        let recycler: Arc<dyn BufferRecycler> = self.inner.clone();
        Ok(PooledBlock::new(raw, limit, recycler))
    }

    fn shrink_to_fit(&self) -> usize {
        self.inner.shrink_free_list()
    }

    fn statistics(&self) -> PoolStats {
        self.inner.snapshot()
    }
}

struct PoolInner {
    free_list: Mutex<Vec<BytesMut>>,
    metrics: PoolMetrics,
    max_block_capacity: usize,
}

impl PoolInner {
    fn new(max_block_capacity: usize) -> Self {
        Self {
            free_list: Mutex::new(Vec::new()),
            metrics: PoolMetrics::default(),
            max_block_capacity,
        }
    }

    fn acquire_buffer(&self, min_capacity: usize) -> Result<BytesMut> {
        let reused = {
            let mut list = self.free_list.lock();
            let found = list.iter().position(|buf| buf.capacity() >= min_capacity);
            found.map(|index| list.swap_remove(index))
        };

        let mut buffer = match reused {
            Some(buf) => {
                self.metrics.decrease_available(buf.capacity());
                tracing::trace!(min_capacity, capacity = buf.capacity(), "free list hit");
                buf
            }
            None => {
                ensure_allocatable(min_capacity, self.max_block_capacity)?;
                let buf = BytesMut::with_capacity(min_capacity);
                self.metrics.increase_on_new_allocation(buf.capacity());
                tracing::trace!(min_capacity, "free list miss");
                buf
            }
        };
        buffer.clear();
        self.metrics.active_leases.fetch_add(1, Ordering::Relaxed);
        Ok(buffer)
    }

    fn shrink_free_list(&self) -> usize {
        let mut list = self.free_list.lock();
        let reclaimed: usize = list.iter().map(BytesMut::capacity).sum();
        list.clear();
        self.metrics.decrease_available(reclaimed);
        self.metrics.decrease_on_loss(reclaimed);
        reclaimed
    }

    fn snapshot(&self) -> PoolStats {
        let free_slots = self.free_list.lock().len();
        PoolStats {
            allocated_bytes: self.metrics.allocated_bytes.load(Ordering::Relaxed),
            available_bytes: self.metrics.available_bytes.load(Ordering::Relaxed),
            active_leases: self.metrics.active_leases.load(Ordering::Relaxed),
            free_slots,
            misses: self.metrics.misses.load(Ordering::Relaxed),
            failed_acquisitions: self.metrics.failed_acquisitions.load(Ordering::Relaxed),
        }
    }
}

impl BufferRecycler for PoolInner {
    fn reclaim(&self, reclaimed: ReclaimedBuffer) {
        saturating_sub(&self.metrics.active_leases, 1);
        let capacity = reclaimed.capacity();
        // 租约期间的扩容同样是向系统申请的内存。
        self.metrics
            .allocated_bytes
            .fetch_add(reclaimed.grown_bytes(), Ordering::Relaxed);
        match reclaimed.into_buffer() {
            Some(mut buf) => {
                buf.clear();
                self.metrics
                    .available_bytes
                    .fetch_add(buf.capacity(), Ordering::Relaxed);
                self.free_list.lock().push(buf);
            }
            None => self.metrics.decrease_on_loss(capacity),
        }
    }
}

#[derive(Default)]
struct PoolMetrics {
    allocated_bytes: AtomicUsize,
    available_bytes: AtomicUsize,
    active_leases: AtomicUsize,
    misses: AtomicU64,
    failed_acquisitions: AtomicU64,
}

impl PoolMetrics {
    fn increase_on_new_allocation(&self, capacity: usize) {
        self.allocated_bytes.fetch_add(capacity, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn decrease_available(&self, capacity: usize) {
        saturating_sub(&self.available_bytes, capacity);
    }

    fn decrease_on_loss(&self, capacity: usize) {
        saturating_sub(&self.allocated_bytes, capacity);
    }
}

fn saturating_sub(target: &AtomicUsize, value: usize) {
    let _ = target.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(current.saturating_sub(value))
    });
}

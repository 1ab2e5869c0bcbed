use std::{
    mem,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use bytes::{Bytes, BytesMut};
use spin::Mutex;

use crate::error::{BufferError, Result};

/// `BufferRecycler` 描述块池在租约结束时的回收入口。
///
/// # 设计初衷（Why）
/// - 池只负责“租借”，块的归还发生在最后一个引用消失的时刻；
///   把回收动作收敛到该 trait，输出缓冲与输入缓冲都不必感知池的具体实现。
///
/// # 契约定义（What）
/// - 每个租约恰好触发一次 `reclaim`；
/// - 实现必须线程安全且不得 panic，`reclaim` 运行在 `Drop` 路径上。
pub trait BufferRecycler: Send + Sync + 'static {
    /// 通知池归还一次租约。
    fn reclaim(&self, reclaimed: ReclaimedBuffer);
}

/// 一次回收动作携带的上下文。
///
/// - `capacity`：租约最终容量，用于池侧统计；
/// - `initial_capacity`：租借时的容量，与 `capacity` 的差值即租约期间的增长；
/// - `buffer`：若成功夺回底层 `BytesMut` 则为 `Some`，仍被别名持有时为 `None`。
#[derive(Debug)]
pub struct ReclaimedBuffer {
    capacity: usize,
    initial_capacity: usize,
    buffer: Option<BytesMut>,
}

impl ReclaimedBuffer {
    pub fn new(capacity: usize, initial_capacity: usize, buffer: Option<BytesMut>) -> Self {
        Self {
            capacity,
            initial_capacity,
            buffer,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 租约期间新增的容量。
    pub fn grown_bytes(&self) -> usize {
        self.capacity.saturating_sub(self.initial_capacity)
    }

    /// 消耗结构并返回可复用的 `BytesMut`。
    pub fn into_buffer(self) -> Option<BytesMut> {
        self.buffer
    }
}

/// `Lease` 是池化块的引用计数锚点。
///
/// 输出缓冲与由其冻结得到的全部输入缓冲共享同一个 `Arc<Lease>`；
/// 最后一个 `Arc` 释放时 `Drop` 将块归还池。
pub(crate) struct Lease {
    recycler: Arc<dyn BufferRecycler>,
    initial_capacity: usize,
    capacity: AtomicUsize,
    buffer: Mutex<Option<BytesMut>>,
}

impl Lease {
    fn new(initial_capacity: usize, recycler: Arc<dyn BufferRecycler>) -> Self {
        Self {
            recycler,
            initial_capacity,
            capacity: AtomicUsize::new(initial_capacity),
            buffer: Mutex::new(None),
        }
    }

    fn update_capacity(&self, new_capacity: usize) {
        self.capacity.store(new_capacity, Ordering::Relaxed);
    }

    /// 暂存可复用的 `BytesMut`，至多保存一次。
    pub(crate) fn store_buffer(&self, buffer: Option<BytesMut>) {
        if let Some(buf) = buffer {
            let mut slot = self.buffer.lock();
            if slot.is_none() {
                *slot = Some(buf);
            }
        }
    }

    /// 尝试从冻结视图夺回可写块，仅在该视图是唯一引用时成功。
    pub(crate) fn store_frozen(&self, bytes: Bytes) {
        if let Ok(mut writable) = bytes.try_into_mut() {
            writable.clear();
            self.store_buffer(Some(writable));
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let capacity = self.capacity.load(Ordering::Relaxed);
        let buffer = self.buffer.lock().take();
        self.recycler
            .reclaim(ReclaimedBuffer::new(capacity, self.initial_capacity, buffer));
    }
}

/// `PooledBlock` 是池交出的一块可写内存。
///
/// # 设计动机（Why）
/// - 输出缓冲需要在“池容量上限”之内按需增长；把上限检查放在块上，
///   扩容失败时块保持原状，调用方看到的永远是一致状态；
/// - 借助 `Lease` 的引用计数，块在冻结为只读视图后仍由同一租约追踪。
///
/// # 契约说明（What）
/// - `len()` 是块自身的写入长度记账；`capacity()` 是当前已分配容量；
/// - `max_capacity()` 是池给出的增长上限，任何使 `len` 超过该值的操作返回
///   [`BufferError::AllocationFailed`] 且不修改内容；
/// - `Drop` 时将 `BytesMut` 交回租约，最终由池复用。
pub struct PooledBlock {
    buf: BytesMut,
    max_capacity: usize,
    lease: Arc<Lease>,
}

impl PooledBlock {
    /// 使用池分配的 `BytesMut` 与回收句柄创建块。
    ///
    /// `inner` 必须为独占所有权的新块；`max_capacity` 小于初始容量时按初始容量处理。
    pub fn new(inner: BytesMut, max_capacity: usize, recycler: Arc<dyn BufferRecycler>) -> Self {
        let capacity = inner.capacity();
        Self {
            lease: Arc::new(Lease::new(capacity, recycler)),
            max_capacity: max_capacity.max(capacity),
            buf: inner,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// 不触发扩容即可写入的字节数。
    pub fn writable_bytes(&self) -> usize {
        self.buf.capacity() - self.buf.len()
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// 确保还能追加 `additional` 字节；超出池上限时返回错误且不改动状态。
    pub fn ensure_writable(&mut self, additional: usize) -> Result<()> {
        let required = self
            .buf
            .len()
            .checked_add(additional)
            .ok_or(BufferError::AllocationFailed {
                requested: usize::MAX,
                limit: self.max_capacity,
            })?;
        if required > self.max_capacity {
            tracing::warn!(
                requested = required,
                limit = self.max_capacity,
                "pooled block growth refused"
            );
            return Err(BufferError::AllocationFailed {
                requested: required,
                limit: self.max_capacity,
            });
        }
        if self.writable_bytes() < additional {
            ensure_allocatable(required, self.max_capacity)?;
            self.buf.reserve(additional);
            self.lease.update_capacity(self.buf.capacity());
        }
        Ok(())
    }

    /// 追加切片。
    pub fn put_slice(&mut self, src: &[u8]) -> Result<()> {
        self.ensure_writable(src.len())?;
        self.buf.extend_from_slice(src);
        Ok(())
    }

    /// 将长度扩展到 `new_len`，新增区间以零填充。
    pub(crate) fn extend_zeroed(&mut self, new_len: usize) -> Result<()> {
        if new_len > self.buf.len() {
            self.ensure_writable(new_len - self.buf.len())?;
            self.buf.resize(new_len, 0);
        }
        Ok(())
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }

    /// 冻结为只读字节与共享租约。
    pub(crate) fn freeze(mut self) -> (Bytes, Arc<Lease>) {
        let frozen = mem::take(&mut self.buf).freeze();
        (frozen, Arc::clone(&self.lease))
    }
}

/// 先用 `try_reserve_exact` 试探系统分配器能否给出 `requested` 字节。
///
/// `BytesMut` 的分配失败会直接终止进程，这里把失败转换为 [`BufferError::AllocationFailed`]。
pub(crate) fn ensure_allocatable(requested: usize, limit: usize) -> Result<()> {
    let mut trial: Vec<u8> = Vec::new();
    trial.try_reserve_exact(requested).map_err(|_| {
        tracing::warn!(requested, limit, "system allocator refused block");
        BufferError::AllocationFailed { requested, limit }
    })
}

impl Drop for PooledBlock {
    fn drop(&mut self) {
        let mut buf = mem::take(&mut self.buf);
        if buf.capacity() > 0 {
            buf.clear();
            self.lease.store_buffer(Some(buf));
        }
    }
}

impl std::fmt::Debug for PooledBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBlock")
            .field("len", &self.buf.len())
            .field("capacity", &self.buf.capacity())
            .field("max_capacity", &self.max_capacity)
            .finish()
    }
}

use std::io;

use bytes::{BufMut, buf::UninitSlice};

use crate::{
    block::PooledBlock,
    error::{BufferError, Result},
    input::InputBuffer,
};

/// 直接区域在块内的位置。
///
/// 区域覆盖 `block[base..base + limit]`，`position` 是区域自己的写游标；
/// 物化时块长度被零填充到 `base + limit`，扩容沿用 `BytesMut` 的整体搬迁，因而区域内已写字节不会丢失。
#[derive(Clone, Copy, Debug)]
struct RegionState {
    base: usize,
    position: usize,
    limit: usize,
}

impl RegionState {
    fn remaining(&self) -> usize {
        self.limit - self.position
    }
}

/// `OutputBuffer` 是可增长的输出缓冲，包装一块池化内存。
///
/// # 设计背景（Why）
/// - 编解码器有两类写法：顺序流式写入，或拿到一段裸内存自行定位写入；
///   两种视图共用同一块内存，避免在序列化后再做一次拷贝；
/// - 预测容量可能偏小，直接区域因此支持在写入中途扩容，并把已写内容整体带到新内存。
///
/// # 契约说明（What）
/// - [`stream_view`](Self::stream_view) 只能构造一次，且必须先于直接区域使用；
/// - [`direct_region`](Self::direct_region) 可以反复调用：剩余空间足够时返回原区域，不够时扩容，
///   游标与已写字节保持不变；
/// - [`size`](Self::size) 取块记账与区域游标的较大者，在任意写入序列下单调不减；
/// - [`bytes_written`](Self::bytes_written) 为块记账加区域游标，即冻结后的可读长度；
/// - [`freeze`](Self::freeze) 消耗缓冲，重复冻结在编译期即被拒绝；
///   预测更新由调用方显式调用 [`SizingHandle::record`](crate::SizingHandle::record) 完成。
///
/// # 风险提示（Trade-offs）
/// - 扩容失败（池上限）时缓冲保持扩容前状态，错误向上传播，不做重试。
#[derive(Debug)]
pub struct OutputBuffer {
    block: PooledBlock,
    written: usize,
    stream_taken: bool,
    region: Option<RegionState>,
}

impl OutputBuffer {
    pub fn new(block: PooledBlock) -> Self {
        let written = block.len();
        Self {
            block,
            written,
            stream_taken: false,
            region: None,
        }
    }

    /// 构造单次使用的流式写视图。
    pub fn stream_view(&mut self) -> Result<StreamWriter<'_>> {
        if self.stream_taken {
            return Err(BufferError::ViewAlreadyTaken { view: "stream" });
        }
        if self.region.is_some() {
            return Err(BufferError::ViewAlreadyTaken {
                view: "direct region",
            });
        }
        self.stream_taken = true;
        Ok(StreamWriter { buffer: self })
    }

    /// 获取至少还能写入 `min_writable` 字节的直接区域。
    ///
    /// `None` 表示以块当前的可写容量作为需求。首次物化时区域覆盖块的全部已分配容量，
    /// 此后块已没有区域之外的可写空间，`None` 即“不要求额外空间”：原样返回现有区域，
    /// 游标与上限都不变。需要更多空间时请传入具体字节数。
    pub fn direct_region(&mut self, min_writable: Option<usize>) -> Result<DirectRegion<'_>> {
        let requested = min_writable.unwrap_or_else(|| self.block.writable_bytes());
        let current = self.region;
        let state = match current {
            None => {
                let base = self.written;
                let limit = self.materialize(base, requested)?;
                RegionState {
                    base,
                    position: 0,
                    limit,
                }
            }
            Some(state) if state.remaining() >= requested => state,
            Some(state) => {
                let needed = state
                    .position
                    .checked_add(requested)
                    .ok_or(BufferError::AllocationFailed {
                        requested: usize::MAX,
                        limit: self.block.max_capacity(),
                    })?;
                let limit = self.materialize(state.base, needed)?;
                tracing::debug!(
                    position = state.position,
                    from = state.limit,
                    to = limit,
                    "direct region grown"
                );
                RegionState { limit, ..state }
            }
        };
        let RegionState { base, limit, .. } = state;
        let position = &mut self.region.insert(state).position;
        let bytes = &mut self.block.as_mut_slice()[base..base + limit];
        Ok(DirectRegion { bytes, position })
    }

    /// 让块在 `base` 之后至少覆盖 `needed` 字节，并返回区域上限。
    ///
    /// 失败时块长度与内容均不变。
    fn materialize(&mut self, base: usize, needed: usize) -> Result<usize> {
        let end = base.checked_add(needed).ok_or(BufferError::AllocationFailed {
            requested: usize::MAX,
            limit: self.block.max_capacity(),
        })?;
        self.block.extend_zeroed(end)?;
        // 一次性把已分配但未使用的容量也纳入区域，减少后续扩容次数。
        let usable = self.block.capacity().min(self.block.max_capacity());
        let limit = usable.saturating_sub(base).max(needed);
        self.block.extend_zeroed(base + limit)?;
        Ok(limit)
    }

    /// 调用方可观测的大小，单调不减。
    pub fn size(&self) -> usize {
        match self.region {
            Some(region) => self.written.max(region.position),
            None => self.written,
        }
    }

    /// 冻结时的实际写入总量。
    pub fn bytes_written(&self) -> usize {
        self.written + self.region.map_or(0, |region| region.position)
    }

    pub fn capacity(&self) -> usize {
        self.block.capacity()
    }

    /// 冻结为只读输入缓冲，块长度推进到 [`bytes_written`](Self::bytes_written)。
    pub fn freeze(self) -> InputBuffer {
        let total = self.bytes_written();
        let OutputBuffer { mut block, .. } = self;
        block.truncate(total);
        let (bytes, lease) = block.freeze();
        InputBuffer::new(bytes, lease)
    }
}

/// 顺序追加的流式写视图，写入超出容量时按池上限增长。
pub struct StreamWriter<'a> {
    buffer: &'a mut OutputBuffer,
}

impl StreamWriter<'_> {
    pub fn put_slice(&mut self, src: &[u8]) -> Result<()> {
        self.buffer.block.put_slice(src)?;
        self.buffer.written = self.buffer.block.len();
        Ok(())
    }

    /// 本视图写入后的块记账长度。
    pub fn written(&self) -> usize {
        self.buffer.written
    }
}

impl io::Write for StreamWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.put_slice(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// 输出缓冲的直接区域视图：一段可按位置寻址的已初始化内存加一个写游标。
///
/// 视图借用所属的 [`OutputBuffer`]；再次调用 `direct_region` 得到的是同一游标。
pub struct DirectRegion<'a> {
    bytes: &'a mut [u8],
    position: &'a mut usize,
}

impl DirectRegion<'_> {
    pub fn position(&self) -> usize {
        *self.position
    }

    /// 区域总长度。
    pub fn limit(&self) -> usize {
        self.bytes.len()
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - *self.position
    }

    pub fn set_position(&mut self, position: usize) -> Result<()> {
        if position > self.bytes.len() {
            return Err(BufferError::OutOfRange {
                op: "set_position",
                requested: position,
                available: self.bytes.len(),
            });
        }
        *self.position = position;
        Ok(())
    }

    /// 游标之前的已写内容。
    pub fn filled(&self) -> &[u8] {
        &self.bytes[..*self.position]
    }

    /// 游标之后的可写内存，写完后配合 [`advance`](Self::advance) 推进游标。
    pub fn unfilled_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[*self.position..]
    }

    pub fn advance(&mut self, len: usize) -> Result<()> {
        let available = self.remaining();
        if len > available {
            return Err(BufferError::OutOfRange {
                op: "advance",
                requested: len,
                available,
            });
        }
        *self.position += len;
        Ok(())
    }

    /// 在游标处写入切片；空间不足时报错，区域不会自行扩容。
    pub fn put_slice(&mut self, src: &[u8]) -> Result<()> {
        let available = self.remaining();
        if src.len() > available {
            return Err(BufferError::OutOfRange {
                op: "put_slice",
                requested: src.len(),
                available,
            });
        }
        let start = *self.position;
        self.bytes[start..start + src.len()].copy_from_slice(src);
        *self.position += src.len();
        Ok(())
    }
}

impl io::Write for DirectRegion<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let len = buf.len().min(self.remaining());
        let start = *self.position;
        self.bytes[start..start + len].copy_from_slice(&buf[..len]);
        *self.position += len;
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// SAFETY: 区域内存在物化时已零填充，`chunk_mut` 只暴露游标之后的已初始化字节，
// `advance_mut` 在推进前校验不越过区域上限。
unsafe impl BufMut for DirectRegion<'_> {
    fn remaining_mut(&self) -> usize {
        self.remaining()
    }

    unsafe fn advance_mut(&mut self, cnt: usize) {
        let available = self.remaining();
        assert!(
            cnt <= available,
            "DirectRegion::advance_mut 超出剩余空间：请求 {cnt}，实际 {available}"
        );
        *self.position += cnt;
    }

    fn chunk_mut(&mut self) -> &mut UninitSlice {
        UninitSlice::new(self.unfilled_mut())
    }
}

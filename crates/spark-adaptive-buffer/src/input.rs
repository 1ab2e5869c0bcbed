use std::{io, sync::Arc};

use bytes::{Buf, Bytes};

use crate::{
    block::Lease,
    error::{BufferError, Result},
};

/// 已构造的视图种类；两种视图都会定位同一块内存，因此同一实例只允许其中一种。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ViewKind {
    Unset,
    Stream,
    Region,
}

struct Shared {
    bytes: Bytes,
    lease: Arc<Lease>,
}

/// `InputBuffer` 是冻结后的只读输入缓冲。
///
/// # 设计背景（Why）
/// - 反序列化端拿到的是输出缓冲冻结后的同一块池化内存，没有额外拷贝；
/// - 块的归还依赖引用计数：显式 [`release`](Self::release) 返回“是否为最后一个引用”，
///   便于调用方确认内存已回到池中；忘记释放时 `Drop` 兜底。
///
/// # 契约说明（What）
/// - [`stream_view`](Self::stream_view) 与 [`direct_region`](Self::direct_region) 都是构造一次的视图：
///   重复请求同种视图返回同一游标 / 同一切片，请求另一种视图返回 [`BufferError::ViewAlreadyTaken`]；
/// - [`size`](Self::size) 为尚未通过流视图读取的字节数，释放后为 0；
/// - 第二次 `release` 以及释放后的任何视图请求都返回 [`BufferError::UseAfterRelease`]，
///   与“仍有其它引用”（`Ok(false)`）严格区分；
/// - [`retain`](Self::retain) 增加一个引用，得到拥有独立视图状态的新实例。
pub struct InputBuffer {
    shared: Option<Shared>,
    cursor: usize,
    view: ViewKind,
}

impl InputBuffer {
    pub(crate) fn new(bytes: Bytes, lease: Arc<Lease>) -> Self {
        Self {
            shared: Some(Shared { bytes, lease }),
            cursor: 0,
            view: ViewKind::Unset,
        }
    }

    fn live(&self, op: &'static str) -> Result<&Shared> {
        self.shared
            .as_ref()
            .ok_or(BufferError::UseAfterRelease { op })
    }

    /// 构造（或取回）流式读视图。
    pub fn stream_view(&mut self) -> Result<StreamReader<'_>> {
        let shared = self
            .shared
            .as_ref()
            .ok_or(BufferError::UseAfterRelease { op: "stream_view" })?;
        if self.view == ViewKind::Region {
            return Err(BufferError::ViewAlreadyTaken {
                view: "direct region",
            });
        }
        self.view = ViewKind::Stream;
        Ok(StreamReader {
            bytes: &shared.bytes,
            cursor: &mut self.cursor,
        })
    }

    /// 构造（或取回）直接区域视图，覆盖全部可读字节。
    pub fn direct_region(&mut self) -> Result<&[u8]> {
        self.live("direct_region")?;
        if self.view == ViewKind::Stream {
            return Err(BufferError::ViewAlreadyTaken { view: "stream" });
        }
        self.view = ViewKind::Region;
        let shared = self.live("direct_region")?;
        Ok(&shared.bytes[..])
    }

    pub fn size(&self) -> usize {
        self.shared
            .as_ref()
            .map_or(0, |shared| shared.bytes.len() - self.cursor)
    }

    /// 当前块的引用数，释放后为 0。
    pub fn ref_count(&self) -> usize {
        self.shared
            .as_ref()
            .map_or(0, |shared| Arc::strong_count(&shared.lease))
    }

    pub fn is_released(&self) -> bool {
        self.shared.is_none()
    }

    /// 为同一块内存增加一个引用。
    pub fn retain(&self) -> Result<InputBuffer> {
        let shared = self.live("retain")?;
        Ok(InputBuffer::new(
            shared.bytes.clone(),
            Arc::clone(&shared.lease),
        ))
    }

    /// 释放本实例持有的引用，返回块是否因此被归还池。
    pub fn release(&mut self) -> Result<bool> {
        let shared = self
            .shared
            .take()
            .ok_or(BufferError::UseAfterRelease { op: "release" })?;
        Ok(release_shared(shared))
    }
}

fn release_shared(shared: Shared) -> bool {
    let Shared { bytes, lease } = shared;
    lease.store_frozen(bytes);
    // `into_inner` 保证并发释放时恰有一方观察到最后一个引用。
    match Arc::into_inner(lease) {
        Some(last) => {
            drop(last);
            true
        }
        None => false,
    }
}

impl Drop for InputBuffer {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            release_shared(shared);
        }
    }
}

impl std::fmt::Debug for InputBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputBuffer")
            .field("size", &self.size())
            .field("released", &self.is_released())
            .field("view", &self.view)
            .finish()
    }
}

/// 输入缓冲的流式读视图，游标保存在所属缓冲中，重复获取得到同一读取进度。
pub struct StreamReader<'a> {
    bytes: &'a Bytes,
    cursor: &'a mut usize,
}

impl Buf for StreamReader<'_> {
    fn remaining(&self) -> usize {
        self.bytes.len() - *self.cursor
    }

    fn chunk(&self) -> &[u8] {
        &self.bytes[*self.cursor..]
    }

    fn advance(&mut self, cnt: usize) {
        let remaining = self.remaining();
        assert!(
            cnt <= remaining,
            "StreamReader::advance 超出剩余可读字节：请求 {cnt}，实际 {remaining}"
        );
        *self.cursor += cnt;
    }
}

impl io::Read for StreamReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len().min(Buf::remaining(self));
        buf[..len].copy_from_slice(&self.chunk()[..len]);
        *self.cursor += len;
        Ok(len)
    }
}

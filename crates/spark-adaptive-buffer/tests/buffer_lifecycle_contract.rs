//! `buffer_lifecycle_contract` 集成测试：聚焦输出缓冲增长与输入缓冲释放的契约。
//!
//! # 测试总览（Why）
//! - 直接区域扩容绝不能丢失或重排已写字节；
//! - `size()` 在任意写入序列下单调不减；
//! - 扩容失败时缓冲保持扩容前的有效状态；
//! - 释放语义区分“最后一个引用”“仍有引用”“释放后访问”三种结果。

use std::io::Write;

use proptest::prelude::*;
use spark_adaptive_buffer::{
    AdaptiveAllocator, AdaptiveConfig, BlockPool, BufferError, OutputBuffer, SlabBlockPool,
};

fn output(pool: &SlabBlockPool, capacity: usize) -> OutputBuffer {
    OutputBuffer::new(pool.allocate(capacity).expect("租借块"))
}

/// 写入 K 字节后以超出容量的请求强制扩容，前 K 字节保持原样。
#[test]
fn region_growth_preserves_written_prefix() {
    let pool = SlabBlockPool::new();
    let mut out = output(&pool, 64);
    let prefix: Vec<u8> = (0..64u8).collect();
    out.direct_region(None)
        .expect("物化区域")
        .put_slice(&prefix)
        .expect("写满初始区域");

    let region = out.direct_region(Some(4096)).expect("强制扩容");
    assert_eq!(region.position(), 64);
    assert!(region.remaining() >= 4096);
    assert_eq!(region.filled(), prefix.as_slice());
}

/// 区域仍有足够空间时原样返回，不触发扩容。
#[test]
fn region_with_room_is_returned_unchanged() {
    let pool = SlabBlockPool::new();
    let mut out = output(&pool, 128);
    let first_limit = {
        let mut region = out.direct_region(Some(16)).expect("区域");
        region.put_slice(b"0123456789").expect("写入");
        region.limit()
    };
    let region = out.direct_region(Some(16)).expect("再次获取");
    assert_eq!(region.limit(), first_limit);
    assert_eq!(region.filled(), b"0123456789");
}

/// 池上限拒绝扩容时，错误向上传播且已写内容完好。
#[test]
fn refused_growth_keeps_pre_growth_state() {
    let pool = SlabBlockPool::with_max_block_capacity(128);
    let mut out = output(&pool, 64);
    out.direct_region(Some(64))
        .expect("区域")
        .put_slice(&[0xAB; 48])
        .expect("写入");
    let size_before = out.size();

    let err = out.direct_region(Some(1024)).err().expect("超过池上限");
    assert!(matches!(err, BufferError::AllocationFailed { limit: 128, .. }));
    assert_eq!(out.size(), size_before);

    let region = out.direct_region(Some(16)).expect("上限以内仍可使用");
    assert_eq!(region.position(), 48);
    assert!(region.filled().iter().all(|&b| b == 0xAB));
}

/// 默认池没有显式上限时，系统分配器无法满足的区域请求同样以错误返回，前缀完好。
#[test]
fn unsatisfiable_region_request_keeps_prefix() {
    let pool = SlabBlockPool::new();
    let mut out = output(&pool, 64);
    out.stream_view()
        .expect("流视图")
        .put_slice(b"head")
        .expect("写入");

    let err = out
        .direct_region(Some(usize::MAX / 2))
        .err()
        .expect("超过单次分配极限");
    assert_eq!(err.code(), "buffer.allocation_failed");
    let err = out
        .direct_region(Some(usize::MAX / 2 - 4))
        .err()
        .expect("系统分配器无法满足");
    assert_eq!(err.code(), "buffer.allocation_failed");
    assert_eq!(out.size(), 4);

    out.direct_region(Some(4))
        .expect("失败后仍可正常物化")
        .put_slice(b"tail")
        .expect("写入区域");
    let mut input = out.freeze();
    assert_eq!(input.direct_region().expect("读取"), b"headtail");
}

/// 流式写入超过池上限时以 `OutOfMemory` 的 io 错误返回。
#[test]
fn stream_write_beyond_limit_is_out_of_memory() {
    let pool = SlabBlockPool::with_max_block_capacity(32);
    let mut out = output(&pool, 16);
    let mut writer = out.stream_view().expect("流视图");
    writer.write_all(&[1u8; 32]).expect("上限以内");
    let err = writer.write_all(&[1u8; 1]).expect_err("超过上限");
    assert_eq!(err.kind(), std::io::ErrorKind::OutOfMemory);
    assert_eq!(writer.written(), 32);
}

/// 完整周期：冻结、共享、逐一释放，最后一个释放者让块回到池中并被下一轮复用。
#[test]
fn full_cycle_returns_block_for_reuse() {
    let pool = SlabBlockPool::new();
    let allocator = AdaptiveAllocator::new(&AdaptiveConfig::default()).expect("默认配置");
    let mut handle = allocator.new_handle();

    let mut out = handle.allocate(&pool).expect("租借");
    out.stream_view()
        .expect("流视图")
        .write_all(b"payload")
        .expect("写入");
    let written = out.bytes_written();
    handle.record(written);
    let mut input = out.freeze();
    let mut shared = input.retain().expect("共享");

    assert_eq!(input.size(), 7);
    assert!(!input.release().expect("还有共享引用"));
    assert!(matches!(
        input.release(),
        Err(BufferError::UseAfterRelease { op: "release" })
    ));
    assert!(shared.release().expect("最后一个引用"));

    let stats = pool.statistics();
    assert_eq!(stats.active_leases, 0);
    assert_eq!(stats.free_slots, 1);

    let _next = handle.allocate(&pool).expect("再次租借");
    assert_eq!(pool.statistics().misses, 1, "第二轮应复用自由链表中的块");
}

/// 未冻结即丢弃的输出缓冲仍会把块还给池。
#[test]
fn abandoned_output_still_returns_block() {
    let pool = SlabBlockPool::new();
    {
        let mut out = output(&pool, 32);
        out.direct_region(None)
            .expect("区域")
            .put_slice(b"abandoned")
            .expect("写入");
    }
    assert_eq!(pool.statistics().active_leases, 0);
    assert_eq!(pool.statistics().free_slots, 1);
}

#[derive(Debug, Clone)]
enum WriteOp {
    Stream(usize),
    Region { hint: Option<usize>, len: usize },
}

fn write_ops() -> impl Strategy<Value = Vec<WriteOp>> {
    let op = prop_oneof![
        (0usize..512).prop_map(WriteOp::Stream),
        (prop::option::of(0usize..1024), 0usize..512)
            .prop_map(|(hint, len)| WriteOp::Region { hint, len }),
    ];
    prop::collection::vec(op, 0..24)
}

proptest! {
    /// 流式写入在前、区域写入在后的任意组合下，`size()` 单调不减，冻结内容与写入一致。
    #[test]
    fn size_is_monotonic_and_content_survives(ops in write_ops()) {
        let pool = SlabBlockPool::new();
        let mut out = output(&pool, 64);
        let mut expected = Vec::new();
        let mut stream_open = true;
        let mut last_size = out.size();

        for (step, op) in ops.into_iter().enumerate() {
            let byte = (step % 251) as u8;
            match op {
                WriteOp::Stream(len) if stream_open => {
                    let chunk = vec![byte; len];
                    out.stream_view().expect("流视图").put_slice(&chunk).expect("流写入");
                    expected.extend_from_slice(&chunk);
                    stream_open = false;
                }
                WriteOp::Stream(_) => continue,
                WriteOp::Region { hint, len } => {
                    stream_open = false;
                    let chunk = vec![byte; len];
                    let request = hint.map(|h| h.max(len));
                    let mut region = out.direct_region(request).expect("区域");
                    if region.remaining() < len {
                        drop(region);
                        region = out.direct_region(Some(len)).expect("扩容");
                    }
                    region.put_slice(&chunk).expect("区域写入");
                    expected.extend_from_slice(&chunk);
                }
            }
            prop_assert!(out.size() >= last_size);
            last_size = out.size();
        }

        prop_assert_eq!(out.bytes_written(), expected.len());
        let mut input = out.freeze();
        prop_assert_eq!(input.direct_region().expect("读取"), expected.as_slice());
    }
}

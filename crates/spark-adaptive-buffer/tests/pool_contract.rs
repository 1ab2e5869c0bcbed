//! `pool_contract` 集成测试：验证 `SlabBlockPool` 在真实调用路径下的契约执行情况。
//!
//! # 测试目标（Why）
//! - 保障块租借、回收、统计等核心流程在 crate 公开 API 下正确协作；
//! - 多个句柄并发共享同一个池时，统计最终收敛、块不泄漏。

use std::{sync::Arc, thread};

use bytes::BytesMut;
use spark_adaptive_buffer::{
    AdaptiveAllocator, AdaptiveConfig, BlockPool, BufferRecycler, PooledBlock, ReclaimedBuffer,
    SlabBlockPool,
};
use spin::Mutex;

/// 测试探针：记录每次回收的容量与是否夺回底层 `BytesMut`。
#[derive(Default)]
struct RecordingRecycler {
    events: Mutex<Vec<(usize, bool)>>,
}

impl RecordingRecycler {
    fn take_events(&self) -> Vec<(usize, bool)> {
        self.events.lock().drain(..).collect()
    }
}

impl BufferRecycler for RecordingRecycler {
    fn reclaim(&self, reclaimed: ReclaimedBuffer) {
        let capacity = reclaimed.capacity();
        let had_buffer = reclaimed.into_buffer().is_some();
        self.events.lock().push((capacity, had_buffer));
    }
}

/// 冻结后的块在最后一个输入缓冲释放时才回收一次。
#[test]
fn lease_is_reclaimed_once_after_last_reference() {
    let recycler = Arc::new(RecordingRecycler::default());
    let mut out = spark_adaptive_buffer::OutputBuffer::new(PooledBlock::new(
        BytesMut::with_capacity(16),
        1024,
        recycler.clone(),
    ));
    out.stream_view()
        .expect("流视图")
        .put_slice(b"abc")
        .expect("写入");
    let mut first = out.freeze();
    let second = first.retain().expect("共享");

    first.release().expect("释放首个引用");
    assert!(recycler.take_events().is_empty(), "仍有引用时不得回收");
    drop(second);
    let events = recycler.take_events();
    assert_eq!(events.len(), 1);
    assert!(events[0].1, "最后一个引用应夺回底层 BytesMut");
}

/// 扩容后的租约容量应反映在回收事件中。
#[test]
fn grown_capacity_is_reported_on_reclaim() {
    let recycler = Arc::new(RecordingRecycler::default());
    {
        let mut block = PooledBlock::new(BytesMut::with_capacity(8), 1024, recycler.clone());
        block.put_slice(&[0u8; 100]).expect("增长");
    }
    let events = recycler.take_events();
    assert_eq!(events.len(), 1);
    assert!(events[0].0 >= 100);
}

/// 验证 `shrink_to_fit` 能够释放自由链表缓存并刷新统计。
#[test]
fn shrink_to_fit_releases_cached_blocks() {
    let pool = SlabBlockPool::new();
    let cached_capacity = pool.allocate(48).expect("初次租借").capacity();
    let reclaimed = pool.shrink_to_fit();
    assert!(reclaimed >= cached_capacity);
    let stats = pool.statistics();
    assert_eq!(stats.available_bytes, 0);
    assert_eq!(stats.free_slots, 0);
}

/// 多线程各持一个句柄共享同一个池，结束后没有遗留租约。
#[test]
fn concurrent_handles_share_one_pool() {
    let pool = SlabBlockPool::new();
    let allocator = AdaptiveAllocator::new(&AdaptiveConfig::default()).expect("默认配置");

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let pool = pool.clone();
            let allocator = allocator.clone();
            thread::spawn(move || {
                let mut handle = allocator.new_handle();
                for round in 0..50usize {
                    let mut out = handle.allocate(&pool).expect("租借");
                    let len = (worker + 1) * 100 + round;
                    out.direct_region(Some(len))
                        .expect("区域")
                        .put_slice(&vec![worker as u8; len])
                        .expect("写入");
                    let mut input = handle.complete(out);
                    assert_eq!(input.size(), len);
                    assert!(input.release().expect("释放"));
                }
                handle.next_allocation_size()
            })
        })
        .collect();

    for worker in workers {
        let predicted = worker.join().expect("工作线程不应 panic");
        assert!(predicted >= 128);
    }
    let stats = pool.statistics();
    assert_eq!(stats.active_leases, 0);
    assert!(stats.free_slots >= 1);
}

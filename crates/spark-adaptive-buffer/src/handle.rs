use std::sync::Arc;

use crate::{
    config::AdaptiveConfig,
    error::Result,
    input::InputBuffer,
    output::OutputBuffer,
    pool::BlockPool,
    table::SizeTable,
};

/// 索引游走的步长与迟滞规则，构造后不可变。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizingPolicy {
    pub step_up: usize,
    pub step_down: usize,
    pub shrink_threshold: u32,
    pub initial_index: usize,
    pub min_index: usize,
    pub max_index: usize,
}

/// `AdaptiveAllocator` 持有共享的容量表与策略，负责派生句柄。
///
/// # 设计背景（Why）
/// - 容量表与策略在进程内只构建一次，所有句柄通过 `Arc` 只读共享；
/// - 句柄本身只携带几个整数状态，按连接或按调用方各持一个，创建成本可以忽略。
///
/// # 契约说明（What）
/// - [`AdaptiveAllocator::new`] 在配置非法时立即失败；
/// - `Clone` 只复制 `Arc`，可以安全地跨线程传递。
#[derive(Clone, Debug)]
pub struct AdaptiveAllocator {
    table: Arc<SizeTable>,
    policy: SizingPolicy,
}

impl AdaptiveAllocator {
    pub fn new(config: &AdaptiveConfig) -> Result<Self> {
        let table = SizeTable::new(config)?;
        let policy = SizingPolicy {
            step_up: config.step_up,
            step_down: config.step_down,
            shrink_threshold: config.shrink_threshold,
            initial_index: table.index_of(config.initial_capacity),
            min_index: table.index_of(config.minimum_capacity),
            max_index: table.index_of(config.maximum_capacity),
        };
        Ok(Self {
            table: Arc::new(table),
            policy,
        })
    }

    pub fn table(&self) -> &SizeTable {
        &self.table
    }

    pub fn policy(&self) -> SizingPolicy {
        self.policy
    }

    /// 创建一个从初始预测开始的新句柄。
    pub fn new_handle(&self) -> SizingHandle {
        SizingHandle {
            table: Arc::clone(&self.table),
            policy: self.policy,
            index: self.policy.initial_index,
            oversized_streak: 0,
        }
    }
}

/// `SizingHandle` 根据历史写入量预测下一次缓冲的初始容量。
///
/// # 设计背景（Why）
/// - 预测偏小会迫使输出缓冲在写入中途扩容并整体拷贝，代价远高于预测偏大浪费的内存；
///   因此上调不设迟滞，一次偏小即上调；
/// - 下调要求连续 `shrink_threshold` 次“远小于预测”的观测，
///   避免偶发的小写入把预测拉垮后又立即扩容，形成抖动。
///
/// # 逻辑解析（How）
/// - “远小于”的判据是写入量不超过 `capacity_at(index - step_down - 1)`，即下调后再低一档的容量；
/// - 写入量不小于当前预测时，索引立即上调 `step_up` 档并清零计数；
/// - 其余情况索引不变，计数同样清零，保证迟滞只统计连续观测；
/// - 任何移动都钳制在 `[min_index, max_index]` 内。
///
/// # 契约说明（What）
/// - 单写者：所有变更都需要 `&mut self`，一个句柄同一时刻只服务一条 allocate → write → finalize 链路；
/// - 每个完成的写入应调用且仅调用一次 [`record`](Self::record)，
///   或使用 [`complete`](Self::complete) 一并完成冻结与记录；
/// - 未冻结就丢弃的缓冲只会错过一次预测更新，下一轮自动修正。
#[derive(Clone, Debug)]
pub struct SizingHandle {
    table: Arc<SizeTable>,
    policy: SizingPolicy,
    index: usize,
    oversized_streak: u32,
}

impl SizingHandle {
    /// 下一次分配的预测容量。
    pub fn next_allocation_size(&self) -> usize {
        self.table.capacity_at(self.index)
    }

    /// 从池中租借一块不小于预测容量的块并包装为输出缓冲。
    pub fn allocate(&self, pool: &dyn BlockPool) -> Result<OutputBuffer> {
        let block = pool.allocate(self.next_allocation_size())?;
        Ok(OutputBuffer::new(block))
    }

    /// 记录一次完成写入的实际字节数并调整预测索引。
    pub fn record(&mut self, actual_bytes_written: usize) {
        let before = self.index;
        let shrink_floor = before.saturating_sub(self.policy.step_down.saturating_add(1));

        if actual_bytes_written <= self.table.capacity_at(shrink_floor) {
            self.oversized_streak += 1;
            if self.oversized_streak >= self.policy.shrink_threshold {
                self.index = before
                    .saturating_sub(self.policy.step_down)
                    .max(self.policy.min_index);
                self.oversized_streak = 0;
            }
        } else if actual_bytes_written >= self.table.capacity_at(before) {
            self.index = before
                .saturating_add(self.policy.step_up)
                .min(self.policy.max_index);
            self.oversized_streak = 0;
        } else {
            self.oversized_streak = 0;
        }

        if self.index != before {
            tracing::debug!(
                actual_bytes_written,
                from = self.table.capacity_at(before),
                to = self.table.capacity_at(self.index),
                "adaptive prediction moved"
            );
        }
    }

    /// 冻结输出缓冲并把实际写入量记回句柄。
    pub fn complete(&mut self, output: OutputBuffer) -> InputBuffer {
        self.record(output.bytes_written());
        output.freeze()
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    /// 当前连续“过大”观测次数。
    pub fn oversized_streak(&self) -> u32 {
        self.oversized_streak
    }

    /// 句柄允许游走的索引闭区间。
    pub fn index_bounds(&self) -> (usize, usize) {
        (self.policy.min_index, self.policy.max_index)
    }

    pub fn table(&self) -> &SizeTable {
        &self.table
    }
}

use crate::config::AdaptiveConfig;
use crate::error::Result;

/// `SizeTable` 保存候选缓冲容量的有序序列。
///
/// # 设计背景（Why）
/// - 预测器只在离散档位之间游走，避免每次分配都重新计算容量，也让“上调/下调一步”有明确含义；
/// - 表在进程生命周期内不可变，通过 `Arc` 被所有句柄只读共享，无需任何同步。
///
/// # 契约说明（What）
/// - 序列严格递增；索引 0 对应 `minimum_capacity`，末索引对应 `maximum_capacity`；
/// - [`index_of`](Self::index_of) 以二分查找返回首个不小于目标的索引，超过上界时钳制到末索引；
/// - 构造前会执行 [`AdaptiveConfig::validate`]，非法边界直接返回错误。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SizeTable {
    sizes: Vec<usize>,
}

impl SizeTable {
    /// 根据配置构建容量表。
    pub fn new(config: &AdaptiveConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            sizes: config.capacities().collect(),
        })
    }

    /// 首个容量不小于 `target` 的索引；超过最大值时返回末索引。
    pub fn index_of(&self, target: usize) -> usize {
        self.sizes
            .partition_point(|&size| size < target)
            .min(self.last_index())
    }

    /// 指定索引处的容量，越界索引按末索引处理。
    pub fn capacity_at(&self, index: usize) -> usize {
        self.sizes[index.min(self.last_index())]
    }

    pub fn last_index(&self) -> usize {
        self.sizes.len() - 1
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    pub fn minimum(&self) -> usize {
        self.sizes[0]
    }

    pub fn maximum(&self) -> usize {
        self.sizes[self.last_index()]
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.sizes
    }
}

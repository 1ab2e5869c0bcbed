use serde::Deserialize;

use crate::error::{BufferError, Result};

/// 容量表允许的最多档位数。
pub const MAX_TABLE_ENTRIES: usize = 4096;

/// 容量表的排布方式。
///
/// - `Doubling`：自最小容量起逐项翻倍，末项截断为最大容量；
/// - `Stepped`：在 `until` 之前按 `step` 线性递增，之后翻倍，适合小对象占主导的负载。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TableLayout {
    #[default]
    Doubling,
    Stepped { step: usize, until: usize },
}

/// `AdaptiveConfig` 描述自适应分配器的全部可调参数。
///
/// # 设计背景（Why）
/// - 预测策略的“形状”（快速上调、带迟滞的缓慢下调）是固定的，具体常量则随负载而异，
///   因此全部暴露为配置而非硬编码；
/// - 支持从 TOML 片段加载，缺省键回落到默认值，便于宿主只覆盖关心的字段。
///
/// # 契约说明（What）
/// - `minimum_capacity`：容量表下界，也是分配器交出的最小缓冲；
/// - `initial_capacity`：新句柄的起始预测；
/// - `maximum_capacity`：容量表上界；
/// - `step_up` / `step_down`：单次上调、下调的索引步数；
/// - `shrink_threshold`：触发一次下调所需的连续“过大”观测次数；
/// - **校验**：`0 < minimum < initial <= maximum`，步长与阈值均不得为 0；
///   容量表不得超过 [`MAX_TABLE_ENTRIES`] 档，步长必须小于档位数；
///   违反时构造立即失败，不会延迟到首次分配。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdaptiveConfig {
    pub minimum_capacity: usize,
    pub initial_capacity: usize,
    pub maximum_capacity: usize,
    pub step_up: usize,
    pub step_down: usize,
    pub shrink_threshold: u32,
    pub layout: TableLayout,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            minimum_capacity: 64,
            initial_capacity: 512,
            maximum_capacity: 512 * 1024,
            step_up: 1,
            step_down: 1,
            shrink_threshold: 2,
            layout: TableLayout::Doubling,
        }
    }
}

impl AdaptiveConfig {
    /// 以三元容量边界构造配置，其余字段取默认值。
    pub fn with_bounds(minimum: usize, initial: usize, maximum: usize) -> Self {
        Self {
            minimum_capacity: minimum,
            initial_capacity: initial,
            maximum_capacity: maximum,
            ..Self::default()
        }
    }

    /// 从 TOML 文本解析并校验配置。
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(source).map_err(|err| BufferError::InvalidConfigSource {
                detail: err.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// 校验容量边界与策略参数。
    pub fn validate(&self) -> Result<()> {
        if self.minimum_capacity == 0 {
            return Err(BufferError::invalid_config(
                "minimum_capacity must be positive",
            ));
        }
        if self.initial_capacity <= self.minimum_capacity {
            return Err(BufferError::invalid_config(format!(
                "initial_capacity ({}) must exceed minimum_capacity ({})",
                self.initial_capacity, self.minimum_capacity
            )));
        }
        if self.maximum_capacity < self.initial_capacity {
            return Err(BufferError::invalid_config(format!(
                "maximum_capacity ({}) must not be below initial_capacity ({})",
                self.maximum_capacity, self.initial_capacity
            )));
        }
        if self.step_up == 0 || self.step_down == 0 {
            return Err(BufferError::invalid_config("index steps must be positive"));
        }
        if self.shrink_threshold == 0 {
            return Err(BufferError::invalid_config(
                "shrink_threshold must be positive",
            ));
        }
        if let TableLayout::Stepped { step, until } = self.layout {
            if step == 0 {
                return Err(BufferError::invalid_config("stepped layout needs step > 0"));
            }
            if until < self.minimum_capacity {
                return Err(BufferError::invalid_config(
                    "stepped layout `until` must not be below minimum_capacity",
                ));
            }
        }
        let entries = self.capacities().take(MAX_TABLE_ENTRIES + 1).count();
        if entries > MAX_TABLE_ENTRIES {
            return Err(BufferError::invalid_config(format!(
                "layout produces more than {MAX_TABLE_ENTRIES} table entries"
            )));
        }
        if self.step_up >= entries || self.step_down >= entries {
            return Err(BufferError::invalid_config(format!(
                "index steps must be below the table length ({entries})"
            )));
        }
        Ok(())
    }

    /// 按布局依次产出容量表的各档容量，严格递增，末项为 `maximum_capacity`。
    ///
    /// 调用方需保证 `minimum_capacity > 0` 且分段步长非零，否则序列不会终止。
    pub(crate) fn capacities(&self) -> impl Iterator<Item = usize> {
        let maximum = self.maximum_capacity;
        let layout = self.layout;
        std::iter::successors(Some(self.minimum_capacity), move |&current| {
            if current >= maximum {
                return None;
            }
            let next = match layout {
                TableLayout::Stepped { step, until } if current < until => {
                    current.saturating_add(step).min(until)
                }
                _ => current.saturating_mul(2),
            };
            Some(next.min(maximum))
        })
    }
}

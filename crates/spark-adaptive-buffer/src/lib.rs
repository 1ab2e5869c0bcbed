//! `spark-adaptive-buffer` 根据历史写入量为序列化输出预测缓冲容量。
//!
//! # 模块定位（Why）
//! - 反复序列化到共享缓冲池时，固定的初始容量要么长期偏大（浪费内存、加重缓存压力），
//!   要么长期偏小（写入中途反复扩容拷贝）；
//! - 本 crate 让每条调用链持有一个轻量句柄，按实际写入量在容量表上游走，自动收敛到合适的档位。
//!
//! # 设计概要（How）
//! - [`table`]：不可变的容量表，按配置的上下界几何递增，进程内共享；
//! - [`handle`]：[`AdaptiveAllocator`] 派生 [`SizingHandle`]，采用“快速上调、迟滞下调”的非对称策略；
//! - [`output`]：[`OutputBuffer`] 提供流式写视图与可增长的直接区域视图；
//! - [`input`]：[`InputBuffer`] 是冻结后的只读视图，显式释放并报告是否为最后一个引用；
//! - [`pool`] / [`block`]：`BytesMut` 自由链表池与租约回收，是上述组件消费的池化内存契约。
//!
//! # 使用流程（What）
//! 1. `allocator.new_handle()` 获取句柄，跨多次操作复用；
//! 2. `handle.allocate(&pool)` 得到按预测容量租借的输出缓冲，编解码器写入；
//! 3. `handle.complete(output)`（或 `handle.record(output.bytes_written())` 后 `output.freeze()`）
//!    更新预测并得到输入缓冲；
//! 4. 消费端读取后调用 `input.release()`。

pub mod block;
pub mod config;
pub mod error;
pub mod handle;
pub mod input;
pub mod output;
pub mod pool;
pub mod table;

pub use block::{BufferRecycler, PooledBlock, ReclaimedBuffer};
pub use config::{AdaptiveConfig, MAX_TABLE_ENTRIES, TableLayout};
pub use error::{BufferError, Result};
pub use handle::{AdaptiveAllocator, SizingHandle, SizingPolicy};
pub use input::{InputBuffer, StreamReader};
pub use output::{DirectRegion, OutputBuffer, StreamWriter};
pub use pool::{BlockPool, PoolStats, SlabBlockPool};
pub use table::SizeTable;

//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为自适应缓冲分配链路提供集中定义的错误域，覆盖配置、视图误用、释放后访问、游标越界与分配失败；
//! - 每个变体附带稳定错误码（`buffer.*`），便于日志检索与告警聚合。
//!
//! ## 设计要求（What）
//! - 通过 `thiserror::Error` 派生，兼容 `std::error::Error` 与 `?` 传播；
//! - 错误类型满足 `Send + Sync + 'static`，可跨线程携带；
//! - 本模块不做任何重试，重试策略由池与调用方决定。

use thiserror::Error;

/// 稳定错误码集合，与 [`BufferError::code`] 一一对应。
pub mod codes {
    /// 配置非法（容量边界非单调、步长为零等）。
    pub const INVALID_CONFIG: &str = "buffer.invalid_config";
    /// 配置源无法解析。
    pub const CONFIG_PARSE: &str = "buffer.config_parse";
    /// 单次视图被重复构造，或请求了与已构造视图冲突的视图。
    pub const VIEW_ALREADY_TAKEN: &str = "buffer.view_already_taken";
    /// 只读缓冲已释放后仍被访问。
    pub const USE_AFTER_RELEASE: &str = "buffer.use_after_release";
    /// 池无法满足容量请求。
    pub const ALLOCATION_FAILED: &str = "buffer.allocation_failed";
    /// 游标移动超出视图边界。
    pub const OUT_OF_RANGE: &str = "buffer.out_of_range";
}

/// 自适应缓冲错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：把“编程误用”与“资源不足”区分成独立变体，调用方可以据此决定是修复代码还是降级处理；
/// - **契约 (What)**：
///   - `InvalidConfig` 只会在构造阶段出现，属于致命错误，不应被吞掉；
///   - `AllocationFailed` 出现时，缓冲保持扩容前的有效状态，已写内容不受影响；
///   - `UseAfterRelease` 与“仍有其它引用”严格区分，后者以 `Ok(false)` 表示。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// 配置校验失败。
    #[error("invalid adaptive buffer configuration: {reason}")]
    InvalidConfig { reason: String },

    /// TOML 配置源解析失败。
    #[error("failed to parse adaptive buffer configuration: {detail}")]
    InvalidConfigSource { detail: String },

    /// 视图已被构造（或与已有视图冲突）。
    #[error("{view} view already taken on this buffer")]
    ViewAlreadyTaken { view: &'static str },

    /// 释放后访问。
    #[error("buffer already released; `{op}` is a use-after-release")]
    UseAfterRelease { op: &'static str },

    /// 池拒绝分配或扩容。
    #[error("pool cannot provide {requested} bytes (limit {limit})")]
    AllocationFailed { requested: usize, limit: usize },

    /// 读写游标越界。
    #[error("`{op}` needs {requested} bytes but only {available} remain")]
    OutOfRange {
        op: &'static str,
        requested: usize,
        available: usize,
    },
}

impl BufferError {
    /// 构造配置错误的便捷入口。
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => codes::INVALID_CONFIG,
            Self::InvalidConfigSource { .. } => codes::CONFIG_PARSE,
            Self::ViewAlreadyTaken { .. } => codes::VIEW_ALREADY_TAKEN,
            Self::UseAfterRelease { .. } => codes::USE_AFTER_RELEASE,
            Self::AllocationFailed { .. } => codes::ALLOCATION_FAILED,
            Self::OutOfRange { .. } => codes::OUT_OF_RANGE,
        }
    }

    /// 是否属于调用方编程错误（而非资源问题）。
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Self::ViewAlreadyTaken { .. } | Self::UseAfterRelease { .. } | Self::OutOfRange { .. }
        )
    }
}

impl From<BufferError> for std::io::Error {
    /// 流式视图在 `io::Write`/`io::Read` 边界上需要 `io::Error`。
    fn from(err: BufferError) -> Self {
        let kind = match err {
            BufferError::AllocationFailed { .. } => std::io::ErrorKind::OutOfMemory,
            BufferError::UseAfterRelease { .. } | BufferError::ViewAlreadyTaken { .. } => {
                std::io::ErrorKind::Unsupported
            }
            BufferError::OutOfRange { .. } => std::io::ErrorKind::UnexpectedEof,
            BufferError::InvalidConfig { .. } | BufferError::InvalidConfigSource { .. } => {
                std::io::ErrorKind::InvalidInput
            }
        };
        std::io::Error::new(kind, err)
    }
}

/// crate 内统一的 `Result` 别名。
pub type Result<T, E = BufferError> = core::result::Result<T, E>;

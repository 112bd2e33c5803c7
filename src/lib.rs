//! bee-loop - 自主任务执行控制循环
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、循环状态、组件装配
//! - **env**: 执行环境契约与本地 / 远程实现
//! - **llm**: 模型客户端抽象与实现（OpenAI 兼容 / 脚本化 Mock）
//! - **react**: 动作解析、嵌套状态栈、工具层级策略、事件日志、执行循环
//! - **tools**: 工具注册表、动作分发器与内置工具
//! - **observability**: tracing 初始化

pub mod config;
pub mod core;
pub mod env;
pub mod llm;
pub mod observability;
pub mod react;
pub mod tools;

pub use crate::core::{AgentError, LoopBuilder, Phase, StatusSnapshot, ToolTier};
pub use crate::react::{ExecutionLoop, LoopSettings};

//! DevCook - 编码智能体编排核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、通用重试、运行状态、编排流程、构建器、运行队列
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Scripted）及重试装饰
//! - **memory**: 对话消息类型
//! - **observability**: 日志初始化
//! - **react**: Planner、单步执行、完成检测、迭代控制、辅助代理
//! - **sandbox**: 沙箱能力接口与本地目录实现
//! - **store**: 消息与 Fragment 持久化（SQLite / 内存）
//! - **tools**: terminal / createOrUpdateFiles / readFiles 与执行器

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod sandbox;
pub mod store;
pub mod tools;

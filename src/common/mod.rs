// 公共模块
//
// 上传、下载路径共用的基础设施

pub mod retry;

pub use retry::{RetryExhausted, RetryPolicy};

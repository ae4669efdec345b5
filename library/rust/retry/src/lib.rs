//! rotator-retry: リトライポリシーライブラリ。
//!
//! 指数バックオフ付きリトライと、エラー種別で再試行可否を判定する条件付きリトライを提供する。
//! バックオフ計算 (`RetryConfig::compute_delay`) は単体でも利用でき、
//! コントローラのエラーポリシーで再キュー間隔を求める際にも使用する。

pub mod error;
pub mod policy;
pub mod retry;

pub use error::RetryError;
pub use policy::RetryConfig;
pub use retry::{with_retry, with_retry_if};

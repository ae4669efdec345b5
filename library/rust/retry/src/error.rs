use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("すべてのリトライが失敗しました ({attempts} 回): {last_error}")]
    ExhaustedRetries { attempts: u32, last_error: E },
    #[error("リトライ対象外のエラーです: {0}")]
    NonRetryable(E),
}

impl<E> RetryError<E> {
    /// into_inner は最後に発生した元のエラーを取り出す。
    pub fn into_inner(self) -> E {
        match self {
            RetryError::ExhaustedRetries { last_error, .. } => last_error,
            RetryError::NonRetryable(e) => e,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::ExhaustedRetries { .. })
    }
}

//! Running synchronous filesystem work from async code.

use crate::Result;

/// Run `f` on the blocking pool and wait for it.
pub async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| std::io::Error::other(format!("blocking task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BackupError;

    #[tokio::test]
    async fn test_result_passes_through() {
        assert_eq!(run_blocking(|| Ok(7)).await.unwrap(), 7);
        let err = run_blocking(|| -> Result<()> { Err(BackupError::Interrupted) })
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Interrupted));
    }
}

use std::path::Path;

use async_trait::async_trait;

use crate::error::EngineError;
use crate::render::job::RenderJob;

/// Capability that turns a render job into a media file.
///
/// Implementations write to `output` and report success or a typed failure.
/// They never rename or publish the file; the invoker does that.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Engine name for logs and reports
    fn name(&self) -> &str;

    /// Render `job` into `output`
    async fn render(&self, job: &RenderJob, output: &Path) -> Result<(), EngineError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records calls and replays scripted failures before succeeding
    #[derive(Default)]
    pub(crate) struct FakeEngine {
        calls: AtomicUsize,
        failures: Mutex<Vec<EngineError>>,
        delay: Option<Duration>,
        write_nothing: bool,
        pub(crate) jobs: Mutex<Vec<RenderJob>>,
    }

    impl FakeEngine {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// Fail with these errors, in order, before succeeding
        pub(crate) fn failing(failures: Vec<EngineError>) -> Self {
            let mut failures = failures;
            failures.reverse();
            Self {
                failures: Mutex::new(failures),
                ..Self::default()
            }
        }

        pub(crate) fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        pub(crate) fn silent_success() -> Self {
            Self {
                write_nothing: true,
                ..Self::default()
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RenderEngine for FakeEngine {
        fn name(&self) -> &str {
            "fake"
        }

        async fn render(&self, job: &RenderJob, output: &Path) -> Result<(), EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.jobs.lock().unwrap().push(job.clone());

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let failure = self.failures.lock().unwrap().pop();
            if let Some(error) = failure {
                // Leave a partial file behind like a crashed encoder would
                tokio::fs::write(output, b"partial").await.unwrap();
                return Err(error);
            }

            if !self.write_nothing {
                tokio::fs::write(output, format!("rendered {}", job.pair_id))
                    .await
                    .unwrap();
            }
            Ok(())
        }
    }
}

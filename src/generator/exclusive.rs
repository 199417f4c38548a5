//! One-generation-at-a-time gate for a shared generator.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::debug;

use super::{Generator, RawModelOutput};
use crate::config::GenerationConfig;
use crate::error::Result;
use crate::PipelineError;

/// Wraps a generator so that concurrent callers run one generation at a time.
///
/// A model on a single device can only serve one generation; sharing an
/// `Arc<ExclusiveGenerator<G>>` across tasks queues the rest.
#[derive(Debug)]
pub struct ExclusiveGenerator<G> {
    inner: G,
    permit: Arc<Semaphore>,
}

impl<G: Generator> ExclusiveGenerator<G> {
    pub fn new(inner: G) -> Self {
        Self {
            inner,
            permit: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }
}

#[async_trait]
impl<G: Generator> Generator for ExclusiveGenerator<G> {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<RawModelOutput> {
        let _permit = self
            .permit
            .acquire()
            .await
            .map_err(|_| PipelineError::generation("generator gate closed"))?;
        debug!(generator = self.inner.name(), "acquired generation slot");
        self.inner.generate(prompt, config).await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Stage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Tracks how many generations overlap.
    struct SlowGenerator {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Generator for SlowGenerator {
        async fn generate(&self, _prompt: &str, _config: &GenerationConfig) -> Result<RawModelOutput> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(RawModelOutput::new("{}", 1, 1))
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_generations_do_not_overlap() {
        let gate = Arc::new(ExclusiveGenerator::new(SlowGenerator {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }));
        let config = GenerationConfig::for_stage(Stage::MathValidation);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let gate = gate.clone();
            let config = config.clone();
            handles.push(tokio::spawn(async move {
                gate.generate("p", &config).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(gate.inner().peak.load(Ordering::SeqCst), 1);
        assert_eq!(gate.name(), "slow");
    }
}

use std::sync::Mutex;

use async_trait::async_trait;

/// External collaborator: a zero-argument callable returning one input
/// record per call. May be finite or infinite; the core treats exhaustion
/// (`None`) as end-of-forward-pass, not an error.
#[async_trait]
pub trait InputSampler: Send + Sync {
    async fn next_input(&self) -> Option<String>;
}

/// Draws from a fixed list once, then reports exhaustion. Useful for
/// deterministic tests that need a finite sampler.
pub struct VecInputSampler {
    remaining: Mutex<std::collections::VecDeque<String>>,
}

impl VecInputSampler {
    pub fn new(inputs: Vec<impl Into<String>>) -> Self {
        Self {
            remaining: Mutex::new(inputs.into_iter().map(Into::into).collect()),
        }
    }
}

#[async_trait]
impl InputSampler for VecInputSampler {
    async fn next_input(&self) -> Option<String> {
        self.remaining.lock().expect("sampler mutex poisoned").pop_front()
    }
}

/// Cycles through a fixed list forever, for runs that should never see
/// forward-pass exhaustion.
pub struct CyclicInputSampler {
    inputs: Vec<String>,
    cursor: Mutex<usize>,
}

impl CyclicInputSampler {
    pub fn new(inputs: Vec<impl Into<String>>) -> Self {
        let inputs: Vec<String> = inputs.into_iter().map(Into::into).collect();
        assert!(!inputs.is_empty(), "cyclic sampler requires at least one input");
        Self {
            inputs,
            cursor: Mutex::new(0),
        }
    }
}

#[async_trait]
impl InputSampler for CyclicInputSampler {
    async fn next_input(&self) -> Option<String> {
        let mut cursor = self.cursor.lock().expect("sampler mutex poisoned");
        let input = self.inputs[*cursor % self.inputs.len()].clone();
        *cursor += 1;
        Some(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn vec_sampler_exhausts_after_its_inputs() {
        let sampler = VecInputSampler::new(vec!["a", "b"]);
        assert_eq!(sampler.next_input().await, Some("a".to_string()));
        assert_eq!(sampler.next_input().await, Some("b".to_string()));
        assert_eq!(sampler.next_input().await, None);
    }

    #[tokio::test]
    async fn cyclic_sampler_never_exhausts() {
        let sampler = CyclicInputSampler::new(vec!["a", "b"]);
        let drawn: Vec<String> = futures_join_all(&sampler, 5).await;
        assert_eq!(drawn, vec!["a", "b", "a", "b", "a"]);
    }

    async fn futures_join_all(sampler: &CyclicInputSampler, n: usize) -> Vec<String> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(sampler.next_input().await.expect("infinite sampler"));
        }
        out
    }
}

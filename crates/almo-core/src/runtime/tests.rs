#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::StreamExt;
    use tokio::sync::mpsc;
    use tracing_test::traced_test;

    use crate::api::sampling::SamplingParams;
    use crate::engine::{EchoEngine, EngineError, EngineRequest, EventStream, InferenceEngine};
    use crate::runtime::driver::{DriverConfig, StreamDriver};
    use crate::runtime::monitor::{connection_guard, ConnectionGuard};
    use crate::runtime::sink::{FragmentSink, StreamFrame};
    use crate::runtime::types::{FinishReason, GenerationEvent, GenerationRequest, RequestState, RuntimeError};

    const GUARD: Duration = Duration::from_secs(5);

    // ── Scripted engine ───────────────────────────────────────────────────────

    #[derive(Debug, Clone)]
    enum Step {
        Emit(GenerationEvent),
        Sleep(Duration),
        Fail(&'static str),
        /// Never yield again.
        Hang,
        Panic,
    }

    fn delta(text: &str) -> Step {
        Step::Emit(GenerationEvent::delta(text))
    }

    fn stop(text: &str, prompt: u32, generated: u32) -> Step {
        Step::Emit(GenerationEvent::finished(text, FinishReason::Stop).with_usage(prompt, generated))
    }

    fn sleep_ms(ms: u64) -> Step {
        Step::Sleep(Duration::from_millis(ms))
    }

    /// Counts engine streams that are still alive.
    struct LiveGuard(Arc<AtomicUsize>);

    impl Drop for LiveGuard {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    struct ScriptedEngine {
        scripts: Vec<Vec<Step>>,
        live: Arc<AtomicUsize>,
        started: Arc<AtomicUsize>,
    }

    impl ScriptedEngine {
        fn new(scripts: Vec<Vec<Step>>) -> Arc<Self> {
            Arc::new(Self {
                scripts,
                live: Arc::new(AtomicUsize::new(0)),
                started: Arc::new(AtomicUsize::new(0)),
            })
        }

        fn live(&self) -> usize {
            self.live.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl InferenceEngine for ScriptedEngine {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn generate_stream(&self, request: EngineRequest) -> Result<EventStream, EngineError> {
            let steps: VecDeque<Step> = self
                .scripts
                .get(request.sample_index)
                .cloned()
                .unwrap_or_default()
                .into();
            if matches!(steps.front(), Some(Step::Panic)) {
                panic!("scripted engine panic");
            }
            self.started.fetch_add(1, Ordering::SeqCst);
            self.live.fetch_add(1, Ordering::SeqCst);
            let guard = LiveGuard(Arc::clone(&self.live));

            let stream = futures::stream::unfold((steps, guard), |(mut steps, guard)| async move {
                loop {
                    match steps.pop_front()? {
                        Step::Sleep(d) => tokio::time::sleep(d).await,
                        Step::Emit(event) => return Some((Ok(event), (steps, guard))),
                        Step::Fail(message) => {
                            return Some((Err(EngineError::generation(message)), (steps, guard)));
                        }
                        Step::Hang => std::future::pending::<()>().await,
                        Step::Panic => panic!("scripted engine panic"),
                    }
                }
            });
            Ok(stream.boxed())
        }
    }

    fn driver(engine: Arc<dyn InferenceEngine>) -> StreamDriver {
        StreamDriver::new(
            engine,
            DriverConfig {
                disconnect_poll_interval: Duration::from_millis(5),
            },
        )
    }

    fn request(n: usize) -> GenerationRequest {
        GenerationRequest::new("req-1", "scripted", "a prompt", n, SamplingParams::default())
            .expect("request should be valid")
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<StreamFrame>) -> Vec<StreamFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    fn terminal_indices(frames: &[StreamFrame]) -> Vec<usize> {
        let mut indices: Vec<usize> = frames
            .iter()
            .filter_map(|f| match f {
                StreamFrame::Fragment(resp) if resp.choices[0].finish_reason.is_some() => {
                    Some(resp.choices[0].index)
                }
                _ => None,
            })
            .collect();
        indices.sort_unstable();
        indices
    }

    // ── Request validation ────────────────────────────────────────────────────

    #[test]
    fn invalid_requests_are_rejected_up_front() {
        let zero = GenerationRequest::new("r", "m", "p", 0, SamplingParams::default());
        assert!(matches!(zero, Err(RuntimeError::InvalidRequest { .. })));

        let hot = SamplingParams {
            temperature: 20.0,
            ..SamplingParams::default()
        };
        let bad = GenerationRequest::new("r", "m", "p", 1, hot);
        assert!(matches!(bad, Err(RuntimeError::InvalidRequest { .. })));
    }

    // ── Streaming ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn streamed_request_emits_one_terminal_per_sample_then_done() {
        let engine = ScriptedEngine::new(vec![
            vec![delta("a"), sleep_ms(3), delta("b"), stop("", 2, 2)],
            vec![sleep_ms(1), delta("c"), stop("d", 2, 2)],
            vec![stop("e", 2, 1)],
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::time::timeout(GUARD, driver(engine.clone()).stream(&request(3), tx))
            .await
            .expect("driver should finish")
            .expect("request should complete");

        let frames = drain(&mut rx);
        assert_eq!(frames.last(), Some(&StreamFrame::Done));
        assert_eq!(frames.iter().filter(|f| **f == StreamFrame::Done).count(), 1);
        assert_eq!(terminal_indices(&frames), vec![0, 1, 2]);
        assert_eq!(frames.len(), 6 + 1);
        assert_eq!(engine.live(), 0);
    }

    #[tokio::test]
    async fn single_sample_streams_three_deltas_terminal_and_sentinel() {
        let engine = ScriptedEngine::new(vec![vec![
            delta("one"),
            delta(" two"),
            delta(" three"),
            stop("", 4, 3),
        ]]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        driver(engine).stream(&request(1), tx).await.unwrap();

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 5);
        for frame in &frames[..3] {
            match frame {
                StreamFrame::Fragment(resp) => {
                    assert_eq!(resp.id, "cmpl-req-1");
                    assert_eq!(resp.choices[0].finish_reason, None);
                }
                other => panic!("expected fragment, got {other:?}"),
            }
        }
        match &frames[3] {
            StreamFrame::Fragment(resp) => {
                assert_eq!(resp.choices[0].finish_reason, Some(FinishReason::Stop));
                assert_eq!(resp.usage.map(|u| u.total_tokens), Some(7));
            }
            other => panic!("expected terminal fragment, got {other:?}"),
        }
        assert_eq!(frames[4], StreamFrame::Done);
    }

    #[tokio::test]
    async fn streamed_failure_sends_single_error_and_no_sentinel() {
        let engine = ScriptedEngine::new(vec![
            vec![delta("x"), Step::Hang],
            vec![sleep_ms(5), Step::Fail("gpu on fire")],
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let result = tokio::time::timeout(GUARD, driver(engine.clone()).stream(&request(2), tx))
            .await
            .expect("driver should finish");
        assert!(matches!(result, Err(RuntimeError::SampleFailed { index: 1, .. })));

        let frames = drain(&mut rx);
        let errors = frames
            .iter()
            .filter(|f| matches!(f, StreamFrame::Error { .. }))
            .count();
        assert_eq!(errors, 1);
        assert!(matches!(frames.last(), Some(StreamFrame::Error { .. })));
        assert!(!frames.contains(&StreamFrame::Done));
        assert_eq!(engine.live(), 0, "hung sibling must be torn down");
    }

    #[tokio::test]
    #[traced_test]
    async fn dropped_stream_receiver_aborts_and_stops_all_tasks() {
        let slow: Vec<Step> = (0..200).flat_map(|_| [sleep_ms(2), delta("t")]).collect();
        let engine = ScriptedEngine::new(vec![slow.clone(), slow]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let driver = driver(engine.clone());
        let request = request(2);

        // Run in the test task so the driver's logs land in the test span.
        let client = async move {
            assert!(rx.recv().await.is_some(), "at least one fragment should arrive");
            drop(rx);
        };
        let (result, ()) = tokio::time::timeout(GUARD, async { tokio::join!(driver.stream(&request, tx), client) })
            .await
            .expect("driver should stop");
        assert!(matches!(result, Err(RuntimeError::Aborted { .. })));
        assert_eq!(engine.live(), 0, "no engine stream may outlive the driver");
        assert!(logs_contain("cancelled by user"));
    }

    // ── Batch ─────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn batch_contains_every_index_once_regardless_of_arrival() {
        let engine = ScriptedEngine::new(vec![
            vec![sleep_ms(15), delta("zero"), stop("", 3, 1)],
            vec![sleep_ms(8), stop("one", 3, 1)],
            vec![delta("tw"), stop("o", 3, 2)],
        ]);
        let (_guard, probe) = connection_guard();

        let resp = tokio::time::timeout(GUARD, driver(engine).collect(&request(3), probe))
            .await
            .expect("driver should finish")
            .expect("request should complete");

        let indices: Vec<usize> = resp.choices.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        let texts: Vec<&str> = resp.choices.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["zero", "one", "two"]);
        assert!(resp.choices.iter().all(|c| c.finish_reason == Some(FinishReason::Stop)));
    }

    #[tokio::test]
    async fn batch_usage_ignores_finishing_order() {
        // Sample 1 finishes first, sample 0 last.
        let engine = ScriptedEngine::new(vec![
            vec![sleep_ms(20), stop("late", 3, 1)],
            vec![stop("early", 3, 9)],
        ]);
        let (_guard, probe) = connection_guard();

        let resp = tokio::time::timeout(GUARD, driver(engine).collect(&request(2), probe))
            .await
            .expect("driver should finish")
            .expect("request should complete");

        let usage = resp.usage.expect("usage should be reported");
        assert_eq!((usage.prompt_tokens, usage.completion_tokens, usage.total_tokens), (3, 9, 12));
    }

    #[tokio::test]
    async fn single_sample_batch_uses_terminal_counts() {
        let engine = ScriptedEngine::new(vec![vec![
            delta("one"),
            delta(" two"),
            delta(" three"),
            stop("", 4, 3),
        ]]);
        let (_guard, probe) = connection_guard();

        let resp = driver(engine).collect(&request(1), probe).await.unwrap();
        assert_eq!(resp.choices.len(), 1);
        assert_eq!(resp.choices[0].text, "one two three");
        let usage = resp.usage.expect("usage should be reported");
        assert_eq!((usage.prompt_tokens, usage.completion_tokens, usage.total_tokens), (4, 3, 7));
    }

    #[tokio::test]
    async fn engine_failure_fails_whole_batch() {
        let engine = ScriptedEngine::new(vec![
            vec![delta("fine"), Step::Hang],
            vec![sleep_ms(5), Step::Fail("boom")],
            vec![delta("also fine"), Step::Hang],
        ]);
        let (_guard, probe) = connection_guard();

        let result = tokio::time::timeout(GUARD, driver(engine.clone()).collect(&request(3), probe))
            .await
            .expect("driver should finish");
        match result {
            Err(RuntimeError::SampleFailed { index, source, .. }) => {
                assert_eq!(index, 1);
                assert!(matches!(source, EngineError::Generation { .. }));
            }
            other => panic!("expected sample failure, got {other:?}"),
        }
        assert_eq!(engine.live(), 0);
    }

    #[tokio::test]
    async fn stream_without_finish_reason_is_a_failure() {
        let engine = ScriptedEngine::new(vec![vec![delta("dangling")]]);
        let (_guard, probe) = connection_guard();

        let result = driver(engine).collect(&request(1), probe).await;
        assert!(matches!(
            result,
            Err(RuntimeError::SampleFailed { source: EngineError::Truncated, .. })
        ));
    }

    #[tokio::test]
    async fn panicking_sample_fails_request() {
        let engine = ScriptedEngine::new(vec![vec![delta("ok"), Step::Hang], vec![Step::Panic]]);
        let (_guard, probe) = connection_guard();

        let result = tokio::time::timeout(GUARD, driver(engine.clone()).collect(&request(2), probe))
            .await
            .expect("driver should finish");
        assert!(matches!(
            result,
            Err(RuntimeError::SampleFailed { index: 1, source: EngineError::Panicked { .. }, .. })
        ));
        assert_eq!(engine.live(), 0);
    }

    // ── Disconnect ────────────────────────────────────────────────────────────

    /// Records events and drops the connection guard right after sample
    /// `cut_after`'s terminal event, like a client hanging up.
    struct HangUpSink {
        events: Vec<GenerationEvent>,
        guard: Option<ConnectionGuard>,
        cut_after: usize,
        events_at_hang_up: Option<usize>,
        completed: bool,
    }

    impl FragmentSink for HangUpSink {
        fn emit(&mut self, event: GenerationEvent) -> bool {
            let cut = event.index == self.cut_after && event.is_terminal();
            self.events.push(event);
            if cut {
                self.guard = None;
                self.events_at_hang_up = Some(self.events.len());
            }
            true
        }

        fn complete(&mut self) {
            self.completed = true;
        }
    }

    #[tokio::test]
    async fn disconnect_after_sample_one_aborts_remaining_samples() {
        let engine = ScriptedEngine::new(vec![
            vec![delta("zero"), Step::Hang],
            vec![sleep_ms(10), delta("one"), stop("", 2, 1)],
            vec![delta("two"), Step::Hang],
        ]);
        let (guard, probe) = connection_guard();
        let mut sink = HangUpSink {
            events: Vec::new(),
            guard: Some(guard),
            cut_after: 1,
            events_at_hang_up: None,
            completed: false,
        };

        let state = tokio::time::timeout(GUARD, driver(engine.clone()).drive(&request(3), probe, &mut sink))
            .await
            .expect("monitor should abort the request");

        assert!(matches!(state, RequestState::Aborted));
        assert!(!sink.completed, "no sentinel after an abort");
        assert_eq!(sink.events_at_hang_up, Some(sink.events.len()), "nothing emitted after hang-up");
        assert_eq!(engine.live(), 0, "samples 0 and 2 must be stopped");
    }

    // ── Built-in engine end to end ────────────────────────────────────────────

    #[tokio::test]
    async fn echo_engine_batch_with_logprobs() {
        let engine: Arc<dyn InferenceEngine> = Arc::new(EchoEngine::new("echo"));
        let request = GenerationRequest::new("e2e", "echo", "the quick brown fox", 2, SamplingParams::default())
            .unwrap()
            .with_logprobs(1);
        let (_guard, probe) = connection_guard();

        let resp = driver(engine).collect(&request, probe).await.unwrap();
        assert_eq!(resp.choices.len(), 2);
        for choice in &resp.choices {
            assert_eq!(choice.text, "the quick brown fox");
            let lp = choice.logprobs.as_ref().expect("logprobs requested");
            assert_eq!(lp.tokens.len(), 4);
            assert_eq!(lp.text_offset, vec![0, 3, 9, 15]);
        }
        assert_eq!(resp.usage.map(|u| u.total_tokens), Some(8));
    }
}

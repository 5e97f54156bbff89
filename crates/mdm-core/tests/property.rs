//! Randomized completion orders: every task completes exactly once, the
//! admission cap holds, per-task progress is monotonic and the batch
//! completes once, after all of its tasks.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::{eventually, settings, url, ManualTransport};
use mdm_core::{
    BatchCoordinator, ChannelSink, DownloadEvent, DownloadRequest, Progress, TransferError,
};
use proptest::prelude::*;

/// One step of a run: which running transfer acts, how many progress
/// events it sends first, and whether it succeeds.
#[derive(Debug, Clone)]
struct Step {
    pick: usize,
    progress_events: u8,
    succeed: bool,
}

fn step() -> impl Strategy<Value = Step> {
    (0usize..8, 0u8..4, any::<bool>()).prop_map(|(pick, progress_events, succeed)| Step {
        pick,
        progress_events,
        succeed,
    })
}

fn run(max_parallel: usize, plan: Vec<Step>) -> Result<(), TestCaseError> {
    let dir = tempfile::tempdir().unwrap();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let n = plan.len();

    let events = runtime.block_on(async {
        let transport = ManualTransport::new(dir.path().join("staging"));
        let (sink, mut rx) = ChannelSink::new();
        let coordinator = BatchCoordinator::new(
            settings(dir.path(), max_parallel),
            transport.clone(),
            Arc::new(sink),
        );
        let requests = (0..n)
            .map(|i| DownloadRequest::new(url(&format!("f{i}")), format!("item_{i}")))
            .collect();
        let handle = coordinator.run_batch(requests).unwrap();

        for (finished, step) in plan.iter().enumerate() {
            let expected = (finished + max_parallel).min(n);
            let registry = coordinator.scheduler().registry();
            eventually("admission", || {
                transport.started_count() == expected && registry.len() == n - finished
            })
            .await;
            let running: Vec<_> = transport
                .transfers()
                .into_iter()
                .filter(|t| t.is_started() && registry.contains(t.id))
                .collect();
            assert!(!running.is_empty() && running.len() <= max_parallel);

            let transfer = &running[step.pick % running.len()];
            for k in 1..=u64::from(step.progress_events) {
                transfer.progress(k * 25, Some(100));
            }
            if step.succeed {
                transfer.succeed(b"payload");
            } else {
                transfer.fail(TransferError::Http(500));
            }
        }

        let report = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("batch did not complete")
            .unwrap();
        assert_eq!(report.total, n);
        assert_eq!(report.succeeded, plan.iter().filter(|s| s.succeed).count());
        assert!(coordinator.scheduler().registry().is_empty());
        assert!(coordinator.scheduler().peak_active() <= max_parallel);
        assert_eq!(coordinator.scheduler().active(), 0);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    });

    let mut last_fraction: HashMap<String, f64> = HashMap::new();
    let mut completions: HashMap<String, usize> = HashMap::new();
    let mut batch_completions = 0;
    for event in &events {
        match event {
            DownloadEvent::Progress { name, progress, .. } => {
                prop_assert!(!completions.contains_key(name), "progress after completion");
                prop_assert!(batch_completions == 0);
                let Progress::Fraction(f) = *progress else {
                    return Err(TestCaseError::fail("total size was known"));
                };
                prop_assert!((0.0..=1.0).contains(&f));
                let last = last_fraction.entry(name.clone()).or_insert(0.0);
                prop_assert!(f >= *last);
                *last = f;
            }
            DownloadEvent::Completed { name, .. } => {
                prop_assert!(batch_completions == 0, "task completed after its batch");
                *completions.entry(name.clone()).or_default() += 1;
            }
            DownloadEvent::BatchComplete(_) => batch_completions += 1,
        }
    }
    prop_assert_eq!(batch_completions, 1);
    prop_assert_eq!(completions.len(), n);
    prop_assert!(completions.values().all(|&c| c == 1));
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn every_task_completes_exactly_once(
        max_parallel in 1usize..=4,
        plan in proptest::collection::vec(step(), 0..8),
    ) {
        run(max_parallel, plan)?;
    }
}

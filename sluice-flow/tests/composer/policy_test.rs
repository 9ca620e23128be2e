use crate::helpers::{
    acted_on, journal, scenario_items, FlakyStage, RecordingSink, TestError, TestStage, T1,
};
use sluice_flow::{FailurePolicy, Pipeline, RunOutcome, StageOptions, WorkItem};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[cfg(test)]
mod failure_policy_tests {
    use super::*;

    #[tokio::test]
    async fn it_should_forward_the_original_item_by_default() {
        // Given
        let journal = journal();
        let sink = RecordingSink::default();
        let pipeline = Pipeline::new()
            .prepare(TestStage::new("prepare", &journal))
            .process(TestStage::new("t1", &journal).for_marker(T1).failing_on(1))
            .process(TestStage::new("after", &journal))
            .sink(sink.clone());

        // When
        let report = pipeline.run(scenario_items()).await.unwrap();

        // Then
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert!(!report.is_clean());
        assert_eq!(sink.sorted_numbers(), vec![1, 2, 3]);
        assert_eq!(acted_on(&journal, "after"), vec![1, 2, 3]);
        let t1 = report.stage("t1").unwrap();
        assert_eq!((t1.received, t1.forwarded, t1.failed, t1.dropped), (3, 3, 1, 0));
    }

    #[tokio::test]
    async fn it_should_remove_failed_items_with_drop_policy() {
        // Given
        let journal = journal();
        let sink = RecordingSink::default();
        let pipeline = Pipeline::new()
            .prepare(TestStage::new("prepare", &journal))
            .process_with(
                TestStage::new("t1", &journal).for_marker(T1).failing_on(1),
                StageOptions::new().with_failure_policy(FailurePolicy::Drop),
            )
            .process(TestStage::new("after", &journal))
            .sink(sink.clone());

        // When
        let report = pipeline.run(scenario_items()).await.unwrap();

        // Then
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].item.number, 1);
        assert_eq!(sink.sorted_numbers(), vec![2, 3]);
        assert_eq!(acted_on(&journal, "after"), vec![2, 3]);
        let t1 = report.stage("t1").unwrap();
        assert_eq!((t1.received, t1.forwarded, t1.failed, t1.dropped), (3, 2, 1, 1));
        assert_eq!(report.delivered, 2);
    }

    #[tokio::test]
    async fn it_should_retry_until_the_item_succeeds() {
        // Given
        let calls = Arc::new(AtomicUsize::new(0));
        let sink = RecordingSink::default();
        let pipeline = Pipeline::new()
            .prepare(TestStage::new("prepare", &journal()))
            .process_with(
                FlakyStage {
                    number: 2,
                    failures: 2,
                    calls: Arc::clone(&calls),
                },
                StageOptions::new().with_failure_policy(FailurePolicy::Retry { attempts: 3 }),
            )
            .sink(sink.clone());

        // When
        let report = pipeline.run(scenario_items()).await.unwrap();

        // Then
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(sink.sorted_numbers(), vec![1, 2, 3]);
        let attempts: Vec<usize> = report.errors.iter().map(|record| record.attempt).collect();
        assert_eq!(attempts, vec![1, 2]);
        assert_eq!(report.stage("flaky").unwrap().failed, 0);
    }

    #[tokio::test]
    async fn it_should_drop_the_item_once_retries_are_exhausted() {
        // Given
        let calls = Arc::new(AtomicUsize::new(0));
        let sink = RecordingSink::default();
        let pipeline = Pipeline::new()
            .prepare(TestStage::new("prepare", &journal()))
            .process_with(
                FlakyStage {
                    number: 1,
                    failures: usize::MAX,
                    calls: Arc::clone(&calls),
                },
                StageOptions::new().with_failure_policy(FailurePolicy::Retry { attempts: 2 }),
            )
            .sink(sink.clone());

        // When
        let report = pipeline.run(scenario_items()).await.unwrap();

        // Then
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.errors.len(), 3);
        assert_eq!(sink.sorted_numbers(), vec![2, 3]);
        assert_eq!(report.stage("flaky").unwrap().dropped, 1);
    }

    #[tokio::test]
    async fn it_should_report_sink_failures_without_stopping() {
        // Given
        let reports = Arc::new(AtomicUsize::new(0));
        let reports_clone = Arc::clone(&reports);
        let sink = RecordingSink {
            fail_on: vec![2],
            ..RecordingSink::default()
        };
        let pipeline: Pipeline<WorkItem, TestError> = Pipeline::new()
            .prepare(TestStage::new("prepare", &journal()))
            .sink(sink.clone())
            .on_error(move |_| {
                reports_clone.fetch_add(1, Ordering::SeqCst);
            });

        // When
        let report = pipeline.run(scenario_items()).await.unwrap();

        // Then
        assert_eq!(reports.load(Ordering::SeqCst), 1);
        assert_eq!(report.delivered, 3);
        assert_eq!(report.finalized, 2);
        assert_eq!(report.errors[0].stage, "sink");
        assert_eq!(sink.sorted_numbers(), vec![1, 3]);
    }
}

//! End-to-end tests for the stage controller against a simulated cluster.

mod common;

use std::collections::HashSet;
use std::fs;
use std::time::Duration;

use common::{SimulatedCluster, barcodes, context};
use scvarcall_pipeline::{
    CheckpointStore, PipelineError, Stage, StageController, StageDisposition, StageState,
    WorkItem,
};

fn assert_gates(items: &[WorkItem]) {
    for item in items {
        assert!(item.gates_hold(), "stage gating violated for {}", item.name());
    }
}

#[tokio::test(start_paused = true)]
async fn test_full_run_three_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&dir);
    let cluster = SimulatedCluster::with_listing(barcodes(1200));

    let mut controller = StageController::new(&ctx, &cluster);
    controller.run().await.unwrap();

    for stage in Stage::ALL {
        assert_eq!(controller.state(stage), StageState::Checkpointed);
        assert!(ctx.output_dir.join(format!("checkpoint_{}.json", stage.number())).is_file());
    }

    let registry = controller.registry();
    assert_eq!(registry.len(), 1201);
    assert!(registry.root().unwrap().is_root());

    // 500 + 500 + 200, one directory each.
    for i in 0..3 {
        assert!(ctx.output_dir.join(format!("chunk_{i}")).is_dir());
    }
    assert!(!ctx.output_dir.join("chunk_3").exists());

    let merges = cluster.merges();
    let merge_indices: Vec<_> = merges.iter().map(|m| m.args[2].clone()).collect();
    assert_eq!(merge_indices, vec!["0", "1", "2"]);
    assert_eq!(cluster.queued("cellsplit_").len(), 1200);
    assert_eq!(cluster.queued("Rvarcall_").len(), 1200);

    let items = registry.barcodes();
    assert!(items.iter().all(|item| item.merge.succeeded));
    assert_gates(items);

    let last = &items[1199];
    let chunk_dir = ctx.output_dir.join("chunk_2");
    assert_eq!(last.merge.calls, Some(chunk_dir.join("chunk_2.calls.rds")));
    let trimmed = last.name().strip_suffix("-1").unwrap();
    assert_eq!(
        last.call.calls,
        Some(chunk_dir.join(format!("cell_{trimmed}.calls.rds")))
    );

    // Intermediates are gone, merged results remain.
    assert!(!last.call.calls.as_ref().unwrap().exists());
    assert!(!last.split.bam.as_ref().unwrap().exists());
    assert!(!last.split.job_out.as_ref().unwrap().exists());
    assert!(!last.split.barcode_file.as_ref().unwrap().exists());
    assert!(last.merge.calls.as_ref().unwrap().exists());
}

#[tokio::test(start_paused = true)]
async fn test_split_failures_are_excluded_downstream() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&dir);
    let listing = barcodes(500);
    let failed: HashSet<String> = [listing[17].clone(), listing[301].clone()].into();
    let cluster = SimulatedCluster {
        fail_split: failed.clone(),
        ..SimulatedCluster::with_listing(listing)
    };

    let mut controller = StageController::new(&ctx, &cluster);
    controller.run().await.unwrap();

    assert_eq!(cluster.queued("cellsplit_").len(), 500);
    assert_eq!(cluster.queued("Rvarcall_").len(), 498);
    assert_eq!(cluster.merges().len(), 1);

    let items = controller.registry().barcodes();
    for item in items {
        if failed.contains(item.name()) {
            assert!(!item.split.succeeded);
            assert!(!item.split.indexed);
            assert!(item.call.calls.is_none());
            assert!(item.call.coverage.is_none());
            assert!(!item.merge.succeeded);
            assert!(item.split.job_out.as_ref().unwrap().exists(), "failure report kept");
        } else {
            assert!(item.merge.succeeded);
        }
    }
    assert_gates(items);
}

#[tokio::test(start_paused = true)]
async fn test_call_and_index_failures() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&dir);
    let listing = barcodes(20);
    let cluster = SimulatedCluster {
        fail_index: [listing[3].clone()].into(),
        fail_call: [listing[4].clone()].into(),
        ..SimulatedCluster::with_listing(listing.clone())
    };

    let mut controller = StageController::new(&ctx, &cluster);
    controller.run().await.unwrap();

    let registry = controller.registry();
    let unindexed = registry.get(&listing[3]).unwrap();
    assert!(unindexed.split.succeeded);
    assert!(!unindexed.split.indexed);
    assert!(unindexed.call.job_out.is_none());

    let uncalled = registry.get(&listing[4]).unwrap();
    assert!(uncalled.split.indexed);
    assert!(!uncalled.call.succeeded);
    assert!(!uncalled.merge.succeeded);
    // The split BAM is only removed after a successful call.
    assert!(uncalled.split.bam.as_ref().unwrap().exists());

    assert_eq!(cluster.queued("Rvarcall_").len(), 19);
    assert_gates(registry.barcodes());
}

#[tokio::test(start_paused = true)]
async fn test_resume_reinvokes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&dir);

    let first = SimulatedCluster::with_listing(barcodes(40));
    let mut controller = StageController::new(&ctx, &first);
    controller.run().await.unwrap();
    let after_first = controller.into_registry();
    let checkpoint_before = fs::read(ctx.output_dir.join("checkpoint_8.json")).unwrap();

    let second = SimulatedCluster::with_listing(barcodes(40));
    let mut controller = StageController::new(&ctx, &second);
    for stage in Stage::ALL {
        assert_eq!(
            controller.run_stage(stage).await.unwrap(),
            StageDisposition::Resumed
        );
    }

    assert_eq!(second.job_count(), 0);
    assert_eq!(controller.registry(), &after_first);
    assert_eq!(
        fs::read(ctx.output_dir.join("checkpoint_8.json")).unwrap(),
        checkpoint_before
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_stage_reruns_from_scratch() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&dir);

    let broken = SimulatedCluster {
        reject_merge: true,
        ..SimulatedCluster::with_listing(barcodes(10))
    };
    let mut controller = StageController::new(&ctx, &broken);
    let err = controller.run().await.unwrap_err();
    assert!(matches!(err, PipelineError::SubmissionFailed { .. }));
    assert_eq!(controller.state(Stage::PerCell), StageState::Running);

    let store = CheckpointStore::new(&ctx.output_dir);
    assert!(store.exists(7));
    assert!(!store.exists(8));

    let healthy = SimulatedCluster::with_listing(barcodes(10));
    let mut controller = StageController::new(&ctx, &healthy);
    controller.run().await.unwrap();

    // Only stage 8 ran: no root-item jobs, every cell split again.
    assert!(healthy.jobs().iter().all(|job| !job.args.iter().any(|a| a == "gzip")));
    assert_eq!(healthy.queued("cellsplit_").len(), 10);
    assert_eq!(controller.registry().len(), 11);
    assert!(controller.registry().barcodes().iter().all(|i| i.merge.succeeded));
}

#[tokio::test(start_paused = true)]
async fn test_rerun_retries_items_that_failed_before() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&dir);
    let listing = barcodes(6);
    let retried = listing[2].clone();

    let broken = SimulatedCluster {
        fail_split: [retried.clone()].into(),
        reject_merge: true,
        ..SimulatedCluster::with_listing(listing.clone())
    };
    let mut controller = StageController::new(&ctx, &broken);
    assert!(controller.run().await.is_err());

    let old_report = ctx
        .output_dir
        .join("chunk_0")
        .join(format!("cellsplit_{retried}.o"));
    assert!(fs::read_to_string(&old_report).unwrap().contains("Terminated at"));

    // Reports now arrive well after submission, as on a real cluster.
    let healthy = SimulatedCluster {
        report_delay: Some(Duration::from_secs(10)),
        ..SimulatedCluster::with_listing(listing.clone())
    };
    let mut controller = StageController::new(&ctx, &healthy);
    controller.run().await.unwrap();

    let item = controller.registry().get(&retried).unwrap();
    assert!(item.split.succeeded);
    assert!(item.call.succeeded);
    assert!(item.merge.succeeded);
    assert!(!old_report.exists());
    assert_eq!(healthy.queued("Rvarcall_").len(), 6);
    assert_gates(controller.registry().barcodes());
}

#[tokio::test(start_paused = true)]
async fn test_malformed_barcode_adds_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(&dir);

    let mut listing = barcodes(5);
    listing.push("AAACCTGAGAAACCA-1".to_string());
    let cluster = SimulatedCluster::with_listing(listing);

    let mut controller = StageController::new(&ctx, &cluster);
    let err = controller.run().await.unwrap_err();
    match err {
        PipelineError::MalformedBarcode { actual, expected, line, .. } => {
            assert_eq!(actual, 17);
            assert_eq!(expected, 18);
            assert_eq!(line, 6);
        }
        other => panic!("Expected MalformedBarcode, got: {other:?}"),
    }

    assert_eq!(controller.registry().len(), 1, "no barcode item was added");
    assert!(cluster.queued("cellsplit_").is_empty());
    assert!(!CheckpointStore::new(&ctx.output_dir).exists(8));
}

#[tokio::test(start_paused = true)]
async fn test_poll_deadline_excludes_silent_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = context(&dir);
    ctx.poll.deadline = Some(Duration::from_secs(60));

    let listing = barcodes(8);
    let cluster = SimulatedCluster {
        silent: [listing[2].clone()].into(),
        ..SimulatedCluster::with_listing(listing.clone())
    };

    let mut controller = StageController::new(&ctx, &cluster);
    controller.run().await.unwrap();

    let silent = controller.registry().get(&listing[2]).unwrap();
    assert!(!silent.split.succeeded);
    assert!(silent.call.job_out.is_none());
    assert_eq!(cluster.queued("Rvarcall_").len(), 7);
    assert_gates(controller.registry().barcodes());
}

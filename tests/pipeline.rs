//! End-to-end pipeline tests
//!
//! Submit jobs through the client to a local worker pool and check the
//! assembled output, the job status and the recorded history.

mod common;

use std::sync::Arc;

use common::*;
use framepipe::domain::{EventType, JobState, OperationRequest, OutputFormat, PipelineError};
use framepipe::operations::OperationRegistry;
use serde_json::json;

#[tokio::test]
async fn test_single_frame_identity_is_png() {
    let harness = Harness::with_pool(OperationRegistry::with_builtins());
    let url = harness.serve("still.png", png_of(GREEN));

    let handle = harness
        .client
        .submit(OperationRequest::new("identity", url))
        .await
        .unwrap();
    let result = handle.result().await.unwrap();

    assert_eq!(result.format, OutputFormat::Png);
    assert_eq!(result.frame_count, 1);

    let bytes = result.workspace.retrieve(&result.artifact).await.unwrap();
    assert_eq!(image::guess_format(&bytes).unwrap(), image::ImageFormat::Png);
    assert_eq!(frame_colors(&bytes), vec![GREEN]);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_identity_on_animation_preserves_frames() {
    let harness = Harness::with_pool(OperationRegistry::with_builtins());
    let colors = [RED, GREEN, BLUE];
    let url = harness.serve("rgb.gif", gif_of(&colors));

    let result = harness
        .client
        .submit(OperationRequest::new("identity", url))
        .await
        .unwrap()
        .result()
        .await
        .unwrap();

    assert_eq!(result.format, OutputFormat::Gif);
    assert_eq!(result.frame_count, 3);

    let bytes = result.workspace.retrieve(&result.artifact).await.unwrap();
    let output = framepipe::frames::codec::decode_frames(&bytes).unwrap();
    assert_eq!(output.len(), 3);
    for (frame, color) in output.iter().zip(colors.iter()) {
        assert_eq!(frame, &solid(*color));
    }

    harness.shutdown().await;
}

#[tokio::test]
async fn test_animated_png_source_keeps_every_frame() {
    let harness = Harness::with_pool(OperationRegistry::with_builtins());
    let colors = [BLUE, GREEN, RED];
    let url = harness.serve("rgb.png", apng_of(&colors));

    let result = harness
        .client
        .submit(OperationRequest::new("identity", url))
        .await
        .unwrap()
        .result()
        .await
        .unwrap();

    assert_eq!(result.format, OutputFormat::Gif);
    assert_eq!(result.frame_count, 3);
    let bytes = result.workspace.retrieve(&result.artifact).await.unwrap();
    assert_eq!(frame_colors(&bytes), colors.to_vec());

    harness.shutdown().await;
}

#[tokio::test]
async fn test_worker_creates_job_workspace() {
    let mut harness = Harness::new();
    let url = harness.serve("still.png", png_of(RED));

    let handle = harness
        .client
        .submit(OperationRequest::new("identity", url))
        .await
        .unwrap();
    let workspace = handle.workspace().clone();

    // Nothing on disk until a worker picks the job up
    assert!(!workspace.dir().exists());

    harness.start_pool(OperationRegistry::with_builtins(), worker_options());
    let result = handle.result().await.unwrap();

    assert_eq!(result.workspace, workspace);
    assert!(workspace.contains(&result.artifact).await);
    assert_eq!(history_of(&workspace).await[0].event_type, EventType::JobStarted);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_output_order_survives_random_completion_order() {
    let mut harness = Harness::new();
    let mut options = worker_options();
    options.concurrency = 8;
    harness.start_pool(registry_with(Arc::new(Jitter)), options);

    let colors = palette(12);
    let url = harness.serve("many.gif", gif_of(&colors));

    let result = harness
        .client
        .submit(OperationRequest::new("jitter", url))
        .await
        .unwrap()
        .result()
        .await
        .unwrap();

    let bytes = result.workspace.retrieve(&result.artifact).await.unwrap();
    assert_eq!(frame_colors(&bytes), colors);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_one_to_many_operation_expands_in_order() {
    let harness = Harness::with_pool(OperationRegistry::with_builtins());
    let url = harness.serve("two.gif", gif_of(&[RED, BLUE]));

    let request = OperationRequest::new("huecycle", url).with_args(json!({ "steps": 2 }));
    let result = harness
        .client
        .submit(request)
        .await
        .unwrap()
        .result()
        .await
        .unwrap();

    // Each frame becomes steps + 1 frames, the untouched frame first
    assert_eq!(result.frame_count, 6);
    let bytes = result.workspace.retrieve(&result.artifact).await.unwrap();
    let colors = frame_colors(&bytes);
    assert_eq!(colors.len(), 6);
    assert_eq!(colors[0], RED);
    assert_eq!(colors[3], BLUE);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_failing_frame_fails_job_without_join() {
    let op = FailOnColor::new(RED);
    let harness = Harness::with_pool(registry_with(op.clone()));

    let mut colors = palette(8);
    let failing_frame: usize = rand::random_range(0..colors.len());
    colors[failing_frame] = RED;
    let url = harness.serve("faulty.gif", gif_of(&colors));

    let handle = harness
        .client
        .submit(OperationRequest::new("fail_on_color", url))
        .await
        .unwrap();
    let job_id = handle.job_id();
    let workspace = handle.workspace().clone();

    let err = handle.result().await.unwrap_err();
    assert!(
        matches!(err, PipelineError::Transform { frame, .. } if frame == failing_frame),
        "unexpected error: {:?}",
        err
    );

    // Every frame was attempted, none was joined
    assert_eq!(op.calls(), colors.len());
    let events = history_of(&workspace).await;
    assert_eq!(count_events(&events, EventType::ActivityScheduled, "join"), 0);
    assert_eq!(
        count_events(&events, EventType::ActivityFailed, "transform"),
        1
    );

    let job = harness.client.status(job_id).await.unwrap();
    assert!(matches!(job.state, JobState::Failed { error: PipelineError::Transform { .. } }));
    assert!(job.result.is_none());

    harness.shutdown().await;
}

#[tokio::test]
async fn test_unknown_operation_fails_job() {
    let harness = Harness::with_pool(OperationRegistry::with_builtins());
    let url = harness.serve("still.png", png_of(RED));

    let err = harness
        .client
        .submit(OperationRequest::new("magik", url))
        .await
        .unwrap()
        .result()
        .await
        .unwrap_err();

    assert_eq!(err, PipelineError::UnknownOperation("magik".to_string()));
    harness.shutdown().await;
}

#[tokio::test]
async fn test_invalid_arguments_fail_job() {
    let harness = Harness::with_pool(OperationRegistry::with_builtins());
    let url = harness.serve("still.png", png_of(RED));

    let request = OperationRequest::new("rotate", url).with_args(json!({ "degrees": "left" }));
    let err = harness
        .client
        .submit(request)
        .await
        .unwrap()
        .result()
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::InvalidArguments { ref operation, .. } if operation == "rotate"));
    harness.shutdown().await;
}

#[tokio::test]
async fn test_missing_source_is_fetch_error() {
    let harness = Harness::with_pool(OperationRegistry::with_builtins());

    let handle = harness
        .client
        .submit(OperationRequest::new("identity", "http://images.test/404.png"))
        .await
        .unwrap();
    let workspace = handle.workspace().clone();
    let err = handle.result().await.unwrap_err();

    assert!(matches!(err, PipelineError::Fetch { .. }));
    let events = history_of(&workspace).await;
    assert_eq!(count_events(&events, EventType::ActivityScheduled, "split"), 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_undecodable_source_is_decode_error() {
    let harness = Harness::with_pool(OperationRegistry::with_builtins());
    let url = harness.serve("page.html", b"<html>definitely not a gif</html>".to_vec());

    let err = harness
        .client
        .submit(OperationRequest::new("identity", url))
        .await
        .unwrap()
        .result()
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Decode(_)));
    harness.shutdown().await;
}

#[tokio::test]
async fn test_completed_job_status_and_cleanup() {
    let harness = Harness::with_pool(OperationRegistry::with_builtins());
    let url = harness.serve("two.gif", gif_of(&[RED, GREEN]));

    let handle = harness
        .client
        .submit(OperationRequest::new("invert", url))
        .await
        .unwrap();
    let job_id = handle.job_id();
    let result = handle.result().await.unwrap();

    let job = harness.client.status(job_id).await.unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.frame_count, Some(2));
    assert_eq!(job.frames_transformed, 2);
    assert_eq!(job.result.as_ref().map(|r| &r.artifact), Some(&result.artifact));
    assert_eq!(harness.client.list_jobs().await.unwrap(), vec![job_id]);

    // Caller hands off the bytes, then reclaims the workspace
    let bytes = result.workspace.retrieve(&result.artifact).await.unwrap();
    assert_eq!(frame_colors(&bytes), vec![[0, 255, 255, 255], [255, 0, 255, 255]]);

    result.workspace.cleanup().await.unwrap();
    result.workspace.cleanup().await.unwrap();
    assert!(matches!(
        result.workspace.retrieve(&result.artifact).await,
        Err(PipelineError::ArtifactNotFound(_))
    ));
    assert!(harness.client.status(job_id).await.is_err());

    harness.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_jobs_are_isolated() {
    let harness = Harness::with_pool(OperationRegistry::with_builtins());
    let red = harness.serve("red.png", png_of(RED));
    let blue = harness.serve("blue.png", png_of(BLUE));

    let a = harness
        .client
        .submit(OperationRequest::new("identity", red))
        .await
        .unwrap();
    let b = harness
        .client
        .submit(OperationRequest::new("identity", blue))
        .await
        .unwrap();
    assert_ne!(a.job_id(), b.job_id());

    let (a, b) = tokio::join!(a.result(), b.result());
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_ne!(a.workspace, b.workspace);
    assert!(matches!(
        b.workspace.retrieve(&a.artifact).await,
        Err(PipelineError::ArtifactNotFound(_))
    ));
    assert_eq!(
        frame_colors(&a.workspace.retrieve(&a.artifact).await.unwrap()),
        vec![RED]
    );
    assert_eq!(
        frame_colors(&b.workspace.retrieve(&b.artifact).await.unwrap()),
        vec![BLUE]
    );

    harness.shutdown().await;
}

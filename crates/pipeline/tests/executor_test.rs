mod common;

use std::sync::{Arc, atomic::Ordering};

use anyhow::Result;
use common::*;
use fastvlm_core::{CancellationToken, ErrorKind, ModelComponent};
use fastvlm_pipeline::{InferenceRequest, InferenceResult, LoadState, ModelVariant};

fn load(executor: &mut fastvlm_pipeline::FastVlmExecutor, dir: &std::path::Path) -> bool {
    let mut loaded = None;
    executor.load_model(dir, |ok| loaded = Some(ok));
    loaded.expect("load callback runs synchronously")
}

fn run(executor: &fastvlm_pipeline::FastVlmExecutor, request: &InferenceRequest) -> InferenceResult {
    let mut result = None;
    executor.run_inference(request, |r| result = Some(r));
    result.expect("inference callback runs synchronously")
}

#[test]
fn inference_before_load_fails_fast() {
    let executor = executor(StubLoader::new(vec![IM_END]));
    assert_eq!(executor.state(), LoadState::Uninitialized);

    let result = run(&executor, &InferenceRequest::new("Describe this image."));
    assert!(!result.success);
    assert_eq!(result.error_message, "Model not ready");
    assert_eq!(result.error_kind, Some(ErrorKind::NotReady));
    assert!(result.generated_text.is_empty());
}

#[test]
fn missing_directory_fails_and_allows_retry() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut executor = executor(StubLoader::new(vec![IM_END]));

    assert!(!load(&mut executor, &tmp.path().join("nope")));
    assert_eq!(executor.state(), LoadState::Error);
    assert_eq!(executor.last_error(), Some("Model directory not found"));

    let result = run(&executor, &InferenceRequest::new("Describe this image."));
    assert_eq!(result.error_message, "Model directory not found");

    let dir = write_model_dir(tmp.path(), &MODEL_FILES)?;
    assert!(load(&mut executor, &dir));
    assert_eq!(executor.state(), LoadState::Ready);
    assert_eq!(executor.last_error(), None);
    Ok(())
}

#[test]
fn runtime_failure_is_reported() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let dir = write_model_dir(tmp.path(), &MODEL_FILES)?;
    let mut executor = executor(StubLoader::failing());

    assert!(!load(&mut executor, &dir));
    assert_eq!(executor.last_error(), Some("ONNX Runtime not initialized"));
    Ok(())
}

#[test]
fn missing_model_type_is_reported() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let dir = write_model_dir(tmp.path(), &["vision_encoder.onnx", "embed_tokens.onnx"])?;
    let mut executor = executor(StubLoader::new(vec![IM_END]));

    assert!(!load(&mut executor, &dir));
    assert_eq!(
        executor.last_error(),
        Some("Missing required model type: decoder_model_merged")
    );
    Ok(())
}

#[test]
fn tokenizer_failure_is_reported() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let dir = write_model_dir(tmp.path(), &MODEL_FILES)?;
    std::fs::remove_file(dir.join("vocab.json"))?;
    let mut executor = executor(StubLoader::new(vec![IM_END]));

    assert!(!load(&mut executor, &dir));
    assert_eq!(executor.state(), LoadState::Error);
    assert_eq!(executor.last_error(), Some("Tokenizer loading failed"));
    Ok(())
}

#[test]
fn load_resolves_files_metadata_and_config() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let dir = write_model_dir(tmp.path(), &MODEL_FILES)?;
    let loader = StubLoader::new(vec![IM_END]);
    let initialized = Arc::clone(&loader.initialized);
    let mut executor = executor(loader);

    assert!(load(&mut executor, &dir));
    assert!(load(&mut executor, &dir));
    assert_eq!(initialized.load(Ordering::SeqCst), 2);

    let selected = executor.selected_models().unwrap();
    assert_eq!(
        selected.get(ModelComponent::VisionEncoder).unwrap().variant,
        ModelVariant::Q4
    );
    let config = executor.model_config().unwrap();
    assert_eq!(config.hidden_size, HIDDEN);
    assert_eq!(config.num_hidden_layers, LAYERS);
    let vision = executor.vision_input().unwrap();
    assert_eq!(vision.size.height, IMAGE_SIDE as usize);
    assert_eq!(vision.channels, 3);
    assert_eq!(executor.model_dir(), Some(dir.as_path()));
    Ok(())
}

#[test]
fn immediate_end_of_sequence_succeeds_with_empty_text() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let dir = write_model_dir(tmp.path(), &MODEL_FILES)?;
    let observer = Arc::new(RecordingObserver::default());
    let mut executor = executor(StubLoader::new(vec![IM_END])).with_observer(observer.clone());
    assert!(load(&mut executor, &dir));

    let request = InferenceRequest::new("Describe this image.").with_image(png_bytes(64, 48));
    let result = run(&executor, &request);
    assert!(result.success, "{}", result.error_message);
    assert_eq!(result.generated_text, "");
    assert!(result.error_message.is_empty());
    assert_eq!(result.response_tokens, 0);
    assert_eq!(result.prompt_tokens, 17 - 1 + VISION_TOKENS);

    assert_eq!(
        observer.kinds(),
        vec![
            "model_load_started",
            "model_load_finished",
            "generation_started",
            "generation_finished",
        ]
    );
    Ok(())
}

#[test]
fn request_max_tokens_bounds_generation() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let dir = write_model_dir(tmp.path(), &MODEL_FILES)?;
    let loader = StubLoader::new(vec![HELLO]);
    let decoder_calls = Arc::clone(&loader.decoder_calls);
    let mut executor = executor(loader);
    assert!(load(&mut executor, &dir));

    let request = InferenceRequest::new("Describe this image.")
        .with_image(png_bytes(16, 16))
        .with_max_tokens(4);
    let result = run(&executor, &request);
    assert!(result.success);
    assert_eq!(result.response_tokens, 4);
    assert_eq!(result.generated_text, "hello hello hello hello");
    assert_eq!(decoder_calls.load(Ordering::SeqCst), 4);
    Ok(())
}

#[test]
fn request_without_image_is_rejected_before_decoding() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let dir = write_model_dir(tmp.path(), &MODEL_FILES)?;
    let loader = StubLoader::new(vec![HELLO, IM_END]);
    let decoder_calls = Arc::clone(&loader.decoder_calls);
    let mut executor = executor(loader);
    assert!(load(&mut executor, &dir));

    let result = run(&executor, &InferenceRequest::new("Describe this image."));
    assert!(!result.success);
    assert!(result.generated_text.is_empty());
    assert_eq!(result.error_message, "Invalid input features");
    assert_eq!(result.error_kind, Some(ErrorKind::InvalidInput));
    assert_eq!(decoder_calls.load(Ordering::SeqCst), 0);
    assert_eq!(executor.state(), LoadState::Ready);
    Ok(())
}

#[test]
fn failed_inference_keeps_the_model_ready() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let dir = write_model_dir(tmp.path(), &MODEL_FILES)?;
    let observer = Arc::new(RecordingObserver::default());
    let mut executor = executor(StubLoader::new(vec![IM_END])).with_observer(observer.clone());
    assert!(load(&mut executor, &dir));

    let bad_image = InferenceRequest::new("Describe this image.").with_image(b"not an image".to_vec());
    let result = run(&executor, &bad_image);
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Image));
    assert!(result.error_message.starts_with("Failed to process image data"));

    let two_images = InferenceRequest::new("<image> Describe").with_image(png_bytes(8, 8));
    let result = run(&executor, &two_images);
    assert_eq!(result.error_message, "Incorrect number of <image> tokens");
    assert_eq!(result.error_kind, Some(ErrorKind::InvalidInput));

    assert_eq!(executor.state(), LoadState::Ready);
    let request = InferenceRequest::new("Describe this image.").with_image(png_bytes(8, 8));
    let result = run(&executor, &request);
    assert!(result.success);
    assert!(observer.kinds().contains(&"generation_failed".to_string()));
    Ok(())
}

#[test]
fn cancelled_request_reports_cancellation() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let dir = write_model_dir(tmp.path(), &MODEL_FILES)?;
    let mut executor = executor(StubLoader::new(vec![HELLO]));
    assert!(load(&mut executor, &dir));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let request = InferenceRequest::new("Describe this image.")
        .with_image(png_bytes(8, 8))
        .with_cancellation(cancel);
    let result = run(&executor, &request);
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Cancelled));
    assert_eq!(result.error_message, "Generation cancelled after 0 tokens");
    Ok(())
}

#[test]
fn describe_sessions_lists_every_component() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let dir = write_model_dir(tmp.path(), &MODEL_FILES)?;
    let mut executor = executor(StubLoader::new(vec![IM_END]));
    assert!(executor.describe_sessions().is_err());
    assert!(load(&mut executor, &dir));

    // The stub decoder cannot be described, which surfaces as a backend error.
    let err = executor.describe_sessions().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Backend);
    Ok(())
}

use async_trait::async_trait;
use image::{GenericImageView, Rgba, RgbaImage};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use agent_media::action::{
    Action, ActionContext, ActionRequest, CropOptions, ExtendOptions, GenerateOptions, MediaInput, ResizeOptions,
};
use agent_media::backends::register_all_providers;
use agent_media::config::Config;
use agent_media::provider::{execute_action_with_env, MediaProvider, ProviderRegistry};
use agent_media::result::{ErrorCode, MediaResult};

/// Provider that records nothing and reports a fixed output.
struct Stub {
    name: &'static str,
    actions: &'static [Action],
}

#[async_trait]
impl MediaProvider for Stub {
    fn name(&self) -> &str {
        self.name
    }

    fn supports(&self, action: Action) -> bool {
        self.actions.contains(&action)
    }

    async fn execute(&self, request: &ActionRequest, context: &ActionContext) -> MediaResult {
        MediaResult::success(
            request.action(),
            self.name,
            context.output_dir.join("stub.png"),
            "image/png",
            1,
        )
    }
}

struct Panicking;

#[async_trait]
impl MediaProvider for Panicking {
    fn name(&self) -> &str {
        "panicking"
    }

    fn supports(&self, _action: Action) -> bool {
        true
    }

    async fn execute(&self, _request: &ActionRequest, _context: &ActionContext) -> MediaResult {
        panic!("backend exploded")
    }
}

fn stub_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(Stub {
        name: "local",
        actions: &[Action::Resize, Action::Crop],
    }));
    registry.register(Arc::new(Stub {
        name: "fal",
        actions: &[Action::Generate, Action::Transcribe],
    }));
    registry.register(Arc::new(Stub {
        name: "replicate",
        actions: &[Action::Generate, Action::Upscale],
    }));
    registry
}

fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn generate() -> ActionRequest {
    ActionRequest::Generate(GenerateOptions {
        prompt: "a lighthouse at dusk".to_string(),
        width: None,
        height: None,
        count: 1,
        model: None,
        seed: None,
    })
}

fn resize(input: &MediaInput, width: u32) -> ActionRequest {
    ActionRequest::Resize(ResizeOptions {
        input: input.clone(),
        width: Some(width),
        height: None,
        maintain_aspect_ratio: true,
    })
}

fn json(result: &MediaResult) -> Value {
    serde_json::from_str(&result.to_json_pretty()).unwrap()
}

fn write_png(dir: &Path, name: &str, w: u32, h: u32) -> MediaInput {
    let path = dir.join(name);
    RgbaImage::from_fn(w, h, |x, _| Rgba([(x % 256) as u8, 80, 160, 255]))
        .save(&path)
        .unwrap();
    MediaInput::from_raw(path.to_string_lossy())
}

#[tokio::test]
async fn test_credentials_pick_provider_when_capable() {
    let registry = stub_registry();
    let ctx = ActionContext::new("/tmp/out");

    let result = execute_action_with_env(&registry, &generate(), &ctx, &env(&[("FAL_API_KEY", "k")])).await;
    assert_eq!(result.provider(), Some("fal"));

    let result = execute_action_with_env(
        &registry,
        &generate(),
        &ctx,
        &env(&[("FAL_API_KEY", ""), ("REPLICATE_API_TOKEN", "r")]),
    )
    .await;
    assert_eq!(result.provider(), Some("replicate"));
}

#[tokio::test]
async fn test_credentialed_provider_without_capability_falls_back_to_local() {
    let registry = stub_registry();
    let input = MediaInput::from_raw("photo.png");
    let ctx = ActionContext::new("/tmp/out");

    let result = execute_action_with_env(&registry, &resize(&input, 10), &ctx, &env(&[("FAL_API_KEY", "k")])).await;
    assert_eq!(result.provider(), Some("local"));
}

#[tokio::test]
async fn test_first_capable_provider_without_credentials() {
    let registry = stub_registry();
    let ctx = ActionContext::new("/tmp/out");

    let result = execute_action_with_env(&registry, &generate(), &ctx, &env(&[])).await;
    assert_eq!(result.provider(), Some("fal"));
}

#[tokio::test]
async fn test_explicit_provider_never_falls_through() {
    let registry = stub_registry();
    let ctx = ActionContext::new("/tmp/out").with_provider(Some("local"));

    let result = execute_action_with_env(&registry, &generate(), &ctx, &env(&[("FAL_API_KEY", "k")])).await;
    let value = json(&result);
    assert_eq!(value["ok"], false);
    assert_eq!(value["error"]["code"], "PROVIDER_NOT_FOUND");
    assert_eq!(
        value["error"]["message"],
        "Provider 'local' not found or does not support action 'generate'"
    );
}

#[tokio::test]
async fn test_no_provider_for_action() {
    let registry = stub_registry();
    let input = MediaInput::from_raw("clip.mp4");
    let request = ActionRequest::Extend(ExtendOptions {
        input,
        padding: 4,
        color: "#000000".to_string(),
        dpi: 300,
    });

    let result = execute_action_with_env(&registry, &request, &ActionContext::new("/tmp/out"), &env(&[])).await;
    assert_eq!(result.error_code(), Some(ErrorCode::NoProvider));
}

#[tokio::test]
async fn test_panicking_provider_becomes_unknown_error() {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(Panicking));

    let result = execute_action_with_env(&registry, &generate(), &ActionContext::new("/tmp/out"), &env(&[])).await;
    let value = json(&result);
    assert_eq!(value["error"]["code"], "UNKNOWN_ERROR");
    assert!(value["error"]["message"].as_str().unwrap().contains("backend exploded"));
}

#[tokio::test]
async fn test_local_resize_through_full_registry() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_png(dir.path(), "banner.png", 120, 60);
    let out = dir.path().join("out");
    let registry = register_all_providers(&Config::default()).unwrap();
    let ctx = ActionContext::new(&out).with_input_source(Some(input.source.clone()));

    let result = execute_action_with_env(&registry, &resize(&input, 30), &ctx, &env(&[])).await;
    let value = json(&result);
    assert_eq!(value["ok"], true);
    assert_eq!(value["media_type"], "image");
    assert_eq!(value["action"], "resize");
    assert_eq!(value["provider"], "local");
    assert_eq!(value["mime"], "image/png");

    let path = result.output_path().unwrap();
    assert_eq!(path, out.join("banner_resized.png"));
    assert_eq!(image::open(path).unwrap().dimensions(), (30, 15));
    assert_eq!(value["bytes"], std::fs::metadata(path).unwrap().len());
}

#[tokio::test]
async fn test_local_crop_then_extend_with_custom_names() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_png(dir.path(), "scene.png", 64, 48);
    let out = dir.path().join("out");
    let registry = register_all_providers(&Config::default()).unwrap();

    let crop = ActionRequest::Crop(CropOptions {
        input: input.clone(),
        width: 32,
        height: 32,
        focus_x: 100.0,
        focus_y: 0.0,
        dpi: 300,
    });
    let ctx = ActionContext::new(&out).with_output_name(Some("tile"));
    let cropped = execute_action_with_env(&registry, &crop, &ctx, &env(&[])).await;
    let cropped_path = cropped.output_path().unwrap().to_path_buf();
    assert_eq!(cropped_path, out.join("tile.png"));
    assert_eq!(image::open(&cropped_path).unwrap().dimensions(), (32, 32));

    let extend = ActionRequest::Extend(ExtendOptions {
        input: MediaInput::from_raw(cropped_path.to_string_lossy()),
        padding: 8,
        color: "#E4ECF8".to_string(),
        dpi: 300,
    });
    let ctx = ActionContext::new(&out).with_output_name(Some("tile-padded.png"));
    let extended = execute_action_with_env(&registry, &extend, &ctx, &env(&[])).await;
    let extended_path = extended.output_path().unwrap();
    assert_eq!(extended_path, out.join("tile-padded.png"));

    let image = image::open(extended_path).unwrap().to_rgba8();
    assert_eq!(image.dimensions(), (48, 48));
    assert_eq!(image.get_pixel(0, 0), &Rgba([0xE4, 0xEC, 0xF8, 255]));
}

#[tokio::test]
async fn test_registry_order_and_capabilities() {
    let registry = register_all_providers(&Config::default()).unwrap();
    assert_eq!(
        registry.provider_names(),
        vec!["local", "fal", "replicate", "runpod", "ai-gateway", "transformers"]
    );

    let upscalers: Vec<String> = registry
        .find_supporting_providers(Action::Upscale)
        .iter()
        .map(|p| p.name().to_string())
        .collect();
    assert_eq!(upscalers, vec!["transformers"]);
}

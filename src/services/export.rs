use crate::core::io::Storage;
use crate::core::state::Scene;
use anyhow::{Context, Result};
use base64::Engine;
use log::info;
use std::path::Path;

#[derive(Debug, PartialEq, Eq)]
pub struct DecodedImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

pub fn decode_data_url(url: &str) -> Result<DecodedImage> {
    let rest = url.strip_prefix("data:").context("Not a data URL")?;
    let (meta, data) = rest.split_once(',').context("Malformed data URL")?;
    let mime_type = meta
        .strip_suffix(";base64")
        .context("Only base64 data URLs are supported")?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .context("Invalid base64 image data")?;

    Ok(DecodedImage {
        mime_type: mime_type.to_string(),
        bytes,
    })
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        _ => "png",
    }
}

pub fn export_file_name(scene_number: usize, mime_type: &str) -> String {
    format!("storyboard-scene-{}.{}", scene_number, extension_for(mime_type))
}

/// Writes the scene's image into `output_folder`. `None` when the scene has
/// no image yet.
pub async fn export_scene_image(
    storage: &dyn Storage,
    output_folder: &str,
    scene: &Scene,
) -> Result<Option<String>> {
    let Some(url) = scene.image_url() else {
        return Ok(None);
    };
    let image = decode_data_url(url)
        .with_context(|| format!("Scene {} has an unreadable image", scene.scene_number()))?;

    let path = Path::new(output_folder).join(export_file_name(scene.scene_number(), &image.mime_type));
    let path_str = path.to_string_lossy().to_string();
    storage.write(&path_str, &image.bytes).await?;

    info!("Exported scene {} to {}", scene.scene_number(), path_str);
    Ok(Some(path_str))
}

pub async fn export_storyboard(
    storage: &dyn Storage,
    output_folder: &str,
    scenes: &[Scene],
) -> Result<Vec<String>> {
    let mut written = Vec::new();
    for scene in scenes {
        if let Some(path) = export_scene_image(storage, output_folder, scene).await? {
            written.push(path);
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::core::state::SceneDraft;
    use std::fs;

    fn scene(number: usize, image_url: Option<String>) -> Scene {
        let mut scene = Scene::from_draft(
            SceneDraft {
                visual_description: "Smoke over rooftops".to_string(),
                caption: "The city wakes".to_string(),
                shot_type: "Aerial".to_string(),
            },
            number,
        );
        if let Some(url) = image_url {
            scene.complete_generation(url);
        }
        scene
    }

    #[test]
    fn test_decode_data_url() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"\x89PNG");
        let decoded = decode_data_url(&format!("data:image/png;base64,{}", encoded)).unwrap();
        assert_eq!(decoded.mime_type, "image/png");
        assert_eq!(decoded.bytes, b"\x89PNG");

        assert!(decode_data_url("https://example.com/a.png").is_err());
        assert!(decode_data_url("data:image/png,raw").is_err());
        assert!(decode_data_url("data:image/png;base64,@@@").is_err());
    }

    #[test]
    fn test_export_file_name() {
        assert_eq!(export_file_name(3, "image/png"), "storyboard-scene-3.png");
        assert_eq!(export_file_name(12, "image/jpeg"), "storyboard-scene-12.jpg");
    }

    #[tokio::test]
    async fn test_export_storyboard_skips_scenes_without_image() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let out = dir.path().join("output");
        let out_str = out.to_string_lossy().to_string();
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"frame-bytes");

        let scenes = vec![
            scene(1, Some(format!("data:image/png;base64,{}", encoded))),
            scene(2, None),
        ];
        let written = export_storyboard(&NativeStorage::new(), &out_str, &scenes).await?;

        assert_eq!(written.len(), 1);
        assert_eq!(fs::read(out.join("storyboard-scene-1.png"))?, b"frame-bytes");
        assert!(!out.join("storyboard-scene-2.png").exists());
        Ok(())
    }
}

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Confirm, Select, Text};
use log::debug;
use script2storyboard::core::config::Config;
use script2storyboard::core::error::StoryboardError;
use script2storyboard::core::io::NativeStorage;
use script2storyboard::core::state::{GenerationSettings, ImageSize, Scene, ScenePhase};
use script2storyboard::services::chat::{ChatPhase, ChatProxy};
use script2storyboard::services::credential::{CredentialGate, PromptKeyProvider};
use script2storyboard::services::provider::create_provider;
use script2storyboard::services::storyboard::StoryboardManager;
use script2storyboard::services::{export, import};
use std::io::Write;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    // 1. Load Config
    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            eprintln!("Please fix 'config.yml' or remove it to use the defaults.");
            return Err(e);
        }
    };
    config.ensure_directories()?;

    // 2. Credential Gate
    let keys = Arc::new(PromptKeyProvider::from_config(&config));
    let gate = Arc::new(CredentialGate::new(keys));
    if !authorize(&gate).await? {
        println!("No API key selected. Exiting.");
        return Ok(());
    }

    // 3. Provider and Orchestrators
    let provider = create_provider(&config, gate.keys())?;
    let storyboard = StoryboardManager::new(
        provider.clone(),
        gate.clone(),
        GenerationSettings {
            image_size: config.image.size,
        },
    );
    let chat = ChatProxy::new(provider, gate.clone());
    let storage = NativeStorage::new();

    // 4. Script Input
    let path = match std::env::args().nth(1) {
        Some(path) => path,
        None => Text::new("Script file (.txt, .md, .fountain):").prompt()?,
    };
    let script = import::read_script(&storage, &path).await?;

    // 5. Analysis
    while let Err(e) = storyboard.run_analysis(&script).await {
        if !reauthorize(&gate, &e).await? {
            return Ok(());
        }
    }
    if let Some(notice) = storyboard.notice() {
        eprintln!("{}", notice);
        storyboard.dismiss_notice();
    }
    let scenes = storyboard.scenes();
    if scenes.is_empty() {
        println!("No scenes found in {}.", path);
        return Ok(());
    }
    print_scenes(&scenes);

    // 6. Image Generation
    let size = Select::new("Image size:", ImageSize::ALL.to_vec())
        .with_starting_cursor(
            ImageSize::ALL
                .iter()
                .position(|s| *s == storyboard.image_size())
                .unwrap_or(0),
        )
        .prompt()?;
    storyboard.set_image_size(size);

    loop {
        let pending = storyboard
            .scenes()
            .iter()
            .filter(|s| s.image_url().is_none())
            .count();
        if pending == 0 {
            break;
        }

        let pb = ProgressBar::new(pending as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );
        let result = storyboard
            .generate_all_with(|scene| {
                pb.set_message(format!("scene {}", scene.scene_number()));
                pb.inc(1);
            })
            .await;
        pb.finish_and_clear();

        match result {
            Ok(report) => {
                println!(
                    "Generated {} image(s), {} failed, {} already done.",
                    report.generated, report.failed, report.skipped
                );
                if report.failed == 0 {
                    break;
                }
                for scene in storyboard.scenes() {
                    if scene.phase() == ScenePhase::Failed {
                        eprintln!(
                            "  Scene {}: {}",
                            scene.scene_number(),
                            scene.error_message().unwrap_or_default()
                        );
                    }
                }
                if !Confirm::new("Retry failed scenes?")
                    .with_default(true)
                    .prompt()?
                {
                    break;
                }
            }
            Err(e) => {
                if !reauthorize(&gate, &e).await? {
                    break;
                }
            }
        }
    }

    // 7. Export
    let written = export::export_storyboard(&storage, &config.output_folder, &storyboard.scenes()).await?;
    println!("Saved {} image(s) to {}", written.len(), config.output_folder);

    // 8. Assistant Chat
    if Confirm::new("Chat with the storyboard assistant?")
        .with_default(false)
        .prompt()?
    {
        run_chat(&chat, &gate).await?;
    }

    Ok(())
}

/// Checks for a key and keeps offering the selector until one is chosen or
/// the user gives up.
async fn authorize(gate: &CredentialGate) -> Result<bool> {
    if gate.check_ready().await {
        return Ok(true);
    }
    loop {
        println!("A Gemini API key from a billing-enabled Google Cloud project is required.");
        if gate.request_authorization().await {
            return Ok(true);
        }
        if !Confirm::new("No key selected. Try again?")
            .with_default(true)
            .prompt()?
        {
            return Ok(false);
        }
    }
}

/// Offers a different key after a credential failure. Other errors are fatal.
async fn reauthorize(gate: &CredentialGate, err: &StoryboardError) -> Result<bool> {
    if !err.is_credential() {
        return Err(anyhow::anyhow!("{}", err));
    }
    eprintln!("{}", err);
    loop {
        if !Confirm::new("Enter a different API key?")
            .with_default(true)
            .prompt()?
        {
            return Ok(false);
        }
        if gate.request_authorization().await {
            return Ok(true);
        }
    }
}

fn print_scenes(scenes: &[Scene]) {
    for scene in scenes {
        println!(
            "#{:<3} [{}] {}\n     {}",
            scene.scene_number(),
            scene.shot_type(),
            scene.caption(),
            scene.visual_description()
        );
    }
}

async fn run_chat(chat: &ChatProxy, gate: &CredentialGate) -> Result<()> {
    while chat.phase() != ChatPhase::Open {
        if let Err(e) = chat.open().await {
            if !reauthorize(gate, &e).await? {
                return Ok(());
            }
        } else if chat.phase() != ChatPhase::Open {
            eprintln!("Could not start the assistant.");
            return Ok(());
        }
    }
    if let Some(greeting) = chat.messages().first() {
        println!("\n{}\n", greeting.text);
    }

    loop {
        let input = Text::new(">")
            .with_help_message("Empty line to quit")
            .prompt()?;
        let input = input.trim();
        if input.is_empty() {
            break;
        }

        let result = chat
            .send_with(input, |delta| {
                print!("{}", delta);
                if let Err(e) = std::io::stdout().flush() {
                    debug!("Failed to flush stdout: {}", e);
                }
            })
            .await;
        println!("\n");

        if let Err(e) = result {
            if !reauthorize(gate, &e).await? {
                break;
            }
        }
    }
    Ok(())
}

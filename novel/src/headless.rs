//! Headless mode.
//!
//! A simple text-based interface. Scene output is printed in tagged blocks
//! so scripts and AI agents can parse it.

use novel_core::{FallbackReason, GameSession, SessionConfig, SessionError, TurnReport};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{self, AsyncBufReadExt, BufReader};

/// Command line options for headless mode.
#[derive(Debug, Clone, Default)]
pub struct HeadlessOptions {
    pub name: Option<String>,
    pub model: Option<String>,
    pub save_dir: Option<PathBuf>,
    pub load: bool,
}

impl HeadlessOptions {
    fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::new(self.name.as_deref().unwrap_or("Player"));
        if let Some(model) = &self.model {
            config = config.with_model(model.clone());
        }
        if let Some(dir) = &self.save_dir {
            config = config.with_save_dir(dir.clone());
        }
        config
    }
}

/// Run the game in headless mode.
///
/// This provides a simple line-oriented protocol:
/// - A number picks one of the listed choices
/// - Lines starting with `#` are commands (save, load, new, status, help, quit)
/// - Anything else is sent as a free-form action
pub async fn run_headless(options: HeadlessOptions) -> Result<(), SessionError> {
    let mut session = GameSession::from_env(options.session_config())?;
    tracing::info!(player = %session.player_name(), "headless session started");

    if options.load {
        match session.load_saved().await {
            Ok(true) => println!("[LOADED] Resumed saved game"),
            Ok(false) => println!("[INFO] No saved game found, starting fresh"),
            Err(e) => println!("[ERROR] Load failed: {e}"),
        }
    }

    let _autosave = session.spawn_autosave();

    println!("=== Visual Novel Headless Mode ===");
    println!("Player: {}", session.player_name());
    println!();
    print_commands();
    println!();

    if let Some(url) = session.refresh_initial_image().await {
        println!("[IMAGE] {url}");
    }
    print_scene(&session);

    let mut lines = BufReader::new(io::stdin()).lines();
    let mut stdout = std::io::stdout();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                eprintln!("Error reading input: {e}");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        // Handle commands
        if let Some(command) = line.strip_prefix('#') {
            match command.split_whitespace().next() {
                Some("quit") | Some("exit") => {
                    if let Err(e) = session.save().await {
                        println!("[ERROR] Save failed: {e}");
                    }
                    println!("Goodbye!");
                    break;
                }
                Some("save") => match session.save().await {
                    Ok(()) => println!("[SAVED] Game saved"),
                    Err(e) => println!("[ERROR] Save failed: {e}"),
                },
                Some("load") => match session.load_saved().await {
                    Ok(true) => {
                        println!("[LOADED] Game loaded");
                        print_scene(&session);
                    }
                    Ok(false) => println!("[ERROR] No saved game"),
                    Err(e) => println!("[ERROR] Load failed: {e}"),
                },
                Some("new") => {
                    if let Err(e) = session.clear_save().await {
                        println!("[ERROR] Could not clear save: {e}");
                    }
                    let player = session.config().player();
                    session.start_new(player);
                    println!("[NEW] Started a new game");
                    if let Some(url) = session.refresh_initial_image().await {
                        println!("[IMAGE] {url}");
                    }
                    print_scene(&session);
                }
                Some("status") => print_status(&session),
                Some("help") => {
                    println!("[HELP]");
                    print_commands();
                    println!("  <number>     - Pick a listed choice");
                    println!("  (anything else is sent as a free-form action)");
                }
                _ => {
                    println!("[ERROR] Unknown command. Type #help for help.");
                }
            }
            stdout.flush().ok();
            continue;
        }

        let action = resolve_input(&session, line);

        print!("[PROCESSING]");
        stdout.flush().ok();

        let result = session.player_action(&action).await;

        // Clear the processing indicator
        print!("\r            \r");
        stdout.flush().ok();

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                println!("[ERROR] {e}");
                continue;
            }
        };
        print_report(&session, &report);
        stdout.flush().ok();

        // The scene is already on screen; swap the background once it loads
        if let Some(request) = &report.refresh {
            if let Some(url) = session.commit_image(request).await {
                println!("[IMAGE] {url}");
            }
        }
    }

    Ok(())
}

/// Map a choice number to its text; anything else passes through.
fn resolve_input(session: &GameSession, line: &str) -> String {
    let choices = &session.state().current_scene.choices;
    line.parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| choices.get(i))
        .map(|choice| choice.text.clone())
        .unwrap_or_else(|| line.to_string())
}

fn print_commands() {
    println!("Commands:");
    println!("  #quit        - Save and exit");
    println!("  #save        - Save the game");
    println!("  #load        - Load the saved game");
    println!("  #new         - Start over and clear the save");
    println!("  #status      - Show player stats and known characters");
    println!("  #help        - Show this help");
}

fn print_report(session: &GameSession, report: &TurnReport) {
    match report.fallback {
        Some(FallbackReason::RateLimited) => println!("[WARN] Narrator is rate limited"),
        Some(FallbackReason::Exhausted) => {
            println!("[WARN] Narrator failed after {} attempts", report.attempts)
        }
        Some(FallbackReason::Cancelled) | None => {}
    }
    if let Some(cue) = &report.effect {
        println!("[EFFECT] {:?} for {}ms", cue.effect, cue.duration.as_millis());
    }
    print_scene(session);
}

fn print_scene(session: &GameSession) {
    let scene = &session.state().current_scene;

    println!("[SCENE] {}", scene.location);
    match (&scene.speaker, &scene.speaker_emotion) {
        (Some(speaker), Some(emotion)) => println!("{speaker} ({emotion}):"),
        (Some(speaker), None) => println!("{speaker}:"),
        _ => {}
    }
    for para in scene.narrative.split("\n\n") {
        println!("{para}");
    }
    println!();

    println!("[CHOICES]");
    for (i, choice) in scene.choices.iter().enumerate() {
        println!("  {}. [{}] {}", i + 1, choice.kind.as_str(), choice.text);
    }
    println!();
}

fn print_status(session: &GameSession) {
    let state = session.state();
    let stats = &state.player.stats;

    println!("[STATUS]");
    println!("  Player: {}", state.player.name);
    println!("  Location: {}", state.current_scene.location);
    println!(
        "  Strength: {}, Intelligence: {}, Charisma: {}, Money: {}",
        stats.strength, stats.intelligence, stats.charisma, stats.money
    );
    println!("  Turns: {}", state.turn_count());

    if state.npcs.is_empty() {
        println!("  Known characters: none");
    } else {
        println!("  Known characters:");
        for npc in state.npcs.values() {
            println!(
                "    {} - affection {}, compliance {}, mood {}",
                npc.name, npc.affection, npc.compliance, npc.mood
            );
        }
    }
}

/// Parse headless options from command line arguments.
pub fn parse_options_from_args(args: &[String]) -> HeadlessOptions {
    let mut options = HeadlessOptions::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--name" => {
                if let Some(name) = args.get(i + 1) {
                    options.name = Some(name.clone());
                    i += 1;
                }
            }
            "--model" => {
                if let Some(model) = args.get(i + 1) {
                    options.model = Some(model.clone());
                    i += 1;
                }
            }
            "--save-dir" => {
                if let Some(dir) = args.get(i + 1) {
                    options.save_dir = Some(PathBuf::from(dir));
                    i += 1;
                }
            }
            "--load" => options.load = true,
            _ => {}
        }
        i += 1;
    }

    options
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_options() {
        let options = parse_options_from_args(&args(&[
            "novel",
            "--name",
            "Alex",
            "--save-dir",
            "saves",
            "--load",
        ]));

        assert_eq!(options.name.as_deref(), Some("Alex"));
        assert_eq!(options.save_dir, Some(PathBuf::from("saves")));
        assert!(options.load);
        assert!(options.model.is_none());
    }

    #[test]
    fn test_parse_options_missing_value() {
        let options = parse_options_from_args(&args(&["novel", "--name"]));
        assert!(options.name.is_none());
        assert_eq!(options.session_config().player_name, "Player");
    }

    #[test]
    fn test_resolve_input() {
        let harness = novel_core::TestHarness::new([]);
        let session = &harness.session;

        assert_eq!(resolve_input(session, "1"), "Look around");
        assert_eq!(resolve_input(session, "0"), "0");
        assert_eq!(resolve_input(session, "9"), "9");
        assert_eq!(resolve_input(session, "Dance"), "Dance");
    }
}

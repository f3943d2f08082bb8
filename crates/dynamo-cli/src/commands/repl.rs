//! Interactive REPL over the four-command grammar: `add-node`, `remove-node`,
//! `put`, `get` (plus `quit`).

use anyhow::{Context, Result};
use dynamo_client::Client;
use rustyline::error::ReadlineError;
use rustyline::{Config, DefaultEditor};

use crate::style::banner::print_mini_banner;
use crate::style::colors::SemanticStyle;
use crate::style::spinner::{create_spinner, finish_error, finish_success};
use crate::style::{no_color, print_error, print_spacer};

const HELP_TEXT: &str = r"
Commands:
  add-node <host>           Propose adding <host> to the cluster
  remove-node <host>        Propose removing <host> from the cluster
  put <key> <context> <value>
                            Write <value> under <key>; <context> is a
                            JSON vector-clock object, {} for a new key
  get <key>                 Read <key> (prints every sibling found)
  .help                     Show this help message
  .exit / quit              Exit the REPL
";

pub fn run(address: &str) -> Result<()> {
    let sp = create_spinner(&format!("Connecting to {address}..."));
    let mut client = match Client::connect(address) {
        Ok(c) => {
            finish_success(&sp, &format!("Connected to {address}"));
            c
        }
        Err(e) => {
            finish_error(&sp, "Connection failed");
            return Err(e).with_context(|| format!("failed to connect to {address}"));
        }
    };

    print_spacer();
    print_mini_banner();
    println!(" {}", "REPL".muted());
    print_spacer();
    println!("  {}: {}", "Node".muted(), address);
    print_spacer();
    println!(
        "{}",
        "Type .help for help, .exit to quit. Up/Down for history.".muted()
    );
    print_spacer();

    let rl_config = Config::builder()
        .color_mode(if no_color() {
            rustyline::ColorMode::Disabled
        } else {
            rustyline::ColorMode::Enabled
        })
        .build();
    let mut rl = DefaultEditor::with_config(rl_config).context("failed to initialize REPL editor")?;

    let history_path = history_path();
    if let Some(ref path) = history_path {
        let _ = rl.load_history(path);
    }

    loop {
        match rl.readline("dynamo> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                rl.add_history_entry(trimmed).ok();

                match trimmed {
                    ".help" | ".h" => {
                        println!("{}", "Dynamo REPL".header());
                        println!("{HELP_TEXT}");
                        continue;
                    }
                    ".exit" | ".quit" | "quit" => {
                        println!("{}", "Goodbye!".muted());
                        break;
                    }
                    _ => {}
                }

                let sp = create_spinner("Sending...");
                match client.send_command(trimmed) {
                    Ok(reply) => {
                        finish_success(&sp, "Reply received");
                        println!("{reply}");
                    }
                    Err(e) => {
                        finish_error(&sp, "Request failed");
                        print_error(&e.to_string());
                    }
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => {
                println!("{}", "Goodbye!".muted());
                break;
            }
            Err(e) => {
                print_error(&format!("error reading input: {e}"));
                continue;
            }
        }
    }

    if let Some(ref path) = history_path {
        let _ = rl.save_history(path);
    }
    Ok(())
}

/// Returns the history file path (`~/.dynamo/repl_history`).
fn history_path() -> Option<std::path::PathBuf> {
    let home = std::env::var("HOME").ok()?;
    let dir = std::path::Path::new(&home).join(".dynamo");
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir.join("repl_history"))
}

//! Waylay - a filtering DNS forwarder.
//!
//! Loads a configuration file, builds the engine, and runs it on the main
//! thread. A small stdin console drives the administrative commands.

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use waylay::config::Config;
use waylay::engine::Engine;

#[derive(Parser)]
#[command(name = "waylay")]
#[command(about = "Filtering DNS forwarder", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: PathBuf,
}

fn main() -> io::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;

    let engine = Engine::new(&config).map_err(|e| io::Error::other(e.to_string()))?;
    let engine = Arc::new(engine);

    println!(
        "listening on {}:{} ({} upstreams)",
        config.binding.address,
        config.binding.port,
        config.external_dns.len()
    );

    let console_engine = Arc::clone(&engine);
    std::thread::spawn(move || console_loop(&console_engine));

    engine.run();
    Ok(())
}

/// Reads administrative commands from stdin until EOF.
fn console_loop(engine: &Engine) {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            break;
        };
        match line.trim() {
            "" => {}
            "reload" => match engine.reload() {
                Ok(()) => println!("rules reloaded"),
                Err(e) => eprintln!("reload failed: {e}"),
            },
            "ef" => {
                engine.set_filtering(true);
                println!("filtering enabled");
            }
            "df" => {
                engine.set_filtering(false);
                println!("filtering disabled");
            }
            "eh" => {
                engine.set_heuristics(true);
                println!("heuristics enabled");
            }
            "dh" => {
                engine.set_heuristics(false);
                println!("heuristics disabled");
            }
            "dump" => match engine.dump() {
                Ok(()) => println!("cache dumped"),
                Err(e) => eprintln!("dump failed: {e}"),
            },
            "quit" | "exit" => {
                engine.finish();
                break;
            }
            other => eprintln!("unknown command '{other}'"),
        }
    }
}

//! crema-ctl: command-line interface for the crema daemon.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::Deserialize;

use crema_eventsource::{Event, EventSource};

const DEFAULT_PORT: u16 = 8080;

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StatusResponse {
    games:          usize,
    addresses:      AddressCounts,
    subscribers:    usize,
    league_address: String,
}

#[derive(Deserialize)]
struct AddressCounts {
    pending: usize,
    success: usize,
    failure: usize,
}

#[derive(Deserialize)]
struct GameView {
    id:     i64,
    status: String,
    game:   GameInfo,
    addrs:  BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct GameInfo {
    title:  String,
    host:   String,
    status: String,
}

// ── HTTP helpers ──────────────────────────────────────────────────────────────

async fn get_json<T: for<'de> Deserialize<'de>>(url: &str) -> Result<T> {
    reqwest::get(url)
        .await
        .with_context(|| format!("failed to connect to cremad at {url}, is it running?"))?
        .error_for_status()
        .with_context(|| format!("request to {url} failed"))?
        .json::<T>()
        .await
        .context("failed to parse response")
}

// ── Subcommand handlers ───────────────────────────────────────────────────────

async fn cmd_status(base: &str) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{base}/status")).await?;

    println!("═══════════════════════════════════════");
    println!("  crema status");
    println!("═══════════════════════════════════════");
    println!("  Games            : {}", resp.games);
    println!("  Reachable addrs  : {}", resp.addresses.success);
    println!("  Failed addrs     : {}", resp.addresses.failure);
    println!("  Pending addrs    : {}", resp.addresses.pending);
    println!("  Live listeners   : {}", resp.subscribers);
    println!("  League address   : {}", resp.league_address);
    Ok(())
}

fn print_game(g: &GameView) {
    println!("  ┌─ #{} {}", g.id, g.game.title);
    println!("  │  host   : {}", g.game.host);
    println!("  │  state  : {}", g.game.status);
    if g.addrs.is_empty() {
        println!("  └─ reach  : {} (no probed addresses)", g.status);
        return;
    }
    println!("  │  reach  : {}", g.status);
    let last = g.addrs.len() - 1;
    for (i, (addr, status)) in g.addrs.iter().enumerate() {
        let corner = if i == last { "└─" } else { "│ " };
        println!("  {corner} {addr:<48} {status}");
    }
}

async fn cmd_games(base: &str) -> Result<()> {
    let games: Vec<GameView> = get_json(&format!("{base}/games")).await?;
    if games.is_empty() {
        println!("No games running.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Games ({})", games.len());
    println!("═══════════════════════════════════════");
    for g in &games {
        print_game(g);
    }
    Ok(())
}

async fn cmd_game(base: &str, id: &str) -> Result<()> {
    let id: i64 = id.parse().context("game id must be a number")?;
    let game: GameView = get_json(&format!("{base}/games/{id}")).await?;
    print_game(&game);
    Ok(())
}

/// Follow the live feed until interrupted.
async fn cmd_watch(base: &str) -> Result<()> {
    let url = format!("{base}/updates");
    let mut source = EventSource::new(url.clone());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = source.recv() => match event {
                Some(Event::Open) => eprintln!("connected to {url}"),
                Some(Event::Message(msg)) => println!("{:<7} {}", msg.event_type, msg.data),
                Some(Event::Error(e)) => eprintln!("error: {e}"),
                None => break,
            },
        }
    }
    source.close();
    Ok(())
}

fn print_usage() {
    println!("Usage: crema-ctl [--port <port> | --url <url>] <command>");
    println!();
    println!("Commands:");
    println!("  status        Show cache and probe counters");
    println!("  games         List games with their address reachability");
    println!("  game <id>     Show one game");
    println!("  watch         Follow live updates");
    println!();
    println!("Options:");
    println!("  --port <port>   API port on 127.0.0.1 (default: {})", DEFAULT_PORT);
    println!("  --url <url>     API base URL, e.g. http://host:8080/api");
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut base = format!("http://127.0.0.1:{DEFAULT_PORT}/api");
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                i += 1;
                let port: u16 = args
                    .get(i)
                    .context("--port requires a value")?
                    .parse()
                    .context("--port must be a number")?;
                base = format!("http://127.0.0.1:{port}/api");
            }
            "--url" => {
                i += 1;
                base = args
                    .get(i)
                    .context("--url requires a value")?
                    .trim_end_matches('/')
                    .to_string();
            }
            arg => remaining.push(arg),
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["status"] | []                => cmd_status(&base).await,
        ["games"]                      => cmd_games(&base).await,
        ["game", id]                   => cmd_game(&base, id).await,
        ["watch"]                      => cmd_watch(&base).await,
        ["help"] | ["--help"] | ["-h"] => { print_usage(); Ok(()) }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}

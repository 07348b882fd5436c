use anyhow::{Context, Result};
use std::env;
use std::path::Path;
use std::process::ExitCode;
use swarmshare::core::config::Config;
use swarmshare::core::error::PeerError;
use swarmshare::core::tracing_init::init_tracing;
use swarmshare::peer::agent::{PeerAgent, Role};
use swarmshare::protocol::codes::ReturnCode;
use swarmshare::protocol::message::TorrentSnapshot;
use tokio::io::{stdin, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tracing::{error, info, warn};

const USAGE: &str = "usage: swarmshare-peer <src ip> <src port> [tracker ip] [tracker port]";

const HELP: &str = "\
Commands:
  1 | list      list torrents known to the tracker
  2 | download  download a torrent by id, then seed it
  3 | share     share a local file
  4 | help      show this screen
  5 | quit      stop seeding and exit";

struct Args {
    ip: String,
    port: u16,
    tracker_ip: Option<String>,
    tracker_port: Option<u16>,
}

fn parse_args(args: &[String]) -> Option<Args> {
    if !(2..=4).contains(&args.len()) {
        return None;
    }

    Some(Args {
        ip: args[0].clone(),
        port: args[1].parse().ok()?,
        tracker_ip: args.get(2).cloned(),
        tracker_port: match args.get(3) {
            Some(port) => Some(port.parse().ok()?),
            None => None,
        },
    })
}

fn main() -> Result<ExitCode> {
    let raw: Vec<String> = env::args().skip(1).collect();
    let Some(args) = parse_args(&raw) else {
        eprintln!("{USAGE}");
        return Ok(ExitCode::from(1));
    };

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(ip) = args.tracker_ip.clone() {
        config.peer.tracker_ip = ip;
    }
    if let Some(port) = args.tracker_port {
        config.peer.tracker_port = port;
    }
    // the menu is interactive, so human-readable logs
    config.logging.console = true;

    init_tracing(&config.logging);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.num_threads)
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    runtime.block_on(run(config, args))
}

async fn run(config: Config, args: Args) -> Result<ExitCode> {
    let mut agent = PeerAgent::bind(&args.ip, args.port, &config)
        .await
        .context(format!("Failed to bind {}:{}", args.ip, args.port))?;

    info!(
        peer_id = %agent.identity().id,
        tracker = %agent.tracker().addr(),
        "Peer started"
    );

    match agent.list_torrents().await {
        Ok(torrents) => print_torrents(&torrents),
        Err(e) if e.is_transport() => {
            error!(error = %e, "Cannot reach tracker");
            return Ok(ExitCode::from(1));
        }
        Err(e) => report(&e),
    }
    println!("{HELP}");

    let mut lines = BufReader::new(stdin()).lines();
    loop {
        let Some(command) = prompt(&mut lines, "> ").await? else {
            break;
        };

        let outcome = match command.as_str() {
            "" => continue,
            "1" | "list" => agent.list_torrents().await.map(|t| print_torrents(&t)),
            "2" | "download" => download(&mut agent, &mut lines).await,
            "3" | "share" => share(&mut agent, &mut lines).await,
            "4" | "help" => {
                println!("{HELP}");
                Ok(())
            }
            "5" | "quit" | "exit" => break,
            other => {
                println!("Unknown command '{other}', type 'help'");
                Ok(())
            }
        };

        if let Err(e) = outcome {
            if e.is_transport() {
                error!(error = %e, "Lost connection to tracker");
                let _ = agent.shutdown().await;
                return Ok(ExitCode::from(1));
            }
            report(&e);
        }
    }

    if agent.role() == Role::Seeding {
        info!("Leaving swarm");
    }
    if let Err(e) = agent.shutdown().await {
        warn!(error = %e, "Shutdown was not clean");
    }
    Ok(ExitCode::SUCCESS)
}

/// Print `label` and read one trimmed line; `None` on end of input
async fn prompt(lines: &mut Lines<BufReader<Stdin>>, label: &str) -> Result<Option<String>> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(label.as_bytes()).await?;
    stdout.flush().await?;

    let line = lines.next_line().await.context("Failed to read stdin")?;
    Ok(line.map(|l| l.trim().to_string()))
}

async fn download(
    agent: &mut PeerAgent,
    lines: &mut Lines<BufReader<Stdin>>,
) -> Result<(), PeerError> {
    let Ok(Some(input)) = prompt(lines, "Torrent id: ").await else {
        return Ok(());
    };
    let Ok(torrent_id) = input.parse::<u32>() else {
        println!("'{input}' is not a torrent id");
        return Ok(());
    };

    let path = agent.download(torrent_id).await?;
    println!("Downloaded to {} and now seeding torrent {torrent_id}", path.display());
    Ok(())
}

async fn share(agent: &mut PeerAgent, lines: &mut Lines<BufReader<Stdin>>) -> Result<(), PeerError> {
    let Ok(Some(input)) = prompt(lines, "File path: ").await else {
        return Ok(());
    };
    let path = input.trim_matches(|c| c == '\'' || c == '"');

    let torrent_id = agent.share_file(Path::new(path)).await?;
    println!("Sharing {path} as torrent {torrent_id}");
    Ok(())
}

fn report(e: &PeerError) {
    match e {
        PeerError::Rejected {
            code: ReturnCode::NoAvailableTorrents,
            ..
        } => println!("No torrents available"),
        other => {
            warn!(error = %other, "Request failed");
            println!("Error: {other}");
        }
    }
}

fn print_torrents(torrents: &[TorrentSnapshot]) {
    if torrents.is_empty() {
        println!("No torrents available");
        return;
    }

    println!("{:>4}  {:<32}  {:>8}  {:>7}  {:>8}", "ID", "NAME", "CHUNKS", "SEEDERS", "LEECHERS");
    for torrent in torrents {
        println!(
            "{:>4}  {:<32}  {:>8}  {:>7}  {:>8}",
            torrent.id,
            torrent.filename,
            torrent.chunk_count,
            torrent.seeders.len(),
            torrent.leechers.len()
        );
    }
}

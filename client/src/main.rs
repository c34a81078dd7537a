use anyhow::Result;
use clap::{Parser, Subcommand};
use common::{Candidate, Command, ItemId, LifecycleEvent, PlaybackEvent, Rect, Response, SourceLocator};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

#[derive(Parser)]
#[command(name = "feedctl")]
#[command(about = "Feed playback daemon control", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report the viewport and the video items laid out in the feed
    Visibility {
        /// Viewport height in points
        #[arg(long)]
        viewport_height: f64,

        /// Scroll offset of the viewport's top edge
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        viewport_y: f64,

        /// Viewport width in points
        #[arg(long, default_value = "390")]
        viewport_width: f64,

        /// Video item as ID:SOURCE:Y:HEIGHT (repeatable, in feed order)
        #[arg(short, long = "item", value_parser = parse_item)]
        items: Vec<ItemSpec>,
    },

    /// Tell the daemon an item's slot is being reused
    Recycle {
        /// Item identifier
        id: u64,
    },

    /// App lifecycle transition (background, foreground, active)
    Lifecycle {
        #[arg(value_parser = parse_lifecycle)]
        event: LifecycleEvent,
    },

    /// Mute an item, or unmute it with --off
    Mute {
        /// Item identifier
        id: u64,

        /// Unmute instead
        #[arg(long)]
        off: bool,
    },

    /// Query playback status
    Status,

    /// Kill the daemon
    Kill,

    /// Check if daemon is running
    Ping,
}

/// One `--item` argument
#[derive(Debug, Clone, PartialEq)]
struct ItemSpec {
    id: u64,
    source: String,
    y: f64,
    height: f64,
}

/// Parse ID:SOURCE:Y:HEIGHT; the source itself may contain colons
fn parse_item(value: &str) -> Result<ItemSpec, String> {
    let (id, rest) = value
        .split_once(':')
        .ok_or_else(|| format!("expected ID:SOURCE:Y:HEIGHT, got '{}'", value))?;

    let mut tail = rest.rsplitn(3, ':');
    let height = tail.next();
    let y = tail.next();
    let source = tail.next();

    let (Some(source), Some(y), Some(height)) = (source, y, height) else {
        return Err(format!("expected ID:SOURCE:Y:HEIGHT, got '{}'", value));
    };
    if source.is_empty() {
        return Err(format!("missing source in '{}'", value));
    }

    let spec = ItemSpec {
        id: id.parse().map_err(|_| format!("invalid item id '{}'", id))?,
        source: source.to_string(),
        y: y.parse().map_err(|_| format!("invalid y offset '{}'", y))?,
        height: height.parse().map_err(|_| format!("invalid height '{}'", height))?,
    };

    if !spec.y.is_finite() || !spec.height.is_finite() || spec.height <= 0.0 {
        return Err(format!("invalid geometry in '{}'", value));
    }

    Ok(spec)
}

fn parse_lifecycle(value: &str) -> Result<LifecycleEvent, String> {
    LifecycleEvent::parse(value)
        .ok_or_else(|| format!("unknown lifecycle event '{}' (expected background, foreground, active)", value))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let command = match cli.command {
        Commands::Visibility {
            viewport_height,
            viewport_y,
            viewport_width,
            items,
        } => Command::Visibility {
            viewport: Rect::new(0.0, viewport_y, viewport_width, viewport_height),
            candidates: items
                .into_iter()
                .map(|item| Candidate {
                    id: ItemId(item.id),
                    source: SourceLocator::new(item.source),
                    frame: Rect::new(0.0, item.y, viewport_width, item.height),
                })
                .collect(),
        },
        Commands::Recycle { id } => Command::WillRecycle { item: ItemId(id) },
        Commands::Lifecycle { event } => Command::Lifecycle { event },
        Commands::Mute { id, off } => Command::SetMuted {
            item: ItemId(id),
            muted: !off,
        },
        Commands::Status => Command::Status,
        Commands::Kill => Command::Kill,
        Commands::Ping => Command::Ping,
    };

    match send_command(command).await {
        Ok(response) => {
            handle_response(response);
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("\nIs the daemon running? Try starting it with: feedplayd");
            std::process::exit(1);
        }
    }
}

async fn send_command(command: Command) -> Result<Response> {
    let socket_path = common::get_socket_path();

    let stream = UnixStream::connect(&socket_path).await?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    // Send command
    let command_json = serde_json::to_string(&command)?;
    writer.write_all(command_json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    // Read response
    let mut response_line = String::new();
    reader.read_line(&mut response_line).await?;

    let response: Response = serde_json::from_str(&response_line)?;
    Ok(response)
}

fn describe(event: &PlaybackEvent) -> String {
    match event {
        PlaybackEvent::Started(item) => format!("▶ {} started", item),
        PlaybackEvent::Stopped(item) => format!("■ {} stopped", item),
        PlaybackEvent::LoadFailed { item, error } => format!("✗ {} failed to load: {}", item, error),
    }
}

fn handle_response(response: Response) {
    match response {
        Response::Ok => {
            println!("✓ Success");
        }
        Response::Error(e) => {
            eprintln!("✗ Error: {}", e);
            std::process::exit(1);
        }
        Response::Events(events) => {
            if events.is_empty() {
                println!("✓ Success (no playback changes)");
            }
            for event in &events {
                println!("{}", describe(event));
            }
        }
        Response::Status(status) => {
            println!("Daemon Status:");
            println!("  Version: {}", status.version);
            println!("  Uptime: {}s", status.uptime_secs);
            println!(
                "  Playback: {}",
                if status.enabled { "enabled" } else { "suspended (background)" }
            );
            println!("  Resources: {}", status.resource_count);
            if !status.preloaded.is_empty() {
                println!("  Preloaded:");
                for source in &status.preloaded {
                    println!("    {}", source);
                }
            }
            println!("  Items:");
            for item in status.items {
                println!(
                    "    {} {:?} at y={}{}{} -> {}",
                    item.id,
                    item.phase,
                    item.frame.y,
                    if item.has_resource { " [attached]" } else { "" },
                    if item.muted { " [muted]" } else { "" },
                    item.source
                );
            }
        }
        Response::Pong => {
            println!("✓ Daemon is running");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_item() {
        assert_eq!(
            parse_item("3:bundle:beach:780:400").unwrap(),
            ItemSpec {
                id: 3,
                source: "bundle:beach".to_string(),
                y: 780.0,
                height: 400.0,
            }
        );

        let remote = parse_item("7:https://cdn.example/v.mp4:-120.5:300").unwrap();
        assert_eq!(remote.source, "https://cdn.example/v.mp4");
        assert_eq!(remote.y, -120.5);
    }

    #[test]
    fn test_parse_item_rejects_malformed() {
        assert!(parse_item("3").is_err());
        assert!(parse_item("3:bundle:beach:780").is_err());
        assert!(parse_item("x:bundle:beach:0:400").is_err());
        assert!(parse_item("3::0:400").is_err());
        assert!(parse_item("3:clip:0:0").is_err());
        assert!(parse_item("3:clip:NaN:400").is_err());
    }

    #[test]
    fn test_cli_parses_visibility() {
        let cli = Cli::try_parse_from([
            "feedctl",
            "visibility",
            "--viewport-height",
            "800",
            "--item",
            "1:bundle:a:0:400",
            "-i",
            "2:bundle:b:500:400",
        ])
        .unwrap();

        let Commands::Visibility { items, viewport_y, .. } = cli.command else {
            panic!("wrong subcommand");
        };
        assert_eq!(viewport_y, 0.0);
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].id, 2);
    }

    #[test]
    fn test_cli_parses_lifecycle_and_mute() {
        let cli = Cli::try_parse_from(["feedctl", "lifecycle", "background"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Lifecycle {
                event: LifecycleEvent::EnteredBackground
            }
        ));
        assert!(Cli::try_parse_from(["feedctl", "lifecycle", "sleeping"]).is_err());

        let cli = Cli::try_parse_from(["feedctl", "mute", "4", "--off"]).unwrap();
        assert!(matches!(cli.command, Commands::Mute { id: 4, off: true }));
    }
}

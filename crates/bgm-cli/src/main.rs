//! bgm CLI — drive the music dispatcher from a terminal.
//!
//! Commands:
//!   bgm play <file> [--kind streamed|sequenced] [--config <json>] [--volume <0-100>]
//!   bgm config                 Print the default configuration as JSON
//!
//! While playing, stdin accepts:
//!   p  pause      r  resume     s  stop      v <0-100>  volume
//!   i  interruption began       e  interruption ended
//!   n  now (snapshot)           q  quit

use std::io::{self, BufRead, Write};

use bgm_core::{
    attach_interruptions, AudioContentKind, Config, Interruption, InterruptionBroadcaster,
    MusicDispatcher, SharedDispatcher,
};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        print_usage();
        return;
    }

    match args[0].as_str() {
        "play" => cmd_play(&args[1..]),
        "config" => cmd_config(),
        other => {
            eprintln!("unknown command: {}", other);
            print_usage();
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

struct PlayArgs {
    file: String,
    kind: AudioContentKind,
    config: Option<String>,
    volume: Option<f32>,
}

fn parse_play_args(args: &[String]) -> Result<PlayArgs, String> {
    let mut file = None;
    let mut kind = AudioContentKind::StreamedHighQuality;
    let mut config = None;
    let mut volume = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--kind" => {
                let name = iter.next().ok_or("--kind needs a value")?;
                kind = AudioContentKind::from_name(name)
                    .ok_or_else(|| format!("unknown content kind: {}", name))?;
            }
            "--config" => {
                config = Some(iter.next().ok_or("--config needs a path")?.clone());
            }
            "--volume" => {
                let raw = iter.next().ok_or("--volume needs a value")?;
                volume = Some(parse_percent(raw)?);
            }
            other if file.is_none() => file = Some(other.to_string()),
            other => return Err(format!("unexpected argument: {}", other)),
        }
    }

    Ok(PlayArgs {
        file: file.ok_or("usage: bgm play <file> [--kind streamed|sequenced]")?,
        kind,
        config,
        volume,
    })
}

fn cmd_play(args: &[String]) {
    let args = match parse_play_args(args) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{}", e);
            return;
        }
    };

    let config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("config: {}", e);
                return;
            }
        },
        None => Config::default(),
    };

    let dispatcher = MusicDispatcher::shared(config);
    attach_interruptions(&dispatcher, &InterruptionBroadcaster::shared());

    {
        let mut d = dispatcher.lock();
        if let Some(volume) = args.volume {
            if let Err(e) = d.set_volume(volume) {
                eprintln!("volume: {}", e);
            }
        }
        if let Err(e) = d.play(&args.file, args.kind) {
            eprintln!("play failed: {}", e);
            return;
        }
    }

    println!("playing {} as {}", args.file, args.kind);
    repl(&dispatcher);

    if let Err(e) = dispatcher.lock().tear_down() {
        log::warn!("bgm: teardown on exit failed: {}", e);
    };
}

fn cmd_config() {
    match serde_json::to_string_pretty(&Config::default()) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("config: {}", e),
    }
}

// ---------------------------------------------------------------------------
// Interactive loop
// ---------------------------------------------------------------------------

fn repl(dispatcher: &SharedDispatcher) {
    let stdin = io::stdin();
    prompt();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let mut words = line.split_whitespace();
        let result = match words.next() {
            None => Ok(()),
            Some("p") => dispatcher.lock().pause(),
            Some("r") => dispatcher.lock().resume(),
            Some("s") => dispatcher.lock().stop(),
            Some("v") => match words.next().map(parse_percent) {
                Some(Ok(volume)) => dispatcher.lock().set_volume(volume),
                Some(Err(e)) => {
                    eprintln!("{}", e);
                    Ok(())
                }
                None => {
                    eprintln!("usage: v <0-100>");
                    Ok(())
                }
            },
            Some("i") => {
                InterruptionBroadcaster::shared().notify(Interruption::Began);
                Ok(())
            }
            Some("e") => {
                InterruptionBroadcaster::shared().notify(Interruption::Ended);
                Ok(())
            }
            Some("n") => Ok(()),
            Some("q") => break,
            Some(other) => {
                eprintln!("unknown input: {}", other);
                Ok(())
            }
        };
        if let Err(e) = result {
            eprintln!("error: {}", e);
        }
        print_now(dispatcher);
        prompt();
    }
}

fn print_now(dispatcher: &SharedDispatcher) {
    let snapshot = dispatcher.lock().snapshot();
    let state = if snapshot.paused {
        "paused"
    } else if snapshot.playing {
        "playing"
    } else {
        "stopped"
    };
    let kind = snapshot
        .kind
        .map(|k| k.to_string())
        .unwrap_or_else(|| "-".into());
    println!(
        "[{}] {} {} vol {}%",
        state,
        kind,
        format_time(snapshot.position_ms),
        (snapshot.volume * 100.0).round() as u32
    );
}

fn prompt() {
    print!("> ");
    io::stdout().flush().ok();
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_percent(raw: &str) -> Result<f32, String> {
    let percent: u32 = raw
        .parse()
        .map_err(|_| format!("volume must be 0-100, got {}", raw))?;
    if percent > 100 {
        return Err(format!("volume must be 0-100, got {}", raw));
    }
    Ok(percent as f32 / 100.0)
}

fn format_time(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{}:{:02}", secs / 60, secs % 60)
}

fn print_usage() {
    eprintln!("bgm — background music dispatcher");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  bgm play <file> [--kind streamed|sequenced] [--config <json>] [--volume <0-100>]");
    eprintln!("  bgm config");
    eprintln!();
    eprintln!("While playing: p pause, r resume, s stop, v <0-100> volume,");
    eprintln!("               i/e interruption began/ended, n now, q quit");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn play_args_default_to_streamed() {
        let args = parse_play_args(&strings(&["e1m1.ogg"])).unwrap();
        assert_eq!(args.file, "e1m1.ogg");
        assert_eq!(args.kind, AudioContentKind::StreamedHighQuality);
        assert!(args.config.is_none());
    }

    #[test]
    fn play_args_with_flags() {
        let args = parse_play_args(&strings(&[
            "--kind", "sequenced", "d_e1m1.mid", "--volume", "40",
        ]))
        .unwrap();
        assert_eq!(args.kind, AudioContentKind::SynthesizedSequence);
        assert_eq!(args.volume, Some(0.4));
    }

    #[test]
    fn play_args_reject_garbage() {
        assert!(parse_play_args(&[]).is_err());
        assert!(parse_play_args(&strings(&["a.ogg", "b.ogg"])).is_err());
        assert!(parse_play_args(&strings(&["a.ogg", "--kind", "tracker"])).is_err());
        assert!(parse_percent("101").is_err());
        assert!(parse_percent("loud").is_err());
    }

    #[test]
    fn time_formatting() {
        assert_eq!(format_time(0), "0:00");
        assert_eq!(format_time(61_500), "1:01");
    }
}

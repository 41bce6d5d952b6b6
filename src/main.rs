use anyhow::{bail, Context};
use clap::Parser;
use crossbeam_channel::{bounded, RecvTimeoutError};
use log::{debug, info};
use ssip_client::{
    ClientIdentity, ConnectionConfig, Event, EventType, Priority, PunctuationMode, Scope,
    SsipClient, VoiceType,
};
use std::io::{self, Read};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "ssip-say")]
#[command(about = "Send text to the speech daemon")]
#[command(long_about = "
Send text to the speech daemon over SSIP.

The daemon address is taken from SPEECHD_HOST and SPEECHD_PORT (a .env file
is honoured), or from --host and --port.

EXAMPLES:
  # Say something and wait until it has been spoken
  ssip-say -w \"Hello world\"

  # Faster, higher and through a specific module
  ssip-say -r 40 -p 20 -o espeak-ng \"Hello again\"

  # Read the text from stdin
  echo \"Build finished\" | ssip-say -P notification

  # Show the voices of the current module as JSON
  ssip-say -L --json
")]
struct Args {
    /// Text to speak; read from stdin when omitted
    text: Vec<String>,

    /// Speech rate (-100..100)
    #[arg(short = 'r', long, allow_hyphen_values = true)]
    rate: Option<i32>,

    /// Voice pitch (-100..100)
    #[arg(short = 'p', long, allow_hyphen_values = true)]
    pitch: Option<i32>,

    /// Volume (-100..100)
    #[arg(short = 'i', long, allow_hyphen_values = true)]
    volume: Option<i32>,

    /// Output module, e.g. espeak-ng
    #[arg(short = 'o', long)]
    output_module: Option<String>,

    /// Language code, e.g. en-US
    #[arg(short = 'l', long)]
    language: Option<String>,

    /// Symbolic voice (male1..3, female1..3, child_male, child_female)
    #[arg(short = 't', long)]
    voice_type: Option<VoiceType>,

    /// Voice of the output module by name
    #[arg(short = 'y', long)]
    synthesis_voice: Option<String>,

    /// Punctuation mode (none, some, all)
    #[arg(short = 'm', long)]
    punctuation_mode: Option<PunctuationMode>,

    /// Message priority (important, message, text, notification, progress)
    #[arg(short = 'P', long, default_value = "text")]
    priority: Priority,

    /// Spell the text letter by letter
    #[arg(short = 's', long)]
    spelling: bool,

    /// Wait until the message has been spoken or cancelled
    #[arg(short = 'w', long)]
    wait: bool,

    /// Cancel all messages of every client
    #[arg(short = 'C', long)]
    cancel: bool,

    /// Stop the current message of every client
    #[arg(short = 'S', long)]
    stop: bool,

    /// List the available output modules and exit
    #[arg(short = 'O', long)]
    list_output_modules: bool,

    /// List the voices of the output module and exit
    #[arg(short = 'L', long)]
    list_synthesis_voices: bool,

    /// Print lists as JSON
    #[arg(long)]
    json: bool,

    /// Daemon host, overriding SPEECHD_HOST
    #[arg(long)]
    host: Option<String>,

    /// Daemon port, overriding SPEECHD_PORT
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = ConnectionConfig::from_env()?;
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let identity = ClientIdentity::new("ssip-say");
    let client = SsipClient::connect(&config, &identity)
        .with_context(|| format!("cannot reach the speech daemon at {}", config.address()))?;

    if args.list_output_modules || args.list_synthesis_voices {
        if let Some(module) = &args.output_module {
            client.set_output_module(module, Scope::Current)?;
        }
        if args.list_output_modules {
            print_list(&client.list_output_modules()?, args.json)?;
        }
        if args.list_synthesis_voices {
            print_voices(&client, args.json)?;
        }
        client.close();
        return Ok(());
    }

    if args.cancel {
        client.cancel(Scope::All)?;
    }
    if args.stop {
        client.stop(Scope::All)?;
    }

    apply_settings(&client, &args)?;

    let text = if args.text.is_empty() {
        if args.cancel || args.stop {
            client.close();
            return Ok(());
        }
        let mut input = String::new();
        io::stdin()
            .read_to_string(&mut input)
            .context("failed to read text from stdin")?;
        input
    } else {
        args.text.join(" ")
    };

    if text.trim().is_empty() {
        bail!("nothing to say");
    }

    if args.wait {
        let finished = speak_and_wait(&client, &text)?;
        debug!("Speech finished: {}", finished);
    } else {
        let message_id = client.speak(&text)?;
        debug!("Queued message {:?}", message_id);
    }

    client.close();
    Ok(())
}

/// Speak `text` and block until the daemon reports its end or cancellation.
fn speak_and_wait(client: &SsipClient, text: &str) -> anyhow::Result<EventType> {
    let (done_tx, done_rx) = bounded(1);
    let message_id = client.speak_tracked(
        text,
        &[EventType::End, EventType::Cancel],
        move |event: &Event| {
            let _ = done_tx.try_send(event.event_type);
        },
    )?;
    // Without an id no subscription was installed, so nothing would arrive.
    let Some(message_id) = message_id else {
        bail!("the speech daemon returned no message id; cannot wait for it");
    };
    info!("⏳ Waiting for message {}", message_id);

    loop {
        match done_rx.recv_timeout(POLL_INTERVAL) {
            Ok(event_type) => return Ok(event_type),
            Err(RecvTimeoutError::Timeout) if client.is_connected() => continue,
            Err(_) => bail!("connection to the speech daemon was lost before speech finished"),
        }
    }
}

fn apply_settings(client: &SsipClient, args: &Args) -> anyhow::Result<()> {
    client.set_priority(args.priority)?;

    if let Some(module) = &args.output_module {
        client.set_output_module(module, Scope::Current)?;
    }
    if let Some(language) = &args.language {
        client.set_language(language, Scope::Current)?;
    }
    if let Some(voice) = args.voice_type {
        client.set_voice(voice, Scope::Current)?;
    }
    if let Some(voice) = &args.synthesis_voice {
        client.set_synthesis_voice(voice, Scope::Current)?;
    }
    if let Some(mode) = args.punctuation_mode {
        client.set_punctuation(mode, Scope::Current)?;
    }
    if let Some(rate) = args.rate {
        client.set_rate(rate, Scope::Current)?;
    }
    if let Some(pitch) = args.pitch {
        client.set_pitch(pitch, Scope::Current)?;
    }
    if let Some(volume) = args.volume {
        client.set_volume(volume, Scope::Current)?;
    }
    if args.spelling {
        client.set_spelling(true, Scope::Current)?;
    }
    Ok(())
}

fn print_list(items: &[String], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(items)?);
    } else {
        for item in items {
            println!("{}", item);
        }
    }
    Ok(())
}

fn print_voices(client: &SsipClient, json: bool) -> anyhow::Result<()> {
    let voices = client.list_synthesis_voices()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&voices)?);
        return Ok(());
    }

    println!("{:<32} {:<12} {}", "NAME", "LANGUAGE", "VARIANT");
    for voice in &voices {
        println!("{:<32} {:<12} {}", voice.name, voice.language, voice.variant);
    }
    Ok(())
}

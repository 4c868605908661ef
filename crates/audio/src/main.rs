use std::error::Error;
use std::io::{self, BufRead, Write};
use std::thread;

use audio::{ClickPlayer, SoundEngine};
use project::model::{FilterType, SoundParam, SoundParameters, Waveform};

// Configure logging for the demo
fn setup_logging() {
    let log_path = std::env::temp_dir().join("metronome_click_demo.log");
    println!("Logging to file: {}", log_path.display());

    let file = match std::fs::OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Warning: Could not open log file: {}", e);
            return;
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
            writeln!(buf, "[{}] [{}] {}", timestamp, record.level(), record.args())
        })
        .target(env_logger::Target::Pipe(Box::new(file)))
        .init();
}

fn describe(sound: &SoundParameters) -> String {
    format!(
        "{:.0}Hz gain {:.2} {:?} filter {:?}@{:.0}Hz attack {:.3}s decay {:.3}s",
        sound.frequency,
        sound.gain,
        sound.waveform,
        sound.filter.kind,
        sound.filter.cutoff_frequency,
        sound.attack,
        sound.decay
    )
}

// Interactive audition of a single click sound
fn run_interactive_demo() -> Result<(), Box<dyn Error>> {
    println!("Metronome Click Demo");
    println!("====================");

    let mut player = ClickPlayer::try_new()?;
    let mut sound = SoundParameters::for_channel(project::ChannelId::MAIN);

    println!("\nAvailable commands:");
    println!("  <enter>: Play the click");
    println!("  s/q/w/t: Sine, square, sawtooth, triangle");
    println!("  n/l/h/b: No filter, lowpass, highpass, bandpass");
    println!("  +/-: Raise/lower pitch by 50Hz");
    println!("  a <secs> / d <secs>: Attack / decay length");
    println!("  r: Play a bar of four clicks at 120 BPM");
    println!("  x: Quit");

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let mut input = String::new();

    loop {
        print!("> ");
        io::stdout().flush()?;
        input.clear();
        if reader.read_line(&mut input)? == 0 {
            break;
        }

        let mut parts = input.split_whitespace();
        let update = match parts.next() {
            None => None,
            Some("x") => break,
            Some("s") => Some(SoundParam::Waveform(Waveform::Sine)),
            Some("q") => Some(SoundParam::Waveform(Waveform::Square)),
            Some("w") => Some(SoundParam::Waveform(Waveform::Sawtooth)),
            Some("t") => Some(SoundParam::Waveform(Waveform::Triangle)),
            Some("n") => Some(SoundParam::FilterType(FilterType::None)),
            Some("l") => Some(SoundParam::FilterType(FilterType::Lowpass)),
            Some("h") => Some(SoundParam::FilterType(FilterType::Highpass)),
            Some("b") => Some(SoundParam::FilterType(FilterType::Bandpass)),
            Some("+") => Some(SoundParam::Frequency(sound.frequency + 50.0)),
            Some("-") => Some(SoundParam::Frequency(sound.frequency - 50.0)),
            Some("a") => parts.next().and_then(|v| v.parse().ok()).map(SoundParam::Attack),
            Some("d") => parts.next().and_then(|v| v.parse().ok()).map(SoundParam::Decay),
            Some("r") => {
                for _ in 0..4 {
                    player.trigger(&sound);
                    thread::sleep(std::time::Duration::from_millis(500));
                }
                continue;
            }
            Some(other) => {
                println!("Unknown command: {}", other);
                continue;
            }
        };

        if let Some(update) = update {
            sound.apply(update);
        }
        println!("{}", describe(&sound));
        player.trigger(&sound);
    }

    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    setup_logging();
    run_interactive_demo()?;
    println!("Click demo completed");
    Ok(())
}

use std::error::Error;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use app_state::{Command, MetronomeRunner, MetronomeStatus};
use audio::{ClickPlayer, SoundEngine};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use events::EventBus;
use log::{error, info, warn};
use project::model::{ChannelId, FilterType, SoundParam, SoundParameters, Waveform};
use project::{get_data_dir, PresetLibrary, SettingsStore};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table},
    Frame, Terminal,
};

const TIMEOUT_CHOICES: [Option<u32>; 8] = [None, Some(5), Some(10), Some(15), Some(20), Some(30), Some(45), Some(60)];

// The terminal belongs to the UI, so logs go to a file in the data dir
fn setup_logging(data_dir: &Path) {
    let log_path = data_dir.join("metronome.log");
    let file = match fs::OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Warning: Could not open log file {}: {}", log_path.display(), e);
            return;
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            writeln!(buf, "[{}] [{}] {}", timestamp, record.level(), record.args())
        })
        .target(env_logger::Target::Pipe(Box::new(file)))
        .init();
}

fn next_waveform(waveform: Waveform) -> Waveform {
    match waveform {
        Waveform::Sine => Waveform::Square,
        Waveform::Square => Waveform::Sawtooth,
        Waveform::Sawtooth => Waveform::Triangle,
        Waveform::Triangle => Waveform::Sine,
    }
}

fn next_filter(kind: FilterType) -> FilterType {
    match kind {
        FilterType::None => FilterType::Lowpass,
        FilterType::Lowpass => FilterType::Highpass,
        FilterType::Highpass => FilterType::Bandpass,
        FilterType::Bandpass => FilterType::None,
    }
}

/// Keys that edit the selected channel's sound
fn sound_command(code: KeyCode, channel: ChannelId, sound: &SoundParameters) -> Option<Command> {
    let param = match code {
        KeyCode::Char('w') => SoundParam::Waveform(next_waveform(sound.waveform)),
        KeyCode::Char('f') => SoundParam::FilterType(next_filter(sound.filter.kind)),
        KeyCode::Char('n') => SoundParam::Frequency(sound.frequency - 10.0),
        KeyCode::Char('N') => SoundParam::Frequency(sound.frequency + 10.0),
        KeyCode::Char('g') => SoundParam::Gain(sound.gain - 0.05),
        KeyCode::Char('G') => SoundParam::Gain(sound.gain + 0.05),
        KeyCode::Char('c') => SoundParam::FilterCutoff(sound.filter.cutoff_frequency / 1.1),
        KeyCode::Char('C') => SoundParam::FilterCutoff(sound.filter.cutoff_frequency * 1.1),
        KeyCode::Char('y') => SoundParam::FilterQ(sound.filter.q / 1.1),
        KeyCode::Char('Y') => SoundParam::FilterQ(sound.filter.q * 1.1),
        KeyCode::Char('k') => SoundParam::Attack(sound.attack - 0.001),
        KeyCode::Char('K') => SoundParam::Attack(sound.attack + 0.001),
        KeyCode::Char('e') => SoundParam::Decay(sound.decay - 0.01),
        KeyCode::Char('E') => SoundParam::Decay(sound.decay + 0.01),
        _ => return None,
    };
    Some(Command::UpdateSound { channel, param })
}

fn header_line(status: &MetronomeStatus) -> String {
    let tempo = status.tempo;
    let state = if status.is_running { "PLAYING" } else { "STOPPED" };
    let audio = if status.audio_available { "" } else { " | NO AUDIO" };
    format!(
        "BPM:{} BEATS:{} SUB:x{} SPEED:{}% | BEAT {}.{} | {} | TIMER {} | VOL {:.0}%{}",
        tempo.bpm(),
        tempo.beats_per_measure(),
        tempo.subdivision(),
        tempo.speed_percentage(),
        status.cursor.beat + 1,
        status.cursor.subdivision + 1,
        state,
        status.timer,
        status.master_volume * 100.0,
        audio
    )
}

/// Cursor and preset list; everything else lives on the playback thread
struct App {
    selected_channel: usize,
    selected_slot: usize,
    presets: Vec<String>,
    message: String,
}

impl App {
    fn new(library: &PresetLibrary) -> Self {
        let mut app = Self {
            selected_channel: 0,
            selected_slot: 0,
            presets: Vec::new(),
            message: String::new(),
        };
        app.refresh_presets(library);
        app
    }

    fn refresh_presets(&mut self, library: &PresetLibrary) {
        match library.list() {
            Ok(presets) => self.presets = presets,
            Err(e) => warn!("Could not list presets: {}", e),
        }
    }

    // Keep the selection inside the grid after rows or slots change
    fn clamp_selection(&mut self, status: &MetronomeStatus) {
        let channels = status.snapshot.channels.len();
        let slots = status.tempo.slot_count();
        self.selected_channel = self.selected_channel.min(channels.saturating_sub(1));
        self.selected_slot = self.selected_slot.min(slots.saturating_sub(1));
    }

    fn selected_id(&self, status: &MetronomeStatus) -> ChannelId {
        status
            .snapshot
            .channels
            .get(self.selected_channel)
            .map(|c| c.id)
            .unwrap_or(ChannelId::MAIN)
    }

    fn selected_sound(&self, status: &MetronomeStatus) -> SoundParameters {
        status
            .snapshot
            .channels
            .get(self.selected_channel)
            .map(|c| c.sound)
            .unwrap_or_else(SoundParameters::fallback)
    }

    /// Map a key to a playback command. Returns false on quit.
    fn handle_key(&mut self, code: KeyCode, runner: &MetronomeRunner, library: &PresetLibrary) -> bool {
        let status = runner.status();
        let channel = self.selected_id(&status);
        let sound = self.selected_sound(&status);

        let command = match code {
            KeyCode::Char('q') | KeyCode::Esc => return false,
            KeyCode::Char(' ') => Some(Command::TogglePlayback),
            KeyCode::Left => {
                self.selected_slot = self.selected_slot.saturating_sub(1);
                None
            }
            KeyCode::Right => {
                self.selected_slot += 1;
                None
            }
            KeyCode::Up => {
                self.selected_channel = self.selected_channel.saturating_sub(1);
                None
            }
            KeyCode::Down => {
                self.selected_channel += 1;
                None
            }
            KeyCode::Enter | KeyCode::Char('x') => Some(Command::Toggle {
                channel,
                index: self.selected_slot,
            }),
            KeyCode::Char('+') | KeyCode::Char('=') => Some(Command::AdjustBpm(1)),
            KeyCode::Char('-') => Some(Command::AdjustBpm(-1)),
            KeyCode::PageUp => Some(Command::AdjustBpm(10)),
            KeyCode::PageDown => Some(Command::AdjustBpm(-10)),
            KeyCode::Char(']') => Some(Command::AdjustBeatsPerMeasure(1)),
            KeyCode::Char('[') => Some(Command::AdjustBeatsPerMeasure(-1)),
            KeyCode::Char('.') => Some(Command::AdjustSubdivision(1)),
            KeyCode::Char(',') => Some(Command::AdjustSubdivision(-1)),
            KeyCode::Char('}') => Some(Command::SetSpeedPercentage(status.tempo.speed_percentage() as i32 + 5)),
            KeyCode::Char('{') => Some(Command::SetSpeedPercentage(status.tempo.speed_percentage() as i32 - 5)),
            KeyCode::Char('a') => Some(Command::AddChannel),
            KeyCode::Char('d') => Some(Command::RemoveChannel(channel)),
            KeyCode::Char('p') => Some(Command::Preview(channel)),
            KeyCode::Char('v') => Some(Command::SetMasterVolume(status.master_volume - 0.05)),
            KeyCode::Char('V') => Some(Command::SetMasterVolume(status.master_volume + 0.05)),
            KeyCode::Char('t') => {
                let current = TIMEOUT_CHOICES
                    .iter()
                    .position(|c| *c == status.timeout_minutes)
                    .unwrap_or(0);
                Some(Command::SetTimeoutMinutes(TIMEOUT_CHOICES[(current + 1) % TIMEOUT_CHOICES.len()]))
            }
            KeyCode::Char('r') => Some(Command::ResetTimer),
            KeyCode::Char('s') => {
                self.save_preset(&status, library);
                None
            }
            KeyCode::Char(c @ '1'..='9') => {
                let index = c as usize - '1' as usize;
                self.load_preset(index, library)
            }
            _ => sound_command(code, channel, &sound),
        };

        if let Some(command) = command {
            if !runner.send(command) {
                self.message = "Playback thread stopped".to_string();
            }
        }
        true
    }

    fn save_preset(&mut self, status: &MetronomeStatus, library: &PresetLibrary) {
        let name = chrono::Local::now().format("Preset %Y-%m-%d %H%M%S").to_string();
        match library.save(&name, &status.snapshot) {
            Ok(_) => {
                self.message = format!("Saved '{}'", name);
                self.refresh_presets(library);
            }
            Err(e) => {
                error!("Could not save preset: {}", e);
                self.message = format!("Save failed: {}", e);
            }
        }
    }

    fn load_preset(&mut self, index: usize, library: &PresetLibrary) -> Option<Command> {
        let name = self.presets.get(index)?.clone();
        match library.load(&name) {
            Ok(preset) => {
                self.message = format!("Loaded '{}'", name);
                Some(Command::ApplyPreset(preset.snapshot))
            }
            Err(e) => {
                error!("Could not load preset {}: {}", name, e);
                self.message = format!("Load failed: {}", e);
                None
            }
        }
    }
}

fn draw(f: &mut Frame, app: &App, status: &MetronomeStatus) {
    let channels = &status.snapshot.channels;
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(channels.len() as u16 + 2),
            Constraint::Length(4),
            Constraint::Min(7),
        ])
        .split(f.area());

    let tempo = status.tempo;
    let header = Paragraph::new(header_line(status)).block(Block::default().borders(Borders::ALL).title("METRONOME"));
    f.render_widget(header, chunks[0]);

    let per_beat = tempo.subdivision().max(1) as usize;
    let rows: Vec<Row> = channels
        .iter()
        .enumerate()
        .map(|(row_idx, channel)| {
            let label = if channel.id.is_main() {
                "main".to_string()
            } else {
                format!("ch-{:<2}", channel.id.0)
            };
            let mut cells = vec![Cell::from(label).style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))];
            cells.extend(channel.pattern.iter().enumerate().map(|(i, &on)| {
                let symbol = if on { "X" } else { "." };
                let mut style = Style::default();
                if i % per_beat == 0 {
                    style = style.add_modifier(Modifier::BOLD);
                }
                if status.is_running && status.cursor.slot == i {
                    style = style.bg(Color::DarkGray);
                }
                if app.selected_channel == row_idx && app.selected_slot == i {
                    style = style.fg(Color::Yellow);
                }
                Cell::from(symbol).style(style)
            }));
            Row::new(cells).height(1)
        })
        .collect();
    let mut widths = vec![Constraint::Length(6)];
    widths.extend(std::iter::repeat(Constraint::Length(1)).take(tempo.slot_count()));
    let table = Table::new(rows, widths).block(Block::default().title("PATTERN").borders(Borders::ALL));
    f.render_widget(table, chunks[1]);

    let sound = app.selected_sound(status);
    let sound_line = format!(
        "{:.0}Hz gain {:.2} {:?} | filter {:?} {:.0}Hz Q {:.1} | attack {:.0}ms decay {:.0}ms",
        sound.frequency,
        sound.gain,
        sound.waveform,
        sound.filter.kind,
        sound.filter.cutoff_frequency,
        sound.filter.q,
        sound.attack * 1000.0,
        sound.decay * 1000.0
    );
    let presets = if app.presets.is_empty() {
        "no presets".to_string()
    } else {
        app.presets
            .iter()
            .take(9)
            .enumerate()
            .map(|(i, name)| format!("{}:{}", i + 1, name))
            .collect::<Vec<_>>()
            .join("  ")
    };
    let sound_panel = Paragraph::new(vec![Line::from(sound_line), Line::from(presets)]).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!("SOUND {}", app.selected_id(status))),
    );
    f.render_widget(sound_panel, chunks[2]);

    let footer = Paragraph::new(vec![
        Line::from("[Space] Play/Stop [Arrows] Move [Enter] Toggle [+/-] BPM [ [ ] ] Beats [,/.] Subdiv [{/}] Speed"),
        Line::from("[a/d] Add/Remove channel [p] Preview [w] Wave [f] Filter [n/N] Pitch [g/G] Gain"),
        Line::from("[c/C] Cutoff [y/Y] Q [k/K] Attack [e/E] Decay [v/V] Volume [t] Timeout [r] Reset timer"),
        Line::from("[s] Save preset [1-9] Load preset [q] Quit"),
        Line::from(Span::styled(app.message.clone(), Style::default().fg(Color::Green))),
    ])
    .block(Block::default().borders(Borders::ALL));
    f.render_widget(footer, chunks[3]);
}

fn run<B: Backend>(terminal: &mut Terminal<B>, runner: &MetronomeRunner, library: &PresetLibrary) -> io::Result<()> {
    let mut app = App::new(library);

    loop {
        let status = runner.status();
        app.clamp_selection(&status);
        terminal.draw(|f| draw(f, &app, &status))?;

        // Short poll keeps the cursor display close to the beat
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && !app.handle_key(key.code, runner, library) {
                    break;
                }
            }
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let data_dir = get_data_dir();
    fs::create_dir_all(&data_dir)?;
    setup_logging(&data_dir);
    info!("Starting metronome with data dir {}", data_dir.display());

    let mut store = SettingsStore::open(&data_dir);
    let settings = store.load_settings();
    let library = PresetLibrary::new(&data_dir);

    let events = Arc::new(EventBus::new());
    let mut runner = MetronomeRunner::spawn(settings, events, || Box::new(ClickPlayer::new()) as Box<dyn SoundEngine>);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run(&mut terminal, &runner, &library);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    runner.shutdown();
    let final_status = runner.status();
    store.store_settings(&final_status.settings())?;
    if let Err(e) = store.save() {
        error!("Could not save settings: {}", e);
        eprintln!("Could not save settings: {}", e);
    }
    info!("Metronome exited");

    result?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use app_state::Metronome;
    use audio::RecordingEngine;

    #[test]
    fn test_header_shows_beats_per_measure() {
        let mut metronome = Metronome::new(Box::new(RecordingEngine::new()));
        metronome.set_beats_per_measure(3);
        metronome.set_subdivision(2);
        let header = header_line(&MetronomeStatus::of(&metronome));

        assert!(header.starts_with("BPM:120 BEATS:3 SUB:x2 SPEED:100%"), "{}", header);
        assert!(!header.contains("/4"));
        assert!(header.contains("STOPPED"));
    }

    #[test]
    fn test_attack_and_q_keys() {
        let sound = SoundParameters::for_channel(ChannelId::MAIN);
        let param = |code| match sound_command(code, ChannelId::MAIN, &sound) {
            Some(Command::UpdateSound { param, .. }) => Some(param),
            _ => None,
        };

        assert!(matches!(param(KeyCode::Char('K')), Some(SoundParam::Attack(a)) if a > sound.attack));
        assert!(matches!(param(KeyCode::Char('k')), Some(SoundParam::Attack(a)) if a < sound.attack));
        assert!(matches!(param(KeyCode::Char('Y')), Some(SoundParam::FilterQ(q)) if q > sound.filter.q));
        assert!(matches!(param(KeyCode::Char('y')), Some(SoundParam::FilterQ(q)) if q < sound.filter.q));
        assert!(matches!(param(KeyCode::Char('E')), Some(SoundParam::Decay(d)) if d > sound.decay));
        assert!(param(KeyCode::Char('z')).is_none());
    }

    #[test]
    fn test_every_sound_param_has_a_key() {
        let sound = SoundParameters::for_channel(ChannelId(1));
        let keys = "wfnNgGcCyYkKeE";
        let params: Vec<SoundParam> = keys
            .chars()
            .filter_map(|c| match sound_command(KeyCode::Char(c), ChannelId(1), &sound) {
                Some(Command::UpdateSound { channel, param }) => {
                    assert_eq!(channel, ChannelId(1));
                    Some(param)
                }
                _ => None,
            })
            .collect();
        assert_eq!(params.len(), keys.len());

        let covered = |f: fn(&SoundParam) -> bool| params.iter().any(f);
        assert!(covered(|p| matches!(p, SoundParam::Frequency(_))));
        assert!(covered(|p| matches!(p, SoundParam::Gain(_))));
        assert!(covered(|p| matches!(p, SoundParam::Waveform(_))));
        assert!(covered(|p| matches!(p, SoundParam::FilterType(_))));
        assert!(covered(|p| matches!(p, SoundParam::FilterCutoff(_))));
        assert!(covered(|p| matches!(p, SoundParam::FilterQ(_))));
        assert!(covered(|p| matches!(p, SoundParam::Attack(_))));
        assert!(covered(|p| matches!(p, SoundParam::Decay(_))));
    }
}

use super::{EngineEvent, MAX_VOLUME, PlayState, PlaybackEngine};
use crate::library;
use anyhow::{Context, Result};
use rodio::cpal::Device;
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink, Source};
use std::fs::File;
#[cfg(unix)]
use std::fs::OpenOptions;
#[cfg(unix)]
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

const POSITION_REPORT_INTERVAL: Duration = Duration::from_millis(250);

/// The system output stream. Both slots mix into the same stream.
pub struct AudioOutput {
    stream: OutputStream,
    device: Option<String>,
}

impl AudioOutput {
    pub fn open(device: Option<&str>) -> Result<Rc<Self>> {
        let mut stream = quietly(|| open_stream(device))?;
        stream.log_on_drop(false);
        tracing::info!(device = device.unwrap_or("default"), "audio output opened");
        Ok(Rc::new(Self {
            stream,
            device: device.map(ToOwned::to_owned),
        }))
    }

    pub fn device_name(&self) -> &str {
        self.device.as_deref().unwrap_or("System default output")
    }

    pub fn available_devices() -> Vec<String> {
        let mut outputs: Vec<String> = quietly(|| {
            rodio::cpal::default_host()
                .output_devices()
                .ok()
                .into_iter()
                .flatten()
                .filter_map(|device| device.name().ok())
                .collect()
        });
        outputs.sort_by_cached_key(|name| name.to_ascii_lowercase());
        outputs.dedup();
        outputs
    }
}

fn open_stream(device: Option<&str>) -> Result<OutputStream> {
    let host = rodio::cpal::default_host();
    if let Some(requested) = device {
        let device = host
            .output_devices()
            .context("failed to enumerate output devices")?
            .find(|candidate| candidate.name().ok().as_deref() == Some(requested))
            .with_context(|| format!("audio output device not found: {requested}"))?;
        return start_stream(Some(device));
    }

    let default_err = match start_stream(None) {
        Ok(stream) => return Ok(stream),
        Err(err) => err,
    };
    tracing::warn!(error = %format!("{default_err:#}"), "default output unavailable");

    for device in host.output_devices().into_iter().flatten() {
        let name = device.name().unwrap_or_default();
        match start_stream(Some(device)) {
            Ok(stream) => {
                tracing::info!(device = %name, "using fallback output device");
                return Ok(stream);
            }
            Err(err) => tracing::debug!(device = %name, error = %format!("{err:#}"), "output device unusable"),
        }
    }
    Err(default_err.context("no output device could be started"))
}

fn start_stream(device: Option<Device>) -> Result<OutputStream> {
    let builder = match device {
        Some(device) => OutputStreamBuilder::from_device(device),
        None => OutputStreamBuilder::from_default_device(),
    }
    .context("failed to configure output device")?;
    builder
        .with_error_callback(|err| tracing::warn!(%err, "audio stream error"))
        .open_stream_or_fallback()
        .context("failed to start output stream")
}

/// One sink on the shared output stream.
pub struct RodioEngine {
    output: Rc<AudioOutput>,
    sink: Sink,
    current: Option<PathBuf>,
    title: Option<String>,
    track_duration: Option<Duration>,
    duration_reported: bool,
    state: PlayState,
    volume: u8,
    muted: bool,
    events: Vec<EngineEvent>,
    last_position_report: Option<Instant>,
}

impl RodioEngine {
    pub fn new(output: Rc<AudioOutput>) -> Self {
        let sink = Sink::connect_new(output.stream.mixer());
        sink.pause();
        Self {
            output,
            sink,
            current: None,
            title: None,
            track_duration: None,
            duration_reported: false,
            state: PlayState::Stopped,
            volume: MAX_VOLUME,
            muted: false,
            events: Vec::new(),
            last_position_report: None,
        }
    }

    fn effective_volume(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            f32::from(self.volume) / f32::from(MAX_VOLUME)
        }
    }

    fn append_source(&mut self, path: &Path) -> Result<Option<Duration>> {
        self.sink.stop();
        self.sink = Sink::connect_new(self.output.stream.mixer());
        self.sink.pause();

        let file =
            File::open(path).with_context(|| format!("failed to open track {}", path.display()))?;
        let source = Decoder::try_from(file)
            .with_context(|| format!("failed to decode {}", path.display()))?;
        let duration = source.total_duration();
        self.sink.append(source);
        self.sink.set_volume(self.effective_volume());
        Ok(duration)
    }

    fn rewind_if_drained(&mut self) -> Result<()> {
        if !self.sink.empty() {
            return Ok(());
        }
        let Some(path) = self.current.clone() else {
            return Ok(());
        };
        self.append_source(&path)?;
        Ok(())
    }
}

impl PlaybackEngine for RodioEngine {
    fn load(&mut self, path: &Path) -> Result<()> {
        self.current = None;
        self.title = None;
        self.duration_reported = false;
        self.state = PlayState::Stopped;

        let duration = match self.append_source(path) {
            Ok(duration) => duration,
            Err(err) => {
                self.events.push(EngineEvent::LoadFailed(format!("{err:#}")));
                return Err(err);
            }
        };

        self.track_duration = duration.or_else(|| library::probe_duration(path));
        self.title = library::read_title(path);
        self.current = Some(path.to_path_buf());
        self.events.push(EngineEvent::Loaded);
        self.events.push(EngineEvent::Buffered);
        Ok(())
    }

    fn play(&mut self) {
        if self.current.is_none() {
            return;
        }
        if let Err(err) = self.rewind_if_drained() {
            tracing::warn!(error = %format!("{err:#}"), "failed to reopen drained track");
            return;
        }

        self.sink.play();
        self.state = PlayState::Playing;
        self.events.push(EngineEvent::StateChanged(PlayState::Playing));
        if !self.duration_reported {
            self.duration_reported = true;
            self.events.push(EngineEvent::DurationChanged(
                self.track_duration.unwrap_or_default(),
            ));
        }
    }

    fn pause(&mut self) {
        self.sink.pause();
        if self.current.is_some() && self.state != PlayState::Paused {
            self.state = PlayState::Paused;
            self.events.push(EngineEvent::StateChanged(PlayState::Paused));
        }
    }

    fn set_position(&mut self, position: Duration) -> Result<()> {
        if self.current.is_none() {
            return Err(anyhow::anyhow!("no track loaded"));
        }
        self.rewind_if_drained()?;
        self.sink
            .try_seek(position)
            .map_err(|err| anyhow::anyhow!("failed to seek: {err:?}"))?;
        self.sink.set_volume(self.effective_volume());
        Ok(())
    }

    fn set_volume(&mut self, level: u8) {
        self.volume = level.min(MAX_VOLUME);
        self.sink.set_volume(self.effective_volume());
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.sink.set_volume(self.effective_volume());
    }

    fn state(&self) -> PlayState {
        self.state
    }

    fn metadata_title(&self) -> Option<String> {
        self.title.clone()
    }

    fn poll_events(&mut self) -> Vec<EngineEvent> {
        if self.state == PlayState::Playing {
            if self.sink.empty() {
                self.state = PlayState::Stopped;
                self.events.push(EngineEvent::StateChanged(PlayState::Stopped));
            } else if self
                .last_position_report
                .is_none_or(|at| at.elapsed() >= POSITION_REPORT_INTERVAL)
            {
                self.last_position_report = Some(Instant::now());
                self.events
                    .push(EngineEvent::PositionChanged(self.sink.get_pos()));
            }
        }
        std::mem::take(&mut self.events)
    }

    fn name(&self) -> &'static str {
        "rodio"
    }
}

/// Points stderr at /dev/null until dropped. Audio backends print device
/// probing noise there, which would land on top of the terminal UI.
#[cfg(unix)]
struct StderrSilencer {
    saved: libc::c_int,
}

#[cfg(unix)]
impl StderrSilencer {
    fn engage() -> Option<Self> {
        let devnull = OpenOptions::new().write(true).open("/dev/null").ok()?;
        let saved = unsafe { libc::dup(libc::STDERR_FILENO) };
        if saved < 0 {
            return None;
        }
        unsafe { libc::dup2(devnull.as_raw_fd(), libc::STDERR_FILENO) };
        Some(Self { saved })
    }
}

#[cfg(unix)]
impl Drop for StderrSilencer {
    fn drop(&mut self) {
        unsafe {
            libc::dup2(self.saved, libc::STDERR_FILENO);
            libc::close(self.saved);
        }
    }
}

fn quietly<T>(operation: impl FnOnce() -> T) -> T {
    #[cfg(unix)]
    let _silencer = StderrSilencer::engage();
    operation()
}

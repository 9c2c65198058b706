/// Marker ffmpeg prints once per input: `  Duration: 00:01:30.50, start: ...`
pub const DURATION_MARKER: &str = "Duration:";

/// Marker on each stats line: `frame=  120 ... time=00:00:04.80 bitrate=...`
pub const POSITION_MARKER: &str = "time=";

/// Per-job progress as reported by the engine
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProgressState {
    pub total_duration_seconds: Option<f64>,
    pub current_position_seconds: f64,
}

/// What a single line changed
#[derive(Debug, Clone, PartialEq)]
pub enum MarkerUpdate {
    /// Total duration was learned (only ever once per job)
    Duration(f64),
    /// Position advanced (or stayed equal)
    Position(f64),
    /// Position marker older than the current position; not applied
    Regressed(f64),
    /// Marker found but its value did not parse
    Malformed { marker: &'static str, text: String },
}

/// Parser for ffmpeg's human-readable stderr output (Duration / time= markers)
#[derive(Debug, Default, Clone)]
pub struct ProgressParser {
    state: ProgressState,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ProgressState {
        self.state
    }

    pub fn duration_s(&self) -> Option<f64> {
        self.state.total_duration_seconds
    }

    pub fn position_s(&self) -> f64 {
        self.state.current_position_seconds
    }

    /// Parse a single line of engine output
    pub fn parse_line(&mut self, line: &str) -> Vec<MarkerUpdate> {
        let mut updates = Vec::new();

        if self.state.total_duration_seconds.is_none() {
            if let Some((_, rest)) = line.split_once(DURATION_MARKER) {
                let text = rest.split(',').next().unwrap_or("").trim();
                match parse_timestamp(text) {
                    Some(seconds) => {
                        self.state.total_duration_seconds = Some(seconds);
                        updates.push(MarkerUpdate::Duration(seconds));
                    }
                    None => updates.push(MarkerUpdate::Malformed {
                        marker: DURATION_MARKER,
                        text: text.to_string(),
                    }),
                }
            }
        }

        if self.state.total_duration_seconds.is_some() {
            if let Some((_, rest)) = line.split_once(POSITION_MARKER) {
                let text = rest.split_whitespace().next().unwrap_or("");
                match parse_timestamp(text) {
                    Some(seconds) if seconds >= self.state.current_position_seconds => {
                        self.state.current_position_seconds = seconds;
                        updates.push(MarkerUpdate::Position(seconds));
                    }
                    Some(seconds) => updates.push(MarkerUpdate::Regressed(seconds)),
                    None => updates.push(MarkerUpdate::Malformed {
                        marker: POSITION_MARKER,
                        text: text.to_string(),
                    }),
                }
            }
        }

        updates
    }

    /// Job completion in percent, clamped to [0, 100]. Zero until the duration is known.
    pub fn percent(&self) -> f64 {
        match self.state.total_duration_seconds {
            Some(dur) if dur > 0.0 => {
                (self.state.current_position_seconds / dur * 100.0).clamp(0.0, 100.0)
            }
            _ => 0.0,
        }
    }
}

/// Parse `H:MM:SS[.ms]` into seconds
pub fn parse_timestamp(text: &str) -> Option<f64> {
    let mut parts = text.trim().split(':');
    let (h, m, s) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let hours = h.parse::<f64>().ok()?;
    let minutes = m.parse::<f64>().ok()?;
    let seconds = s.parse::<f64>().ok()?;
    let total = hours * 3600.0 + minutes * 60.0 + seconds;

    (total.is_finite() && hours >= 0.0 && minutes >= 0.0 && seconds >= 0.0).then_some(total)
}

/// Overall batch percent with equal weight per job.
///
/// Longer files do not count for more; this is a known coarseness of the bar.
pub fn overall_percent(completed_jobs: usize, job_percent: f64, total_jobs: usize) -> f64 {
    if total_jobs == 0 {
        return 0.0;
    }
    ((completed_jobs as f64 * 100.0 + job_percent) / total_jobs as f64).clamp(0.0, 100.0)
}

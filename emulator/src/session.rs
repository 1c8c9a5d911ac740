use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant as HostInstant};

use avcs_core::capture::CamSide;
use avcs_core::config::{BaselineSource, ControllerConfig, FeedbackResetPolicy};
use avcs_core::console::{self, Command, Setting, TargetCommand, catalog};
use avcs_core::controller::{Controller, TickInputs};
use avcs_core::curve::{EXHAUST_CAM_TARGET_CURVE, RPM_WEIGHT_CURVE};
use avcs_core::filter::WeightPolicy;
use avcs_core::telemetry::{EventId, TelemetryEvent};

use crate::engine::{SimulatedEngine, TICKS_PER_MS};

/// Engine speed the session starts at.
pub const DEFAULT_RPM: u32 = 2_500;
/// Oil temperature the session starts at.
pub const DEFAULT_OIL_TEMPERATURE_C: f32 = 20.0;

/// How a response line should be rendered.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Tone {
    Plain,
    Good,
    Warn,
    Bad,
}

/// One line of output for the operator.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub tone: Tone,
    pub text: String,
}

impl Response {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            tone: Tone::Plain,
            text: text.into(),
        }
    }

    fn good(text: impl Into<String>) -> Self {
        Self {
            tone: Tone::Good,
            text: text.into(),
        }
    }

    fn bad(text: impl Into<String>) -> Self {
        Self {
            tone: Tone::Bad,
            text: text.into(),
        }
    }
}

/// Simulated engine plus controller, driven one console line at a time.
pub struct Session {
    controller: Controller,
    config: ControllerConfig,
    engine: SimulatedEngine,
    oil_temperature_c: f32,
    /// Fixed phase target per bank; `None` follows the RPM curve.
    targets: [Option<f32>; 2],
    telemetry_cursor: EventId,
    simulated: Duration,
    transcript: Option<TranscriptLogger>,
    started_at: HostInstant,
}

impl Session {
    /// Starts a session, optionally recording a transcript to `transcript`.
    pub fn new(transcript: Option<&Path>) -> io::Result<Self> {
        let config = ControllerConfig::new();
        let controller = Controller::with_edge_queue(config)
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidInput, error.to_string()))?;
        let transcript = transcript.map(TranscriptLogger::new).transpose()?;

        Ok(Self {
            controller,
            config,
            engine: SimulatedEngine::new(0, DEFAULT_RPM),
            oil_temperature_c: DEFAULT_OIL_TEMPERATURE_C,
            targets: [None; 2],
            telemetry_cursor: 0,
            simulated: Duration::ZERO,
            transcript,
            started_at: HostInstant::now(),
        })
    }

    #[cfg(test)]
    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    #[cfg(test)]
    pub fn engine(&self) -> &SimulatedEngine {
        &self.engine
    }

    /// Parses and executes one console line.
    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<Response>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.started_at.elapsed();
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.append_line(elapsed, TranscriptRole::Host, trimmed)?;
        }

        let responses = match console::parse(trimmed) {
            Ok(command) => self.execute(command),
            Err(error) => vec![Response::bad(format!("ERR {error}"))],
        };

        if let Some(transcript) = self.transcript.as_mut() {
            for response in &responses {
                transcript.append_line(elapsed, TranscriptRole::Emulator, &response.text)?;
            }
        }
        Ok(responses)
    }

    fn execute(&mut self, command: Command<'_>) -> Vec<Response> {
        match command {
            Command::Rpm(rpm) => {
                self.engine.set_rpm(rpm);
                vec![Response::good(format!("OK rpm {rpm}"))]
            }
            Command::Oil(celsius) => {
                self.oil_temperature_c = celsius;
                vec![Response::good(format!("OK oil {celsius:.1}C"))]
            }
            Command::Target(target) => {
                match target {
                    TargetCommand::Auto => self.targets = [None; 2],
                    TargetCommand::Fixed { side: None, degrees } => {
                        self.targets = [Some(degrees); 2];
                    }
                    TargetCommand::Fixed {
                        side: Some(side),
                        degrees,
                    } => self.targets[side.index()] = Some(degrees),
                }
                let text = match target {
                    TargetCommand::Auto => "OK target follows rpm curve".to_string(),
                    TargetCommand::Fixed { side, degrees } => {
                        format!("OK target {} {degrees:.1}deg", side_label(side))
                    }
                };
                vec![Response::good(text)]
            }
            Command::Phase { side, degrees } => {
                self.engine.set_cam_phase(side, degrees);
                vec![Response::good(format!("OK {side} cam phase {degrees:.1}deg"))]
            }
            Command::Run(duration) => self.run(duration),
            Command::Drop { shaft, duration } => {
                let millis = u32::try_from(duration.as_millis()).unwrap_or(u32::MAX);
                self.engine.drop_sensor(shaft, millis);
                vec![Response::good(format!("OK {shaft} silent for {millis}ms"))]
            }
            Command::Glitch(shaft) => {
                if self.engine.glitch(shaft) {
                    vec![Response::good(format!("OK {shaft} edge repeated"))]
                } else {
                    vec![Response::bad(format!("ERR {shaft} has not produced an edge yet"))]
                }
            }
            Command::Status => self.status(),
            Command::Faults => self.faults(),
            Command::Set(setting) => vec![self.apply_setting(setting)],
            Command::Help(topic) => help(topic),
        }
    }

    fn inputs(&self) -> TickInputs {
        #[allow(clippy::cast_precision_loss)]
        let rpm = self.controller.diagnostics().crank_rpm() as f32;
        let scheduled = EXHAUST_CAM_TARGET_CURVE.value_at(rpm);
        let mut inputs = TickInputs::new(self.oil_temperature_c, scheduled);
        inputs.target_left = self.targets[CamSide::Left.index()].unwrap_or(scheduled);
        inputs.target_right = self.targets[CamSide::Right.index()].unwrap_or(scheduled);
        inputs
    }

    /// Advances the simulation in 1 ms ticks and reports what happened.
    fn run(&mut self, duration: Duration) -> Vec<Response> {
        let ticks = u32::try_from(duration.as_millis()).unwrap_or(u32::MAX);
        let mut responses = Vec::new();
        let mut queue_overflows = 0usize;

        for _ in 0..ticks {
            queue_overflows += self.engine.step(&mut self.controller).len();
            let inputs = self.inputs();
            let output = self.controller.tick(self.engine.now(), inputs);
            self.engine.apply_duty(&output);
            self.simulated += Duration::from_millis(1);
            responses.extend(self.drain_telemetry());
        }

        if queue_overflows > 0 {
            responses.push(Response {
                tone: Tone::Warn,
                text: format!("{queue_overflows} edges dropped on full queues"),
            });
        }
        responses.push(Response::good(format!(
            "OK ran {}ms, now {} at +{}ms",
            ticks,
            self.controller.mode(),
            self.simulated.as_millis()
        )));
        responses
    }

    fn drain_telemetry(&mut self) -> Vec<Response> {
        let telemetry = self.controller.telemetry();
        let responses = telemetry
            .since(self.telemetry_cursor)
            .map(|record| {
                let millis = record.timestamp / TICKS_PER_MS;
                let text = format!("[{millis:>8} ms] {}", record.event);
                let tone = match record.event {
                    TelemetryEvent::FaultRaised(_) => Tone::Bad,
                    TelemetryEvent::ModeChanged(_) => Tone::Good,
                    TelemetryEvent::CalibrationRestarted | TelemetryEvent::FeedbackReset(_) => {
                        Tone::Warn
                    }
                };
                Response { tone, text }
            })
            .collect();
        self.telemetry_cursor = telemetry.next_event_id();
        responses
    }

    fn status(&self) -> Vec<Response> {
        let diagnostics = self.controller.diagnostics();
        let mut lines = vec![Response::plain(format!(
            "mode {} rpm {} (engine {}) oil {:.1}C errors {} init-errors {}",
            diagnostics.mode,
            diagnostics.crank_rpm(),
            self.engine.rpm(),
            self.oil_temperature_c,
            diagnostics.error_count,
            diagnostics.initialization_error_count,
        ))];

        let remaining = diagnostics.calibration_remaining();
        if remaining > 0 {
            lines.push(Response::plain(format!(
                "calibrating: crank {} left {} right {} pulses to go",
                diagnostics.crank.timing.countdown,
                diagnostics.cam(CamSide::Left).shaft.timing.countdown,
                diagnostics.cam(CamSide::Right).shaft.timing.countdown,
            )));
        }

        for side in CamSide::BOTH {
            let cam = diagnostics.cam(side);
            let label = side.to_string();
            lines.push(Response::plain(format!(
                "{label:<5} angle {:>6.2} target {:>6.2} duty {:>5.1}% baseline {:>7.2} noise {} timeouts {}",
                cam.angle,
                cam.target,
                cam.duty,
                cam.baseline,
                cam.shaft.noise,
                cam.shaft.timing.timeouts,
            )));
        }

        if let Some(fault) = diagnostics.current_error {
            lines.push(Response::bad(format!("error: {}", fault.message())));
        }
        if let Some(fault) = diagnostics.last_error {
            lines.push(Response {
                tone: Tone::Warn,
                text: format!("last error: {}", fault.message()),
            });
        }
        lines
    }

    fn faults(&self) -> Vec<Response> {
        let diagnostics = self.controller.diagnostics();
        if diagnostics.faults.is_empty() {
            return vec![Response::plain("no faults recorded")];
        }
        let mut lines: Vec<Response> = diagnostics
            .faults
            .iter()
            .map(|record| Response::bad(format!("#{:<3} {}", record.index, record.fault.message())))
            .collect();
        let shown = u32::try_from(diagnostics.faults.len()).unwrap_or(u32::MAX);
        if diagnostics.error_count > shown {
            lines.push(Response::plain(format!(
                "{} more not recorded",
                diagnostics.error_count - shown
            )));
        }
        lines
    }

    fn apply_setting(&mut self, setting: Setting) -> Response {
        let mut config = self.config;
        match setting {
            Setting::MeasuredBaseline => config.cam.baseline = BaselineSource::Measured,
            Setting::FixedBaseline => config.cam.baseline = BaselineSource::FACTORY,
            Setting::ResetFeedback => {
                config.feedback.reset_policy = FeedbackResetPolicy::ResetOnExit;
            }
            Setting::RetainFeedback => config.feedback.reset_policy = FeedbackResetPolicy::Retain,
            Setting::AdaptiveFilter => {
                config.smoothing.crank_rpm = WeightPolicy::RpmCurve(RPM_WEIGHT_CURVE);
            }
            Setting::FixedFilter => config.smoothing.crank_rpm = WeightPolicy::Fixed(1.0),
        }

        match self.controller.reconfigure(config) {
            Ok(()) => {
                self.config = config;
                Response::good(format!("OK {}", setting_label(setting)))
            }
            Err(error) => Response::bad(format!("ERR {error}")),
        }
    }
}

fn side_label(side: Option<CamSide>) -> String {
    side.map_or_else(|| "both".to_string(), |side| side.to_string())
}

const fn setting_label(setting: Setting) -> &'static str {
    match setting {
        Setting::MeasuredBaseline => "baseline measured",
        Setting::FixedBaseline => "baseline fixed",
        Setting::ResetFeedback => "feedback reset",
        Setting::RetainFeedback => "feedback retain",
        Setting::AdaptiveFilter => "filter adaptive",
        Setting::FixedFilter => "filter fixed",
    }
}

fn help(topic: Option<&str>) -> Vec<Response> {
    match topic {
        Some(name) => match catalog::find(name) {
            Some(spec) => vec![Response::plain(format!(
                "{:<48} - {}",
                spec.usage, spec.summary
            ))],
            None => vec![
                Response::bad(format!("No help available for `{name}`.")),
                Response::plain(format!("Available topics: {}", help_topic_list())),
            ],
        },
        None => {
            let mut lines = vec![Response::plain("Available commands:")];
            lines.extend(
                catalog::commands()
                    .iter()
                    .map(|spec| Response::plain(format!("  {:<48} - {}", spec.usage, spec.summary))),
            );
            lines.push(Response::plain("Type `help <topic>` for a specific command."));
            lines
        }
    }
}

fn help_topic_list() -> String {
    catalog::commands()
        .iter()
        .map(|spec| spec.name)
        .collect::<Vec<_>>()
        .join(", ")
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        logger.write_header()?;
        Ok(logger)
    }

    fn write_header(&mut self) -> io::Result<()> {
        writeln!(self.writer, "# AVCS Controller Emulator transcript")?;
        writeln!(
            self.writer,
            "# Timestamps are milliseconds since session start"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avcs_core::capture::ShaftId;
    use avcs_core::fault::Fault;
    use avcs_core::supervisor::Mode;

    fn session() -> Session {
        Session::new(None).expect("session without transcript")
    }

    fn texts(responses: &[Response]) -> Vec<&str> {
        responses.iter().map(|response| response.text.as_str()).collect()
    }

    #[test]
    fn parse_errors_are_reported_not_executed() {
        let mut session = session();
        let responses = session.handle_command("rpm fast").unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].tone, Tone::Bad);
        assert!(responses[0].text.starts_with("ERR "));
        assert_eq!(session.engine().rpm(), DEFAULT_RPM);
    }

    #[test]
    fn warm_engine_reaches_running() {
        let mut session = session();
        session.handle_command("oil 90").unwrap();
        let responses = session.handle_command("run 9s").unwrap();

        assert_eq!(session.controller().mode(), Mode::Running);
        let lines = texts(&responses);
        assert!(lines.iter().any(|line| line.ends_with("mode Calibrating -> Warming")));
        assert!(lines.iter().any(|line| line.ends_with("mode Warming -> Running")));
        assert!(lines.last().unwrap().starts_with("OK ran 9000ms, now Running"));
    }

    #[test]
    fn dropped_crank_sensor_forces_recalibration() {
        let mut session = session();
        session.handle_command("oil 90").unwrap();
        session.handle_command("run 9s").unwrap();
        session.handle_command("drop crank 1500ms").unwrap();
        let responses = session.handle_command("run 1200ms").unwrap();

        // Both cams lose their reference before the crank timeout fires.
        let lost_reference = CamSide::BOTH.map(Fault::CamPattern);
        let lines = texts(&responses);
        for fault in lost_reference.into_iter().chain([Fault::Timeout(ShaftId::Crank)]) {
            let expected = format!("fault {fault}");
            assert!(
                lines.iter().any(|line| line.ends_with(&expected)),
                "missing {expected:?} in {lines:?}"
            );
        }
        assert_eq!(session.controller().mode(), Mode::Calibrating);

        // Only the fault that ended closed loop is kept; whichever cam
        // noticed first depends on its phase.
        let faults = session.handle_command("faults").unwrap();
        let listed = texts(&faults);
        assert_eq!(listed.len(), 1, "{listed:?}");
        assert!(
            lost_reference
                .iter()
                .any(|fault| listed[0] == format!("#1   {}", fault.message())),
            "unexpected history {listed:?}"
        );
    }

    #[test]
    fn settings_reconfigure_the_controller() {
        let mut session = session();
        let responses = session.handle_command("set feedback retain").unwrap();
        assert_eq!(texts(&responses), ["OK feedback retain"]);
        assert_eq!(
            session.controller().config().feedback.reset_policy,
            FeedbackResetPolicy::Retain
        );

        session.handle_command("set baseline fixed").unwrap();
        assert_eq!(
            session.controller().config().cam.baseline,
            BaselineSource::FACTORY
        );
    }

    #[test]
    fn help_lists_every_command() {
        let mut session = session();
        let responses = session.handle_command("help").unwrap();
        assert_eq!(responses.len(), catalog::commands().len() + 2);

        let topic = session.handle_command("help glitch").unwrap();
        assert!(topic[0].text.contains("inject a bounced edge"));
    }

    #[test]
    fn status_shows_calibration_progress() {
        let mut session = session();
        session.handle_command("run 100ms").unwrap();
        let responses = session.handle_command("status").unwrap();
        let lines = texts(&responses);
        assert!(lines[0].starts_with("mode Calibrating rpm"));
        assert!(lines.iter().any(|line| line.starts_with("calibrating: crank")));
    }
}

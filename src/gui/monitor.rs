use std::{
    collections::VecDeque,
    fmt,
    io::stdout,
    sync::{Arc, Mutex, PoisonError},
    thread::spawn,
    time::Duration,
};

use crate::cancel::CancellationToken;
use crate::gui::error::GuiError;
use crate::observation::{Ball, Sample};
use crate::sink::{Sink, SinkError};

use crossterm::{
    event::{self, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};

use ratatui::{
    prelude::*,
    widgets::{block::Title, *},
    Terminal,
};

/// Number of past positions drawn on the chart.
const TRAIL_LENGTH: usize = 200;

/// What the monitor displays, shared between the task feeding it and the
/// drawing loop.
#[derive(Debug, Clone, Default)]
pub struct MonitorState {
    inner: Arc<Mutex<Snapshot>>,
}

/// A copy of the monitor state at some point in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub latest: Option<Ball>,
    pub received: u64,
    pub undetected: u64,
    pub trail: VecDeque<(f64, f64)>,
}

impl MonitorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, ball: &Ball) {
        let mut snapshot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        snapshot.received += 1;
        if ball.is_valid() {
            snapshot.trail.push_back((ball.position[0], ball.position[1]));
            while snapshot.trail.len() > TRAIL_LENGTH {
                snapshot.trail.pop_front();
            }
        } else {
            snapshot.undetected += 1;
        }
        snapshot.latest = Some(*ball);
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// A [`Sink`] feeding a [`MonitorState`].
#[derive(Debug, Clone)]
pub struct MonitorSink {
    state: MonitorState,
}

impl MonitorSink {
    pub fn new(state: MonitorState) -> Self {
        MonitorSink { state }
    }
}

impl fmt::Display for MonitorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MonitorSink")
    }
}

impl Sink<Ball> for MonitorSink {
    fn dispatch(&mut self, record: &Ball) -> Result<(), SinkError> {
        self.state.update(record);
        Ok(())
    }
}

impl Sink<Sample> for MonitorSink {
    fn dispatch(&mut self, record: &Sample) -> Result<(), SinkError> {
        match record {
            Sample::Ball(ball) => self.state.update(ball),
            Sample::Joints(_) => {
                return Err(SinkError::Refused(
                    "the monitor only displays balls".to_string(),
                ))
            }
        }
        Ok(())
    }
}

fn bounds(values: impl Iterator<Item = f64>) -> [f64; 2] {
    let (low, high) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(low, high), v| {
        (low.min(v), high.max(v))
    });
    if low > high {
        return [-1.0, 1.0];
    }
    let margin = ((high - low) * 0.1).max(0.05);
    [low - margin, high + margin]
}

fn labels(bounds: [f64; 2]) -> Vec<Span<'static>> {
    let middle = (bounds[0] + bounds[1]) / 2.0;
    [bounds[0], middle, bounds[1]]
        .iter()
        .map(|v| Span::from(format!("{v:.2}")))
        .collect()
}

/// Draws `snapshot`: the latest ball on top, the trail of its (x, y)
/// positions below.
pub fn ui(frame: &mut Frame, title: &str, snapshot: &Snapshot) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(5), Constraint::Min(0)])
        .split(frame.size());

    let latest = match &snapshot.latest {
        Some(ball) => ball.to_string(),
        None => "waiting for the first ball".to_string(),
    };
    let text = Paragraph::new(vec![
        Line::from(latest),
        Line::from(format!(
            " received: {} | undetected: {} | press any key to stop ",
            snapshot.received, snapshot.undetected
        )),
    ]);
    let block = Block::default()
        .title(Title::from(Span::from(format!(" {title} ")).magenta().bold()).alignment(Alignment::Center))
        .borders(Borders::ALL);
    frame.render_widget(text.block(block), layout[0]);

    let trail: Vec<(f64, f64)> = snapshot.trail.iter().copied().collect();
    let x_bounds = bounds(trail.iter().map(|p| p.0));
    let y_bounds = bounds(trail.iter().map(|p| p.1));
    let chart = Chart::new(vec![Dataset::default()
        .name("ball")
        .marker(symbols::Marker::Dot)
        .graph_type(GraphType::Scatter)
        .style(Style::default().fg(Color::Red))
        .data(&trail)])
    .block(Block::default().title("x / y").borders(Borders::ALL))
    .x_axis(
        Axis::default()
            .title(Span::styled("x", Style::default().fg(Color::Red)))
            .style(Style::default().fg(Color::White))
            .bounds(x_bounds)
            .labels(labels(x_bounds)),
    )
    .y_axis(
        Axis::default()
            .title(Span::styled("y", Style::default().fg(Color::Red)))
            .style(Style::default().fg(Color::White))
            .bounds(y_bounds)
            .labels(labels(y_bounds)),
    );
    frame.render_widget(chart, layout[1]);
}

/// Runs `task` in a thread and displays `state` until a key is pressed or
/// the task returns. On a key press `token`, which the task is given a clone
/// of, is cancelled, and the task's result is returned once it has stopped.
pub fn monitor<F, T>(
    title: &str,
    state: MonitorState,
    token: CancellationToken,
    task: F,
) -> Result<T, GuiError>
where
    F: FnOnce(CancellationToken) -> T + Send + 'static,
    T: Send + 'static,
{
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;

    let th_token = token.clone();
    let th = spawn(move || task(th_token));

    let drawn = draw_until_key(&mut terminal, title, &state, || th.is_finished());

    token.cancel();
    let res = th.join().map_err(|_| GuiError::JoinError);
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    drawn?;
    res
}

fn draw_until_key<B: Backend>(
    terminal: &mut Terminal<B>,
    title: &str,
    state: &MonitorState,
    finished: impl Fn() -> bool,
) -> Result<(), GuiError> {
    while !finished() {
        let snapshot = state.snapshot();
        terminal.draw(|frame| ui(frame, title, &snapshot))?;
        if event::poll(Duration::from_millis(16))? {
            if let event::Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    break;
                }
            }
        }
    }
    Ok(())
}

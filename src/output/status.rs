//! Live status line and final result printing.

use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};
use crossterm::QueueableCommand;
use std::io::Write;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use super::format::{format_rate, FormattedRate, UnitPolicy};
use crate::engine::error::FastError;
use crate::engine::types::RateEvent;

pub const REDRAW_INTERVAL: Duration = Duration::from_millis(100);

const SPINNER_FRAMES: [char; 10] = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

/// Text currently shown after the spinner.
#[derive(Debug, Clone, Default)]
pub struct StatusLine(Arc<RwLock<String>>);

impl StatusLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, text: impl Into<String>) {
        let mut guard = self.0.write().unwrap_or_else(|e| e.into_inner());
        *guard = text.into();
    }

    pub fn get(&self) -> String {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[derive(Debug, Default)]
pub struct Spinner {
    frame: usize,
}

impl Spinner {
    pub fn next_frame(&mut self) -> char {
        let glyph = SPINNER_FRAMES[self.frame % SPINNER_FRAMES.len()];
        self.frame = self.frame.wrapping_add(1);
        glyph
    }
}

/// Output sink shared by the redraw ticker and the final-line printer.
pub type SharedWriter<W> = Arc<Mutex<W>>;

fn with_writer<W: Write>(
    out: &SharedWriter<W>,
    f: impl FnOnce(&mut W) -> std::io::Result<()>,
) -> std::io::Result<()> {
    let mut guard = out.lock().unwrap_or_else(|e| e.into_inner());
    f(&mut guard)?;
    guard.flush()
}

/// Background task redrawing the status line on a fixed tick.
pub struct Ticker {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Ticker {
    pub fn spawn<W: Write + Send + 'static>(
        status: StatusLine,
        out: SharedWriter<W>,
        every: Duration,
    ) -> Self {
        let (stop, mut stopped) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut spinner = Spinner::default();
            let mut tick = interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = tick.tick() => {
                        let glyph = spinner.next_frame();
                        let text = status.get();
                        let drawn = with_writer(&out, |w| {
                            w.queue(Clear(ClearType::CurrentLine))?
                                .queue(Print(format!(" {glyph}  {text}\r")))?;
                            Ok(())
                        });
                        if let Err(e) = drawn {
                            debug!("Status redraw failed: {e}");
                        }
                    }
                }
            }
        });
        Self { stop, handle }
    }

    /// Stop redrawing and wait until the last redraw has finished.
    pub async fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.handle.await;
    }
}

/// Drains rate events into the status line and prints the final result.
pub struct StatusReporter<W> {
    status: StatusLine,
    out: SharedWriter<W>,
    policy: UnitPolicy,
    silent: bool,
}

impl<W: Write + Send + 'static> StatusReporter<W> {
    pub fn new(status: StatusLine, out: SharedWriter<W>, policy: UnitPolicy, silent: bool) -> Self {
        Self {
            status,
            out,
            policy,
            silent,
        }
    }

    /// Start the redraw ticker unless running silent.
    pub fn start_ticker(&self) -> Option<Ticker> {
        if self.silent {
            return None;
        }
        Some(Ticker::spawn(
            self.status.clone(),
            Arc::clone(&self.out),
            REDRAW_INTERVAL,
        ))
    }

    /// Consume every event until the stream closes, then stop `ticker` and
    /// print the final line.
    ///
    /// Returns `None` without printing when the stream closed without a
    /// final estimate.
    pub async fn consume(
        self,
        mut rx: mpsc::Receiver<RateEvent>,
        ticker: Option<Ticker>,
    ) -> Result<Option<FormattedRate>, FastError> {
        let mut last_final = None;
        while let Some(event) = rx.recv().await {
            let formatted = format_rate(event.estimate().kbps, self.policy);
            self.status.set(formatted.to_string());
            if let RateEvent::Final(_) = event {
                last_final = Some(formatted);
            }
        }

        if let Some(ticker) = ticker {
            ticker.stop().await;
        }

        let Some(result) = last_final else {
            return Ok(None);
        };
        let text = self.status.get();
        let silent = self.silent;
        with_writer(&self.out, |w| {
            if silent {
                writeln!(w, "{text}")
            } else {
                w.queue(Print("\r"))?
                    .queue(Clear(ClearType::CurrentLine))?
                    .queue(Print(format!(" -> {text}\n")))?;
                Ok(())
            }
        })?;
        Ok(Some(result))
    }
}

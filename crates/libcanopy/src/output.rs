use std::{
    io::{self, Write},
    time::Duration,
};

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal,
};
use indicatif::{ProgressBar, ProgressStyle};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use thiserror::Error;

/// Columns added per nested section.
const INDENT: usize = 2;

/// Errors produced by [`Output`] implementations when interacting with the user
/// or the terminal.
#[derive(Debug, Error)]
pub enum OutputError {
    /// The requested operation is not supported by this output backend.
    #[error("{0}")]
    Unsupported(&'static str),

    /// A terminal/TTY related failure occurred.
    #[error("Terminal error: {0}")]
    Terminal(String),

    /// Underlying I/O error while writing/reading to the terminal.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The user cancelled an interactive prompt.
    #[error("Prompt cancelled")]
    Cancelled,
}

/// Result type for output operations.
pub type Result<T> = std::result::Result<T, OutputError>;

/// Sink for user-facing progress, results and confirmation prompts.
///
/// The engine reports through this trait only, so the same code paths drive
/// a colored terminal, a silent run, or a scripted test double.
pub trait Output: Send + Sync {
    /// Print an informational message.
    fn message(&self, msg: &str) -> Result<()>;
    /// Print a success message.
    fn success(&self, msg: &str) -> Result<()>;
    /// Print a warning message.
    fn warn(&self, msg: &str) -> Result<()>;
    /// Print an error/failure message.
    fn fail(&self, msg: &str) -> Result<()>;
    /// Ask a yes/no question. `Err(OutputError::Cancelled)` means the user
    /// backed out without answering.
    fn confirm(&self, prompt: &str) -> Result<bool>;
    /// Start a spinner for a long-running step. Callers finish or abandon it.
    fn spinner(&self, msg: &str) -> ProgressBar;
    /// Flush any buffered output.
    fn finish(&self) -> Result<()>;
    /// Create a nested output section that indents subsequent messages.
    fn section(&self, header: &str) -> Box<dyn Output>;
}

/// Output implementation that suppresses all messages and rejects interactive
/// prompts.
pub struct Quiet;

impl Output for Quiet {
    fn message(&self, _msg: &str) -> Result<()> {
        Ok(())
    }

    fn success(&self, _msg: &str) -> Result<()> {
        Ok(())
    }

    fn warn(&self, _msg: &str) -> Result<()> {
        Ok(())
    }

    fn fail(&self, _msg: &str) -> Result<()> {
        Ok(())
    }

    fn confirm(&self, _prompt: &str) -> Result<bool> {
        Err(OutputError::Unsupported(
            "Cannot prompt for confirmation in quiet mode",
        ))
    }

    fn spinner(&self, _msg: &str) -> ProgressBar {
        ProgressBar::hidden()
    }

    fn finish(&self) -> Result<()> {
        Ok(())
    }

    fn section(&self, _header: &str) -> Box<dyn Output> {
        Box::new(Quiet)
    }
}

/// Color-capable terminal renderer for user messages and prompts.
pub struct Terminal {
    /// Whether ANSI colors are emitted.
    color_choice: ColorChoice,
    /// Leading spaces for every line.
    indent: usize,
}

impl Terminal {
    /// Create a new terminal output.
    ///
    /// - `color`: when `true`, always render colored output; when `false`,
    ///   disable ANSI colors.
    pub fn new(color: bool) -> Self {
        let color_choice = if color {
            ColorChoice::Always
        } else {
            ColorChoice::Never
        };
        Self {
            color_choice,
            indent: 0,
        }
    }

    /// Write one indented line in the given color.
    fn write_colored(&self, msg: &str, color: Option<Color>) -> Result<()> {
        let mut stdout = StandardStream::stdout(self.color_choice);
        stdout.set_color(ColorSpec::new().set_fg(color))?;
        for line in msg.lines() {
            writeln!(stdout, "{}{line}", " ".repeat(self.indent))?;
        }
        stdout.reset()?;
        stdout.flush()?;
        Ok(())
    }

    /// Block until the user presses y, n or Esc. Ctrl-C counts as Esc.
    fn read_answer() -> Result<bool> {
        loop {
            let ev = event::read().map_err(|e| OutputError::Terminal(e.to_string()))?;
            if let Event::Key(KeyEvent {
                code,
                modifiers,
                kind: KeyEventKind::Press,
                ..
            }) = ev
            {
                match code {
                    KeyCode::Char('y' | 'Y') => return Ok(true),
                    KeyCode::Char('n' | 'N') | KeyCode::Enter => return Ok(false),
                    KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                        return Err(OutputError::Cancelled);
                    }
                    KeyCode::Esc => return Err(OutputError::Cancelled),
                    _ => {}
                }
            }
        }
    }
}

impl Output for Terminal {
    fn message(&self, msg: &str) -> Result<()> {
        self.write_colored(msg, None)
    }

    fn success(&self, msg: &str) -> Result<()> {
        self.write_colored(msg, Some(Color::Green))
    }

    fn warn(&self, msg: &str) -> Result<()> {
        self.write_colored(msg, Some(Color::Rgb(255, 165, 0))) // Orange
    }

    fn fail(&self, msg: &str) -> Result<()> {
        self.write_colored(msg, Some(Color::Red))
    }

    fn confirm(&self, prompt: &str) -> Result<bool> {
        let mut stdout = StandardStream::stdout(self.color_choice);
        write!(stdout, "{}{prompt} ", " ".repeat(self.indent))?;
        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)))?;
        write!(stdout, "[y/N, esc to cancel] ")?;
        stdout.reset()?;
        stdout.flush()?;

        terminal::enable_raw_mode().map_err(|e| OutputError::Terminal(e.to_string()))?;
        let answer = Self::read_answer();
        // Always restore terminal mode
        terminal::disable_raw_mode().map_err(|e| OutputError::Terminal(e.to_string()))?;

        match &answer {
            Ok(true) => writeln!(stdout, "y")?,
            Ok(false) => writeln!(stdout, "n")?,
            Err(_) => writeln!(stdout)?,
        }
        answer
    }

    fn spinner(&self, msg: &str) -> ProgressBar {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template(&format!(
            "{}{{spinner}} {{msg}}",
            " ".repeat(self.indent)
        )) {
            bar.set_style(style);
        }
        bar.set_message(msg.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar
    }

    fn finish(&self) -> Result<()> {
        io::stdout().flush()?;
        Ok(())
    }

    fn section(&self, header: &str) -> Box<dyn Output> {
        let _ = self.write_colored(header, Some(Color::Cyan));
        Box::new(Terminal {
            color_choice: self.color_choice,
            indent: self.indent + INDENT,
        })
    }
}

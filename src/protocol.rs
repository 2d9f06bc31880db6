use crate::output::ProgressSink;
use crate::session::{Command, Session, SessionError};
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::process::ExitCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Success,
    Failure,
}

impl From<Exit> for ExitCode {
    fn from(exit: Exit) -> Self {
        match exit {
            Exit::Success => ExitCode::SUCCESS,
            Exit::Failure => ExitCode::FAILURE,
        }
    }
}

/// Reads commands line by line and answers each with one status line.
pub struct Driver<W: Write, P: ProgressSink> {
    session: Session,
    out: W,
    progress: P,
}

impl<W: Write, P: ProgressSink> Driver<W, P> {
    pub fn new(session: Session, out: W, progress: P) -> Self {
        Self {
            session,
            out,
            progress,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Run until a terminal command, a fatal error or end of input.
    pub fn run<R: BufRead>(&mut self, input: R) -> io::Result<Exit> {
        for line in input.lines() {
            if let Some(exit) = self.handle_line(&line?)? {
                return Ok(exit);
            }
        }

        tracing::info!("Input closed");
        self.status("CLOSING...")?;
        self.session.close();
        Ok(Exit::Success)
    }

    /// Handle one line; `Some` once the session is over.
    pub fn handle_line(&mut self, line: &str) -> io::Result<Option<Exit>> {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!("Rejected command: {}", e);
                self.status(&format!("invalid command: {}", e))?;
                return Ok(None);
            }
        };

        match command {
            Command::Preview(request) => {
                match self.session.preview(request) {
                    Ok(outcome) => {
                        tracing::debug!(
                            "Preview {} scored {:.3}",
                            outcome.path.display(),
                            outcome.score
                        );
                        self.status(&format!("preview ok {}", outcome.frame))?;
                    }
                    Err(e) => {
                        tracing::warn!("Preview failed: {}", e);
                        self.status(&format!("preview failed: {}", e))?;
                    }
                }
                Ok(None)
            }
            Command::Render(dir) => self.render(&dir),
            Command::Quit => {
                self.status("CLOSING...")?;
                self.session.close();
                Ok(Some(Exit::Success))
            }
            Command::Other(line) => {
                if !line.trim().is_empty() {
                    tracing::debug!("Ignoring unknown command {:?}", line);
                }
                Ok(None)
            }
        }
    }

    fn render(&mut self, dir: &Path) -> io::Result<Option<Exit>> {
        match self.session.render(dir, &mut self.progress) {
            Ok(outcome) => {
                tracing::info!(
                    "Render finished: {} of {} frames written",
                    outcome.written,
                    outcome.frames
                );
                self.status("mask ok")?;
                Ok(Some(Exit::Success))
            }
            Err(SessionError::StillLoading) => {
                self.status("STILL LOADING...")?;
                Ok(None)
            }
            Err(e) if e.is_fatal() => {
                tracing::error!("Render failed: {}", e);
                self.status(&format!("render failed: {}", e))?;
                self.session.close();
                Ok(Some(Exit::Failure))
            }
            Err(e) => {
                tracing::warn!("Render refused: {}", e);
                self.status(&format!("render failed: {}", e))?;
                Ok(None)
            }
        }
    }

    fn status(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.out, "{}", line)?;
        self.out.flush()
    }
}

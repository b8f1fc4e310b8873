//! Orchestrate command handler
//!
//! Runs a [`TestOrchestrator`] and turns stdin lines into test boundaries so a
//! recorder can be exercised by hand or from a shell script.

use crate::{CliError, CliResult, OrchestrateArgs};
use covtrace::TestOrchestrator;
use std::io::{BufRead, Write};
use std::time::Duration;

/// One line of orchestrator input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// `start <name>`
    Start(String),
    /// `stop [duration]`
    Stop(String),
    /// `status`
    Status,
    /// `exit`
    Exit,
}

impl SessionCommand {
    /// Parse one input line, `Ok(None)` for blank lines
    pub fn parse(line: &str) -> CliResult<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        let command = match word {
            "start" if rest.is_empty() => {
                return Err(CliError::invalid_argument("start needs a test name"))
            }
            "start" => Self::Start(rest.to_string()),
            "stop" => Self::Stop(rest.to_string()),
            "status" => Self::Status,
            "exit" | "quit" => Self::Exit,
            other => {
                return Err(CliError::invalid_argument(format!("unknown command '{other}'")))
            }
        };
        Ok(Some(command))
    }
}

/// Feed `input` into `orchestrator` until `exit` or end of input
pub fn run_session<R, W>(
    orchestrator: &TestOrchestrator,
    input: R,
    mut output: W,
    quiet: bool,
) -> CliResult<()>
where
    R: BufRead,
    W: Write,
{
    for line in input.lines() {
        let command = match SessionCommand::parse(&line?) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                writeln!(output, "error: {e}")?;
                continue;
            }
        };
        match command {
            SessionCommand::Start(name) => {
                let acknowledged = orchestrator.start_test(&name);
                if !quiet {
                    writeln!(output, "started {name} ({acknowledged} acknowledged)")?;
                }
            }
            SessionCommand::Stop(duration) => match orchestrator.end_test(&duration) {
                Some(acknowledged) if !quiet => {
                    writeln!(output, "stopped ({acknowledged} acknowledged)")?;
                }
                Some(_) => {}
                None => writeln!(output, "error: no test is running")?,
            },
            SessionCommand::Status => {
                let test = orchestrator.current_test().unwrap_or_else(|| "-".to_string());
                writeln!(output, "test: {test}")?;
                for recorder in orchestrator.registered() {
                    writeln!(output, "recorder: pid {} at {}", recorder.pid, recorder.address)?;
                }
            }
            SessionCommand::Exit => break,
        }
        output.flush()?;
    }
    Ok(())
}

/// Execute the orchestrate command
pub fn execute_orchestrate(args: &OrchestrateArgs, quiet: bool) -> CliResult<()> {
    let orchestrator = TestOrchestrator::bind(&args.endpoint)?
        .with_ack_timeout(Duration::from_millis(args.ack_timeout));
    {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "listening on {}", orchestrator.request_endpoint())?;
        stdout.flush()?;
    }
    let stdin = std::io::stdin();
    run_session(&orchestrator, stdin.lock(), std::io::stdout().lock(), quiet)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            SessionCommand::parse("start  Suite::Login ").unwrap(),
            Some(SessionCommand::Start("Suite::Login".to_string()))
        );
        assert_eq!(
            SessionCommand::parse("stop 153").unwrap(),
            Some(SessionCommand::Stop("153".to_string()))
        );
        assert_eq!(
            SessionCommand::parse("stop").unwrap(),
            Some(SessionCommand::Stop(String::new()))
        );
        assert_eq!(SessionCommand::parse("status").unwrap(), Some(SessionCommand::Status));
        assert_eq!(SessionCommand::parse("exit").unwrap(), Some(SessionCommand::Exit));
        assert_eq!(SessionCommand::parse("   ").unwrap(), None);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(SessionCommand::parse("start").is_err());
        assert!(SessionCommand::parse("launch x").is_err());
    }

    #[test]
    fn test_session_drives_orchestrator() {
        let orchestrator = TestOrchestrator::bind("tcp://127.0.0.1:0").unwrap();
        let input = "start Suite::A\nstatus\nbogus\nstop 12\nstop\nexit\nstart never\n";
        let mut output = Vec::new();
        run_session(&orchestrator, input.as_bytes(), &mut output, false).unwrap();

        let output = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(
            lines,
            vec![
                "started Suite::A (0 acknowledged)",
                "test: Suite::A",
                "error: Invalid argument: unknown command 'bogus'",
                "stopped (0 acknowledged)",
                "error: no test is running",
            ]
        );
        assert_eq!(orchestrator.current_test(), None);
    }

    #[test]
    fn test_quiet_session_only_reports_errors() {
        let orchestrator = TestOrchestrator::bind("tcp://127.0.0.1:0").unwrap();
        let mut output = Vec::new();
        run_session(&orchestrator, "start A\nstop\nstop\n".as_bytes(), &mut output, true).unwrap();
        assert_eq!(String::from_utf8(output).unwrap(), "error: no test is running\n");
    }
}

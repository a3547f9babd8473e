use std::io::{self, BufRead, Write};

use crate::model::{RiskLevel, Step, ValidationResult};
use crate::pipeline::ConfirmationGate;

/// Asks the user on the terminal before a step runs
pub struct TerminalGate<R, W> {
    input: R,
    output: W,
}

impl TerminalGate<io::StdinLock<'static>, io::Stderr> {
    /// Prompt on stderr so stdout stays clean for `--json`
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stderr())
    }
}

impl<R: BufRead, W: Write> TerminalGate<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn ask(&mut self, step: &Step, validation: &ValidationResult) -> io::Result<bool> {
        writeln!(self.output)?;
        writeln!(self.output, "Step {}: {}", step.id, step.description)?;
        writeln!(self.output, "  Command: {}", step.command)?;
        writeln!(self.output, "  Directory: {}", step.working_directory.display())?;
        writeln!(self.output, "  Risk: {}", validation.risk_level)?;
        for warning in &validation.warnings {
            writeln!(self.output, "  Warning: {}", warning)?;
        }
        if validation.risk_level == RiskLevel::High {
            writeln!(self.output, "  This is a HIGH RISK operation.")?;
        }
        write!(self.output, "Run this step? [y/N] ")?;
        self.output.flush()?;

        let mut answer = String::new();
        if self.input.read_line(&mut answer)? == 0 {
            // EOF (Ctrl+D)
            writeln!(self.output)?;
            return Ok(false);
        }
        Ok(is_yes(&answer))
    }
}

impl<R: BufRead, W: Write> ConfirmationGate for TerminalGate<R, W> {
    fn confirm(&mut self, step: &Step, validation: &ValidationResult) -> bool {
        self.ask(step, validation).unwrap_or(false)
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

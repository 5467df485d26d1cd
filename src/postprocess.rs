//! Ordered byte transforms applied to the assembled output.
//!
//! At most one step may be terminal. The terminal step always runs last,
//! after every non-terminal step in submission order, wherever it appeared
//! in the submitted list.

use std::fmt;

use crate::cancel::Cancellation;
use crate::error::{DocBindError, PostProcessError};

pub trait PostProcessor: Send + Sync {
    fn name(&self) -> &str;

    /// Terminal steps (signing, sealing) must see the final bytes.
    fn is_terminal(&self) -> bool {
        false
    }

    fn process(&self, bytes: Vec<u8>, cancel: &Cancellation) -> Result<Vec<u8>, PostProcessError>;
}

type ProcessFn = Box<dyn Fn(Vec<u8>) -> Result<Vec<u8>, PostProcessError> + Send + Sync>;

/// Closure adapter, e.g. for password protection through an external library.
pub struct FnPostProcessor {
    name: String,
    terminal: bool,
    process: ProcessFn,
}

impl FnPostProcessor {
    pub fn new<F>(name: impl Into<String>, process: F) -> Self
    where
        F: Fn(Vec<u8>) -> Result<Vec<u8>, PostProcessError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            terminal: false,
            process: Box::new(process),
        }
    }

    pub fn terminal<F>(name: impl Into<String>, process: F) -> Self
    where
        F: Fn(Vec<u8>) -> Result<Vec<u8>, PostProcessError> + Send + Sync + 'static,
    {
        Self {
            terminal: true,
            ..Self::new(name, process)
        }
    }
}

impl PostProcessor for FnPostProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_terminal(&self) -> bool {
        self.terminal
    }

    fn process(&self, bytes: Vec<u8>, _cancel: &Cancellation) -> Result<Vec<u8>, PostProcessError> {
        (self.process)(bytes)
    }
}

impl fmt::Debug for FnPostProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnPostProcessor")
            .field("name", &self.name)
            .field("terminal", &self.terminal)
            .finish()
    }
}

/// Execution plan resolved from a submitted processor list.
pub struct PostProcessorChain<'a> {
    steps: Vec<&'a dyn PostProcessor>,
}

impl<'a> PostProcessorChain<'a> {
    /// Fails before anything runs when more than one step is terminal.
    pub fn plan(processors: &'a [Box<dyn PostProcessor>]) -> Result<Self, DocBindError> {
        let (terminal, mut steps): (Vec<&dyn PostProcessor>, Vec<&dyn PostProcessor>) = processors
            .iter()
            .map(|p| p.as_ref())
            .partition(|p| p.is_terminal());
        if terminal.len() > 1 {
            let names: Vec<&str> = terminal.iter().map(|p| p.name()).collect();
            return Err(DocBindError::config(format!(
                "at most one terminal post-processor is allowed, got {}: {}",
                terminal.len(),
                names.join(", ")
            )));
        }
        steps.extend(terminal);
        Ok(Self { steps })
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// A failing step aborts the chain; no partial bytes are returned.
    pub fn run(&self, bytes: Vec<u8>, cancel: &Cancellation) -> Result<Vec<u8>, DocBindError> {
        let mut current = bytes;
        for (idx, step) in self.steps.iter().enumerate() {
            cancel.check()?;
            let input_len = current.len();
            current = step
                .process(current, cancel)
                .map_err(|err| DocBindError::PostProcessor {
                    step: step.name().to_string(),
                    message: err.to_string(),
                })?;
            tracing::debug!(
                step = step.name(),
                position = idx,
                terminal = step.is_terminal(),
                input_len,
                output_len = current.len(),
                "post-processor step finished"
            );
        }
        Ok(current)
    }
}

/// Plans and runs `processors` over `bytes`.
pub fn run_post_processors(
    bytes: Vec<u8>,
    processors: &[Box<dyn PostProcessor>],
    cancel: &Cancellation,
) -> Result<Vec<u8>, DocBindError> {
    PostProcessorChain::plan(processors)?.run(bytes, cancel)
}

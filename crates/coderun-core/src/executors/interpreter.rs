//! JavaScript executor built on QuickJS.
//!
//! Each submission gets a fresh engine with no host modules at all: the only
//! bindings are the standard intrinsics plus a curated `console`, bounded
//! timers and a neutered `module`/`exports` pair. The engine interrupt handler
//! stops evaluation at the deadline. Work the handler cannot reach, such as a
//! backtracking regular expression, is bounded by a wrapper timer: with a
//! worker process the child is killed when it fires, otherwise the blocking
//! thread is counted as stalled and further submissions are refused until it
//! ends.

use async_trait::async_trait;
use rquickjs::convert::Coerced;
use rquickjs::{Context, Ctx, Function, Object, Persistent, Runtime, Value};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::process::ProcessSpec;
use super::CodeExecutor;
use crate::config::{ExecutionSettings, InterpreterSettings};
use crate::core_types::{ExecutionResult, Language};
use crate::errors::{ErrorKind, ExecutionError};

/// Executable that evaluates one submission read from stdin.
pub const WORKER_PROGRAM: &str = "coderun-js-worker";

/// Installs the sandbox bindings. Called with the host `emit(channel, line)`
/// function and returns the hooks the host uses after evaluation.
const SANDBOX_SETUP: &str = r#"
(function (emit) {
  const maxDelay = __MAX_TIMER_DELAY__;
  const format = (value) => {
    if (Array.isArray(value)) {
      return '[' + value.join(', ') + ']';
    }
    if (typeof value === 'object' && value !== null) {
      try {
        return JSON.stringify(value);
      } catch (e) {
        return String(value);
      }
    }
    return String(value);
  };
  const line = (args) => args.map(format).join(' ');

  globalThis.console = {
    log: (...args) => emit(0, line(args)),
    debug: (...args) => emit(0, line(args)),
    info: (...args) => emit(0, 'ℹ️ ' + line(args)),
    warn: (...args) => emit(0, '⚠️ ' + line(args)),
    error: (...args) => emit(1, line(args)),
  };

  const timers = [];
  let sequence = 0;
  let now = 0;
  globalThis.setTimeout = function (callback, delay, ...args) {
    const wait = Math.max(0, Number(delay) || 0);
    if (wait > maxDelay) {
      throw new Error('setTimeout delay too long');
    }
    if (typeof callback !== 'function') {
      throw new TypeError('setTimeout callback must be a function');
    }
    const id = ++sequence;
    timers.push({ id, due: now + wait, callback, args });
    return id;
  };
  globalThis.clearTimeout = function (id) {
    const index = timers.findIndex((timer) => timer.id === id);
    if (index >= 0) {
      timers.splice(index, 1);
    }
  };
  globalThis.setInterval = function () {
    throw new Error('setInterval is not allowed');
  };

  globalThis.module = { exports: {} };
  globalThis.exports = {};
  globalThis.global = undefined;
  globalThis.window = undefined;

  return {
    format,
    drain() {
      while (timers.length > 0) {
        timers.sort((a, b) => a.due - b.due || a.id - b.id);
        const timer = timers.shift();
        now = timer.due;
        timer.callback(...timer.args);
      }
    },
    describeExports() {
      const exported = globalThis.module && globalThis.module.exports;
      if (typeof exported === 'function') {
        return 'Exported function: ' + (exported.name || 'anonymous');
      }
      if (exported && typeof exported === 'object' && Object.keys(exported).length > 0) {
        return 'Module exports: ' + format(exported);
      }
      return undefined;
    },
  };
})
"#;

const OUTPUT_CHANNEL: u32 = 0;

#[derive(Debug, Clone)]
pub struct InterpreterLimits {
    pub timeout: Duration,
    pub memory_limit_bytes: usize,
    pub max_stack_bytes: usize,
    pub max_timer_delay_ms: u64,
    pub wrapper_grace: Duration,
    pub max_stalled_evaluations: usize,
}

impl InterpreterLimits {
    pub fn from_settings(execution: &ExecutionSettings, interpreter: &InterpreterSettings) -> Self {
        Self {
            timeout: execution.timeout(),
            memory_limit_bytes: interpreter.memory_limit_bytes,
            max_stack_bytes: interpreter.max_stack_bytes,
            max_timer_delay_ms: interpreter.max_timer_delay_ms,
            wrapper_grace: Duration::from_millis(interpreter.wrapper_grace_ms),
            max_stalled_evaluations: interpreter.max_stalled_evaluations,
        }
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    fn wrapper_deadline(&self) -> Duration {
        self.timeout + self.wrapper_grace
    }
}

impl Default for InterpreterLimits {
    fn default() -> Self {
        Self::from_settings(&ExecutionSettings::default(), &InterpreterSettings::default())
    }
}

pub struct InterpreterExecutor {
    limits: InterpreterLimits,
    worker: Option<ProcessSpec>,
    stalled: Arc<AtomicUsize>,
}

impl InterpreterExecutor {
    /// Evaluate on a blocking thread of this process.
    pub fn new(limits: InterpreterLimits) -> Self {
        Self {
            limits,
            worker: None,
            stalled: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Evaluate in `program`, which speaks the [`serve_worker`] protocol.
    pub fn with_worker(mut self, program: impl AsRef<Path>) -> Self {
        self.worker = Some(ProcessSpec::new(program.as_ref().to_string_lossy()));
        self
    }

    pub fn from_settings(execution: &ExecutionSettings, interpreter: &InterpreterSettings) -> Self {
        let executor = Self::new(InterpreterLimits::from_settings(execution, interpreter));
        if !interpreter.isolate {
            return executor;
        }

        match resolve_worker(interpreter.worker_program.as_deref()) {
            Some(program) => {
                log::info!("JavaScript submissions are evaluated by {}", program.display());
                executor.with_worker(program)
            }
            None => {
                log::warn!(
                    "{} not found, evaluating JavaScript on in-process threads",
                    WORKER_PROGRAM
                );
                executor
            }
        }
    }

    pub fn is_isolated(&self) -> bool {
        self.worker.is_some()
    }

    /// In-thread evaluations that outlived their wrapper deadline and are still running.
    pub fn stalled_evaluations(&self) -> usize {
        self.stalled.load(Ordering::Acquire)
    }

    async fn evaluate_in_worker(
        &self,
        worker: &ProcessSpec,
        code: &str,
    ) -> Result<ExecutionResult, ExecutionError> {
        let request = serde_json::to_vec(&WorkerRequest::new(code, &self.limits)).map_err(|e| {
            ExecutionError::Internal(format!("Failed to encode worker request: {}", e))
        })?;

        let outcome = match worker
            .clone()
            .stdin(request)
            .run(None, self.limits.wrapper_deadline())
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!(
                    "Failed to start JavaScript worker '{}' ({}), evaluating in-process",
                    worker.program(),
                    e
                );
                return self.evaluate_in_thread(code).await;
            }
        };

        if outcome.timed_out {
            return Err(ExecutionError::Timeout {
                limit_ms: self.limits.timeout_ms(),
            });
        }
        if !outcome.success() {
            return Err(ExecutionError::Internal(format!(
                "JavaScript worker exited with {:?}: {}",
                outcome.exit_code,
                outcome.stderr.trim()
            )));
        }

        let reply: WorkerReply = serde_json::from_str(&outcome.stdout)
            .map_err(|e| ExecutionError::Internal(format!("Malformed worker reply: {}", e)))?;
        Ok(reply.into())
    }

    async fn evaluate_in_thread(&self, code: &str) -> Result<ExecutionResult, ExecutionError> {
        let stalled = self.stalled_evaluations();
        if stalled >= self.limits.max_stalled_evaluations {
            log::warn!(
                "Refusing JavaScript evaluation while {} overrunning evaluation(s) are still running",
                stalled
            );
            return Err(ExecutionError::Overloaded {
                language: Language::JavaScript,
            });
        }

        let slot = EvaluationSlot::new(self.stalled.clone());
        let finished = FinishOnDrop(slot.clone());
        let limits = self.limits.clone();
        let code = code.to_string();
        let evaluation = tokio::task::spawn_blocking(move || {
            let _finished = finished;
            evaluate(&code, &limits)
        });

        match tokio::time::timeout(self.limits.wrapper_deadline(), evaluation).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(ExecutionError::Internal(format!(
                "Interpreter thread failed: {}",
                join_error
            ))),
            Err(_) => {
                slot.abandon();
                log::warn!(
                    "Interpreter missed its deadline, {} evaluation thread(s) now stalled",
                    self.stalled_evaluations()
                );
                Err(ExecutionError::Timeout {
                    limit_ms: self.limits.timeout_ms(),
                })
            }
        }
    }
}

impl Default for InterpreterExecutor {
    fn default() -> Self {
        Self::new(InterpreterLimits::default())
    }
}

#[async_trait]
impl CodeExecutor for InterpreterExecutor {
    fn name(&self) -> &str {
        "JavaScript"
    }

    async fn execute_code(&self, code: &str) -> Result<ExecutionResult, ExecutionError> {
        match &self.worker {
            Some(worker) => self.evaluate_in_worker(worker, code).await,
            None => self.evaluate_in_thread(code).await,
        }
    }
}

/// Configured path, then a sibling of the running executable, then `PATH`.
fn resolve_worker(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        return Some(path.to_path_buf());
    }

    let file_name = format!("{}{}", WORKER_PROGRAM, std::env::consts::EXE_SUFFIX);
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&file_name)))
        .filter(|candidate| candidate.is_file())
        .or_else(|| which::which(WORKER_PROGRAM).ok())
}

const RUNNING: u8 = 0;
const FINISHED: u8 = 1;
const ABANDONED: u8 = 2;

/// Lifecycle of one in-thread evaluation, shared by the waiter and the thread.
#[derive(Clone)]
struct EvaluationSlot {
    state: Arc<AtomicU8>,
    stalled: Arc<AtomicUsize>,
}

impl EvaluationSlot {
    fn new(stalled: Arc<AtomicUsize>) -> Self {
        Self {
            state: Arc::new(AtomicU8::new(RUNNING)),
            stalled,
        }
    }

    fn finish(&self) {
        if self
            .state
            .compare_exchange(RUNNING, FINISHED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.stalled.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn abandon(&self) {
        // Count first so a concurrent finish never drives the counter below zero.
        self.stalled.fetch_add(1, Ordering::AcqRel);
        if self
            .state
            .compare_exchange(RUNNING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.stalled.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

struct FinishOnDrop(EvaluationSlot);

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// One submission sent to a worker on stdin.
#[derive(Debug, Serialize, Deserialize)]
struct WorkerRequest {
    code: String,
    timeout_ms: u64,
    memory_limit_bytes: usize,
    max_stack_bytes: usize,
    max_timer_delay_ms: u64,
}

impl WorkerRequest {
    fn new(code: &str, limits: &InterpreterLimits) -> Self {
        Self {
            code: code.to_string(),
            timeout_ms: limits.timeout_ms(),
            memory_limit_bytes: limits.memory_limit_bytes,
            max_stack_bytes: limits.max_stack_bytes,
            max_timer_delay_ms: limits.max_timer_delay_ms,
        }
    }

    fn limits(&self) -> InterpreterLimits {
        InterpreterLimits {
            timeout: Duration::from_millis(self.timeout_ms),
            memory_limit_bytes: self.memory_limit_bytes,
            max_stack_bytes: self.max_stack_bytes,
            max_timer_delay_ms: self.max_timer_delay_ms,
            wrapper_grace: Duration::ZERO,
            max_stalled_evaluations: 1,
        }
    }
}

/// A worker's answer on stdout. Carries the error kind the result itself skips.
#[derive(Debug, Serialize, Deserialize)]
struct WorkerReply {
    output: Option<String>,
    error: Option<String>,
    kind: Option<ErrorKind>,
}

impl From<ExecutionResult> for WorkerReply {
    fn from(result: ExecutionResult) -> Self {
        Self {
            output: result.output,
            error: result.error,
            kind: result.error_kind,
        }
    }
}

impl From<WorkerReply> for ExecutionResult {
    fn from(reply: WorkerReply) -> Self {
        ExecutionResult {
            output: reply.output,
            error: reply.error,
            error_kind: reply.kind,
            ..Default::default()
        }
    }
}

/// Worker side of the isolation protocol: read one JSON request, evaluate it
/// on the current thread and write one JSON reply.
pub fn serve_worker<R: Read, W: Write>(mut input: R, mut output: W) -> Result<(), ExecutionError> {
    let mut request = String::new();
    input.read_to_string(&mut request)?;
    let request: WorkerRequest = serde_json::from_str(&request)
        .map_err(|e| ExecutionError::Internal(format!("Malformed worker request: {}", e)))?;

    let result = evaluate(&request.code, &request.limits()).unwrap_or_else(|e| {
        log::error!("JavaScript evaluation failed: {}", e);
        ExecutionResult::from(e)
    });

    serde_json::to_writer(&mut output, &WorkerReply::from(result))
        .map_err(|e| ExecutionError::Internal(format!("Failed to encode worker reply: {}", e)))?;
    output.flush()?;
    Ok(())
}

#[derive(Default)]
struct ConsoleLines {
    output: Vec<String>,
    errors: Vec<String>,
}

/// Why an evaluation stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Fault {
    Timeout,
    OutOfMemory,
    Thrown { name: String, message: String },
    Engine(String),
}

impl Fault {
    fn from_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> Self {
        match err {
            rquickjs::Error::Exception => Self::from_exception(ctx.catch()),
            rquickjs::Error::Allocation => Fault::OutOfMemory,
            other => Fault::Engine(other.to_string()),
        }
    }

    fn from_exception(value: Value<'_>) -> Self {
        if let Some(object) = value.as_object() {
            let name = object.get::<_, Option<String>>("name").ok().flatten();
            let message = object.get::<_, Option<String>>("message").ok().flatten();
            if name.is_some() || message.is_some() {
                let message = message.unwrap_or_default();
                if message.contains("out of memory") {
                    return Fault::OutOfMemory;
                }
                return Fault::Thrown {
                    name: name.unwrap_or_else(|| "Error".to_string()),
                    message,
                };
            }
        }

        let message = value
            .get::<Coerced<String>>()
            .map(|coerced| coerced.0)
            .unwrap_or_else(|_| "unknown exception".to_string());
        Fault::Thrown {
            name: "Error".to_string(),
            message,
        }
    }

    fn into_error(self, limits: &InterpreterLimits) -> ExecutionError {
        match self {
            Fault::Timeout => ExecutionError::Timeout {
                limit_ms: limits.timeout_ms(),
            },
            Fault::OutOfMemory => ExecutionError::MemoryLimit,
            Fault::Thrown { name, message } => ExecutionError::Runtime(match name.as_str() {
                "ReferenceError" => format!("Reference Error: {}", message),
                "SyntaxError" => format!("Syntax Error: {}", message),
                "TypeError" => format!("Type Error: {}", message),
                _ => format!("{}: {}", name, message),
            }),
            Fault::Engine(message) => {
                ExecutionError::Internal(format!("JavaScript engine failure: {}", message))
            }
        }
    }
}

fn engine_setup_error(err: rquickjs::Error) -> ExecutionError {
    ExecutionError::Internal(format!("Failed to start JavaScript engine: {}", err))
}

/// Install bindings into a fresh context and return the host hooks.
fn install_sandbox<'js>(
    ctx: &Ctx<'js>,
    lines: Rc<RefCell<ConsoleLines>>,
    max_timer_delay_ms: u64,
) -> rquickjs::Result<Object<'js>> {
    let emit = Function::new(ctx.clone(), move |channel: u32, line: String| {
        let mut lines = lines.borrow_mut();
        if channel == OUTPUT_CHANNEL {
            lines.output.push(line);
        } else {
            lines.errors.push(line);
        }
    })?;

    let setup_source =
        SANDBOX_SETUP.replace("__MAX_TIMER_DELAY__", &max_timer_delay_ms.to_string());
    let setup: Function = ctx.eval(setup_source)?;
    setup.call((emit,))
}

fn run_pending_jobs(runtime: &Runtime, context: &Context, deadline: Instant) -> Result<(), Fault> {
    loop {
        if Instant::now() >= deadline {
            return Err(Fault::Timeout);
        }
        match runtime.execute_pending_job() {
            Ok(true) => continue,
            Ok(false) => return Ok(()),
            Err(_) => return Err(context.with(|ctx| Fault::from_exception(ctx.catch()))),
        }
    }
}

/// Evaluate one submission to completion on the current thread.
fn evaluate(code: &str, limits: &InterpreterLimits) -> Result<ExecutionResult, ExecutionError> {
    let runtime = Runtime::new().map_err(engine_setup_error)?;
    runtime.set_memory_limit(limits.memory_limit_bytes);
    runtime.set_max_stack_size(limits.max_stack_bytes);

    let deadline = Instant::now() + limits.timeout;
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    runtime.set_interrupt_handler(Some(Box::new(move || {
        if Instant::now() >= deadline {
            flag.store(true, Ordering::Relaxed);
            true
        } else {
            false
        }
    })));

    let context = Context::full(&runtime).map_err(engine_setup_error)?;
    let lines = Rc::new(RefCell::new(ConsoleLines::default()));

    let evaluated = context.with(|ctx| -> Result<_, Fault> {
        let hooks = install_sandbox(&ctx, lines.clone(), limits.max_timer_delay_ms)
            .map_err(|e| Fault::from_error(&ctx, e))?;
        // Source is handed over as a C string; inside literals the escape is equivalent.
        let source = code.replace('\0', "\\u0000");
        let value: Value = ctx
            .eval(source)
            .map_err(|e| Fault::from_error(&ctx, e))?;

        let returned = if value.is_undefined() {
            None
        } else {
            let format: Function = hooks.get("format").map_err(|e| Fault::from_error(&ctx, e))?;
            Some(
                format
                    .call::<_, String>((value,))
                    .map_err(|e| Fault::from_error(&ctx, e))?,
            )
        };
        Ok((Persistent::save(&ctx, hooks), returned))
    });

    let outcome = evaluated.and_then(|(hooks, returned)| {
        run_pending_jobs(&runtime, &context, deadline)?;
        let exports = context.with(|ctx| -> Result<Option<String>, Fault> {
            let hooks = hooks.restore(&ctx).map_err(|e| Fault::from_error(&ctx, e))?;
            let drain: Function = hooks.get("drain").map_err(|e| Fault::from_error(&ctx, e))?;
            drain
                .call::<_, ()>(())
                .map_err(|e| Fault::from_error(&ctx, e))?;
            let describe: Function = hooks
                .get("describeExports")
                .map_err(|e| Fault::from_error(&ctx, e))?;
            describe
                .call::<_, Option<String>>(())
                .map_err(|e| Fault::from_error(&ctx, e))
        })?;
        run_pending_jobs(&runtime, &context, deadline)?;
        Ok((exports, returned))
    });

    let lines = lines.borrow();
    let output = lines.output.join("\n");
    let errors = lines.errors.join("\n");

    match outcome {
        Ok((exports, returned)) => {
            let mut output_lines = lines.output.clone();
            output_lines.extend(exports);
            output_lines.extend(returned.map(|value| format!("Return value: {}", value)));
            Ok(ExecutionResult::success(output_lines.join("\n")).with_stderr(&errors))
        }
        Err(fault) => {
            let fault = if interrupted.load(Ordering::Relaxed) {
                Fault::Timeout
            } else {
                fault
            };
            log::debug!("JavaScript evaluation stopped: {:?}", fault);
            Ok(ExecutionResult::from(fault.into_error(limits)).with_partial_output(&output))
        }
    }
}

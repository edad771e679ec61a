//! `we run`: execute a program and print the final stack

use std::any::Any;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::Context;
use clap::ArgMatches;
use we_engine::vm::builtins::stringify;
use we_engine::{register_external, ExecutionResult, ExtControl, Value, ValueKind, Vm, VmOptions};

/// External id of the print callback installed for every run
pub const PRINT_EXTERNAL: u32 = 1;

/// Program argument, pushed after the program in command-line order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argument {
    Number(i64),
    Bytes(String),
}

pub struct RunArgs {
    pub program: PathBuf,
    pub arguments: Vec<Argument>,
    pub options: VmOptions,
    pub resume: u32,
    pub json: bool,
}

/// Final state of a run
struct Report {
    result: ExecutionResult,
    registers: Vec<Value>,
}

/// Merge `--arg` and `--arg-str` back into the order they were given
pub fn ordered_arguments(matches: &ArgMatches) -> Vec<Argument> {
    let mut indexed: Vec<(usize, Argument)> = Vec::new();
    if let (Some(values), Some(indices)) = (
        matches.get_many::<i64>("numbers"),
        matches.indices_of("numbers"),
    ) {
        indexed.extend(indices.zip(values.map(|n| Argument::Number(*n))));
    }
    if let (Some(values), Some(indices)) = (
        matches.get_many::<String>("strings"),
        matches.indices_of("strings"),
    ) {
        indexed.extend(indices.zip(values.map(|s| Argument::Bytes(s.clone()))));
    }
    indexed.sort_by_key(|(index, _)| *index);
    indexed.into_iter().map(|(_, arg)| arg).collect()
}

pub fn execute(args: RunArgs) -> anyhow::Result<()> {
    register_external(PRINT_EXTERNAL, print_external)?;
    let report = run(&args)?;

    if args.json {
        let registers = report
            .registers
            .iter()
            .map(to_json)
            .collect::<anyhow::Result<Vec<_>>>()?;
        let status = match report.result {
            ExecutionResult::Yielded => "yielded",
            ExecutionResult::Finished => "finished",
        };
        let doc = serde_json::json!({ "status": status, "stack": registers });
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        if report.result.is_yielded() {
            println!("(yielded)");
        }
        for (i, value) in report.registers.iter().enumerate() {
            println!("r{:<3} {:<6} {}", i + 1, value.kind().name(), render(value)?);
        }
    }
    Ok(())
}

fn run(args: &RunArgs) -> anyhow::Result<Report> {
    let code = std::fs::read(&args.program)
        .with_context(|| format!("Failed to read {}", args.program.display()))?;

    let mut vm = Vm::with_options(args.options.clone()).context("Failed to create VM")?;
    vm.push_buffer(Rc::from(code))?;
    for arg in &args.arguments {
        match arg {
            Argument::Number(n) => vm.push_number(*n)?,
            Argument::Bytes(s) => vm.push_string(s.as_bytes())?,
        };
    }

    let mut result = vm
        .drive(&mut ())
        .with_context(|| format!("{} failed", args.program.display()))?;
    let mut resumes = args.resume;
    while result.is_yielded() && resumes > 0 {
        resumes -= 1;
        tracing::info!(left = resumes, "resuming program");
        result = vm.drive(&mut ()).context("Resumed program failed")?;
    }

    // Register 0 holds what is left of the program
    let mut registers = Vec::new();
    for reg in 1..=vm.top() {
        let kind = vm.kind(reg)?;
        registers.push(vm.read(reg, kind)?);
    }
    Ok(Report { result, registers })
}

fn render(value: &Value) -> anyhow::Result<String> {
    let text = stringify(value)?;
    Ok(String::from_utf8_lossy(&text.to_vec()).into_owned())
}

fn to_json(value: &Value) -> anyhow::Result<serde_json::Value> {
    Ok(match value {
        Value::Nil => serde_json::Value::Null,
        Value::Number(n) => serde_json::Value::from(*n),
        other => serde_json::Value::String(render(other)?),
    })
}

/// `ext 1`: print the items of the argument array on one line
fn print_external(vm: &mut Vm, _host: &mut dyn Any) -> ExtControl {
    let mut parts = Vec::new();
    for reg in 0..=vm.top() {
        let value = match vm.kind(reg).and_then(|kind| vm.read(reg, kind)) {
            Ok(value) => value,
            Err(e) => return ExtControl::Error(e.code().abs()),
        };
        if value.kind() == ValueKind::Nil {
            continue;
        }
        match render(&value) {
            Ok(text) => parts.push(text),
            Err(_) => return ExtControl::Error(22),
        }
    }
    println!("{}", parts.join(" "));
    ExtControl::Continue
}

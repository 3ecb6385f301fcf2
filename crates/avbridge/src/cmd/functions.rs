use avbridge_dispatch::{Function, FunctionKind};
use serde::Serialize;

use crate::cmd::FunctionsArgs;
use crate::exit::{CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct FunctionEntry {
    name: String,
    kind: FunctionKind,
    accessor: bool,
}

#[derive(Serialize)]
struct FunctionsOutput {
    count: usize,
    functions: Vec<FunctionEntry>,
}

pub fn run(args: FunctionsArgs, format: OutputFormat) -> CliResult<i32> {
    let kind = args.kind.as_deref().map(parse_kind).transpose()?;
    let functions: Vec<FunctionEntry> = Function::all()
        .filter(|f| args.accessors || matches!(f, Function::Builtin(_)))
        .filter(|f| kind.is_none_or(|k| f.kind() == k))
        .map(|f| FunctionEntry {
            name: f.name().into_owned(),
            kind: f.kind(),
            accessor: !matches!(f, Function::Builtin(_)),
        })
        .collect();

    let out = FunctionsOutput {
        count: functions.len(),
        functions,
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_table(
            &["FUNCTION", "KIND"],
            out.functions
                .iter()
                .map(|f| vec![f.name.clone(), f.kind.to_string()])
                .collect(),
        ),
        OutputFormat::Pretty => {
            for f in &out.functions {
                println!("{:<40} {}", f.name, f.kind);
            }
            println!("{} functions", out.count);
        }
        OutputFormat::Raw => {
            for f in &out.functions {
                println!("{}", f.name);
            }
        }
    }
    Ok(SUCCESS)
}

fn parse_kind(input: &str) -> CliResult<FunctionKind> {
    match input {
        "primitive" => Ok(FunctionKind::Primitive),
        "device" => Ok(FunctionKind::Device),
        "meta" => Ok(FunctionKind::Meta),
        other => Err(CliError::new(
            USAGE,
            format!("unknown function kind: {other} (expected primitive, device or meta)"),
        )),
    }
}

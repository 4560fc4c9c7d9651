use std::{
    fs::File,
    io::{Read, Write},
    path::PathBuf,
    process::ExitCode,
};

use annotate_snippets::{
    display_list::{DisplayList, FormatOptions},
    snippet::{Annotation, AnnotationType, Slice, Snippet, SourceAnnotation},
};
use clap::{Args, Parser, Subcommand};
use hir::{Graph, InstructionKind, Module, Type};
use hir_interp::{Interpreter, Value};
use hir_parser::{AdditionalInfo, Diagnosis};
use hir_scheduler::{BlockSchedule, HInstructionScheduling, InstructionSet, SchedulingOptions};
use rayon::prelude::*;
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// schedules every method and prints the resulting HIR
    Schedule(ScheduleArgument),
    /// interprets a method, optionally after scheduling it
    Run(RunArgument),
}

#[derive(Args, Debug)]
struct SchedulingArgument {
    /// Target instruction set
    #[arg(long, default_value = "arm64")]
    isa: InstructionSet,
    /// Pick ready instructions at random instead of by critical path
    #[arg(long)]
    random: bool,
    /// Seed of the random selector
    #[arg(long)]
    seed: Option<u64>,
    /// Leave blocks outside of loops alone
    #[arg(long)]
    only_loops: bool,
}

impl SchedulingArgument {
    fn options(&self, dump_dot_graphs: Option<PathBuf>) -> SchedulingOptions {
        SchedulingOptions {
            only_optimize_loop_blocks: self.only_loops,
            schedule_randomly: self.random,
            random_seed: self.seed,
            dump_dot_graphs,
            ..Default::default()
        }
    }
}

#[derive(Args, Debug)]
struct ScheduleArgument {
    /// File path to input
    #[arg(short, long)]
    input: String,
    /// File path to output, stdout if absent
    #[arg(short, long)]
    output: Option<String>,
    /// File path the scheduling graphs are appended to
    #[arg(long)]
    dot: Option<PathBuf>,
    /// File path to output the JSON schedule report
    #[arg(long)]
    report: Option<String>,
    #[command(flatten)]
    scheduling: SchedulingArgument,
}

#[derive(Args, Debug)]
struct RunArgument {
    /// File path to input
    #[arg(short, long)]
    input: String,
    /// Method to call
    #[arg(short, long)]
    method: String,
    /// Comma separated arguments
    #[arg(short, long, value_delimiter = ',', allow_hyphen_values = true)]
    args: Vec<String>,
    /// Schedule the module before running it
    #[arg(long)]
    schedule: bool,
    /// Number of runs, each on a freshly scheduled module
    #[arg(long, default_value_t = 1)]
    times: usize,
    #[command(flatten)]
    scheduling: SchedulingArgument,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    ParseError(String),
    #[error(transparent)]
    Scheduling(#[from] hir_scheduler::Error),
    #[error(transparent)]
    Interp(#[from] hir_interp::Error),
    #[error("method `{0}` not found")]
    UnknownMethod(String),
    #[error("`{method}` takes {expected} arguments, {actual} given")]
    ArgumentCount {
        method: String,
        expected: usize,
        actual: usize,
    },
    #[error("cannot read `{value}` as {ty}")]
    BadArgument { value: String, ty: &'static str },
    #[error(transparent)]
    SerError(#[from] serde_json::Error),
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Cli::parse();
    let r = match args.command {
        Commands::Schedule(argument) => schedule(argument),
        Commands::Run(argument) => run(argument),
    };
    if let Err(e) = r {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn schedule(
    ScheduleArgument {
        input,
        output,
        dot,
        report,
        scheduling,
    }: ScheduleArgument,
) -> Result<(), Error> {
    let mut module = read_module(&input)?;
    let options = scheduling.options(dot);
    let blocks = schedule_module(&mut module, scheduling.isa, &options)?;
    log::info!(
        "{} blocks scheduled, {} instructions moved",
        blocks.len(),
        blocks.iter().map(|b| b.moved).sum::<usize>()
    );
    match output {
        Some(path) => write!(File::create(path)?, "{module}")?,
        None => print!("{module}"),
    }
    if let Some(path) = report {
        let mut file = File::create(path)?;
        let s = serde_json::to_string_pretty(&blocks)?;
        file.write_all(s.as_bytes())?;
    }
    Ok(())
}

fn run(
    RunArgument {
        input,
        method,
        args,
        schedule,
        times,
        scheduling,
    }: RunArgument,
) -> Result<(), Error> {
    let module = read_module(&input)?;
    let graph = module
        .method(&method)
        .ok_or_else(|| Error::UnknownMethod(method.clone()))?;
    let args = parse_arguments(graph, &args)?;
    let options = scheduling.options(None);
    for _ in 0..times {
        let mut module = module.clone();
        if schedule {
            schedule_module(&mut module, scheduling.isa, &options)?;
        }
        let outcome = Interpreter::new(&module).run(&method, &args)?;
        println!("{outcome}");
    }
    Ok(())
}

/// Methods are independent, so they are scheduled in parallel unless their
/// dot graphs go to a shared file.
fn schedule_module(
    module: &mut Module,
    isa: InstructionSet,
    options: &SchedulingOptions,
) -> Result<Vec<BlockSchedule>, Error> {
    let schedule_method =
        |graph: &mut Graph| HInstructionScheduling::new(graph, isa).run(options);
    let reports: Vec<Vec<BlockSchedule>> = if options.dump_dot_graphs.is_some() {
        module
            .methods
            .iter_mut()
            .map(schedule_method)
            .collect::<Result<_, _>>()?
    } else {
        module
            .methods
            .par_iter_mut()
            .map(schedule_method)
            .collect::<Result<_, _>>()?
    };
    Ok(reports.into_iter().flatten().collect())
}

fn parse_arguments(graph: &Graph, args: &[String]) -> Result<Vec<Value>, Error> {
    let mut types = vec![Type::Void; graph.parameter_count()];
    for instr in graph.instructions() {
        if let InstructionKind::ParameterValue(index) = instr.kind() {
            types[usize::from(*index)] = instr.ty();
        }
    }
    if types.len() != args.len() {
        return Err(Error::ArgumentCount {
            method: graph.name().to_string(),
            expected: types.len(),
            actual: args.len(),
        });
    }
    types
        .iter()
        .zip(args)
        .map(|(&ty, arg)| {
            Value::parse(ty, arg).ok_or_else(|| Error::BadArgument {
                value: arg.clone(),
                ty: ty.name(),
            })
        })
        .collect()
}

fn read_module(path: &str) -> Result<Module, Error> {
    let mut file = File::open(path)?;
    let mut input = String::new();
    file.read_to_string(&mut input)?;
    hir_parser::parse(&input)
        .map_err(|hir_parser::Error { line_number, inner }| {
            let line_of = |n: usize| -> String {
                input
                    .lines()
                    .nth(n.saturating_sub(1))
                    .unwrap_or_default()
                    .chars()
                    .map(|c| match c {
                        '\t' => ' ',
                        c => c,
                    })
                    .collect()
            };
            let source = line_of(line_number);
            let label = format!("{inner}");

            let Diagnosis {
                range,
                label: l,
                level: _,
                info,
            } = inner.diagnosis();
            let ann = SourceAnnotation {
                range,
                label: &l,
                annotation_type: AnnotationType::Error,
            };
            let outlive;

            let snippet = Snippet {
                title: Some(Annotation {
                    label: Some(&label),
                    id: None,
                    annotation_type: AnnotationType::Error,
                }),
                footer: vec![],
                slices: {
                    let s2 = Slice {
                        source: &source,
                        line_start: line_number,
                        origin: Some(path),
                        fold: true,
                        annotations: vec![ann],
                    };
                    match info {
                        Some(AdditionalInfo { line, range, label }) => {
                            outlive = (line_of(line), label);
                            let s1 = Slice {
                                source: &outlive.0,
                                line_start: line,
                                origin: Some(path),
                                annotations: vec![SourceAnnotation {
                                    range,
                                    label: &outlive.1,
                                    annotation_type: AnnotationType::Info,
                                }],
                                fold: true,
                            };
                            vec![s1, s2]
                        }
                        None => vec![s2],
                    }
                },
                opt: FormatOptions {
                    color: true,
                    ..Default::default()
                },
            };

            let dl = DisplayList::from(snippet);
            Error::ParseError(dl.to_string())
        })
}

use std::{
    fmt::{self, Display},
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use clap::{ArgAction, Parser as ClapParser, Subcommand as ClapSubcommand};
use eyre::{WrapErr, eyre};
use kestrel_asm::CodePtr;
use kestrel_jit::{
    CompileOutcome, ExecutableId, Invocation, JitDriver, MetricsSnapshot, Specialization, Tier, UnlinkedUnit,
};
use kestrel_syntax::{CodeFeatures, ParseMode, ParseStats, ParserOptions, SourceProvider, SourceRange, check_syntax};
use serde::Serialize;
use tracing::{Level, info};

use crate::initializers::init_driver;

/// Bytes per line of a code dump.
const DUMP_WIDTH: usize = 16;

#[allow(clippy::upper_case_acronyms)]
#[derive(ClapParser)]
#[command(name = "kestrel", author = "Kestrel contributors", version, about = "Tiered ES5 front end and JIT")]
pub struct CLI {
    #[command(flatten)]
    pub opts: Options,
    #[command(subcommand)]
    pub command: Subcommand,
}

#[derive(ClapParser, Debug, Clone)]
pub struct Options {
    #[arg(
        long = "log.level",
        default_value_t = Level::WARN,
        value_name = "LOG_LEVEL",
        env = "KESTREL_LOG_LEVEL",
        help = "The verbosity level used for logs.",
        long_help = "Possible values: info, debug, trace, warn, error",
        global = true
    )]
    pub log_level: Level,
    #[arg(
        long = "log.color",
        default_value_t = LogColor::Auto,
        help = "Output logs with ANSI color codes.",
        long_help = "Possible values: auto, always, never",
        env = "KESTREL_LOG_COLOR",
        global = true
    )]
    pub log_color: LogColor,
    #[arg(
        long = "json",
        action = ArgAction::SetTrue,
        help = "Print reports as JSON",
        global = true
    )]
    pub json: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            log_level: Level::WARN,
            log_color: LogColor::Auto,
            json: false,
        }
    }
}

/// Tiering knobs shared by the commands that drive the JIT.
#[derive(ClapParser, Debug, Clone)]
pub struct JitOptions {
    #[arg(
        long = "warm-up",
        value_name = "INVOCATIONS",
        default_value_t = 10,
        env = "KESTREL_WARM_UP",
        help = "Baseline invocations before the optimizing tier is tried"
    )]
    pub warm_up: u32,
    #[arg(
        long = "max-code-size",
        value_name = "BYTES",
        default_value_t = 64 * 1024,
        help = "Largest optimized code the optimizing tier accepts"
    )]
    pub max_code_size: usize,
    #[arg(long = "disable-jit", action = ArgAction::SetTrue, help = "Never tier up past the baseline")]
    pub disable_jit: bool,
}

impl Default for JitOptions {
    fn default() -> Self {
        Self {
            warm_up: 10,
            max_code_size: 64 * 1024,
            disable_jit: false,
        }
    }
}

/// Which code of the file a command works on.
#[derive(ClapParser, Debug, Clone, Default)]
pub struct TargetOptions {
    #[arg(
        long = "function",
        value_name = "NAME",
        help = "Top-level function to use instead of the program"
    )]
    pub function: Option<String>,
    #[arg(
        long = "construct",
        action = ArgAction::SetTrue,
        requires = "function",
        help = "Use the construct entry of the function"
    )]
    pub construct: bool,
}

#[derive(ClapSubcommand)]
pub enum Subcommand {
    #[command(name = "check", about = "Validate a script without building a tree")]
    Check {
        #[arg(required = true, value_name = "FILE_PATH")]
        path: PathBuf,
    },
    #[command(name = "parse", about = "Parse a script and summarize the unit")]
    Parse {
        #[arg(required = true, value_name = "FILE_PATH")]
        path: PathBuf,
        #[arg(long = "dump", action = ArgAction::SetTrue, help = "Print the syntax tree")]
        dump: bool,
    },
    #[command(name = "compile", about = "Compile a script with the optimizing tier")]
    Compile {
        #[arg(required = true, value_name = "FILE_PATH")]
        path: PathBuf,
        #[command(flatten)]
        target: TargetOptions,
        #[command(flatten)]
        jit: JitOptions,
    },
    #[command(name = "run", about = "Simulate invocations through the tiering harness")]
    Run {
        #[arg(required = true, value_name = "FILE_PATH")]
        path: PathBuf,
        #[command(flatten)]
        target: TargetOptions,
        #[command(flatten)]
        jit: JitOptions,
        #[arg(long = "calls", value_name = "COUNT", default_value_t = 20)]
        calls: u32,
        #[arg(long = "args", value_name = "COUNT", default_value_t = 0, help = "Arguments passed per call")]
        argument_count: u32,
        #[arg(
            long = "jettison-after",
            value_name = "CALL",
            help = "Jettison optimized code after this many calls"
        )]
        jettison_after: Option<u32>,
    },
}

impl Subcommand {
    pub fn run(self, opts: &Options) -> eyre::Result<()> {
        match self {
            Subcommand::Check { path } => emit(&check_file(&path)?, opts.json),
            Subcommand::Parse { path, dump } => {
                let report = parse_file(&path)?;
                emit(&report, opts.json)?;
                if dump {
                    println!("{}", report.dump);
                }
                Ok(())
            }
            Subcommand::Compile { path, target, jit } => {
                let mut driver = init_driver(&jit)?;
                emit(&compile_file(&mut driver, &path, &target)?, opts.json)
            }
            Subcommand::Run {
                path,
                target,
                jit,
                calls,
                argument_count,
                jettison_after,
            } => {
                let mut driver = init_driver(&jit)?;
                let plan = RunPlan {
                    calls,
                    argument_count,
                    jettison_after,
                };
                emit(&run_file(&mut driver, &path, &target, &plan)?, opts.json)
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum LogColor {
    #[default]
    Auto,
    Always,
    Never,
}

impl Display for LogColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogColor::Auto => write!(f, "auto"),
            LogColor::Always => write!(f, "always"),
            LogColor::Never => write!(f, "never"),
        }
    }
}

impl FromStr for LogColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(LogColor::Auto),
            "always" => Ok(LogColor::Always),
            "never" => Ok(LogColor::Never),
            _ => Err(format!("Invalid log color '{s}'. Expected: auto, always, or never")),
        }
    }
}

fn emit<R: Serialize + Display>(report: &R, json: bool) -> eyre::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{report}");
    }
    Ok(())
}

fn read_source(path: &Path) -> eyre::Result<SourceRange> {
    let text = fs::read_to_string(path).wrap_err_with(|| format!("Failed to read {}", path.display()))?;
    Ok(SourceProvider::new(path.display().to_string(), text).full_range())
}

// ─── check ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct CheckReport {
    pub url: String,
    pub strict: bool,
    pub features: CodeFeatures,
    pub captured_variables: Vec<String>,
    pub constant_count: usize,
    pub stats: ParseStats,
}

impl Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: ok", self.url)?;
        writeln!(f, "  strict:    {}", self.strict)?;
        writeln!(f, "  features:  {}", self.features)?;
        writeln!(f, "  captured:  {}", self.captured_variables.join(", "))?;
        writeln!(f, "  constants: {}", self.constant_count)?;
        writeln!(f, "  tokens:    {}", self.stats.tokens_lexed)
    }
}

pub fn check_file(path: &Path) -> eyre::Result<CheckReport> {
    let source = read_source(path)?;
    let output = check_syntax(&source, &ParseMode::Program, &ParserOptions::default())
        .wrap_err_with(|| format!("{} does not parse", path.display()))?;
    Ok(CheckReport {
        url: source.provider().url().to_string(),
        strict: output.is_strict(),
        features: output.features,
        captured_variables: output.captured_variables.iter().map(|name| name.to_string()).collect(),
        constant_count: output.constant_count,
        stats: output.stats,
    })
}

// ─── parse ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct FunctionSummary {
    pub name: Option<String>,
    pub parameters: Vec<String>,
    pub body_start: usize,
    pub body_end: usize,
    pub strict: bool,
}

#[derive(Debug, Serialize)]
pub struct ParseReport {
    pub url: String,
    pub strict: bool,
    pub features: CodeFeatures,
    pub variables: Vec<String>,
    pub functions: Vec<FunctionSummary>,
    pub numeric_constants: Vec<f64>,
    pub stats: ParseStats,
    #[serde(skip)]
    pub dump: String,
}

impl Display for ParseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: {} statements parsed", self.url, self.dump.lines().count())?;
        writeln!(f, "  strict:    {}", self.strict)?;
        writeln!(f, "  features:  {}", self.features)?;
        writeln!(f, "  variables: {}", self.variables.join(", "))?;
        writeln!(f, "  constants: {:?}", self.numeric_constants)?;
        writeln!(f, "  reparses:  {}", self.stats.reparses)?;
        for function in &self.functions {
            writeln!(
                f,
                "  function {}({}) body {}..{}{}",
                function.name.as_deref().unwrap_or("<anonymous>"),
                function.parameters.join(", "),
                function.body_start,
                function.body_end,
                if function.strict { " strict" } else { "" }
            )?;
        }
        Ok(())
    }
}

pub fn parse_file(path: &Path) -> eyre::Result<ParseReport> {
    let source = read_source(path)?;
    let unit = UnlinkedUnit::program(&source, &ParserOptions::default())
        .wrap_err_with(|| format!("{} does not parse", path.display()))?;
    let functions = unit
        .functions()
        .iter()
        .map(|function| FunctionSummary {
            name: function.name().map(|name| name.to_string()),
            parameters: function.parameters().iter().map(|name| name.to_string()).collect(),
            body_start: function.body().start(),
            body_end: function.body().end(),
            strict: function.is_strict(),
        })
        .collect();
    Ok(ParseReport {
        url: source.provider().url().to_string(),
        strict: unit.is_strict(),
        features: unit.features(),
        variables: unit.declared_variables().iter().map(|name| name.to_string()).collect(),
        functions,
        numeric_constants: unit.numeric_constants().to_vec(),
        stats: unit.stats(),
        dump: unit.parsed().dump(),
    })
}

// ─── compile ───────────────────────────────────────────────────────

/// Link the program in `path`, or one of its top-level functions.
pub fn link_target(
    driver: &mut JitDriver,
    path: &Path,
    target: &TargetOptions,
) -> eyre::Result<(ExecutableId, Specialization)> {
    let source = read_source(path)?;
    let program = UnlinkedUnit::program(&source, &ParserOptions::default())
        .wrap_err_with(|| format!("{} does not parse", path.display()))?;
    let Some(name) = &target.function else {
        return Ok((driver.link_unit(program), Specialization::Global));
    };
    let function = program
        .function_named(name)
        .ok_or_else(|| eyre!("{} declares no function named '{name}'", path.display()))?;
    let executable = driver.link_function(function)?;
    let specialization = if target.construct {
        Specialization::Construct
    } else {
        Specialization::Call
    };
    Ok((executable, specialization))
}

#[derive(Debug, Serialize)]
pub struct CompileReport {
    pub specialization: Specialization,
    pub outcome: CompileOutcome,
    pub tier: Option<Tier>,
    pub entry: Option<CodePtr>,
    pub arity_check: Option<CodePtr>,
    pub watchpoints: Vec<CodePtr>,
    pub base: Option<CodePtr>,
    pub code: Option<String>,
}

impl Display for CompileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} entry: {:?}", self.specialization, self.outcome)?;
        if let Some(tier) = self.tier {
            writeln!(f, "  live tier:   {tier}")?;
        }
        if let (Some(entry), Some(arity_check)) = (self.entry, self.arity_check) {
            writeln!(f, "  entry:       {entry}")?;
            writeln!(f, "  arity check: {arity_check}")?;
        }
        for watchpoint in &self.watchpoints {
            writeln!(f, "  watchpoint:  {watchpoint}")?;
        }
        if let (Some(base), Some(code)) = (self.base, &self.code) {
            f.write_str(&dump_code(base, code))?;
        }
        Ok(())
    }
}

/// Hex dump of `code` (hex encoded) starting at `base`.
pub fn dump_code(base: CodePtr, code: &str) -> String {
    let Ok(bytes) = hex::decode(code) else {
        return String::new();
    };
    bytes
        .chunks(DUMP_WIDTH)
        .enumerate()
        .map(|(line, chunk)| {
            format!(
                "  {}  {}\n",
                base.offset_by(line.saturating_mul(DUMP_WIDTH)),
                hex::encode(chunk)
            )
        })
        .collect()
}

pub fn compile_file(driver: &mut JitDriver, path: &Path, target: &TargetOptions) -> eyre::Result<CompileReport> {
    let (executable, specialization) = link_target(driver, path, target)?;
    let outcome = driver.compile_if_appropriate(executable, specialization, Tier::Optimized)?;
    info!(path = %path.display(), outcome = ?outcome, "Compiled");

    let mut report = CompileReport {
        specialization,
        outcome,
        tier: driver.live_tier(executable, specialization)?,
        entry: None,
        arity_check: None,
        watchpoints: Vec::new(),
        base: None,
        code: None,
    };
    if let Some(live) = driver.live_block(executable, specialization)? {
        let block = driver.block(live)?;
        if let Some(code) = block.code().map(Arc::clone) {
            report.entry = Some(block.entries().entry);
            report.arity_check = Some(block.entries().arity_check);
            report.watchpoints = block.watchpoints().to_vec();
            report.base = Some(code.base());
            report.code = Some(code.hex()?);
        }
    }
    Ok(report)
}

// ─── run ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct RunPlan {
    pub calls: u32,
    pub argument_count: u32,
    pub jettison_after: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub invocations: Vec<Invocation>,
    pub jettisoned_at: Option<u32>,
    pub final_tier: Option<Tier>,
    pub metrics: MetricsSnapshot,
}

impl Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (call, invocation) in self.invocations.iter().enumerate() {
            write!(
                f,
                "call {:>4}  {:<9}  {}  {}",
                call.saturating_add(1),
                invocation.tier.to_string(),
                invocation.block,
                invocation.entry
            )?;
            if invocation.arity_checked {
                f.write_str("  (arity)")?;
            }
            match invocation.tier_up {
                Some(CompileOutcome::Compiled(block)) => writeln!(f, "  -> tier-up to {block}")?,
                Some(outcome) => writeln!(f, "  -> tier-up: {outcome:?}")?,
                None => writeln!(f)?,
            }
            if self.jettisoned_at == Some(u32::try_from(call).unwrap_or(u32::MAX).saturating_add(1)) {
                writeln!(f, "  -- jettisoned")?;
            }
        }
        if let Some(tier) = self.final_tier {
            writeln!(f, "final tier: {tier}")?;
        }
        writeln!(
            f,
            "compilations {}, failures {}, skips {}, jettisons {}",
            self.metrics.compilations,
            self.metrics.compile_failures,
            self.metrics.capability_skips,
            self.metrics.jettisons
        )
    }
}

pub fn run_file(
    driver: &mut JitDriver,
    path: &Path,
    target: &TargetOptions,
    plan: &RunPlan,
) -> eyre::Result<RunReport> {
    let (executable, specialization) = link_target(driver, path, target)?;
    let mut invocations = Vec::new();
    let mut jettisoned_at = None;
    for call in 1..=plan.calls {
        invocations.push(driver.invoke(executable, specialization, plan.argument_count)?);
        if plan.jettison_after == Some(call)
            && driver
                .live_tier(executable, specialization)?
                .is_some_and(|tier| tier > Tier::Baseline)
        {
            driver.jettison(executable, specialization)?;
            jettisoned_at = Some(call);
        }
    }
    Ok(RunReport {
        invocations,
        jettisoned_at,
        final_tier: driver.live_tier(executable, specialization)?,
        metrics: driver.metrics().snapshot(),
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn script(text: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    fn add_target() -> TargetOptions {
        TargetOptions {
            function: Some("add".to_string()),
            construct: false,
        }
    }

    const ADD: &str = "function add(a, b) { return a + b; }\nadd(1, 2);\n";

    #[test]
    fn test_check_reports_features() {
        let file = script("'use strict'; function f() { return this; }");
        let report = check_file(file.path()).unwrap();
        assert!(report.strict);
        assert_eq!(report.stats.reparses, 1);
    }

    #[test]
    fn test_check_rejects_bad_syntax() {
        let file = script("var = 1;");
        assert!(check_file(file.path()).is_err());
    }

    #[test]
    fn test_parse_lists_functions() {
        let file = script(ADD);
        let report = parse_file(file.path()).unwrap();
        assert_eq!(report.functions.len(), 1);
        assert_eq!(report.functions[0].name.as_deref(), Some("add"));
        assert_eq!(report.functions[0].parameters, vec!["a", "b"]);
        assert!(!report.dump.is_empty());
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("dump").is_none(), "the tree is only printed on request");
    }

    #[test]
    fn test_compile_dumps_code() {
        let file = script(ADD);
        let mut driver = init_driver(&JitOptions::default()).unwrap();
        let report = compile_file(&mut driver, file.path(), &add_target()).unwrap();
        assert!(matches!(report.outcome, CompileOutcome::Compiled(_)));
        assert_eq!(report.tier, Some(Tier::Optimized));
        let code = report.code.as_deref().unwrap();
        assert!(code.starts_with("83fe027d05e8"), "arity check first: {code}");
        let dump = dump_code(report.base.unwrap(), code);
        assert_eq!(dump.lines().count(), code.len().div_ceil(DUMP_WIDTH * 2));
    }

    #[test]
    fn test_unknown_function_is_an_error() {
        let file = script(ADD);
        let mut driver = init_driver(&JitOptions::default()).unwrap();
        let target = TargetOptions {
            function: Some("sub".to_string()),
            construct: false,
        };
        let err = compile_file(&mut driver, file.path(), &target).unwrap_err();
        assert!(err.to_string().contains("no function named 'sub'"), "got {err}");
    }

    #[test]
    fn test_run_tiers_up_and_jettisons() {
        let file = script(ADD);
        let jit = JitOptions {
            warm_up: 3,
            ..JitOptions::default()
        };
        let mut driver = init_driver(&jit).unwrap();
        let plan = RunPlan {
            calls: 6,
            argument_count: 2,
            jettison_after: Some(5),
        };
        let report = run_file(&mut driver, file.path(), &add_target(), &plan).unwrap();
        let tiers: Vec<_> = report.invocations.iter().map(|call| call.tier).collect();
        assert_eq!(
            tiers,
            vec![
                Tier::Baseline,
                Tier::Baseline,
                Tier::Baseline,
                Tier::Optimized,
                Tier::Optimized,
                Tier::Baseline
            ]
        );
        assert_eq!(report.jettisoned_at, Some(5));
        assert_eq!(report.final_tier, Some(Tier::Baseline));
        assert_eq!(report.metrics.jettisons, 1);
    }

    #[test]
    fn test_log_color_parses() {
        assert_eq!("ALWAYS".parse::<LogColor>().unwrap(), LogColor::Always);
        assert!("sometimes".parse::<LogColor>().is_err());
    }

    #[test]
    fn test_cli_parses_flags() {
        let cli = CLI::try_parse_from([
            "kestrel",
            "run",
            "script.js",
            "--function",
            "add",
            "--warm-up",
            "2",
            "--calls",
            "5",
            "--json",
        ])
        .unwrap();
        assert!(cli.opts.json);
        match cli.command {
            Subcommand::Run { target, jit, calls, .. } => {
                assert_eq!(target.function.as_deref(), Some("add"));
                assert_eq!(jit.warm_up, 2);
                assert_eq!(calls, 5);
            }
            _ => panic!("expected the run subcommand"),
        }
    }
}

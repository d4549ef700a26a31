//! remote-mem command line
//!
//! Thin front end over the library. Values not given as flags are prompted
//! for on stdin.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use remote_mem::config::{validate_config, Config, ConfigLoader};
use remote_mem::disasm::{disassemble_bytes, DisassembledInstruction, Syntax};
use remote_mem::pe::{
    parse_exports_from_file, parse_imports_from_file, ExportDirectory, ImportDirectory,
};
use remote_mem::{Address, MemoryError, ProcessArchitecture};
use serde::Serialize;
use std::fs::File;
use std::io;
#[cfg(windows)]
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "remote-mem")]
#[command(version)]
#[command(about = "Inspect, inject into and call functions inside another process", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, global = true, default_value = "remote-mem.toml")]
    config: PathBuf,

    /// Overrides the configured level; RUST_LOG wins over both
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Log to the configured file instead of stderr
    #[arg(long, global = true)]
    log_file: bool,

    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the modules loaded in a process
    Modules(TargetArgs),
    /// Walk a process's address space
    Regions(RegionsArgs),
    /// Print a module's export table
    Exports(ImageArgs),
    /// Print a module's import table
    Imports(ImageArgs),
    /// Search readable process memory for bytes or strings
    Scan(ScanArgs),
    /// Load a module into a running process
    Inject(InjectArgs),
    /// Start a process suspended and load a module into it
    Create(CreateArgs),
    /// Call a function inside a process
    Call(CallArgs),
    /// Disassemble process memory or a hex string
    Disasm(DisasmArgs),
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Modules(_) => "modules",
            Command::Regions(_) => "regions",
            Command::Exports(_) => "exports",
            Command::Imports(_) => "imports",
            Command::Scan(_) => "scan",
            Command::Inject(_) => "inject",
            Command::Create(_) => "create",
            Command::Call(_) => "call",
            Command::Disasm(_) => "disasm",
        }
    }
}

#[derive(clap::Args, Debug)]
struct TargetArgs {
    /// Process executable name
    #[arg(short, long)]
    process: Option<String>,

    #[arg(long, conflicts_with = "process")]
    pid: Option<u32>,
}

#[derive(Parser, Debug)]
struct RegionsArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Skip free and reserved regions
    #[arg(long)]
    committed: bool,
}

#[derive(Parser, Debug)]
struct ImageArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Module name inside the process
    #[arg(short, long)]
    module: Option<String>,

    /// Parse a file on disk instead
    #[arg(short, long, conflicts_with_all = ["process", "pid", "module"])]
    file: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct ScanArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Hex bytes with ?? wildcards, e.g. "48 8B ?? ?? 90"
    #[arg(long, conflicts_with = "string")]
    pattern: Option<String>,

    /// Text to look for
    #[arg(long)]
    string: Option<String>,

    /// Look for the text as UTF-16
    #[arg(long, requires = "string")]
    wide: bool,

    /// Only scan executable regions
    #[arg(long, conflicts_with = "writable")]
    executable: bool,

    /// Only scan writable regions
    #[arg(long)]
    writable: bool,

    /// Stop after this many matches
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Parser, Debug)]
struct InjectArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Module to load
    #[arg(short, long)]
    module: Option<PathBuf>,

    /// Export to call after loading
    #[arg(short, long)]
    export: Option<String>,

    /// Load with the module's directory first in the search order
    #[arg(long)]
    search_order: bool,

    /// Pass the path to the loader as given
    #[arg(long)]
    no_resolve: bool,
}

#[derive(Parser, Debug)]
struct CreateArgs {
    /// Executable to start
    #[arg(long)]
    path: Option<PathBuf>,

    #[arg(short, long)]
    work_dir: Option<PathBuf>,

    #[arg(short, long)]
    module: Option<PathBuf>,

    #[arg(short, long)]
    export: Option<String>,

    /// Leave the main thread suspended
    #[arg(long)]
    keep_suspended: bool,

    /// Arguments for the new process
    #[arg(last = true)]
    args: Vec<String>,
}

#[derive(Parser, Debug)]
struct CallArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Function address
    #[arg(short, long)]
    address: Option<String>,

    /// Argument values, hex with 0x or decimal
    #[arg(long = "arg")]
    args: Vec<String>,

    #[arg(long, default_value = "default")]
    convention: String,
}

#[derive(Parser, Debug)]
struct DisasmArgs {
    #[command(flatten)]
    target: TargetArgs,

    #[arg(short, long)]
    address: Option<String>,

    /// Number of instructions; defaults to the configured count
    #[arg(short = 'n', long)]
    count: Option<usize>,

    /// Decode these bytes instead of process memory
    #[arg(long = "hex", conflicts_with_all = ["process", "pid"])]
    hex_bytes: Option<String>,

    /// Architecture for --hex
    #[arg(long, default_value = "x64")]
    arch: String,

    #[arg(long)]
    syntax: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = ConfigLoader::new(&args.config).load_or_default();
    validate_config(&config).with_context(|| format!("invalid config {}", args.config.display()))?;
    init_logging(&args, &config)?;

    debug!("Loaded configuration from {}", args.config.display());
    run(args.command, &config, args.json)
}

fn init_logging(args: &Args, config: &Config) -> Result<()> {
    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if args.log_file {
        let file = File::create(&config.logging.file)
            .with_context(|| format!("cannot open log file {}", config.logging.file))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(io::stderr)
            .init();
    }
    Ok(())
}

fn run(command: Command, config: &Config, json: bool) -> Result<()> {
    debug!("Running {}", command.name());
    match command {
        Command::Exports(ImageArgs {
            file: Some(file), ..
        }) => {
            let exports = parse_exports_from_file(&file)?;
            print_exports(&exports, json)
        }
        Command::Imports(ImageArgs {
            file: Some(file), ..
        }) => {
            let imports = parse_imports_from_file(&file)?;
            print_imports(&imports, json)
        }
        Command::Disasm(DisasmArgs {
            hex_bytes: Some(text),
            address,
            count,
            arch,
            syntax,
            ..
        }) => {
            let bytes = hex::decode(text.replace([' ', '\n'], "")).context("--hex is not valid hex")?;
            let base = match address {
                Some(text) => parse_address(&text)?,
                None => Address::null(),
            };
            let architecture = match arch.to_ascii_lowercase().as_str() {
                "x86" | "32" => ProcessArchitecture::X86,
                "x64" | "64" => ProcessArchitecture::X64,
                other => bail!("unknown architecture '{}'", other),
            };
            let syntax = pick_syntax(syntax.as_deref(), config)?;
            let result = disassemble_bytes(&bytes, base, architecture, syntax);
            let result = result.map(|mut decoded| {
                if let Some(count) = count {
                    decoded.truncate(count);
                }
                decoded
            });
            print_disassembly(result, json)
        }
        command => live::run(command, config, json),
    }
}

#[cfg(windows)]
fn prompt(label: &str) -> Result<String> {
    let mut stderr = io::stderr();
    write!(stderr, "{}: ", label)?;
    stderr.flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let value = line.trim().to_string();
    if value.is_empty() {
        bail!("no {} given", label.to_lowercase());
    }
    Ok(value)
}

#[cfg(windows)]
fn value_or_prompt(value: Option<String>, label: &str) -> Result<String> {
    match value {
        Some(value) => Ok(value),
        None => prompt(label),
    }
}

fn parse_address(text: &str) -> Result<Address> {
    text.parse::<Address>()
        .with_context(|| format!("'{}' is not an address", text))
}

#[cfg(windows)]
/// Hex with a 0x prefix, otherwise decimal; negative values wrap
fn parse_value(text: &str) -> Result<u64> {
    let text = text.trim();
    let value = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else if let Some(negative) = text.strip_prefix('-') {
        negative.parse::<i64>().ok().map(|v| v.wrapping_neg() as u64)
    } else {
        text.parse::<u64>().ok()
    };
    value.with_context(|| format!("'{}' is not a number", text))
}

fn pick_syntax(flag: Option<&str>, config: &Config) -> Result<Syntax> {
    match flag {
        Some(name) => Ok(name.parse()?),
        None => Ok(config.syntax()),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_exports(exports: &ExportDirectory, json: bool) -> Result<()> {
    if json {
        return print_json(exports);
    }
    if !exports.is_present() {
        println!("{} has no export table", exports.module_name);
        return Ok(());
    }
    println!(
        "{} ({} exports, ordinal base {})",
        exports.dll_name.as_deref().unwrap_or(&exports.module_name),
        exports.len(),
        exports.ordinal_base
    );
    for entry in exports.iter() {
        println!("  {}", entry);
    }
    Ok(())
}

fn print_imports(imports: &ImportDirectory, json: bool) -> Result<()> {
    if json {
        return print_json(imports);
    }
    if !imports.is_present() {
        println!("{} has no import table", imports.module_name);
        return Ok(());
    }
    println!(
        "{} ({} modules, {} imports)",
        imports.module_name,
        imports.len(),
        imports.thunk_count()
    );
    for descriptor in imports.iter() {
        println!("  {}", descriptor.module);
        for thunk in &descriptor.thunks {
            println!("    {}", thunk);
        }
    }
    Ok(())
}

fn print_disassembly(result: Result<Vec<DisassembledInstruction>, MemoryError>, json: bool) -> Result<()> {
    let (decoded, failure) = match result {
        Ok(decoded) => (decoded, None),
        Err(MemoryError::UndecodableInstruction { address, decoded }) => (decoded, Some(address)),
        Err(e) => return Err(e.into()),
    };

    if json {
        print_json(&decoded)?;
    } else {
        for instruction in &decoded {
            println!("{}", instruction);
        }
    }

    match failure {
        Some(address) => bail!("undecodable instruction at {}", address),
        None => Ok(()),
    }
}

#[cfg(not(windows))]
mod live {
    use super::*;

    pub fn run(command: Command, _config: &Config, _json: bool) -> Result<()> {
        bail!(
            "`{}` needs a live Windows process; only `exports --file`, `imports --file` and `disasm --hex` run here",
            command.name()
        )
    }
}

#[cfg(windows)]
mod live {
    use super::*;
    use remote_mem::inject::{create_and_inject, Injector};
    use remote_mem::invoke::{CallResult, CallingConvention, RemoteInvoker};
    use remote_mem::memory::{enumerate_regions, MemoryScanner, ScanOptions, ScanPattern};
    use remote_mem::pe::{parse_exports_in_memory, parse_imports_in_memory};
    use remote_mem::process::{LaunchOptions, ModuleEnumerator, ProcessContext};
    use remote_mem::{Disassembler, ModuleInfo};
    use std::path::Path;
    use tracing::info;

    #[derive(Serialize)]
    struct CreateReport {
        pid: u32,
        module: ModuleInfo,
        export_result: Option<CallResult>,
        suspended: bool,
    }

    #[derive(Serialize)]
    struct InjectReport {
        module: ModuleInfo,
        export_result: Option<CallResult>,
    }

    pub fn run(command: Command, config: &Config, json: bool) -> Result<()> {
        match command {
            Command::Modules(target) => modules(&target, config, json),
            Command::Regions(args) => regions(args, config, json),
            Command::Exports(args) => exports(args, config, json),
            Command::Imports(args) => imports(args, config, json),
            Command::Scan(args) => scan(args, config, json),
            Command::Inject(args) => inject(args, config, json),
            Command::Create(args) => create(args, config, json),
            Command::Call(args) => call(args, config, json),
            Command::Disasm(args) => disasm(args, config, json),
        }
    }

    fn attach(target: &TargetArgs, config: &Config) -> Result<ProcessContext> {
        let options = config.attach_options();
        let context = match target.pid {
            Some(pid) => ProcessContext::attach_with(pid, &options)?,
            None => {
                let name = value_or_prompt(target.process.clone(), "Process name")?;
                ProcessContext::attach_by_name_with(&name, &options)?
            }
        };
        info!(
            "Attached to {} (PID {}, {}, {:?} privilege)",
            context.name(),
            context.pid(),
            context.architecture(),
            context.privilege()
        );
        Ok(context)
    }

    fn modules(target: &TargetArgs, config: &Config, json: bool) -> Result<()> {
        let context = attach(target, config)?;
        let modules = ModuleEnumerator::new(&context).enumerate()?;
        if json {
            return print_json(&modules);
        }
        for module in &modules {
            println!(
                "{}  {:>10X}  {:<28} {}",
                module.base_address,
                module.size,
                module.name,
                module.path.display()
            );
        }
        Ok(())
    }

    fn regions(args: RegionsArgs, config: &Config, json: bool) -> Result<()> {
        let context = attach(&args.target, config)?;
        let mut regions = enumerate_regions(&context)?;
        if args.committed {
            regions.retain(|region| region.is_committed());
        }
        if json {
            return print_json(&regions);
        }
        for region in &regions {
            println!("{}", region);
        }
        Ok(())
    }

    fn exports(args: ImageArgs, config: &Config, json: bool) -> Result<()> {
        let context = attach(&args.target, config)?;
        let name = value_or_prompt(args.module, "Module name")?;
        let module = ModuleEnumerator::new(&context)
            .find_by_name(&name)?
            .ok_or_else(|| MemoryError::ModuleNotFound(name.clone()))?;
        let exports = parse_exports_in_memory(&context, &module)?;
        print_exports(&exports, json)
    }

    fn imports(args: ImageArgs, config: &Config, json: bool) -> Result<()> {
        let context = attach(&args.target, config)?;
        let name = value_or_prompt(args.module, "Module name")?;
        let module = ModuleEnumerator::new(&context)
            .find_by_name(&name)?
            .ok_or_else(|| MemoryError::ModuleNotFound(name.clone()))?;
        let imports = parse_imports_in_memory(&context, &module)?;
        print_imports(&imports, json)
    }

    fn scan(args: ScanArgs, config: &Config, json: bool) -> Result<()> {
        let context = attach(&args.target, config)?;
        let pattern = match (args.string, args.pattern) {
            (Some(text), _) if args.wide => ScanPattern::WideString(text),
            (Some(text), _) => ScanPattern::String(text),
            (None, Some(hex)) => ScanPattern::from_hex_string(&hex)?,
            (None, None) => ScanPattern::from_hex_string(&prompt("Byte pattern")?)?,
        };
        let options = ScanOptions {
            executable_only: args.executable,
            writable_only: args.writable,
            max_results: args.limit,
            ..ScanOptions::default()
        };

        let found = MemoryScanner::with_options(&context, options).find_all(&pattern)?;
        info!("{} matches for a {}-byte pattern", found.len(), pattern.len());
        if json {
            return print_json(&found);
        }
        for address in &found {
            println!("{}", address);
        }
        Ok(())
    }

    fn module_path(value: Option<PathBuf>) -> Result<PathBuf> {
        match value {
            Some(path) => Ok(path),
            None => prompt("Module path").map(PathBuf::from),
        }
    }

    fn inject(args: InjectArgs, config: &Config, json: bool) -> Result<()> {
        let context = attach(&args.target, config)?;
        let path = module_path(args.module)?;
        let mut options = config.inject_options();
        options.add_to_search_order = args.search_order;
        options.resolve_path = options.resolve_path && !args.no_resolve;

        let injector = Injector::with_options(&context, options);
        let module = injector.inject_module(&path)?;
        let export_result = match args.export {
            Some(export) => Some(injector.call_export(&module, export.as_str())?),
            None => None,
        };

        if json {
            return print_json(&InjectReport {
                module,
                export_result,
            });
        }
        println!("Loaded {} at {}", module.name, module.base_address);
        if let Some(result) = export_result {
            println!("Export returned {}", result);
        }
        Ok(())
    }

    fn create(args: CreateArgs, config: &Config, json: bool) -> Result<()> {
        let path = match args.path {
            Some(path) => path,
            None => PathBuf::from(prompt("Executable path")?),
        };
        let module = module_path(args.module)?;

        let mut launch = LaunchOptions::new(&path).args(args.args).suspended(true);
        launch.enable_debug_privilege = config.attach.enable_debug_privilege;
        if let Some(dir) = args.work_dir {
            launch = launch.working_dir(dir);
        }

        let created = create_and_inject(
            &launch,
            Path::new(&module),
            args.export.as_deref(),
            &config.inject_options(),
            args.keep_suspended,
        )?;

        let report = CreateReport {
            pid: created.process.pid(),
            module: created.module,
            export_result: created.export_result,
            suspended: created.process.is_suspended(),
        };
        if json {
            return print_json(&report);
        }
        println!(
            "Started {} as PID {} with {} at {}",
            path.display(),
            report.pid,
            report.module.name,
            report.module.base_address
        );
        if let Some(result) = report.export_result {
            println!("Export returned {}", result);
        }
        if report.suspended {
            println!("Main thread left suspended");
        }
        Ok(())
    }

    fn call(args: CallArgs, config: &Config, json: bool) -> Result<()> {
        let context = attach(&args.target, config)?;
        let address = parse_address(&value_or_prompt(args.address, "Function address")?)?;
        let values = args
            .args
            .iter()
            .map(|text| parse_value(text))
            .collect::<Result<Vec<_>>>()?;
        let convention: CallingConvention = args.convention.parse()?;

        let result = RemoteInvoker::with_options(&context, config.invoke_options())
            .call(address, &values, convention)?;
        if json {
            return print_json(&result);
        }
        println!(
            "Returned {} (0x{:X}), thread exit code {} (0x{:X})",
            result.return_value, result.return_value, result.thread_exit_code, result.thread_exit_code
        );
        Ok(())
    }

    fn disasm(args: DisasmArgs, config: &Config, json: bool) -> Result<()> {
        let context = attach(&args.target, config)?;
        let address = parse_address(&value_or_prompt(args.address, "Start address")?)?;
        let count = match args.count {
            Some(count) => count,
            None => config.disasm.default_count,
        };
        let syntax = pick_syntax(args.syntax.as_deref(), config)?;

        let result = Disassembler::new(&context)
            .with_syntax(syntax)
            .disassemble(address, count);
        print_disassembly(result, json)
    }
}

use anyhow::{anyhow, bail, Context, Result};
use sieve_engine::{
    create_default_timer, runtime, AppInfo, DefaultFileSystem, EngineError, LogLevel, ScriptEngine,
};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn main() {
    match run() {
        Ok(()) => {}
        Err(err) => {
            eprintln!("sieve_eval error: {err:?}");
            process::exit(1);
        }
    }
}

struct CliOptions {
    base_dir: Option<PathBuf>,
    wait_timers_ms: u64,
    show_help: bool,
    scripts: Vec<PathBuf>,
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let options = parse_cli_args(&args)?;
    if options.show_help {
        print_usage();
        return Ok(());
    }
    if options.scripts.is_empty() {
        bail!("no script files given; see --help");
    }

    let runtime = runtime::init();
    let app_info = AppInfo {
        name: "sieve_eval".to_string(),
        application: "sieve_engine".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        ..AppInfo::default()
    };

    let engine = ScriptEngine::create(app_info, create_default_timer(), runtime, |engine, info, _global| {
        let log = engine.new_callback(|engine, args| {
            let line =
                args.iter().map(|arg| arg.to_string()).collect::<Vec<_>>().join(" ");
            engine.log_system().log(LogLevel::Log, &line, "script");
            Ok(engine.new_unit())
        })?;
        engine.set_global_property("log", &log)?;

        let set_timeout = engine.new_callback(|engine, args| {
            engine.schedule_timer(args)?;
            Ok(engine.new_unit())
        })?;
        engine.set_global_property("set_timeout", &set_timeout)?;

        let info_value = engine.new_value_of(info)?;
        engine.set_global_property("app_info", &info_value)
    })
    .map_err(|err| anyhow!("creating engine: {err}"))?;

    if let Some(base_dir) = &options.base_dir {
        engine
            .set_file_system(Some(Arc::new(DefaultFileSystem::with_base_path(base_dir.clone()))))
            .map_err(|err| anyhow!("installing file system: {err}"))?;
    }

    for path in &options.scripts {
        let source = fs::read_to_string(path)
            .with_context(|| format!("reading script '{}'", path.display()))?;
        let name = path.display().to_string();
        match engine.evaluate(&source, &name) {
            Ok(value) => {
                if !value.is_unit() {
                    println!("{value}");
                }
            }
            Err(EngineError::Script(err)) => bail!("script fault: {err}"),
            Err(err) => bail!("evaluating '{name}': {err}"),
        }
    }

    wait_for_timers(&engine, Duration::from_millis(options.wait_timers_ms));
    Ok(())
}

fn wait_for_timers(engine: &Arc<ScriptEngine>, limit: Duration) {
    let deadline = Instant::now() + limit;
    while engine.pending_timer_tasks() > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
}

fn parse_cli_args(args: &[String]) -> Result<CliOptions> {
    let mut options = CliOptions {
        base_dir: None,
        wait_timers_ms: 1_000,
        show_help: false,
        scripts: Vec::new(),
    };
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--help" | "-h" => options.show_help = true,
            "--base-dir" => {
                let value = iter.next().ok_or_else(|| anyhow!("expected a value after '--base-dir'"))?;
                options.base_dir = Some(PathBuf::from(value));
            }
            "--wait-timers" => {
                let value =
                    iter.next().ok_or_else(|| anyhow!("expected a value after '--wait-timers'"))?;
                options.wait_timers_ms = value
                    .parse::<u64>()
                    .with_context(|| format!("invalid --wait-timers value '{value}'"))?;
            }
            flag if flag.starts_with("--") => {
                bail!("unknown flag '{flag}'; supported flags: --base-dir, --wait-timers, --help");
            }
            path => options.scripts.push(PathBuf::from(path)),
        }
    }
    Ok(options)
}

fn print_usage() {
    println!("usage: sieve_eval [--base-dir DIR] [--wait-timers MS] <script.rhai>...");
    println!();
    println!("Evaluates each script against one engine instance. The scripts see");
    println!("log(...), set_timeout(callback, ms, args...), and app_info globals.");
}

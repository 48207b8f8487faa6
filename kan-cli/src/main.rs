/*!
The `kan` command: an interactive checker and evaluator for cubical modules.
*/

use std::borrow::Cow;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use kan_frontend::session::{ModeFlags, Outcome, Session};

/// Weak values are clipped at this many bytes unless `--full` is given.
const CLIP: usize = 2048;

/// An interactive checker and evaluator for cubical modules.
#[derive(Parser, Debug)]
#[command(name = "kan", version, about)]
struct Args {
    /// Module file to load on startup
    file: Option<PathBuf>,

    /// Exit after the startup file and any --eval expressions
    #[arg(short, long)]
    batch: bool,

    /// Log unfolding and composition steps
    #[arg(short, long)]
    debug: bool,

    /// Print values in full, without truncation
    #[arg(short, long)]
    full: bool,

    /// Evaluate an expression after loading (repeatable)
    #[arg(short, long, value_name = "EXPR")]
    eval: Vec<String>,
}

fn main() -> color_eyre::Result<ExitCode> {
    color_eyre::install()?;
    let args = Args::parse();
    let mut logger = env_logger::Builder::from_default_env();
    if args.debug {
        logger.filter_level(log::LevelFilter::Trace);
    }
    logger.init();

    let mut flags = ModeFlags::empty();
    flags.set(ModeFlags::BATCH, args.batch);
    flags.set(ModeFlags::DEBUG, args.debug);
    flags.set(ModeFlags::FULL, args.full);

    let mut session = Session::new(std::env::current_dir()?, flags);
    let mut failed = false;

    if let Some(file) = &args.file {
        let started = Instant::now();
        match session.load(file.clone()) {
            Ok(out) => print_outcome(out, flags, started.elapsed()),
            Err(e) => {
                failed = true;
                print_error(&e);
            }
        }
    }
    for line in &args.eval {
        if run_line(&mut session, line, &mut failed) {
            break;
        }
    }

    if flags.contains(ModeFlags::BATCH) {
        return Ok(if failed {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        });
    }

    let stdin = io::stdin();
    let mut out = io::stdout();
    loop {
        out.write_all(b"> ")?;
        out.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        if run_line(&mut session, &line, &mut failed) {
            break;
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Handle one line, returning whether the session asked to quit.
fn run_line(session: &mut Session, line: &str, failed: &mut bool) -> bool {
    let flags = session.flags();
    let started = Instant::now();
    match session.command(line) {
        Ok(Outcome::Quit) => true,
        Ok(out) => {
            print_outcome(out, flags, started.elapsed());
            false
        }
        Err(e) => {
            *failed = true;
            print_error(&e);
            false
        }
    }
}

fn print_outcome(out: Outcome, flags: ModeFlags, elapsed: Duration) {
    match out {
        Outcome::Quit | Outcome::Silent => {}
        Outcome::Help(help) => println!("{help}"),
        Outcome::Loaded(summary) => {
            for name in &summary.shadowed {
                println!("warning: {name} shadows an earlier definition");
            }
            println!(
                "loaded {} module(s), {} declaration(s) in {elapsed:.1?}",
                summary.modules, summary.decls
            );
        }
        Outcome::Report(report) => {
            println!("{} {}", report.label, clip(&report.value, flags));
            println!("  : {}", report.ty);
            println!("  comps: {}  time: {elapsed:.1?}", report.comps);
        }
    }
}

fn print_error(e: &dyn std::error::Error) {
    eprintln!("error: {e}");
    let mut source = e.source();
    while let Some(s) = source {
        eprintln!("  caused by: {s}");
        source = s.source();
    }
}

fn clip(s: &str, flags: ModeFlags) -> Cow<'_, str> {
    if flags.contains(ModeFlags::FULL) || s.len() <= CLIP {
        return Cow::Borrowed(s);
    }
    let mut end = CLIP;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    Cow::Owned(format!("{}... ({} bytes, use --full)", &s[..end], s.len()))
}

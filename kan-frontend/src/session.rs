/*!
The interactive session.

A [`Session`] owns everything a prompt needs: the load directory, the symbol
table, the checked signatures, the evaluation environment, and the checker.
Loading a file replaces that state wholesale rather than layering on top of
it, so `:r` after editing a module never leaves stale declarations behind.

Failure modes are deliberately uneven:

  * a load-time failure (missing file, parse error, unresolved name) on `:l`
    leaves the session empty with no active file;
  * the same failure on `:r` keeps the previous state, since the old modules
    are still the best picture available;
  * a failure while *checking* commits every group admitted before it, with
    the file considered active. Earlier definitions evaluate as usual.
*/

use std::io;
use std::path::{Path, PathBuf};

use kan_kernel::{Checker, Env, EvalError, Interrupt, MachineFlags, Sigs, TypeError};
use smol_str::SmolStr;
use thiserror::Error;

use crate::loader::{LoadError, load_graph};
use crate::resolve::{ResolveError, Symbols, resolve_expr, resolve_module};
use crate::{ParseError, parse_expr};

bitflags::bitflags! {
    /// Session behavior switches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ModeFlags: u8 {
        /// Log unfolding and composition steps.
        const DEBUG = 1;
        /// Running without a prompt.
        const BATCH = 1 << 1;
        /// Print values without truncation.
        const FULL = 1 << 2;
    }
}

/// One line of input at the prompt.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Command<'a> {
    Quit,
    Help,
    Reload,
    Load(&'a str),
    Cd(&'a str),
    Normalize(&'a str),
    Eval(&'a str),
    Nothing,
}

impl Command<'_> {
    /// Parse one input line. A malformed command is rejected here, before
    /// it can touch the session.
    pub fn parse(line: &str) -> Result<Command<'_>, CommandError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Command::Nothing);
        }
        let Some(rest) = line.strip_prefix(':') else {
            return Ok(Command::Eval(line));
        };
        let (word, args) = match rest.split_once(char::is_whitespace) {
            Some((w, a)) => (w, a.trim()),
            None => (rest, ""),
        };
        match word {
            "q" | "quit" => Ok(Command::Quit),
            "h" | "help" => Ok(Command::Help),
            "r" => Ok(Command::Reload),
            "l" => {
                let mut files = args.split_whitespace();
                match (files.next(), files.next()) {
                    (Some(f), None) => Ok(Command::Load(f)),
                    _ => Err(CommandError::Usage(":l takes exactly one file")),
                }
            }
            "cd" => {
                let mut dirs = args.split_whitespace();
                match (dirs.next(), dirs.next()) {
                    (Some(d), None) => Ok(Command::Cd(d)),
                    _ => Err(CommandError::Usage(":cd takes exactly one directory")),
                }
            }
            "n" => {
                if args.is_empty() {
                    Err(CommandError::Usage(":n takes an expression"))
                } else {
                    Ok(Command::Normalize(args))
                }
            }
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

/// Anything a command can fail with.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{0}")]
    Usage(&'static str),
    #[error("unknown command :{0}")]
    Unknown(String),
    #[error("no file is loaded")]
    NoFile,
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// What a successfully handled line produced.
#[derive(Debug)]
pub enum Outcome {
    Quit,
    Help(&'static str),
    Loaded(LoadSummary),
    Report(Report),
    Silent,
}

/// An evaluation result ready for printing.
#[derive(Debug, Clone)]
pub struct Report {
    /// `EVAL` for weak evaluation, `NORM` for a full normal form.
    pub label: &'static str,
    pub value: String,
    pub ty: String,
    /// Compositions remaining in the printed value.
    pub comps: usize,
}

/// What a load brought in.
#[derive(Debug, Clone, Default)]
pub struct LoadSummary {
    pub modules: usize,
    pub decls: usize,
    /// Names that were declared more than once, latest wins.
    pub shadowed: Vec<SmolStr>,
}

const HELP: &str = "\
:l FILE   load a module file, replacing the session\n\
:r        reload the current file\n\
:cd DIR   change the load directory\n\
:n EXPR   evaluate an expression to normal form\n\
:h        show this message\n\
:q        quit\n\
EXPR      check and evaluate an expression";

/// The state behind the prompt.
#[derive(Debug)]
pub struct Session {
    dir: PathBuf,
    file: Option<PathBuf>,
    symbols: Symbols,
    types: Sigs,
    env: Env,
    shadowed: Vec<SmolStr>,
    checker: Checker,
    flags: ModeFlags,
}

impl Session {
    pub fn new(dir: PathBuf, flags: ModeFlags) -> Session {
        let mflags = if flags.contains(ModeFlags::DEBUG) {
            MachineFlags::TRACE
        } else {
            MachineFlags::empty()
        };
        Session {
            dir,
            file: None,
            symbols: Symbols::new(),
            types: Sigs::default(),
            env: Env::empty(),
            shadowed: Vec::new(),
            checker: Checker::new(mflags),
            flags,
        }
    }

    pub fn flags(&self) -> ModeFlags {
        self.flags
    }

    /// The active file, if the last load got as far as checking.
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// A handle that aborts an evaluation in flight when triggered.
    pub fn interrupt(&self) -> Interrupt {
        self.checker.machine().interrupt()
    }

    /// Handle one line of input.
    pub fn command(&mut self, line: &str) -> Result<Outcome, CommandError> {
        match Command::parse(line)? {
            Command::Nothing => Ok(Outcome::Silent),
            Command::Quit => Ok(Outcome::Quit),
            Command::Help => Ok(Outcome::Help(HELP)),
            Command::Cd(dir) => self.chdir(dir),
            Command::Load(file) => self.load(self.dir.join(file)),
            Command::Reload => match self.file.clone() {
                Some(path) => self.reload(path),
                None => Err(CommandError::NoFile),
            },
            Command::Normalize(src) => self.eval_line(src, true),
            Command::Eval(src) => self.eval_line(src, false),
        }
    }

    /// Load a file, replacing the session state.
    pub fn load(&mut self, path: PathBuf) -> Result<Outcome, CommandError> {
        self.file = None;
        self.symbols = Symbols::new();
        self.types = Sigs::default();
        self.env = Env::empty();
        self.shadowed.clear();
        self.ingest(&path).map(Outcome::Loaded)
    }

    /// Reload the active file, falling back to the previous state if the
    /// new text does not even load.
    fn reload(&mut self, path: PathBuf) -> Result<Outcome, CommandError> {
        let saved = (
            self.file.clone(),
            self.symbols.clone(),
            self.types.clone(),
            self.env.clone(),
            self.shadowed.clone(),
        );
        match self.load(path) {
            Err(e)
                if matches!(
                    e,
                    CommandError::Load(_) | CommandError::Parse(_) | CommandError::Resolve(_)
                ) =>
            {
                (self.file, self.symbols, self.types, self.env, self.shadowed) = saved;
                Err(e)
            }
            out => out,
        }
    }

    fn ingest(&mut self, path: &Path) -> Result<LoadSummary, CommandError> {
        self.interrupt().clear();
        let modules = load_graph(path)?;
        let mut syms = Symbols::new();
        let mut groups = Vec::new();
        let mut shadowed: Vec<SmolStr> = Vec::new();
        for mf in &modules {
            let (gs, sh) = resolve_module(&mut syms, &mf.module)?;
            groups.extend(gs);
            for name in sh {
                if !shadowed.contains(&name) {
                    shadowed.push(name);
                }
            }
        }
        for name in &shadowed {
            log::warn!("{name} shadows an earlier definition");
        }
        self.symbols = syms;
        self.shadowed = shadowed.clone();
        if let Some(root) = modules.last() {
            self.file = Some(root.path.clone());
        }
        let mut decls = 0;
        for group in &groups {
            let (env, sigs) = self.checker.check_decl_group(&self.types, &self.env, group)?;
            self.env = env;
            decls += sigs.len();
            for (name, ty) in sigs {
                self.types.insert(name, ty);
            }
        }
        Ok(LoadSummary {
            modules: modules.len(),
            decls,
            shadowed,
        })
    }

    fn chdir(&mut self, dir: &str) -> Result<Outcome, CommandError> {
        let path = self.dir.join(dir);
        match path.canonicalize() {
            Ok(p) if p.is_dir() => {
                self.dir = p;
                Ok(Outcome::Silent)
            }
            _ => Err(CommandError::NotADirectory(path.display().to_string())),
        }
    }

    /// Check an expression, then evaluate it weakly or to normal form.
    /// A leftover interrupt from an aborted call only cancels that call,
    /// so the flag is cleared before each new one.
    fn eval_line(&self, src: &str, normalize: bool) -> Result<Outcome, CommandError> {
        self.interrupt().clear();
        let e = parse_expr(src)?;
        let t = resolve_expr(&self.symbols, &e)?;
        let machine = self.checker.machine();
        let vty = self.checker.infer_expr(&self.types, &self.env, &t)?;
        let ty = machine.quote_value(&vty)?.to_string();
        let (label, value, comps) = if normalize {
            let nf = machine.normalize(&t, &self.env)?;
            ("NORM", nf.to_string(), nf.comp_count())
        } else {
            let v = machine.eval(&t, &self.env)?;
            ("EVAL", v.to_string(), v.comp_count())
        };
        Ok(Outcome::Report(Report {
            label,
            value,
            ty,
            comps,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_lines_parse() {
        assert_eq!(Command::parse("  ").unwrap(), Command::Nothing);
        assert_eq!(Command::parse(":q").unwrap(), Command::Quit);
        assert_eq!(Command::parse(":quit").unwrap(), Command::Quit);
        assert_eq!(Command::parse(":l Nat.ctt").unwrap(), Command::Load("Nat.ctt"));
        assert_eq!(
            Command::parse(":n suc zero").unwrap(),
            Command::Normalize("suc zero")
        );
        assert_eq!(Command::parse("suc zero").unwrap(), Command::Eval("suc zero"));
    }

    #[test]
    fn load_arity_is_checked_up_front() {
        assert!(matches!(
            Command::parse(":l one two"),
            Err(CommandError::Usage(_))
        ));
        assert!(matches!(Command::parse(":l"), Err(CommandError::Usage(_))));
        assert!(matches!(
            Command::parse(":frobnicate"),
            Err(CommandError::Unknown(_))
        ));
    }

    #[test]
    fn evaluating_without_a_load_uses_an_empty_scope() {
        let mut s = Session::new(PathBuf::from("."), ModeFlags::empty());
        let out = s.command("U").unwrap();
        let Outcome::Report(r) = out else {
            panic!("expected a report");
        };
        assert_eq!(r.label, "EVAL");
        assert_eq!(r.value, "U");
        assert_eq!(r.ty, "U");
        assert_eq!(r.comps, 0);
        assert!(matches!(
            s.command("missing").unwrap_err(),
            CommandError::Resolve(ResolveError::Unbound(_))
        ));
    }

    #[test]
    fn reload_without_a_file_is_an_error() {
        let mut s = Session::new(PathBuf::from("."), ModeFlags::empty());
        assert!(matches!(s.command(":r"), Err(CommandError::NoFile)));
    }
}

/*!
Surface syntax for cubical modules.

A module file is split into *chunks*: a chunk starts at a line whose first
column is non-blank, and runs until the next such line. Blank lines, indented
lines, and `--` comment lines continue the current chunk, so a definition may
span as many lines as it likes provided the continuations are indented. Each
chunk is then handed to a [`winnow`] parser.

The expression grammar, loosest first:

```text
expr  ::= \ b+ -> expr | <i+> expr | let x : e = e in expr
        | split@(e) with { arms } | split { arms }
        | arrow
arrow ::= (x+ : e)+ -> expr | (x+ : e)+ * expr
        | times -> arrow | times
times ::= papp * times | papp
papp  ::= app (@ r)*
app   ::= keyword-form | proj proj*
proj  ::= atom (.1 | .2)*
atom  ::= x | U | ( expr , ... ) | [ (i=d)+ -> expr , ... ]
```

Keyword forms are `Path`, `PathP`, `hcomp`, `transp`, `Glue`, `glue`, and
`unglue` applied to a fixed number of `proj`-level arguments. Names are
resolved to kernel terms by [`resolve`], so the parser only distinguishes
shape, never meaning.
*/

use kan_kernel::Dir;
use smol_str::SmolStr;
use thiserror::Error;
use unicode_ident::{is_xid_continue, is_xid_start};
use winnow::ascii::multispace1;
use winnow::combinator::{alt, delimited, opt, preceded, repeat, separated, terminated};
use winnow::token::{any, take_till};
use winnow::{LocatingSlice, Parser};

pub mod loader;
pub mod resolve;
pub mod session;

/// Words that cannot be used as names.
pub const KEYWORDS: &[&str] = &[
    "module", "where", "import", "data", "mutual", "split", "with", "let", "in", "U", "Path",
    "PathP", "hcomp", "transp", "Glue", "glue", "unglue",
];

/// A parse failure, with the 1-based line it was detected on.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("parse error at line {line}: {msg}")]
pub struct ParseError {
    pub line: usize,
    pub msg: String,
}

/// A surface expression.
///
/// Non-dependent `A -> B` and `A * B` parse as [`Expr::Pi`] and [`Expr::Sigma`]
/// with the binder named `_`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Expr {
    Var(SmolStr),
    U,
    App(Box<Expr>, Box<Expr>),
    Lam(SmolStr, Option<Box<Expr>>, Box<Expr>),
    Pi(SmolStr, Box<Expr>, Box<Expr>),
    Sigma(SmolStr, Box<Expr>, Box<Expr>),
    Pair(Box<Expr>, Box<Expr>),
    Fst(Box<Expr>),
    Snd(Box<Expr>),
    Let(SmolStr, Box<Expr>, Box<Expr>, Box<Expr>),
    /// `Path A a b`, over a line constant in its direction.
    Path(Box<Expr>, Box<Expr>, Box<Expr>),
    /// `PathP p a b`, over an explicit line of types.
    PathP(Box<Expr>, Box<Expr>, Box<Expr>),
    PLam(SmolStr, Box<Expr>),
    PApp(Box<Expr>, IExpr),
    System(Vec<SysEntry>),
    HComp(Box<Expr>, Box<Expr>, Vec<SysEntry>),
    Transp(Box<Expr>, Box<Expr>),
    Glue(Box<Expr>, Vec<SysEntry>),
    GlueElem(Box<Expr>, Vec<SysEntry>),
    Unglue(Box<Expr>),
    /// `split@(T) with { .. }`, or `split { .. }` with the motive left for
    /// the enclosing definition to supply.
    Split(Option<Box<Expr>>, Vec<Arm>),
}

/// An interval argument: an endpoint or an interval variable.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum IExpr {
    Dir(Dir),
    Var(SmolStr),
}

/// One entry of a system literal: a face conjunction and its body.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SysEntry {
    pub face: Vec<(SmolStr, Dir)>,
    pub body: Expr,
}

/// One arm of a `split`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Arm {
    pub con: SmolStr,
    pub binds: Vec<SmolStr>,
    pub body: Expr,
}

/// A parenthesized binder group like `(x y : A)`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Group {
    pub names: Vec<SmolStr>,
    pub ty: Expr,
}

/// A top-level definition: `f (x : A) .. : T = t`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Def {
    pub name: SmolStr,
    pub params: Vec<Group>,
    pub ty: Expr,
    pub body: Expr,
}

/// A datatype declaration: `data D (p : P) .. = c (x : A) .. | ..`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Data {
    pub name: SmolStr,
    pub params: Vec<Group>,
    pub ctors: Vec<Ctor>,
}

/// One constructor of a [`Data`] declaration.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Ctor {
    pub name: SmolStr,
    pub tele: Vec<Group>,
}

/// A top-level item other than the module header.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Item {
    Import(SmolStr),
    Def(Def),
    Data(Data),
    Mutual(Vec<Def>),
}

/// A parsed module file.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Module {
    pub name: SmolStr,
    pub imports: Vec<SmolStr>,
    pub items: Vec<Item>,
}

/// Parse a single expression, e.g. a line typed at the prompt.
///
/// # Examples
/// ```
/// # use kan_frontend::{parse_expr, Expr};
/// assert!(matches!(parse_expr(r"\x -> x").unwrap(), Expr::Lam(..)));
/// assert!(matches!(parse_expr("(x : A) -> B x").unwrap(), Expr::Pi(..)));
/// assert!(matches!(parse_expr("<i> p @ i").unwrap(), Expr::PLam(..)));
/// assert!(parse_expr("let x : = 3").is_err());
/// ```
pub fn parse_expr(src: &str) -> Result<Expr, ParseError> {
    run_chunk(1, src, Expr::expr)
}

/// Parse a whole module file.
///
/// The first chunk must be a `module <name> where` header; every later chunk
/// is one [`Item`]. Imports are split off into [`Module::imports`], in source
/// order.
pub fn parse_module(src: &str) -> Result<Module, ParseError> {
    let mut rest = chunks(src)?.into_iter();
    let Some((line, head)) = rest.next() else {
        return Err(ParseError {
            line: 1,
            msg: "expected a module header".to_string(),
        });
    };
    let name = run_chunk(line, head, Module::header)?;
    let mut imports = Vec::new();
    let mut items = Vec::new();
    for (line, text) in rest {
        match run_chunk(line, text, Item::item)? {
            Item::Import(m) => imports.push(m),
            item => items.push(item),
        }
    }
    Ok(Module {
        name,
        imports,
        items,
    })
}

/// Split a source file into column-zero chunks, tagged with their start line.
///
/// Only an identifier character opens a chunk, so a closing brace or a
/// comment in the first column continues the item above it.
fn chunks(src: &str) -> Result<Vec<(usize, &str)>, ParseError> {
    let mut out: Vec<(usize, std::ops::Range<usize>)> = Vec::new();
    let mut offset = 0;
    for (i, raw) in src.split_inclusive('\n').enumerate() {
        if raw.chars().next().is_some_and(ident_start) {
            out.push((i + 1, offset..offset + raw.len()));
        } else if let Some(last) = out.last_mut() {
            last.1.end = offset + raw.len();
        } else {
            let lead = raw.trim_start();
            if !lead.is_empty() && !lead.starts_with("--") {
                return Err(ParseError {
                    line: i + 1,
                    msg: "stray content before the first item".to_string(),
                });
            }
        }
        offset += raw.len();
    }
    Ok(out.into_iter().map(|(l, r)| (l, &src[r])).collect())
}

/// Run a parser over one chunk, requiring it to consume the whole text.
fn run_chunk<'s, O>(
    base_line: usize,
    text: &'s str,
    parser: impl Parser<LocatingSlice<&'s str>, O, winnow::error::ContextError>,
) -> Result<O, ParseError> {
    match delimited(opt(ws), parser, opt(ws)).parse(LocatingSlice::new(text)) {
        Ok(v) => Ok(v),
        Err(e) => {
            let offset = e.offset().min(text.len());
            let line = base_line + text[..offset].matches('\n').count();
            let rest: String = text[offset..]
                .trim_start()
                .chars()
                .take_while(|c| *c != '\n')
                .take(24)
                .collect();
            let msg = if rest.is_empty() {
                "unexpected end of input".to_string()
            } else {
                format!("unexpected input near `{rest}`")
            };
            Err(ParseError { line, msg })
        }
    }
}

impl Module {
    /// Parse a `module <name> where` header.
    pub fn header(input: &mut LocatingSlice<&str>) -> winnow::Result<SmolStr> {
        delimited((kw("module"), ws), name, (ws, kw("where"))).parse_next(input)
    }
}

impl Item {
    /// Parse one top-level item.
    pub fn item(input: &mut LocatingSlice<&str>) -> winnow::Result<Item> {
        alt((
            preceded((kw("import"), ws), name).map(Item::Import),
            Data::data.map(Item::Data),
            preceded((kw("mutual"), opt(ws)), Item::mutual_block).map(Item::Mutual),
            Def::def.map(Item::Def),
        ))
        .parse_next(input)
    }

    fn mutual_block(input: &mut LocatingSlice<&str>) -> winnow::Result<Vec<Def>> {
        delimited(
            ("{", opt(ws)),
            separated(1.., Def::def, (opt(ws), ";", opt(ws))),
            (opt(ws), opt(";"), opt(ws), "}"),
        )
        .parse_next(input)
    }
}

impl Def {
    /// Parse a definition: name, parameter groups, signature, body.
    pub fn def(input: &mut LocatingSlice<&str>) -> winnow::Result<Def> {
        (
            name,
            repeat(0.., preceded(opt(ws), Group::group)),
            preceded((opt(ws), ":", opt(ws)), Expr::expr),
            preceded((opt(ws), "=", opt(ws)), Expr::expr),
        )
            .map(|(name, params, ty, body)| Def {
                name,
                params,
                ty,
                body,
            })
            .parse_next(input)
    }
}

impl Data {
    /// Parse a datatype declaration.
    pub fn data(input: &mut LocatingSlice<&str>) -> winnow::Result<Data> {
        (
            preceded((kw("data"), ws), name),
            repeat(0.., preceded(opt(ws), Group::group)),
            preceded(
                (opt(ws), "=", opt(ws)),
                separated(0.., Ctor::ctor, (opt(ws), "|", opt(ws))),
            ),
        )
            .map(|(name, params, ctors)| Data {
                name,
                params,
                ctors,
            })
            .parse_next(input)
    }
}

impl Ctor {
    fn ctor(input: &mut LocatingSlice<&str>) -> winnow::Result<Ctor> {
        (name, repeat(0.., preceded(opt(ws), Group::group)))
            .map(|(name, tele)| Ctor { name, tele })
            .parse_next(input)
    }
}

impl Group {
    /// Parse a binder group: `(x y : A)`.
    pub fn group(input: &mut LocatingSlice<&str>) -> winnow::Result<Group> {
        delimited(
            ("(", opt(ws)),
            (
                repeat(1.., terminated(name, opt(ws))),
                preceded((":", opt(ws)), Expr::expr),
            ),
            (opt(ws), ")"),
        )
        .map(|(names, ty)| Group { names, ty })
        .parse_next(input)
    }
}

impl Expr {
    /// Parse an expression.
    pub fn expr(input: &mut LocatingSlice<&str>) -> winnow::Result<Expr> {
        alt((Expr::lam, Expr::plam, Expr::let_, Expr::split, Expr::arrow)).parse_next(input)
    }

    /// Parse a lambda: `\x -> t` or `\(x : A) y -> t`.
    fn lam(input: &mut LocatingSlice<&str>) -> winnow::Result<Expr> {
        (
            preceded(
                ("\\", opt(ws)),
                repeat(1.., terminated(Expr::lam_binders, opt(ws))),
            ),
            preceded(("->", opt(ws)), Expr::expr),
        )
            .map(|(groups, body): (Vec<Vec<(SmolStr, Option<Expr>)>>, _)| {
                let binds: Vec<(SmolStr, Option<Expr>)> = groups.into_iter().flatten().collect();
                binds.into_iter().rev().fold(body, |acc, (x, ann)| {
                    Expr::Lam(x, ann.map(Box::new), Box::new(acc))
                })
            })
            .parse_next(input)
    }

    fn lam_binders(
        input: &mut LocatingSlice<&str>,
    ) -> winnow::Result<Vec<(SmolStr, Option<Expr>)>> {
        alt((
            name.map(|x| vec![(x, None)]),
            Group::group.map(|Group { names, ty }| {
                names.into_iter().map(|x| (x, Some(ty.clone()))).collect()
            }),
        ))
        .parse_next(input)
    }

    /// Parse a path abstraction: `<i> t`, or `<i j> t` for an iterated one.
    fn plam(input: &mut LocatingSlice<&str>) -> winnow::Result<Expr> {
        (
            delimited(
                ("<", opt(ws)),
                repeat(1.., terminated(name, opt(ws))),
                (">", opt(ws)),
            ),
            Expr::expr,
        )
            .map(|(ivs, body): (Vec<SmolStr>, _)| {
                ivs.into_iter()
                    .rev()
                    .fold(body, |acc, i| Expr::PLam(i, Box::new(acc)))
            })
            .parse_next(input)
    }

    fn let_(input: &mut LocatingSlice<&str>) -> winnow::Result<Expr> {
        (
            preceded((kw("let"), opt(ws)), name),
            preceded((opt(ws), ":", opt(ws)), Expr::expr),
            preceded((opt(ws), "=", opt(ws)), Expr::expr),
            preceded((opt(ws), kw("in"), opt(ws)), Expr::expr),
        )
            .map(|(x, ty, bound, body)| Expr::Let(x, Box::new(ty), Box::new(bound), Box::new(body)))
            .parse_next(input)
    }

    fn split(input: &mut LocatingSlice<&str>) -> winnow::Result<Expr> {
        (
            preceded(
                kw("split"),
                opt(delimited(
                    (opt(ws), "@", opt(ws), "(", opt(ws)),
                    Expr::expr,
                    (opt(ws), ")", opt(ws), kw("with")),
                )),
            ),
            preceded(opt(ws), Expr::arms),
        )
            .map(|(motive, arms)| Expr::Split(motive.map(Box::new), arms))
            .parse_next(input)
    }

    fn arms(input: &mut LocatingSlice<&str>) -> winnow::Result<Vec<Arm>> {
        delimited(
            ("{", opt(ws)),
            separated(0.., Arm::arm, (opt(ws), ";", opt(ws))),
            (opt(ws), opt(";"), opt(ws), "}"),
        )
        .parse_next(input)
    }

    /// Parse a function or pair type, or anything tighter.
    fn arrow(input: &mut LocatingSlice<&str>) -> winnow::Result<Expr> {
        alt((
            Expr::binder_arrow,
            (
                Expr::times,
                opt(preceded((opt(ws), "->", opt(ws)), Expr::arrow)),
            )
                .map(|(lhs, rhs)| match rhs {
                    Some(rhs) => Expr::Pi(SmolStr::new("_"), Box::new(lhs), Box::new(rhs)),
                    None => lhs,
                }),
        ))
        .parse_next(input)
    }

    /// Parse a dependent former: `(x : A) -> B` or `(x : A) * B`. The body
    /// extends to the full arrow level, so `(x : A) * B -> C` reads as
    /// `(x : A) * (B -> C)`.
    fn binder_arrow(input: &mut LocatingSlice<&str>) -> winnow::Result<Expr> {
        (
            repeat(1.., terminated(Group::group, opt(ws))),
            alt(("->", "*")),
            preceded(opt(ws), Expr::arrow),
        )
            .map(|(groups, conn, cod): (Vec<Group>, &str, Expr)| {
                let binds: Vec<(SmolStr, Expr)> = groups
                    .into_iter()
                    .flat_map(|Group { names, ty }| {
                        names
                            .into_iter()
                            .map(move |x| (x, ty.clone()))
                            .collect::<Vec<_>>()
                    })
                    .collect();
                binds.into_iter().rev().fold(cod, |acc, (x, ty)| {
                    if conn == "->" {
                        Expr::Pi(x, Box::new(ty), Box::new(acc))
                    } else {
                        Expr::Sigma(x, Box::new(ty), Box::new(acc))
                    }
                })
            })
            .parse_next(input)
    }

    fn times(input: &mut LocatingSlice<&str>) -> winnow::Result<Expr> {
        (
            Expr::papp,
            opt(preceded((opt(ws), "*", opt(ws)), Expr::times)),
        )
            .map(|(lhs, rhs)| match rhs {
                Some(rhs) => Expr::Sigma(SmolStr::new("_"), Box::new(lhs), Box::new(rhs)),
                None => lhs,
            })
            .parse_next(input)
    }

    /// Parse a path application chain: `p @ 0 @ i`.
    fn papp(input: &mut LocatingSlice<&str>) -> winnow::Result<Expr> {
        (
            Expr::app,
            repeat(0.., preceded((opt(ws), "@", opt(ws)), IExpr::iexpr)),
        )
            .map(|(head, args): (Expr, Vec<IExpr>)| {
                args.into_iter()
                    .fold(head, |acc, r| Expr::PApp(Box::new(acc), r))
            })
            .parse_next(input)
    }

    /// Parse an application spine, or a keyword-headed form.
    fn app(input: &mut LocatingSlice<&str>) -> winnow::Result<Expr> {
        alt((
            Expr::kw_form,
            (Expr::proj, repeat(0.., preceded(opt(ws), Expr::proj))).map(
                |(f, args): (Expr, Vec<Expr>)| {
                    args.into_iter()
                        .fold(f, |acc, a| Expr::App(Box::new(acc), Box::new(a)))
                },
            ),
        ))
        .parse_next(input)
    }

    fn kw_form(input: &mut LocatingSlice<&str>) -> winnow::Result<Expr> {
        alt((
            preceded(kw("PathP"), (Expr::parg, Expr::parg, Expr::parg))
                .map(|(p, a, b)| Expr::PathP(Box::new(p), Box::new(a), Box::new(b))),
            preceded(kw("Path"), (Expr::parg, Expr::parg, Expr::parg))
                .map(|(a, x, y)| Expr::Path(Box::new(a), Box::new(x), Box::new(y))),
            preceded(kw("hcomp"), (Expr::parg, Expr::parg, Expr::sys_arg))
                .map(|(ty, base, sys)| Expr::HComp(Box::new(ty), Box::new(base), sys)),
            preceded(kw("transp"), (Expr::parg, Expr::parg))
                .map(|(p, t)| Expr::Transp(Box::new(p), Box::new(t))),
            preceded(kw("Glue"), (Expr::parg, Expr::sys_arg))
                .map(|(base, sys)| Expr::Glue(Box::new(base), sys)),
            preceded(kw("glue"), (Expr::parg, Expr::sys_arg))
                .map(|(base, sys)| Expr::GlueElem(Box::new(base), sys)),
            preceded(kw("unglue"), Expr::parg).map(|t| Expr::Unglue(Box::new(t))),
        ))
        .parse_next(input)
    }

    fn parg(input: &mut LocatingSlice<&str>) -> winnow::Result<Expr> {
        preceded(opt(ws), Expr::proj).parse_next(input)
    }

    fn sys_arg(input: &mut LocatingSlice<&str>) -> winnow::Result<Vec<SysEntry>> {
        preceded(opt(ws), Expr::system_lit).parse_next(input)
    }

    /// Parse an atom with its projection path: `t.1.2`.
    fn proj(input: &mut LocatingSlice<&str>) -> winnow::Result<Expr> {
        (Expr::atom, repeat(0.., alt((".1", ".2"))))
            .map(|(base, path): (Expr, Vec<&str>)| {
                path.into_iter().fold(base, |acc, p| {
                    if p == ".1" {
                        Expr::Fst(Box::new(acc))
                    } else {
                        Expr::Snd(Box::new(acc))
                    }
                })
            })
            .parse_next(input)
    }

    fn atom(input: &mut LocatingSlice<&str>) -> winnow::Result<Expr> {
        alt((
            kw("U").map(|_| Expr::U),
            name.map(Expr::Var),
            Expr::system_lit.map(Expr::System),
            delimited(("(", opt(ws)), Expr::pair_body, (opt(ws), ")")),
        ))
        .parse_next(input)
    }

    /// Parse the inside of a parenthesized atom. A comma nests to the right,
    /// so `(a, b, c)` is `(a, (b, c))`.
    fn pair_body(input: &mut LocatingSlice<&str>) -> winnow::Result<Expr> {
        (
            Expr::expr,
            opt(preceded((opt(ws), ",", opt(ws)), Expr::pair_body)),
        )
            .map(|(head, tail)| match tail {
                Some(tail) => Expr::Pair(Box::new(head), Box::new(tail)),
                None => head,
            })
            .parse_next(input)
    }

    /// Parse a system literal: `[ (i=0) -> t, (i=1)(j=0) -> u ]`, or `[]`.
    pub fn system_lit(input: &mut LocatingSlice<&str>) -> winnow::Result<Vec<SysEntry>> {
        delimited(
            ("[", opt(ws)),
            separated(0.., SysEntry::entry, (opt(ws), ",", opt(ws))),
            (opt(ws), "]"),
        )
        .parse_next(input)
    }
}

impl SysEntry {
    fn entry(input: &mut LocatingSlice<&str>) -> winnow::Result<SysEntry> {
        (
            repeat(1.., terminated(SysEntry::eqn, opt(ws))),
            preceded(("->", opt(ws)), Expr::expr),
        )
            .map(|(face, body)| SysEntry { face, body })
            .parse_next(input)
    }

    fn eqn(input: &mut LocatingSlice<&str>) -> winnow::Result<(SmolStr, Dir)> {
        delimited(
            ("(", opt(ws)),
            (name, preceded((opt(ws), "=", opt(ws)), dir)),
            (opt(ws), ")"),
        )
        .parse_next(input)
    }
}

impl Arm {
    fn arm(input: &mut LocatingSlice<&str>) -> winnow::Result<Arm> {
        (
            name,
            repeat(0.., preceded(ws, name)),
            preceded((opt(ws), "->", opt(ws)), Expr::expr),
        )
            .map(|(con, binds, body)| Arm { con, binds, body })
            .parse_next(input)
    }
}

impl IExpr {
    /// Parse an interval argument: `0`, `1`, or a variable.
    pub fn iexpr(input: &mut LocatingSlice<&str>) -> winnow::Result<IExpr> {
        alt((
            "0".map(|_| IExpr::Dir(Dir::Zero)),
            "1".map(|_| IExpr::Dir(Dir::One)),
            name.map(IExpr::Var),
        ))
        .parse_next(input)
    }
}

fn dir(input: &mut LocatingSlice<&str>) -> winnow::Result<Dir> {
    alt(("0".map(|_| Dir::Zero), "1".map(|_| Dir::One))).parse_next(input)
}

/// Parse a name, rejecting [`KEYWORDS`].
///
/// # Examples
/// ```
/// # use winnow::{LocatingSlice, Parser};
/// # use kan_frontend::name;
/// for ok in ["x", "x'", "suc", "my_fun", "p1"] {
///     assert_eq!(name.parse(LocatingSlice::new(ok)).unwrap(), ok);
/// }
/// for bad in ["0x", "let", "hcomp", "(x)", "@"] {
///     assert!(name.parse(LocatingSlice::new(bad)).is_err());
/// }
/// ```
pub fn name(input: &mut LocatingSlice<&str>) -> winnow::Result<SmolStr> {
    word.verify(|x: &&str| !KEYWORDS.contains(x))
        .map(SmolStr::from)
        .parse_next(input)
}

/// Parse a maximal identifier-shaped word, keywords included.
pub fn word<'s>(input: &mut LocatingSlice<&'s str>) -> winnow::Result<&'s str> {
    (
        any.verify(|x| ident_start(*x)),
        take_till(0.., |x| !ident_continue(x)),
    )
        .take()
        .parse_next(input)
}

/// Match one specific keyword, whole-word.
fn kw<'s>(
    w: &'static str,
) -> impl Parser<LocatingSlice<&'s str>, &'s str, winnow::error::ContextError> {
    word.verify(move |x: &&str| *x == w)
}

/// Whether a character can appear at the start of a name.
pub fn ident_start(x: char) -> bool {
    is_xid_start(x) || x == '_'
}

/// Whether a character can continue a name.
pub fn ident_continue(x: char) -> bool {
    is_xid_continue(x) || x == '\''
}

/// Parse whitespace, including `--` line comments.
pub fn ws<'s>(input: &mut LocatingSlice<&'s str>) -> winnow::Result<&'s str> {
    repeat(
        1..,
        alt((multispace1, preceded("--", take_till(0.., ['\n'])))),
    )
    .map(|()| ())
    .take()
    .parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(src: &str) -> Expr {
        parse_expr(src).unwrap()
    }

    fn var(x: &str) -> Box<Expr> {
        Box::new(Expr::Var(SmolStr::new(x)))
    }

    #[test]
    fn application_is_left_nested() {
        assert_eq!(
            expr("f x y"),
            Expr::App(Box::new(Expr::App(var("f"), var("x"))), var("y"))
        );
    }

    #[test]
    fn lambda_sugar_unrolls() {
        let got = expr(r"\(x y : A) -> x");
        let ann = Some(var("A"));
        assert_eq!(
            got,
            Expr::Lam(
                "x".into(),
                ann.clone(),
                Box::new(Expr::Lam("y".into(), ann, var("x"))),
            )
        );
    }

    #[test]
    fn times_binds_tighter_than_arrow() {
        assert_eq!(
            expr("A * B -> C"),
            Expr::Pi(
                "_".into(),
                Box::new(Expr::Sigma("_".into(), var("A"), var("B"))),
                var("C"),
            )
        );
    }

    #[test]
    fn dependent_former_takes_the_full_body() {
        assert_eq!(
            expr("(x : A) * B -> C"),
            Expr::Sigma(
                "x".into(),
                var("A"),
                Box::new(Expr::Pi("_".into(), var("B"), var("C"))),
            )
        );
    }

    #[test]
    fn projections_and_path_application() {
        assert_eq!(
            expr("p.1 @ i"),
            Expr::PApp(Box::new(Expr::Fst(var("p"))), IExpr::Var("i".into()))
        );
        assert_eq!(expr("p @ 0"), Expr::PApp(var("p"), IExpr::Dir(Dir::Zero)));
    }

    #[test]
    fn system_faces_conjoin() {
        let got = expr("[ (i=0)(j=1) -> x, (i=1) -> y ]");
        let Expr::System(entries) = got else {
            panic!("expected a system");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0].face,
            vec![("i".into(), Dir::Zero), ("j".into(), Dir::One)]
        );
        assert_eq!(entries[1].face, vec![("i".into(), Dir::One)]);
    }

    #[test]
    fn keyword_forms_take_fixed_arguments() {
        assert!(matches!(expr("hcomp A x [ (i=0) -> y ]"), Expr::HComp(..)));
        assert!(matches!(expr("transp p x"), Expr::Transp(..)));
        assert!(matches!(expr("Glue A [ (i=0) -> e ]"), Expr::Glue(..)));
        assert!(matches!(expr("unglue g"), Expr::Unglue(..)));
        assert!(matches!(expr("Path A x y"), Expr::Path(..)));
        assert!(parse_expr("transp p").is_err());
    }

    #[test]
    fn split_with_and_without_motive() {
        let got = expr("split@(Nat -> Nat) with { zero -> zero ; suc n -> n }");
        let Expr::Split(Some(_), arms) = got else {
            panic!("expected a motive");
        };
        assert_eq!(arms.len(), 2);
        assert_eq!(arms[1].binds, vec![SmolStr::new("n")]);

        let bare = expr("split { zero -> zero ; suc n -> n }");
        assert!(matches!(bare, Expr::Split(None, _)));
    }

    #[test]
    fn comments_are_whitespace() {
        assert_eq!(expr("f -- applies\n  x"), Expr::App(var("f"), var("x")));
    }

    #[test]
    fn module_items_split_on_column_zero() {
        let src = "module demo where\n\
                   \n\
                   import prelude\n\
                   -- a constant\n\
                   id (A : U) (a : A) : A =\n\
                   \x20 a\n\
                   data Nat = zero | suc (n : Nat)\n";
        let m = parse_module(src).unwrap();
        assert_eq!(m.name, "demo");
        assert_eq!(m.imports, vec![SmolStr::new("prelude")]);
        assert_eq!(m.items.len(), 2);
        let Item::Def(def) = &m.items[0] else {
            panic!("expected a definition");
        };
        assert_eq!(def.name, "id");
        assert_eq!(def.params.len(), 2);
        assert!(matches!(&m.items[1], Item::Data(d) if d.ctors.len() == 2));
    }

    #[test]
    fn mutual_block_is_one_item() {
        let src = "module demo where\n\
                   mutual {\n\
                   \x20 even (n : Nat) : Nat = odd n ;\n\
                   \x20 odd (n : Nat) : Nat = even n\n\
                   }\n";
        let m = parse_module(src).unwrap();
        assert_eq!(m.items.len(), 1);
        assert!(matches!(&m.items[0], Item::Mutual(defs) if defs.len() == 2));
    }

    #[test]
    fn errors_carry_the_source_line() {
        let src = "module demo where\n\
                   ok : U = U\n\
                   bad : U = [\n";
        let err = parse_module(src).unwrap_err();
        assert_eq!(err.line, 3);
    }

    #[test]
    fn header_is_required() {
        assert!(parse_module("id (A : U) (a : A) : A = a\n").is_err());
    }
}

/*!
Core syntax: terms of the cubical calculus, interval expressions, faces
and systems, and declaration groups.

Terms are immutable trees behind [`Rc`]; evaluation never mutates them,
so shared subtrees cost one pointer. Interval variables live in their
own namespace ([`IName`]) and appear in terms only through [`II`]
expressions, path binders and face formulas.
*/

use std::fmt;
use std::rc::Rc;

use pretty::RcDoc;
use smol_str::SmolStr;

mod face;

pub use face::{Dir, Face, System};

/// An interval variable: source-named, or generated fresh by the
/// machine. Generated names never collide with source names.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum IName {
    Src(SmolStr),
    Gen(u64),
}

impl IName {
    pub fn src(name: impl Into<SmolStr>) -> IName {
        IName::Src(name.into())
    }
}

impl fmt::Display for IName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IName::Src(s) => write!(f, "{s}"),
            IName::Gen(n) => write!(f, "_i{n}"),
        }
    }
}

/// An interval expression: an endpoint or an interval variable.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum II {
    Dir(Dir),
    Var(IName),
}

impl fmt::Display for II {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            II::Dir(d) => write!(f, "{d}"),
            II::Var(i) => write!(f, "{i}"),
        }
    }
}

/// A typed binder in a `Pi` or `Sigma` former.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Binder {
    pub name: SmolStr,
    pub ty: Rc<Term>,
}

/// One constructor of a datatype, with its argument telescope.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Label {
    pub name: SmolStr,
    pub tele: Vec<(SmolStr, Rc<Term>)>,
}

/// One arm of a case split.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Branch {
    pub con: SmolStr,
    pub binds: Vec<SmolStr>,
    pub body: Rc<Term>,
}

/// A named top-level definition.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Decl {
    pub name: SmolStr,
    pub ty: Rc<Term>,
    pub body: Rc<Term>,
}

/// A group of definitions admitted together. Members may refer to each
/// other; a singleton group may refer to itself.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DeclGroup(pub Vec<Decl>);

impl DeclGroup {
    pub fn decl(&self, name: &str) -> Option<&Decl> {
        self.0.iter().find(|d| d.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &SmolStr> {
        self.0.iter().map(|d| &d.name)
    }
}

/// A term of the calculus.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Term {
    /// A reference to a binder or a top-level definition
    Var(SmolStr),
    /// The universe
    U,
    /// Dependent function type `(x : A) -> B`
    Pi(Binder, Rc<Term>),
    /// Dependent pair type `(x : A) * B`
    Sigma(Binder, Rc<Term>),
    /// `\x -> t`, with an optional domain annotation
    Lam(SmolStr, Option<Rc<Term>>, Rc<Term>),
    App(Rc<Term>, Rc<Term>),
    Pair(Rc<Term>, Rc<Term>),
    Fst(Rc<Term>),
    Snd(Rc<Term>),
    /// `let x : A = t in u`
    Let(SmolStr, Rc<Term>, Rc<Term>, Rc<Term>),
    /// Path type: a line of types together with its two endpoints
    Path(Rc<Term>, Rc<Term>, Rc<Term>),
    /// Path abstraction `<i> t`
    PLam(IName, Rc<Term>),
    /// Path application `t @ r`
    PApp(Rc<Term>, II),
    /// A bare system of partial elements. Well-typed terms carry
    /// systems only inside compositions and glueing; the checker
    /// rejects this form everywhere else.
    System(System<Rc<Term>>),
    /// Homogeneous composition `hcomp A base [ tube ]`; every tube
    /// entry is a path abstraction in the fill direction
    HComp(Rc<Term>, Rc<Term>, System<Rc<Term>>),
    /// Transport along a line of types
    Transp(Rc<Term>, Rc<Term>),
    /// Glue type former: a base type with equivalences on faces
    Glue(Rc<Term>, System<Rc<Term>>),
    /// Glue introduction: a base element with partial elements
    GlueElem(Rc<Term>, System<Rc<Term>>),
    /// Glue elimination
    Unglue(Rc<Term>),
    /// A datatype with its constructor labels
    Sum(SmolStr, Rc<[Label]>),
    /// A constructor application, tagged with its datatype
    Con(SmolStr, SmolStr, Vec<Rc<Term>>),
    /// A case eliminator with an ascribed motive
    Split(SmolStr, Rc<Term>, Rc<[Branch]>),
}

/// Precedence levels for printing, loosest binding last.
pub const ATOM_LEVEL: usize = 0;
pub const PROJ_LEVEL: usize = 1;
pub const APP_LEVEL: usize = 2;
pub const PAPP_LEVEL: usize = 3;
pub const ARROW_LEVEL: usize = 4;
pub const ABS_LEVEL: usize = 5;

impl Term {
    /// Reference a variable by name.
    pub fn var(name: impl Into<SmolStr>) -> Rc<Term> {
        Rc::new(Term::Var(name.into()))
    }

    /// The printing level of this term's head.
    pub fn precedence(&self) -> usize {
        use Term::*;
        match self {
            Var(_) | U | System(_) | Pair(..) | Sum(..) | Split(..) => ATOM_LEVEL,
            Fst(_) | Snd(_) => PROJ_LEVEL,
            Con(_, _, args) if args.is_empty() => ATOM_LEVEL,
            App(..) | Con(..) | HComp(..) | Transp(..) | Glue(..) | GlueElem(..) | Unglue(_)
            | Path(..) => APP_LEVEL,
            PApp(..) => PAPP_LEVEL,
            Pi(..) | Sigma(..) => ARROW_LEVEL,
            Lam(..) | PLam(..) | Let(..) => ABS_LEVEL,
        }
    }

    /// The number of composition nodes (`hcomp` and `transp`) in the
    /// term. On a normal form this counts exactly the compositions
    /// that no reduction rule could discharge.
    ///
    /// # Examples
    /// ```
    /// # use kan_kernel::term::{System, Term};
    /// let t = Term::HComp(Term::var("A"), Term::var("x"), System::new());
    /// assert_eq!(t.comp_count(), 1);
    /// assert_eq!(Term::var("x").comp_count(), 0);
    /// ```
    pub fn comp_count(&self) -> usize {
        use Term::*;
        let sys = |s: &face::System<Rc<Term>>| s.iter().map(|(_, t)| t.comp_count()).sum::<usize>();
        match self {
            Var(_) | U => 0,
            Pi(b, t) | Sigma(b, t) => b.ty.comp_count() + t.comp_count(),
            Lam(_, ann, t) => ann.as_ref().map_or(0, |a| a.comp_count()) + t.comp_count(),
            App(a, b) | Pair(a, b) => a.comp_count() + b.comp_count(),
            Fst(t) | Snd(t) | Unglue(t) | PLam(_, t) | PApp(t, _) => t.comp_count(),
            Let(_, a, b, c) => a.comp_count() + b.comp_count() + c.comp_count(),
            Path(l, a, b) => l.comp_count() + a.comp_count() + b.comp_count(),
            System(s) => sys(s),
            HComp(t, b, s) => 1 + t.comp_count() + b.comp_count() + sys(s),
            Transp(l, t) => 1 + l.comp_count() + t.comp_count(),
            Glue(t, s) | GlueElem(t, s) => t.comp_count() + sys(s),
            Sum(_, labels) => labels
                .iter()
                .map(|l| l.tele.iter().map(|(_, t)| t.comp_count()).sum::<usize>())
                .sum(),
            Con(_, _, args) => args.iter().map(|a| a.comp_count()).sum(),
            Split(_, m, branches) => {
                m.comp_count() + branches.iter().map(|b| b.body.comp_count()).sum::<usize>()
            }
        }
    }

    /// Whether the interval variable `i` occurs free in this term.
    pub fn mentions_ivar(&self, i: &IName) -> bool {
        use Term::*;
        let in_ii = |r: &II| matches!(r, II::Var(j) if j == i);
        let in_sys = |s: &face::System<Rc<Term>>| {
            s.iter()
                .any(|(f, t)| f.binds(i).is_some() || t.mentions_ivar(i))
        };
        match self {
            Var(_) | U => false,
            Pi(b, t) | Sigma(b, t) => b.ty.mentions_ivar(i) || t.mentions_ivar(i),
            Lam(_, ann, t) => {
                ann.as_ref().is_some_and(|a| a.mentions_ivar(i)) || t.mentions_ivar(i)
            }
            App(a, b) | Pair(a, b) => a.mentions_ivar(i) || b.mentions_ivar(i),
            Fst(t) | Snd(t) | Unglue(t) => t.mentions_ivar(i),
            Let(_, a, b, c) => a.mentions_ivar(i) || b.mentions_ivar(i) || c.mentions_ivar(i),
            Path(l, a, b) => l.mentions_ivar(i) || a.mentions_ivar(i) || b.mentions_ivar(i),
            PLam(j, t) => j != i && t.mentions_ivar(i),
            PApp(t, r) => t.mentions_ivar(i) || in_ii(r),
            System(s) => in_sys(s),
            HComp(t, b, s) => t.mentions_ivar(i) || b.mentions_ivar(i) || in_sys(s),
            Transp(l, t) => l.mentions_ivar(i) || t.mentions_ivar(i),
            Glue(t, s) | GlueElem(t, s) => t.mentions_ivar(i) || in_sys(s),
            Sum(_, labels) => labels
                .iter()
                .any(|l| l.tele.iter().any(|(_, t)| t.mentions_ivar(i))),
            Con(_, _, args) => args.iter().any(|a| a.mentions_ivar(i)),
            Split(_, m, branches) => {
                m.mentions_ivar(i) || branches.iter().any(|b| b.body.mentions_ivar(i))
            }
        }
    }

    /// Pretty-print this term at the given precedence level,
    /// parenthesizing when the head binds looser than allowed.
    pub fn to_doc(&self, level: usize) -> RcDoc<()> {
        let doc = self.head_doc();
        if self.precedence() > level {
            RcDoc::text("(").append(doc).append(RcDoc::text(")"))
        } else {
            doc
        }
    }

    fn head_doc(&self) -> RcDoc<()> {
        use Term::*;
        match self {
            Var(x) => RcDoc::as_string(x),
            U => RcDoc::text("U"),
            Pi(b, cod) => binder_doc(b, "->", cod),
            Sigma(b, cod) => binder_doc(b, "*", cod),
            Lam(x, ann, body) => {
                let bind = match ann {
                    Some(a) => RcDoc::text("(")
                        .append(RcDoc::as_string(x))
                        .append(RcDoc::text(" : "))
                        .append(a.to_doc(ABS_LEVEL))
                        .append(RcDoc::text(")")),
                    None => RcDoc::as_string(x),
                };
                RcDoc::text("\\")
                    .append(bind)
                    .append(RcDoc::text(" ->"))
                    .append(RcDoc::line().append(body.to_doc(ABS_LEVEL)).nest(2))
                    .group()
            }
            App(f, a) => f
                .to_doc(APP_LEVEL)
                .append(RcDoc::line().append(a.to_doc(PROJ_LEVEL)).nest(2))
                .group(),
            Pair(a, b) => RcDoc::text("(")
                .append(a.to_doc(ABS_LEVEL))
                .append(RcDoc::text(", "))
                .append(b.to_doc(ABS_LEVEL))
                .append(RcDoc::text(")")),
            Fst(t) => t.to_doc(PROJ_LEVEL).append(RcDoc::text(".1")),
            Snd(t) => t.to_doc(PROJ_LEVEL).append(RcDoc::text(".2")),
            Let(x, ty, bound, body) => RcDoc::text("let ")
                .append(RcDoc::as_string(x))
                .append(RcDoc::text(" : "))
                .append(ty.to_doc(ABS_LEVEL))
                .append(RcDoc::text(" = "))
                .append(bound.to_doc(ABS_LEVEL))
                .append(RcDoc::line())
                .append(RcDoc::text("in "))
                .append(body.to_doc(ABS_LEVEL))
                .group(),
            Path(line, a, b) => RcDoc::text("PathP")
                .append(RcDoc::space())
                .append(line.to_doc(PROJ_LEVEL))
                .append(RcDoc::space())
                .append(a.to_doc(PROJ_LEVEL))
                .append(RcDoc::space())
                .append(b.to_doc(PROJ_LEVEL))
                .group(),
            PLam(i, body) => RcDoc::text("<")
                .append(RcDoc::as_string(i))
                .append(RcDoc::text(">"))
                .append(RcDoc::line().append(body.to_doc(ABS_LEVEL)).nest(2))
                .group(),
            PApp(t, r) => t
                .to_doc(PAPP_LEVEL)
                .append(RcDoc::text(" @ "))
                .append(RcDoc::as_string(r)),
            System(s) => system_doc(s),
            HComp(ty, base, sys) => RcDoc::text("hcomp")
                .append(RcDoc::space())
                .append(ty.to_doc(PROJ_LEVEL))
                .append(RcDoc::space())
                .append(base.to_doc(PROJ_LEVEL))
                .append(RcDoc::space())
                .append(system_doc(sys))
                .group(),
            Transp(line, t) => RcDoc::text("transp")
                .append(RcDoc::space())
                .append(line.to_doc(PROJ_LEVEL))
                .append(RcDoc::space())
                .append(t.to_doc(PROJ_LEVEL))
                .group(),
            Glue(base, sys) => RcDoc::text("Glue")
                .append(RcDoc::space())
                .append(base.to_doc(PROJ_LEVEL))
                .append(RcDoc::space())
                .append(system_doc(sys)),
            GlueElem(base, sys) => RcDoc::text("glue")
                .append(RcDoc::space())
                .append(base.to_doc(PROJ_LEVEL))
                .append(RcDoc::space())
                .append(system_doc(sys)),
            Unglue(t) => RcDoc::text("unglue")
                .append(RcDoc::space())
                .append(t.to_doc(PROJ_LEVEL)),
            Sum(name, _) => RcDoc::as_string(name),
            Con(_, c, args) => {
                if args.is_empty() {
                    RcDoc::as_string(c)
                } else {
                    RcDoc::as_string(c)
                        .append(
                            RcDoc::concat(
                                args.iter()
                                    .map(|a| RcDoc::line().append(a.to_doc(PROJ_LEVEL))),
                            )
                            .nest(2),
                        )
                        .group()
                }
            }
            Split(name, _, _) => RcDoc::as_string(name),
        }
    }
}

fn binder_doc<'a>(b: &'a Binder, arrow: &'a str, cod: &'a Term) -> RcDoc<'a, ()> {
    let dom = if b.name == "_" {
        b.ty.to_doc(PAPP_LEVEL)
    } else {
        RcDoc::text("(")
            .append(RcDoc::as_string(&b.name))
            .append(RcDoc::text(" : "))
            .append(b.ty.to_doc(ABS_LEVEL))
            .append(RcDoc::text(")"))
    };
    dom.append(RcDoc::space())
        .append(RcDoc::text(arrow))
        .append(RcDoc::line().append(cod.to_doc(ARROW_LEVEL)).nest(2))
        .group()
}

fn system_doc(s: &System<Rc<Term>>) -> RcDoc<()> {
    if s.is_empty() {
        return RcDoc::text("[]");
    }
    RcDoc::text("[ ")
        .append(RcDoc::intersperse(
            s.iter().map(|(face, t)| {
                RcDoc::as_string(face)
                    .append(RcDoc::text(" -> "))
                    .append(t.to_doc(ABS_LEVEL))
            }),
            RcDoc::text(", "),
        ))
        .append(RcDoc::text(" ]"))
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_doc(ABS_LEVEL).pretty(80))
    }
}

/*!
The semantic domain for evaluation: weak values, neutral spines and
persistent environments.

A [`Value`] is either a canonical form, a stuck composition, or a
[`Neutral`] elimination spine. Function and path bodies are kept as
[`Closure`]s over the environment they were built in; nothing under a
binder is evaluated until the closure is applied.

[`Env`] is a persistent cons list behind [`Rc`]: extension is O(1) and
every closure shares the spine it captured. A dedicated node kind holds
a whole declaration group, which is what lets members of a group refer
to each other (and to themselves) without tying a recursive knot in the
value domain.
*/

use std::fmt;
use std::rc::Rc;

use pretty::RcDoc;
use smol_str::SmolStr;

use crate::term::{
    ABS_LEVEL, APP_LEVEL, ATOM_LEVEL, Branch, Decl, DeclGroup, II, IName, Label, PROJ_LEVEL,
    PAPP_LEVEL, System, Term,
};

/// A term body paired with the environment it closes over.
#[derive(Debug, Clone)]
pub struct Closure {
    pub name: SmolStr,
    pub body: Rc<Term>,
    pub env: Env,
}

/// A path body closing over an interval binder.
#[derive(Debug, Clone)]
pub struct IClosure {
    pub name: IName,
    pub body: Rc<Term>,
    pub env: Env,
}

/// A datatype value: its labels together with the environment the
/// telescope types are interpreted in.
#[derive(Debug, Clone)]
pub struct SumVal {
    pub name: SmolStr,
    pub labels: Rc<[Label]>,
    pub env: Env,
}

/// A case eliminator value, waiting for a constructor argument.
#[derive(Debug, Clone)]
pub struct SplitVal {
    pub name: SmolStr,
    pub motive: Rc<Term>,
    pub branches: Rc<[Branch]>,
    pub env: Env,
}

/// A weak value.
#[derive(Debug, Clone)]
pub enum Value {
    U,
    /// Function type: domain value and codomain closure
    Pi(Rc<Value>, Closure),
    /// Pair type: first component value and second-component closure
    Sigma(Rc<Value>, Closure),
    /// Function value, with the evaluated domain when the source
    /// carried an annotation
    Lam(Option<Rc<Value>>, Closure),
    Pair(Rc<Value>, Rc<Value>),
    /// Path type: a line of types (a path-applicable value) with its
    /// two endpoint values
    Path(Rc<Value>, Rc<Value>, Rc<Value>),
    /// Path value
    PLam(IClosure),
    /// A composition no rule could discharge; counts toward the
    /// composition metric
    HComp(Rc<Value>, Rc<Value>, System<Rc<Value>>),
    /// A transport whose line was not constant; counts toward the
    /// composition metric
    Transp(Rc<Value>, Rc<Value>),
    /// Glue type with its partial equivalences
    Glue(Rc<Value>, System<Rc<Value>>),
    /// Glue element with its partial values
    GlueElem(Rc<Value>, System<Rc<Value>>),
    Sum(SumVal),
    Split(SplitVal),
    /// Constructor value, tagged with its datatype
    Con(SmolStr, SmolStr, Vec<Rc<Value>>),
    Neutral(Neutral),
}

/// An elimination spine stuck on a variable or a stuck composition.
///
/// Spine heads are `Rc<Value>` rather than `Rc<Neutral>` because a
/// stuck `hcomp` or `transp` can head a spine too: applying a function
/// that is itself a stuck composition leaves the whole application
/// stuck.
#[derive(Debug, Clone)]
pub enum Neutral {
    /// A free variable, carrying its type when one is known. The type
    /// is what lets path application at an endpoint reduce to the
    /// endpoint of the variable's path type.
    Var(SmolStr, Option<Rc<Value>>),
    App(Rc<Value>, Rc<Value>),
    Fst(Rc<Value>),
    Snd(Rc<Value>),
    PApp(Rc<Value>, II),
    Unglue(Rc<Value>),
    /// A split applied to a non-constructor scrutinee
    SplitApp(Rc<Value>, Rc<Value>),
}

impl Value {
    /// A typed free variable.
    pub fn var(name: impl Into<SmolStr>, ty: Option<Rc<Value>>) -> Rc<Value> {
        Rc::new(Value::Neutral(Neutral::Var(name.into(), ty)))
    }

    /// Whether this value may head a neutral spine: a neutral, or a
    /// composition no rule discharged.
    pub fn is_stuck(&self) -> bool {
        matches!(self, Value::Neutral(_) | Value::HComp(..) | Value::Transp(..))
    }

    /// The number of surviving composition nodes in this value.
    /// Closure bodies are not entered: the metric measures the work
    /// already forced, not work a deeper evaluation might expose.
    pub fn comp_count(&self) -> usize {
        use Value::*;
        let sys = |s: &System<Rc<Value>>| s.iter().map(|(_, v)| v.comp_count()).sum::<usize>();
        match self {
            U | Sum(_) | Split(_) => 0,
            Pi(dom, _) | Sigma(dom, _) => dom.comp_count(),
            Lam(ann, _) => ann.as_ref().map_or(0, |a| a.comp_count()),
            Pair(a, b) => a.comp_count() + b.comp_count(),
            Path(l, a, b) => l.comp_count() + a.comp_count() + b.comp_count(),
            PLam(_) => 0,
            HComp(t, b, s) => 1 + t.comp_count() + b.comp_count() + sys(s),
            Transp(l, t) => 1 + l.comp_count() + t.comp_count(),
            Glue(t, s) | GlueElem(t, s) => t.comp_count() + sys(s),
            Con(_, _, args) => args.iter().map(|a| a.comp_count()).sum(),
            Neutral(n) => n.comp_count(),
        }
    }

    /// Shallow display: canonical structure is rendered, closure
    /// bodies are shown as their unevaluated source terms.
    pub fn to_doc(&self, level: usize) -> RcDoc<()> {
        let doc = self.head_doc();
        if self.precedence() > level {
            RcDoc::text("(").append(doc).append(RcDoc::text(")"))
        } else {
            doc
        }
    }

    fn precedence(&self) -> usize {
        use Value::*;
        match self {
            U | Pair(..) | Sum(_) | Split(_) => ATOM_LEVEL,
            Con(_, _, args) if args.is_empty() => ATOM_LEVEL,
            Pi(..) | Sigma(..) => crate::term::ARROW_LEVEL,
            Lam(..) | PLam(_) => ABS_LEVEL,
            Path(..) | HComp(..) | Transp(..) | Glue(..) | GlueElem(..) | Con(..) => APP_LEVEL,
            Neutral(n) => n.precedence(),
        }
    }

    fn head_doc(&self) -> RcDoc<()> {
        use Value::*;
        match self {
            U => RcDoc::text("U"),
            Pi(dom, cod) => RcDoc::text("(")
                .append(RcDoc::as_string(&cod.name))
                .append(RcDoc::text(" : "))
                .append(dom.to_doc(ABS_LEVEL))
                .append(RcDoc::text(") -> "))
                .append(cod.body.to_doc(crate::term::ARROW_LEVEL)),
            Sigma(dom, cod) => RcDoc::text("(")
                .append(RcDoc::as_string(&cod.name))
                .append(RcDoc::text(" : "))
                .append(dom.to_doc(ABS_LEVEL))
                .append(RcDoc::text(") * "))
                .append(cod.body.to_doc(crate::term::ARROW_LEVEL)),
            Lam(_, cl) => RcDoc::text("\\")
                .append(RcDoc::as_string(&cl.name))
                .append(RcDoc::text(" -> "))
                .append(cl.body.to_doc(ABS_LEVEL)),
            Pair(a, b) => RcDoc::text("(")
                .append(a.to_doc(ABS_LEVEL))
                .append(RcDoc::text(", "))
                .append(b.to_doc(ABS_LEVEL))
                .append(RcDoc::text(")")),
            Path(line, a, b) => RcDoc::text("PathP")
                .append(RcDoc::space())
                .append(line.to_doc(PROJ_LEVEL))
                .append(RcDoc::space())
                .append(a.to_doc(PROJ_LEVEL))
                .append(RcDoc::space())
                .append(b.to_doc(PROJ_LEVEL)),
            PLam(cl) => RcDoc::text("<")
                .append(RcDoc::as_string(&cl.name))
                .append(RcDoc::text("> "))
                .append(cl.body.to_doc(ABS_LEVEL)),
            HComp(ty, base, sys) => RcDoc::text("hcomp")
                .append(RcDoc::space())
                .append(ty.to_doc(PROJ_LEVEL))
                .append(RcDoc::space())
                .append(base.to_doc(PROJ_LEVEL))
                .append(RcDoc::space())
                .append(value_system_doc(sys)),
            Transp(line, t) => RcDoc::text("transp")
                .append(RcDoc::space())
                .append(line.to_doc(PROJ_LEVEL))
                .append(RcDoc::space())
                .append(t.to_doc(PROJ_LEVEL)),
            Glue(base, sys) => RcDoc::text("Glue")
                .append(RcDoc::space())
                .append(base.to_doc(PROJ_LEVEL))
                .append(RcDoc::space())
                .append(value_system_doc(sys)),
            GlueElem(base, sys) => RcDoc::text("glue")
                .append(RcDoc::space())
                .append(base.to_doc(PROJ_LEVEL))
                .append(RcDoc::space())
                .append(value_system_doc(sys)),
            Sum(sv) => RcDoc::as_string(&sv.name),
            Split(sv) => RcDoc::as_string(&sv.name),
            Con(_, c, args) => {
                if args.is_empty() {
                    RcDoc::as_string(c)
                } else {
                    RcDoc::as_string(c).append(RcDoc::concat(
                        args.iter()
                            .map(|a| RcDoc::space().append(a.to_doc(PROJ_LEVEL))),
                    ))
                }
            }
            Neutral(n) => n.head_doc(),
        }
    }
}

impl Neutral {
    fn precedence(&self) -> usize {
        use Neutral::*;
        match self {
            Var(..) => ATOM_LEVEL,
            Fst(_) | Snd(_) => PROJ_LEVEL,
            App(..) | Unglue(_) | SplitApp(..) => APP_LEVEL,
            PApp(..) => PAPP_LEVEL,
        }
    }

    fn comp_count(&self) -> usize {
        use Neutral::*;
        match self {
            Var(_, _) => 0,
            App(f, a) | SplitApp(f, a) => f.comp_count() + a.comp_count(),
            Fst(v) | Snd(v) | Unglue(v) => v.comp_count(),
            PApp(v, _) => v.comp_count(),
        }
    }

    fn head_doc(&self) -> RcDoc<()> {
        use Neutral::*;
        match self {
            Var(x, _) => RcDoc::as_string(x),
            App(f, a) | SplitApp(f, a) => f
                .to_doc(APP_LEVEL)
                .append(RcDoc::space())
                .append(a.to_doc(PROJ_LEVEL)),
            Fst(v) => v.to_doc(PROJ_LEVEL).append(RcDoc::text(".1")),
            Snd(v) => v.to_doc(PROJ_LEVEL).append(RcDoc::text(".2")),
            PApp(v, r) => v
                .to_doc(PAPP_LEVEL)
                .append(RcDoc::text(" @ "))
                .append(RcDoc::as_string(r)),
            Unglue(v) => RcDoc::text("unglue")
                .append(RcDoc::space())
                .append(v.to_doc(PROJ_LEVEL)),
        }
    }
}

fn value_system_doc(s: &System<Rc<Value>>) -> RcDoc<()> {
    if s.is_empty() {
        return RcDoc::text("[]");
    }
    RcDoc::text("[ ")
        .append(RcDoc::intersperse(
            s.iter().map(|(face, v)| {
                RcDoc::as_string(face)
                    .append(RcDoc::text(" -> "))
                    .append(v.to_doc(ABS_LEVEL))
            }),
            RcDoc::text(", "),
        ))
        .append(RcDoc::text(" ]"))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_doc(ABS_LEVEL).pretty(80))
    }
}

/// The result of looking a name up in an environment.
#[derive(Debug, Clone)]
pub enum Hit {
    /// A value bound directly
    Val(Rc<Value>),
    /// A declaration found in a group node; the environment is the
    /// spine at that node, so evaluating the body there resolves
    /// sibling (and self) references back through the same group
    Decl(Env, Decl),
}

#[derive(Debug)]
enum ENode {
    Val(Env, SmolStr, Rc<Value>),
    I(Env, IName, II),
    Decls(Env, Rc<DeclGroup>),
}

/// A persistent environment: name-to-value bindings, interval
/// substitutions and declaration groups, newest first.
#[derive(Debug, Clone, Default)]
pub struct Env(Option<Rc<ENode>>);

impl Env {
    pub fn empty() -> Env {
        Env(None)
    }

    /// Bind a term variable. O(1); the receiver is shared, not copied.
    pub fn bind(&self, name: impl Into<SmolStr>, v: Rc<Value>) -> Env {
        Env(Some(Rc::new(ENode::Val(self.clone(), name.into(), v))))
    }

    /// Record an interval substitution `i := r`.
    pub fn pin(&self, i: IName, r: II) -> Env {
        Env(Some(Rc::new(ENode::I(self.clone(), i, r))))
    }

    /// Push a whole declaration group.
    pub fn with_decls(&self, group: Rc<DeclGroup>) -> Env {
        Env(Some(Rc::new(ENode::Decls(self.clone(), group))))
    }

    /// Resolve a term variable to its binding, newest first.
    pub fn lookup(&self, name: &str) -> Option<Hit> {
        let mut cur = self;
        while let Some(node) = &cur.0 {
            match &**node {
                ENode::Val(prev, n, v) => {
                    if n == name {
                        return Some(Hit::Val(v.clone()));
                    }
                    cur = prev;
                }
                ENode::I(prev, _, _) => cur = prev,
                ENode::Decls(prev, group) => {
                    if let Some(d) = group.decl(name) {
                        return Some(Hit::Decl(Env(Some(node.clone())), d.clone()));
                    }
                    cur = prev;
                }
            }
        }
        None
    }

    /// Resolve an interval variable through the recorded
    /// substitutions, chasing renamings.
    pub fn ival(&self, i: &IName) -> II {
        let mut name = i.clone();
        let mut cur = self;
        while let Some(node) = &cur.0 {
            match &**node {
                ENode::I(prev, j, r) => {
                    if *j == name {
                        match r {
                            II::Dir(d) => return II::Dir(*d),
                            II::Var(k) => {
                                name = k.clone();
                                cur = prev;
                            }
                        }
                    } else {
                        cur = prev;
                    }
                }
                ENode::Val(prev, _, _) | ENode::Decls(prev, _) => cur = prev,
            }
        }
        II::Var(name)
    }

    /// Whether two environments are the same spine.
    pub fn ptr_eq(&self, other: &Env) -> bool {
        match (&self.0, &other.0) {
            (None, None) => true,
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub(crate) fn node_parts(&self) -> Option<EnvParts<'_>> {
        let node = self.0.as_deref()?;
        Some(match node {
            ENode::Val(prev, n, v) => EnvParts::Val(prev, n, v),
            ENode::I(prev, i, r) => EnvParts::I(prev, i, r),
            ENode::Decls(prev, g) => EnvParts::Decls(prev, g),
        })
    }
}

/// A borrowed view of the head node of an environment, used by the
/// evaluator's environment comparison.
pub(crate) enum EnvParts<'a> {
    Val(&'a Env, &'a SmolStr, &'a Rc<Value>),
    I(&'a Env, &'a IName, &'a II),
    Decls(&'a Env, &'a Rc<DeclGroup>),
}

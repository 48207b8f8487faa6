/*!
Bidirectional type checking.

[`Checker::infer`] synthesizes a type for elimination forms and type
formers; [`Checker::check`] pushes an expected type into introduction
forms. Judgmental equality is the evaluator's [`conv`], so everything
the evaluator reduces is transparent to the checker.

A [`Ctx`] tracks the types of the variables in scope alongside the
evaluation environment that gives them values. Binding a variable
extends the environment with a typed neutral whose display name is
primed against the names already issued, which keeps conversion
honest under shadowing.

Top-level admission goes through [`Checker::check_decl_group`]: the
group's signatures are checked left to right, then every body is
checked with all signatures in scope, so members can refer to each
other and to themselves.

[`conv`]: Machine::conv
*/

use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use smol_str::SmolStr;
use thiserror::Error;

use crate::eval::{EvalError, Machine, MachineFlags};
use crate::term::{Binder, Dir, Face, II, IName, System, Term};
use crate::value::{Env, Value};

/// Top-level signatures in declaration order.
pub type Sigs = IndexMap<SmolStr, Rc<Value>, fxhash::FxBuildHasher>;

/// A type checking failure. Rendered types are deep normal forms when
/// readback succeeds and shallow values otherwise.
#[derive(Debug, Error)]
pub enum TypeError {
    #[error("type mismatch: expected {expected}, found {found}")]
    Mismatch { expected: String, found: String },
    #[error("expected a function type, found {0}")]
    ExpectedPi(String),
    #[error("expected a pair type, found {0}")]
    ExpectedSigma(String),
    #[error("expected a path type, found {0}")]
    ExpectedPath(String),
    #[error("expected a glue type, found {0}")]
    ExpectedGlue(String),
    #[error("expected a datatype, found {0}")]
    ExpectedData(String),
    #[error("not a type: {0}")]
    NotAType(String),
    #[error("cannot infer a type for {0}")]
    CannotInfer(&'static str),
    #[error("unbound variable {0}")]
    Unbound(SmolStr),
    #[error("branches disagree on the overlap {0}")]
    Coherence(String),
    #[error("tube disagrees with its base on the face {0}")]
    Boundary(String),
    #[error("path endpoint mismatch: expected {expected}, found {found}")]
    PathEndpoint { expected: String, found: String },
    #[error("missing branch for constructor {0}")]
    MissingBranch(SmolStr),
    #[error("branch for {0}, which is not a constructor of the scrutinee's type")]
    UnknownBranch(SmolStr),
    #[error("duplicate branch for constructor {0}")]
    DuplicateBranch(SmolStr),
    #[error("branch for {con} binds {found} arguments but the constructor takes {expected}")]
    BranchArity {
        con: SmolStr,
        expected: usize,
        found: usize,
    },
    #[error("{con} is not a constructor of datatype {data}")]
    NotAConstructor { data: SmolStr, con: SmolStr },
    #[error("constructor {con} takes {expected} arguments, found {found}")]
    ConArity {
        con: SmolStr,
        expected: usize,
        found: usize,
    },
    #[error("glue entry on {face} is not an equivalence: {source}")]
    GlueEntry {
        face: String,
        #[source]
        source: Box<TypeError>,
    },
    #[error("glue element faces do not match the faces of the Glue type")]
    GlueShape,
    #[error("a tube entry must be a path abstraction")]
    TubeShape,
    #[error("a system can only appear inside a composition or glueing")]
    SystemOutsideComposition,
    #[error("in the definition of {name}: {source}")]
    Decl {
        name: SmolStr,
        #[source]
        source: Box<TypeError>,
    },
    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// The typing context: global signatures, local binder types, and the
/// environment that evaluates terms in this scope.
#[derive(Debug, Clone)]
pub struct Ctx<'a> {
    globals: &'a Sigs,
    entries: Vec<(SmolStr, Rc<Value>)>,
    used: Vec<SmolStr>,
    env: Env,
}

impl<'a> Ctx<'a> {
    pub fn new(globals: &'a Sigs, env: Env) -> Ctx<'a> {
        Ctx {
            globals,
            entries: Vec::new(),
            used: Vec::new(),
            env,
        }
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    /// The type of a variable: innermost binder first, then the
    /// global signatures.
    pub fn lookup(&self, name: &str) -> Option<Rc<Value>> {
        self.entries
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, ty)| ty.clone())
            .or_else(|| self.globals.get(name).cloned())
    }

    fn fresh(&self, base: &SmolStr) -> SmolStr {
        let mut candidate = base.clone();
        while self.used.contains(&candidate) {
            candidate = SmolStr::from(format!("{candidate}'"));
        }
        candidate
    }

    /// Bind a variable at a type, returning the extended context and
    /// the typed neutral standing for the variable.
    pub fn bind(&self, name: &SmolStr, ty: Rc<Value>) -> (Ctx<'a>, Rc<Value>) {
        let display = self.fresh(name);
        let v = Value::var(display.clone(), Some(ty.clone()));
        let mut out = self.clone();
        out.entries.push((name.clone(), ty));
        out.used.push(display);
        out.env = out.env.bind(name.clone(), v.clone());
        (out, v)
    }

    /// Bind a variable at a type with a known value.
    pub fn define(&self, name: &SmolStr, ty: Rc<Value>, v: Rc<Value>) -> Ctx<'a> {
        let mut out = self.clone();
        out.entries.push((name.clone(), ty));
        out.env = out.env.bind(name.clone(), v);
        out
    }

    /// Record a signature without touching the environment; the value
    /// resolves through the environment's declaration group.
    pub fn declare(&self, name: &SmolStr, ty: Rc<Value>) -> Ctx<'a> {
        let mut out = self.clone();
        out.entries.push((name.clone(), ty));
        out
    }

    /// Bind an interval variable to an interval expression.
    pub fn pin(&self, i: IName, r: II) -> Ctx<'a> {
        let mut out = self.clone();
        out.env = out.env.pin(i, r);
        out
    }

    /// The context under a face: the environment and every binder type
    /// are restricted by the face's constraints.
    fn restrict(&self, m: &Machine, face: &Face) -> Result<Ctx<'a>, EvalError> {
        let mut out = self.clone();
        out.env = m.restrict_env(&self.env, face)?;
        for (_, ty) in &mut out.entries {
            for (i, d) in face.iter() {
                *ty = m.act(ty, i, &II::Dir(d))?;
            }
        }
        Ok(out)
    }
}

/// The type checker. Owns the machine it evaluates and compares with.
#[derive(Debug, Default)]
pub struct Checker {
    machine: Machine,
}

impl Checker {
    pub fn new(flags: MachineFlags) -> Checker {
        Checker {
            machine: Machine::new(flags),
        }
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    fn render(&self, v: &Rc<Value>) -> String {
        match self.machine.quote_value(v) {
            Ok(t) => t.to_string(),
            Err(_) => v.to_string(),
        }
    }

    fn act_by(&self, v: &Rc<Value>, face: &Face) -> Result<Rc<Value>, EvalError> {
        let mut out = v.clone();
        for (i, d) in face.iter() {
            out = self.machine.act(&out, i, &II::Dir(d))?;
        }
        Ok(out)
    }

    /// Check that `t` is a type.
    pub fn check_is_type(&self, ctx: &Ctx, t: &Term) -> Result<(), TypeError> {
        self.check(ctx, t, &Rc::new(Value::U))
    }

    /// Convenience for drivers: infer the type of a closed-context
    /// expression against the global signatures.
    pub fn infer_expr(
        &self,
        globals: &Sigs,
        env: &Env,
        t: &Term,
    ) -> Result<Rc<Value>, TypeError> {
        let ctx = Ctx::new(globals, env.clone());
        self.infer(&ctx, t)
    }

    /// Admit a declaration group: signatures first, left to right,
    /// then every body with the whole group's signatures in scope.
    /// Returns the environment extended with the group and the new
    /// signatures in order.
    pub fn check_decl_group(
        &self,
        globals: &Sigs,
        env: &Env,
        group: &Rc<crate::term::DeclGroup>,
    ) -> Result<(Env, Vec<(SmolStr, Rc<Value>)>), TypeError> {
        let genv = env.with_decls(group.clone());
        let mut ctx = Ctx::new(globals, genv.clone());
        let mut sigs = Vec::with_capacity(group.0.len());
        for d in &group.0 {
            let vty = self
                .check_is_type(&ctx, &d.ty)
                .and_then(|()| Ok(self.machine.eval(&d.ty, &genv)?))
                .map_err(|e| TypeError::Decl {
                    name: d.name.clone(),
                    source: Box::new(e),
                })?;
            ctx = ctx.declare(&d.name, vty.clone());
            sigs.push((d.name.clone(), vty));
        }
        for (d, (_, vty)) in group.0.iter().zip(&sigs) {
            self.check(&ctx, &d.body, vty).map_err(|e| TypeError::Decl {
                name: d.name.clone(),
                source: Box::new(e),
            })?;
        }
        Ok((genv, sigs))
    }

    /// Synthesize a type.
    pub fn infer(&self, ctx: &Ctx, t: &Term) -> Result<Rc<Value>, TypeError> {
        match t {
            Term::Var(x) => ctx.lookup(x).ok_or_else(|| TypeError::Unbound(x.clone())),
            Term::U => Ok(Rc::new(Value::U)),
            Term::Pi(b, cod) | Term::Sigma(b, cod) => {
                self.check_is_type(ctx, &b.ty)?;
                let vty = self.machine.eval(&b.ty, &ctx.env)?;
                let (ctx2, _) = ctx.bind(&b.name, vty);
                self.check_is_type(&ctx2, cod)?;
                Ok(Rc::new(Value::U))
            }
            Term::Lam(..) => Err(TypeError::CannotInfer("a lambda")),
            Term::App(f, a) => {
                // an applied bare lambda gets its binder's type from
                // the argument
                if let Term::Lam(x, None, body) = &**f {
                    let ta = self.infer(ctx, a)?;
                    let va = self.machine.eval(a, &ctx.env)?;
                    let ctx2 = ctx.define(x, ta, va);
                    return self.infer(&ctx2, body);
                }
                let tf = self.infer(ctx, f)?;
                match &*tf {
                    Value::Pi(dom, cod) => {
                        self.check(ctx, a, dom)?;
                        let va = self.machine.eval(a, &ctx.env)?;
                        Ok(self.machine.capp(cod, va)?)
                    }
                    _ => Err(TypeError::ExpectedPi(self.render(&tf))),
                }
            }
            Term::Pair(..) => Err(TypeError::CannotInfer("a pair")),
            Term::Fst(p) => {
                let tp = self.infer(ctx, p)?;
                match &*tp {
                    Value::Sigma(dom, _) => Ok(dom.clone()),
                    _ => Err(TypeError::ExpectedSigma(self.render(&tp))),
                }
            }
            Term::Snd(p) => {
                let tp = self.infer(ctx, p)?;
                match &*tp {
                    Value::Sigma(_, cod) => {
                        let vp = self.machine.eval(p, &ctx.env)?;
                        let first = self.machine.fst(vp)?;
                        Ok(self.machine.capp(cod, first)?)
                    }
                    _ => Err(TypeError::ExpectedSigma(self.render(&tp))),
                }
            }
            Term::Let(x, xty, bound, body) => {
                let ctx2 = self.check_let(ctx, x, xty, bound)?;
                self.infer(&ctx2, body)
            }
            Term::Path(line, a, b) => {
                let vline = self.check_line(ctx, line)?;
                let t0 = self.machine.papp(vline.clone(), II::Dir(Dir::Zero))?;
                self.check(ctx, a, &t0)?;
                let t1 = self.machine.papp(vline, II::Dir(Dir::One))?;
                self.check(ctx, b, &t1)?;
                Ok(Rc::new(Value::U))
            }
            Term::PLam(..) => Err(TypeError::CannotInfer("a path abstraction")),
            Term::PApp(p, r) => {
                let tp = self.infer(ctx, p)?;
                match &*tp {
                    Value::Path(line, _, _) => {
                        let rr = self.machine.eval_ii(r, &ctx.env);
                        Ok(self.machine.papp(line.clone(), rr)?)
                    }
                    _ => Err(TypeError::ExpectedPath(self.render(&tp))),
                }
            }
            Term::System(_) => Err(TypeError::SystemOutsideComposition),
            Term::HComp(ty, base, sys) => {
                self.check_is_type(ctx, ty)?;
                let vty = self.machine.eval(ty, &ctx.env)?;
                self.check(ctx, base, &vty)?;
                let vbase = self.machine.eval(base, &ctx.env)?;
                self.check_tube(ctx, sys, &vty, &vbase)?;
                Ok(vty)
            }
            Term::Transp(line, tm) => {
                let vline = self.check_line(ctx, line)?;
                let ty0 = self.machine.papp(vline.clone(), II::Dir(Dir::Zero))?;
                self.check(ctx, tm, &ty0)?;
                Ok(self.machine.papp(vline, II::Dir(Dir::One))?)
            }
            Term::Glue(base, sys) => {
                self.check_is_type(ctx, base)?;
                let vbase = self.machine.eval(base, &ctx.env)?;
                let alive = self.alive_entries(ctx, sys);
                for (face, tm) in &alive {
                    let ctx_f = ctx.restrict(&self.machine, face)?;
                    let base_f = self.act_by(&vbase, face)?;
                    let want = self.equiv_ty(&base_f)?;
                    self.check(&ctx_f, tm, &want)
                        .map_err(|e| TypeError::GlueEntry {
                            face: face.to_string(),
                            source: Box::new(e),
                        })?;
                }
                self.check_overlaps(ctx, &alive)?;
                Ok(Rc::new(Value::U))
            }
            Term::GlueElem(..) => Err(TypeError::CannotInfer("a glue element")),
            Term::Unglue(g) => {
                let tg = self.infer(ctx, g)?;
                match &*tg {
                    Value::Glue(base, _) => Ok(base.clone()),
                    _ => Err(TypeError::ExpectedGlue(self.render(&tg))),
                }
            }
            Term::Sum(..) => Err(TypeError::CannotInfer("a datatype literal")),
            Term::Con(data, con, args) => {
                let dv = self.machine.eval(&Term::Var(data.clone()), &ctx.env)?;
                match &*dv {
                    Value::Sum(_) => {
                        self.check_con(ctx, &dv, data, con, args)?;
                        Ok(dv)
                    }
                    Value::Lam(..) => Err(TypeError::CannotInfer(
                        "a constructor of a parameterized datatype",
                    )),
                    _ => Err(TypeError::ExpectedData(self.render(&dv))),
                }
            }
            Term::Split(_, motive, branches) => {
                self.check_is_type(ctx, motive)?;
                let vmot = self.machine.eval(motive, &ctx.env)?;
                let (dom, cod) = match &*vmot {
                    Value::Pi(d, c) => (d.clone(), c.clone()),
                    _ => return Err(TypeError::ExpectedPi(self.render(&vmot))),
                };
                let sv = match &*dom {
                    Value::Sum(sv) => sv.clone(),
                    _ => return Err(TypeError::ExpectedData(self.render(&dom))),
                };
                let mut seen: IndexSet<SmolStr, fxhash::FxBuildHasher> = IndexSet::default();
                for br in branches.iter() {
                    let Some(label) = sv.labels.iter().find(|l| l.name == br.con) else {
                        return Err(TypeError::UnknownBranch(br.con.clone()));
                    };
                    if !seen.insert(br.con.clone()) {
                        return Err(TypeError::DuplicateBranch(br.con.clone()));
                    }
                    if br.binds.len() != label.tele.len() {
                        return Err(TypeError::BranchArity {
                            con: br.con.clone(),
                            expected: label.tele.len(),
                            found: br.binds.len(),
                        });
                    }
                    let mut cb = ctx.clone();
                    let mut tele_env = sv.env.clone();
                    let mut cargs = Vec::with_capacity(br.binds.len());
                    for (bind_name, (pn, pt)) in br.binds.iter().zip(label.tele.iter()) {
                        let pvty = self.machine.eval(pt, &tele_env)?;
                        let (next, xv) = cb.bind(bind_name, pvty);
                        cb = next;
                        tele_env = tele_env.bind(pn.clone(), xv.clone());
                        cargs.push(xv);
                    }
                    let scrut = Rc::new(Value::Con(sv.name.clone(), br.con.clone(), cargs));
                    let want = self.machine.capp(&cod, scrut)?;
                    self.check(&cb, &br.body, &want)?;
                }
                for label in sv.labels.iter() {
                    if !seen.contains(&label.name) {
                        return Err(TypeError::MissingBranch(label.name.clone()));
                    }
                }
                Ok(vmot)
            }
        }
    }

    /// Check a term against an expected type.
    pub fn check(&self, ctx: &Ctx, t: &Term, ty: &Rc<Value>) -> Result<(), TypeError> {
        match (t, &**ty) {
            (Term::Lam(x, ann, body), Value::Pi(dom, cod)) => {
                if let Some(a) = ann {
                    self.check_is_type(ctx, a)?;
                    let va = self.machine.eval(a, &ctx.env)?;
                    if !self.machine.conv(&va, dom)? {
                        return Err(TypeError::Mismatch {
                            expected: self.render(dom),
                            found: self.render(&va),
                        });
                    }
                }
                let (ctx2, xv) = ctx.bind(x, dom.clone());
                let want = self.machine.capp(cod, xv)?;
                self.check(&ctx2, body, &want)
            }
            (Term::Pair(a, b), Value::Sigma(dom, cod)) => {
                self.check(ctx, a, dom)?;
                let va = self.machine.eval(a, &ctx.env)?;
                let want = self.machine.capp(cod, va)?;
                self.check(ctx, b, &want)
            }
            (Term::PLam(i, body), Value::Path(line, a0, a1)) => {
                let j = self.machine.fresh_ivar();
                let ctx2 = ctx.pin(i.clone(), II::Var(j.clone()));
                let want = self.machine.papp(line.clone(), II::Var(j))?;
                self.check(&ctx2, body, &want)?;
                let vp = self.machine.eval(t, &ctx.env)?;
                let e0 = self.machine.papp(vp.clone(), II::Dir(Dir::Zero))?;
                if !self.machine.conv(&e0, a0)? {
                    return Err(TypeError::PathEndpoint {
                        expected: self.render(a0),
                        found: self.render(&e0),
                    });
                }
                let e1 = self.machine.papp(vp, II::Dir(Dir::One))?;
                if !self.machine.conv(&e1, a1)? {
                    return Err(TypeError::PathEndpoint {
                        expected: self.render(a1),
                        found: self.render(&e1),
                    });
                }
                Ok(())
            }
            (Term::Con(data, con, args), Value::Sum(_)) => {
                self.check_con(ctx, ty, data, con, args)
            }
            (Term::Sum(_, labels), Value::U) => {
                for label in labels.iter() {
                    let mut cl = ctx.clone();
                    for (pn, pt) in &label.tele {
                        self.check_is_type(&cl, pt)?;
                        let pv = self.machine.eval(pt, &cl.env)?;
                        let (next, _) = cl.bind(pn, pv);
                        cl = next;
                    }
                }
                Ok(())
            }
            (Term::GlueElem(base_t, sys_t), Value::Glue(gbase, tube)) => {
                let gbase = gbase.clone();
                let tube = tube.clone();
                self.check(ctx, base_t, &gbase)?;
                let vbase = self.machine.eval(base_t, &ctx.env)?;
                let alive = self.alive_entries(ctx, sys_t);
                if alive.len() != tube.len() {
                    return Err(TypeError::GlueShape);
                }
                for (face, tm) in &alive {
                    let Some(w) = tube.get(face) else {
                        return Err(TypeError::GlueShape);
                    };
                    let w = w.clone();
                    let ctx_f = ctx.restrict(&self.machine, face)?;
                    let dom = self.machine.fst(w.clone())?;
                    self.check(&ctx_f, tm, &dom)?;
                    // on its face, the element must map onto the base
                    let tv = self.machine.eval(tm, &ctx_f.env)?;
                    let fun = self.machine.fst(self.machine.snd(w)?)?;
                    let mapped = self.machine.app(fun, tv)?;
                    let base_f = self.act_by(&vbase, face)?;
                    if !self.machine.conv(&mapped, &base_f)? {
                        return Err(TypeError::Boundary(face.to_string()));
                    }
                }
                self.check_overlaps(ctx, &alive)
            }
            (Term::GlueElem(..), _) => Err(TypeError::ExpectedGlue(self.render(ty))),
            (Term::Let(x, xty, bound, body), _) => {
                let ctx2 = self.check_let(ctx, x, xty, bound)?;
                self.check(&ctx2, body, ty)
            }
            (Term::System(_), _) => Err(TypeError::SystemOutsideComposition),
            _ => {
                let it = self.infer(ctx, t)?;
                if self.machine.conv(&it, ty)? {
                    Ok(())
                } else {
                    Err(TypeError::Mismatch {
                        expected: self.render(ty),
                        found: self.render(&it),
                    })
                }
            }
        }
    }

    fn check_let<'a>(
        &self,
        ctx: &Ctx<'a>,
        x: &SmolStr,
        xty: &Term,
        bound: &Term,
    ) -> Result<Ctx<'a>, TypeError> {
        self.check_is_type(ctx, xty)?;
        let vty = self.machine.eval(xty, &ctx.env)?;
        self.check(ctx, bound, &vty)?;
        let vb = self.machine.eval(bound, &ctx.env)?;
        Ok(ctx.define(x, vty, vb))
    }

    /// Check that `l` is a line of types: either a path abstraction
    /// over a type, or a term whose type is a path in the universe.
    fn check_line(&self, ctx: &Ctx, l: &Term) -> Result<Rc<Value>, TypeError> {
        match l {
            Term::PLam(i, body) => {
                let j = self.machine.fresh_ivar();
                let ctx2 = ctx.pin(i.clone(), II::Var(j));
                self.check_is_type(&ctx2, body)?;
            }
            _ => {
                let lt = self.infer(ctx, l)?;
                match &*lt {
                    Value::Path(tyline, _, _) => {
                        let j = self.machine.fresh_ivar();
                        let at = self.machine.papp(tyline.clone(), II::Var(j))?;
                        if !self.machine.conv(&at, &Rc::new(Value::U))? {
                            return Err(TypeError::NotAType(self.render(&at)));
                        }
                    }
                    _ => return Err(TypeError::ExpectedPath(self.render(&lt))),
                }
            }
        }
        Ok(self.machine.eval(l, &ctx.env)?)
    }

    /// The system's entries whose faces survive the context's interval
    /// substitutions, with the faces restricted.
    fn alive_entries(&self, ctx: &Ctx, sys: &System<Rc<Term>>) -> Vec<(Face, Rc<Term>)> {
        let mut alive = Vec::with_capacity(sys.len());
        for (face, tm) in sys.iter() {
            if let Some(f) = self.machine.restrict_face(face, &ctx.env) {
                alive.push((f, tm.clone()));
            }
        }
        alive
    }

    /// Entries on overlapping faces must be judgmentally equal where
    /// both apply.
    fn check_overlaps(&self, ctx: &Ctx, alive: &[(Face, Rc<Term>)]) -> Result<(), TypeError> {
        for (n, (fa, ta)) in alive.iter().enumerate() {
            for (fb, tb) in &alive[n + 1..] {
                let Some(meet) = fa.meet(fb) else {
                    continue;
                };
                let cm = ctx.restrict(&self.machine, &meet)?;
                let va = self.machine.eval(ta, &cm.env)?;
                let vb = self.machine.eval(tb, &cm.env)?;
                if !self.machine.conv(&va, &vb)? {
                    return Err(TypeError::Coherence(meet.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Check a tube against its base: every entry is a path
    /// abstraction in the fill direction, agrees with the base at 0,
    /// and agrees with its neighbours on overlaps.
    fn check_tube(
        &self,
        ctx: &Ctx,
        sys: &System<Rc<Term>>,
        vty: &Rc<Value>,
        vbase: &Rc<Value>,
    ) -> Result<(), TypeError> {
        let alive = self.alive_entries(ctx, sys);
        for (face, tm) in &alive {
            let Term::PLam(j, body) = &**tm else {
                return Err(TypeError::TubeShape);
            };
            let ctx_f = ctx.restrict(&self.machine, face)?;
            let ty_f = self.act_by(vty, face)?;
            let base_f = self.act_by(vbase, face)?;
            let k = self.machine.fresh_ivar();
            let ctx_j = ctx_f.pin(j.clone(), II::Var(k));
            self.check(&ctx_j, body, &ty_f)?;
            let vline = self.machine.eval(tm, &ctx_f.env)?;
            let at0 = self.machine.papp(vline, II::Dir(Dir::Zero))?;
            if !self.machine.conv(&at0, &base_f)? {
                return Err(TypeError::Boundary(face.to_string()));
            }
        }
        for (n, (fa, ta)) in alive.iter().enumerate() {
            for (fb, tb) in &alive[n + 1..] {
                let Some(meet) = fa.meet(fb) else {
                    continue;
                };
                let cm = ctx.restrict(&self.machine, &meet)?;
                let va = self.machine.eval(ta, &cm.env)?;
                let vb = self.machine.eval(tb, &cm.env)?;
                let k = self.machine.fresh_ivar();
                let xa = self.machine.papp(va, II::Var(k.clone()))?;
                let xb = self.machine.papp(vb, II::Var(k))?;
                if !self.machine.conv(&xa, &xb)? {
                    return Err(TypeError::Coherence(meet.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Check a constructor application against its datatype value.
    fn check_con(
        &self,
        ctx: &Ctx,
        dv: &Rc<Value>,
        data: &SmolStr,
        con: &SmolStr,
        args: &[Rc<Term>],
    ) -> Result<(), TypeError> {
        let Value::Sum(sv) = &**dv else {
            return Err(TypeError::ExpectedData(self.render(dv)));
        };
        if sv.name != *data {
            return Err(TypeError::Mismatch {
                expected: self.render(dv),
                found: format!("a constructor of {data}"),
            });
        }
        let Some(label) = sv.labels.iter().find(|l| l.name == *con) else {
            return Err(TypeError::NotAConstructor {
                data: sv.name.clone(),
                con: con.clone(),
            });
        };
        if label.tele.len() != args.len() {
            return Err(TypeError::ConArity {
                con: con.clone(),
                expected: label.tele.len(),
                found: args.len(),
            });
        }
        let mut tele_env = sv.env.clone();
        for (arg, (pn, pt)) in args.iter().zip(label.tele.iter()) {
            let pvty = self.machine.eval(pt, &tele_env)?;
            self.check(ctx, arg, &pvty)?;
            let va = self.machine.eval(arg, &ctx.env)?;
            tele_env = tele_env.bind(pn.clone(), va);
        }
        Ok(())
    }

    /// The type of equivalences into `a`: a domain, a map to `a`, and
    /// contractibility of every fiber.
    fn equiv_ty(&self, a: &Rc<Value>) -> Result<Rc<Value>, EvalError> {
        let base = Term::var("A");
        let line_a = Rc::new(Term::PLam(IName::src("_"), base.clone()));
        let fx = Rc::new(Term::App(Term::var("f"), Term::var("x")));
        let fiber: Rc<Term> = Rc::new(Term::Sigma(
            Binder {
                name: "x".into(),
                ty: Term::var("T"),
            },
            Rc::new(Term::Path(line_a, fx, Term::var("y"))),
        ));
        let line_fiber = Rc::new(Term::PLam(IName::src("_"), fiber.clone()));
        let contractible: Rc<Term> = Rc::new(Term::Sigma(
            Binder {
                name: "c".into(),
                ty: fiber.clone(),
            },
            Rc::new(Term::Pi(
                Binder {
                    name: "q".into(),
                    ty: fiber,
                },
                Rc::new(Term::Path(line_fiber, Term::var("c"), Term::var("q"))),
            )),
        ));
        let map_ty: Rc<Term> = Rc::new(Term::Pi(
            Binder {
                name: "x".into(),
                ty: Term::var("T"),
            },
            base.clone(),
        ));
        let equiv: Rc<Term> = Rc::new(Term::Sigma(
            Binder {
                name: "T".into(),
                ty: Rc::new(Term::U),
            },
            Rc::new(Term::Sigma(
                Binder {
                    name: "f".into(),
                    ty: map_ty,
                },
                Rc::new(Term::Pi(
                    Binder {
                        name: "y".into(),
                        ty: base,
                    },
                    contractible,
                )),
            )),
        ));
        self.machine.eval(&equiv, &Env::empty().bind("A", a.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::{Branch, Decl, DeclGroup, Label};

    fn checker() -> Checker {
        Checker::default()
    }

    fn lam(x: &str, body: Rc<Term>) -> Rc<Term> {
        Rc::new(Term::Lam(x.into(), None, body))
    }

    fn pi(x: &str, dom: Rc<Term>, cod: Rc<Term>) -> Rc<Term> {
        Rc::new(Term::Pi(
            Binder {
                name: x.into(),
                ty: dom,
            },
            cod,
        ))
    }

    fn zero() -> Rc<Term> {
        Rc::new(Term::Con("Nat".into(), "zero".into(), vec![]))
    }

    fn suc(n: Rc<Term>) -> Rc<Term> {
        Rc::new(Term::Con("Nat".into(), "suc".into(), vec![n]))
    }

    fn nat_group() -> Rc<DeclGroup> {
        let labels: Rc<[Label]> = vec![
            Label {
                name: "zero".into(),
                tele: vec![],
            },
            Label {
                name: "suc".into(),
                tele: vec![("n".into(), Term::var("Nat"))],
            },
        ]
        .into();
        Rc::new(DeclGroup(vec![Decl {
            name: "Nat".into(),
            ty: Rc::new(Term::U),
            body: Rc::new(Term::Sum("Nat".into(), labels)),
        }]))
    }

    /// Admit the Nat group and return the resulting scope.
    fn with_nat(ck: &Checker) -> (Sigs, Env) {
        let globals = Sigs::default();
        let (env, sigs) = ck
            .check_decl_group(&globals, &Env::empty(), &nat_group())
            .unwrap();
        let mut globals = Sigs::default();
        globals.extend(sigs);
        (globals, env)
    }

    fn decl_err(e: TypeError) -> TypeError {
        match e {
            TypeError::Decl { source, .. } => *source,
            other => other,
        }
    }

    #[test]
    fn identity_function_checks() {
        let ck = checker();
        let group = Rc::new(DeclGroup(vec![Decl {
            name: "id".into(),
            ty: pi("A", Rc::new(Term::U), pi("x", Term::var("A"), Term::var("A"))),
            body: lam("A", lam("x", Term::var("x"))),
        }]));
        let globals = Sigs::default();
        let (_, sigs) = ck
            .check_decl_group(&globals, &Env::empty(), &group)
            .unwrap();
        assert_eq!(sigs.len(), 1);
        assert_eq!(sigs[0].0, "id");
    }

    #[test]
    fn constructor_infers_its_datatype() {
        let ck = checker();
        let (globals, env) = with_nat(&ck);
        let ty = ck.infer_expr(&globals, &env, &suc(zero())).unwrap();
        assert!(matches!(&*ty, Value::Sum(sv) if sv.name == "Nat"));
    }

    #[test]
    fn applied_bare_lambda_infers() {
        let ck = checker();
        let (globals, env) = with_nat(&ck);
        let t = Rc::new(Term::App(lam("x", Term::var("x")), zero()));
        let ty = ck.infer_expr(&globals, &env, &t).unwrap();
        assert!(matches!(&*ty, Value::Sum(sv) if sv.name == "Nat"));
    }

    #[test]
    fn let_binding_infers() {
        let ck = checker();
        let (globals, env) = with_nat(&ck);
        let t = Rc::new(Term::Let(
            "n".into(),
            Term::var("Nat"),
            zero(),
            suc(Term::var("n")),
        ));
        let ty = ck.infer_expr(&globals, &env, &t).unwrap();
        assert!(matches!(&*ty, Value::Sum(sv) if sv.name == "Nat"));
    }

    #[test]
    fn body_against_wrong_signature_is_a_mismatch() {
        let ck = checker();
        let (globals, env) = with_nat(&ck);
        let group = Rc::new(DeclGroup(vec![Decl {
            name: "bad".into(),
            ty: pi("x", Term::var("Nat"), Term::var("Nat")),
            body: zero(),
        }]));
        let err = ck.check_decl_group(&globals, &env, &group).unwrap_err();
        assert!(matches!(decl_err(err), TypeError::Mismatch { .. }));
    }

    #[test]
    fn refl_path_checks() {
        let ck = checker();
        let (globals, env) = with_nat(&ck);
        let group = Rc::new(DeclGroup(vec![Decl {
            name: "reflZero".into(),
            ty: Rc::new(Term::Path(
                Rc::new(Term::PLam(IName::src("_"), Term::var("Nat"))),
                zero(),
                zero(),
            )),
            body: Rc::new(Term::PLam(IName::src("i"), zero())),
        }]));
        assert!(ck.check_decl_group(&globals, &env, &group).is_ok());
    }

    #[test]
    fn wrong_endpoint_is_reported() {
        let ck = checker();
        let (globals, env) = with_nat(&ck);
        let group = Rc::new(DeclGroup(vec![Decl {
            name: "notRefl".into(),
            ty: Rc::new(Term::Path(
                Rc::new(Term::PLam(IName::src("_"), Term::var("Nat"))),
                zero(),
                zero(),
            )),
            body: Rc::new(Term::PLam(IName::src("i"), suc(zero()))),
        }]));
        let err = ck.check_decl_group(&globals, &env, &group).unwrap_err();
        assert!(matches!(decl_err(err), TypeError::PathEndpoint { .. }));
    }

    #[test]
    fn tube_base_disagreement_is_a_boundary_error() {
        let ck = checker();
        let (globals, env) = with_nat(&ck);
        // under a free interval variable, a tube branch whose value at
        // 0 is not the base
        let i = IName::src("i");
        let sys = System::from_entries(vec![(
            Face::eqn(i.clone(), Dir::One),
            Rc::new(Term::PLam(IName::src("j"), suc(zero()))),
        )]);
        let t = Rc::new(Term::HComp(Term::var("Nat"), zero(), sys));
        let ctx = Ctx::new(&globals, env.pin(i, II::Var(IName::Gen(900))));
        let err = ck.infer(&ctx, &t).unwrap_err();
        assert!(matches!(err, TypeError::Boundary(_)));
    }

    #[test]
    fn constant_tube_checks() {
        let ck = checker();
        let (globals, env) = with_nat(&ck);
        let i = IName::src("i");
        let sys = System::from_entries(vec![(
            Face::eqn(i.clone(), Dir::One),
            Rc::new(Term::PLam(IName::src("j"), zero())),
        )]);
        let t = Rc::new(Term::HComp(Term::var("Nat"), zero(), sys));
        let ctx = Ctx::new(&globals, env.pin(i, II::Var(IName::Gen(901))));
        let ty = ck.infer(&ctx, &t).unwrap();
        assert!(matches!(&*ty, Value::Sum(sv) if sv.name == "Nat"));
    }

    #[test]
    fn split_must_be_exhaustive() {
        let ck = checker();
        let (globals, env) = with_nat(&ck);
        let branches: Rc<[Branch]> = vec![Branch {
            con: "zero".into(),
            binds: vec![],
            body: zero(),
        }]
        .into();
        let motive = pi("_", Term::var("Nat"), Term::var("Nat"));
        let group = Rc::new(DeclGroup(vec![Decl {
            name: "partial".into(),
            ty: motive.clone(),
            body: Rc::new(Term::Split("partial".into(), motive, branches)),
        }]));
        let err = ck.check_decl_group(&globals, &env, &group).unwrap_err();
        assert!(matches!(decl_err(err), TypeError::MissingBranch(c) if c == "suc"));
    }

    #[test]
    fn mutual_group_admits() {
        let ck = checker();
        let (globals, env) = with_nat(&ck);
        let motive = pi("_", Term::var("Nat"), Term::var("Nat"));
        let even_branches: Rc<[Branch]> = vec![
            Branch {
                con: "zero".into(),
                binds: vec![],
                body: suc(zero()),
            },
            Branch {
                con: "suc".into(),
                binds: vec!["n".into()],
                body: Rc::new(Term::App(Term::var("odd"), Term::var("n"))),
            },
        ]
        .into();
        let odd_branches: Rc<[Branch]> = vec![
            Branch {
                con: "zero".into(),
                binds: vec![],
                body: zero(),
            },
            Branch {
                con: "suc".into(),
                binds: vec!["n".into()],
                body: Rc::new(Term::App(Term::var("even"), Term::var("n"))),
            },
        ]
        .into();
        let group = Rc::new(DeclGroup(vec![
            Decl {
                name: "even".into(),
                ty: motive.clone(),
                body: Rc::new(Term::Split("even".into(), motive.clone(), even_branches)),
            },
            Decl {
                name: "odd".into(),
                ty: motive.clone(),
                body: Rc::new(Term::Split("odd".into(), motive, odd_branches)),
            },
        ]));
        let (genv, sigs) = ck.check_decl_group(&globals, &env, &group).unwrap();
        assert_eq!(sigs.len(), 2);
        // the admitted definitions compute
        let t = Rc::new(Term::App(Term::var("even"), suc(suc(zero()))));
        let v = ck.machine().eval(&t, &genv).unwrap();
        assert!(matches!(&*v, Value::Con(_, c, _) if c == "suc"));
    }

    #[test]
    fn unglue_projects_the_base_type() {
        let ck = checker();
        let (globals, env) = with_nat(&ck);
        let nat = ck
            .machine()
            .eval(&Term::var("Nat"), &env)
            .unwrap();
        let glue_ty = Rc::new(Value::Glue(nat.clone(), System::new()));
        let ctx = Ctx::new(&globals, env);
        let (ctx2, _) = ctx.bind(&SmolStr::new_static("g"), glue_ty);
        let ty = ck.infer(&ctx2, &Term::var("g")).unwrap();
        assert!(matches!(&*ty, Value::Glue(..)));
        let ug = ck.infer(&ctx2, &Rc::new(Term::Unglue(Term::var("g")))).unwrap();
        assert!(ck.machine().conv(&ug, &nat).unwrap());
    }

    #[test]
    fn parameterized_constructor_is_check_only() {
        let ck = checker();
        // data Box (A : U) = box (a : A)
        let labels: Rc<[Label]> = vec![Label {
            name: "box".into(),
            tele: vec![("a".into(), Term::var("A"))],
        }]
        .into();
        let group = Rc::new(DeclGroup(vec![Decl {
            name: "Box".into(),
            ty: pi("A", Rc::new(Term::U), Rc::new(Term::U)),
            body: Rc::new(Term::Lam(
                "A".into(),
                Some(Rc::new(Term::U)),
                Rc::new(Term::Sum("Box".into(), labels)),
            )),
        }]));
        let globals = Sigs::default();
        let (env, sigs) = ck
            .check_decl_group(&globals, &Env::empty(), &group)
            .unwrap();
        let mut globals = Sigs::default();
        globals.extend(sigs);

        // inference has no way to pick the parameter
        let t = Rc::new(Term::Con("Box".into(), "box".into(), vec![Rc::new(Term::U)]));
        let err = ck.infer_expr(&globals, &env, &t).unwrap_err();
        assert!(matches!(err, TypeError::CannotInfer(_)));

        // checking against Box U supplies it
        let want = ck
            .machine()
            .eval(
                &Rc::new(Term::App(Term::var("Box"), Rc::new(Term::U))),
                &env,
            )
            .unwrap();
        let ctx = Ctx::new(&globals, env);
        ck.check(&ctx, &t, &want).unwrap();
    }

    #[test]
    fn tube_branches_that_disagree_on_an_overlap_are_rejected() {
        let ck = checker();
        let (globals, env) = with_nat(&ck);
        let path_ty = ck
            .machine()
            .eval(
                &Rc::new(Term::Path(
                    Rc::new(Term::PLam(IName::src("_"), Term::var("Nat"))),
                    zero(),
                    suc(zero()),
                )),
                &env,
            )
            .unwrap();
        let (i, j) = (IName::src("i"), IName::src("j"));
        let env = env
            .pin(i.clone(), II::Var(IName::Gen(910)))
            .pin(j.clone(), II::Var(IName::Gen(911)));
        let ctx = Ctx::new(&globals, env);
        let (ctx, _) = ctx.bind(&SmolStr::new_static("p"), path_ty);
        // both branches agree with the base at 0, but on the meet of
        // their faces one stays zero while the other walks the path
        let sys = System::from_entries(vec![
            (
                Face::eqn(i, Dir::One),
                Rc::new(Term::PLam(IName::src("k"), zero())),
            ),
            (
                Face::eqn(j, Dir::One),
                Rc::new(Term::PLam(
                    IName::src("k"),
                    Rc::new(Term::PApp(Term::var("p"), II::Var(IName::src("k")))),
                )),
            ),
        ]);
        let t = Rc::new(Term::HComp(Term::var("Nat"), zero(), sys));
        let err = ck.infer(&ctx, &t).unwrap_err();
        assert!(matches!(err, TypeError::Coherence(_)), "got {err}");
    }

    #[test]
    fn glue_element_branches_that_disagree_on_an_overlap_are_rejected() {
        let ck = checker();
        let (globals, env) = with_nat(&ck);
        let natv = ck.machine().eval(&Term::var("Nat"), &env).unwrap();
        // a tube entry whose map is constantly zero, so any element of
        // the domain satisfies the boundary
        let w = ck
            .machine()
            .eval(
                &Rc::new(Term::Pair(
                    Term::var("Nat"),
                    Rc::new(Term::Pair(lam("x", zero()), zero())),
                )),
                &env,
            )
            .unwrap();
        let fi = Face::eqn(IName::src("i"), Dir::One);
        let fj = Face::eqn(IName::src("j"), Dir::One);
        let glue_ty = Rc::new(Value::Glue(
            natv,
            System::from_entries(vec![(fi.clone(), w.clone()), (fj.clone(), w)]),
        ));
        let sys = System::from_entries(vec![(fi, zero()), (fj, suc(zero()))]);
        let t = Rc::new(Term::GlueElem(zero(), sys));
        let ctx = Ctx::new(&globals, env);
        let err = ck.check(&ctx, &t, &glue_ty).unwrap_err();
        assert!(matches!(err, TypeError::Coherence(_)), "got {err}");
    }

    #[test]
    fn glue_entry_that_is_not_an_equivalence_is_rejected() {
        let ck = checker();
        let (globals, env) = with_nat(&ck);
        let sys = System::from_entries(vec![(Face::eqn(IName::src("i"), Dir::One), zero())]);
        let t = Rc::new(Term::Glue(Term::var("Nat"), sys));
        let ctx = Ctx::new(&globals, env);
        let TypeError::GlueEntry { face, .. } = ck.infer(&ctx, &t).unwrap_err() else {
            panic!("expected a glue entry error");
        };
        assert!(face.contains("i = 1"), "got {face}");
    }

    /// Closed `Nat` terms that stay within what `infer` can synthesize.
    fn inferable_nat_term() -> impl proptest::strategy::Strategy<Value = Rc<Term>> {
        use proptest::prelude::*;
        let leaf = prop_oneof![Just(zero()), Just(suc(zero()))];
        leaf.prop_recursive(4, 16, 2, |inner| {
            prop_oneof![
                inner.clone().prop_map(suc),
                inner
                    .clone()
                    .prop_map(|t| Rc::new(Term::App(lam("x", Term::var("x")), t))),
                inner.clone().prop_map(|t| Rc::new(Term::Let(
                    "m".into(),
                    Term::var("Nat"),
                    t,
                    suc(Term::var("m"))
                ))),
                inner.prop_map(|t| Rc::new(Term::HComp(
                    Term::var("Nat"),
                    t,
                    System::new()
                ))),
            ]
        })
    }

    proptest::proptest! {
        /// `check(t, T)` succeeds exactly when `infer(t)` produces a
        /// type convertible with `T`.
        #[test]
        fn check_agrees_with_infer(t in inferable_nat_term()) {
            let ck = checker();
            let (globals, env) = with_nat(&ck);
            let nat = ck.machine().eval(&Term::var("Nat"), &env).unwrap();
            let ctx = Ctx::new(&globals, env);
            let inferred = ck.infer(&ctx, &t).unwrap();
            proptest::prop_assert!(ck.machine().conv(&inferred, &nat).unwrap());
            proptest::prop_assert!(ck.check(&ctx, &t, &nat).is_ok());
            // against a type the inferred one does not convert to,
            // checking must fail
            let wrong = Rc::new(Value::U);
            proptest::prop_assert!(ck.check(&ctx, &t, &wrong).is_err());
        }
    }

    #[test]
    fn shadowed_binders_stay_distinct_in_conversion() {
        let ck = checker();
        // \x -> \x -> x must check as (A : U) -> (B : U) -> B -> ...
        // a context binding x twice issues distinct neutrals
        let globals = Sigs::default();
        let ctx = Ctx::new(&globals, Env::empty());
        let u = Rc::new(Value::U);
        let (ctx1, v1) = ctx.bind(&SmolStr::new_static("x"), u.clone());
        let (_ctx2, v2) = ctx1.bind(&SmolStr::new_static("x"), u);
        assert!(!ck.machine().conv(&v1, &v2).unwrap());
    }
}

/*!
The evaluation machine.

Evaluation is weak: [`Machine::eval`] pushes a term to a value whose
head is canonical, stuck, or a composition no rule could discharge,
without entering closure bodies. Deep normal forms come from
[`Machine::normalize`], which reads a value back to a term by
instantiating every binder at a fresh typed variable and evaluating
underneath.

Every elimination goes through a smart constructor (`app`, `papp`,
`hcomp`, `transp`, `glue_ty`, `glue_elem`, `unglue`). Interval
substitution ([`Machine::act`]) rebuilds values through the same smart
constructors, so a substitution that turns a tube face total or a
transport line constant discharges the composition on the spot.

Conversion checking lives here as well: the checker's judgmental
equality and the evaluator's reduction rules must agree, so they share
one rule set.
*/

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bitflags::bitflags;
use smol_str::SmolStr;
use thiserror::Error;

use crate::term::{Dir, Face, II, IName, System, Term};
use crate::value::{Closure, Env, EnvParts, Hit, IClosure, Neutral, Value};

bitflags! {
    /// Evaluation options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MachineFlags: u8 {
        /// Log definition unfolding and composition discharge
        const TRACE = 1;
    }
}

/// A shared cancellation flag. The machine polls it on every
/// evaluation step; the driver triggers it from outside to abort a
/// runaway normalization.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Interrupt {
        Interrupt::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Evaluation failure.
///
/// `Internal` marks a value shape that type checking is supposed to
/// rule out; reaching one on checked input is a kernel bug, and the
/// error is reported rather than panicking so the session survives.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum EvalError {
    #[error("evaluation aborted")]
    Aborted,
    #[error("internal evaluation error: {0}")]
    Internal(&'static str),
}

/// The outcome of evaluating a system's faces under an environment:
/// either some face held everywhere and its branch decides the result,
/// or the satisfiable entries form a tube.
pub enum SysRes {
    Total(Rc<Value>),
    Tube(System<Rc<Value>>),
}

/// The evaluation machine: reduction, interval action, conversion and
/// readback.
#[derive(Debug, Default)]
pub struct Machine {
    flags: MachineFlags,
    interrupt: Interrupt,
    steps: Cell<u64>,
    gensym: Cell<u64>,
}

impl Machine {
    pub fn new(flags: MachineFlags) -> Machine {
        Machine {
            flags,
            ..Machine::default()
        }
    }

    /// A handle the driver can trigger to abort evaluation.
    pub fn interrupt(&self) -> Interrupt {
        self.interrupt.clone()
    }

    /// Steps taken since construction.
    pub fn steps(&self) -> u64 {
        self.steps.get()
    }

    fn tick(&self) -> Result<(), EvalError> {
        self.steps.set(self.steps.get().wrapping_add(1));
        if self.interrupt.is_set() {
            return Err(EvalError::Aborted);
        }
        Ok(())
    }

    /// A fresh interval variable no source term can mention.
    pub fn fresh_ivar(&self) -> IName {
        let n = self.gensym.get();
        self.gensym.set(n + 1);
        IName::Gen(n)
    }

    fn fresh_conv_var(&self, ty: Option<Rc<Value>>) -> Rc<Value> {
        let n = self.gensym.get();
        self.gensym.set(n + 1);
        Value::var(SmolStr::from(format!("?{n}")), ty)
    }

    // ------------------------------------------------------------------
    // Evaluation

    /// Evaluate a term to a weak value.
    pub fn eval(&self, t: &Term, env: &Env) -> Result<Rc<Value>, EvalError> {
        self.tick()?;
        match t {
            Term::Var(x) => match env.lookup(x) {
                Some(Hit::Val(v)) => Ok(v),
                Some(Hit::Decl(at, d)) => {
                    if self.flags.contains(MachineFlags::TRACE) {
                        log::trace!("unfold {}", d.name);
                    }
                    self.eval(&d.body, &at)
                }
                None => Err(EvalError::Internal("unbound variable during evaluation")),
            },
            Term::U => Ok(Rc::new(Value::U)),
            Term::Pi(b, cod) => Ok(Rc::new(Value::Pi(
                self.eval(&b.ty, env)?,
                Closure {
                    name: b.name.clone(),
                    body: cod.clone(),
                    env: env.clone(),
                },
            ))),
            Term::Sigma(b, cod) => Ok(Rc::new(Value::Sigma(
                self.eval(&b.ty, env)?,
                Closure {
                    name: b.name.clone(),
                    body: cod.clone(),
                    env: env.clone(),
                },
            ))),
            Term::Lam(x, ann, body) => {
                let dom = match ann {
                    Some(a) => Some(self.eval(a, env)?),
                    None => None,
                };
                Ok(Rc::new(Value::Lam(
                    dom,
                    Closure {
                        name: x.clone(),
                        body: body.clone(),
                        env: env.clone(),
                    },
                )))
            }
            Term::App(f, a) => {
                let vf = self.eval(f, env)?;
                let va = self.eval(a, env)?;
                self.app(vf, va)
            }
            Term::Pair(a, b) => Ok(Rc::new(Value::Pair(
                self.eval(a, env)?,
                self.eval(b, env)?,
            ))),
            Term::Fst(t) => {
                let v = self.eval(t, env)?;
                self.fst(v)
            }
            Term::Snd(t) => {
                let v = self.eval(t, env)?;
                self.snd(v)
            }
            Term::Let(x, _, bound, body) => {
                let vb = self.eval(bound, env)?;
                self.eval(body, &env.bind(x.clone(), vb))
            }
            Term::Path(line, a, b) => Ok(Rc::new(Value::Path(
                self.eval(line, env)?,
                self.eval(a, env)?,
                self.eval(b, env)?,
            ))),
            Term::PLam(i, body) => Ok(Rc::new(Value::PLam(IClosure {
                name: i.clone(),
                body: body.clone(),
                env: env.clone(),
            }))),
            Term::PApp(t, r) => {
                let v = self.eval(t, env)?;
                let r = self.eval_ii(r, env);
                self.papp(v, r)
            }
            Term::System(_) => Err(EvalError::Internal("bare system reached evaluation")),
            Term::HComp(ty, base, sys) => {
                let vty = self.eval(ty, env)?;
                let vbase = self.eval(base, env)?;
                let vsys = self.eval_system(sys, env)?;
                self.hcomp(vty, vbase, vsys)
            }
            Term::Transp(line, tm) => {
                let vline = self.eval(line, env)?;
                let vtm = self.eval(tm, env)?;
                self.transp(vline, vtm)
            }
            Term::Glue(base, sys) => {
                let vbase = self.eval(base, env)?;
                let vsys = self.eval_system(sys, env)?;
                self.glue_ty(vbase, vsys)
            }
            Term::GlueElem(base, sys) => {
                let vbase = self.eval(base, env)?;
                let vsys = self.eval_system(sys, env)?;
                self.glue_elem(vbase, vsys)
            }
            Term::Unglue(t) => {
                let v = self.eval(t, env)?;
                self.unglue(v)
            }
            Term::Sum(name, labels) => Ok(Rc::new(Value::Sum(crate::value::SumVal {
                name: name.clone(),
                labels: labels.clone(),
                env: env.clone(),
            }))),
            Term::Con(data, con, args) => {
                let vargs = args
                    .iter()
                    .map(|a| self.eval(a, env))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Rc::new(Value::Con(data.clone(), con.clone(), vargs)))
            }
            Term::Split(name, motive, branches) => Ok(Rc::new(Value::Split(
                crate::value::SplitVal {
                    name: name.clone(),
                    motive: motive.clone(),
                    branches: branches.clone(),
                    env: env.clone(),
                },
            ))),
        }
    }

    /// Evaluate an interval expression through the environment's
    /// substitutions.
    pub fn eval_ii(&self, r: &II, env: &Env) -> II {
        match r {
            II::Dir(d) => II::Dir(*d),
            II::Var(i) => env.ival(i),
        }
    }

    /// Apply a closure.
    pub fn capp(&self, cl: &Closure, v: Rc<Value>) -> Result<Rc<Value>, EvalError> {
        self.eval(&cl.body, &cl.env.bind(cl.name.clone(), v))
    }

    /// Instantiate a path closure at an interval expression.
    pub fn icapp(&self, cl: &IClosure, r: II) -> Result<Rc<Value>, EvalError> {
        self.eval(&cl.body, &cl.env.pin(cl.name.clone(), r))
    }

    /// Apply a function value.
    pub fn app(&self, f: Rc<Value>, a: Rc<Value>) -> Result<Rc<Value>, EvalError> {
        self.tick()?;
        match &*f {
            Value::Lam(_, cl) => self.capp(cl, a),
            Value::Split(sv) => self.split_app(&f, sv.clone(), a),
            _ if f.is_stuck() => Ok(Rc::new(Value::Neutral(Neutral::App(f, a)))),
            _ => Err(EvalError::Internal("application of a non-function value")),
        }
    }

    fn split_app(
        &self,
        fval: &Rc<Value>,
        sv: crate::value::SplitVal,
        arg: Rc<Value>,
    ) -> Result<Rc<Value>, EvalError> {
        match &*arg {
            Value::Con(_, con, args) => {
                let Some(branch) = sv.branches.iter().find(|b| b.con == *con) else {
                    return Err(EvalError::Internal("split has no branch for constructor"));
                };
                if branch.binds.len() != args.len() {
                    return Err(EvalError::Internal("split branch arity mismatch"));
                }
                let mut env = sv.env.clone();
                for (x, v) in branch.binds.iter().zip(args) {
                    env = env.bind(x.clone(), v.clone());
                }
                self.eval(&branch.body, &env)
            }
            _ if arg.is_stuck() => Ok(Rc::new(Value::Neutral(Neutral::SplitApp(
                fval.clone(),
                arg,
            )))),
            _ => Err(EvalError::Internal("split applied to a non-constructor")),
        }
    }

    /// First projection.
    pub fn fst(&self, v: Rc<Value>) -> Result<Rc<Value>, EvalError> {
        match &*v {
            Value::Pair(a, _) => Ok(a.clone()),
            _ if v.is_stuck() => Ok(Rc::new(Value::Neutral(Neutral::Fst(v)))),
            _ => Err(EvalError::Internal("projection from a non-pair value")),
        }
    }

    /// Second projection.
    pub fn snd(&self, v: Rc<Value>) -> Result<Rc<Value>, EvalError> {
        match &*v {
            Value::Pair(_, b) => Ok(b.clone()),
            _ if v.is_stuck() => Ok(Rc::new(Value::Neutral(Neutral::Snd(v)))),
            _ => Err(EvalError::Internal("projection from a non-pair value")),
        }
    }

    /// Apply a path value to an interval expression.
    ///
    /// A path abstraction instantiates its binder. A stuck path
    /// applied at an endpoint reduces to the endpoint recorded in its
    /// type, which is why neutral variables carry types.
    pub fn papp(&self, p: Rc<Value>, r: II) -> Result<Rc<Value>, EvalError> {
        self.tick()?;
        match &*p {
            Value::PLam(cl) => self.icapp(cl, r),
            _ if p.is_stuck() => match r {
                II::Dir(d) => match self.stuck_type(&p)? {
                    Some(ty) => match &*ty {
                        Value::Path(_, a0, a1) => Ok(match d {
                            Dir::Zero => a0.clone(),
                            Dir::One => a1.clone(),
                        }),
                        _ => Err(EvalError::Internal("path application at a non-path type")),
                    },
                    None => Ok(Rc::new(Value::Neutral(Neutral::PApp(p, II::Dir(d))))),
                },
                II::Var(_) => Ok(Rc::new(Value::Neutral(Neutral::PApp(p, r)))),
            },
            _ => Err(EvalError::Internal("path application of a non-path value")),
        }
    }

    /// Homogeneous composition. A total face short-circuits to that
    /// branch's fill at 1; otherwise the composition stays as a value.
    pub fn hcomp(
        &self,
        ty: Rc<Value>,
        base: Rc<Value>,
        sys: SysRes,
    ) -> Result<Rc<Value>, EvalError> {
        match sys {
            SysRes::Total(line) => {
                if self.flags.contains(MachineFlags::TRACE) {
                    log::trace!("hcomp discharged by a total face");
                }
                self.papp(line, II::Dir(Dir::One))
            }
            SysRes::Tube(tube) => Ok(Rc::new(Value::HComp(ty, base, tube))),
        }
    }

    /// Transport along a line of types. A line that does not mention
    /// its direction is constant and transport is the identity.
    pub fn transp(&self, line: Rc<Value>, tm: Rc<Value>) -> Result<Rc<Value>, EvalError> {
        let i = self.fresh_ivar();
        let fiber = self.papp(line.clone(), II::Var(i.clone()))?;
        let nf = self.quote_value(&fiber)?;
        if !nf.mentions_ivar(&i) {
            if self.flags.contains(MachineFlags::TRACE) {
                log::trace!("transp along a constant line");
            }
            return Ok(tm);
        }
        Ok(Rc::new(Value::Transp(line, tm)))
    }

    /// The Glue type former. A total face means the glued type is that
    /// face's equivalence domain.
    pub fn glue_ty(&self, base: Rc<Value>, sys: SysRes) -> Result<Rc<Value>, EvalError> {
        match sys {
            SysRes::Total(equiv) => self.fst(equiv),
            SysRes::Tube(tube) => Ok(Rc::new(Value::Glue(base, tube))),
        }
    }

    /// The glue introduction form. A total face means the element is
    /// that face's partial element.
    pub fn glue_elem(&self, base: Rc<Value>, sys: SysRes) -> Result<Rc<Value>, EvalError> {
        match sys {
            SysRes::Total(v) => Ok(v),
            SysRes::Tube(tube) => Ok(Rc::new(Value::GlueElem(base, tube))),
        }
    }

    /// Glue elimination: cancels an introduction, sticks otherwise.
    pub fn unglue(&self, v: Rc<Value>) -> Result<Rc<Value>, EvalError> {
        match &*v {
            Value::GlueElem(base, _) => Ok(base.clone()),
            _ if v.is_stuck() => Ok(Rc::new(Value::Neutral(Neutral::Unglue(v)))),
            _ => Err(EvalError::Internal("unglue of a non-glue value")),
        }
    }

    /// Evaluate a system's entries under `env`, restricting each face
    /// by the environment's interval substitutions. Unsatisfiable
    /// entries are dropped; the first face that becomes total decides
    /// the whole system.
    pub fn eval_system(
        &self,
        sys: &System<Rc<Term>>,
        env: &Env,
    ) -> Result<SysRes, EvalError> {
        let mut entries = Vec::with_capacity(sys.len());
        for (face, t) in sys.iter() {
            let Some(rface) = self.restrict_face(face, env) else {
                continue;
            };
            if rface.is_top() {
                return Ok(SysRes::Total(self.eval(t, env)?));
            }
            let renv = self.restrict_env(env, &rface)?;
            entries.push((rface, self.eval(t, &renv)?));
        }
        Ok(SysRes::Tube(System::from_entries(entries)))
    }

    /// Push a face through the environment's substitutions: discharged
    /// constraints vanish, renamed ones re-key, a contradiction kills
    /// the face.
    pub fn restrict_face(&self, face: &Face, env: &Env) -> Option<Face> {
        let mut out = Face::top();
        for (i, d) in face.iter() {
            match env.ival(i) {
                II::Dir(d2) => {
                    if d2 != d {
                        return None;
                    }
                }
                II::Var(j) => out = out.with(j, d)?,
            }
        }
        Some(out)
    }

    /// The environment restricted to a face: every constraint is
    /// applied as an interval substitution.
    pub fn restrict_env(&self, env: &Env, face: &Face) -> Result<Env, EvalError> {
        let mut out = env.clone();
        for (i, d) in face.iter() {
            out = self.act_env(&out, i, &II::Dir(d))?;
            out = out.pin(i.clone(), II::Dir(d));
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Interval action

    /// Substitute `s` for the interval variable `i` in a value.
    ///
    /// The result is rebuilt through the smart constructors, so a
    /// substitution that pins a variable can restart reductions: a
    /// path application at a now-constant direction reduces, a tube
    /// face that becomes total discharges its `hcomp`, a transport
    /// line that becomes constant disappears.
    pub fn act(&self, v: &Rc<Value>, i: &IName, s: &II) -> Result<Rc<Value>, EvalError> {
        self.tick()?;
        match &**v {
            Value::U => Ok(v.clone()),
            Value::Pi(dom, cod) => Ok(Rc::new(Value::Pi(
                self.act(dom, i, s)?,
                self.act_closure(cod, i, s)?,
            ))),
            Value::Sigma(dom, cod) => Ok(Rc::new(Value::Sigma(
                self.act(dom, i, s)?,
                self.act_closure(cod, i, s)?,
            ))),
            Value::Lam(ann, cl) => {
                let ann = match ann {
                    Some(a) => Some(self.act(a, i, s)?),
                    None => None,
                };
                Ok(Rc::new(Value::Lam(ann, self.act_closure(cl, i, s)?)))
            }
            Value::Pair(a, b) => Ok(Rc::new(Value::Pair(
                self.act(a, i, s)?,
                self.act(b, i, s)?,
            ))),
            Value::Path(line, a, b) => Ok(Rc::new(Value::Path(
                self.act(line, i, s)?,
                self.act(a, i, s)?,
                self.act(b, i, s)?,
            ))),
            Value::PLam(cl) => Ok(Rc::new(Value::PLam(self.act_iclosure(cl, i, s)?))),
            Value::HComp(ty, base, sys) => {
                let ty = self.act(ty, i, s)?;
                let base = self.act(base, i, s)?;
                let sys = self.act_system(sys, i, s)?;
                self.hcomp(ty, base, sys)
            }
            Value::Transp(line, tm) => {
                let line = self.act(line, i, s)?;
                let tm = self.act(tm, i, s)?;
                self.transp(line, tm)
            }
            Value::Glue(base, sys) => {
                let base = self.act(base, i, s)?;
                let sys = self.act_system(sys, i, s)?;
                self.glue_ty(base, sys)
            }
            Value::GlueElem(base, sys) => {
                let base = self.act(base, i, s)?;
                let sys = self.act_system(sys, i, s)?;
                self.glue_elem(base, sys)
            }
            Value::Sum(sv) => Ok(Rc::new(Value::Sum(crate::value::SumVal {
                name: sv.name.clone(),
                labels: sv.labels.clone(),
                env: self.act_env(&sv.env, i, s)?.pin(i.clone(), s.clone()),
            }))),
            Value::Split(sv) => Ok(Rc::new(Value::Split(crate::value::SplitVal {
                name: sv.name.clone(),
                motive: sv.motive.clone(),
                branches: sv.branches.clone(),
                env: self.act_env(&sv.env, i, s)?.pin(i.clone(), s.clone()),
            }))),
            Value::Con(data, con, args) => {
                let args = args
                    .iter()
                    .map(|a| self.act(a, i, s))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Rc::new(Value::Con(data.clone(), con.clone(), args)))
            }
            Value::Neutral(n) => self.act_neutral(n, i, s),
        }
    }

    fn act_neutral(&self, n: &Neutral, i: &IName, s: &II) -> Result<Rc<Value>, EvalError> {
        match n {
            Neutral::Var(x, ty) => {
                let ty = match ty {
                    Some(t) => Some(self.act(t, i, s)?),
                    None => None,
                };
                Ok(Value::var(x.clone(), ty))
            }
            Neutral::App(f, a) => {
                let f = self.act(f, i, s)?;
                let a = self.act(a, i, s)?;
                self.app(f, a)
            }
            Neutral::Fst(p) => {
                let p = self.act(p, i, s)?;
                self.fst(p)
            }
            Neutral::Snd(p) => {
                let p = self.act(p, i, s)?;
                self.snd(p)
            }
            Neutral::PApp(p, r) => {
                let p = self.act(p, i, s)?;
                let r = match r {
                    II::Var(j) if j == i => s.clone(),
                    _ => r.clone(),
                };
                self.papp(p, r)
            }
            Neutral::Unglue(g) => {
                let g = self.act(g, i, s)?;
                self.unglue(g)
            }
            Neutral::SplitApp(sp, a) => {
                let sp = self.act(sp, i, s)?;
                let a = self.act(a, i, s)?;
                self.app(sp, a)
            }
        }
    }

    fn act_closure(&self, cl: &Closure, i: &IName, s: &II) -> Result<Closure, EvalError> {
        Ok(Closure {
            name: cl.name.clone(),
            body: cl.body.clone(),
            env: self.act_env(&cl.env, i, s)?.pin(i.clone(), s.clone()),
        })
    }

    fn act_iclosure(&self, cl: &IClosure, i: &IName, s: &II) -> Result<IClosure, EvalError> {
        let env = self.act_env(&cl.env, i, s)?;
        // a shadowing binder keeps its own direction out of the
        // substitution's reach
        let env = if cl.name == *i {
            env
        } else {
            env.pin(i.clone(), s.clone())
        };
        Ok(IClosure {
            name: cl.name.clone(),
            body: cl.body.clone(),
            env,
        })
    }

    /// Act on every value and substitution recorded in an environment.
    /// Declaration groups hold closed terms and pass through shared.
    fn act_env(&self, env: &Env, i: &IName, s: &II) -> Result<Env, EvalError> {
        match env.node_parts() {
            None => Ok(Env::empty()),
            Some(EnvParts::Val(prev, n, v)) => {
                let p = self.act_env(prev, i, s)?;
                let v = self.act(v, i, s)?;
                Ok(p.bind(n.clone(), v))
            }
            Some(EnvParts::I(prev, j, r)) => {
                if j == i {
                    // everything below is shadowed
                    return Ok(env.clone());
                }
                let p = self.act_env(prev, i, s)?;
                let r = match r {
                    II::Var(k) if k == i => s.clone(),
                    _ => r.clone(),
                };
                Ok(p.pin(j.clone(), r))
            }
            Some(EnvParts::Decls(prev, g)) => {
                let p = self.act_env(prev, i, s)?;
                Ok(p.with_decls(g.clone()))
            }
        }
    }

    fn act_system(
        &self,
        sys: &System<Rc<Value>>,
        i: &IName,
        s: &II,
    ) -> Result<SysRes, EvalError> {
        let mut entries = Vec::with_capacity(sys.len());
        for (face, v) in sys.iter() {
            let Some(f2) = face.act(i, s) else {
                continue;
            };
            let v2 = self.act(v, i, s)?;
            if f2.is_top() {
                return Ok(SysRes::Total(v2));
            }
            entries.push((f2, v2));
        }
        Ok(SysRes::Tube(System::from_entries(entries)))
    }

    // ------------------------------------------------------------------
    // Types of stuck values

    /// Synthesize the type of a stuck value from its spine.
    ///
    /// Returns `Ok(None)` when the spine bottoms out at a variable
    /// whose type was never recorded; elimination forms above such a
    /// variable simply stay stuck.
    pub fn stuck_type(&self, v: &Value) -> Result<Option<Rc<Value>>, EvalError> {
        match v {
            Value::HComp(ty, _, _) => Ok(Some(ty.clone())),
            Value::Transp(line, _) => Ok(Some(self.papp(line.clone(), II::Dir(Dir::One))?)),
            Value::Neutral(n) => match n {
                Neutral::Var(_, ty) => Ok(ty.clone()),
                Neutral::App(f, a) => match self.stuck_type(f)? {
                    Some(ft) => match &*ft {
                        Value::Pi(_, cod) => Ok(Some(self.capp(cod, a.clone())?)),
                        _ => Err(EvalError::Internal("application head has a non-function type")),
                    },
                    None => Ok(None),
                },
                Neutral::Fst(p) => match self.stuck_type(p)? {
                    Some(pt) => match &*pt {
                        Value::Sigma(dom, _) => Ok(Some(dom.clone())),
                        _ => Err(EvalError::Internal("projection head has a non-pair type")),
                    },
                    None => Ok(None),
                },
                Neutral::Snd(p) => match self.stuck_type(p)? {
                    Some(pt) => match &*pt {
                        Value::Sigma(_, cod) => {
                            let first = self.fst(p.clone())?;
                            Ok(Some(self.capp(cod, first)?))
                        }
                        _ => Err(EvalError::Internal("projection head has a non-pair type")),
                    },
                    None => Ok(None),
                },
                Neutral::PApp(p, r) => match self.stuck_type(p)? {
                    Some(pt) => match &*pt {
                        Value::Path(line, _, _) => {
                            Ok(Some(self.papp(line.clone(), r.clone())?))
                        }
                        _ => Err(EvalError::Internal("path application head has a non-path type")),
                    },
                    None => Ok(None),
                },
                Neutral::Unglue(g) => match self.stuck_type(g)? {
                    Some(gt) => match &*gt {
                        Value::Glue(base, _) => Ok(Some(base.clone())),
                        _ => Err(EvalError::Internal("unglue head has a non-glue type")),
                    },
                    None => Ok(None),
                },
                Neutral::SplitApp(sp, a) => match &**sp {
                    Value::Split(sv) => {
                        let mot = self.eval(&sv.motive, &sv.env)?;
                        match &*mot {
                            Value::Pi(_, cod) => Ok(Some(self.capp(cod, a.clone())?)),
                            _ => Err(EvalError::Internal("split motive is not a function type")),
                        }
                    }
                    _ => Err(EvalError::Internal("split application head is not a split")),
                },
            },
            _ => Err(EvalError::Internal("type synthesis on a canonical value")),
        }
    }

    // ------------------------------------------------------------------
    // Conversion

    /// Judgmental equality of two values, up to eta for functions,
    /// pairs and paths.
    pub fn conv(&self, a: &Rc<Value>, b: &Rc<Value>) -> Result<bool, EvalError> {
        self.tick()?;
        if Rc::ptr_eq(a, b) {
            return Ok(true);
        }
        use Value::*;
        match (&**a, &**b) {
            (U, U) => Ok(true),
            (Pi(d1, c1), Pi(d2, c2)) | (Sigma(d1, c1), Sigma(d2, c2)) => {
                if !self.conv(d1, d2)? {
                    return Ok(false);
                }
                let x = self.fresh_conv_var(Some(d1.clone()));
                let b1 = self.capp(c1, x.clone())?;
                let b2 = self.capp(c2, x)?;
                self.conv(&b1, &b2)
            }
            (Lam(a1, c1), Lam(a2, c2)) => {
                let dom = a1.clone().or_else(|| a2.clone());
                let x = self.fresh_conv_var(dom);
                let b1 = self.capp(c1, x.clone())?;
                let b2 = self.capp(c2, x)?;
                self.conv(&b1, &b2)
            }
            (Lam(ann, cl), _) => {
                let x = self.fresh_conv_var(ann.clone());
                let b1 = self.capp(cl, x.clone())?;
                let b2 = self.app(b.clone(), x)?;
                self.conv(&b1, &b2)
            }
            (_, Lam(ann, cl)) => {
                let x = self.fresh_conv_var(ann.clone());
                let b1 = self.app(a.clone(), x.clone())?;
                let b2 = self.capp(cl, x)?;
                self.conv(&b1, &b2)
            }
            (Pair(x1, y1), Pair(x2, y2)) => {
                Ok(self.conv(x1, x2)? && self.conv(y1, y2)?)
            }
            (Pair(x1, y1), _) => {
                Ok(self.conv(x1, &self.fst(b.clone())?)?
                    && self.conv(y1, &self.snd(b.clone())?)?)
            }
            (_, Pair(x2, y2)) => {
                Ok(self.conv(&self.fst(a.clone())?, x2)?
                    && self.conv(&self.snd(a.clone())?, y2)?)
            }
            (Path(l1, x1, y1), Path(l2, x2, y2)) => {
                Ok(self.conv_line(l1, l2)?
                    && self.conv(x1, x2)?
                    && self.conv(y1, y2)?)
            }
            (PLam(c1), PLam(c2)) => {
                let i = self.fresh_ivar();
                let b1 = self.icapp(c1, II::Var(i.clone()))?;
                let b2 = self.icapp(c2, II::Var(i))?;
                self.conv(&b1, &b2)
            }
            (PLam(cl), _) => {
                let i = self.fresh_ivar();
                let b1 = self.icapp(cl, II::Var(i.clone()))?;
                let b2 = self.papp(b.clone(), II::Var(i))?;
                self.conv(&b1, &b2)
            }
            (_, PLam(cl)) => {
                let i = self.fresh_ivar();
                let b1 = self.papp(a.clone(), II::Var(i.clone()))?;
                let b2 = self.icapp(cl, II::Var(i))?;
                self.conv(&b1, &b2)
            }
            (HComp(t1, b1, s1), HComp(t2, b2, s2)) => {
                Ok(self.conv(t1, t2)?
                    && self.conv(b1, b2)?
                    && self.conv_system(s1, s2, true)?)
            }
            (Transp(l1, t1), Transp(l2, t2)) => {
                Ok(self.conv_line(l1, l2)? && self.conv(t1, t2)?)
            }
            (Glue(b1, s1), Glue(b2, s2)) | (GlueElem(b1, s1), GlueElem(b2, s2)) => {
                Ok(self.conv(b1, b2)? && self.conv_system(s1, s2, false)?)
            }
            (Sum(s1), Sum(s2)) => Ok(s1.name == s2.name && Rc::ptr_eq(&s1.labels, &s2.labels)),
            (Split(s1), Split(s2)) => Ok(Rc::ptr_eq(&s1.branches, &s2.branches)
                && self.conv_env(&s1.env, &s2.env)?),
            (Con(_, c1, a1), Con(_, c2, a2)) => {
                if c1 != c2 || a1.len() != a2.len() {
                    return Ok(false);
                }
                for (x, y) in a1.iter().zip(a2) {
                    if !self.conv(x, y)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (Neutral(n1), Neutral(n2)) => self.conv_neutral(n1, n2),
            _ => Ok(false),
        }
    }

    /// Compare two lines of types by instantiating both at one fresh
    /// direction.
    fn conv_line(&self, l1: &Rc<Value>, l2: &Rc<Value>) -> Result<bool, EvalError> {
        let i = self.fresh_ivar();
        let a = self.papp(l1.clone(), II::Var(i.clone()))?;
        let b = self.papp(l2.clone(), II::Var(i))?;
        self.conv(&a, &b)
    }

    fn conv_neutral(&self, a: &Neutral, b: &Neutral) -> Result<bool, EvalError> {
        use Neutral::*;
        match (a, b) {
            (Var(x, _), Var(y, _)) => Ok(x == y),
            (App(f1, a1), App(f2, a2)) | (SplitApp(f1, a1), SplitApp(f2, a2)) => {
                Ok(self.conv(f1, f2)? && self.conv(a1, a2)?)
            }
            (Fst(p1), Fst(p2)) | (Snd(p1), Snd(p2)) | (Unglue(p1), Unglue(p2)) => {
                self.conv(p1, p2)
            }
            (PApp(p1, r1), PApp(p2, r2)) => Ok(r1 == r2 && self.conv(p1, p2)?),
            _ => Ok(false),
        }
    }

    /// Compare two systems: equal face sets, and convertible entries
    /// on each face. Tube entries are lines and are compared at a
    /// fresh direction.
    fn conv_system(
        &self,
        s1: &System<Rc<Value>>,
        s2: &System<Rc<Value>>,
        lines: bool,
    ) -> Result<bool, EvalError> {
        if s1.len() != s2.len() {
            return Ok(false);
        }
        let mut v1: Vec<&(Face, Rc<Value>)> = s1.iter().collect();
        let mut v2: Vec<&(Face, Rc<Value>)> = s2.iter().collect();
        v1.sort_by(|x, y| x.0.cmp(&y.0));
        v2.sort_by(|x, y| x.0.cmp(&y.0));
        for ((f1, x), (f2, y)) in v1.iter().zip(&v2) {
            if f1 != f2 {
                return Ok(false);
            }
            let ok = if lines {
                self.conv_line(x, y)?
            } else {
                self.conv(x, y)?
            };
            if !ok {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn conv_env(&self, a: &Env, b: &Env) -> Result<bool, EvalError> {
        if a.ptr_eq(b) {
            return Ok(true);
        }
        match (a.node_parts(), b.node_parts()) {
            (None, None) => Ok(true),
            (Some(EnvParts::Val(p1, n1, v1)), Some(EnvParts::Val(p2, n2, v2))) => {
                if n1 != n2 || !self.conv(v1, v2)? {
                    return Ok(false);
                }
                self.conv_env(p1, p2)
            }
            (Some(EnvParts::I(p1, i1, r1)), Some(EnvParts::I(p2, i2, r2))) => {
                if i1 != i2 || r1 != r2 {
                    return Ok(false);
                }
                self.conv_env(p1, p2)
            }
            (Some(EnvParts::Decls(p1, g1)), Some(EnvParts::Decls(p2, g2))) => {
                if !Rc::ptr_eq(g1, g2) {
                    return Ok(false);
                }
                self.conv_env(p1, p2)
            }
            _ => Ok(false),
        }
    }

    // ------------------------------------------------------------------
    // Readback

    /// Read a value back to a closure-free term, instantiating every
    /// binder at a fresh variable typed from the surrounding former.
    /// Binder names follow the source, primed on shadowing, so the
    /// output is stable: normalizing a normal form reproduces it.
    pub fn quote_value(&self, v: &Rc<Value>) -> Result<Rc<Term>, EvalError> {
        let mut scope = QScope::default();
        self.quote_in(v, &mut scope)
    }

    /// Evaluate and read back: the deep normal form of `t` in `env`.
    pub fn normalize(&self, t: &Term, env: &Env) -> Result<Rc<Term>, EvalError> {
        let v = self.eval(t, env)?;
        self.quote_value(&v)
    }

    fn quote_in(&self, v: &Rc<Value>, sc: &mut QScope) -> Result<Rc<Term>, EvalError> {
        self.tick()?;
        use Value::*;
        match &**v {
            U => Ok(Rc::new(Term::U)),
            Pi(dom, cod) => {
                let qdom = self.quote_in(dom, sc)?;
                let x = sc.fresh_name(&cod.name);
                let vx = Value::var(x.clone(), Some(dom.clone()));
                let body = self.capp(cod, vx)?;
                let qbody = self.quote_in(&body, sc)?;
                Ok(Rc::new(Term::Pi(
                    crate::term::Binder { name: x, ty: qdom },
                    qbody,
                )))
            }
            Sigma(dom, cod) => {
                let qdom = self.quote_in(dom, sc)?;
                let x = sc.fresh_name(&cod.name);
                let vx = Value::var(x.clone(), Some(dom.clone()));
                let body = self.capp(cod, vx)?;
                let qbody = self.quote_in(&body, sc)?;
                Ok(Rc::new(Term::Sigma(
                    crate::term::Binder { name: x, ty: qdom },
                    qbody,
                )))
            }
            Lam(ann, cl) => {
                let qann = match ann {
                    Some(a) => Some(self.quote_in(a, sc)?),
                    None => None,
                };
                let x = sc.fresh_name(&cl.name);
                let vx = Value::var(x.clone(), ann.clone());
                let body = self.capp(cl, vx)?;
                let qbody = self.quote_in(&body, sc)?;
                Ok(Rc::new(Term::Lam(x, qann, qbody)))
            }
            Pair(a, b) => Ok(Rc::new(Term::Pair(
                self.quote_in(a, sc)?,
                self.quote_in(b, sc)?,
            ))),
            Path(line, a, b) => Ok(Rc::new(Term::Path(
                self.quote_in(line, sc)?,
                self.quote_in(a, sc)?,
                self.quote_in(b, sc)?,
            ))),
            PLam(cl) => {
                let base = match &cl.name {
                    IName::Src(s) => s.clone(),
                    IName::Gen(_) => SmolStr::new_static("i"),
                };
                let iname = IName::Src(sc.fresh_iname(&base));
                let body = self.icapp(cl, II::Var(iname.clone()))?;
                let qbody = self.quote_in(&body, sc)?;
                Ok(Rc::new(Term::PLam(iname, qbody)))
            }
            HComp(ty, bse, sys) => Ok(Rc::new(Term::HComp(
                self.quote_in(ty, sc)?,
                self.quote_in(bse, sc)?,
                sys.try_map_ref(|_, v| self.quote_in(v, sc))?,
            ))),
            Transp(line, tm) => Ok(Rc::new(Term::Transp(
                self.quote_in(line, sc)?,
                self.quote_in(tm, sc)?,
            ))),
            Glue(bse, sys) => Ok(Rc::new(Term::Glue(
                self.quote_in(bse, sc)?,
                sys.try_map_ref(|_, v| self.quote_in(v, sc))?,
            ))),
            GlueElem(bse, sys) => Ok(Rc::new(Term::GlueElem(
                self.quote_in(bse, sc)?,
                sys.try_map_ref(|_, v| self.quote_in(v, sc))?,
            ))),
            Sum(sv) => Ok(Term::var(sv.name.clone())),
            Split(sv) => Ok(Term::var(sv.name.clone())),
            Con(data, con, args) => {
                let qargs = args
                    .iter()
                    .map(|a| self.quote_in(a, sc))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Rc::new(Term::Con(data.clone(), con.clone(), qargs)))
            }
            Neutral(n) => self.quote_neutral(n, sc),
        }
    }

    fn quote_neutral(&self, n: &Neutral, sc: &mut QScope) -> Result<Rc<Term>, EvalError> {
        use Neutral::*;
        match n {
            Var(x, _) => Ok(Term::var(x.clone())),
            App(f, a) | SplitApp(f, a) => Ok(Rc::new(Term::App(
                self.quote_in(f, sc)?,
                self.quote_in(a, sc)?,
            ))),
            Fst(p) => Ok(Rc::new(Term::Fst(self.quote_in(p, sc)?))),
            Snd(p) => Ok(Rc::new(Term::Snd(self.quote_in(p, sc)?))),
            PApp(p, r) => Ok(Rc::new(Term::PApp(self.quote_in(p, sc)?, r.clone()))),
            Unglue(g) => Ok(Rc::new(Term::Unglue(self.quote_in(g, sc)?))),
        }
    }
}

/// Names already used while reading back, for capture-free freshening.
#[derive(Default)]
struct QScope {
    used: hashbrown::HashSet<SmolStr, fxhash::FxBuildHasher>,
    iused: hashbrown::HashSet<SmolStr, fxhash::FxBuildHasher>,
}

impl QScope {
    fn fresh_name(&mut self, base: &SmolStr) -> SmolStr {
        let mut candidate = base.clone();
        while self.used.contains(&candidate) {
            candidate = SmolStr::from(format!("{candidate}'"));
        }
        self.used.insert(candidate.clone());
        candidate
    }

    fn fresh_iname(&mut self, base: &SmolStr) -> SmolStr {
        let mut candidate = base.clone();
        while self.iused.contains(&candidate) {
            candidate = SmolStr::from(format!("{candidate}'"));
        }
        self.iused.insert(candidate.clone());
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::{Binder, Label};
    use test_log::test;

    fn machine() -> Machine {
        Machine::default()
    }

    fn lam(x: &str, body: Rc<Term>) -> Rc<Term> {
        Rc::new(Term::Lam(x.into(), None, body))
    }

    fn app(f: Rc<Term>, a: Rc<Term>) -> Rc<Term> {
        Rc::new(Term::App(f, a))
    }

    fn plam(i: &str, body: Rc<Term>) -> Rc<Term> {
        Rc::new(Term::PLam(IName::src(i), body))
    }

    fn nat_labels() -> Rc<[Label]> {
        vec![
            Label {
                name: "zero".into(),
                tele: vec![],
            },
            Label {
                name: "suc".into(),
                tele: vec![("n".into(), Term::var("Nat"))],
            },
        ]
        .into()
    }

    fn zero() -> Rc<Term> {
        Rc::new(Term::Con("Nat".into(), "zero".into(), vec![]))
    }

    fn suc(n: Rc<Term>) -> Rc<Term> {
        Rc::new(Term::Con("Nat".into(), "suc".into(), vec![n]))
    }

    #[test]
    fn beta_reduces() {
        let m = machine();
        let t = app(lam("x", Term::var("x")), zero());
        let v = m.eval(&t, &Env::empty()).unwrap();
        assert!(matches!(&*v, Value::Con(_, c, _) if c == "zero"));
    }

    #[test]
    fn projections_reduce() {
        let m = machine();
        let t = Rc::new(Term::Fst(Rc::new(Term::Pair(zero(), suc(zero())))));
        let v = m.eval(&t, &Env::empty()).unwrap();
        assert!(matches!(&*v, Value::Con(_, c, _) if c == "zero"));
    }

    #[test]
    fn path_application_instantiates() {
        let m = machine();
        // (<i> suc zero) @ 0
        let t = Rc::new(Term::PApp(plam("i", suc(zero())), II::Dir(Dir::Zero)));
        let v = m.eval(&t, &Env::empty()).unwrap();
        assert!(matches!(&*v, Value::Con(_, c, _) if c == "suc"));
    }

    #[test]
    fn neutral_path_application_reduces_at_endpoints() {
        let m = machine();
        // p : Path Nat zero (suc zero), applied at 1
        let nat = Rc::new(Value::Sum(crate::value::SumVal {
            name: "Nat".into(),
            labels: nat_labels(),
            env: Env::empty(),
        }));
        let line = m
            .eval(&plam("_", Term::var("Nat")), &Env::empty().bind("Nat", nat))
            .unwrap();
        let a0 = m.eval(&zero(), &Env::empty()).unwrap();
        let a1 = m.eval(&suc(zero()), &Env::empty()).unwrap();
        let pty = Rc::new(Value::Path(line, a0, a1.clone()));
        let p = Value::var("p", Some(pty));
        let v = m.papp(p.clone(), II::Dir(Dir::One)).unwrap();
        assert!(m.conv(&v, &a1).unwrap());
        // at a variable it stays stuck
        let i = IName::src("i");
        let stuck = m.papp(p, II::Var(i)).unwrap();
        assert!(matches!(&*stuck, Value::Neutral(Neutral::PApp(..))));
    }

    #[test]
    fn hcomp_total_face_takes_branch_at_one() {
        let m = machine();
        let i = IName::src("i");
        // under i := 1, the face (i = 1) is total and the tube fills to
        // its branch at 1
        let sys = System::from_entries(vec![(
            Face::eqn(i.clone(), Dir::One),
            plam("j", suc(zero())),
        )]);
        let t = Rc::new(Term::HComp(Term::var("Nat"), zero(), sys));
        let nat = Rc::new(Term::Sum("Nat".into(), nat_labels()));
        let env = Env::empty()
            .bind("Nat", m.eval(&nat, &Env::empty()).unwrap())
            .pin(i, II::Dir(Dir::One));
        let v = m.eval(&t, &env).unwrap();
        assert!(matches!(&*v, Value::Con(_, c, _) if c == "suc"));
    }

    #[test]
    fn hcomp_unsatisfiable_faces_drop() {
        let m = machine();
        let i = IName::src("i");
        let sys = System::from_entries(vec![(
            Face::eqn(i.clone(), Dir::One),
            plam("j", suc(zero())),
        )]);
        let t = Rc::new(Term::HComp(Term::var("Nat"), zero(), sys));
        let nat = Rc::new(Term::Sum("Nat".into(), nat_labels()));
        let env = Env::empty()
            .bind("Nat", m.eval(&nat, &Env::empty()).unwrap())
            .pin(i, II::Dir(Dir::Zero));
        let v = m.eval(&t, &env).unwrap();
        // the only face died, leaving a stuck composition with an
        // empty tube
        match &*v {
            Value::HComp(_, _, tube) => assert!(tube.is_empty()),
            other => panic!("expected a stuck hcomp, got {other:?}"),
        }
        assert_eq!(v.comp_count(), 1);
    }

    #[test]
    fn act_discharges_hcomp() {
        let m = machine();
        let i = IName::src("i");
        let sys = System::from_entries(vec![(
            Face::eqn(i.clone(), Dir::One),
            plam("j", suc(zero())),
        )]);
        let t = Rc::new(Term::HComp(Term::var("Nat"), zero(), sys));
        let nat = Rc::new(Term::Sum("Nat".into(), nat_labels()));
        let env = Env::empty().bind("Nat", m.eval(&nat, &Env::empty()).unwrap());
        let stuck = m.eval(&t, &env).unwrap();
        assert_eq!(stuck.comp_count(), 1);
        let filled = m.act(&stuck, &i, &II::Dir(Dir::One)).unwrap();
        assert!(matches!(&*filled, Value::Con(_, c, _) if c == "suc"));
    }

    #[test]
    fn transp_constant_line_is_identity() {
        let m = machine();
        let nat = Rc::new(Term::Sum("Nat".into(), nat_labels()));
        let env = Env::empty().bind("Nat", m.eval(&nat, &Env::empty()).unwrap());
        let t = Rc::new(Term::Transp(plam("i", Term::var("Nat")), zero()));
        let v = m.eval(&t, &env).unwrap();
        assert!(matches!(&*v, Value::Con(_, c, _) if c == "zero"));
        assert_eq!(v.comp_count(), 0);
    }

    #[test]
    fn unglue_cancels_glue_elem() {
        let m = machine();
        let i = IName::src("i");
        let sys = System::from_entries(vec![(Face::eqn(i.clone(), Dir::Zero), zero())]);
        let t = Rc::new(Term::Unglue(Rc::new(Term::GlueElem(suc(zero()), sys))));
        let env = Env::empty().pin(i, II::Var(IName::src("i")));
        let v = m.eval(&t, &env).unwrap();
        assert!(matches!(&*v, Value::Con(_, c, _) if c == "suc"));
    }

    #[test]
    fn split_selects_branch() {
        let m = machine();
        let branches: Rc<[crate::term::Branch]> = vec![
            crate::term::Branch {
                con: "zero".into(),
                binds: vec![],
                body: suc(zero()),
            },
            crate::term::Branch {
                con: "suc".into(),
                binds: vec!["n".into()],
                body: Term::var("n"),
            },
        ]
        .into();
        let motive = Rc::new(Term::Pi(
            Binder {
                name: "_".into(),
                ty: Term::var("Nat"),
            },
            Term::var("Nat"),
        ));
        let split = Rc::new(Term::Split("pred".into(), motive, branches));
        let nat = Rc::new(Term::Sum("Nat".into(), nat_labels()));
        let env = Env::empty().bind("Nat", m.eval(&nat, &Env::empty()).unwrap());
        let v = m.eval(&app(split, suc(suc(zero()))), &env).unwrap();
        let one = m.eval(&suc(zero()), &Env::empty()).unwrap();
        assert!(m.conv(&v, &one).unwrap());
    }

    #[test]
    fn conv_alpha_and_eta() {
        let m = machine();
        let id_x = m.eval(&lam("x", Term::var("x")), &Env::empty()).unwrap();
        let id_y = m.eval(&lam("y", Term::var("y")), &Env::empty()).unwrap();
        assert!(m.conv(&id_x, &id_y).unwrap());
        // \x -> f x ~ f for neutral f
        let f = Value::var("f", None);
        let eta = m
            .eval(
                &lam("x", app(Term::var("f"), Term::var("x"))),
                &Env::empty().bind("f", f.clone()),
            )
            .unwrap();
        assert!(m.conv(&eta, &f).unwrap());
    }

    #[test]
    fn normalize_goes_under_binders() {
        let m = machine();
        // \x -> (\y -> y) x normalizes to \x -> x
        let t = lam("x", app(lam("y", Term::var("y")), Term::var("x")));
        let nf = m.normalize(&t, &Env::empty()).unwrap();
        assert_eq!(*nf, Term::Lam("x".into(), None, Term::var("x")));
    }

    #[test]
    fn normalize_is_idempotent() {
        let m = machine();
        let nat = Rc::new(Term::Sum("Nat".into(), nat_labels()));
        let env = Env::empty().bind("Nat", m.eval(&nat, &Env::empty()).unwrap());
        let cases: Vec<Rc<Term>> = vec![
            lam("x", app(lam("y", Term::var("y")), Term::var("x"))),
            plam("i", suc(zero())),
            Rc::new(Term::HComp(
                Term::var("Nat"),
                zero(),
                System::from_entries(vec![]),
            )),
            Rc::new(Term::Pi(
                Binder {
                    name: "x".into(),
                    ty: Term::var("Nat"),
                },
                Term::var("Nat"),
            )),
        ];
        for t in cases {
            let once = m.normalize(&t, &env).unwrap();
            let twice = m.normalize(&once, &env).unwrap();
            assert_eq!(once, twice, "normal form of {t} must be stable");
        }
    }

    #[test]
    fn quote_freshens_shadowed_binders() {
        let m = machine();
        // \x -> \x -> x
        let t = lam("x", lam("x", Term::var("x")));
        let nf = m.normalize(&t, &Env::empty()).unwrap();
        let Term::Lam(outer, _, body) = &*nf else {
            panic!("expected a lambda");
        };
        let Term::Lam(inner, _, var) = &**body else {
            panic!("expected a nested lambda");
        };
        assert_eq!(outer, "x");
        assert_eq!(inner, "x'");
        assert_eq!(**var, Term::Var("x'".into()));
    }

    #[test]
    fn interrupt_aborts_evaluation() {
        let m = machine();
        m.interrupt().trigger();
        let t = app(lam("x", Term::var("x")), zero());
        assert!(matches!(
            m.eval(&t, &Env::empty()),
            Err(EvalError::Aborted)
        ));
        m.interrupt().clear();
        assert!(m.eval(&t, &Env::empty()).is_ok());
    }

    /// Closed terms of type `Nat`, built from redexes every rule set in
    /// this module can discharge.
    fn nat_term() -> impl proptest::strategy::Strategy<Value = Rc<Term>> {
        use proptest::prelude::*;
        let leaf = prop_oneof![Just(zero()), Just(suc(zero()))];
        leaf.prop_recursive(4, 24, 3, |inner| {
            prop_oneof![
                inner.clone().prop_map(suc),
                inner
                    .clone()
                    .prop_map(|t| app(lam("x", Term::var("x")), t)),
                (inner.clone(), inner.clone()).prop_map(|(a, b)| Rc::new(Term::Fst(
                    Rc::new(Term::Pair(a, b))
                ))),
                (inner.clone(), inner.clone()).prop_map(|(a, b)| Rc::new(Term::Snd(
                    Rc::new(Term::Pair(a, b))
                ))),
                inner
                    .clone()
                    .prop_map(|t| Rc::new(Term::PApp(plam("i", t), II::Dir(Dir::Zero)))),
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
        #[test]
        fn normalize_is_idempotent_on_generated_terms(t in nat_term()) {
            let m = machine();
            let nat = Rc::new(Term::Sum("Nat".into(), nat_labels()));
            let env = Env::empty().bind("Nat", m.eval(&nat, &Env::empty()).unwrap());
            let once = m.normalize(&t, &env).unwrap();
            let twice = m.normalize(&once, &env).unwrap();
            proptest::prop_assert_eq!(&once, &twice);
        }

        #[test]
        fn evaluation_agrees_with_normalization(t in nat_term()) {
            let m = machine();
            let nat = Rc::new(Term::Sum("Nat".into(), nat_labels()));
            let env = Env::empty().bind("Nat", m.eval(&nat, &Env::empty()).unwrap());
            let weak = m.eval(&t, &env).unwrap();
            let nf = m.normalize(&t, &env).unwrap();
            let renf = m.eval(&nf, &env).unwrap();
            proptest::prop_assert!(m.conv(&weak, &renf).unwrap());
        }
    }

    #[test]
    fn comp_metric_decreases_when_face_fills() {
        let m = machine();
        let i = IName::src("i");
        let nat = Rc::new(Term::Sum("Nat".into(), nat_labels()));
        let env = Env::empty().bind("Nat", m.eval(&nat, &Env::empty()).unwrap());
        let sys = System::from_entries(vec![(
            Face::eqn(i.clone(), Dir::One),
            plam("j", suc(zero())),
        )]);
        let t = Rc::new(Term::HComp(Term::var("Nat"), zero(), sys));
        let stuck = m.eval(&t, &env).unwrap();
        let before = stuck.comp_count();
        let after = m
            .act(&stuck, &i, &II::Dir(Dir::One))
            .unwrap()
            .comp_count();
        assert!(after < before, "{after} should drop below {before}");
    }
}

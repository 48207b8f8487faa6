/*!
Name resolution: surface [`Expr`]s to kernel [`Term`]s.

A [`Symbols`] table maps each top-level name to its [`NameKind`]. Later
declarations shadow earlier ones wholesale, and the set of names that were
ever shadowed is reported back so the session can warn about them.

Resolution also performs the surface desugarings:

  * parameter groups on a definition fold into `Pi` types and lambdas;
  * a `data` declaration becomes a definition whose body is a datatype
    former, parameterized by lambdas if it has parameters;
  * a constructor applied through an application spine collapses into a
    single constructor term;
  * a bare `split { .. }` at the top of a definition body takes the
    definition's declared result type as its motive.
*/

use std::rc::Rc;

use indexmap::IndexMap;
use kan_kernel::{Binder, Branch, Decl, DeclGroup, Dir, Face, II, IName, Label, System, Term};
use smol_str::SmolStr;
use thiserror::Error;

use crate::{Arm, Ctor, Data, Def, Expr, Group, IExpr, Item, Module, SysEntry};

/// What a top-level name stands for.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum NameKind {
    /// An ordinary definition. Datatypes land here too, since a `data`
    /// declaration resolves to a definition of its former.
    Def,
    /// A constructor of the named datatype.
    Con { data: SmolStr },
}

/// The top-level names in scope, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct Symbols {
    map: IndexMap<SmolStr, NameKind, fxhash::FxBuildHasher>,
}

impl Symbols {
    pub fn new() -> Symbols {
        Symbols::default()
    }

    /// Record a name, returning the kind it displaced if it was already
    /// declared.
    pub fn insert(&mut self, name: SmolStr, kind: NameKind) -> Option<NameKind> {
        self.map.insert(name, kind)
    }

    pub fn get(&self, name: &str) -> Option<&NameKind> {
        self.map.get(name)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// A name that does not resolve.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ResolveError {
    #[error("unbound name {0}")]
    Unbound(SmolStr),
    #[error("unbound interval variable {0}")]
    UnboundInterval(SmolStr),
    #[error("a face constrains {0} in both directions")]
    ContradictoryFace(SmolStr),
    #[error("a bare split is only allowed as the whole body of a definition")]
    SplitNeedsMotive,
    #[error("{0} is not a constructor")]
    NotAConstructor(SmolStr),
}

/// Resolve one expression against the table alone, as the prompt does.
pub fn resolve_expr(syms: &Symbols, e: &Expr) -> Result<Rc<Term>, ResolveError> {
    Scope::new(syms).resolve(e)
}

/// Resolve a module's items into declaration groups, extending `syms` as
/// declarations come into scope.
///
/// Names are entered before their own group is resolved, so a definition can
/// refer to itself and mutual members can refer to each other. The second
/// component lists the names this module shadowed.
pub fn resolve_module(
    syms: &mut Symbols,
    module: &Module,
) -> Result<(Vec<Rc<DeclGroup>>, Vec<SmolStr>), ResolveError> {
    let mut groups = Vec::new();
    let mut shadowed = Vec::new();
    for item in &module.items {
        match item {
            Item::Def(def) => {
                note_shadow(
                    syms.insert(def.name.clone(), NameKind::Def),
                    &def.name,
                    &mut shadowed,
                );
                let d = resolve_def(syms, def)?;
                groups.push(Rc::new(DeclGroup(vec![d])));
            }
            Item::Data(data) => {
                note_shadow(
                    syms.insert(data.name.clone(), NameKind::Def),
                    &data.name,
                    &mut shadowed,
                );
                let d = resolve_data(syms, data)?;
                for ctor in &data.ctors {
                    let kind = NameKind::Con {
                        data: data.name.clone(),
                    };
                    note_shadow(
                        syms.insert(ctor.name.clone(), kind),
                        &ctor.name,
                        &mut shadowed,
                    );
                }
                groups.push(Rc::new(DeclGroup(vec![d])));
            }
            Item::Mutual(defs) => {
                for def in defs {
                    note_shadow(
                        syms.insert(def.name.clone(), NameKind::Def),
                        &def.name,
                        &mut shadowed,
                    );
                }
                let ds = defs
                    .iter()
                    .map(|d| resolve_def(syms, d))
                    .collect::<Result<Vec<_>, _>>()?;
                groups.push(Rc::new(DeclGroup(ds)));
            }
            Item::Import(_) => {}
        }
    }
    Ok((groups, shadowed))
}

fn note_shadow(prev: Option<NameKind>, name: &SmolStr, out: &mut Vec<SmolStr>) {
    if prev.is_some() && !out.contains(name) {
        out.push(name.clone());
    }
}

/// Resolve one definition, folding its parameter groups into the type and
/// body.
fn resolve_def(syms: &Symbols, def: &Def) -> Result<Decl, ResolveError> {
    let mut scope = Scope::new(syms);
    let mut params = Vec::new();
    for (x, t) in flatten(&def.params) {
        let ty = scope.resolve(t)?;
        scope.vars.push(x.clone());
        params.push((x.clone(), ty));
    }
    let result_ty = scope.resolve(&def.ty)?;
    let mut body = match &def.body {
        // the declared result type is the motive of a bare split
        Expr::Split(None, arms) => {
            let branches = scope.branches(arms)?;
            Rc::new(Term::Split(def.name.clone(), result_ty.clone(), branches))
        }
        other => scope.resolve(other)?,
    };
    let mut ty = result_ty;
    for (x, pty) in params.into_iter().rev() {
        ty = Rc::new(Term::Pi(
            Binder {
                name: x.clone(),
                ty: pty,
            },
            ty,
        ));
        body = Rc::new(Term::Lam(x, None, body));
    }
    Ok(Decl {
        name: def.name.clone(),
        ty,
        body,
    })
}

/// Resolve a datatype declaration into the definition of its former.
///
/// The datatype's own name is already in `syms`, so constructor telescopes
/// may mention it recursively.
fn resolve_data(syms: &Symbols, data: &Data) -> Result<Decl, ResolveError> {
    let mut scope = Scope::new(syms);
    let mut params = Vec::new();
    for (x, t) in flatten(&data.params) {
        let ty = scope.resolve(t)?;
        scope.vars.push(x.clone());
        params.push((x.clone(), ty));
    }
    let mut labels = Vec::new();
    for Ctor { name, tele } in &data.ctors {
        let base = scope.vars.len();
        let mut fields = Vec::new();
        for (x, t) in flatten(tele) {
            let ty = scope.resolve(t)?;
            scope.vars.push(x.clone());
            fields.push((x.clone(), ty));
        }
        scope.vars.truncate(base);
        labels.push(Label {
            name: name.clone(),
            tele: fields,
        });
    }
    let mut ty = Rc::new(Term::U);
    let mut body = Rc::new(Term::Sum(data.name.clone(), labels.into()));
    for (x, pty) in params.into_iter().rev() {
        ty = Rc::new(Term::Pi(
            Binder {
                name: x.clone(),
                ty: pty,
            },
            ty,
        ));
        body = Rc::new(Term::Lam(x, None, body));
    }
    Ok(Decl {
        name: data.name.clone(),
        ty,
        body,
    })
}

fn flatten(groups: &[Group]) -> impl Iterator<Item = (&SmolStr, &Expr)> {
    groups
        .iter()
        .flat_map(|g| g.names.iter().map(move |x| (x, &g.ty)))
}

struct Scope<'a> {
    syms: &'a Symbols,
    vars: Vec<SmolStr>,
    ivars: Vec<SmolStr>,
}

impl<'a> Scope<'a> {
    fn new(syms: &'a Symbols) -> Scope<'a> {
        Scope {
            syms,
            vars: Vec::new(),
            ivars: Vec::new(),
        }
    }

    fn resolve(&mut self, e: &Expr) -> Result<Rc<Term>, ResolveError> {
        Ok(match e {
            Expr::Var(x) => {
                if self.vars.iter().any(|v| v == x) {
                    Term::var(x.clone())
                } else {
                    match self.syms.get(x) {
                        Some(NameKind::Def) => Term::var(x.clone()),
                        Some(NameKind::Con { data }) => {
                            Rc::new(Term::Con(data.clone(), x.clone(), Vec::new()))
                        }
                        None => return Err(ResolveError::Unbound(x.clone())),
                    }
                }
            }
            Expr::U => Rc::new(Term::U),
            Expr::App(f, a) => {
                let f = self.resolve(f)?;
                let a = self.resolve(a)?;
                // a constructor swallows its application spine
                match &*f {
                    Term::Con(d, c, args) => {
                        let mut args = args.clone();
                        args.push(a);
                        Rc::new(Term::Con(d.clone(), c.clone(), args))
                    }
                    _ => Rc::new(Term::App(f, a)),
                }
            }
            Expr::Lam(x, ann, body) => {
                let ann = ann.as_ref().map(|a| self.resolve(a)).transpose()?;
                let body = self.with_var(x, |s| s.resolve(body))?;
                Rc::new(Term::Lam(x.clone(), ann, body))
            }
            Expr::Pi(x, dom, cod) => {
                let dom = self.resolve(dom)?;
                let cod = self.with_var(x, |s| s.resolve(cod))?;
                Rc::new(Term::Pi(
                    Binder {
                        name: x.clone(),
                        ty: dom,
                    },
                    cod,
                ))
            }
            Expr::Sigma(x, dom, cod) => {
                let dom = self.resolve(dom)?;
                let cod = self.with_var(x, |s| s.resolve(cod))?;
                Rc::new(Term::Sigma(
                    Binder {
                        name: x.clone(),
                        ty: dom,
                    },
                    cod,
                ))
            }
            Expr::Pair(a, b) => Rc::new(Term::Pair(self.resolve(a)?, self.resolve(b)?)),
            Expr::Fst(t) => Rc::new(Term::Fst(self.resolve(t)?)),
            Expr::Snd(t) => Rc::new(Term::Snd(self.resolve(t)?)),
            Expr::Let(x, ty, bound, body) => {
                let ty = self.resolve(ty)?;
                let bound = self.resolve(bound)?;
                let body = self.with_var(x, |s| s.resolve(body))?;
                Rc::new(Term::Let(x.clone(), ty, bound, body))
            }
            Expr::Path(a, x, y) => {
                let line = Rc::new(Term::PLam(IName::src("_"), self.resolve(a)?));
                Rc::new(Term::Path(line, self.resolve(x)?, self.resolve(y)?))
            }
            Expr::PathP(p, x, y) => Rc::new(Term::Path(
                self.resolve(p)?,
                self.resolve(x)?,
                self.resolve(y)?,
            )),
            Expr::PLam(i, body) => {
                let body = self.with_ivar(i, |s| s.resolve(body))?;
                Rc::new(Term::PLam(IName::src(i.clone()), body))
            }
            Expr::PApp(t, r) => {
                let t = self.resolve(t)?;
                Rc::new(Term::PApp(t, self.interval(r)?))
            }
            Expr::System(entries) => Rc::new(Term::System(self.system(entries)?)),
            Expr::HComp(ty, base, sys) => Rc::new(Term::HComp(
                self.resolve(ty)?,
                self.resolve(base)?,
                self.system(sys)?,
            )),
            Expr::Transp(line, t) => {
                Rc::new(Term::Transp(self.resolve(line)?, self.resolve(t)?))
            }
            Expr::Glue(base, sys) => {
                Rc::new(Term::Glue(self.resolve(base)?, self.system(sys)?))
            }
            Expr::GlueElem(base, sys) => {
                Rc::new(Term::GlueElem(self.resolve(base)?, self.system(sys)?))
            }
            Expr::Unglue(t) => Rc::new(Term::Unglue(self.resolve(t)?)),
            Expr::Split(Some(motive), arms) => {
                let motive = self.resolve(motive)?;
                let branches = self.branches(arms)?;
                Rc::new(Term::Split(SmolStr::new("split"), motive, branches))
            }
            Expr::Split(None, _) => return Err(ResolveError::SplitNeedsMotive),
        })
    }

    fn branches(&mut self, arms: &[Arm]) -> Result<Rc<[Branch]>, ResolveError> {
        let mut out = Vec::with_capacity(arms.len());
        for arm in arms {
            if !matches!(self.syms.get(&arm.con), Some(NameKind::Con { .. })) {
                return Err(ResolveError::NotAConstructor(arm.con.clone()));
            }
            let base = self.vars.len();
            self.vars.extend(arm.binds.iter().cloned());
            let body = self.resolve(&arm.body);
            self.vars.truncate(base);
            out.push(Branch {
                con: arm.con.clone(),
                binds: arm.binds.clone(),
                body: body?,
            });
        }
        Ok(out.into())
    }

    fn system(&mut self, entries: &[SysEntry]) -> Result<System<Rc<Term>>, ResolveError> {
        let mut out = Vec::with_capacity(entries.len());
        for SysEntry { face, body } in entries {
            let face = self.face(face)?;
            out.push((face, self.resolve(body)?));
        }
        Ok(System::from_entries(out))
    }

    fn face(&self, eqns: &[(SmolStr, Dir)]) -> Result<Face, ResolveError> {
        let mut face = Face::top();
        for (i, d) in eqns {
            if !self.ivars.iter().any(|v| v == i) {
                return Err(ResolveError::UnboundInterval(i.clone()));
            }
            face = face
                .with(IName::src(i.clone()), *d)
                .ok_or_else(|| ResolveError::ContradictoryFace(i.clone()))?;
        }
        Ok(face)
    }

    fn interval(&self, r: &IExpr) -> Result<II, ResolveError> {
        match r {
            IExpr::Dir(d) => Ok(II::Dir(*d)),
            IExpr::Var(i) => {
                if self.ivars.iter().any(|v| v == i) {
                    Ok(II::Var(IName::src(i.clone())))
                } else {
                    Err(ResolveError::UnboundInterval(i.clone()))
                }
            }
        }
    }

    fn with_var<T>(
        &mut self,
        x: &SmolStr,
        f: impl FnOnce(&mut Self) -> Result<T, ResolveError>,
    ) -> Result<T, ResolveError> {
        self.vars.push(x.clone());
        let out = f(self);
        self.vars.pop();
        out
    }

    fn with_ivar<T>(
        &mut self,
        i: &SmolStr,
        f: impl FnOnce(&mut Self) -> Result<T, ResolveError>,
    ) -> Result<T, ResolveError> {
        self.ivars.push(i.clone());
        let out = f(self);
        self.ivars.pop();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_module;

    fn module(src: &str) -> (Vec<Rc<DeclGroup>>, Vec<SmolStr>, Symbols) {
        let m = parse_module(src).unwrap();
        let mut syms = Symbols::new();
        let (groups, shadowed) = resolve_module(&mut syms, &m).unwrap();
        (groups, shadowed, syms)
    }

    #[test]
    fn constructor_spines_collapse() {
        let (groups, _, syms) = module(
            "module t where\n\
             data Nat = zero | suc (n : Nat)\n\
             two : Nat = suc (suc zero)\n",
        );
        assert_eq!(groups.len(), 2);
        let e = resolve_expr(&syms, &crate::parse_expr("suc zero").unwrap()).unwrap();
        let Term::Con(data, con, args) = &*e else {
            panic!("expected a constructor");
        };
        assert_eq!(data, "Nat");
        assert_eq!(con, "suc");
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn shadowed_names_are_exactly_the_repeats() {
        let (_, shadowed, _) = module(
            "module t where\n\
             a : U = U\n\
             b : U = U\n\
             a : U = U\n\
             a : U = U\n",
        );
        assert_eq!(shadowed, vec![SmolStr::new("a")]);
    }

    #[test]
    fn unbound_names_are_reported() {
        let m = parse_module("module t where\nx : U = missing\n").unwrap();
        let mut syms = Symbols::new();
        let err = resolve_module(&mut syms, &m).unwrap_err();
        assert_eq!(err, ResolveError::Unbound(SmolStr::new("missing")));
    }

    #[test]
    fn parameters_fold_into_the_declaration() {
        let (groups, _, _) = module("module t where\nid (A : U) (a : A) : A = a\n");
        let d = &groups[0].0[0];
        let Term::Pi(b, cod) = &*d.ty else {
            panic!("expected a pi type");
        };
        assert_eq!(b.name, "A");
        assert!(matches!(&**cod, Term::Pi(..)));
        let Term::Lam(x, None, inner) = &*d.body else {
            panic!("expected a lambda");
        };
        assert_eq!(x, "A");
        assert!(matches!(&**inner, Term::Lam(..)));
    }

    #[test]
    fn bare_split_takes_the_signature_as_motive() {
        let (groups, _, _) = module(
            "module t where\n\
             data Nat = zero | suc (n : Nat)\n\
             pred : (n : Nat) -> Nat = split {\n\
             \x20 zero -> zero ;\n\
             \x20 suc n -> n\n\
             }\n",
        );
        let d = groups[1].decl("pred").unwrap();
        let Term::Split(name, motive, branches) = &*d.body else {
            panic!("expected a split");
        };
        assert_eq!(name, "pred");
        assert!(matches!(&**motive, Term::Pi(..)));
        assert_eq!(branches.len(), 2);
    }

    #[test]
    fn bare_split_under_parameters_sees_them() {
        let (groups, _, _) = module(
            "module t where\n\
             data Nat = zero | suc (n : Nat)\n\
             add (m : Nat) : (n : Nat) -> Nat = split {\n\
             \x20 zero -> m ;\n\
             \x20 suc n -> suc (add m n)\n\
             }\n",
        );
        let d = groups[1].decl("add").unwrap();
        let Term::Lam(m, None, inner) = &*d.body else {
            panic!("expected a parameter lambda");
        };
        assert_eq!(m, "m");
        assert!(matches!(&**inner, Term::Split(..)));
    }

    #[test]
    fn nested_bare_split_is_rejected() {
        let m = parse_module(
            "module t where\n\
             data Nat = zero\n\
             f : Nat -> Nat = \\n -> (split { zero -> n }) n\n",
        )
        .unwrap();
        let mut syms = Symbols::new();
        assert_eq!(
            resolve_module(&mut syms, &m).unwrap_err(),
            ResolveError::SplitNeedsMotive
        );
    }

    #[test]
    fn faces_must_be_consistent() {
        let (_, _, syms) = module("module t where\nA : U = U\n");
        let e = crate::parse_expr("<i> hcomp A A [ (i=0)(i=1) -> A ]").unwrap();
        assert_eq!(
            resolve_expr(&syms, &e).unwrap_err(),
            ResolveError::ContradictoryFace(SmolStr::new("i"))
        );
    }

    #[test]
    fn interval_variables_must_be_bound() {
        let (_, _, syms) = module("module t where\nA : U = U\n");
        let e = crate::parse_expr("<i> A").unwrap();
        assert!(resolve_expr(&syms, &e).is_ok());
        let e = crate::parse_expr("\\p -> p @ i").unwrap();
        assert_eq!(
            resolve_expr(&syms, &e).unwrap_err(),
            ResolveError::UnboundInterval(SmolStr::new("i"))
        );
    }

    #[test]
    fn datatypes_may_recurse() {
        let (groups, _, syms) = module("module t where\ndata Nat = zero | suc (n : Nat)\n");
        assert!(matches!(syms.get("suc"), Some(NameKind::Con { data }) if data == "Nat"));
        let d = &groups[0].0[0];
        let Term::Sum(name, labels) = &*d.body else {
            panic!("expected a datatype former");
        };
        assert_eq!(name, "Nat");
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[1].tele.len(), 1);
    }

    proptest::proptest! {
        /// The shadow set is exactly the names declared more than once,
        /// whatever order the declarations arrive in.
        #[test]
        fn shadow_set_is_the_repeated_names(
            names in proptest::collection::vec(
                proptest::sample::select(vec!["a", "b", "c", "d"]),
                1..10,
            )
        ) {
            let mut src = String::from("module t where\n");
            for n in &names {
                src.push_str(&format!("{n} : U = U\n"));
            }
            let (_, shadowed, _) = module(&src);
            let mut expected: Vec<SmolStr> = names
                .iter()
                .filter(|n| names.iter().filter(|m| m == n).count() > 1)
                .map(|n| SmolStr::new(n))
                .collect();
            expected.sort();
            expected.dedup();
            let mut got = shadowed;
            got.sort();
            proptest::prop_assert_eq!(got, expected);
        }
    }

    #[test]
    fn parameterized_datatype_former_is_a_lambda() {
        let (groups, _, _) = module("module t where\ndata Box (A : U) = box (a : A)\n");
        let d = &groups[0].0[0];
        assert!(matches!(&*d.ty, Term::Pi(..)));
        let Term::Lam(x, None, inner) = &*d.body else {
            panic!("expected a parameter lambda");
        };
        assert_eq!(x, "A");
        assert!(matches!(&**inner, Term::Sum(..)));
    }
}

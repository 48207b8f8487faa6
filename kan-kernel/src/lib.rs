/*!
The kernel of a checker for a small cubical type theory.

The crate is split along the classic phases of normalization by
evaluation:

- [`term`] is the syntax: checked core terms, interval expressions,
  faces and systems.
- [`value`] is the semantic domain: weak values, neutral spines, and
  persistent environments with declaration-group nodes for recursion.
- [`eval`] is the machine: reduction, interval substitution,
  conversion and readback, all behind one interruptible [`Machine`].
- [`check`] is the bidirectional type checker driving the machine.

Terms only enter the evaluator after checking; the evaluator reports
any shape that checking should have ruled out as an internal error
instead of panicking.
*/

pub mod check;
pub mod eval;
pub mod term;
pub mod value;

pub use check::{Checker, Ctx, Sigs, TypeError};
pub use eval::{EvalError, Interrupt, Machine, MachineFlags, SysRes};
pub use term::{
    Binder, Branch, Decl, DeclGroup, Dir, Face, II, IName, Label, System, Term,
};
pub use value::{Closure, Env, Hit, IClosure, Neutral, Value};
